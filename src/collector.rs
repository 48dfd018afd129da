use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{CollectError, StoreError};
use crate::index::IdIndex;
use crate::record::{Record, ID_FIELD};
use crate::settings::Settings;
use crate::source::{RecordExtractor, SearchBackend, SearchSession};
use crate::store;

/// Why collection for a query stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEnd {
    /// The per-query file already held enough rows; nothing was searched.
    Saturated,
    /// No more cards, links or result pages.
    Exhausted,
    /// `resume_limit` new resumes were saved.
    LimitReached,
}

/// Per-query state for one collection pass.
#[derive(Debug)]
pub struct QueryContext {
    pub query: String,
    pub path: PathBuf,
    pub index: IdIndex,
    /// Resumes that were new to the combined file.
    pub saved: usize,
}

impl QueryContext {
    pub fn open(query: &str, combined_path: &Path) -> Self {
        let path = store::query_output_path(combined_path, query);
        let index = store::load_identifiers(&path);
        QueryContext {
            query: query.to_string(),
            path,
            index,
            saved: 0,
        }
    }
}

#[derive(Debug)]
pub struct QueryReport {
    pub query: String,
    pub saved: usize,
    /// `Err` carries the message of the failure that cut the query short.
    pub outcome: Result<QueryEnd, String>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub queries: Vec<QueryReport>,
    pub combined_path: PathBuf,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.queries.iter().map(|q| q.saved).sum()
    }

    pub fn saved_for(&self, query: &str) -> Option<usize> {
        self.queries.iter().find(|q| q.query == query).map(|q| q.saved)
    }

    pub fn print(&self) {
        println!("Results by query:");
        for q in &self.queries {
            let note = match &q.outcome {
                Ok(QueryEnd::Saturated) => " (skipped, already saturated)",
                Ok(QueryEnd::LimitReached) => " (limit reached)",
                Ok(QueryEnd::Exhausted) => "",
                Err(_) => " (failed)",
            };
            println!("  - {}: {} new resumes{}", q.query, q.saved, note);
        }
        println!("Total new resumes: {}", self.total());
        println!("Combined file: {}", self.combined_path.display());
    }
}

/// Drives one collection pass per configured query.
pub struct Collector<'a, B, E> {
    settings: &'a Settings,
    search: B,
    extractor: E,
}

impl<'a, B, E> Collector<'a, B, E>
where
    B: SearchBackend,
    E: RecordExtractor,
{
    pub fn new(settings: &'a Settings, search: B, extractor: E) -> Self {
        Collector {
            settings,
            search,
            extractor,
        }
    }

    /// Collect every query in order. Only an empty query list is fatal; a
    /// failing query is logged and keeps whatever it saved before failing.
    pub fn run(&mut self) -> Result<RunSummary, CollectError> {
        let settings = self.settings;
        if settings.queries.is_empty() {
            return Err(CollectError::NoQueries);
        }

        info!(
            "Collecting {} queries (limit {}, skip at {} rows, page wait {:?})",
            settings.queries.len(),
            settings.resume_limit,
            settings.existing_record_threshold,
            settings.wait_timeout
        );
        let mut combined = store::load_identifiers(&settings.output_path);
        info!(
            "Loaded {} known resumes from {}",
            combined.len(),
            settings.output_path.display()
        );

        let pb = query_progress(settings);
        let mut reports = Vec::with_capacity(settings.queries.len());

        for query in &settings.queries {
            pb.set_message(query.clone());
            let mut ctx = QueryContext::open(query, &settings.output_path);
            let outcome = self.collect_query(&mut ctx, &mut combined);

            match &outcome {
                Ok(end) => info!("New resumes for '{}': {} ({:?})", query, ctx.saved, end),
                Err(e) => error!("Query '{}' failed after {} new resumes: {}", query, ctx.saved, e),
            }
            reports.push(QueryReport {
                query: ctx.query,
                saved: ctx.saved,
                outcome: outcome.map_err(|e| e.to_string()),
            });
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(RunSummary {
            queries: reports,
            combined_path: settings.output_path.clone(),
        })
    }

    fn collect_query(
        &mut self,
        ctx: &mut QueryContext,
        combined: &mut IdIndex,
    ) -> Result<QueryEnd, CollectError> {
        let threshold = self.settings.existing_record_threshold;
        let existing = store::count_records(&ctx.path);
        if existing >= threshold {
            info!(
                "Skipping '{}': {} stored resumes (threshold {})",
                ctx.query, existing, threshold
            );
            return Ok(QueryEnd::Saturated);
        }

        info!("Collecting resumes for '{}'", ctx.query);
        let mut session = self.search.open_search(&ctx.query)?;

        loop {
            let cards = session.next_batch()?;
            if cards.is_empty() {
                info!("No resumes found for '{}'", ctx.query);
                return Ok(QueryEnd::Exhausted);
            }

            let links = session.extract_links(&cards);
            if links.is_empty() {
                info!("No resume links on the current page for '{}'", ctx.query);
                return Ok(QueryEnd::Exhausted);
            }

            for link in &links {
                if self.limit_reached(ctx) {
                    info!("Resume limit {} reached for '{}'", self.settings.resume_limit, ctx.query);
                    return Ok(QueryEnd::LimitReached);
                }
                self.collect_item(ctx, combined, link)?;
            }

            if self.limit_reached(ctx) {
                info!("Resume limit {} reached for '{}'", self.settings.resume_limit, ctx.query);
                return Ok(QueryEnd::LimitReached);
            }
            if !session.advance_page()? {
                info!("Last result page reached for '{}'", ctx.query);
                return Ok(QueryEnd::Exhausted);
            }
        }
    }

    /// Extract one resume and store it in both tables. Returns whether it was
    /// new to the combined table, which is what counts toward the query.
    fn collect_item(
        &mut self,
        ctx: &mut QueryContext,
        combined: &mut IdIndex,
        link: &str,
    ) -> Result<bool, StoreError> {
        info!("Opening resume {}", link);
        let record = match self.extractor.extract_record(link) {
            Ok(record) => record,
            Err(e) => {
                warn!("Could not parse resume {}: {}", link, e);
                return Ok(false);
            }
        };

        store::append_record(&record, &ctx.path, &mut ctx.index)?;
        let added = store::append_record(&record, &self.settings.output_path, combined)?;

        if added {
            ctx.saved += 1;
            info!("Saved resume ({}) to the combined file", field_or(&record, "full_name", "unknown"));
        } else {
            let id = field_or(&record, ID_FIELD, "");
            let label = if id.is_empty() { field_or(&record, "url", link) } else { id };
            info!("Resume already saved earlier: {}", label);
        }
        Ok(added)
    }

    fn limit_reached(&self, ctx: &QueryContext) -> bool {
        let limit = self.settings.resume_limit;
        limit > 0 && ctx.saved >= limit
    }
}

fn query_progress(settings: &Settings) -> ProgressBar {
    if !settings.show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(settings.queries.len() as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

fn field_or(record: &Record, field: &str, default: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use serde_json::json;
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default, Clone)]
    struct Calls {
        opened: Rc<Cell<usize>>,
        extracted: Rc<Cell<usize>>,
    }

    /// Each card is `Some(link)` or `None` for a card without a title link.
    struct FakeSearch {
        pages: HashMap<String, Vec<Vec<Option<String>>>>,
        unavailable: HashSet<String>,
        broken_pager: HashSet<String>,
        calls: Calls,
    }

    struct FakeSession {
        query: String,
        pages: Vec<Vec<Option<String>>>,
        page: usize,
        broken_pager: bool,
    }

    impl SearchBackend for FakeSearch {
        type Session = FakeSession;

        fn open_search(&mut self, query: &str) -> Result<FakeSession, SourceError> {
            self.calls.opened.set(self.calls.opened.get() + 1);
            if self.unavailable.contains(query) {
                return Err(SourceError::SearchUnavailable {
                    query: query.to_string(),
                    reason: "search input never became clickable".into(),
                });
            }
            Ok(FakeSession {
                query: query.to_string(),
                pages: self.pages.get(query).cloned().unwrap_or_default(),
                page: 0,
                broken_pager: self.broken_pager.contains(query),
            })
        }
    }

    impl SearchSession for FakeSession {
        type Item = Option<String>;

        fn next_batch(&mut self) -> Result<Vec<Option<String>>, SourceError> {
            Ok(self.pages.get(self.page).cloned().unwrap_or_default())
        }

        fn extract_links(&mut self, items: &[Option<String>]) -> Vec<String> {
            items.iter().flatten().cloned().collect()
        }

        fn advance_page(&mut self) -> Result<bool, SourceError> {
            if self.broken_pager {
                return Err(SourceError::Navigation(format!("pager vanished for {}", self.query)));
            }
            if self.page + 1 < self.pages.len() {
                self.page += 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    /// Links starting with `bad` fail; every other link yields a resume whose
    /// id is the link itself.
    struct FakeExtractor {
        calls: Calls,
    }

    impl RecordExtractor for FakeExtractor {
        fn extract_record(&mut self, link: &str) -> Result<Record, SourceError> {
            self.calls.extracted.set(self.calls.extracted.get() + 1);
            if link.starts_with("bad") {
                return Err(SourceError::Extraction {
                    link: link.to_string(),
                    reason: "name block missing".into(),
                });
            }
            let mut r = Record::new();
            r.insert(ID_FIELD.into(), json!(link));
            r.insert("url".into(), json!(format!("https://hh.ru/resume/{link}")));
            r.insert("full_name".into(), json!(format!("Candidate {link}")));
            Ok(r)
        }
    }

    fn links(ids: &[&str]) -> Vec<Option<String>> {
        ids.iter().map(|s| Some(s.to_string())).collect()
    }

    fn fakes(pages: Vec<(&str, Vec<Vec<Option<String>>>)>) -> (FakeSearch, FakeExtractor, Calls) {
        let calls = Calls::default();
        let search = FakeSearch {
            pages: pages.into_iter().map(|(q, p)| (q.to_string(), p)).collect(),
            unavailable: HashSet::new(),
            broken_pager: HashSet::new(),
            calls: calls.clone(),
        };
        let extractor = FakeExtractor { calls: calls.clone() };
        (search, extractor, calls)
    }

    fn settings(dir: &Path, queries: &[&str]) -> Settings {
        Settings {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            resume_limit: 0,
            existing_record_threshold: 1500,
            output_path: dir.join("resumes.csv"),
            wait_timeout: Duration::from_secs(1),
            show_progress: false,
        }
    }

    fn seed(path: &Path, ids: &[&str]) {
        let mut idx = IdIndex::new();
        for id in ids {
            let mut r = Record::new();
            r.insert(ID_FIELD.into(), json!(id));
            store::append_record(&r, path, &mut idx).unwrap();
        }
    }

    #[test]
    fn two_queries_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["a", "b"]);
        seed(&s.output_path, &["b1"]);
        let before = store::count_records(&s.output_path);

        let (search, extractor, _) = fakes(vec![
            ("a", vec![links(&["a1", "a2", "a1"])]),
            ("b", vec![links(&["b1"])]),
        ]);
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert_eq!(summary.saved_for("a"), Some(2));
        assert_eq!(summary.saved_for("b"), Some(0));
        assert_eq!(summary.total(), 2);
        assert_eq!(store::count_records(&s.output_path), before + 2);

        let per_a = store::query_output_path(&s.output_path, "a");
        let per_b = store::query_output_path(&s.output_path, "b");
        assert_eq!(store::count_records(&per_a), 2);
        // New to the per-query file even though the combined file knew it.
        assert_eq!(store::count_records(&per_b), 1);
    }

    #[test]
    fn saturated_query_does_no_search_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["a"]);
        s.existing_record_threshold = 3;
        seed(&store::query_output_path(&s.output_path, "a"), &["x", "y", "z"]);

        let (search, extractor, calls) = fakes(vec![("a", vec![links(&["a1"])])]);
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert_eq!(summary.queries[0].outcome, Ok(QueryEnd::Saturated));
        assert_eq!(summary.total(), 0);
        assert_eq!(calls.opened.get(), 0);
        assert_eq!(calls.extracted.get(), 0);
        assert!(!s.output_path.exists());
    }

    #[test]
    fn limit_stops_mid_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["a"]);
        s.resume_limit = 2;

        let (search, extractor, calls) =
            fakes(vec![("a", vec![links(&["a1", "a2", "a3"]), links(&["a4"])])]);
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert_eq!(summary.queries[0].outcome, Ok(QueryEnd::LimitReached));
        assert_eq!(summary.total(), 2);
        assert_eq!(calls.extracted.get(), 2);
    }

    #[test]
    fn walks_all_pages_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["a"]);

        let (search, extractor, _) = fakes(vec![(
            "a",
            vec![links(&["a1", "a2"]), vec![None, Some("a3".into())], links(&["a4"])],
        )]);
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert_eq!(summary.queries[0].outcome, Ok(QueryEnd::Exhausted));
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn failed_extraction_skips_only_that_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["a"]);
        s.resume_limit = 2;

        let (search, extractor, _) = fakes(vec![("a", vec![links(&["bad1", "a1", "bad2", "a2"])])]);
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert_eq!(summary.saved_for("a"), Some(2));
        assert_eq!(summary.queries[0].outcome, Ok(QueryEnd::LimitReached));
        assert_eq!(store::count_records(&s.output_path), 2);
    }

    #[test]
    fn failing_query_keeps_partial_count_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["down", "flaky", "ok"]);

        let (mut search, extractor, _) = fakes(vec![
            ("flaky", vec![links(&["f1"]), links(&["f2"])]),
            ("ok", vec![links(&["o1"])]),
        ]);
        search.unavailable.insert("down".into());
        search.broken_pager.insert("flaky".into());
        let summary = Collector::new(&s, search, extractor).run().unwrap();

        assert!(summary.queries[0].outcome.is_err());
        assert_eq!(summary.saved_for("down"), Some(0));
        assert!(summary.queries[1].outcome.is_err());
        assert_eq!(summary.saved_for("flaky"), Some(1));
        assert_eq!(summary.queries[2].outcome, Ok(QueryEnd::Exhausted));
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn rerun_adds_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["a"]);

        for expected in [2, 0] {
            let (search, extractor, _) = fakes(vec![("a", vec![links(&["a1", "a2"])])]);
            let summary = Collector::new(&s, search, extractor).run().unwrap();
            assert_eq!(summary.total(), expected);
        }
        assert_eq!(store::count_records(&s.output_path), 2);
    }

    #[test]
    fn no_queries_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &[]);
        let (search, extractor, calls) = fakes(vec![]);

        let err = Collector::new(&s, search, extractor).run().unwrap_err();
        assert!(matches!(err, CollectError::NoQueries));
        assert_eq!(calls.opened.get(), 0);
    }
}
