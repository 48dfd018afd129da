//! Replays a recorded search session from a JSON capture file.
//!
//! ```json
//! {
//!   "searches": { "rust developer": [[{"title": "...", "link": "https://hh.ru/resume/ab12"}]] },
//!   "resumes":  { "https://hh.ru/resume/ab12": {"full_name": "...", "key_skills": ["Rust"]} }
//! }
//! ```
//!
//! `searches` maps a query to its result pages, each a list of cards.
//! `resumes` maps a resume link to the fields extracted from its page.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::record::{Record, ID_FIELD};
use crate::source::{RecordExtractor, SearchBackend, SearchSession};

/// A search result card as it appeared on the page.
#[derive(Debug, Clone, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Capture {
    #[serde(default)]
    searches: HashMap<String, Vec<Vec<Card>>>,
    #[serde(default)]
    resumes: HashMap<String, Record>,
}

impl Capture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read capture {:?}", path))?;
        let capture = Self::from_json(&text)
            .with_context(|| format!("Failed to parse capture {:?}", path))?;
        info!(
            "Loaded capture with {} searches and {} resumes",
            capture.searches.len(),
            capture.resumes.len()
        );
        Ok(capture)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Separate the search side from the extraction side.
    pub fn split(self) -> (CaptureSearch, CaptureResumes) {
        (
            CaptureSearch {
                searches: self.searches,
            },
            CaptureResumes {
                resumes: self.resumes,
            },
        )
    }
}

pub struct CaptureSearch {
    searches: HashMap<String, Vec<Vec<Card>>>,
}

pub struct CaptureSession {
    pages: Vec<Vec<Card>>,
    page: usize,
}

impl SearchBackend for CaptureSearch {
    type Session = CaptureSession;

    fn open_search(&mut self, query: &str) -> Result<CaptureSession, SourceError> {
        let pages = self.searches.get(query.trim()).cloned().unwrap_or_default();
        if pages.is_empty() {
            info!("Capture has no results for '{}'", query);
        }
        Ok(CaptureSession { pages, page: 0 })
    }
}

impl SearchSession for CaptureSession {
    type Item = Card;

    fn next_batch(&mut self) -> Result<Vec<Card>, SourceError> {
        Ok(self.pages.get(self.page).cloned().unwrap_or_default())
    }

    fn extract_links(&mut self, items: &[Card]) -> Vec<String> {
        items
            .iter()
            .filter_map(|card| match card.link.as_deref().map(str::trim) {
                Some(link) if !link.is_empty() => Some(link.to_string()),
                _ => {
                    info!(
                        "Card without a title link was skipped ({})",
                        card.title.as_deref().unwrap_or("untitled")
                    );
                    None
                }
            })
            .collect()
    }

    fn advance_page(&mut self) -> Result<bool, SourceError> {
        if self.page + 1 >= self.pages.len() {
            info!("Reached the final page of search results");
            return Ok(false);
        }
        self.page += 1;
        debug!("Moved to result page {}", self.page + 1);
        Ok(true)
    }
}

pub struct CaptureResumes {
    resumes: HashMap<String, Record>,
}

impl RecordExtractor for CaptureResumes {
    /// Recorded fields for `link`, with `resume_id` and `url` filled in from
    /// the link when the recording lacks them. `resume_id` and `url` lead.
    fn extract_record(&mut self, link: &str) -> Result<Record, SourceError> {
        let recorded = self
            .resumes
            .get(link)
            .ok_or_else(|| SourceError::ResumeNotFound {
                link: link.to_string(),
            })?;

        let mut record = Record::with_capacity(recorded.len() + 2);
        let id = match recorded.get(ID_FIELD) {
            Some(v) if !is_blank(v) => v.clone(),
            _ => Value::String(resume_id_from_link(link)),
        };
        record.insert(ID_FIELD.to_string(), id);
        let url = match recorded.get("url") {
            Some(v) if !is_blank(v) => v.clone(),
            _ => Value::String(link.to_string()),
        };
        record.insert("url".to_string(), url);
        for (key, value) in recorded {
            if key != ID_FIELD && key != "url" {
                record.insert(key.clone(), value.clone());
            }
        }
        Ok(record)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Last path segment of a resume URL: `https://hh.ru/resume/ab12/?from=x` → `ab12`.
fn resume_id_from_link(link: &str) -> String {
    let after_scheme = link.split_once("://").map_or(link, |(_, rest)| rest);
    let path = after_scheme
        .find('/')
        .map_or("", |i| &after_scheme[i..]);
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}
