use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_OUTPUT_PATH: &str = "data/resumes.csv";
const DEFAULT_RESUME_LIMIT: u64 = 500;
const DEFAULT_RECORD_THRESHOLD: u64 = 1500;
const DEFAULT_WAIT_SECS: f64 = 10.0;

/// Resolved run configuration. Built once in `main`, then passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub queries: Vec<String>,
    /// New resumes to save per query; 0 means no limit.
    pub resume_limit: usize,
    /// Per-query files with at least this many rows are skipped.
    pub existing_record_threshold: usize,
    /// Combined table; per-query tables live next to it.
    pub output_path: PathBuf,
    /// Upper bound for a single blocking wait on the page-driving side.
    pub wait_timeout: Duration,
    pub show_progress: bool,
}

/// Values given on the command line; each one beats file and env settings.
#[derive(Debug, Default)]
pub struct Overrides {
    pub queries: Vec<String>,
    pub resume_limit: Option<usize>,
    pub existing_record_threshold: Option<usize>,
    pub output_path: Option<PathBuf>,
    pub show_progress: Option<bool>,
}

/// Shape of the merged defaults + `collector.toml` + environment.
#[derive(Debug, Deserialize)]
struct RawSettings {
    search_query: String,
    resume_limit: u64,
    existing_record_limit: u64,
    output_path: String,
    wait_timeout: f64,
}

impl Settings {
    /// Layer defaults, optional `collector.toml`, `.env` + environment
    /// (`SEARCH_QUERY`, `RESUME_LIMIT`, `EXISTING_RECORD_LIMIT`, `OUTPUT_PATH`,
    /// `WAIT_TIMEOUT`) and finally the CLI overrides.
    pub fn load(overrides: Overrides) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let raw: RawSettings = config::Config::builder()
            .set_default("search_query", "")?
            .set_default("resume_limit", DEFAULT_RESUME_LIMIT as i64)?
            .set_default("existing_record_limit", DEFAULT_RECORD_THRESHOLD as i64)?
            .set_default("output_path", DEFAULT_OUTPUT_PATH)?
            .set_default("wait_timeout", DEFAULT_WAIT_SECS)?
            .add_source(config::File::with_name("collector").required(false))
            .add_source(config::Environment::default().ignore_empty(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings (check RESUME_LIMIT, EXISTING_RECORD_LIMIT, WAIT_TIMEOUT)")?;
        debug!(?raw, "Raw settings");

        Ok(Self::resolve(raw, overrides))
    }

    fn resolve(raw: RawSettings, overrides: Overrides) -> Self {
        let queries = if overrides.queries.is_empty() {
            split_queries(&raw.search_query)
        } else {
            overrides
                .queries
                .iter()
                .flat_map(|q| split_queries(q))
                .collect()
        };

        Settings {
            queries,
            resume_limit: overrides
                .resume_limit
                .unwrap_or(raw.resume_limit as usize),
            existing_record_threshold: overrides
                .existing_record_threshold
                .unwrap_or(raw.existing_record_limit as usize),
            output_path: overrides
                .output_path
                .unwrap_or_else(|| PathBuf::from(raw.output_path)),
            wait_timeout: Duration::from_secs_f64(raw.wait_timeout.max(0.0)),
            show_progress: overrides.show_progress.unwrap_or(true),
        }
    }
}

/// `"rust, go,,"` → `["rust", "go"]`
fn split_queries(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}
