use std::path::PathBuf;

use thiserror::Error;

/// Failures writing a table file. Reads never fail; they degrade to empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        StoreError::Csv { path: path.into(), source }
    }
}

/// Failures reported by the search and extraction collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("search for '{query}' could not be opened: {reason}")]
    SearchUnavailable { query: String, reason: String },

    #[error("page navigation failed: {0}")]
    Navigation(String),

    #[error("no resume recorded for {link}")]
    ResumeNotFound { link: String },

    #[error("extraction failed for {link}: {reason}")]
    Extraction { link: String, reason: String },
}

/// Errors at the per-query and per-run boundaries of the collection loop.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no search queries configured (set SEARCH_QUERY or pass --query)")]
    NoQueries,

    #[error("search failed: {0}")]
    Search(#[from] SourceError),

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}
