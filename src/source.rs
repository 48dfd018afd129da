//! Seams to the page-driving side: search result navigation and per-resume
//! extraction. The collection loop only ever talks to these traits.

use crate::error::SourceError;
use crate::record::Record;

/// Opens a search for one query.
pub trait SearchBackend {
    type Session: SearchSession;

    fn open_search(&mut self, query: &str) -> Result<Self::Session, SourceError>;
}

/// One open search, positioned on a result page.
pub trait SearchSession {
    /// Opaque handle to a result card. Only valid for the current page.
    type Item;

    /// Cards on the current page; empty when there are none.
    fn next_batch(&mut self) -> Result<Vec<Self::Item>, SourceError>;

    /// Resume links for the given cards. Cards without a link are dropped.
    fn extract_links(&mut self, items: &[Self::Item]) -> Vec<String>;

    /// Move to the next result page. `Ok(false)` when this was the last one.
    fn advance_page(&mut self) -> Result<bool, SourceError>;
}

/// Turns a resume link into a flat record.
pub trait RecordExtractor {
    fn extract_record(&mut self, link: &str) -> Result<Record, SourceError>;
}
