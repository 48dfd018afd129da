use std::collections::HashSet;

/// Identifiers already stored in one table file.
///
/// Derived state: rebuilt from the file on every run by
/// [`crate::store::load_identifiers`] and never written back on its own.
#[derive(Debug, Default, Clone)]
pub struct IdIndex {
    ids: HashSet<String>,
}

impl IdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id was already known.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for IdIndex {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        IdIndex {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
