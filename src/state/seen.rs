use std::collections::HashSet;

/// Product ids already present in the dataset
///
/// Seeded from the dataset at startup and extended as records are appended, so
/// it holds across restarts and resumed runs.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    ids: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Records an id; returns false if it was already known
    pub fn mark(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
