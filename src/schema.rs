//! Field name ↔ index mappings and buffer locations.

use indexmap::IndexSet;

/// Name of the reserved last output field; also the header marker payload.
pub const CONTROL_FIELD: &str = ".";

/// Ordered set of field names where a field's position is its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    names: IndexSet<String>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from names in order. Repeated names keep their first index.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a name, returning its index (existing index if already present).
    pub fn push(&mut self, name: impl Into<String>) -> usize {
        self.names.insert_full(name.into()).0
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get_index(index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// The three per-record value buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Buffer {
    /// Fields as read from the input
    Raw,
    /// Intermediate transform values, never written out
    Scratch,
    /// The record that is written to the wire
    Output,
}

/// A value slot: buffer plus index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub buffer: Buffer,
    pub index: usize,
}

impl Location {
    pub fn raw(index: usize) -> Self {
        Self { buffer: Buffer::Raw, index }
    }

    pub fn scratch(index: usize) -> Self {
        Self { buffer: Buffer::Scratch, index }
    }

    pub fn output(index: usize) -> Self {
        Self { buffer: Buffer::Output, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lookup_both_ways() {
        let schema = FieldSchema::from_names(["time", "metric", "value"]);

        assert_eq!(schema.index_of("metric"), Some(1));
        assert_eq!(schema.name_at(2), Some("value"));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.name_at(3), None);
    }

    #[test]
    fn test_repeated_names_keep_first_index() {
        let mut schema = FieldSchema::from_names(["a", "b", "a"]);

        assert_eq!(schema.len(), 2);
        assert_eq!(schema.push("b"), 1);
        assert_eq!(schema.push("c"), 2);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
