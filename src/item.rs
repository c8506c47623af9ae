use serde::Serialize;
use std::fmt;

/// A value emitted by a producer, tagged with its position in the source sequence.
///
/// Sequence indices start at 1 and grow by one per emission, so the indices that
/// reach a consumer reveal exactly which items a policy discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Item<T> {
    seq: u64,
    value: T,
}

impl<T> Item<T> {
    pub fn new(seq: u64, value: T) -> Self {
        Self { seq, value }
    }

    /// Position of this item in its source sequence
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the payload, keeping the sequence index
    pub fn map<U, F>(self, f: F) -> Item<U>
    where
        F: FnOnce(T) -> U,
    {
        Item {
            seq: self.seq,
            value: f(self.value),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Item<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}
