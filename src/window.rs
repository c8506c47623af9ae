use crate::error::{PipelineError, Result};
use crate::item::Item;
use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use std::fmt;

/// A contiguous batch of items emitted as one aggregate unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<T> {
    items: Vec<Item<T>>,
}

impl<T> Window<T> {
    /// Sequence index of the first member
    pub fn start_seq(&self) -> u64 {
        self.items.first().map_or(0, Item::seq)
    }

    /// Sequence index of the last member
    pub fn end_seq(&self) -> u64 {
        self.items.last().map_or(0, Item::seq)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item<T>] {
        &self.items
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(Item::value)
    }

    pub fn into_values(self) -> Vec<T> {
        self.items.into_iter().map(Item::into_value).collect()
    }
}

impl<T: fmt::Display> fmt::Display for Window<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, value) in self.values().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

/// Groups an ordered sequence into consecutive, non-overlapping windows of
/// `size` items. Only the final window of a finite source may be shorter.
#[derive(Debug)]
pub struct Windower<T> {
    size: usize,
    current: Vec<Item<T>>,
    emitted: u64,
}

impl<T> Windower<T> {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PipelineError::ConfigError(
                "window size must be at least 1".into(),
            ));
        }
        Ok(Self {
            size,
            current: Vec::with_capacity(size),
            emitted: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Add an item, returning the window it completes.
    ///
    /// Emitted windows are numbered from 1 through their own sequence index.
    pub fn push(&mut self, item: Item<T>) -> Option<Item<Window<T>>> {
        self.current.push(item);
        if self.current.len() == self.size {
            let full = std::mem::replace(&mut self.current, Vec::with_capacity(self.size));
            Some(self.seal(full))
        } else {
            None
        }
    }

    /// Emit the trailing partial window, if any
    pub fn finish(&mut self) -> Option<Item<Window<T>>> {
        if self.current.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.current);
        Some(self.seal(rest))
    }

    fn seal(&mut self, items: Vec<Item<T>>) -> Item<Window<T>> {
        self.emitted += 1;
        Item::new(self.emitted, Window { items })
    }

    /// Apply the windower to an ordered stream.
    ///
    /// An upstream error discards the partial window and is forwarded as the last element.
    pub fn window<S>(self, source: S) -> impl Stream<Item = Result<Item<Window<T>>>>
    where
        S: Stream<Item = Result<Item<T>>>,
    {
        let mut windower = self;
        stream! {
            pin_mut!(source);
            while let Some(next) = source.next().await {
                match next {
                    Ok(item) => {
                        if let Some(window) = windower.push(item) {
                            yield Ok(window);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            if let Some(window) = windower.finish() {
                yield Ok(window);
            }
        }
    }
}
