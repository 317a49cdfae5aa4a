use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::transfer::Transport;

/// Globally unique particle identifier.
///
/// A tag is assigned once at injection (or by the external dynamics engine)
/// and travels unchanged with the particle through migrations and restarts.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub i64);

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Tag {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic tag counter for the whole distributed run.
///
/// Every rank holds a replica of the counter. Replicas stay identical as
/// long as all ranks make the same sequence of `reserve`/`allocate`/`observe`
/// calls, so no tag is ever handed out twice.
#[derive(Debug, Clone)]
pub struct TagAllocator {
    next: i64,
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TagAllocator {
    pub fn new(first: i64) -> Self {
        Self { next: first }
    }

    /// Next tag that would be handed out.
    pub fn peek(&self) -> Tag {
        Tag(self.next)
    }

    /// Keeps the counter ahead of tags assigned elsewhere (e.g. by the engine).
    pub fn observe(&mut self, tag: Tag) {
        self.next = self.next.max(tag.0 + 1);
    }

    /// Reserves `count` consecutive tags. Must be called with the same count
    /// on every rank (replicated decision, e.g. a seeded injection).
    pub fn reserve(&mut self, count: usize) -> Range<i64> {
        let start = self.next;
        self.next += count as i64;
        start..self.next
    }

    /// Collective allocation: each rank asks for its own `count`, tags are
    /// laid out by rank order so ranges never overlap.
    pub fn allocate<T: Transport>(&mut self, transport: &mut T, count: usize) -> Result<Vec<Tag>> {
        let counts = transport.all_gather(count as u64)?;
        ensure!(
            counts.len() == transport.n_ranks(),
            "all_gather returned {} values for {} ranks",
            counts.len(),
            transport.n_ranks()
        );
        let offset: u64 = counts[..transport.rank()].iter().sum();
        let total: u64 = counts.iter().sum();
        let start = self.next + offset as i64;
        self.next += total as i64;
        Ok((start..start + count as i64).map(Tag).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{SerialTransport, ThreadedTransport};
    use std::collections::HashSet;

    #[test]
    fn test_reserve_and_observe() {
        let mut tags = TagAllocator::new(10);
        assert_eq!(tags.reserve(3), 10..13);
        tags.observe(Tag(100));
        assert_eq!(tags.peek(), Tag(101));
        tags.observe(Tag(5));
        assert_eq!(tags.peek(), Tag(101));
    }

    #[test]
    fn test_allocate_serial() {
        let mut tags = TagAllocator::default();
        let mut transport = SerialTransport::new();
        let got = tags.allocate(&mut transport, 4).unwrap();
        assert_eq!(got, vec![Tag(0), Tag(1), Tag(2), Tag(3)]);
        assert_eq!(tags.peek(), Tag(4));
    }

    #[test]
    fn test_allocate_is_unique_across_ranks() {
        let transports = ThreadedTransport::group(3);
        let results: Vec<(Vec<Tag>, Tag)> = std::thread::scope(|s| {
            let handles: Vec<_> = transports
                .into_iter()
                .map(|mut t| {
                    s.spawn(move || {
                        let mut tags = TagAllocator::new(7);
                        let n = t.rank() + 1;
                        let got = tags.allocate(&mut t, n).unwrap();
                        (got, tags.peek())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let all: HashSet<Tag> = results.iter().flat_map(|(t, _)| t.iter().copied()).collect();
        assert_eq!(all.len(), 1 + 2 + 3);
        for (_, next) in &results {
            assert_eq!(*next, Tag(7 + 6));
        }
    }
}
