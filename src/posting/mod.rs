//! Per-term document postings: in-memory while a barrel is being built,
//! on-disk once it is sealed, plus the skip list that accelerates `skip_to`
//! and the N-way merge used by both the merge scheduler and the reader's
//! multi-barrel iterator (§4.3).

pub mod arena;
pub mod in_memory;
pub mod merge;
pub mod on_disk;
pub mod skiplist;

use crate::core::error::Result;
use crate::core::types::DocId;

pub use in_memory::InMemoryPosting;
pub use on_disk::OnDiskPosting;
pub use skiplist::{FixedBlockSkipEntry, FixedBlockSkipList, FixedBlockSkipListBuilder};

/// Common read contract for a posting list, whatever its backing storage.
/// `next`/`doc`/`freq`/`next_position` follow a cursor protocol: call
/// `next()` to advance, then read `doc()`/`freq()`, then drain exactly
/// `freq()` calls to `next_position()` before calling `next()` again.
pub trait Posting: Send {
    /// Number of documents containing this term.
    fn doc_freq(&self) -> u32;

    /// Total occurrences of this term across all documents.
    fn collection_term_freq(&self) -> u64;

    /// Advance to the next doc id. Returns false at end of the posting.
    fn next(&mut self) -> Result<bool>;

    /// The current document id. Only valid after `next()` returned true.
    fn doc(&self) -> DocId;

    /// The current document's term frequency. Only valid after `next()`.
    fn freq(&self) -> u32;

    /// Lazily drain the current document's positions, one at a time.
    /// Returns `None` once `freq()` positions have been read for this doc.
    fn next_position(&mut self) -> Result<Option<u32>>;

    /// Advance to the smallest doc id `>= target` reachable from the
    /// current position. Returns `DocId(0)`-sentinel-free: callers check
    /// the return value against `target`; if the posting is exhausted
    /// `Ok(None)` is returned instead.
    fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>>;
}
