//! An embeddable full-text inverted-index and typed secondary-index engine
//! (§1, §2). Indexing is segmented into immutable on-disk *barrels*, merged
//! in the background by a size-tiered `MergeScheduler`; queries go through
//! point-in-time `Reader` snapshots. A `BTreeIndex` per `(collection, field)`
//! covers exact/range/prefix/suffix lookups over typed scalar or string
//! values. A thin `Router` discovers live backend nodes over a ZooKeeper-like
//! coordination service.
//!
//! `IndexCore` is the facade most embedders open directly; the individual
//! modules below are public for callers that want finer-grained control
//! (e.g. driving a `Writer` and `Reader` against a shared `Directory` without
//! the rest of the facade).

pub mod barrel;
pub mod btree;
pub mod codec;
pub mod core;
pub mod directory;
pub mod manifest;
pub mod merge;
pub mod posting;
pub mod reader;
pub mod router;
pub mod writer;

mod index_core;

pub use index_core::IndexCore;
