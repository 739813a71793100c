//! A point-in-time view over the manifest's live barrels (§4.8): a snapshot
//! plus a deleted-docs bit vector, with lazy per-segment reader caching
//! through an LRU (see DESIGN.md for what this is grounded on).

pub mod delete_bitvector;
pub mod multi;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::barrel::BarrelReader;
use crate::core::error::Result;
use crate::core::types::{CollectionId, DocId, FieldId, TermId};
use crate::directory::Directory;
use crate::manifest::{BarrelRefCounts, BarrelsInfo};
use crate::posting::Posting;

pub use delete_bitvector::{DeleteBitVector, DeleteSnapshot};

/// A lazily-populated `BarrelReader` cache is kept small on purpose — real
/// indices keep a handful of barrels live at once between merges, and an
/// unbounded cache would hold onto readers for barrels a merge has already
/// superseded until the next `reopen`.
const MAX_CACHED_BARRELS: usize = 64;

/// A reader snapshot (§4.8 "Reader operations"). Construction takes a
/// cheap clone of the manifest and the delete bitmap; after that, queries
/// against this `Reader` are stable even as the `Writer`/`MergeScheduler`
/// keep mutating the index underneath it, until `reopen` is called.
pub struct Reader {
    directory: Arc<dyn Directory>,
    manifest: BarrelsInfo,
    manifest_source: Arc<Mutex<BarrelsInfo>>,
    barrel_cache: Mutex<LruCache<String, Arc<BarrelReader>>>,
    deletes: Arc<DeleteBitVector>,
    deletes_snapshot: DeleteSnapshot,
    dirty: Arc<AtomicBool>,
    refcounts: Arc<BarrelRefCounts>,
}

impl Reader {
    /// `dirty` is the shared flag the `Writer`/`MergeScheduler` set on every
    /// successful flush or merge (§4.8 "Triggered by a dirty flag"); a
    /// `Reader` checks it via `should_reopen` and decides for itself when to
    /// pay the cost of picking up the new manifest.
    ///
    /// `refcounts` is the registry shared with the `MergeScheduler` (§4.5
    /// "unlinking of obsolete barrel files is deferred until no snapshot
    /// holds them"): every barrel named in the snapshot taken here is
    /// acquired up front, not lazily on first query, because a merge could
    /// retire it before this `Reader` ever calls `term_docs` against it.
    pub fn open(
        directory: Arc<dyn Directory>,
        manifest_source: Arc<Mutex<BarrelsInfo>>,
        deletes: Arc<DeleteBitVector>,
        dirty: Arc<AtomicBool>,
        refcounts: Arc<BarrelRefCounts>,
    ) -> Result<Self> {
        let manifest = manifest_source.lock().clone();
        let deletes_snapshot = deletes.snapshot();
        for barrel in &manifest.barrels {
            refcounts.acquire(&barrel.name);
        }
        Ok(Reader {
            directory,
            manifest,
            manifest_source,
            barrel_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHED_BARRELS).expect("MAX_CACHED_BARRELS is nonzero"),
            )),
            deletes,
            deletes_snapshot,
            dirty,
            refcounts,
        })
    }

    pub fn should_reopen(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Re-read the manifest and drop cached readers for barrels that are no
    /// longer live — the rest stay cached across the reopen (§4.8). Barrels
    /// this snapshot held that the fresh manifest no longer lists are
    /// released from the refcount registry, which may unblock a merge's
    /// deferred delete; barrels newly present are acquired in their place.
    pub fn reopen(&mut self) -> Result<()> {
        let fresh = self.manifest_source.lock().clone();
        let live: std::collections::HashSet<&str> =
            fresh.barrels.iter().map(|b| b.name.as_str()).collect();
        let held: std::collections::HashSet<&str> =
            self.manifest.barrels.iter().map(|b| b.name.as_str()).collect();
        let stale: Vec<String> = {
            let cache = self.barrel_cache.lock();
            cache
                .iter()
                .map(|(name, _)| name.clone())
                .filter(|name| !live.contains(name.as_str()))
                .collect()
        };
        let mut cache = self.barrel_cache.lock();
        for name in &stale {
            cache.pop(name);
        }
        drop(cache);
        for name in &held {
            if !live.contains(name) {
                self.refcounts.release(self.directory.as_ref(), name);
            }
        }
        for barrel in &fresh.barrels {
            if !held.contains(barrel.name.as_str()) {
                self.refcounts.acquire(&barrel.name);
            }
        }
        self.manifest = fresh;
        self.deletes_snapshot = self.deletes.snapshot();
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Aggregated from the snapshot minus the delete bitmap (§4.8
    /// "doc_count(), max_doc_id() — aggregated from the snapshot minus the
    /// delete bitvector"). An approximation for documents that were updated
    /// more than once within the same un-merged window: each update's old
    /// copy is tombstoned, so the subtraction still nets out to the live
    /// document count once a merge has folded the shadowed entries away.
    pub fn doc_count(&self) -> u64 {
        self.manifest
            .doc_count()
            .saturating_sub(self.deletes_snapshot.total_tombstoned())
    }

    pub fn max_doc_id(&self) -> DocId {
        self.manifest.max_doc_id()
    }

    pub fn term_docs(&self, field: FieldId, term: TermId) -> Result<Option<Box<dyn Posting>>> {
        let barrels = self.live_barrels()?;
        multi::multi_term_docs(&barrels, field, term, &self.deletes_snapshot)
    }

    /// Positions are carried alongside doc ids in the same on-disk stream
    /// (§4.3), so there is nothing `term_positions` needs to do differently
    /// from `term_docs` — both hand back the same merged cursor.
    pub fn term_positions(&self, field: FieldId, term: TermId) -> Result<Option<Box<dyn Posting>>> {
        self.term_docs(field, term)
    }

    /// Whole-barrel iteration over every term in `field`, across every live
    /// barrel, without resolving a specific term first (§A "field_terms").
    pub fn field_terms(&self, field: FieldId) -> Result<Vec<TermId>> {
        let mut terms = std::collections::BTreeSet::new();
        for (_, reader) in self.live_barrels()? {
            if let Ok(entries) = reader.field_terms(field) {
                for entry in entries {
                    terms.insert(entry.term_id);
                }
            }
        }
        Ok(terms.into_iter().collect())
    }

    /// Mark `doc_id` deleted and flush the sidecar (§4.8). `collection` is
    /// accepted for API symmetry with the rest of the module — doc ids are
    /// globally unique, so the bitmap itself is not partitioned by
    /// collection.
    pub fn delete_document(&self, _collection: CollectionId, doc_id: DocId) -> Result<()> {
        self.deletes.delete(doc_id);
        self.deletes.persist_if_dirty(self.directory.as_ref())
    }

    fn live_barrels(&self) -> Result<Vec<(u32, Arc<BarrelReader>)>> {
        let mut barrels = Vec::with_capacity(self.manifest.barrels.len());
        for (rank, descriptor) in self.manifest.barrels_oldest_first().iter().enumerate() {
            barrels.push((rank as u32, self.barrel(&descriptor.name)?));
        }
        Ok(barrels)
    }

    fn barrel(&self, name: &str) -> Result<Arc<BarrelReader>> {
        if let Some(reader) = self.barrel_cache.lock().get(name) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(BarrelReader::open(Arc::clone(&self.directory), name)?);
        self.barrel_cache.lock().put(name.to_string(), Arc::clone(&reader));
        Ok(reader)
    }
}

impl Drop for Reader {
    /// Release this snapshot's hold on every barrel it named, which may
    /// unblock a merge's deferred delete (§4.5).
    fn drop(&mut self) {
        for barrel in &self.manifest.barrels {
            self.refcounts.release(self.directory.as_ref(), &barrel.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::writer::{BarrelWriter, InMemoryField};
    use crate::core::types::{CollectionId, TermId};
    use crate::directory::memory::MemoryDirectory;
    use crate::manifest::BarrelDescriptor;

    fn write_barrel(dir: &dyn Directory, stem: &str, term: u32, docs: &[(u32, &[u32])]) {
        let mut field = InMemoryField::new();
        for (doc, positions) in docs {
            for &p in *positions {
                field.add_occurrence(TermId(term), DocId(*doc), p);
            }
        }
        BarrelWriter::new(dir, stem, 4, 3)
            .write(vec![(FieldId(0), "body".into(), field)])
            .unwrap();
    }

    fn descriptor(name: &str, num_docs: u32, max_doc_id: u32) -> BarrelDescriptor {
        BarrelDescriptor {
            name: name.to_string(),
            base_doc_ids: vec![(CollectionId(0), DocId(1))],
            num_docs,
            max_doc_id: DocId(max_doc_id),
            has_update_docs: false,
        }
    }

    #[test]
    fn merges_terms_across_barrels_newest_wins() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", 10, &[(1, &[0]), (2, &[1])]);
        write_barrel(dir.as_ref(), "1", 10, &[(1, &[9])]);

        let mut manifest = BarrelsInfo::default();
        manifest.allocate_name();
        manifest.push(descriptor("0", 2, 2));
        manifest.allocate_name();
        manifest.push(descriptor("1", 1, 1));

        let manifest_source = Arc::new(Mutex::new(manifest));
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());
        let reader = Reader::open(Arc::clone(&dir), manifest_source, deletes, dirty, refcounts).unwrap();

        let mut posting = reader.term_docs(FieldId(0), TermId(10)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));
        assert_eq!(posting.next_position().unwrap(), Some(9));
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(2));
        assert!(!posting.next().unwrap());
    }

    #[test]
    fn delete_document_filters_it_out_of_future_snapshots() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", 10, &[(1, &[0]), (2, &[0])]);

        let mut manifest = BarrelsInfo::default();
        manifest.allocate_name();
        manifest.push(descriptor("0", 2, 2));
        let manifest_source = Arc::new(Mutex::new(manifest));
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());

        let reader = Reader::open(
            Arc::clone(&dir),
            Arc::clone(&manifest_source),
            Arc::clone(&deletes),
            Arc::clone(&dirty),
            Arc::clone(&refcounts),
        )
        .unwrap();
        reader.delete_document(CollectionId(0), DocId(1)).unwrap();

        // This reader's own snapshot was taken before the delete landed.
        let mut stale = reader.term_docs(FieldId(0), TermId(10)).unwrap().unwrap();
        assert!(stale.next().unwrap());
        assert_eq!(stale.doc(), DocId(1));

        let mut fresh = Reader::open(dir, manifest_source, deletes, dirty, refcounts).unwrap();
        fresh.reopen().unwrap();
        let mut posting = fresh.term_docs(FieldId(0), TermId(10)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(2));
        assert!(!posting.next().unwrap());
    }

    /// A `Reader` opened before a merge retires a barrel keeps serving it
    /// until it releases or reopens past it (§4.5 "deferred until no
    /// snapshot holds them").
    #[test]
    fn a_barrel_retired_while_a_reader_holds_it_is_not_deleted_until_released() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", 10, &[(1, &[0])]);

        let mut manifest = BarrelsInfo::default();
        manifest.allocate_name();
        manifest.push(descriptor("0", 1, 1));
        let manifest_source = Arc::new(Mutex::new(manifest));
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());

        let mut reader = Reader::open(
            Arc::clone(&dir),
            Arc::clone(&manifest_source),
            Arc::clone(&deletes),
            Arc::clone(&dirty),
            Arc::clone(&refcounts),
        )
        .unwrap();

        // A merge elsewhere supersedes barrel "0" and retires it, but this
        // reader still holds a reference to it.
        refcounts.retire(dir.as_ref(), "0");
        assert!(dir.exists("0.voc"));

        // The superseded barrel is still fully readable.
        let mut posting = reader.term_docs(FieldId(0), TermId(10)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));

        manifest_source.lock().remove("0");
        reader.reopen().unwrap();
        assert!(!dir.exists("0.voc"));
    }
}
