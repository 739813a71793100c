//! `IndexCore`: the facade tying the `Writer`, `MergeScheduler`, `Reader`,
//! the per-`(collection, field)` map of `BTreeIndex` instances, and an
//! optional `Router` together into the single entry point an embedder opens
//! once per index location and hands documents/queries to (SPEC_FULL.md §A;
//! see DESIGN.md for what this facade shape is grounded on).

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::btree::BTreeIndex;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{CollectionId, FieldId};
use crate::directory::Directory;
use crate::manifest::{BarrelRefCounts, BarrelsInfo};
use crate::merge::MergeScheduler;
use crate::reader::{DeleteBitVector, Reader};
use crate::router::Router;
use crate::writer::Writer;

/// One open index location (§3 "an index is rooted at one `Directory`"):
/// owns the single `Writer`, the one background `MergeScheduler`, and lazily
/// created `BTreeIndex` instances, and vends independent `Reader` snapshots.
pub struct IndexCore {
    directory: Arc<dyn Directory>,
    manifest: Arc<Mutex<BarrelsInfo>>,
    deletes: Arc<DeleteBitVector>,
    dirty: Arc<AtomicBool>,
    refcounts: Arc<BarrelRefCounts>,
    writer: Arc<Writer>,
    merge_scheduler: Arc<MergeScheduler>,
    btree_indexes: RwLock<BTreeMap<(CollectionId, FieldId), Arc<BTreeIndex>>>,
    config: Config,
    router: Mutex<Option<Arc<Router>>>,
}

impl IndexCore {
    /// Open (or create, if empty) the index rooted at `directory`.
    /// `field_names` is the external schema's id-to-name mapping the
    /// `Writer` needs to label barrel fields on disk (§1 Non-goals: schema
    /// management itself is an external collaborator's job).
    pub fn open(directory: Arc<dyn Directory>, field_names: BTreeMap<FieldId, String>, config: Config) -> Result<Self> {
        config.validate()?;

        let manifest = Arc::new(Mutex::new(BarrelsInfo::load(directory.as_ref())?));
        let deletes = Arc::new(DeleteBitVector::load(directory.as_ref())?);
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());

        let merge_scheduler = Arc::new(MergeScheduler::start(
            Arc::clone(&directory),
            Arc::clone(&manifest),
            Arc::clone(&deletes),
            &config,
            Arc::clone(&dirty),
            Arc::clone(&refcounts),
        ));

        let writer = Writer::open(
            Arc::clone(&directory),
            Arc::clone(&manifest),
            Arc::clone(&deletes),
            Arc::clone(&dirty),
            Arc::clone(&merge_scheduler),
            field_names,
            config.clone(),
        );

        Ok(IndexCore {
            directory,
            manifest,
            deletes,
            dirty,
            refcounts,
            writer,
            merge_scheduler,
            btree_indexes: RwLock::new(BTreeMap::new()),
            config,
            router: Mutex::new(None),
        })
    }

    pub fn writer(&self) -> &Arc<Writer> {
        &self.writer
    }

    pub fn merge_scheduler(&self) -> &Arc<MergeScheduler> {
        &self.merge_scheduler
    }

    /// A fresh point-in-time snapshot (§4.8). Cheap: the manifest clone and
    /// delete-bitvector clone are the only work done eagerly.
    pub fn reader(&self) -> Result<Reader> {
        Reader::open(
            Arc::clone(&self.directory),
            Arc::clone(&self.manifest),
            Arc::clone(&self.deletes),
            Arc::clone(&self.dirty),
            Arc::clone(&self.refcounts),
        )
    }

    /// §9 / SPEC_FULL §H, §F: surfaces the merge scheduler's degraded state
    /// (persistent merge failures) without panicking or exiting the process.
    pub fn is_degraded(&self) -> bool {
        self.merge_scheduler.is_degraded()
    }

    /// The `BTreeIndex` for `(collection, field)`, creating and loading it
    /// from the directory on first access (§4.9; §A "the map from that pair
    /// to an index instance lives on the facade").
    pub fn btree_index(&self, collection: CollectionId, field: FieldId) -> Result<Arc<BTreeIndex>> {
        let key = (collection, field);
        if let Some(index) = self.btree_indexes.read().get(&key) {
            return Ok(Arc::clone(index));
        }
        let mut indexes = self.btree_indexes.write();
        if let Some(index) = indexes.get(&key) {
            return Ok(Arc::clone(index));
        }
        let name = btree_file_name(collection, field);
        let index = Arc::new(BTreeIndex::load(self.directory.as_ref(), &name, self.config.btree_cache_entries)?);
        indexes.insert(key, Arc::clone(&index));
        Ok(index)
    }

    /// Persist every live `BTreeIndex` to its own file. Not triggered
    /// automatically by `Writer::flush` — secondary-index persistence is the
    /// embedder's call to make (§4.9 gives no implicit schedule for it).
    pub fn flush_btree_indexes(&self) -> Result<()> {
        for (&(collection, field), index) in self.btree_indexes.read().iter() {
            index.save(self.directory.as_ref(), &btree_file_name(collection, field))?;
        }
        Ok(())
    }

    /// Connect the `Router` (§4.10) to a coordination service. Optional: an
    /// embedder that only needs local indexing/querying never has to call
    /// this.
    pub fn connect_router(&self, hosts: &str, session_timeout: Duration) -> Result<()> {
        let router = Router::connect(hosts, session_timeout)?;
        *self.router.lock() = Some(router);
        Ok(())
    }

    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.lock().clone()
    }

    /// Stop the background merge worker and the writer's schedule-checking
    /// thread, waiting for any in-progress merge to finish (§5
    /// "Cancellation"). Idempotent; also runs on `Drop`.
    pub fn shutdown(&self) {
        self.writer.shutdown();
        self.merge_scheduler.shutdown();
    }
}

fn btree_file_name(collection: CollectionId, field: FieldId) -> String {
    format!("btree-{}-{}", collection.0, field.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DocId, FieldTokens, IndexedDocument, TermId, TypedKey};
    use crate::directory::memory::MemoryDirectory;
    use crate::posting::Posting;

    #[test]
    fn open_index_then_write_and_read_a_document() {
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let mut field_names = BTreeMap::new();
        field_names.insert(FieldId(0), "body".to_string());
        let core = IndexCore::open(directory, field_names, Config::default()).unwrap();

        let mut doc = IndexedDocument::new(DocId(1), CollectionId(0));
        let mut tokens = FieldTokens::new();
        tokens.push(TermId(7), 0);
        doc.add_field(FieldId(0), tokens);
        core.writer().add_document(doc).unwrap();
        core.writer().flush().unwrap();

        let mut reader = core.reader().unwrap();
        reader.reopen().unwrap();
        assert_eq!(reader.doc_count(), 1);
        let mut posting = reader.term_docs(FieldId(0), TermId(7)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));

        core.shutdown();
    }

    #[test]
    fn btree_index_is_created_once_and_reused() {
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let core = IndexCore::open(directory, BTreeMap::new(), Config::default()).unwrap();

        let index = core.btree_index(CollectionId(0), FieldId(1)).unwrap();
        index.add(TypedKey::I32(5), DocId(1));
        let same = core.btree_index(CollectionId(0), FieldId(1)).unwrap();
        assert_eq!(same.get(&TypedKey::I32(5)).len(), 1);

        core.shutdown();
    }
}
