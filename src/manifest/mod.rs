//! `BarrelsInfo`: the versioned registry of live barrels, and the atomic
//! rewrite protocol that keeps it consistent across writer flushes and
//! merges (§4.5, §6 "Manifest file `barrels`").

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::barrel::remove_barrel_files;
use crate::core::error::{Error, Result};
use crate::core::types::{CollectionId, DocId};
use crate::directory::{Directory, DirectoryInput, DirectoryOutput};

pub const SCHEMA_VERSION: &str = "1";
const MANIFEST_NAME: &str = "barrels";
const MANIFEST_TEMP_NAME: &str = "barrels.tmp";

/// One barrel's entry in the manifest (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarrelDescriptor {
    pub name: String,
    pub base_doc_ids: Vec<(CollectionId, DocId)>,
    pub num_docs: u32,
    pub max_doc_id: DocId,
    /// Informative only (§9 Open Question / SPEC_FULL §H): the merge
    /// scheduler may use this to prioritize a barrel sooner, but merge
    /// correctness (newer-barrel-wins) never depends on its value.
    pub has_update_docs: bool,
}

impl BarrelDescriptor {
    pub fn base_doc_id(&self, collection: CollectionId) -> Option<DocId> {
        self.base_doc_ids
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, d)| *d)
    }
}

/// The authoritative list of live barrels plus schema version and the
/// monotone barrel-name counter (§4.5). Cheap to clone so readers can hold
/// an independent snapshot without locking the manifest mutex for the
/// duration of their session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrelsInfo {
    pub version: String,
    pub barrel_counter: u32,
    pub lock: bool,
    pub barrels: Vec<BarrelDescriptor>,
}

impl Default for BarrelsInfo {
    fn default() -> Self {
        BarrelsInfo {
            version: SCHEMA_VERSION.to_string(),
            barrel_counter: 0,
            lock: false,
            barrels: Vec::new(),
        }
    }
}

impl BarrelsInfo {
    /// Load the manifest, or a fresh empty one if this is a new index
    /// location (§4.5; also the crash-recovery path of §8 scenario 6 — if
    /// the process died between the temp write and the rename, the old
    /// `barrels` file is still the one we read back).
    pub fn load(directory: &dyn Directory) -> Result<Self> {
        if !directory.exists(MANIFEST_NAME) {
            return Ok(BarrelsInfo::default());
        }
        let bytes = directory.open_input(MANIFEST_NAME)?.read_all()?;
        let info: BarrelsInfo = bincode::deserialize(&bytes)
            .map_err(|e| Error::corruption(format!("manifest deserialize failed: {e}")))?;
        if info.version != SCHEMA_VERSION {
            return Err(Error::corruption(format!(
                "unsupported manifest schema version: {}",
                info.version
            )));
        }
        Ok(info)
    }

    /// Whole-file rewrite to a temp name followed by an atomic rename
    /// (§4.5, §6). Must be called while holding the manifest's exclusive
    /// mutex (§5 "the manifest is rewritten under an exclusive mutex").
    pub fn save(&self, directory: &dyn Directory) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| Error::corruption(format!("manifest serialize failed: {e}")))?;
        {
            let mut out = directory.open_output(MANIFEST_TEMP_NAME)?;
            out.write_all(&bytes)?;
            out.sync()?;
        }
        directory.rename(MANIFEST_TEMP_NAME, MANIFEST_NAME)?;
        Ok(())
    }

    /// Allocate the next barrel name from the monotone counter. The
    /// allocation only sticks once the caller persists it with `save`.
    pub fn allocate_name(&mut self) -> String {
        let name = self.barrel_counter.to_string();
        self.barrel_counter += 1;
        name
    }

    pub fn push(&mut self, descriptor: BarrelDescriptor) {
        self.barrels.push(descriptor);
    }

    pub fn remove(&mut self, name: &str) {
        self.barrels.retain(|b| b.name != name);
    }

    pub fn doc_count(&self) -> u64 {
        self.barrels.iter().map(|b| b.num_docs as u64).sum()
    }

    pub fn max_doc_id(&self) -> DocId {
        self.barrels
            .iter()
            .map(|b| b.max_doc_id)
            .max()
            .unwrap_or(DocId::MIN)
    }

    /// Barrels ordered oldest-first, the order posting-merge and the
    /// reader's multi-iterator use to resolve "newer barrel wins" (§4.3,
    /// §4.8). The manifest already stores barrels in append order, so this
    /// is just a read-only view, kept as its own method so callers don't
    /// have to know that detail.
    pub fn barrels_oldest_first(&self) -> &[BarrelDescriptor] {
        &self.barrels
    }

    /// Files present in `directory` that belong to no barrel this manifest
    /// references, and are not the manifest or its sidecar files — the
    /// leftovers of an interrupted flush or merge (§8 scenario 6). Safe to
    /// garbage-collect by name once found.
    ///
    /// Secondary-index files (`btree-<collection>-<field>`, §4.9) are not
    /// named after any barrel stem and would otherwise be misidentified as
    /// orphans on every call; they and any in-flight `.tmp` rewrite (the
    /// manifest's own temp file, a `BTreeIndex::save` temp file) are
    /// excluded up front instead.
    pub fn orphan_files(&self, directory: &dyn Directory) -> Result<Vec<String>> {
        let live_stems: std::collections::HashSet<&str> =
            self.barrels.iter().map(|b| b.name.as_str()).collect();
        let mut orphans = Vec::new();
        for name in directory.list()? {
            if name == MANIFEST_NAME || name == MANIFEST_TEMP_NAME || name == "deleted.bv" || name == ".lock" {
                continue;
            }
            if name.starts_with("btree-") || name.ends_with(".tmp") {
                continue;
            }
            let stem = name.split('.').next().unwrap_or(&name);
            if !live_stems.contains(stem) {
                orphans.push(name);
            }
        }
        Ok(orphans)
    }
}

/// Deferred-delete registry shared between every live `Reader` snapshot and
/// the `MergeScheduler` (§4.5 "unlinking of obsolete barrel files is
/// deferred until no snapshot holds them (reference-counted)"). A `Reader`
/// acquires a reference to every barrel name in the manifest snapshot it
/// opens and releases it on `reopen`/drop; a merge that supersedes a barrel
/// calls `retire` instead of deleting the files outright, so a snapshot
/// taken before the merge keeps reading valid files until it lets go.
#[derive(Default)]
pub struct BarrelRefCounts {
    counts: Mutex<HashMap<String, usize>>,
    pending: Mutex<HashSet<String>>,
}

impl BarrelRefCounts {
    pub fn new() -> Self {
        BarrelRefCounts::default()
    }

    /// Record that one more snapshot is holding `name`.
    pub fn acquire(&self, name: &str) {
        *self.counts.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    /// Release one snapshot's hold on `name`. If this was the last holder
    /// and the barrel was retired while still referenced, its files are
    /// deleted now.
    pub fn release(&self, directory: &dyn Directory, name: &str) {
        let mut counts = self.counts.lock();
        let Some(count) = counts.get_mut(name) else { return };
        *count -= 1;
        if *count > 0 {
            return;
        }
        counts.remove(name);
        drop(counts);
        if self.pending.lock().remove(name) {
            let _ = remove_barrel_files(directory, name);
        }
    }

    /// A merge has superseded `name`: delete its files now if nothing holds
    /// it, otherwise mark it pending so the last `release` does it instead.
    pub fn retire(&self, directory: &dyn Directory, name: &str) {
        let still_held = self.counts.lock().contains_key(name);
        if still_held {
            self.pending.lock().insert(name.to_string());
        } else {
            let _ = remove_barrel_files(directory, name);
        }
    }
}
