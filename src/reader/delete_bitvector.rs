use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::directory::{Directory, DirectoryInput, DirectoryOutput};

const SIDECAR_NAME: &str = "deleted.bv";

/// The overlay of logically deleted/tombstoned doc ids (§3, §4.8). Shared
/// between the `Writer` (update semantics tombstone the old copy of an
/// updated doc, §4.6) and every `Reader` (`delete_document`, §4.8).
/// Guarded by a read-write lock per §5.
///
/// Two scopes are tracked, not one (§4.6 "record the old doc id in the
/// delete bitvector for every barrel that contains it"):
///
/// - `global` — an explicit `delete_document` removes a doc id for good; it
///   never comes back under that id (§3 "never reused after deletion"), so
///   marking it globally, including barrels written afterwards, is safe.
///   This is the half that is persisted to the sidecar file.
/// - `scoped` — an update (§4.6) reuses the same doc id for a fresh
///   payload, so its tombstone must apply only to the barrels that already
///   existed when the update was recorded, never to the barrel the new
///   payload itself lands in. Keyed by barrel name; not persisted, since it
///   only matters until the next merge physically drops the shadowed
///   entries (§4.3) — a crash before that merge reopens with the update's
///   old copy no longer filtered, which is the same "update not yet
///   durable" window every other un-merged, un-synced write is exposed to.
pub struct DeleteBitVector {
    global: RwLock<RoaringBitmap>,
    scoped: RwLock<HashMap<String, RoaringBitmap>>,
    dirty: AtomicBool,
}

impl DeleteBitVector {
    pub fn new() -> Self {
        DeleteBitVector {
            global: RwLock::new(RoaringBitmap::new()),
            scoped: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the sidecar file if present, otherwise start empty (§4.8, §6
    /// "Sidecar `deleted.bv`"). The sidecar only ever stores the `global`
    /// scope; `scoped` tombstones start fresh on every open.
    pub fn load(directory: &dyn Directory) -> Result<Self> {
        if !directory.exists(SIDECAR_NAME) {
            return Ok(DeleteBitVector::new());
        }
        let bytes = directory.open_input(SIDECAR_NAME)?.read_all()?;
        let bits = decode(&bytes)?;
        Ok(DeleteBitVector {
            global: RwLock::new(bits),
            scoped: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Whether `doc` is tombstoned against `barrel` specifically — the
    /// union of the global (explicit-delete) scope and whatever was
    /// recorded against that one barrel name (§4.6).
    pub fn is_deleted_in(&self, barrel: &str, doc: DocId) -> bool {
        if self.global.read().contains(doc.value()) {
            return true;
        }
        self.scoped
            .read()
            .get(barrel)
            .is_some_and(|b| b.contains(doc.value()))
    }

    /// Explicit delete (§4.8 `Reader::delete_document`): `doc` is gone for
    /// good, so the tombstone applies globally, to every barrel including
    /// ones written after this call. Visible to readers taking a fresh
    /// snapshot immediately; readers holding an older snapshot see it only
    /// after their next `reopen` (§5 ordering guarantees).
    pub fn delete(&self, doc: DocId) {
        let mut bits = self.global.write();
        if bits.insert(doc.value()) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Update semantics (§4.6): tombstone `doc` against exactly the barrels
    /// named in `barrel_names` — the barrels that already existed when the
    /// update was recorded. The barrel the update's fresh payload is about
    /// to land in is never in this list, so it is never shadowed by its own
    /// update.
    pub fn tombstone_in_barrels(&self, barrel_names: &[String], doc: DocId) {
        let mut scoped = self.scoped.write();
        for name in barrel_names {
            scoped.entry(name.clone()).or_default().insert(doc.value());
        }
    }

    /// Drop scoped tombstones recorded against barrels that no longer exist
    /// (merged away, §4.7) — otherwise `scoped` would grow with entries for
    /// barrel names nothing will ever query again.
    pub fn retain_barrels(&self, live: &std::collections::HashSet<String>) {
        self.scoped.write().retain(|name, _| live.contains(name));
    }

    /// A point-in-time snapshot for a reader/merge to filter its own query
    /// results against, independent of deletes recorded afterwards (§3
    /// "DeleteBitVector ... per-reader-snapshot overlay").
    pub fn snapshot(&self) -> DeleteSnapshot {
        DeleteSnapshot {
            global: self.global.read().clone(),
            scoped: self.scoped.read().clone(),
        }
    }

    /// Write the sidecar file if the global scope has changed since the
    /// last persist (§4.8 "writes a sidecar `deleted.bv` file
    /// periodically"). Cheap to call after every mutation — the dirty flag
    /// makes repeated calls with no intervening explicit delete a no-op.
    pub fn persist_if_dirty(&self, directory: &dyn Directory) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let bytes = encode(&self.global.read());
        let mut out = directory.open_output(SIDECAR_NAME)?;
        out.write_all(&bytes)?;
        out.sync()?;
        Ok(())
    }
}

/// A consistent point-in-time copy of both delete scopes (§3). `for_barrel`
/// is what every per-barrel posting-merge input (reader multi-iterator,
/// merge scheduler) actually filters against; `total_tombstoned` is the
/// aggregate figure `Reader::doc_count` subtracts from the raw sum of
/// `num_docs` across barrels.
#[derive(Clone, Default)]
pub struct DeleteSnapshot {
    global: RoaringBitmap,
    scoped: HashMap<String, RoaringBitmap>,
}

impl DeleteSnapshot {
    /// The bitmap to filter barrel `name`'s postings against: global
    /// explicit deletes plus whatever was scoped specifically to this
    /// barrel (§4.6).
    pub fn for_barrel(&self, name: &str) -> RoaringBitmap {
        match self.scoped.get(name) {
            Some(scoped) => &self.global | scoped,
            None => self.global.clone(),
        }
    }

    /// Distinct doc ids tombstoned anywhere, global or scoped — the union
    /// is what matters for `doc_count`'s approximation (§4.8): an updated
    /// doc id occupies a slot in two barrels' `num_docs` but is one live
    /// document, and a single tombstone entry against either (or both)
    /// copies nets the count back to one.
    pub fn total_tombstoned(&self) -> u64 {
        let mut union = self.global.clone();
        for bits in self.scoped.values() {
            union |= bits;
        }
        union.len()
    }
}

impl Default for DeleteBitVector {
    fn default() -> Self {
        Self::new()
    }
}

/// `deleted.bv` (§6): a `u32` bit-length prefix, then the packed bits,
/// little-endian (bit `i` lives at byte `i / 8`, bit position `i % 8`,
/// least-significant bit first). Not `RoaringBitmap`'s own serialization —
/// the on-disk sidecar format is specified independently of the in-memory
/// representation.
fn encode(bits: &RoaringBitmap) -> Vec<u8> {
    let bit_len = bits.max().map(|m| m + 1).unwrap_or(0);
    let byte_len = (bit_len as usize).div_ceil(8);
    let mut out = Vec::with_capacity(4 + byte_len);
    out.extend_from_slice(&bit_len.to_le_bytes());
    out.resize(4 + byte_len, 0);
    for doc in bits.iter() {
        let idx = 4 + (doc / 8) as usize;
        out[idx] |= 1 << (doc % 8);
    }
    out
}

fn decode(bytes: &[u8]) -> Result<RoaringBitmap> {
    if bytes.len() < 4 {
        return Err(Error::corruption("truncated deleted.bv: missing length prefix"));
    }
    let bit_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let expected_bytes = (bit_len as usize).div_ceil(8);
    let body = &bytes[4..];
    if body.len() < expected_bytes {
        return Err(Error::corruption("truncated deleted.bv: packed bits shorter than length prefix"));
    }
    let mut bits = RoaringBitmap::new();
    for (byte_idx, &byte) in body.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        for bit in 0..8u32 {
            if byte & (1 << bit) != 0 {
                let doc = byte_idx as u32 * 8 + bit;
                if doc < bit_len {
                    bits.insert(doc);
                }
            }
        }
    }
    Ok(bits)
}
