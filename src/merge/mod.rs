//! The background merge worker (§4.7): a bounded `crossbeam` channel feeding
//! a dedicated `std::thread`, with pluggable size-tiered candidate selection
//! in `merge::policy` (see DESIGN.md for what this is grounded on).

pub mod executor;
pub mod policy;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::barrel::remove_barrel_files;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::directory::Directory;
use crate::manifest::{BarrelDescriptor, BarrelRefCounts, BarrelsInfo};
use crate::reader::DeleteBitVector;

use self::policy::{from_strategy, MergePolicy};

/// Persistent merge failures this many times in a row flip the scheduler
/// into the degraded state described in §4.7 — the index stays readable via
/// its original barrels, it just stops compacting.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

enum MergeRequest {
    /// The Writer flushed a new barrel; re-evaluate the configured policy.
    /// Carrying no payload is deliberate: the policy always consults the
    /// live manifest, which already has the new descriptor by the time the
    /// Writer sends this.
    Offered,
    /// A forced full merge (§4.6 "Scheduled optimize", §8 scenario 4).
    Optimize,
    Shutdown,
}

/// One dedicated background worker thread per index (§5 "exactly one merge
/// worker per index"). The Writer is the sole producer into its bounded
/// request queue; the scheduler drains it until told to shut down.
pub struct MergeScheduler {
    sender: Sender<MergeRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
    pause_state: Arc<(Mutex<bool>, Condvar)>,
    degraded: Arc<AtomicBool>,
}

impl MergeScheduler {
    pub fn start(
        directory: Arc<dyn Directory>,
        manifest: Arc<Mutex<BarrelsInfo>>,
        deletes: Arc<DeleteBitVector>,
        config: &Config,
        dirty: Arc<AtomicBool>,
        refcounts: Arc<BarrelRefCounts>,
    ) -> Self {
        let (sender, receiver) = bounded(256);
        let pause_state = Arc::new((Mutex::new(false), Condvar::new()));
        let degraded = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            directory,
            manifest,
            deletes,
            policy: from_strategy(config.merge_strategy),
            skip_interval: config.skip_interval,
            max_skip_level: config.max_skip_level,
            pause_state: Arc::clone(&pause_state),
            degraded: Arc::clone(&degraded),
            dirty,
            refcounts,
            consecutive_failures: AtomicU32::new(0),
        };
        let handle = std::thread::spawn(move || worker.run(receiver));

        MergeScheduler {
            sender,
            handle: Mutex::new(Some(handle)),
            pause_state,
            degraded,
        }
    }

    /// Non-blocking: tell the scheduler a barrel was flushed (§4.6 step 3
    /// "offer it to the MergeScheduler").
    pub fn offer(&self, _descriptor: &BarrelDescriptor) -> Result<()> {
        self.sender
            .send(MergeRequest::Offered)
            .map_err(|_| Error::internal("merge scheduler worker is gone"))
    }

    pub fn optimize(&self) -> Result<()> {
        self.sender
            .send(MergeRequest::Optimize)
            .map_err(|_| Error::internal("merge scheduler worker is gone"))
    }

    /// Blocks new merges from starting; a merge already running completes
    /// normally (§4.7, §5 "Pause/resume is supported").
    pub fn pause(&self) {
        *self.pause_state.0.lock() = true;
    }

    pub fn resume(&self) {
        *self.pause_state.0.lock() = false;
        self.pause_state.1.notify_all();
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Wake the worker (even if paused) and wait for it to drain its queue
    /// and exit, finishing whatever merge is currently running (§5
    /// "Cancellation").
    pub fn shutdown(&self) {
        let _ = self.sender.send(MergeRequest::Shutdown);
        self.resume();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    directory: Arc<dyn Directory>,
    manifest: Arc<Mutex<BarrelsInfo>>,
    deletes: Arc<DeleteBitVector>,
    policy: Box<dyn MergePolicy>,
    skip_interval: usize,
    max_skip_level: usize,
    pause_state: Arc<(Mutex<bool>, Condvar)>,
    degraded: Arc<AtomicBool>,
    dirty: Arc<AtomicBool>,
    refcounts: Arc<BarrelRefCounts>,
    consecutive_failures: AtomicU32,
}

impl Worker {
    fn run(self, receiver: Receiver<MergeRequest>) {
        loop {
            match receiver.recv() {
                Ok(MergeRequest::Shutdown) | Err(_) => break,
                Ok(MergeRequest::Offered) => {
                    self.wait_while_paused();
                    self.try_merge(false);
                }
                Ok(MergeRequest::Optimize) => {
                    self.wait_while_paused();
                    self.try_merge(true);
                }
            }
        }
    }

    fn wait_while_paused(&self) {
        let (lock, cvar) = &*self.pause_state;
        let mut paused = lock.lock();
        while *paused {
            cvar.wait(&mut paused);
        }
    }

    fn try_merge(&self, force: bool) {
        let snapshot = self.manifest.lock().clone();
        let candidates: Vec<BarrelDescriptor> = if force {
            snapshot.barrels.clone()
        } else {
            match self.policy.select(&snapshot.barrels) {
                Some(names) => snapshot
                    .barrels
                    .iter()
                    .filter(|b| names.contains(&b.name))
                    .cloned()
                    .collect(),
                None => return,
            }
        };
        if candidates.len() < 2 {
            return;
        }

        match self.run_merge(&candidates) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                info!(barrels = candidates.len(), "merge completed");
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                error!(error = %e, attempt = failures, "merge failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    self.degraded.store(true, Ordering::Release);
                    warn!(
                        failures,
                        "merge scheduler entering degraded state; reads continue to serve from original barrels"
                    );
                }
            }
        }
    }

    /// The manifest is rewritten twice: once to persist the allocated name
    /// and `lock = true` (so a concurrent reader or a crash mid-merge can
    /// observe a swap was underway), and once to commit the outcome — the
    /// barrel descriptor swap on success, or just clearing `lock` on
    /// failure. Neither rewrite touches the candidate descriptors' data
    /// until the outcome is known, so a crash between them leaves the
    /// manifest exactly as if the merge had never started, modulo the
    /// burned barrel name counter (harmless: names are never reused).
    fn run_merge(&self, candidates: &[BarrelDescriptor]) -> Result<()> {
        let deletes = self.deletes.snapshot();
        let new_stem = {
            let mut manifest = self.manifest.lock();
            let name = manifest.allocate_name();
            manifest.lock = true;
            manifest.save(self.directory.as_ref())?;
            name
        };

        let result = executor::execute_merge(
            &self.directory,
            candidates,
            &new_stem,
            &deletes,
            self.skip_interval,
            self.max_skip_level,
        );

        let mut manifest = self.manifest.lock();
        manifest.lock = false;
        match result {
            Ok(stats) => {
                for c in candidates {
                    manifest.remove(&c.name);
                }
                manifest.push(BarrelDescriptor {
                    name: new_stem.clone(),
                    base_doc_ids: stats.base_doc_ids.into_iter().collect(),
                    num_docs: stats.num_docs,
                    max_doc_id: stats.max_doc_id,
                    has_update_docs: candidates.iter().any(|c| c.has_update_docs),
                });
                let live: std::collections::HashSet<String> =
                    manifest.barrels.iter().map(|b| b.name.clone()).collect();
                manifest.save(self.directory.as_ref())?;
                drop(manifest);
                for c in candidates {
                    // Deferred delete (§4.5): a `Reader` snapshot opened
                    // before this merge may still hold `c.name` and be
                    // mid-query against it. `retire` only deletes the files
                    // once every such snapshot has released or reopened
                    // past it.
                    self.refcounts.retire(self.directory.as_ref(), &c.name);
                }
                // The merged-away candidates' scoped tombstones no longer
                // name any live barrel; drop them rather than let `scoped`
                // accumulate dead entries merge after merge (§4.6).
                self.deletes.retain_barrels(&live);
                self.dirty.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                manifest.save(self.directory.as_ref())?;
                drop(manifest);
                let _ = remove_barrel_files(self.directory.as_ref(), &new_stem);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::writer::{BarrelWriter, InMemoryField};
    use crate::core::config::MergeStrategy;
    use crate::core::types::{CollectionId, DocId, FieldId, TermId};
    use crate::directory::memory::MemoryDirectory;
    use std::time::Duration;

    fn write_barrel(dir: &dyn Directory, stem: &str, doc: u32) {
        let mut field = InMemoryField::new();
        field.add_occurrence(TermId(1), DocId(doc), 0);
        BarrelWriter::new(dir, stem, 4, 3)
            .write(vec![(FieldId(0), "body".into(), field)])
            .unwrap();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition never became true");
    }

    #[test]
    fn optimize_collapses_all_barrels_into_one() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let mut manifest = BarrelsInfo::default();
        for doc in 1..=3u32 {
            let name = manifest.allocate_name();
            write_barrel(dir.as_ref(), &name, doc);
            manifest.push(BarrelDescriptor {
                name,
                base_doc_ids: vec![(CollectionId(0), DocId(doc))],
                num_docs: 1,
                max_doc_id: DocId(doc),
                has_update_docs: false,
            });
        }
        manifest.save(dir.as_ref()).unwrap();
        let manifest = Arc::new(Mutex::new(manifest));

        let mut config = Config::default();
        config.merge_strategy = MergeStrategy::None;
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());
        let scheduler = MergeScheduler::start(Arc::clone(&dir), Arc::clone(&manifest), deletes, &config, dirty, refcounts);

        scheduler.optimize().unwrap();
        wait_until(|| manifest.lock().barrels.len() == 1);
        assert_eq!(manifest.lock().doc_count(), 3);
        scheduler.shutdown();
    }

    #[test]
    fn pause_blocks_offered_merges_until_resumed() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let mut manifest = BarrelsInfo::default();
        for doc in 1..=3u32 {
            let name = manifest.allocate_name();
            write_barrel(dir.as_ref(), &name, doc);
            manifest.push(BarrelDescriptor {
                name,
                base_doc_ids: vec![(CollectionId(0), DocId(doc))],
                num_docs: 1,
                max_doc_id: DocId(doc),
                has_update_docs: false,
            });
        }
        manifest.save(dir.as_ref()).unwrap();
        let manifest = Arc::new(Mutex::new(manifest));

        let mut config = Config::default();
        config.merge_strategy = MergeStrategy::Multiway { k: 2 };
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());
        let scheduler = MergeScheduler::start(Arc::clone(&dir), Arc::clone(&manifest), deletes, &config, dirty, refcounts);

        scheduler.pause();
        scheduler.offer(&manifest.lock().barrels[0].clone()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(manifest.lock().barrels.len(), 3);

        scheduler.resume();
        wait_until(|| manifest.lock().barrels.len() < 3);
        scheduler.shutdown();
    }

    #[test]
    fn a_merged_away_barrel_is_not_deleted_while_a_snapshot_holds_it() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let mut manifest = BarrelsInfo::default();
        let mut names = Vec::new();
        for doc in 1..=2u32 {
            let name = manifest.allocate_name();
            write_barrel(dir.as_ref(), &name, doc);
            manifest.push(BarrelDescriptor {
                name: name.clone(),
                base_doc_ids: vec![(CollectionId(0), DocId(doc))],
                num_docs: 1,
                max_doc_id: DocId(doc),
                has_update_docs: false,
            });
            names.push(name);
        }
        manifest.save(dir.as_ref()).unwrap();
        let manifest = Arc::new(Mutex::new(manifest));

        let mut config = Config::default();
        config.merge_strategy = MergeStrategy::None;
        let deletes = Arc::new(DeleteBitVector::new());
        let dirty = Arc::new(AtomicBool::new(false));
        let refcounts = Arc::new(BarrelRefCounts::new());

        // A snapshot holding both pre-merge barrels, standing in for a
        // `Reader` opened before the merge runs.
        refcounts.acquire(&names[0]);
        refcounts.acquire(&names[1]);

        let scheduler = MergeScheduler::start(
            Arc::clone(&dir),
            Arc::clone(&manifest),
            deletes,
            &config,
            dirty,
            Arc::clone(&refcounts),
        );

        scheduler.optimize().unwrap();
        wait_until(|| manifest.lock().barrels.len() == 1);

        // The manifest moved on, but the old snapshot's files are still on
        // disk because it never released them.
        for name in &names {
            assert!(dir.exists(&format!("{name}.voc")));
        }

        for name in &names {
            refcounts.release(dir.as_ref(), name);
        }
        for name in &names {
            assert!(!dir.exists(&format!("{name}.voc")));
        }

        scheduler.shutdown();
    }
}
