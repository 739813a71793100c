//! The top-level `Writer` (§4.6): accepts documents, owns the current
//! in-memory barrel, flushes it to the directory on a memory threshold, and
//! drives update semantics and scheduled optimize. Lock-guarded mutable
//! state with a threshold check on every add that triggers a flush; the
//! manifest-append-then-offer-to-merger sequence and the cron-driven
//! optimize trigger follow `flush()`/`lazyOptimizeIndex()` (see DESIGN.md).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use parking_lot::Mutex;
use tracing::info;

use crate::barrel::writer::{BarrelStats, BarrelWriter, InMemoryField};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{FieldId, IndexedDocument};
use crate::directory::Directory;
use crate::manifest::{BarrelDescriptor, BarrelRefCounts, BarrelsInfo};
use crate::merge::MergeScheduler;
use crate::reader::DeleteBitVector;

/// How often the scheduled-optimize thread wakes to check the configured
/// cron expression. Half the cron grain (a minute) so a fire is never missed
/// between two checks, while `last_fired` below keeps it from re-firing
/// every tick within the same matching minute.
const SCHEDULE_TICK: Duration = Duration::from_secs(30);

struct WriterState {
    fields: BTreeMap<FieldId, InMemoryField>,
    stats: BarrelStats,
    memory_estimate: usize,
    has_update_docs: bool,
}

impl Default for WriterState {
    fn default() -> Self {
        WriterState {
            fields: BTreeMap::new(),
            stats: BarrelStats::default(),
            memory_estimate: 0,
            has_update_docs: false,
        }
    }
}

/// Accepts documents and owns the lifecycle of the current in-memory barrel
/// (§4.6). One `Writer` per index; the single-writer-mutex guarantee of §5
/// is the `state` lock here.
pub struct Writer {
    directory: Arc<dyn Directory>,
    manifest: Arc<Mutex<BarrelsInfo>>,
    deletes: Arc<DeleteBitVector>,
    dirty: Arc<AtomicBool>,
    merge_scheduler: Arc<MergeScheduler>,
    field_names: BTreeMap<FieldId, String>,
    config: Config,
    state: Mutex<WriterState>,
    schedule_shutdown: Arc<AtomicBool>,
    schedule_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// `field_names` supplies the human-readable name stored alongside each
    /// field's dictionary in `.fdi` (§6) — assigning and naming fields is an
    /// external schema's job (§1 Non-goals), the Writer just needs the name
    /// to label what it writes.
    pub fn open(
        directory: Arc<dyn Directory>,
        manifest: Arc<Mutex<BarrelsInfo>>,
        deletes: Arc<DeleteBitVector>,
        dirty: Arc<AtomicBool>,
        merge_scheduler: Arc<MergeScheduler>,
        field_names: BTreeMap<FieldId, String>,
        config: Config,
    ) -> Arc<Self> {
        let schedule_shutdown = Arc::new(AtomicBool::new(false));
        let writer = Arc::new(Writer {
            directory,
            manifest,
            deletes,
            dirty,
            merge_scheduler,
            field_names,
            config,
            state: Mutex::new(WriterState::default()),
            schedule_shutdown,
            schedule_handle: Mutex::new(None),
        });

        if writer.config.optimize_schedule.is_some() {
            let handle = spawn_schedule_thread(Arc::clone(&writer));
            *writer.schedule_handle.lock() = Some(handle);
        }

        writer
    }

    /// Assign `doc` to the in-memory barrel (§4.6 steps 1-2), flushing first
    /// if no barrel has been allocated yet implicitly happens here: the
    /// in-memory field map starts empty and fields are created lazily.
    pub fn add_document(&self, doc: IndexedDocument) -> Result<()> {
        {
            let mut state = self.state.lock();
            for (field_id, tokens) in &doc.fields {
                for occurrence in &tokens.occurrences {
                    let field = state.fields.entry(*field_id).or_default();
                    let delta = field.add_occurrence(occurrence.term, doc.doc_id, occurrence.position);
                    state.memory_estimate += delta;
                }
            }
            state.stats.record(doc.collection, doc.doc_id);
        }

        if self.state.lock().memory_estimate >= self.config.memory_budget_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Update semantics (§4.6): tombstone `old_doc_id` against every barrel
    /// already in the manifest — the barrels that can hold the stale copy —
    /// then index `doc`'s payload as a fresh insertion into the current
    /// in-memory barrel. Scoping the tombstone to barrels that existed
    /// *before* this call, rather than recording it index-wide, is what
    /// keeps the new barrel's own fresh copy from shadowing itself: it was
    /// never named, so it is never filtered. Readers see only the new copy
    /// once the tombstone and the new barrel are both visible, via
    /// merge-time/multi-iterator newer-barrel-wins shadowing.
    pub fn update_document(&self, old_doc_id: crate::core::types::DocId, doc: IndexedDocument) -> Result<()> {
        let existing_barrels: Vec<String> = self.manifest.lock().barrels.iter().map(|b| b.name.clone()).collect();
        self.deletes.tombstone_in_barrels(&existing_barrels, old_doc_id);
        self.state.lock().has_update_docs = true;
        self.add_document(doc)
    }

    /// Serialize the in-memory barrel, append its descriptor to the
    /// manifest, and offer it to the `MergeScheduler` (§4.6 step 3). A no-op
    /// if nothing has been indexed since the last flush.
    pub fn flush(&self) -> Result<()> {
        let (fields, stats, has_update_docs) = {
            let mut state = self.state.lock();
            if state.fields.is_empty() {
                return Ok(());
            }
            let fields = std::mem::take(&mut state.fields);
            let stats = std::mem::take(&mut state.stats);
            let has_update_docs = std::mem::replace(&mut state.has_update_docs, false);
            state.memory_estimate = 0;
            (fields, stats, has_update_docs)
        };

        let mut manifest = self.manifest.lock();
        let stem = manifest.allocate_name();

        let named_fields: Vec<(FieldId, String, InMemoryField)> = fields
            .into_iter()
            .map(|(id, field)| {
                let name = self.field_names.get(&id).cloned().unwrap_or_else(|| id.0.to_string());
                (id, name, field)
            })
            .collect();

        BarrelWriter::new(self.directory.as_ref(), &stem, self.config.skip_interval, self.config.max_skip_level)
            .write(named_fields)?;

        let descriptor = BarrelDescriptor {
            name: stem,
            base_doc_ids: stats.base_doc_ids.into_iter().collect(),
            num_docs: stats.num_docs,
            max_doc_id: stats.max_doc_id,
            has_update_docs,
        };
        manifest.push(descriptor.clone());
        manifest.save(self.directory.as_ref())?;
        drop(manifest);

        self.dirty.store(true, Ordering::Release);
        info!(barrel = %descriptor.name, docs = descriptor.num_docs, "barrel flushed");
        self.merge_scheduler.offer(&descriptor)
    }

    /// Check the configured cron expression against the current local time
    /// and signal the `MergeScheduler` to run a full merge if it fires
    /// (§4.6 "Scheduled optimize"). Exposed directly (in addition to the
    /// background thread `open` starts when a schedule is configured) so
    /// callers driving their own event loop can invoke it without relying on
    /// wall-clock polling.
    pub fn maybe_run_scheduled_optimize(&self) -> Result<bool> {
        let Some(schedule) = &self.config.optimize_schedule else {
            return Ok(false);
        };
        let now = Local::now();
        let fires = schedule.matches(
            now.minute(),
            now.hour(),
            now.day(),
            now.month(),
            now.weekday().num_days_from_sunday(),
        );
        if !fires {
            return Ok(false);
        }
        self.merge_scheduler.optimize()?;
        Ok(true)
    }

    /// Stop the background schedule-checking thread, if one is running.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.schedule_shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.schedule_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_schedule_thread(writer: Arc<Writer>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last_fired_minute: Option<(i32, u32, u32, u32)> = None;
        while !writer.schedule_shutdown.load(Ordering::Acquire) {
            std::thread::sleep(SCHEDULE_TICK);
            if writer.schedule_shutdown.load(Ordering::Acquire) {
                break;
            }
            let Some(schedule) = &writer.config.optimize_schedule else { break };
            let now = Local::now();
            let key = (now.year(), now.day(), now.hour(), now.minute());
            if Some(key) == last_fired_minute {
                continue;
            }
            let fires = schedule.matches(
                now.minute(),
                now.hour(),
                now.day(),
                now.month(),
                now.weekday().num_days_from_sunday(),
            );
            if fires {
                last_fired_minute = Some(key);
                if let Err(e) = writer.merge_scheduler.optimize() {
                    tracing::warn!(error = %e, "scheduled optimize failed to enqueue");
                }
            }
        }
    })
}
