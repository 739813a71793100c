//! A small CLI for local experimentation against an index directory:
//! inspect the manifest, dump one barrel field's term dictionary, or force
//! a synchronous optimize. Not part of the library API; argument parsing is
//! hand-rolled rather than pulling in a CLI-framework dependency the rest of
//! the crate has no other use for.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use barrelidx::core::config::Config;
use barrelidx::core::types::FieldId;
use barrelidx::directory::fs::FsDirectory;
use barrelidx::directory::Directory;
use barrelidx::manifest::{BarrelRefCounts, BarrelsInfo};
use barrelidx::merge::MergeScheduler;
use barrelidx::reader::DeleteBitVector;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("inspect") => args.get(2).ok_or("usage: barrelctl inspect <path>").and_then(|p| inspect(p)),
        Some("terms") => match (args.get(2), args.get(3), args.get(4)) {
            (Some(path), Some(barrel), Some(field)) => terms(path, barrel, field),
            _ => Err("usage: barrelctl terms <path> <barrel-name> <field-id>"),
        },
        Some("optimize") => args.get(2).ok_or("usage: barrelctl optimize <path>").and_then(|p| optimize(p)),
        _ => Err("usage: barrelctl <inspect|terms|optimize> <path> [...]"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn open_directory(path: &str) -> Result<Arc<dyn Directory>, &'static str> {
    FsDirectory::open(&PathBuf::from(path), false)
        .map(|d| Arc::new(d) as Arc<dyn Directory>)
        .map_err(|_| "failed to open directory")
}

fn inspect(path: &str) -> Result<(), &'static str> {
    let directory = open_directory(path)?;
    let manifest = BarrelsInfo::load(directory.as_ref()).map_err(|_| "failed to load manifest")?;

    println!("schema version:  {}", manifest.version);
    println!("barrel counter:  {}", manifest.barrel_counter);
    println!("merge in flight: {}", manifest.lock);
    println!("live barrels:    {}", manifest.barrels.len());
    println!("live doc count:  {}", manifest.doc_count());
    println!();
    for barrel in manifest.barrels_oldest_first() {
        println!(
            "  {:<12} docs={:<8} max_doc_id={:<10} has_update_docs={}",
            barrel.name,
            barrel.num_docs,
            barrel.max_doc_id.value(),
            barrel.has_update_docs
        );
    }

    let orphans = manifest.orphan_files(directory.as_ref()).map_err(|_| "failed to list orphan files")?;
    if !orphans.is_empty() {
        println!("\norphan files (safe to delete): {orphans:?}");
    }
    Ok(())
}

fn terms(path: &str, barrel: &str, field: &str) -> Result<(), &'static str> {
    let directory = open_directory(path)?;
    let field_id: u16 = field.parse().map_err(|_| "field-id must be a number")?;
    let reader = barrelidx::barrel::BarrelReader::open(directory, barrel).map_err(|_| "failed to open barrel")?;
    let entries = reader.field_terms(FieldId(field_id)).map_err(|_| "failed to read field terms")?;
    for entry in entries {
        println!("{:<10} doc_freq={}", entry.term_id.0, entry.doc_freq);
    }
    Ok(())
}

fn optimize(path: &str) -> Result<(), &'static str> {
    let directory = open_directory(path)?;
    let manifest = Arc::new(Mutex::new(BarrelsInfo::load(directory.as_ref()).map_err(|_| "failed to load manifest")?));
    let deletes = Arc::new(DeleteBitVector::load(directory.as_ref()).map_err(|_| "failed to load delete bitvector")?);
    let dirty = Arc::new(AtomicBool::new(false));
    let config = Config::default();

    let before = manifest.lock().barrels.len();
    let refcounts = Arc::new(BarrelRefCounts::new());
    let scheduler = MergeScheduler::start(Arc::clone(&directory), Arc::clone(&manifest), deletes, &config, dirty, refcounts);
    scheduler.optimize().map_err(|_| "failed to enqueue optimize")?;

    for _ in 0..200 {
        std::thread::sleep(Duration::from_millis(50));
        if manifest.lock().barrels.len() <= 1 || scheduler.is_degraded() {
            break;
        }
    }
    scheduler.shutdown();

    let after = manifest.lock().barrels.len();
    println!("barrels before: {before}, after: {after}, degraded: {}", scheduler.is_degraded());
    Ok(())
}
