//! Indexing under a tight memory budget: a small `memory_budget_bytes`
//! forces the `Writer` to flush far more often, producing many small
//! barrels, which in turn keeps the background `MergeScheduler` busy
//! compacting them under the `multiway` policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use barrelidx::core::config::{Config, MergeStrategy};
use barrelidx::core::types::{CollectionId, DocId, FieldId, FieldTokens, IndexedDocument, TermId};
use barrelidx::directory::memory::MemoryDirectory;
use barrelidx::directory::Directory;
use barrelidx::IndexCore;

const COLLECTION: CollectionId = CollectionId(0);
const BODY: FieldId = FieldId(0);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());

    let mut config = Config::default();
    config.memory_budget_bytes = 2 * 1024; // force a flush roughly every few documents
    config.merge_strategy = MergeStrategy::Multiway { k: 3 };

    let mut field_names = BTreeMap::new();
    field_names.insert(BODY, "body".to_string());
    let core = IndexCore::open(directory, field_names, config)?;

    for i in 0..1000u32 {
        let mut doc = IndexedDocument::new(DocId(i), COLLECTION);
        let mut tokens = FieldTokens::new();
        for position in 0..8 {
            tokens.push(TermId((i + position) % 50), position);
        }
        doc.add_field(BODY, tokens);
        core.writer().add_document(doc)?;

        if i % 200 == 0 {
            println!("indexed {} documents", i + 1);
        }
    }
    core.writer().flush()?;

    // Give the background merge worker a moment to catch up with the flood
    // of small barrels before reporting final counts.
    std::thread::sleep(std::time::Duration::from_millis(500));

    let reader = core.reader()?;
    println!("final live document count: {}", reader.doc_count());
    println!("merge scheduler degraded: {}", core.is_degraded());

    core.shutdown();
    Ok(())
}
