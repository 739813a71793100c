//! §8 scenario 2, scaled down for a fast in-memory test run: many small
//! flushes under the `geometric` merge strategy should collapse down to a
//! small number of live barrels while the aggregate document count is
//! preserved exactly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use barrelidx::core::config::{Config, MergeStrategy};
use barrelidx::core::types::{CollectionId, DocId, FieldId, FieldTokens, IndexedDocument, TermId};
use barrelidx::directory::memory::MemoryDirectory;
use barrelidx::directory::Directory;
use barrelidx::manifest::BarrelsInfo;
use barrelidx::IndexCore;

const COLLECTION: CollectionId = CollectionId(0);
const BODY: FieldId = FieldId(0);
const BARRELS: u32 = 30;
const DOCS_PER_BARREL: u32 = 40;

fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("merge did not converge in time");
}

#[test]
fn geometric_strategy_collapses_many_small_flushes() {
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let mut field_names = BTreeMap::new();
    field_names.insert(BODY, "body".to_string());

    let mut config = Config::default();
    config.merge_strategy = MergeStrategy::Geometric { k: 3 };
    let core = IndexCore::open(Arc::clone(&directory), field_names, config).unwrap();

    let mut next_doc = 0u32;
    for _ in 0..BARRELS {
        for _ in 0..DOCS_PER_BARREL {
            let mut doc = IndexedDocument::new(DocId(next_doc), COLLECTION);
            let mut tokens = FieldTokens::new();
            tokens.push(TermId(next_doc % 17), 0);
            doc.add_field(BODY, tokens);
            core.writer().add_document(doc).unwrap();
            next_doc += 1;
        }
        core.writer().flush().unwrap();
    }

    let total_docs = (BARRELS * DOCS_PER_BARREL) as u64;
    let barrel_count = |d: &Arc<dyn Directory>| BarrelsInfo::load(d.as_ref()).unwrap().barrels.len();

    wait_until(|| barrel_count(&directory) <= 10);

    let mut reader = core.reader().unwrap();
    reader.reopen().unwrap();
    assert_eq!(reader.doc_count(), total_docs);
    assert!(barrel_count(&directory) <= 10);
    assert!(!core.is_degraded());

    core.shutdown();
}
