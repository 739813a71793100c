//! End-to-end walkthrough: open an index, add documents, flush, read them
//! back, update one, delete another, and run a forced optimize.

use std::collections::BTreeMap;
use std::sync::Arc;

use barrelidx::core::config::Config;
use barrelidx::core::types::{CollectionId, DocId, FieldId, FieldTokens, IndexedDocument, TermId};
use barrelidx::directory::fs::FsDirectory;
use barrelidx::directory::Directory;
use barrelidx::posting::Posting;
use barrelidx::IndexCore;

const COLLECTION: CollectionId = CollectionId(0);
const TITLE: FieldId = FieldId(0);
const BODY: FieldId = FieldId(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let data_dir = std::env::temp_dir().join("barrelidx-simple-usage-demo");
    std::fs::create_dir_all(&data_dir)?;
    let directory: Arc<dyn Directory> = Arc::new(FsDirectory::open(&data_dir, true)?);

    let mut field_names = BTreeMap::new();
    field_names.insert(TITLE, "title".to_string());
    field_names.insert(BODY, "body".to_string());

    let core = IndexCore::open(directory, field_names, Config::default())?;

    // A document is a bag of (field, token-stream) pairs; assigning term ids
    // to tokens is an external id-manager's job (§1), so we use small fixed
    // ids here to stand in for that boundary.
    const RUST: TermId = TermId(1);
    const DATABASE: TermId = TermId(2);

    core.writer().add_document(document(1, &[(TITLE, &[RUST]), (BODY, &[RUST, DATABASE])]))?;
    core.writer().add_document(document(2, &[(TITLE, &[DATABASE]), (BODY, &[DATABASE])]))?;
    core.writer().flush()?;

    let mut reader = core.reader()?;
    reader.reopen()?;
    println!("documents indexed: {}", reader.doc_count());

    if let Some(mut hits) = reader.term_docs(BODY, RUST)? {
        print!("docs mentioning 'rust' in body:");
        while hits.next()? {
            print!(" {}", hits.doc().value());
        }
        println!();
    }

    // Update document 1's title in place: the old copy is tombstoned, the
    // new payload lands in the current in-memory barrel (§4.6).
    core.writer().update_document(DocId(1), document(1, &[(TITLE, &[DATABASE]), (BODY, &[DATABASE])]))?;
    core.writer().flush()?;

    reader.reopen()?;
    println!("documents indexed after update: {}", reader.doc_count());

    core.merge_scheduler().optimize()?;
    std::thread::sleep(std::time::Duration::from_millis(200));
    println!("degraded: {}", core.is_degraded());

    core.shutdown();
    Ok(())
}

fn document(id: u32, fields: &[(FieldId, &[TermId])]) -> IndexedDocument {
    let mut doc = IndexedDocument::new(DocId(id), COLLECTION);
    for (field, terms) in fields {
        let mut tokens = FieldTokens::new();
        for (position, term) in terms.iter().enumerate() {
            tokens.push(*term, position as u32);
        }
        doc.add_field(*field, tokens);
    }
    doc
}
