use std::collections::BTreeMap;

use crate::barrel::dictionary::{self, TermDictEntry};
use crate::barrel::field_info::{FieldDescriptor, FieldFlags, FieldInfo};
use crate::codec::vbyte::VByte;
use crate::core::error::Result;
use crate::core::types::{CollectionId, DocId, FieldId, TermId};
use crate::directory::{Directory, DirectoryOutput};
use crate::posting::arena::ChunkedArena;
use crate::posting::skiplist::SkipListBuilder;

/// A single field's postings while a barrel is still resident in memory:
/// one `InMemoryPosting`-shaped accumulation per term, keyed by `TermId` so
/// writes naturally land in dictionary order on flush.
#[derive(Default)]
pub struct InMemoryField {
    terms: BTreeMap<TermId, TermPostings>,
}

#[derive(Default)]
struct TermPostings {
    docs: ChunkedArena<(DocId, Vec<u32>)>,
}

impl InMemoryField {
    pub fn new() -> Self {
        InMemoryField::default()
    }

    /// Record one term occurrence for `doc_id` at `position`. The writer
    /// feeds documents in increasing `doc_id` order, so within a term's
    /// postings the last entry is always the current doc or an earlier one.
    /// Returns the approximate number of bytes this occurrence added, so a
    /// caller tracking a memory budget (§4.6) can update its running total
    /// without rescanning every term on each call.
    pub fn add_occurrence(&mut self, term: TermId, doc_id: DocId, position: u32) -> usize {
        let postings = self.terms.entry(term).or_default();
        match postings.docs.last_mut() {
            Some((last_doc, positions)) if *last_doc == doc_id => {
                positions.push(position);
                4
            }
            _ => {
                postings.docs.push((doc_id, vec![position]));
                std::mem::size_of::<(DocId, Vec<u32>)>() + 4
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Rough resident memory footprint, used by the writer to decide when
    /// the in-memory barrel has reached its configured budget (§4.6).
    pub fn memory_size_estimate(&self) -> usize {
        let mut total = 0usize;
        for postings in self.terms.values() {
            for (_, positions) in postings.docs.iter() {
                total += std::mem::size_of::<(DocId, Vec<u32>)>() + positions.len() * 4;
            }
        }
        total
    }
}

/// Builds one sealed barrel's files from a set of in-memory fields. Follows
/// the on-disk layout of §6: a shared `.dfp`/`.pop`/`.skp` per field's
/// postings, one sorted dictionary run per field in `.voc`, and a `.fdi`
/// tying field ids to their dictionary's byte range.
pub struct BarrelWriter<'a> {
    directory: &'a dyn Directory,
    stem: String,
    skip_interval: usize,
    max_skip_level: usize,
}

impl<'a> BarrelWriter<'a> {
    pub fn new(directory: &'a dyn Directory, stem: impl Into<String>, skip_interval: usize, max_skip_level: usize) -> Self {
        BarrelWriter {
            directory,
            stem: stem.into(),
            skip_interval,
            max_skip_level,
        }
    }

    fn file(&self, ext: &str) -> String {
        format!("{}.{}", self.stem, ext)
    }

    /// Write every field's postings and the dictionary/field-info that
    /// describe them. `fields` is `(field_id, field_name, field)` in any
    /// order; the written `.fdi` preserves that order.
    pub fn write(&self, fields: Vec<(FieldId, String, InMemoryField)>) -> Result<()> {
        let mut dfp_buf = Vec::new();
        let mut pop_buf = Vec::new();
        let mut skp_buf = Vec::new();
        let mut voc_buf = Vec::new();
        let mut descriptors = Vec::with_capacity(fields.len());

        for (field_id, name, field) in fields {
            let mut entries = Vec::with_capacity(field.terms.len());
            for (term_id, postings) in &field.terms {
                let dfp_offset = dfp_buf.len() as u64;
                let pos_stream_offset = pop_buf.len() as u64;
                let doc_freq = postings.docs.len() as u32;
                let mut builder = SkipListBuilder::new(self.skip_interval, self.max_skip_level);
                let mut prev_doc = 0u32;

                for (doc_id, positions) in postings.docs.iter() {
                    VByte::encode_u32(&mut dfp_buf, doc_id.value() - prev_doc);
                    VByte::encode_u32(&mut dfp_buf, positions.len() as u32);
                    prev_doc = doc_id.value();

                    let mut prev_pos = 0u32;
                    for &p in positions {
                        VByte::encode_u32(&mut pop_buf, p - prev_pos);
                        prev_pos = p;
                    }
                    builder.record(*doc_id, dfp_buf.len() as u64, pop_buf.len() as u64);
                }

                let skip_offset = skp_buf.len() as u64;
                let skip = builder.finish();
                skp_buf.extend_from_slice(&dictionary_skip_bytes(&skip));

                VByte::encode_u64(&mut dfp_buf, pos_stream_offset);
                VByte::encode_u64(&mut dfp_buf, skip_offset);

                entries.push(TermDictEntry { term_id: *term_id, doc_freq, dfp_offset });
            }

            voc_buf.extend_from_slice(&dictionary::encode(&entries));
            let voc_offset = voc_buf.len() as u64;

            descriptors.push(FieldDescriptor {
                id: field_id,
                name,
                flags: FieldFlags::INDEXED,
                voc_offset,
            });
        }

        let field_info = FieldInfo::new(descriptors);

        self.write_file("dfp", &dfp_buf)?;
        self.write_file("pop", &pop_buf)?;
        self.write_file("skp", &skp_buf)?;
        self.write_file("voc", &voc_buf)?;
        self.write_file("fdi", &field_info.encode())?;
        Ok(())
    }

    fn write_file(&self, ext: &str, bytes: &[u8]) -> Result<()> {
        let mut out = self.directory.open_output(&self.file(ext))?;
        out.write_all(bytes)?;
        out.sync()
    }
}

fn dictionary_skip_bytes(skip: &crate::posting::skiplist::SkipList) -> Vec<u8> {
    crate::posting::skiplist::encode(skip)
}

/// A document assigned to the in-memory barrel, tracked purely so the
/// writer can maintain `base_doc_ids`/`max_doc_id`/`num_docs` without
/// rescanning every field (§3 barrel metadata). `base_doc_ids` is a map
/// because a single barrel may hold documents from several collections,
/// each with its own smallest doc id (§3 "Barrel").
#[derive(Debug, Clone, Default)]
pub struct BarrelStats {
    pub num_docs: u32,
    pub max_doc_id: DocId,
    pub base_doc_ids: BTreeMap<CollectionId, DocId>,
}

impl BarrelStats {
    pub fn record(&mut self, collection: CollectionId, doc_id: DocId) {
        self.num_docs += 1;
        if doc_id > self.max_doc_id {
            self.max_doc_id = doc_id;
        }
        self.base_doc_ids.entry(collection).or_insert(doc_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::barrel::reader::BarrelReader;
    use crate::directory::memory::MemoryDirectory;
    use crate::directory::Directory;

    #[test]
    fn writes_and_reads_back_a_single_field_barrel() {
        let dir = MemoryDirectory::new();
        let mut field = InMemoryField::new();
        field.add_occurrence(TermId(10), DocId(1), 0);
        field.add_occurrence(TermId(10), DocId(1), 4);
        field.add_occurrence(TermId(10), DocId(3), 1);
        field.add_occurrence(TermId(20), DocId(2), 0);

        let writer = BarrelWriter::new(&dir, "0", 4, 3);
        writer.write(vec![(FieldId(0), "body".into(), field)]).unwrap();

        let dir: Arc<dyn Directory> = Arc::new(dir);
        let reader = BarrelReader::open(dir, "0").unwrap();
        let mut term_reader = reader.field_reader(FieldId(0)).unwrap();
        let mut posting = term_reader.term_docs(TermId(10)).unwrap().unwrap();
        assert_eq!(posting.doc_freq(), 2);
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));
        assert_eq!(posting.next_position().unwrap(), Some(0));
        assert_eq!(posting.next_position().unwrap(), Some(4));
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(3));
        assert!(!posting.next().unwrap());

        assert!(term_reader.term_docs(TermId(999)).unwrap().is_none());
    }
}
