//! The K-way term merge that rewrites a set of barrels into one (§4.7
//! "Merge algorithm"). Shared by the `MergeScheduler`'s background merges
//! and, for a single barrel, a merge-idempotence style self-merge (§8
//! "Merge idempotence").

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::barrel::{BarrelReader, BarrelStats, BarrelWriter, InMemoryField};
use crate::core::error::Result;
use crate::core::types::{CollectionId, DocId, FieldId};
use crate::directory::Directory;
use crate::manifest::BarrelDescriptor;
use crate::posting::merge::{merge_postings, MergeInput};
use crate::reader::delete_bitvector::DeleteSnapshot;

/// Open every input barrel (oldest first, matching `barrel_rank` so
/// newer-barrel-wins shadowing resolves the same way it does in a reader's
/// multi-iterator, §4.3/§4.8), K-way merge each field's terms, and write the
/// result to a new barrel named `new_stem`.
///
/// `descriptors` must be in the same oldest-first order as the manifest
/// records them; that order **is** the merge rank.
pub fn execute_merge(
    directory: &Arc<dyn Directory>,
    descriptors: &[BarrelDescriptor],
    new_stem: &str,
    deletes: &DeleteSnapshot,
    skip_interval: usize,
    max_skip_level: usize,
) -> Result<BarrelStats> {
    let readers: Vec<Arc<BarrelReader>> = descriptors
        .iter()
        .map(|d| BarrelReader::open(Arc::clone(directory), d.name.clone()).map(Arc::new))
        .collect::<Result<_>>()?;

    let mut field_order: Vec<(FieldId, String)> = Vec::new();
    let mut seen_fields = BTreeSet::new();
    for reader in &readers {
        for descriptor in reader.field_info().iter() {
            if seen_fields.insert(descriptor.id) {
                field_order.push((descriptor.id, descriptor.name.clone()));
            }
        }
    }

    // Each field's term merge only reads from `readers`/`deletes` and builds
    // its own `InMemoryField`, so fields are independent units of work; a
    // dedicated pool sized to the host (rather than rayon's implicit global
    // pool) keeps a merge from oversubscribing a process that also runs
    // reader/writer threads, the same call the teacher's `ParallelIndexer`
    // makes with `rayon::ThreadPoolBuilder`.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build()
        .map_err(|e| crate::core::error::Error::internal(e.to_string()))?;

    let per_field: Vec<(FieldId, String, InMemoryField, BTreeSet<DocId>)> = pool.install(|| {
        field_order
            .into_par_iter()
            .map(|(field_id, name)| merge_one_field(&readers, field_id, name, deletes))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut survivors: BTreeSet<DocId> = BTreeSet::new();
    let mut fields = Vec::with_capacity(per_field.len());
    for (field_id, name, merged_field, field_survivors) in per_field {
        survivors.extend(field_survivors);
        fields.push((field_id, name, merged_field));
    }

    let stats = merged_stats(descriptors, &survivors);
    BarrelWriter::new(directory.as_ref(), new_stem, skip_interval, max_skip_level).write(fields)?;
    Ok(stats)
}

/// One field's K-way term merge: union the term dictionaries every input
/// barrel carries for `field_id`, then for each term, merge the barrels'
/// postings with newer-barrel-wins shadowing (§4.3/§4.7). Run once per
/// field, independently of every other field, so it can be fanned out
/// across `execute_merge`'s thread pool. Each input barrel's contribution is
/// filtered against `deletes.for_barrel(reader.stem())` rather than one
/// shared bitmap — an update's tombstone only applies to the barrels that
/// existed when it was recorded (§4.6), so a barrel holding an update's own
/// fresh copy is never shadowed by its own tombstone during this merge.
fn merge_one_field(
    readers: &[Arc<BarrelReader>],
    field_id: FieldId,
    name: String,
    deletes: &DeleteSnapshot,
) -> Result<(FieldId, String, InMemoryField, BTreeSet<DocId>)> {
    let mut terms = BTreeSet::new();
    for reader in readers {
        if let Ok(entries) = reader.field_terms(field_id) {
            for entry in entries {
                terms.insert(entry.term_id);
            }
        }
    }

    let mut merged_field = InMemoryField::new();
    let mut survivors = BTreeSet::new();
    for term in terms {
        let mut inputs = Vec::new();
        for (rank, reader) in readers.iter().enumerate() {
            let Ok(field_reader) = reader.field_reader(field_id) else {
                continue;
            };
            if let Some(posting) = field_reader.term_docs(term)? {
                inputs.push(MergeInput {
                    barrel_rank: rank as u32,
                    posting,
                    deleted: Some(deletes.for_barrel(reader.stem())),
                });
            }
        }
        if inputs.is_empty() {
            continue;
        }
        for doc in merge_postings(inputs)? {
            survivors.insert(doc.doc_id);
            for position in doc.positions {
                merged_field.add_occurrence(term, doc.doc_id, position);
            }
        }
    }
    Ok((field_id, name, merged_field, survivors))
}

/// `num_docs`/`max_doc_id` come straight from the set of doc ids that
/// actually survived the merge. `base_doc_ids` cannot be recovered from
/// postings alone — a doc id's collection is not carried through the
/// posting layer (§3) — so it is approximated as the smallest base doc id
/// recorded by any input for that collection; see DESIGN.md.
fn merged_stats(descriptors: &[BarrelDescriptor], survivors: &BTreeSet<DocId>) -> BarrelStats {
    let mut base_doc_ids: BTreeMap<CollectionId, DocId> = BTreeMap::new();
    for descriptor in descriptors {
        for &(collection, doc_id) in &descriptor.base_doc_ids {
            base_doc_ids
                .entry(collection)
                .and_modify(|existing| *existing = (*existing).min(doc_id))
                .or_insert(doc_id);
        }
    }
    BarrelStats {
        num_docs: survivors.len() as u32,
        max_doc_id: survivors.iter().next_back().copied().unwrap_or(DocId::MIN),
        base_doc_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::writer::{BarrelWriter as Writer, InMemoryField as Field};
    use crate::core::types::TermId;
    use crate::directory::memory::MemoryDirectory;
    use crate::reader::DeleteBitVector;

    fn write_barrel(dir: &dyn Directory, stem: &str, docs: &[(u32, u32, &[u32])]) {
        let mut field = Field::new();
        for (term, doc, positions) in docs {
            for &p in *positions {
                field.add_occurrence(TermId(*term), DocId(*doc), p);
            }
        }
        Writer::new(dir, stem, 4, 3).write(vec![(FieldId(0), "body".into(), field)]).unwrap();
    }

    fn descriptor(name: &str, num_docs: u32, max_doc_id: u32) -> BarrelDescriptor {
        BarrelDescriptor {
            name: name.to_string(),
            base_doc_ids: vec![(CollectionId(0), DocId(1))],
            num_docs,
            max_doc_id: DocId(max_doc_id),
            has_update_docs: false,
        }
    }

    #[test]
    fn merges_two_barrels_with_newer_wins_shadowing() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", &[(10, 1, &[0]), (10, 2, &[1])]);
        write_barrel(dir.as_ref(), "1", &[(10, 1, &[9])]);

        let descriptors = vec![descriptor("0", 2, 2), descriptor("1", 1, 1)];
        let stats = execute_merge(&dir, &descriptors, "2", &DeleteBitVector::new().snapshot(), 4, 3).unwrap();
        assert_eq!(stats.num_docs, 2);
        assert_eq!(stats.max_doc_id, DocId(2));

        let merged = BarrelReader::open(Arc::clone(&dir), "2").unwrap();
        let mut posting = merged.field_reader(FieldId(0)).unwrap().term_docs(TermId(10)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));
        assert_eq!(posting.next_position().unwrap(), Some(9));
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(2));
    }

    #[test]
    fn deleted_docs_are_dropped_from_the_merged_barrel() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", &[(10, 1, &[0]), (10, 2, &[0])]);

        let deletes = DeleteBitVector::new();
        deletes.tombstone_in_barrels(&["0".to_string()], DocId(1));
        let descriptors = vec![descriptor("0", 2, 2)];
        let stats = execute_merge(&dir, &descriptors, "1", &deletes.snapshot(), 4, 3).unwrap();
        assert_eq!(stats.num_docs, 1);
        assert_eq!(stats.max_doc_id, DocId(2));
    }

    #[test]
    fn merging_a_single_barrel_with_itself_is_idempotent() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        write_barrel(dir.as_ref(), "0", &[(10, 1, &[0, 2]), (10, 3, &[1])]);
        let descriptors = vec![descriptor("0", 2, 3)];
        let stats = execute_merge(&dir, &descriptors, "1", &DeleteBitVector::new().snapshot(), 4, 3).unwrap();
        assert_eq!(stats.num_docs, 2);
        assert_eq!(stats.max_doc_id, DocId(3));

        let merged = BarrelReader::open(Arc::clone(&dir), "1").unwrap();
        let mut posting = merged.field_reader(FieldId(0)).unwrap().term_docs(TermId(10)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));
        assert_eq!(posting.next_position().unwrap(), Some(0));
        assert_eq!(posting.next_position().unwrap(), Some(2));
    }

    #[test]
    fn merging_an_updated_doc_keeps_the_new_copy_not_the_tombstoned_old_one() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        // Barrel "0" holds doc 1 under its stale term; barrel "1" holds the
        // same doc id re-indexed under a different term after an update.
        write_barrel(dir.as_ref(), "0", &[(10, 1, &[0])]);
        write_barrel(dir.as_ref(), "1", &[(20, 1, &[0])]);

        let deletes = DeleteBitVector::new();
        deletes.tombstone_in_barrels(&["0".to_string()], DocId(1));

        let descriptors = vec![descriptor("0", 1, 1), descriptor("1", 1, 1)];
        let stats = execute_merge(&dir, &descriptors, "2", &deletes.snapshot(), 4, 3).unwrap();
        assert_eq!(stats.num_docs, 1);

        let merged = BarrelReader::open(Arc::clone(&dir), "2").unwrap();
        let reader = merged.field_reader(FieldId(0)).unwrap();
        assert!(reader.term_docs(TermId(10)).unwrap().is_none());
        let mut posting = reader.term_docs(TermId(20)).unwrap().unwrap();
        assert!(posting.next().unwrap());
        assert_eq!(posting.doc(), DocId(1));
    }
}
