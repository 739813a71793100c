//! The multi-barrel posting view a `Reader` hands back from `term_docs`/
//! `term_positions` (§4.8): every live barrel's contribution to a term,
//! merged by the same newer-barrel-wins, tombstone-filtering algorithm the
//! merge scheduler uses to build merged barrels (§4.3, §4.7), then wrapped
//! back up as a plain `Posting` so callers can't tell the difference from a
//! single barrel's on-disk posting.

use std::sync::Arc;

use crate::barrel::BarrelReader;
use crate::core::error::Result;
use crate::core::types::{DocId, FieldId, TermId};
use crate::posting::merge::{merge_postings, MergeInput, MergedDoc};
use crate::posting::Posting;
use crate::reader::delete_bitvector::DeleteSnapshot;

/// Build the merged view of `term` in `field` across every barrel in
/// `barrels` (oldest first, paired with its rank). Barrels with no such
/// field, or no entry for `term`, are simply skipped. Each barrel is
/// filtered against `deletes.for_barrel(name)` rather than one bitmap
/// shared by every barrel — an update's tombstone is scoped to the barrels
/// that existed when it was recorded (§4.6), so the barrel holding the
/// update's own fresh payload is never filtered against its own tombstone.
pub fn multi_term_docs(
    barrels: &[(u32, Arc<BarrelReader>)],
    field: FieldId,
    term: TermId,
    deletes: &DeleteSnapshot,
) -> Result<Option<Box<dyn Posting>>> {
    let mut inputs = Vec::new();
    for (rank, reader) in barrels {
        let Ok(field_reader) = reader.field_reader(field) else {
            continue;
        };
        if let Some(posting) = field_reader.term_docs(term)? {
            inputs.push(MergeInput {
                barrel_rank: *rank,
                posting,
                deleted: Some(deletes.for_barrel(reader.stem())),
            });
        }
    }
    if inputs.is_empty() {
        return Ok(None);
    }
    let merged = merge_postings(inputs)?;
    if merged.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(MergedPostingCursor::new(merged))))
}

/// A `Posting` cursor over an already-materialized merge result. The merge
/// is eager (§4.3 grounding: the merge scheduler itself consumes
/// `merge_postings` eagerly when building a combined barrel), so this is
/// just a `Vec` walk rather than a lazy K-way merge in its own right.
pub struct MergedPostingCursor {
    docs: Vec<MergedDoc>,
    collection_term_freq: u64,
    idx: Option<usize>,
    position_idx: usize,
}

impl MergedPostingCursor {
    pub fn new(docs: Vec<MergedDoc>) -> Self {
        let collection_term_freq = docs.iter().map(|d| d.freq as u64).sum();
        MergedPostingCursor {
            docs,
            collection_term_freq,
            idx: None,
            position_idx: 0,
        }
    }

    fn current(&self) -> Option<&MergedDoc> {
        self.idx.and_then(|i| self.docs.get(i))
    }
}

impl Posting for MergedPostingCursor {
    fn doc_freq(&self) -> u32 {
        self.docs.len() as u32
    }

    fn collection_term_freq(&self) -> u64 {
        self.collection_term_freq
    }

    fn next(&mut self) -> Result<bool> {
        let next_idx = match self.idx {
            None => 0,
            Some(i) => i + 1,
        };
        self.idx = Some(next_idx);
        self.position_idx = 0;
        Ok(next_idx < self.docs.len())
    }

    fn doc(&self) -> DocId {
        self.current().map(|d| d.doc_id).unwrap_or(DocId::MAX)
    }

    fn freq(&self) -> u32 {
        self.current().map(|d| d.freq).unwrap_or(0)
    }

    fn next_position(&mut self) -> Result<Option<u32>> {
        let idx = self.idx;
        match idx.and_then(|i| self.docs.get(i)) {
            Some(d) if self.position_idx < d.positions.len() => {
                let p = d.positions[self.position_idx];
                self.position_idx += 1;
                Ok(Some(p))
            }
            _ => Ok(None),
        }
    }

    fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>> {
        let start = match self.idx {
            None => 0,
            Some(i) => i + 1,
        };
        match self.docs[start..].binary_search_by_key(&target, |d| d.doc_id) {
            Ok(rel) => {
                self.idx = Some(start + rel);
                self.position_idx = 0;
                Ok(Some(target))
            }
            Err(rel) if start + rel < self.docs.len() => {
                self.idx = Some(start + rel);
                self.position_idx = 0;
                Ok(Some(self.doc()))
            }
            Err(_) => {
                self.idx = Some(self.docs.len());
                Ok(None)
            }
        }
    }
}
