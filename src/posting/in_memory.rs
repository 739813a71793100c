use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::posting::arena::ChunkedArena;
use crate::posting::Posting;

struct DocEntry {
    doc_id: DocId,
    positions: Vec<u32>,
}

/// A posting list as it is built while a barrel is still resident in
/// memory (§4.3). Appends are in strictly increasing doc-id order because
/// the writer feeds documents to the in-memory barrel in that order;
/// `add_occurrence` asserts this invariant rather than silently accepting
/// out-of-order input.
pub struct InMemoryPosting {
    docs: ChunkedArena<DocEntry>,
    collection_term_freq: u64,
}

impl InMemoryPosting {
    pub fn new() -> Self {
        InMemoryPosting {
            docs: ChunkedArena::new(),
            collection_term_freq: 0,
        }
    }

    /// Record one term occurrence. `position` must be strictly greater than
    /// the previous position recorded for this `doc_id` (§3 posting invariant).
    pub fn add_occurrence(&mut self, doc_id: DocId, position: u32) -> Result<()> {
        if let Some(last) = self.docs.last_mut() {
            if last.doc_id == doc_id {
                if let Some(&prev) = last.positions.last() {
                    if position <= prev {
                        return Err(Error::internal(
                            "positions within a document must strictly increase",
                        ));
                    }
                }
                last.positions.push(position);
                self.collection_term_freq += 1;
                return Ok(());
            }
            if doc_id <= last.doc_id {
                return Err(Error::internal(
                    "doc ids fed to a posting must strictly increase",
                ));
            }
        }
        self.docs.push(DocEntry {
            doc_id,
            positions: vec![position],
        });
        self.collection_term_freq += 1;
        Ok(())
    }

    pub fn doc_freq(&self) -> u32 {
        self.docs.len() as u32
    }

    pub fn collection_term_freq(&self) -> u64 {
        self.collection_term_freq
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Rough resident memory footprint, used by the writer to decide when
    /// the in-memory barrel has reached its configured budget (§4.6).
    pub fn memory_size_estimate(&self) -> usize {
        let mut total = 0usize;
        for entry in self.docs.iter() {
            total += std::mem::size_of::<DocId>() + entry.positions.len() * 4;
        }
        total
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocId, &[u32])> {
        self.docs.iter().map(|e| (e.doc_id, e.positions.as_slice()))
    }

    pub fn cursor(&self) -> InMemoryPostingCursor<'_> {
        InMemoryPostingCursor {
            posting: self,
            idx: None,
            position_idx: 0,
        }
    }
}

impl Default for InMemoryPosting {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InMemoryPostingCursor<'a> {
    posting: &'a InMemoryPosting,
    idx: Option<usize>,
    position_idx: usize,
}

impl<'a> InMemoryPostingCursor<'a> {
    fn current(&self) -> Option<&DocEntry> {
        self.idx.map(|i| self.posting.docs.get(i))
    }
}

impl<'a> Posting for InMemoryPostingCursor<'a> {
    fn doc_freq(&self) -> u32 {
        self.posting.doc_freq()
    }

    fn collection_term_freq(&self) -> u64 {
        self.posting.collection_term_freq()
    }

    fn next(&mut self) -> Result<bool> {
        let next_idx = match self.idx {
            None => 0,
            Some(i) => i + 1,
        };
        if next_idx >= self.posting.docs.len() {
            self.idx = Some(next_idx);
            return Ok(false);
        }
        self.idx = Some(next_idx);
        self.position_idx = 0;
        Ok(true)
    }

    fn doc(&self) -> DocId {
        self.current().map(|e| e.doc_id).unwrap_or(DocId::MAX)
    }

    fn freq(&self) -> u32 {
        self.current().map(|e| e.positions.len() as u32).unwrap_or(0)
    }

    fn next_position(&mut self) -> Result<Option<u32>> {
        let pos = match self.current() {
            Some(e) if self.position_idx < e.positions.len() => {
                let p = e.positions[self.position_idx];
                self.position_idx += 1;
                Some(p)
            }
            _ => None,
        };
        Ok(pos)
    }

    fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>> {
        loop {
            if !self.next()? {
                return Ok(None);
            }
            if self.doc() >= target {
                return Ok(Some(self.doc()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_occurrences_and_iterates_in_order() {
        let mut p = InMemoryPosting::new();
        p.add_occurrence(DocId(1), 0).unwrap();
        p.add_occurrence(DocId(1), 2).unwrap();
        p.add_occurrence(DocId(3), 1).unwrap();
        assert_eq!(p.doc_freq(), 2);
        assert_eq!(p.collection_term_freq(), 3);

        let mut c = p.cursor();
        assert!(c.next().unwrap());
        assert_eq!(c.doc(), DocId(1));
        assert_eq!(c.freq(), 2);
        assert_eq!(c.next_position().unwrap(), Some(0));
        assert_eq!(c.next_position().unwrap(), Some(2));
        assert_eq!(c.next_position().unwrap(), None);

        assert!(c.next().unwrap());
        assert_eq!(c.doc(), DocId(3));
        assert_eq!(c.freq(), 1);

        assert!(!c.next().unwrap());
    }

    #[test]
    fn rejects_non_monotone_doc_ids() {
        let mut p = InMemoryPosting::new();
        p.add_occurrence(DocId(5), 0).unwrap();
        assert!(p.add_occurrence(DocId(5), 0).is_err() || p.add_occurrence(DocId(4), 0).is_err());
    }

    #[test]
    fn skip_to_finds_first_doc_at_or_past_target() {
        let mut p = InMemoryPosting::new();
        for d in [1u32, 4, 9, 20] {
            p.add_occurrence(DocId(d), 0).unwrap();
        }
        let mut c = p.cursor();
        assert_eq!(c.skip_to(DocId(5)).unwrap(), Some(DocId(9)));
        assert_eq!(c.skip_to(DocId(9)).unwrap(), Some(DocId(20)));
        assert_eq!(c.skip_to(DocId(100)).unwrap(), None);
    }
}
