use crate::core::error::{Error, Result};
use crate::core::types::TermId;
use crate::directory::DirectoryInput;

/// One record in a field's term dictionary (§6 `B.voc`): the term, how many
/// documents contain it, and where its posting begins in `.dfp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermDictEntry {
    pub term_id: TermId,
    pub doc_freq: u32,
    pub dfp_offset: u64,
}

const RECORD_LEN: usize = 4 + 4 + 8;
const FOOTER_LEN: u64 = 8 + 8;

/// Encode one field's sorted term dictionary run followed by its footer
/// (§6: `{voc_length: u64, term_count: u64}`, little-endian, fixed width —
/// unlike the postings streams this is random-access by binary search, so
/// it is not vbyte-coded). Returns the bytes to append to `.voc`; the
/// caller records the offset just past these bytes as the field's
/// `voc_offset` in `.fdi`.
pub fn encode(entries: &[TermDictEntry]) -> Vec<u8> {
    debug_assert!(entries.windows(2).all(|w| w[0].term_id.0 < w[1].term_id.0));
    let mut out = Vec::with_capacity(entries.len() * RECORD_LEN + FOOTER_LEN as usize);
    for e in entries {
        out.extend_from_slice(&e.term_id.0.to_le_bytes());
        out.extend_from_slice(&e.doc_freq.to_le_bytes());
        out.extend_from_slice(&e.dfp_offset.to_le_bytes());
    }
    let voc_length = (entries.len() * RECORD_LEN) as u64;
    out.extend_from_slice(&voc_length.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    out
}

/// A field's term dictionary, loaded fully into memory (§4.4: "`TermReader`
/// opens by mapping/loading the dictionary into memory"). `seek` binary
/// searches since records are sorted by `term_id`.
#[derive(Debug, Clone, Default)]
pub struct TermDictionary {
    entries: Vec<TermDictEntry>,
}

impl TermDictionary {
    /// Load the dictionary segment whose footer ends at `voc_offset` (§4.4:
    /// "seeking to `end - footer_size`, then to `end - footer_size - length`").
    pub fn load(input: &dyn DirectoryInput, voc_offset: u64) -> Result<Self> {
        if voc_offset < FOOTER_LEN {
            return Err(Error::corruption("voc_offset too small to contain a footer"));
        }
        let mut footer = [0u8; FOOTER_LEN as usize];
        input.read_at(voc_offset - FOOTER_LEN, &mut footer)?;
        let voc_length = u64::from_le_bytes(footer[0..8].try_into().unwrap());
        let term_count = u64::from_le_bytes(footer[8..16].try_into().unwrap());

        if voc_length != term_count * RECORD_LEN as u64 {
            return Err(Error::corruption("voc footer length does not match term count"));
        }
        let records_start = voc_offset - FOOTER_LEN - voc_length;
        let mut buf = vec![0u8; voc_length as usize];
        if voc_length > 0 {
            input.read_at(records_start, &mut buf)?;
        }

        let mut entries = Vec::with_capacity(term_count as usize);
        for chunk in buf.chunks_exact(RECORD_LEN) {
            let term_id = TermId(u32::from_le_bytes(chunk[0..4].try_into().unwrap()));
            let doc_freq = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
            let dfp_offset = u64::from_le_bytes(chunk[8..16].try_into().unwrap());
            entries.push(TermDictEntry { term_id, doc_freq, dfp_offset });
        }
        if entries.windows(2).any(|w| w[0].term_id.0 >= w[1].term_id.0) {
            return Err(Error::corruption("term dictionary is not sorted by term id"));
        }
        Ok(TermDictionary { entries })
    }

    pub fn seek(&self, term: TermId) -> Option<TermDictEntry> {
        self.entries
            .binary_search_by_key(&term.0, |e| e.term_id.0)
            .ok()
            .map(|i| self.entries[i])
    }

    /// Walk every `(term_id, doc_freq, dfp_offset)` triple in dictionary
    /// order, independent of any single term lookup — the primitive the
    /// merge scheduler's K-way term merge is built on (§4.7), also useful as
    /// a read-only introspection API.
    pub fn iter(&self) -> impl Iterator<Item = TermDictEntry> + '_ {
        self.entries.iter().copied()
    }

    pub fn term_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::directory::Directory;

    #[test]
    fn encodes_and_loads_back_sorted_entries() {
        let entries = vec![
            TermDictEntry { term_id: TermId(1), doc_freq: 3, dfp_offset: 0 },
            TermDictEntry { term_id: TermId(4), doc_freq: 1, dfp_offset: 12 },
            TermDictEntry { term_id: TermId(9), doc_freq: 7, dfp_offset: 20 },
        ];
        let bytes = encode(&entries);
        let dir = MemoryDirectory::new();
        {
            let mut out = dir.open_output("f.voc").unwrap();
            out.write_all(&bytes).unwrap();
            out.sync().unwrap();
        }
        let input = dir.open_input("f.voc").unwrap();
        let dict = TermDictionary::load(input.as_ref(), bytes.len() as u64).unwrap();
        assert_eq!(dict.term_count(), 3);
        assert_eq!(dict.seek(TermId(4)), Some(entries[1]));
        assert_eq!(dict.seek(TermId(5)), None);
        let walked: Vec<TermId> = dict.iter().map(|e| e.term_id).collect();
        assert_eq!(walked, vec![TermId(1), TermId(4), TermId(9)]);
    }
}
