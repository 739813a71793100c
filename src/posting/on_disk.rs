use crate::codec::vbyte::VByte;
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::directory::DirectoryInput;
use crate::posting::skiplist::{self, SkipList};
use crate::posting::Posting;

/// Bytes pulled from the backing `DirectoryInput` each time a stream cursor
/// runs dry. Small enough that opening a posting never does a large read,
/// large enough that a typical document's position run needs only one fill.
const GROW_CHUNK: u64 = 512;

/// A vbyte-stream cursor over one region of a `DirectoryInput`, grown lazily
/// as decoding needs more bytes. A sealed barrel's files are immutable, so
/// there is no risk of the bytes moving under us while we grow the buffer.
struct LazyStream {
    input: Box<dyn DirectoryInput>,
    base: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl LazyStream {
    fn new(input: Box<dyn DirectoryInput>, base: u64) -> Self {
        LazyStream { input, base, buf: Vec::new(), pos: 0 }
    }

    fn grow(&mut self) -> Result<bool> {
        let have = self.buf.len() as u64;
        let file_len = self.input.len();
        let avail = file_len.saturating_sub(self.base + have);
        if avail == 0 {
            return Ok(false);
        }
        let take = avail.min(GROW_CHUNK);
        let mut extra = vec![0u8; take as usize];
        self.input.read_at(self.base + have, &mut extra)?;
        self.buf.extend_from_slice(&extra);
        Ok(true)
    }

    fn read_u32(&mut self) -> Result<u32> {
        loop {
            match VByte::decode_u32(&self.buf[self.pos..]) {
                Ok((v, n)) => {
                    self.pos += n;
                    return Ok(v);
                }
                Err(_) if self.grow()? => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn read_u64(&mut self) -> Result<u64> {
        loop {
            match VByte::decode_u64(&self.buf[self.pos..]) {
                Ok((v, n)) => {
                    self.pos += n;
                    return Ok(v);
                }
                Err(_) if self.grow()? => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reposition this cursor to start reading from `offset`, discarding any
    /// buffered bytes. Used when a skip entry jumps the reader ahead.
    fn seek(&mut self, offset: u64) {
        self.base = offset;
        self.buf.clear();
        self.pos = 0;
    }
}

/// A posting list read back from a sealed barrel (§6 `B.dfp`/`B.pop`/`B.skp`).
///
/// The `(docid_gap, freq)` pairs for a term are a bounded run (`doc_freq`
/// entries, known from the `.voc` dictionary record) immediately followed by
/// the position-stream and skip-list offsets, so they are decoded eagerly at
/// `open()` time — that is the only way to learn where the position stream
/// starts, since the offsets trail the pairs on disk (§6). Positions
/// themselves stay lazy: `.pop` is read through a growing cursor and only
/// decoded as the caller calls `next_position`.
pub struct OnDiskPosting {
    entries: Vec<(DocId, u32)>,
    collection_term_freq: u64,
    pos_stream_offset: u64,
    skip_input: Option<Box<dyn DirectoryInput>>,
    skip_offset: u64,
    skip: Option<SkipList>,
    pop: Option<LazyStream>,
    pop_input: Box<dyn DirectoryInput>,
    idx: Option<usize>,
    positions_remaining: u32,
    position_acc: u32,
}

impl OnDiskPosting {
    /// `dfp_offset` and `doc_freq` come from the term dictionary's entry for
    /// this term (§4.4, §6 `B.voc`).
    pub fn open(
        dfp_input: Box<dyn DirectoryInput>,
        pop_input: Box<dyn DirectoryInput>,
        skip_input: Option<Box<dyn DirectoryInput>>,
        dfp_offset: u64,
        doc_freq: u32,
    ) -> Result<Self> {
        let mut dfp = LazyStream::new(dfp_input, dfp_offset);
        let mut entries = Vec::with_capacity(doc_freq as usize);
        let mut prev_doc = 0u32;
        let mut collection_term_freq = 0u64;
        for _ in 0..doc_freq {
            let gap = dfp.read_u32()?;
            let freq = dfp.read_u32()?;
            prev_doc = prev_doc
                .checked_add(gap)
                .ok_or_else(|| Error::corruption("doc id overflow while decoding posting"))?;
            collection_term_freq += freq as u64;
            entries.push((DocId(prev_doc), freq));
        }
        let pos_stream_offset = dfp.read_u64()?;
        let skip_offset = dfp.read_u64()?;

        Ok(OnDiskPosting {
            entries,
            collection_term_freq,
            pos_stream_offset,
            skip_input,
            skip_offset,
            skip: None,
            pop: None,
            pop_input,
            idx: None,
            positions_remaining: 0,
            position_acc: 0,
        })
    }

    fn ensure_skip_loaded(&mut self) -> Result<()> {
        if self.skip.is_some() {
            return Ok(());
        }
        let Some(input) = &self.skip_input else {
            self.skip = Some(SkipList::default());
            return Ok(());
        };
        if self.skip_offset >= input.len() {
            self.skip = Some(SkipList::default());
            return Ok(());
        }
        let mut len = GROW_CHUNK.min(input.len() - self.skip_offset);
        loop {
            let mut buf = vec![0u8; len as usize];
            input.read_at(self.skip_offset, &mut buf)?;
            match skiplist::encoded_len(&buf) {
                Ok(n) if n <= buf.len() => {
                    buf.truncate(n);
                    self.skip = Some(skiplist::decode(&buf)?);
                    return Ok(());
                }
                _ => {
                    let remaining = input.len() - self.skip_offset;
                    if len >= remaining {
                        return Err(Error::corruption("truncated skip list"));
                    }
                    len = (len * 2).min(remaining);
                }
            }
        }
    }

    fn pop_cursor(&mut self) -> &mut LazyStream {
        self.pop.get_or_insert_with(|| LazyStream::new(self.pop_input.clone_input(), self.pos_stream_offset))
    }

    fn discard_remaining_positions(&mut self) -> Result<()> {
        while self.positions_remaining > 0 {
            self.pop_cursor().read_u32()?;
            self.positions_remaining -= 1;
        }
        Ok(())
    }

    /// Advance the position stream past every document's occurrences from
    /// `from_idx` (inclusive) up to but excluding `to_idx`, without
    /// surfacing them — used after a skip-list jump lands the doc cursor
    /// ahead of where the position stream currently sits.
    fn fast_forward_positions(&mut self, from_idx: usize, to_idx: usize) -> Result<()> {
        for i in from_idx..to_idx {
            let freq = self.entries[i].1;
            for _ in 0..freq {
                self.pop_cursor().read_u32()?;
            }
        }
        Ok(())
    }
}

impl Posting for OnDiskPosting {
    fn doc_freq(&self) -> u32 {
        self.entries.len() as u32
    }

    fn collection_term_freq(&self) -> u64 {
        self.collection_term_freq
    }

    fn next(&mut self) -> Result<bool> {
        let next_idx = match self.idx {
            None => 0,
            Some(i) => i + 1,
        };
        if next_idx >= self.entries.len() {
            self.idx = Some(next_idx);
            return Ok(false);
        }
        self.discard_remaining_positions()?;
        self.idx = Some(next_idx);
        self.positions_remaining = self.entries[next_idx].1;
        self.position_acc = 0;
        Ok(true)
    }

    fn doc(&self) -> DocId {
        self.idx
            .and_then(|i| self.entries.get(i))
            .map(|(d, _)| *d)
            .unwrap_or(DocId::MAX)
    }

    fn freq(&self) -> u32 {
        self.idx.and_then(|i| self.entries.get(i)).map(|(_, f)| *f).unwrap_or(0)
    }

    fn next_position(&mut self) -> Result<Option<u32>> {
        if self.positions_remaining == 0 {
            return Ok(None);
        }
        let gap = self.pop_cursor().read_u32()?;
        self.position_acc += gap;
        self.positions_remaining -= 1;
        Ok(Some(self.position_acc))
    }

    fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>> {
        if let Some(i) = self.idx {
            if i < self.entries.len() && self.entries[i].0 >= target {
                return Ok(Some(self.entries[i].0));
            }
        }

        // Binary search the in-memory doc-id list for the landing point.
        let start_idx = self.entries.partition_point(|(d, _)| *d < target);
        if start_idx >= self.entries.len() {
            self.idx = Some(self.entries.len());
            self.positions_remaining = 0;
            return Ok(None);
        }

        self.ensure_skip_loaded()?;
        let prev_idx = self.idx.map(|i| i + 1).unwrap_or(0);
        self.discard_remaining_positions()?;

        // Use the skip list to jump the position stream as close to
        // `start_idx` as possible without decoding every intervening
        // document's positions one vbyte at a time.
        let jump = self
            .skip
            .as_ref()
            .and_then(|s| s.find_before(self.entries[start_idx].0));
        let resume_idx = match jump {
            Some(entry) if (entry.ordinal as usize) > prev_idx && (entry.ordinal as usize) <= start_idx => {
                self.pop_cursor().seek(entry.pop_offset);
                entry.ordinal as usize
            }
            _ => prev_idx,
        };
        self.fast_forward_positions(resume_idx, start_idx)?;

        self.idx = Some(start_idx);
        self.positions_remaining = self.entries[start_idx].1;
        self.position_acc = 0;
        Ok(Some(self.entries[start_idx].0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::directory::Directory;
    use crate::posting::skiplist::SkipListBuilder;

    fn write_posting(dir: &MemoryDirectory, doc_ids: &[u32], positions: &[Vec<u32>], skip_interval: usize) {
        let mut dfp_buf = Vec::new();
        let mut pop_buf = Vec::new();
        let mut builder = SkipListBuilder::new(skip_interval, 3);
        let mut prev_doc = 0u32;
        for (doc_id, pos_list) in doc_ids.iter().zip(positions.iter()) {
            VByte::encode_u32(&mut dfp_buf, doc_id - prev_doc);
            VByte::encode_u32(&mut dfp_buf, pos_list.len() as u32);
            prev_doc = *doc_id;
            let mut prev_pos = 0u32;
            for &p in pos_list {
                VByte::encode_u32(&mut pop_buf, p - prev_pos);
                prev_pos = p;
            }
            builder.record(DocId(*doc_id), dfp_buf.len() as u64, pop_buf.len() as u64);
        }
        // trailer: pos_stream_offset (positions for this posting start at 0
        // in a dedicated .pop file), skip_offset (ditto for .skp).
        VByte::encode_u64(&mut dfp_buf, 0);
        VByte::encode_u64(&mut dfp_buf, 0);

        let skip = builder.finish();
        let skip_buf = skiplist::encode(&skip);

        for (file, bytes) in [("t.dfp", &dfp_buf), ("t.pop", &pop_buf), ("t.skp", &skip_buf)] {
            let mut out = dir.open_output(file).unwrap();
            out.write_all(bytes).unwrap();
            out.sync().unwrap();
        }
    }

    fn open_posting(dir: &MemoryDirectory, doc_freq: u32) -> OnDiskPosting {
        OnDiskPosting::open(
            dir.open_input("t.dfp").unwrap(),
            dir.open_input("t.pop").unwrap(),
            Some(dir.open_input("t.skp").unwrap()),
            0,
            doc_freq,
        )
        .unwrap()
    }

    #[test]
    fn iterates_docs_and_drains_positions_in_order() {
        let dir = MemoryDirectory::new();
        let doc_ids = [2u32, 5, 9];
        let positions = vec![vec![0u32, 3], vec![1u32], vec![0u32, 1, 4]];
        write_posting(&dir, &doc_ids, &positions, 16);
        let mut p = open_posting(&dir, 3);
        assert_eq!(p.collection_term_freq(), 6);

        assert!(p.next().unwrap());
        assert_eq!(p.doc(), DocId(2));
        assert_eq!(p.freq(), 2);
        assert_eq!(p.next_position().unwrap(), Some(0));
        assert_eq!(p.next_position().unwrap(), Some(3));
        assert_eq!(p.next_position().unwrap(), None);

        assert!(p.next().unwrap());
        assert_eq!(p.doc(), DocId(5));

        assert!(p.next().unwrap());
        assert_eq!(p.doc(), DocId(9));
        assert!(!p.next().unwrap());
    }

    #[test]
    fn next_skips_undrained_positions_of_previous_doc() {
        let dir = MemoryDirectory::new();
        let doc_ids = [1u32, 2];
        let positions = vec![vec![0u32, 5, 10], vec![0u32]];
        write_posting(&dir, &doc_ids, &positions, 16);
        let mut p = open_posting(&dir, 2);

        assert!(p.next().unwrap());
        assert_eq!(p.next_position().unwrap(), Some(0));
        assert!(p.next().unwrap());
        assert_eq!(p.doc(), DocId(2));
        assert_eq!(p.next_position().unwrap(), Some(0));
    }

    #[test]
    fn skip_to_uses_skip_list_to_jump_ahead() {
        let dir = MemoryDirectory::new();
        let doc_ids: Vec<u32> = (0..200).map(|i| i * 2 + 1).collect();
        let positions: Vec<Vec<u32>> = doc_ids.iter().map(|_| vec![0u32]).collect();
        write_posting(&dir, &doc_ids, &positions, 8);
        let mut p = open_posting(&dir, doc_ids.len() as u32);

        assert_eq!(p.skip_to(DocId(151)).unwrap(), Some(DocId(151)));
        assert_eq!(p.skip_to(DocId(399)).unwrap(), Some(DocId(399)));
        assert_eq!(p.skip_to(DocId(100_000)).unwrap(), None);
    }
}
