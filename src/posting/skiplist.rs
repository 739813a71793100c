use crate::codec::vbyte::{VByte, VByteReader};
use crate::core::error::{Error, Result};
use crate::core::types::DocId;

/// One skip point: the doc id reached, and the byte offsets in `.dfp`/`.pop`
/// where the *next* posting entry begins (§4.3, §6 `B.skp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    pub doc_id: DocId,
    pub dfp_offset: u64,
    pub pop_offset: u64,
    /// Number of documents already consumed as of this entry, so a reader
    /// jumping here can resume `next()`'s doc-count bookkeping without
    /// re-walking every entry from the start of the posting.
    pub ordinal: u32,
}

/// A multi-level skip list over one posting. `levels[0]` is the finest
/// granularity (one entry every `skip_interval` docs); each higher level
/// samples the one below it by the same factor, bounded by `max_level`
/// (§4.3). `fanout` is that sampling factor (the configured `skip_interval`
/// the list was built with) and must be carried alongside the levels
/// themselves, since it can vary per `Config` and `find_before` needs it to
/// size its bounded scan window correctly.
#[derive(Debug, Clone)]
pub struct SkipList {
    pub levels: Vec<Vec<SkipEntry>>,
    pub fanout: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        SkipList { levels: Vec::new(), fanout: 16 }
    }
}

impl SkipList {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() || self.levels[0].is_empty()
    }

    /// Find the skip entry to jump to in order to reach `target`, i.e. the
    /// last entry at level 0 whose `doc_id < target` (so a caller resuming
    /// linear iteration from there is guaranteed not to overshoot). Descends
    /// from the top level, doing a bounded linear scan at each level (§4.3:
    /// "binary-search-free linear scan within a level").
    pub fn find_before(&self, target: DocId) -> Option<SkipEntry> {
        if self.is_empty() {
            return None;
        }
        let fanout = self.fanout.max(2);
        let mut best: Option<SkipEntry> = None;
        // search_start bounds the scan window at each level to the span
        // covered by one entry of the level above.
        let mut search_start = 0usize;
        let mut search_end = self.levels.last().unwrap().len();

        for level in (0..self.levels.len()).rev() {
            let entries = &self.levels[level];
            let mut chosen_idx: Option<usize> = None;
            let mut i = search_start;
            while i < search_end.min(entries.len()) {
                if entries[i].doc_id < target {
                    chosen_idx = Some(i);
                    i += 1;
                } else {
                    break;
                }
            }
            if let Some(idx) = chosen_idx {
                best = Some(entries[idx]);
                // Next level down: span covered by entries[idx]..entries[idx+1]
                // at this level corresponds to a bounded window at the level below.
                search_start = idx * fanout;
                search_end = search_start + fanout + 1;
            } else {
                search_start = 0;
                search_end = fanout + 1;
            }
        }
        best
    }
}

/// Accumulates skip entries while a posting is being written, then emits
/// the finished multi-level `SkipList` (§4.3).
pub struct SkipListBuilder {
    skip_interval: usize,
    max_level: usize,
    docs_seen: usize,
    level0: Vec<SkipEntry>,
}

impl SkipListBuilder {
    pub fn new(skip_interval: usize, max_level: usize) -> Self {
        SkipListBuilder {
            skip_interval: skip_interval.max(2),
            max_level: max_level.max(1),
            docs_seen: 0,
            level0: Vec::new(),
        }
    }

    /// Called once per document written to the posting, after the doc's
    /// bytes have been appended to `.dfp`/`.pop`, with the offsets of the
    /// *next* entry to write.
    pub fn record(&mut self, doc_id: DocId, next_dfp_offset: u64, next_pop_offset: u64) {
        self.docs_seen += 1;
        if self.docs_seen % self.skip_interval == 0 {
            self.level0.push(SkipEntry {
                doc_id,
                dfp_offset: next_dfp_offset,
                pop_offset: next_pop_offset,
                ordinal: self.docs_seen as u32,
            });
        }
    }

    pub fn finish(self) -> SkipList {
        if self.level0.is_empty() {
            return SkipList { levels: Vec::new(), fanout: self.skip_interval };
        }
        let mut levels = vec![self.level0];
        while levels.len() < self.max_level {
            let below = levels.last().unwrap();
            let mut next = Vec::new();
            let mut i = self.skip_interval - 1;
            while i < below.len() {
                next.push(below[i]);
                i += self.skip_interval;
            }
            if next.is_empty() {
                break;
            }
            levels.push(next);
        }
        SkipList { levels, fanout: self.skip_interval }
    }
}

pub fn encode(skip: &SkipList) -> Vec<u8> {
    let mut out = Vec::new();
    let level_count = skip.levels.len() as u8;
    out.push(level_count);
    VByte::encode_u32(&mut out, skip.fanout as u32);
    for level in &skip.levels {
        VByte::encode_u32(&mut out, level.len() as u32);
    }
    for level in &skip.levels {
        let mut prev_doc = 0u32;
        let mut prev_dfp = 0u64;
        let mut prev_pop = 0u64;
        let mut prev_ord = 0u32;
        for entry in level {
            VByte::encode_u32(&mut out, entry.doc_id.0 - prev_doc);
            VByte::encode_u64(&mut out, entry.dfp_offset - prev_dfp);
            VByte::encode_u64(&mut out, entry.pop_offset - prev_pop);
            VByte::encode_u32(&mut out, entry.ordinal - prev_ord);
            prev_doc = entry.doc_id.0;
            prev_dfp = entry.dfp_offset;
            prev_pop = entry.pop_offset;
            prev_ord = entry.ordinal;
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<SkipList> {
    if bytes.is_empty() {
        return Ok(SkipList::default());
    }
    let level_count = bytes[0] as usize;
    let mut reader = VByteReader::at(bytes, 1);
    let fanout = reader.read_u32()? as usize;
    let mut sizes = Vec::with_capacity(level_count);
    for _ in 0..level_count {
        sizes.push(reader.read_u32()? as usize);
    }
    let mut levels = Vec::with_capacity(level_count);
    for size in sizes {
        let mut level = Vec::with_capacity(size);
        let mut prev_doc = 0u32;
        let mut prev_dfp = 0u64;
        let mut prev_pop = 0u64;
        let mut prev_ord = 0u32;
        for _ in 0..size {
            let doc_gap = reader.read_u32()?;
            let dfp_gap = reader.read_u64()?;
            let pop_gap = reader.read_u64()?;
            let ord_gap = reader.read_u32()?;
            prev_doc = prev_doc
                .checked_add(doc_gap)
                .ok_or_else(|| Error::corruption("skip list doc id overflow"))?;
            prev_dfp += dfp_gap;
            prev_pop += pop_gap;
            prev_ord += ord_gap;
            level.push(SkipEntry {
                doc_id: DocId(prev_doc),
                dfp_offset: prev_dfp,
                pop_offset: prev_pop,
                ordinal: prev_ord,
            });
        }
        levels.push(level);
    }
    Ok(SkipList { levels, fanout })
}

/// Number of bytes `decode` would need starting at `bytes[0]`; lets the
/// on-disk posting reader fetch exactly the span of `.skp` one posting owns
/// without needing an explicit length field.
pub fn encoded_len(bytes: &[u8]) -> Result<usize> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let level_count = bytes[0] as usize;
    let mut reader = VByteReader::at(bytes, 1);
    reader.read_u32()?; // fanout
    let mut sizes = Vec::with_capacity(level_count);
    for _ in 0..level_count {
        sizes.push(reader.read_u32()? as usize);
    }
    for size in sizes {
        for _ in 0..size {
            reader.read_u32()?;
            reader.read_u64()?;
            reader.read_u64()?;
            reader.read_u32()?;
        }
    }
    Ok(reader.position())
}

/// One fixed-size block's worth of skip metadata: the last doc id the block
/// covers, and the byte offsets where its doc-stream and position-stream
/// blocks begin (§4.3 "a separate fixed-block skip list variant exists for
/// block-coded postings"). Unlike `SkipEntry`, there is no per-level fanout —
/// every block is recorded, since a block-coded posting must always land on
/// a block boundary to decompress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBlockSkipEntry {
    pub last_doc_id: DocId,
    pub doc_block_offset: u64,
    pub pos_block_offset: u64,
}

/// The skip structure for the block-coded posting encoding (§4.3, `IndexMode`
/// `DefaultBlock`/`DefaultChunk`): one entry per fixed-size block of
/// `block_size` documents, rather than `SkipEntry`'s multi-level sampling
/// over a byte-aligned vbyte stream.
#[derive(Debug, Clone, Default)]
pub struct FixedBlockSkipList {
    pub block_size: u32,
    pub blocks: Vec<FixedBlockSkipEntry>,
}

impl FixedBlockSkipList {
    /// The index of the block whose `last_doc_id >= target`, i.e. the block
    /// that must contain `target` if it is present at all. `None` once
    /// `target` exceeds every block's last doc id.
    pub fn block_for(&self, target: DocId) -> Option<usize> {
        let idx = self.blocks.partition_point(|b| b.last_doc_id < target);
        if idx < self.blocks.len() {
            Some(idx)
        } else {
            None
        }
    }
}

pub struct FixedBlockSkipListBuilder {
    block_size: u32,
    blocks: Vec<FixedBlockSkipEntry>,
}

impl FixedBlockSkipListBuilder {
    pub fn new(block_size: u32) -> Self {
        FixedBlockSkipListBuilder { block_size: block_size.max(1), blocks: Vec::new() }
    }

    /// Called once a block of `block_size` documents (or the final, possibly
    /// short, block) has been written, with its last doc id and the byte
    /// offsets where the *next* block begins.
    pub fn record_block(&mut self, last_doc_id: DocId, next_doc_block_offset: u64, next_pos_block_offset: u64) {
        self.blocks.push(FixedBlockSkipEntry {
            last_doc_id,
            doc_block_offset: next_doc_block_offset,
            pos_block_offset: next_pos_block_offset,
        });
    }

    pub fn finish(self) -> FixedBlockSkipList {
        FixedBlockSkipList { block_size: self.block_size, blocks: self.blocks }
    }
}

pub fn encode_fixed_block(skip: &FixedBlockSkipList) -> Vec<u8> {
    let mut out = Vec::new();
    VByte::encode_u32(&mut out, skip.block_size);
    VByte::encode_u32(&mut out, skip.blocks.len() as u32);
    let (mut prev_doc, mut prev_doc_off, mut prev_pos_off) = (0u32, 0u64, 0u64);
    for entry in &skip.blocks {
        VByte::encode_u32(&mut out, entry.last_doc_id.0 - prev_doc);
        VByte::encode_u64(&mut out, entry.doc_block_offset - prev_doc_off);
        VByte::encode_u64(&mut out, entry.pos_block_offset - prev_pos_off);
        prev_doc = entry.last_doc_id.0;
        prev_doc_off = entry.doc_block_offset;
        prev_pos_off = entry.pos_block_offset;
    }
    out
}

pub fn decode_fixed_block(bytes: &[u8]) -> Result<FixedBlockSkipList> {
    if bytes.is_empty() {
        return Ok(FixedBlockSkipList::default());
    }
    let mut reader = VByteReader::new(bytes);
    let block_size = reader.read_u32()?;
    let count = reader.read_u32()? as usize;
    let mut blocks = Vec::with_capacity(count);
    let (mut prev_doc, mut prev_doc_off, mut prev_pos_off) = (0u32, 0u64, 0u64);
    for _ in 0..count {
        let doc_gap = reader.read_u32()?;
        let doc_off_gap = reader.read_u64()?;
        let pos_off_gap = reader.read_u64()?;
        prev_doc = prev_doc
            .checked_add(doc_gap)
            .ok_or_else(|| Error::corruption("fixed-block skip list doc id overflow"))?;
        prev_doc_off += doc_off_gap;
        prev_pos_off += pos_off_gap;
        blocks.push(FixedBlockSkipEntry {
            last_doc_id: DocId(prev_doc),
            doc_block_offset: prev_doc_off,
            pos_block_offset: prev_pos_off,
        });
    }
    Ok(FixedBlockSkipList { block_size, blocks })
}
