use std::sync::Arc;

use crate::barrel::dictionary::{TermDictEntry, TermDictionary};
use crate::barrel::field_info::FieldInfo;
use crate::core::error::{Error, Result};
use crate::core::types::{FieldId, TermId};
use crate::directory::{Directory, DirectoryInput};
use crate::posting::on_disk::OnDiskPosting;
use crate::posting::Posting;

/// Opens one sealed barrel's files and hands out per-field `TermReader`s
/// (§4.4). The field-info and the `.voc` file are opened once; each
/// `field_reader` call loads that field's dictionary segment by seeking
/// into the shared `.voc` file at the offset recorded in `.fdi`.
pub struct BarrelReader {
    directory: Arc<dyn Directory>,
    stem: String,
    field_info: FieldInfo,
    voc_input: Box<dyn DirectoryInput>,
}

impl BarrelReader {
    pub fn open(directory: Arc<dyn Directory>, stem: impl Into<String>) -> Result<Self> {
        let stem = stem.into();
        let field_info = FieldInfo::decode(directory.open_input(&format!("{stem}.fdi"))?.as_ref())?;
        let voc_input = directory.open_input(&format!("{stem}.voc"))?;
        Ok(BarrelReader {
            directory,
            stem,
            field_info,
            voc_input,
        })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn field_info(&self) -> &FieldInfo {
        &self.field_info
    }

    /// Walk every field's vocabulary in dictionary order, independent of a
    /// single term lookup — the primitive the merge scheduler's K-way term
    /// merge is built on (§4.7), also a read-only introspection API.
    pub fn field_terms(&self, field: FieldId) -> Result<Vec<TermDictEntry>> {
        Ok(self.field_reader(field)?.terms().collect())
    }

    pub fn field_reader(&self, field: FieldId) -> Result<TermReader> {
        let descriptor = self
            .field_info
            .get(field)
            .ok_or_else(|| Error::not_found(format!("barrel {} has no field {:?}", self.stem, field)))?;
        let dict = TermDictionary::load(self.voc_input.as_ref(), descriptor.voc_offset)?;
        Ok(TermReader {
            dict,
            dfp_input: self.directory.open_input(&format!("{}.dfp", self.stem))?,
            pop_input: self.directory.open_input(&format!("{}.pop", self.stem))?,
            skp_input: self.directory.open_input(&format!("{}.skp", self.stem)).ok(),
        })
    }
}

/// Per-field dictionary plus the shared posting streams it points into
/// (§4.4). `seek` does a binary search over the in-memory dictionary;
/// `term_docs`/`term_positions` construct an `OnDiskPosting` with cloned
/// input cursors so concurrent term lookups never contend on file position.
pub struct TermReader {
    dict: TermDictionary,
    dfp_input: Box<dyn DirectoryInput>,
    pop_input: Box<dyn DirectoryInput>,
    skp_input: Option<Box<dyn DirectoryInput>>,
}

impl TermReader {
    pub fn seek(&self, term: TermId) -> Option<TermDictEntry> {
        self.dict.seek(term)
    }

    pub fn terms(&self) -> impl Iterator<Item = TermDictEntry> + '_ {
        self.dict.iter()
    }

    pub fn term_count(&self) -> usize {
        self.dict.term_count()
    }

    pub fn term_docs(&self, term: TermId) -> Result<Option<Box<dyn Posting>>> {
        self.open_posting(term)
    }

    pub fn term_positions(&self, term: TermId) -> Result<Option<Box<dyn Posting>>> {
        self.open_posting(term)
    }

    fn open_posting(&self, term: TermId) -> Result<Option<Box<dyn Posting>>> {
        let Some(entry) = self.dict.seek(term) else {
            return Ok(None);
        };
        let posting = OnDiskPosting::open(
            self.dfp_input.clone_input(),
            self.pop_input.clone_input(),
            self.skp_input.as_ref().map(|s| s.clone_input()),
            entry.dfp_offset,
            entry.doc_freq,
        )?;
        Ok(Some(Box::new(posting)))
    }
}
