use serde::{Deserialize, Serialize};

/// A document id. 32-bit, strictly monotone across the lifetime of an index;
/// never reused after a document is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

impl DocId {
    pub const MIN: DocId = DocId(0);
    pub const MAX: DocId = DocId(u32::MAX);

    pub fn new(id: u32) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DocId {
    fn from(id: u32) -> Self {
        DocId(id)
    }
}

/// A term id, assigned externally by an id manager. Ordering within a
/// property is the dictionary ordering used on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TermId(pub u32);

impl From<u32> for TermId {
    fn from(id: u32) -> Self {
        TermId(id)
    }
}

/// A field (property) id, stable per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u16);

impl From<u16> for FieldId {
    fn from(id: u16) -> Self {
        FieldId(id)
    }
}

/// A collection id. A single on-disk layout may host multiple collections,
/// each with its own base doc id per barrel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub u16);

impl From<u16> for CollectionId {
    fn from(id: u16) -> Self {
        CollectionId(id)
    }
}

/// A single token occurrence fed to the writer: the term id assigned by the
/// external id manager, and its position within the field's token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermOccurrence {
    pub term: TermId,
    pub position: u32,
}

/// One field's token stream for a document, as handed to the writer by the
/// external tokenizer/id-manager boundary (§1: tokenization is out of scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldTokens {
    pub occurrences: Vec<TermOccurrence>,
}

impl FieldTokens {
    pub fn new() -> Self {
        FieldTokens::default()
    }

    pub fn push(&mut self, term: TermId, position: u32) {
        self.occurrences.push(TermOccurrence { term, position });
    }
}

/// A document ready for indexing: a bag of (field, token-stream) pairs keyed
/// by the monotone doc id assigned by the caller.
#[derive(Debug, Clone, Default)]
pub struct IndexedDocument {
    pub doc_id: DocId,
    pub collection: CollectionId,
    pub fields: Vec<(FieldId, FieldTokens)>,
}

impl IndexedDocument {
    pub fn new(doc_id: DocId, collection: CollectionId) -> Self {
        IndexedDocument {
            doc_id,
            collection,
            fields: Vec::new(),
        }
    }

    pub fn add_field(&mut self, field: FieldId, tokens: FieldTokens) {
        self.fields.push((field, tokens));
    }
}

/// Typed scalar/string key used by the BTree secondary index (§3, §4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedKey {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Eq for TypedKey {}

impl PartialOrd for TypedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use TypedKey::*;
        match (self, other) {
            (I32(a), I32(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (U32(a), U32(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.total_cmp(b),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            // Keys are only ever compared within one (collection, field)
            // index, so mismatched variants only arise from caller error;
            // order them by discriminant so BTreeMap still has a total order.
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }
}

impl TypedKey {
    fn discriminant(&self) -> u8 {
        match self {
            TypedKey::I32(_) => 0,
            TypedKey::I64(_) => 1,
            TypedKey::U32(_) => 2,
            TypedKey::U64(_) => 3,
            TypedKey::F32(_) => 4,
            TypedKey::F64(_) => 5,
            TypedKey::Str(_) => 6,
        }
    }
}
