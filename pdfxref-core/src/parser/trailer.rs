//! PDF Trailer
//!
//! Trailer accessors and the merge step that folds the trailers of a
//! revision chain into one (ISO 32000-1 Section 7.5.5 and 7.5.6).

use crate::objects::{Dictionary, Object, ObjectId, PdfString};

/// Keys an older revision may contribute when the newer trailer lacks them
pub const MERGED_KEYS: [&str; 5] = ["Size", "Root", "Encrypt", "Info", "ID"];

/// PDF Trailer information
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfTrailer {
    dict: Dictionary,
}

impl PdfTrailer {
    pub fn new(dict: Dictionary) -> Self {
        Self { dict }
    }

    /// Fold an older revision's trailer into this one. Keys already
    /// present here win; only the [`MERGED_KEYS`] are taken from `older`.
    pub fn merge(self, older: &Dictionary) -> Self {
        let mut dict = self.dict;
        for key in MERGED_KEYS {
            if dict.contains_key(key) {
                continue;
            }
            if let Some(value) = older.get(key) {
                dict.set(key, value.clone());
            }
        }
        Self { dict }
    }

    /// Get access to the trailer dictionary
    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn into_dict(self) -> Dictionary {
        self.dict
    }

    /// Declared number of xref entries
    pub fn size(&self) -> Option<i64> {
        self.dict.get_integer("Size")
    }

    /// Document catalog reference
    pub fn root(&self) -> Option<ObjectId> {
        self.dict.get_reference("Root")
    }

    pub fn info(&self) -> Option<ObjectId> {
        self.dict.get_reference("Info")
    }

    /// Raw `/Encrypt` value: a reference or a direct dictionary
    pub fn encrypt(&self) -> Option<&Object> {
        self.dict.get("Encrypt").filter(|obj| !obj.is_null())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt().is_some()
    }

    /// First element of `/ID`, the permanent document identifier
    pub fn document_id(&self) -> Option<&PdfString> {
        self.dict.get_array("ID")?.first()?.as_string()
    }

    /// Offset of the previous revision's xref, if positive
    pub fn prev(&self) -> Option<u64> {
        self.dict
            .get_integer("Prev")
            .filter(|&n| n > 0)
            .map(|n| n as u64)
    }

    /// Offset of the hybrid-file xref stream
    pub fn xref_stm(&self) -> Option<u64> {
        self.dict
            .get_integer("XRefStm")
            .filter(|&n| n >= 0)
            .map(|n| n as u64)
    }
}

/// How a revision's cross-reference data was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// Classic `xref` table
    Table,
    /// Cross-reference stream
    Stream,
    /// Stream referenced by a classic trailer's `/XRefStm`
    HybridStream,
}

/// One cross-reference section read while walking the revision chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionInfo {
    pub offset: u64,
    pub kind: RevisionKind,
}
