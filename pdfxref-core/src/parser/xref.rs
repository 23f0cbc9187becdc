//! PDF Cross-Reference Table
//!
//! The table the parser folds every xref section and xref stream into,
//! indexed by object number. Pure bookkeeping: reading sections from a
//! device happens in the reader. Classic entries follow ISO 32000-1
//! Section 7.5.4.

use crate::error::{PdfError, Result};
use crate::store::DEFAULT_MAX_OBJECT_COUNT;
use std::ops::{Index, IndexMut};

/// Size of one classic xref entry: `nnnnnnnnnn ggggg n` plus a 2-byte EOL
pub const XREF_ENTRY_SIZE: usize = 20;

/// Reject a section that would grow the table past the object-number limit
pub fn check_table_end(end: u64) -> Result<()> {
    if end > u64::from(DEFAULT_MAX_OBJECT_COUNT) + 1 {
        return Err(PdfError::ValueOutOfRange(format!(
            "xref section reaches object number {end}, the limit is {DEFAULT_MAX_OBJECT_COUNT}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XRefEntryType {
    #[default]
    Free,
    InUse,
    Compressed,
}

impl XRefEntryType {
    /// Classic table type byte (`n` or `f`)
    pub fn from_char(ch: u8) -> Option<Self> {
        match ch {
            b'n' => Some(XRefEntryType::InUse),
            b'f' => Some(XRefEntryType::Free),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            XRefEntryType::Free => 'f',
            XRefEntryType::InUse => 'n',
            XRefEntryType::Compressed => 'c',
        }
    }
}

/// One slot of the cross-reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XRefEntry {
    pub entry_type: XRefEntryType,
    /// Byte offset of the object (InUse only)
    pub offset: u64,
    /// Next free object (Free) or container object number (Compressed)
    pub object_number: u32,
    /// Generation to expect (InUse) or to reuse with (Free)
    pub generation: u16,
    /// Position inside the container (Compressed only)
    pub index: u32,
    /// Set once a section has written this slot; older revisions must
    /// not overwrite it.
    pub parsed: bool,
}

impl XRefEntry {
    pub fn in_use(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::InUse,
            offset,
            generation,
            parsed: true,
            ..Default::default()
        }
    }

    pub fn free(next_free: u32, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            object_number: next_free,
            generation,
            parsed: true,
            ..Default::default()
        }
    }

    pub fn compressed(container: u32, index: u32) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            object_number: container,
            index,
            parsed: true,
            ..Default::default()
        }
    }
}

/// Resizable table of [`XRefEntry`] indexed by object number
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XRefEntries {
    entries: Vec<XRefEntry>,
}

impl XRefEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow to at least `size` slots; new slots are unparsed
    pub fn enlarge(&mut self, size: usize) {
        if size > self.entries.len() {
            self.entries.resize(size, XRefEntry::default());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, number: usize) -> Option<&XRefEntry> {
        self.entries.get(number)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &XRefEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i as u32, entry))
    }

    /// Write `entry` into slot `number` unless a newer section already did.
    /// Returns whether the slot was written.
    pub fn set_if_unparsed(&mut self, number: usize, entry: XRefEntry) -> bool {
        self.enlarge(number + 1);
        let slot = &mut self.entries[number];
        if slot.parsed {
            return false;
        }
        *slot = XRefEntry {
            parsed: true,
            ..entry
        };
        true
    }
}

impl Index<usize> for XRefEntries {
    type Output = XRefEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for XRefEntries {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Valid two-byte terminators of a classic entry: CR LF, LF CR, or a
/// space followed by CR or LF.
pub fn check_eol(e1: u8, e2: u8) -> bool {
    matches!((e1, e2), (b'\r', b'\n') | (b'\n', b'\r') | (b' ', b'\r') | (b' ', b'\n'))
}

/// Parse one fixed-width classic entry.
///
/// Returns the type, the first field (offset or next free object) and the
/// generation. `offset` is only used for error context.
pub fn parse_classic_entry(raw: &[u8], offset: u64) -> Result<(XRefEntryType, u64, u32)> {
    if raw.len() < XREF_ENTRY_SIZE {
        return Err(PdfError::xref(offset, "truncated xref entry"));
    }

    let mut pos = 0;
    let skip_spaces = |pos: &mut usize| {
        while *pos < raw.len() && raw[*pos] == b' ' {
            *pos += 1;
        }
    };
    let read_digits = |pos: &mut usize, max: usize| -> Option<u64> {
        let start = *pos;
        while *pos < raw.len() && *pos - start < max && raw[*pos].is_ascii_digit() {
            *pos += 1;
        }
        if *pos == start {
            return None;
        }
        std::str::from_utf8(&raw[start..*pos]).ok()?.parse().ok()
    };

    skip_spaces(&mut pos);
    let first = read_digits(&mut pos, 10)
        .ok_or_else(|| PdfError::xref(offset, "invalid offset field in xref entry"))?;
    skip_spaces(&mut pos);
    let generation = read_digits(&mut pos, 5)
        .ok_or_else(|| PdfError::xref(offset, "invalid generation field in xref entry"))?;
    skip_spaces(&mut pos);

    let type_byte = *raw
        .get(pos)
        .ok_or_else(|| PdfError::xref(offset, "missing xref entry type"))?;
    let entry_type = XRefEntryType::from_char(type_byte).ok_or_else(|| {
        PdfError::xref(offset, "Invalid used keyword, must be either 'n' or 'f'")
    })?;

    match (raw.get(pos + 1), raw.get(pos + 2)) {
        (Some(&e1), Some(&e2)) if check_eol(e1, e2) => {}
        _ => return Err(PdfError::xref(offset, "invalid end of line in xref entry")),
    }

    Ok((entry_type, first, generation as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enlarge_and_index() {
        let mut table = XRefEntries::new();
        assert!(table.is_empty());
        table.enlarge(4);
        assert_eq!(table.len(), 4);
        assert!(!table[3].parsed);

        table.enlarge(2);
        assert_eq!(table.len(), 4);

        table[1] = XRefEntry::in_use(100, 0);
        assert_eq!(table.get(1).map(|e| e.offset), Some(100));
        assert!(table.get(10).is_none());
    }

    #[test]
    fn test_first_seen_wins() {
        let mut table = XRefEntries::new();
        assert!(table.set_if_unparsed(5, XRefEntry::in_use(10, 0)));
        assert!(!table.set_if_unparsed(5, XRefEntry::in_use(999, 0)));
        assert_eq!(table[5].offset, 10);
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_table_end_limit() {
        assert!(check_table_end(100).is_ok());
        assert!(check_table_end(u64::from(DEFAULT_MAX_OBJECT_COUNT) + 1).is_ok());
        assert!(matches!(
            check_table_end(u64::from(u32::MAX)),
            Err(PdfError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_parse_in_use_entry() {
        let (ty, offset, generation) =
            parse_classic_entry(b"0000000010 00000 n\r\n", 0).unwrap();
        assert_eq!(ty, XRefEntryType::InUse);
        assert_eq!(offset, 10);
        assert_eq!(generation, 0);
    }

    #[test]
    fn test_parse_free_entry() {
        let (ty, next, generation) =
            parse_classic_entry(b"0000000000 00001 f\r\n", 0).unwrap();
        assert_eq!(ty, XRefEntryType::Free);
        assert_eq!(next, 0);
        assert_eq!(generation, 1);
    }

    #[test]
    fn test_accepted_eols() {
        for entry in [
            &b"0000000010 00000 n\r\n"[..],
            b"0000000010 00000 n\n\r",
            b"0000000010 00000 n \n",
            b"0000000010 00000 n \r",
        ] {
            assert!(parse_classic_entry(entry, 0).is_ok());
        }
    }

    #[test]
    fn test_rejects_malformed_entries() {
        assert!(matches!(
            parse_classic_entry(b"0000000010 00000 x\r\n", 7),
            Err(PdfError::InvalidXRef { offset: 7, .. })
        ));
        assert!(parse_classic_entry(b"0000000010 00000 n\t\t", 0).is_err());
        assert!(parse_classic_entry(b"abcdefghij 00000 n\r\n", 0).is_err());
        assert!(parse_classic_entry(b"0000000010 00000 n", 0).is_err());
    }
}
