//! Cross-reference stream support for PDF 1.5+
//!
//! Decodes the binary entries of a cross-reference stream according to
//! ISO 32000-1:2008 Section 7.5.8 and folds them into [`XRefEntries`]
//! with the same first-seen-wins rule as classic sections.

use super::xref::{check_table_end, XRefEntries, XRefEntry};
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use tracing::warn;

/// Field layout of a cross-reference stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefStreamLayout {
    /// Byte widths of the three fields (`/W`)
    pub widths: [usize; 3],
    /// `(first object number, count)` pairs (`/Index`, default `[0 Size]`)
    pub index: Vec<(u32, u32)>,
}

impl XRefStreamLayout {
    pub fn from_dict(dict: &Dictionary, offset: u64) -> Result<Self> {
        let w = dict
            .get_array("W")
            .ok_or_else(|| PdfError::xref(offset, "missing W array in xref stream"))?;
        if w.len() != 3 {
            return Err(PdfError::xref(
                offset,
                format!("W array must have 3 elements, found {}", w.len()),
            ));
        }
        let mut widths = [0usize; 3];
        for (slot, obj) in widths.iter_mut().zip(w) {
            let width = obj
                .as_integer()
                .filter(|n| (0..=8).contains(n))
                .ok_or_else(|| PdfError::xref(offset, "invalid width in W array"))?;
            *slot = width as usize;
        }

        let index = match dict.get_array("Index") {
            Some(items) => {
                if items.len() % 2 != 0 {
                    return Err(PdfError::xref(offset, "odd number of elements in Index"));
                }
                items
                    .chunks(2)
                    .map(|pair| {
                        let first = pair[0].as_integer().and_then(|n| u32::try_from(n).ok());
                        let count = pair[1].as_integer().and_then(|n| u32::try_from(n).ok());
                        match (first, count) {
                            (Some(first), Some(count)) => Ok((first, count)),
                            _ => Err(PdfError::xref(offset, "invalid Index entry")),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            None => {
                let size = dict
                    .get_integer("Size")
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| PdfError::xref(offset, "missing Size in xref stream"))?;
                vec![(0, size)]
            }
        };

        Ok(Self { widths, index })
    }

    pub fn entry_size(&self) -> usize {
        self.widths.iter().sum()
    }
}

/// Read a field from bytes (big-endian)
fn read_field(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |value, &byte| (value << 8) | byte as u64)
}

/// Object numbers and stream indices must fit in 32 bits
fn object_field(value: u64, number: u32, offset: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        PdfError::xref(offset, format!("entry for object {number} holds {value}, out of range"))
    })
}

/// Fold decoded xref stream `data` into `entries`. In-use offsets are
/// shifted by `magic_offset`. Returns how many slots were written (slots
/// already parsed by a newer section are skipped).
pub fn read_xref_stream_entries(
    layout: &XRefStreamLayout,
    data: &[u8],
    entries: &mut XRefEntries,
    offset: u64,
    magic_offset: u64,
) -> Result<usize> {
    let entry_size = layout.entry_size();
    if entry_size == 0 {
        return Err(PdfError::xref(offset, "Invalid entry size (0) in xref stream"));
    }

    for &(first, count) in &layout.index {
        let end = first.checked_add(count).ok_or_else(|| {
            PdfError::ValueOutOfRange(format!("xref stream index {first} + {count} overflows"))
        })?;
        check_table_end(u64::from(end))?;
    }

    let total: u64 = layout.index.iter().map(|&(_, count)| count as u64).sum();
    if total.saturating_mul(entry_size as u64) > data.len() as u64 {
        return Err(PdfError::xref(offset, "Xref stream data truncated"));
    }

    let [w0, w1, w2] = layout.widths;
    let mut written = 0;
    let mut pos = 0;
    for &(first, count) in &layout.index {
        let end = first + count;
        entries.enlarge(end as usize);

        for number in first..end {
            let record = &data[pos..pos + entry_size];
            pos += entry_size;

            // a zero-width type field defaults to type 1
            let entry_type = if w0 == 0 { 1 } else { read_field(&record[..w0]) };
            let field2 = read_field(&record[w0..w0 + w1]);
            let field3 = read_field(&record[w0 + w1..w0 + w1 + w2]);

            let entry = match entry_type {
                0 => XRefEntry::free(
                    object_field(field2, number, offset)?,
                    field3.min(u16::MAX as u64) as u16,
                ),
                1 => {
                    let position = match field2 {
                        0 => 0,
                        _ => field2.checked_add(magic_offset).ok_or_else(|| {
                            PdfError::xref(offset, format!("offset of object {number} overflows"))
                        })?,
                    };
                    XRefEntry::in_use(position, field3.min(u16::MAX as u64) as u16)
                }
                2 => XRefEntry::compressed(
                    object_field(field2, number, offset)?,
                    object_field(field3, number, offset)?,
                ),
                other => {
                    warn!(object = number, entry_type = other, "Ignoring xref stream entry of unknown type");
                    continue;
                }
            };
            if entries.set_if_unparsed(number as usize, entry) {
                written += 1;
            }
        }
    }

    Ok(written)
}
