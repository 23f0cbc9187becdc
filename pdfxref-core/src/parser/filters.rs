//! PDF Stream Filters
//!
//! Handles decoding of PDF streams according to ISO 32000-1 Section 7.4.
//! Only the filters that cross-reference streams and object streams rely
//! on are implemented; image codecs are out of reach here.

use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object};

#[cfg(feature = "compression")]
use flate2::read::ZlibDecoder;
#[cfg(feature = "compression")]
use std::io::Read;

/// Supported PDF filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// ASCII hex decode
    ASCIIHexDecode,

    /// ASCII 85 decode
    ASCII85Decode,

    /// Flate decode (zlib/deflate compression)
    FlateDecode,
}

impl Filter {
    /// Parse filter from name, accepting the standard abbreviations
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(Filter::ASCIIHexDecode),
            "ASCII85Decode" | "A85" => Some(Filter::ASCII85Decode),
            "FlateDecode" | "Fl" => Some(Filter::FlateDecode),
            _ => None,
        }
    }
}

/// Decode stream data according to the `/Filter` and `/DecodeParms` of `dict`
pub fn decode_stream(data: &[u8], dict: &Dictionary) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None | Some(Object::Null) => return Ok(data.to_vec()),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items
            .iter()
            .map(|obj| {
                obj.as_name().ok_or_else(|| {
                    PdfError::StreamDecodeError("Invalid filter in array".to_string())
                })
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(PdfError::StreamDecodeError(format!(
                "Invalid Filter type: {}",
                other.type_name()
            )))
        }
    };

    let mut result = data.to_vec();
    for (i, filter_name) in filters.iter().enumerate() {
        let filter = Filter::from_name(filter_name).ok_or_else(|| {
            PdfError::StreamDecodeError(format!("Unsupported filter: {filter_name}"))
        })?;
        result = apply_filter(&result, filter)?;

        if let Some(params) = decode_params(dict, i) {
            result = apply_predictor(result, params)?;
        }
    }

    Ok(result)
}

fn decode_params(dict: &Dictionary, index: usize) -> Option<&Dictionary> {
    match dict.get("DecodeParms").or_else(|| dict.get("DP"))? {
        Object::Dictionary(params) => Some(params),
        Object::Array(items) => items.get(index).and_then(Object::as_dict),
        _ => None,
    }
}

/// Apply a single filter to data
pub fn apply_filter(data: &[u8], filter: Filter) -> Result<Vec<u8>> {
    match filter {
        Filter::FlateDecode => decode_flate(data),
        Filter::ASCIIHexDecode => decode_ascii_hex(data),
        Filter::ASCII85Decode => decode_ascii85(data),
    }
}

/// Decode FlateDecode (zlib/deflate) compressed data
#[cfg(feature = "compression")]
fn decode_flate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| PdfError::StreamDecodeError(format!("Flate decode error: {e}")))?;
    Ok(result)
}

#[cfg(not(feature = "compression"))]
fn decode_flate(_data: &[u8]) -> Result<Vec<u8>> {
    Err(PdfError::StreamDecodeError(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

/// Zlib-compress `data` for a FlateDecode stream
#[cfg(feature = "compression")]
pub fn encode_flate(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Undo a `/Predictor` applied before compression.
///
/// Predictor 1 means none; 10-15 are the PNG predictors, where every row
/// starts with its own filter-type byte.
fn apply_predictor(data: Vec<u8>, params: &Dictionary) -> Result<Vec<u8>> {
    let predictor = params.get_integer("Predictor").unwrap_or(1);
    if predictor == 1 {
        return Ok(data);
    }
    if !(10..=15).contains(&predictor) {
        return Err(PdfError::StreamDecodeError(format!(
            "Unsupported predictor {predictor}"
        )));
    }

    let colors = params.get_integer("Colors").unwrap_or(1).clamp(1, 32) as usize;
    let bits = params.get_integer("BitsPerComponent").unwrap_or(8).clamp(1, 16) as usize;
    let columns = params.get_integer("Columns").unwrap_or(1).clamp(1, 1 << 20) as usize;

    let bpp = (colors * bits).div_ceil(8).max(1);
    let row_len = (colors * bits * columns).div_ceil(8);
    let stride = row_len + 1;

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(stride) {
        if chunk.len() < 2 {
            break;
        }
        let filter_type = chunk[0];
        let mut row = chunk[1..].to_vec();
        row.resize(row_len, 0);

        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match filter_type {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(PdfError::StreamDecodeError(format!(
                        "Invalid PNG filter type {other}"
                    )))
                }
            };
        }

        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Decode ASCIIHexDecode data
fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::new();
    let mut pending: Option<u8> = None;

    for &ch in data.iter().filter(|b| !b.is_ascii_whitespace()) {
        if ch == b'>' {
            break;
        }
        let value = hex_digit_value(ch).ok_or_else(|| {
            PdfError::StreamDecodeError(format!("Invalid hex digit: {}", ch as char))
        })?;
        match pending.take() {
            Some(high) => result.push((high << 4) | value),
            None => pending = Some(value),
        }
    }

    // Odd number of digits, pad with 0
    if let Some(high) = pending {
        result.push(high << 4);
    }
    Ok(result)
}

/// Get value of hex digit
fn hex_digit_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

/// Decode ASCII85Decode data
fn decode_ascii85(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::new();
    let mut group: Vec<u8> = Vec::with_capacity(5);
    let mut input = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).peekable();

    // Skip optional <~ prefix
    if input.peek() == Some(&b'<') {
        input.next();
        if input.next() != Some(b'~') {
            return Err(PdfError::StreamDecodeError(
                "Invalid ASCII85 start marker".to_string(),
            ));
        }
    }

    while let Some(c) = input.next() {
        match c {
            b'~' => {
                if input.next() == Some(b'>') {
                    break;
                }
                return Err(PdfError::StreamDecodeError(
                    "Invalid ASCII85 end marker".to_string(),
                ));
            }
            b'z' if group.is_empty() => result.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group.push(c);
                if group.len() == 5 {
                    result.extend_from_slice(&ascii85_group(&group).to_be_bytes());
                    group.clear();
                }
            }
            _ => {
                return Err(PdfError::StreamDecodeError(format!(
                    "Invalid ASCII85 character: {}",
                    c as char
                )))
            }
        }
    }

    // Incomplete final group: pad with 'u', keep len-1 bytes
    if !group.is_empty() {
        let keep = group.len() - 1;
        group.resize(5, b'u');
        result.extend_from_slice(&ascii85_group(&group).to_be_bytes()[..keep]);
    }

    Ok(result)
}

fn ascii85_group(group: &[u8]) -> u32 {
    group
        .iter()
        .fold(0u32, |acc, &ch| acc.wrapping_mul(85).wrapping_add((ch - b'!') as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_hex_decode() {
        assert_eq!(decode_ascii_hex(b"48656C6C6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"48 65 6C 6C 6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"48656C6C6>").unwrap(), b"Hell`");
        assert_eq!(decode_ascii_hex(b"48656C6C6F").unwrap(), b"Hello");
        assert!(decode_ascii_hex(b"GG>").is_err());
    }

    #[test]
    fn test_ascii85_decode() {
        assert_eq!(decode_ascii85(b"87cURD]j7BEbo80~>").unwrap(), b"Hello world!");
        assert_eq!(decode_ascii85(b"<~87cURD]j7BEbo80~>").unwrap(), b"Hello world!");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), &[0, 0, 0, 0]);
        assert!(decode_ascii85(b"~>").unwrap().is_empty());
        assert!(decode_ascii85(b"invalid~>").is_err());
    }

    #[test]
    fn test_filter_from_name() {
        assert_eq!(Filter::from_name("FlateDecode"), Some(Filter::FlateDecode));
        assert_eq!(Filter::from_name("AHx"), Some(Filter::ASCIIHexDecode));
        assert_eq!(Filter::from_name("DCTDecode"), None);
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let data = b"Hello, world!";
        assert_eq!(decode_stream(data, &Dictionary::new()).unwrap(), data);
    }

    #[test]
    fn test_decode_stream_filter_array() {
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            Object::Array(vec![Object::name("ASCIIHexDecode")]),
        );
        assert_eq!(decode_stream(b"48656C6C6F>", &dict).unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_stream_rejects_unknown_filter() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("JBIG2Decode"));
        assert!(matches!(
            decode_stream(b"x", &dict),
            Err(PdfError::StreamDecodeError(_))
        ));

        let mut dict = Dictionary::new();
        dict.set("Filter", 42);
        assert!(decode_stream(b"x", &dict).is_err());
    }

    #[test]
    fn test_png_up_predictor() {
        // two rows of 3 columns, filter type 2 (Up)
        let encoded = vec![2, 1, 2, 3, 2, 1, 1, 1];
        let mut params = Dictionary::new();
        params.set("Predictor", 12);
        params.set("Columns", 3);

        let decoded = apply_predictor(encoded, &params).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_predictors() {
        let mut params = Dictionary::new();
        params.set("Predictor", 15);
        params.set("Columns", 2);

        // Sub on the first row, Paeth picks the byte above on the second
        let decoded = apply_predictor(vec![1, 5, 1, 4, 0, 0], &params).unwrap();
        assert_eq!(decoded, vec![5, 6, 5, 6]);

        assert!(apply_predictor(vec![9, 0, 0], &params).is_err());
    }

    #[test]
    fn test_unsupported_predictor() {
        let mut params = Dictionary::new();
        params.set("Predictor", 2);
        assert!(apply_predictor(vec![1, 2], &params).is_err());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_flate_round_trip_with_predictor() {
        let rows: Vec<u8> = vec![0, 1, 0, 10, 0, 2, 0, 20];
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("FlateDecode"));
        let mut params = Dictionary::new();
        params.set("Predictor", 10);
        params.set("Columns", 3);
        dict.set("DecodeParms", params);

        let compressed = encode_flate(&rows).unwrap();
        let decoded = decode_stream(&compressed, &dict).unwrap();
        assert_eq!(decoded, vec![1, 0, 10, 2, 0, 20]);
    }
}
