//! PDF serialization: full saves and incremental updates
//!
//! Values are written in a canonical form (dictionary keys sorted, reals
//! without exponent) so the same store always produces the same bytes.
//! Only classic cross-reference tables are written.

use crate::document::Document;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, Object, PdfString, StreamSlot};
use crate::store::MAX_GENERATION;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Trailer keys carried over into written files
const TRAILER_KEYS: [&str; 3] = ["Root", "Info", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XRefSlot {
    InUse { offset: u64, generation: u16 },
    Free { generation: u16 },
}

pub struct PdfWriter<W: Write> {
    writer: W,
    xref: BTreeMap<u32, XRefSlot>,
    current_position: u64,
    /// Subtracted from positions before they are recorded; the length of
    /// any garbage in front of the header of the file being appended to
    base_offset: u64,
}

impl PdfWriter<BufWriter<std::fs::File>> {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new_with_writer(BufWriter::new(file)))
    }
}

impl<W: Write> PdfWriter<W> {
    pub fn new_with_writer(writer: W) -> Self {
        Self {
            writer,
            xref: BTreeMap::new(),
            current_position: 0,
            base_offset: 0,
        }
    }

    /// Continue after `existing` bytes already written to `writer`
    fn appending(writer: W, existing: u64, base_offset: u64) -> Self {
        Self {
            writer,
            xref: BTreeMap::new(),
            current_position: existing,
            base_offset,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write every object of `document` as a new single-revision file.
    /// Object-stream containers, cross-reference streams and the
    /// encryption dictionary are replaced by free entries.
    pub fn write_document<R>(&mut self, document: &Document<R>) -> Result<()> {
        self.write_header(document)?;

        let store = document.objects();
        let encrypt = document.trailer().encrypt().and_then(Object::as_reference);
        let mut skipped = Vec::new();
        for obj in store.iter() {
            let id = obj.id();
            let stale = store.is_compressed_object_stream(id.number())
                || obj.dict().is_some_and(|d| d.is_type("XRef"))
                || encrypt == Some(id);
            if stale {
                skipped.push(id);
                continue;
            }
            self.write_indirect(obj)?;
        }

        for id in store.free_objects() {
            self.record_free(id.number(), id.generation());
        }
        for id in skipped {
            let next = id.generation().saturating_add(1);
            self.record_free(id.number(), next);
        }
        for number in 1..=store.object_count() {
            if store.is_unavailable(number) {
                self.record_free(number, MAX_GENERATION);
            }
        }

        let xref_position = self.current_position;
        self.write_xref(true)?;
        let size = self.xref.keys().next_back().map_or(1, |n| n + 1);
        self.write_trailer(document, size, None, xref_position)?;
        self.writer.flush()?;

        info!(objects = self.xref.len(), bytes = self.current_position, "Document written");
        Ok(())
    }

    fn write_header<R>(&mut self, document: &Document<R>) -> Result<()> {
        self.write_bytes(format!("%PDF-{}\n", document.version()).as_bytes())?;
        // Binary comment to ensure file is treated as binary
        self.write_bytes(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n'])?;
        Ok(())
    }

    fn record_free(&mut self, number: u32, generation: u16) {
        if number == 0 {
            return;
        }
        self.xref
            .entry(number)
            .or_insert(XRefSlot::Free { generation });
    }

    fn write_indirect(&mut self, obj: &IndirectObject) -> Result<()> {
        let id = obj.id();
        self.xref.insert(
            id.number(),
            XRefSlot::InUse {
                offset: self.current_position - self.base_offset,
                generation: id.generation(),
            },
        );

        let header = format!("{} {} obj\n", id.number(), id.generation());
        self.write_bytes(header.as_bytes())?;

        match obj.stream_slot() {
            StreamSlot::None => self.write_object_value(obj.value())?,
            StreamSlot::Loaded(stream) => {
                let mut dict = obj.dict().cloned().ok_or_else(|| PdfError::InvalidStream {
                    id,
                    reason: "stream owner is not a dictionary".to_string(),
                })?;
                dict.set("Length", stream.len() as i64);
                self.write_object_value(&Object::Dictionary(dict))?;
                self.write_bytes(b"\nstream\n")?;
                self.write_bytes(stream.data())?;
                self.write_bytes(b"\nendstream")?;
            }
            StreamSlot::Deferred { .. } => {
                return Err(PdfError::InternalLogic(format!(
                    "stream of {id} must be loaded before writing"
                )))
            }
        }

        self.write_bytes(b"\nendobj\n")?;
        Ok(())
    }

    fn write_object_value(&mut self, object: &Object) -> Result<()> {
        match object {
            Object::Null => self.write_bytes(b"null")?,
            Object::Boolean(b) => self.write_bytes(if *b { b"true" } else { b"false" })?,
            Object::Integer(i) => self.write_bytes(i.to_string().as_bytes())?,
            Object::Real(f) => self.write_bytes(format_real(*f).as_bytes())?,
            Object::String(s) => self.write_bytes(&encode_string(s))?,
            Object::Name(n) => self.write_bytes(encode_name(n).as_bytes())?,
            Object::Array(arr) => {
                self.write_bytes(b"[")?;
                for (i, obj) in arr.iter().enumerate() {
                    if i > 0 {
                        self.write_bytes(b" ")?;
                    }
                    self.write_object_value(obj)?;
                }
                self.write_bytes(b"]")?;
            }
            Object::Dictionary(dict) => {
                self.write_bytes(b"<<")?;
                for (key, value) in dict.sorted_entries() {
                    self.write_bytes(b" ")?;
                    self.write_bytes(encode_name(key).as_bytes())?;
                    self.write_bytes(b" ")?;
                    self.write_object_value(value)?;
                }
                self.write_bytes(b" >>")?;
            }
            Object::Reference(id) => {
                let ref_str = format!("{} {} R", id.number(), id.generation());
                self.write_bytes(ref_str.as_bytes())?;
            }
            Object::RawData(data) => self.write_bytes(data)?,
        }
        Ok(())
    }

    /// Write the recorded entries as subsections of consecutive numbers.
    /// Free entries are chained in ascending order, headed by entry 0.
    fn write_xref(&mut self, full: bool) -> Result<()> {
        let free: Vec<u32> = self
            .xref
            .iter()
            .filter(|(_, slot)| matches!(slot, XRefSlot::Free { generation } if *generation < MAX_GENERATION))
            .map(|(n, _)| *n)
            .collect();
        let next_free = |number: u32| -> u32 {
            free.iter().copied().find(|&n| n > number).unwrap_or(0)
        };

        let mut lines: Vec<(u32, String)> = Vec::with_capacity(self.xref.len() + 1);
        lines.push((0, format!("{:010} {:05} f\r\n", next_free(0), MAX_GENERATION)));
        for (&number, slot) in &self.xref {
            let line = match *slot {
                XRefSlot::InUse { offset, generation } => {
                    format!("{offset:010} {generation:05} n\r\n")
                }
                XRefSlot::Free { generation } if generation >= MAX_GENERATION => {
                    format!("{:010} {generation:05} f\r\n", 0)
                }
                XRefSlot::Free { generation } => {
                    format!("{:010} {generation:05} f\r\n", next_free(number))
                }
            };
            lines.push((number, line));
        }

        let mut out = String::from("xref\n");
        let mut start = 0;
        while start < lines.len() {
            let mut end = start + 1;
            while end < lines.len() && lines[end].0 == lines[end - 1].0 + 1 {
                end += 1;
            }
            out.push_str(&format!("{} {}\n", lines[start].0, end - start));
            for (_, line) in &lines[start..end] {
                out.push_str(line);
            }
            start = end;
        }
        debug!(entries = lines.len(), full, "Writing xref table");
        self.write_bytes(out.as_bytes())
    }

    fn write_trailer<R>(
        &mut self,
        document: &Document<R>,
        size: u32,
        prev: Option<u64>,
        xref_position: u64,
    ) -> Result<()> {
        let source = document.trailer().dict();
        let mut trailer = Dictionary::new();
        trailer.set("Size", i64::from(size));
        for key in TRAILER_KEYS {
            if let Some(value) = source.get(key) {
                trailer.set(key, value.clone());
            }
        }
        if let Some(prev) = prev {
            trailer.set("Prev", prev as i64);
        }

        self.write_bytes(b"trailer\n")?;
        self.write_object_value(&Object::Dictionary(trailer))?;
        self.write_bytes(b"\nstartxref\n")?;
        self.write_bytes((xref_position - self.base_offset).to_string().as_bytes())?;
        self.write_bytes(b"\n%%EOF\n")?;
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.current_position += data.len() as u64;
        Ok(())
    }
}

/// Append the dirty objects of `document` and the object numbers freed
/// since it was loaded to `original`, as a new revision whose trailer
/// links back to the newest existing one.
pub fn write_incremental_update<R>(original: &[u8], document: &Document<R>) -> Result<Vec<u8>> {
    if document.is_encrypted() {
        return Err(PdfError::UnsupportedEncryption(
            "incremental updates of encrypted files are not written".to_string(),
        ));
    }

    let mut out = original.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    let existing = out.len() as u64;
    let mut writer = PdfWriter::appending(out, existing, document.magic_offset());

    let store = document.objects();
    let mut written = 0;
    for obj in store.iter().filter(|obj| obj.is_dirty()) {
        writer.write_indirect(obj)?;
        written += 1;
    }
    let loaded_free = document.loaded_free_objects();
    let mut freed = 0;
    for id in store.free_objects().filter(|id| !loaded_free.contains(id)) {
        writer.record_free(id.number(), id.generation());
        freed += 1;
    }

    let xref_position = writer.current_position;
    writer.write_xref(false)?;
    let highest = writer.xref.keys().next_back().map_or(0, |n| n + 1);
    let declared = document
        .trailer()
        .size()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);
    let size = highest.max(declared).max(store.object_count() + 1);
    let prev = document.xref_offset() - document.magic_offset();
    writer.write_trailer(document, size, Some(prev), xref_position)?;

    info!(written, freed, prev, "Incremental update written");
    Ok(writer.into_inner())
}

/// Reals are written in plain decimal notation; integral values keep a
/// fractional part so they read back as reals.
fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0.0".to_string();
    }
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0');
    let text = if text.ends_with('.') {
        format!("{text}0")
    } else {
        text.to_string()
    };
    if text == "-0.0" {
        "0.0".to_string()
    } else {
        text
    }
}

fn encode_string(s: &PdfString) -> Vec<u8> {
    if s.is_hex() {
        let mut out = Vec::with_capacity(s.as_bytes().len() * 2 + 2);
        out.push(b'<');
        for b in s.as_bytes() {
            out.extend_from_slice(format!("{b:02X}").as_bytes());
        }
        out.push(b'>');
        return out;
    }

    let mut out = Vec::with_capacity(s.as_bytes().len() + 2);
    out.push(b'(');
    for &b in s.as_bytes() {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
    out.push(b')');
    out
}

fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push('/');
    for b in name.bytes() {
        let plain = (0x21..=0x7E).contains(&b)
            && !matches!(b, b'#' | b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}');
        if plain {
            out.push(b as char);
        } else {
            out.push_str(&format!("#{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectId, Stream};
    use crate::parser::test_helpers::PdfBuilder;
    use crate::parser::{ParseOptions, PdfVersion};
    use std::io::{self, ErrorKind};

    fn value_bytes(object: &Object) -> String {
        let mut writer = PdfWriter::new_with_writer(Vec::new());
        writer.write_object_value(object).unwrap();
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_write_values() {
        assert_eq!(value_bytes(&Object::Null), "null");
        assert_eq!(value_bytes(&Object::Boolean(true)), "true");
        assert_eq!(value_bytes(&Object::Integer(-17)), "-17");
        assert_eq!(value_bytes(&Object::Reference(ObjectId::new(3, 2))), "3 2 R");
        assert_eq!(
            value_bytes(&Object::Array(vec![1.into(), Object::name("A")])),
            "[1 /A]"
        );

        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("Catalog"));
        dict.set("Count", 0);
        assert_eq!(
            value_bytes(&Object::Dictionary(dict)),
            "<< /Count 0 /Type /Catalog >>"
        );
    }

    #[test]
    fn test_format_real() {
        assert_eq!(format_real(0.5), "0.5");
        assert_eq!(format_real(3.0), "3.0");
        assert_eq!(format_real(-0.0), "0.0");
        assert_eq!(format_real(1e20), "100000000000000000000.0");
        assert_eq!(format_real(f64::NAN), "0.0");
    }

    #[test]
    fn test_string_escapes() {
        let s = PdfString::new(b"a(b)c\\d\r\n".to_vec());
        assert_eq!(encode_string(&s), b"(a\\(b\\)c\\\\d\\r\\n)".to_vec());
        assert_eq!(encode_string(&PdfString::hex(vec![0xAB, 0x01])), b"<AB01>".to_vec());
    }

    #[test]
    fn test_name_escapes() {
        assert_eq!(encode_name("Type"), "/Type");
        assert_eq!(encode_name("A B#"), "/A#20B#23");
        assert_eq!(encode_name("x/y"), "/x#2Fy");
    }

    #[test]
    fn test_xref_links_free_entries() {
        let mut writer = PdfWriter::new_with_writer(Vec::new());
        writer.xref.insert(1, XRefSlot::InUse { offset: 15, generation: 0 });
        writer.record_free(2, 3);
        writer.record_free(4, 1);
        writer.record_free(5, MAX_GENERATION);
        writer.write_xref(true).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "xref\n0 3\n\
             0000000002 65535 f\r\n\
             0000000015 00000 n\r\n\
             0000000004 00003 f\r\n\
             4 2\n\
             0000000000 00001 f\r\n\
             0000000000 65535 f\r\n"
        );
    }

    #[test]
    fn test_stream_length_is_rewritten() {
        let mut dict = Dictionary::new();
        dict.set("Length", 999);
        let obj = IndirectObject::with_stream(ObjectId::new(7, 0), dict, Stream::new(b"abc".to_vec()));

        let mut writer = PdfWriter::new_with_writer(Vec::new());
        writer.write_indirect(&obj).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "7 0 obj\n<< /Length 3 >>\nstream\nabc\nendstream\nendobj\n");
    }

    #[test]
    fn test_full_save_round_trip() {
        let mut doc = Document::new(PdfVersion::V1_6);
        let text = doc.objects_mut().create_object(Object::String(PdfString::new(b"hi".to_vec()))).unwrap();
        let root = doc.trailer().root().unwrap();
        doc.objects_mut()
            .get_object_mut(root)
            .and_then(|o| o.value_mut().as_dict_mut())
            .unwrap()
            .set("Greeting", text);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        assert!(out.ends_with(b"%%EOF\n"));

        let reloaded = Document::from_bytes(out, ParseOptions::strict()).unwrap();
        assert_eq!(reloaded.version(), PdfVersion::V1_6);
        let greeting = reloaded.catalog().unwrap().get("Greeting").unwrap();
        let value = reloaded.resolve(greeting).unwrap();
        assert_eq!(value.as_string().unwrap().as_bytes(), b"hi");
    }

    #[test]
    fn test_incremental_update_appends() {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.object(1, 0, "<< /Type /Catalog >>").object(2, 0, "(old)").object(3, 0, "(doomed)");
        pdf.xref_table("/Root 1 0 R");
        let original = pdf.build();

        let mut doc = Document::from_bytes(original.clone(), ParseOptions::default()).unwrap();
        *doc.objects_mut()
            .get_object_mut(ObjectId::new(2, 0))
            .unwrap()
            .value_mut() = Object::String(PdfString::new(b"new".to_vec()));
        doc.objects_mut()
            .remove_object(ObjectId::new(3, 0), true)
            .unwrap();

        let updated = doc.write_incremental_update(&original).unwrap();
        assert!(updated.starts_with(&original));

        let reloaded = Document::from_bytes(updated, ParseOptions::strict()).unwrap();
        assert_eq!(reloaded.incremental_updates(), 1);
        let value = reloaded.get_object(ObjectId::new(2, 0)).unwrap().value();
        assert_eq!(value.as_string().unwrap().as_bytes(), b"new");
        assert!(!reloaded.objects().contains(ObjectId::new(3, 0)));
        assert!(reloaded
            .objects()
            .free_objects()
            .any(|id| id == ObjectId::new(3, 1)));
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::PermissionDenied, "Simulated write error"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_reported() {
        let mut doc = Document::new(PdfVersion::V1_7);
        assert!(matches!(doc.save_to(FailingWriter), Err(PdfError::Io(_))));
    }
}
