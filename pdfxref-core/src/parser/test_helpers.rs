//! Helpers for creating test PDFs with correct offsets

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
enum Slot {
    InUse(usize, u16),
    Free(u32, u16),
    Compressed(u32, u32),
}

/// Writes objects and closes revisions with classic tables or xref
/// streams. Offsets are recorded relative to the `%PDF-` magic.
pub struct PdfBuilder {
    data: Vec<u8>,
    base: usize,
    pending: BTreeMap<u32, Slot>,
    size: u32,
    last_xref: Option<usize>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        Self::with_garbage(b"", version)
    }

    /// Start the file with `garbage` in front of the header
    pub fn with_garbage(garbage: &[u8], version: &str) -> Self {
        let mut data = garbage.to_vec();
        data.extend_from_slice(format!("%PDF-{version}\n").as_bytes());
        data.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");
        Self {
            data,
            base: garbage.len(),
            pending: BTreeMap::new(),
            size: 1,
            last_xref: None,
        }
    }

    /// Offset the next byte will have, relative to the magic
    pub fn position(&self) -> usize {
        self.data.len() - self.base
    }

    fn record(&mut self, number: u32, slot: Slot) {
        self.size = self.size.max(number + 1);
        self.pending.insert(number, slot);
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn object(&mut self, number: u32, generation: u16, body: &str) -> &mut Self {
        self.record(number, Slot::InUse(self.position(), generation));
        self.data
            .extend_from_slice(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes());
        self
    }

    /// A stream object; `/Length` is appended to `dict_entries`
    pub fn stream_object(&mut self, number: u32, dict_entries: &str, data: &[u8]) -> &mut Self {
        self.record(number, Slot::InUse(self.position(), 0));
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< {dict_entries} /Length {} >>\nstream\n",
                data.len()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(data);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    /// An uncompressed object stream holding `members`
    pub fn object_stream(&mut self, number: u32, members: &[(u32, &str)]) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (index, (member, value)) in members.iter().enumerate() {
            header.push_str(&format!("{member} {} ", body.len()));
            body.push_str(value);
            body.push(' ');
            self.record(*member, Slot::Compressed(number, index as u32));
        }
        let dict = format!(
            "/Type /ObjStm /N {} /First {}",
            members.len(),
            header.len()
        );
        let data = format!("{header}{body}");
        self.stream_object(number, &dict, data.as_bytes())
    }

    /// Record an in-use entry without writing an object
    pub fn in_use_entry(&mut self, number: u32, offset: usize, generation: u16) -> &mut Self {
        self.record(number, Slot::InUse(offset, generation));
        self
    }

    pub fn free(&mut self, number: u32, generation: u16) -> &mut Self {
        self.record(number, Slot::Free(0, generation));
        self
    }

    fn revision_slots(&mut self) -> Vec<(u32, Slot)> {
        if self.last_xref.is_none() {
            self.pending.insert(0, Slot::Free(0, 65535));
        }
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    fn prev_entry(&self) -> String {
        self.last_xref
            .map(|prev| format!(" /Prev {prev}"))
            .unwrap_or_default()
    }

    fn write_table(&mut self, slots: &[(u32, Slot)]) {
        self.data.extend_from_slice(b"xref\n");
        for run in runs(slots) {
            self.data
                .extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
            for (_, slot) in run {
                let line = match *slot {
                    Slot::InUse(offset, generation) => format!("{offset:010} {generation:05} n\r\n"),
                    Slot::Free(next, generation) => format!("{next:010} {generation:05} f\r\n"),
                    Slot::Compressed(..) => panic!("compressed entries need an xref stream"),
                };
                self.data.extend_from_slice(line.as_bytes());
            }
        }
    }

    fn write_xref_stream_object(&mut self, number: u32, slots: &[(u32, Slot)], extra: &str) {
        let mut rows = Vec::new();
        let mut index = String::new();
        for run in runs(slots) {
            index.push_str(&format!("{} {} ", run[0].0, run.len()));
            for (_, slot) in run {
                let (kind, field, generation) = match *slot {
                    Slot::Free(next, generation) => (0u8, next, u32::from(generation)),
                    Slot::InUse(offset, generation) => (1, offset as u32, u32::from(generation)),
                    Slot::Compressed(container, index) => (2, container, index),
                };
                rows.push(kind);
                rows.extend_from_slice(&field.to_be_bytes());
                rows.extend_from_slice(&(generation as u16).to_be_bytes());
            }
        }
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Length {}{} {extra} >>\nstream\n",
                self.size,
                index.trim_end(),
                rows.len(),
                self.prev_entry()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(&rows);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
    }

    fn write_tail(&mut self, xref: usize) {
        self.data
            .extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());
        self.last_xref = Some(xref);
    }

    /// Close the revision with a classic table; returns its offset
    pub fn xref_table(&mut self, trailer_extra: &str) -> usize {
        let slots = self.revision_slots();
        let xref = self.position();
        self.write_table(&slots);
        let trailer = format!(
            "trailer\n<< /Size {}{} {trailer_extra} >>\n",
            self.size,
            self.prev_entry()
        );
        self.data.extend_from_slice(trailer.as_bytes());
        self.write_tail(xref);
        xref
    }

    /// Close the revision with a cross-reference stream numbered `number`
    pub fn xref_stream(&mut self, number: u32, trailer_extra: &str) -> usize {
        let xref = self.position();
        self.record(number, Slot::InUse(xref, 0));
        let slots = self.revision_slots();
        self.write_xref_stream_object(number, &slots, trailer_extra);
        self.write_tail(xref);
        xref
    }

    /// Close the revision hybrid style: compressed entries go to the
    /// stream `stream_number`, the rest to a table whose trailer points
    /// at the stream with `/XRefStm`.
    pub fn hybrid_xref(&mut self, stream_number: u32, trailer_extra: &str) -> usize {
        let slots = self.revision_slots();
        let (compressed, classic): (Vec<_>, Vec<_>) = slots
            .into_iter()
            .partition(|(_, slot)| matches!(slot, Slot::Compressed(..)));

        let stm = self.position();
        self.size = self.size.max(stream_number + 1);
        self.write_xref_stream_object(stream_number, &compressed, "");

        let mut classic = classic;
        classic.push((stream_number, Slot::InUse(stm, 0)));
        classic.sort_by_key(|(number, _)| *number);

        let xref = self.position();
        self.write_table(&classic);
        let trailer = format!(
            "trailer\n<< /Size {}{} /XRefStm {stm} {trailer_extra} >>\n",
            self.size,
            self.prev_entry()
        );
        self.data.extend_from_slice(trailer.as_bytes());
        self.write_tail(xref);
        xref
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// Split sorted slots into runs of consecutive object numbers
fn runs(slots: &[(u32, Slot)]) -> Vec<&[(u32, Slot)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=slots.len() {
        if i == slots.len() || slots[i].0 != slots[i - 1].0 + 1 {
            if i > start {
                runs.push(&slots[start..i]);
            }
            start = i;
        }
    }
    runs
}

/// Catalog and empty page tree in one revision
pub fn create_minimal_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, 0, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.xref_table("/Root 1 0 R");
    pdf.build()
}

/// Three revisions; object 3 is rewritten by each update
pub fn create_incremental_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, 0, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, 0, "(first)");
    pdf.xref_table("/Root 1 0 R /Info 3 0 R");
    pdf.object(3, 0, "(second)");
    pdf.xref_table("/Root 1 0 R");
    pdf.object(3, 0, "(third)").object(4, 0, "42");
    pdf.xref_table("/Root 1 0 R");
    pdf.build()
}
