//! Shared fixture builder for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
enum Slot {
    InUse(usize, u16),
    Free(u16),
    Compressed(u32, u32),
}

/// Appends objects and closes revisions with xref tables or xref streams,
/// keeping track of offsets and `/Prev` links.
pub struct PdfBuilder {
    data: Vec<u8>,
    pending: BTreeMap<u32, Slot>,
    size: u32,
    last_xref: Option<usize>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            data: format!("%PDF-{version}\n%\u{e2}\u{e3}\n").into_bytes(),
            pending: BTreeMap::new(),
            size: 1,
            last_xref: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn record(&mut self, number: u32, slot: Slot) {
        self.size = self.size.max(number + 1);
        self.pending.insert(number, slot);
    }

    pub fn object(&mut self, number: u32, generation: u16, body: &str) -> &mut Self {
        self.record(number, Slot::InUse(self.data.len(), generation));
        self.data
            .extend_from_slice(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes());
        self
    }

    pub fn stream_object(&mut self, number: u32, dict_entries: &str, data: &[u8]) -> &mut Self {
        self.record(number, Slot::InUse(self.data.len(), 0));
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

    /// Object stream holding `members`; `encode` turns the decoded body
    /// into the stored one and names its filter
    pub fn object_stream_with(
        &mut self,
        number: u32,
        members: &[(u32, &str)],
        encode: impl Fn(&[u8]) -> (Vec<u8>, Option<&'static str>),
    ) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (index, (member, value)) in members.iter().enumerate() {
            header.push_str(&format!("{member} {} ", body.len()));
            body.push_str(value);
            body.push(' ');
            self.record(*member, Slot::Compressed(number, index as u32));
        }
        let (stored, filter) = encode(format!("{header}{body}").as_bytes());
        let mut dict = format!(
            "/Type /ObjStm /N {} /First {}",
            members.len(),
            header.len()
        );
        if let Some(filter) = filter {
            dict.push_str(&format!(" /Filter /{filter}"));
        }
        self.stream_object(number, &dict, &stored)
    }

    pub fn object_stream(&mut self, number: u32, members: &[(u32, &str)]) -> &mut Self {
        self.object_stream_with(number, members, |data| (data.to_vec(), None))
    }

    pub fn free(&mut self, number: u32, generation: u16) -> &mut Self {
        self.record(number, Slot::Free(generation));
        self
    }

    fn take_slots(&mut self) -> Vec<(u32, Slot)> {
        if self.last_xref.is_none() {
            self.pending.insert(0, Slot::Free(65535));
        }
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    fn prev(&self) -> String {
        self.last_xref
            .map(|prev| format!(" /Prev {prev}"))
            .unwrap_or_default()
    }

    fn tail(&mut self, xref: usize) {
        self.data
            .extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());
        self.last_xref = Some(xref);
    }

    /// Close the revision with a classic table; returns its offset
    pub fn xref_table(&mut self, trailer_extra: &str) -> usize {
        let slots = self.take_slots();
        let xref = self.data.len();
        let mut out = String::from("xref\n");
        for run in runs(&slots) {
            out.push_str(&format!("{} {}\n", run[0].0, run.len()));
            for (_, slot) in run {
                match *slot {
                    Slot::InUse(offset, generation) => {
                        out.push_str(&format!("{offset:010} {generation:05} n\r\n"))
                    }
                    Slot::Free(generation) => out.push_str(&format!("0000000000 {generation:05} f\r\n")),
                    Slot::Compressed(..) => panic!("compressed entries need an xref stream"),
                }
            }
        }
        out.push_str(&format!(
            "trailer\n<< /Size {}{} {trailer_extra} >>\n",
            self.size,
            self.prev()
        ));
        self.data.extend_from_slice(out.as_bytes());
        self.tail(xref);
        xref
    }

    /// Close the revision with a cross-reference stream numbered `number`
    pub fn xref_stream(&mut self, number: u32, trailer_extra: &str) -> usize {
        let xref = self.data.len();
        self.record(number, Slot::InUse(xref, 0));
        let slots = self.take_slots();

        let mut rows = Vec::new();
        let mut index = String::new();
        for run in runs(&slots) {
            index.push_str(&format!("{} {} ", run[0].0, run.len()));
            for (_, slot) in run {
                let (kind, field, last) = match *slot {
                    Slot::Free(generation) => (0u8, 0u32, generation),
                    Slot::InUse(offset, generation) => (1, offset as u32, generation),
                    Slot::Compressed(container, index) => (2, container, index as u16),
                };
                rows.push(kind);
                rows.extend_from_slice(&field.to_be_bytes());
                rows.extend_from_slice(&last.to_be_bytes());
            }
        }
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Length {}{} {trailer_extra} >>\nstream\n",
                self.size,
                index.trim_end(),
                rows.len(),
                self.prev()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(&rows);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
        self.tail(xref);
        xref
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }
}

fn runs(slots: &[(u32, Slot)]) -> Vec<&[(u32, Slot)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=slots.len() {
        if i == slots.len() || slots[i].0 != slots[i - 1].0 + 1 {
            runs.push(&slots[start..i]);
            start = i;
        }
    }
    runs
}

/// Catalog, page tree, info, and one orphan; two revisions where the
/// update rewrites the info dictionary
pub fn updated_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, 0, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, 0, "<< /Producer (first) >>");
    pdf.xref_table("/Root 1 0 R /Info 3 0 R /ID [<0102> <0102>]");
    pdf.object(3, 0, "<< /Producer (second) >>")
        .object(4, 0, "(orphan)");
    pdf.xref_table("/Root 1 0 R");
    pdf.build()
}
