//! PDF structure reader
//!
//! [`Parser`] drives a [`Tokenizer`] over an [`InputDevice`] through the
//! stages of loading a file: find `%%EOF` and `startxref`, walk the chain
//! of cross-reference sections from the newest revision to the oldest,
//! authenticate encryption, then materialize every indirect object into an
//! [`IndirectObjectList`] and expand compressed object streams.
//!
//! On failure the parser and the store are reset, except after a wrong
//! password: the session then stays in [`ParseStage::AuthenticateEncryption`]
//! and [`Parser::retry_with_password`] resumes from there.

use super::device::InputDevice;
use super::encryption_handler::{EncryptSession, EncryptionInfo, SecurityHandlerFactory};
use super::filters::decode_stream;
use super::header::{PdfHeader, PdfVersion};
use super::lexer::{is_whitespace, Tokenizer};
use super::object_stream::ObjectStream;
use super::parser_object::{
    decrypt_stream_body, read_stream_body, skip_stream_body, ParserObject, ReadContext,
    StreamLength,
};
use super::trailer::{PdfTrailer, RevisionInfo, RevisionKind};
use super::xref::{
    check_table_end, parse_classic_entry, XRefEntries, XRefEntry, XRefEntryType, XREF_ENTRY_SIZE,
};
use super::xref_stream::{read_xref_stream_entries, XRefStreamLayout};
use super::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, Object, ObjectId, Stream, StreamSlot};
use crate::store::IndirectObjectList;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::SeekFrom;
use tracing::{debug, error, info, warn};

const EOF_MARKER: &[u8] = b"%%EOF";

/// How far before `%%EOF` the `startxref` keyword is searched for
const STARTXREF_WINDOW: u64 = 512;

const SCAN_CHUNK: u64 = 4096;

/// Where a parse session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseStage {
    #[default]
    Idle,
    LocateEof,
    LocateStartXRef,
    ReadXRefChain,
    ReadTrailer,
    AuthenticateEncryption,
    MaterializeObjects,
    ExpandCompressedStreams,
    Done,
}

/// Cross-reference and object parser for one document
pub struct Parser {
    options: ParseOptions,
    tokenizer: Tokenizer,
    stage: ParseStage,
    version: PdfVersion,
    magic_offset: u64,
    last_eof_offset: u64,
    xref_offset: u64,
    has_xref_stream: bool,
    incremental_updates: u32,
    entries: XRefEntries,
    trailer: Option<PdfTrailer>,
    visited: HashSet<u64>,
    revisions: Vec<RevisionInfo>,
    warnings: Vec<String>,
    security: Option<Box<dyn SecurityHandlerFactory>>,
    encrypt: Option<EncryptSession>,
    password: String,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("stage", &self.stage)
            .field("version", &self.version)
            .field("xref_offset", &self.xref_offset)
            .field("entries", &self.entries.len())
            .field("incremental_updates", &self.incremental_updates)
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

impl Parser {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            tokenizer: Tokenizer::with_max_depth(options.max_recursion_depth),
            options,
            stage: ParseStage::Idle,
            version: PdfVersion::default(),
            magic_offset: 0,
            last_eof_offset: 0,
            xref_offset: 0,
            has_xref_stream: false,
            incremental_updates: 0,
            entries: XRefEntries::new(),
            trailer: None,
            visited: HashSet::new(),
            revisions: Vec::new(),
            warnings: Vec::new(),
            security: None,
            encrypt: None,
            password: String::new(),
        }
    }

    /// Handlers for encrypted files come from `factory`; without one an
    /// encrypted file fails with [`PdfError::UnsupportedEncryption`].
    pub fn with_security_handler_factory(
        mut self,
        factory: Box<dyn SecurityHandlerFactory>,
    ) -> Self {
        self.security = Some(factory);
        self
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn stage(&self) -> ParseStage {
        self.stage
    }

    /// Header version, raised by the catalog `/Version` when that is newer
    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// Bytes of garbage in front of `%PDF-`
    pub fn magic_offset(&self) -> u64 {
        self.magic_offset
    }

    /// Offset of the last `%%EOF` marker
    pub fn last_eof_offset(&self) -> u64 {
        self.last_eof_offset
    }

    /// Offset of the newest cross-reference section
    pub fn xref_offset(&self) -> u64 {
        self.xref_offset
    }

    pub fn has_xref_stream(&self) -> bool {
        self.has_xref_stream
    }

    pub fn incremental_updates(&self) -> u32 {
        self.incremental_updates
    }

    pub fn xref_entries(&self) -> &XRefEntries {
        &self.entries
    }

    pub fn trailer(&self) -> Option<&PdfTrailer> {
        self.trailer.as_ref()
    }

    /// Cross-reference sections read, newest first
    pub fn revisions(&self) -> &[RevisionInfo] {
        &self.revisions
    }

    /// Recovery warnings, kept when [`ParseOptions::collect_warnings`] is set
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt.is_some()
    }

    pub fn encrypt_session(&self) -> Option<&EncryptSession> {
        self.encrypt.as_ref()
    }

    /// Forget everything read so far. Options, the handler factory and
    /// the password are kept.
    pub fn reset(&mut self) {
        self.stage = ParseStage::Idle;
        self.version = PdfVersion::default();
        self.magic_offset = 0;
        self.last_eof_offset = 0;
        self.xref_offset = 0;
        self.has_xref_stream = false;
        self.incremental_updates = 0;
        self.entries.clear();
        self.trailer = None;
        self.visited.clear();
        self.revisions.clear();
        self.warnings.clear();
        self.encrypt = None;
    }

    fn enter(&mut self, stage: ParseStage) {
        debug!(?stage, "Entering parse stage");
        self.stage = stage;
    }

    fn lenient_warning(&mut self, message: String) {
        warn!(stage = ?self.stage, "{message}");
        if self.options.collect_warnings {
            self.warnings.push(message);
        }
    }

    /// Read the whole document from `device` into `store`
    pub fn parse(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<()> {
        self.reset();
        store.clear();
        let result = self.read_document(device, store);
        self.finish(result, store)
    }

    /// Resume a parse that stopped at [`PdfError::InvalidPassword`]
    pub fn retry_with_password(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
        password: &str,
    ) -> Result<()> {
        if self.stage != ParseStage::AuthenticateEncryption || self.encrypt.is_none() {
            return Err(PdfError::InternalLogic(
                "no authentication is pending".to_string(),
            ));
        }
        self.password = password.to_string();
        let result = self.materialize(device, store);
        self.finish(result, store)
    }

    fn finish(&mut self, result: Result<()>, store: &mut IndirectObjectList) -> Result<()> {
        match result {
            Ok(()) => {
                self.enter(ParseStage::Done);
                info!(
                    objects = store.len(),
                    version = %self.version,
                    incremental_updates = self.incremental_updates,
                    "Document parsed"
                );
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                info!("Authentication failed, waiting for another password");
                Err(e)
            }
            Err(e) => {
                error!(stage = ?self.stage, error = %e, "Parsing failed");
                self.reset();
                store.clear();
                Err(e)
            }
        }
    }

    fn read_document(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<()> {
        let header = PdfHeader::detect(device)?;
        self.version = header.version;
        self.magic_offset = header.magic_offset;
        if header.magic_offset > 0 {
            self.lenient_warning(format!(
                "{} bytes of garbage before the PDF header",
                header.magic_offset
            ));
        }

        self.enter(ParseStage::LocateEof);
        self.locate_eof(device)?;

        self.enter(ParseStage::LocateStartXRef);
        self.xref_offset = self.locate_startxref(device)?;

        self.enter(ParseStage::ReadXRefChain);
        self.read_xref_chain(device, self.xref_offset, true)?;
        self.check_trailer_size()?;

        self.enter(ParseStage::AuthenticateEncryption);
        self.setup_encryption(device, store)?;
        self.materialize(device, store)
    }

    fn materialize(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<()> {
        self.authenticate()?;

        self.enter(ParseStage::MaterializeObjects);
        let containers = self.read_objects(device, store)?;

        self.enter(ParseStage::ExpandCompressedStreams);
        self.expand_object_streams(device, store, containers)?;

        if !self.options.load_on_demand {
            self.load_all_streams(device, store)?;
        }
        self.update_document_version(store)
    }

    fn locate_eof(&mut self, device: &mut dyn InputDevice) -> Result<()> {
        let len = device.len();
        if len < EOF_MARKER.len() as u64 {
            return Err(PdfError::InvalidEofMarker);
        }

        if self.options.strict_parsing {
            // only an end-of-line may follow the marker
            let tail_len = len.min(EOF_MARKER.len() as u64 + 2);
            let tail_start = len - tail_len;
            device.seek(SeekFrom::Start(tail_start))?;
            let tail = device.read_up_to(tail_len as usize)?;
            let mut end = tail.len();
            while end > 0 && matches!(tail[end - 1], b'\r' | b'\n') {
                end -= 1;
            }
            if !tail[..end].ends_with(EOF_MARKER) {
                return Err(PdfError::InvalidEofMarker);
            }
            self.last_eof_offset = tail_start + (end - EOF_MARKER.len()) as u64;
            return Ok(());
        }

        let pos = rfind_before(device, len, None, EOF_MARKER)?.ok_or(PdfError::InvalidEofMarker)?;
        let after = pos + EOF_MARKER.len() as u64;
        device.seek(SeekFrom::Start(after))?;
        let trailing = device.read_up_to((len - after) as usize)?;
        if trailing.iter().any(|&b| !is_whitespace(b)) {
            self.lenient_warning(format!(
                "{} bytes of garbage after %%EOF at offset {pos}",
                trailing.len()
            ));
        }
        self.last_eof_offset = pos;
        Ok(())
    }

    fn find_startxref(&mut self, device: &mut dyn InputDevice) -> Result<(u64, usize)> {
        let end = self.last_eof_offset;
        if let Some(pos) = rfind_before(device, end, Some(STARTXREF_WINDOW), b"startxref")? {
            return Ok((pos, b"startxref".len()));
        }
        if !self.options.strict_parsing {
            if let Some(pos) = rfind_before(device, end, Some(STARTXREF_WINDOW), b"startref")? {
                self.lenient_warning(format!("Found non-standard 'startref' at offset {pos}"));
                return Ok((pos, b"startref".len()));
            }
        }
        Err(PdfError::xref(end, "startxref not found"))
    }

    fn locate_startxref(&mut self, device: &mut dyn InputDevice) -> Result<u64> {
        let (pos, keyword_len) = self.find_startxref(device)?;
        device.seek(SeekFrom::Start(pos + keyword_len as u64))?;
        let offset = self
            .tokenizer
            .read_next_number(device)
            .ok()
            .filter(|&n| n >= 0)
            .ok_or_else(|| PdfError::xref(pos, "no valid offset after startxref"))?;
        debug!(offset, magic_offset = self.magic_offset, "Found startxref");
        Ok(offset as u64 + self.magic_offset)
    }

    /// Walk the revision chain starting at `start`, newest first
    fn read_xref_chain(
        &mut self,
        device: &mut dyn InputDevice,
        start: u64,
        follow_prev: bool,
    ) -> Result<()> {
        let mut next = Some(start);
        while let Some(offset) = next {
            next = self.read_xref_section(device, offset)?;
            if !follow_prev {
                break;
            }
        }
        Ok(())
    }

    /// Read the section at `offset`; returns where the previous revision's
    /// section is.
    fn read_xref_section(
        &mut self,
        device: &mut dyn InputDevice,
        offset: u64,
    ) -> Result<Option<u64>> {
        if !self.visited.insert(offset) {
            return Err(PdfError::XRefCycle { offset });
        }

        let offset = if offset >= device.len() {
            self.recover_xref_offset(device, offset)?
        } else {
            offset
        };

        device.seek(SeekFrom::Start(offset))?;
        let is_table = matches!(
            self.tokenizer.try_read_next_token(device)?,
            Some(token) if token.is_keyword("xref")
        );
        if !is_table {
            let prev = self.read_xref_stream(device, offset, RevisionKind::Stream)?;
            return Ok(self.note_prev(prev));
        }

        debug!(offset, "Reading xref table");
        self.revisions.push(RevisionInfo {
            offset,
            kind: RevisionKind::Table,
        });
        self.read_xref_subsections(device, offset)?;

        self.enter(ParseStage::ReadTrailer);
        let dict = self.read_trailer_dict(device)?;
        let section_trailer = PdfTrailer::new(dict);
        let xref_stm = section_trailer.xref_stm();
        let prev = section_trailer.prev();
        self.merge_trailer(section_trailer.into_dict());

        if let Some(stm) = xref_stm {
            let stm = stm + self.magic_offset;
            if self.visited.insert(stm) {
                self.read_xref_stream(device, stm, RevisionKind::HybridStream)?;
            } else {
                self.lenient_warning(format!(
                    "XRefStm at offset {stm} was already read, skipping it"
                ));
            }
        }
        self.enter(ParseStage::ReadXRefChain);

        Ok(self.note_prev(prev.map(|p| p + self.magic_offset)))
    }

    fn note_prev(&mut self, prev: Option<u64>) -> Option<u64> {
        if prev.is_some() {
            self.incremental_updates += 1;
        }
        prev
    }

    fn recover_xref_offset(&mut self, device: &mut dyn InputDevice, bad: u64) -> Result<u64> {
        if self.options.strict_parsing {
            return Err(PdfError::xref(bad, "offset is past the end of the file"));
        }
        self.lenient_warning(format!(
            "xref offset {bad} is past the end of the file, searching for the xref keyword"
        ));
        let (startxref, _) = self.find_startxref(device)?;
        let window = self.options.max_recovery_bytes as u64;
        rfind_before(device, startxref, Some(window), b"xref")?
            .ok_or_else(|| PdfError::xref(bad, "offset out of bounds and no xref keyword nearby"))
    }

    fn read_xref_subsections(&mut self, device: &mut dyn InputDevice, section: u64) -> Result<()> {
        let mut subsections = 0;
        loop {
            match self.tokenizer.try_peek_next_token(device)? {
                Some(token) if token.is_keyword("trailer") => return Ok(()),
                None => return Ok(()),
                Some(_) => {}
            }
            if subsections == self.options.max_xref_sections {
                return Err(PdfError::xref(
                    section,
                    format!("more than {} subsections", self.options.max_xref_sections),
                ));
            }
            subsections += 1;

            // a header that is not two numbers ends the table; the
            // trailer read reports it
            let Ok(first) = self.tokenizer.read_next_number(device) else {
                return Ok(());
            };
            let Ok(count) = self.tokenizer.read_next_number(device) else {
                return Ok(());
            };
            if first < 0 || count < 0 {
                return Err(PdfError::xref(
                    section,
                    format!("negative subsection header {first} {count}"),
                ));
            }
            let end = first
                .checked_add(count)
                .filter(|&end| end <= i64::from(u32::MAX))
                .ok_or_else(|| {
                    PdfError::ValueOutOfRange(format!("xref subsection {first} + {count} overflows"))
                })?;
            check_table_end(end as u64)?;

            while matches!(device.peek()?, Some(ch) if is_whitespace(ch)) {
                device.read_byte()?;
            }

            let start = device.position();
            let needed = count as u64 * XREF_ENTRY_SIZE as u64;
            if needed > device.len() - start {
                return Err(PdfError::xref(
                    start,
                    format!("subsection of {count} entries runs past the end of the file"),
                ));
            }

            self.entries.enlarge(end as usize);
            let data = device.read_up_to(needed as usize)?;
            for (i, raw) in data.chunks(XREF_ENTRY_SIZE).enumerate() {
                let entry_offset = start + (i * XREF_ENTRY_SIZE) as u64;
                let (entry_type, field, generation) = parse_classic_entry(raw, entry_offset)?;
                let generation = generation.min(u32::from(u16::MAX)) as u16;
                let entry = if entry_type == XRefEntryType::InUse {
                    let offset = if field > 0 { field + self.magic_offset } else { 0 };
                    XRefEntry::in_use(offset, generation)
                } else {
                    XRefEntry::free(field.min(u64::from(u32::MAX)) as u32, generation)
                };
                self.entries.set_if_unparsed(first as usize + i, entry);
            }
        }
    }

    fn read_trailer_dict(&mut self, device: &mut dyn InputDevice) -> Result<Dictionary> {
        match self.tokenizer.try_read_next_token(device)? {
            Some(token) if token.is_keyword("trailer") => {}
            _ => return Err(PdfError::InvalidTrailer),
        }
        match self.tokenizer.read_next_value(device) {
            Ok(Object::Dictionary(dict)) => Ok(dict),
            Err(PdfError::Io(e)) => Err(PdfError::Io(e)),
            _ => Err(PdfError::InvalidTrailer),
        }
    }

    fn merge_trailer(&mut self, dict: Dictionary) {
        self.trailer = Some(match self.trailer.take() {
            None => PdfTrailer::new(dict),
            Some(newer) => newer.merge(&dict),
        });
    }

    /// Read a cross-reference stream object; returns its `/Prev`
    fn read_xref_stream(
        &mut self,
        device: &mut dyn InputDevice,
        offset: u64,
        kind: RevisionKind,
    ) -> Result<Option<u64>> {
        debug!(offset, ?kind, "Reading xref stream");
        device.seek(SeekFrom::Start(offset))?;
        let number = self.tokenizer.read_next_number(device).ok();
        let generation = self.tokenizer.read_next_number(device).ok();
        let id = match (number, generation) {
            (Some(n), Some(g)) => match (u32::try_from(n), u16::try_from(g)) {
                (Ok(n), Ok(g)) => ObjectId::new(n, g),
                _ => return Err(PdfError::xref(offset, "invalid xref stream object number")),
            },
            _ => return Err(PdfError::xref(offset, "neither an xref table nor an xref stream")),
        };

        let mut obj = ParserObject::new(id, offset);
        obj.parse(device, &mut self.tokenizer, &ReadContext::default())
            .map_err(|e| PdfError::xref(offset, e.to_string()))?;
        let dict = obj
            .value()
            .and_then(Object::as_dict)
            .filter(|dict| dict.is_type("XRef"))
            .cloned()
            .ok_or_else(|| PdfError::xref(offset, "object is not an xref stream"))?;
        let stream_offset = obj
            .stream_offset()
            .ok_or_else(|| PdfError::xref(offset, "xref stream has no stream data"))?;

        let raw = read_stream_body(
            device,
            &mut self.tokenizer,
            id,
            &dict,
            stream_offset,
            StreamLength::Direct,
            self.options.lenient_streams,
        )?;
        let data = decode_stream(&raw, &dict)?;
        let layout = XRefStreamLayout::from_dict(&dict, offset)?;
        let written = read_xref_stream_entries(
            &layout,
            &data,
            &mut self.entries,
            offset,
            self.magic_offset,
        )?;
        debug!(offset, written, "Read xref stream entries");

        self.has_xref_stream = true;
        self.revisions.push(RevisionInfo { offset, kind });

        let prev = PdfTrailer::new(dict.clone())
            .prev()
            .map(|p| p + self.magic_offset);
        self.merge_trailer(dict);

        Ok(match kind {
            RevisionKind::HybridStream => None,
            _ => prev,
        })
    }

    fn check_trailer_size(&mut self) -> Result<()> {
        let size = self
            .trailer
            .as_ref()
            .ok_or(PdfError::InvalidTrailer)?
            .size();
        match size {
            Some(size) if (self.entries.len() as i64) > size => {
                self.lenient_warning(format!(
                    "There are more objects ({}) in this XRef table than specified in the size key of the trailer ({size})",
                    self.entries.len()
                ));
            }
            Some(_) => {}
            None if self.options.strict_parsing => return Err(PdfError::InvalidTrailer),
            None => self.lenient_warning("Trailer has no /Size".to_string()),
        }
        Ok(())
    }

    fn setup_encryption(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<()> {
        let Some(encrypt) = self.trailer.as_ref().and_then(|t| t.encrypt()).cloned() else {
            return Ok(());
        };

        let (dict, encrypt_id) = match encrypt {
            Object::Reference(id) => {
                let number = id.number() as usize;
                if number == 0 || number >= self.entries.len() {
                    return Err(PdfError::InvalidEncryptionDict(format!(
                        "encryption dictionary {id} is not in the cross-reference table"
                    )));
                }
                let entry = self.entries[number];
                if entry.entry_type != XRefEntryType::InUse || entry.offset == 0 {
                    return Err(PdfError::InvalidEncryptionDict(format!(
                        "encryption dictionary {id} is not an in-use object"
                    )));
                }
                let mut obj = ParserObject::new(id, entry.offset);
                obj.parse(device, &mut self.tokenizer, &ReadContext::default())
                    .map_err(|e| PdfError::InvalidEncryptionDict(e.to_string()))?;
                let obj = obj.into_indirect()?;
                let dict = obj.dict().cloned().ok_or_else(|| {
                    PdfError::InvalidEncryptionDict(format!("{id} is not a dictionary"))
                })?;
                store.push_object(obj);
                (dict, Some(id))
            }
            Object::Dictionary(dict) => (dict, None),
            other => {
                return Err(PdfError::InvalidEncryptionDict(format!(
                    "/Encrypt is a {}",
                    other.type_name()
                )))
            }
        };

        let info = EncryptionInfo::from_dict(&dict)?;
        let factory = self.security.as_ref().ok_or_else(|| {
            PdfError::UnsupportedEncryption(format!(
                "no security handler for /Filter /{} /V {}",
                info.filter, info.v
            ))
        })?;
        let handler = factory.create(&dict)?;
        debug!(filter = %info.filter, v = info.v, "Encryption session created");
        self.encrypt = Some(EncryptSession::new(handler, info, encrypt_id));
        Ok(())
    }

    fn authenticate(&mut self) -> Result<()> {
        if self.encrypt.is_none() {
            return Ok(());
        }
        let document_id = self
            .trailer
            .as_ref()
            .and_then(|t| t.document_id())
            .map(|id| id.as_bytes().to_vec())
            .ok_or_else(|| {
                PdfError::InvalidEncryptionDict("trailer has no document /ID".to_string())
            })?;

        let Some(session) = self.encrypt.as_mut() else {
            return Ok(());
        };
        let result = session.authenticate(&self.password, &document_id);
        if !result.is_authenticated() {
            return Err(PdfError::InvalidPassword);
        }
        debug!(?result, "Authenticated");
        Ok(())
    }

    /// Returns the compressed entries grouped by container
    fn read_objects(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<BTreeMap<u32, BTreeSet<u32>>> {
        let mut containers: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        let encrypt_object = self.encrypt.as_ref().and_then(|s| s.encrypt_object());

        // object 0 heads the free list and is never materialized
        for number in 1..self.entries.len() as u32 {
            let entry = self.entries[number as usize];
            if !entry.parsed {
                store.add_free_object(ObjectId::new(number, 1));
                continue;
            }

            match entry.entry_type {
                XRefEntryType::InUse if entry.offset > 0 => {
                    let id = ObjectId::new(number, entry.generation);
                    if encrypt_object == Some(id) && store.contains(id) {
                        continue;
                    }
                    match self.load_object(device, id, entry.offset) {
                        Ok(obj) => {
                            store.push_object(obj);
                        }
                        Err(e)
                            if self.options.ignore_broken_objects
                                && !matches!(e, PdfError::Io(_)) =>
                        {
                            self.lenient_warning(format!(
                                "Error while loading object {id}, freeing it: {e}"
                            ));
                            store.safe_add_free_object(id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                XRefEntryType::InUse => {
                    if self.options.strict_parsing {
                        return Err(PdfError::xref(
                            self.xref_offset,
                            format!("object {number} {} is in use at offset 0", entry.generation),
                        ));
                    }
                    if entry.generation == 0 {
                        self.lenient_warning(format!(
                            "Object {number} 0 R is in use at offset 0, treating it as free"
                        ));
                        store.add_free_object(ObjectId::new(number, 1));
                    } else {
                        let id = ObjectId::new(number, entry.generation);
                        self.lenient_warning(format!("Object {id} is in use at offset 0, freeing it"));
                        store.safe_add_free_object(id);
                    }
                }
                XRefEntryType::Free => {
                    store.try_add_free_object(ObjectId::new(number, entry.generation));
                }
                XRefEntryType::Compressed => {
                    containers
                        .entry(entry.object_number)
                        .or_default()
                        .insert(number);
                }
            }
        }
        Ok(containers)
    }

    fn load_object(
        &mut self,
        device: &mut dyn InputDevice,
        id: ObjectId,
        offset: u64,
    ) -> Result<IndirectObject> {
        let ctx = ReadContext {
            encrypt: self.encrypt.as_ref(),
            lenient_streams: self.options.lenient_streams,
        };
        let mut obj = ParserObject::new(id, offset);
        obj.parse(device, &mut self.tokenizer, &ctx)?;

        if self.options.strict_parsing {
            if let (Some(stream_offset), Some(dict)) =
                (obj.stream_offset(), obj.value().and_then(Object::as_dict))
            {
                if dict.get_integer("Length").is_some() {
                    skip_stream_body(device, id, dict, stream_offset)?;
                    match self.tokenizer.try_read_next_token(device)? {
                        Some(token) if token.is_keyword("endstream") => {}
                        _ => {
                            return Err(PdfError::InvalidStream {
                                id,
                                reason: "endstream not found after /Length bytes".to_string(),
                            })
                        }
                    }
                }
            }
        }
        obj.into_indirect()
    }

    fn expand_object_streams(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
        containers: BTreeMap<u32, BTreeSet<u32>>,
    ) -> Result<()> {
        for (number, members) in containers {
            let id = ObjectId::new(number, 0);
            if !store.contains(id) {
                if !self.options.ignore_broken_objects {
                    return Err(PdfError::ObjectNotFound(id));
                }
                self.lenient_warning(format!(
                    "Object stream {id} holding {} objects is missing",
                    members.len()
                ));
                continue;
            }

            // registered even when expansion fails below
            store.add_compressed_object_stream(number);
            match self.expand_container(device, store, id, &members) {
                Ok(count) => debug!(container = %id, count, "Expanded object stream"),
                Err(e) if self.options.ignore_broken_objects && !matches!(e, PdfError::Io(_)) => {
                    self.lenient_warning(format!("Error while expanding object stream {id}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn expand_container(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
        id: ObjectId,
        members: &BTreeSet<u32>,
    ) -> Result<usize> {
        self.load_stream(device, store, id)?;

        let objstm = {
            let obj = store.must_get_object(id)?;
            let dict = obj.dict().ok_or_else(|| PdfError::InvalidObject {
                id,
                offset: obj.offset().unwrap_or(0),
                reason: "object stream is not a dictionary".to_string(),
            })?;
            let stream = obj.stream().ok_or_else(|| PdfError::InvalidStream {
                id,
                reason: "object stream has no stream data".to_string(),
            })?;
            ObjectStream::parse(id, dict, stream.decode(dict)?)?
        };

        let listed: BTreeSet<u32> = objstm.member_numbers().collect();
        let absent = members.difference(&listed).count();
        if absent > 0 {
            self.lenient_warning(format!(
                "{absent} objects listed as compressed in {id} are not in its header"
            ));
        }

        let objects = objstm.read_objects(members, &mut self.tokenizer)?;
        let count = objects.len();
        for obj in objects {
            store.push_object(obj);
        }
        Ok(count)
    }

    /// Read the deferred stream body of `id`. Does nothing when the body
    /// is already loaded or the object has none.
    pub fn load_stream(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
        id: ObjectId,
    ) -> Result<()> {
        let data = {
            let obj = store.must_get_object(id)?;
            let StreamSlot::Deferred { offset } = *obj.stream_slot() else {
                return Ok(());
            };
            let dict = obj.dict().ok_or_else(|| PdfError::InvalidStream {
                id,
                reason: "stream owner is not a dictionary".to_string(),
            })?;
            let raw = read_stream_body(
                device,
                &mut self.tokenizer,
                id,
                dict,
                offset,
                StreamLength::Resolve(store),
                self.options.lenient_streams,
            )?;
            let ctx = ReadContext {
                encrypt: self.encrypt.as_ref(),
                lenient_streams: self.options.lenient_streams,
            };
            decrypt_stream_body(&ctx, id, obj.value(), raw)?
        };

        if let Some(obj) = store.get_object_mut_clean(id) {
            obj.set_stream(Stream::new(data));
        }
        Ok(())
    }

    fn load_all_streams(
        &mut self,
        device: &mut dyn InputDevice,
        store: &mut IndirectObjectList,
    ) -> Result<()> {
        let deferred: Vec<ObjectId> = store
            .iter()
            .filter(|obj| matches!(obj.stream_slot(), StreamSlot::Deferred { .. }))
            .map(|obj| obj.id())
            .collect();

        for id in deferred {
            match self.load_stream(device, store, id) {
                Ok(()) => {}
                Err(e) if self.options.ignore_broken_objects && !matches!(e, PdfError::Io(_)) => {
                    self.lenient_warning(format!("Error while loading stream of {id}, freeing it: {e}"));
                    store.remove_object(id, true)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn update_document_version(&mut self, store: &IndirectObjectList) -> Result<()> {
        let Some(root) = self.trailer.as_ref().and_then(|t| t.root()) else {
            return Ok(());
        };
        let Some(catalog) = store.get_object(root) else {
            return Ok(());
        };
        let Some(version) = catalog.dict().and_then(|d| d.get("Version")) else {
            return Ok(());
        };

        match version {
            Object::Name(name) => match PdfVersion::parse(name) {
                Some(version) if version > self.version => {
                    debug!(from = %self.version, to = %version, "Catalog /Version is newer than the header");
                    self.version = version;
                }
                Some(_) => {}
                None => self.lenient_warning(format!("Unknown catalog /Version {name}")),
            },
            other if self.options.strict_parsing => {
                return Err(PdfError::InvalidObject {
                    id: root,
                    offset: catalog.offset().unwrap_or(0),
                    reason: format!("/Version must be a name, found {}", other.type_name()),
                })
            }
            other => {
                let kind = other.type_name();
                self.lenient_warning(format!("Ignoring catalog /Version of type {kind}"));
            }
        }
        Ok(())
    }

    /// Read only the revision that ends at `current_eof` (an offset at or
    /// shortly after its `%%EOF`, the file length for the newest one).
    ///
    /// When that revision is an incremental update, returns the lowest
    /// in-use offset it lists, which is where the previous revision ends.
    pub fn try_get_previous_revision_offset(
        &mut self,
        device: &mut dyn InputDevice,
        current_eof: u64,
    ) -> Result<Option<u64>> {
        self.reset();
        match self.read_latest_revision(device, current_eof) {
            Ok(()) => {}
            Err(e) => {
                self.reset();
                return Err(e);
            }
        }

        if self.incremental_updates == 0 {
            return Ok(None);
        }
        Ok(self
            .entries
            .iter()
            .filter(|(_, e)| e.parsed && e.entry_type == XRefEntryType::InUse && e.offset > 0)
            .map(|(_, e)| e.offset)
            .min())
    }

    fn read_latest_revision(&mut self, device: &mut dyn InputDevice, current_eof: u64) -> Result<()> {
        let header = PdfHeader::detect(device)?;
        self.version = header.version;
        self.magic_offset = header.magic_offset;
        self.last_eof_offset = current_eof.min(device.len());

        self.enter(ParseStage::LocateStartXRef);
        self.xref_offset = self.locate_startxref(device)?;
        self.enter(ParseStage::ReadXRefChain);
        self.read_xref_chain(device, self.xref_offset, false)
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Offset of the last occurrence of `needle` that ends at or before `end`,
/// looking back at most `limit` bytes.
fn rfind_before(
    device: &mut dyn InputDevice,
    end: u64,
    limit: Option<u64>,
    needle: &[u8],
) -> Result<Option<u64>> {
    let floor = limit.map_or(0, |limit| end.saturating_sub(limit));
    let mut chunk_end = end;
    while chunk_end > floor {
        let chunk_start = chunk_end.saturating_sub(SCAN_CHUNK).max(floor);
        let read_end = (chunk_end + needle.len() as u64 - 1).min(end);
        device.seek(SeekFrom::Start(chunk_start))?;
        let buf = device.read_up_to((read_end - chunk_start) as usize)?;
        if let Some(index) = rfind(&buf, needle) {
            return Ok(Some(chunk_start + index as u64));
        }
        chunk_end = chunk_start;
    }
    Ok(None)
}
