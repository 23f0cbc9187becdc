use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, Object, ObjectId, Stream, StreamSlot};
use crate::parser::{
    ParseOptions, Parser, PdfTrailer, PdfVersion, RevisionInfo, SecurityHandlerFactory,
    StreamDevice, XRefEntries,
};
use crate::store::IndirectObjectList;
use crate::writer::{self, PdfWriter};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, warn};

static NULL: Object = Object::Null;

/// Parser and device kept alive for deferred stream bodies and for a
/// pending password retry.
struct Source<R> {
    parser: Parser,
    device: StreamDevice<R>,
}

/// A PDF document: the object store plus the file-level facts the parser
/// found while building it.
///
/// # Example
///
/// ```rust,no_run
/// use pdfxref::{Document, ParseOptions};
///
/// # fn main() -> pdfxref::Result<()> {
/// let mut doc = Document::open("input.pdf", ParseOptions::default())?;
/// println!("PDF {} with {} objects", doc.version(), doc.objects().len());
///
/// let removed = doc.collect_garbage();
/// println!("{removed} unreachable objects dropped");
/// doc.save("output.pdf")?;
/// # Ok(())
/// # }
/// ```
pub struct Document<R = Cursor<Vec<u8>>> {
    store: IndirectObjectList,
    trailer: PdfTrailer,
    version: PdfVersion,
    incremental_updates: u32,
    entries: XRefEntries,
    revisions: Vec<RevisionInfo>,
    warnings: Vec<String>,
    magic_offset: u64,
    xref_offset: u64,
    last_eof_offset: u64,
    has_xref_stream: bool,
    encrypted: bool,
    locked: bool,
    loaded_free: BTreeSet<ObjectId>,
    source: Option<Source<R>>,
}

impl Document {
    /// A fresh document with an empty catalog
    pub fn new(version: PdfVersion) -> Self {
        let mut store = IndirectObjectList::new();
        let mut trailer = Dictionary::new();
        // a store this small cannot run out of object numbers
        if let Ok(root) = store.create_dictionary_object(Some("Catalog"), None) {
            trailer.set("Root", root);
        }
        Self::empty(store, PdfTrailer::new(trailer), version)
    }

    /// Load a document held in memory
    pub fn from_bytes(data: Vec<u8>, options: ParseOptions) -> Result<Self> {
        Self::load(Cursor::new(data), options)
    }
}

impl Document<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, options: ParseOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::load(BufReader::new(file), options)
    }
}

impl<R> Document<R> {
    fn empty(store: IndirectObjectList, trailer: PdfTrailer, version: PdfVersion) -> Self {
        Self {
            store,
            trailer,
            version,
            incremental_updates: 0,
            entries: XRefEntries::new(),
            revisions: Vec::new(),
            warnings: Vec::new(),
            magic_offset: 0,
            xref_offset: 0,
            last_eof_offset: 0,
            has_xref_stream: false,
            encrypted: false,
            locked: false,
            loaded_free: BTreeSet::new(),
            source: None,
        }
    }

    pub fn objects(&self) -> &IndirectObjectList {
        &self.store
    }

    /// Mutable store access; objects changed through
    /// [`IndirectObjectList::get_object_mut`] are picked up by
    /// [`write_incremental_update`](Self::write_incremental_update).
    pub fn objects_mut(&mut self) -> &mut IndirectObjectList {
        &mut self.store
    }

    pub fn trailer(&self) -> &PdfTrailer {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut PdfTrailer {
        &mut self.trailer
    }

    pub fn version(&self) -> PdfVersion {
        self.version
    }

    pub fn set_version(&mut self, version: PdfVersion) {
        self.version = version;
    }

    /// Number of `/Prev` links followed while loading
    pub fn incremental_updates(&self) -> u32 {
        self.incremental_updates
    }

    pub fn xref_entries(&self) -> &XRefEntries {
        &self.entries
    }

    /// Cross-reference sections, newest first
    pub fn revisions(&self) -> &[RevisionInfo] {
        &self.revisions
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn magic_offset(&self) -> u64 {
        self.magic_offset
    }

    /// Offset of the newest cross-reference section
    pub fn xref_offset(&self) -> u64 {
        self.xref_offset
    }

    pub fn last_eof_offset(&self) -> u64 {
        self.last_eof_offset
    }

    pub fn has_xref_stream(&self) -> bool {
        self.has_xref_stream
    }

    /// Loaded from an encrypted file
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Waiting for [`retry_password`](Self::retry_password); the store is
    /// empty until then.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Free-list entries as they were right after loading
    pub(crate) fn loaded_free_objects(&self) -> &BTreeSet<ObjectId> {
        &self.loaded_free
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&IndirectObject> {
        self.store.get_object(id)
    }

    /// Follow references until a direct value. A dangling reference
    /// resolves to `null`.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        let mut current = obj;
        let mut seen = HashSet::new();
        while let Object::Reference(id) = current {
            if !seen.insert(*id) {
                return Err(PdfError::InvalidObject {
                    id: *id,
                    offset: 0,
                    reason: "reference chain loops back on itself".to_string(),
                });
            }
            current = match self.store.get_object(*id) {
                Some(target) => target.value(),
                None => {
                    debug!(object = %id, "Dangling reference resolves to null");
                    return Ok(&NULL);
                }
            };
        }
        Ok(current)
    }

    /// The document catalog (`/Root`)
    pub fn catalog(&self) -> Result<&Dictionary> {
        let root = self.trailer.root().ok_or(PdfError::InvalidTrailer)?;
        let obj = self.store.must_get_object(root)?;
        obj.dict().ok_or_else(|| PdfError::InvalidObject {
            id: root,
            offset: obj.offset().unwrap_or(0),
            reason: format!("catalog is a {}", obj.value().type_name()),
        })
    }

    /// Drop every object the trailer cannot reach. Returns how many were
    /// removed.
    pub fn collect_garbage(&mut self) -> usize {
        let root = Object::Dictionary(self.trailer.dict().clone());
        self.store.collect_garbage(Some(&root))
    }

    /// Write the whole document to `writer`, loading deferred streams first
    pub fn save_to<W: Write>(&mut self, writer: W) -> Result<()>
    where
        R: Read + Seek,
    {
        self.load_all_streams()?;
        let mut pdf = PdfWriter::new_with_writer(writer);
        pdf.write_document(self)
    }

    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()>
    where
        R: Read + Seek,
    {
        self.load_all_streams()?;
        let mut pdf = PdfWriter::new(path)?;
        pdf.write_document(self)
    }

    /// Append the objects changed since loading to `original`, the bytes
    /// this document was loaded from.
    pub fn write_incremental_update(&mut self, original: &[u8]) -> Result<Vec<u8>>
    where
        R: Read + Seek,
    {
        self.load_all_streams()?;
        writer::write_incremental_update(original, self)
    }
}

impl<R: Read + Seek> Document<R> {
    /// Parse a document from `reader`. Encrypted files fail with
    /// [`PdfError::UnsupportedEncryption`]; use
    /// [`load_with_password`](Self::load_with_password) for those.
    pub fn load(reader: R, options: ParseOptions) -> Result<Self> {
        Self::load_inner(reader, options, None, "")
    }

    /// Parse a possibly encrypted document. A wrong password does not
    /// fail the load: the document comes back locked and
    /// [`retry_password`](Self::retry_password) continues from there.
    pub fn load_with_password(
        reader: R,
        options: ParseOptions,
        security: Box<dyn SecurityHandlerFactory>,
        password: &str,
    ) -> Result<Self> {
        Self::load_inner(reader, options, Some(security), password)
    }

    fn load_inner(
        reader: R,
        options: ParseOptions,
        security: Option<Box<dyn SecurityHandlerFactory>>,
        password: &str,
    ) -> Result<Self> {
        let lazy = options.load_on_demand;
        let mut device = StreamDevice::new(reader)?;
        let mut parser = Parser::new(options);
        if let Some(factory) = security {
            parser = parser.with_security_handler_factory(factory);
        }
        parser.set_password(password);

        let mut store = IndirectObjectList::new();
        let locked = match parser.parse(&mut device, &mut store) {
            Ok(()) => false,
            Err(PdfError::InvalidPassword) => {
                warn!("Password rejected, document is locked");
                true
            }
            Err(e) => return Err(e),
        };

        let mut doc = Self::empty(store, PdfTrailer::default(), PdfVersion::default());
        doc.locked = locked;
        doc.sync_from(&parser);
        if locked || lazy {
            doc.source = Some(Source { parser, device });
        }
        Ok(doc)
    }

    fn sync_from(&mut self, parser: &Parser) {
        self.trailer = parser.trailer().cloned().unwrap_or_default();
        self.version = parser.version();
        self.incremental_updates = parser.incremental_updates();
        self.entries = parser.xref_entries().clone();
        self.revisions = parser.revisions().to_vec();
        self.warnings = parser.warnings().to_vec();
        self.magic_offset = parser.magic_offset();
        self.xref_offset = parser.xref_offset();
        self.last_eof_offset = parser.last_eof_offset();
        self.has_xref_stream = parser.has_xref_stream();
        self.encrypted = parser.is_encrypted();
        self.loaded_free = self.store.free_objects().collect();
    }

    /// Try another password on a locked document
    pub fn retry_password(&mut self, password: &str) -> Result<()> {
        if !self.locked {
            return Err(PdfError::InternalLogic("document is not locked".to_string()));
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| PdfError::InternalLogic("document has no source".to_string()))?;

        match source
            .parser
            .retry_with_password(&mut source.device, &mut self.store, password)
        {
            Ok(()) => {
                self.locked = false;
                self.sync_from(&source.parser);
                if source.parser.options().load_on_demand {
                    self.source = Some(source);
                }
                Ok(())
            }
            Err(PdfError::InvalidPassword) => {
                self.source = Some(source);
                Err(PdfError::InvalidPassword)
            }
            Err(e) => {
                self.locked = false;
                Err(e)
            }
        }
    }

    /// Read the stream body of `id` if it is still on disk
    pub fn load_stream(&mut self, id: ObjectId) -> Result<Option<&Stream>> {
        let deferred = matches!(
            self.store.must_get_object(id)?.stream_slot(),
            StreamSlot::Deferred { .. }
        );
        if deferred {
            let source = self.source.as_mut().ok_or_else(|| {
                PdfError::InternalLogic(format!("stream of {id} is deferred but no source is open"))
            })?;
            source
                .parser
                .load_stream(&mut source.device, &mut self.store, id)?;
        }
        Ok(self.store.get_object(id).and_then(IndirectObject::stream))
    }

    fn load_all_streams(&mut self) -> Result<()> {
        let deferred: Vec<ObjectId> = self
            .store
            .iter()
            .filter(|obj| matches!(obj.stream_slot(), StreamSlot::Deferred { .. }))
            .map(IndirectObject::id)
            .collect();
        for id in deferred {
            self.load_stream(id)?;
        }
        Ok(())
    }
}

impl<R> std::fmt::Debug for Document<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("objects", &self.store.len())
            .field("incremental_updates", &self.incremental_updates)
            .field("encrypted", &self.encrypted)
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::{create_incremental_pdf, create_minimal_pdf, PdfBuilder};

    #[test]
    fn test_new_document_has_catalog() {
        let doc = Document::new(PdfVersion::V1_7);
        let catalog = doc.catalog().unwrap();
        assert!(catalog.is_type("Catalog"));
        assert_eq!(doc.objects().len(), 1);
        assert_eq!(doc.incremental_updates(), 0);
        assert!(!doc.is_locked());
    }

    #[test]
    fn test_load_from_bytes() {
        let doc = Document::from_bytes(create_incremental_pdf(), ParseOptions::default()).unwrap();
        assert_eq!(doc.version(), PdfVersion::V1_4);
        assert_eq!(doc.incremental_updates(), 2);
        assert_eq!(doc.revisions().len(), 3);
        assert!(doc.catalog().unwrap().is_type("Catalog"));
    }

    #[test]
    fn test_resolve_follows_references() {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.object(1, 0, "<< /Type /Catalog /Next 2 0 R /Gone 9 0 R >>")
            .object(2, 0, "3 0 R")
            .object(3, 0, "(end)");
        pdf.xref_table("/Root 1 0 R");
        let doc = Document::from_bytes(pdf.build(), ParseOptions::default()).unwrap();

        let catalog = doc.catalog().unwrap();
        let next = doc.resolve(catalog.get("Next").unwrap()).unwrap();
        assert_eq!(next.as_string().map(|s| s.as_bytes()), Some(&b"end"[..]));
        assert!(doc.resolve(catalog.get("Gone").unwrap()).unwrap().is_null());

        let direct = Object::Integer(5);
        assert_eq!(doc.resolve(&direct).unwrap(), &direct);
    }

    #[test]
    fn test_resolve_detects_loops() {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.object(1, 0, "<< /Type /Catalog >>")
            .object(2, 0, "3 0 R")
            .object(3, 0, "2 0 R");
        pdf.xref_table("/Root 1 0 R");
        let doc = Document::from_bytes(pdf.build(), ParseOptions::default()).unwrap();
        assert!(doc.resolve(&Object::Reference(ObjectId::new(2, 0))).is_err());
    }

    #[test]
    fn test_collect_garbage_uses_trailer() {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>")
            .object(2, 0, "<< /Type /Pages >>")
            .object(3, 0, "(orphan)")
            .object(4, 0, "<< /Producer (x) >>");
        pdf.xref_table("/Root 1 0 R /Info 4 0 R");
        let mut doc = Document::from_bytes(pdf.build(), ParseOptions::default()).unwrap();

        assert_eq!(doc.collect_garbage(), 1);
        assert!(!doc.objects().contains(ObjectId::new(3, 0)));
        assert!(doc.objects().contains(ObjectId::new(4, 0)));
        assert_eq!(doc.collect_garbage(), 0);
    }

    #[test]
    fn test_lazy_document_loads_streams() {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.object(1, 0, "<< /Type /Catalog >>")
            .stream_object(2, "/Kind /Test", b"payload");
        pdf.xref_table("/Root 1 0 R");

        let options = ParseOptions {
            load_on_demand: true,
            ..ParseOptions::default()
        };
        let mut doc = Document::from_bytes(pdf.build(), options).unwrap();
        let id = ObjectId::new(2, 0);
        assert!(doc.get_object(id).unwrap().stream().is_none());
        assert_eq!(doc.load_stream(id).unwrap().unwrap().data(), b"payload");
        // loading again is a no-op
        assert_eq!(doc.load_stream(id).unwrap().unwrap().data(), b"payload");
    }

    #[test]
    fn test_retry_password_requires_lock() {
        let mut doc = Document::from_bytes(create_minimal_pdf(), ParseOptions::default()).unwrap();
        assert!(matches!(
            doc.retry_password("x"),
            Err(PdfError::InternalLogic(_))
        ));
    }
}
