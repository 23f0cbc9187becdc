//! Lazy indirect object reader
//!
//! Reads `N G obj <value> [stream ... endstream] endobj` from a device
//! offset recorded in the cross-reference table. The value is parsed on
//! first request; stream bodies are read separately so that a `/Length`
//! pointing at another indirect object can be resolved once that object
//! is in the store.

use super::device::InputDevice;
use super::encryption_handler::EncryptSession;
use super::lexer::{Token, Tokenizer};
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, Object, ObjectId, StreamSlot};
use crate::store::IndirectObjectList;
use std::io::SeekFrom;
use tracing::{debug, warn};

const SCAN_CHUNK: usize = 4096;

/// What the object reader needs from the surrounding parse session
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadContext<'a> {
    pub encrypt: Option<&'a EncryptSession>,
    /// Recover a missing or wrong `/Length` by scanning for `endstream`
    pub lenient_streams: bool,
}

/// Where a stream's `/Length` may come from
#[derive(Clone, Copy)]
pub enum StreamLength<'a> {
    /// Only a direct integer counts; anything else is scanned for
    Direct,
    /// Indirect lengths are looked up in the store
    Resolve(&'a IndirectObjectList),
}

/// An indirect object at a known offset whose value is read on demand
#[derive(Debug, Clone)]
pub struct ParserObject {
    id: ObjectId,
    offset: u64,
    value: Option<Object>,
    stream_offset: Option<u64>,
}

impl ParserObject {
    pub fn new(id: ObjectId, offset: u64) -> Self {
        Self {
            id,
            offset,
            value: None,
            stream_offset: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_loaded(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Object> {
        self.value.as_ref()
    }

    /// Position right after the `stream` keyword, if the object has one
    pub fn stream_offset(&self) -> Option<u64> {
        self.stream_offset
    }

    fn invalid(&self, reason: impl Into<String>) -> PdfError {
        PdfError::InvalidObject {
            id: self.id,
            offset: self.offset,
            reason: reason.into(),
        }
    }

    /// Parse header and value. Calling it again is a no-op.
    pub fn parse(
        &mut self,
        device: &mut dyn InputDevice,
        tokenizer: &mut Tokenizer,
        ctx: &ReadContext<'_>,
    ) -> Result<()> {
        if self.value.is_some() {
            return Ok(());
        }

        device.seek(SeekFrom::Start(self.offset))?;
        self.read_header(device, tokenizer)?;

        if let Some(token) = tokenizer.try_peek_next_token(device)? {
            if token.is_keyword("endobj") {
                tokenizer.read_next_token(device)?;
                debug!(object = %self.id, "Empty object");
                self.value = Some(Object::Null);
                return Ok(());
            }
        }

        let mut value = tokenizer.read_next_value(device).map_err(|e| match e {
            PdfError::Io(_) | PdfError::RecursionLimit { .. } => e,
            other => self.invalid(other.to_string()),
        })?;

        match tokenizer.try_read_next_token(device)? {
            Some(token) if token.is_keyword("endobj") => {}
            Some(token) if token.is_keyword("stream") && value.as_dict().is_some() => {
                self.stream_offset = Some(device.position());
            }
            Some(token) => {
                return Err(self.invalid(format!(
                    "Expected 'endobj' or 'stream', found {token:?}"
                )))
            }
            None => return Err(self.invalid("Expected 'endobj' or 'stream', found EOF")),
        }

        if let Some(session) = ctx.encrypt {
            if should_decrypt_object(session, self.id, &value) {
                decrypt_strings(session, self.id, &mut value)?;
            }
        }

        self.value = Some(value);
        Ok(())
    }

    fn read_header(&self, device: &mut dyn InputDevice, tokenizer: &mut Tokenizer) -> Result<()> {
        let number = tokenizer
            .read_next_number(device)
            .map_err(|_| self.invalid("Object number not found"))?;
        let generation = tokenizer
            .read_next_number(device)
            .map_err(|_| self.invalid("Generation number not found"))?;

        match tokenizer.try_read_next_token(device)? {
            Some(token) if token.is_keyword("obj") => {}
            _ => return Err(self.invalid("Next token is not 'obj'")),
        }

        if number != i64::from(self.id.number()) || generation != i64::from(self.id.generation()) {
            warn!(
                expected = %self.id,
                found_number = number,
                found_generation = generation,
                "Object header does not match the cross-reference entry"
            );
        }
        Ok(())
    }

    /// Convert into a store entry. The stream body, if any, stays
    /// deferred until [`load_stream_body`] reads it.
    pub fn into_indirect(self) -> Result<IndirectObject> {
        let value = self
            .value
            .ok_or_else(|| PdfError::InternalLogic(format!("object {} was never parsed", self.id)))?;
        let mut obj = IndirectObject::new(self.id, value);
        obj.set_offset(self.offset);
        if let Some(offset) = self.stream_offset {
            obj.set_stream_slot(StreamSlot::Deferred { offset });
        }
        Ok(obj)
    }
}

/// Whether strings and streams of this object go through the session.
/// The encryption dictionary and cross-reference streams never do.
pub(crate) fn should_decrypt_object(session: &EncryptSession, id: ObjectId, value: &Object) -> bool {
    if session.encrypt_object() == Some(id) {
        return false;
    }
    !value.as_dict().is_some_and(|dict| dict.is_type("XRef"))
}

fn should_decrypt_stream(session: &EncryptSession, dict: &Dictionary) -> bool {
    !(dict.is_type("Metadata") && !session.is_metadata_encrypted())
}

/// Replace every string inside `value` by its decrypted bytes
pub(crate) fn decrypt_strings(
    session: &EncryptSession,
    id: ObjectId,
    value: &mut Object,
) -> Result<()> {
    let mut pending = vec![value];
    while let Some(obj) = pending.pop() {
        match obj {
            Object::String(s) => {
                let plain = session.decrypt(id, s.as_bytes())?;
                s.set_bytes(plain);
            }
            Object::Array(items) => pending.extend(items.iter_mut()),
            Object::Dictionary(dict) => pending.extend(dict.values_mut()),
            _ => {}
        }
    }
    Ok(())
}

/// Skip the blanks after `stream` and the single EOL that must follow;
/// returns where the data starts.
fn stream_data_start(device: &mut dyn InputDevice, stream_offset: u64) -> Result<u64> {
    device.seek(SeekFrom::Start(stream_offset))?;
    while matches!(device.peek()?, Some(b' ') | Some(b'\t')) {
        device.read_byte()?;
    }
    match device.peek()? {
        Some(b'\r') => {
            device.read_byte()?;
            if device.peek()? == Some(b'\n') {
                device.read_byte()?;
            }
        }
        Some(b'\n') => {
            device.read_byte()?;
        }
        _ => {}
    }
    Ok(device.position())
}

fn declared_length(dict: &Dictionary, length: StreamLength<'_>) -> Option<i64> {
    match dict.get("Length")? {
        Object::Integer(n) => Some(*n),
        Object::Reference(id) => match length {
            StreamLength::Direct => None,
            StreamLength::Resolve(store) => store.get_object(*id)?.value().as_integer(),
        },
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Offset of the first `endstream` or `endobj` at or after `start`
fn find_stream_end(device: &mut dyn InputDevice, start: u64) -> Result<Option<u64>> {
    const KEYWORDS: [&[u8]; 2] = [b"endstream", b"endobj"];
    let overlap = KEYWORDS.iter().map(|k| k.len()).max().unwrap_or(0) - 1;

    let mut pos = start;
    loop {
        device.seek(SeekFrom::Start(pos))?;
        let chunk = device.read_up_to(SCAN_CHUNK + overlap)?;
        let hit = KEYWORDS
            .iter()
            .filter_map(|keyword| find(&chunk, keyword))
            .min();
        if let Some(index) = hit {
            return Ok(Some(pos + index as u64));
        }
        if chunk.len() <= overlap {
            return Ok(None);
        }
        pos += SCAN_CHUNK as u64;
    }
}

fn strip_trailing_eol(data: &mut Vec<u8>) {
    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data.truncate(data.len() - 1);
    }
}

fn followed_by_endstream(device: &mut dyn InputDevice, tokenizer: &mut Tokenizer) -> bool {
    matches!(
        tokenizer.try_read_next_token(device),
        Ok(Some(Token::Keyword(ref k))) if k == "endstream"
    )
}

/// Read the raw (still encoded) body of the stream of `id`.
///
/// With [`StreamLength::Direct`] or `lenient` set, a missing or wrong
/// `/Length` is recovered by scanning for the closing keyword.
pub fn read_stream_body(
    device: &mut dyn InputDevice,
    tokenizer: &mut Tokenizer,
    id: ObjectId,
    dict: &Dictionary,
    stream_offset: u64,
    length: StreamLength<'_>,
    lenient: bool,
) -> Result<Vec<u8>> {
    let start = stream_data_start(device, stream_offset)?;
    let recover = lenient || matches!(length, StreamLength::Direct);

    let declared = declared_length(dict, length)
        .filter(|&n| n >= 0 && start.saturating_add(n as u64) <= device.len());

    if let Some(len) = declared {
        device.seek(SeekFrom::Start(start))?;
        let data = device.read_up_to(len as usize)?;
        if !recover || followed_by_endstream(device, tokenizer) {
            return Ok(data);
        }
        debug!(object = %id, length = len, "Stream /Length does not end at endstream, scanning");
    } else if !recover {
        return Err(PdfError::InvalidStream {
            id,
            reason: "Invalid stream length".to_string(),
        });
    }

    let end = find_stream_end(device, start)?.ok_or_else(|| PdfError::InvalidStream {
        id,
        reason: "endstream not found".to_string(),
    })?;
    device.seek(SeekFrom::Start(start))?;
    let mut data = device.read_up_to((end - start) as usize)?;
    strip_trailing_eol(&mut data);
    warn!(object = %id, recovered = data.len(), "Recovered stream length by scanning for endstream");
    Ok(data)
}

/// Move the cursor past the stream body without buffering it. Only a
/// direct `/Length` is used. Returns the position after the body.
pub fn skip_stream_body(
    device: &mut dyn InputDevice,
    id: ObjectId,
    dict: &Dictionary,
    stream_offset: u64,
) -> Result<u64> {
    let start = stream_data_start(device, stream_offset)?;
    let len = declared_length(dict, StreamLength::Direct)
        .filter(|&n| n >= 0)
        .ok_or_else(|| PdfError::InvalidStream {
            id,
            reason: "Invalid stream length".to_string(),
        })?;
    let end = start.saturating_add(len as u64);
    if end > device.len() {
        return Err(PdfError::InvalidStream {
            id,
            reason: format!("stream runs past end of file ({end} > {})", device.len()),
        });
    }
    device.seek(SeekFrom::Start(end))
}

/// Decrypt a stream body read from the file, honouring the metadata
/// exemption.
pub fn decrypt_stream_body(
    ctx: &ReadContext<'_>,
    id: ObjectId,
    value: &Object,
    data: Vec<u8>,
) -> Result<Vec<u8>> {
    let (Some(session), Some(dict)) = (ctx.encrypt, value.as_dict()) else {
        return Ok(data);
    };
    if should_decrypt_object(session, id, value) && should_decrypt_stream(session, dict) {
        session.decrypt(id, &data)
    } else {
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::device::StreamDevice;
    use crate::parser::encryption_handler::test_support::{xor, XorHandler};
    use crate::parser::encryption_handler::{EncryptSession, EncryptionInfo};
    use crate::objects::PdfString;
    use std::io::Cursor;

    fn device(data: &[u8]) -> StreamDevice<Cursor<Vec<u8>>> {
        StreamDevice::new(Cursor::new(data.to_vec())).unwrap()
    }

    fn parse(data: &[u8], id: ObjectId) -> Result<ParserObject> {
        let mut dev = device(data);
        let mut obj = ParserObject::new(id, 0);
        obj.parse(&mut dev, &mut Tokenizer::new(), &ReadContext::default())?;
        Ok(obj)
    }

    #[test]
    fn test_parse_simple_object() {
        let obj = parse(b"3 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n", ObjectId::new(3, 0))
            .unwrap();
        assert!(obj.is_loaded());
        let dict = obj.value().and_then(Object::as_dict).unwrap();
        assert!(dict.is_type("Catalog"));
        assert_eq!(dict.get_reference("Pages"), Some(ObjectId::new(2, 0)));
        assert_eq!(obj.stream_offset(), None);

        let indirect = obj.into_indirect().unwrap();
        assert_eq!(indirect.offset(), Some(0));
        assert!(!indirect.has_stream());
    }

    #[test]
    fn test_empty_object_is_null() {
        let obj = parse(b"4 0 obj endobj", ObjectId::new(4, 0)).unwrap();
        assert_eq!(obj.value(), Some(&Object::Null));
    }

    #[test]
    fn test_header_mismatch_is_tolerated() {
        let obj = parse(b"9 0 obj 42 endobj", ObjectId::new(4, 0)).unwrap();
        assert_eq!(obj.id(), ObjectId::new(4, 0));
        assert_eq!(obj.value(), Some(&Object::Integer(42)));
    }

    #[test]
    fn test_bad_framing() {
        assert!(matches!(
            parse(b"4 0 xyz 1 endobj", ObjectId::new(4, 0)),
            Err(PdfError::InvalidObject { .. })
        ));
        assert!(matches!(
            parse(b"4 0 obj 1 2 3", ObjectId::new(4, 0)),
            Err(PdfError::InvalidObject { .. })
        ));
        // only a dictionary can carry a stream
        assert!(matches!(
            parse(b"4 0 obj [1] stream\nabc\nendstream endobj", ObjectId::new(4, 0)),
            Err(PdfError::InvalidObject { .. })
        ));
        assert!(matches!(
            parse(b"garbage", ObjectId::new(4, 0)),
            Err(PdfError::InvalidObject { .. })
        ));
    }

    #[test]
    fn test_stream_with_direct_length() {
        let data = b"5 0 obj\n<< /Length 5 >>\nstream\r\nhello\nendstream\nendobj\n";
        let mut dev = device(data);
        let mut tokenizer = Tokenizer::new();
        let mut obj = ParserObject::new(ObjectId::new(5, 0), 0);
        obj.parse(&mut dev, &mut tokenizer, &ReadContext::default()).unwrap();

        let stream_offset = obj.stream_offset().unwrap();
        let dict = obj.value().and_then(Object::as_dict).unwrap().clone();
        let body = read_stream_body(
            &mut dev,
            &mut tokenizer,
            obj.id(),
            &dict,
            stream_offset,
            StreamLength::Direct,
            false,
        )
        .unwrap();
        assert_eq!(body, b"hello");

        let end = skip_stream_body(&mut dev, obj.id(), &dict, stream_offset).unwrap();
        assert_eq!(&data[end as usize..end as usize + 10], b"\nendstream");

        let indirect = obj.into_indirect().unwrap();
        assert_eq!(
            indirect.stream_slot(),
            &StreamSlot::Deferred {
                offset: stream_offset
            }
        );
    }

    #[test]
    fn test_indirect_length_needs_store() {
        let data = b"5 0 obj\n<< /Length 6 0 R >>\nstream\nabc\nendstream\nendobj\n";
        let mut dev = device(data);
        let mut tokenizer = Tokenizer::new();
        let mut obj = ParserObject::new(ObjectId::new(5, 0), 0);
        obj.parse(&mut dev, &mut tokenizer, &ReadContext::default()).unwrap();
        let offset = obj.stream_offset().unwrap();
        let dict = obj.value().and_then(Object::as_dict).unwrap().clone();

        let empty = IndirectObjectList::new();
        assert!(matches!(
            read_stream_body(
                &mut dev,
                &mut tokenizer,
                obj.id(),
                &dict,
                offset,
                StreamLength::Resolve(&empty),
                false
            ),
            Err(PdfError::InvalidStream { .. })
        ));

        let mut store = IndirectObjectList::new();
        store.push_object(IndirectObject::new(ObjectId::new(6, 0), Object::Integer(3)));
        let body = read_stream_body(
            &mut dev,
            &mut tokenizer,
            obj.id(),
            &dict,
            offset,
            StreamLength::Resolve(&store),
            false,
        )
        .unwrap();
        assert_eq!(body, b"abc");

        assert!(skip_stream_body(&mut dev, obj.id(), &dict, offset).is_err());
    }

    #[test]
    fn test_lenient_length_recovery() {
        let data = b"5 0 obj\n<< /Length 999 >>\nstream\nabcdef\r\nendstream\nendobj\n";
        let mut dev = device(data);
        let mut tokenizer = Tokenizer::new();
        let mut obj = ParserObject::new(ObjectId::new(5, 0), 0);
        obj.parse(&mut dev, &mut tokenizer, &ReadContext::default()).unwrap();
        let offset = obj.stream_offset().unwrap();
        let dict = obj.value().and_then(Object::as_dict).unwrap().clone();
        let store = IndirectObjectList::new();

        assert!(read_stream_body(
            &mut dev,
            &mut tokenizer,
            obj.id(),
            &dict,
            offset,
            StreamLength::Resolve(&store),
            false
        )
        .is_err());

        let body = read_stream_body(
            &mut dev,
            &mut tokenizer,
            obj.id(),
            &dict,
            offset,
            StreamLength::Resolve(&store),
            true,
        )
        .unwrap();
        assert_eq!(body, b"abcdef");
    }

    #[test]
    fn test_short_length_is_rescanned() {
        let data = b"1 0 obj << /Length 2 >> stream\nabcdef\nendstream endobj";
        let mut dev = device(data);
        let mut tokenizer = Tokenizer::new();
        let mut obj = ParserObject::new(ObjectId::new(1, 0), 0);
        obj.parse(&mut dev, &mut tokenizer, &ReadContext::default()).unwrap();
        let dict = obj.value().and_then(Object::as_dict).unwrap().clone();
        let body = read_stream_body(
            &mut dev,
            &mut tokenizer,
            obj.id(),
            &dict,
            obj.stream_offset().unwrap(),
            StreamLength::Direct,
            false,
        )
        .unwrap();
        assert_eq!(body, b"abcdef");
    }

    #[test]
    fn test_strings_and_streams_are_decrypted() {
        let id = ObjectId::new(7, 0);
        let mut session = EncryptSession::new(
            Box::new(XorHandler {
                password: "pw".into(),
                key: None,
            }),
            EncryptionInfo {
                filter: "Standard".into(),
                v: 1,
                r: None,
                length: None,
                encrypt_metadata: false,
            },
            Some(ObjectId::new(9, 0)),
        );
        session.authenticate("pw", b"A");
        let key = b'A' ^ b'p' ^ b'w';

        let secret = xor(key, id, b"Hello");
        let mut data = b"7 0 obj << /Title <".to_vec();
        data.extend(secret.iter().map(|b| format!("{b:02X}")).collect::<String>().bytes());
        data.extend_from_slice(b"> >> endobj");

        let mut dev = device(&data);
        let ctx = ReadContext {
            encrypt: Some(&session),
            lenient_streams: false,
        };
        let mut obj = ParserObject::new(id, 0);
        obj.parse(&mut dev, &mut Tokenizer::new(), &ctx).unwrap();
        let title = obj
            .value()
            .and_then(Object::as_dict)
            .and_then(|d| d.get("Title"))
            .and_then(Object::as_string)
            .unwrap();
        assert_eq!(title.as_bytes(), b"Hello");

        let mut stream_dict = Dictionary::new();
        stream_dict.set("Length", 3);
        let plain = decrypt_stream_body(&ctx, id, &Object::Dictionary(stream_dict.clone()), xor(key, id, b"abc"))
            .unwrap();
        assert_eq!(plain, b"abc");

        // metadata is exempt when EncryptMetadata is false
        stream_dict.set("Type", Object::name("Metadata"));
        let raw = decrypt_stream_body(&ctx, id, &Object::Dictionary(stream_dict), b"xyz".to_vec())
            .unwrap();
        assert_eq!(raw, b"xyz");

        // the encryption dictionary itself is never decrypted
        let mut encrypt = Object::Dictionary(
            [("O".to_string(), Object::String(PdfString::new(b"raw".to_vec())))]
                .into_iter()
                .collect(),
        );
        assert!(!should_decrypt_object(&session, ObjectId::new(9, 0), &encrypt));
        decrypt_strings(&session, ObjectId::new(3, 0), &mut encrypt).unwrap();
        assert_ne!(
            encrypt.as_dict().and_then(|d| d.get("O")).and_then(Object::as_string).map(|s| s.as_bytes()),
            Some(&b"raw"[..])
        );
    }
}
