//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+,
//! ISO 32000-1 Section 7.5.7). The container's decoded body starts with
//! `N` pairs of `object-number offset`, offsets relative to `/First`.

use super::device::{InputDevice, StreamDevice};
use super::lexer::{Token, Tokenizer};
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, ObjectId};
use std::collections::BTreeSet;
use std::io::{Cursor, SeekFrom};
use tracing::debug;

/// A decoded object stream container
#[derive(Debug)]
pub struct ObjectStream {
    container: ObjectId,
    /// `(object number, absolute offset into data)` in header order
    members: Vec<(u32, u64)>,
    data: Vec<u8>,
}

impl ObjectStream {
    /// Read the header of a decoded container body
    pub fn parse(container: ObjectId, dict: &Dictionary, data: Vec<u8>) -> Result<Self> {
        let invalid = |reason: &str| PdfError::InvalidObject {
            id: container,
            offset: 0,
            reason: reason.to_string(),
        };

        let n = dict
            .get_integer("N")
            .filter(|&n| n >= 0)
            .ok_or_else(|| invalid("object stream without a valid /N"))?;
        let first = dict
            .get_integer("First")
            .filter(|&n| n >= 0)
            .ok_or_else(|| invalid("object stream without a valid /First"))?
            as u64;

        let mut device = StreamDevice::new(Cursor::new(data))?;
        let mut tokenizer = Tokenizer::new();
        let mut members = Vec::with_capacity(n.min(4096) as usize);
        for _ in 0..n {
            let number = read_u32(&mut tokenizer, &mut device)
                .ok_or_else(|| invalid("Expected object number in object stream"))?;
            let offset = read_u32(&mut tokenizer, &mut device)
                .ok_or_else(|| invalid("Expected offset in object stream"))?;
            members.push((number, first + u64::from(offset)));
        }

        Ok(Self {
            container,
            members,
            data: device.into_inner().into_inner(),
        })
    }

    pub fn container(&self) -> ObjectId {
        self.container
    }

    /// Object numbers listed in the header
    pub fn member_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().map(|&(number, _)| number)
    }

    /// Read the members whose numbers are in `wanted`; every member gets
    /// generation 0. Numbers the header lists but `wanted` lacks belong to
    /// another revision and are skipped.
    pub fn read_objects(
        &self,
        wanted: &BTreeSet<u32>,
        tokenizer: &mut Tokenizer,
    ) -> Result<Vec<IndirectObject>> {
        let mut device = StreamDevice::new(Cursor::new(self.data.as_slice()))?;
        let mut objects = Vec::new();
        for &(number, offset) in &self.members {
            if !wanted.contains(&number) {
                debug!(container = %self.container, object = number, "Skipping superseded compressed object");
                continue;
            }
            device.seek(SeekFrom::Start(offset))?;
            let value = tokenizer
                .read_next_value(&mut device)
                .map_err(|e| PdfError::InvalidObject {
                    id: ObjectId::new(number, 0),
                    offset,
                    reason: format!("in object stream {}: {e}", self.container),
                })?;
            objects.push(IndirectObject::new(ObjectId::new(number, 0), value));
        }
        Ok(objects)
    }
}

fn read_u32(tokenizer: &mut Tokenizer, device: &mut dyn InputDevice) -> Option<u32> {
    match tokenizer.try_read_next_token(device).ok()?? {
        Token::Integer(n) => u32::try_from(n).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Object;

    fn container(n: i64, first: i64) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("ObjStm"));
        dict.set("N", n);
        dict.set("First", first);
        dict
    }

    #[test]
    fn test_read_members() {
        let header = b"10 0 11 14 ";
        let body = b"<< /A 1 >>    [ 1 2 3 ] ";
        let mut data = header.to_vec();
        data.extend_from_slice(body);

        let stream = ObjectStream::parse(ObjectId::new(20, 0), &container(2, header.len() as i64), data)
            .unwrap();
        assert_eq!(stream.member_numbers().collect::<Vec<_>>(), vec![10, 11]);

        let wanted: BTreeSet<u32> = [10, 11].into_iter().collect();
        let objects = stream.read_objects(&wanted, &mut Tokenizer::new()).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].id(), ObjectId::new(10, 0));
        assert_eq!(objects[0].dict().and_then(|d| d.get_integer("A")), Some(1));
        assert_eq!(
            objects[1].value(),
            &Object::Array(vec![1.into(), 2.into(), 3.into()])
        );
    }

    #[test]
    fn test_unwanted_members_are_skipped() {
        let data = b"1 0 2 2 7 (x)".to_vec();
        let stream = ObjectStream::parse(ObjectId::new(5, 0), &container(2, 8), data).unwrap();
        let wanted: BTreeSet<u32> = [2].into_iter().collect();
        let objects = stream.read_objects(&wanted, &mut Tokenizer::new()).unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects[0].value().as_string().is_some());
    }

    #[test]
    fn test_malformed_header() {
        let mut dict = container(2, 4);
        assert!(ObjectStream::parse(ObjectId::new(5, 0), &dict, b"1 0".to_vec()).is_err());

        dict.remove("First");
        assert!(matches!(
            ObjectStream::parse(ObjectId::new(5, 0), &dict, b"1 0 2 3".to_vec()),
            Err(PdfError::InvalidObject { .. })
        ));
    }
}
