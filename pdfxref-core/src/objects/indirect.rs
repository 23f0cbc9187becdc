use crate::objects::{Dictionary, Object, ObjectId, Stream};

/// Where an object's stream body currently is.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StreamSlot {
    /// Plain object, no stream attached
    #[default]
    None,
    /// Body read into memory
    Loaded(Stream),
    /// Body not read yet; lives at this device offset
    Deferred { offset: u64 },
}

/// An object registered in the store under an [`ObjectId`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    id: ObjectId,
    value: Object,
    stream: StreamSlot,
    dirty: bool,
    offset: Option<u64>,
}

impl IndirectObject {
    pub fn new(id: ObjectId, value: Object) -> Self {
        Self {
            id,
            value,
            stream: StreamSlot::None,
            dirty: false,
            offset: None,
        }
    }

    pub fn with_stream(id: ObjectId, dict: Dictionary, stream: Stream) -> Self {
        Self {
            id,
            value: Object::Dictionary(dict),
            stream: StreamSlot::Loaded(stream),
            dirty: false,
            offset: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn value(&self) -> &Object {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Object {
        &mut self.value
    }

    pub fn dict(&self) -> Option<&Dictionary> {
        self.value.as_dict()
    }

    pub fn has_stream(&self) -> bool {
        !matches!(self.stream, StreamSlot::None)
    }

    pub fn stream_slot(&self) -> &StreamSlot {
        &self.stream
    }

    /// The loaded stream body, if any
    pub fn stream(&self) -> Option<&Stream> {
        match &self.stream {
            StreamSlot::Loaded(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn stream_mut(&mut self) -> Option<&mut Stream> {
        match &mut self.stream {
            StreamSlot::Loaded(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn set_stream(&mut self, stream: Stream) {
        self.stream = StreamSlot::Loaded(stream);
    }

    pub(crate) fn set_stream_slot(&mut self, slot: StreamSlot) {
        self.stream = slot;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Byte offset the object was read from, when it came from a classic or
    /// xref-stream InUse entry.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// Every reference reachable from the value, without recursing into
    /// referenced objects.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut found = Vec::new();
        let mut pending = vec![&self.value];
        while let Some(obj) = pending.pop() {
            match obj {
                Object::Reference(id) => found.push(*id),
                Object::Array(items) => pending.extend(items.iter()),
                Object::Dictionary(dict) => pending.extend(dict.values()),
                _ => {}
            }
        }
        found
    }
}
