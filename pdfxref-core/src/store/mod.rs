//! Indirect object store
//!
//! Owns every materialized indirect object of a document, keyed by
//! [`ObjectId`] and kept in reference order. Also tracks the free list,
//! object numbers retired after generation exhaustion, and the object
//! numbers of compressed object-stream containers.

mod observer;

pub use observer::{ObserverId, StreamObserver};

use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObject, Object, ObjectId, Stream, StreamSlot};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Highest generation number; an entry reaching it is never reused (ISO 32000-1 7.5.4)
pub const MAX_GENERATION: u16 = 65535;

/// Default ceiling on object numbers (ISO 32000-1 Annex C)
pub const DEFAULT_MAX_OBJECT_COUNT: u32 = 8_388_607;

pub struct IndirectObjectList {
    objects: BTreeMap<ObjectId, IndirectObject>,
    free_objects: BTreeSet<ObjectId>,
    unavailable: BTreeSet<u32>,
    compressed_streams: BTreeSet<u32>,
    object_count: u32,
    max_object_count: u32,
    observers: Vec<(ObserverId, Box<dyn StreamObserver>)>,
    next_observer_id: u64,
}

impl Default for IndirectObjectList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IndirectObjectList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndirectObjectList")
            .field("objects", &self.objects.len())
            .field("free_objects", &self.free_objects)
            .field("unavailable", &self.unavailable)
            .field("compressed_streams", &self.compressed_streams)
            .field("object_count", &self.object_count)
            .finish()
    }
}

impl IndirectObjectList {
    pub fn new() -> Self {
        Self::with_max_object_count(DEFAULT_MAX_OBJECT_COUNT)
    }

    pub fn with_max_object_count(max_object_count: u32) -> Self {
        Self {
            objects: BTreeMap::new(),
            free_objects: BTreeSet::new(),
            unavailable: BTreeSet::new(),
            compressed_streams: BTreeSet::new(),
            object_count: 0,
            max_object_count,
            observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    /// Drop every object and all free-list/container bookkeeping
    pub fn clear(&mut self) {
        self.objects.clear();
        self.free_objects.clear();
        self.unavailable.clear();
        self.compressed_streams.clear();
        self.object_count = 0;
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Highest object number ever assigned or registered
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    pub fn max_object_count(&self) -> u32 {
        self.max_object_count
    }

    /// Objects in reference order
    pub fn iter(&self) -> impl Iterator<Item = &IndirectObject> {
        self.objects.values()
    }

    /// Free list in reference order; each entry carries the generation to
    /// use on reuse.
    pub fn free_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.free_objects.iter().copied()
    }

    pub fn is_unavailable(&self, number: u32) -> bool {
        self.unavailable.contains(&number)
    }

    pub fn is_compressed_object_stream(&self, number: u32) -> bool {
        self.compressed_streams.contains(&number)
    }

    pub fn compressed_object_streams(&self) -> impl Iterator<Item = u32> + '_ {
        self.compressed_streams.iter().copied()
    }

    pub fn add_compressed_object_stream(&mut self, number: u32) {
        self.compressed_streams.insert(number);
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&IndirectObject> {
        self.objects.get(&id)
    }

    pub fn must_get_object(&self, id: ObjectId) -> Result<&IndirectObject> {
        self.get_object(id).ok_or(PdfError::ObjectNotFound(id))
    }

    /// Mutable access; the object is marked dirty so an incremental
    /// update picks it up.
    pub fn get_object_mut(&mut self, id: ObjectId) -> Option<&mut IndirectObject> {
        let obj = self.objects.get_mut(&id)?;
        obj.set_dirty(true);
        Some(obj)
    }

    pub(crate) fn get_object_mut_clean(&mut self, id: ObjectId) -> Option<&mut IndirectObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Create a dictionary object with optional `/Type` and `/Subtype`
    pub fn create_dictionary_object(
        &mut self,
        type_name: Option<&str>,
        subtype: Option<&str>,
    ) -> Result<ObjectId> {
        let mut dict = Dictionary::new();
        if let Some(type_name) = type_name {
            dict.set("Type", Object::name(type_name));
        }
        if let Some(subtype) = subtype {
            dict.set("Subtype", Object::name(subtype));
        }
        self.create_object(Object::Dictionary(dict))
    }

    pub fn create_array_object(&mut self) -> Result<ObjectId> {
        self.create_object(Object::Array(Vec::new()))
    }

    /// Insert `value` under a fresh reference: the free-list head if there
    /// is one, else the next unused object number.
    pub fn create_object(&mut self, value: Object) -> Result<ObjectId> {
        let id = self.next_free_object()?;
        let mut obj = IndirectObject::new(id, value);
        obj.set_dirty(true);
        self.push_object(obj);
        Ok(id)
    }

    /// Like [`create_object`](Self::create_object) with a stream body attached
    pub fn create_stream_object(&mut self, dict: Dictionary, data: Vec<u8>) -> Result<ObjectId> {
        let id = self.next_free_object()?;
        let mut obj = IndirectObject::with_stream(id, dict, Stream::new(data));
        obj.set_dirty(true);
        self.push_object(obj);
        Ok(id)
    }

    fn next_free_object(&mut self) -> Result<ObjectId> {
        if let Some(id) = self.free_objects.pop_first() {
            return Ok(id);
        }

        let mut number = self.object_count.checked_add(1).ok_or_else(|| {
            PdfError::ValueOutOfRange("Reached the maximum number of indirect objects".into())
        })?;
        loop {
            if number > self.max_object_count {
                return Err(PdfError::ValueOutOfRange(
                    "Reached the maximum number of indirect objects".into(),
                ));
            }
            if !self.unavailable.contains(&number) {
                break;
            }
            number += 1;
        }
        Ok(ObjectId::new(number, 0))
    }

    /// Insert `obj`, replacing in place any object already stored under
    /// the same reference. Returns the replaced object.
    pub fn push_object(&mut self, obj: IndirectObject) -> Option<IndirectObject> {
        let id = obj.id();
        self.bump_object_count(id);
        self.objects.insert(id, obj)
    }

    /// Detach and return the object under `id`. With `mark_as_free` its
    /// number goes onto the free list with the generation bumped.
    pub fn remove_object(
        &mut self,
        id: ObjectId,
        mark_as_free: bool,
    ) -> Result<Option<IndirectObject>> {
        if !self.objects.contains_key(&id) {
            return Ok(None);
        }
        if self.compressed_streams.contains(&id.number()) {
            return Err(PdfError::InternalLogic(format!(
                "Can't remove compressed object stream {id}"
            )));
        }

        if mark_as_free {
            self.safe_add_free_object(id);
        }
        Ok(self.objects.remove(&id))
    }

    /// Free `id` the way a deleted entry is freed: the generation recorded
    /// on the free list is one above `id`'s. Returns that generation, or
    /// `None` if the number was retired instead.
    pub fn safe_add_free_object(&mut self, id: ObjectId) -> Option<u16> {
        self.try_add_free_object_with(id.number(), u32::from(id.generation()) + 1)
    }

    /// Put `id` on the free list with its generation as given. Fails when
    /// the generation has reached the cap, in which case the object number
    /// is retired.
    pub fn try_add_free_object(&mut self, id: ObjectId) -> bool {
        self.try_add_free_object_with(id.number(), u32::from(id.generation()))
            .is_some()
    }

    fn try_add_free_object_with(&mut self, number: u32, generation: u32) -> Option<u16> {
        if generation >= u32::from(MAX_GENERATION) {
            debug!(object = number, "Generation exhausted, retiring object number");
            self.unavailable.insert(number);
            self.bump_object_count(ObjectId::new(number, 0));
            return None;
        }

        let generation = generation as u16;
        self.add_free_object(ObjectId::new(number, generation));
        Some(generation)
    }

    /// Insert into the free list as-is. Duplicates are ignored.
    pub fn add_free_object(&mut self, id: ObjectId) {
        if !self.free_objects.insert(id) {
            debug!(object = %id, "Adding to free list, is already contained in it");
            return;
        }
        self.bump_object_count(id);
    }

    fn bump_object_count(&mut self, id: ObjectId) {
        if id.number() > self.object_count {
            self.object_count = id.number();
        }
    }

    /// Delete every object not reachable from `trailer`. Compressed
    /// object-stream containers and whatever they reference are always
    /// kept. `None` means no document is attached and nothing happens.
    ///
    /// Returns the number of objects removed.
    pub fn collect_garbage(&mut self, trailer: Option<&Object>) -> usize {
        let Some(trailer) = trailer else {
            return 0;
        };

        let mut referenced = HashSet::new();
        self.visit(trailer, &mut referenced);

        let containers: Vec<u32> = self.compressed_streams.iter().copied().collect();
        for number in containers {
            let id = ObjectId::new(number, 0);
            if referenced.contains(&id) {
                continue;
            }
            if let Some(obj) = self.objects.get(&id) {
                let value = obj.value().clone();
                self.visit(&value, &mut referenced);
            }
        }

        let doomed: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|id| {
                !referenced.contains(*id) && !self.compressed_streams.contains(&id.number())
            })
            .copied()
            .collect();

        for id in &doomed {
            self.safe_add_free_object(*id);
            self.objects.remove(id);
        }

        debug!(removed = doomed.len(), "Garbage collection finished");
        doomed.len()
    }

    fn visit(&self, root: &Object, referenced: &mut HashSet<ObjectId>) {
        let mut pending = vec![root];
        while let Some(obj) = pending.pop() {
            match obj {
                Object::Reference(id) => {
                    if !referenced.insert(*id) {
                        continue;
                    }
                    if let Some(child) = self.objects.get(id) {
                        pending.push(child.value());
                    }
                }
                Object::Array(items) => pending.extend(items.iter()),
                Object::Dictionary(dict) => pending.extend(dict.values()),
                _ => {}
            }
        }
    }

    pub fn attach_observer(&mut self, observer: Box<dyn StreamObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn detach_observer(&mut self, id: ObserverId) -> Option<Box<dyn StreamObserver>> {
        let pos = self.observers.iter().position(|(oid, _)| *oid == id)?;
        Some(self.observers.remove(pos).1)
    }

    /// Append raw bytes to the stream body of `id`, creating an empty body
    /// first if the object had none. Observers see a begin and an end
    /// event around the append.
    pub fn append_stream_data(&mut self, id: ObjectId, data: &[u8]) -> Result<()> {
        let obj = self.objects.get_mut(&id).ok_or(PdfError::ObjectNotFound(id))?;
        if let StreamSlot::Deferred { .. } = obj.stream_slot() {
            return Err(PdfError::InvalidStream {
                id,
                reason: "stream body must be loaded before appending".into(),
            });
        }
        if obj.value().as_dict().is_none() {
            return Err(PdfError::InvalidStream {
                id,
                reason: format!("a {} cannot carry a stream", obj.value().type_name()),
            });
        }

        for (_, observer) in self.observers.iter_mut() {
            observer.begin_append_stream(id);
        }

        let new_len = match obj.stream_mut() {
            Some(stream) => {
                stream.data_mut().extend_from_slice(data);
                stream.len()
            }
            None => {
                obj.set_stream(Stream::new(data.to_vec()));
                data.len()
            }
        };
        obj.set_dirty(true);

        for (_, observer) in self.observers.iter_mut() {
            observer.end_append_stream(id, new_len);
        }
        Ok(())
    }
}
