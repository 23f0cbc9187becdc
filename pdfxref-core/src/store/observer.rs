use crate::objects::ObjectId;

/// Listener notified around stream-body appends made through the store.
pub trait StreamObserver {
    fn begin_append_stream(&mut self, id: ObjectId);

    /// Called after the append; `new_len` is the body length afterwards
    fn end_append_stream(&mut self, id: ObjectId, new_len: usize);
}

/// Handle returned by `attach_observer`, used to detach it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);
