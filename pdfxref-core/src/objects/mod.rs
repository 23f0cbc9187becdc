//! PDF object model
//!
//! Value types shared by the parser, the object store and the writer.

mod dictionary;
mod indirect;
mod primitive;
mod stream;

pub use dictionary::Dictionary;
pub use indirect::{IndirectObject, StreamSlot};
pub use primitive::{Object, ObjectId, PdfString};
pub use stream::Stream;
