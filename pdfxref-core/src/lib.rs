//! # pdfxref
//!
//! The object model and cross-reference engine of a PDF library: it reads
//! the file structure of a PDF, resolves every indirect object through
//! the revision chain of an incrementally updated file, and writes
//! documents back out.
//!
//! ## Features
//!
//! - **Lenient and strict parsing**: real-world files with broken offsets,
//!   missing `/Length` or junk around the header load in lenient mode
//! - **Incremental updates**: `/Prev` chains, hybrid files with `/XRefStm`
//!   and cycle detection
//! - **Cross-reference streams and object streams** (PDF 1.5+)
//! - **Object store**: free list with generation numbers, garbage
//!   collection, stream observers
//! - **Encryption hook**: bring a security handler, the parser decrypts
//!   strings and streams through it
//! - **Writer**: full saves and incremental updates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfxref::{Document, ParseOptions, Result};
//!
//! # fn main() -> Result<()> {
//! let doc = Document::open("input.pdf", ParseOptions::default())?;
//!
//! println!("Version: {}", doc.version());
//! println!("Objects: {}", doc.objects().len());
//! println!("Incremental updates: {}", doc.incremental_updates());
//!
//! for warning in doc.warnings() {
//!     println!("warning: {warning}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Working with the parser directly
//!
//! ```rust,no_run
//! use pdfxref::parser::{Parser, ParseOptions, StreamDevice};
//! use pdfxref::store::IndirectObjectList;
//! use std::fs::File;
//!
//! # fn main() -> pdfxref::Result<()> {
//! let mut device = StreamDevice::new(File::open("input.pdf")?)?;
//! let mut store = IndirectObjectList::new();
//! let mut parser = Parser::new(ParseOptions::strict());
//! parser.parse(&mut device, &mut store)?;
//!
//! for revision in parser.revisions() {
//!     println!("{:?} section at {}", revision.kind, revision.offset);
//! }
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod error;
pub mod objects;
pub mod parser;
pub mod store;
pub mod writer;

pub use document::Document;
pub use error::{ErrorCategory, PdfError, Result};
pub use objects::{Dictionary, IndirectObject, Object, ObjectId, PdfString, Stream, StreamSlot};
pub use parser::{ParseOptions, Parser, PdfVersion, XRefEntries, XRefEntry, XRefEntryType};
pub use store::{IndirectObjectList, ObserverId, StreamObserver};
pub use writer::{write_incremental_update, PdfWriter};

/// Current version of pdfxref
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
