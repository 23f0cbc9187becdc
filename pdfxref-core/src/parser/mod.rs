//! PDF Parser Module
//!
//! Reads the file structure of a PDF according to ISO 32000-1 Section 7.5:
//! header, cross-reference tables and streams, trailers, the revision
//! chain of incrementally updated files, and the indirect objects the
//! cross-reference table points at.

pub mod device;
pub mod encryption_handler;
pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod parser_object;
pub mod reader;
pub mod stack_safe;
pub mod trailer;
pub mod xref;
pub mod xref_stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use self::device::{InputDevice, StreamDevice};
pub use self::encryption_handler::{
    AuthResult, EncryptSession, EncryptionInfo, SecurityHandler, SecurityHandlerFactory,
};
pub use self::header::{PdfHeader, PdfVersion};
pub use self::lexer::{Token, Tokenizer};
pub use self::parser_object::ParserObject;
pub use self::reader::{ParseStage, Parser};
pub use self::trailer::{PdfTrailer, RevisionInfo, RevisionKind};
pub use self::xref::{XRefEntries, XRefEntry, XRefEntryType};

/// Result type for parser operations
pub type ParseResult<T> = crate::error::Result<T>;

/// Parsing options for controlling strictness and recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// `%%EOF` must close the file, `startref` is not accepted,
    /// zero-offset in-use entries are errors and the catalog `/Version`
    /// must be a name.
    pub strict_parsing: bool,
    /// A corrupt object frees its slot instead of aborting the load
    pub ignore_broken_objects: bool,
    /// Recover a missing or wrong stream `/Length` by scanning for
    /// `endstream`
    pub lenient_streams: bool,
    /// Leave stream bodies on disk until they are requested
    pub load_on_demand: bool,
    /// Keep the text of every recovery warning, see [`Parser::warnings`]
    pub collect_warnings: bool,
    /// Nesting limit for direct values
    pub max_recursion_depth: usize,
    /// Subsection limit per cross-reference section
    pub max_xref_sections: usize,
    /// How far back from `startxref` to look for a misplaced `xref`
    pub max_recovery_bytes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParseOptions {
    /// Reject anything that does not follow the file structure rules
    pub fn strict() -> Self {
        Self {
            strict_parsing: true,
            ignore_broken_objects: false,
            lenient_streams: false,
            ..Self::lenient()
        }
    }

    /// Load whatever can be loaded from real-world files
    pub fn lenient() -> Self {
        Self {
            strict_parsing: false,
            ignore_broken_objects: true,
            lenient_streams: true,
            load_on_demand: false,
            collect_warnings: false,
            max_recursion_depth: stack_safe::MAX_RECURSION_DEPTH,
            max_xref_sections: 512,
            max_recovery_bytes: 2048,
        }
    }
}
