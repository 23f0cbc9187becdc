use crate::objects::ObjectId;
use thiserror::Error;

/// Broad classes of failure, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad magic, bad EOF marker, malformed xref/trailer, cycles, size mismatches
    MalformedStructure,
    /// Object-number or generation space exhausted
    ResourceExhaustion,
    /// Missing or incorrect password, unusable encryption dictionary
    Security,
    /// A single indirect object failed to parse
    ObjectCorruption,
    /// The underlying device failed
    Io,
}

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PDF header")]
    InvalidHeader,

    #[error("Invalid EOF marker")]
    InvalidEofMarker,

    #[error("Invalid xref at offset {offset}: {reason}")]
    InvalidXRef { offset: u64, reason: String },

    #[error("Cycle in xref structure: offset {offset} already visited")]
    XRefCycle { offset: u64 },

    #[error("Invalid trailer")]
    InvalidTrailer,

    #[error("Invalid encryption dictionary: {0}")]
    InvalidEncryptionDict(String),

    #[error("A password is required to read this PDF file")]
    InvalidPassword,

    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Internal logic error: {0}")]
    InternalLogic(String),

    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: u64, message: String },

    #[error("Error while loading object {id}, offset {offset}: {reason}")]
    InvalidObject {
        id: ObjectId,
        offset: u64,
        reason: String,
    },

    #[error("Invalid stream for object {id}: {reason}")]
    InvalidStream { id: ObjectId, reason: String },

    #[error("Stream decode error: {0}")]
    StreamDecodeError(String),

    #[error("Maximum recursion depth exceeded (limit: {limit})")]
    RecursionLimit { limit: usize },
}

impl PdfError {
    pub(crate) fn xref(offset: u64, reason: impl Into<String>) -> Self {
        PdfError::InvalidXRef {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn syntax(position: u64, message: impl Into<String>) -> Self {
        PdfError::SyntaxError {
            position,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PdfError::Io(_) => ErrorCategory::Io,
            PdfError::InvalidPassword
            | PdfError::InvalidEncryptionDict(_)
            | PdfError::UnsupportedEncryption(_) => ErrorCategory::Security,
            PdfError::ValueOutOfRange(_) => ErrorCategory::ResourceExhaustion,
            PdfError::InvalidObject { .. }
            | PdfError::InvalidStream { .. }
            | PdfError::StreamDecodeError(_)
            | PdfError::ObjectNotFound(_) => ErrorCategory::ObjectCorruption,
            PdfError::InvalidHeader
            | PdfError::InvalidEofMarker
            | PdfError::InvalidXRef { .. }
            | PdfError::XRefCycle { .. }
            | PdfError::InvalidTrailer
            | PdfError::InternalLogic(_)
            | PdfError::SyntaxError { .. }
            | PdfError::RecursionLimit { .. } => ErrorCategory::MalformedStructure,
        }
    }

    /// Only a wrong or missing password can be fixed by trying again
    /// against the same, partially-read parser state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PdfError::InvalidPassword)
    }
}

pub type Result<T> = std::result::Result<T, PdfError>;
