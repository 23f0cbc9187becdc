//! PDF encryption integration point
//!
//! The engine does not implement any cipher. It reads the encryption
//! dictionary (ISO 32000-1 Section 7.6), asks a caller-provided
//! [`SecurityHandlerFactory`] for a handler, authenticates it against the
//! document ID, and then routes every string and stream of subsequently
//! parsed objects through [`EncryptSession`].

use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, ObjectId};

/// Outcome of an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Authenticated without distinguishing user from owner
    Success,
    Failed,
    /// Authenticated with the user password
    User,
    /// Authenticated with the owner password
    Owner,
}

impl AuthResult {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthResult::Failed)
    }
}

/// A security handler bound to one encryption dictionary
pub trait SecurityHandler {
    /// Derive keys from `password` and the first element of the trailer `/ID`
    fn authenticate(&mut self, password: &str, document_id: &[u8]) -> AuthResult;

    /// Decrypt a string or stream body belonging to object `id`
    fn decrypt(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>>;

    /// Whether `/Type /Metadata` streams are encrypted too
    fn is_metadata_encrypted(&self) -> bool {
        true
    }
}

/// Creates a [`SecurityHandler`] from an encryption dictionary
pub trait SecurityHandlerFactory {
    fn create(&self, encrypt_dict: &Dictionary) -> Result<Box<dyn SecurityHandler>>;
}

/// Encryption information extracted from the encryption dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionInfo {
    /// Filter name (usually "Standard")
    pub filter: String,
    /// V entry (algorithm version)
    pub v: i64,
    /// R entry (revision)
    pub r: Option<i64>,
    /// Length entry (key length in bits)
    pub length: Option<i64>,
    /// EncryptMetadata entry, default true
    pub encrypt_metadata: bool,
}

impl EncryptionInfo {
    pub fn from_dict(dict: &Dictionary) -> Result<Self> {
        let filter = dict
            .get_name("Filter")
            .ok_or_else(|| PdfError::InvalidEncryptionDict("missing /Filter".to_string()))?
            .to_string();

        Ok(Self {
            filter,
            v: dict.get_integer("V").unwrap_or(0),
            r: dict.get_integer("R"),
            length: dict.get_integer("Length"),
            encrypt_metadata: dict
                .get("EncryptMetadata")
                .and_then(|o| o.as_bool())
                .unwrap_or(true),
        })
    }
}

/// An authenticated (or pending) handler plus what the parser needs to
/// decide which objects to decrypt.
pub struct EncryptSession {
    handler: Box<dyn SecurityHandler>,
    info: EncryptionInfo,
    auth: AuthResult,
    /// The encryption dictionary's own object, which is never decrypted
    encrypt_object: Option<ObjectId>,
}

impl std::fmt::Debug for EncryptSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptSession")
            .field("info", &self.info)
            .field("auth", &self.auth)
            .field("encrypt_object", &self.encrypt_object)
            .finish()
    }
}

impl EncryptSession {
    pub fn new(
        handler: Box<dyn SecurityHandler>,
        info: EncryptionInfo,
        encrypt_object: Option<ObjectId>,
    ) -> Self {
        Self {
            handler,
            info,
            auth: AuthResult::Failed,
            encrypt_object,
        }
    }

    pub fn authenticate(&mut self, password: &str, document_id: &[u8]) -> AuthResult {
        self.auth = self.handler.authenticate(password, document_id);
        self.auth
    }

    pub fn auth_result(&self) -> AuthResult {
        self.auth
    }

    pub fn info(&self) -> &EncryptionInfo {
        &self.info
    }

    pub fn encrypt_object(&self) -> Option<ObjectId> {
        self.encrypt_object
    }

    pub fn is_metadata_encrypted(&self) -> bool {
        self.info.encrypt_metadata && self.handler.is_metadata_encrypted()
    }

    pub fn decrypt(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        if !self.auth.is_authenticated() {
            return Err(PdfError::InvalidPassword);
        }
        self.handler.decrypt(id, data)
    }
}
