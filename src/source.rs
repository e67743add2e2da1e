//! Uploaded documents and their transport decoding

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// What the filename claims a document is. Only ever a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredKind {
    Pdf,
    Image,
    Unknown,
}

impl DeclaredKind {
    /// Guess from the extension of `name`, case-insensitively
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => DeclaredKind::Pdf,
            Some("jpg" | "jpeg" | "jpe" | "png") => DeclaredKind::Image,
            _ => DeclaredKind::Unknown,
        }
    }
}

/// One uploaded file, alive only for the request that carries it
#[derive(Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub declared_name: String,
    pub declared_kind: DeclaredKind,
}

impl SourceDocument {
    pub fn new(declared_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let declared_name = declared_name.into();
        let declared_kind = DeclaredKind::from_name(&declared_name);
        Self {
            bytes,
            declared_name,
            declared_kind,
        }
    }

    /// Decode base64 `content` as it arrives from storage
    ///
    /// Line breaks and other ASCII whitespace are ignored, since stored
    /// attachments are often wrapped.
    pub fn decode(declared_name: impl Into<String>, content: &str) -> Result<Self> {
        let declared_name = declared_name.into();
        let cleaned: Vec<u8> = content
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();

        match STANDARD.decode(&cleaned) {
            Ok(bytes) => Ok(Self::new(declared_name, bytes)),
            Err(source) => Err(Error::Decode {
                name: declared_name,
                source,
            }),
        }
    }
}

// Raw bytes stay out of debug output, which ends up in logs.
impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("declared_name", &self.declared_name)
            .field("declared_kind", &self.declared_kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}
