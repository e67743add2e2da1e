//! Error types for the report merge library

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to end users when a merge fails
pub const INVALID_PDF_MESSAGE: &str = "One or more uploaded files are not valid PDF files.";

/// A PDF whose page structure could not be parsed, even leniently
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct CorruptPdf {
    /// What the parser tripped over
    pub reason: String,
}

impl CorruptPdf {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<lopdf::Error> for CorruptPdf {
    fn from(err: lopdf::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Main error type for the report merge library
#[derive(Error, Debug)]
pub enum Error {
    /// Attachment content could not be decoded from its transport encoding
    #[error("Cannot decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    /// Content is neither a PDF nor a supported image
    #[error("Unsupported format: {name}")]
    UnsupportedFormat { name: String },

    /// Content looks like a PDF but cannot be parsed
    #[error("Corrupt PDF: {0}")]
    CorruptPdf(#[from] CorruptPdf),

    /// A document in a merge request failed to parse
    #[error("Document {index} ({name}) is not a valid PDF: {source}")]
    Merge {
        /// Zero-based position in the merge request
        index: usize,
        name: String,
        #[source]
        source: CorruptPdf,
    },

    /// Merge called with nothing to merge
    #[error("No documents to merge")]
    NoDocuments,

    /// Merge aborted between two documents
    #[error("Merge cancelled before document {next_index}")]
    Cancelled { next_index: usize },

    /// Assembled output does not hold every input page
    #[error("Merged document has {actual} pages, expected {expected}")]
    PageCountMismatch { expected: usize, actual: usize },

    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Position of the offending document, for merge failures
    pub fn offending_index(&self) -> Option<usize> {
        match self {
            Error::Merge { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Text suitable for the person who uploaded the files
    pub fn user_message(&self) -> String {
        match self {
            Error::Merge { .. } | Error::CorruptPdf(_) => INVALID_PDF_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
