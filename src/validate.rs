//! Content-based classification of uploaded files
//!
//! The declared filename is only a hint. A file is a PDF when it carries a
//! `%PDF-` header and its page tree parses; an image when it carries a JPEG
//! or PNG signature and decodes. Everything else is rejected.
//!
//! Classification never fails: problems are reported as
//! [`Classification::Rejected`] so one bad upload cannot derail its siblings.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use image::ImageFormat;

use crate::diag::{panic_message, Diagnostics};
use crate::pdf::load::{find_header, load_pdf, DEFAULT_HEADER_WINDOW};
use crate::source::{DeclaredKind, SourceDocument};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Supported raster formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_SIGNATURE) {
            Some(ImageKind::Png)
        } else if bytes.starts_with(JPEG_SIGNATURE) {
            Some(ImageKind::Jpeg)
        } else {
            None
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
        }
    }
}

/// Why a file was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Zero-length content
    Empty,
    /// Larger than the configured limit
    TooLarge { len: usize, limit: usize },
    /// Transport encoding could not be decoded
    Decode(String),
    /// Neither a PDF nor a supported image
    UnsupportedFormat,
    /// PDF header present but the page tree cannot be parsed
    CorruptPdf(String),
    /// Image signature present but the image does not decode
    CorruptImage(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "file is empty"),
            RejectReason::TooLarge { len, limit } => {
                write!(f, "file is {} bytes, limit is {}", len, limit)
            }
            RejectReason::Decode(e) => write!(f, "cannot decode upload: {}", e),
            RejectReason::UnsupportedFormat => write!(f, "not a PDF, JPEG or PNG file"),
            RejectReason::CorruptPdf(e) => write!(f, "corrupt PDF: {}", e),
            RejectReason::CorruptImage(e) => write!(f, "corrupt image: {}", e),
        }
    }
}

/// Result of classifying one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Pdf,
    Image(ImageKind),
    Rejected(RejectReason),
}

impl Classification {
    pub fn is_pdf(&self) -> bool {
        matches!(self, Classification::Pdf)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Classification::Image(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Classification::Rejected(_))
    }
}

/// Limits applied while classifying
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Reject content larger than this many bytes
    pub max_bytes: Option<usize>,
    /// How many leading bytes may precede the `%PDF-` marker
    pub header_search_window: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            max_bytes: None,
            header_search_window: DEFAULT_HEADER_WINDOW,
        }
    }
}

/// Classifies uploads as PDF, image, or rejected
#[derive(Debug, Clone)]
pub struct Validator<'a> {
    options: ValidatorOptions,
    diag: Diagnostics<'a>,
}

impl Validator<'static> {
    pub fn new(options: ValidatorOptions) -> Self {
        Self {
            options,
            diag: Diagnostics::default(),
        }
    }
}

impl Default for Validator<'static> {
    fn default() -> Self {
        Self::new(ValidatorOptions::default())
    }
}

impl<'a> Validator<'a> {
    pub fn with_diagnostics(options: ValidatorOptions, diag: Diagnostics<'a>) -> Self {
        Self { options, diag }
    }

    /// Classify `bytes` by content; `declared_name` is used for logging
    pub fn classify(&self, bytes: &[u8], declared_name: &str) -> Classification {
        let classification = self.inspect(bytes);

        match &classification {
            Classification::Rejected(reason) => {
                self.diag
                    .warn(format_args!("rejected {}: {}", declared_name, reason));
            }
            accepted => {
                let declared = DeclaredKind::from_name(declared_name);
                let matches_declared = match accepted {
                    Classification::Pdf => declared == DeclaredKind::Pdf,
                    _ => declared == DeclaredKind::Image,
                };
                if !matches_declared {
                    self.diag.debug(format_args!(
                        "{} declared as {:?} but content is {:?}",
                        declared_name, declared, accepted
                    ));
                }
            }
        }

        classification
    }

    pub fn classify_document(&self, document: &SourceDocument) -> Classification {
        self.classify(&document.bytes, &document.declared_name)
    }

    /// Decode base64 `content` and classify it
    ///
    /// The decoded document is returned alongside its classification
    /// unless decoding itself failed.
    pub fn classify_encoded(
        &self,
        declared_name: &str,
        content: &str,
    ) -> (Option<SourceDocument>, Classification) {
        match SourceDocument::decode(declared_name, content) {
            Ok(document) => {
                let classification = self.classify_document(&document);
                (Some(document), classification)
            }
            Err(e) => {
                let reason = RejectReason::Decode(e.to_string());
                self.diag
                    .warn(format_args!("rejected {}: {}", declared_name, reason));
                (None, Classification::Rejected(reason))
            }
        }
    }

    fn inspect(&self, bytes: &[u8]) -> Classification {
        if bytes.is_empty() {
            return Classification::Rejected(RejectReason::Empty);
        }
        if let Some(limit) = self.options.max_bytes {
            if bytes.len() > limit {
                return Classification::Rejected(RejectReason::TooLarge {
                    len: bytes.len(),
                    limit,
                });
            }
        }

        if let Some(kind) = ImageKind::sniff(bytes) {
            return match decode_image(bytes, kind) {
                Ok(()) => Classification::Image(kind),
                Err(e) => Classification::Rejected(RejectReason::CorruptImage(e)),
            };
        }

        if find_header(bytes, self.options.header_search_window).is_some() {
            return match load_pdf(bytes, self.options.header_search_window) {
                Ok(_) => Classification::Pdf,
                Err(e) => Classification::Rejected(RejectReason::CorruptPdf(e.reason)),
            };
        }

        Classification::Rejected(RejectReason::UnsupportedFormat)
    }
}

/// Classify with default options and the process-wide logger
pub fn classify(bytes: &[u8], declared_name: &str) -> Classification {
    Validator::default().classify(bytes, declared_name)
}

// Full decode, so truncated or damaged image data is caught.
fn decode_image(bytes: &[u8], kind: ImageKind) -> Result<(), String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        image::load_from_memory_with_format(bytes, kind.format())
    }));

    match outcome {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!(
            "decoder aborted on malformed input: {}",
            panic_message(payload.as_ref())
        )),
    }
}
