//! Assembling a report from a generated PDF and user attachments
//!
//! The generated report is trusted and always comes first. Each attachment
//! is decoded and classified: PDFs are appended to the merge in upload
//! order, images are handed back for the template renderer, and anything
//! else is reported as rejected without stopping the rest of the batch.

use std::sync::atomic::AtomicBool;

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::pdf::merge::{MergeOptions, MergeRequest, MergedOutput, Merger};
use crate::source::SourceDocument;
use crate::validate::{Classification, ImageKind, RejectReason, Validator, ValidatorOptions};

/// An uploaded file as storage hands it over
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    /// Base64 content; `None` when the upload slot is empty
    pub content: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Some(content.into()),
        }
    }
}

/// An attachment that was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position among the attachments passed in
    pub attachment_index: usize,
    pub name: String,
    pub reason: RejectReason,
}

/// An image attachment, left for the renderer
#[derive(Debug, Clone)]
pub struct RoutedImage {
    pub kind: ImageKind,
    pub document: SourceDocument,
}

/// Everything the caller needs to deliver the report
#[derive(Debug)]
pub struct ReportAssembly {
    pub output: MergedOutput,
    pub images: Vec<RoutedImage>,
    pub rejected: Vec<Rejection>,
}

/// Runs validation and merging over one report's uploads
#[derive(Debug, Clone)]
pub struct ReportAssembler<'a> {
    validator: Validator<'a>,
    merger: Merger<'a>,
    diag: Diagnostics<'a>,
}

impl Default for ReportAssembler<'static> {
    fn default() -> Self {
        Self {
            validator: Validator::default(),
            merger: Merger::default(),
            diag: Diagnostics::default(),
        }
    }
}

impl<'a> ReportAssembler<'a> {
    /// Build an assembler from both option sets
    ///
    /// The merger searches for a `%PDF-` header exactly as far as the
    /// validator did, so that a document accepted as a PDF is never refused
    /// by the merge for where its header sits.
    pub fn new(
        validator_options: ValidatorOptions,
        mut merge_options: MergeOptions,
        diag: Diagnostics<'a>,
    ) -> Self {
        merge_options.header_search_window = validator_options.header_search_window;
        Self {
            validator: Validator::with_diagnostics(validator_options, diag),
            merger: Merger::with_diagnostics(merge_options, diag),
            diag,
        }
    }

    /// Merge `primary` with every PDF attachment
    pub fn assemble<I>(&self, primary: Vec<u8>, attachments: I) -> Result<ReportAssembly>
    where
        I: IntoIterator<Item = Attachment>,
    {
        self.assemble_cancellable(primary, attachments, &AtomicBool::new(false))
    }

    /// Like [`ReportAssembler::assemble`], abortable between documents
    pub fn assemble_cancellable<I>(
        &self,
        primary: Vec<u8>,
        attachments: I,
        cancel: &AtomicBool,
    ) -> Result<ReportAssembly>
    where
        I: IntoIterator<Item = Attachment>,
    {
        let mut request = MergeRequest::with_primary(primary);
        let mut images = Vec::new();
        let mut rejected = Vec::new();

        for (attachment_index, attachment) in attachments.into_iter().enumerate() {
            let Some(content) = attachment.content.as_deref() else {
                continue;
            };

            let (document, classification) =
                self.validator.classify_encoded(&attachment.name, content);

            match (document, classification) {
                (Some(document), Classification::Pdf) => request.push(document),
                (Some(document), Classification::Image(kind)) => {
                    images.push(RoutedImage { kind, document })
                }
                (_, Classification::Rejected(reason)) => rejected.push(Rejection {
                    attachment_index,
                    name: attachment.name,
                    reason,
                }),
                // Accepted classifications always carry their document.
                (None, _) => {}
            }
        }

        if !rejected.is_empty() {
            self.diag.warn(format_args!(
                "{} of the attachments were rejected",
                rejected.len()
            ));
        }

        let output = self.merger.merge_cancellable(&request, cancel)?;
        Ok(ReportAssembly {
            output,
            images,
            rejected,
        })
    }
}
