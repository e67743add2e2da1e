//! Report Merge Library
//!
//! Validates uploaded attachments and merges PDFs into a single print-ready
//! report. This library provides functionality to:
//! - Classify uploads as PDF, image, or rejected, by content rather than name
//! - Parse PDFs leniently, rebuilding damaged cross-reference tables
//! - Concatenate PDFs into one document, all or nothing
//! - Assemble a report from a generated PDF plus user attachments
//!
//! Logging goes through the `log` facade. Pass a [`Diagnostics`] handle to
//! direct records to a specific logger.
//!
//! # Example
//!
//! ```no_run
//! use report_merge::{ReportAssembler, Attachment};
//!
//! let report = std::fs::read("report.pdf").unwrap();
//! let attachments = vec![
//!     Attachment::new("certificate.pdf", "JVBERi0xLjQK..."),
//!     Attachment::new("photo.jpg", "/9j/4AAQSkZJRg..."),
//! ];
//!
//! let assembly = ReportAssembler::default()
//!     .assemble(report, attachments)
//!     .expect("Failed to merge report");
//!
//! for rejection in &assembly.rejected {
//!     eprintln!("{}: {}", rejection.name, rejection.reason);
//! }
//! assembly.output.write_to(std::path::Path::new("final.pdf")).unwrap();
//! ```

pub mod diag;
pub mod error;
pub mod pdf;
pub mod report;
pub mod source;
pub mod validate;

#[cfg(test)]
mod fixtures;

// Re-export commonly used items
pub use diag::Diagnostics;
pub use error::{CorruptPdf, Error, Result};
pub use pdf::{merge_pdfs, MergeOptions, MergeRequest, MergedOutput, Merger};
pub use report::{Attachment, Rejection, ReportAssembler, ReportAssembly, RoutedImage};
pub use source::{DeclaredKind, SourceDocument};
pub use validate::{classify, Classification, ImageKind, RejectReason, Validator, ValidatorOptions};
