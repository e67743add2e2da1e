//! PDF manipulation module

pub mod load;
pub mod merge;
pub mod metadata;

// Re-export commonly used items
pub use load::{load_pdf, LoadedPdf};
pub use merge::{merge_pdfs, MergeOptions, MergeRequest, MergedOutput, Merger};
pub use metadata::{count_pages, extract_metadata, page_contents, PdfMetadata};
