//! PDF metadata: page counts, page contents, and the Info dictionary

use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object};

use crate::error::{CorruptPdf, Error, Result};
use crate::pdf::load::{load_pdf, DEFAULT_HEADER_WINDOW};

/// Read the Count field from the root Pages dictionary
///
/// This is what a viewer reports before walking the tree, so the merger
/// checks it against the pages it actually linked.
pub fn declared_page_count(doc: &Document) -> Result<usize> {
    let catalog = doc
        .catalog()
        .map_err(|_| CorruptPdf::new("no catalog in trailer"))?;

    let pages_id = catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|_| CorruptPdf::new("catalog has no Pages reference"))?;

    let pages = doc
        .get_object(pages_id)
        .and_then(Object::as_dict)
        .map_err(|_| CorruptPdf::new("Pages is not a dictionary"))?;

    match pages.get(b"Count") {
        Ok(Object::Integer(n)) if *n >= 0 => Ok(*n as usize),
        _ => Err(CorruptPdf::new("Pages has no valid Count").into()),
    }
}

/// PDF metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfMetadata {
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
    /// Producing application (if present)
    pub producer: Option<String>,
}

/// Extract metadata from PDF bytes
pub fn extract_metadata(bytes: &[u8]) -> Result<PdfMetadata> {
    let loaded = load_pdf(bytes, DEFAULT_HEADER_WINDOW)?;
    let doc = &loaded.document;

    let info = doc
        .trailer
        .get(b"Info")
        .and_then(Object::as_reference)
        .and_then(|id| doc.get_object(id))
        .and_then(Object::as_dict)
        .ok();

    let text = |key: &[u8]| {
        info.and_then(|dict| dict.get(key).ok())
            .and_then(|obj| obj.as_str().ok())
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    };

    Ok(PdfMetadata {
        page_count: loaded.page_count,
        title: text(b"Title"),
        author: text(b"Author"),
        producer: text(b"Producer"),
    })
}

/// Count the pages in PDF bytes, parsing leniently
pub fn count_pages(bytes: &[u8]) -> Result<usize> {
    Ok(load_pdf(bytes, DEFAULT_HEADER_WINDOW)?.page_count)
}

/// Decoded content stream of every page, in page order
pub fn page_contents(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let loaded = load_pdf(bytes, DEFAULT_HEADER_WINDOW)?;
    let doc = &loaded.document;

    doc.get_pages()
        .into_values()
        .map(|page_id| doc.get_page_content(page_id).map_err(Error::from))
        .collect()
}

/// Format a timestamp as a PDF date string, e.g. `D:20240131120000Z`
pub fn pdf_date(at: DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Add a fresh Info dictionary to `doc` and point the trailer at it
pub fn stamp_info(doc: &mut Document, producer: Option<&str>, at: Option<DateTime<Utc>>) {
    let mut info = Dictionary::new();
    if let Some(producer) = producer {
        info.set("Producer", Object::string_literal(producer));
    }
    if let Some(at) = at {
        let date = pdf_date(at);
        info.set("CreationDate", Object::string_literal(date.as_str()));
        info.set("ModDate", Object::string_literal(date));
    }
    if info.is_empty() {
        doc.trailer.remove(b"Info");
        return;
    }

    let info_id = doc.add_object(info);
    doc.trailer.set("Info", Object::Reference(info_id));
}
