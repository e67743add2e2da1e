//! Lenient PDF loading
//!
//! Real uploads are often slightly broken: stale cross-reference offsets,
//! a truncated trailer, junk before the header. Loading first tries a normal
//! lopdf parse. If that fails, or yields no pages, the cross-reference table
//! is rebuilt by scanning the file for object headers and the parse is retried.
//! A page tree that resolves to other than the `/Count` it declares counts
//! as a failed parse. Only when both attempts fail is the document considered
//! corrupt.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use lopdf::Document;
use regex::bytes::Regex;

use crate::diag::panic_message;
use crate::error::CorruptPdf;
use crate::pdf::metadata::declared_page_count;

/// Default number of leading bytes searched for the `%PDF-` marker
pub const DEFAULT_HEADER_WINDOW: usize = 1024;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// A parsed document with at least one page and a consistent page tree
#[derive(Debug)]
pub struct LoadedPdf {
    pub document: Document,
    pub page_count: usize,
    /// Whether the cross-reference table had to be rebuilt
    pub recovered: bool,
}

/// Offset of the `%PDF-` marker within the first `window` bytes
pub fn find_header(bytes: &[u8], window: usize) -> Option<usize> {
    let end = bytes.len().min(window.saturating_add(PDF_MAGIC.len()));
    bytes[..end]
        .windows(PDF_MAGIC.len())
        .position(|w| w == PDF_MAGIC)
}

/// Parse `bytes` as a PDF, falling back to xref reconstruction
///
/// A parse is accepted only when the page tree resolves to at least one page
/// and to exactly as many pages as the root `/Count` declares. Broken `Kids`
/// references are skipped by lopdf, so a short page list means lost pages.
pub fn load_pdf(bytes: &[u8], header_window: usize) -> Result<LoadedPdf, CorruptPdf> {
    let start = find_header(bytes, header_window)
        .ok_or_else(|| CorruptPdf::new("missing %PDF- header"))?;
    let body = &bytes[start..];

    let strict_err = match parse(body).and_then(check_pages) {
        Ok((document, page_count)) => {
            return Ok(LoadedPdf {
                document,
                page_count,
                recovered: false,
            });
        }
        Err(e) => e,
    };

    let rebuilt = rebuild_xref(body).ok_or_else(|| strict_err.clone())?;
    match parse(&rebuilt).and_then(check_pages) {
        Ok((document, page_count)) => Ok(LoadedPdf {
            document,
            page_count,
            recovered: true,
        }),
        Err(e) if e == strict_err => Err(e),
        Err(e) => Err(CorruptPdf::new(format!(
            "{} (xref reconstruction also failed: {})",
            strict_err, e
        ))),
    }
}

// lopdf can panic on hostile input; that must surface as a corrupt document.
fn parse(bytes: &[u8]) -> Result<(Document, usize), CorruptPdf> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Document::load_mem(bytes).map(|doc| {
            let pages = doc.get_pages().len();
            (doc, pages)
        })
    }));

    match outcome {
        Ok(Ok(parsed)) => Ok(parsed),
        Ok(Err(e)) => Err(e.into()),
        Err(payload) => Err(CorruptPdf::new(format!(
            "parser aborted on malformed input: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn check_pages(
    (document, page_count): (Document, usize),
) -> Result<(Document, usize), CorruptPdf> {
    if page_count == 0 {
        return Err(CorruptPdf::new("document has no pages"));
    }
    // A missing or unreadable /Count is tolerated; a wrong one is not.
    if let Ok(declared) = declared_page_count(&document) {
        if declared != page_count {
            return Err(CorruptPdf::new(format!(
                "page tree declares {} pages but resolves to {}",
                declared, page_count
            )));
        }
    }
    Ok((document, page_count))
}

fn object_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)(?:\A|[\r\n])[ \t]*(\d{1,10})[ \t\r\n]+(\d{1,5})[ \t\r\n]+obj\b")
            .expect("object header pattern")
    })
}

fn root_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)/Root[ \t\r\n]*(\d{1,10})[ \t\r\n]+(\d{1,5})[ \t\r\n]+R\b")
            .expect("root reference pattern")
    })
}

fn catalog_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?-u)/Type[ \t\r\n]*/Catalog\b").expect("catalog pattern"))
}

fn parse_number<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Append a fresh xref table and trailer covering every object found in `body`
///
/// Returns `None` when no objects or no document catalog can be located.
/// Objects stored only inside compressed object streams are not recovered.
pub fn rebuild_xref(body: &[u8]) -> Option<Vec<u8>> {
    // Later definitions win, as with incremental updates.
    let mut offsets: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
    for caps in object_header().captures_iter(body) {
        let (Some(id), Some(generation)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Some(number), Some(generation)) = (
            parse_number::<u32>(id.as_bytes()),
            parse_number::<u16>(generation.as_bytes()),
        ) else {
            continue;
        };
        if number == 0 {
            continue;
        }
        offsets.insert(number, (generation, id.start()));
    }

    let max_id = *offsets.keys().next_back()?;
    let root = find_root(body, &offsets)?;

    let size = max_id + 1;
    let mut out = body.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    for number in 0..size {
        let entry = match offsets.get(&number) {
            Some((generation, offset)) => format!("{:010} {:05} n\r\n", offset, generation),
            None => "0000000000 65535 f\r\n".to_string(),
        };
        out.extend_from_slice(entry.as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} {} R >>\nstartxref\n{}\n%%EOF\n",
            size, root.0, root.1, xref_offset
        )
        .as_bytes(),
    );

    Some(out)
}

fn find_root(body: &[u8], offsets: &BTreeMap<u32, (u16, usize)>) -> Option<(u32, u16)> {
    let declared = root_reference()
        .captures_iter(body)
        .filter_map(|caps| {
            let number = parse_number::<u32>(caps.get(1)?.as_bytes())?;
            let generation = parse_number::<u16>(caps.get(2)?.as_bytes())?;
            Some((number, generation))
        })
        .filter(|(number, _)| offsets.contains_key(number))
        .last();
    if declared.is_some() {
        return declared;
    }

    // No usable trailer: pick the object that encloses the last catalog marker.
    let marker = catalog_marker().find_iter(body).last()?.start();
    offsets
        .iter()
        .filter(|(_, (_, offset))| *offset < marker)
        .max_by_key(|(_, (_, offset))| *offset)
        .map(|(number, (generation, _))| (*number, *generation))
}
