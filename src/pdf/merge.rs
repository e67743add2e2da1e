//! PDF merging functionality using lopdf

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::diag::Diagnostics;
use crate::error::{CorruptPdf, Error, Result};
use crate::pdf::load::{load_pdf, DEFAULT_HEADER_WINDOW};
use crate::pdf::metadata::{declared_page_count, stamp_info};
use crate::source::SourceDocument;

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Object types that belong to a source document's own structure
const STRUCTURAL_TYPES: [&[u8]; 4] = [b"Catalog", b"Pages", b"Outlines", b"Outline"];

/// Options for merging PDFs
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Flate-compress streams before writing
    pub compress: bool,
    /// PDF version written to the output header
    pub version: String,
    /// Producer recorded in the output Info dictionary
    pub producer: Option<String>,
    /// Record CreationDate and ModDate in the output
    pub stamp_dates: bool,
    /// Leading bytes searched for each source's `%PDF-` marker
    pub header_search_window: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            compress: true,
            version: "1.5".to_string(),
            producer: Some(env!("CARGO_PKG_NAME").to_string()),
            stamp_dates: true,
            header_search_window: DEFAULT_HEADER_WINDOW,
        }
    }
}

/// Documents to merge, in the order their pages should appear
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    documents: Vec<SourceDocument>,
}

impl MergeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request with the generated report as its first document
    pub fn with_primary(bytes: Vec<u8>) -> Self {
        let mut request = Self::new();
        request.push(SourceDocument::new("primary report", bytes));
        request
    }

    pub fn push(&mut self, document: SourceDocument) {
        self.documents.push(document);
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<SourceDocument> for MergeRequest {
    fn from_iter<I: IntoIterator<Item = SourceDocument>>(iter: I) -> Self {
        Self {
            documents: iter.into_iter().collect(),
        }
    }
}

/// A complete merged PDF
#[derive(Clone, PartialEq, Eq)]
pub struct MergedOutput {
    bytes: Vec<u8>,
    page_count: usize,
}

impl MergedOutput {
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the PDF to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for MergedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedOutput")
            .field("page_count", &self.page_count)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Pages and objects gathered so far
struct Collected {
    objects: BTreeMap<ObjectId, Object>,
    page_ids: Vec<ObjectId>,
    max_id: u32,
}

/// Concatenates whole PDF documents into one
#[derive(Debug, Clone)]
pub struct Merger<'a> {
    options: MergeOptions,
    diag: Diagnostics<'a>,
}

impl Merger<'static> {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            diag: Diagnostics::default(),
        }
    }
}

impl Default for Merger<'static> {
    fn default() -> Self {
        Self::new(MergeOptions::default())
    }
}

impl<'a> Merger<'a> {
    pub fn with_diagnostics(options: MergeOptions, diag: Diagnostics<'a>) -> Self {
        Self { options, diag }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge every document in `request`, in order
    ///
    /// Fails with [`Error::Merge`] naming the first document that cannot be
    /// parsed. No output is produced in that case.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use report_merge::pdf::{Merger, MergeRequest};
    /// use report_merge::SourceDocument;
    ///
    /// let report = std::fs::read("report.pdf").unwrap();
    /// let appendix = std::fs::read("appendix.pdf").unwrap();
    ///
    /// let mut request = MergeRequest::with_primary(report);
    /// request.push(SourceDocument::new("appendix.pdf", appendix));
    ///
    /// let merged = Merger::default().merge(&request).expect("Failed to merge");
    /// println!("{} pages", merged.page_count());
    /// ```
    pub fn merge(&self, request: &MergeRequest) -> Result<MergedOutput> {
        self.merge_cancellable(request, &AtomicBool::new(false))
    }

    /// Like [`Merger::merge`], but stops before the next document once
    /// `cancel` is set
    pub fn merge_cancellable(
        &self,
        request: &MergeRequest,
        cancel: &AtomicBool,
    ) -> Result<MergedOutput> {
        if request.is_empty() {
            return Err(Error::NoDocuments);
        }

        let mut collected = Collected {
            objects: BTreeMap::new(),
            page_ids: Vec::new(),
            max_id: 1,
        };

        for (index, source) in request.documents().iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                self.diag
                    .warn(format_args!("merge cancelled before document {}", index));
                return Err(Error::Cancelled { next_index: index });
            }

            if let Err(source_err) = self.append_document(&mut collected, source) {
                self.diag.error(format_args!(
                    "document {} ({}) is not a valid PDF: {}",
                    index, source.declared_name, source_err
                ));
                return Err(Error::Merge {
                    index,
                    name: source.declared_name.clone(),
                    source: source_err,
                });
            }
        }

        let output = self.assemble(collected)?;
        self.diag.info(format_args!(
            "merged {} documents into {} pages ({} bytes)",
            request.len(),
            output.page_count,
            output.bytes.len()
        ));
        Ok(output)
    }

    /// Parse one document and move its pages and objects into `collected`
    ///
    /// The parsed document is dropped on return; only its objects live on.
    fn append_document(
        &self,
        collected: &mut Collected,
        source: &SourceDocument,
    ) -> std::result::Result<(), CorruptPdf> {
        let loaded = load_pdf(&source.bytes, self.options.header_search_window)?;
        if loaded.recovered {
            self.diag.warn(format_args!(
                "{}: rebuilt damaged cross-reference table",
                source.declared_name
            ));
        }
        let mut doc = loaded.document;

        // Renumber objects in this document to avoid conflicts
        doc.renumber_objects_with(collected.max_id);
        collected.max_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for &page_id in &pages {
            flatten_inherited(&mut doc, page_id)?;
        }

        let page_set: BTreeSet<ObjectId> = pages.iter().copied().collect();
        for (id, object) in doc.objects {
            if !page_set.contains(&id) && is_structural(&object) {
                continue;
            }
            collected.objects.insert(id, object);
        }
        collected.page_ids.extend(pages);

        Ok(())
    }

    /// Build the merged page tree and serialize it
    fn assemble(&self, collected: Collected) -> Result<MergedOutput> {
        let Collected {
            objects,
            page_ids,
            max_id,
        } = collected;

        let mut merged_doc = Document::with_version(self.options.version.as_str());

        // Add all collected objects FIRST
        merged_doc.objects.extend(objects);

        // Keep new_object_id() clear of the ids just added
        merged_doc.max_id = max_id - 1;

        let pages_id = merged_doc.new_object_id();

        let kids: Vec<Object> = page_ids.iter().map(|&id| Object::Reference(id)).collect();

        let mut pages_object = Dictionary::new();
        pages_object.set("Type", Object::Name(b"Pages".to_vec()));
        pages_object.set("Count", Object::Integer(page_ids.len() as i64));
        pages_object.set("Kids", Object::Array(kids));

        let catalog_id = merged_doc.new_object_id();
        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));

        merged_doc
            .objects
            .insert(catalog_id, Object::Dictionary(catalog));
        merged_doc
            .objects
            .insert(pages_id, Object::Dictionary(pages_object));
        merged_doc.trailer.set("Root", Object::Reference(catalog_id));

        for &page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = merged_doc.get_object_mut(page_id) {
                dict.set("Parent", Object::Reference(pages_id));
            }
        }

        let stamped_at = self.options.stamp_dates.then(Utc::now);
        stamp_info(&mut merged_doc, self.options.producer.as_deref(), stamped_at);

        let expected = page_ids.len();
        let linked = merged_doc.get_pages().len();
        let declared = declared_page_count(&merged_doc)?;
        if linked != expected || declared != expected {
            let actual = if linked != expected { linked } else { declared };
            return Err(Error::PageCountMismatch { expected, actual });
        }

        if self.options.compress {
            merged_doc.compress();
        }

        let mut bytes = Vec::new();
        merged_doc.save_to(&mut bytes)?;

        Ok(MergedOutput {
            bytes,
            page_count: expected,
        })
    }
}

/// Merge PDF byte buffers with default options
///
/// Documents are named by their position in error reports.
pub fn merge_pdfs<D: AsRef<[u8]>>(documents: &[D]) -> Result<MergedOutput> {
    let request: MergeRequest = documents
        .iter()
        .enumerate()
        .map(|(i, bytes)| SourceDocument::new(format!("document {}", i), bytes.as_ref().to_vec()))
        .collect();
    Merger::default().merge(&request)
}

fn is_structural(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        _ => return false,
    };
    match dict.get(b"Type").and_then(Object::as_name) {
        Ok(name) => STRUCTURAL_TYPES.iter().any(|t| *t == name),
        Err(_) => false,
    }
}

/// Copy attributes the page inherits from its ancestors onto the page itself
///
/// Once the page is re-parented under the merged tree, the old ancestors
/// are gone, so anything not set on the page would otherwise be lost.
fn flatten_inherited(doc: &mut Document, page_id: ObjectId) -> std::result::Result<(), CorruptPdf> {
    let page = doc.get_dictionary(page_id)?;

    let mut missing: Vec<&[u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut inherited: Vec<(&[u8], Object)> = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut visited = BTreeSet::new();

    while let Some(parent_id) = parent {
        if missing.is_empty() || !visited.insert(parent_id) {
            break;
        }
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((*key, value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    if inherited.is_empty() {
        return Ok(());
    }
    let page = doc.get_dictionary_mut(page_id)?;
    for (key, value) in inherited {
        page.set(key.to_vec(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::capture::CaptureLog;
    use crate::fixtures::labeled_pdf;
    use crate::pdf::metadata::page_contents;
    use log::Level;

    fn request(docs: &[(&str, Vec<u8>)]) -> MergeRequest {
        docs.iter()
            .map(|(name, bytes)| SourceDocument::new(*name, bytes.clone()))
            .collect()
    }

    fn labels(output: &MergedOutput) -> Vec<String> {
        page_contents(output.as_bytes())
            .unwrap()
            .iter()
            .map(|content| {
                let text = String::from_utf8_lossy(content);
                let start = text.find('(').unwrap() + 1;
                let end = text[start..].find(')').unwrap() + start;
                text[start..end].to_string()
            })
            .collect()
    }

    #[test]
    fn test_merge_options_default() {
        let options = MergeOptions::default();
        assert!(options.compress);
        assert_eq!(options.version, "1.5");
        assert_eq!(options.producer.as_deref(), Some("report-merge"));
    }

    #[test]
    fn test_merge_single_document() {
        let output = merge_pdfs(&[labeled_pdf(&["A1", "A2", "A3"])]).unwrap();
        assert_eq!(output.page_count(), 3);
        assert_eq!(labels(&output), ["A1", "A2", "A3"]);
    }

    #[test]
    fn test_merge_keeps_request_order() {
        let a = labeled_pdf(&["A1"]);
        let b = labeled_pdf(&["B1", "B2"]);

        assert_eq!(labels(&merge_pdfs(&[&a, &b]).unwrap()), ["A1", "B1", "B2"]);
        assert_eq!(labels(&merge_pdfs(&[&b, &a]).unwrap()), ["B1", "B2", "A1"]);
    }

    #[test]
    fn test_merge_duplicates_are_kept() {
        let a = labeled_pdf(&["A1", "A2"]);
        let output = merge_pdfs(&[&a, &a]).unwrap();
        assert_eq!(labels(&output), ["A1", "A2", "A1", "A2"]);
    }

    #[test]
    fn test_merge_empty_request() {
        let empty: [Vec<u8>; 0] = [];
        assert!(matches!(merge_pdfs(&empty), Err(Error::NoDocuments)));
    }

    #[test]
    fn test_merge_reports_offending_index() {
        let log = CaptureLog::default();
        let merger = Merger::with_diagnostics(MergeOptions::default(), Diagnostics::new(&log));
        let request = request(&[
            ("report.pdf", labeled_pdf(&["A1", "A2", "A3"])),
            ("broken.pdf", b"%PDF-1.4\nthis is not a pdf".to_vec()),
            ("extra.pdf", labeled_pdf(&["C1", "C2"])),
        ]);

        let err = merger.merge(&request).unwrap_err();
        assert_eq!(err.offending_index(), Some(1));
        assert!(matches!(err, Error::Merge { ref name, .. } if name == "broken.pdf"));

        let errors = log.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("document 1 (broken.pdf)"));
    }

    #[test]
    fn test_merge_inherits_resources_and_mediabox() {
        let output = merge_pdfs(&[labeled_pdf(&["A1"])]).unwrap();
        let doc = Document::load_mem(output.as_bytes()).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();

        assert!(page.has(b"Resources"));
        assert!(page.has(b"MediaBox"));
    }

    #[test]
    fn test_merge_drops_source_catalogs() {
        let a = labeled_pdf(&["A1"]);
        let output = merge_pdfs(&[&a, &a, &a]).unwrap();
        let doc = Document::load_mem(output.as_bytes()).unwrap();

        let catalogs = doc
            .objects
            .values()
            .filter(|obj| {
                obj.as_dict()
                    .and_then(|d| d.get(b"Type"))
                    .and_then(Object::as_name)
                    .map(|name| name == b"Catalog")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(catalogs, 1);
    }

    #[test]
    fn test_merge_cancelled_at_boundary() {
        let merger = Merger::default();
        let request = request(&[("a.pdf", labeled_pdf(&["A1"]))]);
        let cancel = AtomicBool::new(true);

        let err = merger.merge_cancellable(&request, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled { next_index: 0 }));
    }

    #[test]
    fn test_merge_honours_header_search_window() {
        let mut padded = vec![b'#'; 2000];
        padded.extend_from_slice(&labeled_pdf(&["B1"]));
        let request = request(&[("a.pdf", labeled_pdf(&["A1"])), ("b.pdf", padded)]);

        let err = Merger::default().merge(&request).unwrap_err();
        assert!(matches!(err, Error::Merge { index: 1, .. }));

        let options = MergeOptions {
            header_search_window: 4096,
            ..MergeOptions::default()
        };
        let output = Merger::new(options).merge(&request).unwrap();
        assert_eq!(output.page_count(), 2);
    }

    #[test]
    fn test_merge_without_dates_is_reproducible() {
        let options = MergeOptions {
            stamp_dates: false,
            ..MergeOptions::default()
        };
        let merger = Merger::new(options);
        let request = request(&[
            ("a.pdf", labeled_pdf(&["A1"])),
            ("b.pdf", labeled_pdf(&["B1", "B2"])),
        ]);

        let first = merger.merge(&request).unwrap();
        let second = merger.merge(&request).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_merged_output_write_to() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("merged.pdf");

        let output = merge_pdfs(&[labeled_pdf(&["A1"])]).unwrap();
        output.write_to(&path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), output.as_bytes());
    }
}
