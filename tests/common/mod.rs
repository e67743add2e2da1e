//! Fixture builders shared by the integration tests

#![allow(dead_code)]

use std::sync::Mutex;

use log::{Level, Log, Metadata, Record};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// Build a PDF with one page per label, each page showing its label
///
/// Every page carries its own Resources and a US Letter MediaBox.
pub fn labeled_pdf(labels: &[&str]) -> Vec<u8> {
    build_pdf(labels, false)
}

/// Like [`labeled_pdf`], but Resources and an A4 MediaBox sit on the
/// Pages node and every page inherits them
pub fn inherited_labeled_pdf(labels: &[&str]) -> Vec<u8> {
    build_pdf(labels, true)
}

fn build_pdf(labels: &[&str], inherited: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    };
    let media_box: Vec<Object> = if inherited {
        vec![0.into(), 0.into(), 595.into(), 842.into()]
    } else {
        vec![0.into(), 0.into(), 612.into(), 792.into()]
    };

    let mut kids: Vec<Object> = Vec::new();
    for label in labels {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(*label)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        if !inherited {
            page.set("Resources", resources.clone());
            page.set("MediaBox", media_box.clone());
        }
        kids.push(doc.add_object(page).into());
    }

    let mut pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
    };
    if inherited {
        pages.set("Resources", resources);
        pages.set("MediaBox", media_box);
    }
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("Failed to save fixture");
    buffer
}

/// Copy of `bytes` with the object behind page `page_number` deleted, so the
/// page tree still lists the page but it can no longer be resolved
pub fn without_page_object(bytes: &[u8], page_number: u32) -> Vec<u8> {
    let mut doc = Document::load_mem(bytes).expect("Failed to load fixture");
    let page_id = doc.get_pages()[&page_number];
    doc.objects.remove(&page_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("Failed to save fixture");
    buffer
}

/// Page labels of a PDF, in page order
pub fn page_labels(bytes: &[u8]) -> Vec<String> {
    report_merge::pdf::page_contents(bytes)
        .expect("Failed to read page contents")
        .iter()
        .map(|content| {
            let text = String::from_utf8_lossy(content);
            let start = text.find('(').expect("label start") + 1;
            let end = text[start..].find(')').expect("label end") + start;
            text[start..end].to_string()
        })
        .collect()
}

/// Encode a small image in the given format
pub fn image_bytes(format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8 * 16, y as u8 * 16, 128]));
    let mut cursor = std::io::Cursor::new(Vec::new());
    img.write_to(&mut cursor, format).expect("Failed to encode fixture");
    cursor.into_inner()
}

/// Logger that keeps every record in memory
#[derive(Default)]
pub struct CaptureLog {
    records: Mutex<Vec<(Level, String)>>,
}

impl CaptureLog {
    pub fn all(&self) -> Vec<(Level, String)> {
        self.records.lock().unwrap().clone()
    }
}

impl Log for CaptureLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}
