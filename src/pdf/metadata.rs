//! PDF metadata and page geometry extraction

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{Error, Result};
use crate::layout::PageGeometry;

/// Guard against cyclic `/Parent` chains in broken page trees
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Largest page side PDF allows, in user space units
pub const MAX_PAGE_EXTENT: f32 = 14400.0;

/// Load a PDF, mapping every failure to an input error
pub fn load_document(path: &Path) -> Result<Document> {
    if !path.exists() {
        return Err(Error::Input(format!("file not found: {}", path.display())));
    }
    Document::load(path)
        .map_err(|e| Error::Input(format!("cannot read PDF {}: {}", path.display(), e)))
}

/// Count pages by reading the Count field from the Pages dictionary
///
/// Falls back to walking the page tree when Count is missing or not an integer.
pub fn count_pages_from_catalog(doc: &Document) -> Result<usize> {
    let catalog = doc
        .catalog()
        .map_err(|e| Error::Input(format!("missing document catalog: {}", e)))?;

    let pages_id = match catalog.get(b"Pages") {
        Ok(Object::Reference(id)) => *id,
        _ => return Err(Error::Input("catalog has no Pages reference".to_string())),
    };

    let pages = doc
        .get_dictionary(pages_id)
        .map_err(|e| Error::Input(format!("Pages is not a dictionary: {}", e)))?;

    match pages.get(b"Count") {
        Ok(Object::Integer(n)) if *n >= 0 => Ok(*n as usize),
        _ => Ok(doc.get_pages().len()),
    }
}

/// Count the number of pages in a PDF file
pub fn count_pages(path: &Path) -> Result<usize> {
    let doc = load_document(path)?;
    count_pages_from_catalog(&doc)
}

/// PDF metadata
#[derive(Debug, Clone)]
pub struct PdfMetadata {
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
    /// Distinct page sizes, in order of first appearance
    pub geometries: Vec<PageGeometry>,
}

/// Extract metadata from a PDF file
pub fn extract_metadata(path: &Path) -> Result<PdfMetadata> {
    let doc = load_document(path)?;
    let page_count = count_pages_from_catalog(&doc)?;

    let mut geometries: Vec<PageGeometry> = Vec::new();
    for page_id in doc.get_pages().into_values() {
        let geometry = page_box(&doc, page_id)?.geometry;
        if !geometries.iter().any(|g| g.key() == geometry.key()) {
            geometries.push(geometry);
        }
    }

    let (title, author) = match info_dictionary(&doc) {
        Some(info) => (info_string(info, b"Title"), info_string(info, b"Author")),
        None => (None, None),
    };

    Ok(PdfMetadata {
        page_count,
        title,
        author,
        geometries,
    })
}

/// A page's visible area: lower-left origin plus size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f32,
    pub y: f32,
    pub geometry: PageGeometry,
}

/// Read the MediaBox of a page, following inheritance through `/Parent`
pub fn page_box(doc: &Document, page_id: ObjectId) -> Result<PageBox> {
    let mut current = doc
        .get_dictionary(page_id)
        .map_err(|e| Error::Input(format!("page {:?} is not a dictionary: {}", page_id, e)))?;

    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(media_box) = current.get(b"MediaBox") {
            let page = parse_box(doc, media_box)
                .ok_or_else(|| Error::Input(format!("page {:?} has a malformed MediaBox", page_id)))?;
            return check_extent(page_id, page);
        }
        current = match current.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => doc
                .get_dictionary(*parent_id)
                .map_err(|e| Error::Input(format!("broken page tree: {}", e)))?,
            _ => break,
        };
    }

    Err(Error::Input(format!("page {:?} has no MediaBox", page_id)))
}

fn check_extent(page_id: ObjectId, page: PageBox) -> Result<PageBox> {
    let PageGeometry { width, height } = page.geometry;
    let in_range = |v: f32| v.is_finite() && v <= MAX_PAGE_EXTENT;
    if !page.x.is_finite() || !page.y.is_finite() || !in_range(width) || !in_range(height) {
        return Err(Error::Input(format!(
            "page {:?} MediaBox {} x {} is outside the PDF size limit of {} units",
            page_id, width, height, MAX_PAGE_EXTENT
        )));
    }
    Ok(page)
}

fn parse_box(doc: &Document, obj: &Object) -> Option<PageBox> {
    let array = resolve(doc, obj)?.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(array) {
        *slot = number(resolve(doc, item)?)?;
    }

    // Corners may come in any order
    let [x0, y0, x1, y1] = values;
    let (llx, urx) = (x0.min(x1), x0.max(x1));
    let (lly, ury) = (y0.min(y1), y0.max(y1));

    Some(PageBox {
        x: llx,
        y: lly,
        geometry: PageGeometry::new(urx - llx, ury - lly),
    })
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn info_string(info: &Dictionary, key: &[u8]) -> Option<String> {
    match info.get(key).ok()? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise bytes as Latin-1
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
