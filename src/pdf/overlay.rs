//! Overlay watermark layers onto the pages of an existing PDF
//!
//! Every page keeps its original content; the watermark is drawn on top as a
//! Form XObject. Pages that share a geometry share one XObject.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::layout::GeometryKey;
use crate::pdf::font::requires_opentype_embedding;
use crate::pdf::layer::{LayerRenderer, LayerResources};
use crate::pdf::metadata::{load_document, page_box, PageBox};
use crate::watermark::WatermarkSpec;

/// Base name of the watermark entry in a page's XObject resources
const XOBJECT_NAME: &str = "Watermark";

const PRODUCER: &str = concat!("slide-watermark ", env!("CARGO_PKG_VERSION"));

/// Summary of a completed composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeReport {
    /// Pages in the output document
    pub pages: usize,
    /// Distinct watermark layers rendered (one per page geometry)
    pub layers: usize,
    /// Name of the font the watermark was drawn with
    pub font: String,
}

/// Watermark every page of `input` and write the result to `output`
///
/// The output file is only created once the whole document has been
/// processed; on failure no partial output is left behind.
pub fn compose(input: &Path, output: &Path, spec: &WatermarkSpec) -> Result<ComposeReport> {
    let mut doc = load_document(input)?;

    let (pages, layers) = compose_document(&mut doc, spec)?;
    stamp_info(&mut doc);
    save_atomically(&mut doc, output)?;

    info!(
        "Watermarked {} page(s) of {} with {} layer(s) -> {}",
        pages,
        input.display(),
        layers,
        output.display()
    );

    Ok(ComposeReport {
        pages,
        layers,
        font: spec.font().name().to_string(),
    })
}

/// Watermark every page of an in-memory document
///
/// Returns `(pages, layers)`.
pub fn compose_document(doc: &mut Document, spec: &WatermarkSpec) -> Result<(usize, usize)> {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(Error::Input("document has no pages".to_string()));
    }
    let page_count = pages.len();

    ensure_version(doc, if requires_opentype_embedding(spec.font()) { "1.6" } else { "1.4" });

    let renderer = LayerRenderer::new(spec)?;
    let resources = LayerResources::add_to(doc, spec.font(), renderer.shaped(), spec.opacity())?;
    let save_state_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

    let mut layers: HashMap<GeometryKey, ObjectId> = HashMap::new();

    for (page_number, page_id) in pages {
        let page = page_box(doc, page_id)?;
        let key = page.geometry.key();

        let xobject_id = match layers.get(&key) {
            Some(id) => *id,
            None => {
                let layer = renderer.render_geometry(page.geometry)?;
                debug!(
                    "Rendered layer {:.2} x {:.2} with {} placement(s)",
                    page.geometry.width,
                    page.geometry.height,
                    layer.placement_count()
                );
                let id = layer.add_to_document(doc, &resources);
                layers.insert(key, id);
                id
            }
        };

        attach_layer(doc, page_id, &page, xobject_id, save_state_id)
            .map_err(|e| Error::render(format!("page {}: {}", page_number, e)))?;
    }

    let result_pages = doc.get_pages().len();
    if result_pages != page_count {
        return Err(Error::render(format!(
            "page count changed from {} to {}",
            page_count, result_pages
        )));
    }

    Ok((page_count, layers.len()))
}

/// Wrap the page's content in `q`/`Q` and draw the layer after it
fn attach_layer(
    doc: &mut Document,
    page_id: ObjectId,
    page: &PageBox,
    xobject_id: ObjectId,
    save_state_id: ObjectId,
) -> Result<()> {
    let mut resources = effective_resources(doc, page_id)?;
    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc
            .get_dictionary(*id)
            .map(|dict| dict.clone())
            .unwrap_or_default(),
        _ => Dictionary::new(),
    };

    let name = unique_name(&xobjects);
    xobjects.set(name.as_str(), Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let overlay = format!(
        "Q\nq\n1 0 0 1 {} {} cm\n/{} Do\nQ\n",
        page.x, page.y, name
    );
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay.into_bytes()));

    let mut contents = vec![Object::Reference(save_state_id)];
    contents.extend(existing_contents(doc, page_id)?);
    contents.push(Object::Reference(overlay_id));

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|obj| obj.as_dict_mut())
        .map_err(|e| Error::render(e.to_string()))?;
    page_dict.set("Resources", Object::Dictionary(resources));
    page_dict.set("Contents", Object::Array(contents));

    Ok(())
}

/// The page's resources, resolving references and inheritance from ancestors
fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut current = doc
        .get_dictionary(page_id)
        .map_err(|e| Error::render(e.to_string()))?;

    loop {
        match current.get(b"Resources") {
            Ok(Object::Dictionary(dict)) => return Ok(dict.clone()),
            Ok(Object::Reference(id)) => {
                return Ok(doc.get_dictionary(*id).map(|dict| dict.clone()).unwrap_or_default())
            }
            _ => {}
        }
        current = match current.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => match doc.get_dictionary(*parent_id) {
                Ok(parent) => parent,
                Err(_) => return Ok(Dictionary::new()),
            },
            _ => return Ok(Dictionary::new()),
        };
    }
}

/// The page's content stream references, flattened into a list
fn existing_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>> {
    let page_dict = doc
        .get_dictionary(page_id)
        .map_err(|e| Error::render(e.to_string()))?;

    let contents = match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            // Indirect array of streams
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Stream(stream)) => {
            return Err(Error::render(format!(
                "direct content stream of {} bytes cannot be referenced",
                stream.content.len()
            )))
        }
        _ => Vec::new(),
    };
    Ok(contents)
}

/// First of `Watermark`, `Watermark1`, `Watermark2`, ... not already used
fn unique_name(xobjects: &Dictionary) -> String {
    if !xobjects.has(XOBJECT_NAME.as_bytes()) {
        return XOBJECT_NAME.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", XOBJECT_NAME, n))
        .find(|name| !xobjects.has(name.as_bytes()))
        .unwrap_or_else(|| XOBJECT_NAME.to_string())
}

/// Raise the header version to at least `minimum`
fn ensure_version(doc: &mut Document, minimum: &str) {
    let parse = |v: &str| -> (u32, u32) {
        let mut parts = v.trim().split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (major, minor)
    };
    if parse(&doc.version) < parse(minimum) {
        debug!("Raising PDF version from {} to {}", doc.version, minimum);
        doc.version = minimum.to_string();
    }
}

/// Record the modification date and producer in the Info dictionary
fn stamp_info(doc: &mut Document) {
    let now = Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();

    let info_id = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) if doc.get_dictionary(*id).is_ok() => *id,
        _ => {
            let id = doc.add_object(Dictionary::new());
            doc.trailer.set("Info", Object::Reference(id));
            id
        }
    };

    if let Ok(info) = doc.get_object_mut(info_id).and_then(|obj| obj.as_dict_mut()) {
        info.set("ModDate", Object::String(now.into_bytes(), StringFormat::Literal));
        info.set("Producer", Object::String(PRODUCER.as_bytes().to_vec(), StringFormat::Literal));
    }
}

/// Save `doc` to a temporary file next to `path`, then move it into place
pub(crate) fn save_atomically(doc: &mut Document, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    doc.compress();
    doc.save_to(&mut tmp)
        .map_err(|e| Error::render(format!("cannot write PDF: {}", e)))?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
