//! Watermark layer rendering
//!
//! A layer is the content stream that draws every placement of the
//! watermark text for one page geometry. It can be attached to existing pages
//! as a Form XObject or written out as a standalone single-page PDF.

use std::path::Path;
use std::sync::Arc;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tiny_skia_path::Transform;

use crate::error::{Error, Result};
use crate::font::FontReference;
use crate::layout::{layout, PageGeometry, Placement};
use crate::pdf::font::{embed_font, requires_opentype_embedding, ShapedText};
use crate::pdf::overlay::save_atomically;
use crate::watermark::WatermarkSpec;

/// Fill gray level of the watermark text (0 = black, 1 = white)
pub const WATERMARK_GRAY: f32 = 0.5;

/// Resource names used inside a layer's content stream
pub(crate) const FONT_RESOURCE: &str = "WmF1";
pub(crate) const GSTATE_RESOURCE: &str = "WmGS1";

/// Renders watermark layers for one [`WatermarkSpec`]
///
/// The text is shaped once and reused for every geometry.
pub struct LayerRenderer<'a> {
    spec: &'a WatermarkSpec,
    shaped: Arc<ShapedText>,
}

impl<'a> LayerRenderer<'a> {
    pub fn new(spec: &'a WatermarkSpec) -> Result<Self> {
        let shaped = ShapedText::shape(spec.font(), spec.text())?;
        Ok(Self {
            spec,
            shaped: Arc::new(shaped),
        })
    }

    /// Shaped watermark text
    pub fn shaped(&self) -> &ShapedText {
        &self.shaped
    }

    /// Lay out and render the layer for a page geometry
    pub fn render_geometry(&self, geometry: PageGeometry) -> Result<WatermarkLayer> {
        let placements = layout(self.spec, geometry)?;
        self.render(&placements, geometry)
    }

    /// Draw `placements` onto a transparent canvas of the given geometry
    pub fn render(&self, placements: &[Placement], geometry: PageGeometry) -> Result<WatermarkLayer> {
        let font_size = self.spec.font_size();
        let half_width = self.shaped.width(font_size) / 2.0;
        let text = self.shaped.hex_string();

        let mut content = String::new();
        content.push_str("q\n");
        content.push_str(&format!("/{} gs\n", GSTATE_RESOURCE));
        content.push_str(&format!("{} g\n", num(WATERMARK_GRAY)));
        content.push_str("BT\n");
        content.push_str(&format!("/{} {} Tf\n", FONT_RESOURCE, num(font_size)));

        for placement in placements {
            if !placement.x.is_finite() || !placement.y.is_finite() || !placement.rotation.is_finite() {
                return Err(Error::render(format!("invalid placement {:?}", placement)));
            }

            // Center the text on the anchor, then rotate about it
            let m = Transform::from_translate(placement.x, placement.y)
                .pre_concat(Transform::from_rotate(placement.rotation))
                .pre_concat(Transform::from_translate(-half_width, 0.0));

            content.push_str(&format!(
                "{} {} {} {} {} {} Tm\n",
                num(m.sx),
                num(m.ky),
                num(m.kx),
                num(m.sy),
                num(m.tx),
                num(m.ty)
            ));
            content.push_str(&format!("{} Tj\n", text));
        }

        content.push_str("ET\n");
        content.push_str("Q\n");

        Ok(WatermarkLayer {
            geometry,
            content: content.into_bytes(),
            placements: placements.len(),
            opacity: self.spec.opacity(),
            font: self.spec.font().clone(),
            shaped: Arc::clone(&self.shaped),
        })
    }
}

/// Render one watermark layer
pub fn render(
    spec: &WatermarkSpec,
    placements: &[Placement],
    geometry: PageGeometry,
) -> Result<WatermarkLayer> {
    LayerRenderer::new(spec)?.render(placements, geometry)
}

/// A rendered, immutable watermark page for one geometry
#[derive(Debug, Clone)]
pub struct WatermarkLayer {
    geometry: PageGeometry,
    content: Vec<u8>,
    placements: usize,
    opacity: f32,
    font: FontReference,
    shaped: Arc<ShapedText>,
}

impl WatermarkLayer {
    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Content stream operators drawing the watermark
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Number of text instances drawn
    pub fn placement_count(&self) -> usize {
        self.placements
    }

    /// Add this layer to `doc` as a Form XObject
    ///
    /// `resources` comes from [`LayerResources::add_to`] and can be shared
    /// by every layer of the same document.
    pub fn add_to_document(&self, doc: &mut Document, resources: &LayerResources) -> ObjectId {
        let mut xobject_dict = Dictionary::new();
        xobject_dict.set("Type", Object::Name(b"XObject".to_vec()));
        xobject_dict.set("Subtype", Object::Name(b"Form".to_vec()));
        xobject_dict.set("FormType", Object::Integer(1));
        xobject_dict.set("BBox", Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(self.geometry.width),
            Object::Real(self.geometry.height),
        ]));
        xobject_dict.set("Matrix", Object::Array(vec![
            Object::Integer(1),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(1),
            Object::Integer(0),
            Object::Integer(0),
        ]));
        xobject_dict.set("Resources", Object::Dictionary(resources.dictionary()));

        doc.add_object(Object::Stream(Stream::new(xobject_dict, self.content.clone())))
    }

    /// Build a standalone single-page PDF containing only this layer
    pub fn to_document(&self) -> Result<Document> {
        let version = if requires_opentype_embedding(&self.font) { "1.6" } else { "1.4" };
        let mut doc = Document::with_version(version);

        let resources = LayerResources::add_to(&mut doc, &self.font, &self.shaped, self.opacity)?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), self.content.clone()));

        let pages_id = doc.new_object_id();

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set("MediaBox", Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(self.geometry.width),
            Object::Real(self.geometry.height),
        ]));
        page.set("Resources", Object::Dictionary(resources.dictionary()));
        page.set("Contents", Object::Reference(content_id));
        let page_id = doc.add_object(Object::Dictionary(page));

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(1));
        pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(Object::Dictionary(catalog));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        Ok(doc)
    }

    /// Write this layer as a standalone single-page PDF
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut doc = self.to_document()?;
        save_atomically(&mut doc, path)
    }
}

/// Font and graphics state objects shared by the layers of one document
#[derive(Debug, Clone, Copy)]
pub struct LayerResources {
    pub font_id: ObjectId,
    pub gstate_id: ObjectId,
}

impl LayerResources {
    /// Add the watermark font and an opacity graphics state to `doc`
    pub fn add_to(
        doc: &mut Document,
        font: &FontReference,
        shaped: &ShapedText,
        opacity: f32,
    ) -> Result<Self> {
        let font_id = embed_font(doc, font, shaped)?;

        let mut gstate = Dictionary::new();
        gstate.set("Type", Object::Name(b"ExtGState".to_vec()));
        gstate.set("ca", Object::Real(opacity));
        gstate.set("CA", Object::Real(opacity));
        let gstate_id = doc.add_object(Object::Dictionary(gstate));

        Ok(Self { font_id, gstate_id })
    }

    /// Resources dictionary for a layer content stream
    pub fn dictionary(&self) -> Dictionary {
        let mut fonts = Dictionary::new();
        fonts.set(FONT_RESOURCE, Object::Reference(self.font_id));

        let mut gstates = Dictionary::new();
        gstates.set(GSTATE_RESOURCE, Object::Reference(self.gstate_id));

        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));
        resources.set("ExtGState", Object::Dictionary(gstates));
        resources
    }
}

/// Format a number for a content stream: at most 4 decimals, no trailing zeros
fn num(value: f32) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}
