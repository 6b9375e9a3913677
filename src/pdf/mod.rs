//! PDF manipulation module

pub mod font;
pub mod layer;
pub mod metadata;
pub mod overlay;

// Re-export commonly used items
pub use layer::{render, LayerRenderer, WatermarkLayer};
pub use metadata::{count_pages, extract_metadata, page_box, PageBox, PdfMetadata};
pub use overlay::{compose, compose_document, ComposeReport};
