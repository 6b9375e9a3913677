//! Slide Watermark Library
//!
//! Stamps text watermarks onto PDFs, typically slide decks exported from an
//! office suite. This library provides functionality to:
//! - Resolve a font able to render the watermark text, CJK included
//! - Lay out a single centered stamp or a repeating tile grid
//! - Render one transparent watermark layer per distinct page size
//! - Overlay the layer onto every page while keeping page geometry
//! - Drive an external converter to turn presentations into PDF first
//!
//! # Example
//!
//! ```no_run
//! use slide_watermark::WatermarkOptions;
//! use slide_watermark::pipeline::watermark_pdf;
//! use std::path::Path;
//!
//! let options = WatermarkOptions {
//!     text: "CONFIDENTIAL".to_string(),
//!     tiled: true,
//!     ..Default::default()
//! };
//!
//! let report = watermark_pdf(Path::new("deck.pdf"), Path::new("deck-marked.pdf"), &options, None)
//!     .expect("Failed to watermark PDF");
//! println!("{} pages", report.pages);
//! ```

pub mod error;
pub mod watermark;
pub mod layout;
pub mod font;
pub mod pdf;
pub mod convert;
pub mod pipeline;

// Re-export commonly used items
pub use error::{Error, Result};
pub use font::{FontReference, FontResolver};
pub use layout::{layout, PageGeometry, Placement};
pub use pdf::{compose, ComposeReport, LayerRenderer, WatermarkLayer};
pub use watermark::{WatermarkOptions, WatermarkSpec};
