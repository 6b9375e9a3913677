//! End-to-end flows: watermark a PDF, or convert a deck and watermark it

use std::path::Path;

use log::info;
use tempfile::TempDir;

use crate::convert::Converter;
use crate::error::Result;
use crate::font::{resolve_font, FontReference};
use crate::pdf::overlay::{compose, ComposeReport};
use crate::watermark::{WatermarkOptions, WatermarkSpec};

/// Validate `options` and resolve the font they ask for
pub fn build_spec(options: &WatermarkOptions, env_override: Option<&Path>) -> Result<WatermarkSpec> {
    options.validate()?;
    let font = resolve_font(options.font_path.as_deref(), env_override, &options.text)?;
    WatermarkSpec::new(options, font)
}

/// Watermark every page of `input` into `output`
pub fn watermark_pdf(
    input: &Path,
    output: &Path,
    options: &WatermarkOptions,
    env_override: Option<&Path>,
) -> Result<ComposeReport> {
    let spec = build_spec(options, env_override)?;
    compose(input, output, &spec)
}

/// Same as [`watermark_pdf`] with an already resolved font
pub fn watermark_pdf_with_font(
    input: &Path,
    output: &Path,
    options: &WatermarkOptions,
    font: FontReference,
) -> Result<ComposeReport> {
    let spec = WatermarkSpec::new(options, font)?;
    compose(input, output, &spec)
}

/// Convert `source` to PDF with `converter`, then watermark the result into `output`
///
/// Options and font are checked before the converter runs. The intermediate
/// PDF lives in a temporary directory that is removed on every exit path.
pub fn convert_and_watermark(
    source: &Path,
    output: &Path,
    options: &WatermarkOptions,
    converter: &Converter,
    env_override: Option<&Path>,
) -> Result<ComposeReport> {
    let spec = build_spec(options, env_override)?;

    let scratch = TempDir::new()?;
    let converted = converter.convert(source, scratch.path())?;
    info!("Converted {} -> {}", source.display(), converted.display());

    compose(&converted, output, &spec)
}
