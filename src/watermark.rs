//! Watermark options and the validated watermark description

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::font::FontReference;

/// Raw watermark options as given by a caller
///
/// Options are unchecked; [`WatermarkSpec::new`] validates them once a font
/// has been resolved.
#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    /// Text to stamp on every page
    pub text: String,
    /// Fill alpha, 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f32,
    /// Rotation in degrees, counter-clockwise
    pub rotation: f32,
    /// Font size in points
    pub font_size: f32,
    /// Repeat the text in a grid instead of one centered stamp
    pub tiled: bool,
    /// Horizontal grid spacing in points (auto when `None`)
    pub spacing_x: Option<f32>,
    /// Vertical grid spacing in points (auto when `None`)
    pub spacing_y: Option<f32>,
    /// Font file to use; failing to load it is fatal
    pub font_path: Option<PathBuf>,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            opacity: 0.3,
            rotation: 45.0,
            font_size: 40.0,
            tiled: false,
            spacing_x: None,
            spacing_y: None,
            font_path: None,
        }
    }
}

impl WatermarkOptions {
    /// Check the options without resolving a font
    ///
    /// Rejects empty text, opacity outside `[0, 1]`, non-positive font size
    /// and non-positive explicit spacing.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::config("watermark text must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(Error::config(format!(
                "opacity must be between 0.0 and 1.0, got {}",
                self.opacity
            )));
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(Error::config(format!(
                "font size must be positive, got {}",
                self.font_size
            )));
        }
        if !self.rotation.is_finite() {
            return Err(Error::config("rotation must be a finite angle"));
        }
        for (axis, spacing) in [("x", self.spacing_x), ("y", self.spacing_y)] {
            if let Some(value) = spacing {
                if !value.is_finite() || value <= 0.0 {
                    return Err(Error::config(format!(
                        "spacing_{} must be positive, got {}",
                        axis, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Grid spacing along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Spacing {
    /// Derived from the font size
    Auto,
    /// Fixed distance in points
    Explicit(f32),
}

impl From<Option<f32>> for Spacing {
    fn from(value: Option<f32>) -> Self {
        value.map_or(Spacing::Auto, Spacing::Explicit)
    }
}

/// A validated, immutable watermark description
#[derive(Debug, Clone)]
pub struct WatermarkSpec {
    text: String,
    opacity: f32,
    rotation: f32,
    font_size: f32,
    font: FontReference,
    tiled: bool,
    spacing_x: Spacing,
    spacing_y: Spacing,
}

impl WatermarkSpec {
    /// Validate `options` and bind them to a resolved font
    ///
    /// Rotation is normalized into `[0, 360)`.
    pub fn new(options: &WatermarkOptions, font: FontReference) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            text: options.text.clone(),
            opacity: options.opacity,
            rotation: options.rotation.rem_euclid(360.0),
            font_size: options.font_size,
            font,
            tiled: options.tiled,
            spacing_x: options.spacing_x.into(),
            spacing_y: options.spacing_y.into(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Rotation in degrees, normalized into `[0, 360)`
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    pub fn font(&self) -> &FontReference {
        &self.font
    }

    pub fn tiled(&self) -> bool {
        self.tiled
    }

    pub fn spacing_x(&self) -> Spacing {
        self.spacing_x
    }

    pub fn spacing_y(&self) -> Spacing {
        self.spacing_y
    }
}
