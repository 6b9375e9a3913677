//! Watermark placement calculations
//!
//! All coordinates are PDF points with the origin at the bottom-left corner
//! of the page.

use crate::error::{Error, Result};
use crate::watermark::{Spacing, WatermarkSpec};

/// Auto spacing: horizontal distance is `font_size * 6`, clamped to [180, 600]
const TILE_SPACING_X_MULT: f32 = 6.0;
const TILE_SPACING_X_MIN: f32 = 180.0;
const TILE_SPACING_X_MAX: f32 = 600.0;

/// Auto spacing: vertical distance is `font_size * 3`, clamped to [120, 400]
const TILE_SPACING_Y_MULT: f32 = 3.0;
const TILE_SPACING_Y_MIN: f32 = 120.0;
const TILE_SPACING_Y_MAX: f32 = 400.0;

/// Upper bound on text instances in one tiled layer
pub const MAX_PLACEMENTS: usize = 100_000;

/// Page size in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// US Letter size (8.5" × 11")
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// A4 size (210mm × 297mm)
    pub fn a4() -> Self {
        Self::new(595.28, 841.89)
    }

    /// 16:9 widescreen slide (13.333" × 7.5")
    pub fn widescreen() -> Self {
        Self::new(960.0, 540.0)
    }

    /// Hashable key, quantized to 1/100 pt
    ///
    /// Geometries that differ by less than the quantum share a key; anything
    /// else is a distinct geometry with no interpolation.
    pub fn key(&self) -> GeometryKey {
        GeometryKey(
            (self.width * 100.0).round() as i64,
            (self.height * 100.0).round() as i64,
        )
    }

    fn validate(&self) -> Result<()> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if !valid(self.width) || !valid(self.height) {
            return Err(Error::config(format!(
                "page geometry must be positive, got {} x {}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Cache key for a [`PageGeometry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey(i64, i64);

/// Anchor of one watermark text instance
///
/// The text is centered horizontally on `(x, y)` with its baseline at `y`,
/// then rotated about that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

/// Clamp `value` into `[lo, hi]`
fn clamp(value: f32, lo: f32, hi: f32) -> f32 {
    value.max(lo).min(hi)
}

/// Effective grid spacing `(spacing_x, spacing_y)` for a watermark
pub fn tile_spacing(spec: &WatermarkSpec) -> (f32, f32) {
    let size = spec.font_size();
    let x = match spec.spacing_x() {
        Spacing::Explicit(v) => v,
        Spacing::Auto => clamp(size * TILE_SPACING_X_MULT, TILE_SPACING_X_MIN, TILE_SPACING_X_MAX),
    };
    let y = match spec.spacing_y() {
        Spacing::Explicit(v) => v,
        Spacing::Auto => clamp(size * TILE_SPACING_Y_MULT, TILE_SPACING_Y_MIN, TILE_SPACING_Y_MAX),
    };
    (x, y)
}

/// Compute every text placement for a page of the given geometry
///
/// Non-tiled watermarks yield a single placement at the page center. Tiled
/// watermarks yield a grid that starts one spacing unit before the page
/// origin and runs until it passes `(width + spacing_x, height + spacing_y)`,
/// so rotated text still reaches the page edges.
pub fn layout(spec: &WatermarkSpec, geometry: PageGeometry) -> Result<Vec<Placement>> {
    geometry.validate()?;
    if !spec.font_size().is_finite() || spec.font_size() <= 0.0 {
        return Err(Error::config("font size must be positive"));
    }

    let rotation = spec.rotation();

    if !spec.tiled() {
        return Ok(vec![Placement {
            x: geometry.width / 2.0,
            y: geometry.height / 2.0,
            rotation,
        }]);
    }

    let (spacing_x, spacing_y) = tile_spacing(spec);

    // Count in f64 before allocating anything
    let grid_size = axis_len(geometry.width, spacing_x) * axis_len(geometry.height, spacing_y);
    if !grid_size.is_finite() || grid_size > MAX_PLACEMENTS as f64 {
        return Err(Error::config(format!(
            "tile grid of {:.0} placements for a {} x {} page exceeds {}; increase the spacing",
            grid_size, geometry.width, geometry.height, MAX_PLACEMENTS
        )));
    }

    let xs = grid_axis(geometry.width, spacing_x);
    let ys = grid_axis(geometry.height, spacing_y);

    let mut placements = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            placements.push(Placement { x, y, rotation });
        }
    }

    Ok(placements)
}

/// Upper estimate of the grid points `grid_axis` yields
fn axis_len(extent: f32, spacing: f32) -> f64 {
    let (extent, spacing) = (f64::from(extent), f64::from(spacing));
    ((extent + 2.0 * spacing) / spacing).floor() + 1.0
}

/// Grid coordinates along one axis: `-spacing, 0, spacing, ...` up to `extent + spacing`
fn grid_axis(extent: f32, spacing: f32) -> Vec<f32> {
    let end = extent + spacing;
    // Index-based stepping keeps large grids free of accumulated float error
    let steps = ((end + spacing) / spacing).floor() as usize;
    (0..=steps)
        .map(|i| -spacing + i as f32 * spacing)
        .filter(|&v| v <= end + 1e-3)
        .collect()
}
