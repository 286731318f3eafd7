//! Font discovery and single-glyph rasterization.
//!
//! An outline font is loaded from the first existing candidate path. When none
//! can be read or parsed the built-in 5x7 bitmap font takes over, so building a
//! glyph bank never fails because of a missing font.

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fallback_font;

/// Default glyph size in pixels per em.
pub const DEFAULT_FONT_SIZE: f32 = 16.0;

/// Smallest cell the encoder will use, whatever the font measures.
pub const MIN_CELL_WIDTH: u32 = 8;
pub const MIN_CELL_HEIGHT: u32 = 14;

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/ubuntu/UbuntuMono-R.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/Library/Fonts/Courier New.ttf",
];

enum FontKind {
    Outline { font: FontVec, path: Option<PathBuf> },
    Builtin,
}

/// A font that can render printable ASCII characters into cell bitmaps.
pub struct FontSource {
    kind: FontKind,
    size_px: f32,
}

impl FontSource {
    /// Load the preferred font if given, otherwise the first system candidate,
    /// falling back to the built-in bitmap font.
    pub fn load(preferred: Option<&Path>, size_px: f32) -> Self {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path, size_px) {
                Ok(font) => {
                    tracing::debug!("loaded font {}", path.display());
                    return font;
                }
                Err(e) => tracing::warn!("skipping font {}: {:#}", path.display(), e),
            }
        }

        tracing::warn!("no usable monospace font found, using built-in 5x7 bitmap font");
        Self::builtin(size_px)
    }

    pub fn from_file(path: &Path, size_px: f32) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
        let mut font = Self::from_bytes(data, size_px)
            .with_context(|| format!("parsing font {}", path.display()))?;
        if let FontKind::Outline { path: p, .. } = &mut font.kind {
            *p = Some(path.to_path_buf());
        }
        Ok(font)
    }

    pub fn from_bytes(data: Vec<u8>, size_px: f32) -> Result<Self> {
        let font = FontVec::try_from_vec(data).map_err(|e| anyhow!("invalid font data: {}", e))?;
        Ok(Self {
            kind: FontKind::Outline { font, path: None },
            size_px,
        })
    }

    pub fn builtin(size_px: f32) -> Self {
        Self {
            kind: FontKind::Builtin,
            size_px,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, FontKind::Builtin)
    }

    pub fn size_px(&self) -> f32 {
        self.size_px
    }

    /// Human readable name for logs and details output.
    pub fn description(&self) -> String {
        match &self.kind {
            FontKind::Outline { path: Some(p), .. } => format!("{} @ {}px", p.display(), self.size_px),
            FontKind::Outline { path: None, .. } => format!("in-memory font @ {}px", self.size_px),
            FontKind::Builtin => format!("built-in 5x7 bitmap (x{})", self.builtin_factor()),
        }
    }

    /// Cell size derived from the ink bounds of `@`, clamped to the minimum cell.
    pub fn measure_cell(&self) -> (u32, u32) {
        let (w, h) = match &self.kind {
            FontKind::Outline { font, .. } => {
                let scale = outline_scale(font, self.size_px);
                let ascent = font.as_scaled(scale).ascent();
                let glyph = font
                    .glyph_id('@')
                    .with_scale_and_position(scale, point(0.0, ascent));
                match font.outline_glyph(glyph) {
                    Some(outlined) => {
                        let bounds = outlined.px_bounds();
                        (bounds.width().ceil() as u32, bounds.height().ceil() as u32)
                    }
                    None => (0, 0),
                }
            }
            FontKind::Builtin => {
                let f = self.builtin_factor();
                (fallback_font::WIDTH * f, fallback_font::HEIGHT * f)
            }
        };
        (w.max(MIN_CELL_WIDTH), h.max(MIN_CELL_HEIGHT))
    }

    /// Render `ch` at the cell origin into a row-major `width * height`
    /// coverage buffer with values in [0, 1]. Ink outside the cell is clipped.
    pub fn rasterize(&self, ch: char, width: u32, height: u32) -> Vec<f32> {
        let mut bitmap = vec![0.0f32; (width as usize) * (height as usize)];
        match &self.kind {
            FontKind::Outline { font, .. } => {
                let scale = outline_scale(font, self.size_px);
                let ascent = font.as_scaled(scale).ascent();
                let glyph = font
                    .glyph_id(ch)
                    .with_scale_and_position(scale, point(0.0, ascent));
                if let Some(outlined) = font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    let min_x = bounds.min.x.floor() as i64;
                    let min_y = bounds.min.y.floor() as i64;
                    outlined.draw(|gx, gy, coverage| {
                        let px = min_x + gx as i64;
                        let py = min_y + gy as i64;
                        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                            return;
                        }
                        let idx = py as usize * width as usize + px as usize;
                        bitmap[idx] = bitmap[idx].max(coverage.clamp(0.0, 1.0));
                    });
                }
            }
            FontKind::Builtin => {
                let factor = (width / fallback_font::WIDTH)
                    .min(height / fallback_font::HEIGHT)
                    .max(1);
                for y in 0..height {
                    for x in 0..width {
                        if fallback_font::is_set(ch, x / factor, y / factor) {
                            bitmap[(y * width + x) as usize] = 1.0;
                        }
                    }
                }
            }
        }
        bitmap
    }

    fn builtin_factor(&self) -> u32 {
        ((self.size_px / 8.0).round() as u32).max(1)
    }
}

/// Scale such that one em spans `size_px` pixels.
fn outline_scale(font: &FontVec, size_px: f32) -> PxScale {
    let units_per_em = font.units_per_em().unwrap_or(1000.0);
    PxScale::from(size_px * font.height_unscaled() / units_per_em)
}
