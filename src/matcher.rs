//! Per-cell structural matching: pick the glyph whose template correlates
//! best with the cell's grayscale pattern, and the palette entry nearest to
//! the cell's mean color.

use image::{GrayImage, RgbImage};

use crate::glyphs::{l2_norm, GlyphBank};
use crate::palette::Palette;

/// Regions whose normalized L2 norm falls below this are treated as blank.
pub const BLANK_NORM_THRESHOLD: f32 = 1e-6;

/// Keeps the correlation denominator away from zero.
pub const NCC_EPSILON: f32 = 1e-8;

/// Glyph and palette indices chosen for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellAssignment {
    pub glyph: u8,
    pub color: u8,
}

/// Matches cells against a glyph bank and palette. Holds only shared,
/// read-only references, so one matcher can serve every worker thread.
#[derive(Debug, Clone, Copy)]
pub struct StructuralMatcher<'a> {
    bank: &'a GlyphBank,
    palette: &'a Palette,
}

impl<'a> StructuralMatcher<'a> {
    pub fn new(bank: &'a GlyphBank, palette: &'a Palette) -> Self {
        Self { bank, palette }
    }

    pub fn bank(&self) -> &GlyphBank {
        self.bank
    }

    /// Match the cell at grid position (`col`, `row`).
    ///
    /// Both images must contain the full cell; the frame encoder checks frame
    /// dimensions against the grid before calling this.
    pub fn match_cell(&self, gray: &GrayImage, rgb: &RgbImage, col: u32, row: u32) -> CellAssignment {
        let x0 = col * self.bank.cell_width();
        let y0 = row * self.bank.cell_height();
        let region = gray_region(gray, x0, y0, self.bank.cell_width(), self.bank.cell_height());
        let mean = mean_color(rgb, x0, y0, self.bank.cell_width(), self.bank.cell_height());
        CellAssignment {
            glyph: self.match_glyph(&region),
            color: self.palette.classify(mean),
        }
    }

    /// Best glyph for a flattened region normalized to [0, 1].
    ///
    /// Near-black regions map straight to the blank glyph at index 0. Ties
    /// keep the first glyph in bank order.
    pub fn match_glyph(&self, region: &[f32]) -> u8 {
        let region_norm = l2_norm(region);
        if region_norm < BLANK_NORM_THRESHOLD {
            return 0;
        }

        let mut best_index = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, glyph_norm) in self.bank.norms().iter().enumerate() {
            let dot: f32 = self
                .bank
                .template(i)
                .iter()
                .zip(region)
                .map(|(t, r)| t * r)
                .sum();
            let score = dot / (glyph_norm * region_norm + NCC_EPSILON);
            if score > best_score {
                best_score = score;
                best_index = i;
            }
        }
        best_index as u8
    }
}

/// Row-major grayscale values of a `w * h` cell, scaled to [0, 1].
fn gray_region(gray: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> Vec<f32> {
    let stride = gray.width() as usize;
    let raw = gray.as_raw();
    let mut region = Vec::with_capacity(w as usize * h as usize);
    for y in y0..y0 + h {
        let start = y as usize * stride + x0 as usize;
        region.extend(raw[start..start + w as usize].iter().map(|&p| p as f32 / 255.0));
    }
    region
}

/// Arithmetic mean RGB of a `w * h` cell.
fn mean_color(rgb: &RgbImage, x0: u32, y0: u32, w: u32, h: u32) -> [f64; 3] {
    let stride = rgb.width() as usize * 3;
    let raw = rgb.as_raw();
    let mut sum = [0u64; 3];
    for y in y0..y0 + h {
        let start = y as usize * stride + x0 as usize * 3;
        for px in raw[start..start + w as usize * 3].chunks_exact(3) {
            sum[0] += px[0] as u64;
            sum[1] += px[1] as u64;
            sum[2] += px[2] as u64;
        }
    }
    let count = (w as u64 * h as u64).max(1) as f64;
    [sum[0] as f64 / count, sum[1] as f64 / count, sum[2] as f64 / count]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontSource;
    use crate::palette::PALETTE_SIZE;
    use image::{Luma, Rgb};

    fn grayscale_palette() -> Palette {
        let colors = (0..PALETTE_SIZE).map(|i| [i as u8, i as u8, i as u8]).collect();
        Palette::from_colors(colors).unwrap()
    }

    fn bank(chars: &str) -> GlyphBank {
        GlyphBank::with_chars(&FontSource::builtin(16.0), chars, 10, 14).unwrap()
    }

    #[test]
    fn black_region_maps_to_blank() {
        let bank = bank(" @#.");
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);
        assert_eq!(matcher.match_glyph(&vec![0.0; 140]), 0);
        // Below the threshold even though not exactly zero.
        let mut faint = vec![0.0; 140];
        faint[17] = 1e-7;
        assert_eq!(matcher.match_glyph(&faint), 0);
    }

    #[test]
    fn white_region_maps_to_densest_glyph() {
        let bank = bank(" .@");
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);
        assert_eq!(matcher.match_glyph(&vec![1.0; 140]), 2);
    }

    #[test]
    fn exact_template_matches_itself() {
        let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);
        for (i, glyph) in bank.glyphs().iter().enumerate().skip(1) {
            let picked = matcher.match_glyph(glyph.bitmap()) as usize;
            // Identical templates (none in this font) would resolve to the first.
            assert_eq!(bank.template(picked), glyph.bitmap(), "glyph {:?}", glyph.ch());
            assert!(picked <= i);
        }
    }

    #[test]
    fn ties_keep_first_glyph() {
        // Both '|' entries render identically.
        let bank = bank(" ||");
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);
        assert_eq!(matcher.match_glyph(bank.template(2)), 1);
    }

    #[test]
    fn matching_is_repeatable() {
        let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);
        let region: Vec<f32> = (0..140).map(|i| ((i * 37) % 255) as f32 / 255.0).collect();
        let first = matcher.match_glyph(&region);
        for _ in 0..5 {
            assert_eq!(matcher.match_glyph(&region), first);
        }
        assert!((first as usize) < bank.len());
    }

    #[test]
    fn match_cell_uses_cell_offsets() {
        let bank = bank(" @");
        let palette = grayscale_palette();
        let matcher = StructuralMatcher::new(&bank, &palette);

        // 2x1 grid: left cell black, right cell white.
        let gray = GrayImage::from_fn(20, 14, |x, _| if x < 10 { Luma([0]) } else { Luma([255]) });
        let rgb = RgbImage::from_fn(20, 14, |x, _| if x < 10 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });

        let left = matcher.match_cell(&gray, &rgb, 0, 0);
        let right = matcher.match_cell(&gray, &rgb, 1, 0);
        assert_eq!(left, CellAssignment { glyph: 0, color: 0 });
        assert_eq!(right, CellAssignment { glyph: 1, color: 255 });
    }

    #[test]
    fn mean_color_averages_cell() {
        let rgb = RgbImage::from_fn(4, 2, |x, _| if x % 2 == 0 { Rgb([100, 0, 50]) } else { Rgb([200, 40, 50]) });
        assert_eq!(mean_color(&rgb, 0, 0, 2, 2), [150.0, 20.0, 50.0]);
        assert_eq!(mean_color(&rgb, 2, 0, 2, 1), [150.0, 20.0, 50.0]);
    }
}
