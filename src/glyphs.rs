//! Glyph template bank: every printable ASCII character rendered into a
//! cell-sized bitmap, with its L2 norm computed once up front.

use anyhow::{anyhow, Result};

use crate::font::FontSource;

/// First and last printable ASCII codes covered by a full bank.
pub const FIRST_PRINTABLE: u8 = 32;
pub const LAST_PRINTABLE: u8 = 126;

/// Number of glyphs in a full bank.
pub const FULL_BANK_SIZE: usize = (LAST_PRINTABLE - FIRST_PRINTABLE + 1) as usize;

/// One rendered character template.
#[derive(Debug, Clone)]
pub struct Glyph {
    ch: char,
    bitmap: Vec<f32>,
    norm: f32,
}

impl Glyph {
    fn new(ch: char, bitmap: Vec<f32>) -> Self {
        let norm = l2_norm(&bitmap);
        Self { ch, bitmap, norm }
    }

    pub fn ch(&self) -> char {
        self.ch
    }

    /// Row-major brightness values in [0, 1].
    pub fn bitmap(&self) -> &[f32] {
        &self.bitmap
    }

    pub fn norm(&self) -> f32 {
        self.norm
    }
}

/// Ordered, immutable catalog of glyph templates sharing one cell size.
///
/// Index 0 is always the blank (space) glyph.
#[derive(Debug, Clone)]
pub struct GlyphBank {
    glyphs: Vec<Glyph>,
    cell_width: u32,
    cell_height: u32,
    /// All bitmaps back to back, `len() * cell_width * cell_height` values.
    templates: Vec<f32>,
    norms: Vec<f32>,
}

impl GlyphBank {
    /// Build the full 95-glyph bank for printable ASCII.
    pub fn build(font: &FontSource, cell_width: u32, cell_height: u32) -> Self {
        let glyphs = (FIRST_PRINTABLE..=LAST_PRINTABLE)
            .map(|code| {
                let ch = code as char;
                Glyph::new(ch, font.rasterize(ch, cell_width, cell_height))
            })
            .collect();
        Self::from_glyphs(glyphs, cell_width, cell_height)
    }

    /// Build a bank over a subset of printable ASCII, in the given order.
    ///
    /// The first character must be a space, since index 0 is the blank glyph.
    pub fn with_chars(font: &FontSource, chars: &str, cell_width: u32, cell_height: u32) -> Result<Self> {
        if chars.is_empty() {
            return Err(anyhow!("glyph character set is empty"));
        }
        if !chars.starts_with(' ') {
            return Err(anyhow!("glyph character set must start with a space (index 0 is blank)"));
        }
        let count = chars.chars().count();
        if count > FULL_BANK_SIZE {
            return Err(anyhow!(
                "glyph character set has {} characters, at most {} are allowed",
                count,
                FULL_BANK_SIZE
            ));
        }
        if let Some(bad) = chars
            .chars()
            .find(|c| !(FIRST_PRINTABLE as char..=LAST_PRINTABLE as char).contains(c))
        {
            return Err(anyhow!("glyph character {:?} is not printable ASCII", bad));
        }

        let glyphs = chars
            .chars()
            .map(|ch| Glyph::new(ch, font.rasterize(ch, cell_width, cell_height)))
            .collect();
        Ok(Self::from_glyphs(glyphs, cell_width, cell_height))
    }

    fn from_glyphs(glyphs: Vec<Glyph>, cell_width: u32, cell_height: u32) -> Self {
        let templates = glyphs.iter().flat_map(|g| g.bitmap.iter().copied()).collect();
        let norms = glyphs.iter().map(|g| g.norm).collect();
        Self {
            glyphs,
            cell_width,
            cell_height,
            templates,
            norms,
        }
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    /// Pixels per template.
    pub fn cell_area(&self) -> usize {
        self.cell_width as usize * self.cell_height as usize
    }

    /// Flattened template of glyph `index`.
    pub fn template(&self, index: usize) -> &[f32] {
        let area = self.cell_area();
        &self.templates[index * area..(index + 1) * area]
    }

    pub fn norms(&self) -> &[f32] {
        &self.norms
    }

    /// ASCII bytes of every glyph in bank order.
    pub fn char_table(&self) -> Vec<u8> {
        self.glyphs.iter().map(|g| g.ch as u8).collect()
    }
}

pub(crate) fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
