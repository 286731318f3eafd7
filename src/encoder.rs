//! Frame encoder: runs the structural matcher over every cell of every frame.

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::glyphs::GlyphBank;
use crate::matcher::{CellAssignment, StructuralMatcher};

/// Character grid and the pixel size of each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub cols: u16,
    pub rows: u16,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl Grid {
    /// Validated grid; every dimension must be non-zero.
    pub fn new(cols: u32, rows: u32, cell_width: u32, cell_height: u32) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(anyhow!("grid must have at least one column and row, got {}x{}", cols, rows));
        }
        if cell_width == 0 || cell_height == 0 {
            return Err(anyhow!("cell size must be non-zero, got {}x{}", cell_width, cell_height));
        }
        let cols = u16::try_from(cols).map_err(|_| anyhow!("{} columns exceed the format limit of {}", cols, u16::MAX))?;
        let rows = u16::try_from(rows).map_err(|_| anyhow!("{} rows exceed the format limit of {}", rows, u16::MAX))?;
        let width = cols as u64 * cell_width as u64;
        let height = rows as u64 * cell_height as u64;
        if width > u32::MAX as u64 || height > u32::MAX as u64 {
            return Err(anyhow!(
                "frame size {}x{} cells of {}x{}px is too large",
                cols,
                rows,
                cell_width,
                cell_height
            ));
        }
        Ok(Self {
            cols,
            rows,
            cell_width,
            cell_height,
        })
    }

    /// Grid for `cols` columns of `cell_width x cell_height` cells, with the
    /// row count chosen to keep a 16:9 frame.
    pub fn for_widescreen(cols: u32, cell_width: u32, cell_height: u32) -> Result<Self> {
        if cell_height == 0 {
            return Err(anyhow!("cell height must be non-zero"));
        }
        let rows = (cols as f64 * 9.0 / 16.0 * (cell_width as f64 / cell_height as f64)).round_ties_even();
        Self::new(cols, (rows as u32).max(1), cell_width, cell_height)
    }

    pub fn cells(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn pixel_width(&self) -> u32 {
        self.cols as u32 * self.cell_width
    }

    pub fn pixel_height(&self) -> u32 {
        self.rows as u32 * self.cell_height
    }
}

/// One decoded source frame in color and grayscale.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub rgb: RgbImage,
    pub gray: GrayImage,
}

impl SourceFrame {
    pub fn new(rgb: RgbImage, gray: GrayImage) -> Self {
        Self { rgb, gray }
    }

    /// Derive the grayscale plane from the color frame with ITU-R 601-2 luma.
    pub fn from_rgb(rgb: RgbImage) -> Self {
        let gray = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            Luma([luma_601(rgb.get_pixel(x, y).0)])
        });
        Self { rgb, gray }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }
}

/// Encode every frame into a row-major cell array.
///
/// Frames are matched in parallel and returned in source order, so the
/// result does not depend on scheduling. `progress` receives
/// `(completed, total)` after each frame.
pub fn encode_frames<F>(frames: &[SourceFrame], grid: &Grid, matcher: &StructuralMatcher, progress: F) -> Result<Vec<Vec<CellAssignment>>>
where
    F: Fn(usize, usize) + Send + Sync,
{
    check_frames(frames, grid, matcher.bank())?;

    let total = frames.len();
    let completed = AtomicUsize::new(0);
    let encoded = frames
        .par_iter()
        .map(|frame| {
            let cells = encode_frame(frame, grid, matcher);
            let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(current, total);
            cells
        })
        .collect();
    Ok(encoded)
}

/// Match every cell of one frame in row-major order. Assumes the frame
/// has already been checked against the grid.
pub fn encode_frame(frame: &SourceFrame, grid: &Grid, matcher: &StructuralMatcher) -> Vec<CellAssignment> {
    let mut cells = Vec::with_capacity(grid.cells());
    for row in 0..grid.rows as u32 {
        for col in 0..grid.cols as u32 {
            cells.push(matcher.match_cell(&frame.gray, &frame.rgb, col, row));
        }
    }
    cells
}

/// `0.299 R + 0.587 G + 0.114 B` in 16-bit fixed point, rounded to nearest.
fn luma_601([r, g, b]: [u8; 3]) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Check that `bank` renders cells of the grid's size and that every frame
/// is exactly the grid's pixel size.
pub fn check_frames(frames: &[SourceFrame], grid: &Grid, bank: &GlyphBank) -> Result<()> {
    check_cell_size(grid, bank)?;
    for (i, frame) in frames.iter().enumerate() {
        check_frame(grid, frame).map_err(|e| anyhow!("frame {}: {}", i, e))?;
    }
    Ok(())
}

fn check_cell_size(grid: &Grid, bank: &GlyphBank) -> Result<()> {
    if bank.cell_width() != grid.cell_width || bank.cell_height() != grid.cell_height {
        return Err(anyhow!(
            "glyph bank cell {}x{} does not match grid cell {}x{}",
            bank.cell_width(),
            bank.cell_height(),
            grid.cell_width,
            grid.cell_height
        ));
    }
    Ok(())
}

fn check_frame(grid: &Grid, frame: &SourceFrame) -> Result<()> {
    let expected = (grid.pixel_width(), grid.pixel_height());
    if frame.rgb.dimensions() != expected || frame.gray.dimensions() != expected {
        return Err(anyhow!(
            "frame is {}x{} (gray {}x{}), grid needs exactly {}x{}",
            frame.rgb.width(),
            frame.rgb.height(),
            frame.gray.width(),
            frame.gray.height(),
            expected.0,
            expected.1
        ));
    }
    Ok(())
}
