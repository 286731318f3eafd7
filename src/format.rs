//! Binary animation format.
//!
//! Layout, little-endian:
//!
//! | field      | size                              |
//! |------------|-----------------------------------|
//! | cols       | u16                               |
//! | rows       | u16                               |
//! | fps        | u16                               |
//! | frameCount | u16                               |
//! | numChars   | u8                                |
//! | charTable  | numChars bytes                    |
//! | palette    | 256 * (R, G, B)                   |
//! | frames     | frameCount * cols * rows * 2      |
//!
//! Each cell is `[glyph_index, color_index]`, row-major within a frame.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::encoder::Grid;
use crate::glyphs::{GlyphBank, FULL_BANK_SIZE};
use crate::matcher::CellAssignment;
use crate::palette::{Palette, PALETTE_SIZE};

/// Bytes before the character table: four u16 fields plus numChars.
pub const HEADER_LEN: usize = 9;
pub const PALETTE_BYTES: usize = PALETTE_SIZE * 3;

/// A complete animation, ready to serialize or freshly parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAnimation {
    pub cols: u16,
    pub rows: u16,
    pub fps: u16,
    pub char_table: Vec<u8>,
    pub palette: Vec<[u8; 3]>,
    pub frames: Vec<Vec<CellAssignment>>,
}

impl EncodedAnimation {
    pub fn new(grid: &Grid, fps: u16, bank: &GlyphBank, palette: &Palette, frames: Vec<Vec<CellAssignment>>) -> Self {
        Self {
            cols: grid.cols,
            rows: grid.rows,
            fps,
            char_table: bank.char_table(),
            palette: palette.colors().to_vec(),
            frames,
        }
    }

    pub fn cells_per_frame(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Exact serialized size in bytes.
    pub fn byte_len(&self) -> u64 {
        encoded_size(self.cols, self.rows, self.char_table.len(), self.frames.len())
    }

    /// Check every invariant the format relies on.
    pub fn validate(&self) -> Result<()> {
        if self.char_table.is_empty() || self.char_table.len() > FULL_BANK_SIZE {
            return Err(anyhow!(
                "character table must have 1..={} entries, got {}",
                FULL_BANK_SIZE,
                self.char_table.len()
            ));
        }
        if self.palette.len() != PALETTE_SIZE {
            return Err(anyhow!("palette must have {} colors, got {}", PALETTE_SIZE, self.palette.len()));
        }
        if self.frames.len() > u16::MAX as usize {
            return Err(anyhow!(
                "{} frames exceed the format limit of {}",
                self.frames.len(),
                u16::MAX
            ));
        }
        let cells = self.cells_per_frame();
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.len() != cells {
                return Err(anyhow!("frame {} has {} cells, expected {}", i, frame.len(), cells));
            }
            if let Some(bad) = frame.iter().find(|c| c.glyph as usize >= self.char_table.len()) {
                return Err(anyhow!(
                    "frame {} references glyph {} but the table has {} entries",
                    i,
                    bad.glyph,
                    self.char_table.len()
                ));
            }
        }
        Ok(())
    }

    /// Serialize into `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        self.validate()?;
        out.write_all(&self.cols.to_le_bytes())?;
        out.write_all(&self.rows.to_le_bytes())?;
        out.write_all(&self.fps.to_le_bytes())?;
        out.write_all(&(self.frames.len() as u16).to_le_bytes())?;
        out.write_all(&[self.char_table.len() as u8])?;
        out.write_all(&self.char_table)?;
        for color in &self.palette {
            out.write_all(color)?;
        }
        let mut buf = Vec::with_capacity(self.cells_per_frame() * 2);
        for frame in &self.frames {
            buf.clear();
            for cell in frame {
                buf.push(cell.glyph);
                buf.push(cell.color);
            }
            out.write_all(&buf)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.byte_len() as usize);
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Parse a complete stream. Trailing or missing bytes are errors.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(anyhow!("stream is {} bytes, shorter than the {}-byte header", bytes.len(), HEADER_LEN));
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let cols = u16_at(0);
        let rows = u16_at(2);
        let fps = u16_at(4);
        let frame_count = u16_at(6) as usize;
        let num_chars = bytes[8] as usize;

        let expected = encoded_size(cols, rows, num_chars, frame_count);
        if bytes.len() as u64 != expected {
            return Err(anyhow!(
                "stream is {} bytes, header ({}x{}, {} chars, {} frames) implies {}",
                bytes.len(),
                cols,
                rows,
                num_chars,
                frame_count,
                expected
            ));
        }

        let mut offset = HEADER_LEN;
        let char_table = bytes[offset..offset + num_chars].to_vec();
        offset += num_chars;
        let palette = bytes[offset..offset + PALETTE_BYTES]
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        offset += PALETTE_BYTES;

        let frame_len = cols as usize * rows as usize * 2;
        let frames = (0..frame_count)
            .map(|i| {
                let start = offset + i * frame_len;
                bytes[start..start + frame_len]
                    .chunks_exact(2)
                    .map(|c| CellAssignment { glyph: c[0], color: c[1] })
                    .collect()
            })
            .collect();

        let animation = Self {
            cols,
            rows,
            fps,
            char_table,
            palette,
            frames,
        };
        animation.validate()?;
        Ok(animation)
    }
}

/// `8 + 1 + num_chars + 768 + frame_count * cols * rows * 2`.
pub fn encoded_size(cols: u16, rows: u16, num_chars: usize, frame_count: usize) -> u64 {
    HEADER_LEN as u64
        + num_chars as u64
        + PALETTE_BYTES as u64
        + frame_count as u64 * cols as u64 * rows as u64 * 2
}

/// Write `animation` to `path`, creating parent directories.
///
/// Bytes go to a temporary sibling first and are renamed into place, so a
/// failed write leaves no partial file at `path`. Returns the file size.
pub fn write_animation(path: &Path, animation: &EncodedAnimation) -> Result<u64> {
    animation.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating output directory {}", parent.display()))?;
    }

    let pending = PendingFile::new(path)?;
    {
        let file = fs::File::create(pending.path())
            .with_context(|| format!("creating {}", pending.path().display()))?;
        let mut writer = BufWriter::new(file);
        animation
            .write_to(&mut writer)
            .with_context(|| format!("writing {}", pending.path().display()))?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("flushing {}: {}", pending.path().display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("syncing {}", pending.path().display()))?;
    }
    pending.commit()?;

    let size = fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();
    Ok(size)
}

/// Read and validate an animation file.
pub fn read_animation(path: &Path) -> Result<EncodedAnimation> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    EncodedAnimation::from_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Temporary sibling of the destination, removed on drop unless committed.
struct PendingFile {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn new(dest: &Path) -> Result<Self> {
        let name = dest
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("bad output file name {}", dest.display()))?;
        let tmp = dest.with_file_name(format!(".{}.{}.tmp", name, std::process::id()));
        Ok(Self {
            tmp,
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.tmp
    }

    fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.dest)
            .with_context(|| format!("moving {} to {}", self.tmp.display(), self.dest.display()))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
