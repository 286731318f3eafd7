use asciimatch::{
    encode_animation, encoded_size, read_animation, write_animation, FontSource, GlyphBank, Grid, PaletteOptions,
    SourceFrame, PALETTE_SIZE,
};
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn scratch_path(name: &str) -> PathBuf {
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir()
        .join(format!("asciimatch_it_{}_{}", std::process::id(), stamp))
        .join(name)
}

/// 2x2 checkerboard of 10x14 cells: black, white / white, black.
fn checkerboard() -> SourceFrame {
    SourceFrame::from_rgb(RgbImage::from_fn(20, 28, |x, y| {
        if (x / 10 + y / 14) % 2 == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    }))
}

fn noisy_frames(count: u32, grid: &Grid) -> Vec<SourceFrame> {
    (0..count)
        .map(|seed| {
            SourceFrame::from_rgb(RgbImage::from_fn(grid.pixel_width(), grid.pixel_height(), |x, y| {
                let v = (x * 31 + y * 17 + seed * 101) ^ (x * y + seed);
                Rgb([(v % 256) as u8, ((v / 3) % 256) as u8, ((x + y * 3) % 256) as u8])
            }))
        })
        .collect()
}

#[test]
fn blank_and_solid_cells_pick_space_and_at() {
    let bank = GlyphBank::with_chars(&FontSource::builtin(16.0), " @", 10, 14).unwrap();
    let grid = Grid::new(2, 2, 10, 14).unwrap();

    let animation = encode_animation(&[checkerboard()], &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).unwrap();

    assert_eq!(animation.char_table, b" @".to_vec());
    let glyphs: Vec<u8> = animation.frames[0].iter().map(|c| c.glyph).collect();
    assert_eq!(glyphs, vec![0, 1, 1, 0]);
    for cell in &animation.frames[0] {
        let expected = if cell.glyph == 0 { [0, 0, 0] } else { [255, 255, 255] };
        assert_eq!(animation.palette[cell.color as usize], expected);
    }
}

#[test]
fn written_file_matches_size_formula_and_reads_back() {
    let font = FontSource::builtin(16.0);
    let bank = GlyphBank::build(&font, 10, 14);
    let grid = Grid::new(4, 3, 10, 14).unwrap();
    let frames = noisy_frames(3, &grid);

    let animation = encode_animation(&frames, &grid, &bank, 24, &PaletteOptions::default(), |_, _| {}).unwrap();
    let path = scratch_path("clip.bin");
    let size = write_animation(&path, &animation).unwrap();

    assert_eq!(size, 8 + 1 + 95 + 768 + 3 * 4 * 3 * 2);
    assert_eq!(size, encoded_size(4, 3, bank.len(), 3));

    let back = read_animation(&path).unwrap();
    assert_eq!((back.cols, back.rows, back.fps), (4, 3, 24));
    assert_eq!(back.frames.len(), 3);
    assert_eq!(back, animation);

    if let Some(dir) = path.parent() {
        std::fs::remove_dir_all(dir).unwrap();
    }
}

#[test]
fn every_index_is_in_range() {
    let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
    let grid = Grid::new(5, 4, 10, 14).unwrap();
    let frames = noisy_frames(4, &grid);

    let animation = encode_animation(&frames, &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).unwrap();

    assert_eq!(animation.palette.len(), PALETTE_SIZE);
    for frame in &animation.frames {
        assert_eq!(frame.len(), grid.cells());
        for cell in frame {
            assert!((cell.glyph as usize) < animation.char_table.len());
        }
    }
}

#[test]
fn re_encoding_is_byte_identical() {
    let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
    let grid = Grid::new(6, 2, 10, 14).unwrap();
    let frames = noisy_frames(5, &grid);
    let options = PaletteOptions::default().with_seed(7);

    let first = encode_animation(&frames, &grid, &bank, 12, &options, |_, _| {}).unwrap();
    let second = encode_animation(&frames, &grid, &bank, 12, &options, |_, _| {}).unwrap();

    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
}

#[test]
fn mismatched_frame_size_writes_nothing() {
    let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
    let grid = Grid::new(3, 3, 10, 14).unwrap();
    let frames = vec![checkerboard()];

    assert!(encode_animation(&frames, &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).is_err());
}
