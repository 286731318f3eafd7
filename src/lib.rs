//! # asciimatch - video to ASCII animation encoder
//!
//! `asciimatch` turns a video into a compact binary ASCII animation. Every
//! character cell stores a glyph index, chosen by structural matching
//! (normalized cross-correlation against rendered font templates), and a
//! color index into a 256-entry palette built by k-means over the whole clip.
//!
//! ## Pipeline
//!
//! 1. Load a monospace font (falling back to a built-in bitmap font) and
//!    measure the character cell.
//! 2. Render the 95 printable ASCII glyphs into a [`GlyphBank`].
//! 3. Extract frames with ffmpeg at the exact grid resolution.
//! 4. Build the global [`Palette`].
//! 5. Match every cell of every frame in parallel.
//! 6. Write the binary stream described in [`format`].
//!
//! ## Example
//!
//! ```no_run
//! use asciimatch::{AnimationEncoder, EncodeOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let encoder = AnimationEncoder::new();
//! let options = EncodeOptions::default().with_fps(12).with_columns(120);
//! let summary = encoder.encode_video(
//!     Path::new("input.mp4"),
//!     Path::new("out/animation.bin"),
//!     &options,
//!     |progress| println!("{}", progress.message),
//! )?;
//! println!("{} frames, {} bytes", summary.frame_count, summary.file_size);
//! # Ok(())
//! # }
//! ```
//!
//! ## In-memory frames
//!
//! ```
//! use asciimatch::{encode_animation, FontSource, GlyphBank, Grid, PaletteOptions, SourceFrame};
//! use image::{Rgb, RgbImage};
//!
//! let font = FontSource::builtin(16.0);
//! let bank = GlyphBank::build(&font, 10, 14);
//! let grid = Grid::new(2, 2, 10, 14).unwrap();
//! let frame = SourceFrame::from_rgb(RgbImage::from_pixel(20, 28, Rgb([0, 0, 0])));
//! let animation = encode_animation(&[frame], &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).unwrap();
//! assert!(animation.frames[0].iter().all(|cell| cell.glyph == 0));
//! ```

pub mod encoder;
pub mod extract;
mod fallback_font;
pub mod font;
pub mod format;
pub mod glyphs;
pub mod matcher;
pub mod palette;

pub use encoder::{encode_frames, Grid, SourceFrame};
pub use extract::{ExtractOptions, FfmpegConfig};
pub use font::FontSource;
pub use format::{encoded_size, read_animation, write_animation, EncodedAnimation};
pub use glyphs::{Glyph, GlyphBank};
pub use matcher::{CellAssignment, StructuralMatcher};
pub use palette::{Palette, PaletteOptions, PALETTE_SIZE};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Represents the current phase of an encoding run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Extracting frames from video using ffmpeg
    ExtractingFrames,
    /// Clustering sampled pixels into the palette
    BuildingPalette,
    /// Matching glyphs and colors for every cell
    MatchingFrames,
    /// Writing the binary output
    Writing,
    /// Encoding completed successfully
    Complete,
}

/// Progress information for encoding runs, suitable for driving a UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    /// Number of items completed in the current phase
    pub completed: usize,
    /// Total number of items in the current phase (0 if indeterminate)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    pub fn extracting_frames() -> Self {
        Self::indeterminate(ProgressPhase::ExtractingFrames, "Extracting frames from video...")
    }

    pub fn building_palette(sampled_frames: usize) -> Self {
        Self::indeterminate(
            ProgressPhase::BuildingPalette,
            &format!("Building palette from {} frames...", sampled_frames),
        )
    }

    pub fn matching_frames(completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::MatchingFrames,
            completed,
            total,
            percentage,
            message: format!("Matching frame {} of {}", completed, total),
        }
    }

    pub fn writing() -> Self {
        Self::indeterminate(ProgressPhase::Writing, "Writing animation...")
    }

    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Encoding complete: {} frames", total_frames),
        }
    }

    fn indeterminate(phase: ProgressPhase, message: &str) -> Self {
        Self {
            phase,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: message.to_string(),
        }
    }
}

/// Named quality preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub columns: u32,
    pub fps: u32,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

fn default_font_size() -> f32 {
    font::DEFAULT_FONT_SIZE
}

fn default_preset_name() -> String {
    "default".to_string()
}

/// Application configuration: presets plus font, palette and ffmpeg settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub presets: HashMap<String, Preset>,
    #[serde(default = "default_preset_name")]
    pub default_preset: String,
    /// Font tried before the built-in candidate list
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default)]
    pub palette: PaletteOptions,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let presets = [
            ("default", Preset { columns: 120, fps: 12, font_size: 16.0 }),
            ("small", Preset { columns: 80, fps: 10, font_size: 16.0 }),
            ("large", Preset { columns: 200, fps: 24, font_size: 16.0 }),
        ]
        .into_iter()
        .map(|(name, preset)| (name.to_string(), preset))
        .collect();
        Self {
            presets,
            default_preset: default_preset_name(),
            font_path: None,
            palette: PaletteOptions::default(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a config file; `.toml` files are read as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = if path.extension().is_some_and(|e| e == "toml") {
            toml::from_str(&text).with_context(|| format!("parsing config toml {}", path.display()))?
        } else {
            serde_json::from_str(&text).with_context(|| format!("parsing config json {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.presets.contains_key(&self.default_preset) {
            return Err(anyhow!("default preset '{}' is not defined", self.default_preset));
        }
        if self.palette.sample_stride == 0 || self.palette.batch_size == 0 {
            return Err(anyhow!("palette sample_stride and batch_size must be positive"));
        }
        Ok(())
    }
}

/// Options for one encoding run
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// Target frame rate
    pub fps: u32,
    /// Grid width in characters
    pub columns: u32,
    /// Preferred font; system candidates and the built-in font are fallbacks
    pub font_path: Option<PathBuf>,
    /// Glyph size in pixels per em
    pub font_size: f32,
    /// Start time (e.g. "00:01:23.456" or "83.456")
    pub start: Option<String>,
    /// End time (e.g. "00:01:23.456" or "83.456")
    pub end: Option<String>,
    pub palette: PaletteOptions,
    pub ffmpeg: FfmpegConfig,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            fps: 12,
            columns: 120,
            font_path: None,
            font_size: font::DEFAULT_FONT_SIZE,
            start: None,
            end: None,
            palette: PaletteOptions::default(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl EncodeOptions {
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_font_path(mut self, path: PathBuf) -> Self {
        self.font_path = Some(path);
        self
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.palette.seed = seed;
        self
    }

    pub fn with_range(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Options from a preset, carrying the config's font, palette and ffmpeg settings.
    pub fn from_preset(preset: &Preset, config: &AppConfig) -> Self {
        Self {
            fps: preset.fps,
            columns: preset.columns,
            font_path: config.font_path.clone(),
            font_size: preset.font_size,
            start: None,
            end: None,
            palette: config.palette.clone(),
            ffmpeg: config.ffmpeg.clone(),
        }
    }

    fn fps_u16(&self) -> Result<u16> {
        if self.fps == 0 {
            return Err(anyhow!("fps must be positive"));
        }
        u16::try_from(self.fps).map_err(|_| anyhow!("fps {} exceeds the format limit of {}", self.fps, u16::MAX))
    }
}

/// What an encoding run produced
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSummary {
    pub grid: Grid,
    pub fps: u16,
    pub frame_count: usize,
    pub char_count: usize,
    pub file_size: u64,
    pub font: String,
}

/// Main encoder entry point
pub struct AnimationEncoder {
    config: AppConfig,
}

impl AnimationEncoder {
    /// Create an encoder with the built-in configuration
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Load configuration from a JSON or TOML file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: AppConfig::from_file(path)?,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_preset(&self, name: &str) -> Option<&Preset> {
        self.config.presets.get(name)
    }

    pub fn options_from_preset(&self, preset_name: &str) -> Result<EncodeOptions> {
        let preset = self
            .get_preset(preset_name)
            .ok_or_else(|| anyhow!("Preset '{}' not found", preset_name))?;
        Ok(EncodeOptions::from_preset(preset, &self.config))
    }

    /// Encode a video file into an ASCII animation at `output`.
    ///
    /// Fails before writing anything if the configuration is invalid, ffmpeg
    /// fails or yields no frames. The output is replaced atomically.
    pub fn encode_video<F>(&self, input: &Path, output: &Path, options: &EncodeOptions, progress_callback: F) -> Result<EncodeSummary>
    where
        F: Fn(Progress) + Send + Sync,
    {
        let fps = options.fps_u16()?;
        let started = Instant::now();

        let font = FontSource::load(options.font_path.as_deref(), options.font_size);
        let (cell_width, cell_height) = font.measure_cell();
        let grid = Grid::for_widescreen(options.columns, cell_width, cell_height)?;
        tracing::info!(
            "grid {}x{} cells of {}x{}px ({}x{}px frames), {}fps, font {}",
            grid.cols,
            grid.rows,
            cell_width,
            cell_height,
            grid.pixel_width(),
            grid.pixel_height(),
            fps,
            font.description()
        );

        let bank = GlyphBank::build(&font, cell_width, cell_height);
        tracing::info!("built {} glyph templates", bank.len());

        progress_callback(Progress::extracting_frames());
        let extract_opts = ExtractOptions {
            fps: options.fps,
            width: grid.pixel_width(),
            height: grid.pixel_height(),
            start: options.start.clone(),
            end: options.end.clone(),
        };
        let frames = extract::extract_frames(input, &extract_opts, &options.ffmpeg)?;
        tracing::info!("loaded {} frames in {:.1?}", frames.len(), started.elapsed());

        let animation = encode_animation_with_progress(&frames, &grid, &bank, fps, &options.palette, &progress_callback)?;
        drop(frames);

        progress_callback(Progress::writing());
        let file_size = write_animation(output, &animation).with_context(|| format!("writing {}", output.display()))?;
        tracing::info!("wrote {} ({} bytes) in {:.1?}", output.display(), file_size, started.elapsed());

        progress_callback(Progress::complete(animation.frames.len()));
        Ok(EncodeSummary {
            grid,
            fps,
            frame_count: animation.frames.len(),
            char_count: bank.len(),
            file_size,
            font: font.description(),
        })
    }

    /// Palette and matching over already decoded frames, using the
    /// configured palette options.
    pub fn encode_frames<F>(&self, frames: &[SourceFrame], grid: &Grid, bank: &GlyphBank, fps: u16, progress_callback: F) -> Result<EncodedAnimation>
    where
        F: Fn(Progress) + Send + Sync,
    {
        encode_animation_with_progress(frames, grid, bank, fps, &self.config.palette, &progress_callback)
    }
}

impl Default for AnimationEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the palette from `frames`, match every cell and assemble the
/// animation. `progress` receives `(completed, total)` frames.
pub fn encode_animation<F>(frames: &[SourceFrame], grid: &Grid, bank: &GlyphBank, fps: u16, palette_options: &PaletteOptions, progress: F) -> Result<EncodedAnimation>
where
    F: Fn(usize, usize) + Send + Sync,
{
    if frames.is_empty() {
        return Err(anyhow!("no frames to encode"));
    }
    if frames.len() > u16::MAX as usize {
        return Err(anyhow!("{} frames exceed the format limit of {}", frames.len(), u16::MAX));
    }
    encoder::check_frames(frames, grid, bank)?;
    let palette = Palette::build(frames.iter().map(|f| &f.rgb), palette_options).context("building palette")?;

    let matcher = StructuralMatcher::new(bank, &palette);
    let cells = encode_frames(frames, grid, &matcher, progress).context("matching frames")?;
    Ok(EncodedAnimation::new(grid, fps, bank, &palette, cells))
}

fn encode_animation_with_progress<F>(frames: &[SourceFrame], grid: &Grid, bank: &GlyphBank, fps: u16, palette_options: &PaletteOptions, progress_callback: &F) -> Result<EncodedAnimation>
where
    F: Fn(Progress) + Send + Sync,
{
    progress_callback(Progress::building_palette(frames.len()));
    progress_callback(Progress::matching_frames(0, frames.len()));
    encode_animation(frames, grid, bank, fps, palette_options, |done, total| {
        progress_callback(Progress::matching_frames(done, total))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_default_preset() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        let preset = &cfg.presets["default"];
        assert_eq!((preset.columns, preset.fps), (120, 12));
    }

    #[test]
    fn json_config_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"presets": {"default": {"columns": 60, "fps": 8}}, "palette": {"seed": 7}}"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.presets["default"].font_size, 16.0);
        assert_eq!(cfg.palette.seed, 7);
        assert_eq!(cfg.palette.sample_stride, 8);
        assert_eq!(cfg.ffmpeg, FfmpegConfig::default());
    }

    #[test]
    fn toml_config_parses() {
        let cfg: AppConfig = toml::from_str(
            r#"
            default_preset = "tiny"
            font_path = "/fonts/Mono.ttf"

            [presets.tiny]
            columns = 40
            fps = 6
            font_size = 12.0

            [ffmpeg]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        let encoder = AnimationEncoder::with_config(cfg).unwrap();
        let opts = encoder.options_from_preset("tiny").unwrap();
        assert_eq!((opts.columns, opts.fps, opts.font_size), (40, 6, 12.0));
        assert_eq!(opts.font_path, Some(PathBuf::from("/fonts/Mono.ttf")));
        assert_eq!(opts.ffmpeg.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
    }

    #[test]
    fn unknown_default_preset_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.default_preset = "missing".into();
        assert!(AnimationEncoder::with_config(cfg).is_err());
        assert!(AnimationEncoder::new().options_from_preset("missing").is_err());
    }

    #[test]
    fn fps_must_fit_header() {
        assert!(EncodeOptions::default().with_fps(0).fps_u16().is_err());
        assert!(EncodeOptions::default().with_fps(70_000).fps_u16().is_err());
        assert_eq!(EncodeOptions::default().fps_u16().unwrap(), 12);
    }

    #[test]
    fn progress_percentage() {
        let p = Progress::matching_frames(5, 20);
        assert_eq!(p.phase, ProgressPhase::MatchingFrames);
        assert_eq!(p.percentage, 25.0);
        assert_eq!(Progress::matching_frames(0, 0).percentage, 0.0);
        assert_eq!(Progress::complete(3).percentage, 100.0);
    }

    #[test]
    fn empty_frame_set_is_rejected() {
        let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
        let grid = Grid::new(2, 2, 10, 14).unwrap();
        let err = encode_animation(&[], &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).unwrap_err();
        assert!(err.to_string().contains("no frames"));
    }

    #[test]
    fn in_memory_encoding_reports_phases() {
        let bank = GlyphBank::with_chars(&FontSource::builtin(16.0), " @", 10, 14).unwrap();
        let grid = Grid::new(2, 1, 10, 14).unwrap();
        let frames = vec![SourceFrame::from_rgb(image::RgbImage::from_pixel(20, 14, image::Rgb([200, 30, 30]))); 3];
        let phases = std::sync::Mutex::new(Vec::new());

        let animation = AnimationEncoder::new()
            .encode_frames(&frames, &grid, &bank, 10, |p| phases.lock().unwrap().push(p.phase))
            .unwrap();

        assert_eq!(animation.frames.len(), 3);
        assert_eq!(animation.char_table, b" @".to_vec());
        let phases = phases.into_inner().unwrap();
        assert_eq!(phases[0], ProgressPhase::BuildingPalette);
        assert_eq!(phases.iter().filter(|p| **p == ProgressPhase::MatchingFrames).count(), 4);
    }

    #[test]
    fn mismatched_frames_fail_before_clustering() {
        let bank = GlyphBank::build(&FontSource::builtin(16.0), 10, 14);
        let grid = Grid::new(2, 2, 10, 14).unwrap();
        let frames = vec![
            SourceFrame::from_rgb(image::RgbImage::new(20, 28)),
            SourceFrame::from_rgb(image::RgbImage::new(20, 14)),
        ];
        // The outermost message is the frame check itself, not a later stage's context.
        let err = encode_animation(&frames, &grid, &bank, 12, &PaletteOptions::default(), |_, _| {}).unwrap_err();
        assert!(err.to_string().starts_with("frame 1:"));
    }

    #[test]
    fn missing_video_fails_without_output() {
        let out = std::env::temp_dir().join(format!("asciimatch_missing_{}.bin", std::process::id()));
        let result = AnimationEncoder::new().encode_video(
            Path::new("/nonexistent/input.mp4"),
            &out,
            &EncodeOptions::default().with_font_path(PathBuf::from("/nonexistent/font.ttf")),
            |_| {},
        );
        assert!(result.is_err());
        assert!(!out.exists());
    }
}
