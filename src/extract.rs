use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as ProcCommand;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::encoder::SourceFrame;

/// Location of the ffmpeg binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Explicit ffmpeg path; `ffmpeg` from PATH when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

impl FfmpegConfig {
    pub fn ffmpeg_cmd(&self) -> OsString {
        match &self.ffmpeg_path {
            Some(p) => p.clone().into_os_string(),
            None => OsString::from("ffmpeg"),
        }
    }
}

/// What to pull out of the source video.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Start time (e.g. "00:01:23.456" or "83.456")
    pub start: Option<String>,
    /// End time, same syntax as `start`
    pub end: Option<String>,
}

/// Scratch directory removed (with its contents) on drop.
pub struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    pub fn create(prefix: &str) -> Result<Self> {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let path = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), stamp));
        fs::create_dir_all(&path).with_context(|| format!("creating scratch directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub(crate) fn build_frame_extraction_vf(fps: u32, width: u32, height: u32) -> String {
    format!("fps={},scale={}:{}:flags=lanczos", fps, width, height)
}

pub(crate) fn build_ffmpeg_args(input: &Path, out_dir: &Path, opts: &ExtractOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-loglevel".into(), "error".into()];

    let start = opts.start.as_deref().filter(|s| !s.is_empty() && *s != "0");
    if let Some(s) = start {
        args.push("-ss".into());
        args.push(s.into());
    }

    args.push("-i".into());
    args.push(input.as_os_str().to_owned());

    if let Some(e) = opts.end.as_deref().filter(|e| !e.is_empty()) {
        match start {
            Some(s) => {
                let duration = parse_timestamp(e) - parse_timestamp(s);
                if duration > 0.0 {
                    args.push("-t".into());
                    args.push(duration.to_string().into());
                }
            }
            None => {
                args.push("-t".into());
                args.push(e.into());
            }
        }
    }

    args.push("-vf".into());
    args.push(build_frame_extraction_vf(opts.fps, opts.width, opts.height).into());
    args.push("-pix_fmt".into());
    args.push("rgb24".into());
    args.push("-y".into());
    args.push(out_dir.join("frame_%05d.png").into_os_string());
    args
}

/// Run ffmpeg to write `frame_%05d.png` files into `out_dir`.
pub fn extract_video_frames(input: &Path, out_dir: &Path, opts: &ExtractOptions, ffmpeg: &FfmpegConfig) -> Result<()> {
    if !input.is_file() {
        return Err(anyhow!("input video {} does not exist", input.display()));
    }
    let args = build_ffmpeg_args(input, out_dir, opts);
    tracing::debug!("running {:?} {:?}", ffmpeg.ffmpeg_cmd(), args);

    let output = ProcCommand::new(ffmpeg.ffmpeg_cmd())
        .args(&args)
        .output()
        .context("running ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("ffmpeg failed ({}): {}", output.status, stderr.trim()));
    }
    Ok(())
}

/// PNG frames in `dir`, ordered by the number in `frame_<n>.png`.
///
/// Files without a numeric suffix sort after numbered ones, by name.
pub fn list_frames(dir: &Path) -> Vec<PathBuf> {
    let mut pngs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false))
        .collect();
    pngs.sort_by(|a, b| frame_key(a).cmp(&frame_key(b)).then_with(|| a.cmp(b)));
    pngs
}

fn frame_key(path: &Path) -> (bool, u64) {
    let number = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("frame_"))
        .and_then(|n| n.parse::<u64>().ok());
    match number {
        Some(n) => (false, n),
        None => (true, 0),
    }
}

/// Decode one frame, requiring the exact pixel size.
pub fn load_frame(path: &Path, width: u32, height: u32) -> Result<SourceFrame> {
    let rgb = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8();
    if rgb.dimensions() != (width, height) {
        return Err(anyhow!(
            "{} is {}x{}, expected {}x{}",
            path.display(),
            rgb.width(),
            rgb.height(),
            width,
            height
        ));
    }
    Ok(SourceFrame::from_rgb(rgb))
}

/// Extract and decode every frame of `input`, in source order.
pub fn extract_frames(input: &Path, opts: &ExtractOptions, ffmpeg: &FfmpegConfig) -> Result<Vec<SourceFrame>> {
    let scratch = TempDirGuard::create("asciimatch_frames")?;
    extract_video_frames(input, scratch.path(), opts, ffmpeg)
        .with_context(|| format!("extracting frames from {}", input.display()))?;

    let paths = list_frames(scratch.path());
    if paths.is_empty() {
        return Err(anyhow!("ffmpeg produced no frames for {}", input.display()));
    }
    tracing::info!(
        "extracted {} frames at {}fps, {}x{}",
        paths.len(),
        opts.fps,
        opts.width,
        opts.height
    );

    paths
        .iter()
        .map(|p| load_frame(p, opts.width, opts.height))
        .collect()
}

pub(crate) fn parse_timestamp(s: &str) -> f64 {
    s.split(':').rev().enumerate().fold(0.0, |acc, (i, v)| {
        acc + v.parse::<f64>().unwrap_or(0.0) * 60f64.powi(i as i32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn opts() -> ExtractOptions {
        ExtractOptions {
            fps: 12,
            width: 960,
            height: 672,
            start: None,
            end: None,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn parse_timestamp_handles_clock_and_seconds() {
        assert_eq!(parse_timestamp("83.5"), 83.5);
        assert_eq!(parse_timestamp("01:23.5"), 83.5);
        assert_eq!(parse_timestamp("01:00:00"), 3600.0);
    }

    #[test]
    fn vf_requests_exact_size() {
        assert_eq!(build_frame_extraction_vf(12, 960, 672), "fps=12,scale=960:672:flags=lanczos");
    }

    #[test]
    fn args_without_trim() {
        let args = strings(&build_ffmpeg_args(Path::new("in.mp4"), Path::new("/tmp/x"), &opts()));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-t".to_string()));
        let i = args.iter().position(|a| a == "-pix_fmt").unwrap();
        assert_eq!(args[i + 1], "rgb24");
        assert!(args.last().unwrap().ends_with("frame_%05d.png"));
    }

    #[test]
    fn args_with_start_and_end_use_duration() {
        let mut o = opts();
        o.start = Some("00:00:05".into());
        o.end = Some("00:00:09".into());
        let args = strings(&build_ffmpeg_args(Path::new("in.mp4"), Path::new("/tmp/x"), &o));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "00:00:05");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "4");
    }

    #[test]
    fn args_with_end_only() {
        let mut o = opts();
        o.start = Some("0".into());
        o.end = Some("2".into());
        let args = strings(&build_ffmpeg_args(Path::new("in.mp4"), Path::new("/tmp/x"), &o));
        assert!(!args.contains(&"-ss".to_string()));
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "2");
    }

    #[test]
    fn frames_past_four_digits_stay_in_source_order() {
        let scratch = TempDirGuard::create("asciimatch_test").unwrap();
        for name in ["frame_10001.png", "frame_9999.png", "frame_10000.png", "frame_9998.png"] {
            fs::write(scratch.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = list_frames(scratch.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["frame_9998.png", "frame_9999.png", "frame_10000.png", "frame_10001.png"]);
    }

    #[test]
    fn missing_input_fails_before_ffmpeg() {
        let scratch = TempDirGuard::create("asciimatch_test").unwrap();
        let err = extract_video_frames(Path::new("/nonexistent/video.mp4"), scratch.path(), &opts(), &FfmpegConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let path = {
            let scratch = TempDirGuard::create("asciimatch_test").unwrap();
            fs::write(scratch.path().join("frame_0001.png"), b"x").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn frames_are_listed_in_order_and_size_checked() {
        let scratch = TempDirGuard::create("asciimatch_test").unwrap();
        for (i, v) in [(2, 200u8), (1, 100u8), (3, 50u8)] {
            RgbImage::from_pixel(4, 2, Rgb([v, v, v]))
                .save(scratch.path().join(format!("frame_{:04}.png", i)))
                .unwrap();
        }
        fs::write(scratch.path().join("notes.txt"), b"ignored").unwrap();

        let paths = list_frames(scratch.path());
        assert_eq!(paths.len(), 3);
        let first = load_frame(&paths[0], 4, 2).unwrap();
        assert_eq!(first.rgb.get_pixel(0, 0), &Rgb([100, 100, 100]));
        assert!(load_frame(&paths[0], 8, 2).is_err());
    }
}
