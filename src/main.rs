use anyhow::{anyhow, Context, Result};
use asciimatch::{encoded_size, read_animation, AnimationEncoder, AppConfig, EncodeSummary, Progress, ProgressPhase};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const CONFIG_NAMES: [&str; 2] = ["asciimatch.json", "asciimatch.toml"];

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(p) = explicit {
        return AppConfig::from_file(p);
    }

    // Look in app support, then the current dir, then fall back to built-in defaults
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(d) = dirs::data_dir() {
        for name in CONFIG_NAMES {
            tried.push(d.join("asciimatch").join(name));
        }
    }
    for name in CONFIG_NAMES {
        tried.push(PathBuf::from(name));
    }

    for p in &tried {
        if p.exists() {
            tracing::info!("using config {}", p.display());
            return AppConfig::from_file(p);
        }
    }

    Ok(AppConfig::default())
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and size check of an encoded animation
    Inspect {
        /// Animation file to inspect
        file: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(version, about = "Encode a video into a binary ASCII animation.")]
struct Args {
    /// Optional subcommands
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Input video file
    input: Option<PathBuf>,

    /// Output animation file
    output: Option<PathBuf>,

    /// Frames per second to sample from the video
    #[arg(long)]
    fps: Option<u32>,

    /// Grid width in characters
    #[arg(long)]
    cols: Option<u32>,

    /// Monospace font file tried before the system candidates
    #[arg(long)]
    font: Option<PathBuf>,

    /// Font size in pixels per em
    #[arg(long)]
    font_size: Option<f32>,

    /// Seed for palette clustering
    #[arg(long)]
    seed: Option<u64>,

    /// Start time (e.g., 00:01:23.456 or 83.456)
    #[arg(long)]
    start: Option<String>,

    /// End time (e.g., 00:01:23.456 or 83.456)
    #[arg(long)]
    end: Option<String>,

    /// Named preset from the config
    #[arg(long, conflicts_with_all = &["small", "large"])]
    preset: Option<String>,

    /// Use the "small" preset
    #[arg(long, short, default_value_t = false, conflicts_with_all = &["preset", "large"])]
    small: bool,

    /// Use the "large" preset
    #[arg(long, short, default_value_t = false, conflicts_with_all = &["preset", "small"])]
    large: bool,

    /// Config file (JSON or TOML) instead of the default lookup
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overwrite an existing output without asking
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,

    /// Log details to standard output
    #[arg(long, default_value_t = false)]
    log_details: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(Command::Inspect { file }) = &args.cmd {
        return run_inspect(file);
    }

    let input = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("Input video must be provided"))?;
    let output = args
        .output
        .clone()
        .ok_or_else(|| anyhow!("Output file must be provided"))?;

    if output.is_dir() {
        return Err(anyhow!("Output {} is a directory", output.display()));
    }
    if output.exists()
        && !args.yes
        && !Confirm::new()
            .with_prompt(format!("Output {} already exists. Overwrite?", output.display()))
            .default(false)
            .interact()?
    {
        println!("Operation cancelled.");
        return Ok(());
    }

    let cfg = load_config(args.config.as_deref())?;
    let encoder = AnimationEncoder::with_config(cfg)?;

    let preset_name = if args.small {
        "small".to_string()
    } else if args.large {
        "large".to_string()
    } else {
        args.preset
            .clone()
            .unwrap_or_else(|| encoder.config().default_preset.clone())
    };
    let mut options = encoder.options_from_preset(&preset_name)?;
    if let Some(fps) = args.fps {
        options = options.with_fps(fps);
    }
    if let Some(cols) = args.cols {
        options = options.with_columns(cols);
    }
    if let Some(font) = args.font.clone() {
        options = options.with_font_path(font);
    }
    if let Some(size) = args.font_size {
        options = options.with_font_size(size);
    }
    if let Some(seed) = args.seed {
        options = options.with_seed(seed);
    }
    options = options.with_range(args.start.clone(), args.end.clone());

    // Created on the first matching callback, once the frame count is known
    let progress_bar: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    let pb_clone = Arc::clone(&progress_bar);

    let summary = encoder.encode_video(&input, &output, &options, move |progress: Progress| {
        let mut pb_guard = match pb_clone.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match progress.phase {
            ProgressPhase::MatchingFrames => {
                if pb_guard.is_none() {
                    let pb = ProgressBar::new(progress.total as u64);
                    if let Ok(style) = ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
                    {
                        pb.set_style(style.progress_chars("#>-"));
                    }
                    pb.set_message("Matching frames");
                    *pb_guard = Some(pb);
                }
                if let Some(ref pb) = *pb_guard {
                    pb.set_position(progress.completed as u64);
                }
            }
            ProgressPhase::Writing => {
                if let Some(pb) = pb_guard.take() {
                    pb.finish_with_message("Done");
                }
                println!("{}", progress.message);
            }
            ProgressPhase::Complete => {}
            _ => println!("{}", progress.message),
        }
    })?;

    println!("\nASCII animation written to {}", output.display());

    if args.log_details {
        println!("\n--- Encoding Details ---");
        println!("{}", details(&summary));
    }

    Ok(())
}

fn details(summary: &EncodeSummary) -> String {
    format!(
        "Version: {}\nFrames: {}\nColumns: {}\nRows: {}\nCell: {}x{}\nFPS: {}\nCharacters: {}\nFont: {}\nSize: {} bytes",
        env!("CARGO_PKG_VERSION"),
        summary.frame_count,
        summary.grid.cols,
        summary.grid.rows,
        summary.grid.cell_width,
        summary.grid.cell_height,
        summary.fps,
        summary.char_count,
        summary.font,
        summary.file_size
    )
}

fn run_inspect(path: &Path) -> Result<()> {
    let animation = read_animation(path)?;
    let actual = fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();
    let expected = encoded_size(
        animation.cols,
        animation.rows,
        animation.char_table.len(),
        animation.frames.len(),
    );

    println!("File: {}", path.display());
    println!("Grid: {}x{}", animation.cols, animation.rows);
    println!("FPS: {}", animation.fps);
    println!("Frames: {}", animation.frames.len());
    println!(
        "Characters ({}): {:?}",
        animation.char_table.len(),
        String::from_utf8_lossy(&animation.char_table)
    );

    // Glyph usage across all frames, most used first
    let mut usage: BTreeMap<u8, usize> = BTreeMap::new();
    for cell in animation.frames.iter().flatten() {
        *usage.entry(cell.glyph).or_default() += 1;
    }
    let mut ranked: Vec<(u8, usize)> = usage.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let top: Vec<String> = ranked
        .iter()
        .take(10)
        .map(|(glyph, count)| format!("{:?}={}", animation.char_table[*glyph as usize] as char, count))
        .collect();
    println!("Most used glyphs: {}", top.join(" "));

    println!(
        "Size: {} bytes (expected {}) {}",
        actual,
        expected,
        if actual == expected { "ok" } else { "MISMATCH" }
    );
    if actual != expected {
        return Err(anyhow!("{} has an unexpected size", path.display()));
    }
    Ok(())
}
