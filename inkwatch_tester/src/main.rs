use anyhow::{Context, Result, anyhow};
use clap::Parser;
use inkwatch::config::Config;
use inkwatch::core_modules::utils::image_helper::image_helper;
use inkwatch::{EdgePolicy, MotionOverlayEngine};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Replays a directory of still frames through the overlay engine.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of frames, processed in file-name order.
    input_dir: PathBuf,
    /// Directory the overlays are written to.
    output_dir: PathBuf,
    /// Optional TOML config with `[overlay]` and `[logging]` tables.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Grayscale delta that counts as motion (5-50).
    #[arg(long)]
    sensitivity: Option<f64>,
    /// Temporal smoothing factor (0.5-0.95).
    #[arg(long)]
    decay: Option<f64>,
    /// Half-width of the dilation square.
    #[arg(long)]
    dilation_radius: Option<u32>,
    /// Leave border pixels out of dilation instead of clipping the window.
    #[arg(long)]
    skip_edges: bool,
}

fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    // --- 2. Overlay Configuration ---
    let overlay = &mut config.overlay;
    if let Some(sensitivity) = args.sensitivity {
        overlay.set_sensitivity(sensitivity);
    }
    if let Some(decay) = args.decay {
        overlay.set_decay(decay);
    }
    if let Some(radius) = args.dilation_radius {
        overlay.set_dilation_radius(radius);
    }
    if args.skip_edges {
        overlay.set_dilation_edge(EdgePolicy::Skip);
    }

    // --- 3. Frame Discovery ---
    let inputs = collect_frames(&args.input_dir)?;
    if inputs.is_empty() {
        return Err(anyhow!("no png/jpg frames found in {}", args.input_dir.display()));
    }
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    info!(
        frames = inputs.len(),
        sensitivity = config.overlay.sensitivity(),
        decay = config.overlay.decay(),
        dilation_radius = config.overlay.dilation_radius(),
        "starting overlay run"
    );

    // --- 4. Main Processing Loop ---
    let mut engine = MotionOverlayEngine::new(config.overlay.clone());
    let mut written = 0usize;
    for (index, input) in inputs.iter().enumerate() {
        let frame = match image_helper::load(input) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(file = %input.display(), error = %e, "skipping unreadable frame");
                continue;
            }
        };

        let overlay = engine
            .process_frame(&frame)
            .with_context(|| format!("processing {}", input.display()))?;

        // --- 5. Write Output Frame ---
        let output = args.output_dir.join(overlay_name(index));
        image_helper::save(&output, &overlay)
            .with_context(|| format!("writing {}", output.display()))?;
        debug!(
            file = %input.display(),
            peak = engine.accumulator().map(|a| a.peak()).unwrap_or(0.0),
            "wrote overlay"
        );
        written += 1;
    }

    info!(written, output = %args.output_dir.display(), "processing complete");
    Ok(())
}

/// Image files directly inside `dir`, sorted by name.
fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn overlay_name(index: usize) -> String {
    format!("overlay_{index:05}.png")
}
