use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rs_retinaface::utils::utils::byte_data_to_image;
use rs_retinaface::{FaceDetectionConfig, NpyReplay, RetinaFaceDetection};

/// Decode replayed RetinaFace outputs into face detections.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// image the outputs were produced from
    #[arg(long, value_name = "IMAGE")]
    pub image: PathBuf,
    /// directory holding the nine `.npy` output dumps
    #[arg(long, value_name = "DIR")]
    pub outputs: PathBuf,
    /// JSON configuration file, missing fields take their defaults
    #[arg(long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub score_threshold: Option<f32>,
    #[arg(long)]
    pub nms_threshold: Option<f32>,
    /// never enlarge images smaller than the network input
    #[arg(long)]
    pub no_upscaling: bool,
    /// square network input size in pixels
    #[arg(long, value_name = "N")]
    pub target_size: Option<u32>,
}

fn load_config(args: &Args) -> Result<FaceDetectionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => FaceDetectionConfig::new(),
    };
    if let Some(score_threshold) = args.score_threshold {
        config = config.with_score_threshold(score_threshold);
    }
    if let Some(nms_threshold) = args.nms_threshold {
        config = config.with_nms_threshold(nms_threshold);
    }
    if args.no_upscaling {
        config = config.with_allow_upscaling(false);
    }
    if let Some(size) = args.target_size {
        config = config.with_image_size(size, size);
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let im_bytes = fs::read(&args.image).with_context(|| format!("failed to read {}", args.image.display()))?;
    let image = byte_data_to_image(&im_bytes).with_context(|| format!("failed to decode {}", args.image.display()))?;
    info!("image {}: {}x{}", args.image.display(), image.width(), image.height());

    let model = NpyReplay::from_dir(&args.outputs)?;
    let engine = RetinaFaceDetection::new(config)?;
    let detections = engine.detect_image(&image.into(), &model)?;
    info!("{} faces", detections.len());

    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}
