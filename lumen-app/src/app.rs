//! Subcommand implementations.

use crate::{Args, Command};
use glam::Vec3;
use lumen_data::{DataError, Split};
use lumen_train::rays::RayBatch;
use lumen_train::{
    ImportanceSignal, LossAggregator, LossTerm, SubjectConfig, SubjectLoader, TrainError,
    TrainingBatch,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn run(args: Args) -> Result<(), AppError> {
    let config = build_config(&args)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut loader = SubjectLoader::new(config)?;

    match args.command {
        Command::Summary => summary(&loader),
        Command::RenderPath { out } => export_render_path(&loader, &out)?,
        Command::Sample { steps } => sample(&mut loader, steps, &mut rng)?,
    }
    Ok(())
}

/// Command-line options override the JSON config, which overrides the defaults.
fn build_config(args: &Args) -> Result<SubjectConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => SubjectConfig::from_json_file(path)?,
        None => SubjectConfig::default(),
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(subject) = &args.subject {
        config.subject_id = subject.parse()?;
    }
    if let Some(split) = &args.split {
        config.split = split.parse::<Split>()?;
    }
    if let Some(factor) = args.factor {
        config.factor = Some(factor);
    }
    if args.num_rays.is_some() {
        config.num_rays = args.num_rays;
    }
    if let Some(sampling) = &args.sampling {
        config.sampling_type = sampling.parse()?;
    }
    if let Some(background) = &args.background {
        config.color_bkgd_aug = background.parse()?;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    Ok(config)
}

fn summary(loader: &SubjectLoader) {
    let config = loader.config();
    let (width, height) = loader.resolution();
    let k = loader.intrinsics();
    println!("subject       {}", config.subject_id);
    println!("split         {} ({} images)", config.split, loader.len());
    println!("resolution    {}x{}", width, height);
    println!("intrinsics    fx {:.3} fy {:.3} cx {:.1} cy {:.1}", k.fx, k.fy, k.cx, k.cy);
    println!("render path   {:?} ({} poses)", loader.render_path().kind, loader.render_path().len());
    println!("holdout view  {}", loader.holdout_view());
    match loader.requested_num_rays().filter(|_| loader.is_training()) {
        Some(requested) => println!("rays          {} (requested {})", loader.num_rays(), requested),
        None => println!("rays          {} per image (evaluation)", loader.num_rays()),
    }
}

fn export_render_path(loader: &SubjectLoader, out: &Path) -> Result<(), AppError> {
    let json = loader.render_path().to_json()?;
    std::fs::write(out, json)?;
    info!("Wrote {} render poses to {}", loader.render_path().len(), out.display());
    Ok(())
}

/// Per-ray loss of a model that renders only the background colour.
fn background_loss(losses: &LossAggregator, batch: &TrainingBatch) -> Result<Vec<f32>, AppError> {
    let predicted = vec![batch.color_bkgd; batch.len()];
    let terms = losses.compute(&predicted, &batch.pixels, None, None)?;
    let rgb = terms.get(&LossTerm::Rgb).map(Vec::as_slice).unwrap_or_default();
    Ok(rgb.chunks(3).map(|c| c.iter().sum()).collect())
}

/// Rays packed in the layout the compute shaders read.
fn gpu_upload(rays: &RayBatch) -> Vec<u8> {
    bytemuck::cast_slice(&rays.to_gpu()).to_vec()
}

fn sample(loader: &mut SubjectLoader, steps: usize, rng: &mut StdRng) -> Result<(), AppError> {
    let losses = LossAggregator::default();
    let mut previous_loss: Option<Vec<f32>> = None;

    for step in 0..steps {
        let signal = previous_loss.as_deref().map(|loss| ImportanceSignal {
            loss_per_ray: loss,
            coordinate_grad: None,
        });
        let batch = loader.next_batch(step % loader.len(), signal.as_ref(), rng)?;

        let loss = background_loss(&losses, &batch)?;
        let n = batch.len().max(1) as f32;
        let mean_colour = batch.pixels.iter().copied().sum::<Vec3>() / n;
        let mean_origin = batch.rays.origins.iter().copied().sum::<Vec3>() / n;
        let mean_loss = loss.iter().sum::<f32>() / n;
        info!(
            step,
            rays = batch.len(),
            upload_bytes = gpu_upload(&batch.rays).len(),
            "mean colour {:.3?}, mean NDC origin {:.3?}, background loss {:.4}",
            mean_colour.to_array(),
            mean_origin.to_array(),
            mean_loss
        );
        previous_loss = Some(loss);
    }
    Ok(())
}
