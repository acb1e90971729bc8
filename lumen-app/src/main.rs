//! Lumen Application
//!
//! Command-line front end for the LLFF training data pipeline.
//!
//! Subcommands:
//! - `summary`: load a subject and print its split, intrinsics and ray budget
//! - `render-path`: export the synthesized render path as JSON
//! - `sample`: draw training batches and log their statistics

mod app;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lumen - LLFF ray batch inspection
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON subject config used as the base for the options below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one folder per subject
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Subject id (fern, flower, fortress, horns, leaves, orchids, room_llff, trex)
    #[arg(short, long)]
    subject: Option<String>,

    /// Split to load (train, test)
    #[arg(long)]
    split: Option<String>,

    /// Image downsampling factor
    #[arg(short, long)]
    factor: Option<u32>,

    /// Rays per training batch; omit for whole-image evaluation batches
    #[arg(short, long)]
    num_rays: Option<usize>,

    /// Pixel sampling (uniform, learned)
    #[arg(long)]
    sampling: Option<String>,

    /// Background colour (white, black, random, gray)
    #[arg(long)]
    background: Option<String>,

    /// Seed for the sampling generator
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print split sizes, intrinsics, bounds and the realized ray count
    Summary,
    /// Write the render path as JSON
    RenderPath {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Draw batches with the configured sampler
    Sample {
        #[arg(long, default_value_t = 10)]
        steps: usize,
    },
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = app::run(args) {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
