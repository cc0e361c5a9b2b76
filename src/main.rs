//! facewarp - Per-frame video segmentation into face textures
//!
//! This application reads frames from a still image or an image sequence,
//! corrects lens distortion, cuts out the configured face regions and keeps
//! them as fixed-size channels. A web API edits the faces live and serves
//! channel snapshots.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use facewarp::capture;
use facewarp::config::Config;
use facewarp::output;
use facewarp::segmenter::{FrameSegmenter, TickReport};
use facewarp::server::{self, AppState};

/// facewarp - cut video frames into perspective-corrected face textures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "facewarp.toml")]
    config: PathBuf,

    /// Frame source: an image file or a directory of frames
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Target FPS
    #[arg(long)]
    fps: Option<u32>,

    /// Web server host
    #[arg(long)]
    host: Option<String>,

    /// Web server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Process a single frame, write the channels and exit
    #[arg(long)]
    once: bool,

    /// Directory for channel PNGs written by --once
    #[arg(short, long, default_value = "channels")]
    output_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("facewarp v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = Config::load_or_create(&args.config)?;

    // CLI args override config file values
    if let Some(source) = &args.source {
        config.source.path = source.clone();
    }
    if let Some(fps) = args.fps {
        config.source.fps = fps;
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Source: {:?}", config.source.path);
    info!(
        "Channels: {}x{} ({:?})",
        config.channel.width, config.channel.height, config.channel.filter
    );

    let source = capture::open_source(&config.source)?;
    let segmenter = FrameSegmenter::new(&config.channel, config.pipeline.clone())
        .context("Invalid channel or pipeline settings")?;

    if args.once {
        return run_once(source, segmenter, &args.output_dir);
    }

    let fps = config.source.fps;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Shared state for live face edits
    let state = Arc::new(AppState::new(
        config,
        args.config.clone(),
        segmenter.control().clone(),
        segmenter.channels(),
    ));

    // Start the frame pipeline
    let pipeline_state = state.clone();
    let pipeline_handle = tokio::task::spawn_blocking(move || {
        capture::run_pipeline(source, segmenter, fps, pipeline_state)
    });

    // Start the web server
    info!("Starting web server at http://{}", addr);
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move { server::run_server(&addr, server_state).await });

    // Wait for either to finish (or error), or for Ctrl-C
    tokio::select! {
        result = pipeline_handle => {
            match result {
                Ok(Ok(())) => info!("Pipeline exited normally"),
                Ok(Err(e)) => tracing::error!("Pipeline error: {:#}", e),
                Err(e) => tracing::error!("Pipeline task panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {:#}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    // The runtime waits for the blocking pipeline task on shutdown
    info!("Stopping pipeline");
    state.request_stop();

    Ok(())
}

/// Segment the first frame and write every active face to `output_dir`
fn run_once(
    mut source: Box<dyn capture::FrameSource + Send>,
    mut segmenter: FrameSegmenter,
    output_dir: &std::path::Path,
) -> Result<()> {
    let summary = match segmenter.tick(source.as_mut()) {
        TickReport::Processed(summary) => summary,
        TickReport::Skipped(e) => anyhow::bail!("No frame to segment: {}", e),
    };

    for report in &summary.faces {
        info!("{}: {:?}", report.face, report.outcome);
    }

    let faces: Vec<_> = summary.faces.iter().map(|r| r.face).collect();
    output::write_channels(output_dir, &segmenter.channels(), &faces)?;
    Ok(())
}
