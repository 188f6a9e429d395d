//! cadence - Main Entry Point
//!
//! Drives the frame engine over a synthetic scene for a fixed number of
//! frames, on the headless backend or on Vulkan.

mod scene;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use cadence_core::EngineConfig;
use cadence_renderer::{FrameTargets, ObjectRegistry, Orchestrator, PipelineTable};
use cadence_rhi::{CompletionMode, GpuDevice, HeadlessDevice, VulkanDevice};

use scene::SyntheticScene;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// Software GPU timeline, no driver required.
    Headless,
    /// Vulkan 1.3 device without a surface.
    Vulkan,
}

/// Multithreaded frame command-submission engine.
#[derive(Debug, Parser)]
#[command(name = "cadence", version, about)]
struct Args {
    /// Frames to render.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Upper bound on worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Frames the CPU may run ahead of the GPU.
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// TOML engine configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "headless")]
    backend: BackendArg,

    /// Simulated execution time per submission on the headless backend.
    /// Zero retires work immediately.
    #[arg(long, default_value_t = 1)]
    gpu_latency_ms: u64,

    /// Meshes in the synthetic scene.
    #[arg(long, default_value_t = 256)]
    objects: usize,

    /// Enable Vulkan validation layers.
    #[arg(long)]
    validation: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.max_worker_threads = threads;
    }
    if let Some(frames) = args.frames_in_flight {
        config.frames_in_flight = frames;
    }
    config.validate()?;
    Ok(config)
}

fn create_device(args: &Args) -> Result<Arc<dyn GpuDevice>> {
    let device: Arc<dyn GpuDevice> = match args.backend {
        BackendArg::Headless => {
            let mode = match args.gpu_latency_ms {
                0 => CompletionMode::Immediate,
                ms => CompletionMode::Delayed(Duration::from_millis(ms)),
            };
            HeadlessDevice::new(mode)
        }
        BackendArg::Vulkan => {
            VulkanDevice::new(args.validation).context("creating the Vulkan device")?
        }
    };
    Ok(device)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    cadence_core::init_logging();
    info!("Starting cadence");

    let config = load_config(&args)?;
    let device = create_device(&args)?;

    let registry = Arc::new(ObjectRegistry::new());
    let scene = SyntheticScene::build(&registry, args.objects);

    let mut orchestrator = Orchestrator::new(
        device,
        &config,
        PipelineTable::standard(),
        registry,
        FrameTargets::default(),
    )?;

    for _ in 0..args.frames {
        orchestrator.begin_frame();
        scene.submit(&mut orchestrator)?;
        let stats = orchestrator.render_frame()?;
        if stats.frame % 60 == 0 {
            info!(
                "Frame {}: {} item(s), fence {}, {:?}",
                stats.frame,
                stats.total_items(),
                stats.fence_value,
                stats.cpu_time
            );
        }
    }

    orchestrator.wait_for_gpu_idle()?;
    info!(
        "Rendered {} frame(s) of {} item(s) on {} worker(s), average frame {:?}",
        orchestrator.frame_number(),
        scene.item_count(),
        orchestrator.thread_count(),
        orchestrator.average_frame_time()
    );

    Ok(())
}
