//! Demo: cycles solid-colour dumb buffers on one output, then restores it.
//!
//! Must run on a VT without another DRM master (no compositor running).

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use calloop::EventLoop;
use clap::Parser;
use novade_kms_plane::config::{ConfigLoader, KmsConfig};
use novade_kms_plane::dumb::DumbBufferPool;
use novade_kms_plane::{
    discover_output, insert_page_flip_source, logging, DrmCard, FramebufferPlane, PageFlipRegistry,
    PlaneContext, SessionSignal, ViewHandler, ViewImpl,
};

/// Longest wait for a frame before giving up on the output.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "novade-kms-plane")]
#[command(about = "Present frames on one KMS output through a double-buffered plane")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Defaults to $NOVADE_KMS_CONFIG, then built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// DRM card node, overriding the configuration.
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Number of frames to present, overriding the configuration.
    #[arg(short = 'n', long)]
    frames: Option<u32>,
}

struct FrameCounter {
    presented: Rc<Cell<u32>>,
    ready: Rc<Cell<bool>>,
}

impl ViewHandler for FrameCounter {
    fn frame(&mut self, time_msec: u32) {
        self.presented.set(self.presented.get() + 1);
        self.ready.set(true);
        tracing::trace!(time_msec, frame = self.presented.get(), "Frame presented");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            logging::init_minimal_logging();
            tracing::error!("Configuration loading failed: {}", err);
            return Err(err).context("Failed to load configuration");
        }
    };
    if let Some(device) = cli.device {
        config.device.path = device;
    }
    if let Some(frames) = cli.frames {
        ensure!(frames > 0, "--frames must be at least 1");
        config.demo.frames = frames;
    }
    logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    run(&config)
}

fn run(config: &KmsConfig) -> Result<()> {
    let card = Rc::new(
        DrmCard::open(&config.device.path)
            .with_context(|| format!("Failed to open {}", config.device.path.display()))?,
    );
    let output = discover_output(&card, &config.output).context("No usable output")?;

    let mut event_loop: EventLoop<'static, ()> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let page_flips = PageFlipRegistry::new();
    insert_page_flip_source(&event_loop.handle(), Rc::clone(&card), page_flips.clone())
        .context("Failed to watch the DRM device")?;
    let ctx = PlaneContext {
        device: Rc::clone(&card),
        scheduler: Rc::new(event_loop.handle()),
        session: SessionSignal::new(),
        page_flips,
    };

    let (width, height) = output.mode.size();
    let pool = DumbBufferPool::new(Rc::clone(&card), u32::from(width), u32::from(height));
    let buffers = config
        .demo
        .colors
        .iter()
        .map(|color| pool.allocate(*color))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to allocate scan-out buffers")?;

    // Declared after the buffers so it is dropped, and the CRTC restored,
    // before any framebuffer is removed.
    let mut plane = FramebufferPlane::initialize(&ctx, output.crtc, output.mode, &[output.connector])
        .with_context(|| format!("Failed to set up plane on {}", output.connector_name))?;
    let presented = Rc::new(Cell::new(0));
    let ready = Rc::new(Cell::new(false));
    plane.view().add_handler(FrameCounter {
        presented: Rc::clone(&presented),
        ready: Rc::clone(&ready),
    });

    tracing::info!(
        connector = %output.connector_name,
        frames = config.demo.frames,
        buffers = buffers.len(),
        "Presenting"
    );
    let mut next = buffers.iter().cycle();
    if let Some(buffer) = next.next() {
        plane.attach(buffer).context("First mode-set failed")?;
    }

    let mut last_frame = Instant::now();
    while presented.get() < config.demo.frames {
        event_loop
            .dispatch(Some(Duration::from_millis(100)), &mut ())
            .context("Event loop dispatch failed")?;

        if !ready.replace(false) {
            ensure!(
                last_frame.elapsed() < FRAME_TIMEOUT,
                "No frame presented for {} seconds",
                FRAME_TIMEOUT.as_secs()
            );
            continue;
        }
        last_frame = Instant::now();
        if presented.get() < config.demo.frames && plane.update() {
            if let Some(buffer) = next.next() {
                plane.attach(buffer).context("Presenting frame failed")?;
            }
        }
    }

    tracing::info!(frames = presented.get(), "Done, restoring CRTC");
    plane.finalize();
    Ok(())
}
