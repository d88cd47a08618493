//! Tessel Viewer
//!
//! Opens a window and drives the `tessel-gfx` core through its full frame
//! protocol: acquire a back buffer, submit a clear, present, and rebuild the
//! swapchain on resize.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tessel-viewer -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod config;
mod frame;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::event_loop::{ControlFlow, EventLoop};

use crate::app::ViewerApp;
use crate::config::{Command, ViewerConfig};

fn main() -> anyhow::Result<()> {
    let config = match ViewerConfig::parse(std::env::args().skip(1))? {
        Command::Run(config) => config,
        Command::Help => {
            print_help();
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(config);

    if let Err(e) = event_loop.run_app(&mut app) {
        error!("Event loop error: {e}");
        return Err(e.into());
    }

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_help() {
    eprintln!(
        "Tessel Viewer

USAGE:
    cargo run -p tessel-viewer -- [OPTIONS]

OPTIONS:
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers
                            Default: enabled in debug builds
    --back-buffers <N>      Number of swapchain images (default: 3)
    --present-mode <MODE>   fifo, fifo-relaxed, mailbox or immediate (default: fifo)
    --size <W>x<H>          Initial window size (default: 1280x720)
    --frames <N>            Exit after rendering N frames
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)
                            Validation messages use the tessel_gfx::validation target"
    );
}
