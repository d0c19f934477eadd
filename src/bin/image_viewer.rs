use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::Parser;
use log::{error, info, warn};

use flb_vision_demo::{
    http::{self, ReceiverState},
    view::{self, Window, POLL_INTERVAL, WINDOW_NAME},
    FrameSlot,
};

/// Shows the frames the TensorFlow filter posts back, logging the predicted labels
#[derive(Parser, Debug)]
#[command(name = "image-viewer", version, long_about = None)]
struct Args {
    /// The port the API server is listening on
    #[arg(short, long, default_value_t = http::DEFAULT_PORT)]
    port: u16,

    /// Window position on x axis
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    wx: i32,

    /// Window position on y axis
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    wy: i32,

    /// Class index to label table
    #[arg(long, default_value = "assets/imagenet_class_index.json")]
    labels: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if !args.labels.is_file() {
        warn!("Label table {} not found, every request will fail", args.labels.display());
    }

    let slot = Arc::new(FrameSlot::new());
    let listener = http::bind(args.port)?;
    // detached: the server dies with the process
    let _server = http::spawn_server(
        listener,
        ReceiverState {
            slot: slot.clone(),
            labels: args.labels,
        },
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // highgui wants the main thread on macOS
    let mut window = Window::open(WINDOW_NAME, args.wx, args.wy)?;
    let result = view::run(&slot, &mut window, &running, POLL_INTERVAL);
    window.close()?;

    match result {
        Ok(()) => {
            info!("Bye");
            Ok(())
        }
        Err(e) => {
            error!("Render loop stopped: {:#}", e);
            Err(e)
        }
    }
}
