use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use log::info;

use flb_vision_demo::{
    mqtt::{self, DEFAULT_CLIENT_ID, DEFAULT_HOST, DEFAULT_TOPIC},
    publisher::publish_images,
};

const CONNECT_POLL: Duration = Duration::from_millis(100);

/// Publishes sample images to the broker for the TensorFlow filter, one per key press
#[derive(Parser, Debug)]
#[command(name = "image-publisher", version, long_about = None)]
struct Args {
    /// Broker address
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Broker port
    #[arg(long, default_value_t = mqtt::DEFAULT_PORT)]
    port: u16,

    /// MQTT client identifier
    #[arg(long, default_value = DEFAULT_CLIENT_ID)]
    client_id: String,

    /// Topic the filter subscribes to
    #[arg(long, default_value = DEFAULT_TOPIC)]
    topic: String,

    /// Directory of images to send
    #[arg(long, default_value = "assets/pics")]
    pics: PathBuf,

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

    info!("Connecting to {}:{}", args.host, args.port);
    let mut link = mqtt::connect(&args.client_id, &args.host, args.port)?;
    link.wait_connected(CONNECT_POLL);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let sent = publish_images(&args.pics, &args.topic, &mut link, &mut input, &mut stdout)?;
    stdout.flush()?;

    info!("Sent {} images", sent);
    link.shutdown()
}
