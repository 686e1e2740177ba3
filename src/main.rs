mod audio;
mod cli;
mod config;
mod error;
mod ipc;
mod pipeline;
mod source;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use audio::frames::BandVector;
use cli::Cli;
use config::Settings;
use ipc::{ChannelKeys, IpcChannel, Salts};
use pipeline::{ExitReason, Pipeline};
use source::SourceKind;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect bandpipe.toml / user config
    let cfg = match config::find_config(cli.config.clone()) {
        Some(path) => match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) => {
                log::warn!("Ignoring config: {:#}", err);
                Default::default()
            }
        },
        None => Default::default(),
    };
    let settings = Settings::resolve(&cli, cfg);

    if cli.setup_ipc {
        return setup_ipc(&settings);
    }
    if cli.peek {
        return peek(&settings);
    }

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        // A second signal while already stopping exits on the spot, for when
        // the source is stuck waiting on an idle fifo.
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&stop))
            .context("Failed to install signal handler")?;
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .context("Failed to install signal handler")?;
    }

    log::info!("bandpipe - audio band bridge");
    log::info!("Source: {}", settings.source);
    match settings.source {
        SourceKind::Pipe => log::info!("Pipe: {}", settings.pipe_path.display()),
        SourceKind::Capture => log::info!(
            "Device: {}",
            settings.device.as_deref().unwrap_or("(default input)")
        ),
    }
    log::info!("IPC key file: {}", settings.key_path.display());

    let pipeline = Pipeline::start(&settings, stop)?;
    let summary = pipeline.run();

    if let ExitReason::SourceFailed(msg) = summary.exit {
        anyhow::bail!("Audio source failed: {}", msg);
    }
    Ok(())
}

/// Stand-in for the visualiser host: create the token file, semaphore and
/// segment for the selected source so a bridge can attach.
fn setup_ipc(settings: &Settings) -> Result<()> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.key_path)
        .with_context(|| format!("Failed to create {}", settings.key_path.display()))?;

    let keys = ChannelKeys::derive(&settings.key_path, Salts::for_source(settings.source))?;
    let channel = IpcChannel::create(&keys).context("Failed to create IPC channel")?;
    log::info!(
        "Created {} channel: semaphore {} (key {:#x}), segment {} (key {:#x})",
        settings.source,
        channel.semaphore_id(),
        keys.semaphore,
        channel.segment_id(),
        keys.segment
    );
    Ok(())
}

#[derive(Serialize)]
struct PeekOutput {
    source: String,
    bands: BandVector,
}

fn peek(settings: &Settings) -> Result<()> {
    let keys = ChannelKeys::derive(&settings.key_path, Salts::for_source(settings.source))?;
    let channel = IpcChannel::open(&keys).context("Failed to attach to IPC channel")?;
    let bands = channel.read().context("Failed to read bands")?;

    let output = PeekOutput {
        source: settings.source.to_string(),
        bands,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
