use clap::Parser;
use std::path::PathBuf;

use crate::source::SourceKind;

#[derive(Parser, Debug)]
#[command(
    name = "bandpipe",
    about = "Real-time audio band analyzer feeding a shared-memory visualiser channel"
)]
pub struct Cli {
    /// Audio source [default: pipe]
    #[arg(short, long, value_enum)]
    pub source: Option<SourceKind>,

    /// Named pipe delivering raw s16le mono PCM [default: /tmp/mpd.fifo]
    #[arg(long)]
    pub pipe_path: Option<PathBuf>,

    /// Capture device name (default input device when omitted)
    #[arg(long)]
    pub device: Option<String>,

    /// Token file the IPC keys are derived from [default: /tmp/lsdvis.ipc]
    #[arg(long)]
    pub ipc_path: Option<PathBuf>,

    /// Config file (auto-detects ./bandpipe.toml, then ~/.config/bandpipe/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Create the semaphore and shared segment for the selected source, then exit
    #[arg(long, conflicts_with = "peek")]
    pub setup_ipc: bool,

    /// Print the band vector currently in the shared segment as JSON, then exit
    #[arg(long)]
    pub peek: bool,
}
