pub mod capture;
pub mod pipe;

use std::path::Path;

use crate::audio::frames::SampleFrame;
use crate::error::SourceError;

pub use capture::CaptureSource;
pub use pipe::PipeSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    EndOfStream,
}

/// Anything that can fill one `SampleFrame` of mono PCM per call.
pub trait FrameSource {
    fn name(&self) -> &str;

    /// Blocks until a full frame is written into `frame`. A partial frame is
    /// never reported as `Ready`.
    fn next_frame(&mut self, frame: &mut SampleFrame) -> Result<FrameStatus, SourceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Raw s16le mono from a named pipe
    Pipe,
    /// Live stereo capture device, downmixed
    Capture,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Pipe => f.write_str("pipe"),
            SourceKind::Capture => f.write_str("capture"),
        }
    }
}

pub fn open_source(
    kind: SourceKind,
    pipe_path: &Path,
    device: Option<&str>,
) -> Result<Box<dyn FrameSource>, SourceError> {
    match kind {
        SourceKind::Pipe => Ok(Box::new(PipeSource::open(pipe_path)?)),
        SourceKind::Capture => Ok(Box::new(CaptureSource::open(device)?)),
    }
}
