use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transform length must be even and non-zero, got {0}")]
    InvalidLength(usize),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
    #[error("capture device: {0}")]
    Device(String),
    #[error("capture stream ended after {got} of {want} samples")]
    ShortCapture { got: usize, want: usize },
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("cannot derive IPC key from {path} (salt {salt}): {source}")]
    Key {
        path: String,
        salt: i32,
        #[source]
        source: io::Error,
    },
    #[error("semaphore unavailable: {0}")]
    Semaphore(#[source] io::Error),
    #[error("shared memory unavailable: {0}")]
    Segment(#[source] io::Error),
    #[error("shared memory attach failed: {0}")]
    Attach(#[source] io::Error),
    #[error("semaphore {op} failed: {source}")]
    Handshake {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("semaphore is held by another party")]
    Busy,
}
