use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use super::{FrameSource, FrameStatus};
use crate::audio::frames::{SampleFrame, NUM_SAMPLES};
use crate::error::SourceError;

pub const DEFAULT_PIPE_PATH: &str = "/tmp/mpd.fifo";

const FRAME_BYTES: usize = NUM_SAMPLES * std::mem::size_of::<i16>();

/// Headerless signed 16-bit little-endian mono PCM, typically an MPD fifo
/// output. Any reader works; `open` is the named-pipe case.
pub struct PipeSource<R = File> {
    name: String,
    reader: R,
    bytes: Vec<u8>,
}

impl PipeSource<File> {
    /// Blocks until a writer opens the fifo.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Reading PCM from {}", path.display());
        Ok(Self::from_reader(path.display().to_string(), file))
    }
}

impl<R: Read> PipeSource<R> {
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            bytes: vec![0; FRAME_BYTES],
        }
    }

    fn fill(&mut self) -> Result<usize, SourceError> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> FrameSource for PipeSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self, frame: &mut SampleFrame) -> Result<FrameStatus, SourceError> {
        let filled = self.fill()?;
        if filled < FRAME_BYTES {
            log::debug!("{}: short read ({} of {} bytes)", self.name, filled, FRAME_BYTES);
            return Ok(FrameStatus::EndOfStream);
        }

        for (sample, b) in frame.iter_mut().zip(self.bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([b[0], b[1]]);
        }
        Ok(FrameStatus::Ready)
    }
}
