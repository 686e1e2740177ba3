use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{self, Receiver, SyncSender};

use super::{FrameSource, FrameStatus};
use crate::audio::frames::{SampleFrame, NUM_SAMPLES};
use crate::error::SourceError;

pub const CAPTURE_SAMPLE_RATE: u32 = 44100;
pub const CAPTURE_CHANNELS: u16 = 2;
/// Audio older than this is dropped when the pipeline falls behind.
pub const CAPTURE_LATENCY_MS: u32 = 500;

const FRAME_SAMPLES: usize = NUM_SAMPLES * CAPTURE_CHANNELS as usize;
const MAX_PENDING: usize =
    (CAPTURE_SAMPLE_RATE * CAPTURE_LATENCY_MS / 1000) as usize * CAPTURE_CHANNELS as usize;
/// Callback chunks allowed in flight; chunks arriving while it is full are dropped.
const QUEUE_CHUNKS: usize = 64;

#[derive(Debug)]
enum CaptureEvent {
    Samples(Vec<i16>),
    Error(String),
}

/// Live input device at 44.1 kHz stereo, downmixed to mono.
///
/// cpal delivers interleaved chunks on its own callback thread; they are
/// queued until a whole frame is available.
pub struct CaptureSource {
    _stream: cpal::Stream,
    queue: CaptureQueue,
}

impl CaptureSource {
    pub fn open(device_name: Option<&str>) -> Result<Self, SourceError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| SourceError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| SourceError::Device(format!("no input device named '{}'", wanted)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Device("no default input device".into()))?,
        };
        let name = device.name().unwrap_or_else(|_| "capture".into());

        let config = cpal::StreamConfig {
            channels: CAPTURE_CHANNELS,
            sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::sync_channel(QUEUE_CHUNKS);
        let tx_err = tx.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data);
                },
                move |err: cpal::StreamError| {
                    let _ = tx_err.send(CaptureEvent::Error(err.to_string()));
                },
                None,
            )
            .map_err(|e| SourceError::Device(format!("failed to build input stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| SourceError::Device(format!("failed to start stream: {}", e)))?;

        log::info!(
            "Capturing from '{}' at {}Hz, {} channels",
            name,
            CAPTURE_SAMPLE_RATE,
            CAPTURE_CHANNELS
        );

        Ok(Self {
            _stream: stream,
            queue: CaptureQueue::new(name, rx),
        })
    }
}

impl FrameSource for CaptureSource {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn next_frame(&mut self, frame: &mut SampleFrame) -> Result<FrameStatus, SourceError> {
        self.queue.next_frame(frame)
    }
}

/// Hand one callback chunk to the driver without blocking the audio thread.
/// Returns false if the chunk was dropped.
fn forward(tx: &SyncSender<CaptureEvent>, data: &[i16]) -> bool {
    tx.try_send(CaptureEvent::Samples(data.to_vec())).is_ok()
}

/// Driver side of the capture hand-off: turns interleaved chunks into
/// mono frames, keeping at most `CAPTURE_LATENCY_MS` of backlog.
struct CaptureQueue {
    name: String,
    rx: Receiver<CaptureEvent>,
    pending: Vec<i16>,
}

impl CaptureQueue {
    fn new(name: String, rx: Receiver<CaptureEvent>) -> Self {
        Self {
            name,
            rx,
            pending: Vec::with_capacity(MAX_PENDING + FRAME_SAMPLES),
        }
    }

    fn accept(&mut self, event: CaptureEvent) -> Result<(), SourceError> {
        match event {
            CaptureEvent::Samples(chunk) => {
                self.enqueue(&chunk);
                Ok(())
            }
            CaptureEvent::Error(msg) => Err(SourceError::Device(msg)),
        }
    }

    fn enqueue(&mut self, chunk: &[i16]) {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING {
            // keep channel pairs aligned
            let excess = (self.pending.len() - MAX_PENDING) & !1;
            self.pending.drain(..excess);
            log::trace!("{}: dropped {} stale samples", self.name, excess);
        }
    }
}

impl FrameSource for CaptureQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self, frame: &mut SampleFrame) -> Result<FrameStatus, SourceError> {
        // take everything already queued so the backlog cap sees it
        while let Ok(event) = self.rx.try_recv() {
            self.accept(event)?;
        }

        while self.pending.len() < FRAME_SAMPLES {
            match self.rx.recv() {
                Ok(event) => self.accept(event)?,
                Err(_) => {
                    return Err(SourceError::ShortCapture {
                        got: self.pending.len() / CAPTURE_CHANNELS as usize,
                        want: NUM_SAMPLES,
                    })
                }
            }
        }

        downmix_into(&self.pending[..FRAME_SAMPLES], frame);
        self.pending.drain(..FRAME_SAMPLES);
        Ok(FrameStatus::Ready)
    }
}

/// Average each interleaved left/right pair into one mono sample.
pub fn downmix_into(interleaved: &[i16], frame: &mut SampleFrame) {
    for (sample, pair) in frame.iter_mut().zip(interleaved.chunks_exact(2)) {
        *sample = ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16;
    }
}
