use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::analysis::SpectralAnalyzer;
use crate::audio::bands;
use crate::audio::frames::{silent_frame, BandVector, SampleFrame};
use crate::config::Settings;
use crate::ipc::{BandSink, Publisher, Salts};
use crate::source::{self, FrameSource, FrameStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Running,
    Draining,
    Terminated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    EndOfStream,
    Interrupted,
    SourceFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Complete frames pulled from the source
    pub frames: u64,
    /// Frames whose publish call succeeded (including degraded no-ops)
    pub published: u64,
    /// Frames dropped by a failed semaphore handshake
    pub dropped: u64,
    pub exit: ExitReason,
}

/// Source -> analyzer -> compressor -> sink, one frame at a time on the
/// calling thread.
pub struct Pipeline<S: BandSink> {
    state: PipelineState,
    source: Box<dyn FrameSource>,
    analyzer: Option<SpectralAnalyzer>,
    sink: S,
    stop: Arc<AtomicBool>,
    frame: SampleFrame,
    bands: BandVector,
}

impl Pipeline<Publisher> {
    /// Acquire everything the run needs. The transform plan and the IPC
    /// channel degrade on failure; the source must open.
    pub fn start(settings: &Settings, stop: Arc<AtomicBool>) -> Result<Self> {
        let analyzer = match SpectralAnalyzer::new() {
            Ok(analyzer) => Some(analyzer),
            Err(err) => {
                log::warn!("Spectral analysis disabled: {}", err);
                None
            }
        };

        let sink = Publisher::connect(&settings.key_path, Salts::for_source(settings.source));

        let source = source::open_source(
            settings.source,
            &settings.pipe_path,
            settings.device.as_deref(),
        )
        .with_context(|| format!("Failed to open {} source", settings.source))?;

        Ok(Pipeline::new(source, analyzer, sink, stop))
    }
}

impl<S: BandSink> Pipeline<S> {
    pub fn new(
        source: Box<dyn FrameSource>,
        analyzer: Option<SpectralAnalyzer>,
        sink: S,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            source,
            analyzer,
            sink,
            stop,
            frame: silent_frame(),
            bands: BandVector::default(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run until end-of-stream, a stop request, or a source failure, then
    /// release the source, the transform plan and the channel in that order.
    pub fn run(mut self) -> RunSummary {
        self.transition(PipelineState::Running);
        log::info!(
            "Running: source={}, analysis={}",
            self.source.name(),
            if self.analyzer.is_some() { "on" } else { "off" }
        );

        let mut frames = 0u64;
        let mut published = 0u64;
        let mut dropped = 0u64;

        let exit = loop {
            if self.stop_requested() {
                break ExitReason::Interrupted;
            }

            match self.source.next_frame(&mut self.frame) {
                Ok(FrameStatus::Ready) => {}
                Ok(FrameStatus::EndOfStream) => break ExitReason::EndOfStream,
                Err(err) => {
                    log::error!("Source {} failed: {}", self.source.name(), err);
                    break ExitReason::SourceFailed(err.to_string());
                }
            }

            // a signal during the blocking read discards that frame
            if self.stop_requested() {
                break ExitReason::Interrupted;
            }
            frames += 1;

            if let Some(analyzer) = self.analyzer.as_mut() {
                self.bands = bands::compress(analyzer.analyze(&self.frame));
            }

            match self.sink.publish(&self.bands) {
                Ok(()) => published += 1,
                Err(err) => {
                    dropped += 1;
                    log::debug!("Frame {} not published: {}", frames, err);
                }
            }
            log::trace!("Frame {}: {:?}", frames, self.bands.bands());
        };

        self.transition(PipelineState::Draining);
        let summary = RunSummary {
            frames,
            published,
            dropped,
            exit,
        };
        self.drain();
        log::info!(
            "Stopped ({:?}): {} frames, {} published, {} dropped",
            summary.exit,
            summary.frames,
            summary.published,
            summary.dropped
        );
        summary
    }

    fn drain(self) {
        let Pipeline {
            state,
            source,
            analyzer,
            sink,
            ..
        } = self;

        log::debug!("Closing source {}", source.name());
        drop(source);
        drop(analyzer);
        drop(sink);
        log::debug!("Pipeline {:?} -> {:?}", state, PipelineState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frames::{NUM_BANDS, NUM_SAMPLES};
    use crate::error::{IpcError, SourceError};
    use crate::source::PipeSource;
    use std::io::Cursor;

    #[derive(Default)]
    struct RecordingSink {
        published: Vec<BandVector>,
        calls: usize,
        fail_on: Vec<usize>,
    }

    impl BandSink for &mut RecordingSink {
        fn publish(&mut self, bands: &BandVector) -> Result<(), IpcError> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                return Err(IpcError::Handshake {
                    op: "acquire",
                    source: std::io::Error::from_raw_os_error(libc::EINTR),
                });
            }
            self.published.push(*bands);
            Ok(())
        }
    }

    fn pcm(frames: &[SampleFrame], trailing: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = frames
            .iter()
            .flat_map(|f| f.iter().flat_map(|s| s.to_le_bytes()))
            .collect();
        bytes.extend(std::iter::repeat(0u8).take(trailing));
        bytes
    }

    fn pipe(bytes: Vec<u8>) -> Box<dyn FrameSource> {
        Box::new(PipeSource::from_reader("test", Cursor::new(bytes)))
    }

    fn run_with(source: Box<dyn FrameSource>, sink: &mut RecordingSink) -> RunSummary {
        let analyzer = SpectralAnalyzer::new().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        Pipeline::new(source, Some(analyzer), sink, stop).run()
    }

    fn sine_frame(bin: usize, amplitude: f64) -> SampleFrame {
        let mut frame = silent_frame();
        for (n, s) in frame.iter_mut().enumerate() {
            let phase = 2.0 * std::f64::consts::PI * (bin * n) as f64 / NUM_SAMPLES as f64;
            *s = (amplitude * phase.sin()).round() as i16;
        }
        frame
    }

    #[test]
    fn silent_frame_publishes_zero_bands() {
        let mut sink = RecordingSink::default();
        let summary = run_with(pipe(pcm(&[silent_frame()], 0)), &mut sink);

        assert_eq!(summary.exit, ExitReason::EndOfStream);
        assert_eq!(sink.published, vec![BandVector([0.0; NUM_BANDS])]);
    }

    #[test]
    fn mid_band_sine_dominates_band_one() {
        let centre = bands::band_bins(1).start + bands::band_bins(1).len() / 2;
        let mut sink = RecordingSink::default();
        run_with(pipe(pcm(&[sine_frame(centre, 32767.0)], 0)), &mut sink);

        let b = sink.published[0].bands();
        assert!(b[1] > 10.0 * b[0], "{:?}", b);
        assert!(b[1] > 10.0 * b[2], "{:?}", b);
    }

    #[test]
    fn short_read_on_nth_call_publishes_n_minus_one() {
        let n = 4;
        let full: Vec<SampleFrame> = (0..n - 1).map(|i| sine_frame(10 + i * 300, 8000.0)).collect();
        let mut sink = RecordingSink::default();
        let summary = run_with(pipe(pcm(&full, NUM_SAMPLES)), &mut sink);

        assert_eq!(summary.exit, ExitReason::EndOfStream);
        assert_eq!(summary.frames, (n - 1) as u64);
        assert_eq!(summary.published, (n - 1) as u64);
        assert_eq!(sink.published.len(), n - 1);
    }

    #[test]
    fn bands_are_finite_and_non_negative() {
        let frames: Vec<SampleFrame> = [3, 200, 700, 1000]
            .iter()
            .map(|&bin| sine_frame(bin, 30000.0))
            .chain(std::iter::once([i16::MIN; NUM_SAMPLES]))
            .collect();
        let mut sink = RecordingSink::default();
        run_with(pipe(pcm(&frames, 0)), &mut sink);

        assert_eq!(sink.published.len(), frames.len());
        for v in &sink.published {
            assert!(v.bands().iter().all(|b| b.is_finite() && *b >= 0.0), "{:?}", v);
        }
    }

    #[test]
    fn identical_frames_give_identical_bands() {
        let frame = sine_frame(123, 12345.0);
        let mut sink = RecordingSink::default();
        run_with(pipe(pcm(&[frame, silent_frame(), frame], 0)), &mut sink);
        assert_eq!(sink.published[0], sink.published[2]);
    }

    #[test]
    fn publish_failure_drops_only_that_frame() {
        let frames = vec![sine_frame(40, 1000.0); 5];
        let mut sink = RecordingSink {
            fail_on: vec![2, 4],
            ..Default::default()
        };
        let summary = run_with(pipe(pcm(&frames, 0)), &mut sink);

        assert_eq!(summary.exit, ExitReason::EndOfStream);
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.published, 3);
        assert_eq!(summary.dropped, 2);
    }

    #[test]
    fn disabled_analysis_publishes_zeros() {
        let mut sink = RecordingSink::default();
        let stop = Arc::new(AtomicBool::new(false));
        let source = pipe(pcm(&[sine_frame(500, 30000.0)], 0));
        Pipeline::new(source, None, &mut sink, stop).run();
        assert_eq!(sink.published, vec![BandVector::default()]);
    }

    #[test]
    fn stop_before_first_frame_publishes_nothing() {
        let mut sink = RecordingSink::default();
        let stop = Arc::new(AtomicBool::new(true));
        let source = pipe(pcm(&[silent_frame(); 3], 0));
        let summary = Pipeline::new(source, None, &mut sink, stop).run();

        assert_eq!(summary.exit, ExitReason::Interrupted);
        assert_eq!(summary.frames, 0);
        assert!(sink.published.is_empty());
    }

    /// Raises the stop flag while delivering its `stop_at`-th frame.
    struct InterruptingSource {
        calls: usize,
        stop_at: usize,
        stop: Arc<AtomicBool>,
    }

    impl FrameSource for InterruptingSource {
        fn name(&self) -> &str {
            "interrupting"
        }

        fn next_frame(&mut self, frame: &mut SampleFrame) -> Result<FrameStatus, SourceError> {
            self.calls += 1;
            if self.calls == self.stop_at {
                self.stop.store(true, Ordering::SeqCst);
            }
            frame.fill(100);
            Ok(FrameStatus::Ready)
        }
    }

    #[test]
    fn interrupted_frame_never_reaches_the_sink() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = Box::new(InterruptingSource {
            calls: 0,
            stop_at: 3,
            stop: stop.clone(),
        });
        let mut sink = RecordingSink::default();
        let summary = Pipeline::new(source, None, &mut sink, stop).run();

        assert_eq!(summary.exit, ExitReason::Interrupted);
        assert_eq!(summary.frames, 2);
        assert_eq!(sink.published.len(), 2);
    }

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn next_frame(&mut self, _frame: &mut SampleFrame) -> Result<FrameStatus, SourceError> {
            Err(SourceError::Device("unplugged".into()))
        }
    }

    #[test]
    fn source_failure_ends_the_run() {
        let mut sink = RecordingSink::default();
        let summary = run_with(Box::new(BrokenSource), &mut sink);
        assert!(matches!(summary.exit, ExitReason::SourceFailed(ref msg) if msg.contains("unplugged")));
        assert!(sink.published.is_empty());
    }

    #[test]
    fn last_frame_is_visible_in_shared_segment() {
        use crate::ipc::channel::testing::PrivateChannel;

        let fixture = PrivateChannel::new();
        let consumer = fixture.attach();
        let publisher = Publisher::attached(fixture.attach());
        let stop = Arc::new(AtomicBool::new(false));
        let frames = [silent_frame(), sine_frame(100, 20000.0)];

        let summary = Pipeline::new(
            pipe(pcm(&frames, 0)),
            Some(SpectralAnalyzer::new().unwrap()),
            publisher,
            stop,
        )
        .run();
        assert_eq!(summary.published, 2);

        let mut expected = SpectralAnalyzer::new().unwrap();
        let want = bands::compress(expected.analyze(&frames[1]));
        assert_eq!(consumer.read().unwrap(), want);
        assert!(want.bands()[0] > 0.0);
    }
}
