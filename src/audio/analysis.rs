use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::frames::{SampleFrame, FFT_RESULTS, NUM_SAMPLES};
use crate::error::AnalysisError;

/// Real-input DFT of a fixed length, computed through a half-length complex
/// FFT. Even samples go in the real lane and odd samples in the imaginary
/// lane; one twiddle pass then recovers the `len / 2 + 1` Hermitian bins.
///
/// Built once and reused every cycle. Holds its own scratch buffers, so a
/// plan can only run one transform at a time.
pub struct TransformPlan {
    len: usize,
    fft: Arc<dyn Fft<f64>>,
    twiddles: Vec<Complex<f64>>,
    packed: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    spectrum: Vec<Complex<f64>>,
}

impl TransformPlan {
    pub fn new(len: usize) -> Result<Self, AnalysisError> {
        if len == 0 || len % 2 != 0 {
            return Err(AnalysisError::InvalidLength(len));
        }

        let half = len / 2;
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(half);

        let zero = Complex::new(0.0, 0.0);
        let scratch = vec![zero; fft.get_inplace_scratch_len()];
        let twiddles = (0..=half)
            .map(|k| {
                let theta = -2.0 * std::f64::consts::PI * k as f64 / len as f64;
                Complex::from_polar(1.0, theta)
            })
            .collect();

        Ok(Self {
            len,
            fft,
            twiddles,
            packed: vec![zero; half],
            scratch,
            spectrum: vec![zero; half + 1],
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn output_len(&self) -> usize {
        self.len / 2 + 1
    }

    /// Forward transform of `input` (exactly `len()` samples).
    pub fn process(&mut self, input: &[f64]) -> &[Complex<f64>] {
        debug_assert_eq!(input.len(), self.len);

        for (slot, pair) in self.packed.iter_mut().zip(input.chunks_exact(2)) {
            *slot = Complex::new(pair[0], pair[1]);
        }
        self.fft.process_with_scratch(&mut self.packed, &mut self.scratch);

        // X[k] = E[k] + W^k * O[k], with E/O the spectra of the even/odd lanes
        let half = self.len / 2;
        let minus_half_i = Complex::new(0.0, -0.5);
        for k in 0..=half {
            let z = self.packed[k % half];
            let z_mirror = self.packed[(half - k) % half].conj();
            let even = (z + z_mirror) * 0.5;
            let odd = (z - z_mirror) * minus_half_i;
            self.spectrum[k] = even + self.twiddles[k] * odd;
        }

        &self.spectrum
    }
}

/// Turns one `SampleFrame` into its magnitude spectrum.
pub struct SpectralAnalyzer {
    plan: TransformPlan,
    input: Vec<f64>,
    magnitudes: Vec<f64>,
}

impl SpectralAnalyzer {
    pub fn new() -> Result<Self, AnalysisError> {
        let plan = TransformPlan::new(NUM_SAMPLES)?;
        log::debug!(
            "Transform plan ready: {} samples -> {} bins",
            plan.len(),
            plan.output_len()
        );
        Ok(Self {
            plan,
            input: vec![0.0; NUM_SAMPLES],
            magnitudes: vec![0.0; FFT_RESULTS],
        })
    }

    /// Magnitude per bin, `FFT_RESULTS` long. Samples are cast to f64 with
    /// no scaling. The returned slice is overwritten by the next call.
    pub fn analyze(&mut self, frame: &SampleFrame) -> &[f64] {
        for (dst, &s) in self.input.iter_mut().zip(frame.iter()) {
            *dst = f64::from(s);
        }

        let bins = self.plan.process(&self.input);
        for (mag, bin) in self.magnitudes.iter_mut().zip(bins.iter()) {
            *mag = bin.norm();
        }

        &self.magnitudes
    }
}
