use std::ops::Range;

use super::frames::{BandVector, FREQS_PER_BAND, NUM_BANDS};

/// Common divisor applied to every band.
pub const BAND_DIVISOR: f64 = 60000.0;

/// Per-band attenuation, `NUM_BANDS / (i+1)^4 + 2`.
///
/// Calibrated against pink noise so bands of similar perceived loudness come
/// out at comparable magnitudes. Part of the consumer protocol; do not tune.
pub fn attenuation(band: usize) -> f64 {
    NUM_BANDS as f64 / ((band + 1) as f64).powi(4) + 2.0
}

/// Spectrum bins summed into `band`.
pub fn band_bins(band: usize) -> Range<usize> {
    let start = band * FREQS_PER_BAND;
    start..start + FREQS_PER_BAND
}

/// Reduce a magnitude spectrum into calibrated bands. Values are not clamped.
pub fn compress(spectrum: &[f64]) -> BandVector {
    debug_assert!(spectrum.len() >= NUM_BANDS * FREQS_PER_BAND);

    let mut out = BandVector::default();
    for (i, band) in out.0.iter_mut().enumerate() {
        let sum: f64 = spectrum[band_bins(i)].iter().sum();
        *band = sum / FREQS_PER_BAND as f64 / BAND_DIVISOR / attenuation(i);
    }
    out
}
