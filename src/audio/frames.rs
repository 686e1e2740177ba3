/// Mono samples pulled from the source per cycle
pub const NUM_SAMPLES: usize = 2048;
/// Non-redundant bins of a real-input transform of `NUM_SAMPLES`
pub const FFT_RESULTS: usize = NUM_SAMPLES / 2 + 1;
/// Bands published per cycle (wire contract with the consumer)
pub const NUM_BANDS: usize = 3;
/// Bins summed into each band; remainder bins at the top are unused
pub const FREQS_PER_BAND: usize = FFT_RESULTS / NUM_BANDS;

/// One cycle's worth of signed 16-bit mono PCM, overwritten in place.
pub type SampleFrame = [i16; NUM_SAMPLES];

/// Calibrated band energies, ascending frequency.
///
/// The in-memory layout is the wire layout: `NUM_BANDS` densely packed
/// native-endian doubles, no header.
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct BandVector(pub [f64; NUM_BANDS]);

/// Size in bytes of the shared segment a `BandVector` is published into.
pub const BAND_VECTOR_BYTES: usize = std::mem::size_of::<BandVector>();

impl BandVector {
    pub fn bands(&self) -> &[f64; NUM_BANDS] {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
}

impl serde::Serialize for BandVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, serializer)
    }
}

pub fn silent_frame() -> SampleFrame {
    [0; NUM_SAMPLES]
}
