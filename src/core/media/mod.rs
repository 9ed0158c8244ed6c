//! Local audio sources and sample conversion.
//!
//! A source produces fixed-cadence [`AudioFrame`]s of mono f32 PCM. The
//! production source is the default microphone ([`capture::CaptureSource`]);
//! when the device is unavailable the session falls back to
//! [`silence::SilenceSource`], which produces valid zeroed frames so the
//! transport still gets its one audio track.

use tokio::sync::mpsc;

pub mod capture;
pub mod silence;

pub use capture::CaptureSource;
pub use silence::SilenceSource;

/// Capture sample rate in Hz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Frame cadence in milliseconds.
pub const FRAME_DURATION_MS: u64 = 20;

/// Samples per frame at the capture rate (20ms at 16kHz).
pub const SAMPLES_PER_FRAME: usize =
    (CAPTURE_SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// Sample rate of the G.711 track payload.
pub const TRACK_SAMPLE_RATE: u32 = 8_000;

/// G.711 mu-law code for a zero sample.
pub const ULAW_SILENCE: u8 = 0xFF;

/// One chunk of mono PCM from a source.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples, f32 normalized to -1.0..1.0.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Source configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (mono capture).
    pub channels: u16,
    /// Samples per emitted frame.
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            frame_samples: SAMPLES_PER_FRAME,
        }
    }
}

/// A started source: the frame stream plus its lifecycle handle.
#[derive(Debug)]
pub struct RunningSource {
    /// Frame stream.
    pub frames: mpsc::UnboundedReceiver<AudioFrame>,
    /// Lifecycle handle; dropping it stops the source.
    pub handle: SourceHandle,
}

/// Lifecycle handle for a running source.
#[derive(Debug)]
pub struct SourceHandle {
    synthetic: bool,
    stop: Option<std::sync::mpsc::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SourceHandle {
    pub(crate) fn for_capture(stop: std::sync::mpsc::Sender<()>) -> Self {
        Self {
            synthetic: false,
            stop: Some(stop),
            task: None,
        }
    }

    pub(crate) fn for_silence(task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            synthetic: true,
            stop: None,
            task: Some(task),
        }
    }

    /// Whether this is the synthetic silent fallback rather than a real
    /// capture device.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Stop the source. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Sample Conversion
// =============================================================================

/// Convert a normalized f32 sample to i16 PCM.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Decimate to the 8kHz track rate by averaging adjacent pairs. Frames
/// already at 8kHz pass through untouched.
pub fn downsample_to_track_rate(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    match sample_rate {
        TRACK_SAMPLE_RATE => samples.to_vec(),
        rate if rate == TRACK_SAMPLE_RATE * 2 => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect(),
        rate => {
            // Integer-step decimation for other multiples of 8kHz.
            let step = (rate / TRACK_SAMPLE_RATE).max(1) as usize;
            samples.iter().step_by(step).copied().collect()
        }
    }
}

/// G.711 mu-law encode one 16-bit sample.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = (i32::from(sample)).abs().min(CLIP) + BIAS;
    // Magnitude is in 132..=32767 so the msb sits in bit 7..=14.
    let exponent = (31 - (magnitude as u32).leading_zeros()) as i32 - 7;
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

/// Encode a frame of normalized f32 samples as mu-law bytes.
pub fn encode_ulaw(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| linear_to_ulaw(f32_to_i16(s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_reference_points() {
        // G.711 reference values
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
    }

    #[test]
    fn test_ulaw_sign_symmetry() {
        for &sample in &[100i16, 1000, 8000, 20000] {
            let pos = linear_to_ulaw(sample);
            let neg = linear_to_ulaw(-sample);
            // Positive and negative codes differ only in the sign bit
            assert_eq!(pos & 0x7F, neg & 0x7F);
            assert_ne!(pos & 0x80, neg & 0x80);
        }
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32767);
    }

    #[test]
    fn test_downsample_halves_16k() {
        let samples: Vec<f32> = (0..SAMPLES_PER_FRAME).map(|i| i as f32).collect();
        let out = downsample_to_track_rate(&samples, CAPTURE_SAMPLE_RATE);
        assert_eq!(out.len(), SAMPLES_PER_FRAME / 2);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn test_downsample_passthrough_8k() {
        let samples = vec![0.25f32; 160];
        let out = downsample_to_track_rate(&samples, TRACK_SAMPLE_RATE);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_encode_ulaw_silence() {
        let encoded = encode_ulaw(&[0.0; 8]);
        assert!(encoded.iter().all(|&b| b == ULAW_SILENCE));
    }

    #[test]
    fn test_frame_constants_consistent() {
        assert_eq!(SAMPLES_PER_FRAME, 320);
        assert_eq!(CAPTURE_SAMPLE_RATE, TRACK_SAMPLE_RATE * 2);
    }
}
