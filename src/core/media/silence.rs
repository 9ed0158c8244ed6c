//! Silent synthetic audio source.
//!
//! Produces valid zeroed frames at the capture cadence so the transport
//! still has one audio track when the microphone is unavailable. The
//! session stays usable for text input and remote audio output.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{AudioFrame, CaptureConfig, RunningSource, SourceHandle};

/// Silent fallback source.
pub struct SilenceSource;

impl SilenceSource {
    /// Start emitting silent frames on the capture cadence.
    pub fn start(config: CaptureConfig) -> RunningSource {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let frame_samples = config.frame_samples;
        let sample_rate = config.sample_rate;
        let cadence =
            Duration::from_millis((frame_samples as u64 * 1000) / u64::from(sample_rate));

        debug!(
            sample_rate,
            frame_samples, "starting silent synthetic audio source"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = AudioFrame {
                    samples: vec![0.0; frame_samples],
                    sample_rate,
                };
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        RunningSource {
            frames: frame_rx,
            handle: SourceHandle::for_silence(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_silence_emits_zeroed_frames() {
        let mut running = SilenceSource::start(CaptureConfig::default());
        assert!(running.handle.is_synthetic());

        for _ in 0..3 {
            let frame = running.frames.recv().await.expect("frame");
            assert_eq!(frame.samples.len(), super::super::SAMPLES_PER_FRAME);
            assert_eq!(frame.sample_rate, super::super::CAPTURE_SAMPLE_RATE);
            assert!(frame.samples.iter().all(|&s| s == 0.0));
        }

        running.handle.stop();
    }

    #[tokio::test]
    async fn test_stop_ends_stream() {
        let mut running = SilenceSource::start(CaptureConfig::default());
        running.handle.stop();
        // After abort the channel drains and closes.
        while running.frames.recv().await.is_some() {}
    }
}
