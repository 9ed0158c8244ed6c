//! Microphone capture on a dedicated thread.
//!
//! Device streams are not `Send`, so the stream is built and held on its
//! own thread; frames cross into the async world over an unbounded channel.
//! The thread parks on a stop channel and drops the stream when the
//! [`super::SourceHandle`] is stopped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AudioFrame, CaptureConfig, RunningSource, SourceHandle};
use crate::errors::{SessionError, SessionResult};

/// Microphone capture source.
pub struct CaptureSource;

impl CaptureSource {
    /// Open the default input device and start capturing.
    ///
    /// Blocks briefly while the device opens; call from a blocking-friendly
    /// context. Fails with [`SessionError::Media`] when no device is
    /// available or access is denied, which is the cue for the silent
    /// fallback.
    pub fn open(config: CaptureConfig) -> SessionResult<RunningSource> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SessionResult<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("voicelink-capture".to_string())
            .spawn(move || {
                match build_stream(&config, frame_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Park until stopped; the stream lives as long as
                        // this thread does.
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("capture thread stopped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| SessionError::Media(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(RunningSource {
                frames: frame_rx,
                handle: SourceHandle::for_capture(stop_tx),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Media(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }
}

fn build_stream(
    config: &CaptureConfig,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
) -> SessionResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| SessionError::Media("no input device available".to_string()))?;

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate = config.sample_rate,
        "opening input device"
    );

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_samples = config.frame_samples;
    let sample_rate = config.sample_rate;
    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= frame_samples {
                        let frame = AudioFrame {
                            samples: std::mem::take(&mut pending),
                            sample_rate,
                        };
                        pending.reserve(frame_samples);
                        if frame_tx.send(frame).is_err() {
                            // Receiver gone; frames are dropped until the
                            // thread is stopped.
                            return;
                        }
                    }
                }
            },
            move |err| {
                warn!("input stream error: {err}");
            },
            None,
        )
        .map_err(|e| SessionError::Media(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SessionError::Media(format!("failed to start input stream: {e}")))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Capture requires hardware; environments without an input device must
    // fail with a Media error rather than panic.
    #[test]
    fn test_open_without_device_reports_media_error() {
        match CaptureSource::open(CaptureConfig::default()) {
            Ok(mut running) => running.handle.stop(),
            Err(SessionError::Media(_)) => {}
            Err(other) => panic!("expected Media error, got {other:?}"),
        }
    }
}
