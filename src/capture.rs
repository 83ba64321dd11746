//! Audio capture devices for recording sessions
//!
//! A source hands out one stream per session. Streams push PCM16 little-endian
//! mono fragments at [`SAMPLE_RATE`] into a [`FragmentSink`] from whatever
//! thread the device runs on, and stop for good on `release`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::CaptureError;
use crate::event::{Event, EventSender};
use crate::session::SessionId;

pub const SAMPLE_RATE: u32 = 16000;

/// Where a capture stream delivers its fragments
#[derive(Clone)]
pub struct FragmentSink {
    session: SessionId,
    events: EventSender,
}

impl FragmentSink {
    pub fn new(session: SessionId, events: EventSender) -> Self {
        Self { session, events }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once nobody is listening any more
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.events
            .send(Event::AudioFragment {
                session: self.session,
                bytes,
            })
            .is_ok()
    }
}

pub trait AudioSource {
    fn acquire(&mut self, sink: FragmentSink) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

pub trait CaptureStream {
    /// Close the device; calling it again is harmless
    fn release(&mut self);
}

pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

pub fn resample(samples: &[f32], from_rate: usize, to_rate: usize) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f64 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f64;
            if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
            } else {
                samples.get(idx).copied().unwrap_or(0.0)
            }
        })
        .collect()
}

/// Stand-in device producing silent fragments on a fixed cadence
pub struct SilenceSource {
    fragment: Duration,
}

impl SilenceSource {
    pub fn new(fragment: Duration) -> Self {
        Self { fragment }
    }
}

impl AudioSource for SilenceSource {
    fn acquire(&mut self, sink: FragmentSink) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let fragment = self.fragment;
        let bytes = (SAMPLE_RATE as u128 * fragment.as_millis() / 1000) as usize * 2;

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", sink.session()))
            .spawn(move || {
                while running_thread.load(Ordering::SeqCst) {
                    std::thread::sleep(fragment);
                    if !running_thread.load(Ordering::SeqCst) || !sink.send(vec![0u8; bytes]) {
                        break;
                    }
                }
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        tracing::debug!(?fragment, "silence capture opened");
        Ok(Box::new(ThreadStream {
            running,
            handle: Some(handle),
        }))
    }
}

struct ThreadStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream for ThreadStream {
    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::debug!("silence capture released");
        }
    }
}

impl Drop for ThreadStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(feature = "mic")]
pub use mic::MicSource;

#[cfg(feature = "mic")]
mod mic {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::{AudioSource, CaptureStream, FragmentSink, SAMPLE_RATE, resample, samples_to_pcm16};
    use crate::error::CaptureError;

    /// Default input device through cpal
    #[derive(Default)]
    pub struct MicSource;

    impl AudioSource for MicSource {
        fn acquire(&mut self, sink: FragmentSink) -> Result<Box<dyn CaptureStream>, CaptureError> {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
            let supported = device
                .default_input_config()
                .map_err(|e| CaptureError::Device(e.to_string()))?;
            let input_rate = u32::from(supported.sample_rate()) as usize;
            let channels = supported.channels() as usize;

            tracing::debug!(
                input_rate,
                channels,
                target_rate = SAMPLE_RATE,
                "opening microphone"
            );

            let stream = device
                .build_input_stream(
                    &supported.config(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono: Vec<f32> = if channels == 1 {
                            data.to_vec()
                        } else {
                            data.chunks(channels)
                                .map(|c| c.iter().sum::<f32>() / channels as f32)
                                .collect()
                        };
                        let resampled = resample(&mono, input_rate, SAMPLE_RATE as usize);
                        let _ = sink.send(samples_to_pcm16(&resampled));
                    },
                    |err| tracing::error!(error = %err, "microphone stream error"),
                    None,
                )
                .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

            stream
                .play()
                .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

            Ok(Box::new(MicStream {
                stream: Some(stream),
            }))
        }
    }

    struct MicStream {
        stream: Option<cpal::Stream>,
    }

    impl CaptureStream for MicStream {
        fn release(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
                drop(stream);
                tracing::debug!("microphone released");
            }
        }
    }

    impl Drop for MicStream {
        fn drop(&mut self) {
            self.release();
        }
    }
}
