//! Recording session - one bounded capture of a spoken command
//!
//! A session owns the audio device from `start` until capture stops, either
//! because the recording window elapsed or because it was stopped early. The
//! captured fragments are then joined into one buffer and handed to the
//! command transcriber, whose result comes back as an event.

use std::fmt;
use std::time::{Duration, Instant};

use crate::capture::{AudioSource, CaptureStream, FragmentSink};
use crate::error::CaptureError;
use crate::event::{Event, EventSender};
use crate::timer::{TimerId, Timers};
use crate::transcriber::{CommandTranscriber, TranscriptionJob};

/// Default upper bound on a recording window
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Timeout,
    Forced,
}

/// Device and fragments, alive only while capturing
struct Capture {
    stream: Box<dyn CaptureStream>,
    fragments: Vec<Vec<u8>>,
    timer: Option<TimerId>,
}

pub struct RecordingSession {
    id: SessionId,
    capture: Option<Capture>,
    hint: Option<String>,
    started: Instant,
}

impl RecordingSession {
    /// Acquire the device and arm the recording window
    pub fn start(
        id: SessionId,
        source: &mut dyn AudioSource,
        events: &EventSender,
        timers: &mut dyn Timers,
        max_duration: Duration,
        hint: Option<String>,
    ) -> Result<Self, CaptureError> {
        let stream = source.acquire(FragmentSink::new(id, events.clone()))?;
        let timer = timers.schedule(max_duration, Event::RecordingTimeout(id));

        tracing::debug!(session = %id, ?max_duration, "recording started");
        Ok(Self {
            id,
            capture: Some(Capture {
                stream,
                fragments: Vec::new(),
                timer: Some(timer),
            }),
            hint,
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// True until capture stops, false while waiting for the transcript
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn fragment_count(&self) -> usize {
        self.capture.as_ref().map_or(0, |c| c.fragments.len())
    }

    /// Fragments arriving after capture stopped are dropped
    pub fn push_fragment(&mut self, bytes: Vec<u8>) -> bool {
        match self.capture.as_mut() {
            Some(capture) => {
                capture.fragments.push(bytes);
                true
            }
            None => false,
        }
    }

    /// The recording window elapsed; its timer has already fired
    pub fn timed_out(
        &mut self,
        transcriber: &mut dyn CommandTranscriber,
        events: &EventSender,
        timers: &mut dyn Timers,
    ) -> bool {
        if let Some(capture) = self.capture.as_mut() {
            capture.timer = None;
        }
        self.finish(StopReason::Timeout, transcriber, events, timers)
    }

    /// Stop capture early and submit what was recorded so far
    pub fn force_stop(
        &mut self,
        transcriber: &mut dyn CommandTranscriber,
        events: &EventSender,
        timers: &mut dyn Timers,
    ) -> bool {
        self.finish(StopReason::Forced, transcriber, events, timers)
    }

    /// Release everything and discard the audio; nothing is transcribed
    pub fn abort(&mut self, timers: &mut dyn Timers) {
        if let Some(mut capture) = self.capture.take() {
            if let Some(timer) = capture.timer.take() {
                timers.cancel(timer);
            }
            capture.stream.release();
            tracing::debug!(
                session = %self.id,
                fragments = capture.fragments.len(),
                "recording aborted"
            );
        }
    }

    fn finish(
        &mut self,
        reason: StopReason,
        transcriber: &mut dyn CommandTranscriber,
        events: &EventSender,
        timers: &mut dyn Timers,
    ) -> bool {
        let Some(mut capture) = self.capture.take() else {
            return false;
        };
        if let Some(timer) = capture.timer.take() {
            timers.cancel(timer);
        }
        capture.stream.release();

        let audio = capture.fragments.concat();
        tracing::info!(
            session = %self.id,
            ?reason,
            fragments = capture.fragments.len(),
            audio_bytes = audio.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "recording finished"
        );

        transcriber.transcribe(
            TranscriptionJob {
                session: self.id,
                audio,
                hint: self.hint.take(),
            },
            events,
        );
        true
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stream.release();
        }
    }
}
