//! Voice session controller - the state machine tying everything together
//!
//! ```text
//! Idle --start--> Listening --final wake phrase--> AwaitingCommand
//!                     ^                                  | device acquired
//!                     |                                  v
//!                     +------ command resolved ------ Recording
//! any --stop--> Idle
//! ```
//!
//! The controller owns all mutable voice state. It runs on one thread and
//! only changes state from [`VoiceSessionController::handle`] or the explicit
//! `start` / `stop` calls, so events are processed strictly one after another.

use std::fmt;
use std::time::Duration;

use crate::capture::AudioSource;
use crate::command::{Command, CommandResolver, Resolution};
use crate::error::{CaptureError, Error, Result, TranscriptionError};
use crate::event::{Event, EventReceiver, EventSender};
use crate::player::PlayerControls;
use crate::session::{DEFAULT_MAX_DURATION, RecordingSession, SessionId};
use crate::timer::{TimerId, Timers};
use crate::transcriber::{
    CommandTranscriber, ContinuousTranscription, TranscriptEvent, TranscriptSink,
};
use crate::wake::WakeWord;

pub const DEFAULT_WAKE_WORD: &str = "小舞小舞";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    /// Wake phrase confirmed, recording not yet running
    AwaitingCommand,
    Recording,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::AwaitingCommand => write!(f, "AwaitingCommand"),
            SessionState::Recording => write!(f, "Recording"),
        }
    }
}

/// Why voice control switched itself off
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    PermissionDenied(CaptureError),
    UnsupportedEnvironment,
    TranscriptionFailed(TranscriptionError),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::PermissionDenied(e) => write!(f, "{}", e),
            UnavailableReason::UnsupportedEnvironment => {
                write!(f, "speech recognition is not supported here")
            }
            UnavailableReason::TranscriptionFailed(e) => {
                write!(f, "speech recognition keeps failing: {}", e)
            }
        }
    }
}

/// UI-facing notifications; all methods default to doing nothing
pub trait VoiceObserver {
    fn state_changed(&mut self, _state: SessionState) {}

    fn command_dispatched(&mut self, _command: Command) {}

    /// Voice control turned itself off; the toggle should read "off"
    fn voice_unavailable(&mut self, _reason: &UnavailableReason) {}
}

pub struct NoopObserver;

impl VoiceObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub wake_word: String,
    pub max_recording: Duration,
    pub restart_delay: Duration,
    /// Consecutive failed stream starts before giving up
    pub max_restart_failures: u32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            max_recording: DEFAULT_MAX_DURATION,
            restart_delay: Duration::from_secs(1),
            max_restart_failures: 3,
        }
    }
}

/// External collaborators the controller drives
pub struct Capabilities {
    pub transcription: Box<dyn ContinuousTranscription>,
    pub audio: Box<dyn AudioSource>,
    pub transcriber: Box<dyn CommandTranscriber>,
    pub player: Box<dyn PlayerControls>,
    pub timers: Box<dyn Timers>,
    pub observer: Box<dyn VoiceObserver>,
}

pub struct VoiceSessionController {
    wake: WakeWord,
    settings: VoiceSettings,
    resolver: CommandResolver,
    events: EventSender,
    caps: Capabilities,

    state: SessionState,
    unsupported: bool,
    /// Wake phrase seen in an interim result of the current utterance
    wake_heard: bool,

    /// Bumped on every stream start and on stop; stale events are dropped
    generation: u64,
    streaming: bool,
    restart_timer: Option<TimerId>,
    /// Stream ended mid-command; restart once back in Listening
    restart_deferred: bool,
    restart_failures: u32,

    session: Option<RecordingSession>,
    next_session: u64,
}

impl VoiceSessionController {
    /// Probe the environment once; an unsupported one is reported right away
    pub fn new(
        settings: VoiceSettings,
        resolver: CommandResolver,
        events: EventSender,
        mut caps: Capabilities,
    ) -> Self {
        let unsupported = !caps.transcription.is_supported();
        if unsupported {
            tracing::warn!("continuous transcription unavailable, voice control disabled");
            caps.observer
                .voice_unavailable(&UnavailableReason::UnsupportedEnvironment);
        }

        Self {
            wake: WakeWord::new(&settings.wake_word),
            settings,
            resolver,
            events,
            caps,
            state: SessionState::Idle,
            unsupported,
            wake_heard: false,
            generation: 0,
            streaming: false,
            restart_timer: None,
            restart_deferred: false,
            restart_failures: 0,
            session: None,
            next_session: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        !self.unsupported
    }

    pub fn wake_word(&self) -> &str {
        self.wake.phrase()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(RecordingSession::id)
    }

    /// A session exists and still holds the audio device
    pub fn is_capturing(&self) -> bool {
        self.session.as_ref().is_some_and(RecordingSession::is_capturing)
    }

    pub fn wake_heard(&self) -> bool {
        self.wake_heard
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Begin continuous listening; a no-op unless Idle
    pub fn start(&mut self) -> Result<()> {
        if self.unsupported {
            return Err(Error::Unavailable(
                UnavailableReason::UnsupportedEnvironment.to_string(),
            ));
        }
        if self.state != SessionState::Idle {
            return Ok(());
        }

        self.open_stream()?;
        self.restart_failures = 0;
        self.set_state(SessionState::Listening);
        tracing::info!(wake_word = %self.wake.phrase(), "listening for wake phrase");
        Ok(())
    }

    /// Tear everything down synchronously; a no-op when already Idle
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }

        if let Some(timer) = self.restart_timer.take() {
            self.caps.timers.cancel(timer);
        }
        if self.streaming {
            self.caps.transcription.stop();
            self.streaming = false;
        }
        self.generation += 1;
        if let Some(mut session) = self.session.take() {
            session.abort(self.caps.timers.as_mut());
        }
        self.wake_heard = false;
        self.restart_deferred = false;
        self.restart_failures = 0;

        self.set_state(SessionState::Idle);
        tracing::info!("voice control stopped");
    }

    /// End the current recording early and transcribe what was captured
    pub fn end_recording(&mut self) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        match self.session.as_mut() {
            Some(session) => session.force_stop(
                self.caps.transcriber.as_mut(),
                &self.events,
                self.caps.timers.as_mut(),
            ),
            None => false,
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Start => {
                if let Err(e) = self.start() {
                    tracing::warn!(error = %e, "voice control failed to start");
                }
            }
            Event::Stop => self.stop(),
            Event::Transcript(transcript) => self.on_transcript(transcript),
            Event::TranscriptionEnded { generation, error } => {
                self.on_stream_end(generation, error)
            }
            Event::RestartTranscription { generation } => {
                if generation != self.generation || self.restart_timer.is_none() {
                    tracing::trace!(generation, "stale restart timer");
                    return;
                }
                self.restart_timer = None;
                self.restart_stream();
            }
            Event::AudioFragment { session, bytes } => {
                if let Some(active) = self.session.as_mut().filter(|s| s.id() == session) {
                    active.push_fragment(bytes);
                }
            }
            Event::RecordingTimeout(session) => self.on_recording_timeout(session),
            Event::CommandTranscribed { session, result } => {
                self.on_command_transcribed(session, result)
            }
        }
    }

    /// Process events until voice control is back to Idle
    pub async fn run(&mut self, events: &EventReceiver) {
        while self.state != SessionState::Idle {
            match events.recv_async().await {
                Ok(event) => self.handle(event),
                Err(_) => {
                    tracing::debug!("event channel closed");
                    self.stop();
                }
            }
        }
    }

    fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if transcript.generation != self.generation || self.state != SessionState::Listening {
            tracing::trace!(
                seq = transcript.seq,
                state = %self.state,
                "transcript ignored"
            );
            return;
        }

        let heard = self.wake.detect(&transcript.text);
        if !transcript.is_final {
            if heard && !self.wake_heard {
                self.wake_heard = true;
                tracing::debug!(seq = transcript.seq, text = %transcript.text, "wake phrase heard (interim)");
            }
            return;
        }

        if !heard {
            if self.wake_heard {
                tracing::debug!(text = %transcript.text, "interim wake phrase not confirmed");
            }
            self.wake_heard = false;
            return;
        }

        tracing::info!(seq = transcript.seq, text = %transcript.text, "wake phrase detected");
        let hint = self
            .wake
            .command_tail(&transcript.text)
            .filter(|tail| !tail.is_empty());
        self.begin_recording(hint);
    }

    fn begin_recording(&mut self, hint: Option<String>) {
        self.set_state(SessionState::AwaitingCommand);

        self.next_session += 1;
        let id = SessionId(self.next_session);
        let started = RecordingSession::start(
            id,
            self.caps.audio.as_mut(),
            &self.events,
            self.caps.timers.as_mut(),
            self.settings.max_recording,
            hint,
        );

        match started {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(SessionState::Recording);
            }
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "could not open microphone");
                self.shut_down(UnavailableReason::PermissionDenied(e));
            }
        }
    }

    fn on_recording_timeout(&mut self, id: SessionId) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            tracing::trace!(session = %id, "stale recording timeout");
            return;
        };
        session.timed_out(
            self.caps.transcriber.as_mut(),
            &self.events,
            self.caps.timers.as_mut(),
        );
    }

    fn on_command_transcribed(
        &mut self,
        id: SessionId,
        result: std::result::Result<String, TranscriptionError>,
    ) {
        if self.state != SessionState::Recording || self.active_session() != Some(id) {
            tracing::trace!(session = %id, "stale command transcript");
            return;
        }

        if let Some(mut session) = self.session.take() {
            // an early answer still must not leave the device open
            session.abort(self.caps.timers.as_mut());
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "command transcription failed");
                String::new()
            }
        };
        self.dispatch(&text);

        self.wake_heard = false;
        self.set_state(SessionState::Listening);

        if std::mem::take(&mut self.restart_deferred) {
            tracing::debug!("resuming deferred transcription restart");
            self.restart_stream();
        }
    }

    fn dispatch(&mut self, text: &str) {
        let resolution = self.resolver.resolve(text);
        match &resolution {
            Resolution::Exact(command) => {
                tracing::info!(%command, text, "command matched");
            }
            Resolution::Alias { command, alias } => {
                tracing::info!(%command, text, alias, "command matched by keyword");
            }
            Resolution::Fuzzy(m) => {
                tracing::info!(
                    command = %m.command,
                    text,
                    phrase = m.phrase,
                    score = m.score,
                    "command matched fuzzily"
                );
            }
            Resolution::NoMatch { best } => {
                tracing::debug!(
                    text,
                    best = best.map(|m| m.phrase),
                    score = best.map(|m| m.score),
                    "no matching command"
                );
            }
        }

        if let Some(command) = resolution.command() {
            command.dispatch(self.caps.player.as_mut());
            self.caps.observer.command_dispatched(command);
        }
    }

    fn open_stream(&mut self) -> std::result::Result<(), TranscriptionError> {
        self.generation += 1;
        let sink = TranscriptSink::new(self.generation, self.events.clone());
        self.caps.transcription.start(sink)?;
        self.streaming = true;
        Ok(())
    }

    fn on_stream_end(&mut self, generation: u64, error: Option<TranscriptionError>) {
        if generation != self.generation || !self.streaming || self.state == SessionState::Idle {
            tracing::trace!(generation, "stale stream end");
            return;
        }
        self.streaming = false;

        match error {
            Some(e) => {
                tracing::warn!(error = %e, delay = ?self.settings.restart_delay, "transcription stream failed, restarting");
                self.schedule_restart();
            }
            None => {
                tracing::debug!("transcription stream ended, restarting");
                self.restart_stream();
            }
        }
    }

    fn schedule_restart(&mut self) {
        if self.restart_timer.is_some() {
            return;
        }
        let timer = self.caps.timers.schedule(
            self.settings.restart_delay,
            Event::RestartTranscription {
                generation: self.generation,
            },
        );
        self.restart_timer = Some(timer);
    }

    fn restart_stream(&mut self) {
        if self.state == SessionState::Idle || self.streaming {
            return;
        }
        if self.state != SessionState::Listening {
            // resumed once the command completes
            tracing::debug!(state = %self.state, "transcription restart deferred");
            self.restart_deferred = true;
            return;
        }

        match self.open_stream() {
            Ok(()) => {
                self.restart_failures = 0;
                tracing::debug!(generation = self.generation, "transcription restarted");
            }
            Err(e) => {
                self.restart_failures += 1;
                if self.restart_failures >= self.settings.max_restart_failures {
                    tracing::error!(
                        attempts = self.restart_failures,
                        error = %e,
                        "transcription cannot be restarted"
                    );
                    self.shut_down(UnavailableReason::TranscriptionFailed(e));
                } else {
                    tracing::warn!(attempt = self.restart_failures, error = %e, "transcription restart failed");
                    self.schedule_restart();
                }
            }
        }
    }

    fn shut_down(&mut self, reason: UnavailableReason) {
        self.stop();
        self.caps.observer.voice_unavailable(&reason);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.caps.observer.state_changed(state);
    }
}
