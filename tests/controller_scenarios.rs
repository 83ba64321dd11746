use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use xiaowu::capture::{AudioSource, CaptureStream, FragmentSink};
use xiaowu::command::{Command, CommandResolver};
use xiaowu::controller::{
    Capabilities, SessionState, UnavailableReason, VoiceObserver, VoiceSessionController,
    VoiceSettings,
};
use xiaowu::error::{CaptureError, TranscriptionError};
use xiaowu::event::{self, Event, EventReceiver, EventSender};
use xiaowu::player::PlayerControls;
use xiaowu::session::SessionId;
use xiaowu::timer::{TimerId, Timers};
use xiaowu::transcriber::{
    CommandTranscriber, ContinuousTranscription, TranscriptSink, TranscriptionJob,
};

#[derive(Default)]
struct World {
    // continuous transcription
    supported: bool,
    stream_starts: usize,
    stream_stops: usize,
    failing_starts: u32,
    sink: Option<TranscriptSink>,

    // audio device
    deny_audio: bool,
    acquires: usize,
    releases: usize,

    // buffer transcription
    jobs: Vec<TranscriptionJob>,
    reply: Option<String>,

    // timers
    scheduled: Vec<(TimerId, Duration, Option<Event>)>,
    cancelled: Vec<TimerId>,

    // outputs
    played: Vec<Command>,
    states: Vec<SessionState>,
    dispatched: Vec<Command>,
    unavailable: Vec<UnavailableReason>,
}

type Shared = Rc<RefCell<World>>;

struct FakeStream(Shared);
struct FakeAudio(Shared);
struct FakeDevice(Shared);
struct FakeTranscriber(Shared);
struct FakePlayer(Shared);
struct ManualTimers(Shared);
struct Recorder(Shared);

impl ContinuousTranscription for FakeStream {
    fn is_supported(&self) -> bool {
        self.0.borrow().supported
    }

    fn start(&mut self, sink: TranscriptSink) -> Result<(), TranscriptionError> {
        let mut world = self.0.borrow_mut();
        world.stream_starts += 1;
        if world.failing_starts > 0 {
            world.failing_starts -= 1;
            return Err(TranscriptionError::Stream("network down".into()));
        }
        world.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        let mut world = self.0.borrow_mut();
        world.stream_stops += 1;
        world.sink = None;
    }
}

impl AudioSource for FakeAudio {
    fn acquire(&mut self, _sink: FragmentSink) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut world = self.0.borrow_mut();
        if world.deny_audio {
            return Err(CaptureError::PermissionDenied("microphone blocked".into()));
        }
        world.acquires += 1;
        Ok(Box::new(FakeDevice(self.0.clone())))
    }
}

impl CaptureStream for FakeDevice {
    fn release(&mut self) {
        self.0.borrow_mut().releases += 1;
    }
}

impl CommandTranscriber for FakeTranscriber {
    fn transcribe(&mut self, job: TranscriptionJob, events: &EventSender) {
        let mut world = self.0.borrow_mut();
        if let Some(text) = world.reply.clone() {
            events
                .send(Event::CommandTranscribed {
                    session: job.session,
                    result: Ok(text),
                })
                .unwrap();
        }
        world.jobs.push(job);
    }
}

impl PlayerControls for FakePlayer {
    fn play(&mut self) {
        self.0.borrow_mut().played.push(Command::Play);
    }
    fn pause(&mut self) {
        self.0.borrow_mut().played.push(Command::Pause);
    }
    fn restart(&mut self) {
        self.0.borrow_mut().played.push(Command::Restart);
    }
    fn speed_up(&mut self) {
        self.0.borrow_mut().played.push(Command::SpeedUp);
    }
    fn slow_down(&mut self) {
        self.0.borrow_mut().played.push(Command::SlowDown);
    }
}

impl Timers for ManualTimers {
    fn schedule(&mut self, delay: Duration, event: Event) -> TimerId {
        let mut world = self.0.borrow_mut();
        let id = TimerId(world.scheduled.len() as u64 + 1);
        world.scheduled.push((id, delay, Some(event)));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.0.borrow_mut().cancelled.push(id);
    }
}

impl VoiceObserver for Recorder {
    fn state_changed(&mut self, state: SessionState) {
        self.0.borrow_mut().states.push(state);
    }

    fn command_dispatched(&mut self, command: Command) {
        self.0.borrow_mut().dispatched.push(command);
    }

    fn voice_unavailable(&mut self, reason: &UnavailableReason) {
        self.0.borrow_mut().unavailable.push(reason.clone());
    }
}

struct Harness {
    controller: VoiceSessionController,
    rx: EventReceiver,
    world: Shared,
}

impl Harness {
    fn new() -> Self {
        Self::with_world(World {
            supported: true,
            reply: Some("播放".into()),
            ..World::default()
        })
    }

    fn with_world(world: World) -> Self {
        let world = Rc::new(RefCell::new(world));
        let (tx, rx) = event::channel();
        let caps = Capabilities {
            transcription: Box::new(FakeStream(world.clone())),
            audio: Box::new(FakeAudio(world.clone())),
            transcriber: Box::new(FakeTranscriber(world.clone())),
            player: Box::new(FakePlayer(world.clone())),
            timers: Box::new(ManualTimers(world.clone())),
            observer: Box::new(Recorder(world.clone())),
        };
        let controller =
            VoiceSessionController::new(VoiceSettings::default(), CommandResolver::default(), tx, caps);
        Self {
            controller,
            rx,
            world,
        }
    }

    fn started() -> Self {
        let mut harness = Self::new();
        harness.controller.start().unwrap();
        harness
    }

    /// Handle everything queued on the channel
    fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.controller.handle(event);
        }
    }

    fn say(&mut self, text: &str, is_final: bool) {
        let sink = self.world.borrow().sink.clone().expect("stream running");
        sink.push(text, is_final);
        self.pump();
    }

    fn end_stream(&mut self, error: Option<TranscriptionError>) {
        let sink = self.world.borrow_mut().sink.take().expect("stream running");
        sink.end(error);
        self.pump();
    }

    /// Fire the most recently scheduled timer that has not fired yet
    fn fire_last_timer(&mut self) -> Duration {
        let (delay, event) = {
            let mut world = self.world.borrow_mut();
            let (_, delay, event) = world
                .scheduled
                .iter_mut()
                .rev()
                .find(|(_, _, e)| e.is_some())
                .expect("a pending timer");
            (*delay, event.take().unwrap())
        };
        self.controller.handle(event);
        self.pump();
        delay
    }

    fn fire_timer(&mut self, id: TimerId) {
        let event = {
            let mut world = self.world.borrow_mut();
            let (_, _, event) = world
                .scheduled
                .iter_mut()
                .find(|(t, _, _)| *t == id)
                .expect("scheduled timer");
            event.take().expect("timer not yet fired")
        };
        self.controller.handle(event);
        self.pump();
    }

    fn state(&self) -> SessionState {
        self.controller.state()
    }
}

#[test]
fn test_start_enters_listening() {
    let h = Harness::started();
    assert_eq!(h.state(), SessionState::Listening);
    assert!(h.controller.is_streaming());
    assert_eq!(h.world.borrow().stream_starts, 1);
    assert_eq!(h.world.borrow().states, vec![SessionState::Listening]);
}

#[test]
fn test_wake_phrase_then_command_plays() {
    let mut h = Harness::started();
    h.say("小舞小舞，播放", true);

    assert_eq!(h.state(), SessionState::Recording);
    assert_eq!(h.world.borrow().acquires, 1);
    assert!(h.controller.is_capturing());

    let session = h.controller.active_session().unwrap();
    h.controller.handle(Event::AudioFragment {
        session,
        bytes: vec![0, 1, 2, 3],
    });
    let delay = h.fire_last_timer();
    assert_eq!(delay, Duration::from_secs(5));

    let world = h.world.borrow();
    assert_eq!(world.played, vec![Command::Play]);
    assert_eq!(world.dispatched, vec![Command::Play]);
    assert_eq!(world.releases, 1);
    assert_eq!(world.jobs.len(), 1);
    assert_eq!(world.jobs[0].audio, vec![0, 1, 2, 3]);
    assert_eq!(world.jobs[0].hint.as_deref(), Some("播放"));
    assert_eq!(
        world.states,
        vec![
            SessionState::Listening,
            SessionState::AwaitingCommand,
            SessionState::Recording,
            SessionState::Listening,
        ]
    );
    drop(world);
    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.controller.active_session(), None);
}

#[test]
fn test_fuzzy_command_dispatched() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = Some("暂停吧".into());
    h.say("小舞小舞", true);
    h.fire_last_timer();
    assert_eq!(h.world.borrow().played, vec![Command::Pause]);
    assert_eq!(h.state(), SessionState::Listening);
}

#[test]
fn test_unmatched_command_returns_to_listening() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = Some("你好".into());
    h.say("小舞小舞", true);
    h.fire_last_timer();
    assert!(h.world.borrow().played.is_empty());
    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.world.borrow().releases, 1);
}

#[test]
fn test_failed_command_transcription_dispatches_nothing() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = None;
    h.say("小舞小舞", true);
    h.fire_last_timer();
    let id = h.controller.active_session().unwrap();
    h.controller.handle(Event::CommandTranscribed {
        session: id,
        result: Err(TranscriptionError::Backend("timeout".into())),
    });
    assert!(h.world.borrow().played.is_empty());
    assert_eq!(h.state(), SessionState::Listening);
}

#[test]
fn test_permission_denied_disables_voice_once() {
    let mut h = Harness::with_world(World {
        supported: true,
        deny_audio: true,
        ..World::default()
    });
    h.controller.start().unwrap();
    h.say("小舞小舞", true);

    assert_eq!(h.state(), SessionState::Idle);
    let world = h.world.borrow();
    assert_eq!(world.unavailable.len(), 1);
    assert!(matches!(
        world.unavailable[0],
        UnavailableReason::PermissionDenied(CaptureError::PermissionDenied(_))
    ));
    assert_eq!(world.stream_stops, 1);
    assert_eq!(world.acquires, 0);
    assert!(world.played.is_empty());
}

#[test]
fn test_unrelated_speech_keeps_listening() {
    let mut h = Harness::started();
    h.say("今天天气不错", true);
    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.world.borrow().acquires, 0);
}

#[test]
fn test_interim_wake_phrase_never_starts_recording() {
    let mut h = Harness::started();
    h.say("小舞小舞", false);
    assert!(h.controller.wake_heard());
    assert_eq!(h.state(), SessionState::Listening);

    h.say("小猫", true);
    assert!(!h.controller.wake_heard());
    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.world.borrow().acquires, 0);
}

#[test]
fn test_interim_then_final_wake_starts_one_session() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = None;
    h.say("小舞小舞", false);
    h.say("小舞小舞，播", false);
    h.say("小舞小舞，播放", true);

    assert_eq!(h.state(), SessionState::Recording);
    assert_eq!(h.controller.active_session(), Some(SessionId(1)));
    let world = h.world.borrow();
    assert_eq!(world.acquires, 1);
    assert_eq!(world.scheduled.len(), 1);
    assert_eq!(
        world
            .states
            .iter()
            .filter(|s| **s == SessionState::AwaitingCommand)
            .count(),
        1
    );
}

#[test]
fn test_stop_is_idempotent() {
    let mut h = Harness::new();
    h.controller.stop();
    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.world.borrow().states.is_empty());

    h.controller.start().unwrap();
    h.controller.stop();
    h.controller.stop();
    let world = h.world.borrow();
    assert_eq!(world.stream_stops, 1);
    assert_eq!(world.states, vec![SessionState::Listening, SessionState::Idle]);
}

#[test]
fn test_stop_while_recording_releases_device() {
    let mut h = Harness::started();
    h.say("小舞小舞", true);
    assert_eq!(h.state(), SessionState::Recording);

    h.controller.stop();
    let world = h.world.borrow();
    assert_eq!(world.releases, 1);
    assert_eq!(world.cancelled, vec![TimerId(1)]);
    assert!(world.jobs.is_empty());
    assert!(world.played.is_empty());
    drop(world);
    assert_eq!(h.state(), SessionState::Idle);
    assert_eq!(h.controller.active_session(), None);
}

#[test]
fn test_events_after_stop_are_ignored() {
    let mut h = Harness::started();
    let sink = h.world.borrow().sink.clone().unwrap();
    h.say("小舞小舞", true);
    let id = h.controller.active_session().unwrap();
    h.controller.stop();

    sink.push("小舞小舞", true);
    h.controller.handle(Event::RecordingTimeout(id));
    h.controller.handle(Event::CommandTranscribed {
        session: id,
        result: Ok("播放".into()),
    });
    h.pump();

    assert_eq!(h.state(), SessionState::Idle);
    let world = h.world.borrow();
    assert!(world.played.is_empty());
    assert_eq!(world.acquires, 1);
    assert!(world.jobs.is_empty());
}

#[test]
fn test_stale_session_result_ignored() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = None;
    h.say("小舞小舞", true);
    h.controller.handle(Event::CommandTranscribed {
        session: SessionId(99),
        result: Ok("播放".into()),
    });
    assert_eq!(h.state(), SessionState::Recording);
    assert!(h.world.borrow().played.is_empty());
}

#[test]
fn test_transcripts_ignored_while_recording() {
    let mut h = Harness::started();
    h.world.borrow_mut().reply = None;
    h.say("小舞小舞", true);
    h.say("小舞小舞，暂停", true);
    assert_eq!(h.world.borrow().acquires, 1);
    assert_eq!(h.state(), SessionState::Recording);
}

#[test]
fn test_end_recording_submits_early() {
    let mut h = Harness::started();
    assert!(!h.controller.end_recording());

    h.world.borrow_mut().reply = Some("快一点".into());
    h.say("小舞小舞", true);
    assert!(h.controller.end_recording());
    h.pump();

    let world = h.world.borrow();
    assert_eq!(world.played, vec![Command::SpeedUp]);
    assert_eq!(world.cancelled, vec![TimerId(1)]);
    assert_eq!(world.releases, 1);
}

#[test]
fn test_second_wake_reuses_nothing_from_first() {
    let mut h = Harness::started();
    h.say("小舞小舞，播放", true);
    h.fire_last_timer();
    h.world.borrow_mut().reply = Some("慢一点".into());
    h.say("小舞小舞", true);
    let second = h.controller.active_session().unwrap();
    assert_eq!(second, SessionId(2));
    h.fire_last_timer();

    let world = h.world.borrow();
    assert_eq!(world.played, vec![Command::Play, Command::SlowDown]);
    assert_eq!(world.acquires, 2);
    assert_eq!(world.releases, 2);
}

#[test]
fn test_stream_end_restarts_immediately() {
    let mut h = Harness::started();
    h.end_stream(None);
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(h.world.borrow().scheduled.is_empty());
    assert_eq!(h.state(), SessionState::Listening);
    h.say("小舞小舞", true);
    assert_eq!(h.state(), SessionState::Recording);
}

#[test]
fn test_stream_error_restarts_after_delay() {
    let mut h = Harness::started();
    h.end_stream(Some(TranscriptionError::Stream("network".into())));
    assert_eq!(h.world.borrow().stream_starts, 1);
    assert!(!h.controller.is_streaming());

    let delay = h.fire_last_timer();
    assert_eq!(delay, Duration::from_secs(1));
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(h.controller.is_streaming());
    assert_eq!(h.state(), SessionState::Listening);
}

#[test]
fn test_stop_cancels_pending_restart() {
    let mut h = Harness::started();
    h.end_stream(Some(TranscriptionError::Stream("network".into())));
    h.controller.stop();
    assert_eq!(h.world.borrow().cancelled, vec![TimerId(1)]);

    // the timer fired anyway
    h.fire_last_timer();
    assert_eq!(h.world.borrow().stream_starts, 1);
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn test_restart_timer_from_previous_run_ignored() {
    let mut h = Harness::started();
    h.end_stream(Some(TranscriptionError::Stream("network".into())));
    h.controller.stop();
    h.controller.start().unwrap();
    h.end_stream(Some(TranscriptionError::Stream("network".into())));
    assert_eq!(h.world.borrow().stream_starts, 2);

    h.fire_timer(TimerId(1));
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(!h.controller.is_streaming());

    h.fire_timer(TimerId(2));
    assert_eq!(h.world.borrow().stream_starts, 3);
    assert!(h.controller.is_streaming());
}

#[test]
fn test_stream_end_during_recording_keeps_command() {
    let mut h = Harness::started();
    h.say("小舞小舞，播放", true);
    h.world.borrow_mut().failing_starts = 3;
    h.end_stream(None);
    assert_eq!(h.state(), SessionState::Recording);
    assert_eq!(h.world.borrow().stream_starts, 1);

    h.fire_timer(TimerId(1));
    assert_eq!(h.world.borrow().played, vec![Command::Play]);
    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(h.world.borrow().unavailable.is_empty());
}

#[test]
fn test_restart_timer_during_recording_waits_for_command() {
    let mut h = Harness::started();
    h.say("小舞小舞，暂停", true);
    h.world.borrow_mut().reply = Some("暂停".into());
    h.end_stream(Some(TranscriptionError::Stream("network".into())));

    h.fire_timer(TimerId(2));
    assert_eq!(h.state(), SessionState::Recording);
    assert_eq!(h.world.borrow().stream_starts, 1);

    h.fire_timer(TimerId(1));
    assert_eq!(h.world.borrow().played, vec![Command::Pause]);
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(h.controller.is_streaming());
}

#[test]
fn test_repeated_restart_failures_give_up() {
    let mut h = Harness::started();
    h.world.borrow_mut().failing_starts = 3;
    h.end_stream(None);
    assert_eq!(h.state(), SessionState::Listening);

    h.fire_last_timer();
    assert_eq!(h.state(), SessionState::Listening);
    h.fire_last_timer();

    assert_eq!(h.state(), SessionState::Idle);
    let world = h.world.borrow();
    assert_eq!(world.stream_starts, 4);
    assert_eq!(world.unavailable.len(), 1);
    assert!(matches!(
        world.unavailable[0],
        UnavailableReason::TranscriptionFailed(_)
    ));
}

#[test]
fn test_restart_failure_recovers() {
    let mut h = Harness::started();
    h.world.borrow_mut().failing_starts = 1;
    h.end_stream(None);
    h.fire_last_timer();
    assert!(h.controller.is_streaming());
    assert!(h.world.borrow().unavailable.is_empty());
}

#[test]
fn test_stale_stream_end_ignored() {
    let mut h = Harness::started();
    let old = h.world.borrow().sink.clone().unwrap();
    h.end_stream(None);
    assert_eq!(h.world.borrow().stream_starts, 2);

    old.end(Some(TranscriptionError::Stream("late".into())));
    h.controller.handle(Event::TranscriptionEnded {
        generation: old.generation(),
        error: None,
    });
    h.pump();
    assert_eq!(h.world.borrow().stream_starts, 2);
    assert!(h.controller.is_streaming());
}

#[test]
fn test_unsupported_environment_signalled_once() {
    let mut h = Harness::with_world(World::default());
    assert!(!h.controller.is_enabled());
    assert!(h.controller.start().is_err());
    assert!(h.controller.start().is_err());
    h.controller.handle(Event::Start);

    let world = h.world.borrow();
    assert_eq!(world.unavailable, vec![UnavailableReason::UnsupportedEnvironment]);
    assert_eq!(world.stream_starts, 0);
    drop(world);
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn test_start_event_and_stop_event() {
    let mut h = Harness::new();
    h.controller.handle(Event::Start);
    assert_eq!(h.state(), SessionState::Listening);
    h.controller.handle(Event::Start);
    assert_eq!(h.world.borrow().stream_starts, 1);
    h.controller.handle(Event::Stop);
    assert_eq!(h.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_run_returns_after_stop_event() {
    let mut h = Harness::started();
    let (tx, rx) = event::channel();
    tx.send(Event::Stop).unwrap();
    h.controller.run(&rx).await;
    assert_eq!(h.state(), SessionState::Idle);
}
