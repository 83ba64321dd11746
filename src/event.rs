//! Events delivered to the controller
//!
//! Every external completion funnels through one ordered channel so the
//! controller handles them one at a time, in arrival order.

use crate::error::TranscriptionError;
use crate::session::SessionId;
use crate::transcriber::TranscriptEvent;

#[derive(Debug)]
pub enum Event {
    /// Voice control switched on
    Start,
    /// Voice control switched off
    Stop,
    /// Recognised speech from the continuous stream
    Transcript(TranscriptEvent),
    /// The continuous stream with this generation ended, possibly with an error
    TranscriptionEnded {
        generation: u64,
        error: Option<TranscriptionError>,
    },
    /// Delayed restart of the stream generation that failed is due
    RestartTranscription { generation: u64 },
    /// Raw audio captured for a recording session
    AudioFragment { session: SessionId, bytes: Vec<u8> },
    /// Recording window for a session elapsed
    RecordingTimeout(SessionId),
    /// Buffer transcription for a session finished
    CommandTranscribed {
        session: SessionId,
        result: Result<String, TranscriptionError>,
    },
}

pub type EventSender = flume::Sender<Event>;
pub type EventReceiver = flume::Receiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    flume::unbounded()
}
