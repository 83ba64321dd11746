//! Speech-to-text capabilities
//!
//! Two kinds are consumed by the controller:
//! - [`ContinuousTranscription`]: an always-on stream of interim and final
//!   transcripts used for wake phrase detection
//! - [`CommandTranscriber`]: turns one captured audio buffer into text

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TranscriptionError;
use crate::event::{Event, EventSender};
use crate::session::SessionId;

/// One unit of recognised speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Arrival order within the stream
    pub seq: u64,
    /// Which started stream produced it
    pub generation: u64,
}

/// Handle a continuous stream uses to report transcripts and its end
///
/// Each started stream gets a fresh sink. Only the first end signal is
/// delivered; transcripts pushed after it are dropped.
#[derive(Clone)]
pub struct TranscriptSink {
    generation: u64,
    next_seq: Arc<AtomicU64>,
    ended: Arc<AtomicBool>,
    events: EventSender,
}

impl TranscriptSink {
    pub fn new(generation: u64, events: EventSender) -> Self {
        Self {
            generation,
            next_seq: Arc::new(AtomicU64::new(0)),
            ended: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push(&self, text: impl Into<String>, is_final: bool) -> bool {
        if self.ended.load(Ordering::SeqCst) {
            return false;
        }
        let event = TranscriptEvent {
            text: text.into(),
            is_final,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            generation: self.generation,
        };
        self.events.send(Event::Transcript(event)).is_ok()
    }

    pub fn end(&self, error: Option<TranscriptionError>) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.events
            .send(Event::TranscriptionEnded {
                generation: self.generation,
                error,
            })
            .is_ok()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

pub trait ContinuousTranscription {
    /// Whether a backend exists at all in this environment
    fn is_supported(&self) -> bool {
        true
    }

    fn start(&mut self, sink: TranscriptSink) -> Result<(), TranscriptionError>;

    /// Stop delivering; no end signal is expected afterwards
    fn stop(&mut self);
}

/// One captured buffer awaiting transcription
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub session: SessionId,
    /// PCM16 little-endian mono at the capture sample rate
    pub audio: Vec<u8>,
    /// Text that followed the wake phrase in the triggering utterance
    pub hint: Option<String>,
}

pub trait CommandTranscriber {
    /// Must eventually post exactly one `Event::CommandTranscribed` for the job
    fn transcribe(&mut self, job: TranscriptionJob, events: &EventSender);
}

/// Continuous transcription fed by text lines, one transcript per line
///
/// A line starting with `~` is an interim result, anything else is final.
/// End of input ends the stream; later starts fail.
pub struct LineTranscriber {
    reader: Option<Box<dyn BufRead + Send>>,
    active: Arc<Mutex<Option<TranscriptSink>>>,
    closed: Arc<AtomicBool>,
}

impl LineTranscriber {
    pub fn new<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            active: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stdin() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()))
    }

    fn spawn_reader(&mut self, reader: Box<dyn BufRead + Send>) -> Result<(), TranscriptionError> {
        let active = self.active.clone();
        let closed = self.closed.clone();

        std::thread::Builder::new()
            .name("transcript-lines".into())
            .spawn(move || {
                let mut failure = None;
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            let Some((text, is_final)) = parse_line(&line) else {
                                continue;
                            };
                            if let Ok(guard) = active.lock() {
                                if let Some(sink) = guard.as_ref() {
                                    sink.push(text, is_final);
                                }
                            }
                        }
                        Err(e) => {
                            failure = Some(TranscriptionError::Stream(e.to_string()));
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                if let Ok(mut guard) = active.lock() {
                    if let Some(sink) = guard.take() {
                        sink.end(failure);
                    }
                }
                tracing::debug!("transcript input closed");
            })
            .map_err(|e| TranscriptionError::Stream(e.to_string()))?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<(&str, bool)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix('~') {
        Some(rest) => {
            let rest = rest.trim();
            (!rest.is_empty()).then_some((rest, false))
        }
        None => Some((line, true)),
    }
}

impl ContinuousTranscription for LineTranscriber {
    fn start(&mut self, sink: TranscriptSink) -> Result<(), TranscriptionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TranscriptionError::Stream("transcript input closed".into()));
        }

        let generation = sink.generation();
        self.active
            .lock()
            .map(|mut guard| *guard = Some(sink))
            .map_err(|e| TranscriptionError::Stream(e.to_string()))?;

        if let Some(reader) = self.reader.take() {
            self.spawn_reader(reader)?;
        }
        tracing::debug!(generation, "line transcription started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut guard) = self.active.lock() {
            guard.take();
        }
    }
}

/// Offline backend: the command is whatever followed the wake phrase
///
/// Lets "小舞小舞，播放" work end to end without an ASR service.
#[derive(Debug, Default)]
pub struct WakeTailTranscriber;

impl CommandTranscriber for WakeTailTranscriber {
    fn transcribe(&mut self, job: TranscriptionJob, events: &EventSender) {
        let text = job.hint.unwrap_or_default();
        tracing::debug!(
            session = %job.session,
            audio_bytes = job.audio.len(),
            text = %text,
            "wake-tail transcription"
        );
        let _ = events.send(Event::CommandTranscribed {
            session: job.session,
            result: Ok(text),
        });
    }
}

#[cfg(feature = "asr-http")]
pub use http::HttpTranscriber;

#[cfg(feature = "asr-http")]
mod http {
    use std::io::Cursor;

    use super::{CommandTranscriber, TranscriptionJob};
    use crate::capture::SAMPLE_RATE;
    use crate::error::TranscriptionError;
    use crate::event::{Event, EventSender};

    #[derive(serde::Deserialize)]
    struct AsrResponse {
        text: String,
    }

    /// Posts the captured buffer as WAV to an ASR service
    ///
    /// The service receives a multipart `audio` field and answers
    /// `{"text": "..."}`.
    pub struct HttpTranscriber {
        url: String,
        client: reqwest::blocking::Client,
    }

    impl HttpTranscriber {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: url.into(),
                client: reqwest::blocking::Client::new(),
            }
        }
    }

    impl CommandTranscriber for HttpTranscriber {
        fn transcribe(&mut self, job: TranscriptionJob, events: &EventSender) {
            let url = self.url.clone();
            let client = self.client.clone();
            let events = events.clone();
            let session = job.session;

            let spawned = std::thread::Builder::new()
                .name(format!("asr-{}", session))
                .spawn(move || {
                    let result = request(&client, &url, &job.audio);
                    if let Err(e) = &result {
                        tracing::warn!(session = %session, error = %e, "ASR request failed");
                    }
                    let _ = events.send(Event::CommandTranscribed { session, result });
                });

            if let Err(e) = spawned {
                let _ = events.send(Event::CommandTranscribed {
                    session,
                    result: Err(TranscriptionError::Backend(e.to_string())),
                });
            }
        }
    }

    fn request(
        client: &reqwest::blocking::Client,
        url: &str,
        pcm: &[u8],
    ) -> Result<String, TranscriptionError> {
        let wav = encode_wav(pcm)?;
        tracing::debug!(url, wav_bytes = wav.len(), "sending audio to ASR service");

        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("command.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Backend(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part("audio", part);

        let response: AsrResponse = client
            .post(url)
            .multipart(form)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| TranscriptionError::Backend(e.to_string()))?;

        Ok(response.text.trim().to_string())
    }

    fn encode_wav(pcm: &[u8]) -> Result<Vec<u8>, TranscriptionError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| TranscriptionError::Backend(e.to_string()))?;
            for chunk in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                    .map_err(|e| TranscriptionError::Backend(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| TranscriptionError::Backend(e.to_string()))?;
        }
        Ok(cursor.into_inner())
    }

}
