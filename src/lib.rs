//! Hands-free voice control for a media player
//!
//! A continuous transcription stream is watched for the wake phrase. Once it
//! is heard, a short recording captures the spoken command, which is
//! transcribed and fuzzily resolved to one of the player's operations.

pub mod capture;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod fuzzy;
pub mod player;
pub mod session;
pub mod timer;
pub mod transcriber;
pub mod ui;
pub mod wake;

pub use command::{Command, CommandResolver, CommandVocabulary, Resolution};
pub use config::Config;
pub use controller::{Capabilities, SessionState, VoiceSessionController, VoiceSettings};
pub use error::{Error, Result};
