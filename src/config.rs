use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::command::{Command, CommandResolver, CommandVocabulary, DEFAULT_THRESHOLD};
use crate::controller::{DEFAULT_WAKE_WORD, VoiceSettings};
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "xiaowu.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub asr: AsrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wake_word: default_wake_word(),
            recording: RecordingConfig::default(),
            transcription: TranscriptionConfig::default(),
            commands: CommandsConfig::default(),
            audio: AudioConfig::default(),
            asr: AsrConfig::default(),
        }
    }
}

fn default_wake_word() -> String {
    DEFAULT_WAKE_WORD.into()
}

// ============================================================================
// Recording Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecordingConfig {
    /// Upper bound on one command recording
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

fn default_max_duration_ms() -> u64 {
    5000
}

// ============================================================================
// Transcription Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TranscriptionConfig {
    /// Pause before restarting a failed stream
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Consecutive failed restarts before voice control gives up
    #[serde(default = "default_max_restart_failures")]
    pub max_restart_failures: u32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            max_restart_failures: default_max_restart_failures(),
        }
    }
}

fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_max_restart_failures() -> u32 {
    3
}

// ============================================================================
// Commands Config
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    /// Similarity a fuzzy match must exceed
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Strip punctuation and spaces before alias and fuzzy matching
    #[serde(default)]
    pub trim_punctuation: bool,

    /// Canonical phrases and the action each one triggers
    #[serde(default = "default_phrases")]
    pub phrases: Vec<PhraseMapping>,

    /// Keywords that select a canonical phrase when contained in the transcript
    #[serde(default)]
    pub aliases: Vec<AliasMapping>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            trim_punctuation: false,
            phrases: default_phrases(),
            aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhraseMapping {
    pub phrase: String,
    pub action: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AliasMapping {
    pub alias: String,
    pub phrase: String,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_phrases() -> Vec<PhraseMapping> {
    CommandVocabulary::default()
        .iter()
        .map(|(phrase, command)| PhraseMapping {
            phrase: phrase.to_string(),
            action: command.action().to_string(),
        })
        .collect()
}

// ============================================================================
// Audio / ASR Config
// ============================================================================

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceConfig {
    /// Silent stand-in device (default)
    #[default]
    Silence,
    /// Default input device, needs the `mic` feature
    Mic,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub source: AudioSourceConfig,
    /// Length of each captured fragment
    #[serde(default = "default_fragment_ms")]
    pub fragment_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: AudioSourceConfig::default(),
            fragment_ms: default_fragment_ms(),
        }
    }
}

fn default_fragment_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AsrBackend {
    /// Use the words spoken after the wake phrase
    #[default]
    WakeTail,
    /// POST the recording to `url`, needs the `asr-http` feature
    Http,
}

#[derive(Debug, Deserialize)]
pub struct AsrConfig {
    #[serde(default)]
    pub backend: AsrBackend,
    /// ASR endpoint (supports ${ENV_VAR} syntax)
    #[serde(default = "default_asr_url")]
    pub url: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            backend: AsrBackend::default(),
            url: default_asr_url(),
        }
    }
}

fn default_asr_url() -> String {
    "http://localhost:8000/asr".into()
}

/// Expand ${VAR} to environment variable values
fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_else(|_| {
                tracing::warn!(var = var_name, "environment variable not found");
                String::new()
            });
            result.replace_range(start..start + end + 1, &value);
        } else {
            break;
        }
    }

    result
}

impl Config {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = fs::read_to_string(path)?;
            toml::from_str::<Config>(&text)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };

        config.asr.url = expand_env_vars(&config.asr.url);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.wake_word.trim().is_empty() {
            return Err(Error::Config("wake_word must not be empty".into()));
        }
        if self.recording.max_duration_ms == 0 {
            return Err(Error::Config("recording.max_duration_ms must be positive".into()));
        }
        if self.transcription.max_restart_failures == 0 {
            return Err(Error::Config(
                "transcription.max_restart_failures must be at least 1".into(),
            ));
        }
        if self.audio.fragment_ms == 0 {
            return Err(Error::Config("audio.fragment_ms must be positive".into()));
        }
        self.resolver().map(|_| ())
    }

    pub fn vocabulary(&self) -> Result<CommandVocabulary> {
        let entries = self
            .commands
            .phrases
            .iter()
            .map(|p| p.action.parse::<Command>().map(|command| (p.phrase.clone(), command)))
            .collect::<Result<Vec<_>>>()?;
        CommandVocabulary::from_entries(entries)
    }

    pub fn resolver(&self) -> Result<CommandResolver> {
        let resolver = CommandResolver::new(self.vocabulary()?)
            .with_threshold(self.commands.threshold)?
            .with_aliases(
                self.commands
                    .aliases
                    .iter()
                    .map(|a| (a.alias.clone(), a.phrase.clone())),
            )?
            .with_trim_punctuation(self.commands.trim_punctuation);
        Ok(resolver)
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            wake_word: self.wake_word.clone(),
            max_recording: Duration::from_millis(self.recording.max_duration_ms),
            restart_delay: Duration::from_millis(self.transcription.restart_delay_ms),
            max_restart_failures: self.transcription.max_restart_failures,
        }
    }
}
