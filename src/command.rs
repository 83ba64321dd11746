//! Command resolution - maps recognised speech onto player actions
//!
//! Resolution runs in order of confidence:
//! 1. Exact phrase - the transcript is a vocabulary key verbatim
//! 2. Alias - the transcript contains a configured keyword for a phrase
//! 3. Fuzzy - the closest phrase by edit distance, if it clears the threshold
//! 4. No match - silently ignored by the caller

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::fuzzy::{clean_for_matching, similarity};
use crate::player::PlayerControls;

/// A fuzzy match must score strictly above this
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Player actions reachable by voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Play,
    Pause,
    Restart,
    SpeedUp,
    SlowDown,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Play,
        Command::Pause,
        Command::Restart,
        Command::SpeedUp,
        Command::SlowDown,
    ];

    /// Action name as used in config files
    pub fn action(self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Restart => "restart",
            Command::SpeedUp => "speedUp",
            Command::SlowDown => "slowDown",
        }
    }

    /// Invoke the matching player operation
    pub fn dispatch(self, player: &mut dyn PlayerControls) {
        match self {
            Command::Play => player.play(),
            Command::Pause => player.pause(),
            Command::Restart => player.restart(),
            Command::SpeedUp => player.speed_up(),
            Command::SlowDown => player.slow_down(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "play" => Ok(Command::Play),
            "pause" => Ok(Command::Pause),
            "restart" | "seek_to_start" => Ok(Command::Restart),
            "speedUp" | "speed_up" => Ok(Command::SpeedUp),
            "slowDown" | "slow_down" => Ok(Command::SlowDown),
            other => Err(Error::Config(format!("unknown action '{}'", other))),
        }
    }
}

/// Canonical phrase to command table, fixed once built
///
/// Keys keep their insertion order, which is also the fuzzy tie-break order.
#[derive(Debug, Clone)]
pub struct CommandVocabulary {
    entries: Vec<(String, Command)>,
}

impl CommandVocabulary {
    /// Build from `(phrase, command)` pairs, rejecting empty or repeated phrases
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Command)>,
        S: Into<String>,
    {
        let mut out: Vec<(String, Command)> = Vec::new();
        for (phrase, command) in entries {
            let phrase = phrase.into();
            if phrase.is_empty() {
                return Err(Error::Config("command phrase must not be empty".into()));
            }
            if out.iter().any(|(p, _)| *p == phrase) {
                return Err(Error::Config(format!("duplicate command phrase '{}'", phrase)));
            }
            out.push((phrase, command));
        }
        if out.is_empty() {
            return Err(Error::Config("command vocabulary is empty".into()));
        }
        Ok(Self { entries: out })
    }

    pub fn get(&self, phrase: &str) -> Option<Command> {
        self.entries
            .iter()
            .find(|(p, _)| p == phrase)
            .map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Command)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandVocabulary {
    fn default() -> Self {
        Self {
            entries: vec![
                ("播放".to_string(), Command::Play),
                ("暂停".to_string(), Command::Pause),
                ("回到开头".to_string(), Command::Restart),
                ("快一点".to_string(), Command::SpeedUp),
                ("慢一点".to_string(), Command::SlowDown),
            ],
        }
    }
}

/// Best-scoring vocabulary phrase for a transcript
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'a> {
    pub phrase: &'a str,
    pub command: Command,
    pub score: f64,
}

/// Outcome of resolving one transcript
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Exact(Command),
    Alias { command: Command, alias: &'a str },
    Fuzzy(MatchResult<'a>),
    /// Nothing cleared the threshold; `best` is kept for logging
    NoMatch { best: Option<MatchResult<'a>> },
}

impl Resolution<'_> {
    pub fn command(&self) -> Option<Command> {
        match self {
            Resolution::Exact(command) | Resolution::Alias { command, .. } => Some(*command),
            Resolution::Fuzzy(m) => Some(m.command),
            Resolution::NoMatch { .. } => None,
        }
    }
}

/// Highest similarity over the vocabulary; ties keep the earliest phrase
pub fn best_match<'a>(transcript: &str, vocabulary: &'a CommandVocabulary) -> Option<MatchResult<'a>> {
    let mut best: Option<MatchResult<'a>> = None;
    for (phrase, command) in vocabulary.iter() {
        let score = similarity(transcript, phrase);
        if best.is_none_or(|b| score > b.score) {
            best = Some(MatchResult { phrase, command, score });
        }
    }
    best
}

/// Resolve against a vocabulary with the default threshold and no aliases
pub fn resolve(transcript: &str, vocabulary: &CommandVocabulary) -> Option<Command> {
    if let Some(command) = vocabulary.get(transcript) {
        return Some(command);
    }
    best_match(transcript, vocabulary)
        .filter(|m| m.score > DEFAULT_THRESHOLD)
        .map(|m| m.command)
}

/// Resolver with optional keyword aliases and punctuation trimming
#[derive(Debug, Clone)]
pub struct CommandResolver {
    vocabulary: CommandVocabulary,
    /// (keyword, canonical phrase) in priority order
    aliases: Vec<(String, String)>,
    threshold: f64,
    trim_punctuation: bool,
}

impl CommandResolver {
    pub fn new(vocabulary: CommandVocabulary) -> Self {
        Self {
            vocabulary,
            aliases: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            trim_punctuation: false,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "threshold {} is outside [0, 1]",
                threshold
            )));
        }
        self.threshold = threshold;
        Ok(self)
    }

    /// Alias targets must be phrases already in the vocabulary
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        for (alias, phrase) in aliases {
            let (alias, phrase) = (alias.into(), phrase.into());
            if alias.is_empty() {
                return Err(Error::Config("alias must not be empty".into()));
            }
            if self.vocabulary.get(&phrase).is_none() {
                return Err(Error::Config(format!(
                    "alias '{}' points at unknown phrase '{}'",
                    alias, phrase
                )));
            }
            self.aliases.push((alias, phrase));
        }
        Ok(self)
    }

    pub fn with_trim_punctuation(mut self, trim: bool) -> Self {
        self.trim_punctuation = trim;
        self
    }

    pub fn vocabulary(&self) -> &CommandVocabulary {
        &self.vocabulary
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[hotpath::measure]
    pub fn resolve(&self, transcript: &str) -> Resolution<'_> {
        // Verbatim hit skips scoring entirely
        if let Some(command) = self.vocabulary.get(transcript) {
            return Resolution::Exact(command);
        }

        let cleaned;
        let text = if self.trim_punctuation {
            cleaned = clean_for_matching(transcript);
            if let Some(command) = self.vocabulary.get(&cleaned) {
                return Resolution::Exact(command);
            }
            cleaned.as_str()
        } else {
            transcript
        };

        for (alias, phrase) in &self.aliases {
            if text.contains(alias.as_str()) {
                if let Some(command) = self.vocabulary.get(phrase) {
                    return Resolution::Alias {
                        command,
                        alias: alias.as_str(),
                    };
                }
            }
        }

        let best = best_match(text, &self.vocabulary);
        match best {
            Some(m) if m.score > self.threshold => Resolution::Fuzzy(m),
            _ => Resolution::NoMatch { best },
        }
    }
}

impl Default for CommandResolver {
    fn default() -> Self {
        Self::new(CommandVocabulary::default())
    }
}
