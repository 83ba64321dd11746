/// Wake phrase detection - literal substring test on transcribed text
#[derive(Debug, Clone)]
pub struct WakeWord {
    phrase: String,
}

impl WakeWord {
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.trim().to_string(),
        }
    }

    /// Check if text contains the wake phrase anywhere
    pub fn detect(&self, text: &str) -> bool {
        !self.phrase.is_empty() && text.contains(&self.phrase)
    }

    /// Text spoken after the last occurrence of the wake phrase, if any
    pub fn command_tail(&self, text: &str) -> Option<String> {
        if self.phrase.is_empty() {
            return None;
        }
        let (_, rest) = text.rsplit_once(&self.phrase)?;
        let rest = rest
            .trim_start_matches(|c: char| c.is_whitespace() || is_separator(c))
            .trim_end();
        Some(rest.to_string())
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ',' | '!' | '.' | '，' | '。' | '！' | '、' | '：' | ':')
}
