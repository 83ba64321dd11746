use std::io::Write;

use crate::command::Command;
use crate::controller::{SessionState, UnavailableReason, VoiceObserver};

/// Terminal status line mirroring the voice toggle and its indicator
#[derive(Default)]
pub struct StatusDisplay {
    /// Whether the toggle currently reads "on"
    active: bool,
}

impl StatusDisplay {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl VoiceObserver for StatusDisplay {
    fn state_changed(&mut self, state: SessionState) {
        self.active = state != SessionState::Idle;
        match state {
            SessionState::Idle => show_line("\x1b[90m", "语音控制已关闭"),
            SessionState::Listening => show_line("\x1b[34m", "● 监听中..."),
            SessionState::AwaitingCommand => show_line("\x1b[33m", "◎ 请说指令"),
            SessionState::Recording => show_line("\x1b[35m", "◉ 识别中..."),
        }
    }

    fn command_dispatched(&mut self, command: Command) {
        show_final(&format!("✓ {}", command));
    }

    fn voice_unavailable(&mut self, reason: &UnavailableReason) {
        self.active = false;
        show_final(&format!("\x1b[31m✗ 语音控制不可用: {}\x1b[0m", reason));
    }
}

pub fn show_line(color: &str, text: &str) {
    print!("\r\x1b[K{}{}\x1b[0m", color, text);
    std::io::stdout().flush().ok();
}

pub fn show_final(text: &str) {
    print!("\r\x1b[K{}\n", text);
    std::io::stdout().flush().ok();
}

pub fn clear_line() {
    print!("\r\x1b[K");
    std::io::stdout().flush().ok();
}
