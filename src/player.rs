//! Player-side collaborator: the five operations voice commands can trigger

/// Playback speeds stepped through by speed-up / slow-down, wrapping at both ends
pub const SPEED_STEPS: [f32; 6] = [0.7, 0.8, 0.9, 1.0, 1.1, 1.2];

pub trait PlayerControls {
    fn play(&mut self);
    fn pause(&mut self);
    fn restart(&mut self);
    fn speed_up(&mut self);
    fn slow_down(&mut self);
}

/// Terminal player that tracks playback state and prints each change
pub struct ConsolePlayer {
    playing: bool,
    speed_index: usize,
    restarts: usize,
}

impl Default for ConsolePlayer {
    fn default() -> Self {
        Self {
            playing: false,
            speed_index: 3,
            restarts: 0,
        }
    }
}

impl ConsolePlayer {
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f32 {
        SPEED_STEPS[self.speed_index]
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    fn report(&self, action: &str) {
        println!(
            "\r\x1b[K\x1b[36m▶ {}\x1b[0m  [{} @ {:.1}x]",
            action,
            if self.playing { "playing" } else { "paused" },
            self.speed()
        );
    }
}

impl PlayerControls for ConsolePlayer {
    fn play(&mut self) {
        self.playing = true;
        self.report("play");
    }

    fn pause(&mut self) {
        self.playing = false;
        self.report("pause");
    }

    fn restart(&mut self) {
        self.restarts += 1;
        self.report("restart");
    }

    fn speed_up(&mut self) {
        self.speed_index = (self.speed_index + 1) % SPEED_STEPS.len();
        self.report("speed up");
    }

    fn slow_down(&mut self) {
        self.speed_index = (self.speed_index + SPEED_STEPS.len() - 1) % SPEED_STEPS.len();
        self.report("slow down");
    }
}
