//! Polled debounce for the restore push button.
//!
//! The switch pulls the input to ground, so `Level::Low` is "pressed". A raw
//! level becomes the stable level only once it has been sampled unchanged for
//! at least the debounce interval; only the stable transition into the pressed
//! level is reported.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, Clone)]
pub struct DebouncedButton {
    active: Level,
    debounce_ms: u64,
    stable: Level,
    raw: Level,
    raw_since_ms: u64,
}

impl DebouncedButton {
    /// Active-low button, idle (pulled up) at construction.
    pub fn active_low(debounce_ms: u64, now_ms: u64) -> Self {
        Self {
            active: Level::Low,
            debounce_ms,
            stable: Level::High,
            raw: Level::High,
            raw_since_ms: now_ms,
        }
    }

    pub fn stable_level(&self) -> Level {
        self.stable
    }

    pub fn is_pressed(&self) -> bool {
        self.stable == self.active
    }

    /// Feeds one sample. Returns true on a debounced press edge.
    pub fn poll(&mut self, level: Level, now_ms: u64) -> bool {
        if level != self.raw {
            self.raw = level;
            self.raw_since_ms = now_ms;
        }

        if self.raw == self.stable
            || now_ms.saturating_sub(self.raw_since_ms) < self.debounce_ms
        {
            return false;
        }

        self.stable = self.raw;
        self.stable == self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_glitch_is_ignored() {
        let mut button = DebouncedButton::active_low(50, 0);

        assert!(!button.poll(Level::Low, 100));
        assert!(!button.poll(Level::Low, 149));
        assert!(!button.poll(Level::High, 150));
        assert!(!button.poll(Level::High, 500));
        assert!(!button.is_pressed());
    }

    #[test]
    fn held_press_fires_once() {
        let mut button = DebouncedButton::active_low(50, 0);

        assert!(!button.poll(Level::Low, 100));
        assert!(button.poll(Level::Low, 150));
        assert!(button.is_pressed());

        for t in (160..2_000).step_by(10) {
            assert!(!button.poll(Level::Low, t));
        }
    }

    #[test]
    fn release_is_not_an_event() {
        let mut button = DebouncedButton::active_low(50, 0);
        button.poll(Level::Low, 0);
        assert!(button.poll(Level::Low, 60));

        assert!(!button.poll(Level::High, 100));
        assert!(!button.poll(Level::High, 160));
        assert_eq!(button.stable_level(), Level::High);

        assert!(!button.poll(Level::Low, 200));
        assert!(button.poll(Level::Low, 250));
    }

    #[test]
    fn bouncing_restarts_the_window() {
        let mut button = DebouncedButton::active_low(50, 0);

        button.poll(Level::Low, 0);
        button.poll(Level::High, 30);
        button.poll(Level::Low, 40);
        assert!(!button.poll(Level::Low, 80));
        assert!(button.poll(Level::Low, 90));
    }
}
