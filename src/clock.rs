//! Clock sources: the audio-time authority for all scheduling.

/// Anything that can report the live audio clock.
///
/// `now()` is `None` while the pipeline is not running. Callers must not
/// substitute a default: work that needs a time waits until one exists.
pub trait ClockSource {
    /// Current audio time in seconds, if the pipeline is live.
    fn now(&self) -> Option<f64>;
}

/// A hand-driven clock for tests and offline tooling.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: f64,
    active: bool,
}

impl ManualClock {
    /// An inactive clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// An active clock already at `time`.
    pub fn started_at(time: f64) -> Self {
        Self { time, active: true }
    }

    /// Make the clock readable.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Move time forward. Negative steps are ignored; the clock never runs backwards.
    pub fn advance_by(&mut self, seconds: f64) {
        self.time += seconds.max(0.0);
    }

    /// Raw time, readable even while inactive.
    pub fn time(&self) -> f64 {
        self.time
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Option<f64> {
        self.active.then_some(self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_until_activated() {
        let mut clock = ManualClock::new();
        clock.advance_by(1.0);
        assert_eq!(clock.now(), None);
        clock.activate();
        assert_eq!(clock.now(), Some(1.0));
    }

    #[test]
    fn never_runs_backwards() {
        let mut clock = ManualClock::started_at(2.0);
        clock.advance_by(-1.0);
        assert_eq!(clock.now(), Some(2.0));
        clock.advance_by(0.5);
        assert_eq!(clock.now(), Some(2.5));
    }
}
