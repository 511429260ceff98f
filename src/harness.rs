//! Test harness: a music backend driven by a manual clock.
//!
//! Records every note instead of voicing it and keeps the music bus level
//! as a bare automation curve, so scheduling can be checked without
//! rendering audio.

use crate::clock::{ClockSource, ManualClock};
use crate::note::NoteEvent;
use crate::param::AudioParam;
use crate::scheduler::NoteSink;
use crate::transport::MusicBackend;

#[derive(Debug, Clone)]
pub struct FakeBackend {
    pub clock: ManualClock,
    pub notes: Vec<NoteEvent>,
    pub music: AudioParam,
}

impl FakeBackend {
    /// A backend whose clock is live at time zero.
    pub fn new(music_gain: f32) -> Self {
        Self {
            clock: ManualClock::started_at(0.0),
            notes: Vec::new(),
            music: AudioParam::new(music_gain),
        }
    }

    /// A backend whose clock has not been activated.
    pub fn inactive(music_gain: f32) -> Self {
        Self {
            clock: ManualClock::new(),
            ..Self::new(music_gain)
        }
    }

    pub fn advance_by(&mut self, seconds: f64) {
        self.clock.advance_by(seconds);
    }

    pub fn music_gain_at(&self, t: f64) -> f32 {
        self.music.value_at(t)
    }
}

impl ClockSource for FakeBackend {
    fn now(&self) -> Option<f64> {
        self.clock.now()
    }
}

impl NoteSink for FakeBackend {
    fn schedule_note(&mut self, note: &NoteEvent) {
        self.notes.push(*note);
    }
}

impl MusicBackend for FakeBackend {
    fn ramp_music_gain(&mut self, target: f32, at: f64, time_constant: f64) {
        self.music
            .cancel_and_hold_at_time(at)
            .set_target_at_time(target, at, time_constant);
    }

    fn set_music_gain(&mut self, value: f32, at: f64) {
        self.music.cancel_and_hold_at_time(at).set_value_at_time(value, at);
    }
}
