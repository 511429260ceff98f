//! Look-ahead scheduler: keeps a rolling window of music queued ahead of the clock.
//!
//! Each tick generates whole two-bar blocks until the watermark passes
//! `now + lookahead`. The watermark is `origin + blocks * block_duration`,
//! so it only ever moves by exact block multiples.

use crate::config::MusicConfig;
use crate::invariant_ppt::{
    assert_invariant, NO_PAST_SCHEDULING, WATERMARK_COVERS_EVENTS, WATERMARK_MONOTONIC,
};
use crate::note::NoteEvent;
use crate::phrase::{arpeggio_for, bass_for, chord_for, melody_for};
use tracing::{debug, warn};

/// Where generated notes go.
pub trait NoteSink {
    fn schedule_note(&mut self, note: &NoteEvent);
}

impl NoteSink for Vec<NoteEvent> {
    fn schedule_note(&mut self, note: &NoteEvent) {
        self.push(*note);
    }
}

/// All notes of block `counter` starting at `block_start`.
///
/// Per bar: the bass note and two arpeggios of the block's chord, on the
/// downbeat and mid-bar; over the whole block: one melodic phrase.
pub fn generate_block(counter: u64, block_start: f64, music: &MusicConfig) -> Vec<NoteEvent> {
    let chord = chord_for(counter);
    let arpeggio_beats = [0, music.beats_per_bar / 2];
    let mut notes = Vec::with_capacity(2 * (1 + 3 * arpeggio_beats.len()) + 8);
    for bar in 0..2 {
        let bar_start = block_start + bar as f64 * music.bar_duration();
        notes.push(bass_for(chord, bar_start, music));
        for beat in arpeggio_beats {
            notes.extend(arpeggio_for(chord, bar_start, beat, music));
        }
    }
    notes.extend(melody_for(counter, music).into_iter().map(|n| n.shifted(block_start)));
    notes
}

/// Running scheduler state. Dropping it is the Running -> Idle transition.
#[derive(Debug, Clone)]
pub struct Scheduler {
    music: MusicConfig,
    origin: f64,
    phrase_counter: u64,
}

impl Scheduler {
    /// Fresh state with the watermark just after `now`.
    pub fn new(music: MusicConfig, now: f64) -> Self {
        let origin = now + music.start_epsilon;
        Self {
            music,
            origin,
            phrase_counter: 0,
        }
    }

    /// Audio time up to which music has been generated.
    pub fn watermark(&self) -> f64 {
        self.origin + self.phrase_counter as f64 * self.music.block_duration()
    }

    /// Start of phrase 0, where the watermark sits before the first tick.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Blocks generated (or skipped) since the scheduler was created.
    pub fn phrase_counter(&self) -> u64 {
        self.phrase_counter
    }

    /// Generate every block the window needs at `now`, returning how many.
    ///
    /// A watermark already behind the clock means the host stalled past the
    /// window. The missed blocks are skipped, not generated, so nothing is
    /// scheduled in the past and there is no catch-up burst.
    pub fn tick(&mut self, now: f64, sink: &mut impl NoteSink) -> usize {
        let before = self.watermark();
        let block = self.music.block_duration();
        let floor = now + self.music.start_epsilon;
        if before < floor {
            let skipped = ((floor - before) / block).ceil() as u64;
            self.phrase_counter += skipped;
            warn!(now, watermark = before, skipped, "scheduler fell behind; skipping stale blocks");
        }

        let horizon = now + self.music.lookahead;
        let mut generated = 0;
        while self.watermark() < horizon {
            let block_start = self.watermark();
            let block_end = block_start + block;
            for note in generate_block(self.phrase_counter, block_start, &self.music) {
                assert_invariant(
                    NO_PAST_SCHEDULING,
                    note.start > now,
                    "notes are only scheduled ahead of the clock",
                    Some("Scheduler::tick"),
                );
                assert_invariant(
                    WATERMARK_COVERS_EVENTS,
                    note.end() <= block_end + 1e-9,
                    "every note ends within its block",
                    Some("Scheduler::tick"),
                );
                sink.schedule_note(&note);
            }
            self.phrase_counter += 1;
            generated += 1;
        }

        let after = self.watermark();
        assert_invariant(
            WATERMARK_MONOTONIC,
            after >= before,
            "watermark never moves backwards",
            Some("Scheduler::tick"),
        );
        debug!(now, watermark = after, generated, counter = self.phrase_counter, "scheduler tick");
        generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn block_contents() {
        let music = MusicConfig::default();
        let notes = generate_block(0, 10.0, &music);
        // 2 bass + 2 bars * 2 arpeggios * 3 tones + 6 melody notes
        assert_eq!(notes.len(), 2 + 12 + 6);
        assert!(notes.iter().all(|n| n.start >= 10.0));
        assert!(notes.iter().all(|n| n.end() <= 10.0 + music.block_duration()));
    }

    #[test]
    fn fresh_scheduler_sits_at_phrase_zero() {
        let scheduler = Scheduler::new(MusicConfig::default(), 7.0);
        assert_eq!(scheduler.phrase_counter(), 0);
        assert!((scheduler.origin() - 7.05).abs() < 1e-9);
        assert_eq!(scheduler.watermark(), scheduler.origin());
    }

    #[test]
    fn first_tick_fills_window() {
        let music = MusicConfig::default();
        let mut scheduler = Scheduler::new(music, 0.0);
        let mut notes = Vec::new();
        assert_eq!(scheduler.tick(0.0, &mut notes), 1);
        assert!((scheduler.watermark() - 3.89).abs() < 1e-9);
        assert_eq!(scheduler.tick(0.96, &mut notes), 1);
        assert_eq!(scheduler.phrase_counter(), 2);
        assert!(scheduler.watermark() >= 3.84);
        // Already covered: nothing new.
        assert_eq!(scheduler.tick(1.0, &mut notes), 0);
    }

    #[test]
    fn stall_skips_without_burst() {
        let music = MusicConfig::default();
        let mut scheduler = Scheduler::new(music.clone(), 0.0);
        let mut notes = Vec::new();
        scheduler.tick(0.0, &mut notes);
        notes.clear();

        let now = 30.0;
        let generated = scheduler.tick(now, &mut notes);
        assert!(generated <= 2);
        assert!(notes.iter().all(|n| n.start > now));
        assert!(scheduler.watermark() >= now + music.lookahead);
    }

    #[test]
    fn largest_accepted_start_offset_keeps_generating() {
        let music = MusicConfig {
            start_epsilon: 2.8,
            ..MusicConfig::default()
        };
        assert!(music.validate().is_ok());
        let mut scheduler = Scheduler::new(music, 0.0);
        let mut notes = Vec::new();
        let mut generated = 0;
        let mut now = 0.0;
        for _ in 0..20 {
            generated += scheduler.tick(now, &mut notes);
            now += 0.96;
        }
        // Regular ticks never fall behind, so every block is generated.
        assert_eq!(generated as u64, scheduler.phrase_counter());
        assert!(generated >= 5);
        assert_eq!(notes.len(), generated * 20);
    }

    proptest! {
        #[test]
        fn watermark_moves_in_whole_blocks(steps in prop::collection::vec(0.0f64..12.0, 1..40)) {
            let music = MusicConfig::default();
            let block = music.block_duration();
            let mut scheduler = Scheduler::new(music.clone(), 0.0);
            let mut notes = Vec::new();
            let mut now = 0.0;
            for step in steps {
                let before = scheduler.watermark();
                scheduler.tick(now, &mut notes);
                let after = scheduler.watermark();
                prop_assert!(after >= before);
                let blocks = (after - before) / block;
                prop_assert!((blocks - blocks.round()).abs() < 1e-6);
                prop_assert!(after >= now + music.lookahead);
                now += step;
            }
            prop_assert!(notes.iter().all(|n| n.start > 0.0));
        }
    }
}
