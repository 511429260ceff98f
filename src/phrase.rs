//! Phrase generator: fixed harmonic plan and melodic shapes turned into notes.
//!
//! Everything here is pure. Start times returned by [`melody_for`] are
//! relative to the block start; [`arpeggio_for`] and [`bass_for`] take an
//! absolute bar start.

use crate::config::MusicConfig;
use crate::note::{BusTarget, NoteEvent, VoiceKind};

/// Three chord tones in Hz.
pub type Chord = [f32; 3];

/// Am, F, C, G; one chord per two-bar block.
pub const HARMONIC_PLAN: [Chord; 4] = [
    [220.0, 261.63, 329.63],
    [174.61, 220.0, 261.63],
    [261.63, 329.63, 392.0],
    [196.0, 246.94, 293.66],
];

/// A minor pentatonic over an octave and a half.
pub const SCALE: [f32; 8] = [220.0, 261.63, 293.66, 329.63, 392.0, 440.0, 523.25, 587.33];

/// Slots in a melodic phrase, spread evenly over two bars.
pub const MELODY_SLOTS: usize = 8;

/// Start offset between successive arpeggio tones.
pub const ARPEGGIO_ROLL: f64 = 0.03;

/// A melody template: a scale degree per slot, two of which rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MelodyShape {
    pub degrees: [usize; MELODY_SLOTS],
    pub rests: [usize; 2],
}

pub const SHAPES: [MelodyShape; 4] = [
    MelodyShape {
        degrees: [4, 3, 2, 0, 2, 3, 4, 5],
        rests: [3, 7],
    },
    MelodyShape {
        degrees: [2, 4, 5, 4, 3, 2, 1, 0],
        rests: [2, 6],
    },
    MelodyShape {
        degrees: [5, 6, 7, 6, 4, 3, 4, 2],
        rests: [1, 5],
    },
    MelodyShape {
        degrees: [0, 2, 3, 4, 3, 2, 0, 1],
        rests: [4, 7],
    },
];

const MELODY_GAINS: [f32; 2] = [0.07, 0.05];
const PAD_GAIN: f32 = 0.045;
const BASS_GAIN: f32 = 0.09;

/// The chord for block `index`, cycling through [`HARMONIC_PLAN`].
pub fn chord_for(index: u64) -> Chord {
    HARMONIC_PLAN[(index % HARMONIC_PLAN.len() as u64) as usize]
}

/// The shape selected by phrase counter `n`.
pub fn shape_for(n: u64) -> &'static MelodyShape {
    &SHAPES[(n % SHAPES.len() as u64) as usize]
}

/// Expand phrase `n` into melody notes starting at offset 0.
///
/// Rest slots produce nothing, so a phrase has six notes. Degrees wrap
/// around the scale, so any shape content is playable.
pub fn melody_for(n: u64, music: &MusicConfig) -> Vec<NoteEvent> {
    let shape = shape_for(n);
    let slot_len = music.block_duration() / MELODY_SLOTS as f64;
    (0..MELODY_SLOTS)
        .filter(|slot| !shape.rests.contains(slot))
        .map(|slot| NoteEvent {
            pitch: SCALE[shape.degrees[slot] % SCALE.len()],
            start: slot as f64 * slot_len,
            duration: slot_len * 0.9,
            // accent on the strong beats
            peak_gain: MELODY_GAINS[slot % 2],
            bus: BusTarget::Music,
            voice: VoiceKind::Melody,
        })
        .collect()
}

/// Roll `chord` upwards from beat `beat_index` of the bar at `bar_start`.
///
/// Each tone lasts a beat and a half so consecutive tones overlap.
pub fn arpeggio_for(chord: Chord, bar_start: f64, beat_index: u32, music: &MusicConfig) -> [NoteEvent; 3] {
    let beat = music.beat_duration();
    let onset = bar_start + beat_index as f64 * beat;
    let tone = |i: usize| NoteEvent {
        pitch: chord[i],
        start: onset + i as f64 * ARPEGGIO_ROLL,
        duration: beat * 1.5,
        peak_gain: PAD_GAIN,
        bus: BusTarget::Music,
        voice: VoiceKind::Pad,
    };
    [tone(0), tone(1), tone(2)]
}

/// The chord root held for most of the bar. The bass voice drops it an octave.
pub fn bass_for(chord: Chord, bar_start: f64, music: &MusicConfig) -> NoteEvent {
    NoteEvent {
        pitch: chord[0],
        start: bar_start,
        duration: music.bar_duration() * 0.9,
        peak_gain: BASS_GAIN,
        bus: BusTarget::Music,
        voice: VoiceKind::Bass,
    }
}
