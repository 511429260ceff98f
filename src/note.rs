//! Note events handed from the phrase generator to the voice synthesizer.

/// Which mix bus a sound feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTarget {
    /// One-shot effects, controlled by `set_volume`.
    Effects,
    /// Ambient music, controlled by fades and transport stop.
    Music,
}

/// Envelope family used to voice a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    /// Arpeggio tone: soft triangle with a slow release.
    Pad,
    /// Bass: sounded an octave below the written pitch.
    Bass,
    /// Lead: plucked, with a closing lowpass.
    Melody,
}

/// One scheduled note. Immutable once created, never cancelled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// Written pitch in Hz.
    pub pitch: f32,
    /// Absolute start, audio-clock seconds.
    pub start: f64,
    /// Length in seconds; the envelope is back at zero by `start + duration`.
    pub duration: f64,
    /// Envelope peak.
    pub peak_gain: f32,
    /// Destination bus.
    pub bus: BusTarget,
    /// Envelope family.
    pub voice: VoiceKind,
}

impl NoteEvent {
    /// When the note falls silent.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// The same note moved later by `offset` seconds.
    pub fn shifted(self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            ..self
        }
    }
}
