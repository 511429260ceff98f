//! Music voices: one self-contained subgraph per note.
//!
//! Every envelope here rises from silence and returns to silence by
//! `note.end()`; sources are stopped a moment after that.

use crate::bus::MixBus;
use crate::context::AudioContext;
use crate::dsl::{DslError, VoiceBuilder};
use crate::graph::{FilterMode, ParamKind, Waveform};
use crate::note::{NoteEvent, VoiceKind};

/// Gap between the envelope reaching zero and the sources stopping.
pub const STOP_MARGIN: f64 = 0.02;

/// Voice `note` with the envelope family it names.
pub fn schedule(ctx: &mut AudioContext, bus: &MixBus, note: &NoteEvent) -> Result<(), DslError> {
    match note.voice {
        VoiceKind::Pad => play_note(ctx, bus, note),
        VoiceKind::Bass => play_bass_note(ctx, bus, note),
        VoiceKind::Melody => play_melody_note(ctx, bus, note),
    }
}

/// Soft triangle: short attack, gentle sag, linear release.
pub fn play_note(ctx: &mut AudioContext, bus: &MixBus, note: &NoteEvent) -> Result<(), DslError> {
    let (start, end) = (note.start, note.end());
    let attack = (note.duration * 0.25).min(0.04);

    let mut voice = VoiceBuilder::new(ctx, bus.node(note.bus))?;
    let osc = voice.oscillator(Waveform::Triangle, note.pitch);
    voice.chain(&[osc])?;
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(note.peak_gain, start + attack)
        .linear_ramp_to_value_at_time(note.peak_gain * 0.7, start + note.duration * 0.5)
        .linear_ramp_to_value_at_time(0.0, end);
    voice.play(start, end + STOP_MARGIN)
}

/// Sine an octave below the written pitch with a quiet triangle on top.
pub fn play_bass_note(ctx: &mut AudioContext, bus: &MixBus, note: &NoteEvent) -> Result<(), DslError> {
    let (start, end) = (note.start, note.end());
    let pitch = note.pitch * 0.5;
    let attack = (note.duration * 0.1).min(0.02);

    let mut voice = VoiceBuilder::new(ctx, bus.node(note.bus))?;
    let body = voice.oscillator(Waveform::Sine, pitch);
    let edge = voice.oscillator(Waveform::Triangle, pitch);
    let edge_level = voice.gain(0.25);
    voice.chain(&[body])?;
    voice.chain(&[edge, edge_level])?;
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(note.peak_gain, start + attack)
        .linear_ramp_to_value_at_time(note.peak_gain * 0.8, start + note.duration * 0.8)
        .linear_ramp_to_value_at_time(0.0, end);
    voice.play(start, end + STOP_MARGIN)
}

/// Plucked sawtooth through a lowpass that closes over the note.
pub fn play_melody_note(ctx: &mut AudioContext, bus: &MixBus, note: &NoteEvent) -> Result<(), DslError> {
    let (start, end) = (note.start, note.end());
    let attack = (note.duration * 0.1).min(0.01);

    let mut voice = VoiceBuilder::new(ctx, bus.node(note.bus))?;
    let osc = voice.oscillator(Waveform::Sawtooth, note.pitch);
    let lowpass = voice.filter(FilterMode::Lowpass, note.pitch * 4.0, 0.9);
    voice.chain(&[osc, lowpass])?;
    voice
        .param(lowpass, ParamKind::Cutoff)?
        .set_value_at_time(note.pitch * 4.0, start)
        .exponential_ramp_to_value_at_time(note.pitch * 1.5, end);
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(note.peak_gain, start + attack)
        .exponential_ramp_to_value_at_time(note.peak_gain * 0.3, start + note.duration * 0.6)
        .linear_ramp_to_value_at_time(0.0, end);
    voice.play(start, end + STOP_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::note::BusTarget;

    fn setup() -> (AudioContext, MixBus) {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        ctx.allow_playback();
        ctx.resume().unwrap();
        let bus = MixBus::new(&mut ctx, 0.5, 0.18).unwrap();
        (ctx, bus)
    }

    fn note(voice: VoiceKind) -> NoteEvent {
        NoteEvent {
            pitch: 220.0,
            start: 0.1,
            duration: 0.5,
            peak_gain: 0.1,
            bus: BusTarget::Music,
            voice,
        }
    }

    #[test]
    fn every_voice_stops_after_its_envelope() {
        for kind in [VoiceKind::Pad, VoiceKind::Bass, VoiceKind::Melody] {
            let (mut ctx, bus) = setup();
            schedule(&mut ctx, &bus, &note(kind)).unwrap();
            let graph = ctx.graph();
            for data in graph.nodes.iter().flatten() {
                if let Some(schedule) = data.schedule {
                    assert_eq!(schedule.start, 0.1);
                    assert!(schedule.stop.unwrap() >= 0.6, "{:?}", kind);
                }
            }
            assert_eq!(ctx.active_voices(), 1);
        }
    }

    #[test]
    fn bass_sounds_an_octave_down() {
        let (mut ctx, bus) = setup();
        play_bass_note(&mut ctx, &bus, &note(VoiceKind::Bass)).unwrap();
        let pitches: Vec<f32> = ctx
            .graph()
            .nodes
            .iter()
            .flatten()
            .filter_map(|n| n.node_type.param(ParamKind::Frequency))
            .map(|p| p.default_value())
            .collect();
        assert_eq!(pitches, vec![110.0, 110.0]);
    }

    #[test]
    fn voices_render_and_fall_silent() {
        let (mut ctx, bus) = setup();
        schedule(&mut ctx, &bus, &note(VoiceKind::Melody)).unwrap();
        let out = ctx.render_seconds(1.0);
        let sr = ctx.sample_rate() as f64;
        let sounding = &out[(0.2 * sr) as usize..(0.4 * sr) as usize];
        assert!(sounding.iter().any(|&x| x.abs() > 1e-4));
        let tail = &out[(0.7 * sr) as usize..];
        assert!(tail.iter().all(|&x| x == 0.0));
        assert_eq!(ctx.active_voices(), 0);
    }
}
