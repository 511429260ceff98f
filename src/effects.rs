//! One-shot sound effects on the effects bus.

use crate::context::AudioContext;
use crate::dsl::{DslError, VoiceBuilder};
use crate::graph::{FilterMode, NodeId, ParamKind, Waveform};

/// Offset from `now` for effect onsets, so nothing lands in the past.
pub const EFFECT_EPSILON: f64 = 0.01;

const MIN_DURATION: f64 = 0.02;

/// The available effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Bell,
    Ghost,
    Tick,
    Buzz,
}

/// Optional overrides for a single effect.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EffectOptions {
    /// Base frequency in Hz.
    pub frequency: Option<f32>,
    /// Length in seconds.
    pub duration: Option<f64>,
}

impl EffectOptions {
    pub fn frequency(mut self, hz: f32) -> Self {
        self.frequency = Some(hz);
        self
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Non-finite overrides fall back to the effect's own defaults.
    fn resolve(&self, frequency: f32, duration: f64) -> (f32, f64) {
        (
            self.frequency
                .filter(|hz| hz.is_finite())
                .unwrap_or(frequency)
                .clamp(20.0, 20_000.0),
            self.duration
                .filter(|s| s.is_finite())
                .unwrap_or(duration)
                .max(MIN_DURATION),
        )
    }
}

/// Play `kind` on `bus`, starting just after the current clock.
pub fn play(kind: EffectKind, ctx: &mut AudioContext, bus: NodeId, options: &EffectOptions) -> Result<(), DslError> {
    match kind {
        EffectKind::Bell => play_bell(ctx, bus, options),
        EffectKind::Ghost => play_ghost(ctx, bus, options),
        EffectKind::Tick => play_tick(ctx, bus, options),
        EffectKind::Buzz => play_buzz(ctx, bus, options),
    }
}

fn onset(ctx: &AudioContext) -> Result<f64, DslError> {
    ctx.current_time()
        .map(|now| now + EFFECT_EPSILON)
        .ok_or(DslError::ClockUnavailable)
}

/// Struck bell: two inharmonic sine partials, instant attack, long decay.
pub fn play_bell(ctx: &mut AudioContext, bus: NodeId, options: &EffectOptions) -> Result<(), DslError> {
    let (freq, duration) = options.resolve(880.0, 1.4);
    let start = onset(ctx)?;
    let end = start + duration;

    let mut voice = VoiceBuilder::new(ctx, bus)?;
    for (ratio, level) in [(1.0, 0.7), (2.76, 0.3)] {
        let partial = voice.oscillator(Waveform::Sine, freq * ratio);
        let mix = voice.gain(level);
        voice.chain(&[partial, mix])?;
    }
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(0.35, start + 0.005)
        .exponential_ramp_to_value_at_time(0.001, end)
        .linear_ramp_to_value_at_time(0.0, end + 0.01);
    voice.play(start, end + 0.03)
}

/// Breathy swell: detuned triangles plus band-limited noise under a closing lowpass.
pub fn play_ghost(ctx: &mut AudioContext, bus: NodeId, options: &EffectOptions) -> Result<(), DslError> {
    let (freq, duration) = options.resolve(220.0, 2.2);
    let start = onset(ctx)?;
    let end = start + duration;

    let mut voice = VoiceBuilder::new(ctx, bus)?;
    let lowpass = voice.filter(FilterMode::Lowpass, 1200.0, 0.5);
    let a = voice.oscillator(Waveform::Triangle, freq);
    let b = voice.oscillator(Waveform::Triangle, freq * 1.007);
    let noise = voice.noise();
    let breath = voice.filter(FilterMode::Bandpass, freq * 2.0, 0.8);
    let breath_level = voice.gain(0.15);
    voice.connect(a, lowpass)?;
    voice.connect(b, lowpass)?;
    voice.chain(&[noise, breath, breath_level, lowpass])?;
    voice
        .param(lowpass, ParamKind::Cutoff)?
        .set_value_at_time(1200.0, start)
        .exponential_ramp_to_value_at_time(400.0, end);
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(0.22, start + duration * 0.4)
        .linear_ramp_to_value_at_time(0.0, end);
    voice.play(start, end + 0.02)
}

/// UI tick: a few milliseconds of highpassed square.
pub fn play_tick(ctx: &mut AudioContext, bus: NodeId, options: &EffectOptions) -> Result<(), DslError> {
    let (freq, duration) = options.resolve(1800.0, 0.05);
    let start = onset(ctx)?;
    let end = start + duration;

    let mut voice = VoiceBuilder::new(ctx, bus)?;
    let osc = voice.oscillator(Waveform::Square, freq);
    let highpass = voice.filter(FilterMode::Highpass, freq * 0.5, 0.7);
    voice.chain(&[osc, highpass])?;
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(0.25, start + 0.002)
        .exponential_ramp_to_value_at_time(0.001, end)
        .linear_ramp_to_value_at_time(0.0, end + 0.005);
    voice.play(start, end + 0.01)
}

/// Error buzz: clipped sawtooth pair, pitch sagging, through a lowpass.
pub fn play_buzz(ctx: &mut AudioContext, bus: NodeId, options: &EffectOptions) -> Result<(), DslError> {
    let (freq, duration) = options.resolve(110.0, 0.35);
    let start = onset(ctx)?;
    let end = start + duration;

    let mut voice = VoiceBuilder::new(ctx, bus)?;
    let root = voice.oscillator(Waveform::Sawtooth, freq);
    let fifth = voice.oscillator(Waveform::Sawtooth, freq * 1.5);
    let shaper = voice.shaper(3.0);
    let lowpass = voice.filter(FilterMode::Lowpass, 1400.0, 0.7);
    voice.connect(fifth, shaper)?;
    voice.chain(&[root, shaper, lowpass])?;
    voice
        .param(root, ParamKind::Frequency)?
        .set_value_at_time(freq, start)
        .exponential_ramp_to_value_at_time(freq * 0.8, end);
    voice
        .envelope()?
        .set_value_at_time(0.0, start)
        .linear_ramp_to_value_at_time(0.2, start + 0.01)
        .linear_ramp_to_value_at_time(0.2, start + duration * 0.7)
        .linear_ramp_to_value_at_time(0.0, end);
    voice.play(start, end + 0.02)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MixBus;
    use crate::config::EngineConfig;

    fn setup() -> (AudioContext, MixBus) {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        let bus = MixBus::new(&mut ctx, 0.5, 0.18).unwrap();
        (ctx, bus)
    }

    #[test]
    fn effects_need_a_running_clock() {
        let (mut ctx, bus) = setup();
        let err = play(EffectKind::Bell, &mut ctx, bus.effects(), &EffectOptions::default());
        assert_eq!(err, Err(DslError::ClockUnavailable));
        assert_eq!(ctx.graph().node_count(), 3);
    }

    #[test]
    fn every_effect_renders_then_is_reclaimed() {
        for kind in [EffectKind::Bell, EffectKind::Ghost, EffectKind::Tick, EffectKind::Buzz] {
            let (mut ctx, bus) = setup();
            ctx.allow_playback();
            ctx.resume().unwrap();
            play(kind, &mut ctx, bus.effects(), &EffectOptions::default()).unwrap();
            let out = ctx.render_seconds(3.0);
            assert!(out.iter().any(|&x| x.abs() > 1e-4), "{:?} was silent", kind);
            assert!(out.iter().all(|x| x.is_finite()));
            assert_eq!(ctx.active_voices(), 0, "{:?} not reclaimed", kind);
            assert_eq!(ctx.graph().node_count(), 3);
        }
    }

    #[test]
    fn overrides_are_applied_and_clamped() {
        let (mut ctx, bus) = setup();
        ctx.allow_playback();
        ctx.resume().unwrap();
        let options = EffectOptions::default().frequency(5.0).duration(0.5);
        play_tick(&mut ctx, bus.effects(), &options).unwrap();
        let freq = ctx
            .graph()
            .nodes
            .iter()
            .flatten()
            .find_map(|n| n.node_type.param(ParamKind::Frequency))
            .map(|p| p.default_value());
        assert_eq!(freq, Some(20.0));
        let stop = ctx
            .graph()
            .nodes
            .iter()
            .flatten()
            .find_map(|n| n.schedule)
            .and_then(|s| s.stop)
            .unwrap();
        assert!((stop - (EFFECT_EPSILON + 0.51)).abs() < 1e-9);
    }

    #[test]
    fn non_finite_overrides_fall_back_to_defaults() {
        let options = [
            EffectOptions::default().frequency(f32::NAN),
            EffectOptions::default().frequency(f32::INFINITY).duration(f64::NAN),
            EffectOptions::default().duration(f64::INFINITY),
        ];
        assert_eq!(options[0].resolve(880.0, 1.4), (880.0, 1.4));
        assert_eq!(options[1].resolve(880.0, 1.4), (880.0, 1.4));
        assert_eq!(options[2].resolve(110.0, 0.35), (110.0, 0.35));

        for kind in [EffectKind::Bell, EffectKind::Ghost, EffectKind::Tick, EffectKind::Buzz] {
            let (mut ctx, bus) = setup();
            ctx.allow_playback();
            ctx.resume().unwrap();
            for opts in &options {
                play(kind, &mut ctx, bus.effects(), opts).unwrap();
            }
            let out = ctx.render_seconds(3.0);
            assert!(out.iter().all(|x| x.is_finite()), "{:?} produced non-finite samples", kind);
            assert_eq!(ctx.active_voices(), 0, "{:?} not reclaimed", kind);
        }
    }
}
