//! Engine facade: the public surface a game talks to.
//!
//! Every operation is infallible from the caller's side. The context and
//! mix bus are created on first use; work that needs a running clock is
//! queued until a user gesture has activated the pipeline and the host
//! calls [`SoundEngine::poll`].

use std::collections::VecDeque;

use crate::bus::MixBus;
use crate::clock::ClockSource;
use crate::config::EngineConfig;
use crate::context::{AudioContext, AudioError, ContextState};
use crate::effects::{self, EffectKind, EffectOptions};
use crate::note::{BusTarget, NoteEvent};
use crate::scheduler::NoteSink;
use crate::transport::{MusicBackend, Transport};
use crate::voice;
use tracing::{debug, info, warn};

/// Time constant of effects volume changes.
pub const VOLUME_TIME_CONSTANT: f64 = 0.05;

/// A live context and the buses built on it.
#[derive(Debug)]
struct Live {
    ctx: AudioContext,
    bus: MixBus,
}

impl Live {
    fn new(config: &EngineConfig, effects_level: f32) -> Result<Self, AudioError> {
        let mut ctx = AudioContext::new(config)?;
        let bus = MixBus::new(&mut ctx, effects_level, config.music.gain)?;
        Ok(Self { ctx, bus })
    }

    fn is_ready(&self) -> bool {
        self.ctx.state() == ContextState::Running
    }
}

impl ClockSource for Live {
    fn now(&self) -> Option<f64> {
        self.ctx.current_time()
    }
}

impl NoteSink for Live {
    fn schedule_note(&mut self, note: &NoteEvent) {
        if let Err(err) = voice::schedule(&mut self.ctx, &self.bus, note) {
            warn!(%err, pitch = note.pitch, start = note.start, "dropping note");
        }
    }
}

impl MusicBackend for Live {
    fn ramp_music_gain(&mut self, target: f32, at: f64, time_constant: f64) {
        if let Err(err) = self.bus.ramp_to(&mut self.ctx, BusTarget::Music, target, at, time_constant) {
            warn!(%err, "music bus ramp failed");
        }
    }

    fn set_music_gain(&mut self, value: f32, at: f64) {
        if let Err(err) = self.bus.set_level(&mut self.ctx, BusTarget::Music, value, at) {
            warn!(%err, "music bus level failed");
        }
    }
}

#[derive(Debug)]
enum ContextSlot {
    Uninit,
    Live(Box<Live>),
    Unavailable,
}

/// Work waiting for the pipeline to become ready.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Deferred {
    Effect(EffectKind, EffectOptions),
    MusicStart,
    MusicFade { target: f32, time_constant: Option<f64> },
}

/// Procedural sound effects plus the ambient music loop.
#[derive(Debug)]
pub struct SoundEngine {
    config: EngineConfig,
    slot: ContextSlot,
    transport: Transport,
    volume: f32,
    pending: VecDeque<Deferred>,
}

impl Default for SoundEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl SoundEngine {
    /// An engine that builds nothing until first used.
    ///
    /// An invalid configuration yields an engine where every operation is a no-op.
    pub fn new(config: EngineConfig) -> Self {
        let slot = match config.validate() {
            Ok(()) => ContextSlot::Uninit,
            Err(err) => {
                warn!(%err, "invalid audio configuration; sound disabled");
                ContextSlot::Unavailable
            }
        };
        Self {
            volume: config.effects_volume.clamp(0.0, 1.0),
            transport: Transport::new(config.music.clone()),
            config,
            slot,
            pending: VecDeque::new(),
        }
    }

    fn ensure_context(&mut self) {
        if let ContextSlot::Uninit = self.slot {
            self.slot = match Live::new(&self.config, self.volume) {
                Ok(live) => {
                    debug!("audio pipeline created");
                    ContextSlot::Live(Box::new(live))
                }
                Err(err) => {
                    warn!(%err, "audio unavailable; sound disabled");
                    ContextSlot::Unavailable
                }
            };
        }
    }

    fn ready(slot: &mut ContextSlot) -> Option<&mut Live> {
        match slot {
            ContextSlot::Live(live) if live.is_ready() => Some(live.as_mut()),
            _ => None,
        }
    }

    /// Report a user gesture, which platform policy requires before audio may start.
    pub fn notify_user_gesture(&mut self) {
        self.ensure_context();
        if let ContextSlot::Live(live) = &mut self.slot {
            live.ctx.allow_playback();
            match live.ctx.resume() {
                Ok(()) => info!("audio pipeline activated"),
                Err(err) => warn!(%err, "audio pipeline could not be activated"),
            }
        }
    }

    fn defer(&mut self, work: Deferred) {
        if matches!(self.slot, ContextSlot::Unavailable) {
            return;
        }
        self.pending.push_back(work);
        while self.pending.len() > self.config.max_deferred {
            if let Some(dropped) = self.pending.pop_front() {
                debug!(?dropped, "deferred queue full; dropping oldest");
            }
        }
    }

    fn run(&mut self, work: Deferred) {
        self.ensure_context();
        let Some(live) = Self::ready(&mut self.slot) else {
            self.defer(work);
            return;
        };
        match work {
            Deferred::Effect(kind, options) => {
                let bus = live.bus.effects();
                if let Err(err) = effects::play(kind, &mut live.ctx, bus, &options) {
                    warn!(%err, ?kind, "effect dropped");
                }
            }
            Deferred::MusicStart => {
                if let Err(err) = self.transport.start(live) {
                    warn!(%err, "music start failed");
                }
            }
            Deferred::MusicFade { target, time_constant } => {
                if let Err(err) = self.transport.fade(live, target, time_constant) {
                    warn!(%err, "music fade failed");
                }
            }
        }
    }

    pub fn play_effect(&mut self, kind: EffectKind, options: EffectOptions) {
        self.run(Deferred::Effect(kind, options));
    }

    pub fn play_bell(&mut self, options: EffectOptions) {
        self.play_effect(EffectKind::Bell, options);
    }

    pub fn play_ghost(&mut self, options: EffectOptions) {
        self.play_effect(EffectKind::Ghost, options);
    }

    pub fn play_tick(&mut self, options: EffectOptions) {
        self.play_effect(EffectKind::Tick, options);
    }

    pub fn play_buzz(&mut self, options: EffectOptions) {
        self.play_effect(EffectKind::Buzz, options);
    }

    /// Start the ambient loop. Idempotent.
    pub fn music_start(&mut self) {
        if self.pending.contains(&Deferred::MusicStart) {
            return;
        }
        self.run(Deferred::MusicStart);
    }

    /// Stop the ambient loop and fade the music bus. Idempotent.
    pub fn music_stop(&mut self) {
        self.pending.retain(|work| *work != Deferred::MusicStart);
        if let Some(live) = Self::ready(&mut self.slot) {
            self.transport.stop(live);
        }
    }

    /// Glide the music bus toward `target`.
    pub fn music_fade(&mut self, target: f32, time_constant: Option<f64>) {
        self.run(Deferred::MusicFade { target, time_constant });
    }

    /// Set the effects bus level, clamped to 0..=1.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume = volume;
        if let ContextSlot::Live(live) = &mut self.slot {
            let Live { ctx, bus } = live.as_mut();
            let result = match ctx.current_time() {
                Some(now) => bus.ramp_to(ctx, BusTarget::Effects, volume, now, VOLUME_TIME_CONSTANT),
                None => bus.set_level_now(ctx, BusTarget::Effects, volume),
            };
            if let Err(err) = result {
                warn!(%err, "effects volume change failed");
            }
        }
    }

    /// Last requested effects volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn music_running(&self) -> bool {
        self.transport.is_running()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Requests waiting for activation.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The live pipeline, for diagnostics.
    pub fn context(&self) -> Option<&AudioContext> {
        match &self.slot {
            ContextSlot::Live(live) => Some(&live.ctx),
            _ => None,
        }
    }

    /// Effects and music bus levels at time `t`.
    pub fn bus_levels_at(&self, t: f64) -> Option<(f32, f32)> {
        match &self.slot {
            ContextSlot::Live(live) => Some((
                live.bus.level_at(&live.ctx, BusTarget::Effects, t)?,
                live.bus.level_at(&live.ctx, BusTarget::Music, t)?,
            )),
            _ => None,
        }
    }

    /// Host pump: flush deferred work once ready and run due timers.
    pub fn poll(&mut self) {
        if Self::ready(&mut self.slot).is_none() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "flushing deferred work");
        }
        for work in pending {
            self.run(work);
        }
        if let Some(live) = Self::ready(&mut self.slot) {
            self.transport.poll(live);
        }
    }

    /// Render the next frames of output. Silence until the pipeline runs.
    pub fn render(&mut self, out: &mut [f32]) {
        match &mut self.slot {
            ContextSlot::Live(live) => live.ctx.render(out),
            _ => out.fill(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> SoundEngine {
        let mut engine = SoundEngine::default();
        engine.notify_user_gesture();
        engine
    }

    #[test]
    fn effects_before_activation_are_deferred() {
        let mut engine = SoundEngine::default();
        engine.play_bell(EffectOptions::default());
        engine.play_tick(EffectOptions::default().frequency(2400.0));
        assert_eq!(engine.pending_len(), 2);
        engine.poll();
        assert_eq!(engine.pending_len(), 2);

        engine.notify_user_gesture();
        engine.poll();
        assert_eq!(engine.pending_len(), 0);
        assert_eq!(engine.context().unwrap().active_voices(), 2);
    }

    #[test]
    fn deferred_queue_is_bounded() {
        let mut engine = SoundEngine::new(EngineConfig {
            max_deferred: 2,
            ..EngineConfig::default()
        });
        for _ in 0..5 {
            engine.play_buzz(EffectOptions::default());
        }
        assert_eq!(engine.pending_len(), 2);
    }

    #[test]
    fn volume_clamps() {
        let mut engine = active();
        engine.set_volume(0.8);
        assert_eq!(engine.volume(), 0.8);
        engine.set_volume(-1.0);
        assert_eq!(engine.volume(), 0.0);
        let (effects, _) = engine.bus_levels_at(5.0).unwrap();
        assert!(effects < 1e-6);
        engine.set_volume(f32::NAN);
        assert_eq!(engine.volume(), 0.0);
    }

    #[test]
    fn volume_before_context_is_used_at_creation() {
        let mut engine = SoundEngine::default();
        engine.set_volume(0.3);
        engine.notify_user_gesture();
        assert_eq!(engine.bus_levels_at(0.0), Some((0.3, 0.18)));
    }

    #[test]
    fn unavailable_platform_is_a_no_op() {
        let mut engine = SoundEngine::new(EngineConfig {
            audio_enabled: false,
            ..EngineConfig::default()
        });
        engine.notify_user_gesture();
        engine.play_ghost(EffectOptions::default());
        engine.music_start();
        engine.music_fade(0.5, None);
        engine.set_volume(0.4);
        engine.poll();
        engine.music_stop();
        assert!(engine.context().is_none());
        assert!(!engine.music_running());
        assert_eq!(engine.pending_len(), 0);
        let mut out = vec![1.0; 256];
        engine.render(&mut out);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn stop_before_activation_cancels_pending_start() {
        let mut engine = SoundEngine::default();
        engine.music_start();
        engine.music_start();
        assert_eq!(engine.pending_len(), 1);
        engine.music_stop();
        engine.notify_user_gesture();
        engine.poll();
        assert!(!engine.music_running());
    }

    #[test]
    fn music_starts_once_activated() {
        let mut engine = SoundEngine::default();
        engine.music_start();
        assert!(!engine.music_running());
        engine.notify_user_gesture();
        engine.poll();
        assert!(engine.music_running());
        assert_eq!(engine.transport().scheduler().unwrap().phrase_counter(), 1);
        assert!(engine.context().unwrap().active_voices() > 0);
    }
}
