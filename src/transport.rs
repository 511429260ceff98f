//! Transport controller: start, stop and fade for the ambient loop.
//!
//! The transport owns the scheduler state and two host timers (the next
//! scheduler tick and the post-stop gain restore). Nothing fires on its
//! own; the host calls [`Transport::poll`] and due timers run there.

use crate::clock::ClockSource;
use crate::config::MusicConfig;
use crate::scheduler::{NoteSink, Scheduler};
use thiserror::Error;
use tracing::{debug, info};

/// What the transport needs from the audio side.
pub trait MusicBackend: ClockSource + NoteSink {
    /// Approach `target` exponentially from `at`, replacing any glide in progress.
    fn ramp_music_gain(&mut self, target: f32, at: f64, time_constant: f64);
    /// Jump the music bus to `value` at `at`.
    fn set_music_gain(&mut self, value: f32, at: f64);
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The audio clock is not running yet.
    #[error("audio clock unavailable")]
    ClockUnavailable,
}

#[derive(Debug, Clone)]
pub struct Transport {
    music: MusicConfig,
    scheduler: Option<Scheduler>,
    next_tick_at: Option<f64>,
    restore_at: Option<f64>,
}

impl Transport {
    pub fn new(music: MusicConfig) -> Self {
        Self {
            music,
            scheduler: None,
            next_tick_at: None,
            restore_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Scheduler state while running.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// When the next scheduler tick is due.
    pub fn next_tick_at(&self) -> Option<f64> {
        self.next_tick_at
    }

    /// When the music bus will be restored after a stop.
    pub fn restore_at(&self) -> Option<f64> {
        self.restore_at
    }

    /// Enter Running and fill the first window immediately.
    ///
    /// No-op when already running. Fails only if the clock is unavailable,
    /// in which case the transport stays idle.
    pub fn start(&mut self, backend: &mut impl MusicBackend) -> Result<(), TransportError> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let now = backend.now().ok_or(TransportError::ClockUnavailable)?;
        let mut scheduler = Scheduler::new(self.music.clone(), now);
        let generated = scheduler.tick(now, backend);
        self.next_tick_at = Some(now + self.music.tick_interval);
        info!(now, generated, watermark = scheduler.watermark(), "music started");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Leave Running, fade the bus out and arm the restore timer.
    ///
    /// Notes already queued keep playing. No-op when idle.
    pub fn stop(&mut self, backend: &mut impl MusicBackend) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };
        self.next_tick_at = None;
        if let Some(now) = backend.now() {
            backend.ramp_music_gain(0.0, now, self.music.stop_time_constant);
            self.restore_at = Some(now + self.music.restore_delay);
        }
        info!(counter = scheduler.phrase_counter(), "music stopped");
    }

    /// Glide the music bus toward `target` (clamped to 0..=1).
    ///
    /// Works whether or not music is running. A missing or non-positive
    /// time constant falls back to the configured default.
    pub fn fade(
        &mut self,
        backend: &mut impl MusicBackend,
        target: f32,
        time_constant: Option<f64>,
    ) -> Result<(), TransportError> {
        let now = backend.now().ok_or(TransportError::ClockUnavailable)?;
        let target = if target.is_nan() { 0.0 } else { target.clamp(0.0, 1.0) };
        let tc = time_constant
            .filter(|tc| *tc > 0.0)
            .unwrap_or(self.music.fade_time_constant);
        backend.ramp_music_gain(target, now, tc);
        debug!(target, time_constant = tc, "music fade");
        Ok(())
    }

    /// Run whichever timers are due. Returns the number of blocks generated.
    pub fn poll(&mut self, backend: &mut impl MusicBackend) -> usize {
        let Some(now) = backend.now() else {
            return 0;
        };
        // The level lands at the due time, even when the poll comes late.
        if let Some(at) = self.restore_at.filter(|at| *at <= now) {
            self.restore_at = None;
            backend.set_music_gain(self.music.gain, at);
            debug!(gain = self.music.gain, at, now, "music bus restored");
        }
        let due = self.next_tick_at.is_some_and(|at| at <= now);
        match self.scheduler.as_mut() {
            Some(scheduler) if due => {
                self.next_tick_at = Some(now + self.music.tick_interval);
                scheduler.tick(now, backend)
            }
            _ => 0,
        }
    }
}
