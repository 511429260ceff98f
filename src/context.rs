//! Audio context: the live pipeline every sound is scheduled on.
//!
//! Owns the graph, the block renderer and the audio clock. The clock only
//! exists while the context is running, and the context only runs after a
//! user gesture has allowed playback.

use crate::clock::ClockSource;
use crate::config::EngineConfig;
use crate::graph::{Graph, GraphError, NodeId, NodeType};
use crate::invariant_ppt::{assert_invariant, CLOCK_GATED, VOICE_RECLAIMED};
use crate::plan::PlanError;
use crate::rt::{process_block_safe, Runtime};
use thiserror::Error;
use tracing::{debug, info};

/// Lifecycle of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Built but not producing time.
    Suspended,
    /// Clock advancing, scheduling allowed.
    Running,
    /// Torn down; nothing more will play.
    Closed,
}

/// Pipeline failures. None of these ever reach the game.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    /// The platform offers no audio output.
    #[error("audio output is unavailable: {0}")]
    Unavailable(String),
    /// Resume attempted before any user gesture.
    #[error("playback has not been allowed by a user gesture")]
    NotAllowed,
    /// The context was closed.
    #[error("audio context is closed")]
    Closed,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Debug)]
struct VoiceRecord {
    nodes: Vec<NodeId>,
    ends_at: f64,
}

/// The in-process audio pipeline.
#[derive(Debug)]
pub struct AudioContext {
    sample_rate: f32,
    state: ContextState,
    playback_allowed: bool,
    frames_rendered: u64,
    graph: Graph,
    runtime: Runtime,
    destination: NodeId,
    voices: Vec<VoiceRecord>,
    next_seed: u64,
}

impl AudioContext {
    /// Build a suspended context.
    pub fn new(config: &EngineConfig) -> Result<Self, AudioError> {
        if !config.audio_enabled {
            return Err(AudioError::Unavailable("audio disabled by configuration".into()));
        }
        if !(8_000..=192_000).contains(&config.sample_rate) {
            return Err(AudioError::Unavailable(format!(
                "unsupported sample rate {}",
                config.sample_rate
            )));
        }
        if config.block_size == 0 {
            return Err(AudioError::Unavailable("block size must be non-zero".into()));
        }
        let sample_rate = config.sample_rate as f32;
        let mut graph = Graph::new();
        let destination = graph.add_node(NodeType::OutputSink);
        debug!(sample_rate, block_size = config.block_size, "audio context created");
        Ok(Self {
            sample_rate,
            state: ContextState::Suspended,
            playback_allowed: false,
            frames_rendered: 0,
            graph,
            runtime: Runtime::new(sample_rate, config.block_size),
            destination,
            voices: Vec::new(),
            next_seed: 0x5eed,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Record that a user gesture happened; later resumes may succeed.
    pub fn allow_playback(&mut self) {
        self.playback_allowed = true;
    }

    /// Start the clock. Idempotent once running.
    pub fn resume(&mut self) -> Result<(), AudioError> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(AudioError::Closed),
            ContextState::Suspended if !self.playback_allowed => Err(AudioError::NotAllowed),
            ContextState::Suspended => {
                self.state = ContextState::Running;
                info!("audio context running");
                Ok(())
            }
        }
    }

    /// Stop producing audio for good.
    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }

    /// Live audio time, `None` unless running.
    pub fn current_time(&self) -> Option<f64> {
        let time = (self.state == ContextState::Running)
            .then(|| self.frames_rendered as f64 / self.sample_rate as f64);
        assert_invariant(
            CLOCK_GATED,
            time.is_some() == (self.state == ContextState::Running),
            "clock readable only while running",
            Some("current_time"),
        );
        time
    }

    /// The final output node.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// A fresh seed for a noise source.
    pub fn next_seed(&mut self) -> u64 {
        self.next_seed = self.next_seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        self.next_seed
    }

    /// Hand a finished subgraph to the context; it is removed once the
    /// clock passes `ends_at`.
    pub fn register_voice(&mut self, nodes: Vec<NodeId>, ends_at: f64) {
        self.voices.push(VoiceRecord { nodes, ends_at });
    }

    /// Subgraphs still waiting to be reclaimed.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` with the next frames of audio, advancing the clock.
    ///
    /// A context that is not running renders silence and keeps its clock.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }
        let block_size = self.runtime.block_size();
        for chunk in out.chunks_mut(block_size) {
            let start = self.frames_rendered as f64 / self.sample_rate as f64;
            process_block_safe(&mut self.runtime, &self.graph, start, chunk);
            self.frames_rendered += chunk.len() as u64;
            self.reclaim_finished();
        }
    }

    /// Render `seconds` of audio into a new buffer.
    pub fn render_seconds(&mut self, seconds: f64) -> Vec<f32> {
        let frames = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        let mut out = vec![0.0; frames];
        self.render(&mut out);
        out
    }

    fn reclaim_finished(&mut self) {
        let now = self.frames_rendered as f64 / self.sample_rate as f64;
        let graph = &mut self.graph;
        let before = self.voices.len();
        self.voices.retain(|voice| {
            if voice.ends_at > now {
                return true;
            }
            for &node in &voice.nodes {
                // Already gone only if someone removed it by hand.
                let _ = graph.remove_node(node);
            }
            false
        });
        let reclaimed = before - self.voices.len();
        if reclaimed > 0 {
            assert_invariant(
                VOICE_RECLAIMED,
                self.voices.iter().all(|v| v.ends_at > now),
                "finished voices are removed from the graph",
                Some("reclaim_finished"),
            );
            debug!(reclaimed, live_nodes = self.graph.node_count(), "voices reclaimed");
        }
    }
}

impl ClockSource for AudioContext {
    fn now(&self) -> Option<f64> {
        self.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Waveform;

    fn running() -> AudioContext {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        ctx.allow_playback();
        ctx.resume().unwrap();
        ctx
    }

    #[test]
    fn disabled_audio_is_unavailable() {
        let config = EngineConfig {
            audio_enabled: false,
            ..EngineConfig::default()
        };
        assert!(matches!(AudioContext::new(&config), Err(AudioError::Unavailable(_))));
    }

    #[test]
    fn resume_requires_gesture() {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        assert_eq!(ctx.current_time(), None);
        assert_eq!(ctx.resume(), Err(AudioError::NotAllowed));
        ctx.allow_playback();
        ctx.resume().unwrap();
        ctx.resume().unwrap();
        assert_eq!(ctx.current_time(), Some(0.0));
        ctx.close();
        assert_eq!(ctx.current_time(), None);
        assert_eq!(ctx.resume(), Err(AudioError::Closed));
    }

    #[test]
    fn suspended_render_is_silent_and_timeless() {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        let out = ctx.render_seconds(0.1);
        assert!(out.iter().all(|&x| x == 0.0));
        ctx.allow_playback();
        ctx.resume().unwrap();
        assert_eq!(ctx.current_time(), Some(0.0));
    }

    #[test]
    fn render_advances_clock() {
        let mut ctx = running();
        let out = ctx.render_seconds(0.5);
        assert_eq!(out.len(), 22050);
        let now = ctx.current_time().unwrap();
        assert!((now - 0.5).abs() < 1e-9);
    }

    #[test]
    fn finished_voices_are_reclaimed() {
        let mut ctx = running();
        let dest = ctx.destination();
        let osc = ctx.graph_mut().add_node(NodeType::oscillator(Waveform::Sine, 440.0));
        ctx.graph_mut().connect(osc, dest).unwrap();
        ctx.graph_mut().start_source(osc, 0.0).unwrap();
        ctx.graph_mut().stop_source(osc, 0.1).unwrap();
        ctx.register_voice(vec![osc], 0.1);

        let out = ctx.render_seconds(0.05);
        assert!(out.iter().any(|&x| x != 0.0));
        assert_eq!(ctx.active_voices(), 1);

        ctx.render_seconds(0.1);
        assert_eq!(ctx.active_voices(), 0);
        assert_eq!(ctx.graph().node_count(), 1);
    }
}
