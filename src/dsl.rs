//! DSL module: builder API for fire-and-forget voice subgraphs.
//!
//! A voice is `sources -> shaping -> envelope gain -> bus`. The builder
//! creates the envelope up front, wires whatever the caller chains into it,
//! and on [`VoiceBuilder::play`] starts and stops every source and hands the
//! subgraph to the context for reclamation. A builder dropped without
//! playing removes everything it added.

use crate::context::AudioContext;
use crate::graph::{FilterMode, GraphError, NodeId, NodeType, ParamKind, Waveform};
use crate::invariant_ppt::{assert_invariant, ENVELOPE_BEFORE_STOP};
use crate::param::AudioParam;
use thiserror::Error;

/// Handle to a node in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

/// DSL-specific errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DslError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The context has no clock yet.
    #[error("audio clock unavailable")]
    ClockUnavailable,
    /// Nothing in the voice produces sound.
    #[error("voice has no sources")]
    NoSources,
    /// The envelope does not return to silence.
    #[error("envelope ends at {final_value} instead of silence")]
    EnvelopeNotClosed { final_value: f32 },
    /// Sources would be cut before the envelope finished.
    #[error("stop at {stop} precedes envelope release end {release_end}")]
    StopBeforeRelease { stop: f64, release_end: f64 },
}

/// The voice builder.
#[derive(Debug)]
pub struct VoiceBuilder<'a> {
    ctx: &'a mut AudioContext,
    envelope: NodeId,
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
}

impl<'a> VoiceBuilder<'a> {
    /// Start a voice whose envelope feeds `bus`.
    pub fn new(ctx: &'a mut AudioContext, bus: NodeId) -> Result<Self, DslError> {
        let envelope = ctx.graph_mut().add_node(NodeType::gain(0.0));
        if let Err(err) = ctx.graph_mut().connect(envelope, bus) {
            let _ = ctx.graph_mut().remove_node(envelope);
            return Err(err.into());
        }
        Ok(Self {
            ctx,
            envelope,
            nodes: vec![envelope],
            sources: Vec::new(),
        })
    }

    /// The envelope gain node.
    pub fn envelope_node(&self) -> NodeHandle {
        NodeHandle(self.envelope)
    }

    /// Add a node of any type.
    pub fn node(&mut self, node_type: NodeType) -> NodeHandle {
        let is_source = node_type.is_source();
        let id = self.ctx.graph_mut().add_node(node_type);
        self.nodes.push(id);
        if is_source {
            self.sources.push(id);
        }
        NodeHandle(id)
    }

    pub fn oscillator(&mut self, waveform: Waveform, frequency: f32) -> NodeHandle {
        self.node(NodeType::oscillator(waveform, frequency))
    }

    /// White noise with a context-assigned seed.
    pub fn noise(&mut self) -> NodeHandle {
        let seed = self.ctx.next_seed();
        self.node(NodeType::Noise { seed })
    }

    pub fn filter(&mut self, mode: FilterMode, cutoff: f32, q: f32) -> NodeHandle {
        self.node(NodeType::filter(mode, cutoff, q))
    }

    pub fn gain(&mut self, gain: f32) -> NodeHandle {
        self.node(NodeType::gain(gain))
    }

    pub fn shaper(&mut self, drive: f32) -> NodeHandle {
        self.node(NodeType::Shaper { drive })
    }

    /// Connect two ports.
    pub fn connect(&mut self, from: NodeHandle, to: NodeHandle) -> Result<(), DslError> {
        self.ctx.graph_mut().connect(from.0, to.0)?;
        Ok(())
    }

    /// Connect `nodes` in series and the last one into the envelope.
    pub fn chain(&mut self, nodes: &[NodeHandle]) -> Result<(), DslError> {
        for pair in nodes.windows(2) {
            self.connect(pair[0], pair[1])?;
        }
        if let Some(&last) = nodes.last() {
            self.connect(last, NodeHandle(self.envelope))?;
        }
        Ok(())
    }

    /// Borrow a parameter of a node in this voice.
    pub fn param(&mut self, node: NodeHandle, kind: ParamKind) -> Result<&mut AudioParam, DslError> {
        Ok(self.ctx.graph_mut().param_mut(node.0, kind)?)
    }

    /// Borrow the envelope gain.
    pub fn envelope(&mut self) -> Result<&mut AudioParam, DslError> {
        Ok(self.ctx.graph_mut().param_mut(self.envelope, ParamKind::Gain)?)
    }

    /// Start every source at `start`, stop it at `stop`, and release the voice.
    ///
    /// Fails unless the envelope is back at zero no later than `stop`.
    pub fn play(mut self, start: f64, stop: f64) -> Result<(), DslError> {
        if self.sources.is_empty() {
            return Err(DslError::NoSources);
        }
        let (release_end, final_value) = {
            let env = self.envelope()?;
            (env.last_event_time().unwrap_or(start), env.final_value())
        };
        if final_value != 0.0 {
            return Err(DslError::EnvelopeNotClosed { final_value });
        }
        if stop < release_end {
            return Err(DslError::StopBeforeRelease { stop, release_end });
        }
        assert_invariant(
            ENVELOPE_BEFORE_STOP,
            stop >= release_end && final_value == 0.0,
            "sources stop only after the envelope is silent",
            Some("VoiceBuilder::play"),
        );

        let sources = std::mem::take(&mut self.sources);
        for &src in &sources {
            let graph = self.ctx.graph_mut();
            graph.start_source(src, start)?;
            graph.stop_source(src, stop)?;
        }
        let nodes = std::mem::take(&mut self.nodes);
        self.ctx.register_voice(nodes, stop);
        Ok(())
    }
}

impl Drop for VoiceBuilder<'_> {
    fn drop(&mut self) {
        for &node in &self.nodes {
            let _ = self.ctx.graph_mut().remove_node(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn ctx() -> AudioContext {
        let mut ctx = AudioContext::new(&EngineConfig::default()).unwrap();
        ctx.allow_playback();
        ctx.resume().unwrap();
        ctx
    }

    #[test]
    fn dsl_builds_and_registers_voice() {
        let mut ctx = ctx();
        let dest = ctx.destination();
        let mut voice = VoiceBuilder::new(&mut ctx, dest).unwrap();
        let osc = voice.oscillator(Waveform::Sine, 330.0);
        let lp = voice.filter(FilterMode::Lowpass, 2000.0, 0.7);
        voice.chain(&[osc, lp]).unwrap();
        voice
            .envelope()
            .unwrap()
            .set_value_at_time(0.0, 0.1)
            .linear_ramp_to_value_at_time(0.3, 0.15)
            .linear_ramp_to_value_at_time(0.0, 0.5);
        voice.play(0.1, 0.52).unwrap();

        assert_eq!(ctx.active_voices(), 1);
        assert_eq!(ctx.graph().node_count(), 4);
        let schedule = ctx.graph().node(osc.0).unwrap().schedule.unwrap();
        assert_eq!(schedule.start, 0.1);
        assert_eq!(schedule.stop, Some(0.52));
    }

    #[test]
    fn stop_before_release_is_rejected_and_cleaned_up() {
        let mut ctx = ctx();
        let dest = ctx.destination();
        let mut voice = VoiceBuilder::new(&mut ctx, dest).unwrap();
        let osc = voice.oscillator(Waveform::Triangle, 220.0);
        voice.chain(&[osc]).unwrap();
        voice
            .envelope()
            .unwrap()
            .set_value_at_time(0.0, 0.0)
            .linear_ramp_to_value_at_time(0.2, 0.1)
            .linear_ramp_to_value_at_time(0.0, 1.0);
        let err = voice.play(0.0, 0.8).unwrap_err();
        assert_eq!(err, DslError::StopBeforeRelease { stop: 0.8, release_end: 1.0 });
        assert_eq!(ctx.graph().node_count(), 1);
        assert_eq!(ctx.active_voices(), 0);
    }

    #[test]
    fn open_envelope_is_rejected() {
        let mut ctx = ctx();
        let dest = ctx.destination();
        let mut voice = VoiceBuilder::new(&mut ctx, dest).unwrap();
        let osc = voice.oscillator(Waveform::Sine, 220.0);
        voice.chain(&[osc]).unwrap();
        voice.envelope().unwrap().set_value_at_time(0.5, 0.0);
        assert_eq!(
            voice.play(0.0, 1.0).unwrap_err(),
            DslError::EnvelopeNotClosed { final_value: 0.5 }
        );
    }

    #[test]
    fn voice_without_sources_is_rejected() {
        let mut ctx = ctx();
        let dest = ctx.destination();
        let voice = VoiceBuilder::new(&mut ctx, dest).unwrap();
        assert_eq!(voice.play(0.0, 1.0).unwrap_err(), DslError::NoSources);
        assert_eq!(ctx.graph().node_count(), 1);
    }
}
