//! Mix bus: the two persistent gain nodes every sound feeds.

use crate::context::AudioContext;
use crate::graph::{GraphError, NodeId, NodeType, ParamKind};
use crate::note::BusTarget;
use crate::param::AudioParam;

/// Effects and music gain nodes, both wired to the destination.
///
/// Created once per context and never rebuilt while it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixBus {
    effects: NodeId,
    music: NodeId,
}

impl MixBus {
    pub fn new(ctx: &mut AudioContext, effects_level: f32, music_level: f32) -> Result<Self, GraphError> {
        let destination = ctx.destination();
        let graph = ctx.graph_mut();
        let effects = graph.add_node(NodeType::gain(effects_level));
        let music = graph.add_node(NodeType::gain(music_level));
        graph.connect(effects, destination)?;
        graph.connect(music, destination)?;
        Ok(Self { effects, music })
    }

    pub fn effects(&self) -> NodeId {
        self.effects
    }

    pub fn music(&self) -> NodeId {
        self.music
    }

    pub fn node(&self, target: BusTarget) -> NodeId {
        match target {
            BusTarget::Effects => self.effects,
            BusTarget::Music => self.music,
        }
    }

    fn param<'c>(&self, ctx: &'c mut AudioContext, target: BusTarget) -> Result<&'c mut AudioParam, GraphError> {
        ctx.graph_mut().param_mut(self.node(target), ParamKind::Gain)
    }

    /// Glide from wherever the bus is at `at` toward `level`.
    pub fn ramp_to(
        &self,
        ctx: &mut AudioContext,
        target: BusTarget,
        level: f32,
        at: f64,
        time_constant: f64,
    ) -> Result<(), GraphError> {
        self.param(ctx, target)?
            .cancel_and_hold_at_time(at)
            .set_target_at_time(level, at, time_constant);
        Ok(())
    }

    /// Jump to `level` at `at`, discarding any glide in progress.
    pub fn set_level(&self, ctx: &mut AudioContext, target: BusTarget, level: f32, at: f64) -> Result<(), GraphError> {
        self.param(ctx, target)?
            .cancel_and_hold_at_time(at)
            .set_value_at_time(level, at);
        Ok(())
    }

    /// Set the level with no automation; used while the clock is unavailable.
    pub fn set_level_now(&self, ctx: &mut AudioContext, target: BusTarget, level: f32) -> Result<(), GraphError> {
        self.param(ctx, target)?.reset(level);
        Ok(())
    }

    /// Bus level at time `t`.
    pub fn level_at(&self, ctx: &AudioContext, target: BusTarget, t: f64) -> Option<f32> {
        ctx.graph()
            .node(self.node(target))
            .and_then(|n| n.node_type.param(ParamKind::Gain))
            .map(|p| p.value_at(t))
    }
}
