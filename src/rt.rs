//! RT module: block renderer for the audio graph.

// IMPORTANT: Do not call assert_invariant or any PPT logging in RT paths to avoid locks/allocs.

use crate::graph::{Graph, NodeType, Waveform};
use crate::plan::{Plan, PlanError};
use crate::states::NodeState;
use std::f32::consts::TAU;

/// The runtime engine: per-node state and buffers, kept in step with the graph.
#[derive(Debug)]
pub struct Runtime {
    sample_rate: f32,
    block_size: usize,
    plan: Option<Plan>,
    /// (node serial, state) per slot.
    states: Vec<Option<(u64, NodeState)>>,
    buffers: Vec<Vec<f32>>,
    scratch: Vec<f32>,
}

impl Runtime {
    /// Create a runtime rendering blocks of at most `block_size` frames.
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            plan: None,
            states: Vec::new(),
            buffers: Vec::new(),
            scratch: vec![0.0; block_size],
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Maximum frames per call to [`Runtime::process_block`].
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The plan currently in use, if any.
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Recompile the plan and resync node state if the graph changed.
    pub fn prepare(&mut self, graph: &Graph) -> Result<(), PlanError> {
        if self.plan.as_ref().is_some_and(|p| p.is_current(graph)) {
            return Ok(());
        }
        let plan = Plan::compile(graph)?;
        let slots = graph.nodes.len();
        self.states.resize_with(slots, || None);
        self.buffers.resize_with(slots, || vec![0.0; self.block_size]);
        for (slot, node) in graph.nodes.iter().enumerate() {
            match node {
                Some(data) => {
                    let fresh = !matches!(&self.states[slot], Some((serial, _)) if *serial == data.serial);
                    if fresh {
                        self.states[slot] =
                            Some((data.serial, NodeState::init(&data.node_type, self.sample_rate)));
                    }
                }
                None => self.states[slot] = None,
            }
        }
        self.plan = Some(plan);
        Ok(())
    }

    /// Render `out.len()` frames (at most one block) starting at `start_time`.
    ///
    /// Everything reaching the output sink is mixed into `out`.
    pub fn process_block(&mut self, graph: &Graph, start_time: f64, out: &mut [f32]) -> Result<(), PlanError> {
        assert!(out.len() <= self.block_size);
        self.prepare(graph)?;
        out.fill(0.0);

        let Self {
            sample_rate,
            plan,
            states,
            buffers,
            scratch,
            ..
        } = self;
        let sample_rate = *sample_rate;
        let Some(plan) = plan.as_ref() else {
            return Ok(());
        };
        let frames = out.len();
        let dt = 1.0 / sample_rate as f64;

        for &node_id in &plan.order {
            let Some(data) = graph.node(node_id) else {
                continue;
            };
            let input = &mut scratch[..frames];
            input.fill(0.0);
            for from in &plan.inputs[node_id.0] {
                for (acc, &x) in input.iter_mut().zip(&buffers[from.0][..frames]) {
                    *acc += x;
                }
            }

            let output = &mut buffers[node_id.0][..frames];
            let state = states[node_id.0].as_mut().map(|(_, s)| s);

            match (&data.node_type, state) {
                (NodeType::Oscillator { waveform, frequency }, Some(NodeState::Oscillator { phase })) => {
                    for (i, sample) in output.iter_mut().enumerate() {
                        let t = start_time + i as f64 * dt;
                        if !data.schedule.is_some_and(|s| s.is_active(t)) {
                            *sample = 0.0;
                            continue;
                        }
                        *sample = shape(*waveform, *phase);
                        *phase = (*phase + frequency.value_at(t) / sample_rate).rem_euclid(1.0);
                    }
                }
                (NodeType::Noise { .. }, Some(NodeState::Noise { rng })) => {
                    for (i, sample) in output.iter_mut().enumerate() {
                        let t = start_time + i as f64 * dt;
                        *sample = if data.schedule.is_some_and(|s| s.is_active(t)) {
                            NodeState::next_noise(rng)
                        } else {
                            0.0
                        };
                    }
                }
                (NodeType::Filter { mode, cutoff, q }, Some(NodeState::Filter { filter, last_cutoff })) => {
                    for (i, (sample, &x)) in output.iter_mut().zip(input.iter()).enumerate() {
                        let t = start_time + i as f64 * dt;
                        *sample = NodeState::run_filter(
                            filter,
                            last_cutoff,
                            *mode,
                            sample_rate,
                            cutoff.value_at(t),
                            *q,
                            x,
                        );
                    }
                }
                (NodeType::Gain { gain }, _) => {
                    for (i, (sample, &x)) in output.iter_mut().zip(input.iter()).enumerate() {
                        let t = start_time + i as f64 * dt;
                        *sample = x * gain.value_at(t);
                    }
                }
                (NodeType::Shaper { drive }, _) => {
                    let drive = drive.max(1.0e-3);
                    let norm = drive.tanh();
                    for (sample, &x) in output.iter_mut().zip(input.iter()) {
                        *sample = (x * drive).tanh() / norm;
                    }
                }
                (NodeType::OutputSink, _) => {
                    for (o, &x) in out.iter_mut().zip(input.iter()) {
                        *o += x;
                    }
                    output.fill(0.0);
                }
                // Filter whose design failed: pass through.
                (NodeType::Filter { .. }, _) => output.copy_from_slice(input),
                _ => output.fill(0.0),
            }
        }
        Ok(())
    }
}

fn shape(waveform: Waveform, phase: f32) -> f32 {
    match waveform {
        Waveform::Sine => (TAU * phase).sin(),
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * phase - 1.0,
    }
}

/// Run process_block with panic containment.
pub fn process_block_safe(runtime: &mut Runtime, graph: &Graph, start_time: f64, out: &mut [f32]) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.process_block(graph, start_time, out)
    }));
    if !matches!(result, Ok(Ok(()))) {
        // Fail closed: silence output
        out.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FilterMode, NodeId, ParamKind};

    const SR: f32 = 44100.0;

    fn osc_to_sink(waveform: Waveform, freq: f32) -> (Graph, NodeId) {
        let mut graph = Graph::new();
        let osc = graph.add_node(NodeType::oscillator(waveform, freq));
        let sink = graph.add_node(NodeType::OutputSink);
        graph.connect(osc, sink).unwrap();
        (graph, osc)
    }

    #[test]
    fn unstarted_source_is_silent() {
        let (graph, _) = osc_to_sink(Waveform::Sine, 440.0);
        let mut runtime = Runtime::new(SR, 64);
        let mut out = vec![1.0; 64];
        runtime.process_block(&graph, 0.0, &mut out).unwrap();
        assert_eq!(out, vec![0.0; 64]);
    }

    #[test]
    fn node_golden() {
        let (mut graph, osc) = osc_to_sink(Waveform::Sine, 440.0);
        graph.start_source(osc, 0.0).unwrap();
        let mut runtime = Runtime::new(SR, 64);
        let mut out = vec![0.0; 64];
        runtime.process_block(&graph, 0.0, &mut out).unwrap();
        assert!(out[0].abs() < 0.01); // sin(0) = 0
        assert!(out[1] > 0.0 && out[1] < 0.1);
        assert!(out[10] > 0.0);
    }

    #[test]
    fn source_respects_start_and_stop() {
        let (mut graph, osc) = osc_to_sink(Waveform::Square, 100.0);
        let frame = 1.0 / SR as f64;
        graph.start_source(osc, 10.0 * frame).unwrap();
        graph.stop_source(osc, 20.0 * frame).unwrap();
        let mut runtime = Runtime::new(SR, 64);
        let mut out = vec![0.0; 64];
        runtime.process_block(&graph, 0.0, &mut out).unwrap();
        assert!(out[..10].iter().all(|&x| x == 0.0));
        assert!(out[10..20].iter().all(|&x| x == 1.0));
        assert!(out[20..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn gain_automation_is_sample_accurate() {
        let mut graph = Graph::new();
        let osc = graph.add_node(NodeType::oscillator(Waveform::Square, 10.0));
        let env = graph.add_node(NodeType::gain(0.0));
        let sink = graph.add_node(NodeType::OutputSink);
        graph.connect(osc, env).unwrap();
        graph.connect(env, sink).unwrap();
        graph.start_source(osc, 0.0).unwrap();
        graph
            .param_mut(env, ParamKind::Gain)
            .unwrap()
            .set_value_at_time(0.5, 31.5 / SR as f64);
        let mut runtime = Runtime::new(SR, 64);
        let mut out = vec![0.0; 64];
        runtime.process_block(&graph, 0.0, &mut out).unwrap();
        assert_eq!(out[31], 0.0);
        assert_eq!(out[32], 0.5);
    }

    #[test]
    fn lowpass_attenuates_high_tone() {
        let render = |cutoff: f32| {
            let mut graph = Graph::new();
            let osc = graph.add_node(NodeType::oscillator(Waveform::Sine, 8000.0));
            let filter = graph.add_node(NodeType::filter(FilterMode::Lowpass, cutoff, 0.707));
            let sink = graph.add_node(NodeType::OutputSink);
            graph.connect(osc, filter).unwrap();
            graph.connect(filter, sink).unwrap();
            graph.start_source(osc, 0.0).unwrap();
            let mut runtime = Runtime::new(SR, 256);
            let mut out = vec![0.0; 256];
            let mut peak = 0.0f32;
            for block in 0..8 {
                runtime
                    .process_block(&graph, block as f64 * 256.0 / SR as f64, &mut out)
                    .unwrap();
                if block > 3 {
                    peak = out.iter().fold(peak, |m, x| m.max(x.abs()));
                }
            }
            peak
        };
        assert!(render(300.0) < 0.1 * render(16000.0));
    }

    #[test]
    fn rt_determinism() {
        let build = || {
            let mut graph = Graph::new();
            let noise = graph.add_node(NodeType::Noise { seed: 7 });
            let sink = graph.add_node(NodeType::OutputSink);
            graph.connect(noise, sink).unwrap();
            graph.start_source(noise, 0.0).unwrap();
            graph
        };
        let (g1, g2) = (build(), build());
        let mut r1 = Runtime::new(SR, 64);
        let mut r2 = Runtime::new(SR, 64);
        let mut out1 = vec![0.0; 64];
        let mut out2 = vec![0.0; 64];
        r1.process_block(&g1, 0.0, &mut out1).unwrap();
        r2.process_block(&g2, 0.0, &mut out2).unwrap();
        assert_eq!(out1, out2);
        assert!(out1.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn recycled_slot_gets_fresh_state() {
        let (mut graph, osc) = osc_to_sink(Waveform::Sine, 440.0);
        graph.start_source(osc, 0.0).unwrap();
        let mut runtime = Runtime::new(SR, 64);
        let mut out = vec![0.0; 64];
        runtime.process_block(&graph, 0.0, &mut out).unwrap();

        graph.remove_node(osc).unwrap();
        let sink = NodeId(1);
        let again = graph.add_node(NodeType::oscillator(Waveform::Sine, 440.0));
        assert_eq!(again, osc);
        graph.connect(again, sink).unwrap();
        graph.start_source(again, 0.0).unwrap();
        let mut second = vec![0.0; 64];
        runtime.process_block(&graph, 0.0, &mut second).unwrap();
        assert_eq!(out, second);
    }
}
