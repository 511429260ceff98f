//! Graph module for the audio pipeline: correct-by-construction node graphs.
//!
//! Every node has at most one mono output. Inputs fan in and are summed, so
//! a bus gain node can take any number of voices. Sources (oscillators and
//! noise) only sound between their scheduled start and stop times.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::invariant_ppt::{assert_invariant, GRAPH_LEGALITY, GRAPH_REJECTS_INVALID};
use crate::param::AudioParam;
use thiserror::Error;

/// Unique identifier for a node. Slots of removed nodes are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Oscillator waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// Pure sine.
    Sine,
    /// Triangle.
    Triangle,
    /// Naive square.
    Square,
    /// Naive rising sawtooth.
    Sawtooth,
}

/// Biquad filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Passes below the cutoff.
    Lowpass,
    /// Passes above the cutoff.
    Highpass,
    /// Passes around the cutoff.
    Bandpass,
}

/// Names an automatable parameter on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Oscillator frequency in Hz.
    Frequency,
    /// Filter cutoff in Hz.
    Cutoff,
    /// Linear gain factor.
    Gain,
}

/// An edge connecting one node's output to another node's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The source node.
    pub from: NodeId,
    /// The destination node.
    pub to: NodeId,
}

/// Start and stop times of a source node, in audio-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSchedule {
    /// First audible instant.
    pub start: f64,
    /// Instant the source falls silent, if scheduled.
    pub stop: Option<f64>,
}

impl SourceSchedule {
    /// Whether the source sounds at `t`.
    pub fn is_active(&self, t: f64) -> bool {
        t >= self.start && self.stop.map_or(true, |stop| t < stop)
    }
}

/// A node in the graph.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The unique ID of this node.
    pub id: NodeId,
    /// Never reused, unlike `id`; lets the runtime spot recycled slots.
    pub serial: u64,
    /// The type of this node.
    pub node_type: NodeType,
    /// Start/stop times, for source nodes that have been started.
    pub schedule: Option<SourceSchedule>,
}

/// Types of nodes in the audio graph.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum NodeType {
    /// Periodic oscillator.
    Oscillator {
        /// Shape of one cycle.
        waveform: Waveform,
        /// Frequency in Hz.
        frequency: AudioParam,
    },
    /// White noise from a seeded generator.
    Noise {
        /// Generator seed.
        seed: u64,
    },
    /// Biquad filter.
    Filter {
        /// Filter response.
        mode: FilterMode,
        /// Cutoff or center frequency in Hz.
        cutoff: AudioParam,
        /// Resonance.
        q: f32,
    },
    /// Gain node that multiplies input by a factor.
    Gain {
        /// Gain factor (1.0 = unity gain).
        gain: AudioParam,
    },
    /// Soft-clipping waveshaper.
    Shaper {
        /// Input drive before clipping.
        drive: f32,
    },
    /// Final output: everything connected here is heard.
    OutputSink,
}

impl NodeType {
    /// Oscillator at a fixed starting frequency.
    pub fn oscillator(waveform: Waveform, frequency: f32) -> Self {
        NodeType::Oscillator {
            waveform,
            frequency: AudioParam::new(frequency),
        }
    }

    /// Filter at a fixed starting cutoff.
    pub fn filter(mode: FilterMode, cutoff: f32, q: f32) -> Self {
        NodeType::Filter {
            mode,
            cutoff: AudioParam::new(cutoff),
            q,
        }
    }

    /// Gain node at a fixed starting level.
    pub fn gain(gain: f32) -> Self {
        NodeType::Gain {
            gain: AudioParam::new(gain),
        }
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Oscillator { .. } => "Oscillator",
            NodeType::Noise { .. } => "Noise",
            NodeType::Filter { .. } => "Filter",
            NodeType::Gain { .. } => "Gain",
            NodeType::Shaper { .. } => "Shaper",
            NodeType::OutputSink => "OutputSink",
        }
    }

    /// Sources generate signal and need a start time.
    pub fn is_source(&self) -> bool {
        matches!(self, NodeType::Oscillator { .. } | NodeType::Noise { .. })
    }

    /// Whether edges may end at this node.
    pub fn accepts_input(&self) -> bool {
        !self.is_source()
    }

    /// Whether edges may start at this node.
    pub fn has_output(&self) -> bool {
        !matches!(self, NodeType::OutputSink)
    }

    /// Borrow an automatable parameter.
    pub fn param(&self, kind: ParamKind) -> Option<&AudioParam> {
        match (self, kind) {
            (NodeType::Oscillator { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeType::Filter { cutoff, .. }, ParamKind::Cutoff) => Some(cutoff),
            (NodeType::Gain { gain }, ParamKind::Gain) => Some(gain),
            _ => None,
        }
    }

    fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AudioParam> {
        match (self, kind) {
            (NodeType::Oscillator { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeType::Filter { cutoff, .. }, ParamKind::Cutoff) => Some(cutoff),
            (NodeType::Gain { gain }, ParamKind::Gain) => Some(gain),
            _ => None,
        }
    }
}

/// The signal graph: a DAG of nodes and edges.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// All node slots (None for removed nodes).
    pub nodes: Vec<Option<NodeData>>,
    /// All edges connecting nodes.
    pub edges: Vec<Edge>,
    free: Vec<usize>,
    next_serial: u64,
    revision: u64,
}

/// Errors that can occur when building the graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Node does not exist.
    #[error("node does not exist")]
    InvalidNode,
    /// The source end of an edge has no output.
    #[error("{0} node has no output")]
    NoOutput(&'static str),
    /// The destination end of an edge takes no input.
    #[error("{0} node takes no input")]
    NoInput(&'static str),
    /// The edge is already present.
    #[error("edge already exists")]
    DuplicateEdge,
    /// Adding edge would create a cycle.
    #[error("adding edge would create a cycle")]
    CycleDetected,
    /// The node has no parameter of that kind.
    #[error("{0} node has no {1:?} parameter")]
    NoSuchParam(&'static str, ParamKind),
    /// Start/stop requested on a node that is not a source.
    #[error("{0} node is not a schedulable source")]
    NotASource(&'static str),
    /// A source can only be started once.
    #[error("source already started")]
    AlreadyStarted,
    /// Stop requested before the source was started.
    #[error("source was never started")]
    NotStarted,
    /// Stop time precedes the start time.
    #[error("stop time {stop} precedes start time {start}")]
    StopBeforeStart {
        /// Scheduled start.
        start: f64,
        /// Requested stop.
        stop: f64,
    },
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every structural change; plans compiled at an older
    /// revision are stale.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Look up a live node.
    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, GraphError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::InvalidNode)
    }

    /// Iterate over the nodes feeding `id`.
    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.iter().filter(move |e| e.to == id).map(|e| e.from)
    }

    /// Add a node, reusing a free slot when one exists.
    pub fn add_node(&mut self, node_type: NodeType) -> NodeId {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.revision += 1;
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };
        let id = NodeId(slot);
        self.nodes[slot] = Some(NodeData {
            id,
            serial,
            node_type,
            schedule: None,
        });
        id
    }

    /// Connect `from`'s output to `to`'s input.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let from_data = self.node(from).ok_or(GraphError::InvalidNode)?;
        let to_data = self.node(to).ok_or(GraphError::InvalidNode)?;

        if !from_data.node_type.has_output() {
            return Err(GraphError::NoOutput(from_data.node_type.name()));
        }
        if !to_data.node_type.accepts_input() {
            return Err(GraphError::NoInput(to_data.node_type.name()));
        }

        let edge = Edge { from, to };
        if self.edges.contains(&edge) {
            return Err(GraphError::DuplicateEdge);
        }

        if self.would_create_cycle(&edge) {
            assert_invariant(
                GRAPH_REJECTS_INVALID,
                self.would_create_cycle(&edge),
                "Cycle detected, rejecting",
                Some("connect"),
            );
            return Err(GraphError::CycleDetected);
        }

        self.edges.push(edge);
        self.revision += 1;

        assert_invariant(
            GRAPH_LEGALITY,
            true,
            "Edge added successfully, graph remains legal",
            Some("connect"),
        );
        Ok(())
    }

    /// Remove a node and all edges connected to it.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<(), GraphError> {
        if self.node(node_id).is_none() {
            return Err(GraphError::InvalidNode);
        }
        self.nodes[node_id.0] = None;
        self.free.push(node_id.0);
        self.edges
            .retain(|e| e.from != node_id && e.to != node_id);
        self.revision += 1;
        Ok(())
    }

    /// Borrow a node parameter for automation.
    pub fn param_mut(&mut self, node_id: NodeId, kind: ParamKind) -> Result<&mut AudioParam, GraphError> {
        let node = self.node_mut(node_id)?;
        let name = node.node_type.name();
        node.node_type
            .param_mut(kind)
            .ok_or(GraphError::NoSuchParam(name, kind))
    }

    /// Schedule a source to begin sounding at `at`.
    pub fn start_source(&mut self, node_id: NodeId, at: f64) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        if !node.node_type.is_source() {
            return Err(GraphError::NotASource(node.node_type.name()));
        }
        if node.schedule.is_some() {
            return Err(GraphError::AlreadyStarted);
        }
        node.schedule = Some(SourceSchedule {
            start: at,
            stop: None,
        });
        Ok(())
    }

    /// Schedule a started source to fall silent at `at`.
    pub fn stop_source(&mut self, node_id: NodeId, at: f64) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        if !node.node_type.is_source() {
            return Err(GraphError::NotASource(node.node_type.name()));
        }
        let schedule = node.schedule.as_mut().ok_or(GraphError::NotStarted)?;
        if at < schedule.start {
            return Err(GraphError::StopBeforeStart {
                start: schedule.start,
                stop: at,
            });
        }
        schedule.stop = Some(at);
        Ok(())
    }

    fn would_create_cycle(&self, edge: &Edge) -> bool {
        // The new edge closes a cycle iff `to` already reaches `from`.
        let mut visited = vec![false; self.nodes.len()];
        self.dfs(edge.to, edge.from, &mut visited)
    }

    fn dfs(&self, current: NodeId, target: NodeId, visited: &mut [bool]) -> bool {
        if current == target {
            return true;
        }
        if visited[current.0] {
            return false;
        }
        visited[current.0] = true;
        for edge in &self.edges {
            if edge.from == current && self.dfs(edge.to, target, visited) {
                return true;
            }
        }
        false
    }
}
