//! Node state definitions for the RT engine.

use crate::graph::{FilterMode, NodeType};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Node states for mutable data.
pub enum NodeState {
    /// Oscillator state with phase accumulator.
    Oscillator {
        /// Current phase in cycles, `[0, 1)`.
        phase: f32,
    },
    /// Noise generator.
    Noise {
        /// Seeded generator; identical seeds render identical noise.
        rng: StdRng,
    },
    /// Biquad filter memory.
    Filter {
        /// The filter with its delay line.
        filter: DirectForm2Transposed<f32>,
        /// Cutoff the current coefficients were computed for.
        last_cutoff: f32,
    },
    /// Gain, shaper and sink keep no state.
    Stateless,
}

impl std::fmt::Debug for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Oscillator { phase } => write!(f, "Oscillator {{ phase: {} }}", phase),
            NodeState::Noise { .. } => write!(f, "Noise"),
            NodeState::Filter { last_cutoff, .. } => {
                write!(f, "Filter {{ last_cutoff: {} }}", last_cutoff)
            }
            NodeState::Stateless => write!(f, "Stateless"),
        }
    }
}

/// Map a filter mode onto the biquad response type.
pub fn biquad_type(mode: FilterMode) -> Type<f32> {
    match mode {
        FilterMode::Lowpass => Type::LowPass,
        FilterMode::Highpass => Type::HighPass,
        FilterMode::Bandpass => Type::BandPass,
    }
}

/// Keep a cutoff inside what the biquad design accepts.
pub fn clamp_cutoff(cutoff: f32, sample_rate: f32) -> f32 {
    cutoff.clamp(10.0, sample_rate * 0.45)
}

/// Design coefficients, `None` if the parameters are out of range.
pub fn design(mode: FilterMode, sample_rate: f32, cutoff: f32, q: f32) -> Option<Coefficients<f32>> {
    Coefficients::<f32>::from_params(
        biquad_type(mode),
        sample_rate.hz(),
        clamp_cutoff(cutoff, sample_rate).hz(),
        q.max(0.05),
    )
    .ok()
}

impl NodeState {
    /// Fresh state for a node about to render its first block.
    pub fn init(node_type: &NodeType, sample_rate: f32) -> Self {
        match node_type {
            NodeType::Oscillator { .. } => NodeState::Oscillator { phase: 0.0 },
            NodeType::Noise { seed } => NodeState::Noise {
                rng: StdRng::seed_from_u64(*seed),
            },
            NodeType::Filter { mode, cutoff, q } => {
                let start = cutoff.default_value();
                let coeffs = design(*mode, sample_rate, start, *q)
                    .or_else(|| design(*mode, sample_rate, 1000.0, 0.707));
                match coeffs {
                    Some(coeffs) => NodeState::Filter {
                        filter: DirectForm2Transposed::<f32>::new(coeffs),
                        last_cutoff: start,
                    },
                    None => NodeState::Stateless,
                }
            }
            _ => NodeState::Stateless,
        }
    }

    /// Next white-noise sample in `[-1, 1)`.
    pub fn next_noise(rng: &mut StdRng) -> f32 {
        rng.gen_range(-1.0f32..1.0)
    }

    /// Run one sample through a filter, retuning if the cutoff moved.
    pub fn run_filter(
        filter: &mut DirectForm2Transposed<f32>,
        last_cutoff: &mut f32,
        mode: FilterMode,
        sample_rate: f32,
        cutoff: f32,
        q: f32,
        x: f32,
    ) -> f32 {
        if (cutoff - *last_cutoff).abs() > 0.5 {
            if let Some(coeffs) = design(mode, sample_rate, cutoff, q) {
                filter.update_coefficients(coeffs);
                *last_cutoff = cutoff;
            }
        }
        filter.run(x)
    }
}
