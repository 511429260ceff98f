pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod dsl;
pub mod effects;
pub mod engine;
pub mod graph;
#[doc(hidden)]
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod note;
pub mod param;
pub mod phrase;
pub mod plan;
pub mod rt;
pub mod scheduler;
pub mod states;
pub mod transport;
pub mod voice;
pub mod wav;

pub use config::{EngineConfig, MusicConfig};
pub use effects::{EffectKind, EffectOptions};
pub use engine::SoundEngine;
