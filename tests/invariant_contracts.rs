#![cfg(feature = "ppt")]

use auxide_ambient::graph::{Graph, NodeType};
use auxide_ambient::invariant_ppt::*;
use auxide_ambient::{EffectOptions, SoundEngine};

#[test]
fn engine_run_exercises_every_invariant() {
    let mut engine = SoundEngine::default();
    engine.notify_user_gesture();
    engine.music_start();
    engine.play_ghost(EffectOptions::default());
    let mut buf = vec![0.0f32; 4410];
    for _ in 0..60 {
        engine.render(&mut buf);
        engine.poll();
    }

    let mut graph = Graph::new();
    let a = graph.add_node(NodeType::gain(1.0));
    let b = graph.add_node(NodeType::gain(1.0));
    graph.connect(a, b).unwrap();
    assert!(graph.connect(b, a).is_err());

    contract_test(
        "engine_run_exercises_every_invariant",
        &[
            GRAPH_LEGALITY,
            GRAPH_REJECTS_INVALID,
            PLAN_SOUNDNESS,
            ENVELOPE_BEFORE_STOP,
            NO_PAST_SCHEDULING,
            WATERMARK_MONOTONIC,
            WATERMARK_COVERS_EVENTS,
            VOICE_RECLAIMED,
            CLOCK_GATED,
        ],
    );
}
