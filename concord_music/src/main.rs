// Concord renderer: CLI entry point.
//
// Loads a saved graph (or builds a small demo graph), runs an evaluation
// session for a number of steps, and writes the resolved notes to a MIDI
// file. The pipeline: load graph → session.advance() × N → NoteTracker →
// MIDI output.
//
// Usage:
//   cargo run -p concord_music -- [graph.json] [output.mid] [--steps N] [--seed N]
//     [--bpm N] [--config engine.json] [--render render.json]
//     [--track NAME --pitch VAR [--velocity VAR]]
//
// Without a graph file the demo graph is rendered with its own note maps.
// With a graph file, `--pitch` names the pitch variable; if omitted, a
// variable called `pitch` (and `velocity`, if present) is used.
//
// Logging goes through `tracing`; set RUST_LOG (e.g. `RUST_LOG=debug`) for
// per-step detail.

use concord_core::{
    ConstraintRegistry, ConstraintSpec, DependencyGraph, EngineConfig, EngineResult, Session,
    VarDecl, VarId, load_graph,
};
use concord_music::{NoteMap, NoteTracker, RenderConfig, write_midi};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Flags that take a value; their values are not positional arguments.
const VALUE_FLAGS: [&str; 9] = [
    "--steps", "--seed", "--bpm", "--config", "--render", "--track", "--pitch", "--velocity",
    "--channel",
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let positional = positional_args(&args);
    let (graph_path, output_path) = match positional.as_slice() {
        [] => (None, "concord.mid"),
        [one] if one.ends_with(".mid") => (None, one.as_str()),
        [graph] => (Some(graph.as_str()), "concord.mid"),
        [graph, out, ..] => (Some(graph.as_str()), out.as_str()),
    };
    let steps: u64 = parse_flag(&args, "--steps").unwrap_or(64);

    let mut engine = match parse_flag::<String>(&args, "--config") {
        Some(path) => EngineConfig::load(Path::new(&path)).unwrap_or_else(|e| fail("engine config", e)),
        None => EngineConfig::default(),
    };
    if let Some(seed) = parse_flag(&args, "--seed") {
        engine.seed = seed;
    }
    let mut render = match parse_flag::<String>(&args, "--render") {
        Some(path) => RenderConfig::load(Path::new(&path)).unwrap_or_else(|e| fail("render config", e)),
        None => RenderConfig::default(),
    };
    if let Some(bpm) = parse_flag(&args, "--bpm") {
        render.bpm = bpm;
    }

    let registry = Arc::new(ConstraintRegistry::with_builtins());
    let (graph, maps) = match graph_path {
        Some(path) => {
            let json = std::fs::read_to_string(path).unwrap_or_else(|e| fail("graph file", e));
            let graph = load_graph(&json, registry).unwrap_or_else(|e| fail("graph file", e));
            let maps = note_maps_from_flags(&args, &graph);
            (graph, maps)
        }
        None => demo_graph(registry).unwrap_or_else(|e| fail("demo graph", e)),
    };
    if maps.is_empty() {
        eprintln!("No pitch variable to render; pass --pitch VAR.");
        std::process::exit(2);
    }

    println!("=== Concord Renderer ===");
    println!("Graph: {}", graph_path.unwrap_or("(demo)"));
    println!("Output: {}", output_path);
    println!(
        "Variables: {}, constraints: {}",
        graph.variables().len(),
        graph.constraint_count()
    );
    println!("Steps: {} at {} BPM, {} lines per beat", steps, render.bpm, render.lines_per_beat);
    println!("Seed: {}", engine.seed);
    println!();

    let mut session = Session::new(graph, engine);
    let mut tracker = NoteTracker::new(maps, render.clock(), render.ticks_per_quarter);
    let mut degraded_steps = 0;
    let mut total_violation = 0.0;
    for _ in 0..steps {
        let result = session.advance().unwrap_or_else(|e| fail("advance", e));
        if result.is_degraded() {
            degraded_steps += 1;
        }
        total_violation += result.total_violation();
        tracker.push(&result);
    }
    session.close();

    println!("Resolved {} steps ({} degraded)", steps, degraded_steps);
    println!(
        "Mean violation per step: {:.3}",
        if steps > 0 { total_violation / steps as f64 } else { 0.0 }
    );

    let tracks = tracker.finish();
    let notes: usize = tracks.iter().map(|t| t.events.len() / 2).sum();
    match write_midi(&tracks, &render, Path::new(output_path)) {
        Ok(()) => {
            let seconds = render.clock().seconds_per_step() * steps as f64;
            println!("Wrote {} notes on {} tracks, {:.1}s", notes, tracks.len(), seconds);
        }
        Err(e) => fail("MIDI output", e),
    }

    println!();
    println!("Play with: timidity {} (or any MIDI player)", output_path);
}

/// A small two-voice demo: a seeded contour that the melody follows in
/// C major with smooth motion, a consonant bass under it, and a seeded
/// velocity.
fn demo_graph(registry: Arc<ConstraintRegistry>) -> EngineResult<(DependencyGraph, Vec<NoteMap>)> {
    let mut g = DependencyGraph::new(registry);
    g.add_variable(VarDecl::int_range("contour", 60, 79).seeded())?;
    g.add_variable(VarDecl::int_range("melody", 60, 79))?;
    g.add_variable(VarDecl::int_range("bass", 36, 52).seeded())?;
    g.add_variable(VarDecl::numeric("velocity", 64.0, 112.0, 16.0).seeded())?;

    g.add_constraint(ConstraintSpec::new("in_scale", ["melody"]))?;
    g.add_constraint(ConstraintSpec::new("in_scale", ["bass"]))?;
    g.add_constraint(ConstraintSpec::new("equals", ["contour", "melody"]))?;
    g.add_constraint(
        ConstraintSpec::new("smooth_motion", ["melody", "melody"])
            .param("max_leap", 4.0)
            .weight(0.5),
    )?;
    g.add_constraint(ConstraintSpec::new("interval_at_most", ["melody", "bass"]).param("max", 24.0))?;
    g.add_constraint(ConstraintSpec::new("consonance", ["bass", "melody"]).weight(4.0))?;
    g.add_constraint(ConstraintSpec::new("smooth_motion", ["bass", "bass"]).weight(0.25))?;

    let maps = vec![
        NoteMap::new("Melody", "melody").velocity("velocity"),
        NoteMap::new("Bass", "bass").channel(1),
    ];
    Ok((g, maps))
}

fn note_maps_from_flags(args: &[String], graph: &DependencyGraph) -> Vec<NoteMap> {
    let has = |id: &str| graph.store().contains(&VarId::from(id));
    let pitch = parse_flag::<String>(args, "--pitch").or_else(|| has("pitch").then(|| "pitch".to_string()));
    let Some(pitch) = pitch else {
        return Vec::new();
    };
    let track = parse_flag::<String>(args, "--track").unwrap_or_else(|| pitch.clone());
    let mut map = NoteMap::new(track, pitch.as_str());
    let velocity = parse_flag::<String>(args, "--velocity")
        .or_else(|| has("velocity").then(|| "velocity".to_string()));
    if let Some(velocity) = velocity {
        map = map.velocity(velocity.as_str());
    }
    if let Some(channel) = parse_flag(args, "--channel") {
        map = map.channel(channel);
    }
    vec![map]
}

fn positional_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
        } else if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
        } else if !arg.starts_with("--") {
            out.push(arg.clone());
        }
    }
    out
}

fn fail(what: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error ({}): {}", what, err);
    std::process::exit(1);
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
