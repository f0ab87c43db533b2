// Evaluation session: drives resolver passes along the step axis.
//
// A session owns its `DependencyGraph` and walks the state machine
//
//     Idle ──start()──▶ StepReady ──advance()──▶ Advancing ──▶ StepReady …
//       └───────────────────────close()──────────────────────▶ Closed
//
// `advance()` on an Idle session starts it implicitly. Each advance bumps the
// step counter, runs one `resolver::resolve` pass against the previous
// step's values, and keeps the new result as the next step's "previous". The
// result is handed out as `Arc<ResolutionResult>` so a render thread can hold
// it while the producer moves on.
//
// Authoring between steps goes through `graph_mut()`. Because `advance()`
// takes `&mut self`, the graph cannot be edited (or the session closed)
// while a pass is running. Variables removed between steps simply stop
// appearing in results; variables added between steps start Unresolved and
// have no previous value, so recurrence constraints on them stay unbound for
// one step.
//
// **Critical constraint: determinism.** The only inputs to a pass are the
// graph, the config and the previous result. Two sessions built from equal
// graphs and configs yield bit-identical result sequences.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::DependencyGraph;
use crate::resolver::{self, ResolutionResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    StepReady,
    Advancing,
    Closed,
}

#[derive(Debug)]
pub struct Session {
    graph: DependencyGraph,
    config: EngineConfig,
    state: SessionState,
    step: u64,
    previous: Option<Arc<ResolutionResult>>,
    /// Generation of the graph at the last pass, to log edits between steps.
    seen_generation: u64,
    history: VecDeque<Arc<ResolutionResult>>,
}

impl Session {
    pub fn new(graph: DependencyGraph, config: EngineConfig) -> Self {
        let seen_generation = graph.generation();
        Self {
            graph,
            config,
            state: SessionState::Idle,
            step: 0,
            previous: None,
            seen_generation,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of the last resolved step (0 before the first advance).
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Authoring access between steps.
    pub fn graph_mut(&mut self) -> EngineResult<&mut DependencyGraph> {
        if self.state == SessionState::Closed {
            return Err(EngineError::SessionClosed);
        }
        Ok(&mut self.graph)
    }

    /// The most recent result, if any step has been resolved.
    pub fn previous(&self) -> Option<&Arc<ResolutionResult>> {
        self.previous.as_ref()
    }

    /// Retained past results, oldest first. Empty unless `lookback > 0`.
    pub fn lookback(&self) -> impl Iterator<Item = &Arc<ResolutionResult>> {
        self.history.iter()
    }

    pub fn start(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Idle => {
                info!(
                    variables = self.graph.variables().len(),
                    constraints = self.graph.constraint_count(),
                    seed = self.config.seed,
                    "session started"
                );
                self.state = SessionState::StepReady;
                Ok(())
            }
            SessionState::StepReady | SessionState::Advancing => Ok(()),
            SessionState::Closed => Err(EngineError::SessionClosed),
        }
    }

    /// Resolve the next step.
    pub fn advance(&mut self) -> EngineResult<Arc<ResolutionResult>> {
        self.start()?;
        self.state = SessionState::Advancing;
        self.step += 1;

        if self.graph.generation() != self.seen_generation {
            debug!(
                step = self.step,
                generation = self.graph.generation(),
                "graph edited since last step"
            );
            self.seen_generation = self.graph.generation();
        }

        let previous = self.previous.as_ref().map(|r| r.values());
        let result = Arc::new(resolver::resolve(&self.graph, previous, self.step, &self.config));
        if let Some(degraded) = result.degraded_step() {
            warn!(
                step = degraded.step,
                variables = degraded.variables.len(),
                "degraded step"
            );
        }

        if self.config.lookback > 0 {
            if self.history.len() == self.config.lookback {
                self.history.pop_front();
            }
            self.history.push_back(Arc::clone(&result));
        }
        self.previous = Some(Arc::clone(&result));
        self.state = SessionState::StepReady;
        Ok(result)
    }

    /// Release step state. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            info!(steps = self.step, "session closed");
        }
        self.state = SessionState::Closed;
        self.previous = None;
        self.history.clear();
    }
}
