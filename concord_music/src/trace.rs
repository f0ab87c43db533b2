// Variable traces: what the variables "should" have been, step by step.
//
// A `VariableTrace` is a list of per-step value maps, index 0 being step 1.
// Traces come from imported MIDI through `TraceBinding`s (a track's notes
// become a pitch variable and, optionally, a velocity variable), or are
// recorded from a session's results. They are the reference for
// `compare` and for weight calibration.
//
// On a line where a bound track is silent the velocity variable is 0 and the
// pitch variable is absent. Where notes overlap, the most recently started
// one wins.

use crate::error::MusicResult;
use crate::import::ImportedMidi;
use concord_core::{ResolutionResult, StepValues, Value, VarId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceBinding {
    pub track: String,
    pub pitch: VarId,
    #[serde(default)]
    pub velocity: Option<VarId>,
}

impl TraceBinding {
    pub fn new(track: impl Into<String>, pitch: impl Into<VarId>) -> Self {
        Self {
            track: track.into(),
            pitch: pitch.into(),
            velocity: None,
        }
    }

    pub fn velocity(mut self, velocity: impl Into<VarId>) -> Self {
        self.velocity = Some(velocity.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableTrace {
    steps: Vec<StepValues>,
}

impl VariableTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<StepValues>) -> Self {
        Self { steps }
    }

    /// Record a stream of results (assumed consecutive from step 1).
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ResolutionResult>) -> Self {
        Self {
            steps: results.into_iter().map(|r| r.values().clone()).collect(),
        }
    }

    /// Lay imported tracks onto the step grid.
    pub fn from_midi(midi: &ImportedMidi, bindings: &[TraceBinding]) -> MusicResult<Self> {
        let tracks = bindings
            .iter()
            .map(|b| midi.track(&b.track))
            .collect::<MusicResult<Vec<_>>>()?;
        let len = tracks
            .iter()
            .flat_map(|t| t.notes.iter().map(|n| n.end_line))
            .max()
            .unwrap_or(0);

        let mut steps = vec![StepValues::new(); len as usize];
        for (binding, track) in bindings.iter().zip(tracks) {
            for (line, values) in steps.iter_mut().enumerate() {
                let line = line as u64;
                let sounding = track
                    .notes
                    .iter()
                    .filter(|n| n.begin_line <= line && line < n.end_line)
                    .max_by_key(|n| (n.begin_line, n.begin_delay));
                if let Some(velocity) = &binding.velocity {
                    let v = sounding.map_or(0, |n| n.velocity);
                    values.insert(velocity.clone(), Value::Number(f64::from(v)));
                }
                if let Some(note) = sounding {
                    values.insert(binding.pitch.clone(), Value::Number(f64::from(note.key)));
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn push(&mut self, values: StepValues) {
        self.steps.push(values);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Values of `step` (1-based).
    pub fn step(&self, step: u64) -> Option<&StepValues> {
        usize::try_from(step).ok()?.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn steps(&self) -> &[StepValues] {
        &self.steps
    }
}

/// Number of trace variables whose resolved value differs (or is missing).
pub fn compare(result: &ResolutionResult, trace_step: &StepValues) -> usize {
    trace_step
        .iter()
        .filter(|&(id, expected)| result.get(id) != Some(expected))
        .count()
}
