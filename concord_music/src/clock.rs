// Step clock: maps step numbers to wall time and MIDI ticks.
//
// Steps are tracker lines. Step 1 starts at time zero; each step lasts
// `60 / (bpm * lines_per_beat)` seconds. In MIDI, a step is
// `ticks_per_quarter / lines_per_beat` ticks (a beat is a quarter note).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepClock {
    pub bpm: f64,
    pub lines_per_beat: u32,
}

impl StepClock {
    pub fn new(bpm: f64, lines_per_beat: u32) -> Self {
        Self {
            bpm,
            lines_per_beat: lines_per_beat.max(1),
        }
    }

    pub fn seconds_per_step(&self) -> f64 {
        60.0 / (self.bpm * f64::from(self.lines_per_beat))
    }

    /// Start time of `step` in seconds.
    pub fn step_start(&self, step: u64) -> f64 {
        step.saturating_sub(1) as f64 * self.seconds_per_step()
    }

    /// Length of one step in MIDI ticks, at least one tick.
    pub fn ticks_per_step(&self, ticks_per_quarter: u16) -> u32 {
        (u32::from(ticks_per_quarter) / self.lines_per_beat).max(1)
    }

    /// Start tick of `step`.
    pub fn step_tick(&self, step: u64, ticks_per_quarter: u16) -> u64 {
        step.saturating_sub(1) * u64::from(self.ticks_per_step(ticks_per_quarter))
    }

    /// MIDI tempo meta value: microseconds per quarter note.
    pub fn micros_per_quarter(&self) -> u32 {
        (60_000_000.0 / self.bpm).round() as u32
    }
}
