// Render configuration, loaded from JSON with serde defaults.
//
// Everything that shapes how resolved steps become sound or a file, but not
// which values get resolved: tempo, step resolution, MIDI tick resolution,
// the instrument program and the depth of the real-time feed.

use crate::clock::StepClock;
use crate::error::MusicResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Tempo in beats per minute.
    pub bpm: f64,
    /// Steps (tracker lines) per beat.
    pub lines_per_beat: u32,
    /// MIDI resolution of written files.
    pub ticks_per_quarter: u16,
    /// General MIDI program for every note track (0 = acoustic grand).
    pub program: u8,
    /// Results buffered between producer and render thread.
    pub feed_capacity: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            lines_per_beat: 4,
            ticks_per_quarter: 480,
            program: 0,
            feed_capacity: 16,
        }
    }
}

impl RenderConfig {
    pub fn clock(&self) -> StepClock {
        StepClock::new(self.bpm, self.lines_per_beat)
    }

    pub fn from_json_str(json: &str) -> MusicResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> MusicResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}
