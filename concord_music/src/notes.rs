// Note export: a stream of results as note-on / note-off events.
//
// A `NoteMap` says which variable is a track's pitch, which (if any) is its
// velocity, and which MIDI channel it plays on. `NoteTracker` is fed results
// in step order and emits events with absolute tick positions:
//
// - every step re-articulates: a sounding note ends where the next step
//   begins, and a new note starts there if the step is not a rest
// - a step is a rest when the pitch is missing or not numeric, or the
//   velocity variable resolves to 0 (or is missing / not numeric)
// - pitches and velocities are rounded and clamped to 0..=127
//
// `finish()` closes whatever is still sounding at the end of the last step
// and hands back one `NoteTrack` per map, ready for `midi::to_smf_bytes`.

use crate::clock::StepClock;
use concord_core::{ResolutionResult, VarId};
use serde::{Deserialize, Serialize};

/// Velocity used when a track has no velocity variable.
pub const DEFAULT_VELOCITY: u8 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteMap {
    pub track: String,
    pub pitch: VarId,
    #[serde(default)]
    pub velocity: Option<VarId>,
    #[serde(default)]
    pub channel: u8,
}

impl NoteMap {
    pub fn new(track: impl Into<String>, pitch: impl Into<VarId>) -> Self {
        Self {
            track: track.into(),
            pitch: pitch.into(),
            velocity: None,
            channel: 0,
        }
    }

    pub fn velocity(mut self, velocity: impl Into<VarId>) -> Self {
        self.velocity = Some(velocity.into());
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel.min(15);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteEventKind {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub tick: u64,
    pub kind: NoteEventKind,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
}

/// Finished event list for one mapped track, in tick order.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteTrack {
    pub name: String,
    pub channel: u8,
    pub events: Vec<NoteEvent>,
}

pub struct NoteTracker {
    maps: Vec<NoteMap>,
    ticks_per_step: u64,
    clock: StepClock,
    ticks_per_quarter: u16,
    sounding: Vec<Option<u8>>,
    events: Vec<Vec<NoteEvent>>,
    /// End tick of the last pushed step.
    end_tick: u64,
}

impl NoteTracker {
    pub fn new(maps: Vec<NoteMap>, clock: StepClock, ticks_per_quarter: u16) -> Self {
        let n = maps.len();
        Self {
            maps,
            ticks_per_step: u64::from(clock.ticks_per_step(ticks_per_quarter)),
            clock,
            ticks_per_quarter,
            sounding: vec![None; n],
            events: vec![Vec::new(); n],
            end_tick: 0,
        }
    }

    pub fn maps(&self) -> &[NoteMap] {
        &self.maps
    }

    /// Append the notes of one step. Results must arrive in step order.
    pub fn push(&mut self, result: &ResolutionResult) {
        let tick = self.clock.step_tick(result.step(), self.ticks_per_quarter);
        for (i, map) in self.maps.iter().enumerate() {
            if let Some(key) = self.sounding[i].take() {
                self.events[i].push(NoteEvent {
                    tick,
                    kind: NoteEventKind::Off,
                    channel: map.channel,
                    key,
                    velocity: 0,
                });
            }

            let Some(key) = result.get(&map.pitch).and_then(|v| v.as_number()).map(to_midi) else {
                continue;
            };
            let velocity = match &map.velocity {
                Some(id) => result.get(id).and_then(|v| v.as_number()).map_or(0, to_midi),
                None => DEFAULT_VELOCITY,
            };
            if velocity == 0 {
                continue;
            }
            self.events[i].push(NoteEvent {
                tick,
                kind: NoteEventKind::On,
                channel: map.channel,
                key,
                velocity,
            });
            self.sounding[i] = Some(key);
        }
        self.end_tick = tick + self.ticks_per_step;
    }

    /// Close sounding notes and return the per-track event lists.
    pub fn finish(mut self) -> Vec<NoteTrack> {
        let end = self.end_tick;
        for (i, map) in self.maps.iter().enumerate() {
            if let Some(key) = self.sounding[i].take() {
                self.events[i].push(NoteEvent {
                    tick: end,
                    kind: NoteEventKind::Off,
                    channel: map.channel,
                    key,
                    velocity: 0,
                });
            }
        }
        self.maps
            .into_iter()
            .zip(self.events)
            .map(|(map, events)| NoteTrack {
                name: map.track,
                channel: map.channel,
                events,
            })
            .collect()
    }
}

fn to_midi(x: f64) -> u8 {
    x.round().clamp(0.0, 127.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{ConstraintRegistry, DependencyGraph, EngineConfig, Session, Value, VarDecl};
    use std::sync::Arc;

    fn pinned_session(pitches: &[(f64, f64)]) -> Vec<Arc<ResolutionResult>> {
        let mut g = DependencyGraph::new(Arc::new(ConstraintRegistry::with_builtins()));
        g.add_variable(VarDecl::int_range("pitch", 0, 127)).unwrap();
        g.add_variable(VarDecl::int_range("vel", 0, 127)).unwrap();
        let mut session = Session::new(g, EngineConfig::default());
        pitches
            .iter()
            .map(|&(p, v)| {
                let graph = session.graph_mut().unwrap();
                graph.pin(&"pitch".into(), Value::Number(p)).unwrap();
                graph.pin(&"vel".into(), Value::Number(v)).unwrap();
                session.advance().unwrap()
            })
            .collect()
    }

    #[test]
    fn each_step_is_one_note_and_rests_are_silent() {
        let results = pinned_session(&[(60.0, 90.0), (62.0, 0.0), (64.0, 80.0)]);
        let mut tracker = NoteTracker::new(
            vec![NoteMap::new("lead", "pitch").velocity("vel").channel(2)],
            StepClock::new(120.0, 4),
            480,
        );
        for r in &results {
            tracker.push(r);
        }
        let tracks = tracker.finish();
        assert_eq!(tracks.len(), 1);
        let summary: Vec<(u64, NoteEventKind, u8, u8)> = tracks[0]
            .events
            .iter()
            .map(|e| (e.tick, e.kind, e.key, e.velocity))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, NoteEventKind::On, 60, 90),
                (120, NoteEventKind::Off, 60, 0),
                (240, NoteEventKind::On, 64, 80),
                (360, NoteEventKind::Off, 64, 0),
            ]
        );
        assert!(tracks[0].events.iter().all(|e| e.channel == 2));
    }

    #[test]
    fn missing_velocity_variable_uses_default() {
        let results = pinned_session(&[(72.0, 0.0)]);
        let mut tracker = NoteTracker::new(vec![NoteMap::new("lead", "pitch")], StepClock::new(120.0, 4), 480);
        tracker.push(&results[0]);
        let tracks = tracker.finish();
        assert_eq!(tracks[0].events[0].velocity, DEFAULT_VELOCITY);
        assert_eq!(tracks[0].events[1].tick, 120);
    }
}
