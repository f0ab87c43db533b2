// MIDI import: Standard MIDI Files into per-track note lists on the step grid.
//
// Each note-on is paired with the next matching note-off (same channel and
// key; a note-on with velocity 0 counts as a note-off) in first-in,
// first-out order. Notes still open at the end of a track end at the
// track's last tick.
//
// Ticks are quantized to lines (steps):
//
//     line  = trunc(tick / ticks_per_quarter * lines_per_beat)
//     delay = trunc(fractional part of the line * ticks_per_line)
//
// A note always covers at least one line. Tracks without a name are called
// `_unnamed_<track index>`; tracks with no notes are skipped.

use crate::error::{MusicError, MusicResult};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub lines_per_beat: u32,
    /// Sub-line resolution of the reported delays.
    pub ticks_per_line: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            lines_per_beat: 4,
            ticks_per_line: 6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedNote {
    pub begin_line: u64,
    pub begin_delay: u32,
    pub end_line: u64,
    pub end_delay: u32,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportedTrack {
    pub name: String,
    /// Notes in note-on order.
    pub notes: Vec<ImportedNote>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportedMidi {
    pub ticks_per_quarter: u16,
    pub tracks: Vec<ImportedTrack>,
}

impl ImportedMidi {
    pub fn track(&self, name: &str) -> MusicResult<&ImportedTrack> {
        self.tracks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| MusicError::UnknownTrack(name.to_string()))
    }
}

struct Quantizer {
    ticks_per_quarter: f64,
    lines_per_beat: f64,
    ticks_per_line: f64,
}

impl Quantizer {
    fn line(&self, tick: u64) -> (u64, u32) {
        let line = tick as f64 / self.ticks_per_quarter * self.lines_per_beat;
        let whole = line.trunc();
        (whole as u64, ((line - whole) * self.ticks_per_line).trunc() as u32)
    }
}

/// An open note waiting for its note-off.
struct Pending {
    tick: u64,
    channel: u8,
    key: u8,
    velocity: u8,
}

pub fn import_midi(bytes: &[u8], config: &ImportConfig) -> MusicResult<ImportedMidi> {
    let smf = Smf::parse(bytes)?;
    let Timing::Metrical(tpq) = smf.header.timing else {
        return Err(MusicError::UnsupportedTiming);
    };
    let ticks_per_quarter = tpq.as_int().max(1);
    let q = Quantizer {
        ticks_per_quarter: f64::from(ticks_per_quarter),
        lines_per_beat: f64::from(config.lines_per_beat.max(1)),
        ticks_per_line: f64::from(config.ticks_per_line),
    };

    let mut tracks = Vec::new();
    for (index, track) in smf.tracks.iter().enumerate() {
        let mut name: Option<String> = None;
        let mut tick: u64 = 0;
        let mut open: VecDeque<Pending> = VecDeque::new();
        // (begin tick, end tick, pending) in note-on order
        let mut closed: Vec<(u64, u64, Pending)> = Vec::new();

        for event in track {
            tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                    name = Some(String::from_utf8_lossy(raw).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => open.push_back(Pending {
                            tick,
                            channel,
                            key: key.as_int(),
                            velocity: vel.as_int(),
                        }),
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let key = key.as_int();
                            if let Some(pos) = open.iter().position(|p| p.channel == channel && p.key == key) {
                                if let Some(pending) = open.remove(pos) {
                                    closed.push((pending.tick, tick, pending));
                                }
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        for pending in open.drain(..) {
            closed.push((pending.tick, tick, pending));
        }
        if closed.is_empty() {
            continue;
        }
        closed.sort_by_key(|(begin, _, p)| (*begin, p.channel, p.key));

        let notes = closed
            .into_iter()
            .map(|(begin, end, p)| {
                let (begin_line, begin_delay) = q.line(begin);
                let (mut end_line, mut end_delay) = q.line(end);
                if end_line <= begin_line {
                    end_line = begin_line + 1;
                    end_delay = 0;
                }
                ImportedNote {
                    begin_line,
                    begin_delay,
                    end_line,
                    end_delay,
                    channel: p.channel,
                    key: p.key,
                    velocity: p.velocity,
                }
            })
            .collect::<Vec<_>>();

        let name = name.unwrap_or_else(|| format!("_unnamed_{index}"));
        debug!(track = %name, notes = notes.len(), "imported track");
        tracks.push(ImportedTrack { name, notes });
    }

    Ok(ImportedMidi {
        ticks_per_quarter,
        tracks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7, u15, u28};
    use midly::{Format, Header, TrackEvent};

    fn midi(delta: u32, message: MidiMessage) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message,
            },
        }
    }

    fn on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        midi(delta, MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(vel) })
    }

    fn off(delta: u32, key: u8) -> TrackEvent<'static> {
        midi(delta, MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) })
    }

    fn encode(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(96))));
        smf.tracks = tracks;
        let mut buf = Vec::new();
        smf.write_std(&mut buf).unwrap();
        buf
    }

    #[test]
    fn quantizes_notes_to_lines() {
        let name = TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"melody")),
        };
        // tpq 96, 4 lines per beat → 24 ticks per line.
        let bytes = encode(vec![vec![
            name,
            on(0, 60, 90),
            off(24, 60),
            on(12, 62, 70),  // tick 36: line 1, half a line late
            on(0, 67, 0),    // velocity 0 note-on with nothing open: ignored
            off(60, 62),     // tick 96: line 4
        ]]);
        let imported = import_midi(&bytes, &ImportConfig::default()).unwrap();
        assert_eq!(imported.ticks_per_quarter, 96);
        let track = imported.track("melody").unwrap();
        assert_eq!(track.notes.len(), 2);
        assert_eq!((track.notes[0].begin_line, track.notes[0].end_line), (0, 1));
        assert_eq!(track.notes[0].velocity, 90);
        assert_eq!((track.notes[1].begin_line, track.notes[1].begin_delay), (1, 3));
        assert_eq!(track.notes[1].end_line, 4);
        assert_eq!(track.notes[1].key, 62);
    }

    #[test]
    fn unnamed_tracks_and_empty_tracks() {
        let bytes = encode(vec![
            Vec::new(),
            vec![on(0, 48, 100), on(0, 48, 0)],
        ]);
        let imported = import_midi(&bytes, &ImportConfig::default()).unwrap();
        assert_eq!(imported.tracks.len(), 1);
        assert_eq!(imported.tracks[0].name, "_unnamed_1");
        // Zero-length notes still cover one line.
        assert_eq!(imported.tracks[0].notes[0].end_line, 1);
        assert!(matches!(imported.track("drums"), Err(MusicError::UnknownTrack(_))));
    }

    #[test]
    fn garbage_is_a_midi_error() {
        assert!(matches!(
            import_midi(b"not a midi file", &ImportConfig::default()),
            Err(MusicError::Midi(_))
        ));
    }
}
