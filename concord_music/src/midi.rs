// MIDI output from note tracks.
//
// Converts finished `NoteTrack`s into a Standard MIDI File (SMF). Track 0
// carries the tempo; each note track follows as its own MIDI track with a
// name and a program change. Absolute event ticks from `NoteTracker` become
// delta times here.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 1 (multi-track).

use crate::clock::StepClock;
use crate::config::RenderConfig;
use crate::error::MusicResult;
use crate::notes::{NoteEventKind, NoteTrack};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;
use tracing::info;

/// Largest tempo value a Tempo meta event can carry.
const MAX_TEMPO: u32 = 0x00FF_FFFF;

/// Largest delta a single event can carry.
const MAX_DELTA: u64 = 0x0FFF_FFFF;

/// Write note tracks to a `.mid` file.
pub fn write_midi(tracks: &[NoteTrack], config: &RenderConfig, path: &Path) -> MusicResult<()> {
    let buf = to_smf_bytes(tracks, config)?;
    std::fs::write(path, &buf)?;
    info!(path = %path.display(), tracks = tracks.len(), bytes = buf.len(), "wrote MIDI file");
    Ok(())
}

/// Encode note tracks as an in-memory SMF.
pub fn to_smf_bytes(tracks: &[NoteTrack], config: &RenderConfig) -> MusicResult<Vec<u8>> {
    let smf = tracks_to_smf(tracks, config);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

fn tracks_to_smf<'a>(tracks: &'a [NoteTrack], config: &RenderConfig) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(config.ticks_per_quarter.min(0x7FFF))),
    ));

    // Track 0: tempo track
    let clock: StepClock = config.clock();
    let mut tempo_track: Track<'a> = Vec::new();
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
            clock.micros_per_quarter().min(MAX_TEMPO),
        ))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    for note_track in tracks {
        let channel = u4::new(note_track.channel.min(15));
        let mut track: Track<'a> = Vec::new();

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(note_track.name.as_bytes())),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(config.program.min(127)),
                },
            },
        });

        let mut last_tick: u64 = 0;
        for event in &note_track.events {
            let delta = event.tick.saturating_sub(last_tick).min(MAX_DELTA) as u32;
            last_tick = event.tick.max(last_tick);
            let key = u7::new(event.key.min(127));
            let message = match event.kind {
                NoteEventKind::On => MidiMessage::NoteOn {
                    key,
                    vel: u7::new(event.velocity.min(127)),
                },
                NoteEventKind::Off => MidiMessage::NoteOff { key, vel: u7::new(0) },
            };
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteEvent;

    fn note(tick: u64, kind: NoteEventKind, key: u8) -> NoteEvent {
        NoteEvent {
            tick,
            kind,
            channel: 0,
            key,
            velocity: if kind == NoteEventKind::On { 80 } else { 0 },
        }
    }

    #[test]
    fn tempo_track_plus_one_track_per_map() {
        let tracks = vec![
            NoteTrack {
                name: "lead".into(),
                channel: 0,
                events: vec![note(0, NoteEventKind::On, 60), note(120, NoteEventKind::Off, 60)],
            },
            NoteTrack {
                name: "bass".into(),
                channel: 1,
                events: Vec::new(),
            },
        ];
        let smf = tracks_to_smf(&tracks, &RenderConfig::default());
        assert_eq!(smf.tracks.len(), 3);
        // name, program, on, off, end
        assert_eq!(smf.tracks[1].len(), 5);
        assert_eq!(smf.tracks[1][3].delta.as_int(), 120);
        assert!(matches!(
            smf.tracks[0][0].kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 500_000
        ));
    }

    #[test]
    fn bytes_parse_back() {
        let tracks = vec![NoteTrack {
            name: "lead".into(),
            channel: 0,
            events: vec![note(0, NoteEventKind::On, 67), note(240, NoteEventKind::Off, 67)],
        }];
        let bytes = to_smf_bytes(&tracks, &RenderConfig::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(480)));
        assert_eq!(smf.tracks.len(), 2);
    }
}
