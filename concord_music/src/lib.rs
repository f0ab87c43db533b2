// Concord music adapters
//
// Everything between the evaluation engine and the outside world of sound:
// turning resolution results into parameter and note events, writing and
// reading Standard MIDI Files, handing results to a real-time render thread,
// and calibrating constraint weights against reference material.
//
// Architecture:
// - clock.rs: StepClock (steps ↔ seconds ↔ MIDI ticks)
// - params.rs: ParameterMap → timed ParameterEvents
// - notes.rs: NoteMap + NoteTracker → note-on/note-off events per track
// - midi.rs: SMF format 1 writer (tempo track + one track per note map)
// - feed.rs: Lock-free SPSC result feed (drop on overflow, repeat on underrun)
// - import.rs: SMF reader quantizing notes to lines
// - trace.rs: VariableTrace from imported tracks or recorded results; compare
// - learning.rs: Weight calibration against a trace
// - config.rs: RenderConfig (JSON, serde defaults)
// - error.rs: MusicError
//
// Exporting only ever reads immutable `ResolutionResult`s; nothing here
// mutates a graph except `Calibration::apply`.

pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod import;
pub mod learning;
pub mod midi;
pub mod notes;
pub mod params;
pub mod trace;

pub use clock::StepClock;
pub use config::RenderConfig;
pub use error::{MusicError, MusicResult};
pub use feed::{FeedConsumer, FeedProducer, result_feed};
pub use import::{ImportConfig, ImportedMidi, ImportedNote, ImportedTrack, import_midi};
pub use learning::{Calibration, CalibrationConfig, calibrate, trace_loss};
pub use midi::{to_smf_bytes, write_midi};
pub use notes::{NoteEvent, NoteEventKind, NoteMap, NoteTrack, NoteTracker};
pub use params::{ParameterEvent, ParameterMap};
pub use trace::{TraceBinding, VariableTrace, compare};
