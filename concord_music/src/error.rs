// Errors for export, import and calibration.
//
// Engine errors pass through unchanged (`Engine`), so a CLI can report a bad
// graph file and a bad MIDI file through one type.

use concord_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("MIDI error: {0}")]
    Midi(#[from] midly::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no imported track named `{0}`")]
    UnknownTrack(String),

    #[error("SMPTE timecode timing is not supported; expected ticks per quarter note")]
    UnsupportedTiming,
}

pub type MusicResult<T> = Result<T, MusicError>;
