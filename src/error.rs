//! Error type shared by the sequencer, synth and audio session.

use std::fmt;

/// Result type for studio operations.
pub type StudioResult<T = ()> = Result<T, StudioError>;

#[derive(Debug, Clone, PartialEq)]
pub enum StudioError {
    /// The audio clock could not be created or resumed. Playback does not begin.
    ClockUnavailable(String),
    /// A single hit could not get a voice. Absorbed by the sequencer loop.
    SynthesisNodeAllocationFailed(String),
    /// A grid cell outside `0..steps` was addressed.
    InvalidCellIndex { step: usize, steps: usize },
    Midi(String),
    Recording(String),
}

impl fmt::Display for StudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudioError::ClockUnavailable(msg) => write!(f, "audio clock unavailable: {}", msg),
            StudioError::SynthesisNodeAllocationFailed(msg) => {
                write!(f, "could not allocate synthesis voice: {}", msg)
            }
            StudioError::InvalidCellIndex { step, steps } => {
                write!(f, "step {} is out of range (grid has {} steps)", step, steps)
            }
            StudioError::Midi(msg) => write!(f, "midi: {}", msg),
            StudioError::Recording(msg) => write!(f, "recording: {}", msg),
        }
    }
}

impl std::error::Error for StudioError {}

impl From<hound::Error> for StudioError {
    fn from(e: hound::Error) -> Self {
        StudioError::Recording(e.to_string())
    }
}
