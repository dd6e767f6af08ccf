/// stepkit - a drum step sequencer and percussion synthesizer
///
/// This library provides the pieces behind the studio app:
/// - A 4-instrument step grid with a fixed-interval playback clock
/// - Recipe-driven drum and melodic pad synthesis
/// - An audio session over cpal, plus an in-memory one for tests
/// - WAV recording of the mix and an optional MIDI mirror

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;
pub mod synth;
mod util;

// Re-export commonly used types
pub use audio::{AudioSession, CpalSession, Recorder, RecordingSession, SessionOptions, SinkHandle};
pub use config::Config;
pub use error::{StudioError, StudioResult};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use sequencer::playback::{PlaybackEngine, PlaybackEvent, PlaybackState};
pub use sequencer::{Instrument, Sequencer, TempoSettings};
pub use synth::{Drum, PercussionSynth};
