//! Melodic pads: sixteen one-shot tones over three waveforms.

use super::{play_layer, Layer, LayerSource};
use crate::audio::{AudioSession, Ramp, SinkHandle, Waveform};
use crate::error::StudioResult;
use crate::midi::{frequency_to_midi_note, midi_note_name};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadConfig {
    pub id: u8,
    pub frequency: f32,
    pub waveform: Waveform,
}

const fn pad(id: u8, frequency: f32, waveform: Waveform) -> PadConfig {
    PadConfig {
        id,
        frequency,
        waveform,
    }
}

pub const PADS: [PadConfig; 16] = [
    pad(0, 261.63, Waveform::Sine),
    pad(1, 293.66, Waveform::Sine),
    pad(2, 329.63, Waveform::Sine),
    pad(3, 349.23, Waveform::Sine),
    pad(4, 392.0, Waveform::Sine),
    pad(5, 440.0, Waveform::Sine),
    pad(6, 493.88, Waveform::Sine),
    pad(7, 523.25, Waveform::Sine),
    pad(8, 261.63, Waveform::Square),
    pad(9, 293.66, Waveform::Square),
    pad(10, 329.63, Waveform::Square),
    pad(11, 349.23, Waveform::Square),
    pad(12, 261.63, Waveform::Sawtooth),
    pad(13, 293.66, Waveform::Sawtooth),
    pad(14, 329.63, Waveform::Sawtooth),
    pad(15, 349.23, Waveform::Sawtooth),
];

const PAD_GAIN: Ramp = Ramp::exponential(0.3, 0.01, 0.4);
const PAD_DURATION: f32 = 0.4;

impl PadConfig {
    /// "C4" for sine pads, "Sq C4" / "Sw C4" for square and sawtooth.
    pub fn label(&self) -> String {
        let note = midi_note_name(frequency_to_midi_note(self.frequency));
        match self.waveform {
            Waveform::Square => format!("Sq {}", note),
            Waveform::Sawtooth => format!("Sw {}", note),
            Waveform::Sine | Waveform::Triangle => note,
        }
    }

    pub fn layer(&self) -> Layer {
        Layer {
            source: LayerSource::Tone {
                waveform: self.waveform,
                frequency: Ramp::constant(self.frequency),
            },
            filter: None,
            gain: PAD_GAIN,
            duration: PAD_DURATION,
        }
    }
}

/// Play `pad` now on the default output (and `sink`).
pub fn play_pad<S: AudioSession + ?Sized>(
    session: &S,
    pad: &PadConfig,
    sink: Option<&SinkHandle>,
) -> StudioResult {
    play_layer(session, &pad.layer(), session.current_time(), 1.0, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingSession, VoiceSource};

    #[test]
    fn test_pad_labels() {
        let labels: Vec<String> = PADS.iter().map(PadConfig::label).collect();
        assert_eq!(labels[0], "C4");
        assert_eq!(labels[5], "A4");
        assert_eq!(labels[7], "C5");
        assert_eq!(labels[8], "Sq C4");
        assert_eq!(labels[15], "Sw F4");
    }

    #[test]
    fn test_pad_plays_one_decaying_tone() {
        let session = RecordingSession::new(8000);
        let sink = session.create_sink().unwrap();
        session.set_time(0.75);
        play_pad(&session, &PADS[9], Some(&sink)).unwrap();

        let played = session.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].at, 0.75);
        assert_eq!(played[0].voice.duration, 0.4);
        assert_eq!(played[0].voice.gain, PAD_GAIN);
        assert_eq!(
            played[0].voice.source,
            VoiceSource::Oscillator {
                waveform: Waveform::Square,
                frequency: Ramp::constant(293.66),
            }
        );
    }
}
