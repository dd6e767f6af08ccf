/// MIDI output using midir
/// Mirrors drum hits to an external device as General MIDI percussion
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{StudioError, StudioResult};
use crate::synth::Drum;

const CLIENT_NAME: &str = "stepkit MIDI Output";
/// Channel 10, zero-based.
const DRUM_CHANNEL: u8 = 9;

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> StudioResult {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| StudioError::Midi(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| StudioError::Midi(format!("no MIDI port {}", port_index)))?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "stepkit")
            .map_err(|e| StudioError::Midi(format!("failed to connect: {}", e)))?;

        log::info!("midi output connected to {}", name);
        self.connection = Some(connection);
        self.port_name = Some(name);
        Ok(())
    }

    /// Connect to the first port whose name contains `name`; returns its index.
    pub fn connect_named(&mut self, name: &str) -> StudioResult<usize> {
        let index = Self::available_ports()
            .iter()
            .position(|p| p.contains(name))
            .ok_or_else(|| StudioError::Midi(format!("no MIDI port matching {:?}", name)))?;
        self.connect(index)?;
        Ok(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Note-on immediately followed by note-off; GM drum voices are one-shots.
    pub fn send_drum_hit(&mut self, drum: Drum, velocity: u8) -> StudioResult {
        let note = gm_drum_note(drum);
        self.send(&[0x90 | DRUM_CHANNEL, note, velocity.min(127)])?;
        self.send(&[0x80 | DRUM_CHANNEL, note, 0])
    }

    fn send(&mut self, message: &[u8]) -> StudioResult {
        if let Some(ref mut conn) = self.connection {
            conn.send(message)
                .map_err(|e| StudioError::Midi(format!("failed to send: {}", e)))?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = conn.close();
        }
        self.port_name = None;
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// General MIDI percussion key for a drum.
pub fn gm_drum_note(drum: Drum) -> u8 {
    match drum {
        Drum::Kick => 36,
        Drum::Snare => 38,
        Drum::HiHat { open: false } => 42,
        Drum::HiHat { open: true } => 46,
        Drum::Crash => 49,
        Drum::Tom => 45,
    }
}

/// Gain in [0, 1] to a MIDI velocity in 1..=127.
pub fn velocity_from_gain(gain: f32) -> u8 {
    (gain.clamp(0.0, 1.0) * 127.0).round().max(1.0) as u8
}

/// Nearest MIDI note for a frequency (A4 = 440 Hz = 69).
pub fn frequency_to_midi_note(freq: f32) -> u8 {
    if freq <= 0.0 {
        return 0;
    }
    (69.0 + 12.0 * (freq / 440.0).log2()).round().clamp(0.0, 127.0) as u8
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_note_name() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(69), "A4");
        assert_eq!(midi_note_name(61), "C#4");
        assert_eq!(midi_note_name(0), "C-1");
    }

    #[test]
    fn test_frequency_to_midi_note() {
        assert_eq!(frequency_to_midi_note(440.0), 69);
        assert_eq!(frequency_to_midi_note(261.63), 60);
        assert_eq!(frequency_to_midi_note(349.23), 65);
        assert_eq!(frequency_to_midi_note(-1.0), 0);
    }

    #[test]
    fn test_gm_drum_map() {
        assert_eq!(gm_drum_note(Drum::Kick), 36);
        assert_eq!(gm_drum_note(Drum::HiHat { open: true }), 46);
        assert_eq!(gm_drum_note(Drum::HiHat { open: false }), 42);
    }

    #[test]
    fn test_velocity_from_gain() {
        assert_eq!(velocity_from_gain(1.0), 127);
        assert_eq!(velocity_from_gain(0.8), 102);
        assert_eq!(velocity_from_gain(0.0), 1);
    }

    #[test]
    fn test_disconnected_send_is_noop() {
        let mut device = MidiOutputDevice::new();
        assert!(!device.is_connected());
        assert!(device.send_drum_hit(Drum::Snare, 100).is_ok());
    }
}
