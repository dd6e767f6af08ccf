use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::sequencer::{TempoSettings, MAX_BPM, MAX_STEPS, MIN_BPM};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    sequencer: SequencerConfig,
    #[serde(default)]
    audio: AudioConfig,
    #[serde(default)]
    midi: MidiConfig,
    #[serde(default)]
    recording: RecordingConfig,
}

#[derive(Deserialize, Default)]
struct SequencerConfig {
    bpm: Option<u32>,
    steps: Option<usize>,
    time_signature: Option<[u8; 2]>,
    velocity: Option<f32>,
}

#[derive(Deserialize, Default)]
struct AudioConfig {
    master_gain: Option<f32>,
    voice_limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    port: Option<String>,
}

#[derive(Deserialize, Default)]
struct RecordingConfig {
    directory: Option<PathBuf>,
}

pub struct Config {
    sequencer: SequencerConfig,
    audio: AudioConfig,
    midi: MidiConfig,
    recording: RecordingConfig,
}

impl Config {
    /// Embedded defaults overlaid with `<config dir>/stepkit/config.toml`.
    pub fn load() -> Self {
        match user_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::embedded(),
        }
    }

    /// Embedded defaults overlaid with the file at `path`, if it exists and parses.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::embedded();

        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                    Ok(user) => config.merge(user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                }
            }
        }

        config
    }

    fn embedded() -> Self {
        let base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        Config {
            sequencer: base.sequencer,
            audio: base.audio,
            midi: base.midi,
            recording: base.recording,
        }
    }

    fn merge(&mut self, user: ConfigFile) {
        merge_sequencer(&mut self.sequencer, user.sequencer);
        merge_audio(&mut self.audio, user.audio);
        if user.midi.port.is_some() {
            self.midi.port = user.midi.port;
        }
        if user.recording.directory.is_some() {
            self.recording.directory = user.recording.directory;
        }
    }

    pub fn tempo(&self) -> TempoSettings {
        let fallback = TempoSettings::default();
        TempoSettings {
            bpm: self
                .sequencer
                .bpm
                .map(|bpm| bpm.clamp(MIN_BPM, MAX_BPM))
                .unwrap_or(fallback.bpm),
            time_signature: self
                .sequencer
                .time_signature
                .filter(|ts| ts[0] > 0 && ts[1] > 0)
                .map(|ts| (ts[0], ts[1]))
                .unwrap_or(fallback.time_signature),
            steps: self
                .sequencer
                .steps
                .map(|steps| steps.clamp(1, MAX_STEPS))
                .unwrap_or(fallback.steps),
        }
    }

    /// Gain scale for sequencer hits (0.0..=1.0).
    pub fn step_velocity(&self) -> f32 {
        self.sequencer.velocity.unwrap_or(0.8).clamp(0.0, 1.0)
    }

    pub fn master_gain(&self) -> f32 {
        self.audio.master_gain.unwrap_or(0.8).clamp(0.0, 1.0)
    }

    /// Maximum simultaneous voices (clamped to 4..1024).
    pub fn voice_limit(&self) -> usize {
        self.audio.voice_limit.unwrap_or(48).clamp(4, 1024)
    }

    pub fn midi_port(&self) -> Option<&str> {
        self.midi.port.as_deref()
    }

    /// Where recordings go: configured directory, else the audio dir, else cwd.
    pub fn recording_dir(&self) -> PathBuf {
        self.recording
            .directory
            .clone()
            .or_else(dirs::audio_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stepkit").join("config.toml"))
}

fn merge_sequencer(base: &mut SequencerConfig, user: SequencerConfig) {
    if user.bpm.is_some() {
        base.bpm = user.bpm;
    }
    if user.steps.is_some() {
        base.steps = user.steps;
    }
    if user.time_signature.is_some() {
        base.time_signature = user.time_signature;
    }
    if user.velocity.is_some() {
        base.velocity = user.velocity;
    }
}

fn merge_audio(base: &mut AudioConfig, user: AudioConfig) {
    if user.master_gain.is_some() {
        base.master_gain = user.master_gain;
    }
    if user.voice_limit.is_some() {
        base.voice_limit = user.voice_limit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::embedded();
        let tempo = config.tempo();
        assert_eq!(tempo.bpm, 120);
        assert_eq!(tempo.steps, 16);
        assert_eq!(tempo.time_signature, (4, 4));
        assert!((config.step_velocity() - 0.8).abs() < f32::EPSILON);
        assert!((config.master_gain() - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.voice_limit(), 48);
        assert_eq!(config.midi_port(), None);
    }

    #[test]
    fn test_user_file_overrides_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sequencer]\nbpm = 90\n\n[midi]\nport = \"Loopback\"").unwrap();

        let config = Config::load_from(file.path());
        assert_eq!(config.tempo().bpm, 90);
        assert_eq!(config.tempo().steps, 16);
        assert_eq!(config.midi_port(), Some("Loopback"));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sequencer]\nbpm = 400\nsteps = 0\nvelocity = 3.0").unwrap();

        let config = Config::load_from(file.path());
        assert_eq!(config.tempo().bpm, MAX_BPM);
        assert_eq!(config.tempo().steps, 1);
        assert!((config.step_velocity() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_malformed_user_file_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sequencer\nbpm = ").unwrap();

        let config = Config::load_from(file.path());
        assert_eq!(config.tempo().bpm, 120);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/stepkit/config.toml"));
        assert_eq!(config.tempo(), TempoSettings::default());
    }
}
