//! Percussion synthesis.
//!
//! Each drum is a [`Recipe`]: a fixed list of layers (oscillator or noise
//! source, frequency and gain envelopes, optional filter). [`play_layer`]
//! turns one layer into a voice on the session, so adding a drum means
//! adding a table entry, not new wiring.

use std::sync::Arc;

use crate::audio::{AudioSession, FilterSpec, Ramp, SinkHandle, VoiceSource, VoiceSpec, Waveform};
use crate::error::StudioResult;

pub mod pads;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Drum {
    Kick,
    Snare,
    HiHat { open: bool },
    Crash,
    Tom,
}

impl Drum {
    /// Drum-kit pads, in display order.
    pub const KIT: [Drum; 6] = [
        Drum::Kick,
        Drum::Snare,
        Drum::HiHat { open: false },
        Drum::HiHat { open: true },
        Drum::Crash,
        Drum::Tom,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Drum::Kick => "KICK",
            Drum::Snare => "SNARE",
            Drum::HiHat { open: false } => "HH (C)",
            Drum::HiHat { open: true } => "HH (O)",
            Drum::Crash => "CRASH",
            Drum::Tom => "TOM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerSource {
    Tone { waveform: Waveform, frequency: Ramp },
    /// White noise, generated fresh for every hit.
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    pub source: LayerSource,
    pub filter: Option<FilterSpec>,
    pub gain: Ramp,
    pub duration: f32,
}

impl Layer {
    /// Build the voice for one hit. `velocity` scales the gain envelope.
    pub fn voice(&self, sample_rate: u32, velocity: f32) -> VoiceSpec {
        let source = match self.source {
            LayerSource::Tone { waveform, frequency } => VoiceSource::Oscillator { waveform, frequency },
            LayerSource::Noise => VoiceSource::Buffer(white_noise(sample_rate, self.duration)),
        };
        VoiceSpec {
            source,
            filter: self.filter,
            gain: self.gain.scaled(velocity.clamp(0.0, 1.0)),
            duration: self.duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recipe {
    pub layers: &'static [Layer],
}

impl Recipe {
    /// Length of the longest layer.
    pub fn duration(&self) -> f32 {
        self.layers.iter().map(|l| l.duration).fold(0.0, f32::max)
    }
}

const KICK: &[Layer] = &[Layer {
    source: LayerSource::Tone {
        waveform: Waveform::Sine,
        frequency: Ramp::exponential(150.0, 0.01, 0.5),
    },
    filter: None,
    gain: Ramp::exponential(1.0, 0.01, 0.5),
    duration: 0.5,
}];

const SNARE: &[Layer] = &[
    Layer {
        source: LayerSource::Noise,
        filter: Some(FilterSpec::high_pass(1000.0)),
        gain: Ramp::exponential(0.8, 0.01, 0.15),
        duration: 0.15,
    },
    Layer {
        source: LayerSource::Tone {
            waveform: Waveform::Triangle,
            frequency: Ramp::exponential(200.0, 100.0, 0.1),
        },
        filter: None,
        gain: Ramp::exponential(0.7, 0.01, 0.1),
        duration: 0.1,
    },
];

const HIHAT_CLOSED: &[Layer] = &[Layer {
    source: LayerSource::Noise,
    filter: Some(FilterSpec::high_pass(7000.0)),
    gain: Ramp::exponential(0.4, 0.01, 0.05),
    duration: 0.05,
}];

const HIHAT_OPEN: &[Layer] = &[Layer {
    source: LayerSource::Noise,
    filter: Some(FilterSpec::high_pass(7000.0)),
    gain: Ramp::exponential(0.4, 0.01, 0.3),
    duration: 0.3,
}];

const CRASH: &[Layer] = &[Layer {
    source: LayerSource::Noise,
    filter: Some(FilterSpec::band_pass(5000.0, 0.5)),
    gain: Ramp::exponential(0.5, 0.01, 1.0),
    duration: 1.0,
}];

const TOM: &[Layer] = &[Layer {
    source: LayerSource::Tone {
        waveform: Waveform::Sine,
        frequency: Ramp::exponential(200.0, 80.0, 0.3),
    },
    filter: None,
    gain: Ramp::exponential(0.8, 0.01, 0.3),
    duration: 0.3,
}];

pub fn recipe(drum: Drum) -> Recipe {
    let layers = match drum {
        Drum::Kick => KICK,
        Drum::Snare => SNARE,
        Drum::HiHat { open: false } => HIHAT_CLOSED,
        Drum::HiHat { open: true } => HIHAT_OPEN,
        Drum::Crash => CRASH,
        Drum::Tom => TOM,
    };
    Recipe { layers }
}

/// `sample_rate * duration` independent samples in [-1, 1].
pub fn white_noise(sample_rate: u32, duration: f32) -> Arc<[f32]> {
    let len = (sample_rate as f32 * duration).round() as usize;
    let mut rng = fastrand::Rng::new();
    (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
}

/// Schedule one layer at clock time `at` on the default output (and `sink`).
pub fn play_layer<S: AudioSession + ?Sized>(
    session: &S,
    layer: &Layer,
    at: f64,
    velocity: f32,
    sink: Option<&SinkHandle>,
) -> StudioResult {
    let voice = layer.voice(session.sample_rate(), velocity);
    session.play(voice, at, sink)
}

/// Stateless drum voice: every call builds its own voices.
pub struct PercussionSynth<S: AudioSession> {
    session: Arc<S>,
}

impl<S: AudioSession> PercussionSynth<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Play `drum` now.
    pub fn trigger(&self, drum: Drum, velocity: f32, sink: Option<&SinkHandle>) -> StudioResult {
        self.trigger_at(drum, self.session.current_time(), velocity, sink)
    }

    /// Play every layer of `drum` at clock time `at`.
    pub fn trigger_at(
        &self,
        drum: Drum,
        at: f64,
        velocity: f32,
        sink: Option<&SinkHandle>,
    ) -> StudioResult {
        for layer in recipe(drum).layers {
            play_layer(self.session.as_ref(), layer, at, velocity, sink)?;
        }
        Ok(())
    }
}
