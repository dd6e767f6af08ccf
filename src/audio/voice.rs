use std::f32::consts::{PI, TAU};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One sample at `phase` in [0, 1).
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Exponential ramp from `start` to `end` over `time` seconds, then held at `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub start: f32,
    pub end: f32,
    pub time: f32,
}

impl Ramp {
    pub const fn exponential(start: f32, end: f32, time: f32) -> Self {
        Self { start, end, time }
    }

    pub const fn constant(value: f32) -> Self {
        Self {
            start: value,
            end: value,
            time: 0.0,
        }
    }

    pub fn value_at(&self, t: f32) -> f32 {
        if t <= 0.0 {
            return self.start;
        }
        if t >= self.time || self.time <= 0.0 {
            return self.end;
        }
        // Exponential curves need both ends non-zero and of the same sign.
        if self.start == 0.0 || self.end == 0.0 || (self.start < 0.0) != (self.end < 0.0) {
            return self.start + (self.end - self.start) * (t / self.time);
        }
        self.start * (self.end / self.start).powf(t / self.time)
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self {
            start: self.start * factor,
            end: self.end * factor,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    BandPass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub frequency: f32,
    pub q: f32,
}

impl FilterSpec {
    pub const fn high_pass(frequency: f32) -> Self {
        Self {
            kind: FilterKind::HighPass,
            frequency,
            q: std::f32::consts::FRAC_1_SQRT_2,
        }
    }

    pub const fn band_pass(frequency: f32, q: f32) -> Self {
        Self {
            kind: FilterKind::BandPass,
            frequency,
            q,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceSource {
    Oscillator { waveform: Waveform, frequency: Ramp },
    /// Pre-rendered samples at the session rate, played once.
    Buffer(Arc<[f32]>),
}

/// Everything the render thread needs to play one layer of a sound.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSpec {
    pub source: VoiceSource,
    pub filter: Option<FilterSpec>,
    pub gain: Ramp,
    /// Seconds until the voice stops.
    pub duration: f32,
}

/// RBJ cookbook biquad, direct form I.
#[derive(Debug, Clone)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn new(spec: &FilterSpec, sample_rate: f32) -> Self {
        let freq = spec.frequency.clamp(1.0, sample_rate * 0.49);
        let q = spec.q.max(0.01);
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2) = match spec.kind {
            FilterKind::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
            ),
            FilterKind::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// A playing instance of a [`VoiceSpec`].
#[derive(Debug, Clone)]
pub struct Voice {
    spec: VoiceSpec,
    filter: Option<Biquad>,
    sample_rate: f32,
    total_frames: u64,
    elapsed: u64,
    phase: f32,
}

impl Voice {
    pub fn new(spec: VoiceSpec, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f32;
        let filter = spec.filter.as_ref().map(|f| Biquad::new(f, sample_rate));
        let total_frames = (spec.duration.max(0.0) * sample_rate).round() as u64;
        Self {
            spec,
            filter,
            sample_rate,
            total_frames,
            elapsed: 0,
            phase: 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.total_frames
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let t = self.elapsed as f32 / self.sample_rate;

        let raw = match &self.spec.source {
            VoiceSource::Oscillator { waveform, frequency } => {
                let s = waveform.sample(self.phase);
                self.phase += frequency.value_at(t) / self.sample_rate;
                self.phase -= self.phase.floor();
                s
            }
            VoiceSource::Buffer(data) => data.get(self.elapsed as usize).copied().unwrap_or(0.0),
        };

        let filtered = match self.filter.as_mut() {
            Some(f) => f.process(raw),
            None => raw,
        };

        self.elapsed += 1;
        filtered * self.spec.gain.value_at(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn kick() -> VoiceSpec {
        VoiceSpec {
            source: VoiceSource::Oscillator {
                waveform: Waveform::Sine,
                frequency: Ramp::exponential(150.0, 0.01, 0.5),
            },
            filter: None,
            gain: Ramp::exponential(1.0, 0.01, 0.5),
            duration: 0.5,
        }
    }

    #[test]
    fn test_ramp_endpoints() {
        let ramp = Ramp::exponential(200.0, 100.0, 0.1);
        assert_eq!(ramp.value_at(0.0), 200.0);
        assert_eq!(ramp.value_at(0.1), 100.0);
        assert_eq!(ramp.value_at(5.0), 100.0);
        let mid = ramp.value_at(0.05);
        assert!((mid - 141.42).abs() < 0.1, "geometric midpoint, got {}", mid);
    }

    #[test]
    fn test_voice_stops_after_duration() {
        let mut voice = Voice::new(kick(), RATE);
        let mut frames = 0;
        while !voice.is_finished() {
            voice.next_sample();
            frames += 1;
        }
        assert_eq!(frames, RATE as usize / 2);
        assert_eq!(voice.next_sample(), 0.0);
    }

    #[test]
    fn test_kick_decays() {
        let mut voice = Voice::new(kick(), RATE);
        let samples: Vec<f32> = (0..RATE / 2).map(|_| voice.next_sample()).collect();
        let head = rms(&samples[..2400]);
        let tail = rms(&samples[samples.len() - 2400..]);
        assert!(head > 0.3);
        assert!(tail < head * 0.1);
    }

    #[test]
    fn test_high_pass_removes_dc() {
        let spec = VoiceSpec {
            source: VoiceSource::Buffer(vec![1.0; RATE as usize].into()),
            filter: Some(FilterSpec::high_pass(1000.0)),
            gain: Ramp::constant(1.0),
            duration: 1.0,
        };
        let mut voice = Voice::new(spec, RATE);
        let samples: Vec<f32> = (0..RATE).map(|_| voice.next_sample()).collect();
        assert!(rms(&samples[RATE as usize / 2..]) < 1e-3);
    }

    #[test]
    fn test_band_pass_passes_center_frequency() {
        let spec = VoiceSpec {
            source: VoiceSource::Oscillator {
                waveform: Waveform::Sine,
                frequency: Ramp::constant(5000.0),
            },
            filter: Some(FilterSpec::band_pass(5000.0, 0.5)),
            gain: Ramp::constant(1.0),
            duration: 0.2,
        };
        let mut voice = Voice::new(spec, RATE);
        let samples: Vec<f32> = (0..RATE / 5).map(|_| voice.next_sample()).collect();
        // Unfiltered sine RMS is ~0.707; peak gain of this band-pass is 0 dB.
        assert!(rms(&samples[RATE as usize / 10..]) > 0.6);
    }
}
