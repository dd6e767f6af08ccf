//! Level analysis of the output tap: a decaying peak meter and a 64-bar
//! spectrum over the last 256 samples.

use std::collections::VecDeque;
use std::f32::consts::PI;

use crossbeam_channel::Receiver;

use super::session::SinkHandle;

pub const FFT_SIZE: usize = 256;
pub const BARS: usize = 64;
const BINS: usize = FFT_SIZE / 2;
/// Per-update multiplier on the displayed peak.
const PEAK_DECAY: f32 = 0.85;
const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

pub fn block_peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Fast attack, slow decay.
pub fn decay_peak(display: f32, peak: f32) -> f32 {
    peak.max(display * PEAK_DECAY)
}

/// Magnitude to a 0..1 bar height on a -100..-30 dB scale.
fn bar_level(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0)
}

fn blackman(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| {
            let x = 2.0 * PI * n as f32 / len as f32;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

pub struct LevelAnalyser {
    frames: Receiver<Vec<f32>>,
    window: VecDeque<f32>,
    coefficients: Vec<f32>,
    smoothed: [f32; BINS],
    peak: f32,
    bars: [f32; BARS],
}

impl LevelAnalyser {
    pub fn new(tap: &SinkHandle) -> Self {
        Self {
            frames: tap.frames().clone(),
            window: VecDeque::from(vec![0.0; FFT_SIZE]),
            coefficients: blackman(FFT_SIZE),
            smoothed: [0.0; BINS],
            peak: 0.0,
            bars: [0.0; BARS],
        }
    }

    /// Drain the tap and refresh peak and bars. Call once per UI frame.
    pub fn update(&mut self) {
        let mut peak = 0.0f32;
        for block in self.frames.try_iter() {
            peak = peak.max(block_peak(&block));
            self.window.extend(block);
            let excess = self.window.len().saturating_sub(FFT_SIZE);
            self.window.drain(..excess);
        }
        self.peak = decay_peak(self.peak, peak);
        self.analyse();
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn bars(&self) -> &[f32; BARS] {
        &self.bars
    }

    fn analyse(&mut self) {
        let samples: Vec<f32> = self
            .window
            .iter()
            .zip(&self.coefficients)
            .map(|(s, w)| s * w)
            .collect();

        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (n, x) in samples.iter().enumerate() {
                let phase = 2.0 * PI * ((k * n) % FFT_SIZE) as f32 / FFT_SIZE as f32;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / FFT_SIZE as f32;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
        }

        for (i, bar) in self.bars.iter_mut().enumerate() {
            *bar = bar_level(self.smoothed[i * BINS / BARS]);
        }
    }
}
