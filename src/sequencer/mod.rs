/// Core sequencer logic - grid state, tempo and step timing
/// The grid is shared with the playback loop, which re-reads it every tick
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{StudioError, StudioResult};
use crate::synth::Drum;
use crate::util::lock;

pub mod playback;

pub const MIN_BPM: u32 = 60;
pub const MAX_BPM: u32 = 200;
pub const DEFAULT_STEPS: usize = 16;
pub const MAX_STEPS: usize = 64;

/// One row of the step grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Kick,
    Snare,
    HiHat,
    Tom,
}

impl Instrument {
    pub const COUNT: usize = 4;
    pub const ALL: [Instrument; Instrument::COUNT] =
        [Instrument::Kick, Instrument::Snare, Instrument::HiHat, Instrument::Tom];

    pub fn index(self) -> usize {
        match self {
            Instrument::Kick => 0,
            Instrument::Snare => 1,
            Instrument::HiHat => 2,
            Instrument::Tom => 3,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Instrument::Kick => "kick",
            Instrument::Snare => "snare",
            Instrument::HiHat => "hihat",
            Instrument::Tom => "tom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Instrument::Kick => "Kick",
            Instrument::Snare => "Snare",
            Instrument::HiHat => "Hi-Hat",
            Instrument::Tom => "Tom",
        }
    }

    /// The synth voice a grid row plays. The hi-hat row is the closed hat.
    pub fn drum(self) -> Drum {
        match self {
            Instrument::Kick => Drum::Kick,
            Instrument::Snare => Drum::Snare,
            Instrument::HiHat => Drum::HiHat { open: false },
            Instrument::Tom => Drum::Tom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGrid {
    cells: Vec<[bool; Instrument::COUNT]>,
}

impl StepGrid {
    pub fn new(steps: usize) -> Self {
        Self {
            cells: vec![[false; Instrument::COUNT]; steps],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_armed(&self, step: usize, instrument: Instrument) -> bool {
        self.cells
            .get(step)
            .map(|row| row[instrument.index()])
            .unwrap_or(false)
    }

    pub fn set(&mut self, step: usize, instrument: Instrument, armed: bool) -> StudioResult {
        let steps = self.cells.len();
        let row = self
            .cells
            .get_mut(step)
            .ok_or(StudioError::InvalidCellIndex { step, steps })?;
        row[instrument.index()] = armed;
        Ok(())
    }

    /// Flip one cell and return its new value. Out-of-range steps are rejected
    /// and leave the grid untouched.
    pub fn toggle(&mut self, step: usize, instrument: Instrument) -> StudioResult<bool> {
        let armed = !self.is_armed(step, instrument);
        self.set(step, instrument, armed)?;
        Ok(armed)
    }

    /// Instruments armed at `step`, in grid row order.
    pub fn armed_at(&self, step: usize) -> Vec<Instrument> {
        Instrument::ALL
            .iter()
            .copied()
            .filter(|inst| self.is_armed(step, *inst))
            .collect()
    }

    /// Rebuild with `steps` rows, keeping every cell whose step still exists.
    pub fn resize(&mut self, steps: usize) {
        self.cells.resize(steps, [false; Instrument::COUNT]);
    }

    pub fn clear(&mut self) {
        for row in &mut self.cells {
            *row = [false; Instrument::COUNT];
        }
    }
}

impl Default for StepGrid {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoSettings {
    pub bpm: u32,
    /// Carried for display; steps are always sixteenth notes.
    pub time_signature: (u8, u8),
    pub steps: usize,
}

impl TempoSettings {
    /// Milliseconds between steps: `60000 / bpm / 4`.
    pub fn interval_ms(&self) -> f64 {
        60_000.0 / self.bpm as f64 / 4.0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_ms() / 1000.0)
    }

    pub fn bar_ms(&self) -> f64 {
        self.interval_ms() * self.steps as f64
    }
}

impl Default for TempoSettings {
    fn default() -> Self {
        Self {
            bpm: 120,
            time_signature: (4, 4),
            steps: DEFAULT_STEPS,
        }
    }
}

pub struct Sequencer {
    grid: Arc<Mutex<StepGrid>>,
    tempo: Arc<Mutex<TempoSettings>>,
}

impl Sequencer {
    pub fn new(tempo: TempoSettings) -> Self {
        let tempo = TempoSettings {
            bpm: tempo.bpm.clamp(MIN_BPM, MAX_BPM),
            steps: tempo.steps.clamp(1, MAX_STEPS),
            ..tempo
        };

        Self {
            grid: Arc::new(Mutex::new(StepGrid::new(tempo.steps))),
            tempo: Arc::new(Mutex::new(tempo)),
        }
    }

    /// Shared grid read by the playback loop on every tick.
    pub fn grid_state(&self) -> &Arc<Mutex<StepGrid>> {
        &self.grid
    }

    pub fn tempo_state(&self) -> &Arc<Mutex<TempoSettings>> {
        &self.tempo
    }

    pub fn grid(&self) -> StepGrid {
        lock(&self.grid).clone()
    }

    pub fn tempo(&self) -> TempoSettings {
        *lock(&self.tempo)
    }

    pub fn steps(&self) -> usize {
        lock(&self.grid).len()
    }

    pub fn is_armed(&self, step: usize, instrument: Instrument) -> bool {
        lock(&self.grid).is_armed(step, instrument)
    }

    pub fn toggle_cell(&self, step: usize, instrument: Instrument) -> StudioResult<bool> {
        lock(&self.grid).toggle(step, instrument)
    }

    pub fn bpm(&self) -> u32 {
        lock(&self.tempo).bpm
    }

    /// Clamp into [`MIN_BPM`, `MAX_BPM`] and return the applied value.
    /// A tick that is already pending keeps its old delay.
    pub fn set_bpm(&self, bpm: u32) -> u32 {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        lock(&self.tempo).bpm = bpm;
        bpm
    }

    /// Resize grid and tempo together so their lengths never disagree.
    pub fn set_steps(&self, steps: usize) -> usize {
        let steps = steps.clamp(1, MAX_STEPS);
        let mut grid = lock(&self.grid);
        let mut tempo = lock(&self.tempo);
        grid.resize(steps);
        tempo.steps = steps;
        steps
    }

    pub fn clear(&self) {
        lock(&self.grid).clear();
    }

    /// Calculate step duration in milliseconds
    pub fn step_duration_ms(&self) -> f64 {
        self.tempo().interval_ms()
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(TempoSettings::default())
    }
}
