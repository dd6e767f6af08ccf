use crossbeam_channel::Sender;

use super::session::SinkId;
use super::voice::{Voice, VoiceSpec};

#[derive(Debug, Clone)]
pub enum AudioCommand {
    /// Start `voice` once the render clock reaches `start_frame`.
    Play {
        voice: VoiceSpec,
        start_frame: u64,
        sink: Option<SinkId>,
    },
    /// Register a secondary bus; its mono blocks are pushed to `tx`.
    AddSink { id: SinkId, tx: Sender<Vec<f32>> },
    /// Receive a copy of every finished output block, after master gain.
    AddTap { id: SinkId, tx: Sender<Vec<f32>> },
    SetMasterGain(f32),
}

struct ScheduledVoice {
    voice: Voice,
    start_frame: u64,
    sink: Option<SinkId>,
}

struct SinkBus {
    id: SinkId,
    tx: Sender<Vec<f32>>,
    scratch: Vec<f32>,
}

/// Mixes scheduled voices into the speaker bus and any sink buses.
/// Runs inside the audio callback, so the voice pool never grows past `voice_limit`.
pub struct Renderer {
    sample_rate: u32,
    voices: Vec<ScheduledVoice>,
    voice_limit: usize,
    sinks: Vec<SinkBus>,
    taps: Vec<(SinkId, Sender<Vec<f32>>)>,
    frame: u64,
    master_gain: f32,
    dropped: u64,
}

impl Renderer {
    pub fn new(sample_rate: u32, voice_limit: usize, master_gain: f32) -> Self {
        Self {
            sample_rate,
            voices: Vec::with_capacity(voice_limit),
            voice_limit,
            sinks: Vec::new(),
            taps: Vec::new(),
            frame: 0,
            master_gain,
            dropped: 0,
        }
    }

    /// Frames rendered so far; the session clock.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Voices discarded because the pool was full.
    pub fn dropped_voices(&self) -> u64 {
        self.dropped
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Play {
                voice,
                start_frame,
                sink,
            } => {
                if self.voices.len() >= self.voice_limit {
                    self.dropped += 1;
                    return;
                }
                self.voices.push(ScheduledVoice {
                    voice: Voice::new(voice, self.sample_rate),
                    start_frame,
                    sink,
                });
            }
            AudioCommand::AddSink { id, tx } => {
                self.sinks.retain(|bus| bus.id != id);
                self.sinks.push(SinkBus {
                    id,
                    tx,
                    scratch: Vec::new(),
                });
            }
            AudioCommand::AddTap { id, tx } => {
                self.taps.retain(|(tap, _)| *tap != id);
                self.taps.push((id, tx));
            }
            AudioCommand::SetMasterGain(gain) => self.master_gain = gain.clamp(0.0, 1.0),
        }
    }

    /// Render one mono block into `out` (overwritten) and push the matching
    /// block to every sink bus.
    pub fn render_block(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for bus in &mut self.sinks {
            bus.scratch.clear();
            bus.scratch.resize(out.len(), 0.0);
        }

        for scheduled in &mut self.voices {
            let bus = scheduled
                .sink
                .and_then(|id| self.sinks.iter_mut().position(|b| b.id == id));

            for (i, sample) in out.iter_mut().enumerate() {
                if self.frame + (i as u64) < scheduled.start_frame {
                    continue;
                }
                if scheduled.voice.is_finished() {
                    break;
                }
                let s = scheduled.voice.next_sample();
                *sample += s;
                if let Some(b) = bus {
                    self.sinks[b].scratch[i] += s;
                }
            }
        }

        self.voices.retain(|v| !v.voice.is_finished());

        for sample in out.iter_mut() {
            *sample = (*sample * self.master_gain).clamp(-1.0, 1.0);
        }
        // A disconnected or full tap just misses this block.
        self.sinks.retain(|bus| {
            !matches!(
                bus.tx.try_send(bus.scratch.clone()),
                Err(crossbeam_channel::TrySendError::Disconnected(_))
            )
        });
        self.taps.retain(|(_, tx)| {
            !matches!(
                tx.try_send(out.to_vec()),
                Err(crossbeam_channel::TrySendError::Disconnected(_))
            )
        });

        self.frame += out.len() as u64;
    }
}
