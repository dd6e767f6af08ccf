/// Audio session backed by cpal
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{StudioError, StudioResult};
use crate::util::lock;

pub mod analyser;
mod engine;
pub mod recorder;
pub mod session;
pub mod voice;

pub use analyser::LevelAnalyser;
pub use engine::{AudioCommand, Renderer};
pub use recorder::{recording_path, Recorder, RecordingSummary};
pub use session::{AudioSession, ClockState, PlayedVoice, RecordingSession, SinkHandle, SinkId};
pub use voice::{FilterKind, FilterSpec, Ramp, VoiceSource, VoiceSpec, Waveform};

const COMMAND_QUEUE: usize = 1024;
const SINK_QUEUE: usize = 512;
const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub master_gain: f32,
    pub voice_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            master_gain: 0.8,
            voice_limit: 48,
        }
    }
}

enum Control {
    Resume(Sender<StudioResult>),
    Suspend(Sender<StudioResult>),
    Shutdown,
}

const STATE_SUSPENDED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Output device session. The cpal stream lives on its own owner thread
/// (streams are not `Send` everywhere); this handle only talks to it over channels,
/// so it can be shared with the playback thread.
pub struct CpalSession {
    commands: Sender<AudioCommand>,
    control: Sender<Control>,
    clock: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
    sample_rate: u32,
    next_sink: AtomicU32,
    owner: Mutex<Option<JoinHandle<()>>>,
}

impl CpalSession {
    /// Open the default output device. The stream starts suspended; call
    /// [`AudioSession::resume`] before scheduling sounds.
    pub fn open(options: SessionOptions) -> StudioResult<Self> {
        let (commands, command_rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
        let (control, control_rx) = crossbeam_channel::unbounded::<Control>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<StudioResult<u32>>(1);
        let clock = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let state = Arc::new(AtomicU8::new(STATE_SUSPENDED));

        let owner = {
            let clock = Arc::clone(&clock);
            let dropped = Arc::clone(&dropped);
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("stepkit-audio".into())
                .spawn(move || {
                    run_stream_owner(options, command_rx, control_rx, ready_tx, clock, dropped, state)
                })
                .map_err(|e| StudioError::ClockUnavailable(format!("audio thread: {}", e)))?
        };

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| StudioError::ClockUnavailable("audio thread exited".into()))??;

        log::info!("audio session open at {} Hz", sample_rate);

        Ok(Self {
            commands,
            control,
            clock,
            dropped,
            state,
            sample_rate,
            next_sink: AtomicU32::new(1),
            owner: Mutex::new(Some(owner)),
        })
    }

    /// Pause the device clock; pending voices resume with it.
    pub fn suspend(&self) -> StudioResult {
        self.request(Control::Suspend)
    }

    pub fn set_master_gain(&self, gain: f32) {
        let _ = self.commands.try_send(AudioCommand::SetMasterGain(gain));
    }

    fn request(&self, make: fn(Sender<StudioResult>) -> Control) -> StudioResult {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.control
            .send(make(reply_tx))
            .map_err(|_| StudioError::ClockUnavailable("audio session closed".into()))?;
        reply_rx
            .recv()
            .map_err(|_| StudioError::ClockUnavailable("audio session closed".into()))?
    }
}

impl AudioSession for CpalSession {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ClockState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => ClockState::Running,
            STATE_SUSPENDED => ClockState::Suspended,
            _ => ClockState::Closed,
        }
    }

    fn resume(&self) -> StudioResult {
        match self.state() {
            ClockState::Running => Ok(()),
            ClockState::Closed => Err(StudioError::ClockUnavailable("audio session closed".into())),
            ClockState::Suspended => self.request(Control::Resume),
        }
    }

    fn create_sink(&self) -> StudioResult<SinkHandle> {
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = crossbeam_channel::bounded(SINK_QUEUE);
        self.commands
            .try_send(AudioCommand::AddSink { id, tx })
            .map_err(|e| StudioError::SynthesisNodeAllocationFailed(format!("sink: {}", e)))?;
        Ok(SinkHandle::new(id, rx))
    }

    fn create_tap(&self) -> StudioResult<SinkHandle> {
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = crossbeam_channel::bounded(SINK_QUEUE);
        self.commands
            .try_send(AudioCommand::AddTap { id, tx })
            .map_err(|e| StudioError::SynthesisNodeAllocationFailed(format!("tap: {}", e)))?;
        Ok(SinkHandle::new(id, rx))
    }

    fn dropped_voices(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    fn play(&self, voice: VoiceSpec, at: f64, sink: Option<&SinkHandle>) -> StudioResult {
        let start_frame = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.commands
            .try_send(AudioCommand::Play {
                voice,
                start_frame,
                sink: sink.map(SinkHandle::id),
            })
            .map_err(|e| StudioError::SynthesisNodeAllocationFailed(e.to_string()))
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(owner) = lock(&self.owner).take() {
            let _ = owner.join();
        }
        log::info!("audio session closed");
    }
}

fn run_stream_owner(
    options: SessionOptions,
    command_rx: Receiver<AudioCommand>,
    control_rx: Receiver<Control>,
    ready_tx: Sender<StudioResult<u32>>,
    clock: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
) {
    let (stream, sample_rate) = match setup_audio_stream(options, command_rx, clock, dropped) {
        Ok(built) => built,
        Err(e) => {
            state.store(STATE_CLOSED, Ordering::Release);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    // Some hosts start streams on build; the session begins suspended either way.
    let _ = stream.pause();
    let _ = ready_tx.send(Ok(sample_rate));

    for control in control_rx.iter() {
        match control {
            Control::Resume(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| StudioError::ClockUnavailable(e.to_string()));
                if result.is_ok() {
                    state.store(STATE_RUNNING, Ordering::Release);
                }
                let _ = reply.send(result);
            }
            Control::Suspend(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| StudioError::ClockUnavailable(e.to_string()));
                if result.is_ok() {
                    state.store(STATE_SUSPENDED, Ordering::Release);
                }
                let _ = reply.send(result);
            }
            Control::Shutdown => break,
        }
    }

    state.store(STATE_CLOSED, Ordering::Release);
}

fn setup_audio_stream(
    options: SessionOptions,
    command_rx: Receiver<AudioCommand>,
    clock: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
) -> StudioResult<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| StudioError::ClockUnavailable("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| StudioError::ClockUnavailable(e.to_string()))?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    let mut renderer = Renderer::new(sample_rate, options.voice_limit, options.master_gain);
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                while let Ok(cmd) = command_rx.try_recv() {
                    renderer.handle_cmd(cmd);
                }

                let n_frames = data.len() / channels;
                mono.resize(n_frames, 0.0);
                renderer.render_block(&mut mono);

                for (frame, sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                    frame.fill(*sample);
                }
                clock.store(renderer.frame(), Ordering::Release);
                dropped.store(renderer.dropped_voices(), Ordering::Release);
            },
            |err| log::error!("audio stream error: {}", err),
            None,
        ),
        other => {
            return Err(StudioError::ClockUnavailable(format!(
                "unsupported sample format {:?} (only f32 is supported)",
                other
            )))
        }
    }
    .map_err(|e| StudioError::ClockUnavailable(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Turns the running dropped-voice total into at most one warning per second.
/// Polled from the UI thread; the render callback never logs.
#[derive(Debug, Default)]
pub struct DropWatch {
    reported: u64,
    last_report: Option<Instant>,
}

impl DropWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many voices were dropped since the last report, if a
    /// report is due.
    pub fn check(&mut self, total: u64, now: Instant) -> Option<u64> {
        if total <= self.reported {
            return None;
        }
        if let Some(last) = self.last_report {
            if now.duration_since(last) < DROP_REPORT_INTERVAL {
                return None;
            }
        }
        let fresh = total - self.reported;
        self.reported = total;
        self.last_report = Some(now);
        log::warn!("voice pool full: {} voices dropped", fresh);
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_watch_reports_once_per_interval() {
        let mut watch = DropWatch::new();
        let t0 = Instant::now();
        assert_eq!(watch.check(0, t0), None);
        assert_eq!(watch.check(3, t0), Some(3));
        assert_eq!(watch.check(5, t0 + Duration::from_millis(200)), None);
        assert_eq!(watch.check(9, t0 + Duration::from_millis(1200)), Some(6));
        assert_eq!(watch.check(9, t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_drop_watch_reads_session_total() {
        let session = RecordingSession::default();
        session.fail_play(true);
        let voice = VoiceSpec {
            source: VoiceSource::Oscillator {
                waveform: Waveform::Sine,
                frequency: Ramp::constant(220.0),
            },
            filter: None,
            gain: Ramp::constant(0.2),
            duration: 0.1,
        };
        let _ = session.play(voice.clone(), 0.0, None);
        let _ = session.play(voice, 0.0, None);

        let mut watch = DropWatch::new();
        assert_eq!(watch.check(session.dropped_voices(), Instant::now()), Some(2));
    }
}
