//! Audio session: the clock and voice graph every sound is scheduled against.
//!
//! An `AudioSession` is created once by the application and handed to the synth
//! and the playback engine by `Arc`. `CpalSession` drives a real output device;
//! `RecordingSession` keeps every request in memory so sequencing and synthesis
//! can be tested without a sound card.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use super::voice::VoiceSpec;
use crate::error::{StudioError, StudioResult};
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub u32);

/// Read-only handle to a secondary bus. Every voice routed here is also
/// heard on the default output.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    id: SinkId,
    frames: Receiver<Vec<f32>>,
}

impl SinkHandle {
    pub fn new(id: SinkId, frames: Receiver<Vec<f32>>) -> Self {
        Self { id, frames }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Mono blocks mixed from the voices routed to this sink.
    pub fn frames(&self) -> &Receiver<Vec<f32>> {
        &self.frames
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Suspended,
    Running,
    Closed,
}

pub trait AudioSession: Send + Sync {
    /// Seconds on the audio clock. Only advances while running.
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    fn state(&self) -> ClockState;

    /// Start the clock if it is suspended. Blocks until the device answers.
    fn resume(&self) -> StudioResult;

    fn create_sink(&self) -> StudioResult<SinkHandle>;

    /// A bus carrying the finished output mix, for metering.
    fn create_tap(&self) -> StudioResult<SinkHandle>;

    /// Voices that were accepted but never sounded because the pool was full.
    fn dropped_voices(&self) -> u64;

    /// Schedule one voice at clock time `at`, on the default output and on `sink`.
    fn play(&self, voice: VoiceSpec, at: f64, sink: Option<&SinkHandle>) -> StudioResult;
}

/// One `play` call as seen by a [`RecordingSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedVoice {
    pub voice: VoiceSpec,
    pub at: f64,
    pub sink: Option<SinkId>,
}

/// In-memory session: records voices instead of rendering them.
pub struct RecordingSession {
    sample_rate: u32,
    now: Mutex<f64>,
    running: AtomicBool,
    fail_resume: AtomicBool,
    fail_play: AtomicBool,
    dropped: AtomicU64,
    next_sink: AtomicU32,
    sinks: Mutex<Vec<(SinkId, Sender<Vec<f32>>)>>,
    played: Mutex<Vec<PlayedVoice>>,
}

impl RecordingSession {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            now: Mutex::new(0.0),
            running: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            next_sink: AtomicU32::new(1),
            sinks: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
        }
    }

    pub fn set_time(&self, seconds: f64) {
        *lock(&self.now) = seconds;
    }

    /// Make the next `resume` calls fail, as a device that refuses to start.
    pub fn fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    /// Make `play` fail, as an exhausted voice pool.
    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<PlayedVoice> {
        lock(&self.played).clone()
    }

    pub fn play_count(&self) -> usize {
        lock(&self.played).len()
    }

    /// Push a block into a sink as the render thread would.
    pub fn feed_sink(&self, id: SinkId, block: Vec<f32>) {
        if let Some((_, tx)) = lock(&self.sinks).iter().find(|(sid, _)| *sid == id) {
            let _ = tx.send(block);
        }
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl AudioSession for RecordingSession {
    fn current_time(&self) -> f64 {
        *lock(&self.now)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ClockState {
        if self.running.load(Ordering::SeqCst) {
            ClockState::Running
        } else {
            ClockState::Suspended
        }
    }

    fn resume(&self) -> StudioResult {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(StudioError::ClockUnavailable("device refused to start".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_sink(&self) -> StudioResult<SinkHandle> {
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.sinks).push((id, tx));
        Ok(SinkHandle::new(id, rx))
    }

    fn create_tap(&self) -> StudioResult<SinkHandle> {
        self.create_sink()
    }

    /// Counts rejected `play` calls.
    fn dropped_voices(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn play(&self, voice: VoiceSpec, at: f64, sink: Option<&SinkHandle>) -> StudioResult {
        if self.fail_play.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Err(StudioError::SynthesisNodeAllocationFailed("voice pool exhausted".into()));
        }
        lock(&self.played).push(PlayedVoice {
            voice,
            at,
            sink: sink.map(SinkHandle::id),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::{Ramp, VoiceSource, Waveform};

    fn blip() -> VoiceSpec {
        VoiceSpec {
            source: VoiceSource::Oscillator {
                waveform: Waveform::Sine,
                frequency: Ramp::constant(440.0),
            },
            filter: None,
            gain: Ramp::constant(0.1),
            duration: 0.1,
        }
    }

    #[test]
    fn test_resume_moves_clock_to_running() {
        let session = RecordingSession::default();
        assert_eq!(session.state(), ClockState::Suspended);
        session.resume().unwrap();
        assert_eq!(session.state(), ClockState::Running);
    }

    #[test]
    fn test_failed_resume_stays_suspended() {
        let session = RecordingSession::default();
        session.fail_resume(true);
        assert!(matches!(session.resume(), Err(StudioError::ClockUnavailable(_))));
        assert_eq!(session.state(), ClockState::Suspended);
    }

    #[test]
    fn test_play_records_sink_routing() {
        let session = RecordingSession::default();
        let sink = session.create_sink().unwrap();
        session.set_time(1.5);
        session.play(blip(), session.current_time(), Some(&sink)).unwrap();
        session.play(blip(), 2.0, None).unwrap();

        let played = session.played();
        assert_eq!(played[0].at, 1.5);
        assert_eq!(played[0].sink, Some(sink.id()));
        assert_eq!(played[1].sink, None);
    }

    #[test]
    fn test_rejected_plays_are_counted() {
        let session = RecordingSession::default();
        session.play(blip(), 0.0, None).unwrap();
        session.fail_play(true);
        assert!(session.play(blip(), 0.0, None).is_err());
        assert!(session.play(blip(), 0.0, None).is_err());
        assert_eq!(session.dropped_voices(), 2);
        assert_eq!(session.play_count(), 1);
    }

    #[test]
    fn test_feed_sink_reaches_handle() {
        let session = RecordingSession::default();
        let sink = session.create_sink().unwrap();
        session.feed_sink(sink.id(), vec![0.5; 4]);
        assert_eq!(sink.frames().try_recv().unwrap(), vec![0.5; 4]);
    }
}
