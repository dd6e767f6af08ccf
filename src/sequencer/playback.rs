/// Playback engine - coordinates timing and triggers
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use super::{Instrument, Sequencer, StepGrid, TempoSettings};
use crate::audio::{AudioSession, SinkHandle};
use crate::error::{StudioError, StudioResult};
use crate::synth::PercussionSynth;
use crate::util::lock;

/// Unpolled events beyond this are dropped.
const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StepAdvanced(usize),
    Hit { step: usize, instrument: Instrument },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// `None` while stopped: no step highlighted.
    pub current_step: Option<usize>,
}

/// One sampled step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub step: usize,
    pub armed: Vec<Instrument>,
}

/// Step pointer and play/stop state, without any timing.
#[derive(Debug, Default)]
pub struct Transport {
    state: PlaybackState,
    next_step: usize,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Returns false if already playing.
    pub fn start(&mut self) -> bool {
        if self.state.is_playing {
            return false;
        }
        self.state = PlaybackState {
            is_playing: true,
            current_step: Some(0),
        };
        self.next_step = 0;
        true
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::default();
        self.next_step = 0;
    }

    /// Sample `grid` at the next step and move the pointer on, wrapping at the
    /// grid's current length. `None` when stopped.
    pub fn advance(&mut self, grid: &StepGrid) -> Option<Tick> {
        if !self.state.is_playing || grid.is_empty() {
            return None;
        }
        let step = self.next_step % grid.len();
        self.state.current_step = Some(step);
        self.next_step = (step + 1) % grid.len();
        Some(Tick {
            step,
            armed: grid.armed_at(step),
        })
    }
}

/// The single outstanding timer of a run.
struct TimerHandle {
    cancel: Sender<()>,
    worker: JoinHandle<()>,
}

impl TimerHandle {
    /// Returns once the loop has exited; no tick can fire afterwards.
    fn cancel(self) {
        let _ = self.cancel.send(());
        if self.worker.join().is_err() {
            log::error!("sequencer clock thread panicked");
        }
    }
}

struct Clock<S: AudioSession> {
    transport: Arc<Mutex<Transport>>,
    grid: Arc<Mutex<StepGrid>>,
    tempo: Arc<Mutex<TempoSettings>>,
    synth: Arc<PercussionSynth<S>>,
    sink: Option<SinkHandle>,
    velocity: f32,
    events: Sender<PlaybackEvent>,
}

impl<S: AudioSession> Clock<S> {
    fn run(self, cancel: Receiver<()>) {
        loop {
            if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            // Re-read the grid every tick so edits made while playing are heard.
            let tick = {
                let grid = lock(&self.grid);
                lock(&self.transport).advance(&grid)
            };
            let Some(tick) = tick else { break };
            self.fire(&tick);

            // Tempo is read when scheduling, so a change lands on the next wait.
            let interval = lock(&self.tempo).interval();
            match cancel.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("sequencer clock exited");
    }

    fn fire(&self, tick: &Tick) {
        let at = self.synth.session().current_time();
        log::debug!("step {} at {:.3}s: {:?}", tick.step, at, tick.armed);
        self.emit(PlaybackEvent::StepAdvanced(tick.step));

        for instrument in &tick.armed {
            if let Err(e) = self
                .synth
                .trigger_at(instrument.drum(), at, self.velocity, self.sink.as_ref())
            {
                log::warn!("step {}: dropped {} hit: {}", tick.step, instrument.id(), e);
            }
            self.emit(PlaybackEvent::Hit {
                step: tick.step,
                instrument: *instrument,
            });
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::debug!("event queue full, dropped {:?}", event);
        }
    }
}

pub struct PlaybackEngine {
    sender: Sender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
    transport: Arc<Mutex<Transport>>,
    timer: Option<TimerHandle>,
    velocity: f32,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_QUEUE);

        Self {
            sender,
            receiver,
            transport: Arc::new(Mutex::new(Transport::new())),
            timer: None,
            velocity: 1.0,
        }
    }

    /// Gain scale for sequencer hits.
    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity.clamp(0.0, 1.0);
        self
    }

    /// Resume the session clock, then fire step 0 immediately and every
    /// following step one interval after the previous one. No-op while running.
    pub fn start<S: AudioSession + 'static>(
        &mut self,
        sequencer: &Sequencer,
        synth: Arc<PercussionSynth<S>>,
        sink: Option<SinkHandle>,
    ) -> StudioResult {
        if self.timer.is_some() {
            return Ok(());
        }

        synth.session().resume().map_err(|e| match e {
            StudioError::ClockUnavailable(_) => e,
            other => StudioError::ClockUnavailable(other.to_string()),
        })?;

        if !lock(&self.transport).start() {
            return Ok(());
        }

        let clock = Clock {
            transport: Arc::clone(&self.transport),
            grid: Arc::clone(sequencer.grid_state()),
            tempo: Arc::clone(sequencer.tempo_state()),
            synth,
            sink,
            velocity: self.velocity,
            events: self.sender.clone(),
        };
        let (cancel, cancel_rx) = crossbeam_channel::bounded(1);

        let worker = thread::Builder::new()
            .name("stepkit-clock".into())
            .spawn(move || clock.run(cancel_rx));

        match worker {
            Ok(worker) => {
                log::info!("playback started at {} bpm", sequencer.bpm());
                self.timer = Some(TimerHandle { cancel, worker });
                Ok(())
            }
            Err(e) => {
                lock(&self.transport).stop();
                Err(StudioError::ClockUnavailable(format!("clock thread: {}", e)))
            }
        }
    }

    pub fn stop(&mut self) {
        // A clock that has not ticked yet sees the stopped transport and exits.
        lock(&self.transport).stop();
        if let Some(timer) = self.timer.take() {
            timer.cancel();
            log::info!("playback stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock(&self.transport).state()
    }

    /// Drain pending events. Poll regularly: the queue is bounded and newer
    /// events are dropped while it is full.
    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.receiver.try_iter().collect()
    }

    /// Time until a loop of `steps` comes round again at the current tempo.
    pub fn bar_duration(sequencer: &Sequencer) -> Duration {
        let tempo = sequencer.tempo();
        tempo.interval() * tempo.steps as u32
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingSession;
    use std::time::Instant;

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn rig(bpm: u32) -> (Arc<RecordingSession>, Arc<PercussionSynth<RecordingSession>>, Sequencer) {
        let session = Arc::new(RecordingSession::new(8000));
        let synth = Arc::new(PercussionSynth::new(Arc::clone(&session)));
        let sequencer = Sequencer::new(TempoSettings {
            bpm,
            ..TempoSettings::default()
        });
        (session, synth, sequencer)
    }

    #[test]
    fn test_first_tick_is_step_zero() {
        let mut transport = Transport::new();
        let grid = StepGrid::new(16);
        assert!(transport.start());
        assert!(!transport.start());
        assert_eq!(transport.state().current_step, Some(0));
        assert_eq!(transport.advance(&grid).unwrap().step, 0);
        assert_eq!(transport.advance(&grid).unwrap().step, 1);
    }

    #[test]
    fn test_wraps_after_all_steps() {
        let mut transport = Transport::new();
        let grid = StepGrid::new(16);
        transport.start();
        let steps: Vec<usize> = (0..17).map(|_| transport.advance(&grid).unwrap().step).collect();
        assert_eq!(steps[15], 15);
        assert_eq!(steps[16], 0);
    }

    #[test]
    fn test_stopped_transport_samples_nothing() {
        let sequencer = Sequencer::default();
        sequencer.toggle_cell(0, Instrument::Kick).unwrap();
        let mut transport = Transport::new();
        transport.start();
        transport.stop();

        assert_eq!(transport.advance(&sequencer.grid()), None);
        assert_eq!(transport.state(), PlaybackState::default());
    }

    #[test]
    fn test_engine_start_then_stop_plays_nothing() {
        for _ in 0..100 {
            let (session, synth, sequencer) = rig(120);
            sequencer.toggle_cell(0, Instrument::Kick).unwrap();
            let mut engine = PlaybackEngine::new();

            engine.start(&sequencer, synth, None).unwrap();
            engine.stop();

            assert_eq!(session.play_count(), 0);
            assert_eq!(engine.playback_state(), PlaybackState::default());
            assert!(!engine.is_running());
        }
    }

    #[test]
    fn test_full_event_queue_drops_instead_of_blocking() {
        assert_eq!(PlaybackEngine::new().receiver.capacity(), Some(EVENT_QUEUE));

        let (session, synth, sequencer) = rig(120);
        let (events, receiver) = crossbeam_channel::bounded(2);
        let clock = Clock {
            transport: Arc::new(Mutex::new(Transport::new())),
            grid: Arc::clone(sequencer.grid_state()),
            tempo: Arc::clone(sequencer.tempo_state()),
            synth,
            sink: None,
            velocity: 1.0,
            events,
        };

        clock.fire(&Tick {
            step: 3,
            armed: Instrument::ALL.to_vec(),
        });

        // Kick, two snare layers, hat, tom.
        assert_eq!(session.play_count(), 5);
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![
                PlaybackEvent::StepAdvanced(3),
                PlaybackEvent::Hit {
                    step: 3,
                    instrument: Instrument::Kick
                },
            ]
        );
    }

    #[test]
    fn test_live_edit_is_heard_on_next_pass() {
        let sequencer = Sequencer::default();
        let mut transport = Transport::new();
        transport.start();
        for _ in 0..5 {
            let grid = sequencer.grid_state().lock().unwrap();
            transport.advance(&grid);
        }
        assert_eq!(transport.state().current_step, Some(4));

        sequencer.toggle_cell(5, Instrument::Snare).unwrap();
        let grid = sequencer.grid_state().lock().unwrap();
        let tick = transport.advance(&grid).unwrap();
        assert_eq!(tick.step, 5);
        assert_eq!(tick.armed, vec![Instrument::Snare]);
    }

    #[test]
    fn test_kick_and_snare_bar_at_120_bpm() {
        let sequencer = Sequencer::default();
        sequencer.toggle_cell(0, Instrument::Kick).unwrap();
        sequencer.toggle_cell(4, Instrument::Snare).unwrap();
        let interval = sequencer.tempo().interval_ms();
        assert_eq!(interval, 125.0);

        let mut transport = Transport::new();
        transport.start();
        let grid = sequencer.grid();
        let mut hits = Vec::new();
        for i in 0..32 {
            let tick = transport.advance(&grid).unwrap();
            for inst in tick.armed {
                hits.push((i as f64 * interval, tick.step, inst));
            }
        }

        assert_eq!(
            hits,
            vec![
                (0.0, 0, Instrument::Kick),
                (500.0, 4, Instrument::Snare),
                (2000.0, 0, Instrument::Kick),
                (2500.0, 4, Instrument::Snare),
            ]
        );
        assert_eq!(PlaybackEngine::bar_duration(&sequencer), Duration::from_millis(2000));
    }

    #[test]
    fn test_pointer_follows_shrunk_grid() {
        let mut transport = Transport::new();
        transport.start();
        let long = StepGrid::new(16);
        for _ in 0..10 {
            transport.advance(&long);
        }
        let short = StepGrid::new(8);
        assert_eq!(transport.advance(&short).unwrap().step, 2);
    }

    #[test]
    fn test_clock_failure_keeps_engine_stopped() {
        let (session, synth, sequencer) = rig(120);
        session.fail_resume(true);
        let mut engine = PlaybackEngine::new();

        let err = engine.start(&sequencer, synth, None).unwrap_err();
        assert!(matches!(err, StudioError::ClockUnavailable(_)));
        assert!(!engine.is_running());
        assert_eq!(engine.playback_state(), PlaybackState::default());
        assert_eq!(session.play_count(), 0);
    }

    #[test]
    fn test_engine_plays_step_zero_first() {
        let (session, synth, sequencer) = rig(200);
        sequencer.toggle_cell(0, Instrument::Kick).unwrap();
        let sink = session.create_sink().unwrap();
        let mut engine = PlaybackEngine::new();

        engine.start(&sequencer, synth, Some(sink.clone())).unwrap();
        assert!(wait_for(Duration::from_secs(1), || session.play_count() >= 1));
        engine.stop();

        let events = engine.poll_events();
        assert_eq!(events[0], PlaybackEvent::StepAdvanced(0));
        assert_eq!(
            events[1],
            PlaybackEvent::Hit {
                step: 0,
                instrument: Instrument::Kick
            }
        );
        assert_eq!(session.played()[0].sink, Some(sink.id()));
        assert_eq!(engine.playback_state(), PlaybackState::default());
    }

    #[test]
    fn test_no_ticks_after_stop() {
        let (session, synth, sequencer) = rig(200);
        for step in 0..16 {
            sequencer.toggle_cell(step, Instrument::Kick).unwrap();
        }
        let mut engine = PlaybackEngine::new();
        engine.start(&sequencer, synth, None).unwrap();
        assert!(wait_for(Duration::from_secs(1), || session.play_count() >= 2));

        engine.stop();
        let after_stop = session.play_count();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(session.play_count(), after_stop);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_second_start_is_ignored() {
        let (_session, synth, sequencer) = rig(60);
        let mut engine = PlaybackEngine::new();
        engine.start(&sequencer, Arc::clone(&synth), None).unwrap();
        engine.start(&sequencer, synth, None).unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.stop();

        let starts = engine
            .poll_events()
            .into_iter()
            .filter(|e| *e == PlaybackEvent::StepAdvanced(0))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_failed_hits_do_not_stop_the_loop() {
        let (session, synth, sequencer) = rig(200);
        for step in 0..16 {
            sequencer.toggle_cell(step, Instrument::Tom).unwrap();
        }
        session.fail_play(true);
        let mut engine = PlaybackEngine::new();
        engine.start(&sequencer, synth, None).unwrap();

        let mut steps = 0;
        let advanced = wait_for(Duration::from_secs(2), || {
            steps += engine
                .poll_events()
                .iter()
                .filter(|e| matches!(e, PlaybackEvent::StepAdvanced(_)))
                .count();
            steps >= 3
        });
        engine.stop();
        assert!(advanced);
        assert_eq!(session.play_count(), 0);
    }

    #[test]
    fn test_tempo_change_applies_after_pending_wait() {
        let (session, synth, sequencer) = rig(60);
        for step in 0..16 {
            sequencer.toggle_cell(step, Instrument::Kick).unwrap();
        }
        let mut engine = PlaybackEngine::new();
        engine.start(&sequencer, synth, None).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = 0;
        let mut hits = Vec::new();
        while hits.len() < 3 && Instant::now() < deadline {
            let count = session.play_count();
            if count > seen {
                seen = count;
                hits.push(Instant::now());
                if hits.len() == 1 {
                    // Let the clock start its 250ms wait first.
                    thread::sleep(Duration::from_millis(50));
                    sequencer.set_bpm(200);
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
        engine.stop();

        assert_eq!(hits.len(), 3);
        let pending = hits[1] - hits[0];
        let next = hits[2] - hits[1];
        assert!(pending >= Duration::from_millis(220), "pending wait was {:?}", pending);
        assert!(next <= Duration::from_millis(150), "next wait was {:?}", next);
    }
}
