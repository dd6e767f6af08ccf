#[cfg(feature = "gui")]
use std::fs::File;
#[cfg(feature = "gui")]
use std::sync::Arc;
#[cfg(feature = "gui")]
use std::time::Instant;

#[cfg(feature = "gui")]
use anyhow::Context;
#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use stepkit::audio::{
    recording_path, AudioSession, ClockState, CpalSession, DropWatch, LevelAnalyser, SessionOptions,
    SinkHandle,
};
#[cfg(feature = "gui")]
use stepkit::midi::velocity_from_gain;
#[cfg(feature = "gui")]
use stepkit::sequencer::{MAX_BPM, MIN_BPM};
#[cfg(feature = "gui")]
use stepkit::synth::pads::{play_pad, PADS};
#[cfg(feature = "gui")]
use stepkit::{
    Config, Drum, Instrument, MidiOutputDevice, PercussionSynth, PlaybackEngine, PlaybackEvent,
    Recorder, Sequencer,
};

#[cfg(feature = "gui")]
fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stepkit")
        .join("stepkit.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create("/tmp/stepkit.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("stepkit: logging disabled ({})", e);
            return;
        }
    };

    if let Err(e) = WriteLogger::init(log_level, simplelog::Config::default(), log_file) {
        eprintln!("stepkit: logging disabled ({})", e);
        return;
    }

    log::info!("stepkit starting (log level: {:?})", log_level);
}

#[cfg(feature = "gui")]
fn main() -> anyhow::Result<()> {
    let verbose = std::env::args().any(|a| a == "-v" || a == "--verbose");
    init_logging(verbose);

    let config = Config::load();
    let app = StudioApp::new(config)?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 640.0])
            .with_title("stepkit - Beat Studio"),
        ..Default::default()
    };

    eframe::run_native("stepkit", options, Box::new(move |_cc| Ok(Box::new(app))))
        .map_err(|e| anyhow::anyhow!("ui exited: {}", e))
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct StudioApp {
    config: Config,
    sequencer: Sequencer,
    session: Arc<CpalSession>,
    synth: Arc<PercussionSynth<CpalSession>>,
    sink: SinkHandle,
    playback_engine: PlaybackEngine,
    midi_output: MidiOutputDevice,
    recorder: Option<Recorder>,
    analyser: LevelAnalyser,
    drop_watch: DropWatch,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    current_visual_step: Option<usize>,
    master_gain: f32,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl StudioApp {
    fn new(config: Config) -> anyhow::Result<Self> {
        let session = CpalSession::open(SessionOptions {
            master_gain: config.master_gain(),
            voice_limit: config.voice_limit(),
        })
        .context("failed to open audio output")?;
        let session = Arc::new(session);
        let sink = session.create_sink().context("failed to create recording bus")?;
        let tap = session.create_tap().context("failed to create analyser tap")?;
        let synth = Arc::new(PercussionSynth::new(Arc::clone(&session)));

        let available_midi_ports = MidiOutputDevice::available_ports();
        let mut midi_output = MidiOutputDevice::new();
        let mut selected_port = None;
        if let Some(name) = config.midi_port() {
            match midi_output.connect_named(name) {
                Ok(index) => selected_port = Some(index),
                Err(e) => log::warn!("configured midi port unavailable: {}", e),
            }
        }

        Ok(Self {
            sequencer: Sequencer::new(config.tempo()),
            playback_engine: PlaybackEngine::new().with_velocity(config.step_velocity()),
            master_gain: config.master_gain(),
            config,
            session,
            synth,
            sink,
            midi_output,
            recorder: None,
            analyser: LevelAnalyser::new(&tap),
            drop_watch: DropWatch::new(),
            available_midi_ports,
            selected_port,
            current_visual_step: None,
            status: None,
        })
    }

    fn report(&mut self, message: String) {
        log::error!("{}", message);
        self.status = Some(message);
    }

    /// Manual hits need a running clock just like playback does.
    fn ensure_clock(&mut self) -> bool {
        if self.session.state() == ClockState::Running {
            return true;
        }
        match self.session.resume() {
            Ok(()) => true,
            Err(e) => {
                self.report(format!("audio unavailable: {}", e));
                false
            }
        }
    }

    fn mirror_to_midi(&mut self, drum: Drum, gain: f32) {
        if !self.midi_output.is_connected() {
            return;
        }
        if let Err(e) = self.midi_output.send_drum_hit(drum, velocity_from_gain(gain)) {
            log::warn!("{}", e);
        }
    }

    fn handle_playback_events(&mut self) {
        let events = self.playback_engine.poll_events();
        let velocity = self.config.step_velocity();

        for event in events {
            match event {
                PlaybackEvent::StepAdvanced(step) => {
                    self.current_visual_step = Some(step);
                }
                PlaybackEvent::Hit { instrument, .. } => {
                    self.mirror_to_midi(instrument.drum(), velocity);
                }
            }
        }
    }

    fn start_playback(&mut self) {
        let result = self.playback_engine.start(
            &self.sequencer,
            Arc::clone(&self.synth),
            Some(self.sink.clone()),
        );
        match result {
            Ok(()) => self.status = None,
            Err(e) => self.report(format!("could not start playback: {}", e)),
        }
    }

    fn stop_playback(&mut self) {
        self.playback_engine.stop();
        self.current_visual_step = None;
    }

    fn trigger_drum(&mut self, drum: Drum) {
        if !self.ensure_clock() {
            return;
        }
        if let Err(e) = self.synth.trigger(drum, 1.0, Some(&self.sink)) {
            log::warn!("{} dropped: {}", drum.label(), e);
        }
        self.mirror_to_midi(drum, 1.0);
    }

    fn trigger_pad(&mut self, index: usize) {
        if !self.ensure_clock() {
            return;
        }
        if let Err(e) = play_pad(self.session.as_ref(), &PADS[index], Some(&self.sink)) {
            log::warn!("pad {} dropped: {}", index, e);
        }
    }

    fn toggle_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            match recorder.stop() {
                Ok(summary) => {
                    let seconds = summary.frames as f64 / self.session.sample_rate() as f64;
                    self.status = Some(format!(
                        "saved {:.1}s to {}",
                        seconds,
                        summary.path.display()
                    ));
                }
                Err(e) => self.report(format!("recording failed: {}", e)),
            }
            return;
        }

        let dir = self.config.recording_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            self.report(format!("cannot create {}: {}", dir.display(), e));
            return;
        }
        match Recorder::start(self.session.as_ref(), &self.sink, &recording_path(&dir)) {
            Ok(recorder) => {
                self.status = Some(format!("recording to {}", recorder.path().display()));
                self.recorder = Some(recorder);
            }
            Err(e) => self.report(format!("could not start recording: {}", e)),
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();
        self.analyser.update();
        let _ = self.drop_watch.check(self.session.dropped_voices(), Instant::now());

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("stepkit - Beat Studio");
            ui.add_space(10.0);

            // MIDI Port Selection
            let mut selected_port_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI Output:");
                if self.available_midi_ports.is_empty() {
                    ui.label("No MIDI ports available");
                } else {
                    egui::ComboBox::from_id_source("midi_port")
                        .selected_text(
                            self.selected_port
                                .and_then(|i| self.available_midi_ports.get(i))
                                .map(String::as_str)
                                .unwrap_or("Select port..."),
                        )
                        .show_ui(ui, |ui| {
                            for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                                if ui
                                    .selectable_label(self.selected_port == Some(i), port_name)
                                    .clicked()
                                {
                                    selected_port_changed = Some(i);
                                }
                            }
                        });
                }
                if ui.button("Refresh").clicked() {
                    self.available_midi_ports = MidiOutputDevice::available_ports();
                }
            });

            if let Some(port_idx) = selected_port_changed {
                self.midi_output.disconnect();
                match self.midi_output.connect(port_idx) {
                    Ok(()) => self.selected_port = Some(port_idx),
                    Err(e) => {
                        self.selected_port = None;
                        self.report(e.to_string());
                    }
                }
            }

            ui.add_space(10.0);

            // Transport
            ui.horizontal(|ui| {
                if self.playback_engine.is_running() {
                    if ui.button("⏹ Stop").clicked() {
                        self.stop_playback();
                    }
                } else if ui.button("▶ Play").clicked() {
                    self.start_playback();
                }

                let record_label = if self.recorder.is_some() { "⏺ Stop Rec" } else { "⏺ Record" };
                if ui.button(record_label).clicked() {
                    self.toggle_recording();
                }

                if ui.button("Clear").clicked() {
                    self.sequencer.clear();
                }

                ui.add_space(20.0);

                ui.label("BPM:");
                let mut bpm = self.sequencer.bpm();
                if ui
                    .add(egui::Slider::new(&mut bpm, MIN_BPM..=MAX_BPM).step_by(1.0))
                    .changed()
                {
                    self.sequencer.set_bpm(bpm);
                }

                ui.add_space(20.0);

                ui.label("Volume:");
                if ui
                    .add(egui::Slider::new(&mut self.master_gain, 0.0..=1.0))
                    .changed()
                {
                    self.session.set_master_gain(self.master_gain);
                }
            });

            ui.add_space(10.0);

            // Output meter and spectrum
            ui.horizontal(|ui| {
                ui.label("Level:");
                ui.add(
                    egui::ProgressBar::new(self.analyser.peak().clamp(0.0, 1.0))
                        .desired_width(200.0),
                );
            });
            let (rect, _) = ui.allocate_exact_size(egui::vec2(512.0, 60.0), egui::Sense::hover());
            let painter = ui.painter_at(rect);
            painter.rect_filled(rect, 0.0, egui::Color32::from_rgb(20, 20, 20));
            let bars = self.analyser.bars();
            let bar_width = rect.width() / bars.len() as f32;
            for (i, level) in bars.iter().enumerate() {
                let height = (level * rect.height()).max(2.0);
                let x = rect.left() + i as f32 * bar_width;
                let bar = egui::Rect::from_min_max(
                    egui::pos2(x + 1.0, rect.bottom() - height),
                    egui::pos2(x + bar_width - 1.0, rect.bottom()),
                );
                let shade = (80.0 + level * 175.0) as u8;
                let color = egui::Color32::from_rgb(shade, (i * 3) as u8 + 40, 200);
                painter.rect_filled(bar, 0.0, color);
            }

            ui.add_space(20.0);

            // Step grid: one row per instrument
            let steps = self.sequencer.steps();
            let grid = self.sequencer.grid();
            let is_playing = self.playback_engine.is_running();
            let mut toggled = None;

            egui::Grid::new("step_grid")
                .spacing([4.0, 4.0])
                .show(ui, |ui| {
                    for instrument in Instrument::ALL {
                        ui.label(instrument.label());
                        for step in 0..steps {
                            let is_current = is_playing && self.current_visual_step == Some(step);
                            let armed = grid.is_armed(step, instrument);

                            let button = egui::Button::new("")
                                .min_size(egui::vec2(32.0, 32.0))
                                .fill(if armed && is_current {
                                    egui::Color32::from_rgb(140, 240, 140)
                                } else if armed {
                                    egui::Color32::from_rgb(60, 60, 200)
                                } else if is_current {
                                    egui::Color32::from_rgb(70, 110, 70)
                                } else if step % 4 == 0 {
                                    egui::Color32::from_rgb(55, 55, 55)
                                } else {
                                    egui::Color32::from_rgb(40, 40, 40)
                                });

                            if ui.add(button).clicked() {
                                toggled = Some((step, instrument));
                            }
                        }
                        ui.end_row();
                    }
                });

            if let Some((step, instrument)) = toggled {
                if let Err(e) = self.sequencer.toggle_cell(step, instrument) {
                    log::warn!("{}", e);
                }
            }

            ui.add_space(20.0);
            ui.separator();

            // Drum kit
            ui.label("Drum Kit:");
            let mut hit = None;
            ui.horizontal(|ui| {
                for drum in Drum::KIT {
                    let button = egui::Button::new(drum.label()).min_size(egui::vec2(80.0, 50.0));
                    if ui.add(button).clicked() {
                        hit = Some(drum);
                    }
                }
            });
            if let Some(drum) = hit {
                self.trigger_drum(drum);
            }

            ui.add_space(10.0);

            // Melodic pads, 4x4
            ui.label("Pads:");
            let mut pressed = None;
            egui::Grid::new("pads").spacing([4.0, 4.0]).show(ui, |ui| {
                for (i, pad) in PADS.iter().enumerate() {
                    let button = egui::Button::new(pad.label()).min_size(egui::vec2(80.0, 50.0));
                    if ui.add(button).clicked() {
                        pressed = Some(i);
                    }
                    if i % 4 == 3 {
                        ui.end_row();
                    }
                }
            });
            if let Some(i) = pressed {
                self.trigger_pad(i);
            }

            // Info
            ui.separator();
            if let Some(status) = &self.status {
                ui.label(status);
            }
            if !self.midi_output.is_connected() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output connected - audio playback only",
                );
            }
        });
    }
}

#[cfg(feature = "gui")]
impl Drop for StudioApp {
    fn drop(&mut self) {
        self.playback_engine.stop();
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.stop() {
                log::error!("recording lost on exit: {}", e);
            }
        }
        self.midi_output.disconnect();
    }
}
