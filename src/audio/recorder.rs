//! WAV capture of a sink bus.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{select, Receiver, Sender};

use super::session::{AudioSession, SinkHandle};
use crate::error::{StudioError, StudioResult};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
}

/// Writes everything routed to a sink into a mono 32-bit float WAV file
/// until stopped.
pub struct Recorder {
    path: PathBuf,
    stop_tx: Sender<()>,
    writer: JoinHandle<StudioResult<u64>>,
}

impl Recorder {
    /// Resumes a suspended session first so the take is not silent until the
    /// next hit.
    pub fn start<S: AudioSession + ?Sized>(
        session: &S,
        sink: &SinkHandle,
        path: &Path,
    ) -> StudioResult<Self> {
        session.resume()?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: session.sample_rate(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)?;

        // Blocks queued while nobody was recording are stale.
        let frames = sink.frames().clone();
        while frames.try_recv().is_ok() {}

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("stepkit-recorder".into())
            .spawn(move || write_blocks(writer, frames, stop_rx))
            .map_err(|e| StudioError::Recording(e.to_string()))?;

        log::info!("recording to {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            stop_tx,
            writer: handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write out whatever is still queued, finalise the file and report its length.
    pub fn stop(self) -> StudioResult<RecordingSummary> {
        let _ = self.stop_tx.send(());
        let frames = self
            .writer
            .join()
            .map_err(|_| StudioError::Recording("recorder thread panicked".into()))??;

        log::info!("recorded {} frames to {}", frames, self.path.display());

        Ok(RecordingSummary {
            path: self.path,
            frames,
        })
    }
}

fn write_blocks<W: std::io::Write + std::io::Seek>(
    mut writer: hound::WavWriter<W>,
    frames: Receiver<Vec<f32>>,
    stop_rx: Receiver<()>,
) -> StudioResult<u64> {
    let mut written = 0u64;

    loop {
        select! {
            recv(frames) -> block => match block {
                Ok(block) => {
                    for sample in &block {
                        writer.write_sample(*sample)?;
                    }
                    written += block.len() as u64;
                }
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                for block in frames.try_iter() {
                    for sample in &block {
                        writer.write_sample(*sample)?;
                    }
                    written += block.len() as u64;
                }
                break;
            }
        }
    }

    writer.finalize()?;
    Ok(written)
}

/// `<dir>/beat-<unix seconds>.wav`
pub fn recording_path(dir: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("beat-{}.wav", secs))
}
