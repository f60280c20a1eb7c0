//! Real-time audio threads bridging ALSA period I/O to the pipeline.
//!
//! Capture and playback each run on a dedicated std::thread (NOT tokio
//! tasks) so the period loops never contend with async network work. The
//! loops touch the rest of the crate only through bounded channels and
//! two atomic flags: frames go out with `try_send`, playback data and
//! clear signals come in with `try_recv`, and when a queue is full the
//! sample data is dropped rather than waited on. Errors inside a period
//! loop degrade to silence or a skipped frame plus a diagnostic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use super::barge_in::BargeInDetector;
use super::chunker::CaptureChunker;
use super::pcm;
use super::ring_buffer::PlaybackRing;
use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Commands crossing into the playback thread. The ring buffer itself is
/// owned by that thread; everyone else reaches it through these.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// Enqueue decoded samples at the playback rate.
    Write(Vec<f32>),
    /// Drop all buffered audio immediately (barge-in).
    Clear,
}

/// Handle to the running capture and playback threads.
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    capture_handle: Option<JoinHandle<()>>,
    playback_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Open both devices and start the period loops.
    ///
    /// * `frame_tx`    - PCM16 capture frames toward the coordinator
    /// * `playback_tx` - command queue sender, used here for barge-in clears
    /// * `playback_rx` - command queue receiver, moved into the playback thread
    /// * `speaking`    - coordinator-owned "assistant is speaking" flag
    ///
    /// A capture device that cannot be opened is reported as
    /// `PermissionDenied` and is not retried.
    pub fn start(
        config: &PipelineConfig,
        frame_tx: mpsc::Sender<Vec<i16>>,
        playback_tx: mpsc::Sender<PlaybackCommand>,
        playback_rx: mpsc::Receiver<PlaybackCommand>,
        speaking: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "audio starting — capture: \"{}\" @ {}Hz, playback: \"{}\" @ {}Hz, frame: {} samples",
            config.capture_device,
            config.capture_sample_rate,
            config.playback_device,
            config.playback_sample_rate,
            config.frame_size,
        );

        // Each thread opens its own device and reports readiness before
        // the period loop starts, so open failures surface here
        // synchronously instead of as a log line from a dead thread.
        let (capture_ready_tx, capture_ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let (playback_ready_tx, playback_ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let capture_handle = {
            let running = running.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_thread(
                        &config,
                        frame_tx,
                        playback_tx,
                        speaking,
                        &running,
                        capture_ready_tx,
                    ) {
                        log::error!("capture thread error: {}", e);
                    }
                })
                .map_err(|e| PipelineError::PermissionDenied(e.to_string()))?
        };

        let playback_handle = {
            let running = running.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("audio-playback".into())
                .spawn(move || {
                    if let Err(e) =
                        playback_thread(&config, playback_rx, &running, playback_ready_tx)
                    {
                        log::error!("playback thread error: {}", e);
                    }
                })
                .map_err(|e| PipelineError::PermissionDenied(e.to_string()))?
        };

        let mut system = Self {
            running,
            capture_handle: Some(capture_handle),
            playback_handle: Some(playback_handle),
        };

        for ready_rx in [capture_ready_rx, playback_ready_rx] {
            match ready_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    system.stop();
                    return Err(PipelineError::PermissionDenied(e));
                }
                Err(_) => {
                    system.stop();
                    return Err(PipelineError::PermissionDenied(
                        "audio thread failed to start".to_string(),
                    ));
                }
            }
        }

        Ok(system)
    }

    /// Signal both period loops to stop and wait for them.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.capture_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.playback_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Capture thread ========================

fn capture_thread(
    config: &PipelineConfig,
    frame_tx: mpsc::Sender<Vec<i16>>,
    playback_tx: mpsc::Sender<PlaybackCommand>,
    speaking: Arc<AtomicBool>,
    running: &AtomicBool,
    ready_tx: std_mpsc::Sender<Result<(), String>>,
) -> Result<()> {
    let opened = alsa_device::open_capture(
        &config.capture_device,
        config.capture_sample_rate,
        config.capture_channels,
    );
    let (pcm, params) = match opened {
        Ok(v) => {
            let _ = ready_tx.send(Ok(()));
            v
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return Ok(());
        }
    };

    let channels = params.channels as usize;
    let period = params.period_size;

    let mut chunker = CaptureChunker::new(config.frame_size);
    let barge_in = BargeInDetector::new(
        config.barge_in_enabled,
        config.barge_in_threshold,
        speaking,
    );

    // Interleaved device period, plus the first-channel float view of it.
    let mut read_buf = vec![0i16; period * channels];
    let mut mono = vec![0.0f32; period];

    let io = pcm.io_i16()?;

    log::info!(
        "capture started: rate={}, ch={}, period={}, frame={}",
        params.sample_rate,
        params.channels,
        period,
        config.frame_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames_read) => {
                for i in 0..frames_read {
                    mono[i] = pcm::to_f32(read_buf[i * channels]);
                }

                chunker.push(&mono[..frames_read], |frame| {
                    if barge_in.check(frame) {
                        match playback_tx.try_send(PlaybackCommand::Clear) {
                            Ok(()) => log::debug!("barge-in: playback cleared"),
                            Err(_) => log::warn!("barge-in clear dropped, playback queue full"),
                        }
                    }

                    let mut encoded = Vec::with_capacity(frame.len());
                    pcm::encode_frame(frame, &mut encoded);
                    if frame_tx.try_send(encoded).is_err() {
                        // No backpressure toward capture: a frame the
                        // coordinator cannot take right now is lost.
                        log::debug!("capture frame dropped, outbound queue full");
                    }
                });
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("failed to recover capture device: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("capture stopped");
    Ok(())
}

// ======================== Playback thread ========================

fn playback_thread(
    config: &PipelineConfig,
    mut commands: mpsc::Receiver<PlaybackCommand>,
    running: &AtomicBool,
    ready_tx: std_mpsc::Sender<Result<(), String>>,
) -> Result<()> {
    let opened = alsa_device::open_playback(
        &config.playback_device,
        config.playback_sample_rate,
        config.playback_channels,
    );
    let (pcm, params) = match opened {
        Ok(v) => {
            let _ = ready_tx.send(Ok(()));
            v
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return Ok(());
        }
    };

    let channels = params.channels as usize;
    let period = params.period_size;

    // The ring is owned here. Everything it absorbs arrives through the
    // command queue, so no lock is ever taken on the period path.
    let mut ring = PlaybackRing::new(config.ring_capacity());
    let mut mono = vec![0.0f32; period];
    let mut write_buf = vec![0i16; period * channels];

    let io = pcm.io_i16()?;

    log::info!(
        "playback started: rate={}, ch={}, period={}, ring={} samples",
        params.sample_rate,
        params.channels,
        period,
        ring.capacity(),
    );

    while running.load(Ordering::Relaxed) {
        // Apply whatever arrived since the last period; never wait.
        apply_pending(&mut ring, &mut commands);

        // One period from the ring; starvation reads as silence.
        ring.read_into(&mut mono);
        for i in 0..period {
            let sample = pcm::to_i16(mono[i]);
            for ch in 0..channels {
                write_buf[i * channels + ch] = sample;
            }
        }

        // Write the period with XRUN recovery; after repeated failures
        // the rest of this period is dropped to keep the loop moving.
        let mut frames_written = 0;
        let mut retries = 0u32;
        while frames_written < period {
            let offset = frames_written * channels;
            match io.writei(&write_buf[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    retries += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("failed to recover playback device: {}", e2);
                        return Ok(());
                    }
                    if retries >= 3 {
                        log::error!(
                            "dropping {} unwritten frames after {} recovery attempts",
                            period - frames_written,
                            retries,
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("playback stopped");
    Ok(())
}

/// Drain pending playback commands into the ring without waiting.
fn apply_pending(ring: &mut PlaybackRing, commands: &mut mpsc::Receiver<PlaybackCommand>) {
    while let Ok(command) = commands.try_recv() {
        match command {
            PlaybackCommand::Write(samples) => ring.write(&samples),
            PlaybackCommand::Clear => ring.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barge_in_clear_reaches_the_ring_before_the_next_read() {
        let speaking = Arc::new(AtomicBool::new(true));
        let detector = BargeInDetector::new(true, 0.04, speaking.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let mut ring = PlaybackRing::new(1024);

        // Assistant audio is buffered and audible.
        tx.try_send(PlaybackCommand::Write(vec![0.25; 512])).unwrap();
        apply_pending(&mut ring, &mut rx);
        assert_eq!(ring.available(), 512);

        // The user talks over it; the clear lands before the next read.
        let loud_frame = vec![0.5f32; 256];
        if detector.check(&loud_frame) {
            tx.try_send(PlaybackCommand::Clear).unwrap();
        }
        apply_pending(&mut ring, &mut rx);

        let mut out = [9.0f32; 128];
        ring.read_into(&mut out);
        assert_eq!(out, [0.0; 128]);
        assert!(!speaking.load(Ordering::Acquire));
    }

    #[test]
    fn commands_apply_in_arrival_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut ring = PlaybackRing::new(64);

        tx.try_send(PlaybackCommand::Write(vec![0.1; 8])).unwrap();
        tx.try_send(PlaybackCommand::Clear).unwrap();
        tx.try_send(PlaybackCommand::Write(vec![0.2; 4])).unwrap();
        apply_pending(&mut ring, &mut rx);

        // Only the write after the clear survives.
        assert_eq!(ring.available(), 4);
    }
}
