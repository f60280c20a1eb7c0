//! Pipeline configuration.

use std::time::Duration;

/// Response modality of a session.
///
/// Switching mode tears down the current connection and opens a new one
/// with the updated routing flag; the session id is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Text-only exchange.
    Text,
    /// Audio-enabled exchange (microphone upstream, PCM16 downstream).
    Audio,
}

impl SessionMode {
    pub fn is_audio(self) -> bool {
        matches!(self, SessionMode::Audio)
    }
}

/// Configuration for the whole pipeline.
///
/// The earlier client generations diverged on ring-buffer sizes, sample
/// rates, and whether barge-in existed at all; everything those variants
/// disagreed on is an explicit field here.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backend base URL without a trailing slash. Scheme must match the
    /// connector in use: `ws://` for the duplex socket, `http://` for the
    /// event-stream pair.
    pub server_url: String,

    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Capture sample rate in Hz. 16 kHz keeps the upstream lean; the
    /// backend resamples as needed.
    pub capture_sample_rate: u32,
    /// Playback sample rate in Hz; must match what the backend emits.
    pub playback_sample_rate: u32,
    /// Desired ALSA capture channel count (first channel is used)
    pub capture_channels: u32,
    /// Desired ALSA playback channel count (mono content is duplicated)
    pub playback_channels: u32,

    /// Samples per capture frame. Every frame sent upstream has exactly
    /// this many samples.
    pub frame_size: usize,
    /// Playback ring capacity in seconds. Generous on purpose: overrun
    /// only discards the oldest audio, so minutes of headroom cost little
    /// and absorb network jitter.
    pub buffer_capacity_secs: u32,

    /// Whether loud capture frames interrupt assistant playback.
    pub barge_in_enabled: bool,
    /// RMS threshold (samples normalized to [-1, 1]) above which a frame
    /// counts as the user speaking.
    pub barge_in_threshold: f32,

    /// Reconnect delay after an unexpected close in text mode.
    pub reconnect_delay_text: Duration,
    /// Reconnect delay in audio mode; shorter, since a dead link stalls
    /// live audio.
    pub reconnect_delay_audio: Duration,

    /// Depth of the inter-component channels.
    pub channel_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000".to_string(),
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            capture_channels: 1,
            playback_channels: 1,
            frame_size: 1024,
            buffer_capacity_secs: 180,
            barge_in_enabled: true,
            barge_in_threshold: 0.04,
            reconnect_delay_text: Duration::from_secs(5),
            reconnect_delay_audio: Duration::from_millis(1500),
            channel_depth: 100,
        }
    }
}

impl PipelineConfig {
    /// Reconnect delay for the given mode.
    pub fn reconnect_delay(&self, mode: SessionMode) -> Duration {
        match mode {
            SessionMode::Text => self.reconnect_delay_text,
            SessionMode::Audio => self.reconnect_delay_audio,
        }
    }

    /// Playback ring capacity in samples.
    pub fn ring_capacity(&self) -> usize {
        self.playback_sample_rate as usize * self.buffer_capacity_secs as usize
    }
}
