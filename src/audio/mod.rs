//! audio - capture chunking, playback buffering, barge-in detection, and
//! the ALSA-backed real-time threads that drive them.
//!
//! The pure pieces (chunker, ring buffer, detector, PCM conversion) know
//! nothing about ALSA and are exercised directly by tests; `AudioSystem`
//! mounts them onto real capture/playback period loops.

mod alsa_device;
mod audio_system;
pub mod barge_in;
pub mod chunker;
pub mod pcm;
pub mod ring_buffer;

pub use audio_system::{AudioSystem, PlaybackCommand};
pub use barge_in::BargeInDetector;
pub use chunker::CaptureChunker;
pub use ring_buffer::PlaybackRing;
