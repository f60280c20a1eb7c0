//! RMS loudness gate for voice barge-in.
//!
//! While the assistant is speaking, a single capture frame louder than
//! the threshold interrupts playback. No hysteresis or smoothing: one
//! frame is the worst-case detection latency, and a false trigger only
//! costs already-buffered assistant audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Root-mean-square loudness of a frame of normalized samples.
pub fn rms(samples: &[f32]) -> f32 {
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len().max(1) as f32).sqrt()
}

/// Decides, once per capture frame, whether the user spoke over the
/// assistant.
pub struct BargeInDetector {
    enabled: bool,
    threshold: f32,
    speaking: Arc<AtomicBool>,
}

impl BargeInDetector {
    /// `speaking` is the coordinator-owned flag raised on every inbound
    /// audio envelope.
    pub fn new(enabled: bool, threshold: f32, speaking: Arc<AtomicBool>) -> Self {
        Self {
            enabled,
            threshold,
            speaking,
        }
    }

    /// Inspect one frame. Returns true when playback must be cleared; the
    /// speaking flag is lowered at the same time so one interruption
    /// fires at most one clear.
    pub fn check(&self, frame: &[f32]) -> bool {
        if !self.enabled || !self.speaking.load(Ordering::Acquire) {
            return false;
        }
        if rms(frame) > self.threshold {
            self.speaking.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(speaking: bool) -> (BargeInDetector, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(speaking));
        (BargeInDetector::new(true, 0.04, flag.clone()), flag)
    }

    #[test]
    fn rms_of_known_signal() {
        assert_eq!(rms(&[0.0; 8]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn loud_frame_while_speaking_triggers_and_lowers_flag() {
        let (detector, flag) = detector(true);
        assert!(detector.check(&[0.5; 64]));
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn quiet_frame_while_speaking_does_not_trigger() {
        let (detector, flag) = detector(true);
        assert!(!detector.check(&[0.01; 64]));
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn loud_frame_while_idle_does_not_trigger() {
        let (detector, _) = detector(false);
        assert!(!detector.check(&[0.9; 64]));
    }

    #[test]
    fn triggers_at_most_once_per_utterance() {
        let (detector, _) = detector(true);
        assert!(detector.check(&[0.5; 64]));
        // Flag is now down; the rest of the utterance passes through.
        assert!(!detector.check(&[0.5; 64]));
    }

    #[test]
    fn disabled_detector_never_triggers() {
        let flag = Arc::new(AtomicBool::new(true));
        let detector = BargeInDetector::new(false, 0.04, flag.clone());
        assert!(!detector.check(&[0.9; 64]));
        assert!(flag.load(Ordering::Acquire));
    }
}
