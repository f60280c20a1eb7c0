//! Fixed-size accumulation of capture samples into uniform frames.
//!
//! The capture device hands over periods of whatever size it negotiated;
//! downstream wants frames of exactly `frame_size` samples. This chunker
//! buffers until a frame boundary and only then emits, trading a constant
//! latency of `frame_size / sample_rate` (64 ms at 16 kHz with the
//! default 1024) for uniform frames that loudness detection and the wire
//! format can rely on.

/// Accumulates float samples and emits fixed-size frames.
pub struct CaptureChunker {
    frame: Vec<f32>,
    filled: usize,
}

impl CaptureChunker {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame: vec![0.0; frame_size],
            filled: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame.len()
    }

    /// Feed one capture period. `on_frame` runs synchronously for every
    /// completed frame, inside the capture cycle.
    pub fn push(&mut self, mut samples: &[f32], mut on_frame: impl FnMut(&[f32])) {
        let frame_size = self.frame.len();
        while !samples.is_empty() {
            let room = frame_size - self.filled;
            let take = room.min(samples.len());
            self.frame[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == frame_size {
                on_frame(&self.frame);
                self.filled = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_frames(chunker: &mut CaptureChunker, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        chunker.push(samples, |frame| frames.push(frame.to_vec()));
        frames
    }

    #[test]
    fn emits_nothing_until_frame_is_full() {
        let mut chunker = CaptureChunker::new(4);
        assert!(collect_frames(&mut chunker, &[0.1, 0.2, 0.3]).is_empty());
        let frames = collect_frames(&mut chunker, &[0.4]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4]]);
    }

    #[test]
    fn sample_at_a_time_still_fills_frames() {
        let mut chunker = CaptureChunker::new(8);
        let mut frames = Vec::new();
        for i in 0..16 {
            chunker.push(&[i as f32], |frame| frames.push(frame.to_vec()));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1][0], 8.0);
    }

    #[test]
    fn oversized_push_emits_multiple_frames_and_keeps_remainder() {
        let mut chunker = CaptureChunker::new(4);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let frames = collect_frames(&mut chunker, &samples);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1], vec![4.0, 5.0, 6.0, 7.0]);

        // The two leftover samples surface in the next frame.
        let frames = collect_frames(&mut chunker, &[8.0, 9.0]);
        assert_eq!(frames, vec![vec![8.0, 9.0, 8.0, 9.0]]);
    }

    #[test]
    fn frames_are_always_uniform_size() {
        let mut chunker = CaptureChunker::new(128);
        let mut sizes = Vec::new();
        for chunk_len in [1usize, 13, 128, 200, 500] {
            chunker.push(&vec![0.0; chunk_len], |frame| sizes.push(frame.len()));
        }
        assert!(!sizes.is_empty());
        assert!(sizes.iter().all(|&s| s == 128));
    }
}
