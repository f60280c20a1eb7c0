//! Fixed-capacity circular sample store for playback.
//!
//! Decouples network-timed writes from hardware-timed reads. The buffer
//! is a bounded FIFO that prefers freshness: when the writer outruns the
//! reader, the oldest unread samples are discarded, never the newest, and
//! the cursors stay consistent throughout. Reads never block and never
//! fail; a starved buffer yields silence.

/// Circular store of normalized float samples.
pub struct PlaybackRing {
    buf: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
}

impl PlaybackRing {
    /// Allocate a ring holding `capacity` samples. All storage is
    /// allocated up front; nothing on the write/read path allocates.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: vec![0.0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Unread samples currently buffered.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Append samples, wrapping the write cursor. On overflow the read
    /// cursor advances so only the oldest audio is lost.
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buf.len();
        for &sample in samples {
            self.buf[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % capacity;
            if self.available < capacity {
                self.available += 1;
            } else {
                self.read_index = (self.read_index + 1) % capacity;
            }
        }
    }

    /// Fill `out` completely: buffered samples first, silence for the
    /// rest. Called once per output cycle with the host's block size.
    pub fn read_into(&mut self, out: &mut [f32]) {
        let capacity = self.buf.len();
        let take = out.len().min(self.available);
        for slot in &mut out[..take] {
            *slot = self.buf[self.read_index];
            self.read_index = (self.read_index + 1) % capacity;
        }
        self.available -= take;
        out[take..].fill(0.0);
    }

    /// Drop everything buffered and zero the backing storage. Used for
    /// barge-in; completes in one pass with no allocation.
    pub fn clear(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
        self.buf.fill(0.0);
    }
}
