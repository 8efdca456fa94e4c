//! Playback ring buffer with drift-compensated resampling
//!
//! [`RingBuffer`] is a fixed-capacity sample store that never rejects a
//! write: when more samples arrive than fit, the oldest are dropped by
//! advancing the read cursor. [`PlaybackBuffer`] puts a pre-buffer gate and
//! a fractional-step linear-interpolation reader on top of it. The step is
//! recomputed at the start of every output block from the distance between
//! the buffered level and a target level, so a producer clock that runs
//! slightly fast or slow is absorbed without audible pitch jumps.
//!
//! Neither type is shared between threads. The backend that owns the
//! buffer receives sample blocks and resets by message, so both take effect
//! between block pulls.

use crate::config::PlaybackConfig;
use crate::constants::{DRIFT_SMOOTHING, MAX_DRIFT_CORRECTION};

/// Resampling step for a given buffered level.
///
/// `1 + clamp((buffered - target) / 200000, -0.05, 0.05)`
#[inline]
pub fn drift_step(buffered: usize, target: usize) -> f64 {
    let error = buffered as f64 - target as f64;
    let correction = (error / DRIFT_SMOOTHING).clamp(-MAX_DRIFT_CORRECTION, MAX_DRIFT_CORRECTION);
    1.0 + correction
}

/// Fixed-capacity circular sample store with drop-oldest overflow
pub struct RingBuffer {
    slots: Box<[f32]>,
    /// Capacity - 1, capacity is a power of 2
    mask: usize,
    write_pos: usize,
    read_pos: usize,
    buffered: usize,
    /// Samples discarded by overflow
    dropped: u64,
}

impl RingBuffer {
    /// Create a ring buffer.
    /// capacity must be a power of 2
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");

        Self {
            slots: vec![0.0; capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_pos: 0,
            read_pos: 0,
            buffered: 0,
            dropped: 0,
        }
    }

    /// Append samples at the write cursor. Never blocks or rejects; on
    /// overflow the read cursor skips past the oldest samples.
    pub fn write(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.slots[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) & self.mask;
        }
        self.buffered += samples.len();

        let capacity = self.capacity();
        if self.buffered > capacity {
            let overflow = self.buffered - capacity;
            self.read_pos = (self.read_pos + overflow) & self.mask;
            self.buffered = capacity;
            self.dropped += overflow as u64;
        }
    }

    /// Copy out up to `out.len()` samples in FIFO order
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.buffered);
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = self.peek(i);
        }
        self.consume(n);
        n
    }

    /// Sample `offset` positions past the read cursor
    #[inline]
    pub fn peek(&self, offset: usize) -> f32 {
        self.slots[(self.read_pos + offset) & self.mask]
    }

    /// Advance the read cursor
    #[inline]
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buffered);
        self.read_pos = (self.read_pos + n) & self.mask;
        self.buffered -= n;
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.buffered = 0;
    }

    pub fn len(&self) -> usize {
        self.buffered
    }

    pub fn is_empty(&self) -> bool {
        self.buffered == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Ring buffer + pre-buffer gate + adaptive resampler
pub struct PlaybackBuffer {
    ring: RingBuffer,
    /// Fractional part of the read position
    read_frac: f64,
    /// Closed until `prebuffer` samples have been buffered once
    prebuffering: bool,
    prebuffer: usize,
    target_level: usize,
    /// Step used for the most recent block
    last_step: f64,
    /// Blocks cut short by the underrun guard
    underruns: u64,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize, prebuffer: usize, target_level: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            read_frac: 0.0,
            prebuffering: true,
            prebuffer,
            target_level,
            last_step: 1.0,
            underruns: 0,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.capacity, config.prebuffer, config.target_level)
    }

    /// Accept newly arrived mono samples
    pub fn write(&mut self, samples: &[f32]) {
        self.ring.write(samples);
        if self.prebuffering && self.ring.len() >= self.prebuffer {
            self.prebuffering = false;
        }
    }

    /// Fill `out` with the next block of output.
    ///
    /// Silent while the gate is closed or fewer than 2 samples are
    /// buffered. Otherwise each output sample interpolates between the two
    /// ring slots around the fractional read position, which then advances
    /// by the block's drift step. If the buffer runs down to fewer than 2
    /// samples mid-block, the remainder is zero-filled.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.prebuffering || self.ring.len() < 2 {
            out.fill(0.0);
            return;
        }

        let step = self.next_step();
        self.last_step = step;

        let available = self.ring.len();
        let mut frac = self.read_frac;
        let mut consumed = 0usize;

        for i in 0..out.len() {
            if available - consumed < 2 {
                out[i..].fill(0.0);
                self.underruns += 1;
                break;
            }

            let s0 = self.ring.peek(consumed) as f64;
            let s1 = self.ring.peek(consumed + 1) as f64;
            out[i] = (s0 * (1.0 - frac) + s1 * frac) as f32;

            frac += step;
            let advance = frac.trunc();
            frac -= advance;
            consumed += advance as usize;
        }

        self.read_frac = frac;
        self.ring.consume(consumed);
    }

    /// Step the next block would use
    pub fn next_step(&self) -> f64 {
        drift_step(self.ring.len(), self.target_level)
    }

    /// Back to the freshly constructed state: cursors, counters and gate
    pub fn reset(&mut self) {
        self.ring.clear();
        self.read_frac = 0.0;
        self.prebuffering = true;
        self.last_step = 1.0;
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn is_prebuffering(&self) -> bool {
        self.prebuffering
    }

    pub fn last_step(&self) -> f64 {
        self.last_step
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            buffered: self.ring.len(),
            capacity: self.ring.capacity(),
            prebuffering: self.prebuffering,
            step: self.last_step,
            dropped: self.ring.dropped(),
            underruns: self.underruns,
        }
    }
}

/// Playback buffer statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStats {
    pub buffered: usize,
    pub capacity: usize,
    pub prebuffering: bool,
    pub step: f64,
    pub dropped: u64,
    pub underruns: u64,
}

impl PlaybackStats {
    pub fn fill_level(&self) -> f32 {
        self.buffered as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_worked_example_gate_and_step() {
        let mut buffer = PlaybackBuffer::new(8, 4, 4);
        buffer.write(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.buffered(), 4);
        assert!(!buffer.is_prebuffering());

        let mut out = [0.0f32; 2];
        buffer.render(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(buffer.last_step(), 1.0);
        assert_eq!(buffer.buffered(), 2);

        let step = buffer.next_step();
        assert!((step - (1.0 - 2.0 / 200_000.0)).abs() < 1e-12);
        assert!(step < 1.0);
    }

    #[test]
    fn test_worked_example_overflow() {
        let mut ring = RingBuffer::new(8);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        ring.write(&samples);

        assert_eq!(ring.len(), 8);
        assert_eq!(ring.read_pos(), 2);
        assert_eq!(ring.dropped(), 2);

        let mut out = [0.0f32; 8];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_gate_holds_silence_until_threshold() {
        let mut buffer = PlaybackBuffer::new(64, 16, 8);
        let mut out = [1.0f32; 4];

        buffer.write(&[0.5; 15]);
        buffer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(buffer.buffered(), 15);

        buffer.write(&[0.5; 1]);
        buffer.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_gate_stays_open_after_draining() {
        let mut buffer = PlaybackBuffer::new(64, 8, 8);
        buffer.write(&[0.25; 8]);
        let mut out = [0.0f32; 32];
        buffer.render(&mut out);
        assert!(!buffer.is_prebuffering());

        // A few samples below the threshold still play once the gate opened
        buffer.write(&[0.25; 4]);
        let mut out = [0.0f32; 2];
        buffer.render(&mut out);
        assert!(out.iter().all(|&s| s != 0.0));
    }

    #[test]
    fn test_underrun_zero_fills_rest_of_block() {
        let mut buffer = PlaybackBuffer::new(64, 4, 4);
        buffer.write(&[0.5; 4]);

        let mut out = [9.0f32; 8];
        buffer.render(&mut out);

        // Consumption stops with one sample left so the interpolation
        // partner is never read past valid data
        assert_eq!(&out[..3], &[0.5, 0.5, 0.5]);
        assert!(out[3..].iter().all(|&s| s == 0.0));
        assert_eq!(buffer.buffered(), 1);
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_reset_closes_gate() {
        let mut buffer = PlaybackBuffer::new(64, 4, 4);
        buffer.write(&[0.5; 10]);
        assert!(!buffer.is_prebuffering());

        buffer.reset();
        assert!(buffer.is_prebuffering());
        assert_eq!(buffer.buffered(), 0);

        buffer.write(&[0.5; 3]);
        let mut out = [1.0f32; 4];
        buffer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_interpolates_between_slots() {
        let mut buffer = PlaybackBuffer::new(1 << 20, 4, 0);
        let ramp: Vec<f32> = (0..100_000).map(|i| i as f32 * 1e-5).collect();
        buffer.write(&ramp);

        // Overfull against a target of 0: step is 1.05 after clamping
        let mut out = [0.0f32; 4];
        buffer.render(&mut out);
        assert!((buffer.last_step() - 1.05).abs() < 1e-12);
        for (i, &s) in out.iter().enumerate() {
            let expected = i as f64 * 1.05 * 1e-5;
            assert!((s as f64 - expected).abs() < 1e-6, "sample {i}: {s} vs {expected}");
        }
    }

    #[test]
    fn test_drift_converges_fast_producer() {
        assert_converges(0.005);
    }

    #[test]
    fn test_drift_converges_slow_producer() {
        assert_converges(-0.005);
    }

    /// Producer delivers `block * (1 + drift)` samples per output block
    fn assert_converges(drift: f64) {
        let target = 8192;
        let block = 128;
        let mut buffer = PlaybackBuffer::new(131_072, 16_384, target);
        let mut out = vec![0.0f32; block];
        let mut owed = 0.0f64;
        let chunk = vec![0.1f32; 1024];

        buffer.write(&vec![0.1f32; 16_384]);

        let mut worst = 0usize;
        for n in 0..40_000 {
            owed += block as f64 * (1.0 + drift);
            let whole = owed.floor();
            owed -= whole;
            let mut remaining = whole as usize;
            while remaining > 0 {
                let take = remaining.min(chunk.len());
                buffer.write(&chunk[..take]);
                remaining -= take;
            }

            buffer.render(&mut out);

            if n >= 30_000 {
                worst = worst.max(buffer.buffered().abs_diff(target));
            }
        }

        // Proportional control settles about drift * 200000 away from target
        let expected_offset = (drift.abs() * DRIFT_SMOOTHING) as usize;
        assert!(
            worst <= expected_offset + 256,
            "occupancy wandered {worst} samples from target"
        );
        assert_eq!(buffer.stats().dropped, 0);
    }

    proptest! {
        #[test]
        fn prop_round_trip_without_overflow(
            chunks in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..32), 0..8)
        ) {
            let mut ring = RingBuffer::new(256);
            let written: Vec<f32> = chunks.concat();
            for chunk in &chunks {
                ring.write(chunk);
            }
            let mut out = vec![0.0f32; written.len()];
            prop_assert_eq!(ring.read(&mut out), written.len());
            prop_assert_eq!(out, written);
            prop_assert!(ring.is_empty());
        }

        #[test]
        fn prop_overflow_keeps_most_recent(k in 0usize..300, split in 0usize..400) {
            let capacity = 64;
            let samples: Vec<f32> = (0..capacity + k).map(|i| i as f32).collect();
            let split = split.min(samples.len());

            let mut ring = RingBuffer::new(capacity);
            ring.write(&samples[..split]);
            ring.write(&samples[split..]);

            prop_assert_eq!(ring.len(), capacity);
            let mut out = vec![0.0f32; capacity];
            ring.read(&mut out);
            prop_assert_eq!(&out[..], &samples[k..]);
        }

        #[test]
        fn prop_step_is_clamped(buffered in 0usize..10_000_000, target in 0usize..1_000_000) {
            let step = drift_step(buffered, target);
            prop_assert!((0.95..=1.05).contains(&step));
        }
    }
}
