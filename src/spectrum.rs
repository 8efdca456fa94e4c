//! Spectrum display alignment
//!
//! The tuned signal is shifted to the centre of the display once, from the
//! first frame after spectrum is enabled, and the shift is then held so the
//! waterfall does not wander while listening.

/// Index of the strongest bin; the first one on ties
pub fn peak_bin(bins: &[u8]) -> usize {
    let mut max_val = 0u8;
    let mut max_idx = 0usize;
    for (i, &bin) in bins.iter().enumerate() {
        if bin > max_val {
            max_val = bin;
            max_idx = i;
        }
    }
    max_idx
}

/// Freeze-after-first-frame peak alignment
#[derive(Debug, Default, Clone)]
pub struct PeakAlignment {
    shift: Option<i32>,
}

impl PeakAlignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift for this frame. Computed from the first frame seen since the
    /// last reset and held afterwards.
    pub fn observe(&mut self, bins: &[u8]) -> i32 {
        *self.shift.get_or_insert_with(|| {
            let center = (bins.len() / 2) as i32;
            center - peak_bin(bins) as i32
        })
    }

    pub fn shift(&self) -> i32 {
        self.shift.unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.shift = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_bin() {
        assert_eq!(peak_bin(&[1, 9, 3, 9]), 1);
        assert_eq!(peak_bin(&[]), 0);
        assert_eq!(peak_bin(&[0, 0, 0]), 0);
    }

    #[test]
    fn test_shift_is_frozen_until_reset() {
        let mut align = PeakAlignment::new();
        let mut bins = vec![0u8; 256];
        bins[100] = 200;
        assert_eq!(align.observe(&bins), 28);

        bins[100] = 0;
        bins[10] = 250;
        assert_eq!(align.observe(&bins), 28);

        align.reset();
        assert_eq!(align.shift(), 0);
        assert_eq!(align.observe(&bins), 118);
    }
}
