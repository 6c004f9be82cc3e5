//! Gain stage and level metering

use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free f32 cell shared between audio threads
///
/// Stores the value as its bit pattern so the real-time callback can read
/// gain and publish the peak meter without locking. Defaults to 0.0.
#[derive(Debug, Default)]
pub struct AtomicLevel {
    bits: AtomicU32,
}

impl AtomicLevel {
    pub fn new(initial: f32) -> Self {
        let cell = Self::default();
        cell.set(initial);
        cell
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Scale samples in place, clamping to the S16 range
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples.iter_mut() {
        let scaled = (*sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32);
        *sample = scaled as i16;
    }
}

/// RMS of a sample block, normalized to 0.0..=1.0
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    ((sum / samples.len() as f64).sqrt() / 32768.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_cell_round_trips() {
        let level = AtomicLevel::new(0.0);
        assert_eq!(level.get(), 0.0);
        level.set(0.75);
        assert_eq!(level.get(), 0.75);
        assert_eq!(AtomicLevel::new(1.0).get(), 1.0);
    }

    #[test]
    fn unity_gain_leaves_samples_untouched() {
        let mut samples = [100, -200, i16::MAX, i16::MIN];
        apply_gain(&mut samples, 1.0);
        assert_eq!(samples, [100, -200, i16::MAX, i16::MIN]);
    }

    #[test]
    fn gain_scales_and_clamps() {
        let mut samples = [1000, -1000, 20000, -20000];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples[0], 2000);
        assert_eq!(samples[1], -2000);
        // 40000 exceeds S16 and must clamp, not wrap.
        assert_eq!(samples[2], i16::MAX);
        assert_eq!(samples[3], i16::MIN);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0, 0, 0, 0]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_wave() {
        let samples = [i16::MAX, -i16::MAX, i16::MAX, -i16::MAX];
        let value = rms(&samples);
        assert!((value - 32767.0 / 32768.0).abs() < 1e-6);
    }
}
