//! Bounded sample FIFO between capture and playback

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::trace;

/// Bounded FIFO of interleaved S16 samples
///
/// The capture callback pushes, the playback callback drains. When full the
/// oldest samples are discarded so playback latency stays bounded instead of
/// growing without limit.
pub struct SampleFifo {
    inner: Mutex<Inner>,
}

struct Inner {
    samples: VecDeque<i16>,
    bound: usize,
}

impl SampleFifo {
    pub fn new(bound: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(bound),
                bound: bound.max(1),
            }),
        }
    }

    /// Replace the capacity bound, trimming oldest samples if shrinking
    pub fn set_bound(&self, bound: usize) {
        let mut inner = self.inner.lock();
        inner.bound = bound.max(1);
        let bound = inner.bound;
        while inner.samples.len() > bound {
            inner.samples.pop_front();
        }
    }

    /// Append samples, discarding the oldest ones on overflow
    pub fn push_slice(&self, samples: &[i16]) {
        let mut inner = self.inner.lock();
        let bound = inner.bound;

        if samples.len() >= bound {
            // The new block alone fills the FIFO; keep only its tail.
            inner.samples.clear();
            inner
                .samples
                .extend(samples[samples.len() - bound..].iter().copied());
            trace!("FIFO overrun, block larger than bound");
            return;
        }

        let overflow = (inner.samples.len() + samples.len()).saturating_sub(bound);
        if overflow > 0 {
            trace!("FIFO overrun, dropping {} oldest samples", overflow);
            inner.samples.drain(..overflow);
        }
        inner.samples.extend(samples.iter().copied());
    }

    /// Fill `out` with queued samples, zero-padding any shortfall
    ///
    /// Returns the number of real samples written before padding began.
    pub fn drain_into(&self, out: &mut [i16]) -> usize {
        let mut inner = self.inner.lock();
        let available = inner.samples.len().min(out.len());
        for slot in out.iter_mut().take(available) {
            // Length was checked above.
            *slot = inner.samples.pop_front().unwrap_or(0);
        }
        for slot in out.iter_mut().skip(available) {
            *slot = 0;
        }
        available
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_order() {
        let fifo = SampleFifo::new(16);
        fifo.push_slice(&[1, 2, 3, 4]);
        let mut out = [0i16; 4];
        assert_eq!(fifo.drain_into(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let fifo = SampleFifo::new(4);
        fifo.push_slice(&[1, 2, 3, 4]);
        fifo.push_slice(&[5, 6]);
        let mut out = [0i16; 4];
        assert_eq!(fifo.drain_into(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn oversized_block_keeps_tail() {
        let fifo = SampleFifo::new(3);
        fifo.push_slice(&[1, 2, 3, 4, 5]);
        let mut out = [0i16; 3];
        assert_eq!(fifo.drain_into(&mut out), 3);
        assert_eq!(out, [3, 4, 5]);
    }

    #[test]
    fn starvation_zero_pads() {
        let fifo = SampleFifo::new(8);
        fifo.push_slice(&[7, 7]);
        let mut out = [-1i16; 5];
        assert_eq!(fifo.drain_into(&mut out), 2);
        assert_eq!(out, [7, 7, 0, 0, 0]);
    }

    #[test]
    fn shrinking_bound_trims_oldest() {
        let fifo = SampleFifo::new(8);
        fifo.push_slice(&[1, 2, 3, 4, 5, 6]);
        fifo.set_bound(3);
        let mut out = [0i16; 3];
        assert_eq!(fifo.drain_into(&mut out), 3);
        assert_eq!(out, [4, 5, 6]);
    }
}
