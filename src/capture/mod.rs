//! Video capture sessions over V4L2

pub mod convert;
pub mod mode;
mod session;

pub use session::{CaptureConfig, CaptureSession, Frame, SessionState};

/// Latency preset controlling the kernel buffer pool depth
///
/// Fewer buffers means lower latency but less headroom when the consumer
/// falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyPreset {
    /// Two buffers, minimal queueing
    UltraLow,
    /// Four buffers
    #[default]
    Balanced,
    /// Six buffers, maximum tolerance for a slow consumer
    Safe,
}

impl LatencyPreset {
    /// Number of kernel buffers to request for this preset
    pub fn buffer_count(self) -> u32 {
        match self {
            Self::UltraLow => 2,
            Self::Balanced => 4,
            Self::Safe => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_buffer_counts() {
        assert_eq!(LatencyPreset::UltraLow.buffer_count(), 2);
        assert_eq!(LatencyPreset::Balanced.buffer_count(), 4);
        assert_eq!(LatencyPreset::Safe.buffer_count(), 6);
    }

    #[test]
    fn default_preset_is_balanced() {
        assert_eq!(LatencyPreset::default(), LatencyPreset::Balanced);
    }
}
