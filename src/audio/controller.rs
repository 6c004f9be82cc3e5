//! Audio loopback controller

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::audio::backend::{AudioBackend, AudioConfig, AudioShared};
use crate::audio::pipewire::PipeWireBackend;
use crate::error::Result;

/// Gain ceiling, roughly +20 dB
const MAX_GAIN: f32 = 10.0;

/// Owns the audio loopback: backend lifecycle, gain and level metering
pub struct AudioController {
    config: AudioConfig,
    shared: AudioShared,
    backend: Box<dyn AudioBackend>,
}

impl AudioController {
    /// Controller backed by PipeWire
    pub fn new(config: AudioConfig) -> Self {
        Self::with_backend(config, Box::new(PipeWireBackend::new()))
    }

    /// Controller with an explicit backend
    pub fn with_backend(config: AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        let shared = AudioShared::new(config.gain.clamp(0.0, MAX_GAIN));
        Self {
            config,
            shared,
            backend,
        }
    }

    /// Start the loopback, blocking until the backend is streaming
    pub fn start(&mut self) -> Result<()> {
        if self.backend.is_running() {
            warn!("Audio controller already running");
            return Ok(());
        }
        self.backend.start(&self.shared, &self.config)?;
        info!("Audio loopback running");
        Ok(())
    }

    /// Stop the loopback and reset the meter
    pub fn stop(&mut self) {
        self.backend.stop();
        self.shared.fifo.clear();
        self.shared.peak.set(0.0);
    }

    pub fn is_running(&self) -> bool {
        self.backend.is_running()
    }

    /// Set the software gain, clamped to `0.0..=10.0`
    ///
    /// Takes effect on the next capture callback.
    pub fn set_gain(&self, gain: f32) {
        self.shared.gain.set(gain.clamp(0.0, MAX_GAIN));
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain.get()
    }

    /// Most recent post-gain RMS level, 0.0..=1.0
    pub fn peak_level(&self) -> f32 {
        self.shared.peak.get()
    }

    /// Samples currently queued between capture and playback
    pub fn queued_samples(&self) -> usize {
        self.shared.fifo.len()
    }

    /// Negotiated sample rate in Hz, 0 before the first start
    pub fn sample_rate(&self) -> u32 {
        self.shared.rate.load(Ordering::Relaxed)
    }

    /// Negotiated channel count, 0 before the first start
    pub fn channels(&self) -> u32 {
        self.shared.channels.load(Ordering::Relaxed)
    }

    /// Whether the loopback fell back to the default source
    pub fn used_fallback_route(&self) -> bool {
        self.shared.fallback.load(Ordering::Relaxed)
    }
}

impl Drop for AudioController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::NullBackend;

    fn controller() -> AudioController {
        AudioController::with_backend(AudioConfig::default(), Box::new(NullBackend::default()))
    }

    #[test]
    fn lifecycle_with_null_backend() {
        let mut c = controller();
        assert!(!c.is_running());
        c.start().unwrap();
        assert!(c.is_running());
        // Redundant start is accepted.
        c.start().unwrap();
        c.stop();
        assert!(!c.is_running());
    }

    #[test]
    fn stop_resets_meter_and_fifo() {
        let mut c = controller();
        c.start().unwrap();
        c.shared.peak.set(0.5);
        c.shared.fifo.set_bound(8);
        c.shared.fifo.push_slice(&[1, 2, 3]);
        c.stop();
        assert_eq!(c.peak_level(), 0.0);
        assert_eq!(c.queued_samples(), 0);
    }

    #[test]
    fn gain_is_clamped() {
        let c = controller();
        c.set_gain(2.5);
        assert_eq!(c.gain(), 2.5);
        c.set_gain(-1.0);
        assert_eq!(c.gain(), 0.0);
        c.set_gain(100.0);
        assert_eq!(c.gain(), MAX_GAIN);
    }

    #[test]
    fn null_backend_reports_configured_format() {
        let mut c = controller();
        assert_eq!(c.sample_rate(), 0);
        c.start().unwrap();
        assert_eq!(c.sample_rate(), 48000);
        assert_eq!(c.channels(), 2);
        assert!(!c.used_fallback_route());
    }

    #[test]
    fn initial_gain_comes_from_config() {
        let config = AudioConfig {
            gain: 0.5,
            ..AudioConfig::default()
        };
        let c = AudioController::with_backend(config, Box::new(NullBackend::default()));
        assert_eq!(c.gain(), 0.5);
    }
}
