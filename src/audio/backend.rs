//! Audio backend abstraction

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::fifo::SampleFifo;
use crate::audio::level::AtomicLevel;
use crate::error::Result;

/// Audio loopback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Explicit source node id, bypassing resolution
    pub node_id: Option<u32>,
    /// Bus path of the capture card, preferred over the label
    pub bus_path: Option<String>,
    /// Free-form label matched against node descriptions
    pub description: Option<String>,
    /// Requested channel count
    pub channels: u32,
    /// Requested sample rate in Hz
    pub rate: u32,
    /// Initial software gain
    pub gain: f32,
    /// How long source resolution may take before giving up
    pub resolve_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bus_path: None,
            description: None,
            channels: 2,
            rate: 48000,
            gain: 1.0,
            resolve_timeout: Duration::from_millis(400),
        }
    }
}

/// State shared between the controller and a running backend
#[derive(Clone)]
pub struct AudioShared {
    /// Sample queue between capture and playback
    pub fifo: Arc<SampleFifo>,
    /// Peak meter published by the capture callback
    pub peak: Arc<AtomicLevel>,
    /// Gain read by the capture callback
    pub gain: Arc<AtomicLevel>,
    /// Negotiated sample rate, 0 until known
    pub rate: Arc<AtomicU32>,
    /// Negotiated channel count, 0 until known
    pub channels: Arc<AtomicU32>,
    /// Whether the default route was used instead of a matched source
    pub fallback: Arc<AtomicBool>,
}

impl AudioShared {
    pub fn new(initial_gain: f32) -> Self {
        Self {
            fifo: Arc::new(SampleFifo::new(1)),
            peak: Arc::new(AtomicLevel::new(0.0)),
            gain: Arc::new(AtomicLevel::new(initial_gain)),
            rate: Arc::new(AtomicU32::new(0)),
            channels: Arc::new(AtomicU32::new(0)),
            fallback: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record the format both streams currently run at
    pub fn set_format(&self, rate: u32, channels: u32) {
        self.rate.store(rate, Ordering::Relaxed);
        self.channels.store(channels, Ordering::Relaxed);
    }
}

/// A loopback implementation the controller can drive
///
/// `start` must block until the backend is either streaming or has failed;
/// `stop` must be idempotent.
pub trait AudioBackend: Send {
    fn start(&mut self, shared: &AudioShared, config: &AudioConfig) -> Result<()>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Backend that accepts every start and moves no audio
///
/// Stands in when no audio server is available and backs controller tests.
#[derive(Debug, Default)]
pub struct NullBackend {
    running: bool,
}

impl AudioBackend for NullBackend {
    fn start(&mut self, shared: &AudioShared, config: &AudioConfig) -> Result<()> {
        shared.set_format(config.rate, config.channels);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
