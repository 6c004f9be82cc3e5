//! Video capture session with a dedicated streaming thread

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC, Fraction};

use crate::capture::{convert, mode, LatencyPreset};
use crate::error::{HdmicapError, Result};

/// How long one dequeue may block before the loop rechecks its stop flag
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Observable lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Configuring,
    Streaming,
}

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device node path, e.g. `/dev/video0`
    pub path: String,
    /// Kernel buffer pool depth
    pub preset: LatencyPreset,
    /// Frame width to fall back on when no mode can be negotiated
    pub width: u32,
    /// Frame height to fall back on when no mode can be negotiated
    pub height: u32,
    /// Pick the highest-throughput advertised mode (on by default)
    ///
    /// When cleared, the fallback size is requested as-is.
    pub negotiate: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            path: "/dev/video0".to_string(),
            preset: LatencyPreset::default(),
            width: 1280,
            height: 720,
            negotiate: true,
        }
    }
}

/// One captured frame, already converted to tightly packed RGB24
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per output row, `width * 3`
    pub stride: u32,
    /// Driver-assigned frame sequence number
    pub sequence: u32,
    /// When the driver stamped the frame, mapped onto `Instant`
    pub capture_time: Instant,
    /// When the frame was dequeued in userspace
    pub dequeue_time: Instant,
}

/// A running V4L2 capture session
///
/// `start` configures the device and streams on a dedicated thread, which
/// publishes each decoded frame as a snapshot. Consumers poll
/// `latest_frame` for a copy. Dropping the session stops the thread.
pub struct CaptureSession {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    snapshot: Arc<Mutex<Option<Frame>>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            snapshot: Arc::new(Mutex::new(None)),
            thread: None,
        }
    }

    /// Whether the streaming thread is alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Copy of the most recent decoded frame, if any
    ///
    /// Non-blocking apart from a short snapshot lock. The snapshot is
    /// overwritten in place each cycle; there is no backlog.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.snapshot.lock().clone()
    }

    /// Configure the device and start streaming
    ///
    /// Blocks until the worker thread has either negotiated the format and
    /// queued its buffers, or failed. On failure the session stays idle.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Capture session already running");
            return Ok(());
        }
        *self.state.lock() = SessionState::Configuring;

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let config = self.config.clone();
        let running = self.running.clone();
        let state = self.state.clone();
        let snapshot = self.snapshot.clone();

        let thread = std::thread::spawn(move || {
            streaming_thread(config, running, state, snapshot, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                // The worker set Streaming before reporting ready; writing it
                // here could mask an Idle store from an early thread exit.
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                *self.state.lock() = SessionState::Idle;
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                *self.state.lock() = SessionState::Idle;
                Err(HdmicapError::Startup(
                    "capture thread exited before reporting status".to_string(),
                ))
            }
        }
    }

    /// Stop streaming and join the worker thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
            info!("Capture session stopped");
        }
        *self.state.lock() = SessionState::Idle;
    }

    /// Switch the latency preset, restarting the stream if needed
    ///
    /// A no-op when the preset is unchanged. On a running session this is
    /// one full stop/start cycle against the same device path; a brief
    /// capture gap is expected.
    pub fn set_latency_preset(&mut self, preset: LatencyPreset) -> Result<()> {
        if self.config.preset == preset {
            return Ok(());
        }
        let was_running = self.thread.is_some();
        if was_running {
            self.stop();
        }
        self.config.preset = preset;
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Current latency preset
    pub fn latency_preset(&self) -> LatencyPreset {
        self.config.preset
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open and configure the device, returning the negotiated frame size
fn configure_device(config: &CaptureConfig) -> Result<(Device, u32, u32)> {
    let dev = Device::with_path(&config.path)?;
    let caps = dev.query_caps()?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(HdmicapError::unsupported(
            &config.path,
            "no video capture capability",
        ));
    }
    if !caps.capabilities.contains(Flags::STREAMING) {
        return Err(HdmicapError::unsupported(
            &config.path,
            "no streaming I/O support",
        ));
    }

    let fourcc = FourCC::new(b"YUYV");
    let (mut width, mut height) = (config.width, config.height);
    let mut interval: Option<Fraction> = None;

    if config.negotiate {
        let candidates = mode::enumerate_modes(&dev, fourcc)?;
        if let Some(best) = mode::select_best_mode(&candidates) {
            info!("Negotiated capture mode {}", best);
            width = best.width;
            height = best.height;
            interval = Some(best.interval);
        } else {
            warn!("No advertised YUYV modes, keeping requested size");
        }
    }

    let format = dev.set_format(&Format::new(width, height, fourcc))?;
    if format.fourcc != fourcc {
        return Err(HdmicapError::unsupported(
            &config.path,
            format!("driver substituted pixel format {}", format.fourcc),
        ));
    }
    // The driver may round the size; stream with whatever it granted.
    if format.width != width || format.height != height {
        warn!(
            "Driver adjusted frame size {}x{} -> {}x{}",
            width, height, format.width, format.height
        );
    }

    if let Some(interval) = interval {
        if let Err(e) = dev.set_params(&v4l::video::capture::Parameters::new(interval)) {
            debug!("Frame interval not applied: {}", e);
        }
    }

    Ok((dev, format.width, format.height))
}

/// Read CLOCK_MONOTONIC, the clock V4L2 drivers stamp frames with
fn monotonic_now() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Map a driver timestamp onto the Instant timeline
///
/// The driver stamps frames on CLOCK_MONOTONIC at capture time; subtracting
/// its age from the dequeue instant recovers the capture instant. Falls back
/// to the dequeue instant if the stamp is unusable.
fn map_capture_time(sec: i64, usec: i64, dequeue: Instant) -> Instant {
    if sec <= 0 && usec <= 0 {
        return dequeue;
    }
    let stamp = Duration::new(sec as u64, (usec as u32).saturating_mul(1000));
    let age = monotonic_now().saturating_sub(stamp);
    dequeue.checked_sub(age).unwrap_or(dequeue)
}

fn streaming_thread(
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    snapshot: Arc<Mutex<Option<Frame>>>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
) {
    let (dev, width, height) = match configure_device(&config) {
        Ok(parts) => parts,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let buffer_count = config.preset.buffer_count();
    let mut stream = match MmapStream::with_buffers(&dev, Type::VideoCapture, buffer_count) {
        Ok(stream) => stream,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };
    stream.set_timeout(POLL_TIMEOUT);

    if let Err(e) = stream.start() {
        running.store(false, Ordering::SeqCst);
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    info!(
        "Streaming {}x{} YUYV from {} with {} buffers",
        width, height, config.path, buffer_count
    );
    *state.lock() = SessionState::Streaming;
    let _ = ready_tx.send(Ok(()));

    let frame_bytes = (width as usize) * (height as usize) * 2;
    let mut rgb = Vec::new();

    while running.load(Ordering::Relaxed) {
        let (buf, meta) = match stream.next() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => {
                error!("Capture stream failed: {}", e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        };

        let dequeue_time = Instant::now();
        let used = (meta.bytesused as usize).min(buf.len());
        if used < frame_bytes {
            debug!("Short frame ({} of {} bytes), dropped", used, frame_bytes);
            continue;
        }

        convert::yuyv_to_rgb(&buf[..frame_bytes], width, height, &mut rgb);

        let frame = Frame {
            data: rgb.clone(),
            width,
            height,
            stride: width * 3,
            sequence: meta.sequence,
            capture_time: map_capture_time(
                meta.timestamp.sec,
                meta.timestamp.usec,
                dequeue_time,
            ),
            dequeue_time,
        };
        *snapshot.lock() = Some(frame);
    }

    running.store(false, Ordering::SeqCst);
    *state.lock() = SessionState::Idle;
    debug!("Capture thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_negotiates_with_720p_fallback() {
        let config = CaptureConfig::default();
        assert_eq!(config.path, "/dev/video0");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.preset, LatencyPreset::Balanced);
        assert!(config.negotiate);
    }

    #[test]
    fn missing_device_fails_start() {
        let mut session = CaptureSession::new(CaptureConfig {
            path: "/dev/hdmicap-no-such-node".to_string(),
            ..CaptureConfig::default()
        });
        assert!(session.start().is_err());
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.latest_frame().is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = CaptureSession::new(CaptureConfig::default());
        // Stopping a session that never started is a no-op, as is a repeat.
        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn preset_change_on_idle_session_is_immediate() {
        let mut session = CaptureSession::new(CaptureConfig::default());
        session.set_latency_preset(LatencyPreset::Safe).unwrap();
        assert_eq!(session.latency_preset(), LatencyPreset::Safe);
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Idle);
        // Unchanged preset is a no-op.
        session.set_latency_preset(LatencyPreset::Safe).unwrap();
    }

    #[test]
    fn unusable_stamp_falls_back_to_dequeue() {
        let now = Instant::now();
        assert_eq!(map_capture_time(0, 0, now), now);
        assert_eq!(map_capture_time(-1, 0, now), now);
    }
}
