//! Hotplug monitoring for video capture nodes

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// Watches /dev for video capture nodes appearing or disappearing
///
/// The callback carries no payload; the caller is expected to re-enumerate.
/// It runs on a dedicated thread and must not block for long. Dropping the
/// monitor stops the watcher and joins the thread.
pub struct HotplugMonitor {
    // Watcher must outlive the thread that drains its events.
    _watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    /// Start watching /dev for video node changes
    ///
    /// If the underlying watcher cannot be created the monitor degrades to
    /// one that never fires, so a missing inotify backend does not take the
    /// whole engine down.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = bounded::<()>(64);

        let watcher = match Self::create_watcher(tx) {
            Ok(mut watcher) => {
                match watcher.watch(Path::new("/dev"), RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        info!("Hotplug monitor watching /dev");
                        Some(watcher)
                    }
                    Err(e) => {
                        warn!("Unable to watch /dev, hotplug disabled: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Unable to create watcher, hotplug disabled: {}", e);
                None
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let thread = Some(Self::spawn_drain_thread(rx, stop.clone(), callback));

        Self {
            _watcher: watcher,
            stop,
            thread,
        }
    }

    fn create_watcher(tx: Sender<()>) -> notify::Result<RecommendedWatcher> {
        notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    debug!("Watcher error: {}", e);
                    return;
                }
            };

            if !matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_)) {
                return;
            }

            for path in &event.paths {
                if !is_video_node(path) {
                    continue;
                }
                debug!("Video node changed: {}", path.display());
                // Never block the watcher thread. A full queue already holds
                // a pending wake, so dropped events coalesce into it rather
                // than being lost.
                if tx.try_send(()).is_err() {
                    debug!("Hotplug queue full, event dropped");
                }
            }
        })
    }

    fn spawn_drain_thread<F>(
        rx: Receiver<()>,
        stop: Arc<AtomicBool>,
        mut callback: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(()) => callback(),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    }

    /// Stop the monitor and join its thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self._watcher = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Hotplug thread panicked");
            }
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Check whether a /dev path is a video capture node
fn is_video_node(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with("video"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_node_filter() {
        assert!(is_video_node(Path::new("/dev/video0")));
        assert!(is_video_node(Path::new("/dev/video12")));
        assert!(!is_video_node(Path::new("/dev/snd/pcmC0D0c")));
        assert!(!is_video_node(Path::new("/dev/media0")));
    }

    #[test]
    fn monitor_starts_and_stops() {
        let mut monitor = HotplugMonitor::new(|| {});
        monitor.stop();
        // Second stop is a no-op.
        monitor.stop();
    }

    #[test]
    fn stop_joins_the_drain_thread() {
        let mut monitor = HotplugMonitor::new(|| {});
        monitor.stop();
        // The thread is joined, so the callback can never run again.
        assert!(monitor.thread.is_none());
    }
}
