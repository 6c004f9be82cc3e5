//! Capture device discovery and hotplug monitoring

mod enumerator;
mod monitor;

pub use enumerator::{enumerate, CaptureDeviceRecord};
pub use monitor::HotplugMonitor;
