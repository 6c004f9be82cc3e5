//! hdmicap - HDMI capture engine
//!
//! V4L2 video capture with mode negotiation and YUYV to RGB conversion,
//! plus PipeWire audio loopback with a software gain stage.

pub mod audio;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;

pub use error::{HdmicapError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
