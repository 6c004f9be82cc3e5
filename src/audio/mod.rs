//! Audio capture and loopback over PipeWire

mod backend;
mod context;
mod controller;
pub mod fifo;
pub mod level;
mod pipewire;
pub mod route;

pub use backend::{AudioBackend, AudioConfig, AudioShared, NullBackend};
pub use controller::AudioController;
pub use pipewire::PipeWireBackend;
