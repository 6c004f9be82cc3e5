//! Configuration and CLI argument handling

mod args;

pub use args::{Args, Command, PresetArg};
