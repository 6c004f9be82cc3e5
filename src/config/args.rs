//! CLI argument parsing using clap

use clap::{Parser, Subcommand, ValueEnum};

use crate::capture::LatencyPreset;

/// hdmicap - HDMI capture engine
///
/// Capture video from an HDMI grabber and loop its audio to the default sink
#[derive(Parser, Debug)]
#[command(name = "hdmicap")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Latency preset as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum PresetArg {
    /// Two kernel buffers, minimal latency
    UltraLow,
    /// Four kernel buffers
    #[default]
    Balanced,
    /// Six kernel buffers, tolerates a slow consumer
    Safe,
}

impl From<PresetArg> for LatencyPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::UltraLow => LatencyPreset::UltraLow,
            PresetArg::Balanced => LatencyPreset::Balanced,
            PresetArg::Safe => LatencyPreset::Safe,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List video capture devices
    List {
        /// Show supported pixel formats per device
        #[arg(long)]
        formats: bool,
    },

    /// Run the capture engine
    Run {
        /// Video device node
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,

        /// Latency preset controlling the buffer pool depth
        #[arg(short, long, value_enum, default_value_t = PresetArg::Balanced)]
        preset: PresetArg,

        /// Fallback frame width when no mode can be negotiated
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Fallback frame height when no mode can be negotiated
        #[arg(long, default_value = "720")]
        height: u32,

        /// Stream the requested size as-is instead of negotiating a mode
        #[arg(long)]
        no_negotiate: bool,

        /// Disable the audio loopback
        #[arg(long)]
        no_audio: bool,

        /// Audio source node id, bypassing resolution
        #[arg(long)]
        audio_node: Option<u32>,

        /// Bus path hint for the audio source, e.g. usb-0000:00:14.0-2
        #[arg(long)]
        bus_path: Option<String>,

        /// Description hint for the audio source
        #[arg(long)]
        audio_label: Option<String>,

        /// Software gain applied to captured audio
        #[arg(short, long, default_value = "1.0")]
        gain: f32,
    },

    /// Show modes advertised by one device
    Info {
        /// Device node to inspect
        device: String,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        // Default to running against the first device.
        Command::Run {
            device: "/dev/video0".to_string(),
            preset: PresetArg::Balanced,
            width: 1280,
            height: 720,
            no_negotiate: false,
            no_audio: false,
            audio_node: None,
            bus_path: None,
            audio_label: None,
            gain: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_run_command() {
        let args = Args::parse_from([
            "hdmicap", "run", "-d", "/dev/video2", "--preset", "ultra-low",
        ]);
        match args.command {
            Some(Command::Run {
                device,
                preset,
                no_negotiate,
                ..
            }) => {
                assert_eq!(device, "/dev/video2");
                assert!(matches!(preset, PresetArg::UltraLow));
                // Negotiation is on unless explicitly disabled.
                assert!(!no_negotiate);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn no_negotiate_flag_is_parsed() {
        let args = Args::parse_from(["hdmicap", "run", "--no-negotiate"]);
        match args.command {
            Some(Command::Run { no_negotiate, .. }) => assert!(no_negotiate),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn verbosity_maps_to_levels() {
        let args = Args::parse_from(["hdmicap", "list"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);
        let args = Args::parse_from(["hdmicap", "-v", "list"]);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        let args = Args::parse_from(["hdmicap", "-q", "list"]);
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn preset_arg_maps_to_buffer_depth() {
        assert_eq!(LatencyPreset::from(PresetArg::UltraLow).buffer_count(), 2);
        assert_eq!(LatencyPreset::from(PresetArg::Safe).buffer_count(), 6);
    }
}
