//! hdmicap - HDMI capture engine CLI

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hdmicap::audio::{AudioConfig, AudioController};
use hdmicap::capture::{CaptureConfig, CaptureSession};
use hdmicap::config::{Args, Command, PresetArg};
use hdmicap::device::{self, HotplugMonitor};

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match args.command.unwrap_or_default() {
        Command::List { formats } => cmd_list(formats),
        Command::Run {
            device,
            preset,
            width,
            height,
            no_negotiate,
            no_audio,
            audio_node,
            bus_path,
            audio_label,
            gain,
        } => cmd_run(RunOptions {
            device,
            preset,
            width,
            height,
            no_negotiate,
            no_audio,
            audio_node,
            bus_path,
            audio_label,
            gain,
        }),
        Command::Info { device } => cmd_info(&device),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// List video capture devices
fn cmd_list(formats: bool) -> Result<()> {
    let devices = device::enumerate();

    if devices.is_empty() {
        println!("No video capture devices found.");
        return Ok(());
    }

    println!("Video capture devices:\n");

    for (i, dev) in devices.iter().enumerate() {
        println!("  {}. {}", i + 1, dev);
        println!("     driver: {}  bus: {}", dev.driver, dev.bus);
        if formats {
            println!("     formats: {}", dev.pixel_formats.join(", "));
        }
    }

    println!();
    Ok(())
}

struct RunOptions {
    device: String,
    preset: PresetArg,
    width: u32,
    height: u32,
    no_negotiate: bool,
    no_audio: bool,
    audio_node: Option<u32>,
    bus_path: Option<String>,
    audio_label: Option<String>,
    gain: f32,
}

/// Run the capture engine until Ctrl+C
fn cmd_run(opts: RunOptions) -> Result<()> {
    println!("hdmicap - HDMI capture engine\n");

    let capture_config = CaptureConfig {
        path: opts.device.clone(),
        preset: opts.preset.into(),
        width: opts.width,
        height: opts.height,
        negotiate: !opts.no_negotiate,
    };

    let mut session = CaptureSession::new(capture_config);
    if let Err(e) = session.start() {
        error!("Failed to start capture: {}", e);
        return Err(e.into());
    }

    let mut audio = if opts.no_audio {
        None
    } else {
        let config = AudioConfig {
            node_id: opts.audio_node,
            bus_path: opts.bus_path,
            description: opts.audio_label,
            gain: opts.gain,
            ..AudioConfig::default()
        };
        let mut controller = AudioController::new(config);
        match controller.start() {
            Ok(()) => {
                if controller.used_fallback_route() {
                    println!("Audio: no source matched the hints, using the default source.");
                }
                Some(controller)
            }
            Err(e) => {
                error!("Audio loopback unavailable: {}", e);
                None
            }
        }
    };

    let _monitor = HotplugMonitor::new(|| {
        let devices = device::enumerate();
        info!("Device tree changed, {} capture devices now present", devices.len());
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let _ = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    });

    println!("Capture running. Press Ctrl+C to stop.\n");

    let mut ticks = 0u32;
    let mut last_sequence: Option<u32> = None;
    while running.load(Ordering::SeqCst) && session.is_running() {
        std::thread::sleep(Duration::from_millis(100));
        ticks += 1;
        if ticks % 50 != 0 {
            continue;
        }
        if let Some(frame) = session.latest_frame() {
            info!(
                "frame seq {} ({}x{}), {}",
                frame.sequence,
                frame.width,
                frame.height,
                match last_sequence {
                    Some(prev) => format!("{} since last report", frame.sequence.wrapping_sub(prev)),
                    None => "first report".to_string(),
                }
            );
            last_sequence = Some(frame.sequence);
        }
        if let Some(audio) = &audio {
            info!(
                "audio level {:.3}, {} samples queued",
                audio.peak_level(),
                audio.queued_samples()
            );
        }
    }

    if let Some(audio) = &mut audio {
        audio.stop();
    }
    session.stop();

    println!("Stopped.");
    Ok(())
}

/// Show modes advertised by one device
fn cmd_info(path: &str) -> Result<()> {
    use hdmicap::capture::mode;
    use v4l::{Device, FourCC};

    let dev = Device::with_path(path)?;
    let caps = dev.query_caps()?;

    println!("Device Information:\n");
    println!("  Name:    {}", caps.card);
    println!("  Driver:  {}", caps.driver);
    println!("  Bus:     {}", caps.bus);

    let candidates = mode::enumerate_modes(&dev, FourCC::new(b"YUYV"))?;
    if candidates.is_empty() {
        println!("\nNo YUYV modes advertised.");
        return Ok(());
    }

    println!("\nYUYV modes:");
    for candidate in &candidates {
        println!("  {}", candidate);
    }

    if let Some(best) = mode::select_best_mode(&candidates) {
        println!("\nBest mode: {}", best);
    }

    Ok(())
}
