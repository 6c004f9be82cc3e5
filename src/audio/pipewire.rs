//! PipeWire loopback backend
//!
//! Runs a dedicated thread with a PipeWire main loop hosting an S16 capture
//! stream and, once the capture format is negotiated, a matching playback
//! stream. Samples cross between them through the shared FIFO.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::bounded;
use pipewire as pw;
use pw::spa;
use pw::spa::param::audio::{AudioFormat, AudioInfoRaw};
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::param::ParamType;
use pw::spa::pod::serialize::PodSerializer;
use pw::spa::pod::Pod;
use pw::spa::utils::SpaTypes;
use pw::stream::StreamFlags;
use pw::types::ObjectType;
use tracing::{debug, info, warn};

use crate::audio::backend::{AudioBackend, AudioConfig, AudioShared};
use crate::audio::context::PwInitGuard;
use crate::audio::level;
use crate::audio::route::{match_source, RouteHints, SourceNodeInfo};
use crate::error::{HdmicapError, Result};

enum LoopCommand {
    Stop,
}

/// Loopback backend driving the PipeWire graph
pub struct PipeWireBackend {
    running: Arc<AtomicBool>,
    stop_tx: Option<pw::channel::Sender<LoopCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl PipeWireBackend {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
        }
    }
}

impl Default for PipeWireBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for PipeWireBackend {
    fn start(&mut self, shared: &AudioShared, config: &AudioConfig) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Audio backend already running");
            return Ok(());
        }

        let target = match config.node_id {
            Some(id) => Some(id),
            None => match resolve_source(config) {
                Ok(target) => target,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            },
        };
        match target {
            Some(id) => info!("Audio source resolved to node {}", id),
            None => info!("No source hint matched, using default source"),
        }
        shared.fallback.store(target.is_none(), Ordering::Relaxed);
        shared.set_format(config.rate, config.channels);

        // Roughly one second of audio until the first format callback
        // tightens the bound.
        shared
            .fifo
            .set_bound((config.rate * config.channels).max(1) as usize);

        let (stop_tx, stop_rx) = pw::channel::channel::<LoopCommand>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let shared = shared.clone();
        let config = config.clone();
        let running = self.running.clone();

        let thread = std::thread::spawn(move || {
            run_loopback(shared, config, target, running, ready_tx, stop_rx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(HdmicapError::AudioStart(
                    "loopback thread exited before reporting status".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.stop_tx.take() {
            let _ = sender.send(LoopCommand::Stop);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Audio loopback thread panicked");
            }
            info!("Audio loopback stopped");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for PipeWireBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Enumerate Audio/Source nodes and pick the one matching the hints
///
/// Runs a short-lived main loop: a core sync marks the registry dump as
/// complete, and a timer caps the whole exchange at the configured resolve
/// timeout in case the daemon stalls.
fn resolve_source(config: &AudioConfig) -> Result<Option<u32>> {
    let hints = RouteHints {
        bus_path: config.bus_path.clone(),
        description: config.description.clone(),
    };
    if hints.bus_path.is_none() && hints.description.is_none() {
        return Ok(None);
    }

    let _guard = PwInitGuard::acquire();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| HdmicapError::AudioStart(format!("main loop: {}", e)))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| HdmicapError::AudioStart(format!("context: {}", e)))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| HdmicapError::AudioStart(format!("connect: {}", e)))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| HdmicapError::AudioStart(format!("registry: {}", e)))?;

    let nodes: Rc<RefCell<Vec<SourceNodeInfo>>> = Rc::new(RefCell::new(Vec::new()));

    let nodes_for_listener = nodes.clone();
    let _registry_listener = registry
        .add_listener_local()
        .global(move |global| {
            if global.type_ != ObjectType::Node {
                return;
            }
            let Some(props) = global.props else { return };
            let media_class = props.get("media.class").unwrap_or("");
            if !media_class.starts_with("Audio/Source") {
                return;
            }

            let get = |key: &str| props.get(key).unwrap_or("").to_string();
            nodes_for_listener.borrow_mut().push(SourceNodeInfo {
                id: global.id,
                name: get("node.name"),
                description: get("node.description"),
                device_description: get("device.description"),
                bus_path: get("device.bus-path"),
                bus: get("device.bus"),
            });
        })
        .register();

    let pending_sync = core
        .sync(0)
        .map_err(|e| HdmicapError::AudioStart(format!("sync: {}", e)))?;

    let mainloop_weak = mainloop.downgrade();
    let _core_listener = core
        .add_listener_local()
        .done(move |id, seq| {
            if id == pw::core::PW_ID_CORE && seq == pending_sync {
                if let Some(mainloop) = mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        })
        .register();

    let mainloop_weak = mainloop.downgrade();
    let timer = mainloop.loop_().add_timer(move |_expirations| {
        debug!("Source resolution deadline hit");
        if let Some(mainloop) = mainloop_weak.upgrade() {
            mainloop.quit();
        }
    });
    timer.update_timer(Some(config.resolve_timeout), None);

    mainloop.run();

    let nodes = nodes.borrow();
    debug!("Registry listed {} audio source nodes", nodes.len());
    let target = match_source(&nodes, &hints);
    if target.is_none() {
        warn!("No audio source matched the configured hints");
    }
    Ok(target)
}

/// Playback side of the loopback, created once the capture format is known
struct PlaybackSlot {
    stream: Option<pw::stream::StreamRc>,
    listener: Option<pw::stream::StreamListener<PlaybackData>>,
    rate: u32,
    channels: u32,
}

struct PlaybackData {
    shared: AudioShared,
    scratch: Vec<i16>,
    channels: u32,
}

struct CaptureData {
    format: AudioInfoRaw,
    shared: AudioShared,
    scratch: Vec<i16>,
    fifo_bound: usize,
    core: pw::core::CoreRc,
    playback: Rc<RefCell<PlaybackSlot>>,
}

/// Serialize an S16LE format pod, optionally pinning rate and channels
fn audio_format_pod(rate: u32, channels: u32) -> Result<Vec<u8>> {
    let mut info = AudioInfoRaw::new();
    info.set_format(AudioFormat::S16LE);
    if rate > 0 {
        info.set_rate(rate);
    }
    if channels > 0 {
        info.set_channels(channels);
    }

    let obj = spa::pod::Object {
        type_: SpaTypes::ObjectParamFormat.as_raw(),
        id: ParamType::EnumFormat.as_raw(),
        properties: info.into(),
    };

    PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map(|(cursor, _)| cursor.into_inner())
    .map_err(|e| HdmicapError::AudioStart(format!("format pod: {:?}", e)))
}

/// Create or recreate the playback stream for a negotiated format
fn ensure_playback(
    core: &pw::core::CoreRc,
    slot: &Rc<RefCell<PlaybackSlot>>,
    shared: &AudioShared,
    rate: u32,
    channels: u32,
) {
    {
        let slot = slot.borrow();
        if slot.stream.is_some() && slot.rate == rate && slot.channels == channels {
            return;
        }
    }
    info!("Creating playback stream at {} Hz, {} ch", rate, channels);

    let mut slot_mut = slot.borrow_mut();
    // Listener first, it borrows the stream.
    slot_mut.listener = None;
    slot_mut.stream = None;

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "hdmicap",
    };

    let stream = match pw::stream::StreamRc::new(core.clone(), "hdmicap-playback", props) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Playback stream creation failed: {}", e);
            return;
        }
    };

    let user_data = PlaybackData {
        shared: shared.clone(),
        scratch: Vec::new(),
        channels,
    };

    let listener = stream
        .add_local_listener_with_user_data(user_data)
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }
            let data = &mut datas[0];
            let stride = 2 * user_data.channels.max(1) as usize;
            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;
            let n_samples = n_frames * user_data.channels.max(1) as usize;
            user_data.scratch.resize(n_samples, 0);
            // Shortfall is zero-padded, playback never starves.
            user_data.shared.fifo.drain_into(&mut user_data.scratch);

            for (dst, sample) in slice
                .chunks_exact_mut(2)
                .zip(user_data.scratch.iter())
            {
                dst.copy_from_slice(&sample.to_le_bytes());
            }

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = (n_frames * stride) as u32;
        })
        .register();

    let listener = match listener {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Playback listener registration failed: {}", e);
            return;
        }
    };

    let values = match audio_format_pod(rate, channels) {
        Ok(values) => values,
        Err(e) => {
            warn!("Playback format pod failed: {}", e);
            return;
        }
    };
    let Some(pod) = Pod::from_bytes(&values) else {
        warn!("Playback format pod did not parse back");
        return;
    };
    let mut params = [pod];

    if let Err(e) = stream.connect(
        spa::utils::Direction::Output,
        None,
        StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS | StreamFlags::RT_PROCESS,
        &mut params,
    ) {
        warn!("Playback stream connect failed: {}", e);
        return;
    }

    slot_mut.stream = Some(stream);
    slot_mut.listener = Some(listener);
    slot_mut.rate = rate;
    slot_mut.channels = channels;
}

fn run_loopback(
    shared: AudioShared,
    config: AudioConfig,
    target: Option<u32>,
    running: Arc<AtomicBool>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
    stop_rx: pw::channel::Receiver<LoopCommand>,
) {
    let _guard = PwInitGuard::acquire();

    let fail = |running: &AtomicBool, msg: String| {
        running.store(false, Ordering::SeqCst);
        let _ = ready_tx.send(Err(HdmicapError::AudioStart(msg)));
    };

    let mainloop = match pw::main_loop::MainLoopRc::new(None) {
        Ok(mainloop) => mainloop,
        Err(e) => return fail(&running, format!("main loop: {}", e)),
    };
    let context = match pw::context::ContextRc::new(&mainloop, None) {
        Ok(context) => context,
        Err(e) => return fail(&running, format!("context: {}", e)),
    };
    let core = match context.connect_rc(None) {
        Ok(core) => core,
        Err(e) => return fail(&running, format!("connect: {}", e)),
    };

    let mainloop_weak = mainloop.downgrade();
    let _stop_rx = stop_rx.attach(mainloop.loop_(), move |command| match command {
        LoopCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    let playback = Rc::new(RefCell::new(PlaybackSlot {
        stream: None,
        listener: None,
        rate: 0,
        channels: 0,
    }));

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Production",
        *pw::keys::APP_NAME => "hdmicap",
    };

    let capture = match pw::stream::StreamRc::new(core.clone(), "hdmicap-capture", props) {
        Ok(stream) => stream,
        Err(e) => return fail(&running, format!("capture stream: {}", e)),
    };

    let user_data = CaptureData {
        format: AudioInfoRaw::new(),
        shared: shared.clone(),
        scratch: Vec::new(),
        fifo_bound: 0,
        core: core.clone(),
        playback: playback.clone(),
    };

    let listener = capture
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != ParamType::Format.as_raw() {
                return;
            }
            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(pair) => pair,
                Err(_) => return,
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }
            if user_data.format.parse(param).is_err() {
                warn!("Unparseable capture format param");
                return;
            }

            let rate = user_data.format.rate();
            let channels = user_data.format.channels();
            info!("Capture format negotiated: {} Hz, {} ch", rate, channels);
            user_data.shared.set_format(rate, channels);
            ensure_playback(
                &user_data.core,
                &user_data.playback,
                &user_data.shared,
                rate,
                channels,
            );
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }
            let data = &mut datas[0];
            let used = data.chunk().size() as usize;
            let Some(bytes) = data.data() else {
                return;
            };
            let used = used.min(bytes.len()) & !1;

            let gain = user_data.shared.gain.get();
            user_data.scratch.clear();
            user_data.scratch.extend(
                bytes[..used]
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );
            level::apply_gain(&mut user_data.scratch, gain);
            user_data.shared.peak.set(level::rms(&user_data.scratch));

            // One second of queued audio, but never less than four
            // callbacks' worth.
            let rate = user_data.format.rate().max(1);
            let channels = user_data.format.channels().max(1);
            let bound = ((rate * channels) as usize).max(4 * user_data.scratch.len());
            if bound != user_data.fifo_bound {
                user_data.shared.fifo.set_bound(bound);
                user_data.fifo_bound = bound;
            }

            user_data.shared.fifo.push_slice(&user_data.scratch);
        })
        .register();

    let _listener = match listener {
        Ok(listener) => listener,
        Err(e) => return fail(&running, format!("capture listener: {}", e)),
    };

    let values = match audio_format_pod(config.rate, config.channels) {
        Ok(values) => values,
        Err(e) => return fail(&running, format!("{}", e)),
    };
    let Some(pod) = Pod::from_bytes(&values) else {
        return fail(&running, "capture format pod did not parse back".to_string());
    };
    let mut params = [pod];

    if let Err(e) = capture.connect(
        spa::utils::Direction::Input,
        target,
        StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS | StreamFlags::RT_PROCESS,
        &mut params,
    ) {
        return fail(&running, format!("capture connect: {}", e));
    }

    let _ = ready_tx.send(Ok(()));
    mainloop.run();

    // Tear down streams before the core goes away.
    {
        let mut slot = playback.borrow_mut();
        slot.listener = None;
        slot.stream = None;
    }
    shared.fifo.clear();
    shared.peak.set(0.0);
    running.store(false, Ordering::SeqCst);
    debug!("Audio loopback thread exiting");
}
