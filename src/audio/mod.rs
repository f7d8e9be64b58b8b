use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::audio_api::{Automation, BackendError, Endpoint, GraphCommand, NodeId, NodeSpec, Param, SignalBackend};

mod automation;
mod effect;
mod engine;
mod frame;
mod node;
mod node_id;
mod offline;
mod recording;
mod sample_buffer;

pub use automation::ParamTimeline;
pub use engine::GraphEngine;
pub use frame::StereoFrame;
pub use node_id::next_node_id;
pub use offline::OfflineBackend;
pub use recording::{RecordedNode, RecordingBackend};
pub use sample_buffer::{SampleBuffer, impulse_response, white_noise};

const COMMAND_QUEUE: usize = 4096;
const ENDED_QUEUE: usize = 1024;

/// Audio-thread side of the ended-source queue. Never blocks; a full queue
/// drops the notice and counts it, and the reaper frees those voices later.
struct EndedSender {
    tx: Sender<NodeId>,
    dropped: Arc<AtomicU64>,
}

impl EndedSender {
    fn report(&self, id: NodeId) {
        if self.tx.try_send(id).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Control side of the ended-source queue.
struct EndedReceiver {
    rx: Receiver<NodeId>,
    dropped: Arc<AtomicU64>,
    dropped_seen: u64,
}

impl EndedReceiver {
    fn drain(&mut self) -> Vec<NodeId> {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.dropped_seen {
            tracing::warn!(count = dropped - self.dropped_seen, "ended notices dropped, left for the reaper");
            self.dropped_seen = dropped;
        }
        self.rx.try_iter().collect()
    }
}

fn ended_queue(capacity: usize) -> (EndedSender, EndedReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (EndedSender { tx, dropped: Arc::clone(&dropped) }, EndedReceiver { rx, dropped, dropped_seen: 0 })
}

// Keeps the cpal stream alive. Not Send on every platform, so it stays with
// whoever opened the device while the backend half travels to the engine.
pub struct AudioHandle {
    _output_stream: cpal::Stream,
}

/// The control-side half of the realtime renderer: node ids are allocated
/// here, commands are queued to the audio callback, and the render clock is
/// read from the frame counter the callback advances.
pub struct RealtimeBackend {
    tx: Sender<GraphCommand>,
    ended: EndedReceiver,
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl RealtimeBackend {
    fn send(&self, cmd: GraphCommand) -> Result<(), BackendError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => BackendError::QueueFull,
            TrySendError::Disconnected(_) => BackendError::Disconnected,
        })
    }
}

impl SignalBackend for RealtimeBackend {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn create(&mut self, spec: NodeSpec) -> Result<NodeId, BackendError> {
        let id = next_node_id();
        self.send(GraphCommand::Create { id, spec })?;
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        self.send(GraphCommand::Connect { from, to })
    }

    fn disconnect(&mut self, node: NodeId) {
        if let Err(e) = self.send(GraphCommand::Disconnect(node)) {
            tracing::warn!(?node, "could not release node: {e}");
        }
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.send(GraphCommand::Start { id: node, at })
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.send(GraphCommand::Stop { id: node, at })
    }

    fn automate(&mut self, node: NodeId, param: Param, event: Automation) -> Result<(), BackendError> {
        self.send(GraphCommand::Automate { id: node, param, event })
    }

    fn drain_ended(&mut self) -> Vec<NodeId> {
        self.ended.drain()
    }
}

pub fn start_audio() -> anyhow::Result<(AudioHandle, RealtimeBackend)> {
    let (tx, rx) = crossbeam_channel::bounded::<GraphCommand>(COMMAND_QUEUE);
    let (ended_tx, ended) = ended_queue(ENDED_QUEUE);

    let host = cpal::default_host();
    let device = host.default_output_device().context("no default output device")?;
    let config = device.default_output_config().context("no default output config")?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let frames = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(false)); // suspended until resume()

    match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let output_stream = build_output_stream_f32(
                &device,
                &config.into(),
                OutputState { rx, ended_tx, frames: Arc::clone(&frames), running: Arc::clone(&running) },
                sample_rate,
                channels,
            )?;
            output_stream.play().context("failed to play output stream")?;
            tracing::info!(sample_rate, channels, "audio output started");

            Ok((
                AudioHandle { _output_stream: output_stream },
                RealtimeBackend { tx, ended, frames, running, sample_rate },
            ))
        }
        other => anyhow::bail!("unsupported sample format {other:?} (only f32 supported for now)"),
    }
}

struct OutputState {
    rx: Receiver<GraphCommand>,
    ended_tx: EndedSender,
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

// ── Output stream ─────────────────────────────────────────────────

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: OutputState,
    sample_rate: u32,
    channels: usize,
) -> anyhow::Result<cpal::Stream> {
    let mut engine = GraphEngine::new(sample_rate);
    let mut scratch: Vec<StereoFrame> = Vec::new();

    let err_fn = |err| tracing::error!("audio output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            while let Ok(cmd) = state.rx.try_recv() { // apply queued graph edits
                engine.handle_cmd(cmd);
            }

            // the clock stays frozen until the backend is resumed
            if !state.running.load(Ordering::Acquire) {
                data.fill(0.0);
                return;
            }

            let n_frames = data.len() / channels.max(1);
            scratch.resize(n_frames, StereoFrame::default());
            engine.render_block(&mut scratch);
            for (out, frame) in data.chunks_exact_mut(channels.max(1)).zip(&scratch) {
                for (ch, sample) in out.iter_mut().enumerate() {
                    *sample = if ch % 2 == 0 { frame.left } else { frame.right };
                }
            }
            state.frames.fetch_add(n_frames as u64, Ordering::Release);

            for id in engine.take_ended() {
                state.ended_tx.report(id);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
