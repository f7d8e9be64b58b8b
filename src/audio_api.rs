// The contract between the music engine and whatever renders the signal graph.
//
// The engine only ever describes nodes declaratively (`NodeSpec`), wires them
// together, and schedules starts, stops and parameter automation against the
// backend's render clock. It never sees a sample.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressorSettings {
    pub threshold: f64, // dB
    pub knee: f64,      // dB
    pub ratio: f64,
    pub attack: f64,  // seconds
    pub release: f64, // seconds
}

#[derive(Clone, Debug)]
pub enum NodeSpec {
    Oscillator { waveform: Waveform, frequency: f64 },
    Noise { buffer: Arc<[f32]> }, // loops the prebuilt buffer
    Filter { kind: FilterKind, frequency: f64, q: f64 },
    Gain { gain: f64 },
    Convolver { impulse: Arc<[f32]> },
    Compressor(CompressorSettings),
    Delay { time: f64 },
}

impl NodeSpec {
    pub fn is_source(&self) -> bool {
        matches!(self, NodeSpec::Oscillator { .. } | NodeSpec::Noise { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeSpec::Oscillator { .. } => "oscillator",
            NodeSpec::Noise { .. } => "noise",
            NodeSpec::Filter { .. } => "filter",
            NodeSpec::Gain { .. } => "gain",
            NodeSpec::Convolver { .. } => "convolver",
            NodeSpec::Compressor(_) => "compressor",
            NodeSpec::Delay { .. } => "delay",
        }
    }
}

// automatable parameters; a node ignores automation for params it doesn't have
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    Gain,
    Frequency,
    Q,
    DelayTime,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Automation {
    SetValue { value: f64, time: f64 },
    LinearRamp { value: f64, time: f64 },
    ExponentialRamp { value: f64, time: f64 },
    SetTarget { target: f64, time: f64, time_constant: f64 },
    Cancel { time: f64 },
}

impl Automation {
    pub fn time(&self) -> f64 {
        match *self {
            Automation::SetValue { time, .. }
            | Automation::LinearRamp { time, .. }
            | Automation::ExponentialRamp { time, .. }
            | Automation::SetTarget { time, .. }
            | Automation::Cancel { time } => time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Node(NodeId),
    Output, // the device / bounce buffer
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("audio backend is suspended: {0}")]
    Suspended(String),
    #[error("audio backend has shut down")]
    Disconnected,
    #[error("audio command queue is full")]
    QueueFull,
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node rejected: {0}")]
    Rejected(String),
}

pub trait SignalBackend: Send {
    /// Monotonic render clock in seconds.
    fn now(&self) -> f64;
    fn sample_rate(&self) -> u32;
    /// Allow audible output. May fail while the device is still locked.
    fn resume(&mut self) -> Result<(), BackendError>;

    fn create(&mut self, spec: NodeSpec) -> Result<NodeId, BackendError>;
    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError>;
    /// Detach the node from the graph and free it. The id is dead afterwards.
    fn disconnect(&mut self, node: NodeId);
    fn start(&mut self, node: NodeId, at: f64) -> Result<(), BackendError>;
    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), BackendError>;
    fn automate(&mut self, node: NodeId, param: Param, event: Automation) -> Result<(), BackendError>;
    /// Sources whose stop time has been rendered past since the last call.
    fn drain_ended(&mut self) -> Vec<NodeId>;

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Oscillator { waveform, frequency })
    }

    fn create_noise_source(&mut self, buffer: Arc<[f32]>) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Noise { buffer })
    }

    fn create_filter(&mut self, kind: FilterKind, frequency: f64, q: f64) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Filter { kind, frequency, q })
    }

    fn create_gain(&mut self, gain: f64) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Gain { gain })
    }

    fn create_convolution_reverb(&mut self, impulse: Arc<[f32]>) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Convolver { impulse })
    }

    fn create_dynamics_compressor(&mut self, settings: CompressorSettings) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Compressor(settings))
    }

    fn create_delay(&mut self, time: f64) -> Result<NodeId, BackendError> {
        self.create(NodeSpec::Delay { time })
    }

    fn set_value_at_time(&mut self, node: NodeId, param: Param, value: f64, time: f64) -> Result<(), BackendError> {
        self.automate(node, param, Automation::SetValue { value, time })
    }

    fn linear_ramp_to_value_at_time(&mut self, node: NodeId, param: Param, value: f64, time: f64) -> Result<(), BackendError> {
        self.automate(node, param, Automation::LinearRamp { value, time })
    }

    fn exponential_ramp_to_value_at_time(&mut self, node: NodeId, param: Param, value: f64, time: f64) -> Result<(), BackendError> {
        self.automate(node, param, Automation::ExponentialRamp { value, time })
    }

    fn set_target_at_time(
        &mut self,
        node: NodeId,
        param: Param,
        target: f64,
        time: f64,
        time_constant: f64,
    ) -> Result<(), BackendError> {
        self.automate(node, param, Automation::SetTarget { target, time, time_constant })
    }

    fn cancel_scheduled_values(&mut self, node: NodeId, param: Param, time: f64) -> Result<(), BackendError> {
        self.automate(node, param, Automation::Cancel { time })
    }
}

// Commands the realtime and offline backends apply to their graph renderer.
#[derive(Clone, Debug)]
pub enum GraphCommand {
    Create { id: NodeId, spec: NodeSpec },
    Connect { from: NodeId, to: Endpoint },
    Disconnect(NodeId),
    Start { id: NodeId, at: f64 },
    Stop { id: NodeId, at: f64 },
    Automate { id: NodeId, param: Param, event: Automation },
}
