// The shared buses every voice plays into. Built once, wired before the first
// voice, and only released when the engine is torn down.
//
//   sidechain -> master -> compressor -> output
//   sidechain -> reverb -> reverb_gain -> master

use std::sync::Arc;

use super::project::EngineConfig;
use crate::audio::ParamTimeline;
use super::voice::EPSILON;
use crate::audio_api::{Automation, BackendError, CompressorSettings, Endpoint, NodeId, Param, SignalBackend};

pub const COMPRESSOR: CompressorSettings = CompressorSettings {
    threshold: -18.0,
    knee: 12.0,
    ratio: 4.0,
    attack: 0.005,
    release: 0.2,
};

/// Where a voice may connect. Voices never hold on to the buses themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusInputs {
    pub master: NodeId,
    pub sidechain: NodeId,
    pub reverb: NodeId,
}

#[derive(Debug)]
pub struct MixBus {
    sidechain: NodeId,
    master: NodeId,
    compressor: NodeId,
    reverb: NodeId,
    reverb_gain: NodeId,
    level: f64, // last master target
    master_gain: ParamTimeline, // what the master has been told, for anchoring ramps
    released: bool,
}

impl MixBus {
    /// Create and wire the bus network. The master starts silent. If any
    /// step fails the nodes made so far are freed again.
    pub fn build<B: SignalBackend + ?Sized>(
        backend: &mut B,
        cfg: &EngineConfig,
        impulse: Arc<[f32]>,
    ) -> Result<Self, BackendError> {
        let mut made = Vec::new();
        let result = Self::assemble(backend, cfg, impulse, &mut made);
        if result.is_err() {
            for id in made {
                backend.disconnect(id);
            }
        }
        result
    }

    fn assemble<B: SignalBackend + ?Sized>(
        backend: &mut B,
        cfg: &EngineConfig,
        impulse: Arc<[f32]>,
        made: &mut Vec<NodeId>,
    ) -> Result<Self, BackendError> {
        let mut track = |id: Result<NodeId, BackendError>| -> Result<NodeId, BackendError> {
            let id = id?;
            made.push(id);
            Ok(id)
        };
        let sidechain = track(backend.create_gain(1.0))?;
        let master = track(backend.create_gain(0.0))?;
        let compressor = track(backend.create_dynamics_compressor(COMPRESSOR))?;
        let reverb = track(backend.create_convolution_reverb(impulse))?;
        let reverb_gain = track(backend.create_gain(cfg.reverb_mix))?;

        backend.connect(sidechain, Endpoint::Node(master))?;
        backend.connect(master, Endpoint::Node(compressor))?;
        backend.connect(compressor, Endpoint::Output)?;
        backend.connect(sidechain, Endpoint::Node(reverb))?;
        backend.connect(reverb, Endpoint::Node(reverb_gain))?;
        backend.connect(reverb_gain, Endpoint::Node(master))?;

        Ok(Self {
            sidechain,
            master,
            compressor,
            reverb,
            reverb_gain,
            level: 0.0,
            master_gain: ParamTimeline::new(0.0),
            released: false,
        })
    }

    pub fn inputs(&self) -> BusInputs {
        BusInputs { master: self.master, sidechain: self.sidechain, reverb: self.reverb }
    }

    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn sidechain(&self) -> NodeId {
        self.sidechain
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Master gain at `t` as scheduled so far.
    pub fn master_gain_at(&self, t: f64) -> f64 {
        self.master_gain.value_at(t)
    }

    fn automate_master<B: SignalBackend + ?Sized>(&mut self, backend: &mut B, event: Automation) -> Result<(), BackendError> {
        backend.automate(self.master, Param::Gain, event)?;
        self.master_gain.apply(event);
        Ok(())
    }

    // Drop what is scheduled from `at` on and pin the master where it is.
    // A ramp to the current value keeps the curve up to `at` intact; a bare
    // set-value would leave a step where the cancelled ramp used to be.
    fn hold_master<B: SignalBackend + ?Sized>(&mut self, backend: &mut B, at: f64) -> Result<(), BackendError> {
        let current = self.master_gain.value_at(at);
        self.automate_master(backend, Automation::Cancel { time: at })?;
        self.automate_master(backend, Automation::LinearRamp { value: current, time: at })
    }

    /// Pump the sidechain for a kick at `at`. Anything still scheduled from
    /// an earlier kick is cancelled first so ramps never stack.
    pub fn duck<B: SignalBackend + ?Sized>(
        &self,
        backend: &mut B,
        at: f64,
        floor: f64,
        recovery: f64,
    ) -> Result<(), BackendError> {
        backend.cancel_scheduled_values(self.sidechain, Param::Gain, at)?;
        backend.set_value_at_time(self.sidechain, Param::Gain, floor.max(EPSILON), at)?;
        backend.exponential_ramp_to_value_at_time(self.sidechain, Param::Gain, 1.0, at + recovery)
    }

    /// Ramp the master from wherever it is at `at` (silence on a fresh
    /// start) up to `level`.
    pub fn fade_in<B: SignalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        at: f64,
        level: f64,
        duration: f64,
    ) -> Result<(), BackendError> {
        self.hold_master(backend, at)?;
        self.automate_master(backend, Automation::LinearRamp { value: level, time: at + duration })?;
        self.level = level;
        Ok(())
    }

    /// Ramp the master down to silence over exactly `duration`.
    pub fn fade_out<B: SignalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        at: f64,
        duration: f64,
    ) -> Result<(), BackendError> {
        self.hold_master(backend, at)?;
        self.automate_master(backend, Automation::LinearRamp { value: 0.0, time: at + duration })?;
        self.level = 0.0;
        Ok(())
    }

    /// Let the master decay towards silence; used on stop, where voices
    /// already scheduled are allowed to ring out under it.
    pub fn settle<B: SignalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        at: f64,
        time_constant: f64,
    ) -> Result<(), BackendError> {
        self.hold_master(backend, at)?;
        let time_constant = time_constant.max(EPSILON);
        self.automate_master(backend, Automation::SetTarget { target: 0.0, time: at, time_constant })?;
        self.level = 0.0;
        Ok(())
    }

    /// Disconnect every bus node. Safe to call more than once.
    pub fn release<B: SignalBackend + ?Sized>(&mut self, backend: &mut B) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        for id in [self.sidechain, self.reverb, self.reverb_gain, self.master, self.compressor] {
            backend.disconnect(id);
        }
        true
    }
}
