// Headless backend that keeps a ledger of everything the engine asked for.
// The clock only moves when told to. Backs the test-suite and the `score`
// dry run.

use std::collections::{BTreeMap, HashMap};

use super::automation::ParamTimeline;
use crate::audio_api::{Automation, BackendError, Endpoint, NodeId, NodeSpec, Param, SignalBackend};

#[derive(Clone, Debug)]
pub struct RecordedNode {
    pub spec: NodeSpec,
    pub outputs: Vec<Endpoint>,
    pub start: Option<f64>,
    pub stop: Option<f64>,
    pub params: HashMap<Param, ParamTimeline>,
    pub disconnects: u32,
    ended_reported: bool,
}

impl RecordedNode {
    pub fn is_live(&self) -> bool {
        self.disconnects == 0
    }

    pub fn timeline(&self, param: Param) -> Option<&ParamTimeline> {
        self.params.get(&param)
    }
}

pub struct RecordingBackend {
    clock: f64,
    sample_rate: u32,
    resumable: bool,
    resumed: bool,
    reject_creates: usize,
    create_grace: usize,
    next_id: u64,
    nodes: BTreeMap<NodeId, RecordedNode>,
}

impl RecordingBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            clock: 0.0,
            sample_rate,
            resumable: true,
            resumed: false,
            reject_creates: 0,
            create_grace: 0,
            next_id: 1,
            nodes: BTreeMap::new(),
        }
    }

    pub fn set_time(&mut self, t: f64) {
        self.clock = self.clock.max(t); // monotonic
    }

    pub fn advance(&mut self, dt: f64) {
        self.clock += dt.max(0.0);
    }

    // simulate a device that stays locked until user interaction
    pub fn set_resumable(&mut self, resumable: bool) {
        self.resumable = resumable;
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    // make the next `count` node creations fail
    pub fn reject_next_creates(&mut self, count: usize) {
        self.reject_creates_after(0, count);
    }

    // let `grace` creations through, then fail `count` of them
    pub fn reject_creates_after(&mut self, grace: usize, count: usize) {
        self.create_grace = grace;
        self.reject_creates = count;
    }

    pub fn node(&self, id: NodeId) -> Option<&RecordedNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &RecordedNode)> {
        self.nodes.iter()
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.values().filter(|n| n.is_live()).count()
    }

    pub fn timeline(&self, id: NodeId, param: Param) -> Option<&ParamTimeline> {
        self.nodes.get(&id).and_then(|n| n.timeline(param))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut RecordedNode, BackendError> {
        self.nodes.get_mut(&id).ok_or(BackendError::UnknownNode(id))
    }
}

fn initial_params(spec: &NodeSpec) -> HashMap<Param, ParamTimeline> {
    let mut params = HashMap::new();
    match spec {
        NodeSpec::Oscillator { frequency, .. } => {
            params.insert(Param::Frequency, ParamTimeline::new(*frequency));
        }
        NodeSpec::Filter { frequency, q, .. } => {
            params.insert(Param::Frequency, ParamTimeline::new(*frequency));
            params.insert(Param::Q, ParamTimeline::new(*q));
        }
        NodeSpec::Gain { gain } => {
            params.insert(Param::Gain, ParamTimeline::new(*gain));
        }
        NodeSpec::Delay { time } => {
            params.insert(Param::DelayTime, ParamTimeline::new(*time));
        }
        _ => {}
    }
    params
}

impl SignalBackend for RecordingBackend {
    fn now(&self) -> f64 {
        self.clock
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        if !self.resumable {
            return Err(BackendError::Suspended("waiting for user gesture".into()));
        }
        self.resumed = true;
        Ok(())
    }

    fn create(&mut self, spec: NodeSpec) -> Result<NodeId, BackendError> {
        if self.reject_creates > 0 {
            if self.create_grace > 0 {
                self.create_grace -= 1;
            } else {
                self.reject_creates -= 1;
                return Err(BackendError::Rejected(format!("{} refused", spec.label())));
            }
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let params = initial_params(&spec);
        self.nodes.insert(
            id,
            RecordedNode { spec, outputs: Vec::new(), start: None, stop: None, params, disconnects: 0, ended_reported: false },
        );
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        if let Endpoint::Node(target) = to {
            if !self.nodes.contains_key(&target) {
                return Err(BackendError::UnknownNode(target));
            }
        }
        self.node_mut(from)?.outputs.push(to);
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.disconnects += 1;
        }
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.node_mut(node)?.start = Some(at);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.node_mut(node)?.stop = Some(at);
        Ok(())
    }

    fn automate(&mut self, node: NodeId, param: Param, event: Automation) -> Result<(), BackendError> {
        let n = self.node_mut(node)?;
        n.params.entry(param).or_insert_with(|| ParamTimeline::new(0.0)).apply(event);
        Ok(())
    }

    fn drain_ended(&mut self) -> Vec<NodeId> {
        let now = self.clock;
        let mut ended = Vec::new();
        for (id, n) in self.nodes.iter_mut() {
            if n.is_live() && !n.ended_reported && n.stop.is_some_and(|s| now >= s) {
                n.ended_reported = true;
                ended.push(*id);
            }
        }
        ended
    }
}
