use std::collections::HashMap;

use super::frame::StereoFrame;
use super::node::Node;
use crate::audio_api::{Endpoint, GraphCommand, NodeId};

const PRUNE_INTERVAL: u64 = 1024; // frames between automation pruning passes

struct GraphNode {
    id: NodeId,
    node: Node,
    outputs: Vec<Endpoint>,
    ended: bool,
}

/// Renders the node graph one sample at a time.
///
/// The graph is re-indexed whenever its topology changes: `inputs` and
/// `order` are positions into `nodes`. Edges into delay nodes are left out
/// of the ordering, so a delay can sit on a feedback loop: it emits from its
/// line first and is fed after everything else has rendered.
pub struct GraphEngine {
    sample_rate: f32,
    frame: u64, // frames rendered so far, the render clock
    nodes: Vec<GraphNode>,
    index: HashMap<NodeId, usize>,
    inputs: Vec<Vec<usize>>,
    order: Vec<usize>,
    to_output: Vec<usize>,
    values: Vec<f32>,
    dirty: bool,
    ended: Vec<NodeId>,
}

impl GraphEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            frame: 0,
            nodes: Vec::new(),
            index: HashMap::new(),
            inputs: Vec::new(),
            order: Vec::new(),
            to_output: Vec::new(),
            values: Vec::new(),
            dirty: false,
            ended: Vec::new(),
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn handle_cmd(&mut self, cmd: GraphCommand) {
        match cmd {
            GraphCommand::Create { id, spec } => {
                let node = Node::from_spec(spec, self.sample_rate);
                self.index.insert(id, self.nodes.len());
                self.nodes.push(GraphNode { id, node, outputs: Vec::new(), ended: false });
                self.dirty = true;
            }
            GraphCommand::Connect { from, to } => {
                if let Endpoint::Node(target) = to {
                    if !self.index.contains_key(&target) {
                        return;
                    }
                }
                if let Some(n) = self.get_mut(from) {
                    if !n.outputs.contains(&to) {
                        n.outputs.push(to);
                    }
                    self.dirty = true;
                }
            }
            GraphCommand::Disconnect(id) => self.remove(id),
            GraphCommand::Start { id, at } => {
                if let Some(n) = self.get_mut(id) {
                    n.node.schedule_start(at);
                }
            }
            GraphCommand::Stop { id, at } => {
                if let Some(n) = self.get_mut(id) {
                    n.node.schedule_stop(at);
                }
            }
            GraphCommand::Automate { id, param, event } => {
                if let Some(n) = self.get_mut(id) {
                    n.node.automate(param, event);
                }
            }
        }
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let i = *self.index.get(&id)?;
        self.nodes.get_mut(i)
    }

    fn remove(&mut self, id: NodeId) {
        let Some(i) = self.index.remove(&id) else { return };
        self.nodes.swap_remove(i);
        if let Some(moved) = self.nodes.get(i) {
            self.index.insert(moved.id, i);
        }
        let gone = Endpoint::Node(id);
        for n in &mut self.nodes {
            n.outputs.retain(|o| *o != gone);
        }
        self.dirty = true;
    }

    fn rebuild(&mut self) {
        let count = self.nodes.len();
        self.inputs = vec![Vec::new(); count];
        self.to_output.clear();
        for (i, n) in self.nodes.iter().enumerate() {
            for out in &n.outputs {
                match out {
                    Endpoint::Output => self.to_output.push(i),
                    Endpoint::Node(target) => {
                        if let Some(&t) = self.index.get(target) {
                            self.inputs[t].push(i);
                        }
                    }
                }
            }
        }

        // Kahn's algorithm; delay inputs don't count as dependencies
        let mut pending: Vec<usize> = (0..count)
            .map(|i| if self.nodes[i].node.is_delay() { 0 } else { self.inputs[i].len() })
            .collect();
        let mut ready: Vec<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (t, srcs) in self.inputs.iter().enumerate() {
            if self.nodes[t].node.is_delay() {
                continue;
            }
            for &s in srcs {
                dependents[s].push(t);
            }
        }
        self.order.clear();
        while let Some(i) = ready.pop() {
            self.order.push(i);
            for &t in &dependents[i] {
                pending[t] -= 1;
                if pending[t] == 0 {
                    ready.push(t);
                }
            }
        }
        if self.order.len() < count {
            // a cycle without a delay; render it anyway with one-sample-stale reads
            let placed: Vec<bool> = {
                let mut p = vec![false; count];
                for &i in &self.order {
                    p[i] = true;
                }
                p
            };
            self.order.extend((0..count).filter(|&i| !placed[i]));
        }
        self.values.resize(count, 0.0);
        self.dirty = false;
    }

    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        if self.dirty {
            self.rebuild();
        }
        for frame in out.iter_mut() {
            let t = self.frame as f64 / self.sample_rate as f64;
            for k in 0..self.order.len() {
                let i = self.order[k];
                let input: f32 = self.inputs[i].iter().map(|&s| self.values[s]).sum();
                self.values[i] = self.nodes[i].node.process(input, t);
            }
            for i in 0..self.nodes.len() {
                if self.nodes[i].node.is_delay() {
                    let input: f32 = self.inputs[i].iter().map(|&s| self.values[s]).sum();
                    self.nodes[i].node.feed(input);
                }
            }
            let mix: f32 = self.to_output.iter().map(|&i| self.values[i]).sum();
            *frame = StereoFrame::mono(mix);

            self.frame += 1;
            if self.frame % PRUNE_INTERVAL == 0 {
                self.housekeeping(t);
            }
        }
    }

    fn housekeeping(&mut self, t: f64) {
        for n in &mut self.nodes {
            n.node.prune(t);
            if !n.ended && n.node.finished(t) {
                n.ended = true;
                self.ended.push(n.id);
            }
        }
    }

    pub fn take_ended(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_api::{Automation, NodeSpec, Param, Waveform};

    const SR: u32 = 8192;

    fn create(engine: &mut GraphEngine, id: u64, spec: NodeSpec) -> NodeId {
        let id = NodeId(id);
        engine.handle_cmd(GraphCommand::Create { id, spec });
        id
    }

    fn render(engine: &mut GraphEngine, frames: usize) -> Vec<StereoFrame> {
        let mut out = vec![StereoFrame::default(); frames];
        engine.render_block(&mut out);
        out
    }

    #[test]
    fn oscillator_through_gain_reaches_output() {
        let mut e = GraphEngine::new(SR);
        let osc = create(&mut e, 1, NodeSpec::Oscillator { waveform: Waveform::Square, frequency: 64.0 });
        let gain = create(&mut e, 2, NodeSpec::Gain { gain: 0.5 });
        e.handle_cmd(GraphCommand::Connect { from: osc, to: Endpoint::Node(gain) });
        e.handle_cmd(GraphCommand::Connect { from: gain, to: Endpoint::Output });
        e.handle_cmd(GraphCommand::Start { id: osc, at: 0.0 });
        let out = render(&mut e, 256);
        assert!(out.iter().all(|f| (f.left.abs() - 0.5).abs() < 1e-6));
    }

    #[test]
    fn unconnected_nodes_are_silent() {
        let mut e = GraphEngine::new(SR);
        let osc = create(&mut e, 1, NodeSpec::Oscillator { waveform: Waveform::Square, frequency: 64.0 });
        e.handle_cmd(GraphCommand::Start { id: osc, at: 0.0 });
        let out = render(&mut e, 64);
        assert!(out.iter().all(|f| f.peak() == 0.0));
    }

    #[test]
    fn disconnect_removes_node_and_edges() {
        let mut e = GraphEngine::new(SR);
        let a = create(&mut e, 1, NodeSpec::Gain { gain: 1.0 });
        let b = create(&mut e, 2, NodeSpec::Gain { gain: 1.0 });
        let c = create(&mut e, 3, NodeSpec::Gain { gain: 1.0 });
        e.handle_cmd(GraphCommand::Connect { from: a, to: Endpoint::Node(b) });
        e.handle_cmd(GraphCommand::Connect { from: c, to: Endpoint::Node(b) });
        e.handle_cmd(GraphCommand::Disconnect(a));
        assert_eq!(e.node_count(), 2);
        render(&mut e, 1);
        e.handle_cmd(GraphCommand::Disconnect(a)); // twice is harmless
        assert_eq!(e.node_count(), 2);
    }

    #[test]
    fn feedback_through_delay_renders_echoes() {
        let mut e = GraphEngine::new(SR);
        let osc = create(&mut e, 1, NodeSpec::Oscillator { waveform: Waveform::Square, frequency: 1.0 });
        let delay = create(&mut e, 2, NodeSpec::Delay { time: 0.125 });
        let fb = create(&mut e, 3, NodeSpec::Gain { gain: 0.5 });
        e.handle_cmd(GraphCommand::Connect { from: osc, to: Endpoint::Node(delay) });
        e.handle_cmd(GraphCommand::Connect { from: delay, to: Endpoint::Node(fb) });
        e.handle_cmd(GraphCommand::Connect { from: fb, to: Endpoint::Node(delay) });
        e.handle_cmd(GraphCommand::Connect { from: delay, to: Endpoint::Output });
        e.handle_cmd(GraphCommand::Start { id: osc, at: 0.0 });
        e.handle_cmd(GraphCommand::Stop { id: osc, at: 0.0625 });
        let out = render(&mut e, SR as usize / 2);
        let at = |secs: f64| out[(secs * SR as f64) as usize + 4].left;
        assert!((at(0.125) - 1.0).abs() < 1e-3);
        assert!((at(0.25) - 0.5).abs() < 1e-3);
        assert!((at(0.375) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn stopped_sources_are_reported_once() {
        let mut e = GraphEngine::new(SR);
        let osc = create(&mut e, 1, NodeSpec::Oscillator { waveform: Waveform::Sine, frequency: 100.0 });
        e.handle_cmd(GraphCommand::Start { id: osc, at: 0.0 });
        e.handle_cmd(GraphCommand::Stop { id: osc, at: 0.1 });
        render(&mut e, SR as usize / 4);
        assert_eq!(e.take_ended(), vec![osc]);
        render(&mut e, SR as usize / 4);
        assert!(e.take_ended().is_empty());
    }

    #[test]
    fn gain_automation_is_sample_accurate() {
        let mut e = GraphEngine::new(SR);
        let osc = create(&mut e, 1, NodeSpec::Oscillator { waveform: Waveform::Square, frequency: 1.0 });
        let gain = create(&mut e, 2, NodeSpec::Gain { gain: 1.0 });
        e.handle_cmd(GraphCommand::Connect { from: osc, to: Endpoint::Node(gain) });
        e.handle_cmd(GraphCommand::Connect { from: gain, to: Endpoint::Output });
        e.handle_cmd(GraphCommand::Start { id: osc, at: 0.0 });
        e.handle_cmd(GraphCommand::Automate {
            id: gain,
            param: Param::Gain,
            event: Automation::SetValue { value: 0.0, time: 0.25 },
        });
        let out = render(&mut e, SR as usize / 2);
        let switch = SR as usize / 4;
        assert_eq!(out[switch - 1].left, 1.0);
        assert_eq!(out[switch].left, 0.0);
    }
}
