// A backend that renders only when asked. Used to bounce a performance to a
// WAV file without a sound card: the caller alternates between scheduling
// (one engine pulse) and rendering one pulse worth of audio.

use super::engine::GraphEngine;
use super::frame::StereoFrame;
use super::node_id::next_node_id;
use super::sample_buffer::SampleBuffer;
use crate::audio_api::{Automation, BackendError, Endpoint, GraphCommand, NodeId, NodeSpec, Param, SignalBackend};

pub struct OfflineBackend {
    engine: GraphEngine,
    sample_rate: u32,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self { engine: GraphEngine::new(sample_rate), sample_rate }
    }

    pub fn render(&mut self, frames: usize, into: &mut SampleBuffer) {
        let start = into.data.len();
        into.data.resize(start + frames, StereoFrame::default());
        self.engine.render_block(&mut into.data[start..]);
    }

    pub fn live_nodes(&self) -> usize {
        self.engine.node_count()
    }
}

impl SignalBackend for OfflineBackend {
    fn now(&self) -> f64 {
        self.engine.frames_rendered() as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn create(&mut self, spec: NodeSpec) -> Result<NodeId, BackendError> {
        let id = next_node_id();
        self.engine.handle_cmd(GraphCommand::Create { id, spec });
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        self.engine.handle_cmd(GraphCommand::Connect { from, to });
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        self.engine.handle_cmd(GraphCommand::Disconnect(node));
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.engine.handle_cmd(GraphCommand::Start { id: node, at });
        Ok(())
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<(), BackendError> {
        self.engine.handle_cmd(GraphCommand::Stop { id: node, at });
        Ok(())
    }

    fn automate(&mut self, node: NodeId, param: Param, event: Automation) -> Result<(), BackendError> {
        self.engine.handle_cmd(GraphCommand::Automate { id: node, param, event });
        Ok(())
    }

    fn drain_ended(&mut self) -> Vec<NodeId> {
        self.engine.take_ended()
    }
}
