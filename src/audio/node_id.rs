use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio_api::NodeId;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

// atomic counter so the control thread can name nodes before the audio thread
// has seen them
pub fn next_node_id() -> NodeId {
    NodeId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}
