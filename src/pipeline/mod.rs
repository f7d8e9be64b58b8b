pub mod mixbus;
pub mod pattern;
pub mod persistence;
pub mod player;
pub mod project;
pub mod pulse;
pub mod scheduler;
pub mod song;
pub mod test_fixture;
pub mod transport;
pub mod voice;

pub use player::Player;
pub use project::EngineConfig;
pub use scheduler::{Engine, EngineSnapshot};
