pub mod audio;
pub mod audio_api;
pub mod middle;
pub mod pipeline;
pub mod shared;
