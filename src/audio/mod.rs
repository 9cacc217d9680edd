//! Audio buffers and playback through external players.

pub mod buffer;
pub mod player;

pub use buffer::AudioBuffer;
pub use player::{Player, PlayerSink, find_player};
