pub mod player;

pub use player::{check_playable, PlaybackController, PlaybackState};
