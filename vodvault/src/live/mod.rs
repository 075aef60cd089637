//! Live stream capture: the video recorder and the chat websocket loop.

pub mod chat;
pub mod video;

pub use video::{LiveVideoCapture, LiveVideoRequest};
