//! Repository layer for database access.
//!
//! Every mutation is a single independently committed statement; there are no
//! transactions spanning stages.

pub mod channel;
pub mod chapter;
pub mod job;
pub mod queue;
pub mod video;

pub use channel::*;
pub use chapter::*;
pub use job::*;
pub use queue::*;
pub use video::*;
