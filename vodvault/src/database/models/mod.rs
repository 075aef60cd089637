//! Database models.

pub mod channel;
pub mod chapter;
pub mod job;
pub mod queue;
pub mod video;

pub use channel::ChannelDbModel;
pub use chapter::{ChapterDbModel, MutedSegmentDbModel};
pub use job::{JobDbModel, JobErrorRecord, JobState};
pub use queue::{QueueDbModel, Stage, TaskStatus};
pub use video::{VideoDbModel, VideoType};
