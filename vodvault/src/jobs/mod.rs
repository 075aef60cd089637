//! Persistent background job runtime.
//!
//! Jobs live in the `job` table. Each named queue has a fixed-size worker
//! pool that claims due jobs, runs the registered [`JobHandler`] under a
//! timeout, and finalizes the attempt (completed, retryable with backoff,
//! discarded, or cancelled).

pub mod args;
pub mod client;
pub mod handler;
pub mod heartbeat;
pub mod runtime;
pub mod worker_pool;

pub use args::ArchiveVideoArgs;
pub use client::{CancelOutcome, InsertOpts, JobClient};
pub use handler::{JobErrorHandler, JobHandler, NoopErrorHandler};
pub use heartbeat::spawn_heartbeat;
pub use runtime::{JobRuntime, JobRuntimeBuilder};
pub use worker_pool::{WorkerPool, WorkerPoolConfig, retry_backoff};

use crate::config::WorkerCounts;

/// Tag carried by every archive pipeline job.
pub const ARCHIVE_TAG: &str = "archive";
/// Tag for archive jobs whose terminal failure does not fail the archive.
pub const ALLOW_FAIL_TAG: &str = "allow_fail";

/// Named job queues, each served by its own worker pool.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum QueueName {
    Default,
    VideoDownload,
    VideoPostprocess,
    ChatRender,
}

impl QueueName {
    pub fn workers(&self, counts: &WorkerCounts) -> usize {
        match self {
            Self::Default => counts.default,
            Self::VideoDownload => counts.video_download,
            Self::VideoPostprocess => counts.video_postprocess,
            Self::ChatRender => counts.chat_render,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_queue_names() {
        let names: Vec<String> = QueueName::iter().map(|q| q.to_string()).collect();
        assert_eq!(
            names,
            vec!["default", "video-download", "video-postprocess", "chat-render"]
        );
        assert_eq!(
            "chat-render".parse::<QueueName>().unwrap(),
            QueueName::ChatRender
        );
    }
}
