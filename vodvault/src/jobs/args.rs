//! Job argument payloads.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::database::models::JobDbModel;

/// Arguments shared by every archive task unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveVideoArgs {
    pub queue_id: String,
    /// Epoch ms of the last heartbeat; `0` until the unit first reports.
    #[serde(default)]
    pub heartbeat_time: i64,
    /// Enqueue the following stage(s) after success.
    #[serde(rename = "continue", default)]
    pub continue_chain: bool,
}

impl ArchiveVideoArgs {
    pub fn new(queue_id: impl Into<String>, continue_chain: bool) -> Self {
        Self {
            queue_id: queue_id.into(),
            heartbeat_time: 0,
            continue_chain,
        }
    }

    pub fn from_job(job: &JobDbModel) -> Result<Self> {
        Ok(serde_json::from_str(&job.args)?)
    }
}
