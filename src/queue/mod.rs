//! Job queue abstraction.
//!
//! The pipeline only needs submit, priority dequeue and a pending snapshot;
//! [`MemoryJobQueue`] provides them in-process. A broker-backed queue slots
//! in behind the same trait.

mod dispatcher;
mod memory;
mod worker;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::StreamProtocol;

pub use dispatcher::{Dispatcher, ScanReport};
pub use memory::MemoryJobQueue;
pub use worker::{spawn_periodic, Worker};

/// Transcoding runs on its own queue so it never starves other background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Default,
    VideoProcessing,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Default => "default",
            QueueName::VideoProcessing => "video_processing",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    ProcessVideo {
        video_id: Uuid,
        profiles: Option<Vec<String>>,
    },
    GenerateStreams {
        video_id: Uuid,
        protocol: Option<StreamProtocol>,
        force: bool,
    },
}

impl Job {
    pub fn video_id(&self) -> Uuid {
        match self {
            Job::ProcessVideo { video_id, .. } | Job::GenerateStreams { video_id, .. } => *video_id,
        }
    }
}

/// Opaque handle returned by [`JobQueue::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub queue: QueueName,
    pub priority: i32,
    /// Submission order within the queue.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub handle: JobHandle,
    pub job: Job,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// An identical job that is still waiting keeps its place and handle.
    async fn submit(&self, queue: QueueName, job: Job, priority: i32) -> Result<JobHandle, PipelineError>;

    /// Highest priority first, submission order within a priority.
    /// Waits up to `wait` for a job to arrive.
    async fn dequeue(&self, queue: QueueName, wait: Duration) -> Result<Option<QueuedJob>, PipelineError>;

    /// Waiting jobs in dequeue order.
    async fn pending(&self, queue: QueueName) -> Vec<QueuedJob>;

    async fn depth(&self, queue: QueueName) -> usize {
        self.pending(queue).await.len()
    }
}
