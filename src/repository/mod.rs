//! Explicit persistence interfaces.
//!
//! Every component reads and writes records through these traits instead of
//! touching the database directly, so the pipeline runs unchanged against
//! Postgres ([`crate::db::PgStore`]) or the in-process [`MemoryStore`].
//! No method has side effects beyond its own rows.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Account, Alert, AlertRule, EncodedFile, EncodingProfile, ProcessingMetric, ProcessingStatus,
    Stream, StreamProtocol, SystemMetric, Video,
};

pub use memory::MemoryStore;

/// Finished-job counts over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub succeeded: u64,
    pub failed: u64,
}

impl OutcomeCounts {
    /// `failed / (failed + succeeded)` as a percentage; 0 when nothing finished.
    pub fn error_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            return 0.0;
        }
        self.failed as f64 / total as f64 * 100.0
    }
}

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn load_video(&self, id: Uuid) -> Result<Video, StoreError>;

    async fn save_video(&self, video: &Video) -> Result<(), StoreError>;

    /// Atomically moves a `pending` video to `processing`.
    ///
    /// Returns `None` when the video exists but is not pending, so only one
    /// caller can win under concurrent dispatch.
    async fn claim_video(&self, id: Uuid) -> Result<Option<Video>, StoreError>;

    /// Oldest first.
    async fn videos_with_status(
        &self,
        status: ProcessingStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Video>, StoreError>;

    /// `processing` videos whose last progress save is older than `idle_since`.
    /// A long run that keeps reporting progress is never stuck.
    async fn stuck_videos(&self, idle_since: DateTime<Utc>) -> Result<Vec<Video>, StoreError>;

    async fn outcomes_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StoreError>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Active profiles in `sort_order`.
    async fn active_profiles(&self) -> Result<Vec<EncodingProfile>, StoreError>;

    async fn save_profile(&self, profile: &EncodingProfile) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EncodedFileRepository: Send + Sync {
    /// Replaces the full rendition set of a video.
    async fn replace_encoded_files(
        &self,
        video_id: Uuid,
        files: &[EncodedFile],
    ) -> Result<(), StoreError>;

    async fn encoded_files(&self, video_id: Uuid) -> Result<Vec<EncodedFile>, StoreError>;
}

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn record_metric(&self, metric: &ProcessingMetric) -> Result<(), StoreError>;

    async fn metrics_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingMetric>, StoreError>;

    /// Mean seconds per successful attempt since `since`.
    async fn average_processing_time(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;
}

#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn find_stream(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
        profile_id: Uuid,
    ) -> Result<Option<Stream>, StoreError>;

    /// Upserts on `(video_id, protocol, profile_id)`.
    async fn save_stream(&self, stream: &Stream) -> Result<(), StoreError>;

    async fn ready_streams(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
    ) -> Result<Vec<Stream>, StoreError>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    async fn save_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;

    /// Most recently created alert of a rule, whatever its status.
    async fn latest_alert(&self, rule_id: Uuid) -> Result<Option<Alert>, StoreError>;

    async fn active_alerts(&self, rule_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError>;

    async fn load_alert(&self, id: Uuid) -> Result<Alert, StoreError>;

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<(), StoreError>;

    async fn recent_system_metrics(&self, limit: usize) -> Result<Vec<SystemMetric>, StoreError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// `None` for unknown owners; `video_count` is filled from the videos table.
    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>, StoreError>;
}

/// Everything the pipeline persists, behind one handle.
pub trait Store:
    VideoRepository
    + ProfileRepository
    + EncodedFileRepository
    + MetricRepository
    + StreamRepository
    + AlertRepository
    + AccountRepository
{
}

impl<T> Store for T where
    T: VideoRepository
        + ProfileRepository
        + EncodedFileRepository
        + MetricRepository
        + StreamRepository
        + AlertRepository
        + AccountRepository
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_a_percentage() {
        let counts = OutcomeCounts {
            succeeded: 3,
            failed: 1,
        };
        assert_eq!(counts.error_rate(), 25.0);
        assert_eq!(OutcomeCounts::default().error_rate(), 0.0);
    }
}
