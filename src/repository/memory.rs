use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountRepository, AlertRepository, EncodedFileRepository, MetricRepository, OutcomeCounts,
    ProfileRepository, StreamRepository, VideoRepository,
};
use crate::error::StoreError;
use crate::models::{
    Account, Alert, AlertRule, AlertStatus, EncodedFile, EncodingProfile, MetricStatus,
    ProcessingMetric, ProcessingStatus, Stream, StreamProtocol, SystemMetric, Video,
};

#[derive(Default)]
struct Tables {
    videos: HashMap<Uuid, Video>,
    profiles: Vec<EncodingProfile>,
    encoded_files: Vec<EncodedFile>,
    metrics: Vec<ProcessingMetric>,
    streams: Vec<Stream>,
    rules: Vec<AlertRule>,
    alerts: Vec<Alert>,
    system_metrics: Vec<SystemMetric>,
    accounts: HashMap<Uuid, Account>,
}

/// In-process store used by tests and single-node demos.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    metric_writes_fail: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: Account) {
        self.tables.lock().await.accounts.insert(account.id, account);
    }

    pub async fn all_streams(&self) -> Vec<Stream> {
        self.tables.lock().await.streams.clone()
    }

    pub async fn all_alerts(&self) -> Vec<Alert> {
        self.tables.lock().await.alerts.clone()
    }

    /// Every later `record_metric` fails.
    pub fn fail_metric_writes(&self) {
        self.metric_writes_fail.store(true, Ordering::SeqCst);
    }

    pub async fn system_metric_count(&self) -> usize {
        self.tables.lock().await.system_metrics.len()
    }
}

fn not_found(entity: &'static str, id: Uuid) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl VideoRepository for MemoryStore {
    async fn load_video(&self, id: Uuid) -> Result<Video, StoreError> {
        self.tables
            .lock()
            .await
            .videos
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("video", id))
    }

    async fn save_video(&self, video: &Video) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .videos
            .insert(video.id, video.clone());
        Ok(())
    }

    async fn claim_video(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        let mut tables = self.tables.lock().await;
        let video = tables.videos.get_mut(&id).ok_or_else(|| not_found("video", id))?;
        if video.processing_status != ProcessingStatus::Pending {
            return Ok(None);
        }
        let now = Utc::now();
        video.processing_status = ProcessingStatus::Processing;
        video.processing_progress = 0;
        video.processing_started_at = Some(now);
        video.updated_at = now;
        Ok(Some(video.clone()))
    }

    async fn videos_with_status(
        &self,
        status: ProcessingStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Video>, StoreError> {
        let tables = self.tables.lock().await;
        let mut videos: Vec<Video> = tables
            .videos
            .values()
            .filter(|v| v.processing_status == status)
            .cloned()
            .collect();
        videos.sort_by_key(|v| v.created_at);
        if let Some(limit) = limit {
            videos.truncate(limit);
        }
        Ok(videos)
    }

    async fn stuck_videos(&self, idle_since: DateTime<Utc>) -> Result<Vec<Video>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .videos
            .values()
            .filter(|v| {
                v.processing_status == ProcessingStatus::Processing && v.updated_at < idle_since
            })
            .cloned()
            .collect())
    }

    async fn outcomes_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StoreError> {
        let tables = self.tables.lock().await;
        let mut counts = OutcomeCounts::default();
        for video in tables.videos.values().filter(|v| v.updated_at >= since) {
            match video.processing_status {
                ProcessingStatus::Success => counts.succeeded += 1,
                ProcessingStatus::Failed => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn active_profiles(&self) -> Result<Vec<EncodingProfile>, StoreError> {
        let tables = self.tables.lock().await;
        let mut profiles: Vec<EncodingProfile> =
            tables.profiles.iter().filter(|p| p.is_active).cloned().collect();
        profiles.sort_by_key(|p| p.sort_order);
        Ok(profiles)
    }

    async fn save_profile(&self, profile: &EncodingProfile) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.profiles.retain(|p| p.id != profile.id);
        tables.profiles.push(profile.clone());
        Ok(())
    }
}

#[async_trait]
impl EncodedFileRepository for MemoryStore {
    async fn replace_encoded_files(
        &self,
        video_id: Uuid,
        files: &[EncodedFile],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.encoded_files.retain(|f| f.video_id != video_id);
        tables.encoded_files.extend_from_slice(files);
        Ok(())
    }

    async fn encoded_files(&self, video_id: Uuid) -> Result<Vec<EncodedFile>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .encoded_files
            .iter()
            .filter(|f| f.video_id == video_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MetricRepository for MemoryStore {
    async fn record_metric(&self, metric: &ProcessingMetric) -> Result<(), StoreError> {
        if self.metric_writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Pool("metrics table unavailable".to_string()));
        }
        self.tables.lock().await.metrics.push(metric.clone());
        Ok(())
    }

    async fn metrics_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingMetric>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .metrics
            .iter()
            .filter(|m| m.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn average_processing_time(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let tables = self.tables.lock().await;
        let times: Vec<f64> = tables
            .metrics
            .iter()
            .filter(|m| m.status == MetricStatus::Success && m.created_at >= since)
            .map(|m| m.processing_time)
            .collect();
        if times.is_empty() {
            return Ok(None);
        }
        Ok(Some(times.iter().sum::<f64>() / times.len() as f64))
    }
}

#[async_trait]
impl StreamRepository for MemoryStore {
    async fn find_stream(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
        profile_id: Uuid,
    ) -> Result<Option<Stream>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .streams
            .iter()
            .find(|s| s.video_id == video_id && s.protocol == protocol && s.profile_id == profile_id)
            .cloned())
    }

    async fn save_stream(&self, stream: &Stream) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.streams.iter_mut().find(|s| {
            s.video_id == stream.video_id
                && s.protocol == stream.protocol
                && s.profile_id == stream.profile_id
        }) {
            Some(existing) => {
                let id = existing.id;
                let created_at = existing.created_at;
                *existing = stream.clone();
                existing.id = id;
                existing.created_at = created_at;
            }
            None => tables.streams.push(stream.clone()),
        }
        Ok(())
    }

    async fn ready_streams(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
    ) -> Result<Vec<Stream>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .streams
            .iter()
            .filter(|s| s.video_id == video_id && s.protocol == protocol && s.is_ready)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.rules.iter().filter(|r| r.is_active).cloned().collect())
    }

    async fn save_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.rules.retain(|r| r.id != rule.id);
        tables.rules.push(rule.clone());
        Ok(())
    }

    async fn latest_alert(&self, rule_id: Uuid) -> Result<Option<Alert>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.rule_id == rule_id)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn active_alerts(&self, rule_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .filter(|a| rule_id.map_or(true, |id| a.rule_id == id))
            .cloned()
            .collect())
    }

    async fn load_alert(&self, id: Uuid) -> Result<Alert, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .alerts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| not_found("alert", id))
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert.clone(),
            None => tables.alerts.push(alert.clone()),
        }
        Ok(())
    }

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<(), StoreError> {
        self.tables.lock().await.system_metrics.push(metric.clone());
        Ok(())
    }

    async fn recent_system_metrics(&self, limit: usize) -> Result<Vec<SystemMetric>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .system_metrics
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get(&owner_id) else {
            return Ok(None);
        };
        let video_count = tables
            .videos
            .values()
            .filter(|v| v.owner_id == Some(owner_id))
            .count() as i64;
        Ok(Some(Account {
            video_count,
            ..account.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_only_succeeds_once() {
        let store = MemoryStore::new();
        let video = Video::new("clip", "/tmp/clip.mp4", None);
        store.save_video(&video).await.unwrap();

        let first = store.claim_video(video.id).await.unwrap();
        let second = store.claim_video(video.id).await.unwrap();

        assert_eq!(
            first.map(|v| v.processing_status),
            Some(ProcessingStatus::Processing)
        );
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_unknown_video_is_not_found() {
        let store = MemoryStore::new();
        let err = store.claim_video(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "video", .. }));
    }

    #[tokio::test]
    async fn account_counts_owned_videos() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store
            .insert_account(Account {
                id: owner,
                ..Account::default()
            })
            .await;
        for i in 0..3 {
            store
                .save_video(&Video::new(format!("v{i}"), "/tmp/x.mp4", Some(owner)))
                .await
                .unwrap();
        }
        let account = store.account(owner).await.unwrap().unwrap();
        assert_eq!(account.video_count, 3);
    }
}
