//! Per-attempt processing metrics. Aggregation happens on read.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{EncodingProfile, MetricStatus, ProcessingMetric};
use crate::repository::{MetricRepository, Store};

/// One profile attempt as seen by the caller.
#[derive(Debug, Clone)]
pub struct Attempt<'a> {
    pub video_id: Uuid,
    pub profile: &'a EncodingProfile,
    pub elapsed: Duration,
    pub input_size: i64,
    pub output_size: Option<i64>,
    pub error: Option<String>,
}

pub struct MetricsRecorder {
    store: Arc<dyn Store>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, attempt: Attempt<'_>) -> Result<ProcessingMetric, StoreError> {
        let metric = ProcessingMetric {
            id: Uuid::new_v4(),
            video_id: attempt.video_id,
            profile_id: Some(attempt.profile.id),
            profile_name: attempt.profile.name.clone(),
            processing_time: attempt.elapsed.as_secs_f64(),
            input_size: attempt.input_size,
            output_size: attempt.output_size,
            bitrate: Some(attempt.profile.bitrate),
            status: if attempt.error.is_none() {
                MetricStatus::Success
            } else {
                MetricStatus::Error
            },
            error_text: attempt.error,
            created_at: Utc::now(),
        };
        self.store.record_metric(&metric).await?;
        log::debug!(
            "Metric for video {} profile {}: {} in {:.1}s",
            metric.video_id,
            metric.profile_name,
            metric.status,
            metric.processing_time
        );
        Ok(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryStore, MetricRepository};

    #[tokio::test]
    async fn failed_attempts_are_recorded_with_error_text() {
        let store = Arc::new(MemoryStore::new());
        let recorder = MetricsRecorder::new(store.clone());
        let profile = EncodingProfile::new("480p", 854, 480, 1400, 1);
        let video_id = Uuid::new_v4();

        recorder
            .record(Attempt {
                video_id,
                profile: &profile,
                elapsed: Duration::from_millis(1500),
                input_size: 1000,
                output_size: None,
                error: Some("encode_480p failed".into()),
            })
            .await
            .unwrap();

        let metrics = store.metrics_for_video(video_id).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].status, MetricStatus::Error);
        assert_eq!(metrics[0].processing_time, 1.5);
        assert_eq!(metrics[0].bitrate, Some(1400));
        assert_eq!(metrics[0].error_text.as_deref(), Some("encode_480p failed"));
    }
}
