use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{Job, JobHandle, JobQueue, QueueName};
use crate::config::{PipelineConfig, SchedulerConfig};
use crate::error::{PipelineError, StoreError};
use crate::models::{ProcessingStatus, StreamProtocol, Video};
use crate::repository::{AccountRepository, Store, VideoRepository};
use crate::services::orchestrator::Orchestrator;
use crate::services::priority::{self, PriorityInput, QueuedPriority};

pub const STUCK_MESSAGE: &str = "stuck in processing";

/// Outcome of one pending scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub stuck_failed: Vec<Uuid>,
    pub enqueued: Vec<Uuid>,
}

/// Feeds the job queue: priority on submit, explicit retry, the periodic
/// pending scan and the optional auto-retry policy.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<Orchestrator>,
    scheduler: SchedulerConfig,
    pipeline: PipelineConfig,
    running: AtomicUsize,
}

/// Counts a job as running until dropped.
pub struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<Orchestrator>,
        scheduler: SchedulerConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            orchestrator,
            scheduler,
            pipeline,
            running: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn begin_job(&self) -> RunningGuard<'_> {
        self.running.fetch_add(1, Ordering::SeqCst);
        RunningGuard(&self.running)
    }

    pub fn running_jobs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn priority_of(&self, video: &Video) -> Result<i32, StoreError> {
        let account = match video.owner_id {
            Some(owner) => self.store.account(owner).await?,
            None => None,
        };
        Ok(priority::priority_for(PriorityInput {
            account: account.as_ref(),
            duration: video.duration,
        }))
    }

    /// Puts a pending video on the processing queue at its computed priority.
    pub async fn enqueue(
        &self,
        video_id: Uuid,
        profiles: Option<Vec<String>>,
    ) -> Result<JobHandle, PipelineError> {
        let video = self.store.load_video(video_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => PipelineError::VideoNotFound(video_id),
            other => other.into(),
        })?;
        let priority = self.priority_of(&video).await?;

        let handle = self
            .queue
            .submit(
                QueueName::VideoProcessing,
                Job::ProcessVideo { video_id, profiles },
                priority,
            )
            .await?;
        log::info!(
            "Queued video {} with priority {} ({}), position {}",
            video_id,
            priority,
            priority::priority_label(priority),
            self.queue_position(handle).await
        );
        Ok(handle)
    }

    pub async fn enqueue_streams(
        &self,
        video_id: Uuid,
        protocol: Option<StreamProtocol>,
        force: bool,
    ) -> Result<JobHandle, PipelineError> {
        self.queue
            .submit(
                QueueName::Default,
                Job::GenerateStreams {
                    video_id,
                    protocol,
                    force,
                },
                priority::PRIORITY_NORMAL,
            )
            .await
    }

    /// Jobs that will be dequeued before `handle`.
    pub async fn queue_position(&self, handle: JobHandle) -> usize {
        let pending: Vec<QueuedPriority> = self
            .queue
            .pending(handle.queue)
            .await
            .iter()
            .map(|j| QueuedPriority {
                priority: j.handle.priority,
                sequence: j.handle.sequence,
            })
            .collect();
        priority::queue_position(
            &pending,
            QueuedPriority {
                priority: handle.priority,
                sequence: handle.sequence,
            },
        )
    }

    /// `failed -> pending`, then back on the queue.
    pub async fn retry(&self, video_id: Uuid) -> Result<JobHandle, PipelineError> {
        self.orchestrator.retry(video_id).await?;
        self.enqueue(video_id, None).await
    }

    /// Applies the auto-retry policy after a failed run. Returns the new
    /// handle when the video was requeued.
    pub async fn after_failure(&self, video_id: Uuid) -> Result<Option<JobHandle>, PipelineError> {
        if self.pipeline.max_auto_retries == 0 {
            return Ok(None);
        }
        let mut video = self.store.load_video(video_id).await?;
        if video.retry_count >= self.pipeline.max_auto_retries as i32 {
            log::warn!(
                "Video {} failed after {} automatic retries",
                video_id,
                video.retry_count
            );
            return Ok(None);
        }
        if !video.reset_for_retry() {
            return Ok(None);
        }
        video.retry_count += 1;
        self.store.save_video(&video).await?;
        log::info!("Automatic retry {} for video {}", video.retry_count, video_id);
        self.enqueue(video_id, None).await.map(Some)
    }

    /// Fails jobs with no progress for `stuck_after_minutes`, then fills free
    /// capacity with the oldest pending videos.
    pub async fn scan_pending(&self, now: DateTime<Utc>) -> Result<ScanReport, PipelineError> {
        let mut report = ScanReport::default();

        let cutoff = now - Duration::minutes(self.scheduler.stuck_after_minutes);
        for mut video in self.store.stuck_videos(cutoff).await? {
            log::warn!(
                "Video {} has made no progress since {}, marking failed",
                video.id,
                video.updated_at
            );
            video.mark_failed(STUCK_MESSAGE);
            self.store.save_video(&video).await?;
            report.stuck_failed.push(video.id);
        }

        let queued = self.queue.pending(QueueName::VideoProcessing).await;
        let mut in_flight = queued.len() + self.running_jobs();
        if in_flight >= self.scheduler.max_concurrent_jobs {
            log::debug!("Pending scan: at capacity ({} in flight)", in_flight);
            return Ok(report);
        }

        for video in self
            .store
            .videos_with_status(ProcessingStatus::Pending, None)
            .await?
        {
            if in_flight >= self.scheduler.max_concurrent_jobs {
                break;
            }
            if queued.iter().any(|j| j.job.video_id() == video.id) {
                continue;
            }
            self.enqueue(video.id, None).await?;
            report.enqueued.push(video.id);
            in_flight += 1;
        }

        if !report.enqueued.is_empty() {
            log::info!("Pending scan queued {} videos", report.enqueued.len());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::Account;
    use crate::queue::MemoryJobQueue;
    use crate::repository::{MemoryStore, VideoRepository};
    use crate::services::guard::Guard;
    use crate::test_utils::{FakeTools, FixedProbe};

    fn dispatcher(store: Arc<MemoryStore>, config: AppConfig) -> Dispatcher {
        let tools = Arc::new(FakeTools::new());
        let guard = Arc::new(Guard::new(Arc::new(FixedProbe(None)), tools.clone(), 0));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), tools, guard, &config));
        Dispatcher::new(
            store,
            Arc::new(MemoryJobQueue::new()),
            orchestrator,
            config.scheduler,
            config.pipeline,
        )
    }

    #[tokio::test]
    async fn enqueue_uses_account_priority() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        store
            .insert_account(Account {
                id: owner,
                is_premium: true,
                ..Account::default()
            })
            .await;
        let video = Video::new("clip", "/src.mp4", Some(owner));
        store.save_video(&video).await.unwrap();

        let handle = dispatcher(store, AppConfig::default())
            .enqueue(video.id, None)
            .await
            .unwrap();
        assert_eq!(handle.priority, 8);
        assert_eq!(handle.queue, QueueName::VideoProcessing);
    }

    #[tokio::test]
    async fn scan_fails_stuck_and_respects_capacity() {
        let store = Arc::new(MemoryStore::new());
        let mut config = AppConfig::default();
        config.scheduler.max_concurrent_jobs = 2;
        config.scheduler.stuck_after_minutes = 60;

        let mut stuck = Video::new("stuck", "/a.mp4", None);
        stuck.processing_status = ProcessingStatus::Processing;
        stuck.processing_started_at = Some(Utc::now() - Duration::hours(3));
        stuck.updated_at = Utc::now() - Duration::hours(3);
        store.save_video(&stuck).await.unwrap();

        let mut long_running = Video::new("long", "/c.mp4", None);
        long_running.processing_status = ProcessingStatus::Processing;
        long_running.processing_started_at = Some(Utc::now() - Duration::hours(3));
        long_running.updated_at = Utc::now() - Duration::minutes(1);
        store.save_video(&long_running).await.unwrap();
        for i in 0..3 {
            store
                .save_video(&Video::new(format!("p{i}"), "/b.mp4", None))
                .await
                .unwrap();
        }

        let d = dispatcher(store.clone(), config);
        let report = d.scan_pending(Utc::now()).await.unwrap();

        assert_eq!(report.stuck_failed, vec![stuck.id]);
        let failed = store.load_video(stuck.id).await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some(STUCK_MESSAGE));
        let still_running = store.load_video(long_running.id).await.unwrap();
        assert_eq!(still_running.processing_status, ProcessingStatus::Processing);
        assert_eq!(report.enqueued.len(), 2);

        let again = d.scan_pending(Utc::now()).await.unwrap();
        assert!(again.enqueued.is_empty());
    }

    #[tokio::test]
    async fn auto_retry_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let mut config = AppConfig::default();
        config.pipeline.max_auto_retries = 1;
        let mut video = Video::new("flaky", "/src.mp4", None);
        video.mark_failed("boom");
        store.save_video(&video).await.unwrap();

        let d = dispatcher(store.clone(), config);
        assert!(d.after_failure(video.id).await.unwrap().is_some());
        assert_eq!(store.load_video(video.id).await.unwrap().retry_count, 1);

        let mut again = store.load_video(video.id).await.unwrap();
        again.mark_failed("boom");
        store.save_video(&again).await.unwrap();
        assert!(d.after_failure(video.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manual_retry_requires_failed() {
        let store = Arc::new(MemoryStore::new());
        let video = Video::new("ok", "/src.mp4", None);
        store.save_video(&video).await.unwrap();
        let d = dispatcher(store, AppConfig::default());
        assert!(matches!(
            d.retry(video.id).await,
            Err(PipelineError::InvalidState { .. })
        ));
    }
}
