use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Dispatcher, Job, QueueName, QueuedJob};
use crate::error::PipelineError;
use crate::services::streams::{StreamGenerator, StreamRequest};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pulls jobs from one queue and runs them until shutdown.
pub struct Worker {
    id: usize,
    queue_name: QueueName,
    dispatcher: Arc<Dispatcher>,
    streams: Arc<StreamGenerator>,
}

impl Worker {
    pub fn new(
        id: usize,
        queue_name: QueueName,
        dispatcher: Arc<Dispatcher>,
        streams: Arc<StreamGenerator>,
    ) -> Self {
        Self {
            id,
            queue_name,
            dispatcher,
            streams,
        }
    }

    pub async fn run_worker_loop(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("[worker {}] started on {}", self.id, self.queue_name);
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                next = self.dispatcher.queue().dequeue(self.queue_name, POLL_INTERVAL) => next,
                _ = shutdown.changed() => break,
            };
            match next {
                Ok(Some(job)) => self.run_job(job).await,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("[worker {}] queue error: {}", self.id, e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        log::info!("[worker {}] stopped", self.id);
    }

    pub async fn run_job(&self, queued: QueuedJob) {
        let video_id = queued.job.video_id();
        log::info!(
            "[worker {}] job {} for video {} (priority {})",
            self.id,
            queued.handle.id,
            video_id,
            queued.handle.priority
        );

        match queued.job {
            Job::ProcessVideo { video_id, profiles } => {
                let result = {
                    let _running = self.dispatcher.begin_job();
                    self.dispatcher
                        .orchestrator()
                        .process(video_id, profiles.as_deref())
                        .await
                };
                match result {
                    Ok(_) => {}
                    Err(PipelineError::AlreadyProcessing(_) | PipelineError::InvalidState { .. }) => {
                        log::warn!("[worker {}] video {} not runnable, dropped", self.id, video_id);
                    }
                    Err(e) => {
                        log::error!("[worker {}] video {} failed: {}", self.id, video_id, e);
                        if let Err(e) = self.dispatcher.after_failure(video_id).await {
                            log::error!("[worker {}] retry policy for {} failed: {}", self.id, video_id, e);
                        }
                    }
                }
            }
            Job::GenerateStreams {
                video_id,
                protocol,
                force,
            } => {
                let request = StreamRequest {
                    video_id: Some(video_id),
                    protocol,
                    limit: 1,
                    force,
                };
                match self.streams.run_batch(&request).await {
                    Ok(report) if report.is_success() => {}
                    Ok(_) => log::warn!("[worker {}] no ready streams for video {}", self.id, video_id),
                    Err(e) => log::error!("[worker {}] streams for {} failed: {}", self.id, video_id, e),
                }
            }
        }
    }
}

/// Runs `tick` every `period` until shutdown. Missed ticks are skipped, so a
/// slow tick never overlaps the next one.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Periodic task {} every {}s", name, period.as_secs());
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Periodic task {} stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{EncodingProfile, ProcessingStatus, Video};
    use crate::queue::{JobQueue, MemoryJobQueue};
    use crate::repository::{MemoryStore, ProfileRepository, VideoRepository};
    use crate::services::guard::Guard;
    use crate::services::orchestrator::Orchestrator;
    use crate::test_utils::{FakeTools, FixedProbe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn worker_processes_queued_video() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.media_root = dir.path().join("media");
        let source = dir.path().join("in.mp4");
        std::fs::write(&source, b"src").unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .save_profile(&EncodingProfile::new("360p", 640, 360, 800, 1))
            .await
            .unwrap();
        let video = Video::new("clip", source.display().to_string(), None);
        store.save_video(&video).await.unwrap();

        let tools = Arc::new(FakeTools::new());
        let guard = Arc::new(Guard::new(Arc::new(FixedProbe(None)), tools.clone(), 0));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), tools.clone(), guard, &config));
        let queue = Arc::new(MemoryJobQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queue.clone(),
            orchestrator,
            config.scheduler.clone(),
            config.pipeline.clone(),
        ));
        let streams = Arc::new(StreamGenerator::new(
            store.clone(),
            tools,
            config.storage.media_root.clone(),
            config.streams.clone(),
        ));

        dispatcher.enqueue(video.id, None).await.unwrap();
        let worker = Worker::new(1, QueueName::VideoProcessing, dispatcher.clone(), streams);
        let job = queue
            .dequeue(QueueName::VideoProcessing, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        worker.run_job(job).await;

        let stored = store.load_video(video.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Success);
        assert_eq!(dispatcher.running_jobs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ticks_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let ticks = count.clone();
        let handle = spawn_periodic("test", Duration::from_secs(60), rx, move || {
            let ticks = ticks.clone();
            async move {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        // immediate first tick, then at 60s and 120s
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
