use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{Job, JobHandle, JobQueue, QueueName, QueuedJob};
use crate::error::PipelineError;

struct Entry(QueuedJob);

impl Entry {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.0.handle.priority, Reverse(self.0.handle.sequence))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<QueueName, BinaryHeap<Entry>>,
    next_sequence: u64,
}

/// In-process priority queue.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
    arrivals: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pop(&self, queue: QueueName) -> Option<QueuedJob> {
        let mut state = self.state.lock().await;
        state.queues.get_mut(&queue)?.pop().map(|e| e.0)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn submit(&self, queue: QueueName, job: Job, priority: i32) -> Result<JobHandle, PipelineError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .queues
            .get(&queue)
            .and_then(|heap| heap.iter().find(|e| e.0.job == job))
        {
            log::debug!("Job for video {} already queued", job.video_id());
            return Ok(existing.0.handle);
        }

        state.next_sequence += 1;
        let handle = JobHandle {
            id: Uuid::new_v4(),
            queue,
            priority,
            sequence: state.next_sequence,
        };
        state.queues.entry(queue).or_default().push(Entry(QueuedJob {
            handle,
            job,
            submitted_at: Utc::now(),
        }));
        drop(state);

        self.arrivals.notify_waiters();
        Ok(handle)
    }

    async fn dequeue(&self, queue: QueueName, wait: Duration) -> Result<Option<QueuedJob>, PipelineError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.pop(queue).await {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn pending(&self, queue: QueueName) -> Vec<QueuedJob> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .queues
            .get(&queue)
            .map(|heap| heap.iter().map(|e| e.0.clone()).collect())
            .unwrap_or_default();
        jobs.sort_by(|a, b| {
            b.handle
                .priority
                .cmp(&a.handle.priority)
                .then(a.handle.sequence.cmp(&b.handle.sequence))
        });
        jobs
    }
}
