//! Inbound job queue shared by the API and the placement worker.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use carbonetes_core::Job;

/// FIFO of jobs awaiting placement. Cheap to clone.
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake the worker. Returns the new depth.
    pub async fn push(&self, job: Job) -> usize {
        let depth = {
            let mut jobs = self.jobs.lock().await;
            jobs.push_back(job);
            jobs.len()
        };
        self.notify.notify_one();
        depth
    }

    /// Put a job back at the head so it is retried before newer arrivals.
    pub async fn push_front(&self, job: Job) {
        self.jobs.lock().await.push_front(job);
        self.notify.notify_one();
    }

    pub async fn try_pop(&self) -> Option<Job> {
        self.jobs.lock().await.pop_front()
    }

    /// Wait for the next job.
    pub async fn next(&self) -> Job {
        loop {
            if let Some(job) = self.try_pop().await {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn depth(&self) -> usize {
        self.jobs.lock().await.len()
    }
}
