use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::client::PipelineError;
use crate::pipeline::tracker::{AnalysisResult, Progress, Tracker};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_FINISHED: usize = 200;

const MSG_TRACKER_CRASHED: &str = "Analysis stopped unexpectedly. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
enum Outcome {
    Done(AnalysisResult),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
struct Finished {
    outcome: Outcome,
    at: Instant,
}

struct JobEntry {
    source_url: String,
    progress: watch::Receiver<Progress>,
    finished: Arc<Mutex<Option<Finished>>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JobEntry {
    fn finished(&self) -> Option<Finished> {
        match self.finished.lock() {
            Ok(slot) => (*slot).clone(),
            Err(poisoned) => (*poisoned.into_inner()).clone(),
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Snapshot returned by `GET /analyze/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub url: String,
    pub state: JobState,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    retention: Duration,
    max_finished: usize,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let jobs = match self.jobs.get_mut() {
            Ok(jobs) => jobs,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, job) in jobs.drain() {
            job.stop();
        }
    }
}

/// In-process table of analysis jobs. Finished jobs stay readable for
/// `retention`, and at most `max_finished` of them are kept. Dropping the
/// last handle cancels every tracker.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION, DEFAULT_MAX_FINISHED)
    }
}

impl JobRegistry {
    pub fn with_retention(retention: Duration, max_finished: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                retention,
                max_finished,
            }),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::with_retention(cfg.job_retention(), cfg.max_finished_jobs)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobEntry>> {
        match self.inner.jobs.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drops finished jobs past retention, then the oldest finished ones
    /// beyond the cap. Running jobs are never evicted.
    fn prune(&self, jobs: &mut HashMap<String, JobEntry>) {
        let now = Instant::now();
        let mut finished: Vec<(String, Instant)> = jobs
            .iter()
            .filter_map(|(id, job)| job.finished().map(|f| (id.clone(), f.at)))
            .collect();
        finished.sort_by_key(|(_, at)| *at);

        let expired = finished
            .iter()
            .take_while(|(_, at)| now.saturating_duration_since(*at) >= self.inner.retention)
            .count();
        let over_cap = finished.len().saturating_sub(expired).saturating_sub(self.inner.max_finished);
        for (id, _) in finished.iter().take(expired + over_cap) {
            jobs.remove(id);
        }
        if expired + over_cap > 0 {
            debug!(evicted = expired + over_cap, remaining = jobs.len(), "finished jobs evicted");
        }
    }

    /// Spawns a tracker for `job_id`. A job already running under the same
    /// id is cancelled and replaced.
    pub fn start(&self, tracker: Tracker, job_id: String, source_url: String) {
        let (tx, rx) = watch::channel(Progress::default());
        let finished = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let task = {
            let finished = finished.clone();
            let cancel = cancel.clone();
            let job_id = job_id.clone();
            let source_url = source_url.clone();
            tokio::spawn(async move {
                let run = tracker.run(&job_id, &source_url, tx, cancel);
                let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(result)) => {
                        info!(%job_id, "analysis completed");
                        Outcome::Done(result)
                    }
                    Ok(Err(PipelineError::Cancelled)) => Outcome::Cancelled,
                    Ok(Err(e)) => {
                        warn!(%job_id, error = %e, "analysis failed");
                        Outcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        error!(%job_id, "analysis tracker panicked");
                        Outcome::Failed(MSG_TRACKER_CRASHED.into())
                    }
                };
                let done = Finished {
                    outcome,
                    at: Instant::now(),
                };
                match finished.lock() {
                    Ok(mut slot) => *slot = Some(done),
                    Err(poisoned) => *poisoned.into_inner() = Some(done),
                }
            })
        };

        let mut jobs = self.lock();
        self.prune(&mut jobs);
        let previous = jobs.insert(
            job_id,
            JobEntry {
                source_url,
                progress: rx,
                finished,
                cancel,
                task,
            },
        );
        if let Some(prev) = previous {
            prev.stop();
        }
    }

    pub fn view(&self, job_id: &str) -> Option<JobView> {
        let jobs = self.lock();
        let job = jobs.get(job_id)?;
        let progress = *job.progress.borrow();
        let (state, result, error) = match job.finished().map(|f| f.outcome) {
            None if job.cancel.is_cancelled() => (JobState::Cancelled, None, None),
            None => (JobState::Running, None, None),
            Some(Outcome::Done(r)) => (JobState::Completed, Some(r), None),
            Some(Outcome::Failed(e)) => (JobState::Failed, None, Some(e)),
            Some(Outcome::Cancelled) => (JobState::Cancelled, None, None),
        };
        Some(JobView {
            job_id: job_id.to_string(),
            url: job.source_url.clone(),
            state,
            progress,
            result,
            error,
        })
    }

    /// Progress stream for `job_id`.
    #[cfg(test)]
    pub fn watch(&self, job_id: &str) -> Option<watch::Receiver<Progress>> {
        self.lock().get(job_id).map(|j| j.progress.clone())
    }

    /// Stops the tracker and forgets the job. `false` when unknown.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().remove(job_id) {
            Some(job) => {
                job.stop();
                info!(%job_id, "analysis cancelled");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
