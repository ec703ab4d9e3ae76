pub mod auto_reply;
pub mod keyed;
pub mod tasks;

use std::future::Future;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

/// Cron-driven maintenance jobs (retention purge). One-shot per-user timers
/// live in [`keyed::KeyedTimers`] instead.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<String>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Register `task` to run on every tick of the six-field `cron_expr`
    pub async fn add_cron_job<F, Fut>(&mut self, name: &str, cron_expr: &str, task: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |_id, _lock| {
            debug!("Running maintenance job: {}", job_name);
            Box::pin(task())
        })
        .with_context(|| format!("Invalid cron expression for {}: {}", name, cron_expr))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        self.jobs.push(name.to_string());
        info!("Scheduled '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    /// Starts the scheduler; a no-op when nothing was registered
    pub async fn start(&mut self) -> Result<()> {
        if self.jobs.is_empty() {
            debug!("No maintenance jobs registered");
            return Ok(());
        }
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started with {} job(s)", self.jobs.len());
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let mut scheduler = Scheduler::new().await.unwrap();
        let err = scheduler
            .add_cron_job("bad", "not a cron", || async {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(scheduler.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_registered_job_is_tracked() {
        let mut scheduler = Scheduler::new().await.unwrap();
        scheduler
            .add_cron_job("tick", "0 0 3 * * *", || async {})
            .await
            .unwrap();
        assert_eq!(scheduler.jobs, vec!["tick".to_string()]);
        scheduler.shutdown().await.unwrap();
    }
}
