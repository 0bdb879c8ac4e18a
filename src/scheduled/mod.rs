//! Cron driven background jobs
//!
//! Every job implements [`ScheduledJob`] and is registered with the
//! [`Scheduler`] under the cron expression configured for it. A tick never
//! fails the scheduler: errors are logged and counted, and the next tick
//! starts fresh.

use crate::config::ScheduledSection;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::observability::metrics::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, Instrument};

pub mod connection_check;
pub mod maintenance;
pub mod queries;

pub use connection_check::{
    ClientOwnership, ConnectionCheckReport, ConnectionCheckResult, ConnectionSupervisor,
};
pub use maintenance::{AcknowledgementSweepJob, MessageCacheSendingJob};
pub use queries::{EndpointQueryJob, QueryKind, QueryReport};

/// One cron triggered unit of work
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name, used for spans and job metrics
    fn name(&self) -> &'static str;

    async fn run(&self) -> MiddlewareResult<()>;
}

/// Whether the platform currently accepts traffic
#[async_trait]
pub trait PlatformStatus: Send + Sync {
    async fn is_operational(&self) -> bool;
}

/// Used when no status source is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOperational;

#[async_trait]
impl PlatformStatus for AlwaysOperational {
    async fn is_operational(&self) -> bool {
        true
    }
}

/// Run one tick of `job`, recording its duration and outcome
pub async fn run_tick(job: &dyn ScheduledJob) {
    let span = crate::job_span!(job = job.name());
    async {
        let started = Instant::now();
        debug!("Scheduled job '{}' started.", job.name());
        let result = job.run().await;
        let elapsed = started.elapsed();
        metrics().job_executed(job.name(), elapsed, result.is_ok());
        match result {
            Ok(()) => debug!(
                "Scheduled job '{}' finished in {} ms.",
                job.name(),
                elapsed.as_millis()
            ),
            Err(e) => error!("Scheduled job '{}' failed: {}", job.name(), e.log_message()),
        }
    }
    .instrument(span)
    .await
}

/// The jobs of the middleware, one per configured cron key
pub struct JobSet {
    pub connection_check: Arc<dyn ScheduledJob>,
    pub status_logging: Arc<dyn ScheduledJob>,
    pub recipient_query: Arc<dyn ScheduledJob>,
    pub fetching_and_confirming_existing_messages: Arc<dyn ScheduledJob>,
    pub empty_message_cache: Arc<dyn ScheduledJob>,
    pub message_waiting_for_ack_removal: Arc<dyn ScheduledJob>,
}

impl JobSet {
    fn with_expressions<'a>(
        &self,
        schedule: &'a ScheduledSection,
    ) -> [(&'a str, Arc<dyn ScheduledJob>); 6] {
        [
            (schedule.connection_check.as_str(), self.connection_check.clone()),
            (schedule.status_logging.as_str(), self.status_logging.clone()),
            (schedule.recipient_query.as_str(), self.recipient_query.clone()),
            (
                schedule.fetching_and_confirming_existing_messages.as_str(),
                self.fetching_and_confirming_existing_messages.clone(),
            ),
            (schedule.empty_message_cache.as_str(), self.empty_message_cache.clone()),
            (
                schedule.message_waiting_for_ack_removal.as_str(),
                self.message_waiting_for_ack_removal.clone(),
            ),
        ]
    }
}

/// Thin wrapper around the cron scheduler
pub struct Scheduler {
    scheduler: JobScheduler,
    registered: Vec<&'static str>,
}

impl Scheduler {
    pub async fn new() -> MiddlewareResult<Self> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            registered: Vec::new(),
        })
    }

    /// Register `job` to run on every match of the six-field cron `expression`
    pub async fn add(&mut self, expression: &str, job: Arc<dyn ScheduledJob>) -> MiddlewareResult<()> {
        let name = job.name();
        let cron_job = Job::new_async(expression, move |_uuid, _scheduler| {
            let job = job.clone();
            Box::pin(async move {
                run_tick(job.as_ref()).await;
            })
        })
        .map_err(|e| {
            MiddlewareError::scheduler(format!("Invalid schedule '{expression}' for '{name}': {e}"))
        })?;
        self.scheduler.add(cron_job).await?;
        self.registered.push(name);
        info!("Scheduled job '{}' with '{}'.", name, expression);
        Ok(())
    }

    pub async fn add_all(&mut self, schedule: &ScheduledSection, jobs: &JobSet) -> MiddlewareResult<()> {
        for (expression, job) in jobs.with_expressions(schedule) {
            self.add(expression, job).await?;
        }
        Ok(())
    }

    pub fn registered(&self) -> &[&'static str] {
        &self.registered
    }

    pub async fn start(&self) -> MiddlewareResult<()> {
        self.scheduler.start().await?;
        info!("Started {} scheduled jobs.", self.registered.len());
        Ok(())
    }

    pub async fn shutdown(&mut self) -> MiddlewareResult<()> {
        self.scheduler.shutdown().await?;
        info!("Scheduler stopped.");
        Ok(())
    }
}
