//! Thread-safe metrics collection system
//!
//! Atomic counters for the MQTT statistics of the middleware plus mutex
//! protected per-job execution statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // MQTT statistics
    connection_losses: AtomicU64,
    cache_misses: AtomicU64,
    client_initializations: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    messages_arrived: AtomicU64,
    messages_published: AtomicU64,
    acknowledgements: AtomicU64,
    unknown_messages: AtomicU64,

    // Core bookkeeping
    connection_checks_succeeded: AtomicU64,
    connection_checks_failed: AtomicU64,
    cache_entries_resent: AtomicU64,
    cache_entries_expired: AtomicU64,
    acknowledgements_swept: AtomicU64,

    job_stats: Mutex<HashMap<String, JobExecutionStats>>,

    uptime_start: AtomicU64,
    health_status: AtomicBool,
}

#[derive(Debug, Clone)]
struct JobExecutionStats {
    executions: u64,
    failures: u64,
    execution_times: Vec<u64>,
    last_execution: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connection_losses: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            client_initializations: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            messages_arrived: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            acknowledgements: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            connection_checks_succeeded: AtomicU64::new(0),
            connection_checks_failed: AtomicU64::new(0),
            cache_entries_resent: AtomicU64::new(0),
            cache_entries_expired: AtomicU64::new(0),
            acknowledgements_swept: AtomicU64::new(0),
            job_stats: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
            health_status: AtomicBool::new(true),
        }
    }

    // MQTT statistics
    pub fn connection_lost(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_initialized(&self) {
        self.client_initializations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_arrived(&self) {
        self.messages_arrived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acknowledgement_received(&self) {
        self.acknowledgements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
    }

    // Core bookkeeping
    pub fn connection_check_succeeded(&self) {
        self.connection_checks_succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_check_failed(&self) {
        self.connection_checks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_entry_resent(&self) {
        self.cache_entries_resent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_entry_expired(&self) {
        self.cache_entries_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acknowledgements_swept(&self, count: usize) {
        self.acknowledgements_swept
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record one scheduled job run
    pub fn job_executed(&self, job_name: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.job_stats.lock() {
            let job = stats
                .entry(job_name.to_string())
                .or_insert_with(|| JobExecutionStats {
                    executions: 0,
                    failures: 0,
                    execution_times: Vec::new(),
                    last_execution: 0,
                });
            job.executions += 1;
            job.last_execution = current_timestamp();
            job.execution_times.push(duration.as_millis() as u64);

            // Limit execution times to prevent unbounded growth
            if job.execution_times.len() > 1000 {
                job.execution_times.remove(0);
            }
            if !success {
                job.failures += 1;
            }
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status.load(Ordering::Relaxed)
    }

    fn build_job_statistics(&self) -> HashMap<String, JobExecutionStatsSnapshot> {
        let Ok(stats) = self.job_stats.lock() else {
            return HashMap::new();
        };
        stats
            .iter()
            .map(|(name, job)| {
                let average = if job.execution_times.is_empty() {
                    0.0
                } else {
                    job.execution_times.iter().sum::<u64>() as f64
                        / job.execution_times.len() as f64
                };
                (
                    name.clone(),
                    JobExecutionStatsSnapshot {
                        executions: job.executions,
                        failures: job.failures,
                        average_execution_time_ms: average,
                        last_execution: job.last_execution,
                    },
                )
            })
            .collect()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            healthy: self.is_healthy(),
            mqtt: MqttStatistics {
                connection_losses: self.connection_losses.load(Ordering::Relaxed),
                cache_misses: self.cache_misses.load(Ordering::Relaxed),
                client_initializations: self.client_initializations.load(Ordering::Relaxed),
                connects: self.connects.load(Ordering::Relaxed),
                disconnects: self.disconnects.load(Ordering::Relaxed),
                messages_arrived: self.messages_arrived.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                acknowledgements: self.acknowledgements.load(Ordering::Relaxed),
                unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            },
            core: CoreMetrics {
                connection_checks_succeeded: self
                    .connection_checks_succeeded
                    .load(Ordering::Relaxed),
                connection_checks_failed: self.connection_checks_failed.load(Ordering::Relaxed),
                cache_entries_resent: self.cache_entries_resent.load(Ordering::Relaxed),
                cache_entries_expired: self.cache_entries_expired.load(Ordering::Relaxed),
                acknowledgements_swept: self.acknowledgements_swept.load(Ordering::Relaxed),
            },
            jobs: self.build_job_statistics(),
        }
    }

    /// Reset all metrics (for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_losses,
            &self.cache_misses,
            &self.client_initializations,
            &self.connects,
            &self.disconnects,
            &self.messages_arrived,
            &self.messages_published,
            &self.acknowledgements,
            &self.unknown_messages,
            &self.connection_checks_succeeded,
            &self.connection_checks_failed,
            &self.cache_entries_resent,
            &self.cache_entries_expired,
            &self.acknowledgements_swept,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut stats) = self.job_stats.lock() {
            stats.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        self.health_status.store(true, Ordering::Relaxed);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub healthy: bool,
    pub mqtt: MqttStatistics,
    pub core: CoreMetrics,
    pub jobs: HashMap<String, JobExecutionStatsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttStatistics {
    pub connection_losses: u64,
    pub cache_misses: u64,
    pub client_initializations: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub messages_arrived: u64,
    pub messages_published: u64,
    pub acknowledgements: u64,
    pub unknown_messages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreMetrics {
    pub connection_checks_succeeded: u64,
    pub connection_checks_failed: u64,
    pub cache_entries_resent: u64,
    pub cache_entries_expired: u64,
    pub acknowledgements_swept: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub average_execution_time_ms: f64,
    pub last_execution: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
