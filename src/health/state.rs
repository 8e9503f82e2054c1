//! Per-service health state machine.
//!
//! # States
//! - Healthy: the paired circuit is left alone
//! - Unhealthy: the paired circuit is forced open
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Counters reset on state transition
//! - Services start healthy; a monitor with no data never blocks traffic

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub response_time: Duration,
    pub details: Option<String>,
}

impl HealthReport {
    pub fn healthy(response_time: Duration) -> Self {
        Self {
            healthy: true,
            response_time,
            details: None,
        }
    }

    pub fn unhealthy(response_time: Duration, details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time,
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_checks: u64,
    pub last_report: Option<HealthReport>,
    pub last_checked: Option<Instant>,
    /// Next regular probe; failing services follow the retry table instead.
    pub next_probe: Instant,
}

impl ServiceHealth {
    pub fn new(now: Instant) -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_checks: 0,
            last_report: None,
            last_checked: None,
            next_probe: now,
        }
    }

    /// Apply a probe result. Returns the new status when it changed.
    pub fn record(
        &mut self,
        report: HealthReport,
        now: Instant,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Option<HealthStatus> {
        self.total_checks += 1;
        self.last_checked = Some(now);
        let healthy = report.healthy;
        self.last_report = Some(report);

        if healthy {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            if self.status == HealthStatus::Unhealthy && self.consecutive_successes >= healthy_threshold {
                return Some(self.transition(HealthStatus::Healthy));
            }
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            if self.status == HealthStatus::Healthy && self.consecutive_failures >= unhealthy_threshold {
                return Some(self.transition(HealthStatus::Unhealthy));
            }
        }
        None
    }

    fn transition(&mut self, to: HealthStatus) -> HealthStatus {
        self.status = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        to
    }
}
