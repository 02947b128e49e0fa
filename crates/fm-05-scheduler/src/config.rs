//! Scheduler configuration.

use serde::Deserialize;

/// Runtime configuration for the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent executions per tenant before new ones queue.
    pub max_in_flight_per_tenant: usize,

    /// Bounded backpressure queue; overflow rejects.
    pub queue_capacity: usize,

    /// Deadline applied to steps that declare no timeout.
    pub default_step_timeout_ms: u64,

    /// Ceiling applied over any step or tenant timeout.
    pub max_step_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight_per_tenant: 8,
            queue_capacity: 256,
            default_step_timeout_ms: 30_000,
            max_step_timeout_ms: 10 * 60 * 1000,
        }
    }
}
