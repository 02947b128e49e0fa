//! # Circuit Breaker
//!
//! Per-endpoint resilience in front of downstream dispatch. Opens after a
//! run of consecutive server-class failures, rejects immediately while
//! open (with a retry-after hint), then probes recovery through a limited
//! half-open window.
//!
//! ## States
//!
//! - **Closed**: normal operation, requests flow through
//! - **Open**: failing fast until the cool-off elapses
//! - **Half-Open**: up to `half_open_probes` probe requests; that many
//!   successes close the circuit, any failure reopens it

use crate::config::BreakerConfig;
use shared_types::Clock;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast.
    Open,
    /// Testing recovery.
    HalfOpen,
}

impl BreakerState {
    /// Stable tag for events and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// A state change worth announcing on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerTransition {
    /// The circuit opened after consecutive failures.
    Opened {
        /// Endpoint whose circuit opened.
        endpoint: String,
        /// The failure count that tripped it.
        failures: u32,
    },
    /// The circuit closed after successful probes.
    Closed {
        /// Endpoint whose circuit closed.
        endpoint: String,
    },
}

/// Per-endpoint circuit record.
#[derive(Debug)]
struct EndpointCircuit {
    state: BreakerState,
    consecutive_failures: u32,
    successes_since_half_open: u32,
    probes_admitted: u32,
    last_transition_ms: u64,
}

impl EndpointCircuit {
    fn new(now_ms: u64) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            successes_since_half_open: 0,
            probes_admitted: 0,
            last_transition_ms: now_ms,
        }
    }
}

/// Circuit breaker over all known endpoints.
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: RwLock<HashMap<String, EndpointCircuit>>,
}

impl CircuitBreaker {
    /// Creates a breaker.
    #[must_use]
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a request to the endpoint may proceed.
    ///
    /// An open circuit transitions to half-open once the cool-off has
    /// elapsed; half-open admits at most `half_open_probes` requests.
    pub fn should_allow(&self, endpoint: &str) -> bool {
        let now = self.clock.now_ms();
        let mut circuits = self.write_circuits();
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointCircuit::new(now));

        match circuit.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if circuit.probes_admitted < self.config.half_open_probes {
                    circuit.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::Open => {
                if now.saturating_sub(circuit.last_transition_ms) >= self.config.cool_off_ms {
                    circuit.state = BreakerState::HalfOpen;
                    circuit.successes_since_half_open = 0;
                    circuit.probes_admitted = 1;
                    circuit.last_transition_ms = now;
                    info!(endpoint, "Circuit transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Advisory wait for a rejected request: the remainder of the
    /// cool-off.
    #[must_use]
    pub fn retry_after_ms(&self, endpoint: &str) -> u64 {
        let now = self.clock.now_ms();
        self.circuits
            .read()
            .ok()
            .and_then(|circuits| {
                circuits.get(endpoint).map(|c| {
                    (c.last_transition_ms + self.config.cool_off_ms).saturating_sub(now)
                })
            })
            .unwrap_or(self.config.cool_off_ms)
    }

    /// Records a successful call.
    pub fn record_success(&self, endpoint: &str) -> Option<BreakerTransition> {
        let now = self.clock.now_ms();
        let mut circuits = self.write_circuits();
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointCircuit::new(now));

        match circuit.state {
            BreakerState::Closed => {
                circuit.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                circuit.successes_since_half_open += 1;
                if circuit.successes_since_half_open >= self.config.half_open_probes {
                    circuit.state = BreakerState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.successes_since_half_open = 0;
                    circuit.probes_admitted = 0;
                    circuit.last_transition_ms = now;
                    info!(endpoint, "Circuit recovered, closing");
                    Some(BreakerTransition::Closed {
                        endpoint: endpoint.to_string(),
                    })
                } else {
                    None
                }
            }
            BreakerState::Open => None,
        }
    }

    /// Records a server-class failure.
    pub fn record_failure(&self, endpoint: &str) -> Option<BreakerTransition> {
        let now = self.clock.now_ms();
        let mut circuits = self.write_circuits();
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointCircuit::new(now));

        circuit.consecutive_failures += 1;

        match circuit.state {
            BreakerState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.state = BreakerState::Open;
                    circuit.last_transition_ms = now;
                    warn!(
                        endpoint,
                        failures = circuit.consecutive_failures,
                        "Circuit opened"
                    );
                    Some(BreakerTransition::Opened {
                        endpoint: endpoint.to_string(),
                        failures: circuit.consecutive_failures,
                    })
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                // Any failure while probing reopens immediately.
                circuit.state = BreakerState::Open;
                circuit.successes_since_half_open = 0;
                circuit.probes_admitted = 0;
                circuit.last_transition_ms = now;
                warn!(endpoint, "Probe failed, circuit reopened");
                Some(BreakerTransition::Opened {
                    endpoint: endpoint.to_string(),
                    failures: circuit.consecutive_failures,
                })
            }
            BreakerState::Open => None,
        }
    }

    /// Current state of an endpoint's circuit.
    #[must_use]
    pub fn state(&self, endpoint: &str) -> BreakerState {
        self.circuits
            .read()
            .ok()
            .and_then(|circuits| circuits.get(endpoint).map(|c| c.state))
            .unwrap_or(BreakerState::Closed)
    }

    fn write_circuits(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, EndpointCircuit>> {
        match self.circuits.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Breaker lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}
