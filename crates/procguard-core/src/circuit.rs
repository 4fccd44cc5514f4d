//! Resilience Circuit: a per-endpoint, dual-track (availability / integrity)
//! breaker. This is the one piece of process-wide mutable state in the whole
//! system; it lives behind an explicit handle passed to collaborators rather
//! than a hidden singleton, and all mutation is serialized by a single
//! mutex per breaker instance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Availability,
    Integrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct TrackStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<Instant>,
    pub last_reason: Option<String>,
}

impl TrackStatus {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_reason: None,
        }
    }
}

/// Tuning for one track. `failure_threshold` trips closed->open,
/// `reset_timeout` is how long an open track waits before trying
/// half-open, `half_open_success` is how many consecutive half-open
/// successes are needed to fully close again.
#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_success: u32,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success: 2,
        }
    }
}

struct Track {
    status: TrackStatus,
    params: BreakerParams,
}

impl Track {
    fn new(params: BreakerParams) -> Self {
        Self {
            status: TrackStatus::new(),
            params,
        }
    }

    /// Re-evaluates a time-based open->half_open transition before any
    /// other logic runs, so the caller always observes a fresh state.
    fn settle(&mut self) {
        if self.status.state == CircuitState::Open {
            if let Some(opened_at) = self.status.opened_at {
                if opened_at.elapsed() >= self.params.reset_timeout {
                    self.status.state = CircuitState::HalfOpen;
                    self.status.success_count = 0;
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.settle();
        match self.status.state {
            CircuitState::Closed => {
                self.status.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.status.success_count += 1;
                if self.status.success_count >= self.params.half_open_success {
                    self.status.state = CircuitState::Closed;
                    self.status.failure_count = 0;
                    self.status.success_count = 0;
                    self.status.opened_at = None;
                    self.status.last_reason = None;
                }
            }
            CircuitState::Open => {
                // An open track ignores success reports; only the timer opens it to half-open.
            }
        }
    }

    fn record_failure(&mut self, reason: impl Into<String>) {
        self.settle();
        self.status.last_reason = Some(reason.into());
        match self.status.state {
            CircuitState::Closed => {
                self.status.failure_count += 1;
                if self.status.failure_count >= self.params.failure_threshold {
                    self.status.state = CircuitState::Open;
                    self.status.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // Back to open; timer restarts from this failure.
                self.status.state = CircuitState::Open;
                self.status.opened_at = Some(Instant::now());
                self.status.success_count = 0;
            }
            CircuitState::Open => {
                // Already open: ignore further failures rather than
                // re-stamping opened_at, so the reset timer is anchored to
                // the failure that originally tripped it.
            }
        }
    }

    fn is_gated(&mut self) -> bool {
        self.settle();
        self.status.state == CircuitState::Open
    }
}

/// What a gated read should do, per the endpoint's current gating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Serve the request live.
    Pass,
    /// Availability track open: degrade, serve LKG if present.
    Degraded,
    /// Integrity track open: pause sync, serve last snapshot (or empty).
    Paused,
}

/// One endpoint's dual-track breaker. The engine never gates writes
/// through this type — only read endpoints consult it.
pub struct EndpointBreaker {
    availability: Mutex<Track>,
    integrity: Mutex<Track>,
}

impl EndpointBreaker {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            availability: Mutex::new(Track::new(params)),
            integrity: Mutex::new(Track::new(params)),
        }
    }

    pub fn record_success(&self, track: TrackKind) {
        let mut t = self.track_mutex(track).lock().expect("breaker mutex poisoned");
        t.record_success();
    }

    pub fn record_failure(&self, track: TrackKind, reason: impl Into<String>) {
        let mut t = self.track_mutex(track).lock().expect("breaker mutex poisoned");
        t.record_failure(reason);
    }

    pub fn status(&self, track: TrackKind) -> TrackStatus {
        let mut t = self.track_mutex(track).lock().expect("breaker mutex poisoned");
        t.settle();
        t.status.clone()
    }

    /// Integrity takes priority: a hash mismatch is a stronger signal than
    /// a downstream timeout, so a paused sync status dominates when both
    /// tracks happen to be open.
    pub fn gate(&self) -> GateDecision {
        let integrity_open = self.integrity.lock().expect("breaker mutex poisoned").is_gated();
        if integrity_open {
            return GateDecision::Paused;
        }
        let availability_open = self.availability.lock().expect("breaker mutex poisoned").is_gated();
        if availability_open {
            return GateDecision::Degraded;
        }
        GateDecision::Pass
    }

    fn track_mutex(&self, track: TrackKind) -> &Mutex<Track> {
        match track {
            TrackKind::Availability => &self.availability,
            TrackKind::Integrity => &self.integrity,
        }
    }
}

/// Process-wide handle over every endpoint's breaker, keyed by endpoint
/// name. An explicit handle in place of a hidden singleton: collaborators
/// receive an `Arc<ResilienceCircuit>`, they never reach for a `static`.
pub struct ResilienceCircuit {
    params: BreakerParams,
    endpoints: Mutex<HashMap<String, std::sync::Arc<EndpointBreaker>>>,
}

impl ResilienceCircuit {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            params,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self, name: &str) -> std::sync::Arc<EndpointBreaker> {
        let mut endpoints = self.endpoints.lock().expect("circuit mutex poisoned");
        endpoints
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(EndpointBreaker::new(self.params)))
            .clone()
    }
}
