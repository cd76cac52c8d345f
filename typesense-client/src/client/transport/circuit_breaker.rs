//! A process-wide circuit breaker wrapped around the request executor.
//!
//! The breaker trips when the failure ratio over a window of calls crosses a
//! threshold, short-circuits every call while open, and recovers through a
//! bounded half-open probe phase.

use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::debug;

use super::Clock;

/// The three phases of the breaker's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through and are counted.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// A bounded number of probe calls are admitted to judge recovery.
    HalfOpen,
}

/// Why the breaker refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerRejection {
    /// The breaker is open; the recovery timeout has not elapsed yet.
    Open,
    /// The breaker is half-open and all probe slots are taken.
    TooManyRequests,
}

/// Rolling counters for the current generation of calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted in this generation.
    pub requests: u32,
    /// Failures observed in this generation.
    pub total_failures: u32,
    /// Successes observed in this generation.
    pub total_successes: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Trip policy: consulted with the current [`Counts`] after every failure in
/// the closed state.
pub type ReadyToTrip = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Observability hook invoked on every state transition. Runs synchronously
/// under the breaker lock and must not block.
pub type OnStateChange = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

/// Tuning knobs for a [`CircuitBreaker`].
#[derive(Clone)]
pub struct BreakerSettings {
    /// Name used in logs and the state-change hook.
    pub name: String,
    /// Probe calls admitted concurrently while half-open; this many
    /// consecutive successes close the breaker again.
    pub max_half_open_requests: u32,
    /// While closed, counters are cleared every `interval` so old failures
    /// do not dominate the ratio. Zero disables the periodic reset.
    pub interval: Duration,
    /// How long the breaker stays open before admitting probes.
    pub timeout: Duration,
    /// Trip policy; `None` uses [`BreakerSettings::default_ready_to_trip`].
    pub ready_to_trip: Option<ReadyToTrip>,
    /// State-transition hook.
    pub on_state_change: Option<OnStateChange>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "typesense".to_string(),
            max_half_open_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(60),
            ready_to_trip: None,
            on_state_change: None,
        }
    }
}

impl BreakerSettings {
    /// The default trip policy: more than 100 calls seen and more than half
    /// of them failed.
    pub fn default_ready_to_trip(counts: &Counts) -> bool {
        counts.requests > 100
            && f64::from(counts.total_failures) / f64::from(counts.requests) > 0.5
    }
}

impl Debug for BreakerSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerSettings")
            .field("name", &self.name)
            .field("max_half_open_requests", &self.max_half_open_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

struct BreakerInner {
    state: BreakerState,
    // Bumped on every state change and counter reset; outcomes reported for
    // a stale generation are discarded.
    generation: u64,
    counts: Counts,
    // Millisecond deadline: counter reset while closed, probe admission
    // while open. Zero means no deadline.
    expiry_ms: u64,
}

/// A shared breaker guarding all outbound calls of one client.
pub struct CircuitBreaker {
    name: String,
    max_half_open_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: ReadyToTrip,
    on_state_change: Option<OnStateChange>,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl Debug for CircuitBreaker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a breaker from the given settings, reading time from `clock`.
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let ready_to_trip = settings
            .ready_to_trip
            .unwrap_or_else(|| Arc::new(BreakerSettings::default_ready_to_trip));
        Self {
            name: settings.name,
            max_half_open_requests: settings.max_half_open_requests.max(1),
            interval: settings.interval,
            timeout: settings.timeout,
            ready_to_trip,
            on_state_change: settings.on_state_change,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry_ms: 0,
            }),
        }
    }

    /// The breaker's current state, refreshed against the clock.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_ms();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// A snapshot of the current generation's counters.
    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().counts
    }

    /// Runs `work` under the breaker. The outcome of `work` is counted; a
    /// rejected call returns `E::from(BreakerRejection)` without invoking
    /// `work` at all.
    pub async fn execute<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerRejection>,
    {
        let generation = self.before_call().map_err(E::from)?;
        let result = work().await;
        self.after_call(generation, result.is_ok());
        result
    }

    /// Admits or rejects a call. On admission returns the generation the
    /// outcome must be reported against.
    pub(crate) fn before_call(&self) -> Result<u64, BreakerRejection> {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_ms();
        self.refresh(&mut inner, now);
        match inner.state {
            BreakerState::Open => Err(BreakerRejection::Open),
            BreakerState::HalfOpen if inner.counts.requests >= self.max_half_open_requests => {
                Err(BreakerRejection::TooManyRequests)
            }
            _ => {
                inner.counts.requests += 1;
                Ok(inner.generation)
            }
        }
    }

    /// Reports the outcome of an admitted call.
    pub(crate) fn after_call(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_ms();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            // The breaker changed state while the call was in flight; its
            // outcome belongs to a generation that no longer exists.
            return;
        }
        if success {
            inner.counts.on_success();
            if inner.state == BreakerState::HalfOpen
                && inner.counts.consecutive_successes >= self.max_half_open_requests
            {
                self.set_state(&mut inner, BreakerState::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match inner.state {
                BreakerState::Closed => {
                    if (self.ready_to_trip)(&inner.counts) {
                        self.set_state(&mut inner, BreakerState::Open, now);
                    }
                }
                BreakerState::HalfOpen => {
                    self.set_state(&mut inner, BreakerState::Open, now);
                }
                BreakerState::Open => {}
            }
        }
    }

    // Applies timed transitions before any state is read: open -> half-open
    // after the timeout, and the periodic counter reset while closed.
    fn refresh(&self, inner: &mut BreakerInner, now: u64) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry_ms != 0 && now >= inner.expiry_ms {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if now >= inner.expiry_ms {
                    self.set_state(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn set_state(&self, inner: &mut BreakerInner, state: BreakerState, now: u64) {
        let previous = inner.state;
        if previous == state {
            return;
        }
        inner.state = state;
        self.new_generation(inner, now);
        debug!(
            "circuit breaker {}: state changed from {previous:?} to {state:?}",
            self.name
        );
        if let Some(hook) = &self.on_state_change {
            hook(&self.name, previous, state);
        }
    }

    fn new_generation(&self, inner: &mut BreakerInner, now: u64) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry_ms = match inner.state {
            BreakerState::Closed => {
                if self.interval.is_zero() {
                    0
                } else {
                    now + self.interval.as_millis() as u64
                }
            }
            BreakerState::Open => now + self.timeout.as_millis() as u64,
            BreakerState::HalfOpen => 0,
        };
    }
}
