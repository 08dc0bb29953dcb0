//! Consecutive-failure circuit breaker.
//!
//! `Closed` counts consecutive failures; reaching the threshold opens the
//! circuit. `Open` rejects every call until the cooldown elapses, then the
//! breaker goes `HalfOpen` and admits exactly one probe. A successful probe
//! closes it, a failed one reopens it.

use std::future::Future;
use std::time::Duration;

use metrics::gauge;
use parking_lot::Mutex;
use themex_core::{EngineError, EngineResult};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default consecutive failures before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default cooldown before a half-open probe.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Observable breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow.
    Closed,
    /// Calls are rejected.
    Open,
    /// One probe may pass.
    HalfOpen,
}

impl CircuitState {
    /// Stable name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

/// State plus a generation bumped on every transition. Outcomes of calls
/// admitted under an older generation are ignored.
#[derive(Debug)]
struct Inner {
    state: BreakerState,
    generation: u64,
}

/// Permission to run one call; record the outcome with
/// [`CircuitBreaker::record`]. Dropping an unrecorded probe frees the
/// half-open slot.
#[derive(Debug)]
#[must_use]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    recorded: bool,
}

impl Admission<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.probe && !self.recorded {
            self.breaker.release_probe(self.generation);
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        let breaker = Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed { failures: 0 },
                generation: 0,
            }),
        };
        breaker.publish(CircuitState::Closed);
        breaker
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time an open circuit stays open.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Current state, applying any elapsed cooldown.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        view(inner.state)
    }

    /// Ask to run one call.
    pub fn try_acquire(&self) -> EngineResult<Admission<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let generation = inner.generation;
        match &mut inner.state {
            BreakerState::Closed { .. } => Ok(Admission {
                breaker: self,
                generation,
                probe: false,
                recorded: false,
            }),
            BreakerState::Open { since } => {
                let retry_after = self.cooldown.saturating_sub(since.elapsed());
                Err(self.reject(retry_after))
            }
            BreakerState::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(self.reject(self.cooldown))
                } else {
                    *probe_in_flight = true;
                    Ok(Admission {
                        breaker: self,
                        generation,
                        probe: true,
                        recorded: false,
                    })
                }
            }
        }
    }

    /// Keep `admission` if the breaker has not moved since it was granted,
    /// otherwise ask again under the current state.
    pub fn revalidate<'a>(&'a self, admission: Admission<'a>) -> EngineResult<Admission<'a>> {
        let current = {
            let mut inner = self.inner.lock();
            self.refresh(&mut inner);
            inner.generation == admission.generation
        };
        if current {
            Ok(admission)
        } else {
            drop(admission);
            self.try_acquire()
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record<T>(&self, mut admission: Admission<'_>, outcome: &EngineResult<T>) {
        admission.recorded = true;
        let mut inner = self.inner.lock();
        if inner.generation != admission.generation {
            debug!(breaker = %self.name, "ignoring outcome admitted under an earlier state");
            return;
        }
        match outcome {
            Ok(_) => self.on_success(&mut inner),
            Err(e) if e.counts_as_failure() => self.on_failure(&mut inner),
            Err(_) => {
                if admission.probe {
                    // Inconclusive probe: let the next caller try.
                    if let BreakerState::HalfOpen { probe_in_flight } = &mut inner.state {
                        *probe_in_flight = false;
                    }
                }
            }
        }
    }

    /// Run `fut` under the breaker.
    pub async fn call<T, F>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let admission = self.try_acquire()?;
        self.run_admitted(admission, fut).await
    }

    /// Run `fut` under an admission obtained earlier.
    pub async fn run_admitted<T, F>(&self, admission: Admission<'_>, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let outcome = fut.await;
        self.record(admission, &outcome);
        outcome
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            if let BreakerState::HalfOpen { probe_in_flight } = &mut inner.state {
                *probe_in_flight = false;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, state: BreakerState) {
        inner.state = state;
        inner.generation += 1;
        self.publish(view(state));
    }

    fn refresh(&self, inner: &mut Inner) {
        if let BreakerState::Open { since } = inner.state {
            if since.elapsed() >= self.cooldown {
                info!(breaker = %self.name, "circuit half-open, admitting probe");
                self.transition(
                    inner,
                    BreakerState::HalfOpen {
                        probe_in_flight: false,
                    },
                );
            }
        }
    }

    fn on_success(&self, inner: &mut Inner) {
        match inner.state {
            BreakerState::Closed { .. } => inner.state = BreakerState::Closed { failures: 0 },
            BreakerState::HalfOpen { .. } => {
                info!(breaker = %self.name, "probe succeeded, circuit closed");
                self.transition(inner, BreakerState::Closed { failures: 0 });
            }
            // Same-generation admissions are never granted while open.
            BreakerState::Open { .. } => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner) {
        match inner.state {
            BreakerState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.threshold {
                    warn!(
                        breaker = %self.name,
                        failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "circuit opened after consecutive failures"
                    );
                    self.transition(
                        inner,
                        BreakerState::Open {
                            since: Instant::now(),
                        },
                    );
                } else {
                    inner.state = BreakerState::Closed { failures };
                }
            }
            BreakerState::HalfOpen { .. } => {
                warn!(breaker = %self.name, "probe failed, circuit reopened");
                self.transition(
                    inner,
                    BreakerState::Open {
                        since: Instant::now(),
                    },
                );
            }
            BreakerState::Open { .. } => {}
        }
    }

    fn reject(&self, retry_after: Duration) -> EngineError {
        counter_rejection(&self.name);
        EngineError::ResourceExhausted {
            resource: format!("circuit:{}", self.name),
            retry_after,
        }
    }

    fn publish(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        gauge!("themex_circuit_state", "breaker" => self.name.clone()).set(value);
    }
}

fn view(state: BreakerState) -> CircuitState {
    match state {
        BreakerState::Closed { .. } => CircuitState::Closed,
        BreakerState::Open { .. } => CircuitState::Open,
        BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
    }
}

fn counter_rejection(name: &str) {
    metrics::counter!("themex_circuit_rejections_total", "breaker" => name.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 5, Duration::from_secs(30))
    }

    async fn fail(b: &CircuitBreaker) -> EngineResult<()> {
        b.call(async { Err(EngineError::provider("down", true)) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_without_invoking() {
        let b = breaker();
        for _ in 0..5 {
            assert_matches!(fail(&b).await, Err(EngineError::Provider { .. }));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let res = b
            .call(async {
                let _ = invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_matches!(res, Err(EngineError::ResourceExhausted { retry_after, .. }) => {
            assert!(retry_after <= Duration::from_secs(30));
            assert!(retry_after > Duration::ZERO);
        });
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_probe() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let probe = b.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_matches!(b.try_acquire(), Err(EngineError::ResourceExhausted { .. }));

        b.record(probe, &Ok::<_, EngineError>(()));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_slot() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        drop(b.try_acquire().unwrap());
        assert!(b.try_acquire().unwrap().is_probe());
    }

    #[tokio::test]
    async fn caller_errors_do_not_count() {
        let b = breaker();
        for _ in 0..10 {
            let _ = b
                .call(async { Err::<(), _>(EngineError::Input("empty".into())) })
                .await;
            let _ = b.call(async { Err::<(), _>(EngineError::Cancelled) }).await;
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let b = breaker();
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        b.call(async { Ok(()) }).await.unwrap();
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn late_success_from_closed_does_not_close_open_circuit() {
        let b = breaker();
        let early = b.try_acquire().unwrap();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Open);

        b.record(early, &Ok::<_, EngineError>(()));
        assert_eq!(b.state(), CircuitState::Open);
        assert_matches!(b.try_acquire(), Err(EngineError::ResourceExhausted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_half_open_trial_call_moves_the_circuit() {
        let b = breaker();
        let early = b.try_acquire().unwrap();
        let late_failure = b.try_acquire().unwrap();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let trial = b.try_acquire().unwrap();
        assert!(trial.is_probe());

        b.record(early, &Ok::<_, EngineError>(()));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record(late_failure, &Err::<(), _>(EngineError::provider("late", true)));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_matches!(b.try_acquire(), Err(EngineError::ResourceExhausted { .. }));

        b.record(trial, &Ok::<_, EngineError>(()));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn revalidate_rejects_admission_from_before_opening() {
        let b = breaker();
        let held = b.try_acquire().unwrap();
        let held = b.revalidate(held).unwrap();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        assert_matches!(b.revalidate(held), Err(EngineError::ResourceExhausted { .. }));
    }
}
