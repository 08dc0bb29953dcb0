//! Per-user and global concurrency isolation.
//!
//! Each operation class has a global semaphore, one semaphore per user, and a
//! circuit breaker. A request first asks the breaker, then claims a slot in
//! the user's queue (running plus waiting, bounded), then the user's permit,
//! then a global permit. An over-limit user therefore waits on their own
//! semaphore and never holds global capacity another user could use. The
//! breaker admission is checked again once the permits are held, so a circuit
//! that opened during the wait still rejects.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use themex_core::{EngineError, EngineResult};
use themex_settings::BulkheadSettings;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;

/// Operation class with its own limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Source search.
    Search,
    /// Theme extraction.
    Extraction,
}

impl OperationClass {
    /// Stable name for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Extraction => "extraction",
        }
    }
}

/// Limits for one class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolLimits {
    /// Concurrent runs per user.
    pub per_user: usize,
    /// Concurrent runs overall.
    pub global: usize,
    /// Waiting requests allowed per user beyond running ones.
    pub queue_per_user: usize,
}

#[derive(Debug)]
struct UserSlot {
    permits: Arc<Semaphore>,
    /// Running plus waiting.
    admitted: AtomicUsize,
}

#[derive(Debug)]
struct Pool {
    class: OperationClass,
    limits: PoolLimits,
    global: Arc<Semaphore>,
    users: DashMap<String, Arc<UserSlot>>,
    breaker: CircuitBreaker,
}

/// Releases the queue slot, and the user entry once idle.
struct QueueGuard<'a> {
    pool: &'a Pool,
    user_id: &'a str,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        let _ = self.pool.users.remove_if(self.user_id, |_, slot| {
            slot.admitted.fetch_sub(1, Ordering::AcqRel) == 1
        });
    }
}

impl Pool {
    fn new(class: OperationClass, limits: PoolLimits, threshold: u32, cooldown: Duration) -> Self {
        Self {
            class,
            limits,
            global: Arc::new(Semaphore::new(limits.global.max(1))),
            users: DashMap::new(),
            breaker: CircuitBreaker::new(class.as_str(), threshold, cooldown),
        }
    }

    fn enqueue<'a>(&'a self, user_id: &'a str) -> EngineResult<(QueueGuard<'a>, Arc<UserSlot>)> {
        let cap = self.limits.per_user.max(1) + self.limits.queue_per_user;
        // Counting under the entry lock keeps `remove_if` from racing us.
        let slot = {
            let entry = self
                .users
                .entry(user_id.to_string())
                .or_insert_with(|| {
                    Arc::new(UserSlot {
                        permits: Arc::new(Semaphore::new(self.limits.per_user.max(1))),
                        admitted: AtomicUsize::new(0),
                    })
                });
            let admitted = entry.admitted.load(Ordering::Acquire);
            if admitted >= cap {
                None
            } else {
                let _ = entry.admitted.fetch_add(1, Ordering::AcqRel);
                Some(Arc::clone(entry.value()))
            }
        };

        match slot {
            Some(slot) => Ok((QueueGuard { pool: self, user_id }, slot)),
            None => {
                counter!("themex_bulkhead_rejections_total", "class" => self.class.as_str())
                    .increment(1);
                warn!(class = self.class.as_str(), user_id, cap, "per-user queue full");
                Err(EngineError::ResourceExhausted {
                    resource: format!("bulkhead:{}", self.class.as_str()),
                    retry_after: self.breaker.cooldown(),
                })
            }
        }
    }

    async fn execute<T, F>(&self, user_id: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let admission = self.breaker.try_acquire()?;
        let (_queued, slot) = self.enqueue(user_id)?;

        let _user_permit = Arc::clone(&slot.permits)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("user semaphore closed".into()))?;
        let _global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("global semaphore closed".into()))?;

        let admission = self.breaker.revalidate(admission)?;
        debug!(class = self.class.as_str(), user_id, probe = admission.is_probe(), "bulkhead admitted");
        self.breaker.run_admitted(admission, fut).await
    }
}

/// Resource pools for search and extraction.
#[derive(Debug)]
pub struct Bulkhead {
    search: Pool,
    extraction: Pool,
}

impl Default for Bulkhead {
    fn default() -> Self {
        Self::from_settings(&BulkheadSettings::default())
    }
}

impl Bulkhead {
    /// Build from settings.
    pub fn from_settings(settings: &BulkheadSettings) -> Self {
        let cooldown = Duration::from_secs(settings.cooldown_secs);
        let limits = |per_user: usize, global: usize| PoolLimits {
            per_user,
            global,
            queue_per_user: per_user.max(1) * settings.queue_multiplier,
        };
        Self::new(
            limits(settings.search_per_user, settings.search_global),
            limits(settings.extraction_per_user, settings.extraction_global),
            settings.failure_threshold,
            cooldown,
        )
    }

    /// Build with explicit limits.
    pub fn new(
        search: PoolLimits,
        extraction: PoolLimits,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            search: Pool::new(OperationClass::Search, search, failure_threshold, cooldown),
            extraction: Pool::new(
                OperationClass::Extraction,
                extraction,
                failure_threshold,
                cooldown,
            ),
        }
    }

    /// Run a search on behalf of `user_id`.
    pub async fn execute_search<T, F>(&self, user_id: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.search.execute(user_id, fut).await
    }

    /// Run an extraction on behalf of `user_id`.
    pub async fn execute_extraction<T, F>(&self, user_id: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.extraction.execute(user_id, fut).await
    }

    /// The breaker guarding `class`.
    pub fn breaker(&self, class: OperationClass) -> &CircuitBreaker {
        &self.pool(class).breaker
    }

    /// Requests currently running or waiting for `user_id`.
    pub fn user_load(&self, class: OperationClass, user_id: &str) -> usize {
        self.pool(class)
            .users
            .get(user_id)
            .map_or(0, |slot| slot.admitted.load(Ordering::Acquire))
    }

    /// Global permits currently free.
    pub fn global_available(&self, class: OperationClass) -> usize {
        self.pool(class).global.available_permits()
    }

    fn pool(&self, class: OperationClass) -> &Pool {
        match class {
            OperationClass::Search => &self.search,
            OperationClass::Extraction => &self.extraction,
        }
    }
}
