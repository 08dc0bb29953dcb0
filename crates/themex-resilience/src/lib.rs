//! # themex-resilience
//!
//! Multi-tenant protection around engine work.
//!
//! - [`execute_with_retry`]: exponential backoff with jitter, honouring
//!   server-suggested delays and cancellation
//! - [`CircuitBreaker`]: closed/open/half-open with a single probe
//! - [`Bulkhead`]: per-user and global limits per operation class

#![deny(unsafe_code)]

pub mod breaker;
pub mod bulkhead;
pub mod retry;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use bulkhead::{Bulkhead, OperationClass, PoolLimits};
pub use retry::{RetryFailure, RetryOutcome, execute_with_retry};
