//! Resilience primitives for outbound gateway calls.
//!
//! - [`QuotaManager`] keeps the call rate under the gateway's limit
//! - [`CircuitBreaker`] fails fast while the gateway is unhealthy
//! - [`trace_operation`] logs each call with trace and span ids
//!
//! Instances are explicit values held in a [`ResilienceRegistry`], never
//! globals, so limits are per process and tests stay isolated.

pub mod circuit_breaker;
pub mod quota;
pub mod registry;
pub mod tracer;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use quota::{DEFAULT_QUOTA_PER_SECOND, QuotaManager};
pub use registry::ResilienceRegistry;
pub use tracer::{TraceContext, trace_operation};
