use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::quota::{DEFAULT_QUOTA_PER_SECOND, QuotaManager};

/// Process-wide resilience instances shared by every gateway call.
///
/// Built once at startup and injected; tests build their own.
#[derive(Debug, Clone)]
pub struct ResilienceRegistry {
    quota: Arc<QuotaManager>,
    general: Arc<CircuitBreaker>,
    payment_confirmation: Arc<CircuitBreaker>,
}

impl ResilienceRegistry {
    /// Creates a registry with the standard breaker presets.
    pub fn new(quota_per_second: usize) -> Self {
        Self::with_parts(
            QuotaManager::new(quota_per_second),
            CircuitBreakerConfig::general(),
            CircuitBreakerConfig::payment_confirmation(),
        )
    }

    pub fn with_parts(
        quota: QuotaManager,
        general: CircuitBreakerConfig,
        payment_confirmation: CircuitBreakerConfig,
    ) -> Self {
        Self {
            quota: Arc::new(quota),
            general: Arc::new(CircuitBreaker::new("general", general)),
            payment_confirmation: Arc::new(CircuitBreaker::new(
                "payment_confirmation",
                payment_confirmation,
            )),
        }
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    /// Breaker for every gateway call except setup-intent confirmation.
    pub fn general_breaker(&self) -> &CircuitBreaker {
        &self.general
    }

    pub fn payment_confirmation_breaker(&self) -> &CircuitBreaker {
        &self.payment_confirmation
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_PER_SECOND)
    }
}
