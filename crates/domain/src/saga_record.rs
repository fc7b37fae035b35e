//! Durable progress record for one saga execution.

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, SagaId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workflow tag stored on payment-setup records.
pub const PAYMENT_SETUP: &str = "payment_setup";

/// Lifecycle of a saga record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, SagaStatus::Pending)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = crate::order::UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SagaStatus::Pending),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            other => Err(crate::order::UnknownVariant {
                kind: "saga status",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind tag of a recorded saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepKind {
    Initialize,
    CreateOrder,
    SavePaymentMethod,
    ValidateCard,
    FinalizeOrder,
}

impl SagaStepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStepKind::Initialize => "initialize",
            SagaStepKind::CreateOrder => "create_order",
            SagaStepKind::SavePaymentMethod => "save_payment_method",
            SagaStepKind::ValidateCard => "validate_card",
            SagaStepKind::FinalizeOrder => "finalize_order",
        }
    }
}

impl std::fmt::Display for SagaStepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed forward step with its opaque result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    pub kind: SagaStepKind,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Attempted to change a record that already reached a final status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaRecordError {
    #[error("saga {saga_id} is already {status}")]
    AlreadyFinalized { saga_id: SagaId, status: SagaStatus },
}

/// Persisted state of one saga run.
///
/// Steps are append-only while the record is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub steps: Vec<RecordedStep>,
    pub input: serde_json::Value,
    pub order_id: Option<OrderId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaRecord {
    /// Creates a pending record holding the raw input.
    pub fn new(
        id: SagaId,
        saga_type: impl Into<String>,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            saga_type: saga_type.into(),
            status: SagaStatus::Pending,
            steps: Vec::new(),
            input,
            order_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Appends a step.
    pub fn record_step(
        &mut self,
        kind: SagaStepKind,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), SagaRecordError> {
        self.ensure_pending()?;
        self.steps.push(RecordedStep {
            kind,
            payload,
            recorded_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Returns the kinds of every recorded step, in execution order.
    pub fn step_kinds(&self) -> Vec<SagaStepKind> {
        self.steps.iter().map(|step| step.kind).collect()
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), SagaRecordError> {
        self.ensure_pending()?;
        self.status = SagaStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SagaRecordError> {
        self.ensure_pending()?;
        self.status = SagaStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// True when the record is still pending and untouched for at least `after`.
    pub fn is_stale(&self, now: DateTime<Utc>, after: Duration) -> bool {
        self.status == SagaStatus::Pending && now - self.updated_at >= after
    }

    fn ensure_pending(&self) -> Result<(), SagaRecordError> {
        if self.status.is_final() {
            return Err(SagaRecordError::AlreadyFinalized {
                saga_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> SagaRecord {
        SagaRecord::new(SagaId::new(), PAYMENT_SETUP, json!({"k": 1}), Utc::now())
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = record();
        assert_eq!(record.status, SagaStatus::Pending);
        assert!(record.steps.is_empty());
        assert_eq!(record.saga_type, "payment_setup");
    }

    #[test]
    fn test_steps_append_in_order() {
        let mut record = record();
        record
            .record_step(SagaStepKind::Initialize, json!({}), Utc::now())
            .unwrap();
        record
            .record_step(SagaStepKind::CreateOrder, json!({"order_id": "x"}), Utc::now())
            .unwrap();
        assert_eq!(
            record.step_kinds(),
            vec![SagaStepKind::Initialize, SagaStepKind::CreateOrder]
        );
    }

    #[test]
    fn test_final_record_rejects_changes() {
        let mut record = record();
        record.fail("boom", Utc::now()).unwrap();
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.completed_at.is_some());

        assert!(matches!(
            record.complete(Utc::now()),
            Err(SagaRecordError::AlreadyFinalized {
                status: SagaStatus::Failed,
                ..
            })
        ));
        assert!(record
            .record_step(SagaStepKind::ValidateCard, json!({}), Utc::now())
            .is_err());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut record =
            SagaRecord::new(SagaId::new(), PAYMENT_SETUP, json!({}), now - Duration::minutes(20));
        assert!(record.is_stale(now, Duration::minutes(15)));
        assert!(!record.is_stale(now, Duration::minutes(30)));

        record.complete(now).unwrap();
        assert!(!record.is_stale(now + Duration::hours(1), Duration::minutes(15)));
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [SagaStatus::Pending, SagaStatus::Completed, SagaStatus::Failed] {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
        assert!("running".parse::<SagaStatus>().is_err());
    }
}
