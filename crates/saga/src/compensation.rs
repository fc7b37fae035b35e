//! Undo actions for completed saga steps.

use futures_util::future::BoxFuture;

use domain::SagaStepKind;

use crate::error::Result;

type Action = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Compensation {
    step: SagaStepKind,
    action: Option<Action>,
}

/// Outcome of unwinding a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnwindReport {
    /// Steps whose compensation ran cleanly, in the order they ran.
    pub compensated: Vec<SagaStepKind>,
    /// Steps whose compensation failed, with the error text.
    pub failed: Vec<(SagaStepKind, String)>,
}

/// A LIFO stack of compensations, one pushed right after each forward step
/// succeeds.
///
/// Actions are `Fn` and the stack is not consumed by [`unwind`], so the
/// same stack can be unwound more than once. Every action must therefore
/// be safe to repeat.
///
/// [`unwind`]: CompensationStack::unwind
#[derive(Default)]
pub struct CompensationStack {
    entries: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the undo action for `step`.
    pub fn push<F>(&mut self, step: SagaStepKind, action: F)
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.entries.push(Compensation {
            step,
            action: Some(Box::new(action)),
        });
    }

    /// Records a step that needs nothing undone.
    pub fn push_noop(&mut self, step: SagaStepKind) {
        self.entries.push(Compensation { step, action: None });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Steps on the stack, oldest first.
    pub fn steps(&self) -> Vec<SagaStepKind> {
        self.entries.iter().map(|entry| entry.step).collect()
    }

    /// Runs every compensation newest first.
    ///
    /// A failing action is logged and the rest still run; nothing is
    /// returned as an error.
    pub async fn unwind(&self) -> UnwindReport {
        let mut report = UnwindReport::default();

        for entry in self.entries.iter().rev() {
            let Some(action) = &entry.action else {
                report.compensated.push(entry.step);
                continue;
            };

            metrics::counter!("saga_compensations_total", "step" => entry.step.as_str())
                .increment(1);
            match action().await {
                Ok(()) => {
                    tracing::info!(step = entry.step.as_str(), "step compensated");
                    report.compensated.push(entry.step);
                }
                Err(err) => {
                    tracing::error!(
                        step = entry.step.as_str(),
                        error = %err,
                        "compensation failed"
                    );
                    report.failed.push((entry.step, err.to_string()));
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for CompensationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationStack")
            .field("steps", &self.steps())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures_util::FutureExt;

    use super::*;
    use crate::error::SagaError;

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push_noop(SagaStepKind::Initialize);
        stack.push(SagaStepKind::CreateOrder, recording(&log, "create"));
        stack.push(SagaStepKind::FinalizeOrder, recording(&log, "finalize"));

        let report = stack.unwind().await;

        assert_eq!(*log.lock().unwrap(), vec!["finalize", "create"]);
        assert_eq!(
            report.compensated,
            vec![
                SagaStepKind::FinalizeOrder,
                SagaStepKind::CreateOrder,
                SagaStepKind::Initialize
            ]
        );
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_unwinding() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push(SagaStepKind::CreateOrder, recording(&log, "create"));
        stack.push(SagaStepKind::SavePaymentMethod, || {
            async { Err(SagaError::OrderNotFound(common::OrderId::new())) }.boxed()
        });

        let report = stack.unwind().await;

        assert_eq!(*log.lock().unwrap(), vec!["create"]);
        assert_eq!(report.compensated, vec![SagaStepKind::CreateOrder]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, SagaStepKind::SavePaymentMethod);
    }

    #[tokio::test]
    async fn test_unwinding_twice_repeats_actions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        stack.push(SagaStepKind::CreateOrder, recording(&log, "create"));

        stack.unwind().await;
        let second = stack.unwind().await;

        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(second.failed.is_empty());
        assert_eq!(stack.len(), 1);
    }
}
