//! FHIRPath trigger criteria seam.
//!
//! The engine does not ship a FHIRPath evaluator. Topics carrying
//! `fhirPathCriteria` compile through a [`CriteriaEvaluator`] supplied by
//! the embedder; the default [`UnsupportedCriteriaEvaluator`] rejects every
//! expression, which the engine records on the subscription and treats as
//! no-match.

use crate::error::{Result, SubscriptionError};
use serde_json::Value;
use std::sync::Arc;

/// Versions a criteria expression is evaluated against. `previous` is
/// absent on create, `current` on delete.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaContext<'a> {
    pub previous: Option<&'a Value>,
    pub current: Option<&'a Value>,
}

/// A compiled criteria expression, reusable across events.
pub trait CompiledCriteria: Send + Sync {
    fn evaluate(&self, ctx: CriteriaContext<'_>) -> Result<bool>;
}

/// Compiles criteria expressions into evaluatable form.
pub trait CriteriaEvaluator: Send + Sync {
    fn compile(&self, expression: &str) -> Result<Arc<dyn CompiledCriteria>>;
}

/// Evaluator used when no FHIRPath engine is wired in.
#[derive(Debug, Default)]
pub struct UnsupportedCriteriaEvaluator;

impl CriteriaEvaluator for UnsupportedCriteriaEvaluator {
    fn compile(&self, expression: &str) -> Result<Arc<dyn CompiledCriteria>> {
        Err(SubscriptionError::Criteria(format!(
            "no evaluator available for criteria '{expression}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_evaluator_rejects_compilation() {
        let evaluator = UnsupportedCriteriaEvaluator;
        assert!(evaluator.compile("%current.status = 'finished'").is_err());
    }
}
