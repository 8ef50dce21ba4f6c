//! Row-level-security evaluation engine
//!
//! Resolves an entity's compiled policy from the registry and decides
//! read/write access for a principal, optionally against a target record.

use std::sync::Arc;

use rls_ir::{Operation, RecordSnapshot, RequestContext};
use rls_registry::{ConfigError, PolicyRegistry};
use tracing::{debug, warn};

mod decision;
mod evaluator;

pub use decision::{decide, decide_traced, evaluate, filter_records, Decision, Trace, TraceStep};
pub use evaluator::evaluate_leaf;

/// Entry point for the persistence/API layer
#[derive(Debug, Clone)]
pub struct AccessDecisionEngine {
    registry: Arc<PolicyRegistry>,
    trace: bool,
}

impl AccessDecisionEngine {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            registry,
            trace: false,
        }
    }

    /// Attach an evaluation trace to every decision
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Decide access for one entity operation.
    ///
    /// Unregistered entities are a configuration error, never an implicit allow.
    pub fn decide(
        &self,
        entity: &str,
        operation: Operation,
        ctx: &RequestContext,
        record: Option<&RecordSnapshot>,
    ) -> Result<Decision, ConfigError> {
        let snapshot = self.registry.snapshot();
        let policy_set = snapshot.policy_set(entity).map_err(|e| {
            warn!(entity = %entity, operation = %operation, "no policies registered for entity");
            e
        })?;

        let decision = if self.trace {
            decide_traced(&policy_set, operation, ctx, record)
        } else {
            decide(&policy_set, operation, ctx, record)
        };

        debug!(
            entity = %entity,
            operation = %operation,
            allow = decision.allow,
            has_record = record.is_some(),
            generation = snapshot.generation(),
            "access decision"
        );
        Ok(decision)
    }

    /// Boolean form of [`decide`](Self::decide); configuration errors deny
    pub fn is_allowed(
        &self,
        entity: &str,
        operation: Operation,
        ctx: &RequestContext,
        record: Option<&RecordSnapshot>,
    ) -> bool {
        self.decide(entity, operation, ctx, record)
            .map(|d| d.allow)
            .unwrap_or(false)
    }

    /// Rows of `entity` the principal may access under `operation`
    pub fn filter<'r>(
        &self,
        entity: &str,
        operation: Operation,
        ctx: &RequestContext,
        records: &'r [RecordSnapshot],
    ) -> Result<Vec<&'r RecordSnapshot>, ConfigError> {
        let policy_set = self.registry.policy_set(entity)?;
        let allowed = filter_records(&policy_set, operation, ctx, records);
        debug!(
            entity = %entity,
            operation = %operation,
            total = records.len(),
            allowed = allowed.len(),
            "filtered records"
        );
        Ok(allowed)
    }
}
