//! Access decisions over whole rule trees
//!
//! `Or` stops at the first allowing child, `And` at the first denying one.
//! Evaluation is synchronous, allocation-free unless a trace is requested,
//! and bounded by the size of the rule tree.

use rls_ir::{EntityPolicySet, NodeKind, Operation, RecordSnapshot, RequestContext, Rule};
use serde::Serialize;

use crate::evaluator::evaluate_leaf;

/// One evaluated node, in post-order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    /// Position in the rule, e.g. `read.$or[2]`
    pub path: String,
    pub node: NodeKind,
    pub outcome: bool,
}

/// Nodes actually visited; short-circuited siblings are absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    pub steps: Vec<TraceStep>,
}

impl Trace {
    /// First leaf (or `Empty`) that evaluated to `true`, if any
    pub fn deciding_leaf(&self) -> Option<&TraceStep> {
        self.steps
            .iter()
            .find(|step| step.outcome && !matches!(step.node, NodeKind::And | NodeKind::Or))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allow
    }
}

struct TreeWalker<'a> {
    ctx: &'a RequestContext,
    record: Option<&'a RecordSnapshot>,
    steps: Option<Vec<TraceStep>>,
}

impl<'a> TreeWalker<'a> {
    fn eval(&mut self, rule: &Rule, path: &str) -> bool {
        let outcome = match rule {
            Rule::Empty => true,
            Rule::Or { rules } => self.eval_children(rules, path, "$or", true),
            Rule::And { rules } => self.eval_children(rules, path, "$and", false),
            Rule::Leaf { condition } => evaluate_leaf(condition, self.ctx, self.record),
        };

        if let Some(steps) = self.steps.as_mut() {
            steps.push(TraceStep {
                path: path.to_string(),
                node: rule.kind(),
                outcome,
            });
        }
        outcome
    }

    /// Returns `stop_on` as soon as a child produces it
    fn eval_children(&mut self, rules: &[Rule], path: &str, operator: &str, stop_on: bool) -> bool {
        for (i, child) in rules.iter().enumerate() {
            let child_path = if self.steps.is_some() {
                format!("{}.{}[{}]", path, operator, i)
            } else {
                String::new()
            };
            if self.eval(child, &child_path) == stop_on {
                return stop_on;
            }
        }
        !stop_on
    }
}

/// Evaluate a rule tree to a plain boolean
pub fn evaluate(rule: &Rule, ctx: &RequestContext, record: Option<&RecordSnapshot>) -> bool {
    TreeWalker {
        ctx,
        record,
        steps: None,
    }
    .eval(rule, "")
}

/// Decide `operation` against an entity's policies.
///
/// `record` is the target row; `None` for list-level reads, where only
/// principal-based leaves can match and an `Empty` policy allows.
pub fn decide(
    policy_set: &EntityPolicySet,
    operation: Operation,
    ctx: &RequestContext,
    record: Option<&RecordSnapshot>,
) -> Decision {
    Decision {
        allow: evaluate(policy_set.rule(operation), ctx, record),
        trace: None,
    }
}

/// Like [`decide`], also recording the evaluation path
pub fn decide_traced(
    policy_set: &EntityPolicySet,
    operation: Operation,
    ctx: &RequestContext,
    record: Option<&RecordSnapshot>,
) -> Decision {
    let mut walker = TreeWalker {
        ctx,
        record,
        steps: Some(Vec::new()),
    };
    let allow = walker.eval(policy_set.rule(operation), operation.as_str());

    Decision {
        allow,
        trace: walker.steps.map(|steps| Trace { steps }),
    }
}

/// Keep the rows the principal may access, re-applying the policy per row
pub fn filter_records<'r, I>(
    policy_set: &EntityPolicySet,
    operation: Operation,
    ctx: &RequestContext,
    records: I,
) -> Vec<&'r RecordSnapshot>
where
    I: IntoIterator<Item = &'r RecordSnapshot>,
{
    let rule = policy_set.rule(operation);
    records
        .into_iter()
        .filter(|record| evaluate(rule, ctx, Some(*record)))
        .collect()
}
