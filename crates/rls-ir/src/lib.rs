//! RLS Intermediate Representation (IR)
//!
//! Compiled form of row-level-security rules. The compiler produces it once per
//! schema load; the registry and the evaluator only ever read it.
//! All types are deterministically serializable for caching and provenance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod types;
pub use types::*;

/// Namespace that template references are rooted at (`{{user.<attribute>}}`)
pub const PRINCIPAL_NAMESPACE: &str = "user";

/// Compiled access rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Rule {
    /// Unconditional allow, compiled from `{}`
    Empty,
    And {
        rules: Vec<Rule>,
    },
    Or {
        rules: Vec<Rule>,
    },
    Leaf {
        condition: Condition,
    },
}

impl Rule {
    pub fn leaf(condition: Condition) -> Self {
        Rule::Leaf { condition }
    }

    /// True for the explicit "no restriction" rule
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Rule::Empty)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Rule::Empty => NodeKind::Empty,
            Rule::And { .. } => NodeKind::And,
            Rule::Or { .. } => NodeKind::Or,
            Rule::Leaf { condition } => condition.kind(),
        }
    }

    /// Total number of nodes in the tree
    pub fn node_count(&self) -> usize {
        match self {
            Rule::And { rules } | Rule::Or { rules } => {
                1 + rules.iter().map(Rule::node_count).sum::<usize>()
            }
            Rule::Empty | Rule::Leaf { .. } => 1,
        }
    }

    /// Longest root-to-leaf path, counting nodes
    pub fn depth(&self) -> usize {
        match self {
            Rule::And { rules } | Rule::Or { rules } => {
                1 + rules.iter().map(Rule::depth).max().unwrap_or(0)
            }
            Rule::Empty | Rule::Leaf { .. } => 1,
        }
    }

    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// Node classification used in evaluation traces and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Empty,
    And,
    Or,
    FieldEquals,
    UserAttributeMatch,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Empty => "empty",
            NodeKind::And => "and",
            NodeKind::Or => "or",
            NodeKind::FieldEquals => "field_equals",
            NodeKind::UserAttributeMatch => "user_attribute_match",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// `record[field] == value_source`
    FieldEquals {
        field: String,
        value_source: ValueSource,
    },
    /// Every listed principal attribute equals its literal
    UserAttributeMatch {
        attributes: BTreeMap<String, Value>,
    },
}

impl Condition {
    pub fn kind(&self) -> NodeKind {
        match self {
            Condition::FieldEquals { .. } => NodeKind::FieldEquals,
            Condition::UserAttributeMatch { .. } => NodeKind::UserAttributeMatch,
        }
    }
}

/// Right-hand side of a field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ValueSource {
    Literal(Value),
    Template(TemplateRef),
}

impl ValueSource {
    pub fn literal(value: impl Into<Value>) -> Self {
        ValueSource::Literal(value.into())
    }

    pub fn template(attribute: impl Into<String>) -> Self {
        ValueSource::Template(TemplateRef::new(attribute))
    }

    /// Resolve against the principal. `None` when a template names an absent attribute.
    pub fn resolve<'a>(&'a self, ctx: &'a RequestContext) -> Option<&'a Value> {
        match self {
            ValueSource::Literal(value) => Some(value),
            ValueSource::Template(template) => template.resolve(ctx),
        }
    }
}

/// Pre-parsed reference to a principal attribute, e.g. `{{user.email}}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateRef {
    pub attribute: String,
}

impl TemplateRef {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    /// Dotted path, e.g. `user.email`
    pub fn path(&self) -> String {
        format!("{}.{}", PRINCIPAL_NAMESPACE, self.attribute)
    }

    pub fn resolve<'a>(&self, ctx: &'a RequestContext) -> Option<&'a Value> {
        ctx.get(&self.attribute)
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.path())
    }
}

/// Record operation a policy governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Read, Operation::Write];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown operation: {0} (expected 'read' or 'write')")]
pub struct ParseOperationError(pub String);

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("read") {
            Ok(Operation::Read)
        } else if s.eq_ignore_ascii_case("write") {
            Ok(Operation::Write)
        } else {
            Err(ParseOperationError(s.to_string()))
        }
    }
}

/// Compiled read/write policies for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPolicySet {
    pub read: Rule,
    pub write: Rule,
}

impl EntityPolicySet {
    pub fn new(read: Rule, write: Rule) -> Self {
        Self { read, write }
    }

    /// Both operations allowed for everyone
    pub fn unrestricted() -> Self {
        Self::new(Rule::Empty, Rule::Empty)
    }

    pub fn rule(&self, operation: Operation) -> &Rule {
        match operation {
            Operation::Read => &self.read,
            Operation::Write => &self.write,
        }
    }

    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// SHA-256 over the canonical JSON encoding
pub fn fingerprint_of<T: Serialize + ?Sized>(value: &T) -> String {
    let json = serde_json::to_string(value).expect("IR should always serialize");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_read() -> Rule {
        Rule::Or {
            rules: vec![
                Rule::leaf(Condition::FieldEquals {
                    field: "created_by".to_string(),
                    value_source: ValueSource::template("email"),
                }),
                Rule::leaf(Condition::UserAttributeMatch {
                    attributes: BTreeMap::from([("role".to_string(), json!("admin"))]),
                }),
            ],
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let set1 = EntityPolicySet::new(review_read(), Rule::Empty);
        let set2 = set1.clone();

        assert_eq!(set1.fingerprint(), set2.fingerprint());
        assert_ne!(set1.fingerprint(), EntityPolicySet::unrestricted().fingerprint());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(review_read()).unwrap();

        assert_eq!(json["type"], "Or");
        assert_eq!(json["rules"][0]["condition"]["kind"], "field_equals");
        assert_eq!(json["rules"][0]["condition"]["value_source"]["kind"], "template");
        assert_eq!(
            json["rules"][0]["condition"]["value_source"]["value"]["attribute"],
            "email"
        );

        let parsed: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, review_read());
    }

    #[test]
    fn test_tree_metrics() {
        let rule = Rule::And {
            rules: vec![review_read(), Rule::Empty],
        };

        assert_eq!(rule.node_count(), 5);
        assert_eq!(rule.depth(), 3);
        assert_eq!(Rule::Empty.depth(), 1);
        assert_eq!(rule.kind(), NodeKind::And);
    }

    #[test]
    fn test_template_display() {
        let template = TemplateRef::new("email");
        assert_eq!(template.path(), "user.email");
        assert_eq!(template.to_string(), "{{user.email}}");
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("read".parse::<Operation>().unwrap(), Operation::Read);
        assert_eq!("WRITE".parse::<Operation>().unwrap(), Operation::Write);
        assert!("delete".parse::<Operation>().is_err());
        assert_eq!(Operation::Write.to_string(), "write");
    }

    #[test]
    fn test_value_source_resolve() {
        let ctx = RequestContext::new().with_attribute("email", "a@x.com");

        assert_eq!(
            ValueSource::template("email").resolve(&ctx),
            Some(&json!("a@x.com"))
        );
        assert_eq!(ValueSource::template("role").resolve(&ctx), None);
        assert_eq!(ValueSource::literal(7).resolve(&ctx), Some(&json!(7)));
    }
}
