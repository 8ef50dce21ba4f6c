//! Policy compiler - declarative JSON rules to IR
//!
//! Grammar accepted:
//!
//! ```text
//! Rule := {} | { "$or": [Rule, ...] } | { "$and": [Rule, ...] } | Leaf
//! Leaf := { "<field>": <literal-or-template-string> }
//!       | { "user_condition": { "<attr>": <literal>, ... } }
//! ```
//!
//! A rule object holds exactly one key; combine conditions with `$and`.

use std::collections::BTreeMap;

use rls_ir::{Condition, EntityPolicySet, Operation, Rule, ValueSource};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::template::{is_template_like, TemplateError, TemplateResolver};

pub const OR_OPERATOR: &str = "$or";
pub const AND_OPERATOR: &str = "$and";
pub const USER_CONDITION: &str = "user_condition";

const ROOT_LOCATION: &str = "<root>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Malformed rule at {location}: {reason}")]
    MalformedRule { location: String, reason: String },

    #[error("Empty composite at {location}: '{operator}' requires at least one sub-rule")]
    EmptyComposite { location: String, operator: String },

    #[error("Unknown operator '{operator}' at {location}")]
    UnknownOperator { location: String, operator: String },

    #[error("Unknown template reference '{path}' at {location}")]
    UnknownTemplateRef { location: String, path: String },

    #[error("Malformed template at {location}: {reason}")]
    MalformedTemplate { location: String, reason: String },
}

impl CompileError {
    /// Where in the rule the problem was found, e.g. `read.$or[1].created_by`
    pub fn location(&self) -> &str {
        match self {
            CompileError::MalformedRule { location, .. }
            | CompileError::EmptyComposite { location, .. }
            | CompileError::UnknownOperator { location, .. }
            | CompileError::UnknownTemplateRef { location, .. }
            | CompileError::MalformedTemplate { location, .. } => location,
        }
    }

    fn location_mut(&mut self) -> &mut String {
        match self {
            CompileError::MalformedRule { location, .. }
            | CompileError::EmptyComposite { location, .. }
            | CompileError::UnknownOperator { location, .. }
            | CompileError::UnknownTemplateRef { location, .. }
            | CompileError::MalformedTemplate { location, .. } => location,
        }
    }

    /// Root the location under `prefix` (the operation name for policy sets)
    pub fn prefixed(mut self, prefix: &str) -> Self {
        let location = self.location_mut();
        let rooted = if location.as_str() == ROOT_LOCATION {
            prefix.to_string()
        } else {
            format!("{}.{}", prefix, location)
        };
        *location = rooted;
        self
    }

    fn from_template(err: TemplateError, path: &str) -> Self {
        let location = display_location(path);
        match err {
            TemplateError::Malformed { raw, reason } => CompileError::MalformedTemplate {
                location,
                reason: format!("'{}': {}", raw, reason),
            },
            TemplateError::UnknownReference { path } => {
                CompileError::UnknownTemplateRef { location, path }
            }
        }
    }
}

fn display_location(path: &str) -> String {
    if path.is_empty() {
        ROOT_LOCATION.to_string()
    } else {
        path.to_string()
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn malformed(path: &str, reason: impl Into<String>) -> CompileError {
    CompileError::MalformedRule {
        location: display_location(path),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Composite {
    And,
    Or,
}

impl Composite {
    fn operator(self) -> &'static str {
        match self {
            Composite::And => AND_OPERATOR,
            Composite::Or => OR_OPERATOR,
        }
    }
}

/// Compiles raw rules into [`Rule`] trees, validating templates once
#[derive(Debug, Clone, Default)]
pub struct PolicyCompiler {
    resolver: TemplateResolver,
}

impl PolicyCompiler {
    pub fn new(resolver: TemplateResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    /// Compile one declarative rule
    pub fn compile(&self, raw: &Value) -> Result<Rule, CompileError> {
        let rule = self.compile_at(raw, "")?;
        debug!(
            nodes = rule.node_count(),
            depth = rule.depth(),
            "compiled rule"
        );
        Ok(rule)
    }

    /// Compile an entity's read and write rules; error locations start with the operation
    pub fn compile_policy_set(
        &self,
        read: &Value,
        write: &Value,
    ) -> Result<EntityPolicySet, CompileError> {
        let read = self
            .compile(read)
            .map_err(|e| e.prefixed(Operation::Read.as_str()))?;
        let write = self
            .compile(write)
            .map_err(|e| e.prefixed(Operation::Write.as_str()))?;
        Ok(EntityPolicySet::new(read, write))
    }

    fn compile_at(&self, raw: &Value, path: &str) -> Result<Rule, CompileError> {
        let object = raw.as_object().ok_or_else(|| {
            malformed(path, format!("expected an object, found {}", json_type(raw)))
        })?;

        if object.is_empty() {
            return Ok(Rule::Empty);
        }

        if object.len() > 1 {
            let keys: Vec<&str> = object.keys().map(String::as_str).collect();
            return Err(malformed(
                path,
                format!(
                    "expected exactly one key, found {} ({}); combine conditions with '{}'",
                    keys.len(),
                    keys.join(", "),
                    AND_OPERATOR
                ),
            ));
        }

        let (key, value) = object
            .iter()
            .next()
            .ok_or_else(|| malformed(path, "expected exactly one key"))?;
        self.compile_entry(key, value, &child_path(path, key))
    }

    fn compile_entry(&self, key: &str, value: &Value, path: &str) -> Result<Rule, CompileError> {
        match key {
            OR_OPERATOR => self.compile_composite(Composite::Or, value, path),
            AND_OPERATOR => self.compile_composite(Composite::And, value, path),
            operator if operator.starts_with('$') => Err(CompileError::UnknownOperator {
                location: display_location(path),
                operator: operator.to_string(),
            }),
            USER_CONDITION => self.compile_user_condition(value, path),
            "" => Err(malformed(path, "field name must not be empty")),
            field => self.compile_field_equals(field, value, path),
        }
    }

    fn compile_composite(
        &self,
        composite: Composite,
        value: &Value,
        path: &str,
    ) -> Result<Rule, CompileError> {
        let items = value.as_array().ok_or_else(|| {
            malformed(
                path,
                format!(
                    "'{}' expects an array of rules, found {}",
                    composite.operator(),
                    json_type(value)
                ),
            )
        })?;

        if items.is_empty() {
            return Err(CompileError::EmptyComposite {
                location: display_location(path),
                operator: composite.operator().to_string(),
            });
        }

        let rules = items
            .iter()
            .enumerate()
            .map(|(i, item)| self.compile_at(item, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match composite {
            Composite::And => Rule::And { rules },
            Composite::Or => Rule::Or { rules },
        })
    }

    fn compile_user_condition(&self, value: &Value, path: &str) -> Result<Rule, CompileError> {
        let object: &Map<String, Value> = value.as_object().ok_or_else(|| {
            malformed(
                path,
                format!(
                    "'{}' expects an object of attribute values, found {}",
                    USER_CONDITION,
                    json_type(value)
                ),
            )
        })?;

        if object.is_empty() {
            return Err(malformed(
                path,
                format!("'{}' must name at least one attribute", USER_CONDITION),
            ));
        }

        let mut attributes = BTreeMap::new();
        for (attribute, expected) in object {
            let attr_path = child_path(path, attribute);
            if attribute.is_empty() {
                return Err(malformed(&attr_path, "attribute name must not be empty"));
            }
            check_scalar(expected, &attr_path)?;
            if let Value::String(s) = expected {
                if is_template_like(s) {
                    return Err(malformed(
                        &attr_path,
                        format!("templates are not supported inside '{}'", USER_CONDITION),
                    ));
                }
            }
            if !self.resolver.is_known(attribute) {
                warn!(
                    attribute = %attribute,
                    location = %attr_path,
                    "user_condition references an attribute outside the principal namespace"
                );
            }
            attributes.insert(attribute.clone(), expected.clone());
        }

        Ok(Rule::leaf(Condition::UserAttributeMatch { attributes }))
    }

    fn compile_field_equals(
        &self,
        field: &str,
        value: &Value,
        path: &str,
    ) -> Result<Rule, CompileError> {
        check_scalar(value, path)?;
        let value_source = match value {
            Value::String(raw) => self
                .resolver
                .resolve(raw)
                .map_err(|e| CompileError::from_template(e, path))?,
            literal => ValueSource::Literal(literal.clone()),
        };

        Ok(Rule::leaf(Condition::FieldEquals {
            field: field.to_string(),
            value_source,
        }))
    }
}

fn check_scalar(value: &Value, path: &str) -> Result<(), CompileError> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
        other => Err(malformed(
            path,
            format!(
                "expected a string, number or boolean, found {}",
                json_type(other)
            ),
        )),
    }
}

/// Compile with the default principal-attribute namespace
pub fn compile(raw: &Value) -> Result<Rule, CompileError> {
    PolicyCompiler::default().compile(raw)
}

/// Compile an entity's read/write pair with the default namespace
pub fn compile_policy_set(read: &Value, write: &Value) -> Result<EntityPolicySet, CompileError> {
    PolicyCompiler::default().compile_policy_set(read, write)
}
