//! Pest-based parser for `{{user.<attribute>}}` placeholders
//!
//! Templates are parsed once at compile time. Evaluation only ever sees the
//! resulting [`TemplateRef`] and performs a direct attribute lookup.

use std::collections::BTreeSet;

use pest::error::InputLocation;
use pest::Parser;
use pest_derive::Parser;
use rls_ir::{TemplateRef, ValueSource, PRINCIPAL_NAMESPACE};
use thiserror::Error;

#[derive(Parser)]
#[grammar = "template.pest"]
struct TemplateParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Malformed template '{raw}': {reason}")]
    Malformed { raw: String, reason: String },

    #[error("Unknown template reference '{path}'")]
    UnknownReference { path: String },
}

/// Principal attributes templates may reference unless configured otherwise
pub const DEFAULT_ATTRIBUTES: &[&str] = &["id", "email", "full_name", "role", "admin_level"];

/// Strings that contain a delimiter must parse as a whole template
pub fn is_template_like(raw: &str) -> bool {
    raw.contains("{{") || raw.contains("}}")
}

/// Parse a rule string into a literal or a template reference.
///
/// Only checks syntax and the `user.` namespace; whether the attribute is one
/// the principal actually carries is decided by [`TemplateResolver`].
pub fn parse_template(raw: &str) -> Result<ValueSource, TemplateError> {
    if !is_template_like(raw) {
        return Ok(ValueSource::Literal(raw.into()));
    }

    let mut pairs = TemplateParser::parse(Rule::template, raw).map_err(|e| {
        let offset = match e.location {
            InputLocation::Pos(pos) => pos,
            InputLocation::Span((start, _)) => start,
        };
        TemplateError::Malformed {
            raw: raw.to_string(),
            reason: format!(
                "expected '{{{{user.<attribute>}}}}', invalid input at offset {}",
                offset
            ),
        }
    })?;

    let path = pairs
        .next()
        .and_then(|template| template.into_inner().find(|p| p.as_rule() == Rule::path))
        .ok_or_else(|| TemplateError::Malformed {
            raw: raw.to_string(),
            reason: "missing attribute path".to_string(),
        })?;

    let segments: Vec<&str> = path.as_str().split('.').collect();
    match segments.as_slice() {
        [namespace, attribute] if *namespace == PRINCIPAL_NAMESPACE => {
            Ok(ValueSource::Template(TemplateRef::new(*attribute)))
        }
        _ => Err(TemplateError::UnknownReference {
            path: path.as_str().to_string(),
        }),
    }
}

/// Validates template references against the principal-attribute namespace
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    attributes: BTreeSet<String>,
}

impl TemplateResolver {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_attribute(&mut self, attribute: impl Into<String>) {
        self.attributes.insert(attribute.into());
    }

    pub fn is_known(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    /// Parse `raw` and reject references to attributes outside the namespace
    pub fn resolve(&self, raw: &str) -> Result<ValueSource, TemplateError> {
        let source = parse_template(raw)?;
        if let ValueSource::Template(template) = &source {
            if !self.is_known(&template.attribute) {
                return Err(TemplateError::UnknownReference {
                    path: template.path(),
                });
            }
        }
        Ok(source)
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ATTRIBUTES.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_is_literal() {
        assert_eq!(
            parse_template("a@x.com").unwrap(),
            ValueSource::literal("a@x.com")
        );
        assert_eq!(parse_template("").unwrap(), ValueSource::literal(""));
    }

    #[test]
    fn test_user_template() {
        assert_eq!(
            parse_template("{{user.email}}").unwrap(),
            ValueSource::template("email")
        );
        assert_eq!(
            parse_template("{{ user.admin_level }}").unwrap(),
            ValueSource::template("admin_level")
        );
    }

    #[test]
    fn test_malformed_templates() {
        for raw in [
            "{{user.email",
            "user.email}}",
            "{{}}",
            "{{user.}}",
            "{{user..email}}",
            "owner-{{user.email}}",
            "{{user.email}} ",
            "{{user.e-mail}}",
        ] {
            assert!(
                matches!(parse_template(raw), Err(TemplateError::Malformed { .. })),
                "expected malformed: {raw}"
            );
        }
    }

    #[test]
    fn test_wrong_namespace() {
        assert_eq!(
            parse_template("{{org.id}}"),
            Err(TemplateError::UnknownReference {
                path: "org.id".to_string()
            })
        );
        assert_eq!(
            parse_template("{{user.profile.email}}"),
            Err(TemplateError::UnknownReference {
                path: "user.profile.email".to_string()
            })
        );
        assert!(matches!(
            parse_template("{{user}}"),
            Err(TemplateError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_resolver_known_attributes() {
        let resolver = TemplateResolver::default();

        assert!(resolver.resolve("{{user.email}}").is_ok());
        assert_eq!(
            resolver.resolve("{{user.department}}"),
            Err(TemplateError::UnknownReference {
                path: "user.department".to_string()
            })
        );

        let mut custom = TemplateResolver::new(["email"]);
        custom.add_attribute("department");
        assert!(custom.resolve("{{user.department}}").is_ok());
        assert!(custom.resolve("{{user.role}}").is_err());
    }
}
