//! Entity schema documents and their `rls` blocks
//!
//! A schema document is JSON (`.json`) or YAML (`.yaml`/`.yml`):
//!
//! ```json
//! {
//!   "name": "Review",
//!   "type": "object",
//!   "properties": { "title": { "type": "string" } },
//!   "rls": {
//!     "read": {
//!       "$or": [{ "created_by": "{{user.email}}" }, { "user_condition": { "role": "admin" } }]
//!     },
//!     "write": { "user_condition": { "role": "admin" } }
//!   }
//! }
//! ```
//!
//! Only `name` and `rls` are interpreted here; the rest is kept opaque.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rls_compiler::{CompileError, PolicyCompiler};
use rls_ir::{EntityPolicySet, Operation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse JSON schema {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to parse YAML schema {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Cannot determine entity name for {}", .path.display())]
    MissingName { path: PathBuf },

    #[error("Entity '{entity}' declares no rls block")]
    MissingRls { entity: String },

    #[error("Entity '{entity}' declares no rls.{operation} rule")]
    MissingRule { entity: String, operation: Operation },

    #[error("Entity '{entity}': {source}")]
    Compile {
        entity: String,
        source: CompileError,
    },

    #[error("Duplicate entity '{entity}' in {} and {}", .first.display(), .second.display())]
    DuplicateEntity {
        entity: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{} entity schemas failed to load", .0.len())]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    /// Flattened list of individual failures
    pub fn errors(&self) -> Vec<&SchemaError> {
        match self {
            SchemaError::Multiple(errors) => errors.iter().flat_map(|e| e.errors()).collect(),
            single => vec![single],
        }
    }
}

/// Declared read/write rules, still in raw form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlsBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<Value>,
}

/// Entity schema document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rls: Option<RlsBlock>,

    /// Everything else (`type`, `properties`, `required`, ...)
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl EntitySchema {
    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Read a schema file, choosing the parser by extension
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match extension(path).as_deref() {
            Some("yaml") | Some("yml") => {
                Self::from_yaml_str(&contents).map_err(|source| SchemaError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })
            }
            _ => Self::from_json_str(&contents).map_err(|source| SchemaError::Json {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Declared name, falling back to the file stem
    pub fn entity_name(&self, path: &Path) -> Result<String, SchemaError> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SchemaError::MissingName {
                path: path.to_path_buf(),
            })
    }

    /// Compile the `rls` block; a missing block or rule refuses the entity
    pub fn compile(
        &self,
        entity: &str,
        compiler: &PolicyCompiler,
    ) -> Result<EntityPolicySet, SchemaError> {
        let rls = self.rls.as_ref().ok_or_else(|| SchemaError::MissingRls {
            entity: entity.to_string(),
        })?;
        let missing = |operation| SchemaError::MissingRule {
            entity: entity.to_string(),
            operation,
        };
        let read = rls.read.as_ref().ok_or_else(|| missing(Operation::Read))?;
        let write = rls.write.as_ref().ok_or_else(|| missing(Operation::Write))?;

        load_entity(entity, read, write, compiler)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_schema_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            extension(path).as_deref(),
            Some("json") | Some("yaml") | Some("yml")
        )
}

/// Compile one entity's declared `rls.read` / `rls.write` rules
pub fn load_entity(
    entity: &str,
    read: &Value,
    write: &Value,
    compiler: &PolicyCompiler,
) -> Result<EntityPolicySet, SchemaError> {
    compiler
        .compile_policy_set(read, write)
        .map_err(|source| SchemaError::Compile {
            entity: entity.to_string(),
            source,
        })
}

/// Load and compile a single schema file
pub fn load_file(
    path: &Path,
    compiler: &PolicyCompiler,
) -> Result<(String, EntityPolicySet), SchemaError> {
    let schema = EntitySchema::from_path(path)?;
    let entity = schema.entity_name(path)?;
    let policy_set = schema.compile(&entity, compiler)?;
    Ok((entity, policy_set))
}

/// Load every schema file in `dir` (non-recursive, sorted by file name).
///
/// All-or-nothing: every failure is collected and returned together.
pub fn load_dir(
    dir: &Path,
    compiler: &PolicyCompiler,
) -> Result<Vec<(String, EntityPolicySet)>, SchemaError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SchemaError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if is_schema_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut errors = Vec::new();

    for path in paths {
        match load_file(&path, compiler) {
            Ok((entity, policy_set)) => {
                if let Some(first) = seen.get(&entity) {
                    errors.push(SchemaError::DuplicateEntity {
                        entity,
                        first: first.clone(),
                        second: path,
                    });
                    continue;
                }
                debug!(
                    entity = %entity,
                    path = %path.display(),
                    read_nodes = policy_set.read.node_count(),
                    write_nodes = policy_set.write.node_count(),
                    "loaded entity policies"
                );
                seen.insert(entity.clone(), path);
                loaded.push((entity, policy_set));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "entity schema rejected");
                errors.push(e);
            }
        }
    }

    match errors.len() {
        0 => Ok(loaded),
        1 => Err(errors.remove(0)),
        _ => Err(SchemaError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rls_ir::Rule;
    use serde_json::json;

    #[test]
    fn test_parse_json_schema() {
        let schema = EntitySchema::from_json_str(
            r#"{
                "name": "TeamMember",
                "type": "object",
                "properties": {"full_name": {"type": "string"}},
                "rls": {"read": {}, "write": {"user_condition": {"role": "admin"}}}
            }"#,
        )
        .unwrap();

        assert_eq!(schema.name.as_deref(), Some("TeamMember"));
        assert!(schema.other.contains_key("properties"));

        let set = schema
            .compile("TeamMember", &PolicyCompiler::default())
            .unwrap();
        assert_eq!(set.read, Rule::Empty);
    }

    #[test]
    fn test_parse_yaml_schema() {
        let schema = EntitySchema::from_yaml_str(
            r#"
name: Review
rls:
  read:
    $or:
      - created_by: "{{user.email}}"
      - user_condition:
          role: admin
  write: {}
"#,
        )
        .unwrap();

        let set = schema.compile("Review", &PolicyCompiler::default()).unwrap();
        assert!(matches!(set.read, Rule::Or { ref rules } if rules.len() == 2));
        assert!(set.write.is_unrestricted());
    }

    #[test]
    fn test_missing_rls_fails_closed() {
        let compiler = PolicyCompiler::default();

        let schema = EntitySchema::from_json_str(r#"{"name": "Note"}"#).unwrap();
        assert!(matches!(
            schema.compile("Note", &compiler),
            Err(SchemaError::MissingRls { .. })
        ));

        let schema = EntitySchema::from_json_str(r#"{"name": "Note", "rls": {"read": {}}}"#)
            .unwrap();
        assert!(matches!(
            schema.compile("Note", &compiler),
            Err(SchemaError::MissingRule {
                operation: Operation::Write,
                ..
            })
        ));
    }

    #[test]
    fn test_entity_name_fallback() {
        let schema = EntitySchema::from_json_str(r#"{"rls": {"read": {}, "write": {}}}"#).unwrap();
        assert_eq!(
            schema.entity_name(Path::new("schemas/Invoice.json")).unwrap(),
            "Invoice"
        );
    }

    #[test]
    fn test_load_entity_reports_location() {
        let err = load_entity(
            "Review",
            &json!({"$or": [{"created_by": "{{user.nickname}}"}]}),
            &json!({}),
            &PolicyCompiler::default(),
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Entity 'Review': Unknown template reference 'user.nickname' at read.$or[0].created_by"
        );
    }
}
