//! Loads the sample entity schemas shipped in `schemas/`

use std::path::{Path, PathBuf};

use rls_compiler::PolicyCompiler;
use rls_ir::{Operation, Rule};
use rls_registry::{load_dir, ConfigError, PolicyRegistry, SchemaError};

fn schemas_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schemas")
}

/// Fresh scratch directory under the system temp dir
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rls-registry-{}-{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_load_sample_schemas() {
    let sets = load_dir(&schemas_dir(), &PolicyCompiler::default()).unwrap();
    let names: Vec<&str> = sets.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names, vec!["AppStats", "Review", "TeamMember"]);
}

#[test]
fn test_registry_from_sample_schemas() {
    let registry = PolicyRegistry::new();
    let outcome = registry
        .reload_from_dir(&schemas_dir(), &PolicyCompiler::default())
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.entities, 3);

    assert!(registry
        .lookup("TeamMember", Operation::Read)
        .unwrap()
        .is_unrestricted());
    assert!(matches!(
        *registry.lookup("Review", Operation::Read).unwrap(),
        Rule::Or { ref rules } if rules.len() == 4
    ));
    assert_eq!(
        registry.lookup("Invoice", Operation::Read).unwrap_err(),
        ConfigError::UnknownEntity("Invoice".to_string())
    );

    // Same files again: nothing to swap
    let again = registry
        .reload_from_dir(&schemas_dir(), &PolicyCompiler::default())
        .unwrap();
    assert!(!again.changed);
    assert_eq!(again.generation, outcome.generation);
}

#[test]
fn test_failed_reload_keeps_previous_snapshot() {
    let dir = scratch_dir("failed-reload");
    std::fs::write(
        dir.join("Review.json"),
        r#"{"name": "Review", "rls": {"read": {}, "write": {}}}"#,
    )
    .unwrap();

    let registry = PolicyRegistry::new();
    let compiler = PolicyCompiler::default();
    let first = registry.reload_from_dir(&dir, &compiler).unwrap();

    std::fs::write(
        dir.join("Review.json"),
        r#"{"name": "Review", "rls": {"read": {"$or": []}, "write": {}}}"#,
    )
    .unwrap();
    std::fs::write(dir.join("Broken.yaml"), "name: [unclosed").unwrap();

    let err = registry.reload_from_dir(&dir, &compiler).unwrap_err();
    assert_eq!(err.errors().len(), 2);
    assert_eq!(registry.generation(), first.generation);
    assert!(registry
        .lookup("Review", Operation::Read)
        .unwrap()
        .is_unrestricted());

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_duplicate_entity_names() {
    let dir = scratch_dir("duplicates");
    let body = r#"{"name": "Review", "rls": {"read": {}, "write": {}}}"#;
    std::fs::write(dir.join("a.json"), body).unwrap();
    std::fs::write(dir.join("b.json"), body).unwrap();
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let err = load_dir(&dir, &PolicyCompiler::default()).unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateEntity { ref entity, .. } if entity == "Review"));

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_missing_directory() {
    let err = load_dir(Path::new("/nonexistent/rls-schemas"), &PolicyCompiler::default())
        .unwrap_err();
    assert!(matches!(err, SchemaError::Io { .. }));
}
