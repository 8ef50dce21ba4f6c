//! End-to-end decisions against the sample entity schemas

use std::path::Path;
use std::sync::Arc;

use rls_compiler::{compile_policy_set, PolicyCompiler};
use rls_engine::{decide, AccessDecisionEngine};
use rls_ir::{Operation, RecordSnapshot, RequestContext};
use rls_registry::{ConfigError, PolicyRegistry};
use serde_json::json;

fn engine() -> AccessDecisionEngine {
    let registry = Arc::new(PolicyRegistry::new());
    let schemas = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schemas");
    registry
        .reload_from_dir(&schemas, &PolicyCompiler::default())
        .unwrap();
    AccessDecisionEngine::new(registry)
}

fn ctx(value: serde_json::Value) -> RequestContext {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_app_stats_write() {
    let engine = engine();

    let admin = ctx(json!({"role": "admin"}));
    let secondary = ctx(json!({"admin_level": "secondary"}));
    let primary = ctx(json!({"email": "p@x.com", "admin_level": "primary"}));

    assert!(engine.is_allowed("AppStats", Operation::Write, &admin, None));
    assert!(!engine.is_allowed("AppStats", Operation::Write, &secondary, None));
    assert!(engine.is_allowed("AppStats", Operation::Write, &primary, None));
}

#[test]
fn test_review_read() {
    let engine = engine();
    let record = RecordSnapshot::new().with_field("created_by", "a@x.com");

    let author = ctx(json!({"email": "a@x.com"}));
    let stranger = ctx(json!({"email": "b@x.com", "role": "user"}));
    let secondary = ctx(json!({"email": "c@x.com", "admin_level": "secondary"}));

    assert!(
        engine
            .decide("Review", Operation::Read, &author, Some(&record))
            .unwrap()
            .allow
    );
    assert!(
        !engine
            .decide("Review", Operation::Read, &stranger, Some(&record))
            .unwrap()
            .allow
    );
    assert!(
        engine
            .decide("Review", Operation::Read, &secondary, Some(&record))
            .unwrap()
            .allow
    );
}

#[test]
fn test_review_read_is_case_sensitive() {
    let engine = engine();
    let record = RecordSnapshot::new().with_field("created_by", "a@x.com");

    let shouting = ctx(json!({"email": "A@X.COM", "role": "Admin"}));
    assert!(!engine.is_allowed("Review", Operation::Read, &shouting, Some(&record)));
}

#[test]
fn test_team_member_public_read() {
    let engine = engine();

    for principal in [
        RequestContext::anonymous(),
        ctx(json!({"role": "user"})),
        ctx(json!({"email": "x@y.z", "unexpected": [1, 2, 3]})),
    ] {
        assert!(engine.is_allowed("TeamMember", Operation::Read, &principal, None));
        assert!(engine.is_allowed(
            "TeamMember",
            Operation::Read,
            &principal,
            Some(&RecordSnapshot::new().with_field("full_name", "Ada"))
        ));
    }

    assert!(!engine.is_allowed(
        "TeamMember",
        Operation::Write,
        &RequestContext::anonymous(),
        None
    ));
}

#[test]
fn test_unknown_entity_is_config_error() {
    let engine = engine();
    let admin = ctx(json!({"role": "admin"}));

    assert_eq!(
        engine
            .decide("Invoice", Operation::Read, &admin, None)
            .unwrap_err(),
        ConfigError::UnknownEntity("Invoice".to_string())
    );
    assert!(!engine.is_allowed("Invoice", Operation::Read, &admin, None));
}

#[test]
fn test_list_read_filters_rows() {
    let engine = engine();
    let rows = vec![
        RecordSnapshot::new().with_field("created_by", "a@x.com"),
        RecordSnapshot::new().with_field("created_by", "b@x.com"),
        RecordSnapshot::new().with_field("created_by", "a@x.com"),
    ];

    let author = ctx(json!({"email": "a@x.com"}));
    assert_eq!(
        engine
            .filter("Review", Operation::Read, &author, &rows)
            .unwrap()
            .len(),
        2
    );

    // List-level read without a record: owner leaf cannot match
    assert!(!engine.is_allowed("Review", Operation::Read, &author, None));
}

#[test]
fn test_trace_reports_deciding_leaf() {
    let engine = engine().with_trace(true);
    let record = RecordSnapshot::new().with_field("created_by", "a@x.com");
    let primary = ctx(json!({"email": "z@x.com", "admin_level": "primary"}));

    let decision = engine
        .decide("Review", Operation::Read, &primary, Some(&record))
        .unwrap();
    let trace = decision.trace.expect("trace requested");

    assert!(decision.allow);
    assert_eq!(trace.deciding_leaf().unwrap().path, "read.$or[2]");
    // created_by, role, admin_level=primary, then the Or itself
    assert_eq!(trace.steps.len(), 4);
}

#[test]
fn test_decisions_are_deterministic() {
    let set = compile_policy_set(
        &json!({"$or": [{"created_by": "{{user.email}}"}, {"user_condition": {"role": "admin"}}]}),
        &json!({"$and": [{"created_by": "{{user.email}}"}, {"status": "draft"}]}),
    )
    .unwrap();
    let record = RecordSnapshot::new()
        .with_field("created_by", "a@x.com")
        .with_field("status", "draft");
    let author = ctx(json!({"email": "a@x.com"}));

    let first = decide(&set, Operation::Write, &author, Some(&record));
    for _ in 0..10 {
        assert_eq!(decide(&set, Operation::Write, &author, Some(&record)), first);
    }
    assert!(first.allow);

    let published = RecordSnapshot::new()
        .with_field("created_by", "a@x.com")
        .with_field("status", "published");
    assert!(!decide(&set, Operation::Write, &author, Some(&published)).allow);
}
