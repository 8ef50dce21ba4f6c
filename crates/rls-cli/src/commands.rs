//! Command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use rls_engine::AccessDecisionEngine;
use rls_ir::{Operation, RecordSnapshot, RequestContext};
use rls_registry::{load_dir, PolicyRegistry};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, Level};

use crate::config::Config;
use crate::log_event;

/// JSON argument given inline or as `@path`
fn read_json_arg(raw: &str, what: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} from {}", what, path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid {} JSON", what))
}

fn read_json_object(raw: &str, what: &str) -> anyhow::Result<Map<String, Value>> {
    match read_json_arg(raw, what)? {
        Value::Object(map) => Ok(map),
        other => bail!("{} must be a JSON object, got {}", what, other),
    }
}

fn load_registry(config: &Config) -> anyhow::Result<Arc<PolicyRegistry>> {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .reload_from_dir(&config.schemas.directory, &config.compiler())
        .with_context(|| {
            format!(
                "Failed to load schemas from {}",
                config.schemas.directory.display()
            )
        })?;
    Ok(registry)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line per compiled entity, or one line per located schema error
pub fn validation_report(config: &Config) -> Result<Vec<String>, Vec<String>> {
    match load_dir(&config.schemas.directory, &config.compiler()) {
        Ok(loaded) => Ok(loaded
            .iter()
            .map(|(entity, set)| {
                format!(
                    "{:<24} read: {} nodes, write: {} nodes",
                    entity,
                    set.read.node_count(),
                    set.write.node_count()
                )
            })
            .collect()),
        Err(e) => Err(e.errors().iter().map(|err| err.to_string()).collect()),
    }
}

pub fn validate(config: &Config) -> anyhow::Result<()> {
    let dir = &config.schemas.directory;

    match validation_report(config) {
        Ok(lines) => {
            for line in &lines {
                println!("✓ {}", line);
            }
            println!("{} entities valid in {}", lines.len(), dir.display());
            Ok(())
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("✗ {}", err);
            }
            bail!("{} schema error(s) in {}", errors.len(), dir.display())
        }
    }
}

/// Decision for one request, as printed by `decide`
pub fn decision_json(
    config: &Config,
    entity: &str,
    operation: Operation,
    principal: &str,
    record: Option<&str>,
    trace: bool,
) -> anyhow::Result<Value> {
    let ctx = RequestContext::from(read_json_object(principal, "principal")?);
    let record = record
        .map(|raw| read_json_object(raw, "record"))
        .transpose()?
        .map(RecordSnapshot::from);

    let engine = AccessDecisionEngine::new(load_registry(config)?)
        .with_trace(trace || config.evaluation.trace);
    let decision = engine.decide(entity, operation, &ctx, record.as_ref())?;

    log_event!(
        level: Level::INFO,
        event: "access_decision",
        entity: entity,
        operation: operation.as_str(),
        allow: decision.allow,
    );

    Ok(json!({
        "entity": entity,
        "operation": operation,
        "allow": decision.allow,
        "trace": decision.trace,
    }))
}

pub fn decide(
    config: &Config,
    entity: &str,
    operation: Operation,
    principal: &str,
    record: Option<&str>,
    trace: bool,
) -> anyhow::Result<()> {
    print_json(&decision_json(
        config, entity, operation, principal, record, trace,
    )?)
}

pub fn show(config: &Config, entity: Option<&str>) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    let snapshot = registry.snapshot();

    let names: Vec<&str> = match entity {
        Some(name) => vec![name],
        None => snapshot.entities(),
    };

    let mut policies = Vec::with_capacity(names.len());
    for name in names {
        let set = snapshot.policy_set(name)?;
        policies.push(json!({
            "entity": name,
            "fingerprint": set.fingerprint(),
            "read": set.read,
            "write": set.write,
        }));
    }

    print_json(&json!({
        "generation": snapshot.generation(),
        "fingerprint": snapshot.fingerprint(),
        "policies": policies,
    }))
}

/// Records the principal may access, as printed by `filter`
pub fn filtered_records(
    config: &Config,
    entity: &str,
    operation: Operation,
    principal: &str,
    records: &str,
) -> anyhow::Result<Vec<RecordSnapshot>> {
    let ctx = RequestContext::from(read_json_object(principal, "principal")?);
    let rows = match read_json_arg(records, "records")? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(RecordSnapshot::from(map)),
                other => bail!("records must be JSON objects, got {}", other),
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        other => bail!("records must be a JSON array, got {}", other),
    };

    let engine = AccessDecisionEngine::new(load_registry(config)?);
    let allowed = engine.filter(entity, operation, &ctx, &rows)?;

    log_event!(
        level: Level::INFO,
        event: "records_filtered",
        entity: entity,
        operation: operation.as_str(),
        total: rows.len(),
        allowed: allowed.len(),
    );

    Ok(allowed.into_iter().cloned().collect())
}

pub fn filter(
    config: &Config,
    entity: &str,
    operation: Operation,
    principal: &str,
    records: &str,
) -> anyhow::Result<()> {
    print_json(&filtered_records(
        config, entity, operation, principal, records,
    )?)
}

/// Poll until interrupted; a failed reload keeps serving the previous policies
pub fn watch(config: &Config, interval: Duration) -> anyhow::Result<()> {
    let registry = PolicyRegistry::new();
    let compiler = config.compiler();
    let dir = &config.schemas.directory;

    info!(
        directory = %dir.display(),
        interval_secs = interval.as_secs(),
        "watching entity schemas"
    );

    loop {
        match registry.reload_from_dir(dir, &compiler) {
            Ok(outcome) if outcome.changed => {
                info!(
                    generation = outcome.generation,
                    entities = outcome.entities,
                    fingerprint = %outcome.fingerprint,
                    "policies published"
                );
            }
            Ok(outcome) => {
                debug!(generation = outcome.generation, "no schema changes");
            }
            Err(e) => {
                for err in e.errors() {
                    error!(error = %err, "schema rejected");
                }
                error!(
                    generation = registry.generation(),
                    "reload failed, keeping current policies"
                );
            }
        }
        std::thread::sleep(interval);
    }
}
