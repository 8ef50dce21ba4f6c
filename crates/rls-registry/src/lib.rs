//! Policy registry - compiled read/write policies per entity
//!
//! The registry publishes immutable [`PolicySnapshot`]s. Readers grab the
//! current snapshot (an `Arc` clone) and evaluate without holding any lock;
//! writers build a complete replacement map and swap the pointer, so an
//! evaluation never sees a mix of old and new policies.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rls_compiler::PolicyCompiler;
use rls_ir::{fingerprint_of, EntityPolicySet, Operation, Rule};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

mod schema;
pub use schema::{load_dir, load_entity, load_file, EntitySchema, RlsBlock, SchemaError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

/// Immutable, published view of every entity's policies
#[derive(Debug)]
pub struct PolicySnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    fingerprint: String,
    policies: HashMap<String, Arc<EntityPolicySet>>,
}

impl PolicySnapshot {
    fn new(generation: u64, policies: HashMap<String, Arc<EntityPolicySet>>) -> Self {
        let fingerprint = snapshot_fingerprint(&policies);
        Self {
            generation,
            loaded_at: Utc::now(),
            fingerprint,
            policies,
        }
    }

    /// Monotonic counter, bumped on every published change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// SHA-256 over all entity policies, independent of insertion order
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn get(&self, entity: &str) -> Option<&Arc<EntityPolicySet>> {
        self.policies.get(entity)
    }

    pub fn policy_set(&self, entity: &str) -> Result<Arc<EntityPolicySet>, ConfigError> {
        self.policies
            .get(entity)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEntity(entity.to_string()))
    }

    pub fn lookup(&self, entity: &str, operation: Operation) -> Result<RuleRef, ConfigError> {
        Ok(RuleRef {
            set: self.policy_set(entity)?,
            operation,
        })
    }

    /// Entity names in sorted order
    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn snapshot_fingerprint(policies: &HashMap<String, Arc<EntityPolicySet>>) -> String {
    let ordered: BTreeMap<&str, &EntityPolicySet> = policies
        .iter()
        .map(|(name, set)| (name.as_str(), set.as_ref()))
        .collect();
    fingerprint_of(&ordered)
}

/// One operation's rule, kept alive by the snapshot's `Arc`
#[derive(Debug, Clone)]
pub struct RuleRef {
    set: Arc<EntityPolicySet>,
    operation: Operation,
}

impl RuleRef {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn policy_set(&self) -> &Arc<EntityPolicySet> {
        &self.set
    }
}

impl Deref for RuleRef {
    type Target = Rule;

    fn deref(&self) -> &Rule {
        self.set.rule(self.operation)
    }
}

/// Result of a whole-registry reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub generation: u64,
    pub entities: usize,
    pub fingerprint: String,
    /// False when the incoming policies were identical and nothing was swapped
    pub changed: bool,
}

/// Atomically swappable store of compiled entity policies
#[derive(Debug)]
pub struct PolicyRegistry {
    current: RwLock<Arc<PolicySnapshot>>,
    writer: Mutex<()>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(PolicySnapshot::new(0, HashMap::new()))),
            writer: Mutex::new(()),
        }
    }

    /// Current published snapshot; stays valid across later reloads
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Add or replace a single entity's policies
    pub fn register(&self, entity: impl Into<String>, policy_set: EntityPolicySet) -> u64 {
        let entity = entity.into();
        let _guard = self.writer.lock();

        let current = self.snapshot();
        let mut policies = current.policies.clone();
        policies.insert(entity.clone(), Arc::new(policy_set));

        let published = self.publish(current.generation + 1, policies);
        debug!(
            entity = %entity,
            generation = published.generation,
            "registered entity policies"
        );
        published.generation
    }

    /// Replace every entity's policies in one swap
    pub fn reload<I, S>(&self, policy_sets: I) -> ReloadOutcome
    where
        I: IntoIterator<Item = (S, EntityPolicySet)>,
        S: Into<String>,
    {
        let policies: HashMap<String, Arc<EntityPolicySet>> = policy_sets
            .into_iter()
            .map(|(name, set)| (name.into(), Arc::new(set)))
            .collect();
        let fingerprint = snapshot_fingerprint(&policies);

        let _guard = self.writer.lock();
        let current = self.snapshot();

        if current.fingerprint == fingerprint {
            debug!(
                generation = current.generation,
                "policies unchanged, skipping reload"
            );
            return ReloadOutcome {
                generation: current.generation,
                entities: current.len(),
                fingerprint,
                changed: false,
            };
        }

        let published = self.publish(current.generation + 1, policies);
        info!(
            generation = published.generation,
            entities = published.len(),
            fingerprint = %published.fingerprint,
            "policy registry reloaded"
        );

        ReloadOutcome {
            generation: published.generation,
            entities: published.len(),
            fingerprint: published.fingerprint.clone(),
            changed: true,
        }
    }

    /// Load every entity schema in `dir` and reload; on error the current snapshot stays
    pub fn reload_from_dir(
        &self,
        dir: &Path,
        compiler: &PolicyCompiler,
    ) -> Result<ReloadOutcome, SchemaError> {
        let policy_sets = load_dir(dir, compiler)?;
        Ok(self.reload(policy_sets))
    }

    pub fn lookup(&self, entity: &str, operation: Operation) -> Result<RuleRef, ConfigError> {
        self.snapshot().lookup(entity, operation)
    }

    pub fn policy_set(&self, entity: &str) -> Result<Arc<EntityPolicySet>, ConfigError> {
        self.snapshot().policy_set(entity)
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    fn publish(
        &self,
        generation: u64,
        policies: HashMap<String, Arc<EntityPolicySet>>,
    ) -> Arc<PolicySnapshot> {
        let snapshot = Arc::new(PolicySnapshot::new(generation, policies));
        *self.current.write() = Arc::clone(&snapshot);
        snapshot
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
