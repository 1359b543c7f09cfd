//! Procedure plugin contract and registry
//!
//! A procedure is a replaceable unit of work that performs a rule's
//! transformation: it reads the rule's declared inputs and writes exactly its
//! declared outputs. Implementations register themselves in a
//! [`ProcedureRegistry`] before any build runs; the executor looks them up by
//! ID and instantiates a fresh instance per execution.
//!
//! The registry is an explicit value handed to the executor, not process
//! global state. Plugin modules expose a plain registration function the host
//! program calls at startup, which keeps registration order visible.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::Rule;

/// Separator between the labels of a [`ProcedureId`].
pub const NAMESPACE_SEPARATOR: char = ':';

/// Errors raised while registering or looking up procedures.
///
/// Registration failures indicate a plugin-author bug; the `doze` binary
/// treats them as fatal at startup. `NotRegistered` is a build-configuration
/// error: a rule names a procedure nobody provided.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("procedure ID is missing")]
    MissingId,

    #[error("procedure already registered: {0}")]
    DuplicateId(ProcedureId),

    #[error("procedure not registered: {0}")]
    NotRegistered(ProcedureId),
}

/// Identifier of a procedure: colon-separated labels forming a hierarchy,
/// e.g. `core:copy` or `lang:c:object-file`. The last label is the name, the
/// labels before it the namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcedureId(String);

impl ProcedureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace portion of the ID, or an empty string if there is none.
    pub fn namespace(&self) -> &str {
        match self.0.rfind(NAMESPACE_SEPARATOR) {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// The name portion of the ID (the last label).
    pub fn name(&self) -> &str {
        match self.0.rfind(NAMESPACE_SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcedureId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Error type returned by procedure executions.
///
/// Procedures come from arbitrary plugins, so the contract uses a boxed
/// error; the executor wraps it with the failing rule and procedure ID.
pub type ProcedureError = Box<dyn std::error::Error + Send + Sync>;

/// A pluggable unit of work.
///
/// Implementations must confine their side effects to the rule's declared
/// inputs and outputs, and must be deterministic: the same inputs yield the
/// same outputs on every execution. Instances are never reused across rules;
/// the executor calls [`ProcedureInfo::new`] for every execution, so a
/// procedure must not carry rule-specific state between invocations.
pub trait Procedure: Send {
    /// Identity metadata: the procedure's ID and its constructor.
    fn info(&self) -> ProcedureInfo;

    /// Perform the transformation for one rule.
    fn execute(&mut self, rule: &Rule) -> Result<(), ProcedureError>;
}

/// Registered metadata for a procedure type.
#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    /// Unique, namespaced identifier.
    pub id: ProcedureId,
    /// Constructor for a fresh instance.
    pub new: fn() -> Box<dyn Procedure>,
}

/// Registry of available procedures.
///
/// Read-mostly: mutated during the registration phase at startup, then only
/// queried. The interior lock keeps lookups correct if registration and
/// lookup ever race (e.g. concurrent plugin initialization).
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    procedures: RwLock<BTreeMap<ProcedureId, ProcedureInfo>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure type from a prototype instance.
    ///
    /// Called once per procedure type, before any build runs. An empty ID or
    /// an ID collision is a programming error; callers at process start
    /// should treat a failure here as fatal.
    pub fn register(&self, prototype: &dyn Procedure) -> Result<(), RegistryError> {
        let info = prototype.info();
        if info.id.as_str().is_empty() {
            return Err(RegistryError::MissingId);
        }

        let mut procedures = self
            .procedures
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if procedures.contains_key(&info.id) {
            return Err(RegistryError::DuplicateId(info.id));
        }
        procedures.insert(info.id.clone(), info);
        Ok(())
    }

    /// Look up the registered metadata for an ID.
    pub fn get(&self, id: &ProcedureId) -> Result<ProcedureInfo, RegistryError> {
        let procedures = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        procedures
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(id.clone()))
    }

    /// All registered IDs under a namespace prefix, lexicographically sorted.
    ///
    /// An empty scope lists everything.
    pub fn list(&self, scope: &str) -> Vec<ProcedureId> {
        let procedures = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        procedures
            .keys()
            .filter(|id| id.as_str().starts_with(scope))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcedure {
        id: &'static str,
    }

    impl NoopProcedure {
        fn make() -> Box<dyn Procedure> {
            Box::new(NoopProcedure { id: "test:noop" })
        }
    }

    impl Procedure for NoopProcedure {
        fn info(&self) -> ProcedureInfo {
            ProcedureInfo {
                id: ProcedureId::new(self.id),
                new: NoopProcedure::make,
            }
        }

        fn execute(&mut self, _rule: &Rule) -> Result<(), ProcedureError> {
            Ok(())
        }
    }

    #[test]
    fn test_id_namespace_and_name() {
        let id = ProcedureId::new("lang:c:object-file");
        assert_eq!(id.namespace(), "lang:c");
        assert_eq!(id.name(), "object-file");

        let flat = ProcedureId::new("copy");
        assert_eq!(flat.namespace(), "");
        assert_eq!(flat.name(), "copy");

        let empty = ProcedureId::new("");
        assert_eq!(empty.namespace(), "");
        assert_eq!(empty.name(), "");
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProcedureRegistry::new();
        registry
            .register(&NoopProcedure { id: "test:noop" })
            .unwrap();

        let info = registry.get(&ProcedureId::new("test:noop")).unwrap();
        assert_eq!(info.id.as_str(), "test:noop");

        // A fresh instance reports the same identity.
        let instance = (info.new)();
        assert_eq!(instance.info().id, info.id);
    }

    #[test]
    fn test_register_rejects_empty_id() {
        let registry = ProcedureRegistry::new();
        let err = registry
            .register(&NoopProcedure { id: "" })
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingId);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let registry = ProcedureRegistry::new();
        registry
            .register(&NoopProcedure { id: "test:noop" })
            .unwrap();
        let err = registry
            .register(&NoopProcedure { id: "test:noop" })
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(ProcedureId::new("test:noop")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_id() {
        let registry = ProcedureRegistry::new();
        let err = registry.get(&ProcedureId::new("test:nothing")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotRegistered(ProcedureId::new("test:nothing"))
        );
    }

    #[test]
    fn test_list_is_scoped_and_sorted() {
        let registry = ProcedureRegistry::new();
        for id in ["zeta:last", "core:copy", "core:concat", "lang:c:yacc"] {
            registry.register(&NoopProcedure { id }).unwrap();
        }

        let all = registry.list("");
        let names: Vec<&str> = all.iter().map(ProcedureId::as_str).collect();
        assert_eq!(names, vec!["core:concat", "core:copy", "lang:c:yacc", "zeta:last"]);

        let core = registry.list("core:");
        let names: Vec<&str> = core.iter().map(ProcedureId::as_str).collect();
        assert_eq!(names, vec!["core:concat", "core:copy"]);
    }
}
