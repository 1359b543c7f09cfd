//! Bipartite rule/artifact dependency graph
//!
//! The graph owns every [`Rule`] (keyed by its content hash) and every
//! [`Artifact`] (keyed by its normalized tag). Nothing outside the graph
//! holds authoritative state: cross references are stable handles, a
//! [`RuleHash`] for rules and a normalized tag string for artifacts, and
//! every mutation is a fresh map lookup. Detached copies of graph entities
//! would silently desynchronize as status bits change across passes.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::procedure::ProcedureId;
use crate::tag::ArtifactTag;

/// Errors raised while constructing the graph.
///
/// A failed [`Graph::add_rule`] leaves the graph in its last valid state;
/// the offending rule is never partially inserted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("rule has no inputs")]
    EmptyInputs,

    #[error("rule has no outputs")]
    EmptyOutputs,

    #[error("artifact {0} is both an input and an output of the same rule")]
    SelfReferentialRule(String),

    #[error("artifact {0} cannot be output by two different rules")]
    DuplicateOutput(String),

    #[error("rule already declared: {0}")]
    DuplicateRule(RuleHash),

    #[error("artifact {0} is not part of the graph")]
    UnknownArtifact(String),
}

/// Stable identity of a rule: the hex SHA-256 digest of its sorted
/// normalized input tags, sorted normalized output tags, and procedure ID.
///
/// Sorting before hashing makes the hash independent of declaration order,
/// so the same transformation declared twice collides and is rejected. The
/// hash is identity and dedup key only; it says nothing about the bytes the
/// rule produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleHash(String);

impl RuleHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn compute(inputs: &[ArtifactTag], outputs: &[ArtifactTag], procedure: &ProcedureId) -> Self {
        let mut sorted_inputs: Vec<String> = inputs.iter().map(ArtifactTag::normalized).collect();
        sorted_inputs.sort();
        let mut sorted_outputs: Vec<String> = outputs.iter().map(ArtifactTag::normalized).collect();
        sorted_outputs.sort();

        let mut hasher = Sha256::new();
        for tag in &sorted_inputs {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        for tag in &sorted_outputs {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        hasher.update(procedure.as_str().as_bytes());

        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for RuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node of the graph: one file tracked by the build.
#[derive(Debug, Clone)]
pub struct Artifact {
    tag: ArtifactTag,
    creator: Option<RuleHash>,
    consumers: Vec<RuleHash>,

    /// Whether the file was found on disk at the last filesystem refresh, or
    /// has been produced during the current build.
    pub exists: bool,
    /// Whether the artifact changed since it was last considered, either by
    /// an external touch or because a rule produced it this pass.
    pub modified: bool,
    /// Whether the modification has already been accounted for by scheduling
    /// the artifact's consumers.
    pub processed: bool,
}

impl Artifact {
    fn new(tag: ArtifactTag) -> Self {
        Self {
            tag,
            creator: None,
            consumers: Vec::new(),
            exists: false,
            modified: false,
            processed: false,
        }
    }

    pub fn tag(&self) -> &ArtifactTag {
        &self.tag
    }

    /// The rule that produces this artifact, if any.
    pub fn creator(&self) -> Option<&RuleHash> {
        self.creator.as_ref()
    }

    /// Every rule that reads this artifact, in registration order.
    pub fn consumers(&self) -> &[RuleHash] {
        &self.consumers
    }

    /// A primordial artifact has no creator rule; it must pre-exist on disk.
    pub fn is_primordial(&self) -> bool {
        self.creator.is_none()
    }

    /// A terminal artifact feeds no rule; a natural default build target.
    pub fn is_terminal(&self) -> bool {
        self.consumers.is_empty()
    }
}

/// An edge-like entity: a declared transformation from input artifacts to
/// output artifacts via a named procedure. Immutable after registration
/// except for the pass-scoped `scheduled`/`processed` flags.
#[derive(Debug, Clone)]
pub struct Rule {
    inputs: Vec<ArtifactTag>,
    outputs: Vec<ArtifactTag>,
    procedure: ProcedureId,
    hash: RuleHash,

    /// Set by the resolver when the rule enters a plan.
    pub scheduled: bool,
    /// Set by the executor once the rule has run this build.
    pub processed: bool,
}

impl Rule {
    /// Input tags in declaration order.
    pub fn inputs(&self) -> &[ArtifactTag] {
        &self.inputs
    }

    /// Output tags in declaration order.
    pub fn outputs(&self) -> &[ArtifactTag] {
        &self.outputs
    }

    pub fn procedure(&self) -> &ProcedureId {
        &self.procedure
    }

    pub fn hash(&self) -> &RuleHash {
        &self.hash
    }
}

/// The dependency graph for one build invocation.
///
/// Built up through [`Graph::add_rule`], then queried and mutated by the
/// resolver and the executor. Maps are ordered so every sweep over rules or
/// artifacts is deterministic.
#[derive(Debug, Default)]
pub struct Graph {
    rules: BTreeMap<RuleHash, Rule>,
    artifacts: BTreeMap<String, Artifact>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule: `inputs` under `input_location` are transformed into
    /// `outputs` under `output_location` by `procedure`.
    ///
    /// Artifacts are created lazily the first time a tag is referenced. Every
    /// validation runs before the graph is mutated, so a failure leaves the
    /// graph untouched.
    pub fn add_rule(
        &mut self,
        inputs: &[&str],
        outputs: &[&str],
        procedure: ProcedureId,
        input_location: &str,
        output_location: &str,
    ) -> Result<RuleHash, GraphError> {
        if inputs.is_empty() {
            return Err(GraphError::EmptyInputs);
        }
        if outputs.is_empty() {
            return Err(GraphError::EmptyOutputs);
        }

        let input_tags: Vec<ArtifactTag> = inputs
            .iter()
            .map(|name| ArtifactTag::new(*name, input_location))
            .collect();
        let output_tags: Vec<ArtifactTag> = outputs
            .iter()
            .map(|name| ArtifactTag::new(*name, output_location))
            .collect();

        // A rule consuming its own output would never terminate resolution.
        for input in &input_tags {
            if output_tags.contains(input) {
                return Err(GraphError::SelfReferentialRule(input.to_string()));
            }
        }

        // At most one creator per artifact.
        for output in &output_tags {
            if let Some(artifact) = self.artifacts.get(&output.normalized()) {
                if artifact.creator.is_some() {
                    return Err(GraphError::DuplicateOutput(output.to_string()));
                }
            }
        }

        let hash = RuleHash::compute(&input_tags, &output_tags, &procedure);
        if self.rules.contains_key(&hash) {
            return Err(GraphError::DuplicateRule(hash));
        }

        // All checks passed; wire the rule in.
        for output in &output_tags {
            let artifact = self
                .artifacts
                .entry(output.normalized())
                .or_insert_with(|| Artifact::new(output.clone()));
            artifact.creator = Some(hash.clone());
        }
        for input in &input_tags {
            let artifact = self
                .artifacts
                .entry(input.normalized())
                .or_insert_with(|| Artifact::new(input.clone()));
            artifact.consumers.push(hash.clone());
        }

        self.rules.insert(
            hash.clone(),
            Rule {
                inputs: input_tags,
                outputs: output_tags,
                procedure,
                hash: hash.clone(),
                scheduled: false,
                processed: false,
            },
        );

        Ok(hash)
    }

    pub fn rule(&self, hash: &RuleHash) -> Option<&Rule> {
        self.rules.get(hash)
    }

    pub(crate) fn rule_mut(&mut self, hash: &RuleHash) -> Option<&mut Rule> {
        self.rules.get_mut(hash)
    }

    /// Iterate all rules in hash order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Look up an artifact by tag.
    pub fn artifact(&self, tag: &ArtifactTag) -> Option<&Artifact> {
        self.artifacts.get(&tag.normalized())
    }

    pub(crate) fn artifact_mut(&mut self, tag: &ArtifactTag) -> Option<&mut Artifact> {
        self.artifacts.get_mut(&tag.normalized())
    }

    /// Iterate all artifacts in normalized-tag order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Terminal artifacts that have a creator: the default build targets.
    pub fn default_targets(&self) -> Vec<ArtifactTag> {
        self.artifacts
            .values()
            .filter(|a| a.is_terminal() && !a.is_primordial())
            .map(|a| a.tag.clone())
            .collect()
    }

    /// Clear every pass-scoped status bit: artifact `modified`/`processed`
    /// and rule `scheduled`/`processed`. Called at the start of a build.
    pub fn reset_state(&mut self) {
        for artifact in self.artifacts.values_mut() {
            artifact.modified = false;
            artifact.processed = false;
        }
        for rule in self.rules.values_mut() {
            rule.scheduled = false;
            rule.processed = false;
        }
    }

    /// Clear the resolver's `scheduled` flag on every rule, ahead of a new
    /// plan computation.
    pub(crate) fn reset_schedule(&mut self) {
        for rule in self.rules.values_mut() {
            rule.scheduled = false;
        }
    }

    /// Apply the state transitions of a successful rule execution: inputs
    /// become `processed`, outputs become `exists` and `modified`, and the
    /// rule itself is marked `processed`.
    pub(crate) fn record_execution(&mut self, hash: &RuleHash) {
        let (inputs, outputs) = match self.rules.get(hash) {
            Some(rule) => (rule.inputs.clone(), rule.outputs.clone()),
            None => return,
        };
        for tag in &inputs {
            if let Some(artifact) = self.artifacts.get_mut(&tag.normalized()) {
                artifact.processed = true;
            }
        }
        for tag in &outputs {
            if let Some(artifact) = self.artifacts.get_mut(&tag.normalized()) {
                artifact.exists = true;
                artifact.modified = true;
            }
        }
        if let Some(rule) = self.rules.get_mut(hash) {
            rule.processed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> ArtifactTag {
        ArtifactTag::new(name, "src")
    }

    fn add(
        graph: &mut Graph,
        inputs: &[&str],
        outputs: &[&str],
        procedure: &str,
    ) -> Result<RuleHash, GraphError> {
        graph.add_rule(inputs, outputs, ProcedureId::new(procedure), "src", "src")
    }

    #[test]
    fn test_add_rule_rejects_empty_lists() {
        let mut graph = Graph::new();
        assert_eq!(
            add(&mut graph, &[], &["out"], "core:copy"),
            Err(GraphError::EmptyInputs)
        );
        assert_eq!(
            add(&mut graph, &["in"], &[], "core:copy"),
            Err(GraphError::EmptyOutputs)
        );
        assert_eq!(graph.rule_count(), 0);
        assert_eq!(graph.artifact_count(), 0);
    }

    #[test]
    fn test_add_rule_rejects_self_reference() {
        let mut graph = Graph::new();
        let err = add(&mut graph, &["a.txt", "b.txt"], &["b.txt"], "core:copy").unwrap_err();
        assert_eq!(err, GraphError::SelfReferentialRule("src/b.txt".to_string()));
        assert_eq!(graph.artifact_count(), 0);
    }

    #[test]
    fn test_add_rule_rejects_second_creator() {
        let mut graph = Graph::new();
        add(&mut graph, &["a.c"], &["a.o"], "core:cc").unwrap();
        let err = add(&mut graph, &["other.c"], &["a.o"], "core:cc").unwrap_err();
        assert_eq!(err, GraphError::DuplicateOutput("src/a.o".to_string()));

        // The first creator survives.
        let artifact = graph.artifact(&tag("a.o")).unwrap();
        let creator = artifact.creator().unwrap();
        assert_eq!(graph.rule(creator).unwrap().inputs()[0], tag("a.c"));

        // The rejected rule's other artifacts were not created.
        assert!(graph.artifact(&tag("other.c")).is_none());
    }

    #[test]
    fn test_rule_hash_ignores_declaration_order() {
        let mut graph = Graph::new();
        let first = add(&mut graph, &["a.c", "b.c"], &["x.o", "y.o"], "core:cc").unwrap();

        let mut redeclared = Graph::new();
        let second = add(&mut redeclared, &["b.c", "a.c"], &["y.o", "x.o"], "core:cc").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_redeclaring_a_rule_fails() {
        let mut graph = Graph::new();
        add(&mut graph, &["a.c"], &["a.o"], "core:cc").unwrap();
        // An identical redeclaration trips the creator check on its outputs
        // before the hash dedup is even consulted.
        let err = add(&mut graph, &["a.c"], &["a.o"], "core:cc").unwrap_err();
        assert_eq!(err, GraphError::DuplicateOutput("src/a.o".to_string()));
        assert_eq!(graph.rule_count(), 1);
    }

    #[test]
    fn test_rule_hash_depends_on_procedure() {
        let mut graph = Graph::new();
        let copy = add(&mut graph, &["a.txt"], &["b.txt"], "core:copy").unwrap();
        // Same shape, different procedure: a distinct rule, but a duplicate
        // output, which is caught before hashing matters.
        let err = add(&mut graph, &["a.txt"], &["b.txt"], "core:concat").unwrap_err();
        assert_eq!(err, GraphError::DuplicateOutput("src/b.txt".to_string()));

        let mut other = Graph::new();
        let concat = add(&mut other, &["a.txt"], &["b.txt"], "core:concat").unwrap();
        assert_ne!(copy, concat);
    }

    #[test]
    fn test_consumers_accumulate_in_registration_order() {
        let mut graph = Graph::new();
        let first = add(&mut graph, &["parse.h", "parse.c"], &["parse.o"], "core:cc").unwrap();
        let second = add(&mut graph, &["parse.h", "main.c"], &["main.o"], "core:cc").unwrap();

        let header = graph.artifact(&tag("parse.h")).unwrap();
        assert_eq!(header.consumers(), &[first, second]);
        assert!(header.is_primordial());
    }

    #[test]
    fn test_lazy_artifact_creation_and_creator_wiring() {
        let mut graph = Graph::new();
        let hash = add(&mut graph, &["parse.y"], &["parse.h", "parse.c"], "core:yacc").unwrap();

        assert_eq!(graph.artifact_count(), 3);
        let source = graph.artifact(&tag("parse.y")).unwrap();
        assert!(source.is_primordial());
        assert!(!source.is_terminal());

        let header = graph.artifact(&tag("parse.h")).unwrap();
        assert_eq!(header.creator(), Some(&hash));
        assert!(header.is_terminal());
    }

    #[test]
    fn test_default_targets_are_terminal_with_creator() {
        let mut graph = Graph::new();
        add(&mut graph, &["parse.o", "main.o"], &["exe"], "core:link").unwrap();
        add(&mut graph, &["parse.c"], &["parse.o"], "core:cc").unwrap();
        add(&mut graph, &["main.c"], &["main.o"], "core:cc").unwrap();

        let targets = graph.default_targets();
        assert_eq!(targets, vec![tag("exe")]);
    }

    #[test]
    fn test_record_execution_transitions() {
        let mut graph = Graph::new();
        let hash = add(&mut graph, &["a.c"], &["a.o"], "core:cc").unwrap();

        graph.record_execution(&hash);

        let input = graph.artifact(&tag("a.c")).unwrap();
        assert!(input.processed);
        assert!(!input.modified);

        let output = graph.artifact(&tag("a.o")).unwrap();
        assert!(output.exists);
        assert!(output.modified);

        assert!(graph.rule(&hash).unwrap().processed);
    }

    #[test]
    fn test_reset_state_clears_pass_bits() {
        let mut graph = Graph::new();
        let hash = add(&mut graph, &["a.c"], &["a.o"], "core:cc").unwrap();
        graph.record_execution(&hash);

        graph.reset_state();
        assert!(!graph.rule(&hash).unwrap().processed);
        let output = graph.artifact(&tag("a.o")).unwrap();
        assert!(!output.modified);
        // `exists` reflects disk state, not pass state; it is refreshed by
        // the staleness tracker, not cleared here.
        assert!(output.exists);
    }
}
