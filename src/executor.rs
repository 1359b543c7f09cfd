//! Plan execution
//!
//! Consumes an ordered plan, dispatches each stale rule to its registered
//! procedure, applies the resulting state transitions to the graph, and
//! repeats until the staleness tracker reports nothing left to do.
//!
//! A rule whose inputs are not on disk yet is skipped for the pass, not
//! failed: its own creator runs first and a later pass picks it up. A pass
//! that executes nothing while stale rules remain means some input will
//! never appear (a primordial file is missing), which is reported instead of
//! looping forever.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info};

use crate::graph::{Graph, GraphError, RuleHash};
use crate::procedure::{ProcedureId, ProcedureRegistry, RegistryError};
use crate::resolve::{self, ResolveError};
use crate::tag::ArtifactTag;

/// Errors raised while executing a plan. Any of these aborts the remaining
/// plan; already-completed rules' outputs are left intact.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("rule {rule} failed in procedure {procedure}: {source}")]
    Procedure {
        rule: RuleHash,
        procedure: ProcedureId,
        source: crate::procedure::ProcedureError,
    },

    #[error("rule {0} was planned but is not part of the graph")]
    MissingRule(RuleHash),

    #[error("build stalled; these inputs never appeared on disk: {}", .0.join(", "))]
    Stalled(Vec<String>),
}

/// Errors from the end-to-end [`build`] entry point.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// What a build did: how many rules ran, over how many passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub executed: usize,
    pub passes: usize,
}

impl BuildReport {
    /// True when the graph was already up to date.
    pub fn nothing_to_do(&self) -> bool {
        self.executed == 0
    }
}

/// Drives stale rules of a plan to completion through their procedures.
pub struct Executor<'a> {
    registry: &'a ProcedureRegistry,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a ProcedureRegistry) -> Self {
        Self { registry }
    }

    /// Execute the plan until no rule in it remains stale.
    ///
    /// Each pass walks the plan in order, skipping rules that are not stale
    /// and deferring rules whose inputs are still missing. A fresh procedure
    /// instance is created per execution.
    pub fn run(&self, graph: &mut Graph, plan: &[RuleHash]) -> Result<BuildReport, ExecuteError> {
        let planned: BTreeSet<&RuleHash> = plan.iter().collect();
        let mut report = BuildReport::default();

        loop {
            let stale: BTreeSet<RuleHash> = graph
                .stale_rules()
                .into_iter()
                .filter(|hash| planned.contains(hash))
                .collect();
            if stale.is_empty() {
                break;
            }
            report.passes += 1;

            let mut progressed = false;
            for hash in plan.iter().filter(|hash| stale.contains(*hash)) {
                let rule = graph
                    .rule(hash)
                    .ok_or_else(|| ExecuteError::MissingRule(hash.clone()))?
                    .clone();

                // Not ready yet: a missing input will be produced by its own
                // creator in an earlier position on a later pass.
                if let Some(missing) = first_missing_input(graph, rule.inputs()) {
                    debug!(rule = %hash, input = %missing, "input not on disk yet, deferring");
                    continue;
                }

                let procedure_info = self.registry.get(rule.procedure())?;
                let mut procedure = (procedure_info.new)();
                info!(rule = %hash, procedure = %procedure_info.id, "executing rule");
                procedure
                    .execute(&rule)
                    .map_err(|source| ExecuteError::Procedure {
                        rule: hash.clone(),
                        procedure: procedure_info.id.clone(),
                        source,
                    })?;

                graph.record_execution(hash);
                report.executed += 1;
                progressed = true;
            }

            if !progressed {
                return Err(ExecuteError::Stalled(missing_inputs(graph, &stale)));
            }
        }

        if report.nothing_to_do() {
            info!("nothing to do");
        }
        Ok(report)
    }
}

/// End-to-end build: reset pass state, refresh on-disk existence, apply
/// external touches, resolve a plan for the targets (or the default
/// targets), and execute it to the fixed point.
pub fn build(
    graph: &mut Graph,
    registry: &ProcedureRegistry,
    targets: Option<&[ArtifactTag]>,
    touched: &[ArtifactTag],
) -> Result<BuildReport, BuildError> {
    graph.reset_state();
    graph.refresh_existing();
    graph.touch(touched)?;

    let plan = resolve::plan_for(graph, targets)?;
    let report = Executor::new(registry).run(graph, &plan)?;
    Ok(report)
}

fn first_missing_input(graph: &Graph, inputs: &[ArtifactTag]) -> Option<ArtifactTag> {
    inputs
        .iter()
        .find(|tag| {
            graph
                .artifact(tag)
                .map(|artifact| !artifact.exists)
                .unwrap_or(true)
        })
        .cloned()
}

/// Normalized paths of every missing input across a set of rules, for the
/// stalled-build report.
fn missing_inputs(graph: &Graph, rules: &BTreeSet<RuleHash>) -> Vec<String> {
    let mut missing = BTreeSet::new();
    for hash in rules {
        let Some(rule) = graph.rule(hash) else {
            continue;
        };
        for tag in rule.inputs() {
            let absent = graph
                .artifact(tag)
                .map(|artifact| !artifact.exists)
                .unwrap_or(true);
            if absent {
                missing.insert(tag.normalized());
            }
        }
    }
    missing.into_iter().collect()
}
