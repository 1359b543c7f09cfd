//! Topological resolver
//!
//! Computes an ordered execution plan from the current graph state: every
//! rule in the plan appears after the rules that create its inputs. Two
//! modes, equivalent in effect:
//!
//! - [`plan`] sweeps the whole graph forward from primordial rules (Kahn's
//!   algorithm variant) and rejects cyclic graphs.
//! - [`plan_for`] walks backward from explicit target artifacts, depth-first
//!   post-order with an explicit stack, and schedules only the rules the
//!   targets transitively need.
//!
//! Both modes mark rules `scheduled` as they enter the plan and reset stale
//! schedule flags before starting.

use std::collections::{BTreeSet, VecDeque};

use thiserror::Error;
use tracing::debug;

use crate::graph::{Graph, RuleHash};
use crate::tag::ArtifactTag;

/// Errors raised while resolving a plan. No partial plan is usable after a
/// resolution failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("target artifact {0} is not part of the graph")]
    UnknownTarget(String),

    #[error("target artifact {0} is a primordial input")]
    PrimordialTarget(String),

    #[error("dependency cycle involving rule {0}")]
    CyclicDependency(RuleHash),
}

/// Compute a full-graph execution plan by forward propagation.
///
/// A rule is primordial if none of its input artifacts has a creator; those
/// seed the work queue. A consumer becomes eligible once all of its inputs
/// are primordial or produced by an already scheduled rule. If any rule is
/// left unscheduled after the queue drains, the graph is cyclic.
pub fn plan(graph: &mut Graph) -> Result<Vec<RuleHash>, ResolveError> {
    graph.reset_schedule();

    let mut queue: VecDeque<RuleHash> = VecDeque::new();
    let mut queued: BTreeSet<RuleHash> = BTreeSet::new();
    for rule in graph.rules() {
        if rule_is_primordial(graph, rule.hash()) {
            queue.push_back(rule.hash().clone());
            queued.insert(rule.hash().clone());
        }
    }

    let mut plan = Vec::new();
    while let Some(hash) = queue.pop_front() {
        if let Some(rule) = graph.rule_mut(&hash) {
            rule.scheduled = true;
        }
        debug!(rule = %hash, "scheduled");
        plan.push(hash.clone());

        for consumer in consumers_of_outputs(graph, &hash) {
            if !queued.contains(&consumer) && rule_is_eligible(graph, &consumer) {
                queue.push_back(consumer.clone());
                queued.insert(consumer);
            }
        }
    }

    if plan.len() < graph.rule_count() {
        // Every acyclic rule has been scheduled; whatever remains sits on a
        // cycle. Report the first one for a deterministic message.
        let stuck = graph
            .rules()
            .find(|rule| !rule.scheduled)
            .map(|rule| rule.hash().clone());
        if let Some(hash) = stuck {
            return Err(ResolveError::CyclicDependency(hash));
        }
    }

    Ok(plan)
}

/// Compute an execution plan for explicit targets, or for the graph's
/// default targets (terminal artifacts with a creator) when `targets` is
/// `None`.
///
/// Walks each target's creator chain backward, scheduling dependencies
/// before dependents. Requesting an artifact the graph does not know is an
/// error, as is requesting a primordial input as a target.
pub fn plan_for(
    graph: &mut Graph,
    targets: Option<&[ArtifactTag]>,
) -> Result<Vec<RuleHash>, ResolveError> {
    graph.reset_schedule();

    let targets: Vec<ArtifactTag> = match targets {
        Some(tags) => tags.to_vec(),
        None => graph.default_targets(),
    };

    let mut plan = Vec::new();
    for target in &targets {
        let artifact = graph
            .artifact(target)
            .ok_or_else(|| ResolveError::UnknownTarget(target.to_string()))?;
        let creator = artifact
            .creator()
            .cloned()
            .ok_or_else(|| ResolveError::PrimordialTarget(target.to_string()))?;
        schedule_creator_chain(graph, creator, &mut plan)?;
    }

    Ok(plan)
}

/// Post-order DFS over the creator chain, iterative to keep deep dependency
/// chains off the call stack.
fn schedule_creator_chain(
    graph: &mut Graph,
    root: RuleHash,
    plan: &mut Vec<RuleHash>,
) -> Result<(), ResolveError> {
    enum Frame {
        Enter(RuleHash),
        Exit(RuleHash),
    }

    let mut stack = vec![Frame::Enter(root)];
    // Rules between Enter and Exit; meeting one again means a back edge.
    let mut in_progress: BTreeSet<RuleHash> = BTreeSet::new();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(hash) => {
                let already_scheduled = graph
                    .rule(&hash)
                    .map(|rule| rule.scheduled)
                    .unwrap_or(true);
                if already_scheduled {
                    continue;
                }
                if !in_progress.insert(hash.clone()) {
                    return Err(ResolveError::CyclicDependency(hash));
                }
                stack.push(Frame::Exit(hash.clone()));
                for creator in input_creators(graph, &hash) {
                    stack.push(Frame::Enter(creator));
                }
            }
            Frame::Exit(hash) => {
                in_progress.remove(&hash);
                if let Some(rule) = graph.rule_mut(&hash) {
                    rule.scheduled = true;
                }
                debug!(rule = %hash, "scheduled");
                plan.push(hash);
            }
        }
    }

    Ok(())
}

/// Whether none of the rule's inputs has a creator.
fn rule_is_primordial(graph: &Graph, hash: &RuleHash) -> bool {
    let Some(rule) = graph.rule(hash) else {
        return false;
    };
    rule.inputs().iter().all(|tag| {
        graph
            .artifact(tag)
            .map(|artifact| artifact.is_primordial())
            .unwrap_or(false)
    })
}

/// Whether every input of the rule is primordial or already scheduled.
fn rule_is_eligible(graph: &Graph, hash: &RuleHash) -> bool {
    let Some(rule) = graph.rule(hash) else {
        return false;
    };
    rule.inputs().iter().all(|tag| {
        let Some(artifact) = graph.artifact(tag) else {
            return false;
        };
        match artifact.creator() {
            None => true,
            Some(creator) => graph
                .rule(creator)
                .map(|rule| rule.scheduled)
                .unwrap_or(false),
        }
    })
}

/// Deduplicated consumers of a rule's output artifacts.
fn consumers_of_outputs(graph: &Graph, hash: &RuleHash) -> Vec<RuleHash> {
    let Some(rule) = graph.rule(hash) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut consumers = Vec::new();
    for tag in rule.outputs() {
        let Some(artifact) = graph.artifact(tag) else {
            continue;
        };
        for consumer in artifact.consumers() {
            if seen.insert(consumer.clone()) {
                consumers.push(consumer.clone());
            }
        }
    }
    consumers
}

/// Creators of a rule's input artifacts, skipping rules already scheduled.
fn input_creators(graph: &Graph, hash: &RuleHash) -> Vec<RuleHash> {
    let Some(rule) = graph.rule(hash) else {
        return Vec::new();
    };
    let mut creators = Vec::new();
    for tag in rule.inputs() {
        let Some(artifact) = graph.artifact(tag) else {
            continue;
        };
        if let Some(creator) = artifact.creator() {
            let scheduled = graph
                .rule(creator)
                .map(|rule| rule.scheduled)
                .unwrap_or(true);
            if !scheduled {
                creators.push(creator.clone());
            }
        }
    }
    creators
}
