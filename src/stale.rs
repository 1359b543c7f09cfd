//! Staleness tracking
//!
//! Decides, from on-disk state and the status bits accumulated during the
//! current build, which rules must re-execute. The check is structural:
//! existence plus modification flags, never content hashes. A rule is
//! satisfied once its declared outputs exist, regardless of their bytes.
//!
//! The scan is invoked repeatedly by the executor until it returns an empty
//! set (the fixed point).

use std::fs;

use tracing::debug;

use crate::graph::{Graph, GraphError, RuleHash};
use crate::tag::ArtifactTag;

impl Graph {
    /// Refresh every artifact's `exists` bit from a filesystem stat, and
    /// clear `modified`: at this point nothing is known to have changed yet.
    /// Called once at the start of a build.
    pub fn refresh_existing(&mut self) {
        let tags: Vec<ArtifactTag> = self.artifacts().map(|a| a.tag().clone()).collect();
        for tag in tags {
            let exists = fs::metadata(tag.real_path()).is_ok();
            if let Some(artifact) = self.artifact_mut(&tag) {
                artifact.exists = exists;
                artifact.modified = false;
            }
        }
    }

    /// Mark artifacts as modified outside of the build system (e.g. an
    /// editor touched a source file). Unknown tags are an error.
    pub fn touch(&mut self, tags: &[ArtifactTag]) -> Result<(), GraphError> {
        // Validate first so a bad tag leaves the graph unchanged.
        for tag in tags {
            if self.artifact(tag).is_none() {
                return Err(GraphError::UnknownArtifact(tag.to_string()));
            }
        }
        for tag in tags {
            if let Some(artifact) = self.artifact_mut(tag) {
                debug!(artifact = %tag, "marked as externally modified");
                artifact.modified = true;
            }
        }
        Ok(())
    }

    /// The deduplicated set of stale rules, in hash order.
    ///
    /// A rule not yet processed this build is stale if any input artifact is
    /// modified and not yet accounted for, or failing that, if any declared
    /// output is missing on disk. Two consecutive calls with no intervening
    /// execution return the same set.
    pub fn stale_rules(&self) -> Vec<RuleHash> {
        let mut stale = Vec::new();

        'rules: for rule in self.rules() {
            if rule.processed {
                continue;
            }
            for tag in rule.inputs() {
                let Some(artifact) = self.artifact(tag) else {
                    continue;
                };
                if artifact.modified && !artifact.processed {
                    stale.push(rule.hash().clone());
                    continue 'rules;
                }
            }
            for tag in rule.outputs() {
                let missing = self
                    .artifact(tag)
                    .map(|artifact| !artifact.exists)
                    .unwrap_or(true);
                if missing {
                    stale.push(rule.hash().clone());
                    continue 'rules;
                }
            }
        }

        stale
    }
}
