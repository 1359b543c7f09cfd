//! Dozefile loading
//!
//! A dozefile is a declarative TOML rule list. Each `[[menu]]` entry names a
//! procedure and the inputs it turns into outputs; the optional `starters`
//! list documents the procedure namespaces the build relies on:
//!
//! ```toml
//! starters = ["core"]
//!
//! [[menu]]
//! do = "c:yacc"
//! inputs = ["parse.y"]
//! outputs = ["parse.h", "parse.c"]
//! ```
//!
//! Loading produces [`Graph::add_rule`] calls, nothing more; resolution and
//! staleness live elsewhere.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Graph, GraphError};
use crate::procedure::ProcedureId;

/// Errors raised while loading a dozefile.
#[derive(Debug, Error)]
pub enum DozefileError {
    #[error("failed to read dozefile: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse dozefile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("dozefile has no menu")]
    MissingMenu,

    #[error("invalid rule (do = {procedure}, outputs = {outputs:?}): {source}")]
    Rule {
        procedure: String,
        outputs: Vec<String>,
        source: GraphError,
    },
}

/// One declared transformation: `do` names the procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "do")]
    pub procedure: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Location of this action's artifacts, relative to the base location.
    #[serde(default)]
    pub location: Option<String>,
}

/// A parsed dozefile: the declarative description of how a build is
/// performed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dozefile {
    /// Procedure namespaces this build expects to be available.
    #[serde(default)]
    pub starters: Vec<String>,
    pub menu: Option<Vec<Action>>,
}

impl Dozefile {
    /// Parse a dozefile from TOML text.
    pub fn parse(text: &str) -> Result<Self, DozefileError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a dozefile from disk.
    pub fn from_file(path: &Path) -> Result<Self, DozefileError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Build a graph from the menu, with every artifact located under
    /// `base_location` (joined with the action's own location, if any).
    pub fn build_graph(&self, base_location: &str) -> Result<Graph, DozefileError> {
        let menu = self.menu.as_ref().ok_or(DozefileError::MissingMenu)?;

        let mut graph = Graph::new();
        for action in menu {
            let location = match &action.location {
                Some(scoped) => PathBuf::from(base_location)
                    .join(scoped)
                    .to_string_lossy()
                    .into_owned(),
                None => base_location.to_string(),
            };
            let inputs: Vec<&str> = action.inputs.iter().map(String::as_str).collect();
            let outputs: Vec<&str> = action.outputs.iter().map(String::as_str).collect();
            graph
                .add_rule(
                    &inputs,
                    &outputs,
                    ProcedureId::new(&action.procedure),
                    &location,
                    &location,
                )
                .map_err(|source| DozefileError::Rule {
                    procedure: action.procedure.clone(),
                    outputs: action.outputs.clone(),
                    source,
                })?;
        }

        Ok(graph)
    }
}
