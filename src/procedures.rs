//! Built-in procedures
//!
//! The file transformations the `doze` binary ships out of the box, all
//! under the `core:` namespace and free of external tool dependencies:
//!
//! - `core:copy` copies a single input to every declared output
//! - `core:concat` concatenates the inputs, in declaration order, into
//!   every declared output
//! - `core:touch` ensures every declared output exists
//!
//! Hosts call [`register_builtins`] once at startup; external plugins follow
//! the same pattern with their own registration function.

use std::fs::{self, OpenOptions};
use std::io;

use thiserror::Error;

use crate::graph::Rule;
use crate::procedure::{
    Procedure, ProcedureError, ProcedureId, ProcedureInfo, ProcedureRegistry, RegistryError,
};

#[derive(Debug, Error)]
enum BuiltinError {
    #[error("core:copy takes exactly one input, got {0}")]
    CopyArity(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Register every built-in procedure in `registry`.
pub fn register_builtins(registry: &ProcedureRegistry) -> Result<(), RegistryError> {
    registry.register(&CopyProcedure)?;
    registry.register(&ConcatProcedure)?;
    registry.register(&TouchProcedure)?;
    Ok(())
}

/// `core:copy`: duplicate the single input into every output.
pub struct CopyProcedure;

impl CopyProcedure {
    fn make() -> Box<dyn Procedure> {
        Box::new(Self)
    }
}

impl Procedure for CopyProcedure {
    fn info(&self) -> ProcedureInfo {
        ProcedureInfo {
            id: ProcedureId::new("core:copy"),
            new: Self::make,
        }
    }

    fn execute(&mut self, rule: &Rule) -> Result<(), ProcedureError> {
        let [input] = rule.inputs() else {
            return Err(BuiltinError::CopyArity(rule.inputs().len()).into());
        };
        for output in rule.outputs() {
            fs::copy(input.real_path(), output.real_path()).map_err(BuiltinError::Io)?;
        }
        Ok(())
    }
}

/// `core:concat`: write the inputs, concatenated in declaration order, into
/// every output.
pub struct ConcatProcedure;

impl ConcatProcedure {
    fn make() -> Box<dyn Procedure> {
        Box::new(Self)
    }
}

impl Procedure for ConcatProcedure {
    fn info(&self) -> ProcedureInfo {
        ProcedureInfo {
            id: ProcedureId::new("core:concat"),
            new: Self::make,
        }
    }

    fn execute(&mut self, rule: &Rule) -> Result<(), ProcedureError> {
        let mut combined = Vec::new();
        for input in rule.inputs() {
            let bytes = fs::read(input.real_path()).map_err(BuiltinError::Io)?;
            combined.extend_from_slice(&bytes);
        }
        for output in rule.outputs() {
            fs::write(output.real_path(), &combined).map_err(BuiltinError::Io)?;
        }
        Ok(())
    }
}

/// `core:touch`: make every output exist, leaving existing content alone.
pub struct TouchProcedure;

impl TouchProcedure {
    fn make() -> Box<dyn Procedure> {
        Box::new(Self)
    }
}

impl Procedure for TouchProcedure {
    fn info(&self) -> ProcedureInfo {
        ProcedureInfo {
            id: ProcedureId::new("core:touch"),
            new: Self::make,
        }
    }

    fn execute(&mut self, rule: &Rule) -> Result<(), ProcedureError> {
        for output in rule.outputs() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(output.real_path())
                .map_err(BuiltinError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use tempfile::TempDir;

    fn make_rule(dir: &TempDir, inputs: &[&str], outputs: &[&str], procedure: &str) -> Rule {
        let location = dir.path().to_string_lossy().into_owned();
        let mut graph = Graph::new();
        let hash = graph
            .add_rule(inputs, outputs, ProcedureId::new(procedure), &location, &location)
            .unwrap();
        graph.rule(&hash).unwrap().clone()
    }

    #[test]
    fn test_registered_builtins() {
        let registry = ProcedureRegistry::new();
        register_builtins(&registry).unwrap();
        let ids: Vec<String> = registry
            .list("core:")
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["core:concat", "core:copy", "core:touch"]);
    }

    #[test]
    fn test_copy_duplicates_input_to_all_outputs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.txt"), "payload").unwrap();
        let rule = make_rule(&dir, &["in.txt"], &["a.txt", "b.txt"], "core:copy");

        CopyProcedure.execute(&rule).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "payload");
    }

    #[test]
    fn test_copy_rejects_multiple_inputs() {
        let dir = TempDir::new().unwrap();
        let rule = make_rule(&dir, &["a.txt", "b.txt"], &["out.txt"], "core:copy");
        let err = CopyProcedure.execute(&rule).unwrap_err();
        assert!(err.to_string().contains("exactly one input"));
    }

    #[test]
    fn test_concat_joins_inputs_in_declaration_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.txt"), "first\n").unwrap();
        fs::write(dir.path().join("two.txt"), "second\n").unwrap();
        let rule = make_rule(&dir, &["one.txt", "two.txt"], &["out.txt"], "core:concat");

        ConcatProcedure.execute(&rule).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn test_touch_creates_missing_outputs_and_keeps_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("seed.txt"), "x").unwrap();
        fs::write(dir.path().join("kept.txt"), "existing").unwrap();
        let rule = make_rule(&dir, &["seed.txt"], &["fresh.txt", "kept.txt"], "core:touch");

        TouchProcedure.execute(&rule).unwrap();
        assert!(dir.path().join("fresh.txt").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("kept.txt")).unwrap(),
            "existing"
        );
    }
}
