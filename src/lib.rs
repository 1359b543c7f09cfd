//! doze: incremental build orchestrator
//!
//! Given a declarative set of transformation rules (input files to output
//! files, performed by a named procedure), doze determines which outputs are
//! stale, computes a dependency-respecting execution order, and drives
//! execution until everything is up to date.
//!
//! The pieces, leaf first: [`tag::ArtifactTag`] identifies files,
//! [`graph::Graph`] owns the bipartite rule/artifact model, [`resolve`]
//! turns it into topologically ordered plans, [`stale`] decides what must
//! re-execute, and [`executor`] runs plans through the procedures registered
//! in a [`procedure::ProcedureRegistry`]. [`dozefile`] loads the declarative
//! rule list and [`procedures`] ships the built-in transformations.

pub mod dozefile;
pub mod executor;
pub mod graph;
pub mod procedure;
pub mod procedures;
pub mod resolve;
pub mod stale;
pub mod tag;

pub use dozefile::{Dozefile, DozefileError};
pub use executor::{build, BuildError, BuildReport, ExecuteError, Executor};
pub use graph::{Artifact, Graph, GraphError, Rule, RuleHash};
pub use procedure::{
    Procedure, ProcedureError, ProcedureId, ProcedureInfo, ProcedureRegistry, RegistryError,
};
pub use procedures::register_builtins;
pub use resolve::ResolveError;
pub use tag::ArtifactTag;
