//! doze CLI
//!
//! Entry point for the `doze` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use doze::{
    build, register_builtins, ArtifactTag, BuildError, Dozefile, ExecuteError, Graph,
    ProcedureRegistry, RuleHash,
};

#[derive(Parser)]
#[command(name = "doze")]
#[command(about = "Incremental build orchestrator", version)]
struct Cli {
    /// Path to the dozefile (TOML rule list)
    #[arg(long, short = 'f', default_value = "dozefile.toml", global = true)]
    file: PathBuf,

    /// Base location for all artifacts in the dozefile
    #[arg(long, short = 'C', default_value = ".", global = true)]
    location: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring target artifacts up to date (all terminal outputs by default)
    Build {
        /// Target artifact names
        targets: Vec<String>,

        /// Mark artifacts as modified outside the build before resolving
        #[arg(long)]
        touch: Vec<String>,
    },

    /// Print the ordered execution plan without executing anything
    Plan {
        /// Target artifact names
        targets: Vec<String>,
    },

    /// List registered procedures
    Procedures {
        /// Only list procedures under this namespace prefix
        #[arg(long, default_value = "")]
        scope: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let registry = ProcedureRegistry::new();
    if let Err(err) = register_builtins(&registry) {
        // A registration failure is a programming error in a plugin; there
        // is nothing sensible to recover to.
        eprintln!("doze: fatal: {err}");
        process::exit(2);
    }

    let code = match cli.command {
        Commands::Build { targets, touch } => {
            run_build(&cli.file, &cli.location, &registry, &targets, &touch)
        }
        Commands::Plan { targets } => run_plan(&cli.file, &cli.location, &targets),
        Commands::Procedures { scope } => run_procedures(&registry, &scope),
    };
    process::exit(code);
}

fn load_graph(file: &PathBuf, location: &str) -> Result<Graph, i32> {
    let dozefile = match Dozefile::from_file(file) {
        Ok(dozefile) => dozefile,
        Err(err) => {
            eprintln!("doze: {err}");
            return Err(1);
        }
    };
    dozefile.build_graph(location).map_err(|err| {
        eprintln!("doze: {err}");
        1
    })
}

fn parse_targets(names: &[String], location: &str) -> Option<Vec<ArtifactTag>> {
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .iter()
            .map(|name| ArtifactTag::new(name.clone(), location))
            .collect(),
    )
}

fn run_build(
    file: &PathBuf,
    location: &str,
    registry: &ProcedureRegistry,
    targets: &[String],
    touch: &[String],
) -> i32 {
    let mut graph = match load_graph(file, location) {
        Ok(graph) => graph,
        Err(code) => return code,
    };

    let targets = parse_targets(targets, location);
    let touched: Vec<ArtifactTag> = touch
        .iter()
        .map(|name| ArtifactTag::new(name.clone(), location))
        .collect();

    match build(&mut graph, registry, targets.as_deref(), &touched) {
        Ok(report) if report.nothing_to_do() => {
            println!("doze: Nothing to do.");
            0
        }
        Ok(report) => {
            println!(
                "doze: {} rule(s) executed in {} pass(es).",
                report.executed, report.passes
            );
            0
        }
        Err(err) => {
            eprintln!("doze: {err}");
            build_exit_code(&err)
        }
    }
}

fn run_plan(file: &PathBuf, location: &str, targets: &[String]) -> i32 {
    let mut graph = match load_graph(file, location) {
        Ok(graph) => graph,
        Err(code) => return code,
    };
    graph.refresh_existing();

    let targets = parse_targets(targets, location);
    let plan = match doze::resolve::plan_for(&mut graph, targets.as_deref()) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("doze: {err}");
            return 3;
        }
    };

    if plan.is_empty() {
        println!("doze: Nothing to plan.");
        return 0;
    }
    for hash in &plan {
        print_rule(&graph, hash);
    }
    0
}

fn run_procedures(registry: &ProcedureRegistry, scope: &str) -> i32 {
    let ids = registry.list(scope);
    if ids.is_empty() {
        println!("doze: No procedures registered under '{scope}'.");
        return 0;
    }
    for id in ids {
        println!("{id}");
    }
    0
}

fn print_rule(graph: &Graph, hash: &RuleHash) {
    let Some(rule) = graph.rule(hash) else {
        return;
    };
    let inputs: Vec<String> = rule.inputs().iter().map(|t| t.to_string()).collect();
    let outputs: Vec<String> = rule.outputs().iter().map(|t| t.to_string()).collect();
    println!(
        "{}  {} <- {}  [{}]",
        rule.procedure(),
        outputs.join(", "),
        inputs.join(", "),
        &hash.as_str()[..12]
    );
}

fn build_exit_code(err: &BuildError) -> i32 {
    match err {
        BuildError::Graph(_) => 1,
        BuildError::Resolve(_) => 3,
        BuildError::Execute(ExecuteError::Registry(_)) => 4,
        BuildError::Execute(_) => 5,
    }
}
