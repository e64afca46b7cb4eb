//! Previrt CLI
//!
//! Drives the partial-evaluation passes over JSON module files.
//!
//! # Usage
//!
//! ```text
//! previrt [OPTIONS] <COMMAND>
//!
//! Commands:
//!   minimize    Internalize and strip everything outside an interface
//!   specialize  Emit specialized clones and a rewrite manifest
//!   rewrite     Apply a rewrite manifest to a client module
//!   devirt      Resolve indirect calls into bounded dispatches
//!   prune       Remove blocks an invariant analysis proves unreachable
//!
//! Options:
//!   -v, --verbose  Enable debug-level logging
//! ```
//!
//! Every command reads one module, writes the transformed module to the
//! `-o` path, and prints `modified` or `unchanged`. Malformed manifest or
//! summary files make the affected pass inert with a warning; only missing
//! or unreadable modules are fatal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use previrt::callgraph::CallGraph;
use previrt::devirt::{
    CallSiteResolver, ChaResolver, DevirtOptions, Devirtualizer, FileSummaryAnalysis,
    PointsToResolver, TypeResolver,
};
use previrt::interface::{self, ComponentInterface, ComponentInterfaceTransform};
use previrt::invariants::{self, FileInvariantAnalysis, InvariantPruneOptions};
use previrt::ir::Module;
use previrt::rewrite::{rewrite_module, RewriteStrategy};
use previrt::specialize::{specialize_module, AggressivePolicy, RecursiveGuard};

/// Whole-program partial evaluation over module files.
#[derive(Parser)]
#[command(name = "previrt")]
#[command(version)]
#[command(about = "Interface-driven partial evaluation over module files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Internalize and strip everything outside an interface
    ///
    /// Functions and initialized globals not named by the merged
    /// interfaces are demoted to internal linkage, then dead code and
    /// duplicate constants are removed to fixpoint.
    Minimize(MinimizeArgs),

    /// Emit specialized clones and a rewrite manifest
    ///
    /// For each observed call the policy approves, a partially-applied
    /// clone is added to the module and a rewrite rule is recorded.
    /// Recursive functions are never specialized.
    Specialize(SpecializeArgs),

    /// Apply a rewrite manifest to a client module
    ///
    /// Calls matching a recorded witness are redirected to the
    /// specialized clones, dropping the baked-in arguments.
    Rewrite(RewriteArgs),

    /// Resolve indirect calls into bounded dispatches
    ///
    /// Candidates come from type-based resolution by default, or from
    /// points-to / class-hierarchy analysis summaries.
    Devirt(DevirtArgs),

    /// Remove blocks an invariant analysis proves unreachable
    Prune(PruneArgs),
}

#[derive(Args)]
struct ModuleIo {
    /// Module file to process
    #[arg(value_name = "MODULE")]
    module: PathBuf,

    /// Where to write the transformed module
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Args)]
struct MinimizeArgs {
    #[command(flatten)]
    io: ModuleIo,

    /// Interface file to prune with respect to (repeatable; all inputs
    /// are merged)
    #[arg(long = "interface-input", value_name = "PATH")]
    interface_input: Vec<PathBuf>,
}

#[derive(Args)]
struct SpecializeArgs {
    #[command(flatten)]
    io: ModuleIo,

    /// Interface file to specialize with respect to (repeatable)
    #[arg(long = "interface-input", value_name = "PATH")]
    interface_input: Vec<PathBuf>,

    /// Where to write the rewrite manifest
    #[arg(long = "specialize-output", value_name = "PATH")]
    specialize_output: Option<PathBuf>,
}

#[derive(Args)]
struct RewriteArgs {
    #[command(flatten)]
    io: ModuleIo,

    /// Rewrite manifest to apply (repeatable)
    #[arg(long = "rewrite-input", value_name = "PATH")]
    rewrite_input: Vec<PathBuf>,

    /// Walk every instruction instead of following uses
    #[arg(long)]
    scan: bool,
}

#[derive(Args)]
struct DevirtArgs {
    #[command(flatten)]
    io: ModuleIo,

    /// Resolve with a points-to analysis summary instead of type-only
    #[arg(long = "with-points-to", value_name = "SUMMARY")]
    with_points_to: Option<PathBuf>,

    /// Try a class-hierarchy analysis summary first
    #[arg(long = "with-cha", value_name = "SUMMARY")]
    with_cha: Option<PathBuf>,

    /// Permit resolution when the analysis is not closed-world (may be
    /// unsound)
    #[arg(long)]
    resolve_incomplete: bool,

    /// Keep the original indirect call as the dispatch's default arm
    /// (required for soundness with incomplete resolution)
    #[arg(long)]
    allow_indirect: bool,

    /// Abandon a site if its candidate count exceeds this
    #[arg(long, value_name = "N", default_value_t = 9999)]
    max_targets: usize,

    /// Dispatch through cached bounce functions instead of inline chains
    #[arg(long)]
    bounce: bool,
}

#[derive(Args)]
struct PruneArgs {
    #[command(flatten)]
    io: ModuleIo,

    /// Exported results of the invariant analysis
    #[arg(long, value_name = "SUMMARY")]
    invariants: PathBuf,

    /// Only analyze modules that contain an entry point
    #[arg(long)]
    only_main: bool,

    /// Report what the analysis inferred
    #[arg(long)]
    print_invariants: bool,
}

fn load_module(path: &Path) -> Result<Module> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read module `{}`", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse module `{}`", path.display()))
}

fn store_module(path: &Path, module: &Module) -> Result<()> {
    let json = serde_json::to_string_pretty(module)?;
    fs::write(path, json)
        .with_context(|| format!("failed to write module `{}`", path.display()))
}

/// Merge every loadable interface file; unreadable ones are warned about
/// and skipped.
fn merged_interface(paths: &[PathBuf]) -> ComponentInterface {
    let mut merged = ComponentInterface::new();
    for path in paths {
        match interface::load_interface(path) {
            Ok(iface) => merged.merge(iface),
            Err(err) => warn!("ignoring interface `{}`: {err}", path.display()),
        }
    }
    merged
}

fn run_minimize(args: &MinimizeArgs) -> Result<bool> {
    let mut module = load_module(&args.io.module)?;
    let iface = merged_interface(&args.interface_input);
    let modified = previrt::minimize_module(&mut module, &iface);
    store_module(&args.io.output, &module)?;
    Ok(modified)
}

fn run_specialize(args: &SpecializeArgs) -> Result<bool> {
    let mut module = load_module(&args.io.module)?;
    let iface = merged_interface(&args.interface_input);
    let mut transform = ComponentInterfaceTransform::new(iface);

    let policy = RecursiveGuard::new(AggressivePolicy, CallGraph::build(&module));
    let modified = specialize_module(&mut module, &mut transform, &policy);

    if let Some(path) = &args.specialize_output {
        interface::store_transform(path, &transform)
            .with_context(|| format!("failed to write transform `{}`", path.display()))?;
    }
    store_module(&args.io.output, &module)?;
    Ok(modified)
}

fn run_rewrite(args: &RewriteArgs) -> Result<bool> {
    let mut module = load_module(&args.io.module)?;
    let strategy = if args.scan { RewriteStrategy::Scan } else { RewriteStrategy::UseDriven };

    let mut modified = false;
    for path in &args.rewrite_input {
        match interface::load_transform(path) {
            Ok(transform) => {
                modified |= rewrite_module(&mut module, &transform, strategy);
            }
            Err(err) => warn!("ignoring transform `{}`: {err}", path.display()),
        }
    }
    store_module(&args.io.output, &module)?;
    Ok(modified)
}

fn run_devirt(args: &DevirtArgs) -> Result<bool> {
    let mut module = load_module(&args.io.module)?;

    let cha_summary;
    let mut resolvers: Vec<Box<dyn CallSiteResolver + '_>> = Vec::new();

    if let Some(path) = &args.with_cha {
        match FileSummaryAnalysis::load(path) {
            Ok(summary) => {
                cha_summary = summary;
                resolvers.push(Box::new(ChaResolver::new(&cha_summary)));
            }
            Err(err) => warn!("ignoring CHA summary `{}`: {err}", path.display()),
        }
    }

    let mut points_to_loaded = false;
    if let Some(path) = &args.with_points_to {
        match FileSummaryAnalysis::load(path) {
            Ok(summary) => {
                resolvers.push(Box::new(PointsToResolver::new(
                    &module,
                    &summary,
                    args.resolve_incomplete,
                )));
                points_to_loaded = true;
            }
            Err(err) => warn!("ignoring points-to summary `{}`: {err}", path.display()),
        }
    }
    if !points_to_loaded {
        resolvers.push(Box::new(TypeResolver::new(&module)));
    }

    let mut devirt = Devirtualizer::new(DevirtOptions {
        allow_indirect: args.allow_indirect,
        max_targets: args.max_targets,
        use_bounce: args.bounce,
    });
    let modified = devirt.resolve_call_sites(&mut module, &mut resolvers);

    store_module(&args.io.output, &module)?;
    Ok(modified)
}

fn run_prune(args: &PruneArgs) -> Result<bool> {
    let mut module = load_module(&args.io.module)?;
    let opts = InvariantPruneOptions {
        only_main: args.only_main,
        print_invariants: args.print_invariants,
    };

    let modified = match FileInvariantAnalysis::load(&args.invariants) {
        Ok(analysis) => invariants::prune_with_invariants(&mut module, &analysis, &opts),
        Err(err) => {
            warn!("ignoring invariants `{}`: {err}", args.invariants.display());
            false
        }
    };

    store_module(&args.io.output, &module)?;
    Ok(modified)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let modified = match &cli.command {
        Commands::Minimize(args) => run_minimize(args)?,
        Commands::Specialize(args) => run_specialize(args)?,
        Commands::Rewrite(args) => run_rewrite(args)?,
        Commands::Devirt(args) => run_devirt(args)?,
        Commands::Prune(args) => run_prune(args)?,
    };

    println!("{}", if modified { "modified" } else { "unchanged" });
    Ok(())
}
