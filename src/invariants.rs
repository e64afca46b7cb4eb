//! # Invariant-Based Block Pruning
//!
//! A thin hook around an external abstract interpreter: the analysis
//! reports blocks it has proven unreachable, this pass stubs them out with
//! `unreachable` and then removes anything the CFG no longer reaches.
//!
//! The analysis itself is a capability; [`FileInvariantAnalysis`] loads
//! one's exported results from a summary file so the CLI can drive the
//! pass.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::interface::ManifestError;
use crate::ir::{BlockId, Module, Terminator, TerminatorKind};

/// External numeric-invariant analysis capability.
pub trait InvariantAnalysis {
    /// Blocks of `function` proven unreachable under the inferred
    /// invariants.
    fn dead_blocks(&self, module: &Module, function: &str) -> Vec<BlockId>;
}

/// Options for the prune pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantPruneOptions {
    /// Only analyze modules that contain the program entry point.
    pub only_main: bool,
    /// Report the per-function results of the analysis.
    pub print_invariants: bool,
}

/// Stub out analysis-proven dead blocks and clean up the CFG. Returns true
/// if the module changed.
pub fn prune_with_invariants(
    module: &mut Module,
    analysis: &dyn InvariantAnalysis,
    opts: &InvariantPruneOptions,
) -> bool {
    if module.functions.is_empty() {
        return false;
    }
    if opts.only_main && !module.has_entry_point() {
        return false;
    }

    let mut modified = false;
    let names: Vec<String> = module
        .functions
        .iter()
        .filter(|f| f.body.is_some())
        .map(|f| f.name.clone())
        .collect();

    for name in names {
        let dead = analysis.dead_blocks(module, &name);
        if opts.print_invariants && !dead.is_empty() {
            info!("`{name}`: blocks {dead:?} proven unreachable");
        }
        let body = module
            .function_mut(&name)
            .and_then(|f| f.body.as_mut())
            .expect("definition disappeared during pruning");
        for block in dead {
            // the entry block cannot be pruned away
            if block == BlockId::ENTRY {
                continue;
            }
            let Some(bb) = body.block_mut(block) else { continue };
            bb.statements.clear();
            bb.terminator = Some(Terminator::new(TerminatorKind::Unreachable));
            modified = true;
        }
        if body.remove_unreachable_blocks() {
            modified = true;
        }
    }
    modified
}

// ============================================================================
// File-backed analysis
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionInvariants {
    function: String,
    dead_blocks: Vec<BlockId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InvariantsDoc {
    version: u32,
    functions: Vec<FunctionInvariants>,
}

/// Invariant-analysis results loaded from a summary file.
#[derive(Debug, Default)]
pub struct FileInvariantAnalysis {
    dead: HashMap<String, Vec<BlockId>>,
}

impl FileInvariantAnalysis {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        let doc: InvariantsDoc = serde_json::from_str(&text)?;
        if doc.version != crate::interface::MANIFEST_VERSION {
            return Err(ManifestError::VersionMismatch {
                found: doc.version,
                expected: crate::interface::MANIFEST_VERSION,
            });
        }
        let dead = doc
            .functions
            .into_iter()
            .map(|entry| (entry.function, entry.dead_blocks))
            .collect();
        Ok(Self { dead })
    }
}

impl InvariantAnalysis for FileInvariantAnalysis {
    fn dead_blocks(&self, _module: &Module, function: &str) -> Vec<BlockId> {
        self.dead.get(function).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, FunctionBuilder, Operand, Ty};

    struct FixedAnalysis(Vec<BlockId>);

    impl InvariantAnalysis for FixedAnalysis {
        fn dead_blocks(&self, _module: &Module, function: &str) -> Vec<BlockId> {
            if function == "main" {
                self.0.clone()
            } else {
                vec![]
            }
        }
    }

    fn module_with_branch() -> Module {
        let mut module = Module::new("m");
        let mut builder = FunctionBuilder::new("main", Ty::Int(32));
        let then_blk = builder.new_block();
        let else_blk = builder.new_block();
        builder.branch(
            Operand::constant(Constant::int(1, 1)),
            then_blk,
            else_blk,
        );
        builder.switch_to(then_blk);
        builder.ret(Some(Operand::constant(Constant::int(32, 0))));
        builder.switch_to(else_blk);
        builder.ret(Some(Operand::constant(Constant::int(32, 1))));
        module.add_function(builder.finish());
        module
    }

    #[test]
    fn test_prune_stubs_dead_blocks() {
        let mut module = module_with_branch();
        let analysis = FixedAnalysis(vec![BlockId::new(2)]);
        assert!(prune_with_invariants(
            &mut module,
            &analysis,
            &InvariantPruneOptions::default()
        ));

        let body = module.function("main").unwrap().body.as_ref().unwrap();
        let else_bb = body.block(BlockId::new(2)).unwrap();
        assert!(else_bb.statements.is_empty());
        assert!(matches!(
            else_bb.terminator,
            Some(Terminator { kind: TerminatorKind::Unreachable, .. })
        ));
    }

    #[test]
    fn test_prune_never_touches_entry() {
        let mut module = module_with_branch();
        let analysis = FixedAnalysis(vec![BlockId::ENTRY]);
        assert!(!prune_with_invariants(
            &mut module,
            &analysis,
            &InvariantPruneOptions::default()
        ));
    }

    #[test]
    fn test_only_main_skips_libraries() {
        let mut module = Module::new("m");
        let mut builder = FunctionBuilder::new("helper", Ty::Void);
        let dead = builder.new_block();
        builder.ret(None);
        builder.switch_to(dead);
        builder.unreachable();
        module.add_function(builder.finish());

        let analysis = FixedAnalysis(vec![]);
        let opts = InvariantPruneOptions { only_main: true, ..Default::default() };
        assert!(!prune_with_invariants(&mut module, &analysis, &opts));

        // without the gate, the unreferenced block is cleaned up
        let opts = InvariantPruneOptions::default();
        assert!(prune_with_invariants(&mut module, &analysis, &opts));
        let body = module.function("helper").unwrap().body.as_ref().unwrap();
        assert_eq!(body.blocks.len(), 1);
    }
}
