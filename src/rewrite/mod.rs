//! # Rewriter
//!
//! Applies a transform to a client module, replacing matching call sites
//! with calls to the specialized clones the transform names.
//!
//! Two strategies exist because upstream passes may or may not keep use
//! information current:
//!
//! - [`RewriteStrategy::UseDriven`] visits only call sites whose callee
//!   position names a rewritten function. Uses of a function as data (a
//!   pointer stored or passed along) are skipped; redirecting those would
//!   need pointer reasoning the rewriter does not perform.
//! - [`RewriteStrategy::Scan`] walks every instruction and considers each
//!   call or invoke whose callee is a declaration (the inter-module case),
//!   ignoring inline assembly.
//!
//! Both produce the same result on well-formed modules.

use tracing::debug;

use crate::interface::{CallRewrite, ComponentInterfaceTransform};
use crate::ir::{BlockId, CallTerm, FnSig, Function, Module, Terminator, TerminatorKind};
use crate::specialize::retarget_call_site;

/// Which walk the rewriter performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteStrategy {
    #[default]
    UseDriven,
    Scan,
}

/// Apply `transform` to `module` with the chosen strategy. Returns true if
/// any call site was redirected.
pub fn rewrite_module(
    module: &mut Module,
    transform: &ComponentInterfaceTransform,
    strategy: RewriteStrategy,
) -> bool {
    match strategy {
        RewriteStrategy::UseDriven => rewrite_with_uses(module, transform),
        RewriteStrategy::Scan => rewrite_by_scan(module, transform),
    }
}

/// Make sure the rewrite target exists in the module, declaring it with the
/// reduced signature when absent.
fn ensure_target(module: &mut Module, site_sig: &FnSig, rewrite: &CallRewrite) {
    if module.function(&rewrite.target).is_some() {
        return;
    }
    let params = rewrite
        .arg_perm
        .iter()
        .map(|&i| site_sig.params[i].clone())
        .collect();
    let mut sig = FnSig::new(params, (*site_sig.ret).clone());
    sig.variadic = site_sig.variadic;
    module.add_function(Function::new_decl(rewrite.target.clone(), sig));
}

fn describe_bound_args(call: &CallTerm, rewrite: &CallRewrite) -> String {
    let mut parts = Vec::new();
    for (i, arg) in call.args.iter().enumerate() {
        if !rewrite.arg_perm.contains(&i) {
            parts.push(format!("{i}=({arg:?})"));
        }
    }
    parts.join(",")
}

/// Replace the call terminator at `(function index, block)` according to
/// the rule, keeping the original debug location.
fn apply_rewrite(
    module: &mut Module,
    func_idx: usize,
    block: BlockId,
    call: &CallTerm,
    rewrite: &CallRewrite,
) {
    ensure_target(module, &call.sig, rewrite);
    let new_call = retarget_call_site(call, &rewrite.target, &rewrite.arg_perm);
    let body = module.functions[func_idx]
        .body
        .as_mut()
        .expect("rewritten call site in a declaration");
    let slot = body
        .block_mut(block)
        .and_then(|bb| bb.terminator.as_mut())
        .expect("call site vanished during rewrite");
    let debug_loc = slot.debug_loc;
    *slot = Terminator { kind: TerminatorKind::Call(new_call), debug_loc };
}

/// Use-driven rewrite: visit the callee-position uses of each rewritten
/// function.
fn rewrite_with_uses(module: &mut Module, transform: &ComponentInterfaceTransform) -> bool {
    let mut modified = false;
    let names: Vec<String> = transform.rewritten_functions().cloned().collect();
    for name in names {
        if module.function(&name).is_none() {
            continue;
        }
        // Callee-position uses only; a function mentioned in an argument
        // or stored to memory is not a call site.
        let mut sites: Vec<(usize, BlockId)> = Vec::new();
        for (func_idx, func) in module.functions.iter().enumerate() {
            let Some(body) = &func.body else { continue };
            for (block, bb) in body.iter_blocks() {
                if let Some(Terminator { kind: TerminatorKind::Call(call), .. }) = &bb.terminator {
                    if call.callee_global() == Some(name.as_str()) {
                        sites.push((func_idx, block));
                    }
                }
            }
        }

        for (func_idx, block) in sites {
            let call = {
                let body = module.functions[func_idx].body.as_ref().unwrap();
                match &body.block(block).unwrap().terminator {
                    Some(Terminator { kind: TerminatorKind::Call(call), .. }) => call.clone(),
                    _ => continue,
                }
            };
            let Some(rewrite) = transform.lookup_rewrite(&name, &call.args) else {
                continue;
            };
            let rewrite = rewrite.clone();
            debug!(
                "specializing call to `{name}` in `{}` on [{}]",
                module.functions[func_idx].name,
                describe_bound_args(&call, &rewrite),
            );
            apply_rewrite(module, func_idx, block, &call, &rewrite);
            modified = true;
        }
    }
    modified
}

/// Scan-driven rewrite: walk every block of every function.
fn rewrite_by_scan(module: &mut Module, transform: &ComponentInterfaceTransform) -> bool {
    let mut modified = false;
    for func_idx in 0..module.functions.len() {
        let Some(body) = &module.functions[func_idx].body else { continue };
        let blocks: Vec<BlockId> = body.block_ids().collect();
        for block in blocks {
            let call = {
                let body = module.functions[func_idx].body.as_ref().unwrap();
                match &body.block(block).unwrap().terminator {
                    // inline assembly callees have no symbol and are skipped
                    // by callee_global
                    Some(Terminator { kind: TerminatorKind::Call(call), .. }) => call.clone(),
                    _ => continue,
                }
            };
            let Some(target_name) = call.callee_global().map(str::to_string) else {
                continue;
            };
            // The interesting case: the client calls into the specialized
            // module through a declaration.
            match module.function(&target_name) {
                Some(f) if f.is_declaration() => {}
                _ => continue,
            }
            let Some(rewrite) = transform.lookup_rewrite(&target_name, &call.args) else {
                continue;
            };
            let rewrite = rewrite.clone();
            apply_rewrite(module, func_idx, block, &call, &rewrite);
            modified = true;
        }
    }
    modified
}
