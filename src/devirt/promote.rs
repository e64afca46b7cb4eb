//! # Call-Site Rewriting
//!
//! Turns a resolved indirect call into a dispatch over its finite
//! candidate set. Two forms:
//!
//! - **Direct promotion** inlines an equality-test chain at the call site.
//! - **Bounce functions** emit one internal dispatch function per distinct
//!   signature and candidate tuple, and redirect the call there. Bounces
//!   are cached and reused.
//!
//! In both forms the default arm is either an unreachable trap (sound only
//! when the candidate set is complete) or the original indirect call
//! (sound with incomplete resolution); the choice is the caller's
//! `allow_indirect` flag, never implicit.

use std::collections::HashMap;

use tracing::debug;

use crate::ir::{
    BinOp, BlockId, CallConv, CallTerm, Callee, Constant, FnSig, FunctionBuilder, Linkage,
    Module, Operand, Rvalue, Statement, StatementKind, Terminator, TerminatorKind, Ty,
};

use super::resolver::CallSiteId;

/// Replace the indirect call at `site` with an inline equality-test chain
/// over `targets`. Returns false if the site no longer holds an indirect
/// call.
pub fn promote_indirect_call(
    module: &mut Module,
    site: &CallSiteId,
    targets: &[String],
    allow_indirect: bool,
) -> bool {
    let Some(func_idx) = module.functions.iter().position(|f| f.name == site.function) else {
        return false;
    };

    let (call, debug_loc) = {
        let Some(body) = &module.functions[func_idx].body else { return false };
        match body.block(site.block).and_then(|bb| bb.terminator.as_ref()) {
            Some(Terminator { kind: TerminatorKind::Call(call), debug_loc }) => {
                (call.clone(), *debug_loc)
            }
            _ => return false,
        }
    };
    let Callee::Value(callee_ptr) = call.callee.clone() else {
        return false;
    };

    // Direct calls keep each candidate's own calling convention.
    let convs: Vec<CallConv> = targets
        .iter()
        .map(|g| module.function(g).map(|f| f.conv).unwrap_or(call.conv))
        .collect();

    let body = module.functions[func_idx].body.as_mut().unwrap();

    let default_bb = body.new_block();
    let default_term = if allow_indirect {
        TerminatorKind::Call(call.clone())
    } else {
        TerminatorKind::Unreachable
    };
    body.set_terminator(default_bb, Terminator { kind: default_term, debug_loc });

    // Build the chain back to front so candidates are tested in order.
    let mut next = default_bb;
    for (g, conv) in targets.iter().zip(&convs).rev() {
        let call_bb = body.new_block();
        body.set_terminator(
            call_bb,
            Terminator {
                kind: TerminatorKind::Call(CallTerm {
                    callee: Callee::Value(Operand::constant(Constant::global(g.clone()))),
                    sig: call.sig.clone(),
                    args: call.args.clone(),
                    dest: call.dest,
                    target: call.target,
                    unwind: call.unwind,
                    conv: *conv,
                }),
                debug_loc,
            },
        );

        let test_bb = body.new_block();
        let cmp = body.new_local(Ty::bool(), None);
        body.push_statement(
            test_bb,
            Statement::new(StatementKind::Assign {
                dest: cmp,
                rvalue: Rvalue::Binary {
                    op: BinOp::Eq,
                    lhs: callee_ptr.clone(),
                    rhs: Operand::constant(Constant::global(g.clone())),
                },
            }),
        );
        body.set_terminator(
            test_bb,
            Terminator {
                kind: TerminatorKind::Branch {
                    cond: Operand::Local(cmp),
                    then_blk: call_bb,
                    else_blk: next,
                },
                debug_loc,
            },
        );
        next = test_bb;
    }

    body.set_terminator(
        site.block,
        Terminator { kind: TerminatorKind::Jump { target: next }, debug_loc },
    );
    true
}

/// Bounce functions already emitted, keyed by call-site signature and
/// candidate tuple.
#[derive(Debug, Default)]
pub struct BounceCache {
    map: HashMap<(FnSig, Vec<String>), String>,
}

/// The signature a bounce function has for a given call-site signature:
/// the callee pointer is prepended to the parameter list.
pub fn bounce_signature(sig: &FnSig) -> FnSig {
    let mut params = Vec::with_capacity(sig.params.len() + 1);
    params.push(Ty::Fn(sig.clone()));
    params.extend(sig.params.iter().cloned());
    FnSig::new(params, (*sig.ret).clone())
}

/// Get or emit the bounce function dispatching `sig`-shaped calls over
/// `targets`.
pub fn get_or_create_bounce(
    module: &mut Module,
    cache: &mut BounceCache,
    sig: &FnSig,
    targets: &[String],
    allow_indirect: bool,
) -> String {
    let key = (sig.clone(), targets.to_vec());
    if let Some(name) = cache.map.get(&key) {
        if module.function(name).is_some() {
            debug!("reusing bounce function `{name}`");
            return name.clone();
        }
    }

    let convs: Vec<CallConv> = targets
        .iter()
        .map(|g| module.function(g).map(|f| f.conv).unwrap_or_default())
        .collect();

    let mut serial = 0usize;
    let name = loop {
        let candidate = format!("previrt.bounce.{serial}");
        if !module.contains_symbol(&candidate) {
            break candidate;
        }
        serial += 1;
    };

    let is_void = sig.ret.is_void();
    let mut builder = FunctionBuilder::new(name.clone(), (*sig.ret).clone());
    builder.set_linkage(Linkage::Internal);
    let fnptr = builder.add_param(Ty::Fn(sig.clone()), Some("callee"));
    let mut forwarded = Vec::new();
    for ty in &sig.params {
        forwarded.push(Operand::Local(builder.add_param(ty.clone(), Some("arg"))));
    }

    let default_bb = builder.new_block();

    let mut next = default_bb;
    for (g, conv) in targets.iter().zip(&convs).rev() {
        let call_bb = builder.new_block();
        let ret_bb = builder.new_block();
        let result = (!is_void).then(|| builder.new_local((*sig.ret).clone()));

        builder.switch_to(call_bb);
        builder.terminate(TerminatorKind::Call(CallTerm {
            callee: Callee::Value(Operand::constant(Constant::global(g.clone()))),
            sig: sig.clone(),
            args: forwarded.clone(),
            dest: result,
            target: Some(ret_bb),
            unwind: None,
            conv: *conv,
        }));
        builder.switch_to(ret_bb);
        builder.ret(result.map(Operand::Local));

        let test_bb = builder.new_block();
        builder.switch_to(test_bb);
        let cmp = builder.new_local(Ty::bool());
        builder.assign(
            cmp,
            Rvalue::Binary {
                op: BinOp::Eq,
                lhs: Operand::Local(fnptr),
                rhs: Operand::constant(Constant::global(g.clone())),
            },
        );
        builder.branch(Operand::Local(cmp), call_bb, next);
        next = test_bb;
    }

    builder.switch_to(default_bb);
    if allow_indirect {
        let ret_bb = builder.new_block();
        let result = (!is_void).then(|| builder.new_local((*sig.ret).clone()));
        builder.call(Operand::Local(fnptr), sig.clone(), forwarded, result, Some(ret_bb));
        builder.switch_to(ret_bb);
        builder.ret(result.map(Operand::Local));
    } else {
        builder.unreachable();
    }

    builder.switch_to(BlockId::ENTRY);
    builder.jump(next);

    module.add_function(builder.finish());
    cache.map.insert(key, name.clone());
    name
}

/// Redirect the indirect call at `site` to `bounce`, passing the original
/// callee pointer as the new first argument.
pub fn rewrite_to_bounce(module: &mut Module, site: &CallSiteId, bounce: &str) -> bool {
    let Some(func) = module.function_mut(&site.function) else { return false };
    let Some(body) = func.body.as_mut() else { return false };
    let Some(slot) = body.block_mut(site.block).and_then(|bb| bb.terminator.as_mut()) else {
        return false;
    };
    let Terminator { kind: TerminatorKind::Call(call), .. } = slot else {
        return false;
    };
    let Callee::Value(callee_ptr) = call.callee.clone() else {
        return false;
    };

    let mut args = Vec::with_capacity(call.args.len() + 1);
    args.push(callee_ptr);
    args.extend(call.args.iter().cloned());

    call.sig = bounce_signature(&call.sig);
    call.callee = Callee::Value(Operand::constant(Constant::global(bounce)));
    call.args = args;
    call.conv = CallConv::C;
    true
}
