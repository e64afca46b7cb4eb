//! # Specialization Driver
//!
//! Walks a transform's interface and, for each observed call the policy
//! approves, emits a partially-applied clone into the module and records
//! the matching rewrite rule in the transform.
//!
//! Per-witness failures (stale arity, un-materializable constants) skip
//! that witness and continue; nothing here aborts the pass.
//!
//! ## Module Structure
//!
//! - [`specializer`] - the pure clone/retarget primitives
//! - [`policy`] - slot-selection policies

pub mod policy;
pub mod specializer;

use tracing::{debug, info, warn};

use crate::interface::ComponentInterfaceTransform;
use crate::ir::{Constant, Module};

pub use policy::{AggressivePolicy, RecursiveGuard, SpecializationPolicy};
pub use specializer::{retarget_call_site, specialize_function, SpecializeError};

/// Pick a clone name that is fresh in the module: `<base>.spec.<n>` with
/// the smallest unused serial.
fn fresh_clone_name(module: &Module, base: &str) -> String {
    let mut serial = 0usize;
    loop {
        let candidate = format!("{base}.spec.{serial}");
        if !module.contains_symbol(&candidate) {
            return candidate;
        }
        serial += 1;
    }
}

/// Specialize `module` against the transform's interface.
///
/// Each successful specialization inserts one externally-linked clone into
/// the module and appends one rewrite rule to the transform. Returns true
/// if any clone was emitted.
pub fn specialize_module(
    module: &mut Module,
    transform: &mut ComponentInterfaceTransform,
    policy: &dyn SpecializationPolicy,
) -> bool {
    let mut rewrite_count = 0usize;

    let names: Vec<String> = transform.interface.functions().cloned().collect();
    for name in names {
        // Resolve through one alias level; declarations are not ours to
        // specialize.
        let func = match module.resolve_function(&name) {
            Some(f) if !f.is_declaration() => f.clone(),
            _ => continue,
        };
        if func.is_variadic() {
            debug!("skipping variadic function `{name}`");
            continue;
        }

        for call in transform.interface.calls_for(&name).to_vec() {
            if call.arity() != func.param_count() {
                // A stale or approximate interface record.
                debug!(
                    "skipping call record for `{name}`: arity {} vs {} parameters",
                    call.arity(),
                    func.param_count()
                );
                continue;
            }

            let mask = policy.specialize_on(&func, &call.args);
            if mask.len() != call.arity() || !mask.iter().any(|&bind| bind) {
                continue;
            }

            let mut bindings: Vec<Option<Constant>> = Vec::with_capacity(call.arity());
            let mut arg_perm = Vec::new();
            let mut materialized = true;
            for (i, bind) in mask.iter().enumerate() {
                if *bind {
                    match call.args[i].materialize(module, &func.sig.params[i]) {
                        Ok(constant) => bindings.push(Some(constant)),
                        Err(err) => {
                            warn!("cannot bind argument {i} of `{name}`: {err}");
                            materialized = false;
                            break;
                        }
                    }
                } else {
                    bindings.push(None);
                    arg_perm.push(i);
                }
            }
            if !materialized {
                continue;
            }

            let clone_name = fresh_clone_name(module, &func.name);
            match specialize_function(&func, clone_name.clone(), &bindings) {
                Ok(clone) => {
                    module.add_function(clone);
                    transform.record_rewrite(&name, call, &clone_name, arg_perm);
                    rewrite_count += 1;
                }
                Err(err) => warn!("failed to specialize `{name}`: {err}"),
            }
        }
    }

    if rewrite_count > 0 {
        info!("{rewrite_count} pending rewrites");
    }
    rewrite_count > 0
}
