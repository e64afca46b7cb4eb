//! # Minimizer
//!
//! Removes everything a module does not need in order to implement a
//! component interface: external definitions outside the interface are
//! demoted to internal linkage, then dead-code elimination and constant
//! merging run to fixpoint.
//!
//! Aliases are never internalized here; system C libraries export through
//! aliases in ways an interface file does not capture.

pub mod gdce;

use tracing::{debug, info, warn};

use crate::interface::ComponentInterface;
use crate::ir::{Linkage, Module};

pub use gdce::{global_dce, merge_constants};

/// Upper bound on the DCE/constant-merge fixpoint loop. The normal
/// fixpoint is a few tens of iterations; the cap only guards pathological
/// inputs.
pub const FIXPOINT_CAP: u32 = 10_000;

/// Map an externally-visible linkage to its internalized counterpart.
fn demote(linkage: Linkage) -> Linkage {
    match linkage {
        Linkage::External => Linkage::Internal,
        Linkage::ExternalWeak => Linkage::WeakOdr,
        Linkage::Appending => Linkage::Appending,
        other => {
            warn!("not demoting unrecognized linkage {other:?}");
            other
        }
    }
}

/// Reduce `module` to what the interface needs. Returns true if the module
/// changed.
pub fn minimize_module(module: &mut Module, interface: &ComponentInterface) -> bool {
    let mut modified = false;

    for func in &mut module.functions {
        if !func.is_declaration()
            && func.linkage == Linkage::External
            && !interface.is_called(&func.name)
            && !interface.is_referenced(&func.name)
        {
            debug!("hiding `{}`", func.name);
            func.linkage = Linkage::Internal;
            modified = true;
        }
    }

    for global in &mut module.globals {
        if global.linkage.is_externally_visible()
            && global.has_initializer()
            && !interface.is_referenced(&global.name)
        {
            let demoted = demote(global.linkage);
            if demoted != global.linkage {
                debug!("internalizing `{}`", global.name);
                global.linkage = demoted;
                modified = true;
            }
        }
    }

    // Aliases keep their linkage: see module docs.

    let mut more = true;
    let mut iters = 0u32;
    while more && iters < FIXPOINT_CAP {
        more = false;
        if global_dce(module) {
            more = true;
        }
        if merge_constants(module) {
            more = true;
        }
        modified = modified || more;
        iters += 1;
    }
    if more {
        warn!("fixpoint cap reached after {iters} iterations; residual dead code may remain");
    }

    if modified {
        info!("minimized `{}`", module.name);
    }
    modified
}
