//! # Call-Site Resolvers
//!
//! A resolver computes, for an indirect call site, the ordered set of
//! functions the call could reach. Resolvers are tried in sequence; the
//! first non-empty answer wins. Candidate sets are sorted by name so the
//! rewritten dispatch is deterministic.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::interface::ManifestError;
use crate::ir::{
    BlockId, CallTerm, Callee, Constant, FnSig, Module, Operand, Rvalue, StatementKind,
    Terminator, TerminatorKind, Ty, ENTRY_POINT,
};

/// Name prefixes of verifier/analysis sentinels, never devirtualization
/// candidates.
pub const SENTINEL_PREFIXES: &[&str] = &["verifier.", "analysis."];

/// An ordered candidate set for one call site.
pub type AliasSet = Vec<String>;

/// Identifies a call site: calls are block terminators, so the owning
/// function plus the block pins one down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSiteId {
    pub function: String,
    pub block: BlockId,
}

/// Fetch the call terminator a site identifies, if it still exists.
pub fn call_at<'m>(module: &'m Module, site: &CallSiteId) -> Option<&'m CallTerm> {
    let body = module.function(&site.function)?.body.as_ref()?;
    match &body.block(site.block)?.terminator {
        Some(Terminator { kind: TerminatorKind::Call(call), .. }) => Some(call),
        _ => None,
    }
}

/// Check whether a call's callee is anything but a direct function
/// reference (looking through constant casts and one alias level).
pub fn is_indirect_call(module: &Module, call: &CallTerm) -> bool {
    match &call.callee {
        Callee::Asm(_) => false,
        Callee::Value(Operand::Local(_)) => true,
        Callee::Value(Operand::Constant(c)) => match c.strip_casts() {
            Constant::Global(name) => module.resolve_function(name).is_none(),
            _ => true,
        },
    }
}

/// Which analysis backs a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Types,
    PointsTo,
    ClassHierarchy,
}

/// Computes candidate callees for indirect call sites.
pub trait CallSiteResolver {
    fn kind(&self) -> ResolverKind;

    /// The ordered candidate set, or `None` when this resolver has no
    /// answer for the site.
    fn targets(&mut self, module: &Module, site: &CallSiteId) -> Option<AliasSet>;
}

// ============================================================================
// Type-based resolution
// ============================================================================

/// Resolve by function-pointer type: any function of the call site's
/// signature could be the callee.
///
/// Excluded from the alias sets: intrinsics, local functions whose address
/// is never taken (they cannot leak), the program entry point, and
/// sentinel-prefixed names.
pub struct TypeResolver {
    targets_map: HashMap<FnSig, AliasSet>,
}

impl TypeResolver {
    pub fn new(module: &Module) -> Self {
        let address_taken = module.address_taken_functions();
        let mut targets_map: HashMap<FnSig, AliasSet> = HashMap::new();

        for func in &module.functions {
            if func.is_intrinsic() {
                continue;
            }
            if !func.linkage.is_externally_visible() && !address_taken.contains(&func.name) {
                continue;
            }
            if func.name == ENTRY_POINT {
                continue;
            }
            if SENTINEL_PREFIXES.iter().any(|p| func.name.starts_with(p)) {
                continue;
            }
            targets_map
                .entry(func.sig.clone())
                .or_default()
                .push(func.name.clone());
        }
        for set in targets_map.values_mut() {
            set.sort();
        }
        Self { targets_map }
    }

    /// The signature to look up for a site, looking through one level of
    /// constant bitcast: a callee loaded from a global declared at a
    /// different function-pointer type resolves at the global's true type.
    fn site_signature(module: &Module, site: &CallSiteId, call: &CallTerm) -> FnSig {
        if let Callee::Value(Operand::Local(local)) = &call.callee {
            let body = module
                .function(&site.function)
                .and_then(|f| f.body.as_ref());
            if let Some(body) = body {
                for bb in &body.blocks {
                    for stmt in &bb.statements {
                        let StatementKind::Assign {
                            dest,
                            rvalue: Rvalue::Load(Operand::Constant(loaded)),
                        } = &stmt.kind
                        else {
                            continue;
                        };
                        if dest != local {
                            continue;
                        }
                        if let Constant::BitCast { value, .. } = loaded {
                            if let Some(global) = value.as_global().and_then(|g| module.global(g))
                            {
                                if let Ty::Fn(sig) = &global.ty {
                                    return sig.clone();
                                }
                            }
                        }
                    }
                }
            }
        }
        call.sig.clone()
    }
}

impl CallSiteResolver for TypeResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Types
    }

    fn targets(&mut self, module: &Module, site: &CallSiteId) -> Option<AliasSet> {
        let call = call_at(module, site)?;
        let sig = Self::site_signature(module, site, call);
        match self.targets_map.get(&sig) {
            Some(set) => Some(set.clone()),
            None => {
                debug!(
                    "devirt (types): no functions of type {sig} for call in `{}`",
                    site.function
                );
                None
            }
        }
    }
}

// ============================================================================
// Points-to resolution
// ============================================================================

/// External heap/callgraph analysis capability.
///
/// `is_complete` reports whether the analysis has closed-world knowledge of
/// the site; incomplete sites are skipped unless the resolver is told
/// otherwise.
pub trait PointsToAnalysis {
    fn is_complete(&self, site: &CallSiteId) -> bool;
    fn targets(&self, site: &CallSiteId) -> Vec<String>;
}

/// Resolve from a points-to analysis. The candidate map is built up front
/// over the whole module, and per-site statistics are reported then.
pub struct PointsToResolver {
    targets_map: HashMap<CallSiteId, AliasSet>,
}

impl PointsToResolver {
    pub fn new(module: &Module, analysis: &dyn PointsToAnalysis, allow_incomplete: bool) -> Self {
        let mut targets_map = HashMap::new();
        let mut indirect_calls = 0usize;
        let mut complete_calls = 0usize;
        let mut resolved_calls = 0usize;

        for site in super::collect_indirect_sites(module) {
            indirect_calls += 1;
            if !allow_incomplete && !analysis.is_complete(&site) {
                warn!(
                    "devirt (points-to): skipping call in `{}` at {}: analysis is not closed-world",
                    site.function, site.block
                );
                continue;
            }
            complete_calls += 1;
            let mut targets = analysis.targets(&site);
            if targets.is_empty() {
                warn!(
                    "devirt (points-to): no targets for call in `{}` at {}",
                    site.function, site.block
                );
                continue;
            }
            targets.sort();
            targets_map.insert(site, targets);
            resolved_calls += 1;
        }

        info!("devirt (points-to): {indirect_calls} indirect calls");
        info!("devirt (points-to): {complete_calls} complete calls");
        info!("devirt (points-to): {resolved_calls} resolved calls");

        Self { targets_map }
    }
}

impl CallSiteResolver for PointsToResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::PointsTo
    }

    fn targets(&mut self, _module: &Module, site: &CallSiteId) -> Option<AliasSet> {
        self.targets_map.get(site).cloned()
    }
}

// ============================================================================
// Class-hierarchy resolution
// ============================================================================

/// External class-hierarchy analysis capability: recognizes virtual
/// dispatch sites and reports override candidates.
pub trait ClassHierarchyAnalysis {
    /// `None` when the site is not a virtual call; `Some(candidates)`
    /// otherwise (possibly empty when the hierarchy is unknown).
    fn resolve_virtual_call(&self, module: &Module, site: &CallSiteId) -> Option<Vec<String>>;
}

/// Resolve virtual calls through a class-hierarchy analysis, caching
/// per-site answers.
pub struct ChaResolver<'a> {
    cha: &'a dyn ClassHierarchyAnalysis,
    cache: HashMap<CallSiteId, AliasSet>,
}

impl<'a> ChaResolver<'a> {
    pub fn new(cha: &'a dyn ClassHierarchyAnalysis) -> Self {
        Self { cha, cache: HashMap::new() }
    }
}

impl CallSiteResolver for ChaResolver<'_> {
    fn kind(&self) -> ResolverKind {
        ResolverKind::ClassHierarchy
    }

    fn targets(&mut self, module: &Module, site: &CallSiteId) -> Option<AliasSet> {
        if let Some(cached) = self.cache.get(site) {
            return Some(cached.clone());
        }
        match self.cha.resolve_virtual_call(module, site) {
            Some(mut targets) if !targets.is_empty() => {
                targets.sort();
                self.cache.insert(site.clone(), targets.clone());
                Some(targets)
            }
            _ => {
                debug!(
                    "devirt (cha): cannot resolve call in `{}` at {}",
                    site.function, site.block
                );
                None
            }
        }
    }
}

// ============================================================================
// File-backed analysis summaries
// ============================================================================

/// One call site's entry in an analysis summary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSummary {
    pub site: CallSiteId,
    #[serde(default)]
    pub complete: bool,
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SummaryDoc {
    version: u32,
    sites: Vec<SiteSummary>,
}

/// A points-to or class-hierarchy result set loaded from a summary file,
/// usable as either analysis capability.
#[derive(Debug, Default)]
pub struct FileSummaryAnalysis {
    sites: HashMap<CallSiteId, SiteSummary>,
}

impl FileSummaryAnalysis {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        let doc: SummaryDoc = serde_json::from_str(&text)?;
        if doc.version != crate::interface::MANIFEST_VERSION {
            return Err(ManifestError::VersionMismatch {
                found: doc.version,
                expected: crate::interface::MANIFEST_VERSION,
            });
        }
        let sites = doc
            .sites
            .into_iter()
            .map(|entry| (entry.site.clone(), entry))
            .collect();
        Ok(Self { sites })
    }

    #[cfg(test)]
    pub fn from_sites(entries: Vec<SiteSummary>) -> Self {
        Self { sites: entries.into_iter().map(|e| (e.site.clone(), e)).collect() }
    }
}

impl PointsToAnalysis for FileSummaryAnalysis {
    fn is_complete(&self, site: &CallSiteId) -> bool {
        self.sites.get(site).is_some_and(|entry| entry.complete)
    }

    fn targets(&self, site: &CallSiteId) -> Vec<String> {
        self.sites
            .get(site)
            .map(|entry| entry.targets.clone())
            .unwrap_or_default()
    }
}

impl ClassHierarchyAnalysis for FileSummaryAnalysis {
    fn resolve_virtual_call(&self, _module: &Module, site: &CallSiteId) -> Option<Vec<String>> {
        self.sites.get(site).map(|entry| entry.targets.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Global, Linkage};

    /// A module with `int f(int)`, `int g(int)`, and a caller through a
    /// function pointer parameter.
    fn fixture() -> (Module, CallSiteId) {
        let mut module = Module::new("m");
        let sig = FnSig::new(vec![Ty::Int(32)], Ty::Int(32));

        for name in ["f", "g"] {
            let mut b = FunctionBuilder::new(name, Ty::Int(32));
            b.add_param(Ty::Int(32), Some("x"));
            b.ret(Some(Operand::constant(Constant::int(32, 0))));
            module.add_function(b.finish());
        }

        let mut caller = FunctionBuilder::new("caller", Ty::Int(32));
        let p = caller.add_param(Ty::Fn(sig.clone()), Some("p"));
        let x = caller.add_param(Ty::Int(32), Some("x"));
        let r = caller.new_local(Ty::Int(32));
        let done = caller.new_block();
        caller.call(Operand::Local(p), sig, vec![Operand::Local(x)], Some(r), Some(done));
        caller.switch_to(done);
        caller.ret(Some(Operand::Local(r)));
        module.add_function(caller.finish());

        let site = CallSiteId { function: "caller".to_string(), block: BlockId::ENTRY };
        (module, site)
    }

    #[test]
    fn test_is_indirect_call() {
        let (module, site) = fixture();
        let call = call_at(&module, &site).unwrap();
        assert!(is_indirect_call(&module, call));

        let direct = CallTerm {
            callee: Callee::Value(Operand::constant(Constant::global("f"))),
            sig: FnSig::new(vec![Ty::Int(32)], Ty::Int(32)),
            args: vec![],
            dest: None,
            target: None,
            unwind: None,
            conv: Default::default(),
        };
        assert!(!is_indirect_call(&module, &direct));

        // a cast around a function constant is still a direct call
        let cast = CallTerm {
            callee: Callee::Value(Operand::constant(Constant::BitCast {
                value: Box::new(Constant::global("f")),
                ty: Ty::Ptr,
            })),
            ..direct
        };
        assert!(!is_indirect_call(&module, &cast));
    }

    #[test]
    fn test_type_resolver_finds_matching_signatures() {
        let (module, site) = fixture();
        let mut resolver = TypeResolver::new(&module);
        let targets = resolver.targets(&module, &site).unwrap();
        assert_eq!(targets, vec!["f".to_string(), "g".to_string()]);
    }

    #[test]
    fn test_type_resolver_exclusions() {
        let (mut module, site) = fixture();
        // entry point and sentinels never enter the alias sets
        let sig = FnSig::new(vec![Ty::Int(32)], Ty::Int(32));
        let mut main = FunctionBuilder::new(ENTRY_POINT, Ty::Int(32));
        main.add_param(Ty::Int(32), None);
        main.ret(Some(Operand::constant(Constant::int(32, 0))));
        module.add_function(main.finish());
        module.add_function(crate::ir::Function::new_decl("verifier.assume", sig.clone()));
        module.add_function(crate::ir::Function::new_decl("builtin.trap", sig.clone()));

        // a local function whose address is never taken cannot leak
        let mut local = FunctionBuilder::new("local_helper", Ty::Int(32));
        local.add_param(Ty::Int(32), None);
        local.set_linkage(Linkage::Internal);
        local.ret(Some(Operand::constant(Constant::int(32, 1))));
        module.add_function(local.finish());

        let mut resolver = TypeResolver::new(&module);
        let targets = resolver.targets(&module, &site).unwrap();
        assert_eq!(targets, vec!["f".to_string(), "g".to_string()]);
    }

    #[test]
    fn test_type_resolver_looks_through_cast() {
        // the callee is loaded from a global declared at a narrower type;
        // resolution follows the global's true signature
        let mut module = Module::new("m");
        let true_sig = FnSig::new(vec![Ty::Int(64)], Ty::Int(64));
        let mut f = FunctionBuilder::new("wide", Ty::Int(64));
        f.add_param(Ty::Int(64), None);
        f.ret(Some(Operand::constant(Constant::int(64, 0))));
        module.add_function(f.finish());

        module.add_global(Global {
            name: "slot".to_string(),
            ty: Ty::Fn(true_sig.clone()),
            linkage: Linkage::Internal,
            is_const: false,
            init: Some(Constant::global("wide")),
        });

        let apparent = FnSig::new(vec![Ty::Int(32)], Ty::Int(32));
        let mut caller = FunctionBuilder::new("caller", Ty::Void);
        let p = caller.new_local(Ty::Fn(apparent.clone()));
        caller.assign(
            p,
            Rvalue::Load(Operand::constant(Constant::BitCast {
                value: Box::new(Constant::global("slot")),
                ty: Ty::Fn(apparent.clone()),
            })),
        );
        let done = caller.new_block();
        caller.call(
            Operand::Local(p),
            apparent,
            vec![Operand::constant(Constant::int(32, 1))],
            None,
            Some(done),
        );
        caller.switch_to(done);
        caller.ret(None);
        module.add_function(caller.finish());

        let site = CallSiteId { function: "caller".to_string(), block: BlockId::ENTRY };
        let mut resolver = TypeResolver::new(&module);
        let targets = resolver.targets(&module, &site).unwrap();
        assert_eq!(targets, vec!["wide".to_string()]);
    }

    #[test]
    fn test_points_to_resolver_completeness() {
        let (module, site) = fixture();
        let summary = FileSummaryAnalysis::from_sites(vec![SiteSummary {
            site: site.clone(),
            complete: false,
            targets: vec!["g".to_string(), "f".to_string()],
        }]);

        // incomplete and disallowed: unresolved
        let mut strict = PointsToResolver::new(&module, &summary, false);
        assert!(strict.targets(&module, &site).is_none());

        // allowed: resolved, sorted
        let mut lax = PointsToResolver::new(&module, &summary, true);
        assert_eq!(
            lax.targets(&module, &site).unwrap(),
            vec!["f".to_string(), "g".to_string()]
        );
    }

    #[test]
    fn test_cha_resolver_caches() {
        let (module, site) = fixture();
        let summary = FileSummaryAnalysis::from_sites(vec![SiteSummary {
            site: site.clone(),
            complete: true,
            targets: vec!["g".to_string()],
        }]);
        let mut resolver = ChaResolver::new(&summary);
        assert_eq!(resolver.targets(&module, &site).unwrap(), vec!["g".to_string()]);
        assert!(resolver.cache.contains_key(&site));

        let other = CallSiteId { function: "caller".to_string(), block: BlockId::new(7) };
        assert!(resolver.targets(&module, &other).is_none());
    }
}
