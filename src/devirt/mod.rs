//! # Devirtualizer
//!
//! Transforms indirect call sites into direct calls, or a bounded dispatch
//! over a finite candidate set, using a chain of pluggable resolvers
//! ([`resolver`]) and one of two rewriting modes ([`promote`]).
//!
//! The driver collects every indirect, non-asm call and invoke into a
//! worklist, drains it, and reports the module modified iff the worklist
//! was non-empty.
//!
//! ## Module Structure
//!
//! - [`resolver`] - candidate-set computation (types, points-to, CHA)
//! - [`promote`] - dispatch-chain and bounce-function emission

pub mod promote;
pub mod resolver;

use tracing::{debug, warn};

use crate::ir::{Callee, Location, Module, TerminatorKind, Visitor};

pub use promote::{
    bounce_signature, get_or_create_bounce, promote_indirect_call, rewrite_to_bounce, BounceCache,
};
pub use resolver::{
    call_at, is_indirect_call, AliasSet, CallSiteId, CallSiteResolver, ChaResolver,
    ClassHierarchyAnalysis, FileSummaryAnalysis, PointsToAnalysis, PointsToResolver,
    ResolverKind, SiteSummary, TypeResolver,
};

/// Configuration for one devirtualization run.
#[derive(Debug, Clone)]
pub struct DevirtOptions {
    /// Keep the original indirect call as the dispatch's default arm.
    /// Required for soundness when resolution may be incomplete; with a
    /// complete candidate set the default arm can trap instead.
    pub allow_indirect: bool,
    /// Abandon a site when the candidate set exceeds this.
    pub max_targets: usize,
    /// Emit cached bounce functions instead of inlining the dispatch.
    pub use_bounce: bool,
}

impl Default for DevirtOptions {
    fn default() -> Self {
        Self { allow_indirect: false, max_targets: 9999, use_bounce: false }
    }
}

struct SiteCollector<'m> {
    module: &'m Module,
    function: String,
    sites: Vec<CallSiteId>,
}

impl Visitor for SiteCollector<'_> {
    fn visit_terminator(&mut self, term: &crate::ir::Terminator, location: Location) {
        if let TerminatorKind::Call(call) = &term.kind {
            // inline asm cannot be devirtualized
            if matches!(call.callee, Callee::Asm(_)) {
                return;
            }
            if is_indirect_call(self.module, call) {
                self.sites.push(CallSiteId {
                    function: self.function.clone(),
                    block: location.block,
                });
            }
        }
        self.super_terminator(term, location);
    }
}

/// Every indirect, non-asm call site in the module.
pub fn collect_indirect_sites(module: &Module) -> Vec<CallSiteId> {
    let mut sites = Vec::new();
    for func in &module.functions {
        let Some(body) = &func.body else { continue };
        let mut collector =
            SiteCollector { module, function: func.name.clone(), sites: Vec::new() };
        collector.visit_body(body);
        sites.extend(collector.sites);
    }
    sites
}

/// The worklist driver.
#[derive(Debug, Default)]
pub struct Devirtualizer {
    opts: DevirtOptions,
    bounces: BounceCache,
}

impl Devirtualizer {
    pub fn new(opts: DevirtOptions) -> Self {
        Self { opts, bounces: BounceCache::default() }
    }

    /// Resolve and rewrite every indirect call site, trying `resolvers` in
    /// order at each site. Returns true if any indirect site was seen.
    pub fn resolve_call_sites(
        &mut self,
        module: &mut Module,
        resolvers: &mut [Box<dyn CallSiteResolver + '_>],
    ) -> bool {
        let mut worklist = collect_indirect_sites(module);
        let modified = !worklist.is_empty();

        while let Some(site) = worklist.pop() {
            let mut targets: Option<AliasSet> = None;
            for resolver in resolvers.iter_mut() {
                match resolver.targets(module, &site) {
                    Some(set) if !set.is_empty() => {
                        targets = Some(set);
                        break;
                    }
                    _ => {}
                }
            }
            let Some(targets) = targets else {
                debug!(
                    "cannot resolve indirect call in `{}` at {}",
                    site.function, site.block
                );
                continue;
            };
            if targets.len() > self.opts.max_targets {
                warn!(
                    "not resolving call in `{}` at {}: {} candidates exceed the limit of {}",
                    site.function,
                    site.block,
                    targets.len(),
                    self.opts.max_targets
                );
                continue;
            }

            if self.opts.use_bounce {
                let Some(call) = call_at(module, &site) else { continue };
                let sig = call.sig.clone();
                let bounce = get_or_create_bounce(
                    module,
                    &mut self.bounces,
                    &sig,
                    &targets,
                    self.opts.allow_indirect,
                );
                rewrite_to_bounce(module, &site, &bounce);
            } else {
                promote_indirect_call(module, &site, &targets, self.opts.allow_indirect);
            }
        }
        modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BlockId, Constant, FnSig, FunctionBuilder, Operand, Terminator, Ty,
    };

    fn module_with_indirect_call() -> Module {
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
        module
    }

    #[test]
    fn test_collect_indirect_sites() {
        let module = module_with_indirect_call();
        let sites = collect_indirect_sites(&module);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].function, "caller");
        assert_eq!(sites[0].block, BlockId::ENTRY);
    }

    #[test]
    fn test_direct_calls_not_collected() {
        let mut module = Module::new("m");
        let mut b = FunctionBuilder::new("f", Ty::Void);
        b.ret(None);
        module.add_function(b.finish());
        let mut caller = FunctionBuilder::new("caller", Ty::Void);
        let cont = caller.new_block();
        caller.call(
            Operand::constant(Constant::global("f")),
            FnSig::new(vec![], Ty::Void),
            vec![],
            None,
            Some(cont),
        );
        caller.switch_to(cont);
        caller.ret(None);
        module.add_function(caller.finish());

        assert!(collect_indirect_sites(&module).is_empty());
    }

    #[test]
    fn test_devirt_by_type_end_to_end() {
        let mut module = module_with_indirect_call();
        let mut devirt = Devirtualizer::new(DevirtOptions::default());
        let mut resolvers: Vec<Box<dyn CallSiteResolver>> =
            vec![Box::new(TypeResolver::new(&module))];
        assert!(devirt.resolve_call_sites(&mut module, &mut resolvers));

        // all remaining calls in `caller` are direct
        let body = module.function("caller").unwrap().body.as_ref().unwrap();
        for bb in &body.blocks {
            if let Some(Terminator { kind: TerminatorKind::Call(call), .. }) = &bb.terminator {
                assert!(call.callee_global().is_some());
            }
        }

        // unchanged on a second run: nothing indirect remains
        let mut resolvers: Vec<Box<dyn CallSiteResolver>> =
            vec![Box::new(TypeResolver::new(&module))];
        assert!(!devirt.resolve_call_sites(&mut module, &mut resolvers));
    }

    #[test]
    fn test_max_targets_abandons_site() {
        let mut module = module_with_indirect_call();
        let mut devirt =
            Devirtualizer::new(DevirtOptions { max_targets: 1, ..Default::default() });
        let mut resolvers: Vec<Box<dyn CallSiteResolver>> =
            vec![Box::new(TypeResolver::new(&module))];
        // two candidates of the right type exceed the cap of one; the
        // worklist was still non-empty, so the pass reports modified
        assert!(devirt.resolve_call_sites(&mut module, &mut resolvers));
        assert_eq!(collect_indirect_sites(&module).len(), 1);
    }

    #[test]
    fn test_bounce_mode() {
        let mut module = module_with_indirect_call();
        let mut devirt =
            Devirtualizer::new(DevirtOptions { use_bounce: true, ..Default::default() });
        let mut resolvers: Vec<Box<dyn CallSiteResolver>> =
            vec![Box::new(TypeResolver::new(&module))];
        assert!(devirt.resolve_call_sites(&mut module, &mut resolvers));

        let call = call_at(
            &module,
            &CallSiteId { function: "caller".to_string(), block: BlockId::ENTRY },
        )
        .unwrap();
        let bounce_name = call.callee_global().expect("call goes to the bounce").to_string();
        assert!(module.function(&bounce_name).is_some());
    }

    #[test]
    fn test_resolver_chain_first_nonempty_wins() {
        let mut module = module_with_indirect_call();
        let site = CallSiteId { function: "caller".to_string(), block: BlockId::ENTRY };
        let summary = FileSummaryAnalysis::from_sites(vec![SiteSummary {
            site: site.clone(),
            complete: true,
            targets: vec!["g".to_string()],
        }]);

        let mut devirt = Devirtualizer::new(DevirtOptions::default());
        let pt = PointsToResolver::new(&module, &summary, false);
        let mut resolvers: Vec<Box<dyn CallSiteResolver>> =
            vec![Box::new(pt), Box::new(TypeResolver::new(&module))];
        assert!(devirt.resolve_call_sites(&mut module, &mut resolvers));

        // the points-to answer (only `g`) won over the type answer (f, g)
        let body = module.function("caller").unwrap().body.as_ref().unwrap();
        let direct: Vec<_> = body
            .blocks
            .iter()
            .filter_map(|bb| match &bb.terminator {
                Some(Terminator { kind: TerminatorKind::Call(call), .. }) => {
                    call.callee_global().map(str::to_string)
                }
                _ => None,
            })
            .collect();
        assert!(direct.contains(&"g".to_string()));
        assert!(!direct.contains(&"f".to_string()));
    }
}
