//! # Specialization Policies
//!
//! A policy decides, per observed call, which argument slots are worth
//! binding. The engine never inspects a policy's internals; composition at
//! construction time is the only extension point.

use crate::callgraph::CallGraph;
use crate::interface::ConcreteArg;
use crate::ir::Function;

/// Decides which slots of a witness tuple to bind.
///
/// The returned mask has one entry per argument; an all-false (or empty)
/// mask declines to specialize.
pub trait SpecializationPolicy {
    fn specialize_on(&self, callee: &Function, args: &[ConcreteArg]) -> Vec<bool>;
}

/// Bind every slot whose witness is a known constant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggressivePolicy;

impl SpecializationPolicy for AggressivePolicy {
    fn specialize_on(&self, _callee: &Function, args: &[ConcreteArg]) -> Vec<bool> {
        args.iter().map(ConcreteArg::is_known).collect()
    }
}

/// Refuse to specialize functions on a call-graph cycle; defer to the
/// wrapped policy otherwise.
///
/// Specializing a recursive function risks unbounded clone growth: each
/// clone's body contains the same recursive call the interface records.
#[derive(Debug, Clone)]
pub struct RecursiveGuard<P> {
    inner: P,
    graph: CallGraph,
}

impl<P> RecursiveGuard<P> {
    pub fn new(inner: P, graph: CallGraph) -> Self {
        Self { inner, graph }
    }
}

impl<P: SpecializationPolicy> SpecializationPolicy for RecursiveGuard<P> {
    fn specialize_on(&self, callee: &Function, args: &[ConcreteArg]) -> Vec<bool> {
        if self.graph.is_recursive(&callee.name) {
            return vec![false; args.len()];
        }
        self.inner.specialize_on(callee, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, FnSig, FunctionBuilder, Module, Operand, Ty};

    fn known_and_unknown() -> Vec<ConcreteArg> {
        vec![
            ConcreteArg::Int { bits: 32, value: 3 },
            ConcreteArg::Unknown,
            ConcreteArg::Null,
        ]
    }

    #[test]
    fn test_aggressive_binds_known_slots() {
        let func = crate::ir::Function::new_decl(
            "f",
            FnSig::new(vec![Ty::Int(32), Ty::Int(32), Ty::Ptr], Ty::Void),
        );
        let mask = AggressivePolicy.specialize_on(&func, &known_and_unknown());
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn test_recursive_guard_refuses_cycle() {
        let mut module = Module::new("m");
        let mut builder = FunctionBuilder::new("loop", Ty::Void);
        let cont = builder.new_block();
        builder.call(
            Operand::constant(Constant::global("loop")),
            FnSig::new(vec![], Ty::Void),
            vec![],
            None,
            Some(cont),
        );
        builder.switch_to(cont);
        builder.ret(None);
        module.add_function(builder.finish());

        let policy = RecursiveGuard::new(AggressivePolicy, CallGraph::build(&module));
        let func = module.function("loop").unwrap();
        let mask = policy.specialize_on(func, &[ConcreteArg::Int { bits: 32, value: 1 }]);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn test_recursive_guard_defers_otherwise() {
        let module = Module::new("m");
        let policy = RecursiveGuard::new(AggressivePolicy, CallGraph::build(&module));
        let func = crate::ir::Function::new_decl("f", FnSig::new(vec![Ty::Int(32)], Ty::Void));
        let mask = policy.specialize_on(&func, &[ConcreteArg::Int { bits: 32, value: 1 }]);
        assert_eq!(mask, vec![true]);
    }
}
