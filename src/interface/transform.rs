//! # Rewrite Manifests
//!
//! A transform pairs a component interface with the rewrite rules the
//! specializer produced for it. Rules are ordered: `lookup_rewrite` returns
//! the first witness that matches, and that ordering is part of the
//! contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::Operand;

use super::call_info::{CallInfo, ComponentInterface};

/// Replace a matching call to the source function with a call to `target`,
/// forwarding only the original arguments at `arg_perm` indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRewrite {
    pub target: String,
    pub arg_perm: Vec<usize>,
}

/// One rule: an observed argument tuple and the rewrite it licenses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    pub witness: CallInfo,
    pub rewrite: CallRewrite,
}

/// An interface plus the rewrites generated against it.
///
/// Invariant: every rule's witness appears among the interface's recorded
/// calls for that function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentInterfaceTransform {
    pub interface: ComponentInterface,
    rewrites: BTreeMap<String, Vec<RewriteRule>>,
}

impl ComponentInterfaceTransform {
    pub fn new(interface: ComponentInterface) -> Self {
        Self { interface, rewrites: BTreeMap::new() }
    }

    /// Append a rewrite rule for `function`. The witness is registered in
    /// the interface if it is not already recorded there.
    pub fn record_rewrite(
        &mut self,
        function: &str,
        witness: CallInfo,
        target: &str,
        arg_perm: Vec<usize>,
    ) {
        self.interface.add_call(function, witness.clone());
        self.rewrites
            .entry(function.to_string())
            .or_default()
            .push(RewriteRule {
                witness,
                rewrite: CallRewrite { target: target.to_string(), arg_perm },
            });
    }

    /// Find the first rule whose witness matches the actual arguments, in
    /// insertion order.
    pub fn lookup_rewrite(&self, function: &str, actual: &[Operand]) -> Option<&CallRewrite> {
        self.rewrites
            .get(function)?
            .iter()
            .find(|rule| rule.witness.matches_args(actual))
            .map(|rule| &rule.rewrite)
    }

    /// Functions with at least one rewrite rule, in deterministic order.
    pub fn rewritten_functions(&self) -> impl Iterator<Item = &String> {
        self.rewrites.keys()
    }

    pub fn rules_for(&self, function: &str) -> &[RewriteRule] {
        self.rewrites.get(function).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rewrite_count(&self) -> usize {
        self.rewrites.values().map(Vec::len).sum()
    }
}
