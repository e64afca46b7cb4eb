//! # Modules, Functions, Globals
//!
//! The module is a name-indexed container: functions, globals, and aliases
//! refer to each other by symbol name rather than by owning pointers, so
//! mutually-recursive definitions need no special ownership treatment.
//!
//! Intrinsics are declarations under the reserved `builtin.` prefix; the
//! program entry point is the function named `main`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::body::{FunctionBody, Operand, Rvalue, StatementKind, TerminatorKind};
use super::types::{CallConv, Constant, FnSig, Ty};

/// The name of the program entry point.
pub const ENTRY_POINT: &str = "main";

/// Name prefix reserved for intrinsic declarations.
pub const INTRINSIC_PREFIX: &str = "builtin.";

// ============================================================================
// Linkage
// ============================================================================

/// Symbol linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
    ExternalWeak,
    WeakOdr,
    Appending,
    Common,
}

impl Linkage {
    /// Check whether the symbol is visible outside the module.
    pub fn is_externally_visible(self) -> bool {
        !matches!(self, Linkage::Internal)
    }
}

// ============================================================================
// Functions, globals, aliases
// ============================================================================

/// A function definition or declaration (declarations have no body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub sig: FnSig,
    pub linkage: Linkage,
    pub conv: CallConv,
    pub body: Option<FunctionBody>,
}

impl Function {
    /// Create an external declaration.
    pub fn new_decl(name: impl Into<String>, sig: FnSig) -> Self {
        Self {
            name: name.into(),
            sig,
            linkage: Linkage::External,
            conv: CallConv::C,
            body: None,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_variadic(&self) -> bool {
        self.sig.variadic
    }

    pub fn is_intrinsic(&self) -> bool {
        self.name.starts_with(INTRINSIC_PREFIX)
    }

    pub fn param_count(&self) -> usize {
        self.sig.param_count()
    }
}

/// A global variable definition or declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Ty,
    pub linkage: Linkage,
    pub is_const: bool,
    pub init: Option<Constant>,
}

impl Global {
    pub fn has_initializer(&self) -> bool {
        self.init.is_some()
    }
}

/// An alias for another symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAlias {
    pub name: String,
    pub linkage: Linkage,
    pub aliasee: String,
}

// ============================================================================
// Module
// ============================================================================

/// A translation unit: named functions, globals, and aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub aliases: Vec<GlobalAlias>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn alias(&self, name: &str) -> Option<&GlobalAlias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    /// Check whether any function, global, or alias has this name.
    pub fn contains_symbol(&self, name: &str) -> bool {
        self.function(name).is_some() || self.global(name).is_some() || self.alias(name).is_some()
    }

    /// Insert a function. The name must be fresh.
    pub fn add_function(&mut self, func: Function) {
        debug_assert!(
            !self.contains_symbol(&func.name),
            "duplicate symbol `{}`",
            func.name
        );
        self.functions.push(func);
    }

    pub fn add_global(&mut self, global: Global) {
        debug_assert!(
            !self.contains_symbol(&global.name),
            "duplicate symbol `{}`",
            global.name
        );
        self.globals.push(global);
    }

    pub fn add_alias(&mut self, alias: GlobalAlias) {
        debug_assert!(
            !self.contains_symbol(&alias.name),
            "duplicate symbol `{}`",
            alias.name
        );
        self.aliases.push(alias);
    }

    /// Resolve a name to a function, following one level of alias.
    pub fn resolve_function(&self, name: &str) -> Option<&Function> {
        if let Some(f) = self.function(name) {
            return Some(f);
        }
        let alias = self.alias(name)?;
        self.function(&alias.aliasee)
    }

    /// Check whether the module defines the program entry point.
    pub fn has_entry_point(&self) -> bool {
        self.function(ENTRY_POINT)
            .is_some_and(|f| !f.is_declaration())
    }

    /// Names of functions whose address escapes into data.
    ///
    /// A function used only as a direct callee is not address-taken; any
    /// other appearance of its symbol (call arguments, stores, global
    /// initializers) counts.
    pub fn address_taken_functions(&self) -> HashSet<String> {
        let mut taken = HashSet::new();

        for global in &self.globals {
            if let Some(init) = &global.init {
                collect_constant_globals(init, &mut taken);
            }
        }

        for func in &self.functions {
            let Some(body) = &func.body else { continue };
            for bb in &body.blocks {
                for stmt in &bb.statements {
                    match &stmt.kind {
                        StatementKind::Assign { rvalue, .. } => match rvalue {
                            Rvalue::Use(op) | Rvalue::Load(op) => {
                                collect_operand_globals(op, &mut taken)
                            }
                            Rvalue::Binary { lhs, rhs, .. } => {
                                collect_operand_globals(lhs, &mut taken);
                                collect_operand_globals(rhs, &mut taken);
                            }
                        },
                        StatementKind::Store { ptr, value } => {
                            collect_operand_globals(ptr, &mut taken);
                            collect_operand_globals(value, &mut taken);
                        }
                        StatementKind::Nop => {}
                    }
                }
                if let Some(term) = &bb.terminator {
                    match &term.kind {
                        TerminatorKind::Branch { cond, .. } => {
                            collect_operand_globals(cond, &mut taken)
                        }
                        TerminatorKind::Return { value: Some(op) } => {
                            collect_operand_globals(op, &mut taken)
                        }
                        TerminatorKind::Call(call) => {
                            // The callee position is a call, not an escape.
                            for arg in &call.args {
                                collect_operand_globals(arg, &mut taken);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        taken.retain(|name| self.function(name).is_some());
        taken
    }

    /// Replace every reference to symbol `old` with `new`.
    pub fn replace_global_uses(&mut self, old: &str, new: &str) {
        for func in &mut self.functions {
            if let Some(body) = &mut func.body {
                body.for_each_operand_mut(&mut |op| {
                    if let Operand::Constant(c) = op {
                        rewrite_constant(c, old, new);
                    }
                });
            }
        }
        for global in &mut self.globals {
            if let Some(init) = &mut global.init {
                rewrite_constant(init, old, new);
            }
        }
        for alias in &mut self.aliases {
            if alias.aliasee == old {
                alias.aliasee = new.to_string();
            }
        }
    }
}

fn collect_operand_globals(op: &Operand, out: &mut HashSet<String>) {
    if let Operand::Constant(c) = op {
        collect_constant_globals(c, out);
    }
}

/// Collect every symbol referenced by a constant, through casts and
/// aggregates.
pub fn collect_constant_globals(c: &Constant, out: &mut HashSet<String>) {
    match c {
        Constant::Global(name) => {
            out.insert(name.clone());
        }
        Constant::Aggregate { elems, .. } => {
            for e in elems {
                collect_constant_globals(e, out);
            }
        }
        Constant::BitCast { value, .. } => collect_constant_globals(value, out),
        _ => {}
    }
}

fn rewrite_constant(c: &mut Constant, old: &str, new: &str) {
    match c {
        Constant::Global(name) => {
            if name == old {
                *name = new.to_string();
            }
        }
        Constant::Aggregate { elems, .. } => {
            for e in elems {
                rewrite_constant(e, old, new);
            }
        }
        Constant::BitCast { value, .. } => rewrite_constant(value, old, new),
        _ => {}
    }
}

// ============================================================================
// Tests
// ============================================================================
