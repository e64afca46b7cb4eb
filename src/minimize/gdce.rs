//! Global dead-code elimination and constant merging.
//!
//! Both passes treat the module as a symbol graph: externally-visible
//! symbols are roots, and anything a live symbol mentions stays live.
//! They are iterated to fixpoint by the minimizer; each invocation reports
//! whether it changed the module.

use std::collections::HashSet;

use crate::ir::{collect_constant_globals, Linkage, Module, Operand};

/// Remove internal functions, globals, and aliases that no live symbol
/// references. Returns true if anything was removed.
pub fn global_dce(module: &mut Module) -> bool {
    let mut live: HashSet<String> = HashSet::new();
    let mut worklist: Vec<String> = Vec::new();

    // Roots: externally-visible symbols, declarations included. An
    // external declaration is part of the module's surface even with no
    // local use.
    for func in &module.functions {
        if func.linkage.is_externally_visible() {
            worklist.push(func.name.clone());
        }
    }
    for global in &module.globals {
        if global.linkage.is_externally_visible() {
            worklist.push(global.name.clone());
        }
    }
    for alias in &module.aliases {
        if alias.linkage.is_externally_visible() {
            worklist.push(alias.name.clone());
        }
    }

    while let Some(name) = worklist.pop() {
        if !live.insert(name.clone()) {
            continue;
        }
        let mut referenced: HashSet<String> = HashSet::new();
        if let Some(func) = module.function(&name) {
            if let Some(body) = &func.body {
                body.for_each_operand(&mut |op| {
                    if let Operand::Constant(c) = op {
                        collect_constant_globals(c, &mut referenced);
                    }
                });
            }
        }
        if let Some(global) = module.global(&name) {
            if let Some(init) = &global.init {
                collect_constant_globals(init, &mut referenced);
            }
        }
        if let Some(alias) = module.alias(&name) {
            referenced.insert(alias.aliasee.clone());
        }
        for symbol in referenced {
            if !live.contains(&symbol) {
                worklist.push(symbol);
            }
        }
    }

    let before =
        module.functions.len() + module.globals.len() + module.aliases.len();
    module.functions.retain(|f| live.contains(&f.name));
    module.globals.retain(|g| live.contains(&g.name));
    module.aliases.retain(|a| live.contains(&a.name));
    let after = module.functions.len() + module.globals.len() + module.aliases.len();

    after != before
}

/// Merge internal constant globals with identical type and initializer.
///
/// Candidates are considered in name order and the first name wins, so the
/// result is deterministic. Returns true if any global was merged away.
pub fn merge_constants(module: &mut Module) -> bool {
    let mut order: Vec<usize> = module
        .globals
        .iter()
        .enumerate()
        .filter(|(_, g)| g.linkage == Linkage::Internal && g.is_const && g.has_initializer())
        .map(|(i, _)| i)
        .collect();
    order.sort_by(|&a, &b| module.globals[a].name.cmp(&module.globals[b].name));

    let mut kept: Vec<usize> = Vec::new();
    let mut replacements: Vec<(String, String)> = Vec::new();
    for &i in &order {
        let dup = kept.iter().find(|&&k| {
            module.globals[k].ty == module.globals[i].ty
                && module.globals[k].init == module.globals[i].init
        });
        match dup {
            Some(&k) => replacements
                .push((module.globals[i].name.clone(), module.globals[k].name.clone())),
            None => kept.push(i),
        }
    }

    if replacements.is_empty() {
        return false;
    }
    for (old, new) in &replacements {
        module.replace_global_uses(old, new);
    }
    module
        .globals
        .retain(|g| !replacements.iter().any(|(old, _)| old == &g.name));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, FnSig, FunctionBuilder, Global, Operand, Rvalue, Ty};

    fn internal_const(name: &str, value: i128) -> Global {
        Global {
            name: name.to_string(),
            ty: Ty::Int(32),
            linkage: Linkage::Internal,
            is_const: true,
            init: Some(Constant::int(32, value)),
        }
    }

    #[test]
    fn test_gdce_removes_dead_internal() {
        let mut module = Module::new("m");

        let mut used = FunctionBuilder::new("used_by_main", Ty::Void);
        used.set_linkage(Linkage::Internal);
        used.ret(None);
        module.add_function(used.finish());

        let mut dead = FunctionBuilder::new("never_used", Ty::Void);
        dead.set_linkage(Linkage::Internal);
        dead.ret(None);
        module.add_function(dead.finish());

        let mut main = FunctionBuilder::new("main", Ty::Int(32));
        let cont = main.new_block();
        main.call(
            Operand::constant(Constant::global("used_by_main")),
            FnSig::new(vec![], Ty::Void),
            vec![],
            None,
            Some(cont),
        );
        main.switch_to(cont);
        main.ret(Some(Operand::constant(Constant::int(32, 0))));
        module.add_function(main.finish());

        assert!(global_dce(&mut module));
        assert!(module.function("main").is_some());
        assert!(module.function("used_by_main").is_some());
        assert!(module.function("never_used").is_none());
        assert!(!global_dce(&mut module));
    }

    #[test]
    fn test_gdce_keeps_transitive_data() {
        let mut module = Module::new("m");
        module.add_global(Global {
            name: "table".to_string(),
            ty: Ty::Int(32),
            linkage: Linkage::Internal,
            is_const: true,
            init: Some(Constant::global("payload")),
        });
        module.add_global(internal_const("payload", 9));

        let mut main = FunctionBuilder::new("main", Ty::Int(32));
        let tmp = main.new_local(Ty::Int(32));
        main.assign(tmp, Rvalue::Load(Operand::constant(Constant::global("table"))));
        main.ret(Some(Operand::Local(tmp)));
        module.add_function(main.finish());

        assert!(!global_dce(&mut module));
        assert!(module.global("table").is_some());
        assert!(module.global("payload").is_some());
    }

    #[test]
    fn test_merge_constants_dedupes() {
        let mut module = Module::new("m");
        module.add_global(internal_const("str.1", 7));
        module.add_global(internal_const("str.0", 7));
        module.add_global(internal_const("other", 8));

        let mut main = FunctionBuilder::new("main", Ty::Int(32));
        let tmp = main.new_local(Ty::Int(32));
        main.assign(tmp, Rvalue::Load(Operand::constant(Constant::global("str.1"))));
        main.ret(Some(Operand::Local(tmp)));
        module.add_function(main.finish());

        assert!(merge_constants(&mut module));
        // the first name in order wins
        assert!(module.global("str.0").is_some());
        assert!(module.global("str.1").is_none());
        assert!(module.global("other").is_some());

        // the use was rewritten to the survivor
        let mut refs = HashSet::new();
        module
            .function("main")
            .unwrap()
            .body
            .as_ref()
            .unwrap()
            .for_each_operand(&mut |op| {
                if let Operand::Constant(c) = op {
                    collect_constant_globals(c, &mut refs);
                }
            });
        assert!(refs.contains("str.0"));

        assert!(!merge_constants(&mut module));
    }

    #[test]
    fn test_merge_skips_external_and_mutable() {
        let mut module = Module::new("m");
        let mut ext = internal_const("a", 1);
        ext.linkage = Linkage::External;
        module.add_global(ext);
        let mut var = internal_const("b", 1);
        var.is_const = false;
        module.add_global(var);
        module.add_global(internal_const("c", 1));

        assert!(!merge_constants(&mut module));
    }
}
