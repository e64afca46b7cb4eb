//! # Specializer Primitives
//!
//! Two pure operations on the IR:
//!
//! 1. [`specialize_function`] - clone a function with a partial argument
//!    binding, producing a fresh definition whose parameters are only the
//!    unbound "holes".
//! 2. [`retarget_call_site`] - rebuild a call terminator to target a
//!    specialized clone with a reduced argument list.
//!
//! Neither touches a module; insertion and splicing are the caller's job.

use thiserror::Error;

use crate::ir::{
    CallTerm, Callee, Constant, FnSig, Function, Linkage, Operand, Rvalue, Statement,
    StatementKind,
};

/// Failure to produce a specialized clone.
#[derive(Debug, Error)]
pub enum SpecializeError {
    #[error("cannot specialize a declaration")]
    Declaration,

    #[error("cannot specialize a variadic function")]
    Variadic,

    #[error("binding count {got} does not match parameter count {expected}")]
    BindingArity { got: usize, expected: usize },
}

/// Clone `func` with the given partial binding.
///
/// `bindings` has one entry per parameter: `Some(constant)` binds the slot,
/// `None` leaves a hole. The clone's parameter list is the holes in their
/// original order; each bound parameter local is assigned its constant at
/// the top of the entry block. The clone gets external linkage so a client
/// module can call it after rewriting.
pub fn specialize_function(
    func: &Function,
    name: impl Into<String>,
    bindings: &[Option<Constant>],
) -> Result<Function, SpecializeError> {
    let body = func.body.as_ref().ok_or(SpecializeError::Declaration)?;
    if func.is_variadic() {
        return Err(SpecializeError::Variadic);
    }
    if bindings.len() != func.param_count() {
        return Err(SpecializeError::BindingArity {
            got: bindings.len(),
            expected: func.param_count(),
        });
    }

    let mut body = body.clone();

    let mut hole_params = Vec::new();
    let mut hole_tys = Vec::new();
    let mut prelude = Vec::new();
    for (i, binding) in bindings.iter().enumerate() {
        let param = body.params[i];
        match binding {
            Some(constant) => prelude.push(Statement::new(StatementKind::Assign {
                dest: param,
                rvalue: Rvalue::Use(Operand::Constant(constant.clone())),
            })),
            None => {
                hole_params.push(param);
                hole_tys.push(func.sig.params[i].clone());
            }
        }
    }

    body.params = hole_params;
    debug_assert!(!body.blocks.is_empty(), "definition with no entry block");
    body.blocks[0].statements.splice(0..0, prelude);

    Ok(Function {
        name: name.into(),
        sig: FnSig::new(hole_tys, (*func.sig.ret).clone()),
        linkage: Linkage::External,
        conv: func.conv,
        body: Some(body),
    })
}

/// Rebuild a call terminator to target `target`, forwarding only the
/// arguments at `arg_perm` indices.
///
/// The call kind (call vs invoke), continuation and unwind successors,
/// result binding, and calling convention are preserved. The caller splices
/// the returned terminator in place of the original.
pub fn retarget_call_site(call: &CallTerm, target: &str, arg_perm: &[usize]) -> CallTerm {
    let args = arg_perm.iter().map(|&i| call.args[i].clone()).collect();
    let params = arg_perm
        .iter()
        .map(|&i| call.sig.params[i].clone())
        .collect();
    let mut sig = FnSig::new(params, (*call.sig.ret).clone());
    sig.variadic = call.sig.variadic;

    CallTerm {
        callee: Callee::Value(Operand::Constant(Constant::global(target))),
        sig,
        args,
        dest: call.dest,
        target: call.target,
        unwind: call.unwind,
        conv: call.conv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, BlockId, CallConv, FunctionBuilder, LocalId, Ty};

    /// `int add(int a, int b) { return a + b; }`
    fn add_function() -> Function {
        let mut builder = FunctionBuilder::new("add", Ty::Int(32));
        let a = builder.add_param(Ty::Int(32), Some("a"));
        let b = builder.add_param(Ty::Int(32), Some("b"));
        let sum = builder.new_local(Ty::Int(32));
        builder.assign(
            sum,
            Rvalue::Binary { op: BinOp::Add, lhs: Operand::Local(a), rhs: Operand::Local(b) },
        );
        builder.ret(Some(Operand::Local(sum)));
        builder.finish()
    }

    #[test]
    fn test_specialize_binds_first_slot() {
        let add = add_function();
        let clone =
            specialize_function(&add, "add.spec.0", &[Some(Constant::int(32, 3)), None]).unwrap();

        assert_eq!(clone.name, "add.spec.0");
        assert_eq!(clone.linkage, Linkage::External);
        assert_eq!(clone.sig.params, vec![Ty::Int(32)]);

        let body = clone.body.as_ref().unwrap();
        assert_eq!(body.params.len(), 1);
        // the bound parameter is assigned at the top of the entry block
        match &body.blocks[0].statements[0].kind {
            StatementKind::Assign { dest, rvalue: Rvalue::Use(Operand::Constant(c)) } => {
                assert_eq!(*dest, LocalId::new(0));
                assert_eq!(*c, Constant::int(32, 3));
            }
            other => panic!("unexpected prelude statement: {:?}", other),
        }
    }

    #[test]
    fn test_specialize_rejects_declaration_and_arity() {
        let decl = Function::new_decl("ext", FnSig::new(vec![Ty::Int(32)], Ty::Void));
        assert!(matches!(
            specialize_function(&decl, "x", &[None]),
            Err(SpecializeError::Declaration)
        ));

        let add = add_function();
        assert!(matches!(
            specialize_function(&add, "x", &[None]),
            Err(SpecializeError::BindingArity { got: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_specialize_rejects_variadic() {
        let mut builder = FunctionBuilder::new("variadic", Ty::Void);
        builder.add_param(Ty::Ptr, None);
        builder.set_variadic();
        builder.ret(None);
        let func = builder.finish();
        assert!(matches!(
            specialize_function(&func, "x", &[None]),
            Err(SpecializeError::Variadic)
        ));
    }

    #[test]
    fn test_retarget_preserves_shape() {
        let call = CallTerm {
            callee: Callee::Value(Operand::Constant(Constant::global("add"))),
            sig: FnSig::new(vec![Ty::Int(32), Ty::Int(32)], Ty::Int(32)),
            args: vec![
                Operand::Constant(Constant::int(32, 3)),
                Operand::Local(LocalId::new(4)),
            ],
            dest: Some(LocalId::new(5)),
            target: Some(BlockId::new(1)),
            unwind: Some(BlockId::new(2)),
            conv: CallConv::Fast,
        };

        let new = retarget_call_site(&call, "add.spec.0", &[1]);
        assert_eq!(new.callee_global(), Some("add.spec.0"));
        assert_eq!(new.args, vec![Operand::Local(LocalId::new(4))]);
        assert_eq!(new.sig.params, vec![Ty::Int(32)]);
        assert_eq!(new.dest, call.dest);
        assert_eq!(new.target, call.target);
        assert_eq!(new.unwind, call.unwind);
        assert_eq!(new.conv, CallConv::Fast);
    }
}
