//! Builder for constructing function definitions.
//!
//! Used by the devirtualizer when it emits bounce functions, and heavily by
//! tests.

use super::body::{
    BlockId, CallTerm, Callee, FunctionBody, LocalId, Operand, Rvalue, Statement, StatementKind,
    Terminator, TerminatorKind,
};
use super::module::{Function, Linkage};
use super::types::{CallConv, FnSig, Ty};

/// Incrementally builds a [`Function`] with a body.
pub struct FunctionBuilder {
    name: String,
    ret: Ty,
    variadic: bool,
    linkage: Linkage,
    conv: CallConv,
    param_tys: Vec<Ty>,
    body: FunctionBody,
    current: BlockId,
}

impl FunctionBuilder {
    /// Create a builder with an empty entry block.
    pub fn new(name: impl Into<String>, ret: Ty) -> Self {
        let mut body = FunctionBody::new();
        let entry = body.new_block();
        Self {
            name: name.into(),
            ret,
            variadic: false,
            linkage: Linkage::External,
            conv: CallConv::C,
            param_tys: Vec::new(),
            body,
            current: entry,
        }
    }

    /// Append a parameter and return its local.
    pub fn add_param(&mut self, ty: Ty, name: Option<&str>) -> LocalId {
        let id = self.body.new_local(ty.clone(), name.map(str::to_string));
        self.body.params.push(id);
        self.param_tys.push(ty);
        id
    }

    pub fn set_linkage(&mut self, linkage: Linkage) {
        self.linkage = linkage;
    }

    pub fn set_variadic(&mut self) {
        self.variadic = true;
    }

    pub fn set_conv(&mut self, conv: CallConv) {
        self.conv = conv;
    }

    pub fn new_local(&mut self, ty: Ty) -> LocalId {
        self.body.new_local(ty, None)
    }

    pub fn new_block(&mut self) -> BlockId {
        self.body.new_block()
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Push a statement onto the current block.
    pub fn push(&mut self, kind: StatementKind) {
        self.body.push_statement(self.current, Statement::new(kind));
    }

    pub fn assign(&mut self, dest: LocalId, rvalue: Rvalue) {
        self.push(StatementKind::Assign { dest, rvalue });
    }

    /// Terminate the current block.
    pub fn terminate(&mut self, kind: TerminatorKind) {
        self.body.set_terminator(self.current, Terminator::new(kind));
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(TerminatorKind::Jump { target });
    }

    pub fn branch(&mut self, cond: Operand, then_blk: BlockId, else_blk: BlockId) {
        self.terminate(TerminatorKind::Branch { cond, then_blk, else_blk });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(TerminatorKind::Return { value });
    }

    pub fn unreachable(&mut self) {
        self.terminate(TerminatorKind::Unreachable);
    }

    /// Terminate the current block with a call continuing at `target`.
    pub fn call(
        &mut self,
        callee: Operand,
        sig: FnSig,
        args: Vec<Operand>,
        dest: Option<LocalId>,
        target: Option<BlockId>,
    ) {
        self.terminate(TerminatorKind::Call(CallTerm {
            callee: Callee::Value(callee),
            sig,
            args,
            dest,
            target,
            unwind: None,
            conv: CallConv::C,
        }));
    }

    pub fn finish(self) -> Function {
        let mut sig = FnSig::new(self.param_tys, self.ret);
        sig.variadic = self.variadic;
        Function {
            name: self.name,
            sig,
            linkage: self.linkage,
            conv: self.conv,
            body: Some(self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Constant};

    #[test]
    fn test_builder_signature() {
        let mut builder = FunctionBuilder::new("add", Ty::Int(32));
        let a = builder.add_param(Ty::Int(32), Some("a"));
        let b = builder.add_param(Ty::Int(32), Some("b"));
        let sum = builder.new_local(Ty::Int(32));
        builder.assign(
            sum,
            Rvalue::Binary {
                op: BinOp::Add,
                lhs: Operand::Local(a),
                rhs: Operand::Local(b),
            },
        );
        builder.ret(Some(Operand::Local(sum)));

        let func = builder.finish();
        assert_eq!(func.name, "add");
        assert_eq!(func.sig.param_count(), 2);
        assert!(!func.is_declaration());
        let body = func.body.as_ref().unwrap();
        assert_eq!(body.params, vec![a, b]);
        assert_eq!(body.blocks.len(), 1);
    }

    #[test]
    fn test_builder_call_and_continue() {
        let mut builder = FunctionBuilder::new("wrapper", Ty::Int(32));
        let result = builder.new_local(Ty::Int(32));
        let cont = builder.new_block();
        builder.call(
            Operand::constant(Constant::global("inner")),
            FnSig::new(vec![], Ty::Int(32)),
            vec![],
            Some(result),
            Some(cont),
        );
        builder.switch_to(cont);
        builder.ret(Some(Operand::Local(result)));

        let func = builder.finish();
        let body = func.body.as_ref().unwrap();
        assert!(body.blocks[0].is_terminated());
        assert_eq!(body.blocks[0].successors(), vec![cont]);
    }
}
