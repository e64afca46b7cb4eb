//! # Body Visitor
//!
//! Immutable traversal over function bodies. Override `visit_*` methods for
//! custom behavior and call the matching `super_*` method to continue the
//! default recursive walk.

use super::body::{
    BasicBlockData, BlockId, CallTerm, Callee, FunctionBody, Operand, Rvalue, Statement,
    StatementKind, Terminator, TerminatorKind,
};

/// A location within a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub block: BlockId,
    /// Statement index, or [`Location::TERMINATOR`] for the terminator.
    pub statement_index: usize,
}

impl Location {
    pub const TERMINATOR: usize = usize::MAX;

    pub fn statement(block: BlockId, index: usize) -> Self {
        Self { block, statement_index: index }
    }

    pub fn terminator(block: BlockId) -> Self {
        Self { block, statement_index: Self::TERMINATOR }
    }
}

/// Visitor trait for immutable body traversal.
pub trait Visitor: Sized {
    fn visit_body(&mut self, body: &FunctionBody) {
        self.super_body(body);
    }

    fn super_body(&mut self, body: &FunctionBody) {
        for (id, block) in body.iter_blocks() {
            self.visit_block(id, block);
        }
    }

    fn visit_block(&mut self, id: BlockId, block: &BasicBlockData) {
        self.super_block(id, block);
    }

    fn super_block(&mut self, id: BlockId, block: &BasicBlockData) {
        for (idx, stmt) in block.statements.iter().enumerate() {
            self.visit_statement(stmt, Location::statement(id, idx));
        }
        if let Some(term) = &block.terminator {
            self.visit_terminator(term, Location::terminator(id));
        }
    }

    fn visit_statement(&mut self, stmt: &Statement, location: Location) {
        self.super_statement(stmt, location);
    }

    fn super_statement(&mut self, stmt: &Statement, location: Location) {
        match &stmt.kind {
            StatementKind::Assign { rvalue, .. } => match rvalue {
                Rvalue::Use(op) | Rvalue::Load(op) => self.visit_operand(op, location),
                Rvalue::Binary { lhs, rhs, .. } => {
                    self.visit_operand(lhs, location);
                    self.visit_operand(rhs, location);
                }
            },
            StatementKind::Store { ptr, value } => {
                self.visit_operand(ptr, location);
                self.visit_operand(value, location);
            }
            StatementKind::Nop => {}
        }
    }

    fn visit_terminator(&mut self, term: &Terminator, location: Location) {
        self.super_terminator(term, location);
    }

    fn super_terminator(&mut self, term: &Terminator, location: Location) {
        match &term.kind {
            TerminatorKind::Branch { cond, .. } => self.visit_operand(cond, location),
            TerminatorKind::Return { value: Some(op) } => self.visit_operand(op, location),
            TerminatorKind::Call(call) => self.visit_call(call, location),
            _ => {}
        }
    }

    fn visit_call(&mut self, call: &CallTerm, location: Location) {
        self.super_call(call, location);
    }

    fn super_call(&mut self, call: &CallTerm, location: Location) {
        if let Callee::Value(op) = &call.callee {
            self.visit_operand(op, location);
        }
        for arg in &call.args {
            self.visit_operand(arg, location);
        }
    }

    fn visit_operand(&mut self, _op: &Operand, _location: Location) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{Constant, FnSig, Ty};

    struct CallCounter {
        calls: usize,
        operands: usize,
    }

    impl Visitor for CallCounter {
        fn visit_call(&mut self, call: &CallTerm, location: Location) {
            self.calls += 1;
            self.super_call(call, location);
        }

        fn visit_operand(&mut self, _op: &Operand, _location: Location) {
            self.operands += 1;
        }
    }

    #[test]
    fn test_visitor_counts_calls() {
        let mut builder = FunctionBuilder::new("f", Ty::Void);
        let cont = builder.new_block();
        builder.call(
            Operand::constant(Constant::global("g")),
            FnSig::new(vec![Ty::Int(32)], Ty::Void),
            vec![Operand::constant(Constant::int(32, 7))],
            None,
            Some(cont),
        );
        builder.switch_to(cont);
        builder.ret(None);

        let func = builder.finish();
        let mut counter = CallCounter { calls: 0, operands: 0 };
        counter.visit_body(func.body.as_ref().unwrap());
        assert_eq!(counter.calls, 1);
        // callee + one argument
        assert_eq!(counter.operands, 2);
    }
}
