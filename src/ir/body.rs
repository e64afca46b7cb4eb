//! # Function Bodies
//!
//! A function body is a control-flow graph of basic blocks. Each block
//! carries a list of statements and a single terminator; calls and invokes
//! are terminators so that unwind edges are explicit in the CFG.
//!
//! Parameters are an explicit list of locals rather than a positional
//! convention, which lets the specializer drop bound parameters from a
//! clone's signature without renumbering the locals its body refers to.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{CallConv, Constant, FnSig, Ty};

// ============================================================================
// Identifiers
// ============================================================================

/// A unique identifier for a local value within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(pub u32);

impl LocalId {
    pub const fn new(id: u32) -> Self {
        LocalId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A unique identifier for a basic block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The entry block ID (always 0).
    pub const ENTRY: BlockId = BlockId(0);

    pub const fn new(id: u32) -> Self {
        BlockId(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A local value slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Local {
    pub id: LocalId,
    pub ty: Ty,
    pub name: Option<String>,
}

/// A source location carried through rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLoc {
    pub line: u32,
    pub col: u32,
}

// ============================================================================
// Operands, rvalues, statements
// ============================================================================

/// A read-only input to an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Local(LocalId),
    Constant(Constant),
}

impl Operand {
    pub fn constant(c: Constant) -> Self {
        Operand::Constant(c)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Operand::Constant(c) => Some(c),
            Operand::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Operand::Local(id) => Some(*id),
            Operand::Constant(_) => None,
        }
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
}

/// The right-hand side of an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Rvalue {
    Use(Operand),
    Binary { op: BinOp, lhs: Operand, rhs: Operand },
    Load(Operand),
}

/// A statement in a basic block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub debug_loc: Option<DebugLoc>,
}

impl Statement {
    pub fn new(kind: StatementKind) -> Self {
        Self { kind, debug_loc: None }
    }
}

/// The kind of a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatementKind {
    /// `dest = rvalue`
    Assign { dest: LocalId, rvalue: Rvalue },
    /// `*ptr = value`
    Store { ptr: Operand, value: Operand },
    /// Placeholder for removed statements.
    Nop,
}

// ============================================================================
// Terminators
// ============================================================================

/// A terminator ends a basic block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminator {
    pub kind: TerminatorKind,
    pub debug_loc: Option<DebugLoc>,
}

impl Terminator {
    pub fn new(kind: TerminatorKind) -> Self {
        Self { kind, debug_loc: None }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.kind.successors()
    }
}

/// The callee position of a call: a first-class value, or inline assembly.
///
/// Inline assembly is opaque to every pass here; rewriters and the
/// devirtualizer skip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Callee {
    Value(Operand),
    Asm(String),
}

impl Callee {
    pub fn as_value(&self) -> Option<&Operand> {
        match self {
            Callee::Value(op) => Some(op),
            Callee::Asm(_) => None,
        }
    }
}

/// A call or invoke terminator.
///
/// `unwind: Some(_)` makes this an invoke; `target` is the normal
/// continuation in either case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTerm {
    pub callee: Callee,
    /// The call-site signature (the apparent type the callee is called at).
    pub sig: FnSig,
    pub args: Vec<Operand>,
    /// Where the return value is bound, if it is used.
    pub dest: Option<LocalId>,
    pub target: Option<BlockId>,
    pub unwind: Option<BlockId>,
    pub conv: CallConv,
}

impl CallTerm {
    /// Check if this call has an unwind edge.
    pub fn is_invoke(&self) -> bool {
        self.unwind.is_some()
    }

    /// The directly-named callee, looking through constant casts.
    pub fn callee_global(&self) -> Option<&str> {
        self.callee.as_value()?.as_constant()?.as_global()
    }
}

/// The kind of a terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TerminatorKind {
    Jump { target: BlockId },
    Branch { cond: Operand, then_blk: BlockId, else_blk: BlockId },
    Return { value: Option<Operand> },
    Unreachable,
    Call(CallTerm),
}

impl TerminatorKind {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TerminatorKind::Jump { target } => vec![*target],
            TerminatorKind::Branch { then_blk, else_blk, .. } => vec![*then_blk, *else_blk],
            TerminatorKind::Return { .. } | TerminatorKind::Unreachable => vec![],
            TerminatorKind::Call(call) => {
                let mut succs = Vec::new();
                if let Some(t) = call.target {
                    succs.push(t);
                }
                if let Some(u) = call.unwind {
                    succs.push(u);
                }
                succs
            }
        }
    }

    fn remap_blocks(&mut self, map: &dyn Fn(BlockId) -> BlockId) {
        match self {
            TerminatorKind::Jump { target } => *target = map(*target),
            TerminatorKind::Branch { then_blk, else_blk, .. } => {
                *then_blk = map(*then_blk);
                *else_blk = map(*else_blk);
            }
            TerminatorKind::Return { .. } | TerminatorKind::Unreachable => {}
            TerminatorKind::Call(call) => {
                if let Some(t) = call.target.as_mut() {
                    *t = map(*t);
                }
                if let Some(u) = call.unwind.as_mut() {
                    *u = map(*u);
                }
            }
        }
    }
}

// ============================================================================
// Basic blocks and bodies
// ============================================================================

/// A basic block: statements followed by a single terminator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlockData {
    pub statements: Vec<Statement>,
    pub terminator: Option<Terminator>,
}

impl BasicBlockData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match &self.terminator {
            Some(term) => term.successors(),
            None => vec![],
        }
    }
}

/// A function body: locals, an explicit parameter list, and the CFG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionBody {
    pub locals: Vec<Local>,
    /// Locals bound to the function's parameters, in declaration order.
    pub params: Vec<LocalId>,
    pub blocks: Vec<BasicBlockData>,
}

impl FunctionBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new local and return its ID.
    pub fn new_local(&mut self, ty: Ty, name: Option<String>) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.push(Local { id, ty, name });
        id
    }

    pub fn local_ty(&self, id: LocalId) -> Option<&Ty> {
        self.locals.get(id.index()).map(|l| &l.ty)
    }

    /// Allocate a new basic block and return its ID.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlockData::new());
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlockData> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlockData> {
        self.blocks.get_mut(id.index())
    }

    /// Iterate over all blocks with their IDs.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlockData)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, bb)| (BlockId::new(i as u32), bb))
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    pub fn push_statement(&mut self, block: BlockId, stmt: Statement) {
        if let Some(bb) = self.block_mut(block) {
            bb.statements.push(stmt);
        }
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        if let Some(bb) = self.block_mut(block) {
            bb.terminator = Some(term);
        }
    }

    /// Apply `f` to every operand in the body.
    pub fn for_each_operand(&self, f: &mut dyn FnMut(&Operand)) {
        for bb in &self.blocks {
            for stmt in &bb.statements {
                match &stmt.kind {
                    StatementKind::Assign { rvalue, .. } => match rvalue {
                        Rvalue::Use(op) | Rvalue::Load(op) => f(op),
                        Rvalue::Binary { lhs, rhs, .. } => {
                            f(lhs);
                            f(rhs);
                        }
                    },
                    StatementKind::Store { ptr, value } => {
                        f(ptr);
                        f(value);
                    }
                    StatementKind::Nop => {}
                }
            }
            if let Some(term) = &bb.terminator {
                match &term.kind {
                    TerminatorKind::Branch { cond, .. } => f(cond),
                    TerminatorKind::Return { value: Some(op) } => f(op),
                    TerminatorKind::Call(call) => {
                        if let Callee::Value(op) = &call.callee {
                            f(op);
                        }
                        for arg in &call.args {
                            f(arg);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Apply `f` to every operand in the body, mutably.
    pub fn for_each_operand_mut(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        for bb in &mut self.blocks {
            for stmt in &mut bb.statements {
                match &mut stmt.kind {
                    StatementKind::Assign { rvalue, .. } => match rvalue {
                        Rvalue::Use(op) | Rvalue::Load(op) => f(op),
                        Rvalue::Binary { lhs, rhs, .. } => {
                            f(lhs);
                            f(rhs);
                        }
                    },
                    StatementKind::Store { ptr, value } => {
                        f(ptr);
                        f(value);
                    }
                    StatementKind::Nop => {}
                }
            }
            if let Some(term) = &mut bb.terminator {
                match &mut term.kind {
                    TerminatorKind::Branch { cond, .. } => f(cond),
                    TerminatorKind::Return { value: Some(op) } => f(op),
                    TerminatorKind::Call(call) => {
                        if let Callee::Value(op) = &mut call.callee {
                            f(op);
                        }
                        for arg in &mut call.args {
                            f(arg);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Compute which blocks are reachable from the entry block.
    pub fn reachable_blocks(&self) -> Vec<bool> {
        let mut visited = vec![false; self.blocks.len()];
        if self.blocks.is_empty() {
            return visited;
        }
        let mut worklist = vec![BlockId::ENTRY];
        while let Some(bb) = worklist.pop() {
            if visited[bb.index()] {
                continue;
            }
            visited[bb.index()] = true;
            if let Some(block) = self.block(bb) {
                for succ in block.successors() {
                    if !visited[succ.index()] {
                        worklist.push(succ);
                    }
                }
            }
        }
        visited
    }

    /// Delete blocks unreachable from the entry and renumber the rest.
    ///
    /// Returns true if any block was removed.
    pub fn remove_unreachable_blocks(&mut self) -> bool {
        let reachable = self.reachable_blocks();
        if reachable.iter().all(|&r| r) {
            return false;
        }

        let mut remap = vec![BlockId::ENTRY; self.blocks.len()];
        let mut next = 0u32;
        for (i, &live) in reachable.iter().enumerate() {
            if live {
                remap[i] = BlockId::new(next);
                next += 1;
            }
        }

        let mut keep = reachable.iter().copied();
        self.blocks.retain(|_| keep.next().unwrap_or(false));

        for bb in &mut self.blocks {
            if let Some(term) = &mut bb.terminator {
                term.kind.remap_blocks(&|id| remap[id.index()]);
            }
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
