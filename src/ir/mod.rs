//! # Typed Module IR
//!
//! A compact control-flow-graph IR for whole modules, shaped like a
//! conventional compiler mid-level representation:
//!
//! ```text
//! Module
//! ├── Function (signature, linkage, optional body)
//! │   └── FunctionBody
//! │       ├── Locals (explicit parameter list)
//! │       └── BasicBlockData
//! │           ├── Vec<Statement>
//! │           └── Terminator (jump, branch, return, call/invoke)
//! ├── Global (type, linkage, optional initializer)
//! └── GlobalAlias
//! ```
//!
//! Cross-references between symbols are by name, so the container has no
//! cyclic ownership. Calls and invokes are block terminators, which keeps
//! unwind edges explicit and makes a call site addressable as
//! `(function, block)`.
//!
//! ## Module Structure
//!
//! - [`types`] - Types, signatures, constants
//! - [`module`] - Module, functions, globals, linkage
//! - [`body`] - Function bodies and the CFG
//! - [`builder`] - Incremental function construction
//! - [`visitor`] - Read-only traversal

pub mod body;
pub mod builder;
pub mod module;
pub mod types;
pub mod visitor;

pub use body::{
    BasicBlockData, BinOp, BlockId, CallTerm, Callee, DebugLoc, FunctionBody, Local, LocalId,
    Operand, Rvalue, Statement, StatementKind, Terminator, TerminatorKind,
};
pub use builder::FunctionBuilder;
pub use module::{
    collect_constant_globals, Function, Global, GlobalAlias, Linkage, Module, ENTRY_POINT,
    INTRINSIC_PREFIX,
};
pub use types::{CallConv, Constant, FnSig, Ty};
pub use visitor::{Location, Visitor};
