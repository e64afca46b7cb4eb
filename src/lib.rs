//! # Previrt
//!
//! Whole-program partial evaluation for a typed module IR: specialize a
//! library module against a declared component interface, strip what the
//! interface does not need, and rewrite clients to use the specialized
//! entry points. An orthogonal pass devirtualizes indirect calls into
//! bounded dispatches.
//!
//! ## Pipeline
//!
//! ```text
//! interface files ──┐
//!                   ▼
//! M_lib ──► minimize ──► specialize ──► M_lib' + transform file
//!                                              │
//! M_client ──────────────► rewrite ◄───────────┘
//! ```
//!
//! An offline specializer run on the library emits the reduced module plus
//! a rewrite manifest; a later rewriter run applies that manifest to each
//! client. Devirtualization ([`devirt`]) and invariant-based pruning
//! ([`invariants`]) run as standalone module passes.
//!
//! Every pass takes the module by `&mut` and returns whether it changed
//! anything; failures at individual call sites or symbols are logged and
//! skipped, never fatal.
//!
//! ## Quick Start
//!
//! ```rust
//! use previrt::interface::{CallInfo, ComponentInterface, ConcreteArg};
//! use previrt::interface::ComponentInterfaceTransform;
//! use previrt::specialize::{specialize_module, AggressivePolicy};
//! use previrt::ir::{FunctionBuilder, Operand, Rvalue, BinOp, Ty};
//!
//! // int add(int a, int b) { return a + b; }
//! let mut module = previrt::ir::Module::new("lib");
//! let mut f = FunctionBuilder::new("add", Ty::Int(32));
//! let a = f.add_param(Ty::Int(32), Some("a"));
//! let b = f.add_param(Ty::Int(32), Some("b"));
//! let sum = f.new_local(Ty::Int(32));
//! f.assign(sum, Rvalue::Binary {
//!     op: BinOp::Add,
//!     lhs: Operand::Local(a),
//!     rhs: Operand::Local(b),
//! });
//! f.ret(Some(Operand::Local(sum)));
//! module.add_function(f.finish());
//!
//! // callers were observed invoking add(3, ?)
//! let mut interface = ComponentInterface::new();
//! interface.add_call("add", CallInfo::new(vec![
//!     ConcreteArg::Int { bits: 32, value: 3 },
//!     ConcreteArg::Unknown,
//! ]));
//!
//! let mut transform = ComponentInterfaceTransform::new(interface);
//! assert!(specialize_module(&mut module, &mut transform, &AggressivePolicy));
//! assert!(module.function("add.spec.0").is_some());
//! ```
//!
//! ## Module Overview
//!
//! - [`ir`] - The typed module IR the passes operate on
//! - [`interface`] - Component interfaces, transforms, manifest files
//! - [`callgraph`] - Direct-call graph with cycle detection
//! - [`specialize`] - Partial-application cloning and its policies
//! - [`minimize`] - Interface-driven internalization and dead-code removal
//! - [`rewrite`] - Applying a transform to client modules
//! - [`devirt`] - Indirect-call resolution and dispatch rewriting
//! - [`invariants`] - Invariant-driven unreachable-block pruning

pub mod callgraph;
pub mod devirt;
pub mod interface;
pub mod invariants;
pub mod ir;
pub mod minimize;
pub mod rewrite;
pub mod specialize;

// Re-export commonly used types
pub use callgraph::CallGraph;
pub use devirt::{DevirtOptions, Devirtualizer};
pub use interface::{CallInfo, ComponentInterface, ComponentInterfaceTransform, ConcreteArg};
pub use ir::Module;
pub use minimize::minimize_module;
pub use rewrite::{rewrite_module, RewriteStrategy};
pub use specialize::{specialize_module, AggressivePolicy, RecursiveGuard};
