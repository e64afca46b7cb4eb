//! # Interface & Transform Model
//!
//! Data model for the three manifest artifacts that flow between passes:
//!
//! - [`ComponentInterface`] - how a module is used by its callers
//!   (observed call argument tuples, referenced symbols)
//! - [`ComponentInterfaceTransform`] - an interface plus the rewrite rules
//!   produced by specializing against it
//! - the versioned JSON files both are persisted as ([`manifest`])
//!
//! Interfaces are read-only during rewriting and append-only during
//! specialization.

pub mod call_info;
pub mod manifest;
pub mod transform;

pub use call_info::{CallInfo, ComponentInterface, ConcreteArg, MaterializeError};
pub use manifest::{
    load_interface, load_transform, store_interface, store_transform, ManifestError,
    MANIFEST_VERSION,
};
pub use transform::{CallRewrite, ComponentInterfaceTransform, RewriteRule};
