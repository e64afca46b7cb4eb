//! # Component Interfaces
//!
//! A component interface is a declarative summary of how a module is used
//! by its callers: the argument tuples observed at calls to each exported
//! function, plus the set of symbols referenced without being called.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{Constant, Module, Operand, Ty};

// ============================================================================
// Concrete arguments
// ============================================================================

/// A compile-time-known value observed in a call, or `Unknown` when the
/// slot is unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConcreteArg {
    Int { bits: u32, value: i128 },
    Float { value: f64 },
    Null,
    Undef,
    Global(String),
    Aggregate(Vec<ConcreteArg>),
    Unknown,
}

/// Failure to coerce a concrete argument to a parameter type.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("integer value {value} does not fit in {ty}")]
    IntOutOfRange { value: i128, ty: Ty },

    #[error("cannot coerce {kind} argument to type {ty}")]
    Incompatible { kind: &'static str, ty: Ty },

    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),

    #[error("an unconstrained argument cannot be materialized")]
    Unconstrained,
}

fn int_fits(value: i128, bits: u32) -> bool {
    if bits == 0 {
        return false;
    }
    if bits >= 128 {
        return true;
    }
    // accept both signed and unsigned interpretations of the width
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << bits) - 1;
    value >= min && value <= max
}

impl ConcreteArg {
    /// Check if this argument constrains its slot.
    pub fn is_known(&self) -> bool {
        !matches!(self, ConcreteArg::Unknown)
    }

    /// Materialize this value as a constant of type `ty` in `module`.
    pub fn materialize(&self, module: &Module, ty: &Ty) -> Result<Constant, MaterializeError> {
        match self {
            ConcreteArg::Int { value, .. } => match ty {
                Ty::Int(bits) if int_fits(*value, *bits) => {
                    Ok(Constant::Int { bits: *bits, value: *value })
                }
                Ty::Int(_) => Err(MaterializeError::IntOutOfRange { value: *value, ty: ty.clone() }),
                _ => Err(MaterializeError::Incompatible { kind: "integer", ty: ty.clone() }),
            },
            ConcreteArg::Float { value } => match ty {
                Ty::Float | Ty::Double => Ok(Constant::Float { ty: ty.clone(), value: *value }),
                _ => Err(MaterializeError::Incompatible { kind: "float", ty: ty.clone() }),
            },
            ConcreteArg::Null => {
                if ty.is_pointer() {
                    Ok(Constant::Null)
                } else {
                    Err(MaterializeError::Incompatible { kind: "null", ty: ty.clone() })
                }
            }
            ConcreteArg::Undef => Ok(Constant::Undef(ty.clone())),
            ConcreteArg::Global(name) => {
                if !module.contains_symbol(name) {
                    return Err(MaterializeError::UnknownSymbol(name.clone()));
                }
                match ty {
                    Ty::Ptr => Ok(Constant::Global(name.clone())),
                    Ty::Fn(sig) => match module.function(name) {
                        Some(f) if f.sig == *sig => Ok(Constant::Global(name.clone())),
                        _ => Err(MaterializeError::Incompatible { kind: "global", ty: ty.clone() }),
                    },
                    _ => Err(MaterializeError::Incompatible { kind: "global", ty: ty.clone() }),
                }
            }
            ConcreteArg::Aggregate(elems) => {
                let elem_tys: Vec<&Ty> = match ty {
                    Ty::Array { elem, len } if *len as usize == elems.len() => {
                        elems.iter().map(|_| elem.as_ref()).collect()
                    }
                    Ty::Struct(fields) if fields.len() == elems.len() => fields.iter().collect(),
                    _ => {
                        return Err(MaterializeError::Incompatible {
                            kind: "aggregate",
                            ty: ty.clone(),
                        })
                    }
                };
                let materialized = elems
                    .iter()
                    .zip(elem_tys)
                    .map(|(e, t)| e.materialize(module, t))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Constant::Aggregate { ty: ty.clone(), elems: materialized })
            }
            ConcreteArg::Unknown => Err(MaterializeError::Unconstrained),
        }
    }

    /// Witness matching against a constant actual.
    ///
    /// Integers compare numerically as long as the witness width does not
    /// exceed the actual's declared width; globals compare by symbol name.
    pub fn matches_constant(&self, actual: &Constant) -> bool {
        let actual = actual.strip_casts();
        match (self, actual) {
            (ConcreteArg::Unknown, _) => true,
            (ConcreteArg::Int { bits, value }, Constant::Int { bits: ab, value: av }) => {
                value == av && bits <= ab
            }
            (ConcreteArg::Float { value }, Constant::Float { value: av, .. }) => value == av,
            (ConcreteArg::Null, Constant::Null) => true,
            (ConcreteArg::Undef, Constant::Undef(_)) => true,
            (ConcreteArg::Global(name), Constant::Global(an)) => name == an,
            (ConcreteArg::Aggregate(elems), Constant::Aggregate { elems: actuals, .. }) => {
                elems.len() == actuals.len()
                    && elems
                        .iter()
                        .zip(actuals)
                        .all(|(w, a)| w.matches_constant(a))
            }
            _ => false,
        }
    }

    /// Witness matching against an actual call operand.
    ///
    /// A constrained slot only matches a constant actual.
    pub fn matches(&self, actual: &Operand) -> bool {
        if let ConcreteArg::Unknown = self {
            return true;
        }
        match actual.as_constant() {
            Some(c) => self.matches_constant(c),
            None => false,
        }
    }
}

// ============================================================================
// Call records
// ============================================================================

/// An observed call: one concrete argument per parameter slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub args: Vec<ConcreteArg>,
}

impl CallInfo {
    pub fn new(args: Vec<ConcreteArg>) -> Self {
        Self { args }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Check this record against an actual argument list, slot by slot.
    pub fn matches_args(&self, actual: &[Operand]) -> bool {
        self.args.len() == actual.len()
            && self.args.iter().zip(actual).all(|(w, a)| w.matches(a))
    }
}

// ============================================================================
// Component interface
// ============================================================================

/// Observed calls and references for a component.
///
/// Invariant: every function with recorded calls is also in `references`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentInterface {
    calls: BTreeMap<String, Vec<CallInfo>>,
    references: BTreeSet<String>,
}

impl ComponentInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed call. Duplicate records are kept distinct only
    /// once. Returns true if the record was new.
    pub fn add_call(&mut self, name: &str, call: CallInfo) -> bool {
        debug_assert!(!name.is_empty(), "empty function name in interface");
        self.references.insert(name.to_string());
        let records = self.calls.entry(name.to_string()).or_default();
        if records.contains(&call) {
            return false;
        }
        records.push(call);
        true
    }

    /// Record a referenced (not necessarily called) symbol.
    pub fn add_reference(&mut self, name: &str) {
        debug_assert!(!name.is_empty(), "empty reference name in interface");
        self.references.insert(name.to_string());
    }

    /// Names with recorded calls, in deterministic order.
    pub fn functions(&self) -> impl Iterator<Item = &String> {
        self.calls.keys()
    }

    /// Observed calls for a function (empty if none recorded).
    pub fn calls_for(&self, name: &str) -> &[CallInfo] {
        self.calls.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_called(&self, name: &str) -> bool {
        self.calls.contains_key(name)
    }

    pub fn is_referenced(&self, name: &str) -> bool {
        self.references.contains(name)
    }

    pub fn references(&self) -> impl Iterator<Item = &String> {
        self.references.iter()
    }

    /// Total number of recorded call tuples.
    pub fn call_count(&self) -> usize {
        self.calls.values().map(Vec::len).sum()
    }

    /// Fold another interface into this one.
    pub fn merge(&mut self, other: ComponentInterface) {
        for (name, records) in other.calls {
            for call in records {
                self.add_call(&name, call);
            }
        }
        for name in other.references {
            self.references.insert(name);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FnSig, Function};

    #[test]
    fn test_int_materialize() {
        let module = Module::new("m");
        let arg = ConcreteArg::Int { bits: 8, value: 42 };
        let c = arg.materialize(&module, &Ty::Int(32)).unwrap();
        assert_eq!(c, Constant::int(32, 42));

        let wide = ConcreteArg::Int { bits: 32, value: 300 };
        assert!(wide.materialize(&module, &Ty::Int(8)).is_err());
        assert!(arg.materialize(&module, &Ty::Ptr).is_err());
    }

    #[test]
    fn test_global_materialize_checks_signature() {
        let mut module = Module::new("m");
        let sig = FnSig::new(vec![Ty::Int(32)], Ty::Void);
        module.add_function(Function::new_decl("cb", sig.clone()));

        let arg = ConcreteArg::Global("cb".to_string());
        assert!(arg.materialize(&module, &Ty::Fn(sig)).is_ok());
        assert!(arg.materialize(&module, &Ty::Ptr).is_ok());

        let other = FnSig::new(vec![], Ty::Void);
        assert!(arg.materialize(&module, &Ty::Fn(other)).is_err());
        let missing = ConcreteArg::Global("nope".to_string());
        assert!(missing.materialize(&module, &Ty::Ptr).is_err());
    }

    #[test]
    fn test_witness_matching() {
        let three = ConcreteArg::Int { bits: 8, value: 3 };
        assert!(three.matches(&Operand::constant(Constant::int(32, 3))));
        assert!(!three.matches(&Operand::constant(Constant::int(32, 4))));
        // witness wider than the actual does not match
        let wide = ConcreteArg::Int { bits: 64, value: 3 };
        assert!(!wide.matches(&Operand::constant(Constant::int(32, 3))));
        // non-constant actuals never match a constrained slot
        assert!(!three.matches(&Operand::Local(crate::ir::LocalId::new(0))));
        assert!(ConcreteArg::Unknown.matches(&Operand::Local(crate::ir::LocalId::new(0))));
    }

    #[test]
    fn test_call_info_matches_args() {
        let record = CallInfo::new(vec![
            ConcreteArg::Int { bits: 32, value: 3 },
            ConcreteArg::Unknown,
        ]);
        let args = vec![
            Operand::constant(Constant::int(32, 3)),
            Operand::Local(crate::ir::LocalId::new(1)),
        ];
        assert!(record.matches_args(&args));
        assert!(!record.matches_args(&args[..1]));
    }

    #[test]
    fn test_interface_calls_imply_references() {
        let mut iface = ComponentInterface::new();
        iface.add_call("f", CallInfo::new(vec![]));
        assert!(iface.is_referenced("f"));
        assert!(iface.is_called("f"));

        // duplicates are collapsed
        assert!(!iface.add_call("f", CallInfo::new(vec![])));
        assert_eq!(iface.call_count(), 1);
    }

    #[test]
    fn test_interface_merge() {
        let mut a = ComponentInterface::new();
        a.add_call("f", CallInfo::new(vec![ConcreteArg::Null]));
        let mut b = ComponentInterface::new();
        b.add_call("f", CallInfo::new(vec![ConcreteArg::Null]));
        b.add_call("g", CallInfo::new(vec![]));
        b.add_reference("data");

        a.merge(b);
        assert_eq!(a.call_count(), 2);
        assert!(a.is_referenced("data"));
    }
}
