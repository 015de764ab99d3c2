// Array-bounds entities: keys, scoped program variables, and bound shapes.

pub mod flow;
pub mod info;

pub use info::AVarBoundsInfo;

use std::fmt;

/// Handle for a value whose use as a pointer length is being tracked.
/// Every pointer- or array-typed declaration gets one, as do integer
/// constants and synthesized temporaries.
pub type BoundsKey = u32;

/// Lexical scope of a program variable. Bounds may only relate values that
/// can see each other, so scope comparison gates all propagation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgramVarScope {
    Global,
    Function {
        name: String,
        is_static: bool,
    },
    FunctionParam {
        name: String,
        is_static: bool,
    },
    Struct {
        name: String,
    },
    /// One call site's instantiation of a callee parameter or return
    CtxFunctionArg {
        func: String,
        call: ptrfit_ast::SourceLoc,
    },
    /// One access site's instantiation of a struct field
    CtxStruct {
        access: ptrfit_ast::SourceLoc,
    },
}

impl ProgramVarScope {
    /// Whether a value in `self` can be named from `dst`. A function body
    /// sees its own parameters; everything else requires the same scope.
    pub fn visible_from(&self, dst: &ProgramVarScope) -> bool {
        if self == dst {
            return true;
        }
        match (dst, self) {
            (
                ProgramVarScope::Function {
                    name: fname,
                    is_static: fstatic,
                },
                ProgramVarScope::FunctionParam { name, is_static },
            ) => fname == name && fstatic == is_static,
            _ => false,
        }
    }
}

impl fmt::Display for ProgramVarScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramVarScope::Global => write!(f, "global"),
            ProgramVarScope::Function { name, .. } => write!(f, "function {}", name),
            ProgramVarScope::FunctionParam { name, .. } => write!(f, "params of {}", name),
            ProgramVarScope::Struct { name } => write!(f, "struct {}", name),
            ProgramVarScope::CtxFunctionArg { func, call } => {
                write!(f, "call of {} at {}", func, call)
            }
            ProgramVarScope::CtxStruct { access } => write!(f, "field access at {}", access),
        }
    }
}

/// A named, scoped value participating in bounds inference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramVar {
    pub key: BoundsKey,
    pub name: String,
    pub scope: ProgramVarScope,
    pub is_constant: bool,
}

impl ProgramVar {
    pub fn new(key: BoundsKey, name: &str, scope: ProgramVarScope) -> Self {
        Self {
            key,
            name: name.to_string(),
            scope,
            is_constant: false,
        }
    }

    pub fn constant(key: BoundsKey, value: u64) -> Self {
        Self {
            key,
            name: value.to_string(),
            scope: ProgramVarScope::Global,
            is_constant: true,
        }
    }

    /// Numeric value of a constant variable
    pub fn const_value(&self) -> Option<u64> {
        if self.is_constant {
            self.name.parse().ok()
        } else {
            None
        }
    }
}

/// Sources of bounds, least to greatest priority when competing for the
/// same pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundsPriority {
    Declared,
    Allocator,
    FlowInferred,
    Heuristics,
}

impl BoundsPriority {
    /// Highest priority first, the order lookups walk.
    pub const PRIO_LIST: [BoundsPriority; 4] = [
        BoundsPriority::Declared,
        BoundsPriority::Allocator,
        BoundsPriority::FlowInferred,
        BoundsPriority::Heuristics,
    ];
}

/// Kind tag for a bound, used when intersecting candidate sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundsKind {
    Count,
    CountPlusOne,
    ByteCount,
    Range,
}

/// A bound attached to a pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ABounds {
    /// Number of elements
    Count(BoundsKey),
    /// Number of elements minus one is valid, i.e. `count(n + 1)`
    CountPlusOne(BoundsKey),
    /// Number of bytes
    ByteCount(BoundsKey),
    /// Element range between two pointers. Deliberately incomplete; only
    /// usable with the `range-bounds` feature.
    Range(BoundsKey, BoundsKey),
}

impl ABounds {
    pub fn kind(&self) -> BoundsKind {
        match self {
            ABounds::Count(_) => BoundsKind::Count,
            ABounds::CountPlusOne(_) => BoundsKind::CountPlusOne,
            ABounds::ByteCount(_) => BoundsKind::ByteCount,
            ABounds::Range(_, _) => BoundsKind::Range,
        }
    }

    /// The key holding the length value. Range bounds have no single key.
    pub fn bounds_key(&self) -> Option<BoundsKey> {
        match self {
            ABounds::Count(k) | ABounds::CountPlusOne(k) | ABounds::ByteCount(k) => Some(*k),
            ABounds::Range(_, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(BoundsPriority::Declared < BoundsPriority::Allocator);
        assert!(BoundsPriority::Allocator < BoundsPriority::FlowInferred);
        assert!(BoundsPriority::FlowInferred < BoundsPriority::Heuristics);
    }

    #[test]
    fn test_const_value() {
        let v = ProgramVar::constant(1, 42);
        assert_eq!(v.const_value(), Some(42));
        let v = ProgramVar::new(2, "n", ProgramVarScope::Global);
        assert_eq!(v.const_value(), None);
    }

    #[test]
    fn test_range_has_no_single_key() {
        assert_eq!(ABounds::Range(1, 2).bounds_key(), None);
        assert_eq!(ABounds::Count(3).bounds_key(), Some(3));
    }
}
