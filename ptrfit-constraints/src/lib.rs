// Constraint system for checked-pointer kind inference.
//
// Pointer kinds form a small lattice (PTR < ARR < NTARR < WILD). Every
// pointer indirection level in the program gets an atom; program constructs
// assert inequalities between atoms, and the solver computes a least (or
// greatest) fixed point over the resulting graph. Checked-ness and pointer
// type are solved as two independent sub-orders sharing the same atoms.

pub mod atoms;
pub mod cset;
pub mod graph;
pub mod solver;

pub use atoms::{Atom, ConstAtom, ConstraintKey, VarInfo, VarKind};
pub use cset::{Constraint, Constraints, Geq, Implies, StoreError};
pub use graph::{ConstraintGraph, DiGraph, SubOrder};
