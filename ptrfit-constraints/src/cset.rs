// Constraint values and the owning store.

use crate::atoms::{Atom, ConstAtom, ConstraintKey, VarInfo, VarKind};
use ptrfit_ast::SourceLoc;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// An inequality `lhs >= rhs` in one of the two sub-orders. The reason and
/// location are diagnostic payload; they do not participate in the store's
/// deduplication except for the reason string, which distinguishes
/// constraints that must be independently removable.
#[derive(Debug, Clone)]
pub struct Geq {
    pub lhs: Atom,
    pub rhs: Atom,
    pub reason: String,
    pub loc: Option<SourceLoc>,
    /// True for the checked/unchecked sub-order, false for pointer-type
    pub checked: bool,
}

impl Geq {
    pub fn new(lhs: Atom, rhs: Atom, reason: &str, loc: Option<SourceLoc>, checked: bool) -> Self {
        Self {
            lhs,
            rhs,
            reason: reason.to_string(),
            loc,
            checked,
        }
    }
}

impl PartialEq for Geq {
    fn eq(&self, other: &Self) -> bool {
        self.lhs == other.lhs
            && self.rhs == other.rhs
            && self.checked == other.checked
            && self.reason == other.reason
    }
}

impl Eq for Geq {}

impl Hash for Geq {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lhs.hash(state);
        self.rhs.hash(state);
        self.checked.hash(state);
        self.reason.hash(state);
    }
}

impl fmt::Display for Geq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} >= {} [{}]",
            self.lhs,
            self.rhs,
            if self.checked { "checked" } else { "ptype" }
        )
    }
}

/// A conditional constraint: if the premise holds under the current
/// assignment, the conclusion becomes active. Premise and conclusion must
/// both relate a variable (lhs) to a constant (rhs).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Implies {
    pub premise: Geq,
    pub conclusion: Geq,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    Geq(Geq),
    Implies(Implies),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("implication premise must relate a variable to a constant")]
    MalformedPremise,
    #[error("implication conclusion must relate a variable to a constant")]
    MalformedConclusion,
    #[error("atom {0} is not registered in this environment")]
    UnknownAtom(ConstraintKey),
}

/// The constraint store: owns every variable atom, every constraint, and the
/// solution environment. Constraint slots are never reused; removal marks a
/// slot free so identities stay stable across interactive re-solving.
#[derive(Debug)]
pub struct Constraints {
    vars: Vec<VarInfo>,
    /// Per-variable `(checked, ptr_type)` solution
    env: Vec<(ConstAtom, ConstAtom)>,
    slots: Vec<Option<Constraint>>,
    index: HashMap<Constraint, usize>,
    by_reason: HashMap<String, BTreeSet<usize>>,
    /// Whether the pointer-type sub-order is being solved at all
    all_types: bool,
    /// Omit reverse checked edges for Wild-to-Safe assignments
    pub(crate) disable_reverse_edges: bool,
    /// Which sub-order assignment queries read (solver-internal)
    pub(crate) use_checked: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Constraints {
    pub fn new(all_types: bool, disable_reverse_edges: bool) -> Self {
        Self {
            vars: Vec::new(),
            env: Vec::new(),
            slots: Vec::new(),
            index: HashMap::new(),
            by_reason: HashMap::new(),
            all_types,
            disable_reverse_edges,
            use_checked: true,
        }
    }

    pub fn all_types(&self) -> bool {
        self.all_types
    }

    /// Allocate and register a fresh variable atom.
    pub fn fresh_var(&mut self, name: &str, kind: VarKind) -> Atom {
        let key = self.vars.len() as ConstraintKey;
        self.vars.push(VarInfo {
            name: name.to_string(),
            kind,
        });
        self.env.push((ConstAtom::Ptr, ConstAtom::Ptr));
        Atom::Var(key)
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn var_info(&self, key: ConstraintKey) -> Option<&VarInfo> {
        self.vars.get(key as usize)
    }

    /// With the pointer-type pass disabled, a lower bound in the ptr-type
    /// sub-order against anything above `Ptr` is not representable; the only
    /// faithful translation is to keep the pointer unchecked.
    fn edit_hook(&self, geq: Geq) -> Geq {
        if self.all_types || geq.checked {
            return geq;
        }
        if geq.lhs.is_var() && geq.rhs.is_var() {
            return geq;
        }
        if let (Some(_), Some(c)) = (geq.lhs.as_var(), geq.rhs.as_const()) {
            if c != ConstAtom::Ptr {
                return Geq {
                    rhs: Atom::WILD,
                    checked: true,
                    ..geq
                };
            }
        }
        geq
    }

    /// Insert a `Geq`; returns false if a structurally equal constraint is
    /// already present.
    pub fn add_geq(&mut self, geq: Geq) -> bool {
        let geq = self.edit_hook(geq);
        self.insert(Constraint::Geq(geq))
    }

    /// Insert an `Implies` after validating its shape.
    pub fn add_implies(&mut self, premise: Geq, conclusion: Geq) -> Result<bool, StoreError> {
        if premise.lhs.as_var().is_none() || premise.rhs.as_const().is_none() {
            return Err(StoreError::MalformedPremise);
        }
        if conclusion.lhs.as_var().is_none() || conclusion.rhs.as_const().is_none() {
            return Err(StoreError::MalformedConclusion);
        }
        Ok(self.insert(Constraint::Implies(Implies {
            premise,
            conclusion,
        })))
    }

    fn insert(&mut self, c: Constraint) -> bool {
        if self.index.contains_key(&c) {
            return false;
        }
        let slot = self.slots.len();
        if let Constraint::Geq(g) = &c {
            if !g.reason.is_empty() {
                self.by_reason
                    .entry(g.reason.clone())
                    .or_default()
                    .insert(slot);
            }
        }
        self.index.insert(c.clone(), slot);
        self.slots.push(Some(c));
        true
    }

    /// Remove one constraint; the slot is marked free, not reused.
    pub fn remove_geq(&mut self, geq: &Geq) -> bool {
        let key = Constraint::Geq(geq.clone());
        if let Some(slot) = self.index.remove(&key) {
            if let Some(set) = self.by_reason.get_mut(&geq.reason) {
                set.remove(&slot);
            }
            if let Some(s) = self.slots.get_mut(slot) {
                *s = None;
            }
            return true;
        }
        false
    }

    /// Remove every constraint recorded under `reason`; returns the removed
    /// constraints so callers can report or restore them.
    pub fn remove_by_reason(&mut self, reason: &str) -> Vec<Geq> {
        let mut removed = Vec::new();
        if let Some(slots) = self.by_reason.remove(reason) {
            for slot in slots {
                if let Some(entry) = self.slots.get_mut(slot) {
                    if let Some(Constraint::Geq(g)) = entry.take() {
                        self.index.remove(&Constraint::Geq(g.clone()));
                        removed.push(g);
                    }
                }
            }
        }
        removed
    }

    /// Find the wild lower bound on a variable in the checked sub-order.
    pub fn wild_bound_for(&self, key: ConstraintKey) -> Option<Geq> {
        self.live_constraints().find_map(|c| match c {
            Constraint::Geq(g)
                if g.checked && g.lhs == Atom::Var(key) && g.rhs == Atom::WILD =>
            {
                Some(g.clone())
            }
            _ => None,
        })
    }

    pub fn live_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn constraint_count(&self) -> usize {
        self.index.len()
    }

    /// Restore every variable to `(Ptr, Ptr)` without forgetting constraints.
    pub fn reset_environment(&mut self) {
        for sol in &mut self.env {
            *sol = (ConstAtom::Ptr, ConstAtom::Ptr);
        }
        self.use_checked = true;
    }

    /// True when every variable still holds the default solution.
    pub fn environment_is_default(&self) -> bool {
        self.env
            .iter()
            .all(|sol| *sol == (ConstAtom::Ptr, ConstAtom::Ptr))
    }

    /// Resolve an atom under the sub-order currently being solved.
    pub(crate) fn assignment(&self, atom: Atom) -> ConstAtom {
        match atom {
            Atom::Const(c) => c,
            Atom::Var(k) => {
                let sol = self.env.get(k as usize).copied().unwrap_or((
                    ConstAtom::Ptr,
                    ConstAtom::Ptr,
                ));
                if self.use_checked {
                    sol.0
                } else {
                    sol.1
                }
            }
        }
    }

    pub(crate) fn assign(&mut self, key: ConstraintKey, value: ConstAtom) {
        if let Some(sol) = self.env.get_mut(key as usize) {
            if self.use_checked {
                sol.0 = value;
            } else {
                sol.1 = value;
            }
        }
    }

    /// Reset the current-sub-order solution of every variable matching the
    /// predicate; returns the keys left untouched (used to seed worklists).
    pub(crate) fn reset_solution<F>(&mut self, pred: F, value: ConstAtom) -> BTreeSet<ConstraintKey>
    where
        F: Fn(&VarInfo) -> bool,
    {
        let mut unchanged = BTreeSet::new();
        for (i, info) in self.vars.iter().enumerate() {
            let key = i as ConstraintKey;
            if pred(info) {
                if let Some(sol) = self.env.get_mut(i) {
                    if self.use_checked {
                        sol.0 = value;
                    } else {
                        sol.1 = value;
                    }
                }
            } else {
                unchanged.insert(key);
            }
        }
        unchanged
    }

    /// Copy the pointer-type solution over the checked one for every
    /// variable that stayed checked.
    pub(crate) fn merge_ptr_types(&mut self) {
        self.use_checked = true;
        for sol in &mut self.env {
            if sol.0 != ConstAtom::Wild {
                sol.0 = sol.1;
            }
        }
    }

    /// Published solution of an atom in the checked dimension (after
    /// solving, this is the merged kind).
    pub fn solution(&self, atom: Atom) -> ConstAtom {
        match atom {
            Atom::Const(c) => c,
            Atom::Var(k) => self
                .env
                .get(k as usize)
                .map(|s| s.0)
                .unwrap_or(ConstAtom::Ptr),
        }
    }

    /// Pointer-type dimension solution, mainly for inspection in tests.
    pub fn ptype_solution(&self, atom: Atom) -> ConstAtom {
        match atom {
            Atom::Const(c) => c,
            Atom::Var(k) => self
                .env
                .get(k as usize)
                .map(|s| s.1)
                .unwrap_or(ConstAtom::Ptr),
        }
    }

}

pub(crate) fn is_non_param(info: &VarInfo) -> bool {
    info.kind != VarKind::Param
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_geq() {
        let mut cs = Constraints::new(true, false);
        let q = cs.fresh_var("q", VarKind::Other);
        assert!(cs.add_geq(Geq::new(q, Atom::WILD, "cast", None, true)));
        assert!(!cs.add_geq(Geq::new(q, Atom::WILD, "cast", None, true)));
        // A different reason is a different constraint.
        assert!(cs.add_geq(Geq::new(q, Atom::WILD, "union field", None, true)));
        assert_eq!(cs.constraint_count(), 2);
    }

    #[test]
    fn test_remove_by_reason() {
        let mut cs = Constraints::new(true, false);
        let q = cs.fresh_var("q", VarKind::Other);
        let r = cs.fresh_var("r", VarKind::Other);
        cs.add_geq(Geq::new(q, Atom::WILD, "cast", None, true));
        cs.add_geq(Geq::new(r, Atom::WILD, "cast", None, true));
        cs.add_geq(Geq::new(r, Atom::ARR, "arith", None, false));

        let removed = cs.remove_by_reason("cast");
        assert_eq!(removed.len(), 2);
        assert_eq!(cs.constraint_count(), 1);
        assert!(cs.remove_by_reason("cast").is_empty());
    }

    #[test]
    fn test_implies_shape_check() {
        let mut cs = Constraints::new(true, false);
        let q = cs.fresh_var("q", VarKind::Other);
        let r = cs.fresh_var("r", VarKind::Other);

        let ok = cs.add_implies(
            Geq::new(q, Atom::WILD, "", None, true),
            Geq::new(r, Atom::WILD, "", None, true),
        );
        assert!(ok.is_ok());

        let bad = cs.add_implies(
            Geq::new(Atom::WILD, q, "", None, true),
            Geq::new(r, Atom::WILD, "", None, true),
        );
        assert!(matches!(bad, Err(StoreError::MalformedPremise)));
    }

    #[test]
    fn test_edit_hook_without_all_types() {
        // With the ptr-type pass disabled, `q >= ARR` in the ptype sub-order
        // is not representable and collapses to a checked wild bound.
        let mut cs = Constraints::new(false, false);
        let q = cs.fresh_var("q", VarKind::Other);
        cs.add_geq(Geq::new(q, Atom::ARR, "arith", None, false));

        let stored: Vec<_> = cs.live_constraints().collect();
        match stored.as_slice() {
            [Constraint::Geq(g)] => {
                assert!(g.checked);
                assert_eq!(g.rhs, Atom::WILD);
            }
            other => panic!("unexpected store contents: {:?}", other),
        }
    }

    #[test]
    fn test_reset_environment_keeps_constraints() {
        let mut cs = Constraints::new(true, false);
        let q = cs.fresh_var("q", VarKind::Other);
        cs.add_geq(Geq::new(q, Atom::WILD, "cast", None, true));
        cs.solve();
        assert_eq!(cs.solution(q), ConstAtom::Wild);

        cs.reset_environment();
        assert!(cs.environment_is_default());
        assert_eq!(cs.constraint_count(), 1);
    }
}
