// Graph form of the constraint set. The solver only ever walks the graph;
// the flat constraint list exists for reason-based invalidation and
// diagnostics.

use crate::atoms::{Atom, ConstAtom};
use crate::cset::Geq;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::Hash;

/// Small directed graph over copyable node ids. Also used by the bounds
/// inference for its value-flow graphs.
#[derive(Debug, Clone)]
pub struct DiGraph<N> {
    succs: HashMap<N, BTreeSet<N>>,
    preds: HashMap<N, BTreeSet<N>>,
}

impl<N> Default for DiGraph<N> {
    fn default() -> Self {
        Self {
            succs: HashMap::new(),
            preds: HashMap::new(),
        }
    }
}

impl<N: Copy + Eq + Hash + Ord> DiGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge; returns false if it was already present.
    pub fn add_edge(&mut self, from: N, to: N) -> bool {
        let inserted = self.succs.entry(from).or_default().insert(to);
        self.preds.entry(to).or_default().insert(from);
        // Make sure both endpoints exist as vertices.
        self.succs.entry(to).or_default();
        self.preds.entry(from).or_default();
        inserted
    }

    pub fn successors(&self, n: N, out: &mut BTreeSet<N>) {
        if let Some(s) = self.succs.get(&n) {
            out.extend(s.iter().copied());
        }
    }

    pub fn predecessors(&self, n: N, out: &mut BTreeSet<N>) {
        if let Some(p) = self.preds.get(&n) {
            out.extend(p.iter().copied());
        }
    }

    pub fn contains(&self, n: N) -> bool {
        self.succs.contains_key(&n)
    }

    pub fn node_count(&self) -> usize {
        self.succs.len()
    }

    /// Visit every node reachable from `start` (excluding `start` unless it
    /// is on a cycle), breadth first.
    pub fn visit_breadth_first<F>(&self, start: N, mut f: F)
    where
        F: FnMut(N),
    {
        let mut seen: BTreeSet<N> = BTreeSet::new();
        let mut queue: VecDeque<N> = VecDeque::new();
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            let mut next = BTreeSet::new();
            self.successors(n, &mut next);
            for s in next {
                if seen.insert(s) {
                    f(s);
                    queue.push_back(s);
                }
            }
        }
    }
}

/// Which sub-order an edge belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOrder {
    Checked,
    PtrType,
}

/// Two sub-graphs (checked and pointer-type) over shared atom vertices, plus
/// the set of constant atoms that seed the solver's worklist.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    checked: DiGraph<Atom>,
    ptype: DiGraph<Atom>,
    const_atoms: BTreeSet<ConstAtom>,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each `Geq(lhs >= rhs)` becomes an edge from the smaller atom to the
    /// larger one in its sub-order.
    pub fn add_geq(&mut self, geq: &Geq) {
        let graph = if geq.checked {
            &mut self.checked
        } else {
            &mut self.ptype
        };
        graph.add_edge(geq.rhs, geq.lhs);
        for atom in [geq.lhs, geq.rhs] {
            if let Atom::Const(c) = atom {
                self.const_atoms.insert(c);
            }
        }
    }

    pub fn const_atoms(&self) -> &BTreeSet<ConstAtom> {
        &self.const_atoms
    }

    /// Neighbors of `atom` in the given sub-order and direction, optionally
    /// restricted to variable atoms.
    pub fn neighbors(
        &self,
        atom: Atom,
        succs: bool,
        order: SubOrder,
        vars_only: bool,
        out: &mut BTreeSet<Atom>,
    ) {
        out.clear();
        let graph = match order {
            SubOrder::Checked => &self.checked,
            SubOrder::PtrType => &self.ptype,
        };
        if succs {
            graph.successors(atom, out);
        } else {
            graph.predecessors(atom, out);
        }
        if vars_only {
            out.retain(|a| a.is_var());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_edges() {
        let mut g: DiGraph<u32> = DiGraph::new();
        assert!(g.add_edge(1, 2));
        assert!(!g.add_edge(1, 2));
        let mut out = BTreeSet::new();
        g.successors(1, &mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_breadth_first_visit() {
        let mut g: DiGraph<u32> = DiGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        g.add_edge(1, 4);
        let mut seen = Vec::new();
        g.visit_breadth_first(1, |n| seen.push(n));
        seen.sort_unstable();
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[test]
    fn test_geq_edge_direction() {
        // q >= ARR: propagation flows from ARR up into q.
        let mut cg = ConstraintGraph::new();
        cg.add_geq(&Geq::new(Atom::Var(0), Atom::ARR, "", None, false));

        let mut out = BTreeSet::new();
        cg.neighbors(Atom::ARR, true, SubOrder::PtrType, true, &mut out);
        assert!(out.contains(&Atom::Var(0)));

        // The checked sub-graph is untouched.
        cg.neighbors(Atom::ARR, true, SubOrder::Checked, true, &mut out);
        assert!(out.is_empty());
    }
}
