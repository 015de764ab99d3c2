// Fixed-point solver.
//
// The checked/unchecked dimension is solved first as a least fixed point:
// wildness flows upward from constant atoms through the graph, and saved
// implications fire until quiescence. If that succeeds and the pointer-type
// dimension is enabled, three sub-phases refine PTR vs ARR vs NTARR:
//
//   1. a join pass floats every variable up to the kinds its uses demand;
//   2. non-parameters are reset to NTARR and a meet pass lowers them through
//      upper bounds and through edges into the now-fixed parameters;
//   3. non-parameters are reset to PTR and a join pass seeded with the fixed
//      parameters re-derives locals and returns from their actual uses.
//
// A bound violation in the pointer-type dimension demotes the offending
// variables to WILD in the checked dimension and the checked pass re-runs.

use crate::atoms::{Atom, ConstAtom, ConstraintKey};
use crate::cset::{is_non_param, Constraint, Constraints, Geq, Implies};
use crate::graph::{ConstraintGraph, SubOrder};
use log::{debug, warn};
use std::collections::{BTreeSet, VecDeque};

fn propagate(
    cs: &mut Constraints,
    graph: &mut ConstraintGraph,
    implies: &mut Vec<Implies>,
    do_least: bool,
    seeds: Option<&BTreeSet<ConstraintKey>>,
    conflicts: &mut Vec<Geq>,
    order: SubOrder,
) -> bool {
    let checked_dim = order == SubOrder::Checked;
    let mut worklist: VecDeque<Atom> = VecDeque::new();

    if let Some(seeds) = seeds {
        worklist.extend(seeds.iter().map(|k| Atom::Var(*k)));
    }

    loop {
        // Constant atoms seed every round, most severe first so wildness
        // floods before anything more precise.
        let mut consts: Vec<ConstAtom> = graph.const_atoms().iter().copied().collect();
        if do_least {
            consts.reverse();
        }
        worklist.extend(consts.into_iter().map(Atom::Const));

        let mut neighbors = BTreeSet::new();
        while let Some(curr) = worklist.pop_front() {
            let curr_sol = cs.assignment(curr);
            // Join walks edges forward (lower bounds push values up); meet
            // walks them backward (upper bounds pull values down).
            graph.neighbors(curr, do_least, order, true, &mut neighbors);
            for neighbor in neighbors.iter() {
                let Some(key) = neighbor.as_var() else {
                    continue;
                };
                let ngh_sol = cs.assignment(*neighbor);
                if (do_least && ngh_sol < curr_sol) || (!do_least && curr_sol < ngh_sol) {
                    cs.assign(key, curr_sol);
                    worklist.push_back(*neighbor);
                }
            }
        }

        // Evaluate saved implications; a premise that now holds activates
        // its conclusion as a new graph edge.
        let mut fired = false;
        implies.retain(|imp| {
            let lhs_sol = cs.assignment(imp.premise.lhs);
            let rhs_sol = cs.assignment(imp.premise.rhs);
            if lhs_sol >= rhs_sol {
                debug!("implication fired: {} -> {}", imp.premise, imp.conclusion);
                graph.add_geq(&imp.conclusion);
                fired = true;
                false
            } else {
                true
            }
        });
        if !fired {
            break;
        }
    }

    // Bound check: every constant reachable against the propagation
    // direction is a bound that the solution must respect.
    let mut ok = true;
    let mut neighbors = BTreeSet::new();
    for cbound in graph.const_atoms().iter().copied().collect::<Vec<_>>() {
        graph.neighbors(Atom::Const(cbound), !do_least, order, true, &mut neighbors);
        for atom in neighbors.iter() {
            let Some(key) = atom.as_var() else { continue };
            let sol = cs.assignment(*atom);
            if (do_least && cbound < sol) || (!do_least && sol < cbound) {
                ok = false;
                let reason = format!("bad solution: {}", sol);
                let conflict = if do_least {
                    Geq::new(*atom, Atom::Const(cbound), &reason, None, checked_dim)
                } else {
                    Geq::new(Atom::Const(cbound), *atom, &reason, None, checked_dim)
                };
                warn!(
                    "unsolvable constraint on {}: {} violates bound {}",
                    atom, sol, cbound
                );
                conflicts.push(conflict);
                if checked_dim {
                    // Immediate demotion keeps the environment consistent
                    // for callers even when solving reports failure.
                    cs.assign(key, ConstAtom::Wild);
                }
            }
        }
    }
    ok
}

impl Constraints {
    /// Solve the system. On success the conflict list is empty; on failure
    /// it names synthetic constraints for the variables that had to fall
    /// back to `Wild`.
    pub fn solve(&mut self) -> (Vec<Geq>, bool) {
        let mut conflicts = Vec::new();
        let mut graph = ConstraintGraph::new();
        let mut saved: Vec<Implies> = Vec::new();

        for c in self.live_constraints() {
            match c {
                Constraint::Geq(g) => graph.add_geq(g),
                Constraint::Implies(imp) => saved.push(imp.clone()),
            }
        }
        debug!(
            "solving {} constraints over {} variables",
            self.constraint_count(),
            self.var_count()
        );

        // Checked/unchecked pass: least solution.
        self.use_checked = true;
        let mut implies = saved.clone();
        let mut res = propagate(
            self,
            &mut graph,
            &mut implies,
            true,
            None,
            &mut conflicts,
            SubOrder::Checked,
        );

        if res && self.all_types() {
            self.use_checked = false;
            let mut no_implies = Vec::new();

            // Phase 1: join everything up from its lower bounds.
            res = propagate(
                self,
                &mut graph,
                &mut no_implies,
                true,
                None,
                &mut conflicts,
                SubOrder::PtrType,
            );

            // Phase 2: parameters are now fixed; everything else optimistically
            // becomes NTARR and is lowered by contravariant evidence.
            if res {
                let params = self.reset_solution(is_non_param, ConstAtom::NtArr);
                res = propagate(
                    self,
                    &mut graph,
                    &mut no_implies,
                    false,
                    Some(&params),
                    &mut conflicts,
                    SubOrder::PtrType,
                );
            }

            // Phase 3: re-derive locals and returns from their uses, with
            // parameter solutions held in place. Returns re-derive here as
            // well; their kinds come from what actually flows out of the
            // body, not from the optimistic ceiling.
            if res {
                let params = self.reset_solution(is_non_param, ConstAtom::Ptr);
                res = propagate(
                    self,
                    &mut graph,
                    &mut no_implies,
                    true,
                    Some(&params),
                    &mut conflicts,
                    SubOrder::PtrType,
                );
            }

            // Pointer-type failure: demote the offenders in the checked
            // dimension and re-run the checked pass from those seeds.
            if !res {
                self.use_checked = true;
                let mut demoted = BTreeSet::new();
                for geq in conflicts.drain(..) {
                    if let Some(key) = geq.lhs.as_var().or_else(|| geq.rhs.as_var()) {
                        self.assign(key, ConstAtom::Wild);
                        demoted.insert(key);
                    }
                }
                let mut implies = saved.clone();
                res = propagate(
                    self,
                    &mut graph,
                    &mut implies,
                    true,
                    Some(&demoted),
                    &mut conflicts,
                    SubOrder::Checked,
                );
            }

            self.merge_ptr_types();
        }

        (conflicts, res)
    }
}
