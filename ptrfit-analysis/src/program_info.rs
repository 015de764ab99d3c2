// Central ownership: every constraint variable, the constraint store, the
// bounds state, and the cross-translation-unit symbol tables.

use crate::bounds::{AVarBoundsInfo, BoundsKey};
use crate::errors::span_of;
use crate::options::CoreOptions;
use crate::vars::{ConsAction, ConstraintVariable, CvarId};
use log::{debug, info};
use ptrfit_ast::SourceLoc;
use ptrfit_constraints::{ConstAtom, Constraint, Constraints};
use ptrfit_diagnostics::DiagnosticEngine;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Decides whether a source location may be textually rewritten. Locations
/// inside macro expansions usually may not.
pub trait RewriteOracle: Send {
    fn is_rewritable(&self, loc: &SourceLoc, in_macro: bool) -> bool;
}

/// Default oracle: trust the frontend's macro flag.
pub struct MacroFlagOracle;

impl RewriteOracle for MacroFlagOracle {
    fn is_rewritable(&self, _loc: &SourceLoc, in_macro: bool) -> bool {
        !in_macro
    }
}

/// Wall-clock accounting for the analysis phases.
#[derive(Debug, Default)]
pub struct PerfStats {
    constraint_builder_time: Duration,
    builder_started: Option<Instant>,
    solve_time: Duration,
    solve_started: Option<Instant>,
    array_bounds_time: Duration,
    bounds_started: Option<Instant>,
}

impl PerfStats {
    pub fn start_constraint_builder_time(&mut self) {
        self.builder_started = Some(Instant::now());
    }

    // The start mark is deliberately left in place, so a repeated stop adds
    // the elapsed time again; the constraint builder does stop this clock
    // twice in a row.
    pub fn end_constraint_builder_time(&mut self) {
        if let Some(s) = self.builder_started {
            self.constraint_builder_time += s.elapsed();
        }
    }

    pub fn start_solve_time(&mut self) {
        self.solve_started = Some(Instant::now());
    }

    pub fn end_solve_time(&mut self) {
        if let Some(s) = self.solve_started.take() {
            self.solve_time += s.elapsed();
        }
    }

    pub fn start_array_bounds_time(&mut self) {
        self.bounds_started = Some(Instant::now());
    }

    pub fn end_array_bounds_time(&mut self) {
        if let Some(s) = self.bounds_started.take() {
            self.array_bounds_time += s.elapsed();
        }
    }

    pub fn constraint_builder_time(&self) -> Duration {
        self.constraint_builder_time
    }

    pub fn solve_time(&self) -> Duration {
        self.solve_time
    }

    pub fn array_bounds_time(&self) -> Duration {
        self.array_bounds_time
    }
}

/// Record of one argument binding at a call site, kept for the rewriter's
/// cast placement.
#[derive(Debug, Clone)]
pub(crate) struct CallArgRecord {
    pub loc: SourceLoc,
    pub param_external: CvarId,
    pub arg: CvarId,
}

/// Rendered declaration text plus whether anything changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclRewrite {
    pub text: String,
    pub changed: bool,
}

/// Rendered function pieces: return text and parameter list text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncRewrite {
    pub ret_text: String,
    pub params_text: String,
    pub changed: bool,
    /// Body may be wrapped in a checked region
    pub checked_region: bool,
}

pub struct ProgramInfo {
    pub(crate) opts: CoreOptions,
    pub(crate) cs: Constraints,
    pub(crate) cvars: Vec<ConstraintVariable>,
    /// Declaration variables by persistent location
    pub(crate) variables: BTreeMap<SourceLoc, CvarId>,
    /// Memoized expression constraint sets
    pub(crate) expr_cache: HashMap<SourceLoc, (Vec<CvarId>, BTreeSet<BoundsKey>)>,
    /// Global variables by name, for cross-unit linking
    pub(crate) global_vars: HashMap<String, Vec<CvarId>>,
    /// Struct fields by (record, field) name
    pub(crate) fields: HashMap<(String, String), CvarId>,
    /// Non-static functions by name
    pub(crate) extern_fns: HashMap<String, CvarId>,
    /// Static functions by (file, name)
    pub(crate) static_fns: HashMap<(String, String), CvarId>,
    /// Typedefs seen, with their rewritability
    pub(crate) typedefs: HashMap<SourceLoc, (String, bool)>,
    /// Field order per record, for initializer-list matching
    pub(crate) record_fields: HashMap<String, Vec<String>>,
    /// Bounds keys of all global values, pointer or not
    pub(crate) global_bkeys: HashMap<String, BoundsKey>,
    /// Per-call-site generic type parameter instantiations
    pub(crate) type_param_bindings: HashMap<SourceLoc, BTreeMap<u32, CvarId>>,
    pub(crate) call_arg_records: Vec<CallArgRecord>,
    pub(crate) bounds: AVarBoundsInfo,
    pub(crate) diags: DiagnosticEngine,
    pub(crate) perf: PerfStats,
    pub(crate) oracle: Box<dyn RewriteOracle>,
    /// Shared sentinel for non-pointer expressions
    pub(crate) non_ptr_cvar: Option<CvarId>,
}

impl ProgramInfo {
    pub fn new(opts: CoreOptions) -> Self {
        let cs = Constraints::new(opts.all_types, opts.disable_reverse_edges);
        Self {
            opts,
            cs,
            cvars: Vec::new(),
            variables: BTreeMap::new(),
            expr_cache: HashMap::new(),
            global_vars: HashMap::new(),
            fields: HashMap::new(),
            extern_fns: HashMap::new(),
            static_fns: HashMap::new(),
            typedefs: HashMap::new(),
            record_fields: HashMap::new(),
            global_bkeys: HashMap::new(),
            type_param_bindings: HashMap::new(),
            call_arg_records: Vec::new(),
            bounds: AVarBoundsInfo::new(),
            diags: DiagnosticEngine::new(),
            perf: PerfStats::default(),
            oracle: Box::new(MacroFlagOracle),
            non_ptr_cvar: None,
        }
    }

    pub fn with_oracle(opts: CoreOptions, oracle: Box<dyn RewriteOracle>) -> Self {
        let mut info = Self::new(opts);
        info.oracle = oracle;
        info
    }

    pub fn options(&self) -> &CoreOptions {
        &self.opts
    }

    pub fn constraints(&self) -> &Constraints {
        &self.cs
    }

    pub fn bounds_info(&self) -> &AVarBoundsInfo {
        &self.bounds
    }

    pub fn diagnostics(&self) -> &DiagnosticEngine {
        &self.diags
    }

    pub fn perf_stats(&self) -> &PerfStats {
        &self.perf
    }

    pub fn perf_stats_mut(&mut self) -> &mut PerfStats {
        &mut self.perf
    }

    pub(crate) fn is_rewritable(&self, loc: &SourceLoc, in_macro: bool) -> bool {
        self.oracle.is_rewritable(loc, in_macro)
    }

    /// Variable for a declaration site, if one was created.
    pub fn variable_at(&self, loc: &SourceLoc) -> Option<CvarId> {
        self.variables.get(loc).copied()
    }

    pub(crate) fn lookup_function(&self, name: &str, file: &str) -> Option<CvarId> {
        self.static_fns
            .get(&(file.to_string(), name.to_string()))
            .copied()
            .or_else(|| self.extern_fns.get(name).copied())
    }

    pub(crate) fn known_function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extern_fns.keys().cloned().collect();
        names.extend(self.static_fns.keys().map(|(_, n)| n.clone()));
        names.sort();
        names.dedup();
        names
    }

    /// Bounds keys of global variables, for declared-bounds name lookup.
    pub(crate) fn global_bounds_keys(&self) -> HashMap<String, BoundsKey> {
        let mut out = self.global_bkeys.clone();
        for (name, ids) in &self.global_vars {
            for id in ids {
                if let Some(k) = self.cvar(*id).bounds_key() {
                    out.insert(name.clone(), k);
                }
            }
        }
        out
    }

    pub(crate) fn constrain_wild_if_macro(&mut self, id: CvarId, loc: &SourceLoc, in_macro: bool) {
        if !self.is_rewritable(loc, in_macro) {
            self.constrain_to_wild(id, "inside macro expansion", Some(loc));
        }
    }

    /// Unify symbols across translation units and pin down everything that
    /// cannot be checked: undefined external functions without interop
    /// types leave their parameters and returns unchecked.
    pub fn link(&mut self) {
        info!("linking {} translation units' symbols", self.variables.len());

        // Same-named global variables in different units are one object.
        let groups: Vec<Vec<CvarId>> = self
            .global_vars
            .values()
            .filter(|ids| ids.len() > 1)
            .cloned()
            .collect();
        for ids in groups {
            for pair in ids.windows(2) {
                self.constrain_cvar_geq(pair[0], pair[1], None, ConsAction::SameToSame, true, true);
            }
        }

        // Functions with no definition anywhere cannot be trusted unless
        // they carry interop annotations (or are recognized allocators,
        // which get special-cased at call sites).
        let mut undefined: Vec<(String, CvarId)> = self
            .extern_fns
            .iter()
            .map(|(n, v)| (n.clone(), *v))
            .collect();
        // Static functions without bodies are just as opaque.
        undefined.extend(self.static_fns.iter().map(|(k, v)| (k.1.clone(), *v)));
        // Calls recorded before a prototype was available bind now.
        let deferred: Vec<(Vec<crate::vars::FvComponent>, Vec<(SourceLoc, Vec<Vec<CvarId>>)>)> =
            self.cvars
                .iter()
                .filter_map(|cv| cv.as_function())
                .filter(|fv| !fv.deferred_params.is_empty() && !fv.params.is_empty())
                .map(|fv| (fv.params.clone(), fv.deferred_params.clone()))
                .collect();
        for (params, defs) in deferred {
            for (loc, arg_sets) in defs {
                for (i, args) in arg_sets.iter().enumerate() {
                    let Some(comp) = params.get(i) else { break };
                    for a in args {
                        self.constrain_cvar_geq(
                            comp.external,
                            *a,
                            Some(&loc),
                            ConsAction::WildToSafe,
                            false,
                            false,
                        );
                    }
                }
            }
        }

        for (name, id) in undefined {
            let Some(fv) = self.fv(id) else { continue };
            if fv.has_body || self.opts.is_allocator(&name) {
                continue;
            }
            let comps: Vec<crate::vars::FvComponent> =
                std::iter::once(fv.ret).chain(fv.params.iter().copied()).collect();
            for comp in comps {
                let has_itype = self
                    .pv(comp.external)
                    .map(|p| p.itype.is_some())
                    .unwrap_or(false);
                if has_itype && self.opts.enable_prop_thru_itype {
                    continue;
                }
                if !has_itype {
                    let reason = format!("undefined function `{}`", name);
                    self.constrain_to_wild(comp.external, &reason, None);
                }
            }
        }
    }

    /// Run the solver, publishing kinds into the environment. Root-cause
    /// diagnostics name the constraints that kept pointers unchecked.
    pub fn solve_constraints(&mut self) -> bool {
        self.perf.start_solve_time();
        let (conflicts, ok) = self.cs.solve();
        self.perf.end_solve_time();
        if !conflicts.is_empty() {
            debug!("{} conflicts during solving", conflicts.len());
        }

        if self.opts.warn_root_cause || self.opts.warn_all_root_cause {
            self.report_root_causes();
        }
        ok
    }

    fn report_root_causes(&mut self) {
        let mut reported: BTreeSet<u32> = BTreeSet::new();
        let mut to_report = Vec::new();
        for c in self.cs.live_constraints() {
            let Constraint::Geq(g) = c else { continue };
            if !g.checked || g.rhs != ptrfit_constraints::Atom::WILD || g.reason.is_empty() {
                continue;
            }
            let Some(key) = g.lhs.as_var() else { continue };
            if self.cs.solution(g.lhs) != ConstAtom::Wild {
                continue;
            }
            if !self.opts.warn_all_root_cause && !reported.insert(key) {
                continue;
            }
            let name = self
                .cs
                .var_info(key)
                .map(|i| i.name.clone())
                .unwrap_or_else(|| format!("q_{}", key));
            to_report.push((name, g.reason.clone(), g.loc.clone()));
        }
        for (name, reason, loc) in to_report {
            let span = loc
                .as_ref()
                .map(span_of)
                .unwrap_or_else(ptrfit_diagnostics::Span::unknown);
            self.diags.wild_root_cause(&name, &reason, span);
        }
    }

    // ---- outputs for the rewriter ---------------------------------------

    /// Solved kind of the declaration at a location: the outermost pointer
    /// level for variables, the external return for functions.
    pub fn pointer_kind_at(&self, loc: &SourceLoc) -> Option<ConstAtom> {
        let id = self.variable_at(loc)?;
        match self.cvar(id) {
            ConstraintVariable::Pointer(_) => self.pv_kind_at(id, 0),
            ConstraintVariable::Function(fv) => self.pv_kind_at(fv.ret.external, 0),
        }
    }

    /// Rendered declaration text for a pointer variable or field.
    pub fn decl_rewrite(&self, loc: &SourceLoc) -> Option<DeclRewrite> {
        let id = self.variable_at(loc)?;
        let pv = self.pv(id)?;
        let changed = self.any_pv_changes(id);
        if !changed {
            let mut text = pv.original_type.clone();
            if !text.ends_with('*') && !text.ends_with(' ') {
                text.push(' ');
            }
            text.push_str(&pv.name);
            return Some(DeclRewrite {
                text: text.trim_end().to_string(),
                changed,
            });
        }
        let mut text = self.mk_pv_string(id, true, false);
        if let Some(key) = pv.bounds_key {
            let arrayish = matches!(
                self.pv_kind_at(id, 0),
                Some(ConstAtom::Arr) | Some(ConstAtom::NtArr)
            );
            if arrayish {
                if let Some(b) = self.bounds.bounds_text(key) {
                    text.push_str(&format!(" : {}", b));
                }
            }
        }
        Some(DeclRewrite { text, changed })
    }

    /// Rendered return and parameter texts for a function declaration.
    pub fn func_rewrite(&self, loc: &SourceLoc) -> Option<FuncRewrite> {
        let id = self.variable_at(loc)?;
        let fv = self.fv(id)?;
        let ret_text = self.mk_component_string(fv.ret, false);
        let params_text = if fv.params.is_empty() {
            "void".to_string()
        } else {
            fv.params
                .iter()
                .map(|p| self.mk_component_string(*p, true))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let changed = self.any_fv_changes(id);
        let checked_region = self.opts.add_checked_regions
            && fv.has_body
            && std::iter::once(&fv.ret)
                .chain(fv.params.iter())
                .all(|c| {
                    self.pv(c.internal)
                        .map(|p| {
                            p.atoms.iter().all(|a| {
                                self.cs.solution(*a) != ConstAtom::Wild
                            })
                        })
                        .unwrap_or(true)
                });
        Some(FuncRewrite {
            ret_text,
            params_text,
            changed,
            checked_region,
        })
    }

    /// Key of the outermost solver variable behind a declaration, the
    /// handle the interactive invalidation operations take.
    pub fn outer_var_key(&self, loc: &SourceLoc) -> Option<ptrfit_constraints::ConstraintKey> {
        let id = self.variable_at(loc)?;
        let pv_id = match self.cvar(id) {
            ConstraintVariable::Pointer(_) => id,
            ConstraintVariable::Function(fv) => fv.ret.external,
        };
        self.pv(pv_id)?.atoms.iter().find_map(|a| a.as_var())
    }

    /// Bounds annotation text for the declaration at a location.
    pub fn bounds_text_at(&self, loc: &SourceLoc) -> Option<String> {
        let id = self.variable_at(loc)?;
        let key = self.cvar(id).bounds_key()?;
        self.bounds.bounds_text(key)
    }

    /// Type arguments instantiated at a generic call site, rendered for the
    /// rewriter to insert, e.g. `malloc<int>(...)`.
    pub fn type_args_at(&self, loc: &SourceLoc) -> Vec<(u32, String)> {
        self.type_param_bindings
            .get(loc)
            .map(|m| {
                m.iter()
                    .map(|(t, id)| (*t, self.mk_pv_string(*id, false, false)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Casts the rewriter must place around call arguments: one entry per
    /// argument whose solved type no longer matches its parameter.
    pub fn needed_casts(&self) -> Vec<(SourceLoc, String)> {
        let mut out = Vec::new();
        for rec in &self.call_arg_records {
            let Some(param) = self.pv(rec.param_external) else {
                continue;
            };
            if self.pv(rec.arg).is_none() {
                continue;
            }
            if param.is_generic() || self.solution_equal_to(rec.param_external, rec.arg) {
                continue;
            }
            let param_kind = self.pv_kind_at(rec.param_external, 0);
            let cast = if param_kind == Some(ConstAtom::Wild) {
                format!("({})", param.original_type.trim_end())
            } else {
                format!(
                    "_Assume_bounds_cast<{}>",
                    self.mk_pv_string(rec.param_external, false, false)
                )
            };
            out.push((rec.loc.clone(), cast));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_builder_clock_stops_twice() {
        let mut stats = PerfStats::default();
        stats.start_constraint_builder_time();
        std::thread::sleep(Duration::from_millis(2));
        stats.end_constraint_builder_time();
        let after_first = stats.constraint_builder_time();
        std::thread::sleep(Duration::from_millis(2));
        // The second stop also accumulates; the start mark is not cleared.
        stats.end_constraint_builder_time();
        assert!(stats.constraint_builder_time() > after_first);
    }

    #[test]
    fn test_solve_clock_stops_once() {
        let mut stats = PerfStats::default();
        stats.start_solve_time();
        std::thread::sleep(Duration::from_millis(2));
        stats.end_solve_time();
        let after_first = stats.solve_time();
        stats.end_solve_time();
        assert_eq!(stats.solve_time(), after_first);
    }

    #[test]
    fn test_fresh_instances_share_nothing() {
        let a = ProgramInfo::new(CoreOptions {
            all_types: false,
            ..CoreOptions::default()
        });
        let b = ProgramInfo::new(CoreOptions::default());
        assert!(!a.options().all_types);
        assert!(b.options().all_types);
        assert_eq!(b.constraints().constraint_count(), 0);
    }
}
