// Ownership of all bounds data: key assignment per declaration, the
// value-flow graphs, and the priority-ordered bounds per pointer.

use super::{ABounds, BoundsKey, BoundsKind, BoundsPriority, ProgramVar, ProgramVarScope};
use log::debug;
use ptrfit_ast::{BoundsExpr, BoundsValue, SourceLoc};
use ptrfit_constraints::DiGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Identity of a function parameter across translation units
pub type ParamKey = (String, String, bool, usize); // (func, file, is_static, index)
/// Identity of a function (its return value) across translation units
pub type FuncKey = (String, String, bool); // (func, file, is_static)

/// All array-bounds state for one analysis.
#[derive(Debug, Default)]
pub struct AVarBoundsInfo {
    count: BoundsKey,

    /// Intra-procedural value-flow edges
    pub(crate) prog_var_graph: DiGraph<BoundsKey>,
    /// Caller-to-callee edges, one per call site
    pub(crate) ctx_sens_graph: DiGraph<BoundsKey>,
    /// Callee-to-caller edges, the reverse binding
    pub(crate) rev_ctx_sens_graph: DiGraph<BoundsKey>,

    /// Bounds per key, one slot per priority
    binfo: HashMap<BoundsKey, BTreeMap<BoundsPriority, ABounds>>,
    /// Keys whose declared bounds could not be resolved
    pub(crate) invalid_bounds: BTreeSet<BoundsKey>,
    /// Keys of pointer-typed declarations
    pub(crate) pointer_bounds_key: BTreeSet<BoundsKey>,
    /// Keys the solver judged to be array pointers
    pub(crate) arr_pointer_bounds_key: BTreeSet<BoundsKey>,
    /// Keys that solved to null-terminated arrays only
    pub(crate) nt_arr_pointer_bounds_key: BTreeSet<BoundsKey>,
    /// Array keys belonging to declarations physically in the program
    pub(crate) in_prog_arr_keys: BTreeSet<BoundsKey>,
    /// Pointers used in arithmetic; they never propagate bounds onward
    arith_keys: BTreeSet<BoundsKey>,
    /// Guarded-index length candidates, consumed when flow finds nothing
    pub(crate) potential_count_bounds: HashMap<BoundsKey, BTreeSet<BoundsKey>>,

    pvar_info: HashMap<BoundsKey, ProgramVar>,
    decl_var_map: HashMap<SourceLoc, BoundsKey>,
    param_var_map: HashMap<ParamKey, BoundsKey>,
    func_var_map: HashMap<FuncKey, BoundsKey>,
    func_ret_keys: BTreeSet<BoundsKey>,
    const_var_keys: HashMap<u64, BoundsKey>,
    tmp_keys: BTreeSet<BoundsKey>,

    /// Context-sensitive key per (call site, base key)
    ctx_keys: HashMap<(SourceLoc, BoundsKey), BoundsKey>,
    /// Reverse index from a context-sensitive key to its base
    ctx_base: HashMap<BoundsKey, (SourceLoc, BoundsKey)>,
}

impl AVarBoundsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_key(&mut self) -> BoundsKey {
        self.count += 1;
        self.count
    }

    fn insert_program_var(&mut self, key: BoundsKey, pv: ProgramVar, is_pointer: bool) {
        self.pvar_info.insert(key, pv);
        if is_pointer {
            self.pointer_bounds_key.insert(key);
        }
    }

    /// Key for a variable or field declaration, allocated on first sight.
    pub fn get_decl_key(
        &mut self,
        loc: &SourceLoc,
        name: &str,
        scope: ProgramVarScope,
        is_pointer: bool,
    ) -> BoundsKey {
        if let Some(k) = self.decl_var_map.get(loc) {
            return *k;
        }
        let key = self.fresh_key();
        self.decl_var_map.insert(loc.clone(), key);
        self.insert_program_var(key, ProgramVar::new(key, name, scope), is_pointer);
        key
    }

    /// Key for a function parameter, shared by every redeclaration.
    pub fn get_param_key(
        &mut self,
        func: &str,
        file: &str,
        is_static: bool,
        index: usize,
        name: &str,
        is_pointer: bool,
    ) -> BoundsKey {
        let file_part = if is_static { file } else { "" };
        let pk: ParamKey = (func.to_string(), file_part.to_string(), is_static, index);
        if let Some(k) = self.param_var_map.get(&pk) {
            return *k;
        }
        let key = self.fresh_key();
        let scope = ProgramVarScope::FunctionParam {
            name: func.to_string(),
            is_static,
        };
        let name = if name.is_empty() {
            format!("unnamed_param_{}", index)
        } else {
            name.to_string()
        };
        self.insert_program_var(key, ProgramVar::new(key, &name, scope), is_pointer);
        self.param_var_map.insert(pk, key);
        key
    }

    /// Key for a function's return value, shared by every redeclaration.
    pub fn get_func_key(
        &mut self,
        func: &str,
        file: &str,
        is_static: bool,
        returns_pointer: bool,
    ) -> BoundsKey {
        let file_part = if is_static { file } else { "" };
        let fk: FuncKey = (func.to_string(), file_part.to_string(), is_static);
        if let Some(k) = self.func_var_map.get(&fk) {
            return *k;
        }
        let key = self.fresh_key();
        let scope = ProgramVarScope::FunctionParam {
            name: func.to_string(),
            is_static,
        };
        self.insert_program_var(key, ProgramVar::new(key, func, scope), returns_pointer);
        self.func_var_map.insert(fk, key);
        self.func_ret_keys.insert(key);
        key
    }

    /// Key for an integer constant; constants are shared program-wide.
    pub fn get_const_key(&mut self, value: u64) -> BoundsKey {
        if let Some(k) = self.const_var_keys.get(&value) {
            return *k;
        }
        let key = self.fresh_key();
        self.insert_program_var(key, ProgramVar::constant(key, value), false);
        self.const_var_keys.insert(value, key);
        key
    }

    /// Key for a synthesized temporary (string literals, call results).
    pub fn fresh_tmp_key(&mut self) -> BoundsKey {
        let key = self.fresh_key();
        self.tmp_keys.insert(key);
        self.insert_program_var(
            key,
            ProgramVar::new(key, &format!("tmp_{}", key), ProgramVarScope::Global),
            true,
        );
        key
    }

    pub fn program_var(&self, key: BoundsKey) -> Option<&ProgramVar> {
        self.pvar_info.get(&key)
    }

    pub fn is_function_return(&self, key: BoundsKey) -> bool {
        self.func_ret_keys.contains(&key)
    }

    pub fn decl_key(&self, loc: &SourceLoc) -> Option<BoundsKey> {
        self.decl_var_map.get(loc).copied()
    }

    /// Two keys denote the same length when they are the same key, or both
    /// are constants with the same value.
    pub fn same_program_var(&self, a: BoundsKey, b: BoundsKey) -> bool {
        if a == b {
            return true;
        }
        match (self.program_var(a), self.program_var(b)) {
            (Some(pa), Some(pb)) => {
                pa.is_constant && pb.is_constant && pa.name == pb.name
            }
            _ => false,
        }
    }

    // ---- declared bounds -------------------------------------------------

    /// Resolve a declared bounds annotation against the given scope's name
    /// lookup. Unresolvable names mark the pointer's bounds invalid.
    pub fn insert_declared_bounds<F>(
        &mut self,
        key: BoundsKey,
        expr: &BoundsExpr,
        mut lookup: F,
    ) -> bool
    where
        F: FnMut(&str) -> Option<BoundsKey>,
    {
        let mut value_key = |v: &BoundsValue, this: &mut Self| match v {
            BoundsValue::Const(c) => Some(this.get_const_key(*c)),
            BoundsValue::Name(n) => lookup(n),
        };
        let bounds = match expr {
            BoundsExpr::CountOf(v) => value_key(v, self).map(ABounds::Count),
            BoundsExpr::ByteCountOf(v) => value_key(v, self).map(ABounds::ByteCount),
            BoundsExpr::Range(lo, hi) => {
                if cfg!(feature = "range-bounds") {
                    let lo = value_key(lo, self);
                    let hi = value_key(hi, self);
                    match (lo, hi) {
                        (Some(l), Some(h)) => Some(ABounds::Range(l, h)),
                        _ => None,
                    }
                } else {
                    // Range bounds are not implemented; treat as invalid so
                    // the pointer keeps its kind but loses its bounds.
                    None
                }
            }
        };
        match bounds {
            Some(b) => {
                self.remove_bounds(key, None);
                self.binfo
                    .entry(key)
                    .or_default()
                    .insert(BoundsPriority::Declared, b);
                true
            }
            None => {
                self.invalid_bounds.insert(key);
                false
            }
        }
    }

    /// Install a bound at the given priority without touching other slots;
    /// a disagreeing second bound at the same priority invalidates the key.
    pub fn merge_bounds(&mut self, key: BoundsKey, prio: BoundsPriority, b: ABounds) -> bool {
        if let Some(existing) = self.binfo.get(&key).and_then(|m| m.get(&prio)) {
            if !self.bounds_are_same(existing, &b) {
                self.invalid_bounds.insert(key);
                self.remove_bounds(key, None);
            }
            return false;
        }
        self.binfo.entry(key).or_default().insert(prio, b);
        true
    }

    fn bounds_are_same(&self, a: &ABounds, b: &ABounds) -> bool {
        if a.kind() != b.kind() {
            return false;
        }
        match (a.bounds_key(), b.bounds_key()) {
            (Some(ka), Some(kb)) => self.same_program_var(ka, kb),
            _ => a == b,
        }
    }

    /// Replace any bounds on the key with the given one.
    pub fn replace_bounds(&mut self, key: BoundsKey, prio: BoundsPriority, b: ABounds) -> bool {
        self.remove_bounds(key, None);
        self.merge_bounds(key, prio, b)
    }

    /// Remove bounds at one priority, or all of them.
    pub fn remove_bounds(&mut self, key: BoundsKey, prio: Option<BoundsPriority>) -> bool {
        match prio {
            None => self.binfo.remove(&key).is_some(),
            Some(p) => {
                let mut removed = false;
                if let Some(m) = self.binfo.get_mut(&key) {
                    removed = m.remove(&p).is_some();
                    if m.is_empty() {
                        self.binfo.remove(&key);
                    }
                }
                removed
            }
        }
    }

    /// Highest-priority bound for a key, if it is valid.
    pub fn get_bounds(&self, key: BoundsKey) -> Option<&ABounds> {
        if self.invalid_bounds.contains(&key) {
            return None;
        }
        let m = self.binfo.get(&key)?;
        BoundsPriority::PRIO_LIST.iter().find_map(|p| m.get(p))
    }

    pub fn get_bounds_at(&self, key: BoundsKey, prio: BoundsPriority) -> Option<&ABounds> {
        if self.invalid_bounds.contains(&key) {
            return None;
        }
        self.binfo.get(&key).and_then(|m| m.get(&prio))
    }

    pub fn has_any_bounds(&self, key: BoundsKey) -> bool {
        self.binfo.contains_key(&key)
    }

    pub fn bounded_keys(&self) -> impl Iterator<Item = BoundsKey> + '_ {
        self.binfo.keys().copied()
    }

    /// Keep only the highest-priority bound per key.
    pub fn keep_highest_priority_bounds(&mut self, keys: &BTreeSet<BoundsKey>) -> bool {
        let mut changed = false;
        for key in keys {
            let mut found = false;
            for p in BoundsPriority::PRIO_LIST {
                if found {
                    changed |= self.remove_bounds(*key, Some(p));
                } else if self.get_bounds_at(*key, p).is_some() {
                    found = true;
                }
            }
        }
        changed
    }

    // ---- flow edges ------------------------------------------------------

    /// Record a value-flow assignment `l = r`. Edges are bidirectional so
    /// lengths can be discovered in either direction, except that function
    /// returns only receive flow; an edge out of a return would make the
    /// return's bounds depend on itself.
    pub fn add_assignment(&mut self, l: BoundsKey, r: BoundsKey) {
        if self.is_function_return(l) || self.is_function_return(r) {
            if l != r {
                self.prog_var_graph.add_edge(r, l);
            }
        } else {
            self.prog_var_graph.add_edge(r, l);
            let r_is_const = self
                .program_var(r)
                .map(|p| p.is_constant)
                .unwrap_or(false);
            if !r_is_const {
                self.prog_var_graph.add_edge(l, r);
            }
        }
    }

    pub fn record_arithmetic(&mut self, key: BoundsKey) {
        self.arith_keys.insert(key);
    }

    pub fn has_pointer_arithmetic(&self, key: BoundsKey) -> bool {
        self.arith_keys.contains(&key)
    }

    pub fn mark_arr_pointer(&mut self, key: BoundsKey) {
        self.arr_pointer_bounds_key.insert(key);
    }

    /// Record guarded-index length candidates for a pointer.
    pub fn update_potential_count_bounds(
        &mut self,
        key: BoundsKey,
        candidates: &BTreeSet<BoundsKey>,
    ) -> bool {
        if candidates.is_empty() {
            return false;
        }
        self.potential_count_bounds
            .entry(key)
            .or_default()
            .extend(candidates.iter().copied());
        true
    }

    // ---- context-sensitive keys -----------------------------------------

    /// Key representing `base` as seen at one particular call site. Created
    /// on demand together with its binding edges in both direction graphs.
    pub fn get_ctx_sens_key(
        &mut self,
        call: &SourceLoc,
        base: BoundsKey,
        func: &str,
    ) -> BoundsKey {
        if let Some(k) = self.ctx_keys.get(&(call.clone(), base)) {
            return *k;
        }
        let key = self.fresh_key();
        let name = self
            .program_var(base)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("ctx_{}", base));
        let scope = ProgramVarScope::CtxFunctionArg {
            func: func.to_string(),
            call: call.clone(),
        };
        let is_pointer = self.pointer_bounds_key.contains(&base);
        self.insert_program_var(key, ProgramVar::new(key, &name, scope), is_pointer);
        self.ctx_keys.insert((call.clone(), base), key);
        self.ctx_base.insert(key, (call.clone(), base));
        // Caller-to-callee binding, and the reverse for flowing callee
        // bounds back out to call sites.
        self.ctx_sens_graph.add_edge(key, base);
        self.rev_ctx_sens_graph.add_edge(base, key);
        debug!("ctx-sensitive key {} for {} at {}", key, base, call);
        key
    }

    /// Key representing a struct field as seen at one access site.
    pub fn get_ctx_sens_field_key(&mut self, access: &SourceLoc, base: BoundsKey) -> BoundsKey {
        if let Some(k) = self.ctx_keys.get(&(access.clone(), base)) {
            return *k;
        }
        let key = self.fresh_key();
        let name = self
            .program_var(base)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("ctx_{}", base));
        let scope = ProgramVarScope::CtxStruct {
            access: access.clone(),
        };
        let is_pointer = self.pointer_bounds_key.contains(&base);
        self.insert_program_var(key, ProgramVar::new(key, &name, scope), is_pointer);
        self.ctx_keys.insert((access.clone(), base), key);
        self.ctx_base.insert(key, (access.clone(), base));
        self.ctx_sens_graph.add_edge(key, base);
        self.rev_ctx_sens_graph.add_edge(base, key);
        key
    }

    /// The (call site, base) pair behind a context-sensitive key.
    pub fn ctx_base_of(&self, key: BoundsKey) -> Option<&(SourceLoc, BoundsKey)> {
        self.ctx_base.get(&key)
    }

    pub fn is_ctx_key(&self, key: BoundsKey) -> bool {
        self.ctx_base.contains_key(&key)
    }

    pub fn ctx_keys_of(&self, base: BoundsKey) -> Vec<BoundsKey> {
        self.ctx_keys
            .iter()
            .filter(|((_, b), _)| *b == base)
            .map(|(_, k)| *k)
            .collect()
    }

    // ---- rendering -------------------------------------------------------

    /// Textual bounds annotation for a pointer, e.g. `count(n)`.
    pub fn bounds_text(&self, key: BoundsKey) -> Option<String> {
        let b = self.get_bounds(key)?;
        let name_of = |k: BoundsKey| {
            self.program_var(k)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("<key {}>", k))
        };
        match b {
            ABounds::Count(k) => Some(format!("count({})", name_of(*k))),
            ABounds::CountPlusOne(k) => Some(format!("count({} + 1)", name_of(*k))),
            ABounds::ByteCount(k) => Some(format!("byte_count({})", name_of(*k))),
            #[cfg(feature = "range-bounds")]
            ABounds::Range(lo, hi) => {
                Some(format!("bounds({}, {})", name_of(*lo), name_of(*hi)))
            }
            #[cfg(not(feature = "range-bounds"))]
            ABounds::Range(_, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLoc {
        SourceLoc::new("t.c", line, 1)
    }

    #[test]
    fn test_decl_key_is_stable() {
        let mut abi = AVarBoundsInfo::new();
        let k1 = abi.get_decl_key(&loc(1), "p", ProgramVarScope::Global, true);
        let k2 = abi.get_decl_key(&loc(1), "p", ProgramVarScope::Global, true);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_const_keys_shared() {
        let mut abi = AVarBoundsInfo::new();
        assert_eq!(abi.get_const_key(5), abi.get_const_key(5));
        assert_ne!(abi.get_const_key(5), abi.get_const_key(6));
    }

    #[test]
    fn test_param_key_ignores_file_for_extern() {
        let mut abi = AVarBoundsInfo::new();
        let a = abi.get_param_key("f", "a.c", false, 0, "x", true);
        let b = abi.get_param_key("f", "b.c", false, 0, "x", true);
        assert_eq!(a, b);
        // Static functions are per-file.
        let c = abi.get_param_key("g", "a.c", true, 0, "x", true);
        let d = abi.get_param_key("g", "b.c", true, 0, "x", true);
        assert_ne!(c, d);
    }

    #[test]
    fn test_declared_bounds_with_unknown_name_invalid() {
        let mut abi = AVarBoundsInfo::new();
        let k = abi.get_decl_key(&loc(1), "buf", ProgramVarScope::Global, true);
        let ok = abi.insert_declared_bounds(
            k,
            &BoundsExpr::CountOf(BoundsValue::Name("mystery".to_string())),
            |_| None,
        );
        assert!(!ok);
        assert!(abi.get_bounds(k).is_none());
        assert!(abi.invalid_bounds.contains(&k));
    }

    #[test]
    fn test_priority_lookup() {
        let mut abi = AVarBoundsInfo::new();
        let k = abi.get_decl_key(&loc(1), "buf", ProgramVarScope::Global, true);
        let n = abi.get_decl_key(&loc(2), "n", ProgramVarScope::Global, false);
        abi.merge_bounds(k, BoundsPriority::Heuristics, ABounds::Count(n));
        abi.merge_bounds(k, BoundsPriority::Allocator, ABounds::ByteCount(n));
        // Allocator outranks heuristics.
        assert_eq!(abi.get_bounds(k), Some(&ABounds::ByteCount(n)));
    }

    #[test]
    fn test_return_edges_one_directional() {
        let mut abi = AVarBoundsInfo::new();
        let ret = abi.get_func_key("mk", "a.c", false, true);
        let local = abi.get_decl_key(
            &loc(3),
            "p",
            ProgramVarScope::Function {
                name: "mk".to_string(),
                is_static: false,
            },
            true,
        );
        abi.add_assignment(ret, local);
        let mut out = BTreeSet::new();
        abi.prog_var_graph.predecessors(ret, &mut out);
        assert!(out.contains(&local));
        out.clear();
        abi.prog_var_graph.successors(ret, &mut out);
        assert!(out.is_empty());
    }

    #[cfg(not(feature = "range-bounds"))]
    #[test]
    fn test_range_bounds_invalid_without_feature() {
        let mut abi = AVarBoundsInfo::new();
        let k = abi.get_decl_key(&loc(1), "buf", ProgramVarScope::Global, true);
        let ok = abi.insert_declared_bounds(
            k,
            &BoundsExpr::Range(BoundsValue::Const(0), BoundsValue::Const(10)),
            |_| None,
        );
        assert!(!ok);
        assert!(abi.invalid_bounds.contains(&k));
    }
}
