// Expression rules: map each expression to the constraint variables that
// stand for its value, generating constraints along the way. Results are
// memoized per source location, since one expression may be visited both for
// its own rules and as a subexpression.

use crate::bounds::BoundsKey;
use crate::program_info::{CallArgRecord, ProgramInfo};
use crate::vars::{ConsAction, ConstraintVariable, CvarId};
use log::{debug, warn};
use ptrfit_ast::{
    BinaryOp, CType, Expr, ExprKind, FunctionDecl, SourceLoc, UnaryOp,
};
use ptrfit_constraints::{Atom, ConstAtom, Geq, VarKind};
use std::collections::{BTreeSet, HashMap};

/// What a name resolves to inside the current function
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeBinding {
    /// Constraint variable, absent for non-pointer values
    pub cvar: Option<CvarId>,
    pub bkey: BoundsKey,
}

/// Name-resolution context while walking one function body (or file scope
/// when `func` is absent).
pub(crate) struct FuncContext<'a> {
    pub func: Option<&'a FunctionDecl>,
    pub file: &'a str,
    pub scopes: Vec<HashMap<String, ScopeBinding>>,
}

impl<'a> FuncContext<'a> {
    pub fn file_scope(file: &'a str) -> Self {
        Self {
            func: None,
            file,
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: &str, binding: ScopeBinding) {
        if let Some(top) = self.scopes.last_mut() {
            top.insert(name.to_string(), binding);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ScopeBinding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .copied()
    }
}

pub(crate) type CvarsAndKeys = (Vec<CvarId>, BTreeSet<BoundsKey>);

fn no_keys(vars: Vec<CvarId>) -> CvarsAndKeys {
    (vars, BTreeSet::new())
}

impl ProgramInfo {
    /// Sentinel variable for non-pointer values; shared, since it never
    /// carries constraints.
    pub(crate) fn non_ptr_pv(&mut self) -> CvarId {
        if let Some(id) = self.non_ptr_cvar {
            return id;
        }
        let ty = CType::named("int");
        let id = self.build_pointer_var(&ty, "", None, -1, false);
        self.non_ptr_cvar = Some(id);
        id
    }

    /// A fresh pointer variable forced to stay unchecked.
    pub(crate) fn wild_pv(&mut self, ty: &CType, name: &str, reason: &str, loc: &SourceLoc) -> CvarId {
        let id = self.build_pointer_var(ty, name, None, -1, false);
        self.constrain_to_wild(id, reason, Some(loc));
        id
    }

    /// One dereference down: same atom keys, outermost level dropped.
    pub(crate) fn handle_deref(&mut self, vars: &[CvarId]) -> Vec<CvarId> {
        let mut out = Vec::new();
        for id in vars {
            let Some(pv) = self.pv(*id) else { continue };
            if pv.atoms.len() <= 1 {
                continue;
            }
            let mut inner = pv.clone();
            inner.atoms.remove(0);
            inner.qualifiers.remove(0);
            inner.shapes.remove(0);
            inner.bounds_key = None;
            inner.parent = None;
            inner.argument_constraints.clear();
            inner.has_eq_argument_constraints = false;
            out.push(self.push_cvar(ConstraintVariable::Pointer(inner)));
        }
        out
    }

    /// One address-of up: a fresh outer atom, wild-linked to the old
    /// outermost level.
    pub(crate) fn add_atom_all(&mut self, vars: &[CvarId]) -> Vec<CvarId> {
        let mut out = Vec::new();
        for id in vars {
            let Some(pv) = self.pv(*id).cloned() else {
                out.push(*id);
                continue;
            };
            let new_atom = self
                .cs
                .fresh_var(&format!("&{}", pv.name), VarKind::Other);
            if let Some(old_outer) = pv.atoms.first().copied() {
                if old_outer.is_var() {
                    let premise = Geq::new(new_atom, Atom::WILD, "", None, true);
                    let conclusion = Geq::new(old_outer, Atom::WILD, "", None, true);
                    if let Err(e) = self.cs.add_implies(premise, conclusion) {
                        warn!("dropping malformed implication: {}", e);
                    }
                }
            }
            let mut outer = pv;
            outer.atoms.insert(0, new_atom);
            outer.qualifiers.insert(0, ptrfit_ast::Qualifiers::none());
            outer.shapes.insert(0, ptrfit_ast::ArrayShape::Pointer);
            outer.bounds_key = None;
            outer.parent = None;
            outer.argument_constraints.clear();
            outer.has_eq_argument_constraints = false;
            out.push(self.push_cvar(ConstraintVariable::Pointer(outer)));
        }
        out
    }
}

/// Bounds key for a length-ish expression: an integer constant or a
/// reference to a tracked variable.
pub(crate) fn bounds_key_of_expr(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
) -> Option<BoundsKey> {
    match &e.kind {
        ExprKind::IntLit(v) if *v >= 0 => Some(info.bounds.get_const_key(*v as u64)),
        ExprKind::DeclRef(name) => ctx
            .lookup(name)
            .map(|b| b.bkey)
            .or_else(|| info.global_bounds_keys().get(name).copied()),
        ExprKind::Member { field, record, .. } => {
            let id = info.fields.get(&(record.clone(), field.clone())).copied()?;
            info.cvar(id).bounds_key()
        }
        ExprKind::Cast { expr, .. } => bounds_key_of_expr(info, ctx, expr),
        _ => None,
    }
}

/// Pull the pointee type and length factor out of an allocator size
/// argument shaped like `sizeof(T)`, `sizeof(T) * n`, or `n * sizeof(T)`.
fn analyze_alloc_size<'e>(size: &'e Expr) -> Option<(&'e CType, Option<&'e Expr>, bool)> {
    let size = size.ignore_implicit_casts();
    match &size.kind {
        ExprKind::SizeOf { arg } => Some((arg, None, false)),
        ExprKind::Binary { op: BinaryOp::Mul, lhs, rhs } => {
            let l = lhs.ignore_implicit_casts();
            let r = rhs.ignore_implicit_casts();
            if let ExprKind::SizeOf { arg } = &l.kind {
                Some((arg, Some(r), true))
            } else if let ExprKind::SizeOf { arg } = &r.kind {
                Some((arg, Some(l), true))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Resolve an allocator call to the pointer kind of its result plus an
/// allocator-priority count bound.
fn allocator_return(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    name: &str,
    args: &[Expr],
    loc: &SourceLoc,
) -> Option<CvarId> {
    let (kind, pointee, count_key) = if name == "calloc" {
        let size_arg = args.get(1)?;
        let (pointee, _, _) = analyze_alloc_size(size_arg)?;
        let nmemb = args.first()?;
        match &nmemb.ignore_implicit_casts().kind {
            ExprKind::IntLit(1) => (ConstAtom::Ptr, pointee, None),
            // calloc zero-fills, but its checked signature returns a plain
            // array pointer, so NTARR would be unsound to claim here.
            _ => {
                let key = bounds_key_of_expr(info, ctx, nmemb);
                (ConstAtom::Arr, pointee, key)
            }
        }
    } else {
        let size_arg = if name == "realloc" {
            args.get(1)?
        } else {
            args.first()?
        };
        let (pointee, factor, multiplied) = analyze_alloc_size(size_arg)?;
        if multiplied {
            let key = factor.and_then(|f| bounds_key_of_expr(info, ctx, f));
            (ConstAtom::Arr, pointee, key)
        } else {
            (ConstAtom::Ptr, pointee, None)
        }
    };

    let mut ret_ty = pointee.clone();
    ret_ty.levels.insert(0, ptrfit_ast::PointerLevel::pointer());
    // Allocators are generic in their checked signatures, so the fresh
    // return variable must not be wilded as a void pointer would be.
    let id = info.build_pointer_var(&ret_ty, &format!("&{}", name), None, 0, false);
    info.constrain_pv_outer_to(id, kind, true, "allocator call");

    let tmp = info.bounds.fresh_tmp_key();
    info.set_pv_bounds_key(id, tmp);
    if let Some(ck) = count_key {
        info.bounds.merge_bounds(
            tmp,
            crate::bounds::BoundsPriority::Allocator,
            crate::bounds::ABounds::Count(ck),
        );
    }
    debug!("allocator {} at {} returns {}", name, loc, kind);
    Some(id)
}

/// Constraint variables and bounds keys for an expression.
pub(crate) fn expr_cvars(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
) -> CvarsAndKeys {
    // Declaration references resolve through the scope, not the cache.
    match &e.kind {
        ExprKind::DeclRef(name) => {
            if !e.ty.is_pointer() && e.ty.function.is_none() {
                let id = info.non_ptr_pv();
                return no_keys(vec![id]);
            }
            if let Some(b) = ctx.lookup(name) {
                if let Some(id) = b.cvar {
                    return no_keys(vec![id]);
                }
            }
            if let Some(ids) = info.global_vars.get(name) {
                if let Some(id) = ids.first() {
                    return no_keys(vec![*id]);
                }
            }
            if let Some(id) = info.lookup_function(name, ctx.file) {
                return no_keys(vec![id]);
            }
            return no_keys(Vec::new());
        }
        ExprKind::Member { field, record, .. } => {
            let Some(id) = info.fields.get(&(record.clone(), field.clone())).copied()
            else {
                return no_keys(Vec::new());
            };
            // Field lengths are tracked per access site.
            let mut keys = BTreeSet::new();
            if let Some(base_key) = info.cvar(id).bounds_key() {
                keys.insert(info.bounds.get_ctx_sens_field_key(&e.loc, base_key));
            }
            return (vec![id], keys);
        }
        _ => {}
    }

    if !e.ty.is_pointer() && !matches!(e.kind, ExprKind::Cast { .. }) {
        if e.is_null_constant() {
            return no_keys(Vec::new());
        }
        let id = info.non_ptr_pv();
        return no_keys(vec![id]);
    }
    if e.is_null_constant() && !matches!(e.kind, ExprKind::Cast { implicit: false, .. }) {
        return no_keys(Vec::new());
    }

    if let Some(cached) = info.expr_cache.get(&e.loc) {
        return cached.clone();
    }

    let result: CvarsAndKeys = match &e.kind {
        ExprKind::IntLit(_) | ExprKind::NullPtr => no_keys(Vec::new()),

        ExprKind::StringLit(s) => {
            let ty = CType::pointer("char", 1);
            let id = info.build_pointer_var(&ty, "str", None, -1, false);
            info.constrain_pv_outer_to(id, ConstAtom::NtArr, true, "string literal");
            let key = info.bounds.fresh_tmp_key();
            info.set_pv_bounds_key(id, key);
            let len_key = info.bounds.get_const_key(s.len() as u64);
            info.bounds.replace_bounds(
                key,
                crate::bounds::BoundsPriority::Declared,
                crate::bounds::ABounds::Count(len_key),
            );
            no_keys(vec![id])
        }

        ExprKind::Cast { expr, implicit } => {
            let sub = expr_cvars(info, ctx, expr);
            let unsafe_cast = e.ty.is_pointer()
                && !ptrfit_ast::cast_is_safe(&e.ty, &expr.ty)
                && !expr.ty.is_function_pointer()
                && !matches!(
                    expr.ty.levels.first().map(|l| l.shape),
                    Some(ptrfit_ast::ArrayShape::Sized(_))
                        | Some(ptrfit_ast::ArrayShape::Unsized)
                )
                && !expr.ty.is_void_pointer();
            if *implicit {
                if unsafe_cast {
                    let reason =
                        format!("cast from {} to {}", expr.ty.spelling(), e.ty.spelling());
                    let wild = info.wild_pv(&e.ty, "invalid cast", &reason, &e.loc);
                    for s in &sub.0 {
                        info.constrain_cvar_geq(
                            *s,
                            wild,
                            Some(&e.loc),
                            ConsAction::SafeToWild,
                            false,
                            true,
                        );
                    }
                    (vec![wild], sub.1)
                } else {
                    sub
                }
            } else if unsafe_cast && !e.is_null_constant() {
                let reason =
                    format!("cast from {} to {}", expr.ty.spelling(), e.ty.spelling());
                let wild = info.wild_pv(&e.ty, "invalid cast", &reason, &e.loc);
                for s in &sub.0 {
                    info.constrain_cvar_geq(
                        *s,
                        wild,
                        Some(&e.loc),
                        ConsAction::SafeToWild,
                        false,
                        true,
                    );
                }
                no_keys(vec![wild])
            } else {
                // The cast node gets its own variable so its type can be
                // rewritten; inside macros it must stay as written.
                let id = info.build_pointer_var(&e.ty, "cast", None, -1, false);
                info.constrain_wild_if_macro(id, &e.loc, e.in_macro);
                if !e.is_null_constant() {
                    let sub_ids = sub.0.clone();
                    for s in sub_ids {
                        info.constrain_cvar_geq(
                            id,
                            s,
                            Some(&e.loc),
                            ConsAction::SameToSame,
                            false,
                            true,
                        );
                    }
                }
                (vec![id], sub.1)
            }
        }

        ExprKind::Binary { op, lhs, rhs } => match op {
            BinaryOp::Assign | BinaryOp::AddAssign | BinaryOp::SubAssign => {
                expr_cvars(info, ctx, lhs)
            }
            BinaryOp::Comma => expr_cvars(info, ctx, rhs),
            BinaryOp::Add | BinaryOp::Sub => {
                if lhs.ty.is_pointer() {
                    expr_cvars(info, ctx, lhs)
                } else if rhs.ty.is_pointer() {
                    expr_cvars(info, ctx, rhs)
                } else {
                    no_keys(vec![info.non_ptr_pv()])
                }
            }
            _ => no_keys(vec![info.non_ptr_pv()]),
        },

        ExprKind::Index { base, .. } => {
            let (vars, keys) = expr_cvars(info, ctx, base);
            (info.handle_deref(&vars), keys)
        }

        ExprKind::Unary { op, operand } => match op {
            UnaryOp::AddrOf => {
                match &operand.kind {
                    // &*e and &e[i] are no-ops pointer-wise.
                    ExprKind::Unary {
                        op: UnaryOp::Deref,
                        operand: inner,
                    } => expr_cvars(info, ctx, inner),
                    ExprKind::Index { base, .. } => expr_cvars(info, ctx, base),
                    _ => {
                        let (vars, keys) = expr_cvars(info, ctx, operand);
                        // The checked dialect does not let you take the
                        // address of a pointer with bounds, so cap the
                        // target at a single-object pointer. Constant-size
                        // arrays are the exception.
                        let var_list = vars.clone();
                        for v in &var_list {
                            let sized = info
                                .pv(*v)
                                .map(|p| {
                                    p.shapes.iter().any(|s| {
                                        matches!(s, ptrfit_ast::ArrayShape::Sized(_))
                                    })
                                })
                                .unwrap_or(false);
                            if !sized {
                                info.constrain_pv_outer_to(
                                    *v,
                                    ConstAtom::Ptr,
                                    false,
                                    "address taken",
                                );
                            }
                        }
                        (info.add_atom_all(&vars), keys)
                    }
                }
            }
            UnaryOp::Deref => {
                let (vars, keys) = expr_cvars(info, ctx, operand);
                (info.handle_deref(&vars), keys)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                expr_cvars(info, ctx, operand)
            }
            _ => no_keys(vec![info.non_ptr_pv()]),
        },

        ExprKind::Call { callee, args } => resolve_call(info, ctx, e, callee, args),

        ExprKind::Conditional {
            then_expr,
            else_expr,
            ..
        } => {
            let mut vars = Vec::new();
            let mut keys = BTreeSet::new();
            for sub in [then_expr, else_expr] {
                let (v, k) = expr_cvars(info, ctx, sub);
                vars.extend(v);
                keys.extend(k);
            }
            vars.dedup();
            (vars, keys)
        }

        ExprKind::InitList(items) => {
            let mut vars = Vec::new();
            let mut keys = BTreeSet::new();
            for item in items {
                let (v, k) = expr_cvars(info, ctx, item);
                vars.extend(v);
                keys.extend(k);
            }
            let is_array = matches!(
                e.ty.levels.first().map(|l| l.shape),
                Some(ptrfit_ast::ArrayShape::Sized(_)) | Some(ptrfit_ast::ArrayShape::Unsized)
            );
            if is_array {
                // Array initialization adds an indirection, like AddrOf.
                let lifted = info.add_atom_all(&vars);
                for v in &lifted {
                    info.constrain_pv_outer_to(*v, ConstAtom::Arr, true, "array initializer");
                }
                (lifted, keys)
            } else {
                (vars, keys)
            }
        }

        ExprKind::CompoundLiteral { init } => {
            let mut vars = Vec::new();
            for item in init {
                let (v, _) = expr_cvars(info, ctx, item);
                vars.extend(v);
            }
            let id = info.build_pointer_var(&e.ty, "compound literal", None, -1, false);
            info.constrain_wild_if_macro(id, &e.loc, e.in_macro);
            for v in vars {
                info.constrain_cvar_geq(id, v, Some(&e.loc), ConsAction::SameToSame, false, true);
            }
            no_keys(vec![id])
        }

        ExprKind::VaArg => {
            let id = info.wild_pv(&e.ty, "va_arg", "accessing variable arguments", &e.loc);
            no_keys(vec![id])
        }

        ExprKind::SizeOf { .. } => no_keys(vec![info.non_ptr_pv()]),

        // Handled before the cache.
        ExprKind::DeclRef(_) | ExprKind::Member { .. } => no_keys(Vec::new()),
    };

    info.expr_cache.insert(e.loc.clone(), result.clone());
    result
}

/// The call-site view of a function's return value.
fn resolve_call(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
    callee: &Expr,
    args: &[Expr],
) -> CvarsAndKeys {
    let callee_name = match &callee.ignore_implicit_casts().kind {
        ExprKind::DeclRef(name) => Some(name.clone()),
        _ => None,
    };

    // Allocators never go through their declared signature; the call site
    // determines the pointer kind directly.
    if let Some(name) = &callee_name {
        if info.opts.is_allocator(name) {
            if let Some(id) = allocator_return(info, ctx, name, args, &e.loc) {
                if name == "realloc" {
                    if let Some(first) = args.first() {
                        let (flow, _) =
                            expr_cvars(info, ctx, first.ignore_implicit_casts());
                        for f in flow {
                            info.constrain_cvar_geq(
                                id,
                                f,
                                Some(&e.loc),
                                ConsAction::WildToSafe,
                                false,
                                true,
                            );
                        }
                    }
                }
                return no_keys(vec![id]);
            }
            let id = info.wild_pv(
                &e.ty,
                "alloc",
                "unsafe call to allocator function",
                &e.loc,
            );
            return no_keys(vec![id]);
        }
    }

    // Find the callee's function variable: a direct declaration, or the
    // signature behind a function pointer.
    let mut fv_ids: Vec<CvarId> = Vec::new();
    if let Some(name) = &callee_name {
        if let Some(b) = ctx.lookup(name) {
            if let Some(id) = b.cvar {
                fv_ids.push(id);
            }
        } else if let Some(id) = info.lookup_function(name, ctx.file) {
            fv_ids.push(id);
        }
    } else {
        let (vars, _) = expr_cvars(info, ctx, callee);
        fv_ids = vars;
    }

    let mut ret_vars = Vec::new();
    for cv in fv_ids {
        let ret_ext = match self_fv_return(info, cv) {
            Some(r) => r,
            None => continue,
        };
        let func_name = info.cvar(cv).name().to_string();
        let copy = info.copy_cvar(ret_ext);
        // A call result's length is tracked per call site.
        if let Some(base_key) = info.cvar(copy).bounds_key() {
            let ck = info.bounds.get_ctx_sens_key(&e.loc, base_key, &func_name);
            match info.cvar_mut(copy) {
                ConstraintVariable::Pointer(pv) => pv.bounds_key = Some(ck),
                ConstraintVariable::Function(fv) => fv.bounds_key = Some(ck),
            }
        }
        // In a macro no cast can be inserted, so the views must unify.
        let action = if info.is_rewritable(&e.loc, e.in_macro) {
            ConsAction::SafeToWild
        } else {
            ConsAction::SameToSame
        };
        info.constrain_cvar_geq(copy, ret_ext, Some(&e.loc), action, false, false);
        ret_vars.push(copy);
    }
    no_keys(ret_vars)
}

fn self_fv_return(info: &ProgramInfo, cv: CvarId) -> Option<CvarId> {
    if let Some(fv) = info.fv(cv) {
        return Some(fv.ret.external);
    }
    let pv = info.pv(cv)?;
    let fv = info.fv(pv.fv?)?;
    Some(fv.ret.external)
}

/// Assignment constraint between two expressions, wiring both the lattice
/// and the bounds flow.
pub(crate) fn constrain_local_assign(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    loc: &SourceLoc,
    lhs: &Expr,
    rhs: &Expr,
    action: ConsAction,
) {
    let (lv, lb) = expr_cvars(info, ctx, lhs);
    let (rv, rb) = expr_cvars(info, ctx, rhs);
    let handle_bounds = lb.is_empty() && rb.is_empty();

    for l in &lv {
        for r in &rv {
            info.constrain_cvar_geq(*l, *r, Some(loc), action, false, handle_bounds);
        }
    }

    // Self-referential pointer assignments (p = p + 1) are arithmetic in
    // disguise; the target is an array pointer.
    if names_of(lhs).intersection(&names_of(rhs)).next().is_some() {
        for l in &lv {
            if let Some(k) = info.cvar(*l).bounds_key() {
                info.bounds.mark_arr_pointer(k);
            }
        }
    }

    if info.opts.all_types {
        let l_valid = lv.iter().any(|v| is_valid_cons(info, *v));
        let r_valid = rv.iter().any(|v| is_valid_cons(info, *v));
        if (!l_valid && !r_valid) || !handle_bounds {
            let lkeys = keys_for(info, ctx, lhs, &lv, &lb);
            let rkeys = keys_for(info, ctx, rhs, &rv, &rb);
            for lk in &lkeys {
                for rk in &rkeys {
                    info.bounds.add_assignment(*lk, *rk);
                }
            }
        }
    }
}

fn keys_for(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
    vars: &[CvarId],
    expr_keys: &BTreeSet<BoundsKey>,
) -> Vec<BoundsKey> {
    if !expr_keys.is_empty() {
        return expr_keys.iter().copied().collect();
    }
    if vars.len() == 1 {
        if let Some(k) = info.cvar(vars[0]).bounds_key() {
            return vec![k];
        }
    }
    bounds_key_of_expr(info, ctx, e).into_iter().collect()
}

pub(crate) fn is_valid_cons(info: &ProgramInfo, id: CvarId) -> bool {
    info.pv(id).map(|p| !p.atoms.is_empty()).unwrap_or(false)
}

/// All declaration names mentioned in an expression
fn names_of(e: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_names(e, &mut out);
    out
}

fn collect_names(e: &Expr, out: &mut BTreeSet<String>) {
    match &e.kind {
        ExprKind::DeclRef(name) => {
            out.insert(name.clone());
        }
        ExprKind::Member { base, .. } => collect_names(base, out),
        ExprKind::Call { callee, args } => {
            collect_names(callee, out);
            for a in args {
                collect_names(a, out);
            }
        }
        ExprKind::Unary { operand, .. } => collect_names(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_names(lhs, out);
            collect_names(rhs, out);
        }
        ExprKind::Index { base, index } => {
            collect_names(base, out);
            collect_names(index, out);
        }
        ExprKind::Cast { expr, .. } => collect_names(expr, out),
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            collect_names(cond, out);
            collect_names(then_expr, out);
            collect_names(else_expr, out);
        }
        ExprKind::InitList(items) | ExprKind::CompoundLiteral { init: items } => {
            for i in items {
                collect_names(i, out);
            }
        }
        _ => {}
    }
}

/// Record one argument binding for later cast placement.
pub(crate) fn record_call_arg(
    info: &mut ProgramInfo,
    loc: &SourceLoc,
    param_external: CvarId,
    args: &[CvarId],
) {
    for arg in args {
        info.call_arg_records.push(CallArgRecord {
            loc: loc.clone(),
            param_external,
            arg: *arg,
        });
    }
}
