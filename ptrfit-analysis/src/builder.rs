// Constraint generation over the program: a variable-adder pass registers
// every declaration, then a generation pass walks function bodies and
// initializers, and with the pointer-type pass enabled a final pass applies
// the length-variable heuristics.

use crate::bounds::{ABounds, BoundsKey, BoundsPriority, ProgramVarScope};
use crate::errors::span_of;
use crate::program_info::ProgramInfo;
use crate::resolver::{
    bounds_key_of_expr, constrain_local_assign, expr_cvars, record_call_arg, FuncContext,
    ScopeBinding,
};
use crate::vars::{ConsAction, ConstraintVariable, CvarId};
use log::{debug, info as log_info, warn};
use ptrfit_ast::{
    ArrayShape, BinaryOp, CType, Decl, Expr, ExprKind, FieldDecl, FunctionDecl, Program,
    RecordDecl, SourceLoc, Stmt, TranslationUnit, VarDecl,
};
use ptrfit_constraints::ConstAtom;
use ptrfit_diagnostics::error_codes;
use std::collections::{BTreeSet, HashMap};

/// Build all constraints for a program. Safe to call once per program; the
/// declarations of every translation unit are absorbed before any body is
/// visited so cross-unit calls resolve.
pub fn build_constraints(info: &mut ProgramInfo, program: &Program) {
    info.perf.start_constraint_builder_time();

    for unit in &program.units {
        log_info!("analyzing file {}", unit.file);
        add_variables(info, unit);
    }
    for unit in &program.units {
        generate_constraints(info, unit);
    }
    if info.opts.all_types {
        for unit in &program.units {
            length_var_heuristics(info, unit);
        }
    }
    log_info!("done analyzing");

    info.perf.end_constraint_builder_time();

    info.perf.end_constraint_builder_time();
}

// ---- variable adder -----------------------------------------------------

fn add_variables(info: &mut ProgramInfo, unit: &TranslationUnit) {
    for decl in &unit.decls {
        match decl {
            Decl::Typedef(td) => {
                if !info.typedefs.contains_key(&td.loc) {
                    info.typedefs
                        .insert(td.loc.clone(), (td.name.clone(), true));
                }
            }
            Decl::Record(rd) => add_record(info, rd),
            Decl::Var(vd) => {
                add_global_var(info, vd);
            }
            Decl::Function(fd) => add_function(info, fd, &unit.file),
        }
    }
}

fn add_record(info: &mut ProgramInfo, rd: &RecordDecl) {
    let record_name = if rd.is_anonymous() {
        format!("struct at {}", rd.loc)
    } else {
        rd.name.clone()
    };
    info.record_fields.insert(
        record_name.clone(),
        rd.fields.iter().map(|f| f.name.clone()).collect(),
    );

    // Two passes: keys first, so a field's declared bounds can reference a
    // sibling length field regardless of declaration order.
    let mut field_keys: Vec<(String, BoundsKey)> = Vec::new();
    for field in &rd.fields {
        let key = info.bounds.get_decl_key(
            &field.loc,
            &field.name,
            ProgramVarScope::Struct {
                name: record_name.clone(),
            },
            field.ty.is_pointer(),
        );
        field_keys.push((field.name.clone(), key));
    }
    for (field, (_, key)) in rd.fields.iter().zip(field_keys.iter()) {
        add_field(info, rd, &record_name, field, *key, &field_keys);
    }
}

fn add_field(
    info: &mut ProgramInfo,
    rd: &RecordDecl,
    record_name: &str,
    field: &FieldDecl,
    key: BoundsKey,
    siblings: &[(String, BoundsKey)],
) {
    let is_ptr = field.ty.is_pointer();
    let id = info.build_pointer_var(&field.ty, &field.name, None, -1, false);
    info.set_pv_bounds_key(id, key);
    if let ConstraintVariable::Pointer(pv) = info.cvar_mut(id) {
        pv.for_valid_decl = true;
    }
    info.fields
        .insert((record_name.to_string(), field.name.clone()), id);
    if is_ptr {
        info.variables.insert(field.loc.clone(), id);
        let siblings = siblings.to_vec();
        record_declared_bounds(info, key, &field.ty, &field.loc, &field.name, move |n| {
            siblings.iter().find(|(sn, _)| sn == n).map(|(_, k)| *k)
        });

        if rd.is_union {
            info.constrain_to_wild(id, "field of a union", Some(&field.loc));
        } else if rd.is_inline && rd.is_anonymous() {
            if info.opts.all_types {
                info.diags.inline_struct(&field.name, span_of(&field.loc));
            } else {
                info.constrain_to_wild(id, "field of an inline struct", Some(&field.loc));
            }
        }
    }
}

fn add_global_var(info: &mut ProgramInfo, vd: &VarDecl) -> Option<CvarId> {
    let is_ptr = vd.ty.is_pointer();
    let key = info
        .bounds
        .get_decl_key(&vd.loc, &vd.name, ProgramVarScope::Global, is_ptr);
    info.global_bkeys.insert(vd.name.clone(), key);
    if !is_ptr {
        return None;
    }
    let id = info.build_pointer_var(&vd.ty, &vd.name, None, -1, false);
    info.set_pv_bounds_key(id, key);
    if let ConstraintVariable::Pointer(pv) = info.cvar_mut(id) {
        pv.for_valid_decl = true;
    }
    info.variables.insert(vd.loc.clone(), id);
    info.global_vars
        .entry(vd.name.clone())
        .or_default()
        .push(id);
    let globals = info.global_bkeys.clone();
    record_declared_bounds(info, key, &vd.ty, &vd.loc, &vd.name, move |n| {
        globals.get(n).copied()
    });
    Some(id)
}

/// Declared bounds and constant array sizes both install declared-priority
/// bounds on the key.
fn record_declared_bounds<F>(
    info: &mut ProgramInfo,
    key: BoundsKey,
    ty: &CType,
    loc: &SourceLoc,
    name: &str,
    lookup: F,
) where
    F: FnMut(&str) -> Option<BoundsKey>,
{
    if let Some(bexpr) = &ty.bounds {
        let ok = info.bounds.insert_declared_bounds(key, bexpr, lookup);
        if !ok {
            let err = crate::errors::AnalysisError::InvalidBounds {
                name: name.to_string(),
            };
            info.diags.emit(err.to_diagnostic(Some(loc)));
        }
        return;
    }
    if let Some(ptrfit_ast::PointerLevel {
        shape: ArrayShape::Sized(n),
        ..
    }) = ty.levels.first()
    {
        let ck = info.bounds.get_const_key(*n);
        info.bounds
            .merge_bounds(key, BoundsPriority::Declared, ABounds::Count(ck));
    }
}

fn add_function(info: &mut ProgramInfo, fd: &FunctionDecl, file: &str) {
    let new_id = info.build_function_var(fd, file);
    let existing = if fd.is_static {
        info.static_fns
            .get(&(file.to_string(), fd.name.clone()))
            .copied()
    } else {
        info.extern_fns.get(&fd.name).copied()
    };
    match existing {
        Some(prev) => {
            if let Err(e) = info.merge_fv_declaration(prev, new_id) {
                info.diags.emit(e.to_diagnostic(Some(&fd.loc)));
            }
            info.variables.insert(fd.loc.clone(), prev);
        }
        None => {
            if fd.is_static {
                info.static_fns
                    .insert((file.to_string(), fd.name.clone()), new_id);
            } else {
                info.extern_fns.insert(fd.name.clone(), new_id);
            }
            info.variables.insert(fd.loc.clone(), new_id);
        }
    }
}

// ---- constraint generation ----------------------------------------------

fn generate_constraints(info: &mut ProgramInfo, unit: &TranslationUnit) {
    for decl in &unit.decls {
        match decl {
            Decl::Var(vd) => {
                let mut ctx = FuncContext::file_scope(&unit.file);
                global_init_constraints(info, &mut ctx, vd);
            }
            Decl::Function(fd) => {
                if fd.has_body() {
                    debug!("analyzing function {}", fd.name);
                    function_constraints(info, fd, &unit.file);
                }
            }
            _ => {}
        }
    }
}

fn global_init_constraints(info: &mut ProgramInfo, ctx: &mut FuncContext, vd: &VarDecl) {
    let Some(init) = &vd.init else { return };
    visit_expr(info, ctx, init, &HashMap::new());

    if struct_init_constraints(info, ctx, vd, init) {
        return;
    }
    let decl_cvar = info.variable_at(&vd.loc);
    let decl_bkey = info.bounds.decl_key(&vd.loc);
    constrain_decl_assign(info, ctx, vd, decl_cvar, decl_bkey, init);
}

/// Struct initializers assign each field from the matching element.
fn struct_init_constraints(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    vd: &VarDecl,
    init: &Expr,
) -> bool {
    if vd.ty.is_pointer() {
        return false;
    }
    let ExprKind::InitList(items) = &init.kind else {
        return false;
    };
    let record = vd.ty.base.trim_start_matches("struct ").to_string();
    let Some(field_names) = info.record_fields.get(&record).cloned() else {
        return false;
    };
    for (item, fname) in init_items_zip(items, &field_names) {
        let Some(fid) = info.fields.get(&(record.clone(), fname.clone())).copied() else {
            continue;
        };
        let (ivars, _) = expr_cvars(info, ctx, item);
        for iv in ivars {
            info.constrain_cvar_geq(
                fid,
                iv,
                Some(&item.loc),
                ConsAction::SameToSame,
                false,
                true,
            );
        }
    }
    true
}

fn init_items_zip<'a>(
    items: &'a [Expr],
    names: &'a [String],
) -> impl Iterator<Item = (&'a Expr, &'a String)> {
    items.iter().zip(names.iter())
}

fn function_constraints(info: &mut ProgramInfo, fd: &FunctionDecl, file: &str) {
    let Some(fv_id) = info.variable_at(&fd.loc) else {
        return;
    };
    let Some(fv) = info.fv(fv_id) else { return };
    let params = fv.params.clone();

    let mut ctx = FuncContext {
        func: Some(fd),
        file,
        scopes: vec![HashMap::new()],
    };
    for (i, p) in fd.params.iter().enumerate() {
        let Some(comp) = params.get(i) else { break };
        let existing = info.pv(comp.external).and_then(|pv| pv.bounds_key);
        let bkey = match existing {
            Some(k) => k,
            None => info.bounds.get_param_key(
                &fd.name,
                file,
                fd.is_static,
                i,
                &p.name,
                p.ty.is_pointer(),
            ),
        };
        ctx.bind(
            &p.name,
            ScopeBinding {
                cvar: p.ty.is_pointer().then_some(comp.internal),
                bkey,
            },
        );
    }

    let body = fd.body.clone().unwrap_or_default();
    let guards = HashMap::new();
    for stmt in &body {
        visit_stmt(info, &mut ctx, fv_id, stmt, &guards);
    }
}

fn visit_stmt(
    info: &mut ProgramInfo,
    ctx: &mut FuncContext,
    fv_id: CvarId,
    stmt: &Stmt,
    guards: &HashMap<String, BoundsKey>,
) {
    match stmt {
        Stmt::Decl(vd) => {
            let (func_name, is_static) = ctx
                .func
                .map(|f| (f.name.clone(), f.is_static))
                .unwrap_or_default();
            let is_ptr = vd.ty.is_pointer();
            let key = info.bounds.get_decl_key(
                &vd.loc,
                &vd.name,
                ProgramVarScope::Function {
                    name: func_name,
                    is_static,
                },
                is_ptr,
            );
            let cvar = if is_ptr {
                let id = info.build_pointer_var(&vd.ty, &vd.name, None, -1, false);
                info.set_pv_bounds_key(id, key);
                if let ConstraintVariable::Pointer(pv) = info.cvar_mut(id) {
                    pv.for_valid_decl = true;
                }
                info.variables.insert(vd.loc.clone(), id);
                let lookup_ctx: Vec<(String, BoundsKey)> = ctx
                    .scopes
                    .iter()
                    .flat_map(|s| s.iter().map(|(n, b)| (n.clone(), b.bkey)))
                    .collect();
                let globals = info.global_bkeys.clone();
                record_declared_bounds(info, key, &vd.ty, &vd.loc, &vd.name, move |n| {
                    lookup_ctx
                        .iter()
                        .find(|(ln, _)| ln == n)
                        .map(|(_, k)| *k)
                        .or_else(|| globals.get(n).copied())
                });
                Some(id)
            } else {
                None
            };
            ctx.bind(&vd.name, ScopeBinding { cvar, bkey: key });

            if let Some(init) = &vd.init {
                visit_expr(info, ctx, init, guards);
                constrain_decl_assign(info, ctx, vd, cvar, Some(key), init);
            }
        }
        Stmt::Expr(e) => visit_expr(info, ctx, e, guards),
        Stmt::Return(Some(e), loc) => {
            visit_expr(info, ctx, e, guards);
            let ret_internal = info.fv(fv_id).map(|f| f.ret.internal);
            if let Some(ret) = ret_internal {
                let (rvars, _) = expr_cvars(info, ctx, e);
                for rv in rvars {
                    info.constrain_cvar_geq(ret, rv, Some(loc), ConsAction::SameToSame, false, true);
                }
            }
        }
        Stmt::Return(None, _) => {}
        Stmt::Block(stmts) => {
            ctx.push_scope();
            for s in stmts {
                visit_stmt(info, ctx, fv_id, s, guards);
            }
            ctx.pop_scope();
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            visit_expr(info, ctx, cond, guards);
            let mut then_guards = guards.clone();
            extend_guards(info, ctx, cond, &mut then_guards);
            ctx.push_scope();
            for s in then_branch {
                visit_stmt(info, ctx, fv_id, s, &then_guards);
            }
            ctx.pop_scope();
            ctx.push_scope();
            for s in else_branch {
                visit_stmt(info, ctx, fv_id, s, guards);
            }
            ctx.pop_scope();
        }
        Stmt::While { cond, body } => {
            visit_expr(info, ctx, cond, guards);
            let mut body_guards = guards.clone();
            extend_guards(info, ctx, cond, &mut body_guards);
            ctx.push_scope();
            for s in body {
                visit_stmt(info, ctx, fv_id, s, &body_guards);
            }
            ctx.pop_scope();
        }
    }
}

/// `if (i < n)` marks `n` as an upper bound for indexes through `i`.
fn extend_guards(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    cond: &Expr,
    guards: &mut HashMap<String, BoundsKey>,
) {
    if let ExprKind::Binary { op, lhs, rhs } = &cond.kind {
        let (idx, bound) = match op {
            BinaryOp::Lt => (lhs, rhs),
            BinaryOp::Gt => (rhs, lhs),
            _ => return,
        };
        if let ExprKind::DeclRef(i) = &idx.kind {
            if let Some(nkey) = bounds_key_of_expr(info, ctx, bound) {
                guards.insert(i.clone(), nkey);
            }
        }
    }
}

fn visit_expr(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
    guards: &HashMap<String, BoundsKey>,
) {
    match &e.kind {
        ExprKind::Binary { op, lhs, rhs } => {
            match op {
                BinaryOp::Assign => {
                    constrain_local_assign(info, ctx, &e.loc, lhs, rhs, ConsAction::SameToSame);
                }
                BinaryOp::AddAssign | BinaryOp::SubAssign => {
                    pointer_arith(info, ctx, lhs, true);
                    pointer_arith(info, ctx, rhs, true);
                }
                BinaryOp::Add | BinaryOp::Sub => {
                    pointer_arith(info, ctx, lhs, false);
                    pointer_arith(info, ctx, rhs, false);
                }
                _ => {}
            }
            visit_expr(info, ctx, lhs, guards);
            visit_expr(info, ctx, rhs, guards);
        }
        ExprKind::Unary { op, operand } => {
            if op.is_inc_dec() {
                pointer_arith(info, ctx, operand, true);
            }
            visit_expr(info, ctx, operand, guards);
        }
        ExprKind::Index { base, index } => {
            if base.ty.is_pointer() {
                let (bvars, _) = expr_cvars(info, ctx, base);
                for bv in &bvars {
                    info.constrain_pv_outer_to(*bv, ConstAtom::Arr, true, "array subscript");
                }
                // A guarded index donates its bound as a length candidate.
                if let ExprKind::DeclRef(i) = &index.kind {
                    if let Some(nkey) = guards.get(i).copied() {
                        let keys: BTreeSet<BoundsKey> = std::iter::once(nkey).collect();
                        for bv in &bvars {
                            if let Some(k) = info.cvar(*bv).bounds_key() {
                                info.bounds.update_potential_count_bounds(k, &keys);
                            }
                        }
                    }
                }
            }
            visit_expr(info, ctx, base, guards);
            visit_expr(info, ctx, index, guards);
        }
        ExprKind::Call { callee, args } => {
            handle_call(info, ctx, e, callee, args);
            for a in args {
                visit_expr(info, ctx, a, guards);
            }
            visit_expr(info, ctx, callee, guards);
        }
        ExprKind::Cast { expr, .. } => {
            // Resolving the cast applies its safety rules.
            let _ = expr_cvars(info, ctx, e);
            visit_expr(info, ctx, expr, guards);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            visit_expr(info, ctx, cond, guards);
            visit_expr(info, ctx, then_expr, guards);
            visit_expr(info, ctx, else_expr, guards);
        }
        ExprKind::Member { base, .. } => visit_expr(info, ctx, base, guards),
        ExprKind::InitList(items) | ExprKind::CompoundLiteral { init: items } => {
            for i in items {
                visit_expr(info, ctx, i, guards);
            }
        }
        _ => {}
    }
}

/// Pointer arithmetic forces at least an array pointer; on a function
/// pointer it cannot be checked at all.
fn pointer_arith(info: &mut ProgramInfo, ctx: &FuncContext, e: &Expr, modifying: bool) {
    if !e.ty.is_pointer() {
        return;
    }
    if e.ty.is_function_pointer() {
        let (vars, _) = expr_cvars(info, ctx, e);
        for v in vars {
            info.constrain_to_wild(
                v,
                "pointer arithmetic performed on a function pointer",
                Some(&e.loc),
            );
        }
        return;
    }
    let (vars, _) = expr_cvars(info, ctx, e);
    for v in &vars {
        info.constrain_pv_outer_to(*v, ConstAtom::Arr, true, "pointer arithmetic");
        if modifying {
            if let Some(k) = info.cvar(*v).bounds_key() {
                info.bounds.record_arithmetic(k);
            }
        }
    }
}

fn handle_call(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    e: &Expr,
    callee: &Expr,
    args: &[Expr],
) {
    let callee_name = match &callee.ignore_implicit_casts().kind {
        ExprKind::DeclRef(name) => Some(name.clone()),
        _ => None,
    };

    // Allocator arguments are size expressions; constraining them against
    // the declared signature would only leak wildness.
    if let Some(name) = &callee_name {
        if info.opts.is_allocator(name) {
            let _ = expr_cvars(info, ctx, e);
            return;
        }
    }

    // Locate the callee's function variable.
    let mut fv_id: Option<CvarId> = None;
    if let Some(name) = &callee_name {
        fv_id = ctx
            .lookup(name)
            .and_then(|b| b.cvar)
            .or_else(|| info.lookup_function(name, ctx.file));
    } else {
        let (vars, _) = expr_cvars(info, ctx, callee);
        if vars.len() > 1 {
            // All function pointers reaching this call must agree.
            for pair in vars.windows(2) {
                info.constrain_cvar_geq(
                    pair[0],
                    pair[1],
                    Some(&e.loc),
                    ConsAction::SameToSame,
                    false,
                    true,
                );
            }
        }
        fv_id = vars.first().copied();
    }

    let resolved = fv_id.and_then(|id| {
        if info.fv(id).is_some() {
            Some(id)
        } else {
            info.pv(id).and_then(|pv| pv.fv)
        }
    });

    let Some(fid) = resolved else {
        // Unknown callee: nothing to constrain against, so the arguments
        // must stay as they are.
        let name = callee_name.unwrap_or_else(|| "function pointer".to_string());
        let known = info.known_function_names();
        info.diags.unknown_function(&name, span_of(&e.loc), &known);
        for a in args {
            let (avars, _) = expr_cvars(info, ctx, a);
            for av in avars {
                info.constrain_to_wild(
                    av,
                    &format!("argument to unknown function `{}`", name),
                    Some(&a.loc),
                );
            }
        }
        return;
    };

    let Some(fv) = info.fv(fid) else { return };
    let params = fv.params.clone();
    let func_name = fv.name.clone();
    let type_params = fv.type_params;
    let has_proto = fv.has_proto;

    // Untyped prototype: remember the arguments for when a typed
    // declaration shows up.
    if !has_proto && params.is_empty() {
        let mut arg_sets = Vec::new();
        for a in args {
            arg_sets.push(expr_cvars(info, ctx, a).0);
        }
        if let ConstraintVariable::Function(fv) = info.cvar_mut(fid) {
            fv.deferred_params.push((e.loc.clone(), arg_sets));
        }
        return;
    }

    // Type parameters instantiated consistently across a call can keep
    // their checked identity; the synthetic argument variable joins every
    // use.
    let consistent = if type_params > 0 {
        consistent_type_params(info, &params, args)
    } else {
        BTreeSet::new()
    };
    for t in &consistent {
        let witness = args.iter().zip(params.iter()).find_map(|(a, p)| {
            let gi = info.pv(p.external).map(|pv| pv.generic_index).unwrap_or(-1);
            (gi == *t as i32).then(|| a.ignore_implicit_casts().ty.clone())
        });
        if let Some(ty) = witness {
            let tyarg = info.build_pointer_var(&ty, &format!("tyarg_{}", t), None, *t as i32, false);
            for (a, p) in args.iter().zip(params.iter()) {
                let gi = info.pv(p.external).map(|pv| pv.generic_index).unwrap_or(-1);
                if gi == *t as i32 {
                    let (avars, _) = expr_cvars(info, ctx, a.ignore_implicit_casts());
                    for av in avars {
                        info.constrain_cvar_geq(
                            tyarg,
                            av,
                            Some(&e.loc),
                            ConsAction::SafeToWild,
                            false,
                            true,
                        );
                    }
                }
            }
            info.type_param_bindings
                .entry(e.loc.clone())
                .or_default()
                .insert(*t, tyarg);
        }
    }

    for (i, a) in args.iter().enumerate() {
        if let Some(comp) = params.get(i) {
            let gi = info
                .pv(comp.external)
                .map(|pv| pv.generic_index)
                .unwrap_or(-1);
            let arg_expr = if gi >= 0 && consistent.contains(&(gi as u32)) {
                a.ignore_implicit_casts()
            } else {
                a
            };
            let (avars, akeys) = expr_cvars(info, ctx, arg_expr);

            // No cast can be inserted at an unwritable location, so the
            // types must unify there instead.
            let action = if info.is_rewritable(&a.loc, a.in_macro) {
                ConsAction::WildToSafe
            } else {
                info.diags.emit_warning(
                    error_codes::UNWRITABLE_CAST,
                    format!(
                        "argument of `{}` is inside a macro; its type cannot diverge from the parameter",
                        func_name
                    ),
                    span_of(&a.loc),
                );
                ConsAction::SameToSame
            };
            for av in &avars {
                info.constrain_cvar_geq(comp.external, *av, Some(&e.loc), action, false, false);
            }
            record_call_arg(info, &e.loc, comp.external, &avars);

            // Context-sensitive bounds binding for this call site.
            if info.opts.all_types {
                let param_key = info.pv(comp.external).and_then(|pv| pv.bounds_key);
                if let Some(pk) = param_key {
                    let ck = info.bounds.get_ctx_sens_key(&e.loc, pk, &func_name);
                    let mut arg_keys: Vec<BoundsKey> = akeys.iter().copied().collect();
                    if arg_keys.is_empty() {
                        if avars.len() == 1 {
                            if let Some(k) = info.cvar(avars[0]).bounds_key() {
                                arg_keys.push(k);
                            }
                        }
                        if arg_keys.is_empty() {
                            if let Some(k) = bounds_key_of_expr(info, ctx, arg_expr) {
                                arg_keys.push(k);
                            }
                        }
                    }
                    for ak in arg_keys {
                        info.bounds.add_assignment(ck, ak);
                    }
                }
            }
        } else {
            // Extra arguments to a variadic function.
            if info.opts.handle_varargs {
                let (avars, _) = expr_cvars(info, ctx, a);
                for av in avars {
                    info.constrain_to_wild(
                        av,
                        "passing argument to a function accepting variable arguments",
                        Some(&a.loc),
                    );
                }
            } else {
                warn!("skipping variadic argument of {}", func_name);
                info.diags.emit_warning(
                    error_codes::VARARG_CALL,
                    format!("argument beyond the declared parameters of `{}` left as is", func_name),
                    span_of(&a.loc),
                );
            }
        }
    }
}

/// A type parameter is consistently used when every argument bound to it
/// shows the same pointee type.
fn consistent_type_params(
    info: &ProgramInfo,
    params: &[crate::vars::FvComponent],
    args: &[Expr],
) -> BTreeSet<u32> {
    let mut seen: HashMap<u32, Option<CType>> = HashMap::new();
    for (a, p) in args.iter().zip(params.iter()) {
        let gi = info.pv(p.external).map(|pv| pv.generic_index).unwrap_or(-1);
        if gi < 0 {
            continue;
        }
        let arg_ty = a.ignore_implicit_casts().ty.clone();
        match seen.entry(gi as u32) {
            std::collections::hash_map::Entry::Vacant(v) => {
                if arg_ty.is_pointer() {
                    v.insert(Some(arg_ty));
                } else {
                    v.insert(None);
                }
            }
            std::collections::hash_map::Entry::Occupied(mut o) => {
                if o.get().as_ref() != Some(&arg_ty) {
                    o.insert(None);
                }
            }
        }
    }
    seen.into_iter()
        .filter_map(|(t, ty)| ty.map(|_| t))
        .collect()
}

fn constrain_decl_assign(
    info: &mut ProgramInfo,
    ctx: &FuncContext,
    vd: &VarDecl,
    decl_cvar: Option<CvarId>,
    decl_bkey: Option<BoundsKey>,
    init: &Expr,
) {
    let (rvars, rkeys) = expr_cvars(info, ctx, init);
    let handle_bounds = rkeys.is_empty();
    if let Some(cv) = decl_cvar {
        for rv in &rvars {
            info.constrain_cvar_geq(
                cv,
                *rv,
                Some(&vd.loc),
                ConsAction::SameToSame,
                false,
                handle_bounds,
            );
        }
    }
    if info.opts.all_types {
        let l_valid = decl_cvar
            .map(|cv| crate::resolver::is_valid_cons(info, cv))
            .unwrap_or(false);
        let r_valid = rvars.iter().any(|v| crate::resolver::is_valid_cons(info, *v));
        if (!l_valid && !r_valid) || !handle_bounds {
            if let Some(lk) = decl_bkey {
                let mut all_rkeys: Vec<BoundsKey> = rkeys.iter().copied().collect();
                if all_rkeys.is_empty() {
                    if let Some(k) = bounds_key_of_expr(info, ctx, init) {
                        all_rkeys.push(k);
                    }
                }
                for rk in all_rkeys {
                    info.bounds.add_assignment(lk, rk);
                }
            }
        }
    }
}

// ---- heuristics ---------------------------------------------------------

/// Parameter-shape heuristics: an integer parameter with a length-like name
/// next to an array parameter is taken as its count; `main`'s argv is
/// bounded by argc.
fn length_var_heuristics(info: &mut ProgramInfo, unit: &TranslationUnit) {
    for decl in &unit.decls {
        let Decl::Function(fd) = decl else { continue };
        let Some(fv_id) = info.variable_at(&fd.loc) else {
            continue;
        };
        let Some(fv) = info.fv(fv_id) else { continue };
        let params = fv.params.clone();

        if fd.name == "main" && fd.params.len() >= 2 {
            let argc_key = info.pv(params[0].external).and_then(|p| p.bounds_key);
            let argv_key = info.pv(params[1].external).and_then(|p| p.bounds_key);
            if let (Some(argc), Some(argv)) = (argc_key, argv_key) {
                info.bounds
                    .merge_bounds(argv, BoundsPriority::Heuristics, ABounds::Count(argc));
            }
            continue;
        }

        for i in 0..fd.params.len() {
            let Some(arr_param) = fd.params.get(i) else { break };
            if !arr_param.ty.is_pointer() {
                continue;
            }
            let Some(len_param) = fd.params.get(i + 1) else {
                break;
            };
            if len_param.ty.is_pointer() {
                continue;
            }
            if !is_length_name(&len_param.name, &arr_param.name) {
                continue;
            }
            let arr_key = params
                .get(i)
                .and_then(|c| info.pv(c.external))
                .and_then(|p| p.bounds_key);
            let len_key = params
                .get(i + 1)
                .and_then(|c| info.pv(c.external))
                .and_then(|p| p.bounds_key);
            if let (Some(ak), Some(lk)) = (arr_key, len_key) {
                debug!(
                    "heuristic bound: {} counted by {} in {}",
                    arr_param.name, len_param.name, fd.name
                );
                info.bounds
                    .merge_bounds(ak, BoundsPriority::Heuristics, ABounds::Count(lk));
            }
        }
    }
}

fn is_length_name(name: &str, array_name: &str) -> bool {
    let lower = name.to_lowercase();
    matches!(
        lower.as_str(),
        "n" | "len" | "length" | "size" | "count" | "num" | "sz" | "nmemb"
    ) || lower.contains("len")
        || lower.contains("size")
        || lower.contains("count")
        || (!array_name.is_empty() && lower.starts_with(&array_name.to_lowercase()))
}
