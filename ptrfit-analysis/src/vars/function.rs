// Function constraint variables: a return component and one component per
// parameter, each a pair of pointer variables giving the body-side and
// caller-side views of the same value.

use super::{ConstraintVariable, CvarId, RETVAR};
use crate::bounds::BoundsKey;
use crate::errors::AnalysisError;
use crate::program_info::ProgramInfo;
use ptrfit_ast::{CType, FunctionDecl, FunctionSig, SourceLoc};
use ptrfit_constraints::Geq;

/// Internal (body-side) and external (caller-side) views of a parameter or
/// return value. The two alias for void pointers and function pointers
/// without an interop type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FvComponent {
    pub internal: CvarId,
    pub external: CvarId,
}

impl FvComponent {
    pub fn aliased(&self) -> bool {
        self.internal == self.external
    }
}

#[derive(Debug, Clone)]
pub struct FunctionVariable {
    pub name: String,
    /// File of the declaration; distinguishes static functions
    pub file: String,
    pub ret: FvComponent,
    pub params: Vec<FvComponent>,
    pub is_static: bool,
    pub has_body: bool,
    pub has_proto: bool,
    pub is_function_ptr: bool,
    /// Number of generic type parameters the function declares
    pub type_params: u32,
    pub parent: Option<CvarId>,
    pub has_eq_argument_constraints: bool,
    /// Argument sets seen at call sites before a prototype was known
    pub deferred_params: Vec<(SourceLoc, Vec<Vec<CvarId>>)>,
    pub bounds_key: Option<BoundsKey>,
    pub original_type: String,
}

impl ProgramInfo {
    /// Build the internal/external pair for one parameter or return slot.
    pub(crate) fn make_fv_component(
        &mut self,
        ty: &CType,
        name: &str,
        func: &str,
        has_itype: bool,
    ) -> FvComponent {
        let external = self.build_pointer_var(ty, name, Some(func), -1, false);
        if (ty.is_void_pointer() || ty.is_function_pointer()) && !has_itype {
            // One set of atoms serves both views; equating them separately
            // would only waste variables.
            return FvComponent {
                internal: external,
                external,
            };
        }
        let internal = self.build_pointer_var(ty, name, Some(func), -1, has_itype);

        let n = self
            .pv(internal)
            .map(|p| p.atoms.len())
            .unwrap_or(0)
            .min(self.pv(external).map(|p| p.atoms.len()).unwrap_or(0));
        for j in 0..n {
            let (Some(ia), Some(ea)) = (self.pv_atom_at(internal, j), self.pv_atom_at(external, j))
            else {
                break;
            };
            if !ia.is_var() && !ea.is_var() {
                continue;
            }
            // The body may be safer than the callers: an unchecked external
            // view forces the internal view unchecked, never the reverse.
            self.cs.add_geq(Geq::new(ia, ea, "", None, true));
            self.cs.add_geq(Geq::new(ia, ea, "", None, false));
            // Return atoms past the outermost level are fully unified; the
            // target dialect does not allow interop types to disagree there.
            if name == RETVAR && j > 0 && ea.is_var() {
                self.cs.add_geq(Geq::new(ea, ia, "", None, true));
                self.cs.add_geq(Geq::new(ea, ia, "", None, false));
            }
        }
        FvComponent { internal, external }
    }

    /// Build a function variable for a declaration, wiring up bounds keys
    /// for the return value and every parameter.
    pub(crate) fn build_function_var(&mut self, decl: &FunctionDecl, file: &str) -> CvarId {
        let func = decl.name.clone();
        let ret = self.make_fv_component(&decl.ret, RETVAR, &func, decl.ret.itype.is_some());

        let ret_key = self.bounds.get_func_key(
            &func,
            file,
            decl.is_static,
            decl.ret.is_pointer(),
        );
        self.set_pv_bounds_key(ret.external, ret_key);
        self.set_pv_bounds_key(ret.internal, ret_key);

        let mut params = Vec::with_capacity(decl.params.len());
        let mut param_keys = Vec::with_capacity(decl.params.len());
        for (i, p) in decl.params.iter().enumerate() {
            let comp = self.make_fv_component(&p.ty, &p.name, &func, p.ty.itype.is_some());
            let key = self.bounds.get_param_key(
                &func,
                file,
                decl.is_static,
                i,
                &p.name,
                p.ty.is_pointer(),
            );
            self.set_pv_bounds_key(comp.external, key);
            self.set_pv_bounds_key(comp.internal, key);
            param_keys.push((p.name.clone(), key));
            params.push(comp);
        }

        // Declared bounds annotations resolve against parameter names first,
        // then globals.
        for (i, p) in decl.params.iter().enumerate() {
            if let Some(bexpr) = &p.ty.bounds {
                let key = param_keys[i].1;
                let lookup_keys = param_keys.clone();
                let globals = self.global_bounds_keys();
                let ok = self.bounds.insert_declared_bounds(key, bexpr, |name| {
                    lookup_keys
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, k)| *k)
                        .or_else(|| globals.get(name).copied())
                });
                if !ok {
                    let err = AnalysisError::InvalidBounds {
                        name: p.name.clone(),
                    };
                    self.diags.emit(err.to_diagnostic(Some(&p.loc)));
                }
            }
        }
        if let Some(bexpr) = &decl.ret.bounds {
            let lookup_keys = param_keys.clone();
            let globals = self.global_bounds_keys();
            let ok = self.bounds.insert_declared_bounds(ret_key, bexpr, |name| {
                lookup_keys
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, k)| *k)
                    .or_else(|| globals.get(name).copied())
            });
            if !ok {
                let err = AnalysisError::InvalidBounds {
                    name: func.clone(),
                };
                self.diags.emit(err.to_diagnostic(Some(&decl.loc)));
            }
        }

        let fv = FunctionVariable {
            name: func,
            file: file.to_string(),
            ret,
            params,
            is_static: decl.is_static,
            has_body: decl.has_body(),
            has_proto: decl.has_proto,
            is_function_ptr: false,
            type_params: decl.type_param_count,
            parent: None,
            has_eq_argument_constraints: false,
            deferred_params: Vec::new(),
            bounds_key: Some(ret_key),
            original_type: decl.ret.spelling(),
        };
        self.push_cvar(ConstraintVariable::Function(fv))
    }

    /// Build a function variable for a function-pointer signature.
    pub(crate) fn build_function_var_from_sig(&mut self, sig: &FunctionSig, name: &str) -> CvarId {
        let ret = self.make_fv_component(&sig.ret, RETVAR, name, sig.ret.itype.is_some());
        let params = sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let pname = format!("{}_arg{}", name, i);
                self.make_fv_component(ty, &pname, name, ty.itype.is_some())
            })
            .collect();
        let fv = FunctionVariable {
            name: name.to_string(),
            file: String::new(),
            ret,
            params,
            is_static: false,
            has_body: false,
            has_proto: true,
            is_function_ptr: true,
            type_params: 0,
            parent: None,
            has_eq_argument_constraints: false,
            deferred_params: Vec::new(),
            bounds_key: None,
            original_type: sig.ret.spelling(),
        };
        self.push_cvar(ConstraintVariable::Function(fv))
    }

    pub(crate) fn set_pv_bounds_key(&mut self, id: CvarId, key: BoundsKey) {
        if let ConstraintVariable::Pointer(pv) = self.cvar_mut(id) {
            pv.bounds_key = Some(key);
        }
    }

    pub(crate) fn any_fv_changes(&self, id: CvarId) -> bool {
        let Some(fv) = self.fv(id) else { return false };
        self.any_pv_changes(fv.ret.external)
            || fv.params.iter().any(|p| self.any_pv_changes(p.external))
    }

    /// Render a function type for use inside a pointer bracket, e.g.
    /// `int (int, _Ptr<char>)`.
    pub(crate) fn mk_fv_type_string(&self, id: CvarId) -> String {
        let Some(fv) = self.fv(id) else {
            return String::new();
        };
        let ret = self.mk_pv_string(fv.ret.external, false, false);
        let params = if fv.params.is_empty() {
            "void".to_string()
        } else {
            fv.params
                .iter()
                .map(|p| self.mk_pv_string(p.external, false, false))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("{} ({})", ret.trim_end(), params)
    }

    /// Render one parameter or return slot for the rewriter. Where the two
    /// views agree, the checked type replaces the declaration; where the
    /// body is safer than the callers, an interop type bridges them.
    pub(crate) fn mk_component_string(&self, comp: FvComponent, emit_name: bool) -> String {
        let Some(ext) = self.pv(comp.external) else {
            return String::new();
        };
        let name = if emit_name && ext.name != RETVAR {
            ext.name.clone()
        } else {
            String::new()
        };
        let bounds_txt = ext
            .bounds_key
            .and_then(|k| self.bounds.bounds_text(k))
            .filter(|_| self.pv_has_array_kind(comp.internal));

        let original = || {
            let mut s = ext.original_type.clone();
            if !name.is_empty() {
                if !s.ends_with('*') && !s.ends_with(' ') {
                    s.push(' ');
                }
                s.push_str(&name);
            }
            s.trim_end().to_string()
        };

        if comp.aliased() {
            if self.any_pv_changes(comp.external) {
                let mut s = self.mk_pv_string(comp.external, emit_name, false);
                if let Some(b) = &bounds_txt {
                    s.push_str(&format!(" : {}", b));
                }
                return s;
            }
            return original();
        }

        let ext_changed = self.any_pv_changes(comp.external);
        let int_changed = self.any_pv_changes(comp.internal);
        let kinds_equal = self.solution_equal_to(comp.internal, comp.external);

        if ext_changed && int_changed && kinds_equal {
            let mut s = self.mk_pv_string(comp.external, emit_name, false);
            if let Some(b) = &bounds_txt {
                s.push_str(&format!(" : {}", b));
            }
            s
        } else if int_changed {
            // The body sees a checked type the callers do not share.
            let mut s = original();
            s.push_str(&format!(
                " : itype({})",
                self.mk_pv_string(comp.internal, false, true)
            ));
            if let Some(b) = &bounds_txt {
                s.push(' ');
                s.push_str(b);
            }
            s
        } else {
            original()
        }
    }

    fn pv_has_array_kind(&self, id: CvarId) -> bool {
        matches!(
            self.pv_kind_at(id, 0),
            Some(ptrfit_constraints::ConstAtom::Arr)
                | Some(ptrfit_constraints::ConstAtom::NtArr)
        )
    }

    /// Merge a function redeclaration into the one seen first.
    pub(crate) fn merge_fv_declaration(
        &mut self,
        into: CvarId,
        from: CvarId,
    ) -> Result<(), AnalysisError> {
        let (Some(fi), Some(ff)) = (self.fv(into), self.fv(from)) else {
            return Err(AnalysisError::Invariant(
                "function merge on non-function variable".to_string(),
            ));
        };
        let name = fi.name.clone();
        let into_ret = fi.ret;
        let from_ret = ff.ret;
        let into_params = fi.params.clone();
        let from_params = ff.params.clone();
        let into_has_proto = fi.has_proto;
        let from_has_body = ff.has_body;
        let from_has_proto = ff.has_proto;

        self.merge_fv_component(into_ret, from_ret, into)
            .map_err(|e| annotate(e, "for return value"))?;

        if from_params.is_empty() && !from_has_proto {
            // An unprototyped declaration adds no parameter information.
        } else if into_params.is_empty() && !into_has_proto {
            // The first sighting was unprototyped; adopt the typed one.
            if let ConstraintVariable::Function(fv) = self.cvar_mut(into) {
                fv.params = from_params;
                fv.has_proto = true;
            }
        } else {
            if into_params.len() != from_params.len() {
                return Err(AnalysisError::ArityMismatch {
                    symbol: name,
                    expected: into_params.len(),
                    found: from_params.len(),
                });
            }
            for (i, (ic, fc)) in into_params.iter().zip(from_params.iter()).enumerate() {
                self.merge_fv_component(*ic, *fc, into)
                    .map_err(|e| annotate(e, &format!("for parameter {}", i)))?;
            }
        }

        if from_has_body {
            if let ConstraintVariable::Function(fv) = self.cvar_mut(into) {
                fv.has_body = true;
            }
        }
        Ok(())
    }

    fn merge_fv_component(
        &mut self,
        into: FvComponent,
        from: FvComponent,
        _owner: CvarId,
    ) -> Result<(), AnalysisError> {
        if into.aliased() && !from.aliased() {
            // The first declaration shared one variable for both views but a
            // later one (with an interop type) split them. Merge ours into
            // the split pair so the richer structure survives.
            self.merge_pv_declaration(from.internal, into.internal)?;
            self.merge_pv_declaration(from.external, into.external)?;
            return Ok(());
        }
        self.merge_pv_declaration(into.internal, from.internal)
            .map_err(|e| annotate(e, "during internal merge"))?;
        self.merge_pv_declaration(into.external, from.external)
    }
}

fn annotate(e: AnalysisError, ctx: &str) -> AnalysisError {
    match e {
        AnalysisError::MergeConflict { symbol, reason } => AnalysisError::MergeConflict {
            symbol,
            reason: format!("{} {}", reason, ctx),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CoreOptions;
    use crate::vars::ConsAction;
    use ptrfit_ast::ParamDecl;
    use ptrfit_constraints::{Atom, ConstAtom};

    fn info() -> ProgramInfo {
        ProgramInfo::new(CoreOptions::default())
    }

    fn func_decl(name: &str, params: Vec<(&str, CType)>, ret: CType) -> FunctionDecl {
        FunctionDecl {
            name: name.to_string(),
            loc: SourceLoc::new("t.c", 1, 1),
            ret,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, (n, ty))| ParamDecl {
                    name: n.to_string(),
                    ty,
                    loc: SourceLoc::new("t.c", 1, 10 + i as u32),
                })
                .collect(),
            is_static: false,
            is_variadic: false,
            has_proto: true,
            type_param_count: 0,
            body: None,
        }
    }

    #[test]
    fn test_internal_external_views_distinct() {
        let mut info = info();
        let decl = func_decl("f", vec![("x", CType::pointer("int", 1))], CType::named("void"));
        let id = info.build_function_var(&decl, "t.c");
        let fv = info.fv(id).expect("function variable");
        assert_eq!(fv.params.len(), 1);
        assert!(!fv.params[0].aliased());
    }

    #[test]
    fn test_void_pointer_param_aliases() {
        let mut info = info();
        let decl = func_decl("f", vec![("x", CType::pointer("void", 1))], CType::named("void"));
        let id = info.build_function_var(&decl, "t.c");
        let fv = info.fv(id).expect("function variable");
        assert!(fv.params[0].aliased());
    }

    #[test]
    fn test_external_wild_forces_internal_wild() {
        let mut info = info();
        let decl = func_decl("f", vec![("x", CType::pointer("int", 1))], CType::named("void"));
        let id = info.build_function_var(&decl, "t.c");
        let comp = info.fv(id).expect("fv").params[0];
        info.constrain_to_wild(comp.external, "unsafe caller", None);
        info.cs.solve();
        assert_eq!(info.pv_kind_at(comp.internal, 0), Some(ConstAtom::Wild));
    }

    #[test]
    fn test_internal_wild_leaves_external_checked() {
        let mut info = info();
        let decl = func_decl("f", vec![("x", CType::pointer("int", 1))], CType::named("void"));
        let id = info.build_function_var(&decl, "t.c");
        let comp = info.fv(id).expect("fv").params[0];
        // Wild the internal view only, via its own atom.
        let internal_atom = info.pv(comp.internal).expect("pv").atoms[0];
        info.cs.add_geq(Geq::new(
            internal_atom,
            Atom::WILD,
            "unsafe body use",
            None,
            true,
        ));
        info.cs.solve();
        assert_eq!(info.pv_kind_at(comp.internal, 0), Some(ConstAtom::Wild));
        assert_eq!(info.pv_kind_at(comp.external, 0), Some(ConstAtom::Ptr));
    }

    #[test]
    fn test_arity_mismatch_reported() {
        let mut info = info();
        let a = info.build_function_var(
            &func_decl("f", vec![("x", CType::pointer("int", 1))], CType::named("void")),
            "a.c",
        );
        let b = info.build_function_var(
            &func_decl(
                "f",
                vec![
                    ("x", CType::pointer("int", 1)),
                    ("y", CType::pointer("int", 1)),
                ],
                CType::named("void"),
            ),
            "b.c",
        );
        let err = info.merge_fv_declaration(a, b);
        assert!(matches!(err, Err(AnalysisError::ArityMismatch { .. })));
    }

    #[test]
    fn test_function_pointer_assignment_equates() {
        let mut info = info();
        // int (*fp)(int *); assigned from a function with an arithmetic-using
        // parameter: the views must agree on both sides.
        let f = info.build_function_var(
            &func_decl("callee", vec![("x", CType::pointer("int", 1))], CType::named("void")),
            "t.c",
        );
        let g = info.build_function_var(
            &func_decl("other", vec![("y", CType::pointer("int", 1))], CType::named("void")),
            "t.c",
        );
        let fx = info.fv(f).expect("fv").params[0];
        info.constrain_pv_outer_to(fx.internal, ConstAtom::Arr, true, "");
        info.constrain_cvar_geq(g, f, None, ConsAction::SameToSame, false, true);
        info.cs.solve();
        let gy = info.fv(g).expect("fv").params[0];
        assert_eq!(
            info.pv_kind_at(gy.internal, 0),
            info.pv_kind_at(fx.internal, 0)
        );
    }
}
