// Pointer constraint variables: one atom per indirection level, outermost
// first, plus the structural facts needed to render the solved type back
// into source text.

use super::{ConstraintVariable, CvarId, RETVAR};
use crate::bounds::BoundsKey;
use crate::errors::AnalysisError;
use crate::program_info::ProgramInfo;
use log::warn;
use ptrfit_ast::{ArrayShape, CType, CheckedKind, Qualifiers, TypedefInfo};
use ptrfit_constraints::{Atom, ConstAtom, Geq, VarKind};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct PointerVariable {
    pub name: String,
    /// Base type spelling without pointer or array decoration
    pub base_type: String,
    /// One atom per indirection level, outermost first
    pub atoms: Vec<Atom>,
    pub qualifiers: Vec<Qualifiers>,
    /// Original array shape per level
    pub shapes: Vec<ArrayShape>,
    /// Interop-type annotation text from the source, if any
    pub itype: Option<String>,
    /// Declared bounds annotation text from the source, if any
    pub bounds_annotation: Option<String>,
    /// Generic type parameter index, or -1
    pub generic_index: i32,
    /// Pointer declared as a zero-width array; compares PTR and ARR equal
    pub zero_width_array: bool,
    /// Typedef occurrence; rendering stops at this level
    pub typedef_info: Option<TypedefInfo>,
    /// Nested function signature when this points to a function
    pub fv: Option<CvarId>,
    /// The prototype variable this one was copied from, if any
    pub parent: Option<CvarId>,
    /// Part of a function prototype (parameter or return)
    pub part_of_prototype: bool,
    /// Variables assigned to this prototype component at call sites
    pub argument_constraints: BTreeSet<CvarId>,
    /// One-shot flag: argument constraints have been equated already
    pub has_eq_argument_constraints: bool,
    pub bounds_key: Option<BoundsKey>,
    pub is_void_ptr: bool,
    /// Belongs to a real declaration in the program, not a synthesized view
    pub for_valid_decl: bool,
    /// Source spelling of the declared type, for unchanged output
    pub original_type: String,
}

impl PointerVariable {
    pub fn is_generic(&self) -> bool {
        self.generic_index >= 0
    }

    /// Was any level already a checked type in the input program?
    pub fn originally_checked(&self) -> bool {
        self.atoms.iter().any(|a| a.as_const().is_some())
    }
}

fn const_of(kind: CheckedKind) -> ConstAtom {
    match kind {
        CheckedKind::Ptr => ConstAtom::Ptr,
        CheckedKind::Arr => ConstAtom::Arr,
        CheckedKind::NtArr => ConstAtom::NtArr,
    }
}

impl ProgramInfo {
    /// Build a pointer variable from a declared type, one fresh atom per
    /// indirection level unless the source already checked that level.
    pub(crate) fn build_pointer_var(
        &mut self,
        ty: &CType,
        name: &str,
        in_func: Option<&str>,
        force_generic: i32,
        var_atom_for_checked: bool,
    ) -> CvarId {
        let mut atoms: Vec<Atom> = Vec::new();
        let mut qualifiers = Vec::new();
        let mut shapes = Vec::new();

        let generic_index = if force_generic >= 0 {
            force_generic
        } else {
            ty.generic_index
        };

        let mut vk = match in_func {
            Some(_) if name == RETVAR => VarKind::Return,
            Some(_) => VarKind::Param,
            None => VarKind::Other,
        };
        let mut npre = in_func.map(|f| format!("{}:", f)).unwrap_or_default();

        let is_va_list = ty.is_va_list();

        for level in &ty.levels {
            qualifiers.push(level.qualifiers);
            shapes.push(level.shape);

            if is_va_list {
                // Variable-argument lists cannot be made checked.
                let v = self
                    .cs
                    .fresh_var(&format!("{}{}", npre, name), vk);
                self.cs.add_geq(Geq::new(
                    v,
                    Atom::WILD,
                    "variable number of arguments",
                    None,
                    true,
                ));
                atoms.push(v);
                break;
            }

            let mut var_created = false;
            if let Some(ck) = level.checked {
                let catom = const_of(ck);
                if var_atom_for_checked {
                    let v = self.cs.fresh_var(&format!("{}{}", npre, name), vk);
                    self.cs
                        .add_geq(Geq::new(v, Atom::Const(catom), "", None, false));
                    atoms.push(v);
                } else {
                    atoms.push(Atom::Const(catom));
                }
                var_created = true;
            }

            if !var_created {
                let v = self.cs.fresh_var(&format!("{}{}", npre, name), vk);
                atoms.push(v);
                // An incomplete array cannot shrink back to a single-object
                // pointer.
                if level.shape == ArrayShape::Unsized {
                    self.cs
                        .add_geq(Geq::new(v, Atom::ARR, "", None, false));
                }
            }

            // Only the outermost level belongs to the prototype.
            vk = VarKind::Other;
            npre.push('*');
        }

        // Zero-width array bounds make an array pointer interchangeable
        // with a plain pointer.
        let mut zero_width_array = false;
        if let Some(b) = &ty.bounds {
            if b.is_zero_width() && atoms.first() == Some(&Atom::Const(ConstAtom::Arr)) {
                zero_width_array = true;
                atoms[0] = Atom::Const(ConstAtom::Ptr);
            }
        }

        let is_void_ptr = ty.is_void_pointer();
        if generic_index < 0 && (is_va_list || is_void_ptr) {
            let reason = if is_void_ptr {
                "default void* type"
            } else {
                "default var arg list type"
            };
            for atom in &atoms {
                if atom.is_var() {
                    self.cs
                        .add_geq(Geq::new(*atom, Atom::WILD, reason, None, true));
                }
            }
        }

        // An unchecked outer pointer makes everything beneath it unchecked.
        for i in 0..atoms.len() {
            if !atoms[i].is_var() {
                continue;
            }
            for j in (i + 1)..atoms.len() {
                if !atoms[j].is_var() {
                    continue;
                }
                let premise = Geq::new(atoms[i], Atom::WILD, "", None, true);
                let conclusion = Geq::new(atoms[j], Atom::WILD, "", None, true);
                if let Err(e) = self.cs.add_implies(premise, conclusion) {
                    warn!("dropping malformed implication: {}", e);
                }
            }
        }

        let fv = ty
            .function
            .as_ref()
            .map(|sig| self.build_function_var_from_sig(sig, name));

        let pv = PointerVariable {
            name: name.to_string(),
            base_type: ty.base.clone(),
            atoms,
            qualifiers,
            shapes,
            itype: ty.itype.clone(),
            bounds_annotation: ty.bounds.as_ref().map(|b| b.to_string()),
            generic_index,
            zero_width_array,
            typedef_info: ty.typedef_info.clone(),
            fv,
            parent: None,
            part_of_prototype: in_func.is_some(),
            argument_constraints: BTreeSet::new(),
            has_eq_argument_constraints: false,
            bounds_key: None,
            is_void_ptr,
            for_valid_decl: false,
            original_type: ty.spelling(),
        };
        self.push_cvar(ConstraintVariable::Pointer(pv))
    }

    /// Atom at a level, growing generic variables on demand: a polymorphic
    /// pointer's depth is only known from its uses.
    pub(crate) fn pv_atom_at(&mut self, id: CvarId, idx: usize) -> Option<Atom> {
        let pv = self.pv(id)?;
        if let Some(a) = pv.atoms.get(idx) {
            return Some(*a);
        }
        if pv.is_generic() && idx == pv.atoms.len() {
            let name = format!("{}{}", pv.name, "*".repeat(pv.atoms.len()));
            let v = self.cs.fresh_var(&name, VarKind::Other);
            if let ConstraintVariable::Pointer(pv) = self.cvar_mut(id) {
                pv.atoms.push(v);
                pv.qualifiers.push(Qualifiers::none());
                pv.shapes.push(ArrayShape::Pointer);
            }
            return Some(v);
        }
        None
    }

    /// Bound the outermost atom in the pointer-type sub-order: a lower
    /// bound records use-evidence (arithmetic, allocation), an upper bound
    /// caps the kind (taking an address).
    pub(crate) fn constrain_pv_outer_to(
        &mut self,
        id: CvarId,
        c: ConstAtom,
        lower_bound: bool,
        reason: &str,
    ) {
        debug_assert!(c != ConstAtom::Wild);
        let Some(pv) = self.pv(id) else { return };
        let Some(outer) = pv.atoms.first().copied() else {
            return;
        };
        match outer {
            Atom::Var(_) => {
                let geq = if lower_bound {
                    Geq::new(outer, Atom::Const(c), reason, None, false)
                } else {
                    Geq::new(Atom::Const(c), outer, reason, None, false)
                };
                self.cs.add_geq(geq);
            }
            Atom::Const(existing) => {
                if (lower_bound && existing < c) || (!lower_bound && c < existing) {
                    warn!(
                        "checked type {} cannot satisfy bound {} on `{}`",
                        existing,
                        c,
                        self.cvar(id).name()
                    );
                }
            }
        }
    }

    /// Did solving give this variable a checked type it did not have in the
    /// input program?
    pub(crate) fn any_pv_changes(&self, id: CvarId) -> bool {
        let Some(pv) = self.pv(id) else { return false };
        let mut changed = pv.atoms.iter().any(|a| {
            a.is_var() && self.cs.solution(*a) != ConstAtom::Wild
        });
        if let Some(fv) = pv.fv {
            changed |= self.any_fv_changes(fv);
        }
        changed
    }

    /// Solved kind at one level (outermost = 0).
    pub(crate) fn pv_kind_at(&self, id: CvarId, idx: usize) -> Option<ConstAtom> {
        let pv = self.pv(id)?;
        pv.atoms.get(idx).map(|a| self.cs.solution(*a))
    }

    /// Merge a redeclaration into the variable seen first. Constant atoms
    /// win over variables; two different constants are only tolerated when
    /// the old side is already unchecked.
    pub(crate) fn merge_pv_declaration(
        &mut self,
        into: CvarId,
        from: CvarId,
    ) -> Result<(), AnalysisError> {
        let (Some(pi), Some(pf)) = (self.pv(into), self.pv(from)) else {
            return Err(AnalysisError::Invariant(
                "pointer merge on non-pointer variable".to_string(),
            ));
        };
        if pi.atoms.len() != pf.atoms.len() {
            return Err(AnalysisError::MergeConflict {
                symbol: pi.name.clone(),
                reason: "merging between pointers with different depths".to_string(),
            });
        }
        let name = pi.name.clone();
        let mut merged: Vec<Atom> = Vec::with_capacity(pi.atoms.len());
        for (a, b) in pi.atoms.iter().zip(pf.atoms.iter()) {
            match (a.as_const(), b.as_const()) {
                (None, Some(_)) => merged.push(*b),
                (Some(ca), Some(cb)) if ca != cb => {
                    if ca != ConstAtom::Wild {
                        return Err(AnalysisError::MergeConflict {
                            symbol: name,
                            reason: format!(
                                "checked types disagree: {} vs {}",
                                ca, cb
                            ),
                        });
                    }
                    merged.push(*a);
                }
                _ => merged.push(*a),
            }
        }

        let from_itype = pf.itype.clone();
        let from_bounds = pf.bounds_annotation.clone();
        let from_generic = pf.generic_index;
        let nested = (pi.fv, pf.fv);

        if let ConstraintVariable::Pointer(pv) = self.cvar_mut(into) {
            pv.atoms = merged;
            if from_itype.is_some() {
                pv.itype = from_itype;
            }
            if from_bounds.is_some() {
                pv.bounds_annotation = from_bounds;
            }
            if from_generic >= 0 {
                pv.generic_index = from_generic;
            }
        }

        if let (Some(fi), Some(ff)) = nested {
            self.merge_fv_declaration(fi, ff).map_err(|e| match e {
                AnalysisError::MergeConflict { symbol, reason } => {
                    AnalysisError::MergeConflict {
                        symbol,
                        reason: format!("{} within the referenced function", reason),
                    }
                }
                other => other,
            })?;
        }
        Ok(())
    }

    // ---- rendering -------------------------------------------------------

    /// Render the solved type, e.g. `_Array_ptr<int>` or the original
    /// spelling for anything that stayed unchecked.
    pub(crate) fn mk_pv_string(&self, id: CvarId, emit_name: bool, for_itype: bool) -> String {
        let Some(pv) = self.pv(id) else {
            return String::new();
        };

        let name_suffix = |s: &str| {
            if emit_name && pv.name != RETVAR && !pv.name.is_empty() {
                format!("{} {}", s, pv.name)
            } else {
                s.to_string()
            }
        };

        if pv.atoms.is_empty() {
            return name_suffix(&pv.base_type);
        }

        // Leading run of checked array levels renders as `T name _Checked[N]`.
        let kinds: Vec<ConstAtom> = pv
            .atoms
            .iter()
            .map(|a| {
                let k = self.cs.solution(*a);
                // A void base that is not behind an itype can hold any
                // pointer, so it prints as its original type.
                if pv.base_type == "void" && !for_itype && !pv.is_generic() {
                    ConstAtom::Wild
                } else {
                    k
                }
            })
            .collect();

        let mut run = 0;
        while run < kinds.len() {
            let sized = matches!(pv.shapes.get(run), Some(ArrayShape::Sized(_)));
            let arrayish = matches!(kinds[run], ConstAtom::Arr | ConstAtom::NtArr);
            if sized && arrayish {
                run += 1;
            } else {
                break;
            }
        }

        if run > 0 {
            let mut suffixes = String::new();
            for idx in 0..run {
                if let Some(ArrayShape::Sized(n)) = pv.shapes.get(idx) {
                    let kw = if kinds[idx] == ConstAtom::NtArr {
                        "_Nt_checked"
                    } else {
                        "_Checked"
                    };
                    suffixes.push_str(&format!(" {}[{}]", kw, n));
                }
            }
            let inner = self.render_levels(pv, &kinds, run);
            let mut s = inner;
            if emit_name && pv.name != RETVAR && !pv.name.is_empty() {
                s.push(' ');
                s.push_str(&pv.name);
            }
            s.push_str(&suffixes);
            return s;
        }

        name_suffix(&self.render_levels(pv, &kinds, 0))
    }

    fn render_levels(&self, pv: &PointerVariable, kinds: &[ConstAtom], idx: usize) -> String {
        // Rendering stops at an internal typedef; the typedef name stands
        // for everything beneath it.
        if let Some(td) = &pv.typedef_info {
            if td.level == idx {
                return td.name.clone();
            }
        }
        if idx >= pv.atoms.len() {
            if let Some(fv) = pv.fv {
                return self.mk_fv_type_string(fv);
            }
            return pv.base_type.clone();
        }
        let qual = pv
            .qualifiers
            .get(idx)
            .map(|q| q.to_string())
            .unwrap_or_default();
        match kinds[idx] {
            ConstAtom::Wild => {
                // Everything from here down stays as written.
                let mut s = if pv.fv.is_some() {
                    pv.original_type.clone()
                } else {
                    let mut s = pv.base_type.clone();
                    s.push(' ');
                    for i in (idx..pv.atoms.len()).rev() {
                        s.push('*');
                        if let Some(q) = pv.qualifiers.get(i) {
                            s.push_str(&q.to_string());
                        }
                    }
                    s
                };
                if !s.ends_with(' ') && !s.ends_with('*') {
                    s.push(' ');
                }
                s.trim_end().to_string()
            }
            ConstAtom::Ptr => {
                format!("{}_Ptr<{}>", qual, self.render_levels(pv, kinds, idx + 1))
            }
            ConstAtom::Arr => {
                if let Some(ArrayShape::Sized(n)) = pv.shapes.get(idx) {
                    format!("{} _Checked[{}]", self.render_levels(pv, kinds, idx + 1), n)
                } else {
                    format!(
                        "{}_Array_ptr<{}>",
                        qual,
                        self.render_levels(pv, kinds, idx + 1)
                    )
                }
            }
            ConstAtom::NtArr => {
                if let Some(ArrayShape::Sized(n)) = pv.shapes.get(idx) {
                    format!(
                        "{} _Nt_checked[{}]",
                        self.render_levels(pv, kinds, idx + 1),
                        n
                    )
                } else {
                    format!(
                        "{}_Nt_array_ptr<{}>",
                        qual,
                        self.render_levels(pv, kinds, idx + 1)
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CoreOptions;
    use ptrfit_ast::PointerLevel;

    fn info() -> ProgramInfo {
        ProgramInfo::new(CoreOptions::default())
    }

    #[test]
    fn test_atoms_per_level() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("int", 2), "p", None, -1, false);
        let pv = info.pv(id).expect("pointer variable");
        assert_eq!(pv.atoms.len(), 2);
        assert!(pv.atoms.iter().all(|a| a.is_var()));
    }

    #[test]
    fn test_checked_source_level_is_constant() {
        let mut info = info();
        let mut ty = CType::pointer("int", 1);
        ty.levels[0].checked = Some(CheckedKind::Ptr);
        let id = info.build_pointer_var(&ty, "p", None, -1, false);
        let pv = info.pv(id).expect("pointer variable");
        assert_eq!(pv.atoms[0], Atom::Const(ConstAtom::Ptr));
        assert!(pv.originally_checked());
    }

    #[test]
    fn test_void_pointer_is_wild() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("void", 1), "p", None, -1, false);
        info.cs.solve();
        assert_eq!(info.pv_kind_at(id, 0), Some(ConstAtom::Wild));
    }

    #[test]
    fn test_generic_void_pointer_not_wild() {
        let mut info = info();
        let mut ty = CType::pointer("void", 1);
        ty.generic_index = 0;
        let id = info.build_pointer_var(&ty, "p", None, -1, false);
        info.cs.solve();
        assert_eq!(info.pv_kind_at(id, 0), Some(ConstAtom::Ptr));
    }

    #[test]
    fn test_outer_wild_forces_inner_wild() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("int", 2), "p", None, -1, false);
        let outer = info.pv(id).expect("pv").atoms[0];
        info.cs
            .add_geq(Geq::new(outer, Atom::WILD, "cast", None, true));
        info.cs.solve();
        assert_eq!(info.pv_kind_at(id, 0), Some(ConstAtom::Wild));
        assert_eq!(info.pv_kind_at(id, 1), Some(ConstAtom::Wild));
    }

    #[test]
    fn test_unsized_array_lower_bound() {
        let mut info = info();
        let ty = CType::named("int").with_levels(vec![PointerLevel::unsized_array()]);
        let id = info.build_pointer_var(&ty, "a", None, -1, false);
        info.cs.solve();
        assert_eq!(info.pv_kind_at(id, 0), Some(ConstAtom::Arr));
    }

    #[test]
    fn test_render_simple_ptr() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("int", 1), "p", None, -1, false);
        info.cs.solve();
        assert_eq!(info.mk_pv_string(id, true, false), "_Ptr<int> p");
    }

    #[test]
    fn test_render_nested_ptr() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("char", 2), "p", None, -1, false);
        info.cs.solve();
        assert_eq!(info.mk_pv_string(id, true, false), "_Ptr<_Ptr<char>> p");
    }

    #[test]
    fn test_render_wild_keeps_original() {
        let mut info = info();
        let id = info.build_pointer_var(&CType::pointer("int", 1), "p", None, -1, false);
        info.constrain_to_wild(id, "cast from int to int *", None);
        info.cs.solve();
        assert_eq!(info.mk_pv_string(id, true, false), "int * p");
    }

    #[test]
    fn test_render_checked_sized_array() {
        let mut info = info();
        let ty = CType::named("int").with_levels(vec![PointerLevel::sized_array(5)]);
        let id = info.build_pointer_var(&ty, "buf", None, -1, false);
        // Give it array evidence so the level solves to ARR.
        info.constrain_pv_outer_to(id, ConstAtom::Arr, true, "");
        info.cs.solve();
        assert_eq!(info.mk_pv_string(id, true, false), "int buf _Checked[5]");
    }

    #[test]
    fn test_merge_prefers_constants() {
        let mut info = info();
        let a = info.build_pointer_var(&CType::pointer("int", 1), "p", None, -1, false);
        let mut ty = CType::pointer("int", 1);
        ty.levels[0].checked = Some(CheckedKind::Ptr);
        let b = info.build_pointer_var(&ty, "p", None, -1, false);

        info.merge_pv_declaration(a, b).expect("merge succeeds");
        let pv = info.pv(a).expect("pv");
        assert_eq!(pv.atoms[0], Atom::Const(ConstAtom::Ptr));
    }

    #[test]
    fn test_merge_depth_mismatch_fails() {
        let mut info = info();
        let a = info.build_pointer_var(&CType::pointer("int", 1), "p", None, -1, false);
        let b = info.build_pointer_var(&CType::pointer("int", 2), "p", None, -1, false);
        assert!(info.merge_pv_declaration(a, b).is_err());
    }
}
