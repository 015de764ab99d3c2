// Whole-program checked-pointer inference.
//
// The analyzer absorbs a frontend-produced program, generates lattice
// constraints from every declaration and expression, links symbols across
// translation units, solves for the checked pointer kinds, and runs the
// array-bounds flow analysis. The results are rendered declaration texts
// and per-pointer kinds for a rewriter to apply.

pub mod bounds;
pub mod builder;
pub mod errors;
pub mod options;
pub mod program_info;
pub mod resolver;
pub mod vars;

pub use builder::build_constraints;
pub use errors::{AnalysisError, AnalysisResult};
pub use options::CoreOptions;
pub use program_info::{DeclRewrite, FuncRewrite, MacroFlagOracle, ProgramInfo, RewriteOracle};
pub use ptrfit_constraints::ConstAtom as PtrKind;

use ptrfit_ast::{Program, SourceLoc};
use ptrfit_constraints::{Atom, ConstAtom, ConstraintKey};
use ptrfit_diagnostics::Diagnostic;
use std::collections::BTreeSet;
use std::sync::Mutex;

impl ProgramInfo {
    fn wild_var_keys(&self) -> BTreeSet<ConstraintKey> {
        (0..self.constraints().var_count() as ConstraintKey)
            .filter(|k| self.constraints().solution(Atom::Var(*k)) == ConstAtom::Wild)
            .collect()
    }

    /// Drop the single wild bound on one pointer variable and re-solve.
    /// Returns the variables that became checked as a result.
    pub fn make_single_pointer_non_wild(&mut self, key: ConstraintKey) -> BTreeSet<ConstraintKey> {
        let Some(geq) = self.cs.wild_bound_for(key) else {
            return BTreeSet::new();
        };
        let before = self.wild_var_keys();
        self.cs.remove_geq(&geq);
        self.cs.reset_environment();
        self.cs.solve();
        let after = self.wild_var_keys();
        before.difference(&after).copied().collect()
    }

    /// Drop every constraint sharing the root-cause reason of the wild
    /// bound on one pointer, then re-solve. Returns the variables that
    /// became checked.
    pub fn invalidate_wild_reason_globally(
        &mut self,
        key: ConstraintKey,
    ) -> BTreeSet<ConstraintKey> {
        let Some(geq) = self.cs.wild_bound_for(key) else {
            return BTreeSet::new();
        };
        if geq.reason.is_empty() {
            return BTreeSet::new();
        }
        let before = self.wild_var_keys();
        self.cs.remove_by_reason(&geq.reason);
        self.cs.reset_environment();
        self.cs.solve();
        let after = self.wild_var_keys();
        before.difference(&after).copied().collect()
    }
}

/// The public entry point. Every operation takes the interface mutex; the
/// core itself is single-threaded.
pub struct Analyzer {
    info: Mutex<ProgramInfo>,
}

impl Analyzer {
    pub fn new(opts: CoreOptions) -> Self {
        Self {
            info: Mutex::new(ProgramInfo::new(opts)),
        }
    }

    pub fn with_oracle(opts: CoreOptions, oracle: Box<dyn RewriteOracle>) -> Self {
        Self {
            info: Mutex::new(ProgramInfo::with_oracle(opts, oracle)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgramInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the whole pipeline: constraint generation, linking, solving, and
    /// bounds inference. Returns false when conflicts forced fallbacks.
    pub fn analyze(&self, program: &Program) -> bool {
        let mut info = self.lock();
        build_constraints(&mut info, program);
        info.link();
        let ok = info.solve_constraints();
        if info.options().all_types {
            info.perform_flow_analysis();
        }
        ok
    }

    pub fn build_constraints(&self, program: &Program) {
        let mut info = self.lock();
        build_constraints(&mut info, program);
    }

    pub fn link(&self) {
        self.lock().link();
    }

    pub fn solve(&self) -> bool {
        self.lock().solve_constraints()
    }

    pub fn perform_flow_analysis(&self) {
        self.lock().perform_flow_analysis();
    }

    /// Solved kind of the declaration at a location.
    pub fn pointer_kind_at(&self, loc: &SourceLoc) -> Option<PtrKind> {
        self.lock().pointer_kind_at(loc)
    }

    /// Rendered declaration text plus change flag.
    pub fn decl_rewrite(&self, loc: &SourceLoc) -> Option<DeclRewrite> {
        self.lock().decl_rewrite(loc)
    }

    /// Rendered function return and parameter texts.
    pub fn func_rewrite(&self, loc: &SourceLoc) -> Option<FuncRewrite> {
        self.lock().func_rewrite(loc)
    }

    /// Bounds annotation for the declaration at a location.
    pub fn bounds_text_at(&self, loc: &SourceLoc) -> Option<String> {
        self.lock().bounds_text_at(loc)
    }

    /// Casts the rewriter must place at call sites.
    pub fn needed_casts(&self) -> Vec<(SourceLoc, String)> {
        self.lock().needed_casts()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().diagnostics().diagnostics().to_vec()
    }

    /// Interactive: drop the wild bound on one pointer and re-solve.
    pub fn make_single_pointer_non_wild(&self, key: ConstraintKey) -> BTreeSet<ConstraintKey> {
        self.lock().make_single_pointer_non_wild(key)
    }

    /// Interactive: drop every constraint sharing one pointer's wild reason
    /// and re-solve.
    pub fn invalidate_wild_reason_globally(&self, key: ConstraintKey) -> BTreeSet<ConstraintKey> {
        self.lock().invalidate_wild_reason_globally(key)
    }

    /// Read-only access for inspection and tests.
    pub fn with_info<R>(&self, f: impl FnOnce(&ProgramInfo) -> R) -> R {
        f(&self.lock())
    }
}
