// End-to-end checks of the solved kinds and rendered declarations for the
// canonical program shapes.

use ptrfit_analysis::{Analyzer, CoreOptions, PtrKind};
use ptrfit_ast::{
    BinaryOp, CType, Decl, Expr, FunctionDecl, FunctionSig, ParamDecl, Program, SourceLoc, Stmt,
    TranslationUnit, UnaryOp, VarDecl,
};

struct Locs {
    file: &'static str,
    next: u32,
}

impl Locs {
    fn new(file: &'static str) -> Self {
        Self { file, next: 1 }
    }

    fn next(&mut self) -> SourceLoc {
        self.next += 1;
        SourceLoc::new(self.file, self.next, 1)
    }
}

fn int_ptr() -> CType {
    CType::pointer("int", 1)
}

fn local(name: &str, ty: CType, loc: SourceLoc, init: Option<Expr>) -> Stmt {
    Stmt::Decl(VarDecl {
        name: name.to_string(),
        ty,
        loc,
        is_global: false,
        is_static: false,
        init,
    })
}

fn func(name: &str, params: Vec<(&str, CType, SourceLoc)>, ret: CType, loc: SourceLoc, body: Vec<Stmt>) -> Decl {
    Decl::Function(FunctionDecl {
        name: name.to_string(),
        loc,
        ret,
        params: params
            .into_iter()
            .map(|(n, ty, loc)| ParamDecl {
                name: n.to_string(),
                ty,
                loc,
            })
            .collect(),
        is_static: false,
        is_variadic: false,
        has_proto: true,
        type_param_count: 0,
        body: Some(body),
    })
}

fn one_unit(file: &str, decls: Vec<Decl>) -> Program {
    Program {
        units: vec![TranslationUnit {
            file: file.to_string(),
            decls,
        }],
    }
}

#[test]
fn test_simple_pointer_assignment_stays_ptr() {
    // int *p; int *q; p = q;
    let mut locs = Locs::new("s1.c");
    let p_loc = locs.next();
    let q_loc = locs.next();
    let f_loc = locs.next();
    let assign_loc = locs.next();
    let pr = locs.next();
    let qr = locs.next();

    let body = vec![
        local("p", int_ptr(), p_loc.clone(), None),
        local("q", int_ptr(), q_loc.clone(), None),
        Stmt::Expr(Expr::binary(
            BinaryOp::Assign,
            Expr::decl_ref("p", int_ptr(), pr),
            Expr::decl_ref("q", int_ptr(), qr),
            int_ptr(),
            assign_loc,
        )),
    ];
    let program = one_unit("s1.c", vec![func("f", vec![], CType::named("void"), f_loc, body)]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Ptr));
    assert_eq!(analyzer.pointer_kind_at(&q_loc), Some(PtrKind::Ptr));
    let rewrite = analyzer.decl_rewrite(&p_loc).expect("rewrite for p");
    assert!(rewrite.changed);
    assert_eq!(rewrite.text, "_Ptr<int> p");
}

fn malloc_times_n_program(file: &'static str) -> (Program, SourceLoc) {
    // void f(int n) { int *p = malloc(sizeof(int) * n); p++; }
    let mut locs = Locs::new(file);
    let f_loc = locs.next();
    let n_loc = locs.next();
    let p_loc = locs.next();
    let call_loc = locs.next();
    let sizeof_loc = locs.next();
    let mul_loc = locs.next();
    let nref = locs.next();
    let callee = locs.next();
    let inc_loc = locs.next();
    let pref = locs.next();

    let size_expr = Expr::binary(
        BinaryOp::Mul,
        Expr::sizeof(CType::named("int"), sizeof_loc),
        Expr::decl_ref("n", CType::named("int"), nref),
        CType::named("unsigned long"),
        mul_loc,
    );
    let malloc_call = Expr::call(
        Expr::decl_ref("malloc", CType::named("int"), callee),
        vec![size_expr],
        int_ptr(),
        call_loc,
    );
    let body = vec![
        local("p", int_ptr(), p_loc.clone(), Some(malloc_call)),
        Stmt::Expr(Expr::unary(
            UnaryOp::PostInc,
            Expr::decl_ref("p", int_ptr(), pref),
            int_ptr(),
            inc_loc,
        )),
    ];
    let program = one_unit(
        file,
        vec![func(
            "f",
            vec![("n", CType::named("int"), n_loc)],
            CType::named("void"),
            f_loc,
            body,
        )],
    );
    (program, p_loc)
}

#[test]
fn test_pointer_arithmetic_becomes_array_with_count() {
    let (program, p_loc) = malloc_times_n_program("s2.c");

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Arr));
    assert_eq!(analyzer.bounds_text_at(&p_loc).as_deref(), Some("count(n)"));
    let rewrite = analyzer.decl_rewrite(&p_loc).expect("rewrite for p");
    assert_eq!(rewrite.text, "_Array_ptr<int> p : count(n)");
}

#[test]
fn test_pointer_arithmetic_without_all_types_goes_wild() {
    let (program, p_loc) = malloc_times_n_program("s2b.c");

    let analyzer = Analyzer::new(CoreOptions {
        all_types: false,
        ..CoreOptions::default()
    });
    analyzer.analyze(&program);

    // ARR is not representable in the checked-only configuration.
    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Wild));
    let rewrite = analyzer.decl_rewrite(&p_loc).expect("rewrite for p");
    assert!(!rewrite.changed);
    assert_eq!(rewrite.text, "int *p");
}

#[test]
fn test_string_literal_is_nt_array_with_byte_count() {
    // char *s = "hello";
    let mut locs = Locs::new("s3.c");
    let f_loc = locs.next();
    let s_loc = locs.next();
    let lit_loc = locs.next();

    let body = vec![local(
        "s",
        CType::pointer("char", 1),
        s_loc.clone(),
        Some(Expr::string("hello", lit_loc)),
    )];
    let program = one_unit("s3.c", vec![func("f", vec![], CType::named("void"), f_loc, body)]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&s_loc), Some(PtrKind::NtArr));
    assert_eq!(analyzer.bounds_text_at(&s_loc).as_deref(), Some("count(5)"));
    let rewrite = analyzer.decl_rewrite(&s_loc).expect("rewrite for s");
    assert_eq!(rewrite.text, "_Nt_array_ptr<char> s : count(5)");
}

#[test]
fn test_unsafe_cast_demotes_to_wild() {
    // int *p; p = (int *)5;
    let mut locs = Locs::new("s4.c");
    let f_loc = locs.next();
    let p_loc = locs.next();
    let cast_loc = locs.next();
    let five = locs.next();
    let assign_loc = locs.next();
    let pref = locs.next();

    let body = vec![
        local("p", int_ptr(), p_loc.clone(), None),
        Stmt::Expr(Expr::binary(
            BinaryOp::Assign,
            Expr::decl_ref("p", int_ptr(), pref),
            Expr::cast(Expr::int(5, five), int_ptr(), false, cast_loc),
            int_ptr(),
            assign_loc,
        )),
    ];
    let program = one_unit("s4.c", vec![func("f", vec![], CType::named("void"), f_loc, body)]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Wild));
    let rewrite = analyzer.decl_rewrite(&p_loc).expect("rewrite for p");
    assert!(!rewrite.changed);
    assert_eq!(rewrite.text, "int *p");
}

#[test]
fn test_interop_widening_renders_itype_with_count() {
    // void f(int *x, int len) { x++; }  called as f(q, 10)
    let mut locs = Locs::new("s5.c");
    let f_loc = locs.next();
    let x_loc = locs.next();
    let len_loc = locs.next();
    let inc_loc = locs.next();
    let xref = locs.next();
    let g_loc = locs.next();
    let q_loc = locs.next();
    let call_loc = locs.next();
    let callee = locs.next();
    let qref = locs.next();
    let ten = locs.next();

    let f = func(
        "f",
        vec![
            ("x", int_ptr(), x_loc),
            ("len", CType::named("int"), len_loc),
        ],
        CType::named("void"),
        f_loc.clone(),
        vec![Stmt::Expr(Expr::unary(
            UnaryOp::PostInc,
            Expr::decl_ref("x", int_ptr(), xref),
            int_ptr(),
            inc_loc,
        ))],
    );
    let g = func(
        "g",
        vec![],
        CType::named("void"),
        g_loc,
        vec![
            local("q", int_ptr(), q_loc.clone(), None),
            Stmt::Expr(Expr::call(
                Expr::decl_ref("f", CType::named("void"), callee),
                vec![
                    Expr::decl_ref("q", int_ptr(), qref),
                    Expr::int(10, ten),
                ],
                CType::named("void"),
                call_loc,
            )),
        ],
    );
    let program = one_unit("s5.c", vec![f, g]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    // The caller-side pointer stays a plain checked pointer.
    assert_eq!(analyzer.pointer_kind_at(&q_loc), Some(PtrKind::Ptr));
    let rewrite = analyzer.func_rewrite(&f_loc).expect("rewrite for f");
    assert!(rewrite.changed);
    assert_eq!(
        rewrite.params_text,
        "int *x : itype(_Array_ptr<int>) count(len), int len"
    );
}

#[test]
fn test_function_pointer_equates_with_assigned_function() {
    // int *id(int *x) { return x; }   int *(*fp)(int *) = id;
    let mut locs = Locs::new("s6.c");
    let id_loc = locs.next();
    let x_loc = locs.next();
    let ret_loc = locs.next();
    let xref = locs.next();
    let fp_loc = locs.next();
    let fnref = locs.next();

    let id_fn = func(
        "id",
        vec![("x", int_ptr(), x_loc)],
        int_ptr(),
        id_loc.clone(),
        vec![Stmt::Return(
            Some(Expr::decl_ref("x", int_ptr(), xref)),
            ret_loc,
        )],
    );

    let mut fp_ty = CType::pointer("int", 1);
    fp_ty.function = Some(Box::new(FunctionSig {
        ret: int_ptr(),
        params: vec![int_ptr()],
        is_variadic: false,
    }));
    let mut fn_ty = CType::named("int");
    fn_ty.function = Some(Box::new(FunctionSig {
        ret: int_ptr(),
        params: vec![int_ptr()],
        is_variadic: false,
    }));

    let fp = Decl::Var(VarDecl {
        name: "fp".to_string(),
        ty: fp_ty,
        loc: fp_loc.clone(),
        is_global: true,
        is_static: false,
        init: Some(Expr::decl_ref("id", fn_ty, fnref)),
    });
    let program = one_unit("s6.c", vec![id_fn, fp]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    // Return and parameter kinds of the pointed-to signature must agree
    // with the assigned function's.
    let id_rewrite = analyzer.func_rewrite(&id_loc).expect("rewrite for id");
    assert_eq!(id_rewrite.ret_text, "_Ptr<int>");
    assert_eq!(id_rewrite.params_text, "_Ptr<int> x");
    let fp_rewrite = analyzer.decl_rewrite(&fp_loc).expect("rewrite for fp");
    assert!(fp_rewrite.text.contains("_Ptr<int> (_Ptr<int>)"));
}

#[test]
fn test_guarded_index_contributes_potential_bound() {
    // void f(int *a, int n) { int i; if (i < n) { a[i]; } }
    let mut locs = Locs::new("pot.c");
    let f_loc = locs.next();
    let a_loc = locs.next();
    let n_loc = locs.next();
    let i_loc = locs.next();
    let iref1 = locs.next();
    let nref = locs.next();
    let cmp = locs.next();
    let aref = locs.next();
    let iref2 = locs.next();
    let idx_loc = locs.next();

    let body = vec![
        local("i", CType::named("int"), i_loc, None),
        Stmt::If {
            cond: Expr::binary(
                BinaryOp::Lt,
                Expr::decl_ref("i", CType::named("int"), iref1),
                Expr::decl_ref("n", CType::named("int"), nref),
                CType::named("int"),
                cmp,
            ),
            then_branch: vec![Stmt::Expr(Expr::index(
                Expr::decl_ref("a", int_ptr(), aref),
                Expr::decl_ref("i", CType::named("int"), iref2),
                CType::named("int"),
                idx_loc,
            ))],
            else_branch: vec![],
        },
    ];
    let program = one_unit(
        "pot.c",
        vec![func(
            "f",
            vec![
                ("a", int_ptr(), a_loc.clone()),
                ("n", CType::named("int"), n_loc),
            ],
            CType::named("void"),
            f_loc.clone(),
            body,
        )],
    );

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    // Subscripting makes the parameter an array; the guard names its bound.
    let rewrite = analyzer.func_rewrite(&f_loc).expect("rewrite for f");
    assert!(
        rewrite.params_text.contains("count(n)"),
        "params: {}",
        rewrite.params_text
    );
}

#[test]
fn test_consistent_generic_call_keeps_argument_checked() {
    // A generic void-pointer parameter does not drag a consistently-typed
    // argument to unchecked.
    let mut locs = Locs::new("gen.c");
    let gfree_loc = locs.next();
    let gp_loc = locs.next();
    let f_loc = locs.next();
    let p_loc = locs.next();
    let call_loc = locs.next();
    let callee = locs.next();
    let pref = locs.next();

    let mut generic_void = CType::pointer("void", 1);
    generic_void.generic_index = 0;
    let gfree = Decl::Function(FunctionDecl {
        name: "gfree".to_string(),
        loc: gfree_loc,
        ret: CType::named("void"),
        params: vec![ParamDecl {
            name: "p".to_string(),
            ty: generic_void,
            loc: gp_loc,
        }],
        is_static: false,
        is_variadic: false,
        has_proto: true,
        type_param_count: 1,
        body: Some(vec![]),
    });
    let f = func(
        "f",
        vec![],
        CType::named("void"),
        f_loc,
        vec![
            local("p", int_ptr(), p_loc.clone(), None),
            Stmt::Expr(Expr::call(
                Expr::decl_ref("gfree", CType::named("void"), callee),
                vec![Expr::decl_ref("p", int_ptr(), pref)],
                CType::named("void"),
                call_loc.clone(),
            )),
        ],
    );
    let program = one_unit("gen.c", vec![gfree, f]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Ptr));
    let type_args = analyzer.with_info(|info| info.type_args_at(&call_loc));
    assert_eq!(type_args.len(), 1);
    assert_eq!(type_args[0].1, "_Ptr<int>");
}

#[test]
fn test_unknown_callee_wilds_arguments() {
    // void f(void) { int *p; mystery(p); }
    let mut locs = Locs::new("unk.c");
    let f_loc = locs.next();
    let p_loc = locs.next();
    let call_loc = locs.next();
    let callee = locs.next();
    let pref = locs.next();

    let body = vec![
        local("p", int_ptr(), p_loc.clone(), None),
        Stmt::Expr(Expr::call(
            Expr::decl_ref("mystery", CType::named("int"), callee),
            vec![Expr::decl_ref("p", int_ptr(), pref)],
            CType::named("int"),
            call_loc,
        )),
    ];
    let program = one_unit("unk.c", vec![func("f", vec![], CType::named("void"), f_loc, body)]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&p_loc), Some(PtrKind::Wild));
    assert!(analyzer
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("mystery")));
}

#[test]
fn test_undefined_extern_function_params_stay_unchecked() {
    // void use(int *p); (no body)  void f(void) { int *q; use(q); }
    let mut locs = Locs::new("ext.c");
    let use_loc = locs.next();
    let up_loc = locs.next();
    let f_loc = locs.next();
    let q_loc = locs.next();
    let call_loc = locs.next();
    let callee = locs.next();
    let qref = locs.next();

    let use_decl = Decl::Function(FunctionDecl {
        name: "use".to_string(),
        loc: use_loc,
        ret: CType::named("void"),
        params: vec![ParamDecl {
            name: "p".to_string(),
            ty: int_ptr(),
            loc: up_loc,
        }],
        is_static: false,
        is_variadic: false,
        has_proto: true,
        type_param_count: 0,
        body: None,
    });
    let f = func(
        "f",
        vec![],
        CType::named("void"),
        f_loc,
        vec![
            local("q", int_ptr(), q_loc.clone(), None),
            Stmt::Expr(Expr::call(
                Expr::decl_ref("use", CType::named("void"), callee),
                vec![Expr::decl_ref("q", int_ptr(), qref)],
                CType::named("void"),
                call_loc,
            )),
        ],
    );
    let program = one_unit("ext.c", vec![use_decl, f]);

    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    // The library function is opaque; everything it touches stays as is.
    assert_eq!(analyzer.pointer_kind_at(&q_loc), Some(PtrKind::Wild));
}
