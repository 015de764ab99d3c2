// Interactive invalidation: retract wild assumptions and re-solve.

use ptrfit_analysis::{Analyzer, CoreOptions, PtrKind};
use ptrfit_ast::{CType, Decl, FieldDecl, Program, RecordDecl, SourceLoc, TranslationUnit};

fn union_program() -> (Program, SourceLoc, SourceLoc) {
    // union u { int *a; int *b; };
    let a_loc = SourceLoc::new("u.c", 2, 10);
    let b_loc = SourceLoc::new("u.c", 3, 10);
    let program = Program {
        units: vec![TranslationUnit {
            file: "u.c".to_string(),
            decls: vec![Decl::Record(RecordDecl {
                name: "u".to_string(),
                loc: SourceLoc::new("u.c", 1, 1),
                is_union: true,
                is_inline: false,
                fields: vec![
                    FieldDecl {
                        name: "a".to_string(),
                        ty: CType::pointer("int", 1),
                        loc: a_loc.clone(),
                    },
                    FieldDecl {
                        name: "b".to_string(),
                        ty: CType::pointer("int", 1),
                        loc: b_loc.clone(),
                    },
                ],
            })],
        }],
    };
    (program, a_loc, b_loc)
}

#[test]
fn test_union_fields_are_wild() {
    let (program, a_loc, b_loc) = union_program();
    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    assert_eq!(analyzer.pointer_kind_at(&a_loc), Some(PtrKind::Wild));
    assert_eq!(analyzer.pointer_kind_at(&b_loc), Some(PtrKind::Wild));
}

#[test]
fn test_make_single_pointer_non_wild() {
    let (program, a_loc, b_loc) = union_program();
    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    let a_key = analyzer
        .with_info(|info| info.outer_var_key(&a_loc))
        .expect("key for a");

    let changed = analyzer.make_single_pointer_non_wild(a_key);
    assert!(changed.contains(&a_key));

    // Only the selected pointer is released; its sibling keeps its bound.
    assert_eq!(analyzer.pointer_kind_at(&a_loc), Some(PtrKind::Ptr));
    assert_eq!(analyzer.pointer_kind_at(&b_loc), Some(PtrKind::Wild));
}

#[test]
fn test_invalidate_wild_reason_globally() {
    let (program, a_loc, b_loc) = union_program();
    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    let a_key = analyzer
        .with_info(|info| info.outer_var_key(&a_loc))
        .expect("key for a");

    // Both fields were wilded for the same reason; retracting the reason
    // releases both.
    let changed = analyzer.invalidate_wild_reason_globally(a_key);
    assert!(changed.len() >= 2);

    assert_eq!(analyzer.pointer_kind_at(&a_loc), Some(PtrKind::Ptr));
    assert_eq!(analyzer.pointer_kind_at(&b_loc), Some(PtrKind::Ptr));
}

#[test]
fn test_resolve_after_invalidation_is_stable() {
    let (program, a_loc, _) = union_program();
    let analyzer = Analyzer::new(CoreOptions::default());
    analyzer.analyze(&program);

    let a_key = analyzer
        .with_info(|info| info.outer_var_key(&a_loc))
        .expect("key for a");
    analyzer.make_single_pointer_non_wild(a_key);
    let first = analyzer.pointer_kind_at(&a_loc);

    // Solving again without touching constraints changes nothing.
    analyzer.solve();
    assert_eq!(analyzer.pointer_kind_at(&a_loc), first);
}
