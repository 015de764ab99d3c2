use ptrfit_ast::{CType, Decl, Program, SourceLoc, TranslationUnit, VarDecl};
use std::fs;

#[test]
fn test_program_load_from_frontend_dump() {
    let program = Program {
        units: vec![TranslationUnit {
            file: "lib.c".to_string(),
            decls: vec![Decl::Var(VarDecl {
                name: "buf".to_string(),
                ty: CType::pointer("char", 1),
                loc: SourceLoc::new("lib.c", 3, 7),
                is_global: true,
                is_static: false,
                init: None,
            })],
        }],
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("program.json");
    fs::write(&path, program.to_json().expect("serializes")).expect("writes");

    let loaded =
        Program::from_json(&fs::read_to_string(&path).expect("reads")).expect("deserializes");
    assert_eq!(loaded, program);
    assert_eq!(loaded.units[0].decls.len(), 1);
}

#[test]
fn test_sparse_json_defaults() {
    // A frontend may omit defaulted fields entirely.
    let json = r#"{
        "units": [{
            "file": "a.c",
            "decls": [{
                "Var": {
                    "name": "p",
                    "ty": { "base": "int", "levels": [{ "shape": "Pointer" }] },
                    "loc": { "file": "a.c", "line": 1, "column": 6 }
                }
            }]
        }]
    }"#;
    let program = Program::from_json(json).expect("parses sparse json");
    match &program.units[0].decls[0] {
        Decl::Var(v) => {
            assert_eq!(v.name, "p");
            assert!(v.ty.is_pointer());
            assert!(!v.is_global);
            assert_eq!(v.ty.generic_index, -1);
        }
        other => panic!("unexpected decl {:?}", other),
    }
}
