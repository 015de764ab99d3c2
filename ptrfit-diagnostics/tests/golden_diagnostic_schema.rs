use jsonschema::JSONSchema;
use ptrfit_diagnostics::{DiagnosticEngine, Span};
use serde_json::Value;
use std::fs;

#[test]
fn test_diagnostics_json_against_schema() {
    let mut engine = DiagnosticEngine::new();

    let span = Span::new("main.c".to_string(), 2, 5, 3);
    engine.wild_root_cause("p", "cast from int to int *", span.clone());
    engine.merge_conflict("f", "differing number of arguments", span.clone());
    engine.invalid_bounds("buf", span);
    engine.unknown_function("memcp", Span::unknown(), &["memcpy".to_string()]);

    // Emit JSON
    let json = engine.to_json();

    // Parse JSON
    let v: Value = serde_json::from_str(&json).expect("valid json");

    // Load schema
    let schema_str =
        fs::read_to_string("schemas/diagnostic.schema.json").expect("schema exists");
    let schema_json: Value = serde_json::from_str(&schema_str).expect("valid schema");
    let compiled = JSONSchema::compile(&schema_json).expect("valid schema compiles");

    // Validate
    let result = compiled.validate(&v);
    if let Err(errors) = result {
        for err in errors {
            panic!("Schema validation error: {}", err);
        }
    }
}
