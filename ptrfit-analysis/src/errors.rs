// Analyzer error types.

use ptrfit_ast::SourceLoc;
use ptrfit_diagnostics::{error_codes, Diagnostic, Span};
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failures the analysis reports instead of panicking. None of these abort
/// the whole run; the affected declaration keeps its original type and other
/// work continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// Redeclarations of a symbol could not be reconciled
    #[error("conflicting declarations of `{symbol}`: {reason}")]
    MergeConflict { symbol: String, reason: String },

    /// Redeclarations with different parameter counts
    #[error("`{symbol}` redeclared with {found} parameters, expected {expected}")]
    ArityMismatch {
        symbol: String,
        expected: usize,
        found: usize,
    },

    /// A declared bounds expression references values the analyzer cannot
    /// resolve
    #[error("bounds declared for `{name}` reference unknown values")]
    InvalidBounds { name: String },

    /// Lookup of a symbol that was never declared
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),

    /// A broken internal invariant; a bug, not a user error
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl AnalysisError {
    pub fn to_diagnostic(&self, loc: Option<&SourceLoc>) -> Diagnostic {
        let span = loc.map(span_of).unwrap_or_else(Span::unknown);
        match self {
            AnalysisError::MergeConflict { symbol, reason } => Diagnostic::error(
                error_codes::MERGE_CONFLICT,
                format!("conflicting declarations of `{}`", symbol),
                span,
            )
            .with_note(reason.clone()),
            AnalysisError::ArityMismatch {
                symbol,
                expected,
                found,
            } => Diagnostic::error(
                error_codes::ARITY_MISMATCH,
                format!(
                    "`{}` redeclared with {} parameters, expected {}",
                    symbol, found, expected
                ),
                span,
            ),
            AnalysisError::InvalidBounds { name } => Diagnostic::warning(
                error_codes::INVALID_BOUNDS,
                format!("bounds declared for `{}` reference unknown values", name),
                span,
            ),
            AnalysisError::UnknownSymbol(name) => Diagnostic::warning(
                error_codes::UNKNOWN_FUNCTION,
                format!("unknown symbol `{}`", name),
                span,
            ),
            AnalysisError::Invariant(msg) => Diagnostic::error(
                error_codes::MALFORMED_CONSTRAINT,
                format!("internal invariant violated: {}", msg),
                span,
            ),
        }
    }
}

/// Convert an AST location into a diagnostic span
pub fn span_of(loc: &SourceLoc) -> Span {
    Span::new(loc.file.clone(), loc.line as usize, loc.column as usize, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_conflict_display() {
        let err = AnalysisError::MergeConflict {
            symbol: "f".to_string(),
            reason: "differing number of arguments".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("conflicting declarations of `f`"));
        assert!(msg.contains("differing number of arguments"));
    }

    #[test]
    fn test_diagnostic_conversion() {
        let err = AnalysisError::InvalidBounds {
            name: "buf".to_string(),
        };
        let diag = err.to_diagnostic(Some(&SourceLoc::new("a.c", 3, 1)));
        assert_eq!(diag.code, error_codes::INVALID_BOUNDS);
        assert_eq!(diag.span.file, "a.c");
    }
}
