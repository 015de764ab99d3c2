// Diagnostics for the ptrfit analyzer
// Structured messages with spans, severities, and suggestions, rendered in
// the familiar compiler style.

use colored::Colorize;
use std::fmt;

/// Source code location (file, line, column)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize, // Length of the highlighted span
}

impl Span {
    pub fn new(file: String, line: usize, column: usize, length: usize) -> Self {
        Self {
            file,
            line,
            column,
            length,
        }
    }

    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file == "<unknown>"
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
    Info,
    Note,
    Help,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "{}", "error".red().bold()),
            ErrorLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
            ErrorLevel::Info => write!(f, "{}", "info".blue().bold()),
            ErrorLevel::Note => write!(f, "{}", "note".cyan().bold()),
            ErrorLevel::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// Structured diagnostic message
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: ErrorLevel,
    pub code: String, // e.g., "P0201" for a declaration merge conflict
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
    pub suggestion: Option<Suggestion>,
}

/// Code suggestion with replacement text
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub message: String,
    pub replacement: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(level: ErrorLevel, code: &str, message: String, span: Span) -> Self {
        Self {
            level,
            code: code.to_string(),
            message,
            span,
            notes: Vec::new(),
            help: None,
            suggestion: None,
        }
    }

    pub fn error(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Error, code, message, span)
    }

    pub fn warning(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Warning, code, message, span)
    }

    pub fn info(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Info, code, message, span)
    }

    pub fn note(message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Note, "", message, span)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn with_suggestion(mut self, message: String, replacement: String, span: Span) -> Self {
        self.suggestion = Some(Suggestion {
            message,
            replacement,
            span,
        });
        self
    }

    /// Render the diagnostic in compiler style, with a snippet from the
    /// original source when available.
    pub fn format(&self, source_code: &str) -> String {
        let mut output = String::new();

        // Header: error[P0201]: message
        output.push_str(&format!(
            "{}[{}]: {}\n",
            self.level,
            self.code,
            self.message.bold()
        ));

        // Location: --> file.c:12:15
        output.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            self.span.file,
            self.span.line,
            self.span.column
        ));

        if let Some(snippet) = self.source_snippet(source_code) {
            output.push_str(&snippet);
        }

        for note in &self.notes {
            output.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }

        if let Some(help) = &self.help {
            output.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        if let Some(suggestion) = &self.suggestion {
            output.push_str(&format!(
                " {} {}: `{}`\n",
                "help:".green().bold(),
                suggestion.message,
                suggestion.replacement
            ));
        }

        output
    }

    /// Render without source code (used by the Display impl)
    fn format_simple(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{}[{}]: {}\n",
            self.level,
            self.code,
            self.message.bold()
        ));

        output.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            self.span.file,
            self.span.line,
            self.span.column
        ));

        for note in &self.notes {
            output.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }

        if let Some(help) = &self.help {
            output.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        output
    }

    /// Extract a source line with an underline marking the span
    fn source_snippet(&self, source_code: &str) -> Option<String> {
        let lines: Vec<&str> = source_code.lines().collect();

        if self.span.line == 0 || self.span.line > lines.len() {
            return None;
        }

        let line = lines.get(self.span.line - 1)?;

        let mut snippet = String::new();
        let line_num_width = self.span.line.to_string().len().max(2);

        snippet.push_str(&format!(" {}\n", " ".repeat(line_num_width + 1)));
        snippet.push_str(&format!(
            " {} {} {}\n",
            format!("{:>width$}", self.span.line, width = line_num_width)
                .cyan()
                .bold(),
            "|".cyan().bold(),
            line
        ));

        let padding = " ".repeat(line_num_width + 3 + self.span.column.saturating_sub(1));
        let underline = "^".repeat(self.span.length.max(1));
        snippet.push_str(&format!(
            " {} {}{}\n",
            " ".repeat(line_num_width + 1),
            padding,
            underline.red().bold()
        ));

        Some(snippet)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

/// Diagnostic collection and reporting engine
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            ErrorLevel::Error => self.error_count += 1,
            ErrorLevel::Warning => self.warning_count += 1,
            ErrorLevel::Info => self.info_count += 1,
            _ => {}
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn emit_error(&mut self, code: &str, message: String, span: Span) {
        self.emit(Diagnostic::error(code, message, span));
    }

    pub fn emit_warning(&mut self, code: &str, message: String, span: Span) {
        self.emit(Diagnostic::warning(code, message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn info_count(&self) -> usize {
        self.info_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Print all diagnostics to stderr
    pub fn print_all(&self, source_code: &str) {
        for diag in &self.diagnostics {
            eprintln!("{}", diag.format(source_code));
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "\n{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }

        if self.warning_count > 0 {
            eprintln!(
                "{}: {} warning{} emitted",
                "warning".yellow().bold(),
                self.warning_count,
                if self.warning_count == 1 { "" } else { "s" }
            );
        }
    }

    /// Export diagnostics as JSON for IDEs and external tooling
    pub fn to_json(&self) -> String {
        let mut json = String::from("{\"diagnostics\":[");

        for (i, diag) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                json.push(',');
            }

            let level_str = match diag.level {
                ErrorLevel::Error => "error",
                ErrorLevel::Warning => "warning",
                ErrorLevel::Info => "info",
                ErrorLevel::Note => "note",
                ErrorLevel::Help => "help",
            };

            json.push_str(&format!(
                "{{\"level\":\"{}\",\"code\":\"{}\",\"message\":\"{}\",\"file\":\"{}\",\"line\":{},\"column\":{},\"length\":{}",
                level_str,
                diag.code,
                escape(&diag.message),
                escape(&diag.span.file),
                diag.span.line,
                diag.span.column,
                diag.span.length
            ));

            if !diag.notes.is_empty() {
                json.push_str(",\"notes\":[");
                for (j, note) in diag.notes.iter().enumerate() {
                    if j > 0 {
                        json.push(',');
                    }
                    json.push_str(&format!("\"{}\"", escape(note)));
                }
                json.push(']');
            }

            if let Some(help) = &diag.help {
                json.push_str(&format!(",\"help\":\"{}\"", escape(help)));
            }

            json.push('}');
        }

        json.push_str("]}");
        json
    }

    /// Clear all diagnostics
    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.error_count = 0;
        self.warning_count = 0;
        self.info_count = 0;
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Helpers for the diagnostic patterns the analyzer emits
impl DiagnosticEngine {
    /// A constraint forced a pointer to stay unchecked; name the root cause.
    pub fn wild_root_cause(&mut self, pointer: &str, reason: &str, span: Span) {
        self.emit(
            Diagnostic::warning(
                error_codes::WILD_ROOT_CAUSE,
                format!("pointer `{}` kept unchecked", pointer),
                span,
            )
            .with_note(format!("constraint introduced because: {}", reason))
            .with_help("resolving the cause may let this pointer become checked".to_string()),
        );
    }

    /// Redeclarations of the same symbol could not be merged.
    pub fn merge_conflict(&mut self, symbol: &str, reason: &str, span: Span) {
        self.emit(
            Diagnostic::error(
                error_codes::MERGE_CONFLICT,
                format!("conflicting declarations of `{}`", symbol),
                span,
            )
            .with_note(reason.to_string()),
        );
    }

    /// A declared bounds expression could not be resolved to known variables.
    pub fn invalid_bounds(&mut self, pointer: &str, span: Span) {
        self.emit(
            Diagnostic::warning(
                error_codes::INVALID_BOUNDS,
                format!("bounds declared for `{}` reference unknown values", pointer),
                span,
            )
            .with_note("the pointer keeps its inferred kind but loses its bounds".to_string()),
        );
    }

    /// Call to a function with no known declaration, with fuzzy suggestions.
    pub fn unknown_function(&mut self, name: &str, span: Span, known: &[String]) {
        let suggestions = fuzzy::find_similar_names(name, known, 0.7, 3);
        let mut diag = Diagnostic::warning(
            error_codes::UNKNOWN_FUNCTION,
            format!("call to unknown function `{}`; arguments kept unchecked", name),
            span,
        );
        if !suggestions.is_empty() {
            diag = diag.with_help(format!("did you mean `{}`?", suggestions.join("`, `")));
        }
        self.emit(diag);
    }

    /// An anonymous inline struct prevents rewriting its pointer members.
    pub fn inline_struct(&mut self, var: &str, span: Span) {
        self.emit(
            Diagnostic::warning(
                error_codes::INLINE_STRUCT,
                format!(
                    "rewriting skipped for `{}`: anonymous inline struct instance detected",
                    var
                ),
                span,
            )
            .with_help(
                "consider moving the struct definition out of the declaration".to_string(),
            ),
        );
    }
}

/// Diagnostic codes emitted by the analyzer
pub mod error_codes {
    // Input / program-shape errors (P00xx)
    pub const PARSE_INPUT: &str = "P0001";
    pub const UNKNOWN_FUNCTION: &str = "P0011";

    // Constraint-system errors (P01xx)
    pub const UNSAT_CONSTRAINT: &str = "P0101";
    pub const MALFORMED_CONSTRAINT: &str = "P0102";

    // Declaration linking errors (P02xx)
    pub const MERGE_CONFLICT: &str = "P0201";
    pub const ARITY_MISMATCH: &str = "P0202";

    // Bounds errors (P03xx)
    pub const INVALID_BOUNDS: &str = "P0301";

    // Warnings (W00xx)
    pub const WILD_ROOT_CAUSE: &str = "W0001";
    pub const INLINE_STRUCT: &str = "W0002";
    pub const VARARG_CALL: &str = "W0003";
    pub const UNWRITABLE_CAST: &str = "W0004";
}

/// Fuzzy matching utilities for "did you mean?" suggestions
pub mod fuzzy {
    use strsim::jaro_winkler;

    /// Find similar names using fuzzy matching (Jaro-Winkler distance)
    /// Returns up to `max_suggestions` names with similarity > threshold
    pub fn find_similar_names(
        target: &str,
        candidates: &[String],
        threshold: f64,
        max_suggestions: usize,
    ) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|candidate| {
                let similarity = jaro_winkler(target, candidate);
                (candidate.clone(), similarity)
            })
            .filter(|(_, score)| *score > threshold)
            .collect();

        // Sort by similarity (descending)
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(max_suggestions)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format() {
        let source = "int main(void) {\n    int *p = (int *)5;\n    return 0;\n}";

        let span = Span::new("test.c".to_string(), 2, 14, 8);
        let diag = Diagnostic::error(
            error_codes::UNSAT_CONSTRAINT,
            "pointer forced unchecked".to_string(),
            span.clone(),
        )
        .with_note("cast from int to int * is not checkable".to_string())
        .with_help("remove the integer-to-pointer cast".to_string());

        let formatted = diag.format(source);

        assert!(formatted.contains("P0101"));
        assert!(formatted.contains("pointer forced unchecked"));
        assert!(formatted.contains("test.c:2:14"));
    }

    #[test]
    fn test_engine_counts() {
        let mut engine = DiagnosticEngine::new();
        engine.emit_error("P0201", "conflict".to_string(), Span::unknown());
        engine.emit_warning("W0001", "kept wild".to_string(), Span::unknown());
        engine.emit_warning("W0002", "inline struct".to_string(), Span::unknown());

        assert!(engine.has_errors());
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 2);
    }

    #[test]
    fn test_unknown_function_suggestion() {
        let mut engine = DiagnosticEngine::new();
        let known = vec!["my_alloc".to_string(), "free_all".to_string()];
        engine.unknown_function("my_aloc", Span::unknown(), &known);

        let diag = &engine.diagnostics()[0];
        assert_eq!(diag.code, error_codes::UNKNOWN_FUNCTION);
        assert!(diag.help.as_deref().unwrap_or("").contains("my_alloc"));
    }

    #[test]
    fn test_json_escaping() {
        let mut engine = DiagnosticEngine::new();
        engine.emit_error(
            "P0201",
            "conflicting declarations of `f\"oo`".to_string(),
            Span::unknown(),
        );
        let json = engine.to_json();
        assert!(json.contains("\\\"oo"));
    }
}
