// Analyzer configuration. One value per analyzer; nothing global, so two
// analyzers in the same process cannot leak settings into each other.

/// Options controlling the core analysis
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Enable the pointer-type pass. Without it every pointer solves to
    /// `PTR` or `WILD` only.
    pub all_types: bool,
    /// Emit checked-region brackets in rewritten function output
    pub add_checked_regions: bool,
    /// Force arguments past a variadic function's declared arity to be
    /// unchecked; otherwise they are skipped with a warning
    pub handle_varargs: bool,
    /// Propagate constraints through existing interop-type annotations
    pub enable_prop_thru_itype: bool,
    /// User-declared allocator names treated like `malloc`
    pub allocator_functions: Vec<String>,
    /// Emit diagnostics naming the constraints that forced a pointer to
    /// stay unchecked
    pub warn_root_cause: bool,
    /// Like `warn_root_cause`, but for every affected pointer rather than
    /// one representative
    pub warn_all_root_cause: bool,
    /// Omit the checked-dimension reverse edge for Wild-to-Safe assignments
    pub disable_reverse_edges: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            all_types: true,
            add_checked_regions: false,
            handle_varargs: false,
            enable_prop_thru_itype: false,
            allocator_functions: Vec::new(),
            warn_root_cause: false,
            warn_all_root_cause: false,
            disable_reverse_edges: false,
        }
    }
}

impl CoreOptions {
    pub fn is_allocator(&self, name: &str) -> bool {
        matches!(name, "malloc" | "calloc" | "realloc")
            || self.allocator_functions.iter().any(|f| f == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_allocators() {
        let opts = CoreOptions::default();
        assert!(opts.is_allocator("malloc"));
        assert!(opts.is_allocator("realloc"));
        assert!(!opts.is_allocator("my_alloc"));
    }

    #[test]
    fn test_user_allocators() {
        let opts = CoreOptions {
            allocator_functions: vec!["my_alloc".to_string()],
            ..CoreOptions::default()
        };
        assert!(opts.is_allocator("my_alloc"));
    }
}
