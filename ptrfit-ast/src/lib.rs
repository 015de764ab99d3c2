// Program representation consumed by the ptrfit analyzer.
//
// A C frontend produces this tree (typically as JSON) after parsing and
// semantic analysis. Pointer types are pre-flattened into an ordered list of
// indirection levels, outermost first, so the analyzer never needs to look at
// C declarator syntax.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location that survives frontend teardown between translation units.
/// Two occurrences are the same syntactic entity iff their locations compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(file: &str, line: u32, column: u32) -> Self {
        Self {
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Type qualifiers recorded per indirection level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifiers {
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_volatile: bool,
    #[serde(default)]
    pub is_restrict: bool,
}

impl Qualifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn const_() -> Self {
        Self {
            is_const: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for Qualifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        if self.is_volatile {
            write!(f, "volatile ")?;
        }
        if self.is_restrict {
            write!(f, "restrict ")?;
        }
        Ok(())
    }
}

/// What one indirection level looked like in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayShape {
    /// Plain pointer: `T *`
    Pointer,
    /// Constant-size array: `T x[N]`
    Sized(u64),
    /// Incomplete array: `T x[]`
    Unsized,
}

/// A pointer kind already checked in the input program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckedKind {
    Ptr,
    Arr,
    NtArr,
}

/// One level of pointer or array indirection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerLevel {
    pub shape: ArrayShape,
    #[serde(default)]
    pub qualifiers: Qualifiers,
    /// Set when the source already used a checked type at this level
    #[serde(default)]
    pub checked: Option<CheckedKind>,
}

impl PointerLevel {
    pub fn pointer() -> Self {
        Self {
            shape: ArrayShape::Pointer,
            qualifiers: Qualifiers::none(),
            checked: None,
        }
    }

    pub fn sized_array(n: u64) -> Self {
        Self {
            shape: ArrayShape::Sized(n),
            qualifiers: Qualifiers::none(),
            checked: None,
        }
    }

    pub fn unsized_array() -> Self {
        Self {
            shape: ArrayShape::Unsized,
            qualifiers: Qualifiers::none(),
            checked: None,
        }
    }
}

/// Operand of a declared bounds annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsValue {
    Const(u64),
    /// Name of a variable, parameter, or field visible at the declaration
    Name(String),
}

/// Declared bounds annotation attached to a declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundsExpr {
    CountOf(BoundsValue),
    ByteCountOf(BoundsValue),
    Range(BoundsValue, BoundsValue),
}

impl BoundsExpr {
    /// A zero-width bound (`count(0)`), which demotes an array pointer back
    /// to a single-object pointer.
    pub fn is_zero_width(&self) -> bool {
        matches!(self, BoundsExpr::CountOf(BoundsValue::Const(0)))
    }
}

impl fmt::Display for BoundsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsValue::Const(c) => write!(f, "{}", c),
            BoundsValue::Name(n) => write!(f, "{}", n),
        }
    }
}

impl fmt::Display for BoundsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsExpr::CountOf(v) => write!(f, "count({})", v),
            BoundsExpr::ByteCountOf(v) => write!(f, "byte_count({})", v),
            BoundsExpr::Range(lo, hi) => write!(f, "bounds({}, {})", lo, hi),
        }
    }
}

/// Typedef occurrence inside a type; reconstruction stops at this level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedefInfo {
    pub level: usize,
    pub name: String,
}

/// Signature of a function type (used for pointers to functions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSig {
    pub ret: CType,
    pub params: Vec<CType>,
    #[serde(default)]
    pub is_variadic: bool,
}

/// A structural C type: a base spelling plus an ordered list of indirection
/// levels, outermost first. `int **p` has two levels; `int p` has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CType {
    pub base: String,
    #[serde(default)]
    pub levels: Vec<PointerLevel>,
    /// Existing interop type annotation text, verbatim from source
    #[serde(default)]
    pub itype: Option<String>,
    /// Declared bounds annotation
    #[serde(default)]
    pub bounds: Option<BoundsExpr>,
    /// Index of the generic type parameter this type refers to, or -1
    #[serde(default = "default_generic_index")]
    pub generic_index: i32,
    /// Present when the ultimate base is a function type
    #[serde(default)]
    pub function: Option<Box<FunctionSig>>,
    /// Typedef occurrence inside the type, if any
    #[serde(default)]
    pub typedef_info: Option<TypedefInfo>,
    /// Verbatim source spelling of the declaration's type, when extractable
    #[serde(default)]
    pub original: Option<String>,
}

fn default_generic_index() -> i32 {
    -1
}

impl CType {
    /// A non-pointer type with the given base spelling
    pub fn named(base: &str) -> Self {
        Self {
            base: base.to_string(),
            levels: Vec::new(),
            itype: None,
            bounds: None,
            generic_index: -1,
            function: None,
            typedef_info: None,
            original: None,
        }
    }

    /// `base *` repeated `depth` times
    pub fn pointer(base: &str, depth: usize) -> Self {
        let mut ty = Self::named(base);
        ty.levels = (0..depth).map(|_| PointerLevel::pointer()).collect();
        ty
    }

    pub fn with_bounds(mut self, bounds: BoundsExpr) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_levels(mut self, levels: Vec<PointerLevel>) -> Self {
        self.levels = levels;
        self
    }

    pub fn is_pointer(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn pointer_depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_void_pointer(&self) -> bool {
        self.is_pointer() && self.base == "void" && self.function.is_none()
    }

    pub fn is_function_pointer(&self) -> bool {
        self.is_pointer() && self.function.is_some()
    }

    pub fn is_va_list(&self) -> bool {
        self.base == "va_list" || self.base == "__builtin_va_list"
    }

    pub fn is_generic(&self) -> bool {
        self.generic_index >= 0
    }

    /// The type one dereference down, or None for non-pointers
    pub fn pointee(&self) -> Option<CType> {
        if self.levels.is_empty() {
            return None;
        }
        let mut inner = self.clone();
        inner.levels.remove(0);
        inner.original = None;
        Some(inner)
    }

    /// Source spelling of this type, synthesized from the structure when the
    /// frontend did not capture the original text.
    pub fn spelling(&self) -> String {
        if let Some(orig) = &self.original {
            return orig.clone();
        }
        let mut s = String::new();
        // Innermost qualifiers attach to the base in C spelling.
        s.push_str(&self.base);
        s.push(' ');
        for level in self.levels.iter().rev() {
            match level.shape {
                ArrayShape::Pointer => {
                    s.push('*');
                    let q = level.qualifiers.to_string();
                    if !q.is_empty() {
                        s.push_str(&q);
                    }
                }
                // Array suffixes belong after the declarator name; the
                // renderer appends them separately.
                ArrayShape::Sized(_) | ArrayShape::Unsized => {}
            }
        }
        s
    }
}

/// Structural compatibility of a cast. Casts through void pointers, between
/// identical pointer shapes, or to non-pointer types are safe; everything
/// else (changed pointee, changed depth, integer-to-pointer) is not.
pub fn cast_is_safe(dst: &CType, src: &CType) -> bool {
    if !dst.is_pointer() {
        return true;
    }
    if !src.is_pointer() {
        return false;
    }
    if dst.is_void_pointer() || src.is_void_pointer() {
        return true;
    }
    if dst.is_generic() || src.is_generic() {
        return true;
    }
    if let (Some(df), Some(sf)) = (&dst.function, &src.function) {
        return df == sf;
    }
    dst.base == src.base && dst.pointer_depth() == src.pointer_depth()
}

/// Variable declaration (global or local)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: CType,
    pub loc: SourceLoc,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub init: Option<Expr>,
}

/// Function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: CType,
    pub loc: SourceLoc,
}

/// Function declaration or definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub loc: SourceLoc,
    pub ret: CType,
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_variadic: bool,
    /// False for K&R-style declarations with no parameter list
    #[serde(default = "default_true")]
    pub has_proto: bool,
    /// Number of generic type parameters this function declares
    #[serde(default)]
    pub type_param_count: u32,
    #[serde(default)]
    pub body: Option<Vec<Stmt>>,
}

fn default_true() -> bool {
    true
}

impl FunctionDecl {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Struct or union field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: CType,
    pub loc: SourceLoc,
}

/// Struct or union declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDecl {
    /// Empty for anonymous records
    pub name: String,
    pub loc: SourceLoc,
    #[serde(default)]
    pub is_union: bool,
    /// True when the record is defined inline inside another declaration
    #[serde(default)]
    pub is_inline: bool,
    pub fields: Vec<FieldDecl>,
}

impl RecordDecl {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

/// Typedef declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedefDecl {
    pub name: String,
    pub underlying: CType,
    pub loc: SourceLoc,
}

/// Top-level declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Var(VarDecl),
    Function(FunctionDecl),
    Record(RecordDecl),
    Typedef(TypedefDecl),
}

/// One translation unit of the input program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub file: String,
    pub decls: Vec<Decl>,
}

/// The whole program handed to the analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub units: Vec<TranslationUnit>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Decl(VarDecl),
    Expr(Expr),
    Return(Option<Expr>, SourceLoc),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        #[serde(default)]
        else_branch: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    AddrOf,
    Deref,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Plus,
    Minus,
    Not,
    LogicalNot,
}

impl UnaryOp {
    pub fn is_inc_dec(&self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Assign,
    AddAssign,
    SubAssign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Comma,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    LogicalAnd,
    LogicalOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            BinaryOp::Assign | BinaryOp::AddAssign | BinaryOp::SubAssign
        )
    }

    pub fn is_additive(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }
}

/// Expression node. Every expression carries its semantic type as computed by
/// the frontend, its source location, and whether it came from a macro
/// expansion (macro-expanded locations cannot be rewritten).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: CType,
    pub loc: SourceLoc,
    #[serde(default)]
    pub in_macro: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    StringLit(String),
    NullPtr,
    DeclRef(String),
    Member {
        base: Box<Expr>,
        field: String,
        /// Name of the record the field belongs to
        record: String,
        is_arrow: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        /// True for compiler-inserted conversions
        implicit: bool,
    },
    SizeOf {
        arg: CType,
    },
    InitList(Vec<Expr>),
    CompoundLiteral {
        init: Vec<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    VaArg,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: CType, loc: SourceLoc) -> Self {
        Self {
            kind,
            ty,
            loc,
            in_macro: false,
        }
    }

    pub fn in_macro(mut self) -> Self {
        self.in_macro = true;
        self
    }

    pub fn int(value: i64, loc: SourceLoc) -> Self {
        Self::new(ExprKind::IntLit(value), CType::named("int"), loc)
    }

    pub fn string(value: &str, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::StringLit(value.to_string()),
            CType::pointer("char", 1),
            loc,
        )
    }

    pub fn null(ty: CType, loc: SourceLoc) -> Self {
        Self::new(ExprKind::NullPtr, ty, loc)
    }

    pub fn decl_ref(name: &str, ty: CType, loc: SourceLoc) -> Self {
        Self::new(ExprKind::DeclRef(name.to_string()), ty, loc)
    }

    pub fn call(callee: Expr, args: Vec<Expr>, ret: CType, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            ret,
            loc,
        )
    }

    pub fn unary(op: UnaryOp, operand: Expr, ty: CType, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            loc,
        )
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: CType, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            loc,
        )
    }

    pub fn index(base: Expr, index: Expr, ty: CType, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            ty,
            loc,
        )
    }

    pub fn cast(expr: Expr, to: CType, implicit: bool, loc: SourceLoc) -> Self {
        Self::new(
            ExprKind::Cast {
                expr: Box::new(expr),
                implicit,
            },
            to,
            loc,
        )
    }

    pub fn sizeof(arg: CType, loc: SourceLoc) -> Self {
        Self::new(ExprKind::SizeOf { arg }, CType::named("unsigned long"), loc)
    }

    /// True for a null pointer constant, including `(T *)0`. A bare zero
    /// literal counts, as it does in C.
    pub fn is_null_constant(&self) -> bool {
        match &self.kind {
            ExprKind::NullPtr => true,
            ExprKind::IntLit(0) => true,
            ExprKind::Cast { expr, .. } => expr.is_null_constant(),
            _ => false,
        }
    }

    /// Strip implicit casts, returning the innermost expression
    pub fn ignore_implicit_casts(&self) -> &Expr {
        match &self.kind {
            ExprKind::Cast {
                expr,
                implicit: true,
            } => expr.ignore_implicit_casts(),
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLoc {
        SourceLoc::new("test.c", line, 1)
    }

    #[test]
    fn test_pointer_depth() {
        let ty = CType::pointer("int", 2);
        assert!(ty.is_pointer());
        assert_eq!(ty.pointer_depth(), 2);
        assert_eq!(ty.pointee().map(|t| t.pointer_depth()), Some(1));
    }

    #[test]
    fn test_cast_safety() {
        let int_ptr = CType::pointer("int", 1);
        let char_ptr = CType::pointer("char", 1);
        let void_ptr = CType::pointer("void", 1);
        let int_val = CType::named("int");

        assert!(cast_is_safe(&int_ptr, &int_ptr));
        assert!(cast_is_safe(&int_ptr, &void_ptr));
        assert!(cast_is_safe(&void_ptr, &char_ptr));
        assert!(!cast_is_safe(&int_ptr, &char_ptr));
        assert!(!cast_is_safe(&int_ptr, &int_val));
        // Casting away from a pointer is fine.
        assert!(cast_is_safe(&int_val, &int_ptr));
    }

    #[test]
    fn test_null_constant_through_cast() {
        let p = CType::pointer("int", 1);
        // (int *)0 is a null pointer constant.
        let casted = Expr::cast(Expr::int(0, loc(1)), p, false, loc(1));
        assert!(casted.is_null_constant());
    }

    #[test]
    fn test_zero_width_bounds() {
        let b = BoundsExpr::CountOf(BoundsValue::Const(0));
        assert!(b.is_zero_width());
        let b = BoundsExpr::CountOf(BoundsValue::Name("n".to_string()));
        assert!(!b.is_zero_width());
    }

    #[test]
    fn test_spelling() {
        let mut ty = CType::pointer("int", 2);
        ty.levels[0].qualifiers = Qualifiers::const_();
        assert_eq!(ty.spelling(), "int **const ");
    }

    #[test]
    fn test_program_json_round_trip() {
        let program = Program {
            units: vec![TranslationUnit {
                file: "a.c".to_string(),
                decls: vec![Decl::Var(VarDecl {
                    name: "p".to_string(),
                    ty: CType::pointer("int", 1),
                    loc: SourceLoc::new("a.c", 1, 6),
                    is_global: true,
                    is_static: false,
                    init: None,
                })],
            }],
        };
        let json = program.to_json().expect("serializes");
        let back = Program::from_json(&json).expect("deserializes");
        assert_eq!(program, back);
    }
}
