#![forbid(unsafe_code)]

use std::fmt;

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Reserved symbol a postcondition uses to refer to the function's return value.
pub const RESULT_NAME: &str = "result";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

/// Overflow semantics the module's integers were declared with.
///
/// `Wrap` matches two's-complement wraparound in the target language;
/// `Trap` means overflow is a runtime fault and proofs must rule it out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegerMode {
    Wrap,
    Trap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// 64-bit integer; overflow behavior comes from the module's [`IntegerMode`].
    Int,
    Real,
    Bool,
    Str,
    Array(Box<Type>),
    /// A type that additionally admits `null`.
    Nullable(Box<Type>),
    Unit,
}

impl Type {
    pub fn array(elem: Type) -> Self {
        Type::Array(Box::new(elem))
    }

    pub fn nullable(inner: Type) -> Self {
        Type::Nullable(Box::new(inner))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    /// Strip one level of nullability, if present.
    pub fn strip_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self.strip_nullable() {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Real => write!(f, "real"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "str"),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Nullable(inner) => write!(f, "{inner}?"),
            Type::Unit => write!(f, "unit"),
        }
    }
}

/// Declared effect atoms.
///
/// A fixed subset is sink-classified for taint analysis; `ExternalInput`
/// marks a callable whose return value is untrusted, and `Sanitize` marks a
/// taint-clearing callable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    DbRead,
    DbWrite,
    ProcExec,
    MarkupEmit,
    NetRead,
    ExternalInput,
    Sanitize,
}

impl Effect {
    /// Whether a call carrying this effect is a security sink.
    pub fn is_sink(self) -> bool {
        matches!(self, Effect::DbWrite | Effect::ProcExec | Effect::MarkupEmit)
    }

    /// Whether this effect makes a callable's return value a taint source.
    pub fn is_source(self) -> bool {
        matches!(self, Effect::ExternalInput)
    }

    pub fn is_sanitizer(self) -> bool {
        matches!(self, Effect::Sanitize)
    }

    pub fn label(self) -> &'static str {
        match self {
            Effect::DbRead => "db_read",
            Effect::DbWrite => "db_write",
            Effect::ProcExec => "proc_exec",
            Effect::MarkupEmit => "markup_emit",
            Effect::NetRead => "net_read",
            Effect::ExternalInput => "external_input",
            Effect::Sanitize => "sanitize",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// A typed expression node.
///
/// Expressions are produced by the external front end and are read-only from
/// this point on; the encoder and every analyzer share them by reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub ty: Type,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    IntLit(i64),
    RealLit(f64),
    BoolLit(bool),
    StrLit(String),
    NullLit,
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Length(Box<Expr>),
}

impl Expr {
    pub fn new(span: Span, ty: Type, kind: ExprKind) -> Self {
        Self { span, ty, kind }
    }

    pub fn int(span: Span, value: i64) -> Self {
        Self::new(span, Type::Int, ExprKind::IntLit(value))
    }

    pub fn boolean(span: Span, value: bool) -> Self {
        Self::new(span, Type::Bool, ExprKind::BoolLit(value))
    }

    pub fn null(span: Span, ty: Type) -> Self {
        Self::new(span, ty, ExprKind::NullLit)
    }

    pub fn var(span: Span, name: impl Into<String>, ty: Type) -> Self {
        Self::new(span, ty, ExprKind::Var(name.into()))
    }

    pub fn unary(span: Span, op: UnaryOp, expr: Expr) -> Self {
        let ty = expr.ty.clone();
        Self::new(
            span,
            ty,
            ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
        )
    }

    pub fn binary(span: Span, left: Expr, op: BinOp, right: Expr) -> Self {
        let ty = if op.is_arithmetic() {
            left.ty.clone()
        } else {
            Type::Bool
        };
        Self::new(
            span,
            ty,
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        )
    }

    pub fn call(span: Span, callee: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Self::new(
            span,
            ty,
            ExprKind::Call {
                callee: callee.into(),
                args,
            },
        )
    }

    pub fn index(span: Span, base: Expr, index: Expr) -> Self {
        let ty = base
            .ty
            .element_type()
            .cloned()
            .unwrap_or(Type::Unit);
        Self::new(
            span,
            ty,
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
        )
    }

    pub fn length(span: Span, base: Expr) -> Self {
        Self::new(span, Type::Int, ExprKind::Length(Box::new(base)))
    }

    /// Visit this expression and every subexpression, outside-in.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::IntLit(_)
            | ExprKind::RealLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StrLit(_)
            | ExprKind::NullLit
            | ExprKind::Var(_) => {}
            ExprKind::Unary { expr, .. } => expr.walk(f),
            ExprKind::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            ExprKind::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            ExprKind::Length(base) => base.walk(f),
        }
    }

    /// Collect every variable read in this expression, with the span of each use.
    pub fn variable_reads(&self) -> Vec<(&str, Span)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Var(name) = &e.kind {
                out.push((name.as_str(), e.span));
            }
        });
        out
    }

    /// Collect the callee names of every call in this expression.
    pub fn call_sites(&self) -> Vec<(&str, Span)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Call { callee, .. } = &e.kind {
                out.push((callee.as_str(), e.span));
            }
        });
        out
    }
}

/// Canonical rendering, stable across runs. Used for cache fingerprints and
/// for echoing a contract back in human-readable reports.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::IntLit(v) => write!(f, "{v}"),
            ExprKind::RealLit(v) => write!(f, "{v}"),
            ExprKind::BoolLit(v) => write!(f, "{v}"),
            ExprKind::StrLit(s) => write!(f, "{s:?}"),
            ExprKind::NullLit => write!(f, "null"),
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Unary { op, expr } => write!(f, "({} {expr})", op.symbol()),
            ExprKind::Binary { left, op, right } => {
                write!(f, "({} {left} {right})", op.symbol())
            }
            ExprKind::Call { callee, args } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            ExprKind::Index { base, index } => write!(f, "(index {base} {index})"),
            ExprKind::Length(base) => write!(f, "(len {base})"),
        }
    }
}

/// A statement in a function body.
///
/// The front end widens anything it could not classify into [`Stmt::Opaque`];
/// analyzers treat those blocks as able to read or write anything.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let {
        span: Span,
        name: String,
        ty: Type,
        value: Option<Expr>,
    },
    Assign {
        span: Span,
        target: String,
        value: Expr,
    },
    If {
        span: Span,
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        span: Span,
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        span: Span,
        body: Vec<Stmt>,
        cond: Expr,
    },
    /// Counting loop: `for var = from .. to { body }`, inclusive bounds.
    For {
        span: Span,
        var: String,
        from: Expr,
        to: Expr,
        body: Vec<Stmt>,
    },
    Return {
        span: Span,
        value: Option<Expr>,
    },
    Throw {
        span: Span,
        value: Expr,
    },
    Expr(Expr),
    Opaque {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::DoWhile { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Throw { span, .. }
            | Stmt::Opaque { span } => *span,
            Stmt::Expr(e) => e.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
    /// Declared as externally supplied input; seeds the taint analysis.
    pub from_external: bool,
}

impl Param {
    pub fn new(span: Span, name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            span,
            from_external: false,
        }
    }

    pub fn external(span: Span, name: impl Into<String>, ty: Type) -> Self {
        Self {
            from_external: true,
            ..Self::new(span, name, ty)
        }
    }
}

/// A function as handed over by the front end. Immutable once parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub preconditions: Vec<Expr>,
    pub postconditions: Vec<Expr>,
    pub effects: Vec<Effect>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Function {
    pub fn contract_count(&self) -> usize {
        self.preconditions.len() + self.postconditions.len()
    }

    pub fn has_effect(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Signature rendering used for fingerprinting; stable across runs.
    pub fn signature(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = write!(out, "fn {}(", self.name);
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: {}", p.name, p.ty);
            if p.from_external {
                out.push_str(" @external");
            }
        }
        let _ = write!(out, ") -> {}", self.return_type);
        for e in &self.effects {
            let _ = write!(out, " !{}", e.label());
        }
        out
    }
}

/// A callable declared outside the module, visible only through its signature.
///
/// An empty effect list means the callable is pure. Calls to names found
/// neither among the module's functions nor its externs are classified
/// `Unknown` by the coordinator's unknown-call policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternFunction {
    pub name: String,
    pub param_types: Vec<Type>,
    pub return_type: Type,
    pub effects: Vec<Effect>,
}

impl ExternFunction {
    pub fn is_pure(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.effects.iter().any(|e| e.is_sink())
    }

    pub fn is_sanitizer(&self) -> bool {
        self.effects.iter().any(|e| e.is_sanitizer())
    }

    pub fn is_source(&self) -> bool {
        self.effects.iter().any(|e| e.is_source())
    }
}

/// A typed module: the unit of analysis the coordinator receives.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: String,
    pub integer_mode: IntegerMode,
    pub functions: Vec<Function>,
    pub externs: Vec<ExternFunction>,
}

impl Module {
    pub fn new(name: impl Into<String>, integer_mode: IntegerMode) -> Self {
        Self {
            name: name.into(),
            integer_mode,
            functions: Vec::new(),
            externs: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn extern_fn(&self, name: &str) -> Option<&ExternFunction> {
        self.externs.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        span(0, 1)
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Int.to_string(), "int");
        assert_eq!(Type::array(Type::Int).to_string(), "int[]");
        assert_eq!(Type::nullable(Type::array(Type::Str)).to_string(), "str[]?");
    }

    #[test]
    fn test_effect_classification() {
        assert!(Effect::DbWrite.is_sink());
        assert!(Effect::ProcExec.is_sink());
        assert!(Effect::MarkupEmit.is_sink());
        assert!(!Effect::DbRead.is_sink());
        assert!(Effect::ExternalInput.is_source());
        assert!(Effect::Sanitize.is_sanitizer());
    }

    #[test]
    fn test_expr_canonical_display() {
        let e = Expr::binary(
            sp(),
            Expr::var(sp(), "a", Type::Int),
            BinOp::Add,
            Expr::int(sp(), 2),
        );
        assert_eq!(e.to_string(), "(+ a 2)");

        let idx = Expr::index(
            sp(),
            Expr::var(sp(), "xs", Type::array(Type::Int)),
            Expr::var(sp(), "i", Type::Int),
        );
        assert_eq!(idx.to_string(), "(index xs i)");
        assert_eq!(idx.ty, Type::Int);
    }

    #[test]
    fn test_variable_reads() {
        let e = Expr::binary(
            sp(),
            Expr::var(sp(), "a", Type::Int),
            BinOp::Mul,
            Expr::binary(
                sp(),
                Expr::var(sp(), "b", Type::Int),
                BinOp::Sub,
                Expr::var(sp(), "a", Type::Int),
            ),
        );
        let reads: Vec<&str> = e.variable_reads().into_iter().map(|(n, _)| n).collect();
        assert_eq!(reads, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_function_signature_stable() {
        let f = Function {
            id: FunctionId(0),
            name: "store".to_string(),
            params: vec![
                Param::external(sp(), "input", Type::Str),
                Param::new(sp(), "limit", Type::Int),
            ],
            return_type: Type::Unit,
            preconditions: vec![],
            postconditions: vec![],
            effects: vec![Effect::DbWrite],
            body: vec![],
            span: sp(),
        };
        assert_eq!(
            f.signature(),
            "fn store(input: str @external, limit: int) -> unit !db_write"
        );
    }

    #[test]
    fn test_module_lookup() {
        let mut m = Module::new("demo", IntegerMode::Trap);
        m.externs.push(ExternFunction {
            name: "escape".to_string(),
            param_types: vec![Type::Str],
            return_type: Type::Str,
            effects: vec![Effect::Sanitize],
        });
        assert!(m.function("missing").is_none());
        assert!(m.extern_fn("escape").is_some_and(|e| e.is_sanitizer()));
    }
}
