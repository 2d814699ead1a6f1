#![forbid(unsafe_code)]

//! Heuristic bug-pattern detection.
//!
//! Runs over the same CFG as the dataflow pass with two lightweight
//! abstractions: per-variable value intervals (seeded from preconditions and
//! refined by branch guards) and a nullability fact aliasing the dataflow
//! lattice. All four patterns are heuristic: they fire only on evidence the
//! analysis actually derived, never speculatively, so false negatives are
//! tolerated and false positives stay rare.

use std::collections::HashMap;

use vow_ast::{BinOp, Expr, ExprKind, Function, Span, Stmt, Type, UnaryOp};

use crate::cfg::{BlockId, ControlFlowGraph, EdgeKind};
use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::error::AnalysisError;

const I64_MIN: i128 = i64::MIN as i128;
const I64_MAX: i128 = i64::MAX as i128;

/// Inclusive value interval, kept in `i128` so interval arithmetic cannot
/// itself overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub lo: i128,
    pub hi: i128,
}

impl Interval {
    pub const TOP: Interval = Interval {
        lo: I64_MIN,
        hi: I64_MAX,
    };

    pub fn constant(v: i64) -> Self {
        Interval {
            lo: v as i128,
            hi: v as i128,
        }
    }

    pub fn contains_zero(&self) -> bool {
        self.lo <= 0 && self.hi >= 0
    }

    pub fn is_top(&self) -> bool {
        *self == Self::TOP
    }

    /// Union hull for path joins.
    pub fn hull(&self, other: &Interval) -> Interval {
        Interval {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    fn clamp(self) -> Interval {
        Interval {
            lo: self.lo.clamp(I64_MIN, I64_MAX),
            hi: self.hi.clamp(I64_MIN, I64_MAX),
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval {
            lo: self.lo.saturating_add(other.lo),
            hi: self.hi.saturating_add(other.hi),
        }
        .clamp()
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        Interval {
            lo: self.lo.saturating_sub(other.hi),
            hi: self.hi.saturating_sub(other.lo),
        }
        .clamp()
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        let products = [
            self.lo.saturating_mul(other.lo),
            self.lo.saturating_mul(other.hi),
            self.hi.saturating_mul(other.lo),
            self.hi.saturating_mul(other.hi),
        ];
        Interval {
            lo: *products.iter().min().expect("nonempty"),
            hi: *products.iter().max().expect("nonempty"),
        }
        .clamp()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Nullability {
    NotNull,
    MaybeNull,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct VarFacts {
    interval: Interval,
    nonzero: bool,
    null: Nullability,
}

impl VarFacts {
    fn top_for(ty: Option<&Type>) -> Self {
        VarFacts {
            interval: Interval::TOP,
            nonzero: false,
            null: match ty {
                Some(t) if t.is_nullable() => Nullability::MaybeNull,
                _ => Nullability::NotNull,
            },
        }
    }

    fn join(&self, other: &VarFacts) -> VarFacts {
        VarFacts {
            interval: self.interval.hull(&other.interval),
            nonzero: self.nonzero && other.nonzero,
            null: if self.null == Nullability::NotNull && other.null == Nullability::NotNull {
                Nullability::NotNull
            } else {
                Nullability::MaybeNull
            },
        }
    }
}

type Env = HashMap<String, VarFacts>;

pub fn analyze(
    cfg: &ControlFlowGraph<'_>,
    f: &Function,
) -> Result<Vec<Diagnostic>, AnalysisError> {
    let decl_types = declared_types(f);

    // Seed from parameters, then let preconditions narrow them.
    let mut seed = Env::new();
    for p in &f.params {
        seed.insert(p.name.clone(), VarFacts::top_for(Some(&p.ty)));
    }
    for pre in &f.preconditions {
        refine(pre, true, &mut seed);
    }

    // One forward pass in block order, joining at merges and ignoring
    // loop-back edges; loop headers widen whatever the loop assigns.
    let mut exit_env: HashMap<BlockId, Env> = HashMap::new();
    let mut diagnostics = Vec::new();

    for block in cfg.blocks.iter().filter(|b| b.reachable) {
        let mut env = if block.id == cfg.entry {
            seed.clone()
        } else {
            let mut merged: Option<Env> = None;
            for edge in cfg.predecessors(block.id) {
                if edge.kind == EdgeKind::LoopBack {
                    continue;
                }
                let Some(pred_exit) = exit_env.get(&edge.from) else {
                    continue;
                };
                let mut along = pred_exit.clone();
                if let Some(guard) = cfg.block(edge.from).guard {
                    match edge.kind {
                        EdgeKind::TrueBranch => refine(guard, true, &mut along),
                        EdgeKind::FalseBranch => refine(guard, false, &mut along),
                        _ => {}
                    }
                }
                merged = Some(match merged {
                    None => along,
                    Some(acc) => join_env(&acc, &along),
                });
            }
            merged.unwrap_or_else(|| seed.clone())
        };

        for name in &block.loop_widen {
            env.insert(
                name.clone(),
                VarFacts::top_for(decl_types.get(name.as_str()).map(|v| &**v)),
            );
        }
        if let Some(bounds) = &block.loop_bounds {
            let interval = match (&bounds.from.kind, &bounds.to.kind) {
                (ExprKind::IntLit(lo), ExprKind::IntLit(hi)) => Interval {
                    lo: *lo as i128,
                    hi: *hi as i128,
                },
                _ => Interval::TOP,
            };
            env.insert(
                bounds.var.to_string(),
                VarFacts {
                    interval,
                    nonzero: interval.lo > 0 || interval.hi < 0,
                    null: Nullability::NotNull,
                },
            );
            check_expr(bounds.from, &env, &mut diagnostics);
            check_expr(bounds.to, &env, &mut diagnostics);
        }

        for stmt in &block.stmts {
            for expr in stmt_exprs(stmt) {
                check_expr(expr, &env, &mut diagnostics);
            }
            apply_stmt(stmt, &mut env, &decl_types);
        }
        if let Some(guard) = block.guard {
            check_expr(guard, &env, &mut diagnostics);
        }

        exit_env.insert(block.id, env);
    }

    Ok(diagnostics)
}

fn declared_types(f: &Function) -> HashMap<&str, &Type> {
    let mut out: HashMap<&str, &Type> = HashMap::new();
    for p in &f.params {
        out.insert(p.name.as_str(), &p.ty);
    }
    fn walk<'f>(stmts: &'f [Stmt], out: &mut HashMap<&'f str, &'f Type>) {
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, ty, .. } => {
                    out.insert(name.as_str(), ty);
                }
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    walk(then_body, out);
                    walk(else_body, out);
                }
                Stmt::While { body, .. }
                | Stmt::DoWhile { body, .. }
                | Stmt::For { body, .. } => walk(body, out),
                _ => {}
            }
        }
    }
    walk(&f.body, &mut out);
    out
}

fn stmt_exprs<'f>(stmt: &'f Stmt) -> Vec<&'f Expr> {
    match stmt {
        Stmt::Let { value: Some(v), .. } => vec![v],
        Stmt::Assign { value, .. } => vec![value],
        Stmt::Return { value: Some(v), .. } => vec![v],
        Stmt::Throw { value, .. } => vec![value],
        Stmt::Expr(e) => vec![e],
        _ => Vec::new(),
    }
}

fn apply_stmt(stmt: &Stmt, env: &mut Env, decl_types: &HashMap<&str, &Type>) {
    match stmt {
        Stmt::Let { name, value, ty, .. } => {
            let facts = match value {
                Some(v) => facts_of(v, env),
                None => VarFacts::top_for(Some(ty)),
            };
            env.insert(name.clone(), facts);
        }
        Stmt::Assign { target, value, .. } => {
            let facts = facts_of(value, env);
            env.insert(target.clone(), facts);
        }
        Stmt::Opaque { .. } => {
            // May write anything: drop to declared-type defaults.
            let names: Vec<String> = env.keys().cloned().collect();
            for name in names {
                env.insert(
                    name.clone(),
                    VarFacts::top_for(decl_types.get(name.as_str()).copied()),
                );
            }
        }
        _ => {}
    }
}

/// Abstract value of an expression under the current facts.
fn facts_of(e: &Expr, env: &Env) -> VarFacts {
    let null = if e.ty.is_nullable() || matches!(e.kind, ExprKind::NullLit) {
        Nullability::MaybeNull
    } else {
        Nullability::NotNull
    };
    let interval = interval_of(e, env);
    VarFacts {
        interval,
        nonzero: interval.lo > 0 || interval.hi < 0,
        null,
    }
}

fn interval_of(e: &Expr, env: &Env) -> Interval {
    match &e.kind {
        ExprKind::IntLit(v) => Interval::constant(*v),
        ExprKind::Var(name) => env
            .get(name)
            .map(|f| f.interval)
            .unwrap_or(Interval::TOP),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => Interval::constant(0).sub(&interval_of(expr, env)),
        ExprKind::Binary { left, op, right } => {
            let l = interval_of(left, env);
            let r = interval_of(right, env);
            match op {
                BinOp::Add => l.add(&r),
                BinOp::Sub => l.sub(&r),
                BinOp::Mul => l.mul(&r),
                _ => Interval::TOP,
            }
        }
        _ => Interval::TOP,
    }
}

/// Narrow facts with a branch condition (or its negation).
fn refine(cond: &Expr, positive: bool, env: &mut Env) {
    match &cond.kind {
        ExprKind::Binary {
            left,
            op: BinOp::And,
            right,
        } if positive => {
            refine(left, true, env);
            refine(right, true, env);
        }
        ExprKind::Binary {
            left,
            op: BinOp::Or,
            right,
        } if !positive => {
            refine(left, false, env);
            refine(right, false, env);
        }
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } => refine(expr, !positive, env),
        ExprKind::Binary { left, op, right } if op.is_comparison() => {
            refine_comparison(left, *op, right, positive, env);
        }
        _ => {}
    }
}

fn refine_comparison(left: &Expr, op: BinOp, right: &Expr, positive: bool, env: &mut Env) {
    // Normalize to `var op rhs`.
    let (name, lit, flipped) = match (&left.kind, &right.kind) {
        (ExprKind::Var(name), _) => (name.as_str(), right, false),
        (_, ExprKind::Var(name)) => (name.as_str(), left, true),
        _ => return,
    };
    let op = if flipped { flip(op) } else { op };
    let op = if positive { op } else { negate(op) };

    // Null comparisons first.
    if matches!(lit.kind, ExprKind::NullLit) {
        if let Some(facts) = env.get_mut(name) {
            match op {
                BinOp::Ne => facts.null = Nullability::NotNull,
                BinOp::Eq => facts.null = Nullability::MaybeNull,
                _ => {}
            }
        }
        return;
    }

    let ExprKind::IntLit(c) = &lit.kind else {
        return;
    };
    let c = *c as i128;
    let Some(facts) = env.get_mut(name) else {
        return;
    };
    match op {
        BinOp::Lt => facts.interval.hi = facts.interval.hi.min(c - 1),
        BinOp::Le => facts.interval.hi = facts.interval.hi.min(c),
        BinOp::Gt => facts.interval.lo = facts.interval.lo.max(c + 1),
        BinOp::Ge => facts.interval.lo = facts.interval.lo.max(c),
        BinOp::Eq => {
            facts.interval = Interval { lo: c, hi: c };
        }
        BinOp::Ne => {
            if c == 0 {
                facts.nonzero = true;
            }
        }
        _ => {}
    }
    if facts.interval.lo > 0 || facts.interval.hi < 0 {
        facts.nonzero = true;
    }
}

fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

fn negate(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Ge,
        BinOp::Le => BinOp::Gt,
        BinOp::Gt => BinOp::Le,
        BinOp::Ge => BinOp::Lt,
        BinOp::Eq => BinOp::Ne,
        BinOp::Ne => BinOp::Eq,
        other => other,
    }
}

fn join_env(a: &Env, b: &Env) -> Env {
    let mut out = Env::new();
    for (name, facts) in a {
        match b.get(name) {
            Some(other) => {
                out.insert(name.clone(), facts.join(other));
            }
            None => {
                out.insert(name.clone(), *facts);
            }
        }
    }
    for (name, facts) in b {
        out.entry(name.clone()).or_insert(*facts);
    }
    out
}

fn check_expr(e: &Expr, env: &Env, diagnostics: &mut Vec<Diagnostic>) {
    check_overflow(e, diagnostics);
    e.walk(&mut |node| match &node.kind {
        ExprKind::Binary {
            op: BinOp::Div | BinOp::Mod,
            right,
            ..
        } => check_divisor(node.span, right, env, diagnostics),
        ExprKind::Index { base, index } => {
            check_null_deref(base, env, diagnostics);
            check_index_range(index, env, diagnostics);
        }
        ExprKind::Length(base) => check_null_deref(base, env, diagnostics),
        _ => {}
    });
}

fn check_divisor(site: Span, divisor: &Expr, env: &Env, diagnostics: &mut Vec<Diagnostic>) {
    match &divisor.kind {
        ExprKind::IntLit(0) => diagnostics.push(Diagnostic::warning(
            "divide-by-zero",
            DiagnosticCategory::BugPattern,
            site,
            "division by constant zero",
        )),
        ExprKind::IntLit(_) => {}
        ExprKind::Var(name) => {
            let facts = env
                .get(name)
                .copied()
                .unwrap_or_else(|| VarFacts::top_for(None));
            if facts.interval.contains_zero() && !facts.nonzero {
                diagnostics.push(Diagnostic::warning(
                    "divide-by-zero",
                    DiagnosticCategory::BugPattern,
                    site,
                    format!("divisor `{name}` may be zero and no precondition rules it out"),
                ));
            }
        }
        _ => {
            let interval = interval_of(divisor, env);
            if interval.contains_zero() && !interval.is_top() {
                diagnostics.push(Diagnostic::warning(
                    "divide-by-zero",
                    DiagnosticCategory::BugPattern,
                    site,
                    "divisor may evaluate to zero",
                ));
            }
        }
    }
}

fn check_null_deref(base: &Expr, env: &Env, diagnostics: &mut Vec<Diagnostic>) {
    let ExprKind::Var(name) = &base.kind else {
        return;
    };
    let maybe_null = env
        .get(name)
        .map(|f| f.null == Nullability::MaybeNull)
        .unwrap_or(base.ty.is_nullable());
    if maybe_null {
        diagnostics.push(Diagnostic::warning(
            "null-dereference",
            DiagnosticCategory::BugPattern,
            base.span,
            format!("`{name}` may be null when dereferenced here"),
        ));
    }
}

fn check_index_range(index: &Expr, env: &Env, diagnostics: &mut Vec<Diagnostic>) {
    let interval = interval_of(index, env);
    // Fire on derived evidence of negativity, not on mere ignorance.
    let negative_evidence = interval.hi < 0 || (interval.lo < 0 && !interval.is_top());
    if negative_evidence {
        diagnostics.push(Diagnostic::warning(
            "index-out-of-bounds",
            DiagnosticCategory::BugPattern,
            index.span,
            "index range is not contained in [0, length)",
        ));
    }
}

/// Report compile-time-determinable constant arithmetic that exceeds the
/// 64-bit range, innermost offending node only.
fn check_overflow(e: &Expr, diagnostics: &mut Vec<Diagnostic>) {
    overflow_sites(e, diagnostics);
}

fn overflow_sites(e: &Expr, diagnostics: &mut Vec<Diagnostic>) -> bool {
    let mut child_reported = false;
    match &e.kind {
        ExprKind::Unary { expr, .. } => {
            child_reported |= overflow_sites(expr, diagnostics);
        }
        ExprKind::Binary { left, right, .. } => {
            child_reported |= overflow_sites(left, diagnostics);
            child_reported |= overflow_sites(right, diagnostics);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                child_reported |= overflow_sites(arg, diagnostics);
            }
        }
        ExprKind::Index { base, index } => {
            child_reported |= overflow_sites(base, diagnostics);
            child_reported |= overflow_sites(index, diagnostics);
        }
        ExprKind::Length(base) => {
            child_reported |= overflow_sites(base, diagnostics);
        }
        _ => {}
    }
    if child_reported {
        return true;
    }
    let is_arith = matches!(
        &e.kind,
        ExprKind::Binary { op, .. } if op.is_arithmetic()
    ) || matches!(
        &e.kind,
        ExprKind::Unary { op: UnaryOp::Neg, .. }
    );
    if is_arith && e.ty == Type::Int {
        if let Some(v) = fold_const(e) {
            if !(I64_MIN..=I64_MAX).contains(&v) {
                diagnostics.push(Diagnostic::warning(
                    "integer-overflow",
                    DiagnosticCategory::BugPattern,
                    e.span,
                    "constant arithmetic exceeds the 64-bit integer range",
                ));
                return true;
            }
        }
    }
    false
}

fn fold_const(e: &Expr) -> Option<i128> {
    match &e.kind {
        ExprKind::IntLit(v) => Some(*v as i128),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => fold_const(expr).map(|v| -v),
        ExprKind::Binary { left, op, right } => {
            let l = fold_const(left)?;
            let r = fold_const(right)?;
            match op {
                BinOp::Add => Some(l + r),
                BinOp::Sub => Some(l - r),
                BinOp::Mul => l.checked_mul(r),
                BinOp::Div => (r != 0).then(|| l.div_euclid(r)),
                BinOp::Mod => (r != 0).then(|| l.rem_euclid(r)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, FunctionId, Param};

    fn sp() -> Span {
        span(0, 1)
    }

    fn sp_at(offset: usize) -> Span {
        span(offset, 1)
    }

    fn func(params: Vec<Param>, preconditions: Vec<Expr>, body: Vec<Stmt>) -> Function {
        Function {
            id: FunctionId(0),
            name: "f".to_string(),
            params,
            return_type: Type::Int,
            preconditions,
            postconditions: vec![],
            effects: vec![],
            body,
            span: sp(),
        }
    }

    fn run(f: &Function) -> Vec<Diagnostic> {
        let cfg = crate::cfg::build(&f.body);
        analyze(&cfg, f).unwrap()
    }

    fn divide_body(site: Span) -> Vec<Stmt> {
        vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                site,
                Type::Int,
                ExprKind::Binary {
                    left: Box::new(Expr::var(sp(), "a", Type::Int)),
                    op: BinOp::Div,
                    right: Box::new(Expr::var(sp(), "b", Type::Int)),
                },
            )),
        }]
    }

    fn int_params() -> Vec<Param> {
        vec![
            Param::new(sp(), "a", Type::Int),
            Param::new(sp(), "b", Type::Int),
        ]
    }

    #[test]
    fn test_unconstrained_divisor_fires_once() {
        let f = func(int_params(), vec![], divide_body(sp_at(42)));
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "divide-by-zero");
        assert_eq!(diags[0].span, sp_at(42));
    }

    #[test]
    fn test_precondition_rules_out_zero_divisor() {
        let pre = Expr::binary(
            sp(),
            Expr::var(sp(), "b", Type::Int),
            BinOp::Ne,
            Expr::int(sp(), 0),
        );
        let f = func(int_params(), vec![pre], divide_body(sp()));
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_positive_range_precondition_also_rules_out_zero() {
        let pre = Expr::binary(
            sp(),
            Expr::var(sp(), "b", Type::Int),
            BinOp::Gt,
            Expr::int(sp(), 0),
        );
        let f = func(int_params(), vec![pre], divide_body(sp()));
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_guard_protects_division() {
        // if b != 0 { return a / b } return 0
        let body = vec![
            Stmt::If {
                span: sp(),
                cond: Expr::binary(
                    sp(),
                    Expr::var(sp(), "b", Type::Int),
                    BinOp::Ne,
                    Expr::int(sp(), 0),
                ),
                then_body: divide_body(sp()),
                else_body: vec![],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::int(sp(), 0)),
            },
        ];
        let f = func(int_params(), vec![], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_literal_zero_divisor() {
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                sp_at(9),
                Type::Int,
                ExprKind::Binary {
                    left: Box::new(Expr::var(sp(), "a", Type::Int)),
                    op: BinOp::Mod,
                    right: Box::new(Expr::int(sp(), 0)),
                },
            )),
        }];
        let f = func(int_params(), vec![], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "divide-by-zero");
    }

    #[test]
    fn test_nullable_index_base_fires() {
        let xs_ty = Type::nullable(Type::array(Type::Int));
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                sp(),
                Type::Int,
                ExprKind::Index {
                    base: Box::new(Expr::var(sp_at(5), "xs", xs_ty.clone())),
                    index: Box::new(Expr::int(sp(), 0)),
                },
            )),
        }];
        let f = func(vec![Param::new(sp(), "xs", xs_ty)], vec![], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "null-dereference");
        assert_eq!(diags[0].span, sp_at(5));
    }

    #[test]
    fn test_null_check_guard_clears_nullability() {
        let xs_ty = Type::nullable(Type::array(Type::Int));
        // if xs != null { return xs[0] } return 0
        let body = vec![
            Stmt::If {
                span: sp(),
                cond: Expr::binary(
                    sp(),
                    Expr::var(sp(), "xs", xs_ty.clone()),
                    BinOp::Ne,
                    Expr::null(sp(), xs_ty.clone()),
                ),
                then_body: vec![Stmt::Return {
                    span: sp(),
                    value: Some(Expr::new(
                        sp(),
                        Type::Int,
                        ExprKind::Index {
                            base: Box::new(Expr::var(sp(), "xs", xs_ty.clone())),
                            index: Box::new(Expr::int(sp(), 0)),
                        },
                    )),
                }],
                else_body: vec![],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::int(sp(), 0)),
            },
        ];
        let f = func(vec![Param::new(sp(), "xs", xs_ty)], vec![], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_constant_overflow_detected_once() {
        // (i64::MAX) + 1
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                sp_at(3),
                Type::Int,
                ExprKind::Binary {
                    left: Box::new(Expr::int(sp(), i64::MAX)),
                    op: BinOp::Add,
                    right: Box::new(Expr::int(sp(), 1)),
                },
            )),
        }];
        let f = func(vec![], vec![], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "integer-overflow");
        assert_eq!(diags[0].span, sp_at(3));
    }

    #[test]
    fn test_in_range_constant_arithmetic_is_clean() {
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::binary(
                sp(),
                Expr::int(sp(), 1_000_000),
                BinOp::Mul,
                Expr::int(sp(), 1_000),
            )),
        }];
        let f = func(vec![], vec![], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_negative_index_evidence_fires() {
        // requires i < 0; return xs[i]
        let xs_ty = Type::array(Type::Int);
        let pre = Expr::binary(
            sp(),
            Expr::var(sp(), "i", Type::Int),
            BinOp::Lt,
            Expr::int(sp(), 0),
        );
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                sp(),
                Type::Int,
                ExprKind::Index {
                    base: Box::new(Expr::var(sp(), "xs", xs_ty.clone())),
                    index: Box::new(Expr::var(sp_at(8), "i", Type::Int)),
                },
            )),
        }];
        let f = func(
            vec![
                Param::new(sp(), "xs", xs_ty),
                Param::new(sp(), "i", Type::Int),
            ],
            vec![pre],
            body,
        );
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "index-out-of-bounds");
    }

    #[test]
    fn test_unconstrained_index_does_not_fire() {
        let xs_ty = Type::array(Type::Int);
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::new(
                sp(),
                Type::Int,
                ExprKind::Index {
                    base: Box::new(Expr::var(sp(), "xs", xs_ty.clone())),
                    index: Box::new(Expr::var(sp(), "i", Type::Int)),
                },
            )),
        }];
        let f = func(
            vec![
                Param::new(sp(), "xs", xs_ty),
                Param::new(sp(), "i", Type::Int),
            ],
            vec![],
            body,
        );
        assert!(run(&f).is_empty());
    }
}
