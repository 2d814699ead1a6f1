#![forbid(unsafe_code)]

//! Lowering of contract expressions and function bodies to solver-neutral
//! formulas.
//!
//! The encoder is deliberately partial: anything outside the supported
//! fragment (calls with unknown bodies, string content reasoning, null
//! reasoning) fails with [`UnsupportedConstruct`] and marks the *contract*
//! unsupported; sibling contracts on the same function are unaffected. Body
//! encoding never fails — constructs it cannot model are widened to fresh
//! unconstrained symbols, which the orchestrator accounts for when
//! classifying refutations.

use std::collections::{BTreeSet, HashMap};

use miette::Diagnostic;
use thiserror::Error;

use vow_ast::{
    BinOp, Expr, ExprKind, Function, IntegerMode, Module, Span, Stmt, Type, UnaryOp, RESULT_NAME,
};

use crate::formula::{in_i64_range, wrap64, ContractFormula, Sort, Term, TermBinOp, TermUnOp};

/// How many times a counting loop with constant bounds is unrolled before the
/// encoder gives up and widens instead.
const LOOP_UNROLL_LIMIT: i64 = 64;

/// Maximum contract-side call inlining depth.
const INLINE_DEPTH_LIMIT: usize = 4;

#[derive(Debug, Error, Diagnostic)]
#[error("unsupported contract construct: {reason}")]
#[diagnostic(code(vow::verify::unsupported))]
pub struct UnsupportedConstruct {
    pub reason: String,
    #[label]
    pub span: Span,
}

impl UnsupportedConstruct {
    fn new(span: Span, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            span,
        }
    }
}

/// One normally-returning path through a function body.
#[derive(Clone, Debug)]
pub struct BodyPath {
    /// Conjunction of the branch conditions taken along the path.
    pub condition: Term,
    /// Symbolic return value; `None` on paths returning no value.
    pub result: Option<Term>,
}

/// Symbolic model of a function body's side-effect-free fragment.
#[derive(Clone, Debug)]
pub struct BodyModel {
    pub paths: Vec<BodyPath>,
    /// Set when any part of the body was approximated by fresh unconstrained
    /// symbols (unbounded loops, opaque statements, unknown calls). A
    /// refuting model found against a widened body is not a trustworthy
    /// counterexample.
    pub widened: bool,
}

type Env = HashMap<String, Term>;

/// Per-function encoder. Create one per function; fresh-symbol numbering is
/// local to it.
pub struct Encoder<'m> {
    module: &'m Module,
    fresh: usize,
    return_sort: Sort,
}

impl<'m> Encoder<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            fresh: 0,
            return_sort: Sort::Int,
        }
    }

    fn mode(&self) -> IntegerMode {
        self.module.integer_mode
    }

    fn fresh_sym(&mut self, sort: Sort) -> Term {
        self.fresh += 1;
        Term::sym(format!("%w{}", self.fresh), sort)
    }

    /// Sort a source type maps to; `None` for types the formula layer cannot
    /// represent.
    fn sort_for(ty: &Type) -> Option<Sort> {
        match ty {
            Type::Int => Some(Sort::Int),
            Type::Real => Some(Sort::Real),
            Type::Bool => Some(Sort::Bool),
            // Strings are opaque identities: equality and length only.
            Type::Str => Some(Sort::Int),
            Type::Array(elem) => Self::sort_for(elem).map(Sort::array),
            Type::Nullable(_) | Type::Unit => None,
        }
    }

    /// Sort the `result` symbol uses for a function with this return type.
    pub fn return_sort_for(ty: &Type) -> Sort {
        Self::sort_for(ty).unwrap_or(Sort::Int)
    }

    fn param_env(&self, f: &Function) -> Env {
        let mut env = Env::new();
        for p in &f.params {
            if let Some(sort) = Self::sort_for(&p.ty) {
                env.insert(p.name.clone(), Term::sym(p.name.clone(), sort));
            }
        }
        env
    }

    /// Domain constraints for a function's parameters (and, for
    /// postconditions, its result): integer symbols stay in 64-bit range,
    /// array and string lengths are nonnegative. Asserted as axioms, never
    /// as obligations.
    pub fn domain_axioms(&self, f: &Function, include_result: bool) -> Vec<Term> {
        let mut axioms = Vec::new();
        for p in &f.params {
            self.push_domain(&p.name, &p.ty, &mut axioms);
        }
        if include_result {
            self.push_domain(RESULT_NAME, &f.return_type, &mut axioms);
        }
        axioms
    }

    fn push_domain(&self, name: &str, ty: &Type, out: &mut Vec<Term>) {
        match ty {
            Type::Int => out.push(in_i64_range(Term::sym(name, Sort::Int))),
            Type::Str => out.push(Term::ge(
                Term::sym(format!("{name}#len"), Sort::Int),
                Term::IntConst(0),
            )),
            Type::Array(_) => {
                if let Some(sort) = Self::sort_for(ty) {
                    out.push(Term::ge(
                        Term::Length(Box::new(Term::sym(name, sort))),
                        Term::IntConst(0),
                    ));
                }
            }
            _ => {}
        }
    }

    /// Encode one contract expression over the function's parameters (and the
    /// reserved `result` symbol for postconditions).
    pub fn encode_contract(
        &mut self,
        f: &Function,
        expr: &Expr,
        include_result: bool,
    ) -> Result<ContractFormula, UnsupportedConstruct> {
        let mut env = self.param_env(f);
        if include_result {
            if let Some(sort) = Self::sort_for(&f.return_type) {
                env.insert(RESULT_NAME.to_string(), Term::sym(RESULT_NAME, sort));
            }
        }
        let mut side = Vec::new();
        let mut partial = false;
        let root = self.encode_expr(
            expr,
            &env,
            &Term::BoolConst(true),
            &mut side,
            &mut partial,
            0,
        )?;
        if root.sort() != Sort::Bool {
            return Err(UnsupportedConstruct::new(
                expr.span,
                "contract does not evaluate to a boolean",
            ));
        }
        Ok(ContractFormula {
            root,
            side_conditions: side,
            partial,
        })
    }

    fn push_side(guard: &Term, condition: Term, side: &mut Vec<Term>) {
        let guarded = match guard {
            Term::BoolConst(true) => condition,
            g => Term::implies(g.clone(), condition),
        };
        side.push(guarded);
    }

    fn encode_expr(
        &mut self,
        e: &Expr,
        env: &Env,
        guard: &Term,
        side: &mut Vec<Term>,
        partial: &mut bool,
        depth: usize,
    ) -> Result<Term, UnsupportedConstruct> {
        match &e.kind {
            ExprKind::IntLit(v) => Ok(Term::IntConst(*v as i128)),
            ExprKind::RealLit(v) => Ok(Term::RealConst(*v)),
            ExprKind::BoolLit(v) => Ok(Term::BoolConst(*v)),
            ExprKind::StrLit(_) => Err(UnsupportedConstruct::new(
                e.span,
                "string content reasoning (only equality and length of string variables is supported)",
            )),
            ExprKind::NullLit => Err(UnsupportedConstruct::new(
                e.span,
                "null reasoning in contracts",
            )),
            ExprKind::Var(name) => env.get(name).cloned().ok_or_else(|| {
                UnsupportedConstruct::new(e.span, format!("unbound symbol `{name}`"))
            }),
            ExprKind::Unary { op, expr } => {
                let t = self.encode_expr(expr, env, guard, side, partial, depth)?;
                match op {
                    UnaryOp::Not => Ok(Term::not(t)),
                    UnaryOp::Neg => {
                        let raw = Term::unary(TermUnOp::Neg, t);
                        Ok(self.arith_result(raw, e.ty == Type::Int, guard, side))
                    }
                }
            }
            ExprKind::Binary { left, op, right } => {
                self.encode_binary(e, left, *op, right, env, guard, side, partial, depth)
            }
            ExprKind::Call { callee, args } => {
                self.encode_call(e.span, callee, args, env, guard, side, partial, depth)
            }
            ExprKind::Index { base, index } => {
                let base_t = self.encode_expr(base, env, guard, side, partial, depth)?;
                if !matches!(base_t.sort(), Sort::Array(_)) {
                    return Err(UnsupportedConstruct::new(
                        base.span,
                        "indexing a non-array value",
                    ));
                }
                let index_t = self.encode_expr(index, env, guard, side, partial, depth)?;
                // The index must be provable in-range; until it is, the
                // formula is only partial.
                Self::push_side(
                    guard,
                    Term::ge(index_t.clone(), Term::IntConst(0)),
                    side,
                );
                Self::push_side(
                    guard,
                    Term::lt(index_t.clone(), Term::Length(Box::new(base_t.clone()))),
                    side,
                );
                *partial = true;
                Ok(Term::Select {
                    array: Box::new(base_t),
                    index: Box::new(index_t),
                })
            }
            ExprKind::Length(base) => self.encode_length(base, env, guard, side, partial, depth),
        }
    }

    fn encode_length(
        &mut self,
        base: &Expr,
        env: &Env,
        guard: &Term,
        side: &mut Vec<Term>,
        partial: &mut bool,
        depth: usize,
    ) -> Result<Term, UnsupportedConstruct> {
        if base.ty.strip_nullable() == &Type::Str {
            if let ExprKind::Var(name) = &base.kind {
                return Ok(Term::sym(format!("{name}#len"), Sort::Int));
            }
            return Err(UnsupportedConstruct::new(
                base.span,
                "length of a non-variable string expression",
            ));
        }
        let base_t = self.encode_expr(base, env, guard, side, partial, depth)?;
        if !matches!(base_t.sort(), Sort::Array(_)) {
            return Err(UnsupportedConstruct::new(
                base.span,
                "length of a non-array value",
            ));
        }
        Ok(Term::Length(Box::new(base_t)))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_binary(
        &mut self,
        e: &Expr,
        left: &Expr,
        op: BinOp,
        right: &Expr,
        env: &Env,
        guard: &Term,
        side: &mut Vec<Term>,
        partial: &mut bool,
        depth: usize,
    ) -> Result<Term, UnsupportedConstruct> {
        match op {
            BinOp::And => {
                let l = self.encode_expr(left, env, guard, side, partial, depth)?;
                // Short-circuit: obligations arising from the right operand
                // only apply when the left operand holds.
                let right_guard = Term::and(guard.clone(), l.clone());
                let r = self.encode_expr(right, env, &right_guard, side, partial, depth)?;
                Ok(Term::and(l, r))
            }
            BinOp::Or => {
                let l = self.encode_expr(left, env, guard, side, partial, depth)?;
                let right_guard = Term::and(guard.clone(), Term::not(l.clone()));
                let r = self.encode_expr(right, env, &right_guard, side, partial, depth)?;
                Ok(Term::or(l, r))
            }
            _ => {
                let l = self.encode_expr(left, env, guard, side, partial, depth)?;
                let r = self.encode_expr(right, env, guard, side, partial, depth)?;
                if op.is_arithmetic() {
                    if matches!(l.sort(), Sort::Array(_)) || matches!(r.sort(), Sort::Array(_)) {
                        return Err(UnsupportedConstruct::new(
                            e.span,
                            "arithmetic on array values",
                        ));
                    }
                    let term_op = match op {
                        BinOp::Add => TermBinOp::Add,
                        BinOp::Sub => TermBinOp::Sub,
                        BinOp::Mul => TermBinOp::Mul,
                        BinOp::Div => TermBinOp::Div,
                        BinOp::Mod => TermBinOp::Mod,
                        _ => unreachable!("arithmetic op"),
                    };
                    if matches!(op, BinOp::Div | BinOp::Mod) {
                        Self::push_side(
                            guard,
                            Term::not(Term::eq(r.clone(), Term::IntConst(0))),
                            side,
                        );
                    }
                    let raw = Term::binary(term_op, l, r);
                    Ok(self.arith_result(raw, e.ty == Type::Int, guard, side))
                } else {
                    // Comparison.
                    if matches!(l.sort(), Sort::Array(_)) || matches!(r.sort(), Sort::Array(_)) {
                        return Err(UnsupportedConstruct::new(e.span, "array comparison"));
                    }
                    let term_op = match op {
                        BinOp::Eq => TermBinOp::Eq,
                        BinOp::Ne => TermBinOp::Ne,
                        BinOp::Lt => TermBinOp::Lt,
                        BinOp::Le => TermBinOp::Le,
                        BinOp::Gt => TermBinOp::Gt,
                        BinOp::Ge => TermBinOp::Ge,
                        _ => unreachable!("comparison op"),
                    };
                    Ok(Term::binary(term_op, l, r))
                }
            }
        }
    }

    /// Apply the module's integer overflow semantics to a raw arithmetic
    /// result: wrap mode normalizes into 64-bit range, trap mode emits an
    /// in-range obligation and keeps the exact value.
    fn arith_result(&self, raw: Term, is_int: bool, guard: &Term, side: &mut Vec<Term>) -> Term {
        if !is_int {
            return raw;
        }
        match self.mode() {
            IntegerMode::Wrap => wrap64(raw),
            IntegerMode::Trap => {
                Self::push_side(guard, in_i64_range(raw.clone()), side);
                raw
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_call(
        &mut self,
        span: Span,
        callee: &str,
        args: &[Expr],
        env: &Env,
        guard: &Term,
        side: &mut Vec<Term>,
        partial: &mut bool,
        depth: usize,
    ) -> Result<Term, UnsupportedConstruct> {
        if depth >= INLINE_DEPTH_LIMIT {
            return Err(UnsupportedConstruct::new(
                span,
                format!("call to `{callee}` exceeds inlining depth"),
            ));
        }
        let Some(target) = self.module.function(callee) else {
            return Err(UnsupportedConstruct::new(
                span,
                format!("call to `{callee}` with unknown body"),
            ));
        };
        if !target.effects.is_empty() {
            return Err(UnsupportedConstruct::new(
                span,
                format!("call to effectful function `{callee}`"),
            ));
        }
        let [Stmt::Return {
            value: Some(ret), ..
        }] = target.body.as_slice()
        else {
            return Err(UnsupportedConstruct::new(
                span,
                format!("call to `{callee}` whose body is not a single return"),
            ));
        };
        if target.params.len() != args.len() {
            return Err(UnsupportedConstruct::new(
                span,
                format!("arity mismatch calling `{callee}`"),
            ));
        }
        let mut callee_env = Env::new();
        for (p, arg) in target.params.iter().zip(args) {
            let t = self.encode_expr(arg, env, guard, side, partial, depth)?;
            callee_env.insert(p.name.clone(), t);
        }
        self.encode_expr(ret, &callee_env, guard, side, partial, depth + 1)
    }

    // ----- symbolic body execution ------------------------------------------

    /// Build the symbolic model of a function body. Never fails: statements
    /// outside the encodable fragment widen the state they touch.
    pub fn encode_body(&mut self, f: &Function) -> BodyModel {
        self.return_sort = Self::sort_for(&f.return_type).unwrap_or(Sort::Int);
        let mut env = self.param_env(f);
        // Parameters of unencodable types still need stable identities.
        for p in &f.params {
            if !env.contains_key(&p.name) {
                let sym = self.fresh_sym(Sort::Int);
                env.insert(p.name.clone(), sym);
            }
        }
        let state = SymState {
            env,
            cond: Term::BoolConst(true),
        };
        let mut paths = Vec::new();
        let mut widened = false;
        let live = self.exec_stmts(&f.body, vec![state], &mut paths, &mut widened);
        // Falling off the end of the body is a return with no value.
        for s in live {
            paths.push(BodyPath {
                condition: s.cond,
                result: None,
            });
        }
        BodyModel { paths, widened }
    }

    fn exec_stmts(
        &mut self,
        stmts: &[Stmt],
        mut live: Vec<SymState>,
        paths: &mut Vec<BodyPath>,
        widened: &mut bool,
    ) -> Vec<SymState> {
        for stmt in stmts {
            if live.is_empty() {
                break;
            }
            live = self.exec_stmt(stmt, live, paths, widened);
        }
        live
    }

    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        live: Vec<SymState>,
        paths: &mut Vec<BodyPath>,
        widened: &mut bool,
    ) -> Vec<SymState> {
        let mut next = Vec::new();
        for mut state in live {
            match stmt {
                Stmt::Let {
                    name, value, ty, ..
                } => {
                    let term = match value {
                        Some(v) => self.body_expr(v, &state.env, 0),
                        None => None,
                    };
                    let term = term.unwrap_or_else(|| {
                        if value.is_some() {
                            *widened = true;
                        }
                        let sort = Self::sort_for(ty).unwrap_or(Sort::Int);
                        self.fresh_sym(sort)
                    });
                    state.env.insert(name.clone(), term);
                    next.push(state);
                }
                Stmt::Assign { target, value, .. } => {
                    let term = self.body_expr(value, &state.env, 0).unwrap_or_else(|| {
                        *widened = true;
                        let sort = state
                            .env
                            .get(target)
                            .map(Term::sort)
                            .unwrap_or(Sort::Int);
                        self.fresh_sym(sort)
                    });
                    state.env.insert(target.clone(), term);
                    next.push(state);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    ..
                } => {
                    let c = self.body_expr(cond, &state.env, 0).unwrap_or_else(|| {
                        *widened = true;
                        self.fresh_sym(Sort::Bool)
                    });
                    let then_state = SymState {
                        env: state.env.clone(),
                        cond: Term::and(state.cond.clone(), c.clone()),
                    };
                    let else_state = SymState {
                        env: state.env,
                        cond: Term::and(state.cond, Term::not(c)),
                    };
                    next.extend(self.exec_stmts(then_body, vec![then_state], paths, widened));
                    next.extend(self.exec_stmts(else_body, vec![else_state], paths, widened));
                }
                Stmt::While { cond, body, .. } | Stmt::DoWhile { cond, body, .. } => {
                    // Unknown trip count: widen everything the loop assigns,
                    // then keep only the exit condition.
                    self.widen_assigned(body, &mut state);
                    *widened = true;
                    if let Some(c) = self.body_expr(cond, &state.env, 0) {
                        state.cond = Term::and(state.cond, Term::not(c));
                    }
                    next.push(state);
                }
                Stmt::For {
                    var,
                    from,
                    to,
                    body,
                    ..
                } => {
                    if let (ExprKind::IntLit(lo), ExprKind::IntLit(hi)) = (&from.kind, &to.kind) {
                        let trip = hi.saturating_sub(*lo).saturating_add(1);
                        if (0..=LOOP_UNROLL_LIMIT).contains(&trip) {
                            let mut iter_live = vec![state];
                            for i in *lo..=*hi {
                                for s in &mut iter_live {
                                    s.env.insert(var.clone(), Term::IntConst(i as i128));
                                }
                                iter_live = self.exec_stmts(body, iter_live, paths, widened);
                                if iter_live.is_empty() {
                                    break;
                                }
                            }
                            next.extend(iter_live);
                            continue;
                        }
                    }
                    self.widen_assigned(body, &mut state);
                    let sym = self.fresh_sym(Sort::Int);
                    state.env.insert(var.clone(), sym);
                    *widened = true;
                    next.push(state);
                }
                Stmt::Return { value, .. } => {
                    let result = match value {
                        Some(v) => {
                            let term = self.body_expr(v, &state.env, 0);
                            Some(term.unwrap_or_else(|| {
                                *widened = true;
                                let sort = self.return_sort.clone();
                                self.fresh_sym(sort)
                            }))
                        }
                        None => None,
                    };
                    paths.push(BodyPath {
                        condition: state.cond,
                        result,
                    });
                }
                // Exceptional exit: no normal return, no postcondition
                // obligation on this path.
                Stmt::Throw { .. } => {}
                // Pure value discarded; locals cannot be mutated through a
                // call in this language.
                Stmt::Expr(_) => next.push(state),
                Stmt::Opaque { .. } => {
                    let names: Vec<String> = state.env.keys().cloned().collect();
                    for name in names {
                        let sort = state.env[&name].sort();
                        let sym = self.fresh_sym(sort);
                        state.env.insert(name, sym);
                    }
                    *widened = true;
                    next.push(state);
                }
            }
        }
        next
    }

    fn widen_assigned(&mut self, body: &[Stmt], state: &mut SymState) {
        for name in assigned_vars(body) {
            let sort = state
                .env
                .get(&name)
                .map(Term::sort)
                .unwrap_or(Sort::Int);
            let sym = self.fresh_sym(sort);
            state.env.insert(name, sym);
        }
    }

    /// Body-side expression encoding. Returns `None` for anything outside the
    /// side-effect-free fragment; the caller widens.
    fn body_expr(&mut self, e: &Expr, env: &Env, depth: usize) -> Option<Term> {
        match &e.kind {
            ExprKind::IntLit(v) => Some(Term::IntConst(*v as i128)),
            ExprKind::RealLit(v) => Some(Term::RealConst(*v)),
            ExprKind::BoolLit(v) => Some(Term::BoolConst(*v)),
            ExprKind::StrLit(_) | ExprKind::NullLit => None,
            ExprKind::Var(name) => env.get(name).cloned(),
            ExprKind::Unary { op, expr } => {
                let t = self.body_expr(expr, env, depth)?;
                match op {
                    UnaryOp::Not => Some(Term::not(t)),
                    UnaryOp::Neg => {
                        let raw = Term::unary(TermUnOp::Neg, t);
                        Some(self.body_arith(raw, e.ty == Type::Int))
                    }
                }
            }
            ExprKind::Binary { left, op, right } => {
                let l = self.body_expr(left, env, depth)?;
                let r = self.body_expr(right, env, depth)?;
                let term_op = match op {
                    BinOp::Add => TermBinOp::Add,
                    BinOp::Sub => TermBinOp::Sub,
                    BinOp::Mul => TermBinOp::Mul,
                    BinOp::Div => TermBinOp::Div,
                    BinOp::Mod => TermBinOp::Mod,
                    BinOp::Eq => TermBinOp::Eq,
                    BinOp::Ne => TermBinOp::Ne,
                    BinOp::Lt => TermBinOp::Lt,
                    BinOp::Le => TermBinOp::Le,
                    BinOp::Gt => TermBinOp::Gt,
                    BinOp::Ge => TermBinOp::Ge,
                    BinOp::And => TermBinOp::And,
                    BinOp::Or => TermBinOp::Or,
                };
                let raw = Term::binary(term_op, l, r);
                if op.is_arithmetic() {
                    Some(self.body_arith(raw, e.ty == Type::Int))
                } else {
                    Some(raw)
                }
            }
            ExprKind::Call { callee, args } => {
                if depth >= INLINE_DEPTH_LIMIT {
                    return None;
                }
                let target = self.module.function(callee)?;
                if !target.effects.is_empty() || target.params.len() != args.len() {
                    return None;
                }
                let [Stmt::Return {
                    value: Some(ret), ..
                }] = target.body.as_slice()
                else {
                    return None;
                };
                let mut callee_env = Env::new();
                for (p, arg) in target.params.iter().zip(args) {
                    callee_env.insert(p.name.clone(), self.body_expr(arg, env, depth)?);
                }
                self.body_expr(ret, &callee_env, depth + 1)
            }
            ExprKind::Index { base, index } => {
                let base_t = self.body_expr(base, env, depth)?;
                if !matches!(base_t.sort(), Sort::Array(_)) {
                    return None;
                }
                let index_t = self.body_expr(index, env, depth)?;
                Some(Term::Select {
                    array: Box::new(base_t),
                    index: Box::new(index_t),
                })
            }
            ExprKind::Length(base) => {
                if base.ty.strip_nullable() == &Type::Str {
                    if let ExprKind::Var(name) = &base.kind {
                        return Some(Term::sym(format!("{name}#len"), Sort::Int));
                    }
                    return None;
                }
                let base_t = self.body_expr(base, env, depth)?;
                matches!(base_t.sort(), Sort::Array(_))
                    .then(|| Term::Length(Box::new(base_t)))
            }
        }
    }

    fn body_arith(&self, raw: Term, is_int: bool) -> Term {
        if is_int && self.mode() == IntegerMode::Wrap {
            wrap64(raw)
        } else {
            // Trap mode executions that reach a normal return carry exact
            // values; overflow aborts are covered by the bug-pattern pass.
            raw
        }
    }
}

#[derive(Clone, Debug)]
struct SymState {
    env: Env,
    cond: Term,
}

/// Names assigned anywhere in a statement list, including nested constructs.
pub fn assigned_vars(stmts: &[Stmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_assigned(stmts, &mut out);
    out
}

fn collect_assigned(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Let { name, .. } => {
                out.insert(name.clone());
            }
            Stmt::Assign { target, .. } => {
                out.insert(target.clone());
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_assigned(then_body, out);
                collect_assigned(else_body, out);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_assigned(body, out),
            Stmt::For { var, body, .. } => {
                out.insert(var.clone());
                collect_assigned(body, out);
            }
            Stmt::Return { .. } | Stmt::Throw { .. } | Stmt::Expr(_) | Stmt::Opaque { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, FunctionId, Param};

    fn sp() -> Span {
        span(0, 1)
    }

    fn module(mode: IntegerMode) -> Module {
        Module::new("t", mode)
    }

    fn func(params: Vec<Param>, return_type: Type, body: Vec<Stmt>) -> Function {
        Function {
            id: FunctionId(0),
            name: "f".to_string(),
            params,
            return_type,
            preconditions: vec![],
            postconditions: vec![],
            effects: vec![],
            body,
            span: sp(),
        }
    }

    #[test]
    fn test_tautology_encodes_total() {
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let f = func(vec![], Type::Int, vec![]);
        let post = Expr::binary(
            sp(),
            Expr::var(sp(), RESULT_NAME, Type::Int),
            BinOp::Eq,
            Expr::var(sp(), RESULT_NAME, Type::Int),
        );
        let formula = enc.encode_contract(&f, &post, true).unwrap();
        assert!(!formula.partial);
        assert!(formula.side_conditions.is_empty());
        assert_eq!(
            formula.root,
            Term::eq(
                Term::sym(RESULT_NAME, Sort::Int),
                Term::sym(RESULT_NAME, Sort::Int)
            )
        );
    }

    #[test]
    fn test_unknown_call_is_unsupported() {
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Int, vec![]);
        let pre = Expr::binary(
            sp(),
            Expr::call(sp(), "mystery", vec![Expr::var(sp(), "x", Type::Int)], Type::Int),
            BinOp::Gt,
            Expr::int(sp(), 0),
        );
        let err = enc.encode_contract(&f, &pre, false).unwrap_err();
        assert!(err.reason.contains("mystery"));
    }

    #[test]
    fn test_sibling_contract_unaffected_by_env() {
        // An unsupported encoding must not poison a later encode call on the
        // same encoder.
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Int, vec![]);
        let bad = Expr::new(sp(), Type::Bool, ExprKind::NullLit);
        assert!(enc.encode_contract(&f, &bad, false).is_err());
        let good = Expr::binary(
            sp(),
            Expr::var(sp(), "x", Type::Int),
            BinOp::Ge,
            Expr::int(sp(), 0),
        );
        assert!(enc.encode_contract(&f, &good, false).is_ok());
    }

    #[test]
    fn test_short_circuit_guards_side_conditions() {
        // i >= 0 && xs[i] > 0 — the bounds obligation on xs[i] must be
        // guarded by i >= 0.
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let f = func(
            vec![
                Param::new(sp(), "i", Type::Int),
                Param::new(sp(), "xs", Type::array(Type::Int)),
            ],
            Type::Bool,
            vec![],
        );
        let lhs = Expr::binary(
            sp(),
            Expr::var(sp(), "i", Type::Int),
            BinOp::Ge,
            Expr::int(sp(), 0),
        );
        let rhs = Expr::binary(
            sp(),
            Expr::index(
                sp(),
                Expr::var(sp(), "xs", Type::array(Type::Int)),
                Expr::var(sp(), "i", Type::Int),
            ),
            BinOp::Gt,
            Expr::int(sp(), 0),
        );
        let contract = Expr::binary(sp(), lhs, BinOp::And, rhs);
        let formula = enc.encode_contract(&f, &contract, false).unwrap();
        assert!(formula.partial);
        assert!(!formula.side_conditions.is_empty());
        for sc in &formula.side_conditions {
            assert!(
                matches!(sc, Term::Binary { op: TermBinOp::Implies, .. }),
                "side condition not guarded: {sc:?}"
            );
        }
    }

    #[test]
    fn test_wrap_mode_normalizes_arithmetic() {
        let m = module(IntegerMode::Wrap);
        let mut enc = Encoder::new(&m);
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Bool, vec![]);
        let contract = Expr::binary(
            sp(),
            Expr::binary(
                sp(),
                Expr::var(sp(), "x", Type::Int),
                BinOp::Add,
                Expr::int(sp(), 1),
            ),
            BinOp::Gt,
            Expr::var(sp(), "x", Type::Int),
        );
        let formula = enc.encode_contract(&f, &contract, false).unwrap();
        // No trap obligations in wrap mode; the sum is mod-reduced instead.
        assert!(formula.side_conditions.is_empty());
        let rendered = format!("{:?}", formula.root);
        assert!(rendered.contains("Mod"));
    }

    #[test]
    fn test_trap_mode_emits_range_obligation() {
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Bool, vec![]);
        let contract = Expr::binary(
            sp(),
            Expr::binary(
                sp(),
                Expr::var(sp(), "x", Type::Int),
                BinOp::Mul,
                Expr::int(sp(), 2),
            ),
            BinOp::Ge,
            Expr::int(sp(), 0),
        );
        let formula = enc.encode_contract(&f, &contract, false).unwrap();
        assert_eq!(formula.side_conditions.len(), 1);
    }

    #[test]
    fn test_body_if_else_two_paths() {
        // if n < 0 { return -n } else { return n }
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let body = vec![Stmt::If {
            span: sp(),
            cond: Expr::binary(
                sp(),
                Expr::var(sp(), "n", Type::Int),
                BinOp::Lt,
                Expr::int(sp(), 0),
            ),
            then_body: vec![Stmt::Return {
                span: sp(),
                value: Some(Expr::unary(sp(), UnaryOp::Neg, Expr::var(sp(), "n", Type::Int))),
            }],
            else_body: vec![Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "n", Type::Int)),
            }],
        }];
        let f = func(vec![Param::new(sp(), "n", Type::Int)], Type::Int, body);
        let model = enc.encode_body(&f);
        assert!(!model.widened);
        assert_eq!(model.paths.len(), 2);
        assert!(model.paths.iter().all(|p| p.result.is_some()));
    }

    #[test]
    fn test_unbounded_loop_widens() {
        // while x > 0 { x = x - 1 } return x
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let body = vec![
            Stmt::While {
                span: sp(),
                cond: Expr::binary(
                    sp(),
                    Expr::var(sp(), "x", Type::Int),
                    BinOp::Gt,
                    Expr::int(sp(), 0),
                ),
                body: vec![Stmt::Assign {
                    span: sp(),
                    target: "x".to_string(),
                    value: Expr::binary(
                        sp(),
                        Expr::var(sp(), "x", Type::Int),
                        BinOp::Sub,
                        Expr::int(sp(), 1),
                    ),
                }],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            },
        ];
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Int, body);
        let model = enc.encode_body(&f);
        assert!(model.widened);
        assert_eq!(model.paths.len(), 1);
    }

    #[test]
    fn test_constant_for_loop_unrolls() {
        // let s = 0; for i = 1..3 { s = s + i } return s
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "s".to_string(),
                ty: Type::Int,
                value: Some(Expr::int(sp(), 0)),
            },
            Stmt::For {
                span: sp(),
                var: "i".to_string(),
                from: Expr::int(sp(), 1),
                to: Expr::int(sp(), 3),
                body: vec![Stmt::Assign {
                    span: sp(),
                    target: "s".to_string(),
                    value: Expr::binary(
                        sp(),
                        Expr::var(sp(), "s", Type::Int),
                        BinOp::Add,
                        Expr::var(sp(), "i", Type::Int),
                    ),
                }],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "s", Type::Int)),
            },
        ];
        let f = func(vec![], Type::Int, body);
        let model = enc.encode_body(&f);
        assert!(!model.widened);
        assert_eq!(model.paths.len(), 1);
    }

    #[test]
    fn test_throw_paths_carry_no_obligation() {
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let body = vec![Stmt::Throw {
            span: sp(),
            value: Expr::int(sp(), 1),
        }];
        let f = func(vec![], Type::Int, body);
        let model = enc.encode_body(&f);
        assert!(model.paths.is_empty());
    }

    #[test]
    fn test_opaque_statement_widens_everything() {
        let m = module(IntegerMode::Trap);
        let mut enc = Encoder::new(&m);
        let body = vec![
            Stmt::Opaque { span: sp() },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            },
        ];
        let f = func(vec![Param::new(sp(), "x", Type::Int)], Type::Int, body);
        let model = enc.encode_body(&f);
        assert!(model.widened);
    }

    #[test]
    fn test_assigned_vars_nested() {
        let body = vec![Stmt::If {
            span: sp(),
            cond: Expr::boolean(sp(), true),
            then_body: vec![Stmt::Assign {
                span: sp(),
                target: "a".to_string(),
                value: Expr::int(sp(), 1),
            }],
            else_body: vec![Stmt::For {
                span: sp(),
                var: "i".to_string(),
                from: Expr::int(sp(), 0),
                to: Expr::int(sp(), 1),
                body: vec![],
            }],
        }];
        let vars = assigned_vars(&body);
        assert!(vars.contains("a"));
        assert!(vars.contains("i"));
    }
}
