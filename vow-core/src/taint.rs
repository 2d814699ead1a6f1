#![forbid(unsafe_code)]

//! Taint analysis: source-to-sink flow detection.
//!
//! Two-point lattice per variable. Sources are parameters declared as
//! externally supplied and calls to callables with a source-classified
//! effect. Sinks are calls whose declared effect set contains a
//! sink-classified effect. A registered sanitizer call clears taint.
//! Assignment and operator results are tainted when any operand is; a sink
//! receiving a tainted, unsanitized argument reports exactly once per
//! (sink call site, originating source) pair, however many paths reach it.

use std::collections::{HashMap, HashSet};

use vow_ast::{Expr, ExprKind, Function, Module, Span, Stmt};

use crate::cfg::{BlockId, ControlFlowGraph};
use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::error::AnalysisError;
use crate::registry::AnalyzerRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Taint {
    Untainted,
    /// Tainted, carrying the span of the originating source.
    Tainted(Span),
}

impl Taint {
    /// Path-join: taint wins; between two taints the earlier source is kept
    /// so reports are deterministic.
    pub fn join(self, other: Taint) -> Taint {
        match (self, other) {
            (Taint::Untainted, t) | (t, Taint::Untainted) => t,
            (Taint::Tainted(a), Taint::Tainted(b)) => {
                if b.offset() < a.offset() {
                    Taint::Tainted(b)
                } else {
                    Taint::Tainted(a)
                }
            }
        }
    }
}

type Env = HashMap<String, Taint>;

pub fn analyze(
    cfg: &ControlFlowGraph<'_>,
    f: &Function,
    module: &Module,
    registry: &AnalyzerRegistry,
) -> Result<Vec<Diagnostic>, AnalysisError> {
    let mut seed = Env::new();
    for p in &f.params {
        let taint = if p.from_external {
            Taint::Tainted(p.span)
        } else {
            Taint::Untainted
        };
        seed.insert(p.name.clone(), taint);
    }

    // Forward fixed point, the same shape as the dataflow pass; loops carry
    // taint around back edges until stable.
    let mut exit_env: HashMap<BlockId, Env> = HashMap::new();
    loop {
        let mut changed = false;
        for block in cfg.blocks.iter().filter(|b| b.reachable) {
            let entry = block_entry(cfg, block.id, &seed, &exit_env);
            let mut env = entry;
            for stmt in &block.stmts {
                apply_stmt(stmt, &mut env, module, registry);
            }
            if exit_env.get(&block.id) != Some(&env) {
                exit_env.insert(block.id, env);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Reporting pass with the converged facts.
    let mut reported: HashSet<(usize, usize)> = HashSet::new();
    let mut diagnostics = Vec::new();
    for block in cfg.blocks.iter().filter(|b| b.reachable) {
        let mut env = block_entry(cfg, block.id, &seed, &exit_env);
        if let Some(bounds) = &block.loop_bounds {
            check_sinks(bounds.from, &env, module, registry, &mut reported, &mut diagnostics);
            check_sinks(bounds.to, &env, module, registry, &mut reported, &mut diagnostics);
        }
        for stmt in &block.stmts {
            for expr in stmt_exprs(stmt) {
                check_sinks(expr, &env, module, registry, &mut reported, &mut diagnostics);
            }
            apply_stmt(stmt, &mut env, module, registry);
        }
        if let Some(guard) = block.guard {
            check_sinks(guard, &env, module, registry, &mut reported, &mut diagnostics);
        }
    }
    Ok(diagnostics)
}

fn block_entry(
    cfg: &ControlFlowGraph<'_>,
    id: BlockId,
    seed: &Env,
    exit_env: &HashMap<BlockId, Env>,
) -> Env {
    if id == cfg.entry {
        return seed.clone();
    }
    let mut merged: Option<Env> = None;
    for edge in cfg.predecessors(id) {
        if !cfg.block(edge.from).reachable {
            continue;
        }
        let Some(pred_exit) = exit_env.get(&edge.from) else {
            continue;
        };
        merged = Some(match merged {
            None => pred_exit.clone(),
            Some(acc) => join_env(&acc, pred_exit),
        });
    }
    merged.unwrap_or_else(|| seed.clone())
}

fn join_env(a: &Env, b: &Env) -> Env {
    let mut out = a.clone();
    for (name, &taint) in b {
        let merged = out
            .get(name)
            .copied()
            .unwrap_or(Taint::Untainted)
            .join(taint);
        out.insert(name.clone(), merged);
    }
    out
}

fn apply_stmt(stmt: &Stmt, env: &mut Env, module: &Module, registry: &AnalyzerRegistry) {
    match stmt {
        Stmt::Let { name, value, .. } => {
            let taint = value
                .as_ref()
                .map(|v| expr_taint(v, env, module, registry))
                .unwrap_or(Taint::Untainted);
            env.insert(name.clone(), taint);
        }
        Stmt::Assign { target, value, .. } => {
            let taint = expr_taint(value, env, module, registry);
            env.insert(target.clone(), taint);
        }
        Stmt::Opaque { .. } => {
            // Unknown provenance: there is no originating source span to
            // report, so nothing written here can be accused at a sink.
            for taint in env.values_mut() {
                *taint = Taint::Untainted;
            }
        }
        _ => {}
    }
}

fn expr_taint(e: &Expr, env: &Env, module: &Module, registry: &AnalyzerRegistry) -> Taint {
    match &e.kind {
        ExprKind::IntLit(_)
        | ExprKind::RealLit(_)
        | ExprKind::BoolLit(_)
        | ExprKind::StrLit(_)
        | ExprKind::NullLit => Taint::Untainted,
        ExprKind::Var(name) => env.get(name).copied().unwrap_or(Taint::Untainted),
        ExprKind::Unary { expr, .. } => expr_taint(expr, env, module, registry),
        ExprKind::Binary { left, right, .. } => expr_taint(left, env, module, registry)
            .join(expr_taint(right, env, module, registry)),
        ExprKind::Call { callee, args } => {
            if registry.is_sanitizer(module, callee) {
                return Taint::Untainted;
            }
            if registry.is_source(module, callee) {
                return Taint::Tainted(e.span);
            }
            args.iter()
                .map(|a| expr_taint(a, env, module, registry))
                .fold(Taint::Untainted, Taint::join)
        }
        ExprKind::Index { base, index } => expr_taint(base, env, module, registry)
            .join(expr_taint(index, env, module, registry)),
        ExprKind::Length(base) => expr_taint(base, env, module, registry),
    }
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

fn check_sinks(
    e: &Expr,
    env: &Env,
    module: &Module,
    registry: &AnalyzerRegistry,
    reported: &mut HashSet<(usize, usize)>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    e.walk(&mut |node| {
        let ExprKind::Call { callee, args } = &node.kind else {
            return;
        };
        if !registry.is_sink(module, callee) {
            return;
        }
        for arg in args {
            if let Taint::Tainted(source) = expr_taint(arg, env, module, registry) {
                if reported.insert((node.span.offset(), source.offset())) {
                    diagnostics.push(Diagnostic::error(
                        "tainted-sink",
                        DiagnosticCategory::Security,
                        node.span,
                        format!(
                            "tainted value from untrusted input reaches sink `{callee}` without sanitization"
                        ),
                    ));
                }
            }
        }
    });
}
