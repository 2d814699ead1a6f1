#![forbid(unsafe_code)]

//! Definite-assignment and dead-code analysis.
//!
//! Classic forward fixed-point over the CFG. A variable is `Initialized` at
//! block entry only when it is initialized on every incoming path; mixed
//! paths meet to `MaybeInitialized`. Reads of a not-`Initialized` variable
//! report once per variable per function, at the first offending read.
//! Non-empty blocks the reachability sweep flagged report one dead-code
//! diagnostic each, at their first statement.

use std::collections::{BTreeSet, HashMap};

use vow_ast::{Function, Stmt};

use crate::cfg::{BlockId, ControlFlowGraph};
use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::error::AnalysisError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    MaybeInitialized,
    Initialized,
}

impl InitState {
    /// Path-merge: agreement keeps the state, disagreement is `Maybe`.
    pub fn meet(self, other: InitState) -> InitState {
        if self == other {
            self
        } else {
            InitState::MaybeInitialized
        }
    }
}

type Facts = HashMap<String, InitState>;

pub fn analyze(
    cfg: &ControlFlowGraph<'_>,
    f: &Function,
) -> Result<Vec<Diagnostic>, AnalysisError> {
    let tracked = tracked_variables(f);
    let base = base_facts(f, &tracked);

    // Fixed point: entry facts start optimistic and only move down the
    // lattice, so loops converge.
    let mut exit_facts: HashMap<BlockId, Facts> = HashMap::new();
    loop {
        let mut changed = false;
        for block in cfg.blocks.iter().filter(|b| b.reachable) {
            let entry = if block.id == cfg.entry {
                base.clone()
            } else {
                let mut merged: Option<Facts> = None;
                for edge in cfg.predecessors(block.id) {
                    if !cfg.block(edge.from).reachable {
                        continue;
                    }
                    let Some(pred_exit) = exit_facts.get(&edge.from) else {
                        continue;
                    };
                    merged = Some(match merged {
                        None => pred_exit.clone(),
                        Some(acc) => meet_facts(&acc, pred_exit),
                    });
                }
                merged.unwrap_or_else(|| base.clone())
            };
            let exit = transfer(cfg, block.id, entry, &tracked);
            if exit_facts.get(&block.id) != Some(&exit) {
                exit_facts.insert(block.id, exit);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut diagnostics = Vec::new();
    report_reads(cfg, &base, &exit_facts, &tracked, &mut diagnostics);
    report_dead_code(cfg, &mut diagnostics);
    Ok(diagnostics)
}

fn tracked_variables(f: &Function) -> BTreeSet<String> {
    let mut vars: BTreeSet<String> = f.params.iter().map(|p| p.name.clone()).collect();
    collect_locals(&f.body, &mut vars);
    vars
}

fn collect_locals(stmts: &[Stmt], out: &mut BTreeSet<String>) {
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
                collect_locals(then_body, out);
                collect_locals(else_body, out);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_locals(body, out),
            Stmt::For { var, body, .. } => {
                out.insert(var.clone());
                collect_locals(body, out);
            }
            Stmt::Return { .. } | Stmt::Throw { .. } | Stmt::Expr(_) | Stmt::Opaque { .. } => {}
        }
    }
}

fn base_facts(f: &Function, tracked: &BTreeSet<String>) -> Facts {
    let params: BTreeSet<&str> = f.params.iter().map(|p| p.name.as_str()).collect();
    tracked
        .iter()
        .map(|name| {
            let state = if params.contains(name.as_str()) {
                InitState::Initialized
            } else {
                InitState::Uninitialized
            };
            (name.clone(), state)
        })
        .collect()
}

fn meet_facts(a: &Facts, b: &Facts) -> Facts {
    a.iter()
        .map(|(name, &state)| {
            let merged = match b.get(name) {
                Some(&other) => state.meet(other),
                None => state,
            };
            (name.clone(), merged)
        })
        .collect()
}

fn transfer(
    cfg: &ControlFlowGraph<'_>,
    id: BlockId,
    mut facts: Facts,
    tracked: &BTreeSet<String>,
) -> Facts {
    let block = cfg.block(id);
    if let Some(bounds) = &block.loop_bounds {
        // The loop variable is assigned by the header on every entry.
        facts.insert(bounds.var.to_string(), InitState::Initialized);
    }
    for stmt in &block.stmts {
        apply_stmt(stmt, &mut facts, tracked);
    }
    facts
}

fn apply_stmt(stmt: &Stmt, facts: &mut Facts, tracked: &BTreeSet<String>) {
    match stmt {
        Stmt::Let { name, value, .. } => {
            let state = if value.is_some() {
                InitState::Initialized
            } else {
                InitState::Uninitialized
            };
            facts.insert(name.clone(), state);
        }
        Stmt::Assign { target, .. } => {
            facts.insert(target.clone(), InitState::Initialized);
        }
        Stmt::Opaque { .. } => {
            // May write anything: treat every variable as initialized so
            // later reads are not falsely reported.
            for name in tracked {
                facts.insert(name.clone(), InitState::Initialized);
            }
        }
        Stmt::Return { .. } | Stmt::Throw { .. } | Stmt::Expr(_) => {}
        // Branching statements never appear inside blocks.
        _ => {}
    }
}

/// Reads a statement performs, in evaluation order, before its own write
/// takes effect.
fn stmt_reads<'f>(stmt: &'f Stmt) -> Vec<(&'f str, vow_ast::Span)> {
    match stmt {
        Stmt::Let {
            value: Some(v), ..
        } => v.variable_reads(),
        Stmt::Let { value: None, .. } => Vec::new(),
        Stmt::Assign { value, .. } => value.variable_reads(),
        Stmt::Return { value: Some(v), .. } => v.variable_reads(),
        Stmt::Return { value: None, .. } => Vec::new(),
        Stmt::Throw { value, .. } => value.variable_reads(),
        Stmt::Expr(e) => e.variable_reads(),
        _ => Vec::new(),
    }
}

fn report_reads(
    cfg: &ControlFlowGraph<'_>,
    base: &Facts,
    exit_facts: &HashMap<BlockId, Facts>,
    tracked: &BTreeSet<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut reported: BTreeSet<String> = BTreeSet::new();
    for block in cfg.blocks.iter().filter(|b| b.reachable) {
        let mut facts = if block.id == cfg.entry {
            base.clone()
        } else {
            let mut merged: Option<Facts> = None;
            for edge in cfg.predecessors(block.id) {
                if !cfg.block(edge.from).reachable {
                    continue;
                }
                if let Some(pred_exit) = exit_facts.get(&edge.from) {
                    merged = Some(match merged {
                        None => pred_exit.clone(),
                        Some(acc) => meet_facts(&acc, pred_exit),
                    });
                }
            }
            merged.unwrap_or_else(|| base.clone())
        };

        let mut check = |expr_reads: Vec<(&str, vow_ast::Span)>,
                         facts: &Facts,
                         reported: &mut BTreeSet<String>,
                         diagnostics: &mut Vec<Diagnostic>| {
            for (name, span) in expr_reads {
                if !tracked.contains(name) || reported.contains(name) {
                    continue;
                }
                match facts.get(name) {
                    Some(InitState::Uninitialized) => {
                        reported.insert(name.to_string());
                        diagnostics.push(Diagnostic::error(
                            "uninitialized-read",
                            DiagnosticCategory::Dataflow,
                            span,
                            format!("variable `{name}` is read before it is initialized"),
                        ));
                    }
                    Some(InitState::MaybeInitialized) => {
                        reported.insert(name.to_string());
                        diagnostics.push(Diagnostic::warning(
                            "maybe-uninitialized-read",
                            DiagnosticCategory::Dataflow,
                            span,
                            format!("variable `{name}` may be uninitialized on some paths"),
                        ));
                    }
                    _ => {}
                }
            }
        };

        if let Some(bounds) = &block.loop_bounds {
            check(bounds.from.variable_reads(), &facts, &mut reported, diagnostics);
            check(bounds.to.variable_reads(), &facts, &mut reported, diagnostics);
            facts.insert(bounds.var.to_string(), InitState::Initialized);
        }
        for stmt in &block.stmts {
            check(stmt_reads(stmt), &facts, &mut reported, diagnostics);
            apply_stmt(stmt, &mut facts, tracked);
        }
        if let Some(guard) = block.guard {
            check(guard.variable_reads(), &facts, &mut reported, diagnostics);
        }
    }
}

fn report_dead_code(cfg: &ControlFlowGraph<'_>, diagnostics: &mut Vec<Diagnostic>) {
    for block in cfg.unreachable_blocks() {
        if block.is_empty() {
            continue;
        }
        if let Some(span) = block.first_span() {
            diagnostics.push(Diagnostic::warning(
                "dead-code",
                DiagnosticCategory::Dataflow,
                span,
                "unreachable code is never executed",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, BinOp, Expr, FunctionId, Param, Span, Type};

    fn sp() -> Span {
        span(0, 1)
    }

    fn sp_at(offset: usize) -> Span {
        span(offset, 1)
    }

    fn func(params: Vec<Param>, body: Vec<Stmt>) -> Function {
        Function {
            id: FunctionId(0),
            name: "f".to_string(),
            params,
            return_type: Type::Int,
            preconditions: vec![],
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

    #[test]
    fn test_read_before_write_reports_once() {
        // let x: int; return x + x; — two reads, one diagnostic.
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "x".to_string(),
                ty: Type::Int,
                value: None,
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::binary(
                    sp_at(10),
                    Expr::var(sp_at(10), "x", Type::Int),
                    BinOp::Add,
                    Expr::var(sp_at(14), "x", Type::Int),
                )),
            },
        ];
        let f = func(vec![], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "uninitialized-read");
        assert_eq!(diags[0].span, sp_at(10));
    }

    #[test]
    fn test_param_reads_are_fine() {
        let body = vec![Stmt::Return {
            span: sp(),
            value: Some(Expr::var(sp(), "n", Type::Int)),
        }];
        let f = func(vec![Param::new(sp(), "n", Type::Int)], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_branch_initialized_one_side_is_maybe() {
        // let x: int; if c { x = 1 } return x
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "x".to_string(),
                ty: Type::Int,
                value: None,
            },
            Stmt::If {
                span: sp(),
                cond: Expr::var(sp(), "c", Type::Bool),
                then_body: vec![Stmt::Assign {
                    span: sp(),
                    target: "x".to_string(),
                    value: Expr::int(sp(), 1),
                }],
                else_body: vec![],
            },
            Stmt::Return {
                span: sp_at(20),
                value: Some(Expr::var(sp_at(20), "x", Type::Int)),
            },
        ];
        let f = func(vec![Param::new(sp(), "c", Type::Bool)], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "maybe-uninitialized-read");
    }

    #[test]
    fn test_initialized_on_both_branches_is_clean() {
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "x".to_string(),
                ty: Type::Int,
                value: None,
            },
            Stmt::If {
                span: sp(),
                cond: Expr::var(sp(), "c", Type::Bool),
                then_body: vec![Stmt::Assign {
                    span: sp(),
                    target: "x".to_string(),
                    value: Expr::int(sp(), 1),
                }],
                else_body: vec![Stmt::Assign {
                    span: sp(),
                    target: "x".to_string(),
                    value: Expr::int(sp(), 2),
                }],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            },
        ];
        let f = func(vec![Param::new(sp(), "c", Type::Bool)], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_loop_body_assignment_is_maybe_after_loop() {
        // let x: int; while c { x = 1 } return x — the loop may not run.
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "x".to_string(),
                ty: Type::Int,
                value: None,
            },
            Stmt::While {
                span: sp(),
                cond: Expr::var(sp(), "c", Type::Bool),
                body: vec![Stmt::Assign {
                    span: sp(),
                    target: "x".to_string(),
                    value: Expr::int(sp(), 1),
                }],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            },
        ];
        let f = func(vec![Param::new(sp(), "c", Type::Bool)], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "maybe-uninitialized-read");
    }

    #[test]
    fn test_dead_code_after_return() {
        let body = vec![
            Stmt::Return {
                span: sp(),
                value: Some(Expr::int(sp(), 1)),
            },
            Stmt::Assign {
                span: sp_at(30),
                target: "x".to_string(),
                value: Expr::int(sp_at(30), 2),
            },
        ];
        let f = func(vec![], body);
        let diags = run(&f);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "dead-code");
        assert_eq!(diags[0].span, sp_at(30));
    }

    #[test]
    fn test_opaque_statement_suppresses_later_reads() {
        let body = vec![
            Stmt::Let {
                span: sp(),
                name: "x".to_string(),
                ty: Type::Int,
                value: None,
            },
            Stmt::Opaque { span: sp() },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            },
        ];
        let f = func(vec![], body);
        assert!(run(&f).is_empty());
    }

    #[test]
    fn test_for_loop_var_initialized_in_body() {
        let body = vec![
            Stmt::For {
                span: sp(),
                var: "i".to_string(),
                from: Expr::int(sp(), 0),
                to: Expr::int(sp(), 3),
                body: vec![Stmt::Expr(Expr::var(sp(), "i", Type::Int))],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::int(sp(), 0)),
            },
        ];
        let f = func(vec![], body);
        assert!(run(&f).is_empty());
    }
}
