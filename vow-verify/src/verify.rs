#![forbid(unsafe_code)]

//! Solver orchestration.
//!
//! For each contract the orchestrator asks: does an assignment exist that
//! satisfies the function's preconditions (always asserted as axioms, even
//! when the target is a precondition itself) and falsifies the target
//! formula? The question is posed by negation-and-check under a bounded
//! timeout. UNSAT means the contract is proven; SAT yields a counterexample
//! unless the body model was widened, in which case the refuting model is not
//! trustworthy and the contract stays unproven.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use vow_ast::{Function, FunctionId, Module, Span, RESULT_NAME};

use crate::counterexample::Counterexample;
use crate::encode::{BodyModel, Encoder};
use crate::formula::{ContractFormula, Sort, Term};
use crate::solver::{CheckOutcome, ProofQuery, SolverBackend};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    Precondition,
    Postcondition,
}

impl ContractKind {
    pub fn label(self) -> &'static str {
        match self {
            ContractKind::Precondition => "precondition",
            ContractKind::Postcondition => "postcondition",
        }
    }
}

/// Outcome of verifying one contract.
///
/// `Proven` is only ever produced from a definitive UNSAT answer on the
/// negated contract under the function's axioms; every degraded path
/// (timeout, unknown, missing solver, widened refutation) lands in
/// `Unproven` or `Unsupported`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Proven,
    Disproven(Counterexample),
    Unproven,
    Unsupported(String),
    /// Verification never ran (run deadline expired before this function).
    Skipped,
}

impl VerificationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            VerificationOutcome::Proven => "PROVEN",
            VerificationOutcome::Disproven(_) => "DISPROVEN",
            VerificationOutcome::Unproven => "UNPROVEN",
            VerificationOutcome::Unsupported(_) => "UNSUPPORTED",
            VerificationOutcome::Skipped => "SKIPPED",
        }
    }
}

/// Outcome of one contract, tied back to its position on the function.
#[derive(Clone, Debug, PartialEq)]
pub struct ContractOutcome {
    pub kind: ContractKind,
    pub index: usize,
    pub span: Span,
    pub outcome: VerificationOutcome,
}

/// All contract outcomes for one function.
///
/// Invariant: `outcomes.len()` equals the function's declared contract count.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionVerificationResult {
    pub function: FunctionId,
    pub name: String,
    pub outcomes: Vec<ContractOutcome>,
    pub time_ms: u64,
    pub from_cache: bool,
}

impl FunctionVerificationResult {
    pub fn skipped(f: &Function) -> Self {
        let outcomes = contract_spans(f)
            .map(|(kind, index, span)| ContractOutcome {
                kind,
                index,
                span,
                outcome: VerificationOutcome::Skipped,
            })
            .collect();
        Self {
            function: f.id,
            name: f.name.clone(),
            outcomes,
            time_ms: 0,
            from_cache: false,
        }
    }
}

/// `(kind, index, span)` for every contract on `f`, preconditions first.
pub fn contract_spans(f: &Function) -> impl Iterator<Item = (ContractKind, usize, Span)> + '_ {
    f.preconditions
        .iter()
        .enumerate()
        .map(|(i, e)| (ContractKind::Precondition, i, e.span))
        .chain(
            f.postconditions
                .iter()
                .enumerate()
                .map(|(i, e)| (ContractKind::Postcondition, i, e.span)),
        )
}

/// Verify every contract on one function against one solver session.
///
/// The backend is owned by the caller and must be fresh for this function;
/// it is not reused afterwards.
pub fn verify_function<B: SolverBackend>(
    module: &Module,
    f: &Function,
    backend: &mut B,
    timeout_ms: u64,
) -> FunctionVerificationResult {
    let start = Instant::now();
    let mut encoder = Encoder::new(module);

    let pre_formulas: Vec<_> = f
        .preconditions
        .iter()
        .map(|p| encoder.encode_contract(f, p, false))
        .collect();

    // Encodable preconditions are axioms for every check on this function.
    let pre_axioms: Vec<Term> = pre_formulas
        .iter()
        .filter_map(|r| r.as_ref().ok().map(ContractFormula::obligations))
        .collect();

    let body = if f.postconditions.is_empty() {
        None
    } else {
        Some(encoder.encode_body(f))
    };

    let mut outcomes = Vec::with_capacity(f.contract_count());

    for (i, pre) in f.preconditions.iter().enumerate() {
        let outcome = match &pre_formulas[i] {
            Err(unsupported) => VerificationOutcome::Unsupported(unsupported.reason.clone()),
            Ok(formula) => {
                let mut axioms = encoder.domain_axioms(f, false);
                axioms.extend(pre_axioms.iter().cloned());
                prove(backend, f, axioms, formula.obligations(), timeout_ms, false)
            }
        };
        outcomes.push(ContractOutcome {
            kind: ContractKind::Precondition,
            index: i,
            span: pre.span,
            outcome,
        });
    }

    for (i, post) in f.postconditions.iter().enumerate() {
        let outcome = match encoder.encode_contract(f, post, true) {
            Err(unsupported) => VerificationOutcome::Unsupported(unsupported.reason.clone()),
            Ok(formula) => {
                let model = body.as_ref().expect("body encoded for postconditions");
                let mentions_result = formula.root.mentions(RESULT_NAME)
                    || formula.side_conditions.iter().any(|sc| sc.mentions(RESULT_NAME));
                let mut axioms = encoder.domain_axioms(f, mentions_result);
                axioms.extend(pre_axioms.iter().cloned());
                axioms.push(body_link(model, &Encoder::return_sort_for(&f.return_type)));
                let widened = model.widened
                    || (mentions_result && model.paths.iter().any(|p| p.result.is_none()));
                prove(backend, f, axioms, formula.obligations(), timeout_ms, widened)
            }
        };
        outcomes.push(ContractOutcome {
            kind: ContractKind::Postcondition,
            index: i,
            span: post.span,
            outcome,
        });
    }

    FunctionVerificationResult {
        function: f.id,
        name: f.name.clone(),
        outcomes,
        time_ms: start.elapsed().as_millis() as u64,
        from_cache: false,
    }
}

/// Link the `result` symbol to the body's symbolic paths:
/// `∨ᵢ (condᵢ ∧ result = valueᵢ)`. Paths returning no value leave `result`
/// unconstrained; a body with no normally-returning path yields `false`,
/// making every postcondition vacuously provable.
fn body_link(model: &BodyModel, return_sort: &Sort) -> Term {
    Term::disjoin(model.paths.iter().map(|path| {
        let mut t = path.condition.clone();
        if let Some(result) = &path.result {
            if result.sort() == *return_sort {
                t = Term::and(
                    t,
                    Term::eq(Term::sym(RESULT_NAME, return_sort.clone()), result.clone()),
                );
            }
        }
        t
    }))
}

fn prove<B: SolverBackend>(
    backend: &mut B,
    f: &Function,
    axioms: Vec<Term>,
    target: Term,
    timeout_ms: u64,
    widened: bool,
) -> VerificationOutcome {
    let negated_goal = Term::not(target);

    let mut symbol_map = BTreeMap::new();
    for axiom in &axioms {
        axiom.collect_symbols(&mut symbol_map);
    }
    negated_goal.collect_symbols(&mut symbol_map);

    let query = ProofQuery {
        symbols: symbol_map.into_iter().collect(),
        axioms,
        negated_goal,
        timeout_ms,
    };

    match backend.check(&query) {
        Ok(CheckOutcome::Unsat) => VerificationOutcome::Proven,
        Ok(CheckOutcome::Sat(model)) => {
            if widened {
                // The refuting model ranges over widened state; it is not a
                // real counterexample.
                VerificationOutcome::Unproven
            } else {
                VerificationOutcome::Disproven(Counterexample::from_model(f, &model))
            }
        }
        Ok(CheckOutcome::Unknown) => VerificationOutcome::Unproven,
        // Backend faults degrade like timeouts; they must never surface as
        // proven or crash the run.
        Err(_) => VerificationOutcome::Unproven,
    }
}

/// Sequential driver over a whole module, one fresh backend per function.
pub fn verify_module<B, F>(
    module: &Module,
    make_backend: F,
    timeout_ms: u64,
) -> Vec<FunctionVerificationResult>
where
    B: SolverBackend,
    F: Fn() -> B,
{
    module
        .functions
        .iter()
        .map(|f| {
            let mut backend = make_backend();
            verify_function(module, f, &mut backend, timeout_ms)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use vow_ast::{span, BinOp, Expr, IntegerMode, Param, Stmt, Type, UnaryOp};

    use crate::solver::{ModelValue, SolverError};

    fn sp() -> Span {
        span(0, 1)
    }

    struct ScriptedBackend {
        responses: VecDeque<CheckOutcome>,
        calls: usize,
    }

    impl ScriptedBackend {
        fn new(responses: impl IntoIterator<Item = CheckOutcome>) -> Self {
            Self {
                responses: responses.into_iter().collect(),
                calls: 0,
            }
        }
    }

    impl SolverBackend for ScriptedBackend {
        fn check(&mut self, _query: &ProofQuery) -> Result<CheckOutcome, SolverError> {
            self.calls += 1;
            Ok(self.responses.pop_front().unwrap_or(CheckOutcome::Unknown))
        }
    }

    fn abs_function() -> Function {
        Function {
            id: FunctionId(1),
            name: "abs".to_string(),
            params: vec![Param::new(sp(), "n", Type::Int)],
            return_type: Type::Int,
            preconditions: vec![],
            postconditions: vec![Expr::binary(
                sp(),
                Expr::var(sp(), RESULT_NAME, Type::Int),
                BinOp::Ge,
                Expr::int(sp(), 0),
            )],
            effects: vec![],
            body: vec![Stmt::If {
                span: sp(),
                cond: Expr::binary(
                    sp(),
                    Expr::var(sp(), "n", Type::Int),
                    BinOp::Lt,
                    Expr::int(sp(), 0),
                ),
                then_body: vec![Stmt::Return {
                    span: sp(),
                    value: Some(Expr::unary(
                        sp(),
                        UnaryOp::Neg,
                        Expr::var(sp(), "n", Type::Int),
                    )),
                }],
                else_body: vec![Stmt::Return {
                    span: sp(),
                    value: Some(Expr::var(sp(), "n", Type::Int)),
                }],
            }],
            span: sp(),
        }
    }

    #[test]
    fn test_zero_contracts_zero_outcomes() {
        let module = Module::new("t", IntegerMode::Trap);
        let f = Function {
            id: FunctionId(0),
            name: "noop".to_string(),
            params: vec![],
            return_type: Type::Unit,
            preconditions: vec![],
            postconditions: vec![],
            effects: vec![],
            body: vec![],
            span: sp(),
        };
        let mut backend = ScriptedBackend::new([]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert!(result.outcomes.is_empty());
        assert_eq!(backend.calls, 0);
    }

    #[test]
    fn test_unsat_maps_to_proven() {
        let module = Module::new("t", IntegerMode::Trap);
        let f = abs_function();
        let mut backend = ScriptedBackend::new([CheckOutcome::Unsat]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].outcome, VerificationOutcome::Proven);
        assert_eq!(backend.calls, 1);
    }

    #[test]
    fn test_sat_maps_to_disproven_with_counterexample() {
        let module = Module::new("t", IntegerMode::Trap);
        let f = abs_function();
        let mut model = BTreeMap::new();
        model.insert("n".to_string(), ModelValue::Int(-3));
        let mut backend = ScriptedBackend::new([CheckOutcome::Sat(model)]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        match &result.outcomes[0].outcome {
            VerificationOutcome::Disproven(cex) => {
                assert!(cex.describe().contains("n: int = -3"));
            }
            other => panic!("expected disproven, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_maps_to_unproven() {
        let module = Module::new("t", IntegerMode::Trap);
        let f = abs_function();
        let mut backend = ScriptedBackend::new([CheckOutcome::Unknown]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert_eq!(result.outcomes[0].outcome, VerificationOutcome::Unproven);
    }

    #[test]
    fn test_widened_body_sat_maps_to_unproven() {
        // Unbounded loop: a refuting model must not become a counterexample.
        let module = Module::new("t", IntegerMode::Trap);
        let mut f = abs_function();
        f.body = vec![
            Stmt::While {
                span: sp(),
                cond: Expr::binary(
                    sp(),
                    Expr::var(sp(), "n", Type::Int),
                    BinOp::Gt,
                    Expr::int(sp(), 0),
                ),
                body: vec![Stmt::Assign {
                    span: sp(),
                    target: "n".to_string(),
                    value: Expr::binary(
                        sp(),
                        Expr::var(sp(), "n", Type::Int),
                        BinOp::Sub,
                        Expr::int(sp(), 1),
                    ),
                }],
            },
            Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "n", Type::Int)),
            },
        ];
        let mut backend = ScriptedBackend::new([CheckOutcome::Sat(BTreeMap::new())]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert_eq!(result.outcomes[0].outcome, VerificationOutcome::Unproven);
    }

    #[test]
    fn test_unsupported_short_circuits_solver() {
        let module = Module::new("t", IntegerMode::Trap);
        let mut f = abs_function();
        f.postconditions = vec![Expr::new(
            sp(),
            Type::Bool,
            vow_ast::ExprKind::StrLit("nope".to_string()),
        )];
        let mut backend = ScriptedBackend::new([CheckOutcome::Unsat]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert!(matches!(
            result.outcomes[0].outcome,
            VerificationOutcome::Unsupported(_)
        ));
        assert_eq!(backend.calls, 0);
    }

    #[test]
    fn test_sibling_contracts_attempted_independently() {
        let module = Module::new("t", IntegerMode::Trap);
        let mut f = abs_function();
        // First postcondition unsupported, second fine.
        f.postconditions.insert(
            0,
            Expr::new(
                sp(),
                Type::Bool,
                vow_ast::ExprKind::StrLit("nope".to_string()),
            ),
        );
        let mut backend = ScriptedBackend::new([CheckOutcome::Unsat]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert_eq!(result.outcomes.len(), 2);
        assert!(matches!(
            result.outcomes[0].outcome,
            VerificationOutcome::Unsupported(_)
        ));
        assert_eq!(result.outcomes[1].outcome, VerificationOutcome::Proven);
    }

    #[test]
    fn test_outcome_list_matches_contract_count() {
        let module = Module::new("t", IntegerMode::Trap);
        let mut f = abs_function();
        f.preconditions = vec![Expr::binary(
            sp(),
            Expr::var(sp(), "n", Type::Int),
            BinOp::Ne,
            Expr::int(sp(), 0),
        )];
        let mut backend =
            ScriptedBackend::new([CheckOutcome::Unsat, CheckOutcome::Unknown]);
        let result = verify_function(&module, &f, &mut backend, 5_000);
        assert_eq!(result.outcomes.len(), f.contract_count());
        assert_eq!(result.outcomes[0].kind, ContractKind::Precondition);
        assert_eq!(result.outcomes[1].kind, ContractKind::Postcondition);
    }
}
