#![forbid(unsafe_code)]

// Counterexample mapping: solver model -> typed source-level values.
//
// Design principles:
// 1. Deterministic: the same model produces the same rendering across runs
//    (bindings are kept in a BTreeMap, sorted by name).
// 2. Failure-tolerant: a binding the model cannot produce is rendered as an
//    opaque placeholder rather than dropped silently.
// 3. Minimal: only parameters and the reserved `result` symbol are kept;
//    internal widening symbols never reach the user.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use vow_ast::{BinOp, Expr, ExprKind, Function, IntegerMode, UnaryOp, RESULT_NAME};

use crate::solver::{ModelBindings, ModelValue};

/// A concrete value in source-level terms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CexValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    /// Value the model could not produce in scalar form.
    Opaque(String),
}

impl fmt::Display for CexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CexValue::Int(v) => write!(f, "{v}"),
            CexValue::Real(v) => write!(f, "{v}"),
            CexValue::Bool(v) => write!(f, "{v}"),
            CexValue::Opaque(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CexBinding {
    pub type_name: String,
    pub value: CexValue,
}

/// A concrete assignment falsifying a contract. Produced only for
/// `Disproven` outcomes.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Counterexample {
    pub bindings: BTreeMap<String, CexBinding>,
}

impl Counterexample {
    /// Keep the parameters (and `result`) of `f` out of a raw model.
    pub fn from_model(f: &Function, model: &ModelBindings) -> Self {
        let mut bindings = BTreeMap::new();
        for p in &f.params {
            let value = model
                .get(&p.name)
                .map(model_to_cex)
                .unwrap_or_else(|| CexValue::Opaque("<any>".to_string()));
            bindings.insert(
                p.name.clone(),
                CexBinding {
                    type_name: p.ty.to_string(),
                    value,
                },
            );
        }
        if let Some(v) = model.get(RESULT_NAME) {
            bindings.insert(
                RESULT_NAME.to_string(),
                CexBinding {
                    type_name: f.return_type.to_string(),
                    value: model_to_cex(v),
                },
            );
        }
        Self { bindings }
    }

    /// Human-readable one-line description, sorted by name.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .bindings
            .iter()
            .map(|(name, b)| format!("{name}: {} = {}", b.type_name, b.value))
            .collect();
        parts.join(", ")
    }

    /// Bindings in the form the concrete evaluator consumes.
    pub fn concrete_bindings(&self) -> BTreeMap<String, ConcreteValue> {
        self.bindings
            .iter()
            .filter_map(|(name, b)| {
                let v = match &b.value {
                    CexValue::Int(v) => ConcreteValue::Int(*v),
                    CexValue::Real(v) => ConcreteValue::Real(*v),
                    CexValue::Bool(v) => ConcreteValue::Bool(*v),
                    CexValue::Opaque(_) => return None,
                };
                Some((name.clone(), v))
            })
            .collect()
    }
}

fn model_to_cex(v: &ModelValue) -> CexValue {
    match v {
        ModelValue::Int(v) => CexValue::Int(*v),
        ModelValue::Real(v) => CexValue::Real(*v),
        ModelValue::Bool(v) => CexValue::Bool(*v),
    }
}

// ----- concrete evaluation ---------------------------------------------------

/// A ground value for concrete contract evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum ConcreteValue {
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl ConcreteValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            ConcreteValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Evaluate a contract expression under concrete bindings.
///
/// Integer division and modulo are Euclidean, matching the solver encoding,
/// and overflow follows the given integer mode. Returns `None` when the
/// expression leaves the evaluable fragment (calls, indexing, strings) or is
/// undefined (division by zero, trap-mode overflow).
pub fn eval_contract(
    expr: &Expr,
    bindings: &BTreeMap<String, ConcreteValue>,
    mode: IntegerMode,
) -> Option<ConcreteValue> {
    match &expr.kind {
        ExprKind::IntLit(v) => Some(ConcreteValue::Int(*v)),
        ExprKind::RealLit(v) => Some(ConcreteValue::Real(*v)),
        ExprKind::BoolLit(v) => Some(ConcreteValue::Bool(*v)),
        ExprKind::StrLit(_) | ExprKind::NullLit => None,
        ExprKind::Var(name) => bindings.get(name).cloned(),
        ExprKind::Unary { op, expr } => {
            let v = eval_contract(expr, bindings, mode)?;
            match (op, v) {
                (UnaryOp::Not, ConcreteValue::Bool(b)) => Some(ConcreteValue::Bool(!b)),
                (UnaryOp::Neg, ConcreteValue::Int(i)) => int_result(0i64.checked_sub(i), i.wrapping_neg(), mode),
                (UnaryOp::Neg, ConcreteValue::Real(r)) => Some(ConcreteValue::Real(-r)),
                _ => None,
            }
        }
        ExprKind::Binary { left, op, right } => {
            // Short-circuit first: the right operand of && / || may be
            // undefined when the left operand decides the result.
            if *op == BinOp::And {
                let l = eval_contract(left, bindings, mode)?.as_bool()?;
                if !l {
                    return Some(ConcreteValue::Bool(false));
                }
                return eval_contract(right, bindings, mode);
            }
            if *op == BinOp::Or {
                let l = eval_contract(left, bindings, mode)?.as_bool()?;
                if l {
                    return Some(ConcreteValue::Bool(true));
                }
                return eval_contract(right, bindings, mode);
            }
            let l = eval_contract(left, bindings, mode)?;
            let r = eval_contract(right, bindings, mode)?;
            eval_binop(*op, l, r, mode)
        }
        ExprKind::Call { .. } | ExprKind::Index { .. } | ExprKind::Length(_) => None,
    }
}

fn eval_binop(
    op: BinOp,
    l: ConcreteValue,
    r: ConcreteValue,
    mode: IntegerMode,
) -> Option<ConcreteValue> {
    use ConcreteValue::*;
    match (l, r) {
        (Int(a), Int(b)) => match op {
            BinOp::Add => int_result(a.checked_add(b), a.wrapping_add(b), mode),
            BinOp::Sub => int_result(a.checked_sub(b), a.wrapping_sub(b), mode),
            BinOp::Mul => int_result(a.checked_mul(b), a.wrapping_mul(b), mode),
            BinOp::Div => {
                if b == 0 {
                    None
                } else {
                    int_result(a.checked_div_euclid(b), a.wrapping_div_euclid(b), mode)
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    None
                } else {
                    int_result(a.checked_rem_euclid(b), a.wrapping_rem_euclid(b), mode)
                }
            }
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            BinOp::Lt => Some(Bool(a < b)),
            BinOp::Le => Some(Bool(a <= b)),
            BinOp::Gt => Some(Bool(a > b)),
            BinOp::Ge => Some(Bool(a >= b)),
            BinOp::And | BinOp::Or => None,
        },
        (Real(a), Real(b)) => match op {
            BinOp::Add => Some(Real(a + b)),
            BinOp::Sub => Some(Real(a - b)),
            BinOp::Mul => Some(Real(a * b)),
            BinOp::Div => (b != 0.0).then_some(Real(a / b)),
            BinOp::Mod => None,
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            BinOp::Lt => Some(Bool(a < b)),
            BinOp::Le => Some(Bool(a <= b)),
            BinOp::Gt => Some(Bool(a > b)),
            BinOp::Ge => Some(Bool(a >= b)),
            BinOp::And | BinOp::Or => None,
        },
        (Bool(a), Bool(b)) => match op {
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn int_result(checked: Option<i64>, wrapped: i64, mode: IntegerMode) -> Option<ConcreteValue> {
    match mode {
        // Trap mode: overflow is undefined at contract level.
        IntegerMode::Trap => checked.map(ConcreteValue::Int),
        IntegerMode::Wrap => Some(ConcreteValue::Int(wrapped)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, Span, Type};

    fn sp() -> Span {
        span(0, 1)
    }

    #[test]
    fn test_describe_is_sorted_and_typed() {
        let mut cex = Counterexample::default();
        cex.bindings.insert(
            "value".to_string(),
            CexBinding {
                type_name: "int".to_string(),
                value: CexValue::Int(11),
            },
        );
        cex.bindings.insert(
            "max".to_string(),
            CexBinding {
                type_name: "int".to_string(),
                value: CexValue::Int(10),
            },
        );
        assert_eq!(cex.describe(), "max: int = 10, value: int = 11");
    }

    #[test]
    fn test_eval_falsified_contract() {
        // result <= max with result = 11, max = 10 evaluates to false.
        let contract = Expr::binary(
            sp(),
            Expr::var(sp(), RESULT_NAME, Type::Int),
            BinOp::Le,
            Expr::var(sp(), "max", Type::Int),
        );
        let mut bindings = BTreeMap::new();
        bindings.insert(RESULT_NAME.to_string(), ConcreteValue::Int(11));
        bindings.insert("max".to_string(), ConcreteValue::Int(10));
        assert_eq!(
            eval_contract(&contract, &bindings, IntegerMode::Trap),
            Some(ConcreteValue::Bool(false))
        );
    }

    #[test]
    fn test_eval_short_circuit_avoids_division() {
        // b != 0 && a / b > 0 with b = 0 short-circuits to false rather
        // than failing on the division.
        let contract = Expr::binary(
            sp(),
            Expr::binary(
                sp(),
                Expr::var(sp(), "b", Type::Int),
                BinOp::Ne,
                Expr::int(sp(), 0),
            ),
            BinOp::And,
            Expr::binary(
                sp(),
                Expr::binary(
                    sp(),
                    Expr::var(sp(), "a", Type::Int),
                    BinOp::Div,
                    Expr::var(sp(), "b", Type::Int),
                ),
                BinOp::Gt,
                Expr::int(sp(), 0),
            ),
        );
        let mut bindings = BTreeMap::new();
        bindings.insert("a".to_string(), ConcreteValue::Int(4));
        bindings.insert("b".to_string(), ConcreteValue::Int(0));
        assert_eq!(
            eval_contract(&contract, &bindings, IntegerMode::Trap),
            Some(ConcreteValue::Bool(false))
        );
    }

    #[test]
    fn test_eval_wrap_vs_trap_overflow() {
        let sum = Expr::binary(
            sp(),
            Expr::var(sp(), "x", Type::Int),
            BinOp::Add,
            Expr::int(sp(), 1),
        );
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), ConcreteValue::Int(i64::MAX));
        assert_eq!(eval_contract(&sum, &bindings, IntegerMode::Trap), None);
        assert_eq!(
            eval_contract(&sum, &bindings, IntegerMode::Wrap),
            Some(ConcreteValue::Int(i64::MIN))
        );
    }
}
