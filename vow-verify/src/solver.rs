#![forbid(unsafe_code)]

//! Solver backends.
//!
//! The orchestrator talks to an abstract [`SolverBackend`]; the real Z3
//! backend lives behind the `z3` feature so the workspace builds on machines
//! without libz3. Without it, [`NoSolverBackend`] answers `Unknown` for every
//! check, which the orchestrator classifies as `Unproven` — never as a false
//! `Proven`.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::formula::{Sort, Term};

/// Timeout presets for solver checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverProfile {
    /// Very low timeout for interactive runs.
    Fast,
    /// CI-friendly medium timeout; the engine default.
    Ci,
    /// High timeout for an authoritative final verify.
    Thorough,
}

impl SolverProfile {
    pub fn timeout_ms(self) -> u64 {
        match self {
            SolverProfile::Fast => 500,
            SolverProfile::Ci => 5_000,
            SolverProfile::Thorough => 30_000,
        }
    }
}

/// A concrete value extracted from a satisfying model.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelValue {
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Int(v) => write!(f, "{v}"),
            ModelValue::Real(v) => write!(f, "{v}"),
            ModelValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

pub type ModelBindings = BTreeMap<String, ModelValue>;

/// Result of a single satisfiability check.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckOutcome {
    Unsat,
    Sat(ModelBindings),
    /// Timeout or solver "unknown".
    Unknown,
}

/// One negation-and-check query: axioms plus the negated proof goal.
#[derive(Clone, Debug)]
pub struct ProofQuery {
    pub symbols: Vec<(String, Sort)>,
    pub axioms: Vec<Term>,
    pub negated_goal: Term,
    pub timeout_ms: u64,
}

#[derive(Debug, Error)]
#[error("solver backend error: {message}")]
pub struct SolverError {
    pub message: String,
}

impl SolverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A solver session. One backend value serves exactly one function's
/// contracts and is dropped afterwards; backends are not thread-safe and are
/// never shared across workers.
pub trait SolverBackend {
    fn check(&mut self, query: &ProofQuery) -> Result<CheckOutcome, SolverError>;
}

/// Fallback backend when compiled without `--features z3`.
///
/// Keeps the workspace buildable on machines without libz3; every check
/// comes back `Unknown`.
#[derive(Debug, Default)]
pub struct NoSolverBackend;

impl SolverBackend for NoSolverBackend {
    fn check(&mut self, _query: &ProofQuery) -> Result<CheckOutcome, SolverError> {
        Ok(CheckOutcome::Unknown)
    }
}

/// Fresh backend for one function's verification.
#[cfg(feature = "z3")]
pub fn default_backend() -> z3_backend::Z3Backend {
    z3_backend::Z3Backend::new()
}

/// Fresh backend for one function's verification.
#[cfg(not(feature = "z3"))]
pub fn default_backend() -> NoSolverBackend {
    NoSolverBackend
}

#[cfg(feature = "z3")]
pub mod z3_backend {
    use std::collections::HashMap;

    use z3::ast::{Array, Ast, Bool, Dynamic, Int, Real};
    use z3::{Config, Context, Params, SatResult, Solver};

    use super::{CheckOutcome, ModelBindings, ModelValue, ProofQuery, SolverBackend, SolverError};
    use crate::formula::{Sort, Term, TermBinOp, TermUnOp};

    /// Z3-backed solver session. Each `check` builds a fresh context and
    /// solver and drops them on return, so disposal is deterministic even
    /// when classification fails midway.
    #[derive(Debug, Default)]
    pub struct Z3Backend;

    impl Z3Backend {
        pub fn new() -> Self {
            Z3Backend
        }
    }

    impl SolverBackend for Z3Backend {
        fn check(&mut self, query: &ProofQuery) -> Result<CheckOutcome, SolverError> {
            let mut cfg = Config::new();
            cfg.set_model_generation(true);
            let ctx = Context::new(&cfg);
            let solver = Solver::new(&ctx);
            let mut params = Params::new(&ctx);
            params.set_u32("timeout", query.timeout_ms.min(u32::MAX as u64) as u32);
            solver.set_params(&params);

            let mut symbols: HashMap<String, Z3Val<'_>> = HashMap::new();
            for (name, sort) in &query.symbols {
                symbols.insert(name.clone(), declare(&ctx, name, sort)?);
            }

            for axiom in &query.axioms {
                solver.assert(&lower_bool(&ctx, axiom, &symbols)?);
            }
            solver.assert(&lower_bool(&ctx, &query.negated_goal, &symbols)?);

            match solver.check() {
                SatResult::Unsat => Ok(CheckOutcome::Unsat),
                SatResult::Unknown => Ok(CheckOutcome::Unknown),
                SatResult::Sat => {
                    let Some(model) = solver.get_model() else {
                        return Ok(CheckOutcome::Unknown);
                    };
                    let mut bindings = ModelBindings::new();
                    for (name, sort) in &query.symbols {
                        let Some(val) = symbols.get(name) else {
                            continue;
                        };
                        let extracted = match (sort, val) {
                            (Sort::Int, Z3Val::I(v)) => model
                                .eval(v, true)
                                .and_then(|x| x.as_i64())
                                .map(ModelValue::Int),
                            (Sort::Bool, Z3Val::B(v)) => model
                                .eval(v, true)
                                .and_then(|x| x.as_bool())
                                .map(ModelValue::Bool),
                            (Sort::Real, Z3Val::R(v)) => model
                                .eval(v, true)
                                .and_then(|x| x.as_real())
                                .map(|(num, den)| {
                                    ModelValue::Real(num as f64 / den.max(1) as f64)
                                }),
                            // Array values are not extracted; diagnostics
                            // only report scalar bindings.
                            _ => None,
                        };
                        if let Some(v) = extracted {
                            bindings.insert(name.clone(), v);
                        }
                    }
                    Ok(CheckOutcome::Sat(bindings))
                }
            }
        }
    }

    enum Z3Val<'c> {
        I(Int<'c>),
        R(Real<'c>),
        B(Bool<'c>),
        A(Array<'c>),
    }

    fn declare<'c>(
        ctx: &'c Context,
        name: &str,
        sort: &Sort,
    ) -> Result<Z3Val<'c>, SolverError> {
        Ok(match sort {
            Sort::Int => Z3Val::I(Int::new_const(ctx, name)),
            Sort::Real => Z3Val::R(Real::new_const(ctx, name)),
            Sort::Bool => Z3Val::B(Bool::new_const(ctx, name)),
            Sort::Array(elem) => {
                let range = z3_sort(ctx, elem)?;
                Z3Val::A(Array::new_const(ctx, name, &z3::Sort::int(ctx), &range))
            }
        })
    }

    fn z3_sort<'c>(ctx: &'c Context, sort: &Sort) -> Result<z3::Sort<'c>, SolverError> {
        Ok(match sort {
            Sort::Int => z3::Sort::int(ctx),
            Sort::Real => z3::Sort::real(ctx),
            Sort::Bool => z3::Sort::bool(ctx),
            Sort::Array(elem) => {
                z3::Sort::array(ctx, &z3::Sort::int(ctx), &z3_sort(ctx, elem)?)
            }
        })
    }

    /// Build a `2^63`-scale constant without overflowing `i64`.
    fn int_const<'c>(ctx: &'c Context, v: i128) -> Int<'c> {
        if let Ok(small) = i64::try_from(v) {
            return Int::from_i64(ctx, small);
        }
        let hi = Int::from_i64(ctx, (v >> 32) as i64);
        let lo = Int::from_i64(ctx, (v & 0xFFFF_FFFF) as i64);
        let scale = Int::from_i64(ctx, 1 << 32);
        Int::add(ctx, &[&Int::mul(ctx, &[&hi, &scale]), &lo])
    }

    fn lower_bool<'c>(
        ctx: &'c Context,
        term: &Term,
        symbols: &HashMap<String, Z3Val<'c>>,
    ) -> Result<Bool<'c>, SolverError> {
        match lower(ctx, term, symbols)? {
            Z3Val::B(b) => Ok(b),
            _ => Err(SolverError::new("expected boolean-sorted term")),
        }
    }

    fn lower_int<'c>(
        ctx: &'c Context,
        term: &Term,
        symbols: &HashMap<String, Z3Val<'c>>,
    ) -> Result<Int<'c>, SolverError> {
        match lower(ctx, term, symbols)? {
            Z3Val::I(i) => Ok(i),
            _ => Err(SolverError::new("expected integer-sorted term")),
        }
    }

    fn lower<'c>(
        ctx: &'c Context,
        term: &Term,
        symbols: &HashMap<String, Z3Val<'c>>,
    ) -> Result<Z3Val<'c>, SolverError> {
        Ok(match term {
            Term::IntConst(v) => Z3Val::I(int_const(ctx, *v)),
            Term::RealConst(v) => Z3Val::R(real_const(ctx, *v)),
            Term::BoolConst(v) => Z3Val::B(Bool::from_bool(ctx, *v)),
            Term::Sym { name, sort } => match symbols.get(name) {
                Some(val) => clone_val(val),
                // A symbol outside the declared set (should not happen; the
                // orchestrator collects symbols from every term).
                None => declare(ctx, name, sort)?,
            },
            Term::Unary { op, term } => match op {
                TermUnOp::Neg => match lower(ctx, term, symbols)? {
                    Z3Val::I(i) => Z3Val::I(i.unary_minus()),
                    Z3Val::R(r) => Z3Val::R(r.unary_minus()),
                    _ => return Err(SolverError::new("negation of non-numeric term")),
                },
                TermUnOp::Not => Z3Val::B(lower_bool(ctx, term, symbols)?.not()),
            },
            Term::Binary { op, left, right } => {
                lower_binary(ctx, *op, left, right, symbols)?
            }
            Term::Ite {
                cond,
                then_term,
                else_term,
            } => {
                let c = lower_bool(ctx, cond, symbols)?;
                match (
                    lower(ctx, then_term, symbols)?,
                    lower(ctx, else_term, symbols)?,
                ) {
                    (Z3Val::I(a), Z3Val::I(b)) => Z3Val::I(c.ite(&a, &b)),
                    (Z3Val::R(a), Z3Val::R(b)) => Z3Val::R(c.ite(&a, &b)),
                    (Z3Val::B(a), Z3Val::B(b)) => Z3Val::B(c.ite(&a, &b)),
                    _ => return Err(SolverError::new("ite branch sort mismatch")),
                }
            }
            Term::Length(base) => {
                let name = length_symbol(base)?;
                Z3Val::I(Int::new_const(ctx, name.as_str()))
            }
            Term::Select { array, index } => {
                let arr = match lower(ctx, array, symbols)? {
                    Z3Val::A(a) => a,
                    _ => return Err(SolverError::new("select on non-array term")),
                };
                let idx = lower_int(ctx, index, symbols)?;
                let selected: Dynamic<'c> = arr.select(&idx);
                if let Some(i) = selected.as_int() {
                    Z3Val::I(i)
                } else if let Some(b) = selected.as_bool() {
                    Z3Val::B(b)
                } else if let Some(r) = selected.as_real() {
                    Z3Val::R(r)
                } else {
                    return Err(SolverError::new("unsupported array element sort"))
                }
            }
        })
    }

    fn lower_binary<'c>(
        ctx: &'c Context,
        op: TermBinOp,
        left: &Term,
        right: &Term,
        symbols: &HashMap<String, Z3Val<'c>>,
    ) -> Result<Z3Val<'c>, SolverError> {
        use TermBinOp::*;
        match op {
            And | Or | Implies => {
                let l = lower_bool(ctx, left, symbols)?;
                let r = lower_bool(ctx, right, symbols)?;
                Ok(Z3Val::B(match op {
                    And => Bool::and(ctx, &[&l, &r]),
                    Or => Bool::or(ctx, &[&l, &r]),
                    Implies => l.implies(&r),
                    _ => unreachable!(),
                }))
            }
            Add | Sub | Mul | Div | Mod => match (
                lower(ctx, left, symbols)?,
                lower(ctx, right, symbols)?,
            ) {
                (Z3Val::I(l), Z3Val::I(r)) => Ok(Z3Val::I(match op {
                    Add => Int::add(ctx, &[&l, &r]),
                    Sub => Int::sub(ctx, &[&l, &r]),
                    Mul => Int::mul(ctx, &[&l, &r]),
                    Div => l.div(&r),
                    Mod => l.modulo(&r),
                    _ => unreachable!(),
                })),
                (Z3Val::R(l), Z3Val::R(r)) => Ok(Z3Val::R(match op {
                    Add => Real::add(ctx, &[&l, &r]),
                    Sub => Real::sub(ctx, &[&l, &r]),
                    Mul => Real::mul(ctx, &[&l, &r]),
                    Div => l.div(&r),
                    Mod => return Err(SolverError::new("modulo on real terms")),
                    _ => unreachable!(),
                })),
                _ => Err(SolverError::new("arithmetic sort mismatch")),
            },
            Eq | Ne => {
                let eq = match (
                    lower(ctx, left, symbols)?,
                    lower(ctx, right, symbols)?,
                ) {
                    (Z3Val::I(l), Z3Val::I(r)) => l._eq(&r),
                    (Z3Val::R(l), Z3Val::R(r)) => l._eq(&r),
                    (Z3Val::B(l), Z3Val::B(r)) => l._eq(&r),
                    _ => return Err(SolverError::new("equality sort mismatch")),
                };
                Ok(Z3Val::B(if op == Ne { eq.not() } else { eq }))
            }
            Lt | Le | Gt | Ge => match (
                lower(ctx, left, symbols)?,
                lower(ctx, right, symbols)?,
            ) {
                (Z3Val::I(l), Z3Val::I(r)) => Ok(Z3Val::B(match op {
                    Lt => l.lt(&r),
                    Le => l.le(&r),
                    Gt => l.gt(&r),
                    Ge => l.ge(&r),
                    _ => unreachable!(),
                })),
                (Z3Val::R(l), Z3Val::R(r)) => Ok(Z3Val::B(match op {
                    Lt => l.lt(&r),
                    Le => l.le(&r),
                    Gt => l.gt(&r),
                    Ge => l.ge(&r),
                    _ => unreachable!(),
                })),
                _ => Err(SolverError::new("comparison sort mismatch")),
            },
        }
    }

    fn clone_val<'c>(val: &Z3Val<'c>) -> Z3Val<'c> {
        match val {
            Z3Val::I(v) => Z3Val::I(v.clone()),
            Z3Val::R(v) => Z3Val::R(v.clone()),
            Z3Val::B(v) => Z3Val::B(v.clone()),
            Z3Val::A(v) => Z3Val::A(v.clone()),
        }
    }

    fn real_const<'c>(ctx: &'c Context, v: f64) -> Real<'c> {
        // Rational approximation good enough for contract literals.
        let den = 1_000_000i32;
        let num = (v * den as f64).round();
        let num = num.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        Real::from_real(ctx, num, den)
    }

    /// Array lengths are modeled as companion integer symbols derived from
    /// the array symbol's name.
    fn length_symbol(base: &Term) -> Result<String, SolverError> {
        match base {
            Term::Sym { name, .. } => Ok(format!("{name}#length")),
            _ => Err(SolverError::new("length of a non-symbol array term")),
        }
    }
}
