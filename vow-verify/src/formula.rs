#![forbid(unsafe_code)]

//! Solver-neutral contract formulas.
//!
//! A [`ContractFormula`] mirrors the source contract expression as a tree of
//! sort-typed terms, independent of any particular solver. The encoder builds
//! one per contract; the orchestrator consumes it exactly once. Formulas are
//! never shared across functions.

use std::collections::BTreeMap;

/// Sort of a symbolic term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sort {
    Int,
    Real,
    Bool,
    Array(Box<Sort>),
}

impl Sort {
    pub fn array(elem: Sort) -> Self {
        Sort::Array(Box::new(elem))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermUnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermBinOp {
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
    Implies,
}

impl TermBinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            TermBinOp::Add | TermBinOp::Sub | TermBinOp::Mul | TermBinOp::Div | TermBinOp::Mod
        )
    }
}

/// A symbolic term.
///
/// Integer constants are kept as `i128` so the wrap-around normalization can
/// mention `2^63` and `2^64` without overflowing the constant representation.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    IntConst(i128),
    RealConst(f64),
    BoolConst(bool),
    Sym {
        name: String,
        sort: Sort,
    },
    Unary {
        op: TermUnOp,
        term: Box<Term>,
    },
    Binary {
        op: TermBinOp,
        left: Box<Term>,
        right: Box<Term>,
    },
    Ite {
        cond: Box<Term>,
        then_term: Box<Term>,
        else_term: Box<Term>,
    },
    /// Length of an array-sorted term.
    Length(Box<Term>),
    /// Element read from an array-sorted term.
    Select {
        array: Box<Term>,
        index: Box<Term>,
    },
}

impl Term {
    pub fn sym(name: impl Into<String>, sort: Sort) -> Self {
        Term::Sym {
            name: name.into(),
            sort,
        }
    }

    pub fn unary(op: TermUnOp, term: Term) -> Self {
        Term::Unary {
            op,
            term: Box::new(term),
        }
    }

    pub fn binary(op: TermBinOp, left: Term, right: Term) -> Self {
        Term::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(term: Term) -> Self {
        Term::unary(TermUnOp::Not, term)
    }

    pub fn and(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::And, left, right)
    }

    pub fn or(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::Or, left, right)
    }

    pub fn implies(ante: Term, cons: Term) -> Self {
        Term::binary(TermBinOp::Implies, ante, cons)
    }

    pub fn eq(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::Eq, left, right)
    }

    pub fn le(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::Le, left, right)
    }

    pub fn lt(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::Lt, left, right)
    }

    pub fn ge(left: Term, right: Term) -> Self {
        Term::binary(TermBinOp::Ge, left, right)
    }

    /// Conjunction of an arbitrary number of terms; `true` when empty.
    pub fn conjoin(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut iter = terms.into_iter();
        let Some(first) = iter.next() else {
            return Term::BoolConst(true);
        };
        iter.fold(first, Term::and)
    }

    /// Disjunction of an arbitrary number of terms; `false` when empty.
    pub fn disjoin(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut iter = terms.into_iter();
        let Some(first) = iter.next() else {
            return Term::BoolConst(false);
        };
        iter.fold(first, Term::or)
    }

    /// The sort this term evaluates to.
    pub fn sort(&self) -> Sort {
        match self {
            Term::IntConst(_) => Sort::Int,
            Term::RealConst(_) => Sort::Real,
            Term::BoolConst(_) => Sort::Bool,
            Term::Sym { sort, .. } => sort.clone(),
            Term::Unary { op, term } => match op {
                TermUnOp::Neg => term.sort(),
                TermUnOp::Not => Sort::Bool,
            },
            Term::Binary { op, left, .. } => {
                if op.is_arithmetic() {
                    left.sort()
                } else {
                    Sort::Bool
                }
            }
            Term::Ite { then_term, .. } => then_term.sort(),
            Term::Length(_) => Sort::Int,
            Term::Select { array, .. } => match array.sort() {
                Sort::Array(elem) => *elem,
                other => other,
            },
        }
    }

    /// Collect every symbol mentioned in this term, keyed by name.
    pub fn collect_symbols(&self, out: &mut BTreeMap<String, Sort>) {
        match self {
            Term::IntConst(_) | Term::RealConst(_) | Term::BoolConst(_) => {}
            Term::Sym { name, sort } => {
                out.entry(name.clone()).or_insert_with(|| sort.clone());
            }
            Term::Unary { term, .. } => term.collect_symbols(out),
            Term::Binary { left, right, .. } => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            Term::Ite {
                cond,
                then_term,
                else_term,
            } => {
                cond.collect_symbols(out);
                then_term.collect_symbols(out);
                else_term.collect_symbols(out);
            }
            Term::Length(base) => base.collect_symbols(out),
            Term::Select { array, index } => {
                array.collect_symbols(out);
                index.collect_symbols(out);
            }
        }
    }

    /// Replace every occurrence of the symbol `name` with `replacement`.
    pub fn substitute(&self, name: &str, replacement: &Term) -> Term {
        match self {
            Term::Sym { name: n, .. } if n == name => replacement.clone(),
            Term::IntConst(_)
            | Term::RealConst(_)
            | Term::BoolConst(_)
            | Term::Sym { .. } => self.clone(),
            Term::Unary { op, term } => Term::unary(*op, term.substitute(name, replacement)),
            Term::Binary { op, left, right } => Term::binary(
                *op,
                left.substitute(name, replacement),
                right.substitute(name, replacement),
            ),
            Term::Ite {
                cond,
                then_term,
                else_term,
            } => Term::Ite {
                cond: Box::new(cond.substitute(name, replacement)),
                then_term: Box::new(then_term.substitute(name, replacement)),
                else_term: Box::new(else_term.substitute(name, replacement)),
            },
            Term::Length(base) => Term::Length(Box::new(base.substitute(name, replacement))),
            Term::Select { array, index } => Term::Select {
                array: Box::new(array.substitute(name, replacement)),
                index: Box::new(index.substitute(name, replacement)),
            },
        }
    }

    /// Whether the term mentions a symbol with the given name.
    pub fn mentions(&self, name: &str) -> bool {
        let mut symbols = BTreeMap::new();
        self.collect_symbols(&mut symbols);
        symbols.contains_key(name)
    }
}

const TWO_POW_63: i128 = 1 << 63;
const TWO_POW_64: i128 = 1 << 64;

/// Normalize an integer term to two's-complement 64-bit wrap-around range:
/// `((t + 2^63) mod 2^64) - 2^63`.
pub fn wrap64(term: Term) -> Term {
    let shifted = Term::binary(TermBinOp::Add, term, Term::IntConst(TWO_POW_63));
    let reduced = Term::binary(TermBinOp::Mod, shifted, Term::IntConst(TWO_POW_64));
    Term::binary(TermBinOp::Sub, reduced, Term::IntConst(TWO_POW_63))
}

/// `i64::MIN <= t <= i64::MAX`, the in-range obligation trap mode attaches
/// to arithmetic and the domain constraint every integer symbol gets.
pub fn in_i64_range(term: Term) -> Term {
    Term::and(
        Term::le(Term::IntConst(i64::MIN as i128), term.clone()),
        Term::le(term, Term::IntConst(i64::MAX as i128)),
    )
}

/// A contract lowered to solver-neutral form.
///
/// `side_conditions` carries well-definedness obligations generated during
/// encoding (array indices in range, divisors nonzero), each already guarded
/// by the short-circuit context it arose under. `partial` is set when an
/// array index could not be shown in-range at encoding time, so the formula
/// is only as strong as its side conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct ContractFormula {
    pub root: Term,
    pub side_conditions: Vec<Term>,
    pub partial: bool,
}

impl ContractFormula {
    pub fn total(root: Term) -> Self {
        Self {
            root,
            side_conditions: Vec::new(),
            partial: false,
        }
    }

    /// The full proof obligation: every side condition plus the contract itself.
    pub fn obligations(&self) -> Term {
        Term::conjoin(
            self.side_conditions
                .iter()
                .cloned()
                .chain(std::iter::once(self.root.clone())),
        )
    }

    pub fn collect_symbols(&self, out: &mut BTreeMap<String, Sort>) {
        self.root.collect_symbols(out);
        for sc in &self.side_conditions {
            sc.collect_symbols(out);
        }
    }
}
