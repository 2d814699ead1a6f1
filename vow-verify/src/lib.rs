#![forbid(unsafe_code)]

pub mod cache;
pub mod counterexample;
pub mod encode;
pub mod formula;
pub mod solver;
pub mod summary;
pub mod verify;

pub use cache::{fingerprint, CacheKey, FileCache, StoredContract, VERSION_TAG};
pub use counterexample::{eval_contract, CexBinding, CexValue, ConcreteValue, Counterexample};
pub use encode::{BodyModel, BodyPath, Encoder, UnsupportedConstruct};
pub use formula::{ContractFormula, Sort, Term, TermBinOp, TermUnOp};
pub use solver::{
    default_backend, CheckOutcome, ModelBindings, ModelValue, NoSolverBackend, ProofQuery,
    SolverBackend, SolverError, SolverProfile,
};
pub use summary::{format_function, VerificationSummary};
pub use verify::{
    contract_spans, verify_function, verify_module, ContractKind, ContractOutcome,
    FunctionVerificationResult, VerificationOutcome,
};
#[cfg(feature = "z3")]
pub use solver::z3_backend::Z3Backend;
