#![forbid(unsafe_code)]

pub mod bugpattern;
pub mod cfg;
pub mod coordinator;
pub mod dataflow;
pub mod diagnostics;
mod error;
pub mod registry;
pub mod taint;

pub use cfg::{BasicBlock, BlockId, ControlFlowGraph, Edge, EdgeKind};
pub use coordinator::{
    AnalysisConfig, AnalysisResult, Coordinator, UnknownCallPolicy, VerificationReport,
};
pub use dataflow::InitState;
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSink, Severity};
pub use error::AnalysisError;
pub use registry::{AnalyzerRegistry, CallClass};
pub use taint::Taint;
