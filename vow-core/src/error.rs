#![forbid(unsafe_code)]

use miette::Diagnostic;
use thiserror::Error;

use vow_ast::Span;

/// Internal analyzer fault.
///
/// Caught at the per-function boundary by the coordinator and converted into
/// a single diagnostic; it never aborts analysis of sibling functions and
/// never escapes the coordinator.
#[derive(Debug, Error, Diagnostic)]
#[error("analysis error: {message}")]
#[diagnostic(code(vow::analysis))]
pub struct AnalysisError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl AnalysisError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
