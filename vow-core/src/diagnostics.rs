#![forbid(unsafe_code)]

/// Diagnostics
///
/// Every analyzer reports into one append-only collection per compilation.
/// Categories are a closed enum decided once at creation time by the
/// analyzer that raised the diagnostic; nothing downstream re-derives them
/// from codes or messages.
use vow_ast::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Error that must be fixed
    Error,
    /// Warning that should be addressed
    Warning,
}

impl Severity {
    pub fn display(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticCategory {
    Security,
    BugPattern,
    Dataflow,
    Other,
}

impl DiagnosticCategory {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticCategory::Security => "security",
            DiagnosticCategory::BugPattern => "bugpattern",
            DiagnosticCategory::Dataflow => "dataflow",
            DiagnosticCategory::Other => "other",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub severity: Severity,
    pub span: Span,
    pub category: DiagnosticCategory,
}

impl Diagnostic {
    pub fn error(
        code: &'static str,
        category: DiagnosticCategory,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            span,
            category,
        }
    }

    pub fn warning(
        code: &'static str,
        category: DiagnosticCategory,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
            span,
            category,
        }
    }

    pub fn display(&self) -> String {
        format!(
            "{}: [{}] {} ({})",
            self.severity.display(),
            self.code,
            self.message,
            self.category.label()
        )
    }
}

/// Append-only diagnostic collection.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn count_category(&self, category: DiagnosticCategory) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    /// Consume the sink, returning diagnostics stable-sorted by source span.
    /// This is the order handed to the external reporting layer.
    pub fn into_sorted(mut self) -> Vec<Diagnostic> {
        self.diagnostics
            .sort_by_key(|d| (d.span.offset(), d.span.len()));
        self.diagnostics
    }

    /// Report all diagnostics as formatted lines.
    pub fn report(&self) -> String {
        let mut output = String::new();
        for diag in &self.diagnostics {
            output.push_str(&diag.display());
            output.push('\n');
        }
        output
    }
}
