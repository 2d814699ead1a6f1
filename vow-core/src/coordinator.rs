#![forbid(unsafe_code)]

//! Analysis coordinator.
//!
//! The coordinator owns the per-compilation pipeline: it receives a typed
//! module, builds each function's CFG exactly once, runs whichever analyses
//! the configuration enables, and merges everything into one
//! [`AnalysisResult`]. Functions are analyzed independently on the rayon
//! pool; the only shared state is the append-only diagnostic sink and the
//! verification cache. Each worker owns its own solver session.
//!
//! The public entry point is total: analyzer faults inside one function
//! become a single `other`-category diagnostic naming that function and
//! never abort analysis of its siblings.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use vow_ast::{Expr, Function, Module, Span, Stmt};
use vow_verify::{
    cache, default_backend, verify_function, FileCache, FunctionVerificationResult,
    VerificationSummary,
};

use crate::bugpattern;
use crate::cfg;
use crate::dataflow;
use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSink};
use crate::error::AnalysisError;
use crate::registry::{AnalyzerRegistry, CallClass};
use crate::taint;

/// How calls to functions outside the current module are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownCallPolicy {
    /// An unknown call is itself an error.
    Strict,
    /// Warn, then treat the call as effectful.
    #[default]
    Default,
    /// Silently treat the call as effectful.
    Permissive,
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub enable_dataflow: bool,
    pub enable_bug_patterns: bool,
    pub enable_taint_analysis: bool,
    pub use_smt_verification: bool,
    pub verification_timeout_ms: u64,
    pub cache_enabled: bool,
    /// Directory backing the verification cache; the cache stays disabled
    /// without one.
    pub cache_dir: Option<PathBuf>,
    pub unknown_call_policy: UnknownCallPolicy,
    /// Overall run deadline. Expiry stops scheduling new functions;
    /// in-flight ones finish or hit their own solver timeouts.
    pub deadline: Option<Duration>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable_dataflow: true,
            enable_bug_patterns: true,
            enable_taint_analysis: true,
            use_smt_verification: false,
            verification_timeout_ms: 5_000,
            cache_enabled: false,
            cache_dir: None,
            unknown_call_policy: UnknownCallPolicy::default(),
            deadline: None,
        }
    }
}

/// Verification portion of an analysis run.
#[derive(Clone, Debug)]
pub struct VerificationReport {
    pub summary: VerificationSummary,
    pub functions: Vec<FunctionVerificationResult>,
}

/// The externally visible product of a run.
#[derive(Debug)]
pub struct AnalysisResult {
    pub functions_analyzed: usize,
    pub dataflow_issues: usize,
    pub bug_patterns_found: usize,
    pub taint_vulnerabilities: usize,
    pub elapsed_ms: u64,
    /// Stable-sorted by source span.
    pub diagnostics: Vec<Diagnostic>,
    pub verification: Option<VerificationReport>,
}

pub struct Coordinator {
    config: AnalysisConfig,
    registry: AnalyzerRegistry,
}

struct FunctionOutcome {
    diagnostics: Vec<Diagnostic>,
    verification: Option<FunctionVerificationResult>,
}

impl Coordinator {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            registry: AnalyzerRegistry::new(),
        }
    }

    /// Registry variant for callers that register extra sanitizers.
    pub fn with_registry(config: AnalysisConfig, registry: AnalyzerRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze a module. Total: always returns a result, never raises.
    pub fn analyze(&self, module: &Module) -> AnalysisResult {
        let start = Instant::now();

        let cache = if self.config.use_smt_verification && self.config.cache_enabled {
            self.config
                .cache_dir
                .as_ref()
                .and_then(|dir| FileCache::open(dir).ok())
        } else {
            None
        };

        let sink = Mutex::new(DiagnosticSink::new());
        let verification_results: Mutex<Vec<FunctionVerificationResult>> = Mutex::new(Vec::new());
        let analyzed = AtomicUsize::new(0);

        module.functions.par_iter().for_each(|f| {
            if let Some(deadline) = self.config.deadline {
                if start.elapsed() >= deadline {
                    // Stop scheduling: record the function as skipped for
                    // the verification summary and move on.
                    if self.config.use_smt_verification {
                        verification_results
                            .lock()
                            .expect("verification results lock")
                            .push(FunctionVerificationResult::skipped(f));
                    }
                    return;
                }
            }

            analyzed.fetch_add(1, Ordering::Relaxed);
            let outcome = self.analyze_function(module, f, cache.as_ref());
            sink.lock()
                .expect("diagnostic sink lock")
                .extend(outcome.diagnostics);
            if let Some(result) = outcome.verification {
                verification_results
                    .lock()
                    .expect("verification results lock")
                    .push(result);
            }
        });

        let diagnostics = sink
            .into_inner()
            .expect("diagnostic sink lock")
            .into_sorted();
        let dataflow_issues = count_category(&diagnostics, DiagnosticCategory::Dataflow);
        let bug_patterns_found = count_category(&diagnostics, DiagnosticCategory::BugPattern);
        let taint_vulnerabilities = count_category(&diagnostics, DiagnosticCategory::Security);

        let verification = self.config.use_smt_verification.then(|| {
            let mut functions = verification_results
                .into_inner()
                .expect("verification results lock");
            functions.sort_by_key(|r| r.function);
            let mut summary = VerificationSummary::default();
            for r in &functions {
                summary.record(r);
            }
            VerificationReport { summary, functions }
        });

        AnalysisResult {
            functions_analyzed: analyzed.into_inner(),
            dataflow_issues,
            bug_patterns_found,
            taint_vulnerabilities,
            elapsed_ms: start.elapsed().as_millis() as u64,
            diagnostics,
            verification,
        }
    }

    fn analyze_function(
        &self,
        module: &Module,
        f: &Function,
        cache: Option<&FileCache>,
    ) -> FunctionOutcome {
        let mut diagnostics = Vec::new();

        // One CFG per function per run; every analyzer shares it.
        let graph = cfg::build(&f.body);

        self.check_unknown_calls(module, f, &mut diagnostics);

        if self.config.enable_dataflow {
            collect(dataflow::analyze(&graph, f), f, &mut diagnostics);
        }
        if self.config.enable_bug_patterns {
            collect(bugpattern::analyze(&graph, f), f, &mut diagnostics);
        }
        if self.config.enable_taint_analysis {
            collect(
                taint::analyze(&graph, f, module, &self.registry),
                f,
                &mut diagnostics,
            );
        }

        let verification = if self.config.use_smt_verification {
            Some(self.verify(module, f, cache))
        } else {
            None
        };

        FunctionOutcome {
            diagnostics,
            verification,
        }
    }

    fn verify(
        &self,
        module: &Module,
        f: &Function,
        file_cache: Option<&FileCache>,
    ) -> FunctionVerificationResult {
        let timeout = self.config.verification_timeout_ms;
        match file_cache {
            Some(store) => {
                let key = cache::fingerprint(module, f);
                if let Some(hit) = cache::load_result(store, &key, f) {
                    return hit;
                }
                let mut backend = default_backend();
                let result = verify_function(module, f, &mut backend, timeout);
                cache::store_result(store, &key, &result);
                result
            }
            None => {
                let mut backend = default_backend();
                verify_function(module, f, &mut backend, timeout)
            }
        }
    }

    fn check_unknown_calls(
        &self,
        module: &Module,
        f: &Function,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        if self.config.unknown_call_policy == UnknownCallPolicy::Permissive {
            return;
        }
        for (callee, span) in body_call_sites(&f.body) {
            if self.registry.classify_call(module, callee) != CallClass::Unknown {
                continue;
            }
            let message =
                format!("call to `{callee}` cannot be resolved inside this module");
            let diagnostic = match self.config.unknown_call_policy {
                UnknownCallPolicy::Strict => {
                    Diagnostic::error("unknown-call", DiagnosticCategory::Other, span, message)
                }
                UnknownCallPolicy::Default => {
                    Diagnostic::warning("unknown-call", DiagnosticCategory::Other, span, message)
                }
                UnknownCallPolicy::Permissive => continue,
            };
            diagnostics.push(diagnostic);
        }
    }
}

fn collect(
    result: Result<Vec<Diagnostic>, AnalysisError>,
    f: &Function,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match result {
        Ok(found) => diagnostics.extend(found),
        Err(fault) => diagnostics.push(Diagnostic::error(
            "internal-error",
            DiagnosticCategory::Other,
            f.span,
            format!("internal analysis error in `{}`: {}", f.name, fault.message),
        )),
    }
}

fn count_category(diagnostics: &[Diagnostic], category: DiagnosticCategory) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.category == category)
        .count()
}

/// Every call site in a function body, including guards and loop bounds.
fn body_call_sites(stmts: &[Stmt]) -> Vec<(&str, Span)> {
    let mut out = Vec::new();
    fn from_expr<'f>(e: &'f Expr, out: &mut Vec<(&'f str, Span)>) {
        out.extend(e.call_sites());
    }
    fn walk<'f>(stmts: &'f [Stmt], out: &mut Vec<(&'f str, Span)>) {
        for stmt in stmts {
            match stmt {
                Stmt::Let { value: Some(v), .. } => from_expr(v, out),
                Stmt::Let { value: None, .. } => {}
                Stmt::Assign { value, .. } => from_expr(value, out),
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    ..
                } => {
                    from_expr(cond, out);
                    walk(then_body, out);
                    walk(else_body, out);
                }
                Stmt::While { cond, body, .. } => {
                    from_expr(cond, out);
                    walk(body, out);
                }
                Stmt::DoWhile { body, cond, .. } => {
                    walk(body, out);
                    from_expr(cond, out);
                }
                Stmt::For { from, to, body, .. } => {
                    from_expr(from, out);
                    from_expr(to, out);
                    walk(body, out);
                }
                Stmt::Return { value: Some(v), .. } => from_expr(v, out),
                Stmt::Return { value: None, .. } => {}
                Stmt::Throw { value, .. } => from_expr(value, out),
                Stmt::Expr(e) => from_expr(e, out),
                Stmt::Opaque { .. } => {}
            }
        }
    }
    walk(stmts, &mut out);
    out
}
