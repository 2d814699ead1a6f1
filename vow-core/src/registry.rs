#![forbid(unsafe_code)]

//! Analyzer registry.
//!
//! Built once at coordinator startup and passed by reference to every
//! analyzer; there is no process-wide lazy state. The registry resolves call
//! targets against the module's functions and externs, classifies calls for
//! the unknown-call policy, and recognizes sinks, sources, and sanitizers —
//! including sanitizers registered explicitly on top of effect declarations.

use std::collections::HashSet;

use vow_ast::Module;

/// Classification of a call site for the unknown-call policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallClass {
    Pure,
    Effectful,
    Unknown,
}

#[derive(Clone, Debug, Default)]
pub struct AnalyzerRegistry {
    extra_sanitizers: HashSet<String>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sanitizers(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            extra_sanitizers: names.into_iter().collect(),
        }
    }

    pub fn register_sanitizer(&mut self, name: impl Into<String>) {
        self.extra_sanitizers.insert(name.into());
    }

    /// Classify a callee name: module-local and extern callables are pure or
    /// effectful by their declared effect set; anything unresolved is
    /// unknown.
    pub fn classify_call(&self, module: &Module, name: &str) -> CallClass {
        if let Some(f) = module.function(name) {
            return if f.effects.is_empty() {
                CallClass::Pure
            } else {
                CallClass::Effectful
            };
        }
        if let Some(ext) = module.extern_fn(name) {
            return if ext.is_pure() {
                CallClass::Pure
            } else {
                CallClass::Effectful
            };
        }
        CallClass::Unknown
    }

    /// Whether a call to `name` is a security sink.
    pub fn is_sink(&self, module: &Module, name: &str) -> bool {
        if let Some(f) = module.function(name) {
            return f.effects.iter().any(|e| e.is_sink());
        }
        module.extern_fn(name).is_some_and(|e| e.is_sink())
    }

    /// Whether a call to `name` yields untrusted input.
    pub fn is_source(&self, module: &Module, name: &str) -> bool {
        if let Some(f) = module.function(name) {
            return f.effects.iter().any(|e| e.is_source());
        }
        module.extern_fn(name).is_some_and(|e| e.is_source())
    }

    /// Whether a call to `name` clears taint.
    pub fn is_sanitizer(&self, module: &Module, name: &str) -> bool {
        if self.extra_sanitizers.contains(name) {
            return true;
        }
        if let Some(f) = module.function(name) {
            return f.effects.iter().any(|e| e.is_sanitizer());
        }
        module.extern_fn(name).is_some_and(|e| e.is_sanitizer())
    }
}
