#![forbid(unsafe_code)]

/// Verification summaries.
///
/// Aggregate counts over a run plus a human-readable one-line rendering per
/// function, for the external reporting layer's convenience. The core never
/// formats beyond these helpers and never transmits them anywhere.
use crate::verify::{FunctionVerificationResult, VerificationOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    pub proven: usize,
    pub disproven: usize,
    pub unproven: usize,
    pub unsupported: usize,
    pub skipped: usize,
    /// Contracts whose outcomes were served from the cache instead of a
    /// solver run. Those contracts are also counted under their substantive
    /// class, so cached re-runs report identical proven/disproven counts.
    pub from_cache: usize,
}

impl VerificationSummary {
    pub fn record(&mut self, result: &FunctionVerificationResult) {
        for c in &result.outcomes {
            match &c.outcome {
                VerificationOutcome::Proven => self.proven += 1,
                VerificationOutcome::Disproven(_) => self.disproven += 1,
                VerificationOutcome::Unproven => self.unproven += 1,
                VerificationOutcome::Unsupported(_) => self.unsupported += 1,
                VerificationOutcome::Skipped => self.skipped += 1,
            }
            if result.from_cache {
                self.from_cache += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.proven + self.disproven + self.unproven + self.unsupported + self.skipped
    }

    pub fn format_line(&self) -> String {
        format!(
            "{} contract(s): {} proven, {} disproven, {} unproven, {} unsupported, {} skipped ({} from cache)",
            self.total(),
            self.proven,
            self.disproven,
            self.unproven,
            self.unsupported,
            self.skipped,
            self.from_cache
        )
    }
}

/// Render one function's verification result as a single line.
pub fn format_function(result: &FunctionVerificationResult) -> String {
    let mut parts = Vec::with_capacity(result.outcomes.len());
    for c in &result.outcomes {
        let mut piece = format!("{} #{} {}", c.kind.label(), c.index, c.outcome.label());
        if let VerificationOutcome::Disproven(cex) = &c.outcome {
            piece.push_str(&format!(" [{}]", cex.describe()));
        }
        if let VerificationOutcome::Unsupported(reason) = &c.outcome {
            piece.push_str(&format!(" ({reason})"));
        }
        parts.push(piece);
    }
    let cached = if result.from_cache { ", cached" } else { "" };
    format!(
        "{}: {} ({}ms{})",
        result.name,
        if parts.is_empty() {
            "no contracts".to_string()
        } else {
            parts.join("; ")
        },
        result.time_ms,
        cached
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, FunctionId};

    use crate::verify::{ContractKind, ContractOutcome};

    fn result(outcomes: Vec<VerificationOutcome>, from_cache: bool) -> FunctionVerificationResult {
        FunctionVerificationResult {
            function: FunctionId(7),
            name: "clamp".to_string(),
            outcomes: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| ContractOutcome {
                    kind: ContractKind::Postcondition,
                    index: i,
                    span: span(0, 1),
                    outcome,
                })
                .collect(),
            time_ms: 12,
            from_cache,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = VerificationSummary::default();
        summary.record(&result(
            vec![
                VerificationOutcome::Proven,
                VerificationOutcome::Unproven,
                VerificationOutcome::Unsupported("calls".to_string()),
            ],
            false,
        ));
        assert_eq!(summary.proven, 1);
        assert_eq!(summary.unproven, 1);
        assert_eq!(summary.unsupported, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.from_cache, 0);
    }

    #[test]
    fn test_cached_contracts_keep_substantive_class() {
        let mut summary = VerificationSummary::default();
        summary.record(&result(vec![VerificationOutcome::Proven], true));
        assert_eq!(summary.proven, 1);
        assert_eq!(summary.from_cache, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_format_function_line() {
        let line = format_function(&result(vec![VerificationOutcome::Proven], true));
        assert!(line.contains("clamp"));
        assert!(line.contains("PROVEN"));
        assert!(line.contains("cached"));
    }
}
