//! Filter decision shared by the copy and strategy gates

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of running a trade or signal through the filter pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub accepted: bool,
    /// Check names in evaluation order
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    /// Fraction of the source trade to copy, in [0.01, 1]
    pub size_multiplier: f64,
    pub delay: Duration,
    pub reason: String,
}

impl FilterResult {
    /// Summarize a full pass over the checks
    pub fn from_checks(
        passed: Vec<String>,
        failed: Vec<String>,
        size_multiplier: f64,
        delay: Duration,
    ) -> Self {
        let accepted = failed.is_empty();
        let reason = if accepted {
            format!("All {} filters passed", passed.len())
        } else {
            format!("Failed filters: {}", failed.join(", "))
        };
        Self {
            accepted,
            passed,
            failed,
            size_multiplier,
            delay,
            reason,
        }
    }

    /// Rejection that short-circuits every check
    pub fn rejected(check: &str, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            passed: Vec::new(),
            failed: vec![check.to_string()],
            size_multiplier: 0.0,
            delay: Duration::ZERO,
            reason: reason.into(),
        }
    }

    pub fn delay_secs(&self) -> f64 {
        self.delay.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_text() {
        let ok = FilterResult::from_checks(
            vec!["a".into(), "b".into()],
            vec![],
            0.5,
            Duration::from_secs(5),
        );
        assert!(ok.accepted);
        assert_eq!(ok.reason, "All 2 filters passed");

        let bad = FilterResult::from_checks(
            vec!["a".into()],
            vec!["dex".into(), "chain".into()],
            0.5,
            Duration::from_secs(5),
        );
        assert!(!bad.accepted);
        assert_eq!(bad.reason, "Failed filters: dex, chain");
    }
}
