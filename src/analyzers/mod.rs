//! Independent policy analyzers.
//!
//! Each analyzer reads the normalized policy, the classification and the user profile and
//! returns its own findings. Analyzers hold no mutable state, so the engine may run them on
//! any thread in any order.

mod coverage_gap;
mod deductible;
mod liability;

pub use coverage_gap::CoverageGapAnalyzer;
pub use deductible::DeductibleAnalyzer;
pub use liability::LiabilityAnalyzer;

use std::sync::Arc;

use crate::classifier::{ClassificationResult, PolicyRules, PolicyTypeRule};
use crate::error::AnalyzerError;
use crate::policy::{PolicyData, PolicyType, UserProfile};
use crate::risk::scoring::SeverityWeights;
use crate::risk::types::AnalyzerOutput;

pub trait Analyzer: Send + Sync {
    /// Stable name, also used as the `source` of every factor the analyzer emits.
    fn name(&self) -> &'static str;

    fn severity_weights(&self) -> SeverityWeights;

    fn analyze(
        &self,
        policy: &PolicyData,
        classification: &ClassificationResult,
        profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError>;
}

/// The standard analyzer set, sharing one rule table.
pub fn default_analyzers(rules: Arc<PolicyRules>) -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(CoverageGapAnalyzer::new(Arc::clone(&rules))),
        Arc::new(LiabilityAnalyzer::new(rules)),
        Arc::new(DeductibleAnalyzer::new()),
    ]
}

/// Looks up the rule for a known type; a known type with no rule is a configuration hole.
fn rule_for<'a>(
    analyzer: &str,
    rules: &'a PolicyRules,
    policy_type: PolicyType,
) -> Result<Option<&'a PolicyTypeRule>, AnalyzerError> {
    if policy_type == PolicyType::Unknown {
        return Ok(None);
    }
    rules
        .rule_for(policy_type)
        .map(Some)
        .ok_or_else(|| AnalyzerError::MissingInput {
            analyzer: analyzer.to_string(),
            field: format!("rules for {}", policy_type),
        })
}

pub(crate) fn round_up_to(value: f64, step: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    (value / step).ceil() * step
}

pub(crate) fn format_money(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole < 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}
