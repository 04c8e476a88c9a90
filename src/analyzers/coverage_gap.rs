use std::sync::Arc;

use super::{format_money, round_up_to, rule_for, Analyzer};
use crate::classifier::{ClassificationResult, ExpectedCoverage, PolicyRules};
use crate::error::AnalyzerError;
use crate::policy::{PolicyData, UserProfile};
use crate::risk::scoring::SeverityWeights;
use crate::risk::types::{AnalyzerOutput, FactorKind, RiskCategory, RiskFactor, Severity, Urgency};

const NAME: &str = "coverage_gap";
const LIABILITY_STEP: f64 = 50_000.0;

/// Compares the policy against the expected-coverage table for its type.
pub struct CoverageGapAnalyzer {
    rules: Arc<PolicyRules>,
}

impl CoverageGapAnalyzer {
    pub fn new(rules: Arc<PolicyRules>) -> Self {
        CoverageGapAnalyzer { rules }
    }
}

impl Analyzer for CoverageGapAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights {
            critical: 25,
            high: 15,
            medium: 10,
            low: 5,
        }
    }

    fn analyze(
        &self,
        policy: &PolicyData,
        classification: &ClassificationResult,
        profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        let policy_type = classification.resolved_type(policy);
        let Some(rule) = rule_for(NAME, &self.rules, policy_type)? else {
            return Ok(unknown_type_output());
        };

        let mut risks = Vec::new();
        for expected in &rule.expected_coverages {
            if let Some(factor) = check_expected(policy, expected) {
                risks.push(factor);
            }
        }

        if let Some(base) = rule.base_liability.filter(|b| *b > 0.0) {
            if let Some(factor) = check_asset_sizing(policy, profile, base) {
                risks.push(factor);
            }
        }

        let missing = risks.iter().filter(|r| r.kind == FactorKind::Gap).count();
        let summary = if risks.is_empty() {
            format!(
                "All {} expected coverages for {} policies are present and adequate",
                rule.expected_coverages.len(),
                policy_type
            )
        } else {
            format!(
                "{} coverage issues for {} policy ({} missing or underinsured lines)",
                risks.len(),
                policy_type,
                missing
            )
        };
        Ok(AnalyzerOutput { risks, summary })
    }
}

fn unknown_type_output() -> AnalyzerOutput {
    let factor = RiskFactor::builder(NAME, RiskCategory::CoverageGaps, "Policy type not identified")
        .severity(Severity::Low)
        .urgency(Urgency::Low)
        .kind(FactorKind::Awareness)
        .description("The policy type could not be determined, so expected coverages were not checked.")
        .recommendation("Confirm the policy type so coverage can be compared against a standard table.")
        .tag("classification")
        .build();
    AnalyzerOutput {
        risks: vec![factor],
        summary: "Coverage check skipped for unidentified policy type".to_string(),
    }
}

fn check_expected(policy: &PolicyData, expected: &ExpectedCoverage) -> Option<RiskFactor> {
    match policy.coverage(&expected.name) {
        Some(line) if line.limit > 0.0 => {
            if expected.min_limit <= 0.0 || line.limit >= expected.min_limit {
                return None;
            }
            let shortfall = expected.min_limit - line.limit;
            let severity = if expected.required {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(
                RiskFactor::builder(
                    NAME,
                    RiskCategory::CoverageGaps,
                    format!("{} limit below recommended minimum", expected.name),
                )
                .severity(severity)
                .urgency(Urgency::High)
                .kind(FactorKind::Gap)
                .description(format!(
                    "{} is insured for {} against a recommended minimum of {}.",
                    expected.name,
                    format_money(line.limit),
                    format_money(expected.min_limit)
                ))
                .recommendation(format!(
                    "Raise {} to at least {}.",
                    expected.name,
                    format_money(expected.min_limit)
                ))
                .estimated_cost(shortfall)
                .tag("underinsured")
                .build(),
            )
        }
        // Present without a readable limit. Nothing to compare against.
        Some(_) => None,
        None if policy.mentions(&expected.name) => None,
        None => Some(missing_factor(expected)),
    }
}

fn missing_factor(expected: &ExpectedCoverage) -> RiskFactor {
    let (severity, urgency) = if expected.required {
        (Severity::Critical, Urgency::Immediate)
    } else if expected.recommended {
        (Severity::High, Urgency::High)
    } else {
        (Severity::Medium, Urgency::Medium)
    };
    let mut builder = RiskFactor::builder(
        NAME,
        RiskCategory::CoverageGaps,
        format!("Missing {} coverage", expected.name),
    )
    .severity(severity)
    .urgency(urgency)
    .kind(FactorKind::Gap)
    .description(if expected.required {
        format!("{} is a required coverage and was not found on the policy.", expected.name)
    } else {
        format!("{} was not found on the policy.", expected.name)
    })
    .recommendation(format!("Ask the insurer to add {} coverage.", expected.name))
    .tag("missing-coverage");
    if expected.required {
        builder = builder.tag("required");
    }
    builder.build()
}

/// Liability sized to what the household could lose in a judgment.
fn recommended_liability(base: f64, profile: &UserProfile) -> f64 {
    let by_assets = profile.assets.unwrap_or(0.0) * 1.5;
    let by_income = profile.income() * 3.0;
    round_up_to(base.max(by_assets).max(by_income), LIABILITY_STEP)
}

fn check_asset_sizing(policy: &PolicyData, profile: &UserProfile, base: f64) -> Option<RiskFactor> {
    if !profile.has_financials() {
        return None;
    }
    let recommended = recommended_liability(base, profile);
    let current = policy.primary_liability_limit();
    if current >= recommended {
        return None;
    }
    Some(
        RiskFactor::builder(
            NAME,
            RiskCategory::CoverageGaps,
            "Liability coverage undersized for household assets",
        )
        .severity(Severity::High)
        .urgency(Urgency::High)
        .kind(FactorKind::Gap)
        .description(format!(
            "Current liability limit of {} is below the {} suggested by income and assets.",
            format_money(current),
            format_money(recommended)
        ))
        .recommendation(format!(
            "Increase liability protection to {} or add an umbrella policy.",
            format_money(recommended)
        ))
        .estimated_cost(recommended - current)
        .tag("asset-protection")
        .build(),
    )
}
