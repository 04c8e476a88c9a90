use chrono::{Local, Months, NaiveDate};

use super::{format_money, Analyzer};
use crate::classifier::ClassificationResult;
use crate::error::AnalyzerError;
use crate::policy::{PolicyData, RiskTolerance, UserProfile};
use crate::risk::scoring::SeverityWeights;
use crate::risk::types::{AnalyzerOutput, FactorKind, RiskCategory, RiskFactor, Severity, Urgency};

const NAME: &str = "deductible";

pub const STANDARD_TIERS: [f64; 5] = [250.0, 500.0, 1_000.0, 2_500.0, 5_000.0];
/// Share of the annual premium saved (or added) per $1,000 of deductible change.
const PREMIUM_RATE_PER_THOUSAND: f64 = 0.15;
const NOTIONAL_PREMIUM: f64 = 1_200.0;
const AFFORDABILITY_SHARE: f64 = 0.5;
const CLAIM_WINDOW_MONTHS: u32 = 60;
const FREQUENT_CLAIMS: usize = 2;
const HIGH_AVERAGE_DEDUCTIBLE: f64 = 1_000.0;
const LOW_DEDUCTIBLE: f64 = 500.0;

/// Deductible affordability, tier optimization and claim-history fit.
pub struct DeductibleAnalyzer {
    reference_date: Option<NaiveDate>,
}

impl Default for DeductibleAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeductibleAnalyzer {
    pub fn new() -> Self {
        DeductibleAnalyzer {
            reference_date: None,
        }
    }

    /// Pins "today" for the claim-history window.
    pub fn with_reference_date(date: NaiveDate) -> Self {
        DeductibleAnalyzer {
            reference_date: Some(date),
        }
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }
}

impl Analyzer for DeductibleAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights {
            critical: 25,
            high: 20,
            medium: 15,
            low: 5,
        }
    }

    fn analyze(
        &self,
        policy: &PolicyData,
        _classification: &ClassificationResult,
        profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        let deductible = policy.effective_deductible();
        let premium = if policy.annual_premium > 0.0 {
            policy.annual_premium
        } else {
            NOTIONAL_PREMIUM
        };

        let mut risks = Vec::new();
        let mut tier_raised = false;
        if deductible > 0.0 {
            risks.extend(check_affordability(deductible, profile));
            if let Some(factor) = check_tier(deductible, premium, profile) {
                tier_raised = factor.kind == FactorKind::Opportunity;
                risks.push(factor);
            }
        }
        if let Some(factor) = check_complexity(policy) {
            risks.push(factor);
        }
        if let Some(factor) = check_claim_history(policy, premium, profile, self.today()) {
            // The tier suggestion already covers raising the deductible.
            if !(tier_raised && factor.kind == FactorKind::Opportunity) {
                risks.push(factor);
            }
        }

        let summary = if deductible > 0.0 {
            format!(
                "Deductible {} reviewed; {} findings",
                format_money(deductible),
                risks.len()
            )
        } else {
            "No deductible found on the policy".to_string()
        };
        Ok(AnalyzerOutput { risks, summary })
    }
}

/// Annual premium change for moving the deductible from `from` to `to`.
/// Positive when the move saves money.
pub fn premium_delta(premium: f64, from: f64, to: f64) -> f64 {
    premium * PREMIUM_RATE_PER_THOUSAND * (to - from) / 1_000.0
}

fn check_affordability(deductible: f64, profile: &UserProfile) -> Vec<RiskFactor> {
    let mut risks = Vec::new();

    if let Some(fund) = profile.emergency_fund {
        if deductible > fund {
            risks.push(
                RiskFactor::builder(
                    NAME,
                    RiskCategory::DeductibleRisks,
                    "Deductible exceeds emergency fund",
                )
                .severity(Severity::High)
                .urgency(Urgency::High)
                .description(format!(
                    "A {} deductible is more than the {} emergency fund can cover.",
                    format_money(deductible),
                    format_money(fund)
                ))
                .recommendation(
                    "Lower the deductible or build the emergency fund to cover it.",
                )
                .estimated_cost(deductible - fund)
                .tag("affordability")
                .build(),
            );
        }
    }

    let monthly = profile.monthly_income();
    if monthly > 0.0 && deductible > monthly {
        risks.push(
            RiskFactor::builder(
                NAME,
                RiskCategory::DeductibleRisks,
                "Deductible exceeds one month of income",
            )
            .severity(Severity::Medium)
            .urgency(Urgency::Medium)
            .description(format!(
                "A {} deductible is more than monthly income of {}.",
                format_money(deductible),
                format_money(monthly)
            ))
            .recommendation("Make sure a claim would not strain monthly cash flow.")
            .tag("affordability")
            .build(),
        );
    }

    risks
}

/// The tier the household should move toward, if any.
fn target_tier(deductible: f64, tolerance: RiskTolerance, ceiling: f64) -> Option<f64> {
    let affordable: Vec<f64> = STANDARD_TIERS
        .iter()
        .copied()
        .filter(|tier| *tier <= ceiling)
        .collect();
    let highest_affordable = affordable.last().copied().unwrap_or(STANDARD_TIERS[0]);

    if deductible > ceiling {
        return Some(highest_affordable.min(deductible));
    }
    let target = match tolerance {
        RiskTolerance::High => highest_affordable,
        RiskTolerance::Medium => affordable
            .iter()
            .copied()
            .find(|tier| *tier > deductible)
            .unwrap_or(deductible),
        RiskTolerance::Low => deductible,
    };
    Some(target)
}

fn check_tier(deductible: f64, premium: f64, profile: &UserProfile) -> Option<RiskFactor> {
    let fund = profile.emergency_fund?;
    let ceiling = fund * AFFORDABILITY_SHARE;
    let target = target_tier(deductible, profile.tolerance(), ceiling)?;
    if (target - deductible).abs() < 1.0 {
        return None;
    }
    let delta = premium_delta(premium, deductible, target);

    let factor = if target > deductible {
        RiskFactor::builder(
            NAME,
            RiskCategory::Optimization,
            format!("Raise deductible to {}", format_money(target)),
        )
        .severity(Severity::Low)
        .urgency(Urgency::Low)
        .kind(FactorKind::Opportunity)
        .description(format!(
            "Moving from {} to {} stays within the emergency fund and saves about {} a year.",
            format_money(deductible),
            format_money(target),
            format_money(delta)
        ))
        .recommendation(format!("Request a quote at a {} deductible.", format_money(target)))
        .potential_savings(delta)
        .tag("deductible-tier")
        .build()
    } else {
        RiskFactor::builder(
            NAME,
            RiskCategory::DeductibleRisks,
            format!("Lower deductible to {}", format_money(target)),
        )
        .severity(Severity::Medium)
        .urgency(Urgency::Medium)
        .description(format!(
            "A {} deductible is above half the emergency fund; {} would cost about {} more a year.",
            format_money(deductible),
            format_money(target),
            format_money(-delta)
        ))
        .recommendation(format!("Consider a {} deductible.", format_money(target)))
        .estimated_cost(-delta)
        .tag("deductible-tier")
        .build()
    };
    Some(factor)
}

fn check_complexity(policy: &PolicyData) -> Option<RiskFactor> {
    let distinct = policy.distinct_deductibles();
    if distinct.len() <= 2 {
        return None;
    }
    Some(
        RiskFactor::builder(NAME, RiskCategory::DeductibleRisks, "Multiple deductibles")
            .severity(Severity::Low)
            .urgency(Urgency::Low)
            .kind(FactorKind::Awareness)
            .description(format!(
                "The policy carries {} different deductibles, which makes out-of-pocket costs hard to predict.",
                distinct.len()
            ))
            .recommendation("Align deductibles across coverage lines where possible.")
            .tag("complexity")
            .build(),
    )
}

fn check_claim_history(
    policy: &PolicyData,
    premium: f64,
    profile: &UserProfile,
    today: NaiveDate,
) -> Option<RiskFactor> {
    let window_start = today.checked_sub_months(Months::new(CLAIM_WINDOW_MONTHS))?;
    // Undated claims are assumed recent.
    let recent = profile
        .claim_history
        .iter()
        .filter(|claim| claim.parsed_date().map_or(true, |d| d >= window_start))
        .count();

    let deductibles = policy.distinct_deductibles();
    if deductibles.is_empty() {
        return None;
    }
    let average = deductibles.iter().sum::<f64>() / deductibles.len() as f64;

    if recent >= FREQUENT_CLAIMS && average > HIGH_AVERAGE_DEDUCTIBLE {
        return Some(
            RiskFactor::builder(
                NAME,
                RiskCategory::DeductibleRisks,
                "High deductible with frequent claims",
            )
            .severity(Severity::Medium)
            .urgency(Urgency::Medium)
            .description(format!(
                "{} claims in the last five years against an average deductible of {}.",
                recent,
                format_money(average)
            ))
            .recommendation("A lower deductible may cost less overall given claim frequency.")
            .estimated_cost(average * recent as f64)
            .tag("claims-history")
            .build(),
        );
    }

    // An empty profile says nothing about claims.
    let effective = policy.effective_deductible();
    if profile.populated_fields() > 0
        && profile.claim_history.is_empty()
        && effective <= LOW_DEDUCTIBLE
    {
        let savings = premium_delta(premium, effective, HIGH_AVERAGE_DEDUCTIBLE);
        return Some(
            RiskFactor::builder(
                NAME,
                RiskCategory::Optimization,
                "Low deductible with no claims",
            )
            .severity(Severity::Low)
            .urgency(Urgency::Low)
            .kind(FactorKind::Opportunity)
            .description(format!(
                "No claims on record with a {} deductible; raising it could save about {} a year.",
                format_money(effective),
                format_money(savings)
            ))
            .recommendation(format!(
                "Consider a {} deductible.",
                format_money(HIGH_AVERAGE_DEDUCTIBLE)
            ))
            .potential_savings(savings)
            .tag("claims-history")
            .build(),
        );
    }
    None
}
