use std::sync::Arc;

use super::{format_money, round_up_to, rule_for, Analyzer};
use crate::classifier::{ClassificationResult, PolicyRules, PolicyTypeRule};
use crate::error::AnalyzerError;
use crate::policy::{CoverageLine, PolicyData, PolicyType, RiskTolerance, UserProfile};
use crate::risk::scoring::SeverityWeights;
use crate::risk::types::{AnalyzerOutput, FactorKind, RiskCategory, RiskFactor, Severity, Urgency};

const NAME: &str = "liability";

const BODILY_INJURY_GAP_THRESHOLD: f64 = 50_000.0;
const PROPERTY_DAMAGE_GAP_THRESHOLD: f64 = 25_000.0;
const CRITICAL_EXPOSURE: f64 = 100_000.0;
const INCOME_MULTIPLE: f64 = 3.0;

const UMBRELLA_ASSETS: f64 = 500_000.0;
const UMBRELLA_INCOME: f64 = 100_000.0;
const UMBRELLA_INCOME_LOW_TOLERANCE: f64 = 75_000.0;
const UMBRELLA_UNDERLYING: f64 = 300_000.0;
const UMBRELLA_MIN_CONDITIONS: usize = 2;

/// Checks liability limits against the policy type, the household balance sheet and the
/// statutory floor.
pub struct LiabilityAnalyzer {
    rules: Arc<PolicyRules>,
}

impl LiabilityAnalyzer {
    pub fn new(rules: Arc<PolicyRules>) -> Self {
        LiabilityAnalyzer { rules }
    }
}

impl Analyzer for LiabilityAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights {
            critical: 30,
            high: 20,
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
        let rule = rule_for(NAME, &self.rules, policy_type)?;

        let mut risks = Vec::new();
        if let Some(rule) = rule {
            risks.extend(check_limit_adequacy(policy, profile, policy_type, rule));
            if let Some(factor) = check_statutory_minimum(policy, policy_type, rule) {
                risks.push(factor);
            }
        }
        risks.extend(check_asset_protection(policy, profile));
        if policy_type != PolicyType::Umbrella {
            if let Some(factor) = check_umbrella(policy, profile) {
                risks.push(factor);
            }
        }
        if rule.is_some_and(|r| r.base_liability.is_some()) {
            risks.push(exclusions_notice());
        }

        let summary = format!(
            "Total liability limits {} across {} lines; {} findings",
            format_money(policy.total_liability_limits()),
            policy.coverages.iter().filter(|c| c.is_liability()).count(),
            risks.len()
        );
        Ok(AnalyzerOutput { risks, summary })
    }
}

/// Bodily injury line, or the first liability line for policies that don't split limits.
fn primary_line(policy: &PolicyData) -> Option<&CoverageLine> {
    policy
        .bodily_injury()
        .or_else(|| policy.coverages.iter().find(|c| c.is_liability() && c.limit > 0.0))
}

fn recommended_bodily_injury(rule: &PolicyTypeRule, profile: &UserProfile) -> f64 {
    let base = rule
        .recommended_limits
        .map(|limits| limits.bodily_injury)
        .unwrap_or(0.0);
    // Households with more to lose need per-person limits that track their assets.
    let by_assets = match profile.tolerance() {
        RiskTolerance::Low => profile.total_assets(),
        RiskTolerance::Medium => profile.total_assets() * 0.75,
        RiskTolerance::High => profile.total_assets() * 0.5,
    };
    round_up_to(base.max(by_assets.min(1_000_000.0)), 50_000.0)
}

fn check_limit_adequacy(
    policy: &PolicyData,
    profile: &UserProfile,
    policy_type: PolicyType,
    rule: &PolicyTypeRule,
) -> Vec<RiskFactor> {
    let mut risks = Vec::new();

    if let Some(line) = primary_line(policy).filter(|l| l.limit > 0.0) {
        let recommended = recommended_bodily_injury(rule, profile);
        if recommended > line.limit {
            risks.push(limit_gap_factor(
                &line.name,
                line.limit,
                recommended,
                BODILY_INJURY_GAP_THRESHOLD,
            ));
        }
    }

    if policy_type == PolicyType::Auto {
        let recommended = rule
            .recommended_limits
            .map(|limits| limits.property_damage)
            .unwrap_or(0.0);
        if let Some(line) = policy.property_damage().filter(|l| l.limit > 0.0) {
            if recommended > line.limit {
                risks.push(limit_gap_factor(
                    &line.name,
                    line.limit,
                    recommended,
                    PROPERTY_DAMAGE_GAP_THRESHOLD,
                ));
            }
        }
    }

    risks
}

fn limit_gap_factor(name: &str, current: f64, recommended: f64, threshold: f64) -> RiskFactor {
    let gap = recommended - current;
    let (severity, urgency) = if gap > threshold {
        (Severity::High, Urgency::High)
    } else {
        (Severity::Medium, Urgency::Medium)
    };
    RiskFactor::builder(NAME, RiskCategory::LiabilityLimits, format!("{} limit too low", name))
        .severity(severity)
        .urgency(urgency)
        .description(format!(
            "{} is {} against a recommended {} ({} short).",
            name,
            format_money(current),
            format_money(recommended),
            format_money(gap)
        ))
        .recommendation(format!("Raise {} to {}.", name, format_money(recommended)))
        .estimated_cost(gap)
        .tag("limits")
        .build()
}

fn check_statutory_minimum(
    policy: &PolicyData,
    policy_type: PolicyType,
    rule: &PolicyTypeRule,
) -> Option<RiskFactor> {
    if policy_type != PolicyType::Auto {
        return None;
    }
    let minimum = rule.statutory_minimum?;
    let line = policy.bodily_injury().filter(|l| l.limit > 0.0)?;
    let per_person_short = line.limit < minimum.per_person;
    let per_accident_short = line
        .per_accident_limit
        .is_some_and(|limit| limit < minimum.per_accident);
    if !per_person_short && !per_accident_short {
        return None;
    }
    Some(
        RiskFactor::builder(
            NAME,
            RiskCategory::Compliance,
            "Bodily injury below statutory minimum",
        )
        .severity(Severity::Critical)
        .urgency(Urgency::Immediate)
        .kind(FactorKind::Compliance)
        .description(format!(
            "Bodily injury limits of {} are below the {}/{} minimum.",
            format_money(line.limit),
            format_money(minimum.per_person),
            format_money(minimum.per_accident)
        ))
        .recommendation("Raise bodily injury limits to at least the statutory minimum immediately.")
        .tag("statutory")
        .build(),
    )
}

fn check_asset_protection(policy: &PolicyData, profile: &UserProfile) -> Vec<RiskFactor> {
    let mut risks = Vec::new();
    let limits = policy.total_liability_limits();

    let assets = profile.total_assets();
    if assets > 0.0 && assets > limits {
        let exposed = assets - limits;
        let (severity, urgency) = if exposed > CRITICAL_EXPOSURE {
            (Severity::Critical, Urgency::High)
        } else {
            (Severity::High, Urgency::Medium)
        };
        risks.push(
            RiskFactor::builder(
                NAME,
                RiskCategory::LiabilityLimits,
                "Assets exceed liability limits",
            )
            .severity(severity)
            .urgency(urgency)
            .description(format!(
                "{} of assets are exposed beyond total liability limits of {}.",
                format_money(exposed),
                format_money(limits)
            ))
            .recommendation("Increase liability limits or add umbrella coverage to protect assets.")
            .estimated_cost(exposed)
            .tag("asset-protection")
            .build(),
        );
    }

    let income = profile.income();
    if income > 0.0 && limits < income * INCOME_MULTIPLE {
        risks.push(
            RiskFactor::builder(
                NAME,
                RiskCategory::LiabilityLimits,
                "Liability limits low relative to income",
            )
            .severity(Severity::High)
            .urgency(Urgency::Medium)
            .description(format!(
                "Total liability limits of {} are under three years of income ({}).",
                format_money(limits),
                format_money(income * INCOME_MULTIPLE)
            ))
            .recommendation("Future wages can be garnished in a judgment; size limits to income.")
            .estimated_cost(income * INCOME_MULTIPLE - limits)
            .tag("income-protection")
            .build(),
        );
    }

    risks
}

fn umbrella_conditions(policy: &PolicyData, profile: &UserProfile) -> Vec<&'static str> {
    let income_threshold = if profile.tolerance() == RiskTolerance::Low {
        UMBRELLA_INCOME_LOW_TOLERANCE
    } else {
        UMBRELLA_INCOME
    };
    let underlying = policy.primary_liability_limit();

    let checks = [
        (profile.total_assets() >= UMBRELLA_ASSETS, "high assets"),
        (profile.income() >= income_threshold, "high income"),
        (profile.has_pool, "pool"),
        (profile.has_rental_property, "rental property"),
        (profile.has_teen_drivers, "teen drivers"),
        (
            underlying > 0.0 && underlying < UMBRELLA_UNDERLYING,
            "low underlying limits",
        ),
    ];
    checks
        .iter()
        .filter(|(met, _)| *met)
        .map(|(_, label)| *label)
        .collect()
}

fn check_umbrella(policy: &PolicyData, profile: &UserProfile) -> Option<RiskFactor> {
    let conditions = umbrella_conditions(policy, profile);
    if conditions.len() < UMBRELLA_MIN_CONDITIONS {
        return None;
    }
    Some(
        RiskFactor::builder(NAME, RiskCategory::LiabilityLimits, "Umbrella policy recommended")
            .severity(Severity::Medium)
            .urgency(Urgency::Medium)
            .kind(FactorKind::Opportunity)
            .description(format!(
                "Umbrella coverage is worth considering: {}.",
                conditions.join(", ")
            ))
            .recommendation("Quote a $1,000,000 personal umbrella policy.")
            .tag("umbrella")
            .build(),
    )
}

fn exclusions_notice() -> RiskFactor {
    RiskFactor::builder(NAME, RiskCategory::PolicyTerms, "Standard liability exclusions apply")
        .severity(Severity::Low)
        .urgency(Urgency::Low)
        .kind(FactorKind::Awareness)
        .description("Intentional acts and business activities are usually excluded.")
        .recommendation("Review the exclusions section with your agent.")
        .tag("exclusions")
        .build()
}
