//! Pure scoring helpers. Nothing in here reads clocks, globals or the environment, so the
//! same factors always produce the same numbers.

use serde::{Deserialize, Serialize};

use super::types::{
    CategoryBreakdown, FactorKind, FinancialImpact, Priority, RiskCategory, RiskFactor, RiskLevel,
    Severity, Urgency,
};

pub const CRITICAL_WEIGHT: f64 = 10.0;
pub const MAX_CATEGORY_MULTIPLIER: f64 = 1.3;
pub const OPPORTUNITY_MULTIPLIER: f64 = 0.5;
/// Worst case is five critical compliance findings. Independent of the actual factor count,
/// so very long factor lists saturate at 100.
const WORST_CASE_FACTORS: f64 = 5.0;

pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => CRITICAL_WEIGHT,
        Severity::High => 7.0,
        Severity::Medium => 4.0,
        Severity::Low => 2.0,
        Severity::Minimal => 1.0,
    }
}

pub fn category_multiplier(category: RiskCategory) -> f64 {
    match category {
        RiskCategory::CoverageGaps => 1.2,
        RiskCategory::LiabilityLimits => 1.1,
        RiskCategory::DeductibleRisks => 0.9,
        RiskCategory::PolicyTerms => 0.8,
        RiskCategory::Compliance => MAX_CATEGORY_MULTIPLIER,
        RiskCategory::FinancialRisk => 1.1,
        RiskCategory::Optimization => OPPORTUNITY_MULTIPLIER,
    }
}

/// Opportunities reduce risk rather than add it, so they always count at the optimization
/// rate whatever category they were filed under.
pub fn factor_multiplier(factor: &RiskFactor) -> f64 {
    if factor.kind == FactorKind::Opportunity {
        OPPORTUNITY_MULTIPLIER
    } else {
        category_multiplier(factor.category)
    }
}

pub fn weighted_factor_score(factor: &RiskFactor) -> f64 {
    severity_weight(factor.severity) * factor_multiplier(factor)
}

/// Overall 0-100 risk score.
pub fn calculate_risk_score(factors: &[RiskFactor]) -> f64 {
    let normalizer = CRITICAL_WEIGHT * MAX_CATEGORY_MULTIPLIER * WORST_CASE_FACTORS;
    let total: f64 = factors.iter().map(weighted_factor_score).sum();
    let scaled = (total / normalizer * 100.0).clamp(0.0, 100.0);
    (scaled * 10.0).round() / 10.0
}

pub fn risk_level_for_score(score: f64) -> RiskLevel {
    if score >= 80.0 {
        RiskLevel::Critical
    } else if score >= 60.0 {
        RiskLevel::High
    } else if score >= 40.0 {
        RiskLevel::Medium
    } else if score >= 20.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Minimal
    }
}

/// Per-analyzer weights used for the analyzer-local score.
#[derive(Debug, Clone, Copy)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Minimal => 0,
        }
    }
}

pub fn analyzer_local_score(factors: &[RiskFactor], weights: &SeverityWeights) -> u8 {
    let total: u32 = factors.iter().map(|f| weights.weight(f.severity)).sum();
    total.min(100) as u8
}

/// Severity rows (minimal..critical) by urgency columns (low..immediate).
const PRIORITY_MATRIX: [[Priority; 4]; 5] = [
    [Priority::Low, Priority::Low, Priority::Low, Priority::Medium],
    [Priority::Low, Priority::Low, Priority::Medium, Priority::Medium],
    [Priority::Medium, Priority::Medium, Priority::High, Priority::High],
    [Priority::High, Priority::High, Priority::High, Priority::Critical],
    [Priority::Critical, Priority::Critical, Priority::Critical, Priority::Critical],
];

pub fn priority_for(severity: Severity, urgency: Urgency) -> Priority {
    let row = match severity {
        Severity::Minimal => 0,
        Severity::Low => 1,
        Severity::Medium => 2,
        Severity::High => 3,
        Severity::Critical => 4,
    };
    let column = match urgency {
        Urgency::Low => 0,
        Urgency::Medium => 1,
        Urgency::High => 2,
        Urgency::Immediate => 3,
    };
    PRIORITY_MATRIX[row][column]
}

/// Breakdown in canonical category order; categories without factors are omitted.
pub fn aggregate_by_category(factors: &[RiskFactor]) -> Vec<CategoryBreakdown> {
    RiskCategory::ALL
        .iter()
        .filter_map(|category| {
            let members: Vec<&RiskFactor> =
                factors.iter().filter(|f| f.category == *category).collect();
            let highest = members.iter().map(|f| f.severity).max()?;
            let weighted: f64 = members.iter().map(|f| weighted_factor_score(f)).sum();
            Some(CategoryBreakdown {
                category: *category,
                count: members.len(),
                highest_severity: highest,
                weighted_score: (weighted * 100.0).round() / 100.0,
            })
        })
        .collect()
}

pub fn financial_impact(factors: &[RiskFactor]) -> FinancialImpact {
    let total_estimated_cost: f64 = factors.iter().filter_map(|f| f.estimated_cost).sum();
    let total_potential_savings: f64 = factors.iter().filter_map(|f| f.potential_savings).sum();
    FinancialImpact {
        total_estimated_cost,
        total_potential_savings,
        net_exposure: total_estimated_cost - total_potential_savings,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub name: String,
    pub impact: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub score: u8,
    pub level: ConfidenceLevel,
    pub factors: Vec<ConfidenceFactor>,
}

/// Everything the confidence model looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    pub profile_fields: usize,
    pub extracted_fields: usize,
    pub enrichment_succeeded: bool,
    pub document_poor: bool,
    pub successful_analyzers: usize,
}

pub fn calculate_confidence(inputs: &ConfidenceInputs) -> ConfidenceAssessment {
    let mut score: i32 = 100;
    let mut factors = Vec::new();
    let mut apply = |impact: i32, name: &str, description: String| {
        score += impact;
        factors.push(ConfidenceFactor {
            name: name.to_string(),
            impact,
            description,
        });
    };

    if inputs.profile_fields < 3 {
        apply(
            -20,
            "sparse_profile",
            format!("Only {} profile fields provided", inputs.profile_fields),
        );
    }
    if inputs.extracted_fields < 5 {
        apply(
            -15,
            "limited_extraction",
            format!("Only {} policy fields extracted", inputs.extracted_fields),
        );
    }
    if !inputs.enrichment_succeeded {
        apply(
            -25,
            "no_enrichment",
            "Generative summary unavailable".to_string(),
        );
    }
    if inputs.document_poor {
        apply(-30, "poor_document", "Source document quality is poor".to_string());
    }
    if inputs.successful_analyzers >= 3 {
        apply(
            10,
            "full_analyzer_coverage",
            format!("{} analyzers completed", inputs.successful_analyzers),
        );
    }

    let score = score.clamp(0, 100) as u8;
    let level = if score < 60 {
        ConfidenceLevel::Low
    } else if score < 80 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::High
    };

    ConfidenceAssessment {
        score,
        level,
        factors,
    }
}
