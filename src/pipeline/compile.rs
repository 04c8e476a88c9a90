use serde::{Deserialize, Serialize};

use super::enrichment::EnrichmentResult;
use super::intake::DocumentQuality;
use crate::classifier::ClassificationResult;
use crate::ops::StageRecord;
use crate::policy::{PolicyData, PolicyType};
use crate::risk::scoring::{calculate_confidence, ConfidenceAssessment, ConfidenceInputs};
use crate::risk::types::{AggregatedRiskProfile, Priority, RiskLevel};

const BASE_SCORE: f64 = 75.0;
const MAX_PLAN_RECOMMENDATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    RiskEngine,
    Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedRecommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub actions: Vec<String>,
    pub source: RecommendationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub step: usize,
    pub action: String,
    pub priority: Priority,
    pub related_factor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub resolved_type: PolicyType,
    pub coverage_count: usize,
    pub annual_premium: f64,
    pub deductible: f64,
    pub total_liability_limits: f64,
    pub field_count: usize,
}

/// The report handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveResult {
    pub analysis_id: String,
    pub classification: ClassificationResult,
    pub risk: AggregatedRiskProfile,
    pub enrichment: EnrichmentResult,
    pub overall_score: u8,
    pub rating: String,
    pub completeness: u8,
    pub reliability: u8,
    pub key_insights: Vec<String>,
    pub prioritized_recommendations: Vec<PrioritizedRecommendation>,
    pub action_plan: Vec<ActionItem>,
    pub confidence: ConfidenceAssessment,
    pub document_quality: Option<DocumentQuality>,
    pub stage_statuses: Vec<StageRecord>,
    pub policy_summary: PolicySummary,
}

/// Which stages produced real output rather than a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageOutcomes {
    pub document_ok: bool,
    pub classification_confident: bool,
    pub risk_ok: bool,
    pub enrichment_ok: bool,
}

pub struct CompilationInputs<'a> {
    pub analysis_id: &'a str,
    pub policy: &'a PolicyData,
    pub policy_type: PolicyType,
    pub profile_fields: usize,
    pub classification: ClassificationResult,
    pub risk: AggregatedRiskProfile,
    pub enrichment: EnrichmentResult,
    pub outcomes: StageOutcomes,
    pub document_quality: Option<DocumentQuality>,
    pub stage_statuses: Vec<StageRecord>,
}

pub fn overall_score(risk_level: RiskLevel, enrichment_confidence: Option<f64>) -> u8 {
    let level_adjustment = match risk_level {
        RiskLevel::Minimal | RiskLevel::Low => 10.0,
        RiskLevel::Medium => 0.0,
        RiskLevel::High => -10.0,
        RiskLevel::Critical => -20.0,
    };
    let ai_adjustment = enrichment_confidence
        .map(|confidence| (confidence - 0.5) * 10.0)
        .unwrap_or(0.0);
    (BASE_SCORE + level_adjustment + ai_adjustment)
        .round()
        .clamp(0.0, 100.0) as u8
}

pub fn letter_rating(score: u8) -> &'static str {
    match score {
        90..=u8::MAX => "A+",
        85..=89 => "A",
        80..=84 => "A-",
        75..=79 => "B+",
        70..=74 => "B",
        65..=69 => "C+",
        60..=64 => "C",
        55..=59 => "D",
        _ => "F",
    }
}

pub fn completeness(outcomes: &StageOutcomes) -> u8 {
    [
        outcomes.document_ok,
        outcomes.classification_confident,
        outcomes.risk_ok,
        outcomes.enrichment_ok,
    ]
    .iter()
    .filter(|ok| **ok)
    .count() as u8
        * 25
}

pub fn reliability(outcomes: &StageOutcomes) -> u8 {
    let mut score: i32 = 100;
    if !outcomes.document_ok {
        score -= 30;
    }
    if !outcomes.classification_confident {
        score -= 20;
    }
    if !outcomes.risk_ok {
        score -= 25;
    }
    score.clamp(0, 100) as u8
}

fn key_insights(risk: &AggregatedRiskProfile, enrichment: &EnrichmentResult) -> Vec<String> {
    let mut insights: Vec<String> = risk
        .critical_issues
        .iter()
        .map(|issue| format!("Critical: {}", issue.title))
        .collect();
    for opportunity in &risk.opportunities {
        match opportunity.potential_savings {
            Some(savings) => insights.push(format!(
                "Opportunity: {} (about ${:.0} a year)",
                opportunity.title, savings
            )),
            None => insights.push(format!("Opportunity: {}", opportunity.title)),
        }
    }
    if enrichment.ai_generated {
        for finding in &enrichment.critical_findings {
            insights.push(format!("Flagged in review: {}", finding));
        }
    }
    if insights.is_empty() {
        insights.push(format!(
            "No critical issues found; overall risk is {}",
            risk.risk_level.as_str()
        ));
    }
    insights
}

fn prioritized_recommendations(
    risk: &AggregatedRiskProfile,
    enrichment: &EnrichmentResult,
) -> Vec<PrioritizedRecommendation> {
    let mut merged: Vec<PrioritizedRecommendation> = risk
        .recommendations
        .iter()
        .map(|rec| PrioritizedRecommendation {
            title: rec.title.clone(),
            description: rec.description.clone(),
            priority: rec.priority,
            actions: rec.actions.clone(),
            source: RecommendationSource::RiskEngine,
        })
        .collect();
    for rec in &enrichment.recommendations {
        if merged.iter().any(|m| m.title.eq_ignore_ascii_case(&rec.title)) {
            continue;
        }
        merged.push(PrioritizedRecommendation {
            title: rec.title.clone(),
            description: rec.description.clone(),
            priority: rec.priority,
            actions: Vec::new(),
            source: RecommendationSource::Enrichment,
        });
    }
    // Stable sort keeps engine recommendations ahead of enrichment ones at equal priority.
    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}

fn action_plan(
    risk: &AggregatedRiskProfile,
    recommendations: &[PrioritizedRecommendation],
) -> Vec<ActionItem> {
    let mut plan: Vec<ActionItem> = Vec::new();
    for issue in &risk.critical_issues {
        let action = if issue.recommendation.is_empty() {
            format!("Resolve: {}", issue.title)
        } else {
            issue.recommendation.clone()
        };
        plan.push(ActionItem {
            step: plan.len() + 1,
            action,
            priority: Priority::Critical,
            related_factor: Some(issue.id.clone()),
        });
    }
    for rec in recommendations.iter().take(MAX_PLAN_RECOMMENDATIONS) {
        let action = rec.actions.first().cloned().unwrap_or_else(|| rec.title.clone());
        if plan.iter().any(|item| item.action == action) {
            continue;
        }
        plan.push(ActionItem {
            step: plan.len() + 1,
            action,
            priority: rec.priority,
            related_factor: None,
        });
    }
    plan
}

pub fn compile(inputs: CompilationInputs<'_>) -> ComprehensiveResult {
    let outcomes = inputs.outcomes;
    let enrichment_confidence = outcomes
        .enrichment_ok
        .then_some(inputs.enrichment.confidence);
    let score = overall_score(inputs.risk.risk_level, enrichment_confidence);

    let confidence = calculate_confidence(&ConfidenceInputs {
        profile_fields: inputs.profile_fields,
        extracted_fields: inputs.policy.field_count(),
        enrichment_succeeded: outcomes.enrichment_ok,
        document_poor: inputs.document_quality == Some(DocumentQuality::Poor),
        successful_analyzers: inputs.risk.successful_analyzers(),
    });

    let recommendations = prioritized_recommendations(&inputs.risk, &inputs.enrichment);
    let plan = action_plan(&inputs.risk, &recommendations);
    let insights = key_insights(&inputs.risk, &inputs.enrichment);

    ComprehensiveResult {
        analysis_id: inputs.analysis_id.to_string(),
        overall_score: score,
        rating: letter_rating(score).to_string(),
        completeness: completeness(&outcomes),
        reliability: reliability(&outcomes),
        key_insights: insights,
        prioritized_recommendations: recommendations,
        action_plan: plan,
        confidence,
        document_quality: inputs.document_quality,
        stage_statuses: inputs.stage_statuses,
        policy_summary: PolicySummary {
            resolved_type: inputs.policy_type,
            coverage_count: inputs.policy.coverages.len(),
            annual_premium: inputs.policy.annual_premium,
            deductible: inputs.policy.effective_deductible(),
            total_liability_limits: inputs.policy.total_liability_limits(),
            field_count: inputs.policy.field_count(),
        },
        classification: inputs.classification,
        risk: inputs.risk,
        enrichment: inputs.enrichment,
    }
}
