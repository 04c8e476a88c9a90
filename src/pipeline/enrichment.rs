//! Generative summary seam. The pipeline never depends on this stage succeeding.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::ClassificationResult;
use crate::error::EnrichmentError;
use crate::policy::{PolicyData, PolicyType};
use crate::risk::types::{AggregatedRiskProfile, Priority, RiskLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub policy_type: PolicyType,
    pub insurer: Option<String>,
    pub annual_premium: f64,
    pub deductible: f64,
    pub coverages: Vec<String>,
    pub total_liability_limits: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub critical_issues: Vec<String>,
    pub top_risks: Vec<String>,
    pub opportunities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub policy: PolicySnapshot,
    pub classification: ClassificationResult,
    pub risk: RiskSnapshot,
}

const TOP_RISKS: usize = 5;

impl EnrichmentRequest {
    pub fn build(
        policy: &PolicyData,
        policy_type: PolicyType,
        classification: &ClassificationResult,
        profile: &AggregatedRiskProfile,
    ) -> Self {
        let mut ranked: Vec<_> = profile.risks.iter().collect();
        ranked.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));

        EnrichmentRequest {
            policy: PolicySnapshot {
                policy_type,
                insurer: policy.insurer.clone(),
                annual_premium: policy.annual_premium,
                deductible: policy.effective_deductible(),
                coverages: policy.coverages.iter().map(|c| c.name.clone()).collect(),
                total_liability_limits: policy.total_liability_limits(),
            },
            classification: classification.clone(),
            risk: RiskSnapshot {
                overall_score: profile.overall_score,
                risk_level: profile.risk_level,
                critical_issues: profile.critical_issues.iter().map(|r| r.title.clone()).collect(),
                top_risks: ranked
                    .iter()
                    .take(TOP_RISKS)
                    .map(|r| r.title.clone())
                    .collect(),
                opportunities: profile.opportunities.iter().map(|r| r.title.clone()).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub summary: String,
    /// Adapter's own confidence in [0, 1].
    pub confidence: f64,
    pub recommendations: Vec<EnrichedRecommendation>,
    pub critical_findings: Vec<String>,
    /// False for the locally generated fallback.
    pub ai_generated: bool,
}

pub trait EnrichmentAdapter: Send + Sync {
    fn enrich<'a>(
        &'a self,
        request: &'a EnrichmentRequest,
    ) -> BoxFuture<'a, Result<EnrichmentResult, EnrichmentError>>;
}

/// Calls the adapter under a deadline and rejects malformed answers.
pub async fn enrich_with_timeout(
    adapter: &dyn EnrichmentAdapter,
    request: &EnrichmentRequest,
    timeout: Duration,
) -> Result<EnrichmentResult, EnrichmentError> {
    let result = tokio::time::timeout(timeout, adapter.enrich(request))
        .await
        .map_err(|_| EnrichmentError::Timeout(timeout.as_millis() as u64))??;

    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(EnrichmentError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            result.confidence
        )));
    }
    if result.summary.trim().is_empty() {
        return Err(EnrichmentError::InvalidResponse("empty summary".into()));
    }
    Ok(result)
}

/// Summary assembled from the risk profile alone.
pub fn fallback_enrichment(request: &EnrichmentRequest) -> EnrichmentResult {
    let risk = &request.risk;
    let mut summary = format!(
        "Automated review of this {} policy found a {} risk level (score {:.1}).",
        request.policy.policy_type,
        risk.risk_level.as_str(),
        risk.overall_score
    );
    if !risk.critical_issues.is_empty() {
        summary.push_str(&format!(
            " Critical issues: {}.",
            risk.critical_issues.join("; ")
        ));
    }
    if !risk.opportunities.is_empty() {
        summary.push_str(&format!(
            " Opportunities: {}.",
            risk.opportunities.join("; ")
        ));
    }
    summary.push_str(" A detailed narrative review was not available.");

    EnrichmentResult {
        summary,
        confidence: 0.0,
        recommendations: Vec::new(),
        critical_findings: Vec::new(),
        ai_generated: false,
    }
}
