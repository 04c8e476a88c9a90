use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "parallel-analyzers")]
use rayon::prelude::*;

use super::scoring::{
    aggregate_by_category, analyzer_local_score, calculate_risk_score, financial_impact,
    priority_for, risk_level_for_score,
};
use super::types::{
    AggregatedRiskProfile, AnalyzerMetadata, AnalyzerResult, ComplianceStatus, FactorKind,
    Priority, Recommendation, RiskCategory, RiskFactor, Severity, Urgency,
};
use crate::analyzers::{default_analyzers, Analyzer};
use crate::classifier::{ClassificationResult, PolicyRules};
use crate::error::{AnalyzerError, ConfigError, RiskEngineError};
use crate::policy::{PolicyData, UserProfile};

const ENGINE_SOURCE: &str = "risk_engine";

/// Runs the analyzer set and folds the results into one profile.
pub struct RiskEngine {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl RiskEngine {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        RiskEngine { analyzers }
    }

    pub fn with_rules(rules: Arc<PolicyRules>) -> Self {
        Self::new(default_analyzers(rules))
    }

    pub fn with_default_analyzers() -> Result<Self, ConfigError> {
        Ok(Self::with_rules(PolicyRules::shared_default()?))
    }

    pub fn analyzer_names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn analyze_risks(
        &self,
        policy: &PolicyData,
        classification: &ClassificationResult,
        profile: &UserProfile,
    ) -> Result<AggregatedRiskProfile, RiskEngineError> {
        if self.analyzers.is_empty() {
            return Err(RiskEngineError::NoAnalyzers);
        }

        #[cfg(feature = "parallel-analyzers")]
        let results: Vec<AnalyzerResult> = self
            .analyzers
            .par_iter()
            .map(|analyzer| run_analyzer(analyzer.as_ref(), policy, classification, profile))
            .collect();

        #[cfg(not(feature = "parallel-analyzers"))]
        let results: Vec<AnalyzerResult> = self
            .analyzers
            .iter()
            .map(|analyzer| run_analyzer(analyzer.as_ref(), policy, classification, profile))
            .collect();

        if !results.iter().any(|r| r.success) {
            return Err(RiskEngineError::AllAnalyzersFailed {
                attempted: results.len(),
            });
        }
        Ok(aggregate(results))
    }
}

fn run_analyzer(
    analyzer: &dyn Analyzer,
    policy: &PolicyData,
    classification: &ClassificationResult,
    profile: &UserProfile,
) -> AnalyzerResult {
    let name = analyzer.name();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        analyzer.analyze(policy, classification, profile)
    }))
    .unwrap_or_else(|payload| {
        Err(AnalyzerError::Panicked {
            analyzer: name.to_string(),
            message: panic_message(payload.as_ref()),
        })
    });
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(output) => {
            let mut risks = output.risks;
            for risk in &mut risks {
                risk.source = name.to_string();
            }
            let count = |severity: Severity| risks.iter().filter(|r| r.severity == severity).count();
            let metadata = AnalyzerMetadata {
                risk_count: risks.len(),
                critical_count: count(Severity::Critical),
                high_count: count(Severity::High),
                medium_count: count(Severity::Medium),
                low_count: count(Severity::Low),
                duration_ms,
            };
            log::debug!(
                "Analyzer {} produced {} factors in {} ms",
                name,
                risks.len(),
                duration_ms
            );
            AnalyzerResult {
                analyzer: name.to_string(),
                success: true,
                score: analyzer_local_score(&risks, &analyzer.severity_weights()),
                risks,
                summary: output.summary,
                metadata,
                error: None,
            }
        }
        Err(err) => {
            log::warn!("Analyzer {} failed: {}", name, err);
            AnalyzerResult::failed(name, err.to_string(), duration_ms)
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Folds analyzer results into a profile. The result does not depend on the order of
/// `results`.
pub fn aggregate(mut results: Vec<AnalyzerResult>) -> AggregatedRiskProfile {
    results.sort_by(|a, b| a.analyzer.cmp(&b.analyzer));

    let mut risks: Vec<RiskFactor> = results
        .iter()
        .filter(|r| r.success)
        .flat_map(|r| r.risks.iter().cloned())
        .collect();
    risks.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.title.cmp(&b.title)));
    risks.dedup_by(|a, b| a.id == b.id);

    let degraded_analyzers: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.analyzer.clone())
        .collect();

    build_profile(risks, results, degraded_analyzers, None)
}

/// Stand-in profile used when the engine produced nothing usable.
pub fn fallback_profile(reason: &str, analyzers: &[&str]) -> AggregatedRiskProfile {
    let factor = RiskFactor::builder(ENGINE_SOURCE, RiskCategory::PolicyTerms, "Analysis incomplete")
        .severity(Severity::Medium)
        .urgency(Urgency::High)
        .kind(FactorKind::Awareness)
        .description(format!("Risk analysis could not be completed: {}", reason))
        .recommendation("Have a licensed agent review this policy manually.")
        .tag("analysis-incomplete")
        .build();
    let results = analyzers
        .iter()
        .map(|name| AnalyzerResult::failed(name, reason.to_string(), 0))
        .collect();
    build_profile(
        vec![factor],
        results,
        analyzers.iter().map(|n| n.to_string()).collect(),
        Some(ComplianceStatus::ReviewNeeded),
    )
}

fn build_profile(
    risks: Vec<RiskFactor>,
    analyzer_results: Vec<AnalyzerResult>,
    degraded_analyzers: Vec<String>,
    compliance_override: Option<ComplianceStatus>,
) -> AggregatedRiskProfile {
    let overall_score = calculate_risk_score(&risks);
    AggregatedRiskProfile {
        overall_score,
        risk_level: risk_level_for_score(overall_score),
        critical_issues: risks.iter().filter(|r| r.is_critical_issue()).cloned().collect(),
        opportunities: risks
            .iter()
            .filter(|r| r.kind == FactorKind::Opportunity)
            .cloned()
            .collect(),
        compliance_status: compliance_override.unwrap_or_else(|| compliance_status(&risks)),
        recommendations: build_recommendations(&risks),
        category_breakdown: aggregate_by_category(&risks),
        financial_impact: financial_impact(&risks),
        analyzer_results,
        degraded_analyzers,
        risks,
    }
}

pub fn compliance_status(risks: &[RiskFactor]) -> ComplianceStatus {
    let compliance: Vec<&RiskFactor> = risks
        .iter()
        .filter(|r| r.category == RiskCategory::Compliance)
        .collect();
    if compliance.is_empty() {
        ComplianceStatus::Compliant
    } else if compliance.iter().any(|r| r.severity.is_high_or_critical()) {
        ComplianceStatus::NonCompliant
    } else {
        ComplianceStatus::ReviewNeeded
    }
}

/// One recommendation per category with a high or critical factor, most urgent first.
pub fn build_recommendations(risks: &[RiskFactor]) -> Vec<Recommendation> {
    let mut by_category: BTreeMap<RiskCategory, Vec<&RiskFactor>> = BTreeMap::new();
    for risk in risks {
        by_category.entry(risk.category).or_default().push(risk);
    }

    let mut recommendations: Vec<Recommendation> = by_category
        .into_iter()
        .filter_map(|(category, members)| {
            let serious: Vec<&RiskFactor> = members
                .iter()
                .copied()
                .filter(|r| r.severity.is_high_or_critical())
                .collect();
            if serious.is_empty() {
                return None;
            }
            let priority = serious
                .iter()
                .map(|r| priority_for(r.severity, r.urgency))
                .max()
                .unwrap_or(Priority::High);

            let mut actions: Vec<String> = Vec::new();
            for risk in &serious {
                if !risk.recommendation.is_empty() && !actions.contains(&risk.recommendation) {
                    actions.push(risk.recommendation.clone());
                }
            }
            let savings: f64 = members.iter().filter_map(|r| r.potential_savings).sum();

            Some(Recommendation {
                id: format!("rec-{}", category.as_str()),
                category,
                priority,
                title: format!("Address {}", category.display_name().to_lowercase()),
                description: format!(
                    "{} high-impact finding(s): {}",
                    serious.len(),
                    serious
                        .iter()
                        .map(|r| r.title.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
                actions,
                factor_ids: serious.iter().map(|r| r.id.clone()).collect(),
                potential_savings: (savings > 0.0).then_some(savings),
                source: ENGINE_SOURCE.to_string(),
            })
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.category.cmp(&b.category))
    });
    recommendations
}
