use std::sync::Arc;

use super::engine::{aggregate, fallback_profile, RiskEngine};
use super::scoring::{
    aggregate_by_category, calculate_confidence, calculate_risk_score, priority_for,
    risk_level_for_score, ConfidenceInputs, ConfidenceLevel,
};
use super::types::{
    AnalyzerOutput, AnalyzerResult, ComplianceStatus, FactorKind, Priority, RiskCategory,
    RiskFactor, RiskLevel, Severity, Urgency,
};
use crate::analyzers::Analyzer;
use crate::classifier::ClassificationResult;
use crate::error::{AnalyzerError, RiskEngineError};
use crate::policy::{PolicyData, PolicyType, UserProfile};
use crate::risk::scoring::SeverityWeights;

fn factor(source: &str, category: RiskCategory, severity: Severity, title: &str) -> RiskFactor {
    RiskFactor::builder(source, category, title)
        .severity(severity)
        .build()
}

struct Fixed {
    name: &'static str,
    risks: Vec<RiskFactor>,
}

impl Analyzer for Fixed {
    fn name(&self) -> &'static str {
        self.name
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
        _policy: &PolicyData,
        _classification: &ClassificationResult,
        _profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        Ok(AnalyzerOutput {
            risks: self.risks.clone(),
            summary: format!("{} ok", self.name),
        })
    }
}

struct Panicking;

impl Analyzer for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights {
            critical: 1,
            high: 1,
            medium: 1,
            low: 1,
        }
    }

    fn analyze(
        &self,
        _policy: &PolicyData,
        _classification: &ClassificationResult,
        _profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        panic!("analyzer blew up");
    }
}

struct Failing;

impl Analyzer for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn severity_weights(&self) -> SeverityWeights {
        SeverityWeights {
            critical: 1,
            high: 1,
            medium: 1,
            low: 1,
        }
    }

    fn analyze(
        &self,
        _policy: &PolicyData,
        _classification: &ClassificationResult,
        _profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        Err(AnalyzerError::MissingInput {
            analyzer: "failing".into(),
            field: "policy".into(),
        })
    }
}

fn run(engine: &RiskEngine) -> Result<super::AggregatedRiskProfile, RiskEngineError> {
    engine.analyze_risks(
        &PolicyData::default(),
        &ClassificationResult::fallback(Some(PolicyType::Auto)),
        &UserProfile::default(),
    )
}

fn fixed(name: &'static str, risks: Vec<RiskFactor>) -> Arc<dyn Analyzer> {
    Arc::new(Fixed { name, risks })
}

#[test]
fn risk_score_is_monotonic_in_severity() {
    let base = vec![
        factor("a", RiskCategory::CoverageGaps, Severity::Low, "one"),
        factor("a", RiskCategory::Compliance, Severity::Medium, "two"),
        factor("b", RiskCategory::Optimization, Severity::Minimal, "three"),
    ];
    for index in 0..base.len() {
        let mut previous = calculate_risk_score(&base);
        for severity in Severity::ALL {
            if severity < base[index].severity {
                continue;
            }
            let mut bumped = base.clone();
            bumped[index].severity = severity;
            let score = calculate_risk_score(&bumped);
            assert!(score >= previous, "score dropped raising factor {}", index);
            previous = score;
        }
    }
}

#[test]
fn risk_score_uses_fixed_normalizer_and_clamps() {
    // One critical compliance factor is a fifth of the worst case.
    let one = vec![factor("a", RiskCategory::Compliance, Severity::Critical, "x")];
    assert_eq!(calculate_risk_score(&one), 20.0);

    let many: Vec<RiskFactor> = (0..12)
        .map(|i| factor("a", RiskCategory::Compliance, Severity::Critical, &format!("x{}", i)))
        .collect();
    assert_eq!(calculate_risk_score(&many), 100.0);
    assert_eq!(calculate_risk_score(&[]), 0.0);
}

#[test]
fn opportunities_count_at_half_weight() {
    let gap = factor("a", RiskCategory::CoverageGaps, Severity::High, "gap");
    let opportunity = RiskFactor::builder("a", RiskCategory::CoverageGaps, "opportunity")
        .severity(Severity::High)
        .kind(FactorKind::Opportunity)
        .build();

    assert!(calculate_risk_score(&[opportunity.clone()]) < calculate_risk_score(&[gap]));
    assert!(calculate_risk_score(&[opportunity]) > 0.0);
}

#[test]
fn risk_levels_follow_thresholds() {
    assert_eq!(risk_level_for_score(80.0), RiskLevel::Critical);
    assert_eq!(risk_level_for_score(79.9), RiskLevel::High);
    assert_eq!(risk_level_for_score(40.0), RiskLevel::Medium);
    assert_eq!(risk_level_for_score(20.0), RiskLevel::Low);
    assert_eq!(risk_level_for_score(19.9), RiskLevel::Minimal);
}

#[test]
fn priority_matrix_escalates_with_urgency() {
    assert_eq!(priority_for(Severity::Critical, Urgency::Low), Priority::Critical);
    assert_eq!(priority_for(Severity::High, Urgency::Immediate), Priority::Critical);
    assert_eq!(priority_for(Severity::High, Urgency::Medium), Priority::High);
    assert_eq!(priority_for(Severity::Low, Urgency::Low), Priority::Low);
}

#[test]
fn category_breakdown_is_in_canonical_order() {
    let risks = vec![
        factor("a", RiskCategory::Optimization, Severity::Low, "o"),
        factor("a", RiskCategory::CoverageGaps, Severity::High, "g1"),
        factor("a", RiskCategory::CoverageGaps, Severity::Critical, "g2"),
    ];
    let breakdown = aggregate_by_category(&risks);

    assert_eq!(breakdown.len(), 2);
    assert_eq!(breakdown[0].category, RiskCategory::CoverageGaps);
    assert_eq!(breakdown[0].count, 2);
    assert_eq!(breakdown[0].highest_severity, Severity::Critical);
    assert_eq!(breakdown[1].category, RiskCategory::Optimization);
}

#[test]
fn confidence_applies_penalties_and_bonus() {
    let full = calculate_confidence(&ConfidenceInputs {
        profile_fields: 5,
        extracted_fields: 8,
        enrichment_succeeded: true,
        document_poor: false,
        successful_analyzers: 3,
    });
    assert_eq!(full.score, 100);
    assert_eq!(full.level, ConfidenceLevel::High);

    let sparse = calculate_confidence(&ConfidenceInputs {
        profile_fields: 0,
        extracted_fields: 0,
        enrichment_succeeded: false,
        document_poor: true,
        successful_analyzers: 1,
    });
    assert_eq!(sparse.score, 10);
    assert_eq!(sparse.level, ConfidenceLevel::Low);
    assert_eq!(sparse.factors.len(), 4);

    let repeat = calculate_confidence(&ConfidenceInputs {
        profile_fields: 0,
        extracted_fields: 0,
        enrichment_succeeded: false,
        document_poor: true,
        successful_analyzers: 1,
    });
    assert_eq!(sparse, repeat);
}

#[test]
fn aggregation_is_order_independent() {
    let a = AnalyzerResult {
        analyzer: "alpha".into(),
        success: true,
        risks: vec![
            factor("alpha", RiskCategory::CoverageGaps, Severity::Critical, "a1"),
            factor("alpha", RiskCategory::Compliance, Severity::Medium, "a2"),
        ],
        score: 35,
        summary: String::new(),
        metadata: Default::default(),
        error: None,
    };
    let b = AnalyzerResult {
        analyzer: "beta".into(),
        risks: vec![factor("beta", RiskCategory::LiabilityLimits, Severity::High, "b1")],
        ..a.clone()
    };
    let c = AnalyzerResult::failed("gamma", "down".into(), 3);

    let forward = aggregate(vec![a.clone(), b.clone(), c.clone()]);
    let backward = aggregate(vec![c, b, a]);

    assert_eq!(forward, backward);
    assert_eq!(forward.degraded_analyzers, vec!["gamma".to_string()]);
    assert_eq!(forward.compliance_status, ComplianceStatus::ReviewNeeded);
}

#[test]
fn panicking_analyzer_is_degraded_not_fatal() {
    let engine = RiskEngine::new(vec![
        fixed(
            "steady",
            vec![factor("steady", RiskCategory::Compliance, Severity::High, "s")],
        ),
        Arc::new(Panicking),
        Arc::new(Failing),
    ]);

    let profile = run(&engine).expect("engine succeeds with one analyzer");

    assert_eq!(profile.risks.len(), 1);
    assert_eq!(profile.compliance_status, ComplianceStatus::NonCompliant);
    assert_eq!(profile.degraded_analyzers, vec!["failing", "panicking"]);
    let panicked = profile
        .analyzer_results
        .iter()
        .find(|r| r.analyzer == "panicking")
        .unwrap();
    assert!(!panicked.success);
    assert!(panicked.risks.is_empty());
    assert!(panicked.error.as_deref().unwrap().contains("blew up"));
}

#[test]
fn all_failures_are_reported() {
    let engine = RiskEngine::new(vec![Arc::new(Panicking), Arc::new(Failing)]);
    assert!(matches!(
        run(&engine),
        Err(RiskEngineError::AllAnalyzersFailed { attempted: 2 })
    ));
    assert!(matches!(
        run(&RiskEngine::new(Vec::new())),
        Err(RiskEngineError::NoAnalyzers)
    ));
}

#[test]
fn recommendations_cover_serious_categories_by_priority() {
    let engine = RiskEngine::new(vec![fixed(
        "mixed",
        vec![
            RiskFactor::builder("mixed", RiskCategory::DeductibleRisks, "d")
                .severity(Severity::High)
                .urgency(Urgency::Low)
                .recommendation("lower it")
                .build(),
            RiskFactor::builder("mixed", RiskCategory::CoverageGaps, "g")
                .severity(Severity::Critical)
                .urgency(Urgency::Immediate)
                .recommendation("add it")
                .build(),
            factor("mixed", RiskCategory::PolicyTerms, Severity::Low, "t"),
        ],
    )]);

    let profile = run(&engine).unwrap();

    assert_eq!(profile.recommendations.len(), 2);
    assert_eq!(profile.recommendations[0].category, RiskCategory::CoverageGaps);
    assert_eq!(profile.recommendations[0].priority, Priority::Critical);
    assert_eq!(profile.recommendations[1].actions, vec!["lower it".to_string()]);
    assert_eq!(profile.critical_issues.len(), 1);
    assert_eq!(profile.analyzer_results[0].score, 45);
}

#[test]
fn fallback_profile_carries_incomplete_factor() {
    let profile = fallback_profile("engine unavailable", &["coverage_gap", "liability"]);

    assert_eq!(profile.risks.len(), 1);
    assert!(profile.risks[0].has_tag("analysis-incomplete"));
    assert_eq!(profile.degraded_analyzers.len(), 2);
    assert_eq!(profile.successful_analyzers(), 0);
    assert_eq!(profile.compliance_status, ComplianceStatus::ReviewNeeded);
}
