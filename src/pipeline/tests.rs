use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use super::compile::{completeness, letter_rating, overall_score, reliability};
use super::enrichment::EnrichedRecommendation;
use super::*;
use crate::analyzers::Analyzer;
use crate::error::{AnalyzerError, EnrichmentError, IntakeError};
use crate::ops::{RunRegistry, Stage, StageProgress, StageStatus};
use crate::policy::UserProfile;
use crate::risk::scoring::SeverityWeights;
use crate::risk::types::{AnalyzerOutput, Priority, RiskLevel};
use crate::risk::RiskEngine;

fn auto_fields() -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("policy_type".to_string(), "auto".to_string());
    fields.insert("Insurer".to_string(), "Example Mutual".to_string());
    fields.insert("Liability Limits".to_string(), "100/300/100".to_string());
    fields.insert("Deductible".to_string(), "$500".to_string());
    fields.insert("Annual Premium".to_string(), "$1,400".to_string());
    fields
}

fn pipeline() -> AnalysisPipeline {
    AnalysisPipeline::new(PipelineConfig::default()).unwrap()
}

fn stage_status(outcome: &PipelineOutcome, stage: Stage) -> StageStatus {
    outcome
        .stages
        .iter()
        .find(|r| r.stage == stage)
        .map(|r| r.status)
        .unwrap()
}

struct StaticAdapter {
    result: EnrichmentResult,
}

impl EnrichmentAdapter for StaticAdapter {
    fn enrich<'a>(
        &'a self,
        _request: &'a EnrichmentRequest,
    ) -> BoxFuture<'a, Result<EnrichmentResult, EnrichmentError>> {
        Box::pin(future::ready(Ok(self.result.clone())))
    }
}

struct SlowAdapter;

impl EnrichmentAdapter for SlowAdapter {
    fn enrich<'a>(
        &'a self,
        _request: &'a EnrichmentRequest,
    ) -> BoxFuture<'a, Result<EnrichmentResult, EnrichmentError>> {
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(EnrichmentError::Unavailable("never answers".into()))
        }
        .boxed()
    }
}

/// Cancels the run from inside the enrichment call, then stalls.
struct CancelsMidway(CancellationToken);

impl EnrichmentAdapter for CancelsMidway {
    fn enrich<'a>(
        &'a self,
        _request: &'a EnrichmentRequest,
    ) -> BoxFuture<'a, Result<EnrichmentResult, EnrichmentError>> {
        async move {
            self.0.cancel();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(EnrichmentError::Unavailable("never answers".into()))
        }
        .boxed()
    }
}

struct PanickingAdapter;

fn broken_client() -> Result<EnrichmentResult, EnrichmentError> {
    panic!("llm client bug")
}

impl EnrichmentAdapter for PanickingAdapter {
    fn enrich<'a>(
        &'a self,
        _request: &'a EnrichmentRequest,
    ) -> BoxFuture<'a, Result<EnrichmentResult, EnrichmentError>> {
        async { broken_client() }.boxed()
    }
}

struct BrokenIntake;

impl DocumentIntake for BrokenIntake {
    fn extract<'a>(
        &'a self,
        _document: &'a DocumentInput,
    ) -> BoxFuture<'a, Result<ExtractedDocument, IntakeError>> {
        Box::pin(future::ready(Err(IntakeError::Extraction(
            "scanner returned garbage".into(),
        ))))
    }
}

struct AlwaysFails;

impl Analyzer for AlwaysFails {
    fn name(&self) -> &'static str {
        "always_fails"
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
        _policy: &crate::policy::PolicyData,
        _classification: &crate::classifier::ClassificationResult,
        _profile: &UserProfile,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        Err(AnalyzerError::MissingInput {
            analyzer: "always_fails".into(),
            field: "rates_table".into(),
        })
    }
}

fn ai_result(confidence: f64) -> EnrichmentResult {
    EnrichmentResult {
        summary: "Liability limits are reasonable for this household.".into(),
        confidence,
        recommendations: vec![EnrichedRecommendation {
            title: "Review roadside assistance".into(),
            description: "Towing coverage is not listed.".into(),
            priority: Priority::Low,
        }],
        critical_findings: vec!["No uninsured motorist coverage listed".into()],
        ai_generated: true,
    }
}

#[tokio::test]
async fn manual_fields_alone_complete_every_stage() {
    let events: Arc<Mutex<Vec<StageProgress>>> = Arc::default();
    let sink = Arc::clone(&events);
    let observer = move |event: &StageProgress| sink.lock().unwrap().push(event.clone());

    let outcome = pipeline()
        .run(None, Some(auto_fields()), None, Some(&observer))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(stage_status(&outcome, Stage::DocumentProcessing), StageStatus::Skipped);
    assert_eq!(stage_status(&outcome, Stage::Enrichment), StageStatus::Skipped);
    assert!(outcome.stages.iter().all(|r| r.status.is_terminal()));

    let result = outcome.result.unwrap();
    assert_eq!(result.policy_summary.resolved_type, crate::policy::PolicyType::Auto);
    assert_eq!(result.document_quality, None);
    assert!(!result.enrichment.ai_generated);
    assert_eq!(result.stage_statuses.len(), Stage::ALL.len());

    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    assert!(events
        .windows(2)
        .all(|pair| pair[0].overall_percent <= pair[1].overall_percent));
    assert!((events.last().unwrap().overall_percent - 100.0).abs() < 1e-3);
}

#[tokio::test]
async fn missing_input_fails_validation() {
    let outcome = pipeline().run(None, None, None, None).await;

    assert!(!outcome.success);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.failed_stage.as_deref(), Some("validation"));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(stage_status(&outcome, Stage::Validation), StageStatus::Failed);
    assert_eq!(stage_status(&outcome, Stage::Classification), StageStatus::Pending);
}

#[tokio::test]
async fn oversized_and_unsupported_documents_are_rejected() {
    let config = PipelineConfig {
        max_document_bytes: 16,
        ..PipelineConfig::default()
    };
    let pipeline = AnalysisPipeline::new(config).unwrap();

    let big = DocumentInput::text("vehicle driver bodily injury ".repeat(4));
    let outcome = pipeline.run(Some(big), None, None, None).await;
    assert_eq!(outcome.failed_stage.as_deref(), Some("validation"));

    let zip = DocumentInput::new(vec![1, 2, 3], "application/zip");
    let outcome = pipeline.run(Some(zip), Some(auto_fields()), None, None).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("application/zip"));
}

#[tokio::test]
async fn extraction_failure_degrades_but_still_reports() {
    let pipeline = pipeline().with_intake(Arc::new(BrokenIntake));
    let document = DocumentInput::new(b"%PDF-1.7".to_vec(), "application/pdf");

    let outcome = pipeline
        .run(Some(document), Some(auto_fields()), None, None)
        .await;

    assert!(outcome.success);
    assert_eq!(stage_status(&outcome, Stage::DocumentProcessing), StageStatus::Degraded);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("document_processing") && w.contains("garbage")));

    let result = outcome.result.unwrap();
    assert_eq!(result.document_quality, Some(DocumentQuality::Poor));
    assert!(result.reliability <= 70);
}

#[tokio::test]
async fn enrichment_success_feeds_the_report() {
    let pipeline = pipeline().with_enrichment(Arc::new(StaticAdapter {
        result: ai_result(0.9),
    }));
    let profile = UserProfile::default()
        .with_income(90_000.0)
        .with_assets(150_000.0);

    let outcome = pipeline
        .run(None, Some(auto_fields()), Some(profile), None)
        .await;

    assert!(outcome.success);
    assert_eq!(stage_status(&outcome, Stage::Enrichment), StageStatus::Completed);
    let result = outcome.result.unwrap();
    assert!(result.enrichment.ai_generated);
    assert!(result
        .prioritized_recommendations
        .iter()
        .any(|r| r.title == "Review roadside assistance"));
    assert!(result
        .key_insights
        .iter()
        .any(|i| i.contains("uninsured motorist")));
}

#[tokio::test]
async fn enrichment_timeout_falls_back() {
    let config = PipelineConfig {
        enrichment_timeout_ms: 20,
        ..PipelineConfig::default()
    };
    let pipeline = AnalysisPipeline::new(config)
        .unwrap()
        .with_enrichment(Arc::new(SlowAdapter));

    let outcome = pipeline.run(None, Some(auto_fields()), None, None).await;

    assert!(outcome.success);
    assert_eq!(stage_status(&outcome, Stage::Enrichment), StageStatus::Degraded);
    assert!(outcome.warnings.iter().any(|w| w.starts_with("enrichment")));
    let result = outcome.result.unwrap();
    assert!(!result.enrichment.ai_generated);
    assert!(result.enrichment.summary.contains("auto"));
}

#[tokio::test]
async fn out_of_range_confidence_is_rejected() {
    let pipeline = pipeline().with_enrichment(Arc::new(StaticAdapter {
        result: ai_result(1.7),
    }));

    let outcome = pipeline.run(None, Some(auto_fields()), None, None).await;

    assert!(outcome.success);
    assert_eq!(stage_status(&outcome, Stage::Enrichment), StageStatus::Degraded);
    assert!(!outcome.result.unwrap().enrichment.ai_generated);
}

#[tokio::test]
async fn panicking_adapter_degrades_enrichment() {
    let pipeline = pipeline().with_enrichment(Arc::new(PanickingAdapter));

    let outcome = pipeline.run(None, Some(auto_fields()), None, None).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(stage_status(&outcome, Stage::Enrichment), StageStatus::Degraded);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("enrichment") && w.contains("llm client bug")));
    let result = outcome.result.as_ref().unwrap();
    assert!(!result.enrichment.ai_generated);
    assert_eq!(stage_status(&outcome, Stage::Compilation), StageStatus::Completed);
}

#[tokio::test]
async fn panicking_observer_does_not_abort_the_run() {
    let observer = |event: &StageProgress| {
        if event.stage == Stage::Classification {
            panic!("observer bug");
        }
    };

    let outcome = pipeline()
        .run(None, Some(auto_fields()), None, Some(&observer))
        .await;

    assert!(outcome.success);
}

#[tokio::test]
async fn engine_failure_uses_fallback_profile() {
    let engine = RiskEngine::new(vec![Arc::new(AlwaysFails) as Arc<dyn Analyzer>]);
    let pipeline = pipeline().with_engine(engine);

    let outcome = pipeline.run(None, Some(auto_fields()), None, None).await;

    assert!(outcome.success);
    assert_eq!(stage_status(&outcome, Stage::RiskAnalysis), StageStatus::Degraded);
    let result = outcome.result.unwrap();
    assert_eq!(result.risk.risks.len(), 1);
    assert_eq!(result.risk.degraded_analyzers, vec!["always_fails".to_string()]);
    assert!(result.reliability <= 75);
}

#[tokio::test]
async fn cancellation_before_start_stops_at_validation() {
    let token = CancellationToken::new();
    token.cancel();

    let outcome = pipeline()
        .run_with_cancel(None, Some(auto_fields()), None, None, &token)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage.as_deref(), Some("validation"));
    assert!(outcome.error.unwrap().contains("cancelled"));
}

#[tokio::test]
async fn cancellation_interrupts_enrichment() {
    let token = CancellationToken::new();
    let pipeline = pipeline().with_enrichment(Arc::new(CancelsMidway(token.clone())));

    let outcome = pipeline
        .run_with_cancel(None, Some(auto_fields()), None, None, &token)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage.as_deref(), Some("enrichment"));
}

#[tokio::test]
async fn registry_forgets_finished_runs() {
    let registry = RunRegistry::new(2);
    let pipeline = pipeline().with_registry(registry.clone());

    let outcome = pipeline.run(None, Some(auto_fields()), None, None).await;

    assert!(outcome.success);
    assert!(registry.get(&outcome.analysis_id).is_none());
    assert!(registry.active().is_empty());
}

#[test]
fn rating_bands() {
    assert_eq!(letter_rating(100), "A+");
    assert_eq!(letter_rating(90), "A+");
    assert_eq!(letter_rating(85), "A");
    assert_eq!(letter_rating(80), "A-");
    assert_eq!(letter_rating(75), "B+");
    assert_eq!(letter_rating(70), "B");
    assert_eq!(letter_rating(65), "C+");
    assert_eq!(letter_rating(60), "C");
    assert_eq!(letter_rating(55), "D");
    assert_eq!(letter_rating(54), "F");
}

#[test]
fn overall_score_adjustments() {
    assert_eq!(overall_score(RiskLevel::Medium, None), 75);
    assert_eq!(overall_score(RiskLevel::Low, None), 85);
    assert_eq!(overall_score(RiskLevel::Critical, None), 55);
    assert_eq!(overall_score(RiskLevel::High, Some(1.0)), 70);
    assert_eq!(overall_score(RiskLevel::Minimal, Some(0.0)), 80);
}

#[test]
fn completeness_and_reliability() {
    let all = StageOutcomes {
        document_ok: true,
        classification_confident: true,
        risk_ok: true,
        enrichment_ok: true,
    };
    assert_eq!(completeness(&all), 100);
    assert_eq!(reliability(&all), 100);

    let none = StageOutcomes::default();
    assert_eq!(completeness(&none), 0);
    assert_eq!(reliability(&none), 25);

    let no_ai = StageOutcomes {
        enrichment_ok: false,
        ..all
    };
    assert_eq!(completeness(&no_ai), 75);
    assert_eq!(reliability(&no_ai), 100);
}
