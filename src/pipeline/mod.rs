//! Staged analysis pipeline.
//!
//! Validation is the only stage that can fail a run. Every later stage either produces its
//! output or a fallback plus a warning, so a run that gets past validation always ends with
//! a [`ComprehensiveResult`].

pub mod compile;
pub mod enrichment;
pub mod intake;
#[cfg(test)]
mod tests;

pub use compile::{ComprehensiveResult, StageOutcomes};
pub use enrichment::{EnrichmentAdapter, EnrichmentRequest, EnrichmentResult};
pub use intake::{
    DocumentInput, DocumentIntake, DocumentQuality, ExtractedDocument, PlainTextIntake,
};

use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::classifier::{ClassificationResult, PolicyClassifier, PolicyRules};
use crate::config::{PipelineConfig, RunMetrics};
use crate::error::{ConfigError, EnrichmentError, PipelineError};
use crate::ops::{
    PipelineRun, RunRegistry, RunStatus, Stage, StageProgress, StageRecord, StageStatus,
};
use crate::policy::{PolicyData, UserProfile};
use crate::risk::{fallback_profile, panic_message, AggregatedRiskProfile, RiskEngine};

use compile::{compile, CompilationInputs};
use enrichment::{enrich_with_timeout, fallback_enrichment};
use intake::assess_quality;

pub type ProgressObserver = dyn Fn(&StageProgress) + Send + Sync;

/// What a caller gets back from [`AnalysisPipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub analysis_id: String,
    pub result: Option<ComprehensiveResult>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub stages: Vec<StageRecord>,
    pub progress: Vec<StageProgress>,
}

pub struct AnalysisPipeline {
    config: PipelineConfig,
    classifier: Arc<PolicyClassifier>,
    engine: Arc<RiskEngine>,
    intake: Option<Arc<dyn DocumentIntake>>,
    enrichment: Option<Arc<dyn EnrichmentAdapter>>,
    registry: Option<RunRegistry>,
}

impl AnalysisPipeline {
    /// Pipeline over the shared default rules with plain-text intake and no enrichment.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_rules(config, PolicyRules::shared_default()?)
    }

    pub fn with_rules(
        config: PipelineConfig,
        rules: Arc<PolicyRules>,
    ) -> Result<Self, ConfigError> {
        let classifier = PolicyClassifier::new(&rules)?;
        Ok(AnalysisPipeline {
            config,
            classifier: Arc::new(classifier),
            engine: Arc::new(RiskEngine::with_rules(rules)),
            intake: Some(Arc::new(PlainTextIntake)),
            enrichment: None,
            registry: None,
        })
    }

    pub fn with_intake(mut self, intake: Arc<dyn DocumentIntake>) -> Self {
        self.intake = Some(intake);
        self
    }

    pub fn without_intake(mut self) -> Self {
        self.intake = None;
        self
    }

    pub fn with_enrichment(mut self, adapter: Arc<dyn EnrichmentAdapter>) -> Self {
        self.enrichment = Some(adapter);
        self
    }

    pub fn with_engine(mut self, engine: RiskEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        document: Option<DocumentInput>,
        manual_fields: Option<BTreeMap<String, String>>,
        profile: Option<UserProfile>,
        on_progress: Option<&ProgressObserver>,
    ) -> PipelineOutcome {
        let token = CancellationToken::new();
        self.run_with_cancel(document, manual_fields, profile, on_progress, &token)
            .await
    }

    pub async fn run_with_cancel(
        &self,
        document: Option<DocumentInput>,
        manual_fields: Option<BTreeMap<String, String>>,
        profile: Option<UserProfile>,
        on_progress: Option<&ProgressObserver>,
        token: &CancellationToken,
    ) -> PipelineOutcome {
        let _permit = match &self.registry {
            Some(registry) => registry.acquire().await,
            None => None,
        };

        let mut tracker = RunTracker::new(on_progress, self.registry.as_ref(), token);
        log::info!("Starting policy analysis {}", tracker.run.analysis_id);

        let result = self
            .execute(
                &mut tracker,
                document,
                manual_fields.unwrap_or_default(),
                profile.unwrap_or_default(),
            )
            .await;

        let report = tracker.metrics.clone().complete();
        log::info!(
            "Finished policy analysis {} in {} ms ({} warnings)",
            report.analysis_id,
            report.total_duration.as_millis(),
            tracker.run.warnings.len()
        );

        tracker.finish(result)
    }

    async fn execute(
        &self,
        tracker: &mut RunTracker<'_>,
        document: Option<DocumentInput>,
        manual_fields: BTreeMap<String, String>,
        profile: UserProfile,
    ) -> Result<ComprehensiveResult, PipelineError> {
        // Validation
        tracker.begin(Stage::Validation, "Validating input")?;
        if let Err(err) = self.validate(document.as_ref(), &manual_fields) {
            tracker.fail(Stage::Validation, &err);
            return Err(err);
        }
        tracker.complete(Stage::Validation, "Input accepted");

        // Document processing
        tracker.begin(Stage::DocumentProcessing, "Extracting document")?;
        let (text, mut fields, document_ok, document_quality) =
            self.process_document(tracker, document.as_ref()).await;
        // Manually entered values win over extracted ones.
        fields.extend(manual_fields);
        let policy = PolicyData::from_sources(&text, &fields);

        // Classification
        tracker.begin(Stage::Classification, "Classifying policy")?;
        let classification = self.classify(tracker, text, fields, &policy).await;
        let policy_type = classification.resolved_type(&policy);

        // Risk analysis
        tracker.begin(Stage::RiskAnalysis, "Running risk analyzers")?;
        let (risk, risk_ok) = self
            .analyze(tracker, &policy, &classification, &profile)
            .await;

        // Enrichment
        tracker.begin(Stage::Enrichment, "Requesting narrative review")?;
        let request = EnrichmentRequest::build(&policy, policy_type, &classification, &risk);
        let (enrichment, enrichment_ok) = self.enrich(tracker, &request).await?;

        // Compilation
        tracker.begin(Stage::Compilation, "Compiling report")?;
        let outcomes = StageOutcomes {
            document_ok,
            classification_confident: classification.is_confident,
            risk_ok,
            enrichment_ok,
        };
        let mut result = compile(CompilationInputs {
            analysis_id: &tracker.run.analysis_id,
            policy: &policy,
            policy_type,
            profile_fields: profile.populated_fields(),
            classification,
            risk,
            enrichment,
            outcomes,
            document_quality,
            stage_statuses: Vec::new(),
        });
        tracker.complete(
            Stage::Compilation,
            format!("Report ready: {} ({})", result.overall_score, result.rating),
        );
        result.stage_statuses = tracker.run.stages.clone();
        Ok(result)
    }

    fn validate(
        &self,
        document: Option<&DocumentInput>,
        manual_fields: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let has_fields = manual_fields.values().any(|v| !v.trim().is_empty());
        let Some(document) = document else {
            if has_fields {
                return Ok(());
            }
            return Err(PipelineError::Validation(
                "either a document or manual policy fields are required".into(),
            ));
        };
        if document.bytes.is_empty() {
            return Err(PipelineError::Validation("document is empty".into()));
        }
        if document.bytes.len() > self.config.max_document_bytes {
            return Err(PipelineError::Validation(format!(
                "document is {} bytes; the limit is {}",
                document.bytes.len(),
                self.config.max_document_bytes
            )));
        }
        if !self.config.accepts_mime(&document.mime_type) {
            return Err(PipelineError::Validation(format!(
                "unsupported document type '{}'",
                document.mime_type
            )));
        }
        Ok(())
    }

    async fn process_document(
        &self,
        tracker: &mut RunTracker<'_>,
        document: Option<&DocumentInput>,
    ) -> (String, BTreeMap<String, String>, bool, Option<DocumentQuality>) {
        let Some(document) = document else {
            tracker.finish_stage(
                Stage::DocumentProcessing,
                StageStatus::Skipped,
                "No document supplied; using manual fields",
            );
            return (String::new(), BTreeMap::new(), true, None);
        };

        let extracted = match &self.intake {
            Some(intake) => match intake.extract(document).await {
                Ok(extracted) => extracted,
                Err(err) => ExtractedDocument::failed(err.to_string()),
            },
            None => ExtractedDocument::failed("no document intake configured"),
        };
        let quality = assess_quality(&extracted, &self.config);

        if extracted.success {
            tracker.complete(
                Stage::DocumentProcessing,
                format!(
                    "Extracted {} characters and {} fields",
                    extracted.extracted_text.len(),
                    extracted.structured_fields.len()
                ),
            );
            (extracted.extracted_text, extracted.structured_fields, true, Some(quality))
        } else {
            let reason = extracted
                .error
                .unwrap_or_else(|| "extraction failed".to_string());
            tracker.degrade(Stage::DocumentProcessing, reason);
            (String::new(), BTreeMap::new(), false, Some(quality))
        }
    }

    async fn classify(
        &self,
        tracker: &mut RunTracker<'_>,
        text: String,
        fields: BTreeMap<String, String>,
        policy: &PolicyData,
    ) -> ClassificationResult {
        let classifier = Arc::clone(&self.classifier);
        match task::spawn_blocking(move || classifier.classify(&text, &fields)).await {
            Ok(result) => {
                let message = if result.is_confident {
                    format!(
                        "Classified as {} ({:.0}%)",
                        result.primary_type,
                        result.confidence * 100.0
                    )
                } else {
                    format!(
                        "Low-confidence classification ({:.0}%)",
                        result.confidence * 100.0
                    )
                };
                tracker.complete(Stage::Classification, message);
                result
            }
            Err(join_err) => {
                log::debug!("classification task failed: {}", join_err);
                tracker.degrade(
                    Stage::Classification,
                    format!("classifier failed, using declared type: {}", join_err),
                );
                ClassificationResult::fallback(policy.declared_type)
            }
        }
    }

    async fn analyze(
        &self,
        tracker: &mut RunTracker<'_>,
        policy: &PolicyData,
        classification: &ClassificationResult,
        profile: &UserProfile,
    ) -> (AggregatedRiskProfile, bool) {
        let engine = Arc::clone(&self.engine);
        let names = engine.analyzer_names();
        let (policy, classification, profile) =
            (policy.clone(), classification.clone(), profile.clone());
        let joined = task::spawn_blocking(move || {
            engine.analyze_risks(&policy, &classification, &profile)
        })
        .await;

        let failure = match joined {
            Ok(Ok(aggregated)) => {
                if aggregated.degraded_analyzers.is_empty() {
                    tracker.complete(
                        Stage::RiskAnalysis,
                        format!("{} risk factors found", aggregated.risks.len()),
                    );
                } else {
                    for result in aggregated.analyzer_results.iter().filter(|r| !r.success) {
                        tracker.run.warn(
                            Stage::RiskAnalysis,
                            format!(
                                "{} analyzer failed: {}",
                                result.analyzer,
                                result.error.as_deref().unwrap_or("unknown error")
                            ),
                        );
                    }
                    tracker.finish_stage(
                        Stage::RiskAnalysis,
                        StageStatus::Degraded,
                        format!(
                            "{} risk factors found; {} analyzers degraded",
                            aggregated.risks.len(),
                            aggregated.degraded_analyzers.len()
                        ),
                    );
                }
                return (aggregated, true);
            }
            Ok(Err(err)) => err.to_string(),
            Err(join_err) => format!("risk engine task failed: {}", join_err),
        };

        tracker.degrade(Stage::RiskAnalysis, &failure);
        (fallback_profile(&failure, &names), false)
    }

    async fn enrich(
        &self,
        tracker: &mut RunTracker<'_>,
        request: &EnrichmentRequest,
    ) -> Result<(EnrichmentResult, bool), PipelineError> {
        let Some(adapter) = &self.enrichment else {
            tracker.finish_stage(
                Stage::Enrichment,
                StageStatus::Skipped,
                "No enrichment adapter configured",
            );
            return Ok((fallback_enrichment(request), false));
        };

        let timeout = self.config.enrichment_timeout();
        let token = tracker.token;
        let outcome: Result<EnrichmentResult, EnrichmentError> = tokio::select! {
            _ = token.cancelled() => {
                return Err(tracker.cancelled(Stage::Enrichment));
            }
            result = AssertUnwindSafe(enrich_with_timeout(adapter.as_ref(), request, timeout))
                .catch_unwind() => match result {
                Ok(result) => result,
                Err(payload) => Err(EnrichmentError::Unavailable(format!(
                    "adapter panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            },
        };

        match outcome {
            Ok(result) => {
                tracker.complete(
                    Stage::Enrichment,
                    format!(
                        "Narrative review received ({:.0}% confidence)",
                        result.confidence * 100.0
                    ),
                );
                Ok((result, true))
            }
            Err(err) => {
                tracker.degrade(Stage::Enrichment, &err);
                Ok((fallback_enrichment(request), false))
            }
        }
    }
}

/// Per-run bookkeeping: stage records, progress fan-out, timing and cancellation.
struct RunTracker<'a> {
    run: PipelineRun,
    metrics: RunMetrics,
    observer: Option<&'a ProgressObserver>,
    registry: Option<&'a RunRegistry>,
    token: &'a CancellationToken,
}

impl<'a> RunTracker<'a> {
    fn new(
        observer: Option<&'a ProgressObserver>,
        registry: Option<&'a RunRegistry>,
        token: &'a CancellationToken,
    ) -> Self {
        let run = PipelineRun::new();
        let metrics = RunMetrics::new(&run.analysis_id);
        if let Some(registry) = registry {
            registry.register(&run.analysis_id, token.clone());
        }
        RunTracker {
            run,
            metrics,
            observer,
            registry,
            token,
        }
    }

    fn cancelled(&mut self, stage: Stage) -> PipelineError {
        log::warn!("[{}] cancelled before {}", self.run.analysis_id, stage);
        self.emit(stage, StageStatus::Failed, 0.0, "Cancelled".to_string(), None);
        PipelineError::Cancelled {
            stage: stage.as_str().to_string(),
        }
    }

    /// Checks for cancellation, then marks the stage running.
    fn begin(&mut self, stage: Stage, message: &str) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            return Err(self.cancelled(stage));
        }
        log::debug!("[{}] entering {}", self.run.analysis_id, stage);
        self.metrics.checkpoint(&format!("{}:start", stage));
        self.emit(stage, StageStatus::Running, 0.0, message.to_string(), None);
        Ok(())
    }

    fn complete(&mut self, stage: Stage, message: impl Into<String>) {
        self.finish_stage(stage, StageStatus::Completed, message);
    }

    fn degrade(&mut self, stage: Stage, reason: impl std::fmt::Display) {
        let reason = reason.to_string();
        self.run.warn(stage, &reason);
        self.finish_stage(stage, StageStatus::Degraded, reason);
    }

    fn fail(&mut self, stage: Stage, err: &PipelineError) {
        self.run.error(stage, err);
        self.finish_stage(stage, StageStatus::Failed, err.to_string());
    }

    fn finish_stage(&mut self, stage: Stage, status: StageStatus, message: impl Into<String>) {
        let elapsed = self.metrics.checkpoint(stage.as_str());
        self.emit(
            stage,
            status,
            100.0,
            message.into(),
            Some(elapsed.as_millis() as u64),
        );
    }

    fn emit(
        &mut self,
        stage: Stage,
        status: StageStatus,
        stage_percent: f32,
        message: String,
        duration_ms: Option<u64>,
    ) {
        let event = self
            .run
            .transition(stage, status, stage_percent, message, duration_ms);
        if let Some(registry) = self.registry {
            registry.update(&self.run.analysis_id, |state| {
                state.stage = Some(stage);
                state.overall_percent = event.overall_percent;
            });
        }
        if let Some(observer) = self.observer {
            // Observers are fire-and-forget; a panicking one must not take the run down.
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                log::warn!(
                    "[{}] progress observer panicked at {}",
                    self.run.analysis_id,
                    stage
                );
            }
        }
    }

    fn finish(self, result: Result<ComprehensiveResult, PipelineError>) -> PipelineOutcome {
        let (status, outcome) = match result {
            Ok(result) => (
                RunStatus::Completed,
                PipelineOutcome {
                    success: true,
                    analysis_id: self.run.analysis_id.clone(),
                    result: Some(result),
                    error: None,
                    failed_stage: None,
                    warnings: self.run.warnings.clone(),
                    errors: self.run.errors.clone(),
                    stages: self.run.stages.clone(),
                    progress: self.run.progress.clone(),
                },
            ),
            Err(err) => {
                let status = match err {
                    PipelineError::Cancelled { .. } => RunStatus::Cancelled,
                    PipelineError::Validation(_) => RunStatus::Failed,
                };
                log::warn!("[{}] analysis failed: {}", self.run.analysis_id, err);
                (
                    status,
                    PipelineOutcome {
                        success: false,
                        analysis_id: self.run.analysis_id.clone(),
                        result: None,
                        error: Some(err.to_string()),
                        failed_stage: Some(err.stage().to_string()),
                        warnings: self.run.warnings.clone(),
                        errors: self.run.errors.clone(),
                        stages: self.run.stages.clone(),
                        progress: self.run.progress.clone(),
                    },
                )
            }
        };
        if let Some(registry) = self.registry {
            registry.finish(&self.run.analysis_id, status);
        }
        outcome
    }
}
