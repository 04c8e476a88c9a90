use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub type AnalysisId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    DocumentProcessing,
    Classification,
    RiskAnalysis,
    Enrichment,
    Compilation,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Validation,
        Stage::DocumentProcessing,
        Stage::Classification,
        Stage::RiskAnalysis,
        Stage::Enrichment,
        Stage::Compilation,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::DocumentProcessing => "document_processing",
            Stage::Classification => "classification",
            Stage::RiskAnalysis => "risk_analysis",
            Stage::Enrichment => "enrichment",
            Stage::Compilation => "compilation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Degraded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Finished one way or another.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }
}

/// Event handed to the progress observer on every stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub stage_percent: f32,
    pub message: String,
    pub overall_percent: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: Option<u64>,
    pub message: Option<String>,
}

/// Everything recorded about one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub analysis_id: AnalysisId,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageRecord>,
    pub progress: Vec<StageProgress>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        PipelineRun {
            analysis_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            stages: Stage::ALL
                .iter()
                .map(|stage| StageRecord {
                    stage: *stage,
                    status: StageStatus::Pending,
                    duration_ms: None,
                    message: None,
                })
                .collect(),
            progress: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.record(stage)
            .map(|r| r.status)
            .unwrap_or(StageStatus::Pending)
    }

    fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    fn record_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|r| r.stage == stage)
    }

    /// Stages that have finished, including degraded and skipped ones.
    pub fn completed_stages(&self) -> usize {
        self.stages.iter().filter(|r| r.status.is_terminal()).count()
    }

    pub fn overall_percent(&self) -> f32 {
        self.completed_stages() as f32 / self.stages.len().max(1) as f32 * 100.0
    }

    /// Marks a stage and appends the matching progress event.
    pub fn transition(
        &mut self,
        stage: Stage,
        status: StageStatus,
        stage_percent: f32,
        message: impl Into<String>,
        duration_ms: Option<u64>,
    ) -> StageProgress {
        let message = message.into();
        if let Some(record) = self.record_mut(stage) {
            record.status = status;
            if duration_ms.is_some() {
                record.duration_ms = duration_ms;
            }
            if status.is_terminal() {
                record.message = Some(message.clone());
            }
        }
        let event = StageProgress {
            stage,
            stage_percent,
            message,
            overall_percent: self.overall_percent(),
            timestamp: Utc::now(),
        };
        self.progress.push(event.clone());
        event
    }

    pub fn warn(&mut self, stage: Stage, message: impl fmt::Display) {
        let warning = format!("{}: {}", stage, message);
        log::warn!("[{}] {}", self.analysis_id, warning);
        self.warnings.push(warning);
    }

    pub fn error(&mut self, stage: Stage, message: impl fmt::Display) {
        self.errors.push(format!("{}: {}", stage, message));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Snapshot of an in-flight run as seen by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub analysis_id: AnalysisId,
    pub started_at_ms: i64,
    pub stage: Option<Stage>,
    pub overall_percent: f32,
    pub status: RunStatus,
}

/// Shared view of in-flight runs, for callers that want to list or cancel them by id.
/// Each run still owns its own state; the registry only mirrors it.
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<DashMap<AnalysisId, (RunState, CancellationToken)>>,
    permits: Arc<Semaphore>,
}

impl RunRegistry {
    pub fn new(max_concurrent_runs: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    /// Waits for a run slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    pub fn register(&self, analysis_id: &str, token: CancellationToken) {
        let state = RunState {
            analysis_id: analysis_id.to_string(),
            started_at_ms: Utc::now().timestamp_millis(),
            stage: None,
            overall_percent: 0.0,
            status: RunStatus::Running,
        };
        self.inner.insert(analysis_id.to_string(), (state, token));
    }

    pub fn update(&self, analysis_id: &str, mut f: impl FnMut(&mut RunState)) {
        if let Some(mut entry) = self.inner.get_mut(analysis_id) {
            f(&mut entry.0);
        }
    }

    pub fn get(&self, analysis_id: &str) -> Option<RunState> {
        self.inner.get(analysis_id).map(|e| e.0.clone())
    }

    pub fn active(&self) -> Vec<RunState> {
        self.inner.iter().map(|e| e.0.clone()).collect()
    }

    pub fn cancel(&self, analysis_id: &str) -> bool {
        match self.inner.get(analysis_id) {
            Some(entry) => {
                entry.1.cancel();
                true
            }
            None => false,
        }
    }

    /// Finished runs are dropped so the map only holds in-flight work.
    pub fn finish(&self, analysis_id: &str, status: RunStatus) -> Option<RunState> {
        self.update(analysis_id, |s| {
            s.status = status;
            if status == RunStatus::Completed {
                s.overall_percent = 100.0;
            }
        });
        self.inner.remove(analysis_id).map(|(_, (state, _))| state)
    }
}
