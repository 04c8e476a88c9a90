// src/config.rs

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Enrichment
    pub enrichment_timeout_ms: u64, // Default: 15 seconds

    // Document validation
    pub max_document_bytes: usize, // Default: 10MB
    pub accepted_mime_types: Vec<String>,

    // Document quality bands
    pub poor_text_chars: usize, // Below this with few fields: poor
    pub poor_field_count: usize,
    pub good_text_chars: usize, // At or above this: good
    pub good_field_count: usize,

    // Registry
    pub max_concurrent_runs: usize, // Default: 4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            enrichment_timeout_ms: 15_000,
            max_document_bytes: 10 * 1024 * 1024,
            accepted_mime_types: vec![
                "application/pdf".into(),
                "text/plain".into(),
                "image/png".into(),
                "image/jpeg".into(),
            ],
            poor_text_chars: 200,
            poor_field_count: 3,
            good_text_chars: 1_000,
            good_field_count: 5,
            max_concurrent_runs: 4,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    /// Mime parameters (`; charset=...`) and case are ignored.
    pub fn accepts_mime(&self, mime_type: &str) -> bool {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.accepted_mime_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(&essence))
    }
}

// Global configuration
lazy_static! {
    pub static ref PIPELINE_CONFIG: PipelineConfig = PipelineConfig::default();
}

// Stage timing for a single run
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub analysis_id: String,
    pub start_time: Instant,
    last_checkpoint: Instant,
    pub checkpoints: Vec<(String, Duration)>,
}

impl RunMetrics {
    pub fn new(analysis_id: &str) -> Self {
        let now = Instant::now();
        RunMetrics {
            analysis_id: analysis_id.to_string(),
            start_time: now,
            last_checkpoint: now,
            checkpoints: Vec::new(),
        }
    }

    /// Records the time since the previous checkpoint and returns it.
    pub fn checkpoint(&mut self, name: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_checkpoint);
        self.last_checkpoint = now;
        self.checkpoints.push((name.to_string(), elapsed));
        elapsed
    }

    pub fn complete(self) -> RunReport {
        RunReport {
            analysis_id: self.analysis_id,
            total_duration: self.start_time.elapsed(),
            checkpoints: self.checkpoints,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub analysis_id: String,
    pub total_duration: Duration,
    pub checkpoints: Vec<(String, Duration)>,
}
