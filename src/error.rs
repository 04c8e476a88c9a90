//! Error types shared across the pipeline.
//!
//! Only [`PipelineError`] is ever returned to a caller as a failure. Every other error is
//! caught at a stage boundary, turned into a warning and replaced by a fallback.

use thiserror::Error;

/// Problems loading or validating the policy rule tables.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read rules file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy rules: {0}")]
    Parse(#[from] serde_json::Error),

    /// The rule set parsed but violates a structural constraint.
    #[error("Invalid policy rules for '{policy_type}': {reason}")]
    InvalidRule { policy_type: String, reason: String },
}

/// A single analyzer could not produce findings.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("{analyzer}: missing input '{field}'")]
    MissingInput { analyzer: String, field: String },

    #[error("{analyzer} panicked: {message}")]
    Panicked { analyzer: String, message: String },
}

#[derive(Debug, Error)]
pub enum RiskEngineError {
    #[error("All {attempted} analyzers failed")]
    AllAnalyzersFailed { attempted: usize },

    #[error("No analyzers registered")]
    NoAnalyzers,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Document extraction failed: {0}")]
    Extraction(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Enrichment timed out after {0} ms")]
    Timeout(u64),

    #[error("Enrichment service unavailable: {0}")]
    Unavailable(String),

    #[error("Enrichment returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Fatal pipeline failures. The stage that failed is always named.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Analysis cancelled during {stage}")]
    Cancelled { stage: String },
}

impl PipelineError {
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Cancelled { stage } => stage.as_str(),
        }
    }
}
