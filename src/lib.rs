pub mod analyzers;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ops;
pub mod pipeline;
pub mod policy;
pub mod risk;

pub use classifier::{ClassificationResult, PolicyClassifier, PolicyRules};
pub use config::{PipelineConfig, PIPELINE_CONFIG};
pub use error::{
    AnalyzerError, ConfigError, EnrichmentError, IntakeError, PipelineError, RiskEngineError,
};
pub use ops::{RunRegistry, Stage, StageProgress, StageStatus};
pub use pipeline::{
    AnalysisPipeline, ComprehensiveResult, DocumentInput, DocumentIntake, EnrichmentAdapter,
    EnrichmentRequest, EnrichmentResult, PipelineOutcome, PlainTextIntake,
};
pub use policy::{PolicyData, PolicyType, RiskTolerance, UserProfile};
pub use risk::{AggregatedRiskProfile, RiskEngine, RiskFactor, RiskLevel};
