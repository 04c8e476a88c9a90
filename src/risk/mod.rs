//! Risk factor model, scoring and the aggregating engine.

mod engine;
pub mod scoring;
#[cfg(test)]
mod tests;
pub mod types;

pub use engine::{aggregate, build_recommendations, compliance_status, fallback_profile, RiskEngine};
pub(crate) use engine::panic_message;
pub use types::{
    AggregatedRiskProfile, AnalyzerResult, ComplianceStatus, FactorKind, Priority, Recommendation,
    RiskCategory, RiskFactor, RiskLevel, Severity, Urgency,
};
