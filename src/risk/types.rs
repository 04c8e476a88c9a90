use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Minimal,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Minimal => "minimal",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn is_high_or_critical(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Immediate,
}

impl Urgency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Immediate => "immediate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    CoverageGaps,
    LiabilityLimits,
    DeductibleRisks,
    PolicyTerms,
    Compliance,
    FinancialRisk,
    Optimization,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 7] = [
        RiskCategory::CoverageGaps,
        RiskCategory::LiabilityLimits,
        RiskCategory::DeductibleRisks,
        RiskCategory::PolicyTerms,
        RiskCategory::Compliance,
        RiskCategory::FinancialRisk,
        RiskCategory::Optimization,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RiskCategory::CoverageGaps => "coverage_gaps",
            RiskCategory::LiabilityLimits => "liability_limits",
            RiskCategory::DeductibleRisks => "deductible_risks",
            RiskCategory::PolicyTerms => "policy_terms",
            RiskCategory::Compliance => "compliance",
            RiskCategory::FinancialRisk => "financial_risk",
            RiskCategory::Optimization => "optimization",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            RiskCategory::CoverageGaps => "Coverage gaps",
            RiskCategory::LiabilityLimits => "Liability limits",
            RiskCategory::DeductibleRisks => "Deductible risks",
            RiskCategory::PolicyTerms => "Policy terms",
            RiskCategory::Compliance => "Compliance",
            RiskCategory::FinancialRisk => "Financial risk",
            RiskCategory::Optimization => "Optimization",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Risk,
    Gap,
    Opportunity,
    Compliance,
    Awareness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    ReviewNeeded,
}

/// One identified issue, gap or opportunity in a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub id: String,
    pub category: RiskCategory,
    pub severity: Severity,
    pub urgency: Urgency,
    #[serde(rename = "type")]
    pub kind: FactorKind,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub estimated_cost: Option<f64>,
    pub potential_savings: Option<f64>,
    pub source: String,
    pub tags: Vec<String>,
}

impl RiskFactor {
    /// Severity and urgency default to medium, kind to `risk`.
    pub fn builder(
        source: &str,
        category: RiskCategory,
        title: impl Into<String>,
    ) -> RiskFactorBuilder {
        RiskFactorBuilder {
            source: source.to_string(),
            category,
            title: title.into(),
            severity: Severity::Medium,
            urgency: Urgency::Medium,
            kind: FactorKind::Risk,
            description: String::new(),
            recommendation: String::new(),
            estimated_cost: None,
            potential_savings: None,
            tags: Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_critical_issue(&self) -> bool {
        self.severity == Severity::Critical || self.urgency == Urgency::Immediate
    }
}

#[derive(Debug, Clone)]
pub struct RiskFactorBuilder {
    source: String,
    category: RiskCategory,
    title: String,
    severity: Severity,
    urgency: Urgency,
    kind: FactorKind,
    description: String,
    recommendation: String,
    estimated_cost: Option<f64>,
    potential_savings: Option<f64>,
    tags: Vec<String>,
}

impl RiskFactorBuilder {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn kind(mut self, kind: FactorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn estimated_cost(mut self, cost: f64) -> Self {
        if cost > 0.0 {
            self.estimated_cost = Some(cost);
        }
        self
    }

    pub fn potential_savings(mut self, savings: f64) -> Self {
        if savings > 0.0 {
            self.potential_savings = Some(savings);
        }
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
        self
    }

    pub fn build(self) -> RiskFactor {
        RiskFactor {
            id: stable_factor_id(&self.source, self.category, &self.title),
            category: self.category,
            severity: self.severity,
            urgency: self.urgency,
            kind: self.kind,
            title: self.title,
            description: self.description,
            recommendation: self.recommendation,
            estimated_cost: self.estimated_cost,
            potential_savings: self.potential_savings,
            source: self.source,
            tags: self.tags,
        }
    }
}

/// Same source, category and title always hash to the same id.
pub fn stable_factor_id(source: &str, category: RiskCategory, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(category.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", source, hex)
}

/// What an analyzer hands back on success, before the engine wraps it.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerOutput {
    pub risks: Vec<RiskFactor>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerMetadata {
    pub risk_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub analyzer: String,
    pub success: bool,
    pub risks: Vec<RiskFactor>,
    pub score: u8,
    pub summary: String,
    pub metadata: AnalyzerMetadata,
    pub error: Option<String>,
}

impl AnalyzerResult {
    pub fn failed(analyzer: &str, error: String, duration_ms: u64) -> Self {
        AnalyzerResult {
            analyzer: analyzer.to_string(),
            success: false,
            risks: Vec::new(),
            score: 0,
            summary: format!("{} unavailable", analyzer),
            metadata: AnalyzerMetadata {
                duration_ms,
                ..AnalyzerMetadata::default()
            },
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub category: RiskCategory,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub actions: Vec<String>,
    pub factor_ids: Vec<String>,
    pub potential_savings: Option<f64>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category: RiskCategory,
    pub count: usize,
    pub highest_severity: Severity,
    pub weighted_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialImpact {
    pub total_estimated_cost: f64,
    pub total_potential_savings: f64,
    pub net_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRiskProfile {
    pub risks: Vec<RiskFactor>,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub critical_issues: Vec<RiskFactor>,
    pub opportunities: Vec<RiskFactor>,
    pub compliance_status: ComplianceStatus,
    pub recommendations: Vec<Recommendation>,
    pub analyzer_results: Vec<AnalyzerResult>,
    pub degraded_analyzers: Vec<String>,
    pub category_breakdown: Vec<CategoryBreakdown>,
    pub financial_impact: FinancialImpact,
}

impl AggregatedRiskProfile {
    pub fn successful_analyzers(&self) -> usize {
        self.analyzer_results.iter().filter(|r| r.success).count()
    }

    pub fn count_at(&self, severity: Severity) -> usize {
        self.risks.iter().filter(|r| r.severity == severity).count()
    }
}
