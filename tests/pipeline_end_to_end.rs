use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use lazy_static::lazy_static;
use policy_risk_lib::classifier::{load_rules_result, RULES_OVERRIDE_ENV};
use policy_risk_lib::ops::StageStatus;
use policy_risk_lib::pipeline::compile::letter_rating;
use policy_risk_lib::risk::{FactorKind, RiskCategory, Severity};
use policy_risk_lib::{
    AnalysisPipeline, DocumentInput, PipelineConfig, PolicyClassifier, PolicyType, RiskLevel,
    Stage, UserProfile,
};
use tempfile::TempDir;

lazy_static! {
    static ref TEST_ENV_GUARD: Mutex<()> = Mutex::new(());
}

const AUTO_DECLARATIONS: &str = "\
Personal Auto Policy Declarations
Policy Type: Auto
Insurer: Example Mutual
Policy Number: PA-1029384
Bodily Injury Liability: $25,000/$50,000
Deductible: $1,000
Annual Premium: $1,380
VIN: 1HGCV1F3XKA012345
Garaging ZIP: 43215

Covered vehicle: 2019 Honda Accord sedan, garaged at the insured address.
Each listed driver is covered for bodily injury claims brought by third parties.
";

const OVERRIDE_RULES_JSON: &str = r#"{
    "policy_types": [
        {
            "policy_type": "auto",
            "required_keywords": ["motorcar"],
            "expected_coverages": [
                { "name": "Bodily Injury Liability", "required": true, "min_limit": 50000 }
            ],
            "base_liability": 100000
        }
    ]
}"#;

fn acquire_env_guard() -> std::sync::MutexGuard<'static, ()> {
    TEST_ENV_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RulesOverrideEnv {
    _dir: TempDir,
    previous: Option<String>,
}

impl RulesOverrideEnv {
    fn new(contents: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("policy_rules.json");
        fs::write(&path, contents).expect("write rules override");

        let previous = std::env::var(RULES_OVERRIDE_ENV).ok();
        std::env::set_var(RULES_OVERRIDE_ENV, &path);
        RulesOverrideEnv {
            _dir: dir,
            previous,
        }
    }
}

impl Drop for RulesOverrideEnv {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(prev) => std::env::set_var(RULES_OVERRIDE_ENV, prev),
            None => std::env::remove_var(RULES_OVERRIDE_ENV),
        }
    }
}

fn exposed_household() -> UserProfile {
    UserProfile::default()
        .with_income(120_000.0)
        .with_assets(500_000.0)
        .with_emergency_fund(500.0)
}

#[tokio::test]
async fn underinsured_auto_policy_is_flagged() {
    let _guard = acquire_env_guard();
    let pipeline = AnalysisPipeline::new(PipelineConfig::default()).expect("pipeline");

    let outcome = pipeline
        .run(
            Some(DocumentInput::text(AUTO_DECLARATIONS).with_file_name("dec-page.txt")),
            None,
            Some(exposed_household()),
            None,
        )
        .await;

    assert!(outcome.success, "run failed: {:?}", outcome.error);
    let result = outcome.result.expect("result");

    assert!(result.classification.is_confident);
    assert_eq!(result.classification.primary_type, PolicyType::Auto);
    assert_eq!(result.policy_summary.resolved_type, PolicyType::Auto);
    assert!(matches!(
        result.risk.risk_level,
        RiskLevel::High | RiskLevel::Critical
    ));

    let titles: Vec<&str> = result.risk.risks.iter().map(|r| r.title.as_str()).collect();
    assert!(
        titles.contains(&"Missing Property Damage Liability coverage"),
        "{:?}",
        titles
    );
    assert!(result.risk.risks.iter().any(|r| {
        r.category == RiskCategory::CoverageGaps
            && matches!(r.severity, Severity::High | Severity::Critical)
    }));
    assert!(result
        .risk
        .opportunities
        .iter()
        .any(|r| r.title == "Umbrella policy recommended"));

    let fund = result
        .risk
        .risks
        .iter()
        .find(|r| r.title == "Deductible exceeds emergency fund")
        .expect("affordability factor");
    assert_eq!(fund.severity, Severity::High);

    assert!(result
        .risk
        .opportunities
        .iter()
        .all(|r| r.kind == FactorKind::Opportunity));
    assert!(!result.risk.critical_issues.is_empty());

    assert_eq!(result.rating, letter_rating(result.overall_score));
    assert!(result.overall_score <= 100);
    assert!(result
        .prioritized_recommendations
        .windows(2)
        .all(|pair| pair[0].priority >= pair[1].priority));
    for (index, item) in result.action_plan.iter().enumerate() {
        assert_eq!(item.step, index + 1);
    }
}

#[tokio::test]
async fn unreadable_document_falls_back_to_manual_fields() {
    let _guard = acquire_env_guard();
    let pipeline = AnalysisPipeline::new(PipelineConfig::default()).expect("pipeline");

    let mut fields = BTreeMap::new();
    fields.insert("policy_type".to_string(), "home".to_string());
    fields.insert("Dwelling Limit".to_string(), "$350,000".to_string());
    fields.insert("Personal Property Limit".to_string(), "$100,000".to_string());
    fields.insert("Personal Liability Limit".to_string(), "$300,000".to_string());
    fields.insert("Deductible".to_string(), "$1,000".to_string());

    let scan = DocumentInput::new(b"%PDF-1.7 binary".to_vec(), "application/pdf");
    let outcome = pipeline.run(Some(scan), Some(fields), None, None).await;

    assert!(outcome.success);
    let document_stage = outcome
        .stages
        .iter()
        .find(|r| r.stage == Stage::DocumentProcessing)
        .expect("document stage");
    assert_eq!(document_stage.status, StageStatus::Degraded);
    assert!(!outcome.warnings.is_empty());

    let result = outcome.result.expect("result");
    assert_eq!(result.policy_summary.resolved_type, PolicyType::Home);
    assert!(result.completeness < 100);
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let _guard = acquire_env_guard();
    let pipeline = AnalysisPipeline::new(PipelineConfig::default()).expect("pipeline");

    let outcome = pipeline
        .run(None, Some(BTreeMap::new()), Some(exposed_household()), None)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage.as_deref(), Some("validation"));
    assert!(outcome.result.is_none());
}

#[test]
fn rules_override_file_replaces_embedded_table() {
    let _guard = acquire_env_guard();
    let _env = RulesOverrideEnv::new(OVERRIDE_RULES_JSON);

    let rules = load_rules_result().expect("override rules");
    assert_eq!(rules.policy_types.len(), 1);

    let classifier = PolicyClassifier::new(&rules).expect("classifier");
    let result = classifier.classify("Motorcar schedule attached", &BTreeMap::new());
    assert_eq!(result.primary_type, PolicyType::Auto);
    assert!(result.is_confident);
}

#[test]
fn broken_rules_override_is_reported() {
    let _guard = acquire_env_guard();
    let _env = RulesOverrideEnv::new(r#"{ "policy_types": [ { "policy_type": "auto" } ] }"#);

    let err = load_rules_result().expect_err("rule without keywords");
    assert!(err.to_string().contains("auto"));
}
