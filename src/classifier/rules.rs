use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::policy::PolicyType;

pub const RULES_OVERRIDE_ENV: &str = "POLICY_RISK_RULES_OVERRIDE";
const EMBEDDED_RULES: &str = include_str!("../../rules/policy_rules.json");

lazy_static! {
    static ref DEFAULT_RULES: Result<Arc<PolicyRules>, String> = load_rules_result()
        .map(Arc::new)
        .map_err(|e| e.to_string());
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRules {
    pub policy_types: Vec<PolicyTypeRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTypeRule {
    pub policy_type: PolicyType,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    #[serde(default)]
    pub optional_keywords: Vec<String>,
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,
    /// Regexes tested against `key` and `key: value` of each structured field.
    #[serde(default)]
    pub field_patterns: Vec<String>,
    #[serde(default)]
    pub expected_coverages: Vec<ExpectedCoverage>,
    /// Baseline liability limit used when sizing coverage against assets.
    pub base_liability: Option<f64>,
    pub recommended_limits: Option<RecommendedLimits>,
    pub statutory_minimum: Option<StatutoryMinimum>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedCoverage {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub recommended: bool,
    #[serde(default)]
    pub min_limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendedLimits {
    #[serde(default)]
    pub bodily_injury: f64,
    #[serde(default)]
    pub property_damage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatutoryMinimum {
    pub per_person: f64,
    pub per_accident: f64,
}

impl PolicyRules {
    /// Parses and validates a rule set. Nothing half-valid is ever returned.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let rules: PolicyRules = serde_json::from_str(raw)?;
        rules.validate()?;
        Ok(rules)
    }

    /// The process-wide rule set, loaded once.
    pub fn shared_default() -> Result<Arc<PolicyRules>, ConfigError> {
        DEFAULT_RULES
            .as_ref()
            .map(Arc::clone)
            .map_err(|message| ConfigError::InvalidRule {
                policy_type: "*".to_string(),
                reason: message.clone(),
            })
    }

    pub fn rule_for(&self, policy_type: PolicyType) -> Option<&PolicyTypeRule> {
        self.policy_types
            .iter()
            .find(|rule| rule.policy_type == policy_type)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &self.policy_types {
            let invalid = |reason: String| ConfigError::InvalidRule {
                policy_type: rule.policy_type.to_string(),
                reason,
            };

            if rule.policy_type == PolicyType::Unknown {
                return Err(invalid("'unknown' cannot carry rules".into()));
            }
            if !seen.insert(rule.policy_type) {
                return Err(invalid("policy type listed more than once".into()));
            }
            if rule.required_keywords.is_empty()
                && rule.optional_keywords.is_empty()
                && rule.field_patterns.is_empty()
            {
                return Err(invalid("no keywords or field patterns configured".into()));
            }

            let keywords = rule
                .required_keywords
                .iter()
                .chain(&rule.optional_keywords)
                .chain(&rule.exclusion_keywords);
            for keyword in keywords {
                if keyword.trim().is_empty() {
                    return Err(invalid("empty keyword".into()));
                }
            }

            for pattern in &rule.field_patterns {
                Regex::new(pattern)
                    .map_err(|e| invalid(format!("bad field pattern '{}': {}", pattern, e)))?;
            }

            for coverage in &rule.expected_coverages {
                if coverage.name.trim().is_empty() {
                    return Err(invalid("expected coverage without a name".into()));
                }
                if !coverage.min_limit.is_finite() || coverage.min_limit < 0.0 {
                    return Err(invalid(format!(
                        "negative minimum limit for '{}'",
                        coverage.name
                    )));
                }
            }

            if let Some(base) = rule.base_liability {
                if !base.is_finite() || base < 0.0 {
                    return Err(invalid("negative base liability".into()));
                }
            }
        }
        Ok(())
    }
}

/// Override file from the environment, then the user config dir, then the embedded table.
pub fn load_rules_result() -> Result<PolicyRules, ConfigError> {
    match rules_override_path() {
        Some(path) => {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            log::info!("Loading policy rules from {}", path.display());
            PolicyRules::from_json(&raw)
        }
        None => PolicyRules::from_json(EMBEDDED_RULES),
    }
}

fn rules_override_path() -> Option<PathBuf> {
    if let Ok(value) = env::var(RULES_OVERRIDE_ENV) {
        if !value.trim().is_empty() {
            return Some(PathBuf::from(value.trim()));
        }
    }
    let mut path = dirs::config_dir()?;
    path.push("policy-risk");
    path.push("policy_rules.json");
    path.exists().then_some(path)
}
