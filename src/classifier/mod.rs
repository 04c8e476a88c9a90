mod rules;

pub use rules::{
    load_rules_result, ExpectedCoverage, PolicyRules, PolicyTypeRule, RecommendedLimits,
    StatutoryMinimum, RULES_OVERRIDE_ENV,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::policy::{normalize_name, PolicyData, PolicyType};

/// Primary type is only reported at or above this score.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;
const REQUIRED_WEIGHT: f64 = 0.4;
const OPTIONAL_WEIGHT: f64 = 0.3;
const FIELD_WEIGHT: f64 = 0.3;
const EXCLUSION_PENALTY: f64 = 0.2;
/// Confidence given to a type taken from user input when classification failed.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    KeywordPattern,
    FallbackUserSupplied,
    EmptyInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub policy_type: PolicyType,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub excluded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub primary_type: PolicyType,
    pub confidence: f64,
    pub is_confident: bool,
    pub candidates: Vec<CandidateScore>,
    pub method: ClassificationMethod,
}

impl ClassificationResult {
    /// Low-confidence stand-in built from whatever type the user declared.
    pub fn fallback(declared: Option<PolicyType>) -> Self {
        let primary_type = declared.unwrap_or(PolicyType::Unknown);
        let candidates = declared
            .map(|policy_type| {
                vec![CandidateScore {
                    policy_type,
                    confidence: FALLBACK_CONFIDENCE,
                    matched_keywords: Vec::new(),
                    excluded: false,
                }]
            })
            .unwrap_or_default();
        ClassificationResult {
            primary_type,
            confidence: if declared.is_some() {
                FALLBACK_CONFIDENCE
            } else {
                0.0
            },
            is_confident: false,
            candidates,
            method: ClassificationMethod::FallbackUserSupplied,
        }
    }

    /// The type analyzers should work against.
    ///
    /// A confident primary wins, then the type the user declared, then the best candidate
    /// with any signal at all.
    pub fn resolved_type(&self, policy: &PolicyData) -> PolicyType {
        if self.is_confident && self.primary_type != PolicyType::Unknown {
            return self.primary_type;
        }
        if let Some(declared) = policy.declared_type {
            return declared;
        }
        if self.primary_type != PolicyType::Unknown {
            return self.primary_type;
        }
        self.candidates
            .first()
            .filter(|c| c.confidence > 0.0)
            .map(|c| c.policy_type)
            .unwrap_or(PolicyType::Unknown)
    }
}

/// A rule keyword matched as a whole word, with an optional plural ending.
struct Keyword {
    text: String,
    re: Regex,
}

impl Keyword {
    fn compile(raw: &str, policy_type: PolicyType) -> Result<Self, ConfigError> {
        let text = raw.trim().to_lowercase();
        let re = Regex::new(&format!(r"\b{}(?:s|es)?\b", regex::escape(&text))).map_err(|e| {
            ConfigError::InvalidRule {
                policy_type: policy_type.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Keyword { text, re })
    }

    fn found_in(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }
}

struct CompiledRule {
    policy_type: PolicyType,
    required: Vec<Keyword>,
    optional: Vec<Keyword>,
    exclusions: Vec<Keyword>,
    patterns: Vec<Regex>,
}

/// Scores every configured policy type against document text and structured fields.
pub struct PolicyClassifier {
    rules: Vec<CompiledRule>,
}

impl PolicyClassifier {
    pub fn new(rules: &PolicyRules) -> Result<Self, ConfigError> {
        rules.validate()?;
        let compiled = rules
            .policy_types
            .iter()
            .map(|rule| {
                let patterns = rule
                    .field_patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| ConfigError::InvalidRule {
                            policy_type: rule.policy_type.to_string(),
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledRule {
                    policy_type: rule.policy_type,
                    required: compile_keywords(&rule.required_keywords, rule.policy_type)?,
                    optional: compile_keywords(&rule.optional_keywords, rule.policy_type)?,
                    exclusions: compile_keywords(&rule.exclusion_keywords, rule.policy_type)?,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(PolicyClassifier { rules: compiled })
    }

    pub fn with_default_rules() -> Result<Self, ConfigError> {
        let rules: Arc<PolicyRules> = PolicyRules::shared_default()?;
        Self::new(&rules)
    }

    pub fn classify(&self, text: &str, fields: &BTreeMap<String, String>) -> ClassificationResult {
        let field_lines: Vec<String> = fields
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .flat_map(|(k, v)| {
                let key = normalize_name(k).replace(' ', "_");
                let line = format!("{}: {}", key, v.trim().to_lowercase());
                [key, line]
            })
            .collect();

        let mut haystack = text.to_lowercase();
        for value in fields.values() {
            haystack.push('\n');
            haystack.push_str(&value.to_lowercase());
        }

        if haystack.trim().is_empty() && field_lines.is_empty() {
            return ClassificationResult {
                primary_type: PolicyType::Unknown,
                confidence: 0.0,
                is_confident: false,
                candidates: self
                    .rules
                    .iter()
                    .map(|rule| CandidateScore {
                        policy_type: rule.policy_type,
                        confidence: 0.0,
                        matched_keywords: Vec::new(),
                        excluded: false,
                    })
                    .collect(),
                method: ClassificationMethod::EmptyInput,
            };
        }

        let mut candidates: Vec<CandidateScore> = self
            .rules
            .iter()
            .map(|rule| score_rule(rule, &haystack, &field_lines))
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.policy_type.cmp(&b.policy_type))
        });

        let top = candidates.first().map(|c| (c.policy_type, c.confidence));
        let (primary_type, confidence) = match top {
            Some((policy_type, score)) if score >= CONFIDENCE_THRESHOLD => (policy_type, score),
            Some((_, score)) => (PolicyType::Unknown, score),
            None => (PolicyType::Unknown, 0.0),
        };

        log::debug!(
            "Classified policy as {} ({:.2}) from {} chars and {} fields",
            primary_type,
            confidence,
            text.len(),
            fields.len()
        );

        ClassificationResult {
            primary_type,
            confidence,
            is_confident: confidence >= CONFIDENCE_THRESHOLD,
            candidates,
            method: ClassificationMethod::KeywordPattern,
        }
    }
}

fn compile_keywords(
    values: &[String],
    policy_type: PolicyType,
) -> Result<Vec<Keyword>, ConfigError> {
    values.iter().map(|v| Keyword::compile(v, policy_type)).collect()
}

fn score_rule(rule: &CompiledRule, haystack: &str, field_lines: &[String]) -> CandidateScore {
    let mut matched_keywords = Vec::new();
    let mut weighted = 0.0;
    let mut applied = 0.0;

    if !rule.required.is_empty() {
        let hits = count_hits(&rule.required, haystack, &mut matched_keywords);
        weighted += REQUIRED_WEIGHT * hits as f64 / rule.required.len() as f64;
        applied += REQUIRED_WEIGHT;
    }

    if !rule.optional.is_empty() {
        let hits = count_hits(&rule.optional, haystack, &mut matched_keywords);
        // Half the optional list is enough for full marks.
        let saturation = rule.optional.len().div_ceil(2) as f64;
        weighted += OPTIONAL_WEIGHT * (hits as f64 / saturation).min(1.0);
        applied += OPTIONAL_WEIGHT;
    }

    if !rule.patterns.is_empty() {
        let hits = rule
            .patterns
            .iter()
            .filter(|re| field_lines.iter().any(|line| re.is_match(line)))
            .count();
        weighted += FIELD_WEIGHT * hits as f64 / rule.patterns.len() as f64;
        applied += FIELD_WEIGHT;
    }

    let mut score = if applied > 0.0 { weighted / applied } else { 0.0 };

    let excluded = rule.exclusions.iter().any(|kw| kw.found_in(haystack));
    if excluded {
        score -= EXCLUSION_PENALTY;
    }

    CandidateScore {
        policy_type: rule.policy_type,
        confidence: score.clamp(0.0, 1.0),
        matched_keywords,
        excluded,
    }
}

fn count_hits(keywords: &[Keyword], haystack: &str, matched: &mut Vec<String>) -> usize {
    let mut hits = 0;
    for keyword in keywords {
        if keyword.found_in(haystack) {
            hits += 1;
            matched.push(keyword.text.clone());
        }
    }
    hits
}
