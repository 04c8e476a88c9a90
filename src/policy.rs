//! Policy and profile inputs.
//!
//! Everything coming from an extractor or a form is a string. Parsing is deliberately
//! forgiving: an unreadable amount becomes 0 (or `None` for profile values) instead of an
//! error, and unknown keys are kept in `fields` for classification.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Auto,
    Home,
    Renters,
    Life,
    Health,
    Umbrella,
    Business,
    Unknown,
}

impl PolicyType {
    pub const KNOWN: [PolicyType; 7] = [
        PolicyType::Auto,
        PolicyType::Home,
        PolicyType::Renters,
        PolicyType::Life,
        PolicyType::Health,
        PolicyType::Umbrella,
        PolicyType::Business,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyType::Auto => "auto",
            PolicyType::Home => "home",
            PolicyType::Renters => "renters",
            PolicyType::Life => "life",
            PolicyType::Health => "health",
            PolicyType::Umbrella => "umbrella",
            PolicyType::Business => "business",
            PolicyType::Unknown => "unknown",
        }
    }

    /// Accepts the usual spellings found on declaration pages and forms.
    pub fn parse(raw: &str) -> Option<PolicyType> {
        let lower = raw.trim().to_lowercase();
        let kind = match lower.as_str() {
            "auto" | "automobile" | "car" | "vehicle" | "motor" | "personal auto" => {
                PolicyType::Auto
            }
            "home" | "homeowners" | "homeowner" | "homeowner's" | "ho-3" | "dwelling" => {
                PolicyType::Home
            }
            "renters" | "renter" | "renter's" | "tenant" | "ho-4" => PolicyType::Renters,
            "life" | "term life" | "whole life" => PolicyType::Life,
            "health" | "medical" => PolicyType::Health,
            "umbrella" | "personal umbrella" | "excess liability" => PolicyType::Umbrella,
            "business" | "commercial" | "bop" | "general liability" => PolicyType::Business,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref MONEY_RE: Regex =
        Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*([kKmM]\b)?").expect("money pattern");
    static ref TEXT_DEDUCTIBLE_RE: Regex =
        Regex::new(r"(?i)deductible[^$\d\n]{0,20}\$?\s*(\d[\d,]*)").expect("deductible pattern");
    static ref TEXT_PREMIUM_RE: Regex =
        Regex::new(r"(?i)premium[^$\d\n]{0,20}\$?\s*(\d[\d,]*(?:\.\d+)?)").expect("premium pattern");
    static ref TEXT_COVERAGE_RES: Vec<(&'static str, Regex)> = TEXT_COVERAGES
        .iter()
        .filter_map(|(name, phrase)| {
            let pattern = format!(
                r"(?i){}[^$\d\n]{{0,40}}\$?\s*(\d[\d,]*(?:\.\d+)?\s*[kK]?)(?:\s*/\s*\$?\s*(\d[\d,]*(?:\.\d+)?\s*[kK]?))?",
                phrase
            );
            Regex::new(&pattern).ok().map(|re| (*name, re))
        })
        .collect();
}

/// Coverage phrases recognised in free text, most specific first.
const TEXT_COVERAGES: &[(&str, &str)] = &[
    ("Uninsured Motorist", r"uninsured motorists?"),
    ("Underinsured Motorist", r"underinsured motorists?"),
    ("Bodily Injury Liability", r"bodily injury(?: liability)?"),
    ("Property Damage Liability", r"property damage(?: liability)?"),
    ("Collision", r"collision"),
    ("Comprehensive", r"comprehensive"),
    ("Medical Payments", r"medical payments"),
    ("Personal Injury Protection", r"personal injury protection"),
    ("Dwelling", r"dwelling(?: coverage)?"),
    ("Other Structures", r"other structures"),
    ("Personal Property", r"personal property"),
    ("Loss of Use", r"loss of use"),
    ("Personal Liability", r"personal liability"),
    ("Death Benefit", r"death benefit"),
    ("General Liability", r"general liability"),
    ("Umbrella Liability", r"(?:umbrella|excess) liability"),
];

/// Parses "$25,000", "25k", "1.5M" and similar. Anything unreadable is 0.
pub fn parse_money(raw: &str) -> f64 {
    let cleaned = raw.replace(['$', ','], "");
    MONEY_RE
        .captures(&cleaned)
        .and_then(|caps| {
            let value: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
            let scale = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(suffix) if suffix == "k" => 1_000.0,
                Some(suffix) if suffix == "m" => 1_000_000.0,
                _ => 1.0,
            };
            Some(value * scale)
        })
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(0.0)
}

/// Split limits such as "25/50/25" (thousands) or "$100,000/$300,000".
pub fn parse_split_limits(raw: &str) -> Option<Vec<f64>> {
    if !raw.contains('/') {
        return None;
    }
    let parts: Vec<f64> = raw
        .split('/')
        .map(|part| {
            let value = parse_money(part);
            if value > 0.0 && value < 1_000.0 {
                value * 1_000.0
            } else {
                value
            }
        })
        .collect();
    if parts.len() >= 2 && parts.iter().any(|v| *v > 0.0) {
        Some(parts)
    } else {
        None
    }
}

/// Lowercases and collapses punctuation so "Bodily-Injury Liability" and
/// "bodily injury liability" compare equal.
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const DECLINE_WINDOW: usize = 4;
const DECLINE_WORDS: [&str; 6] = ["rejected", "declined", "excluded", "waived", "none", "na"];

/// Looks at the few normalized words after a coverage name for a decline marker.
/// Scanning stops at the first number since that is a limit.
fn declined_after(rest: &str) -> bool {
    let words: Vec<&str> = rest
        .split_whitespace()
        .take(DECLINE_WINDOW)
        .take_while(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .collect();
    words.iter().enumerate().any(|(i, word)| {
        DECLINE_WORDS.contains(word)
            || (*word == "n" && words.get(i + 1) == Some(&"a"))
            || (*word == "not" && words.get(i + 1) == Some(&"covered"))
    })
}

/// Substring match in either direction on normalized names.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

fn normalize_key(raw: &str) -> String {
    normalize_name(raw).replace(' ', "_")
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageLine {
    pub name: String,
    pub limit: f64,
    pub per_accident_limit: Option<f64>,
    pub deductible: f64,
}

impl CoverageLine {
    pub fn new(name: impl Into<String>, limit: f64) -> Self {
        CoverageLine {
            name: name.into(),
            limit,
            per_accident_limit: None,
            deductible: 0.0,
        }
    }

    pub fn with_per_accident(mut self, limit: f64) -> Self {
        self.per_accident_limit = Some(limit);
        self
    }

    pub fn with_deductible(mut self, deductible: f64) -> Self {
        self.deductible = deductible;
        self
    }

    pub fn is_liability(&self) -> bool {
        let name = normalize_name(&self.name);
        name.contains("liability") || name.contains("bodily injury")
    }
}

/// Normalized policy terms the analyzers work from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyData {
    pub declared_type: Option<PolicyType>,
    pub policy_number: Option<String>,
    pub insurer: Option<String>,
    pub annual_premium: f64,
    pub deductible: f64,
    pub coverages: Vec<CoverageLine>,
    pub fields: BTreeMap<String, String>,
    /// Normalized document text, kept for coverages mentioned without a readable limit.
    #[serde(skip)]
    pub source_text: String,
}

impl PolicyData {
    /// Builds policy data from structured fields first, then fills gaps from free text.
    pub fn from_sources(text: &str, fields: &BTreeMap<String, String>) -> Self {
        let mut policy = PolicyData {
            fields: fields.clone(),
            source_text: normalize_name(text),
            ..PolicyData::default()
        };
        let mut coverage_deductibles: Vec<(String, f64)> = Vec::new();

        for (raw_key, value) in fields {
            let key = normalize_key(raw_key);
            match key.as_str() {
                "policy_type" | "type" | "line_of_business" => {
                    policy.declared_type = PolicyType::parse(value);
                }
                "policy_number" | "policy_no" => policy.policy_number = Some(value.trim().into()),
                "insurer" | "carrier" | "company" => policy.insurer = Some(value.trim().into()),
                "premium" | "annual_premium" | "total_premium" => {
                    policy.annual_premium = parse_money(value)
                }
                "monthly_premium" if policy.annual_premium == 0.0 => {
                    policy.annual_premium = parse_money(value) * 12.0
                }
                "deductible" => policy.deductible = parse_money(value),
                "bodily_injury" | "bodily_injury_liability" => {
                    policy.upsert_coverage(limit_line("Bodily Injury Liability", value));
                }
                "property_damage" | "property_damage_liability" => {
                    policy.upsert_coverage(limit_line("Property Damage Liability", value));
                }
                "liability_limits" | "auto_liability_limits" => {
                    if let Some(parts) = parse_split_limits(value) {
                        let mut bi = CoverageLine::new("Bodily Injury Liability", parts[0]);
                        if let Some(per_accident) = parts.get(1) {
                            bi = bi.with_per_accident(*per_accident);
                        }
                        policy.upsert_coverage(bi);
                        if let Some(pd) = parts.get(2) {
                            policy.upsert_coverage(CoverageLine::new(
                                "Property Damage Liability",
                                *pd,
                            ));
                        }
                    }
                }
                _ => {
                    if let Some(name) = key.strip_prefix("coverage_") {
                        policy.upsert_coverage(limit_line(&title_case(name), value));
                    } else if let Some(name) = key.strip_suffix("_limit") {
                        policy.upsert_coverage(limit_line(&title_case(name), value));
                    } else if let Some(name) = key.strip_suffix("_deductible") {
                        coverage_deductibles.push((title_case(name), parse_money(value)));
                    }
                }
            }
        }

        for (name, deductible) in coverage_deductibles {
            match policy.coverages.iter_mut().find(|c| names_match(&c.name, &name)) {
                Some(line) => line.deductible = deductible,
                None => policy
                    .coverages
                    .push(CoverageLine::new(name, 0.0).with_deductible(deductible)),
            }
        }

        policy.fill_from_text(text);
        policy
    }

    fn fill_from_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        for (name, re) in TEXT_COVERAGE_RES.iter() {
            if self.coverage(name).is_some() {
                continue;
            }
            if let Some(caps) = re.captures(text) {
                let limit = caps.get(1).map(|m| parse_money(m.as_str())).unwrap_or(0.0);
                if limit <= 0.0 {
                    continue;
                }
                let mut line = CoverageLine::new(*name, limit);
                if let Some(second) = caps.get(2) {
                    let per_accident = parse_money(second.as_str());
                    if per_accident > 0.0 {
                        line = line.with_per_accident(per_accident);
                    }
                }
                self.coverages.push(line);
            }
        }
        if self.deductible == 0.0 {
            if let Some(caps) = TEXT_DEDUCTIBLE_RE.captures(text) {
                self.deductible = caps.get(1).map(|m| parse_money(m.as_str())).unwrap_or(0.0);
            }
        }
        if self.annual_premium == 0.0 {
            if let Some(caps) = TEXT_PREMIUM_RE.captures(text) {
                self.annual_premium = caps.get(1).map(|m| parse_money(m.as_str())).unwrap_or(0.0);
            }
        }
    }

    fn upsert_coverage(&mut self, line: CoverageLine) {
        match self
            .coverages
            .iter_mut()
            .find(|c| normalize_name(&c.name) == normalize_name(&line.name))
        {
            Some(existing) => {
                existing.limit = line.limit;
                if line.per_accident_limit.is_some() {
                    existing.per_accident_limit = line.per_accident_limit;
                }
            }
            None => self.coverages.push(line),
        }
    }

    pub fn with_coverage(mut self, line: CoverageLine) -> Self {
        self.upsert_coverage(line);
        self
    }

    pub fn coverage(&self, name: &str) -> Option<&CoverageLine> {
        self.coverages.iter().find(|c| names_match(&c.name, name))
    }

    /// True when the coverage is named in the document even if no limit could be read.
    /// A mention followed by a decline marker ("rejected", "n/a", ...) does not count.
    pub fn mentions(&self, name: &str) -> bool {
        let needle = normalize_name(name);
        if needle.is_empty() {
            return false;
        }
        self.source_text
            .match_indices(&needle)
            .any(|(at, _)| !declined_after(&self.source_text[at + needle.len()..]))
    }

    pub fn bodily_injury(&self) -> Option<&CoverageLine> {
        self.coverage("bodily injury")
    }

    pub fn property_damage(&self) -> Option<&CoverageLine> {
        self.coverage("property damage")
    }

    /// Sum of the highest limit on every liability line.
    pub fn total_liability_limits(&self) -> f64 {
        self.coverages
            .iter()
            .filter(|c| c.is_liability())
            .map(|c| c.limit.max(c.per_accident_limit.unwrap_or(0.0)))
            .sum()
    }

    /// The single largest liability limit, used when sizing against assets.
    pub fn primary_liability_limit(&self) -> f64 {
        self.coverages
            .iter()
            .filter(|c| c.is_liability())
            .map(|c| c.limit.max(c.per_accident_limit.unwrap_or(0.0)))
            .fold(0.0, f64::max)
    }

    pub fn effective_deductible(&self) -> f64 {
        if self.deductible > 0.0 {
            return self.deductible;
        }
        self.coverages
            .iter()
            .map(|c| c.deductible)
            .fold(0.0, f64::max)
    }

    pub fn distinct_deductibles(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .coverages
            .iter()
            .map(|c| c.deductible)
            .chain(std::iter::once(self.deductible))
            .filter(|d| *d > 0.0)
            .collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        values
    }

    pub fn field_count(&self) -> usize {
        self.fields.values().filter(|v| !v.trim().is_empty()).count()
    }
}

fn limit_line(name: &str, value: &str) -> CoverageLine {
    match parse_split_limits(value) {
        Some(parts) => {
            let line = CoverageLine::new(name, parts[0]);
            match parts.get(1) {
                Some(second) => line.with_per_accident(*second),
                None => line,
            }
        }
        None => CoverageLine::new(name, parse_money(value)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTolerance {
    pub fn parse(raw: &str) -> Option<RiskTolerance> {
        match raw.trim().to_lowercase().as_str() {
            "low" | "conservative" => Some(RiskTolerance::Low),
            "medium" | "moderate" => Some(RiskTolerance::Medium),
            "high" | "aggressive" => Some(RiskTolerance::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaimRecord {
    pub date: Option<String>,
    #[serde(deserialize_with = "lenient_money")]
    pub amount: Option<f64>,
    pub description: Option<String>,
}

impl ClaimRecord {
    pub fn dated(date: &str) -> Self {
        ClaimRecord {
            date: Some(date.to_string()),
            ..ClaimRecord::default()
        }
    }

    /// `None` when the date is missing or unreadable.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let raw = self.date.as_deref()?.trim();
        let date_part = raw.split('T').next().unwrap_or(raw);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(date_part, "%m/%d/%Y"))
            .ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(deserialize_with = "lenient_money")]
    pub income: Option<f64>,
    #[serde(deserialize_with = "lenient_money")]
    pub assets: Option<f64>,
    #[serde(deserialize_with = "lenient_money")]
    pub home_value: Option<f64>,
    #[serde(deserialize_with = "lenient_money")]
    pub emergency_fund: Option<f64>,
    #[serde(deserialize_with = "lenient_tolerance")]
    pub risk_tolerance: Option<RiskTolerance>,
    pub family_status: Option<String>,
    pub claim_history: Vec<ClaimRecord>,
    pub has_pool: bool,
    pub has_rental_property: bool,
    pub has_teen_drivers: bool,
}

impl UserProfile {
    pub fn with_income(mut self, income: f64) -> Self {
        self.income = Some(income);
        self
    }

    pub fn with_assets(mut self, assets: f64) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_home_value(mut self, value: f64) -> Self {
        self.home_value = Some(value);
        self
    }

    pub fn with_emergency_fund(mut self, fund: f64) -> Self {
        self.emergency_fund = Some(fund);
        self
    }

    pub fn with_risk_tolerance(mut self, tolerance: RiskTolerance) -> Self {
        self.risk_tolerance = Some(tolerance);
        self
    }

    pub fn with_claim(mut self, claim: ClaimRecord) -> Self {
        self.claim_history.push(claim);
        self
    }

    pub fn tolerance(&self) -> RiskTolerance {
        self.risk_tolerance.unwrap_or_default()
    }

    pub fn income(&self) -> f64 {
        self.income.unwrap_or(0.0)
    }

    pub fn monthly_income(&self) -> f64 {
        self.income() / 12.0
    }

    pub fn total_assets(&self) -> f64 {
        self.assets.unwrap_or(0.0) + self.home_value.unwrap_or(0.0)
    }

    pub fn has_financials(&self) -> bool {
        self.income.is_some() || self.assets.is_some()
    }

    pub fn populated_fields(&self) -> usize {
        [
            self.income.is_some(),
            self.assets.is_some(),
            self.home_value.is_some(),
            self.emergency_fund.is_some(),
            self.risk_tolerance.is_some(),
            self.family_status.as_deref().is_some_and(|s| !s.trim().is_empty()),
            !self.claim_history.is_empty(),
            self.has_pool,
            self.has_rental_property,
            self.has_teen_drivers,
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MoneyRepr {
    Number(f64),
    Text(String),
}

fn lenient_money<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr: Option<MoneyRepr> = Option::deserialize(deserializer).unwrap_or(None);
    Ok(match repr {
        Some(MoneyRepr::Number(value)) if value.is_finite() => Some(value),
        Some(MoneyRepr::Text(text)) if MONEY_RE.is_match(&text) => Some(parse_money(&text)),
        _ => None,
    })
}

fn lenient_tolerance<'de, D>(deserializer: D) -> Result<Option<RiskTolerance>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer).unwrap_or(None);
    Ok(raw.as_deref().and_then(RiskTolerance::parse))
}
