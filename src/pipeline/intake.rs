//! Document intake seam. Extraction itself (OCR, PDF parsing) lives behind
//! [`DocumentIntake`]; the pipeline only sees text and string-valued fields.

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::error::IntakeError;

const MAX_FIELD_KEY_CHARS: usize = 48;
const MAX_FIELD_KEY_WORDS: usize = 6;

#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl DocumentInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        DocumentInput {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into().into_bytes(), "text/plain")
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub extracted_text: String,
    pub structured_fields: BTreeMap<String, String>,
    pub success: bool,
    pub error: Option<String>,
}

impl ExtractedDocument {
    pub fn failed(error: impl Into<String>) -> Self {
        ExtractedDocument {
            success: false,
            error: Some(error.into()),
            ..ExtractedDocument::default()
        }
    }
}

pub trait DocumentIntake: Send + Sync {
    fn extract<'a>(
        &'a self,
        document: &'a DocumentInput,
    ) -> BoxFuture<'a, Result<ExtractedDocument, IntakeError>>;
}

/// Reads plain-text declarations. `Label: value` lines become structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextIntake;

impl DocumentIntake for PlainTextIntake {
    fn extract<'a>(
        &'a self,
        document: &'a DocumentInput,
    ) -> BoxFuture<'a, Result<ExtractedDocument, IntakeError>> {
        let essence = document
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let result = if essence == "text/plain" {
            let text = String::from_utf8_lossy(&document.bytes).into_owned();
            if text.trim().is_empty() {
                Err(IntakeError::Extraction("document contains no text".into()))
            } else {
                Ok(ExtractedDocument {
                    structured_fields: parse_label_lines(&text),
                    extracted_text: text,
                    success: true,
                    error: None,
                })
            }
        } else {
            Err(IntakeError::UnsupportedType(document.mime_type.clone()))
        };
        Box::pin(future::ready(result))
    }
}

fn parse_label_lines(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = value.trim();
        if label.is_empty()
            || value.is_empty()
            || label.len() > MAX_FIELD_KEY_CHARS
            || label.split_whitespace().count() > MAX_FIELD_KEY_WORDS
        {
            continue;
        }
        fields
            .entry(label.to_string())
            .or_insert_with(|| value.to_string());
    }
    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentQuality {
    Good,
    Fair,
    Poor,
}

pub fn assess_quality(document: &ExtractedDocument, config: &PipelineConfig) -> DocumentQuality {
    if !document.success {
        return DocumentQuality::Poor;
    }
    let chars = document.extracted_text.trim().chars().count();
    let fields = document
        .structured_fields
        .values()
        .filter(|v| !v.trim().is_empty())
        .count();

    if chars >= config.good_text_chars || fields >= config.good_field_count {
        DocumentQuality::Good
    } else if chars < config.poor_text_chars && fields < config.poor_field_count {
        DocumentQuality::Poor
    } else {
        DocumentQuality::Fair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_lines_become_fields() {
        let doc = DocumentInput::text(
            "Policy Type: Auto\nInsurer: Example Mutual\nThis sentence has far too many words before the colon appears: yes\nDeductible: $1,000\n",
        );
        let extracted = PlainTextIntake.extract(&doc).await.unwrap();

        assert!(extracted.success);
        assert_eq!(extracted.structured_fields.get("Policy Type").map(String::as_str), Some("Auto"));
        assert_eq!(extracted.structured_fields.get("Deductible").map(String::as_str), Some("$1,000"));
        assert_eq!(extracted.structured_fields.len(), 3);
    }

    #[tokio::test]
    async fn unsupported_types_are_rejected() {
        let doc = DocumentInput::new(vec![1, 2, 3], "application/pdf");
        assert!(matches!(
            PlainTextIntake.extract(&doc).await,
            Err(IntakeError::UnsupportedType(_))
        ));
    }

    #[test]
    fn quality_bands() {
        let config = PipelineConfig::default();
        let short = ExtractedDocument {
            extracted_text: "auto policy".into(),
            success: true,
            ..ExtractedDocument::default()
        };
        let long = ExtractedDocument {
            extracted_text: "coverage ".repeat(200),
            success: true,
            ..ExtractedDocument::default()
        };
        let medium = ExtractedDocument {
            extracted_text: "coverage ".repeat(40),
            success: true,
            ..ExtractedDocument::default()
        };

        assert_eq!(assess_quality(&short, &config), DocumentQuality::Poor);
        assert_eq!(assess_quality(&long, &config), DocumentQuality::Good);
        assert_eq!(assess_quality(&medium, &config), DocumentQuality::Fair);
        assert_eq!(
            assess_quality(&ExtractedDocument::failed("ocr"), &config),
            DocumentQuality::Poor
        );
    }
}
