//! Context preparation from a reference on disk or free text.
//!
//! - `*.json`: a serialized [`ContextRecord`].
//! - `*.diff` / `*.patch`: a patch under review, one segment per changed file.
//! - any other existing file: its contents become the evidence text.
//! - anything else: the reference itself is the evidence text.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ContextRecord, ContextSegment, DefectCategory};
use crate::domain::ports::ContextPreparer;

/// File-based context preparer.
#[derive(Debug, Clone)]
pub struct JsonContextPreparer {
    /// Category for references that do not carry one.
    default_category: DefectCategory,
}

impl JsonContextPreparer {
    pub fn new(default_category: DefectCategory) -> Self {
        Self { default_category }
    }

    fn from_json(reference: &str, bytes: &[u8]) -> DomainResult<ContextRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::ContextPreparation(format!("{reference}: {e}")))
    }

    fn from_patch(reference: &str, text: String) -> ContextRecord {
        let mut record = ContextRecord::new(reference, DefectCategory::PatchReview);
        for (idx, (path, body)) in split_patch(&text).into_iter().enumerate() {
            record = record.with_segment(ContextSegment {
                id: format!("FILE-{}", idx + 1),
                title: path,
                symbols: Vec::new(),
                body,
            });
        }
        record.with_evidence(text)
    }
}

impl Default for JsonContextPreparer {
    fn default() -> Self {
        Self::new(DefectCategory::Crash)
    }
}

/// Split a unified diff into `(path, text)` per changed file.
///
/// Text before the first file header (the commit message) is not a segment.
fn split_patch(text: &str) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let path = rest
                .split_whitespace()
                .last()
                .map(|p| p.trim_start_matches("b/").to_string())
                .unwrap_or_default();
            files.push((path, String::new()));
        }
        if let Some((_, body)) = files.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    files
}

#[async_trait]
impl ContextPreparer for JsonContextPreparer {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn prepare(&self, reference: &str) -> DomainResult<ContextRecord> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(DomainError::ContextPreparation(
                "empty defect reference".to_string(),
            ));
        }

        let path = Path::new(trimmed);
        let is_file = tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file());
        let record = if is_file {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| DomainError::ContextPreparation(format!("{trimmed}: {e}")))?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => Self::from_json(trimmed, &bytes)?,
                Some("diff" | "patch") => {
                    Self::from_patch(trimmed, String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => ContextRecord::new(trimmed, self.default_category)
                    .with_evidence(String::from_utf8_lossy(&bytes).into_owned()),
            }
        } else {
            ContextRecord::new(trimmed, self.default_category).with_evidence(trimmed)
        };

        record.validate().map_err(DomainError::ContextPreparation)?;
        tracing::debug!(
            reference = %record.reference,
            category = record.category.as_str(),
            segments = record.segments.len(),
            seeds = record.seed_theories.len(),
            "context prepared"
        );
        Ok(record)
    }
}
