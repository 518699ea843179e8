//! Context record domain model.
//!
//! The context record describes the defect under investigation. It is created
//! once at the start of a run and never mutated afterwards.

use serde::{Deserialize, Serialize};

use super::task_spec::TaskId;
use super::theory::TheoryPriority;

/// Category of defect being investigated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefectCategory {
    /// A crash with a stack trace or oops report.
    Crash,
    /// A behavioural or performance regression.
    Regression,
    /// A patch under review.
    PatchReview,
}

impl DefectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crash => "crash",
            Self::Regression => "regression",
            Self::PatchReview => "patch-review",
        }
    }
}

/// A unit of the defect suitable for fan-out analysis (for example one group
/// of related hunks in a patch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSegment {
    /// Short identifier, unique within the context (e.g. `FILE-1`).
    pub id: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Symbols touched by this segment.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Raw segment body (diff text, log excerpt...).
    #[serde(default)]
    pub body: String,
}

/// An initial hypothesis supplied with the defect report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedTheory {
    pub description: String,
    #[serde(default)]
    pub priority: TheoryPriority,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Immutable description of the defect under investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextRecord {
    /// Raw reference the record was prepared from (id, path or free text).
    pub reference: String,
    pub category: DefectCategory,
    /// Raw evidence text (oops, bisect log, commit message...).
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub affected_symbols: Vec<String>,
    /// Steps that reproduce the defect, when known.
    #[serde(default)]
    pub reproducer: Option<String>,
    #[serde(default)]
    pub segments: Vec<ContextSegment>,
    #[serde(default)]
    pub seed_theories: Vec<SeedTheory>,
    #[serde(default)]
    pub subsystems: Vec<String>,
}

impl ContextRecord {
    pub fn new(reference: impl Into<String>, category: DefectCategory) -> Self {
        Self {
            reference: reference.into(),
            category,
            evidence: String::new(),
            affected_symbols: Vec::new(),
            reproducer: None,
            segments: Vec::new(),
            seed_theories: Vec::new(),
            subsystems: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_reproducer(mut self, reproducer: impl Into<String>) -> Self {
        self.reproducer = Some(reproducer.into());
        self
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_segment(mut self, segment: ContextSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_seed(
        mut self,
        description: impl Into<String>,
        priority: TheoryPriority,
        symbols: &[&str],
    ) -> Self {
        self.seed_theories.push(SeedTheory {
            description: description.into(),
            priority,
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
        });
        self
    }

    /// Whether a usable reproducing procedure is attached.
    pub fn has_reproducer(&self) -> bool {
        self.reproducer
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    /// Whether the evidence references any of the given crash-reporting markers
    /// (case-insensitive substring match).
    pub fn references_any(&self, markers: &[String]) -> bool {
        let haystack = self.evidence.to_lowercase();
        markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .any(|m| haystack.contains(&m.to_lowercase()))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.reference.trim().is_empty() {
            return Err("Context reference cannot be empty".to_string());
        }
        // Segment ids become task id components, so they must stay distinct
        // after sanitizing.
        let mut seen = std::collections::HashMap::new();
        for segment in &self.segments {
            if segment.id.trim().is_empty() {
                return Err("Context segment id cannot be empty".to_string());
            }
            let key = TaskId::sanitized(&[segment.id.as_str()]);
            if let Some(previous) = seen.insert(key, segment.id.as_str()) {
                return if previous == segment.id {
                    Err(format!("Duplicate context segment id: {}", segment.id))
                } else {
                    Err(format!(
                        "Context segment ids {previous:?} and {:?} map to the same unit id",
                        segment.id
                    ))
                };
            }
        }
        if let Some(seed) = self
            .seed_theories
            .iter()
            .find(|s| s.description.trim().is_empty())
        {
            return Err(format!(
                "Seed theory with symbols {:?} has an empty description",
                seed.symbols
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproducer_detection() {
        let ctx = ContextRecord::new("bug-1", DefectCategory::Crash);
        assert!(!ctx.has_reproducer());
        assert!(!ctx.clone().with_reproducer("   ").has_reproducer());
        assert!(ctx.with_reproducer("run ./repro.sh").has_reproducer());
    }

    #[test]
    fn test_marker_matching_is_case_insensitive() {
        let ctx = ContextRecord::new("bug-2", DefectCategory::Crash)
            .with_evidence("Reported-by: SYZBOT+abc@syzkaller.appspotmail.com");
        assert!(ctx.references_any(&["syzbot".to_string()]));
        assert!(!ctx.references_any(&["bugzilla".to_string(), String::new()]));
    }

    #[test]
    fn test_validation_rejects_duplicate_segments() {
        let segment = ContextSegment {
            id: "FILE-1".to_string(),
            title: String::new(),
            symbols: vec![],
            body: String::new(),
        };
        let ctx = ContextRecord::new("patch", DefectCategory::PatchReview)
            .with_segment(segment.clone())
            .with_segment(segment);
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_ids_equal_after_sanitizing() {
        let segment = |id: &str| ContextSegment {
            id: id.to_string(),
            title: String::new(),
            symbols: vec![],
            body: String::new(),
        };
        let ctx = ContextRecord::new("patch", DefectCategory::PatchReview)
            .with_segment(segment("FILE 1"))
            .with_segment(segment("FILE_1"));
        let err = ctx.validate().unwrap_err();
        assert!(err.contains("same unit id"), "{err}");

        let ctx = ContextRecord::new("patch", DefectCategory::PatchReview)
            .with_segment(segment("FILE-1"))
            .with_segment(segment("FILE_1"));
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"reference":"x","category":"crash","bogus":1}"#;
        assert!(serde_json::from_str::<ContextRecord>(json).is_err());
    }
}
