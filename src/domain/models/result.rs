//! Result record domain model.
//!
//! The result record is the structured output of one worker invocation. The
//! schema is fixed: unknown fields are rejected at deserialization, and
//! [`ResultRecord::validate`] rejects records that parse but are unusable.

use serde::{Deserialize, Serialize};

use super::theory::{TheoryId, TheoryPriority};

/// Severity of a finding. Totally ordered `None < Low < Medium < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Severity {
    fn default() -> Self {
        Self::None
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Typed finding categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    EvidenceFor,
    EvidenceAgainst,
    NewTheory,
    Observation,
}

/// One finding reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Finding {
    pub kind: FindingKind,
    pub text: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Theory this evidence bears on, when it is not the theory under test.
    #[serde(default)]
    pub theory: Option<TheoryId>,
}

impl Finding {
    pub fn new(kind: FindingKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            severity: Severity::None,
            symbols: Vec::new(),
            theory: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.symbols = symbols.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn about(mut self, theory: TheoryId) -> Self {
        self.theory = Some(theory);
        self
    }
}

/// A theory proposed by a worker (`new_theories` / `possible_explanations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedTheory {
    pub description: String,
    #[serde(default)]
    pub priority: TheoryPriority,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Explicitly reopen a terminal theory as a new record.
    #[serde(default)]
    pub reopens: Option<TheoryId>,
}

impl ProposedTheory {
    pub fn new(description: impl Into<String>, priority: TheoryPriority, symbols: &[&str]) -> Self {
        Self {
            description: description.into(),
            priority,
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
            reopens: None,
        }
    }
}

/// Outcome the worker reports for its own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Worker verdict on the theory under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerVerdict {
    Confirmed,
    Eliminated,
    Inconclusive,
}

/// Structured output of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultRecord {
    pub status: ResultStatus,
    #[serde(default)]
    pub verdict: Option<WorkerVerdict>,
    /// The verdict already passed the worker's internal verification step.
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub new_theories: Vec<ProposedTheory>,
    #[serde(default)]
    pub possible_explanations: Vec<ProposedTheory>,
    /// Candidate root-cause commits.
    #[serde(default)]
    pub suspect_commits: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Failure reason when `status` is `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn completed() -> Self {
        Self {
            status: ResultStatus::Completed,
            verdict: None,
            verified: false,
            findings: Vec::new(),
            new_theories: Vec::new(),
            possible_explanations: Vec::new(),
            suspect_commits: Vec::new(),
            next_steps: Vec::new(),
            summary: None,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failed,
            error: Some(reason.into()),
            ..Self::completed()
        }
    }

    pub fn with_verdict(mut self, verdict: WorkerVerdict, verified: bool) -> Self {
        self.verdict = Some(verdict);
        self.verified = verified;
        self
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn with_new_theory(mut self, theory: ProposedTheory) -> Self {
        self.new_theories.push(theory);
        self
    }

    pub fn with_suspect(mut self, commit: impl Into<String>) -> Self {
        self.suspect_commits.push(commit.into());
        self
    }

    pub fn with_next_step(mut self, step: impl Into<String>) -> Self {
        self.next_steps.push(step.into());
        self
    }

    /// All proposed theories, from both proposal lists.
    pub fn proposals(&self) -> impl Iterator<Item = &ProposedTheory> {
        self.new_theories.iter().chain(self.possible_explanations.iter())
    }

    /// Highest severity across findings.
    pub fn max_severity(&self) -> Severity {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or_default()
    }

    /// Reject records that deserialized but cannot be used.
    pub fn validate(&self) -> Result<(), String> {
        if self.status == ResultStatus::Failed {
            return Err(self
                .error
                .clone()
                .unwrap_or_else(|| "worker reported failure".to_string()));
        }
        if let Some(idx) = self.findings.iter().position(|f| f.text.trim().is_empty()) {
            return Err(format!("finding {idx} has empty text"));
        }
        if self.proposals().any(|p| p.description.trim().is_empty()) {
            return Err("proposed theory has empty description".to_string());
        }
        if self.verified && self.verdict != Some(WorkerVerdict::Confirmed) {
            return Err("verified flag set without a confirmed verdict".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        let mut all = vec![
            Severity::Urgent,
            Severity::None,
            Severity::Medium,
            Severity::Low,
            Severity::High,
        ];
        all.sort();
        assert_eq!(
            all,
            vec![
                Severity::None,
                Severity::Low,
                Severity::Medium,
                Severity::High,
                Severity::Urgent
            ]
        );
    }

    #[test]
    fn test_parse_worker_output() {
        let json = r#"{
            "status": "completed",
            "verdict": "eliminated",
            "findings": [
                {"kind": "evidence-against", "text": "lock is held on every path", "severity": "low"}
            ],
            "possible_explanations": [
                {"description": "refcount underflow in bar_put", "priority": "high", "symbols": ["bar_put"]}
            ],
            "suspect_commits": ["abc123"]
        }"#;
        let record: ResultRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_ok());
        assert_eq!(record.verdict, Some(WorkerVerdict::Eliminated));
        assert_eq!(record.proposals().count(), 1);
        assert_eq!(record.max_severity(), Severity::Low);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"status": "completed", "confidence": 0.9}"#;
        assert!(serde_json::from_str::<ResultRecord>(json).is_err());
        let json = r#"{"status": "completed", "findings": [{"kind": "guess", "text": "x"}]}"#;
        assert!(serde_json::from_str::<ResultRecord>(json).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(ResultRecord::completed().validate().is_ok());
        assert!(ResultRecord::failed("boom").validate().is_err());
        let empty_text = ResultRecord::completed()
            .with_finding(Finding::new(FindingKind::Observation, "  "));
        assert!(empty_text.validate().is_err());
        let bad_verified = ResultRecord::completed().with_verdict(WorkerVerdict::Eliminated, true);
        assert!(bad_verified.validate().is_err());
        let good = ResultRecord::completed().with_verdict(WorkerVerdict::Confirmed, true);
        assert!(good.validate().is_ok());
    }
}
