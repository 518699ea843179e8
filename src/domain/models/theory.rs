//! Theory domain model.
//!
//! A theory is a named, falsifiable hypothesis about the cause of a defect.
//! Theories are never deleted: eliminated theories stay in the ledger for audit
//! and so that rediscovering them does not trigger a second investigation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_spec::TaskId;

/// Namespace for content-derived theory identifiers.
const THEORY_NAMESPACE: Uuid = Uuid::from_u128(0x5e1f_7a2b_90c4_4d1e_8b3a_6c0f_d2e4_a917);

/// Lifecycle status of a theory.
///
/// `Active` is the only non-terminal state. Reopening a terminal theory
/// requires a new theory record, never a status reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryStatus {
    Active,
    Confirmed,
    Eliminated,
    Inconclusive,
}

impl Default for TheoryStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl TheoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Confirmed => "confirmed",
            Self::Eliminated => "eliminated",
            Self::Inconclusive => "inconclusive",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn valid_transitions(&self) -> Vec<TheoryStatus> {
        match self {
            Self::Active => vec![Self::Confirmed, Self::Eliminated, Self::Inconclusive],
            Self::Confirmed | Self::Eliminated | Self::Inconclusive => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Investigation priority. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryPriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for TheoryPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TheoryPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Content-derived theory identifier (`th-` followed by 12 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TheoryId(String);

impl TheoryId {
    /// Derive the identifier for a description and symbol set.
    ///
    /// Two proposals with the same normalized description and symbol set
    /// always map to the same identifier.
    pub fn derive(description: &str, symbols: &BTreeSet<String>) -> Self {
        let key = format!(
            "{}\u{1f}{}",
            normalize_description(description),
            symbols.iter().cloned().collect::<Vec<_>>().join(",")
        );
        Self::from_key(&key)
    }

    /// Identifier for the `generation`-th reopening of `parent`.
    pub fn derive_reopen(parent: &TheoryId, generation: u32) -> Self {
        Self::from_key(&format!("reopen\u{1f}{}\u{1f}{generation}", parent.0))
    }

    fn from_key(key: &str) -> Self {
        let uuid = Uuid::new_v5(&THEORY_NAMESPACE, key.as_bytes());
        let hex = uuid.simple().to_string();
        Self(format!("th-{}", &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TheoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TheoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a theory came from; doubles as its FIFO creation order.
///
/// Seeds use sequence 0. Theories proposed by a worker use the dispatch
/// sequence of the proposing unit, which is fixed at dispatch time, so the
/// order does not depend on when results arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TheoryOrigin {
    pub seq: u32,
    pub position: u32,
}

/// A tracked hypothesis about a defect's cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theory {
    pub id: TheoryId,
    pub status: TheoryStatus,
    pub priority: TheoryPriority,
    pub description: String,
    #[serde(default)]
    pub symbols: BTreeSet<String>,
    #[serde(default)]
    pub supporting: BTreeSet<String>,
    #[serde(default)]
    pub opposing: BTreeSet<String>,
    /// Dispatches that investigated this theory.
    #[serde(default)]
    pub investigations: BTreeSet<TaskId>,
    #[serde(default)]
    pub next_steps: BTreeSet<String>,
    /// Dispatches whose results proposed (or re-proposed) this theory.
    #[serde(default)]
    pub proposed_by: BTreeSet<TaskId>,
    pub origin: TheoryOrigin,
    /// The confirming verdict passed the worker's own verification step.
    #[serde(default)]
    pub verified: bool,
    /// Terminal theory this record reopens, if any.
    #[serde(default)]
    pub reopens: Option<TheoryId>,
}

impl Theory {
    pub fn new(
        description: impl Into<String>,
        priority: TheoryPriority,
        symbols: impl IntoIterator<Item = String>,
        origin: TheoryOrigin,
    ) -> Self {
        let description = description.into();
        let symbols = normalize_symbols(symbols);
        Self {
            id: TheoryId::derive(&description, &symbols),
            status: TheoryStatus::Active,
            priority,
            description,
            symbols,
            supporting: BTreeSet::new(),
            opposing: BTreeSet::new(),
            investigations: BTreeSet::new(),
            next_steps: BTreeSet::new(),
            proposed_by: BTreeSet::new(),
            origin,
            verified: false,
            reopens: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TheoryStatus::Active
    }

    /// Move to a terminal status. Fails for anything but `Active -> terminal`.
    pub fn transition_to(&mut self, new_status: TheoryStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition theory {} from {} to {}",
                self.id,
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        Ok(())
    }

    /// Whether this theory was confirmed with worker-verified evidence.
    pub fn is_verified_confirmation(&self) -> bool {
        self.status == TheoryStatus::Confirmed && self.verified
    }
}

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize_description(description: &str) -> String {
    description
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trim symbols and drop empty entries.
pub fn normalize_symbols(symbols: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    symbols
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Jaccard similarity of the word sets of two normalized descriptions.
pub fn description_similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize_description(a);
    let b_norm = normalize_description(b);
    if a_norm == b_norm {
        return 1.0;
    }
    let a_words: BTreeSet<&str> = a_norm.split(' ').filter(|w| !w.is_empty()).collect();
    let b_words: BTreeSet<&str> = b_norm.split(' ').filter(|w| !w.is_empty()).collect();
    let union = a_words.union(&b_words).count();
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let similarity = a_words.intersection(&b_words).count() as f64 / union as f64;
    similarity
}
