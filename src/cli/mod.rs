//! Command-line interface.

pub mod commands;
pub mod output;
pub mod progress;
pub mod types;

use console::style;

use crate::domain::errors::DomainError;
use crate::domain::models::RunOutcome;

pub use types::{Cli, Commands};

/// Exit status for fatal errors.
pub const EXIT_FATAL: i32 = 2;
/// Exit status for `--strict` runs that ended unconfirmed or with issues.
pub const EXIT_UNRESOLVED: i32 = 1;

/// A completed run whose outcome `--strict` treats as a failure.
#[derive(Debug, thiserror::Error)]
#[error("run finished with outcome {}", .0.as_str())]
pub struct UnresolvedOutcome(pub RunOutcome);

/// Process exit code for an error returned by a command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UnresolvedOutcome>().is_some() {
        EXIT_UNRESOLVED
    } else {
        EXIT_FATAL
    }
}

/// Report a command error on stderr and exit.
///
/// Strict-mode outcomes were already reported by the command, so only the
/// exit status changes for them. Everything else gets a fatal-error report.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = exit_code(&err);
    if code == EXIT_FATAL {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<DomainError>())
            .map(domain_error_kind);
        if json_mode {
            let report = serde_json::json!({
                "error": err.to_string(),
                "kind": kind.unwrap_or("error"),
                "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
            });
            eprintln!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        } else {
            eprintln!("{} {err}", style("fatal:").red().bold());
            for cause in err.chain().skip(1) {
                eprintln!("  {} {cause}", style("caused by:").dim());
            }
        }
    } else {
        tracing::info!(%err, "strict mode");
    }
    std::process::exit(code)
}

fn domain_error_kind(err: &DomainError) -> &'static str {
    match err {
        DomainError::AlreadyExists(_) => "already_exists",
        DomainError::ImmutableRecord(_) => "immutable_record",
        DomainError::RecordMissing(_) => "record_missing",
        DomainError::StoreCorrupted(_) => "store_corrupted",
        DomainError::ContextPreparation(_) => "context_preparation",
        DomainError::WorkerFailed(_) => "worker_failed",
        DomainError::MalformedResult(_) => "malformed_result",
        DomainError::InvalidStateTransition { .. } => "invalid_state_transition",
        DomainError::DependencyCycle(_) => "dependency_cycle",
        DomainError::UnknownPhase(_) => "unknown_phase",
        DomainError::Io(_) => "io",
        DomainError::SerializationError(_) => "serialization",
        DomainError::ValidationFailed(_) => "validation_failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        let strict: anyhow::Error = UnresolvedOutcome(RunOutcome::Unconfirmed).into();
        assert_eq!(exit_code(&strict), EXIT_UNRESOLVED);

        let fatal = Err::<(), _>(DomainError::StoreCorrupted("ledger".into()))
            .context("Run aborted")
            .unwrap_err();
        assert_eq!(exit_code(&fatal), EXIT_FATAL);
        let kind = fatal
            .chain()
            .find_map(|c| c.downcast_ref::<DomainError>())
            .map(domain_error_kind);
        assert_eq!(kind, Some("store_corrupted"));
    }
}
