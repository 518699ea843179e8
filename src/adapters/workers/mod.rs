//! Worker adapters.

pub mod command;
pub mod registry;
pub mod scripted;

pub use command::CommandWorker;
pub use registry::WorkerRegistry;
pub use scripted::{ScriptedResponse, ScriptedWorker};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResultRecord, ResultStatus};

/// Boundary check applied to every record a worker hands back.
///
/// A record reporting `failed` is a worker failure; one that fails validation
/// is malformed.
pub(crate) fn accept_record(record: ResultRecord) -> DomainResult<ResultRecord> {
    if record.status == ResultStatus::Failed {
        return Err(DomainError::WorkerFailed(
            record
                .error
                .unwrap_or_else(|| "worker reported failure".to_string()),
        ));
    }
    record.validate().map_err(DomainError::MalformedResult)?;
    Ok(record)
}
