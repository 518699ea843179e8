//! Worker port - the opaque analysis capability.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ResultRecord, TaskSpec};

/// An external capability that turns a task specification into a result.
///
/// The orchestrator never looks at how a worker reasons. Implementations
/// return `WorkerFailed` when no result was produced and `MalformedResult`
/// when the output did not match the result schema.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker implementation name, for logs.
    fn name(&self) -> &'static str;

    /// Run one task to completion.
    async fn invoke(&self, spec: &TaskSpec) -> DomainResult<ResultRecord>;
}
