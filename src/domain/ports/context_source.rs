//! Context preparation port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ContextRecord;

/// Turns a raw defect reference into a context record.
///
/// Implementations must be idempotent and must report failure as
/// `ContextPreparation`, distinct from a record with no findings.
#[async_trait]
pub trait ContextPreparer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prepare(&self, reference: &str) -> DomainResult<ContextRecord>;
}
