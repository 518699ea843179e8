//! Stop/continue decision for the investigation loop.

use crate::domain::models::{Ledger, StopReason};

/// Outcome of one convergence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

/// Decide whether the investigation loop may dispatch another unit.
///
/// Checked in order: a verified confirmation, the dispatch ceiling, then
/// whether anything is left to investigate. An unverified confirmation never
/// stops the loop on its own.
pub fn evaluate(ledger: &Ledger) -> Decision {
    if let Some(theory) = ledger.verified_confirmation() {
        return Decision::Stop(StopReason::Confirmed(theory.id.clone()));
    }
    if ledger.dispatch_count() >= ledger.max_dispatches {
        return Decision::Stop(StopReason::BudgetExhausted);
    }
    if ledger.active_count() == 0 && ledger.bootstrap.is_empty() {
        return Decision::Stop(StopReason::NoActiveTheories);
    }
    Decision::Continue
}

/// Whether the loop may dispatch another unit; `false` for every stop reason.
pub fn should_continue(ledger: &Ledger) -> bool {
    evaluate(ledger) == Decision::Continue
}
