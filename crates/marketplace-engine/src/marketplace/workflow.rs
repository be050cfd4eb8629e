//! Pure transition table for a listing's workflow status.
//!
//! The table decides the target status and which quota effect the move carries. It never
//! touches storage; [`ListingService`](super::listings::ListingService) applies the effect
//! against the ledger and persists the result.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Moderation and publication status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Submitted,
    UnderReview,
    Live,
    NeedsReapproval,
    Rejected,
    Sold,
    Rented,
    Leased,
    Expired,
}

impl WorkflowStatus {
    pub const fn label(self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Submitted => "submitted",
            WorkflowStatus::UnderReview => "under_review",
            WorkflowStatus::Live => "live",
            WorkflowStatus::NeedsReapproval => "needs_reapproval",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::Sold => "sold",
            WorkflowStatus::Rented => "rented",
            WorkflowStatus::Leased => "leased",
            WorkflowStatus::Expired => "expired",
        }
    }

    /// Waiting on a moderator.
    pub const fn is_pending_review(self) -> bool {
        matches!(self, WorkflowStatus::Submitted | WorkflowStatus::UnderReview)
    }

    /// Terminal states reached by closing a deal from `live`.
    pub const fn is_transacted(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Sold | WorkflowStatus::Rented | WorkflowStatus::Leased
        )
    }

    pub fn apply(self, event: ListingEvent) -> Result<Transition, EngineError> {
        use ListingEvent as E;
        use WorkflowStatus as S;

        let (to, quota) = match (self, event) {
            (S::Draft | S::NeedsReapproval | S::Rejected, E::Submit) => {
                (S::Submitted, QuotaEffect::None)
            }
            (S::Submitted, E::Claim) => (S::UnderReview, QuotaEffect::None),
            (S::Submitted | S::UnderReview, E::Approve) => (S::Live, QuotaEffect::AcquireListing),
            (S::Submitted | S::UnderReview, E::Reject) => (S::Rejected, QuotaEffect::Release),
            (S::Live, E::Edit) => (S::NeedsReapproval, QuotaEffect::None),
            (S::Draft | S::Rejected | S::NeedsReapproval, E::Edit) => (self, QuotaEffect::None),
            (S::Live, E::MarkTransacted(outcome)) => (outcome.status(), QuotaEffect::None),
            (S::Live, E::Expire) => (S::Expired, QuotaEffect::Release),
            (S::Expired, E::Expire) => (S::Expired, QuotaEffect::None),
            (S::Expired, E::Reactivate) => (S::Live, QuotaEffect::AcquireListing),
            (S::Live, E::Feature) => (S::Live, QuotaEffect::AcquireFeatured),
            (_, E::Unfeature) => (self, QuotaEffect::ReleaseFeatured),
            (from, event) => return Err(EngineError::InvalidTransition { from, event }),
        };

        Ok(Transition {
            from: self,
            to,
            quota,
        })
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a live listing left the market after a completed deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactedOutcome {
    Sold,
    Rented,
    Leased,
}

impl TransactedOutcome {
    pub const fn status(self) -> WorkflowStatus {
        match self {
            TransactedOutcome::Sold => WorkflowStatus::Sold,
            TransactedOutcome::Rented => WorkflowStatus::Rented,
            TransactedOutcome::Leased => WorkflowStatus::Leased,
        }
    }
}

/// Seller, admin, and scheduler actions that move a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingEvent {
    Submit,
    Claim,
    Approve,
    Reject,
    Edit,
    MarkTransacted(TransactedOutcome),
    Expire,
    Reactivate,
    Feature,
    Unfeature,
}

impl ListingEvent {
    pub const fn label(self) -> &'static str {
        match self {
            ListingEvent::Submit => "submit",
            ListingEvent::Claim => "claim",
            ListingEvent::Approve => "approve",
            ListingEvent::Reject => "reject",
            ListingEvent::Edit => "edit",
            ListingEvent::MarkTransacted(TransactedOutcome::Sold) => "mark_sold",
            ListingEvent::MarkTransacted(TransactedOutcome::Rented) => "mark_rented",
            ListingEvent::MarkTransacted(TransactedOutcome::Leased) => "mark_leased",
            ListingEvent::Expire => "expire",
            ListingEvent::Reactivate => "reactivate",
            ListingEvent::Feature => "feature",
            ListingEvent::Unfeature => "unfeature",
        }
    }
}

impl fmt::Display for ListingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ledger side effect attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaEffect {
    None,
    /// Take a listing slot unless the listing already holds one.
    AcquireListing,
    AcquireFeatured,
    ReleaseFeatured,
    /// Give back every slot the listing holds.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub quota: QuotaEffect,
}
