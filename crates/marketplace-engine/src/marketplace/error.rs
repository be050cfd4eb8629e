use super::domain::{ApprovalDecision, ListingId, PackageId, QuotaKind, SellerId, SubscriptionId};
use super::repository::RepositoryError;
use super::workflow::{ListingEvent, WorkflowStatus};

/// Typed outcome of every engine operation that did not succeed.
///
/// Everything except [`EngineError::Storage`] and [`EngineError::DateOutOfRange`] is an
/// expected, user-facing condition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} quota exhausted: {used} of {limit} slots in use")]
    QuotaExhausted {
        kind: QuotaKind,
        limit: u32,
        used: u32,
    },
    #[error("cannot {event} a listing that is {from}")]
    InvalidTransition {
        from: WorkflowStatus,
        event: ListingEvent,
    },
    #[error("listing {} was already {} by {}", .0.listing_id, .0.decision, .0.decided_by)]
    AlreadyDecided(Box<ApprovalDecision>),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),
    #[error("seller {0} has no active subscription")]
    NoActiveSubscription(SellerId),
    #[error("listing {0} not found")]
    ListingNotFound(ListingId),
    #[error("seller {0} not found")]
    SellerNotFound(SellerId),
    #[error("seller {0} is deactivated")]
    SellerDeactivated(SellerId),
    #[error("package {0} not found")]
    PackageNotFound(PackageId),
    #[error("package {0} is no longer offered")]
    PackageUnavailable(PackageId),
    #[error("package {package} is not offered to {seller_type} sellers")]
    PackageNotApplicable {
        package: PackageId,
        seller_type: &'static str,
    },
    #[error("package rejected: {0}")]
    InvalidPackage(String),
    #[error("{0} falls outside the supported calendar range")]
    DateOutOfRange(&'static str),
    #[error("a rejection must carry a reason")]
    RejectionReasonRequired,
    #[error("subscription {0} is under contention, retry the request")]
    Contention(SubscriptionId),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl EngineError {
    /// Slots left when the error is a quota rejection.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            EngineError::QuotaExhausted { limit, used, .. } => Some(limit.saturating_sub(*used)),
            _ => None,
        }
    }

    /// Errors the caller should retry or alert on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::DateOutOfRange(_))
    }
}
