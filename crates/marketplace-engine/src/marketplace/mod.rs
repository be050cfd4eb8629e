//! Listing lifecycle and subscription quota engine for the property marketplace.
//!
//! Sellers buy subscriptions from admin-published packages, draft listings, and submit them
//! for moderation. Approval publishes a listing and takes one slot from the seller's active
//! subscription; expiry, rejection of a slot holder, and plan changes hand slots back.

pub mod accounts;
pub mod approvals;
pub mod clock;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod listings;
pub mod memory;
pub mod repository;
pub mod router;
pub mod subscriptions;
pub mod sweeper;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    AdminId, ApprovalDecision, Decision, Listing, ListingContent, ListingId, ListingKind,
    Package, PackageDraft, PackageId, QuotaAvailability, QuotaKind, RequestType, SellerAccount,
    SellerId, SellerType, Subscription, SubscriptionId, VerificationStatus,
};
pub use engine::{MarketplaceEngine, PurchaseOutcome};
pub use error::EngineError;
pub use listings::CarryOver;
pub use memory::{InMemoryMarketplace, RecordingNotifications};
pub use repository::{
    DecisionLog, ListingNotification, ListingRepository, MarketplaceRepository,
    NotificationError, NotificationPublisher, PackageRepository, RepositoryError,
    SellerRepository, SubscriptionRepository,
};
pub use router::marketplace_router;
pub use sweeper::SweepSummary;
pub use workflow::{ListingEvent, TransactedOutcome, WorkflowStatus};
