use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApprovalDecision, Listing, ListingId, Package, PackageId, SellerAccount, SellerId,
    Subscription, SubscriptionId,
};
use super::workflow::WorkflowStatus;

/// Seller account rows.
pub trait SellerRepository: Send + Sync {
    fn insert_seller(&self, seller: SellerAccount) -> Result<SellerAccount, RepositoryError>;
    fn update_seller(&self, seller: SellerAccount) -> Result<(), RepositoryError>;
    fn fetch_seller(&self, id: &SellerId) -> Result<Option<SellerAccount>, RepositoryError>;
}

/// Package catalog rows.
pub trait PackageRepository: Send + Sync {
    fn insert_package(&self, package: Package) -> Result<Package, RepositoryError>;
    fn update_package(&self, package: Package) -> Result<(), RepositoryError>;
    fn fetch_package(&self, id: &PackageId) -> Result<Option<Package>, RepositoryError>;
}

/// Subscription rows. Writes are version-checked so counters never lose updates.
pub trait SubscriptionRepository: Send + Sync {
    fn fetch_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, RepositoryError>;

    fn active_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError>;

    /// Most recently started subscription for the seller, active or not.
    fn latest_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError>;

    /// Insert `subscription` and deactivate `superseded` in one step.
    ///
    /// Fails with [`RepositoryError::Conflict`] when `superseded` changed since it was read
    /// or when the seller holds an active subscription that is not `superseded`.
    fn activate_subscription(
        &self,
        subscription: Subscription,
        superseded: Option<&Subscription>,
    ) -> Result<Subscription, RepositoryError>;

    /// Store `subscription` if the stored version still equals `expected_version`.
    fn compare_and_swap_subscription(
        &self,
        subscription: Subscription,
        expected_version: u64,
    ) -> Result<Subscription, RepositoryError>;

    /// Active subscriptions whose validity window closed before `now`.
    fn lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, RepositoryError>;
}

/// Listing rows. Writes are version-checked like subscriptions.
pub trait ListingRepository: Send + Sync {
    fn insert_listing(&self, listing: Listing) -> Result<Listing, RepositoryError>;
    fn fetch_listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError>;
    fn compare_and_swap_listing(
        &self,
        listing: Listing,
        expected_version: u64,
    ) -> Result<Listing, RepositoryError>;
    fn listings_for_seller(&self, seller: &SellerId) -> Result<Vec<Listing>, RepositoryError>;
    /// Oldest-updated first.
    fn listings_in_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> Result<Vec<Listing>, RepositoryError>;
    /// Live listings whose own `expires_at` is before `now`.
    fn overdue_live_listings(&self, now: DateTime<Utc>) -> Result<Vec<Listing>, RepositoryError>;
}

/// Append-only moderation audit trail.
pub trait DecisionLog: Send + Sync {
    fn append_decision(&self, decision: ApprovalDecision) -> Result<(), RepositoryError>;
    /// Oldest first.
    fn decisions_for(&self, listing: &ListingId) -> Result<Vec<ApprovalDecision>, RepositoryError>;
}

/// Everything the engine persists, so services take a single storage handle.
pub trait MarketplaceRepository:
    SellerRepository + PackageRepository + SubscriptionRepository + ListingRepository + DecisionLog
{
}

impl<T> MarketplaceRepository for T where
    T: SellerRepository
        + PackageRepository
        + SubscriptionRepository
        + ListingRepository
        + DecisionLog
{
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflicting write to record")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (e-mail, push, or messaging adapters).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: ListingNotification) -> Result<(), NotificationError>;
}

/// Side-effect request handed to the messaging collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingNotification {
    pub template: String,
    pub listing_id: ListingId,
    pub seller_id: SellerId,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
