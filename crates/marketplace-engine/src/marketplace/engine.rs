use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::accounts::AccountDirectory;
use super::approvals::ApprovalCoordinator;
use super::clock::{Clock, SystemClock};
use super::domain::{
    AdminId, ApprovalDecision, Decision, Listing, ListingContent, ListingId, ListingKind,
    Package, PackageDraft, PackageId, QuotaAvailability, SellerAccount, SellerId, SellerType,
    Subscription, VerificationStatus,
};
use super::error::EngineError;
use super::ledger::QuotaLedger;
use super::listings::{CarryOver, ListingService};
use super::repository::{MarketplaceRepository, NotificationPublisher};
use super::subscriptions::SubscriptionManager;
use super::sweeper::{ExpirySweeper, SweepSummary};
use super::workflow::{TransactedOutcome, WorkflowStatus};
use crate::config::EngineConfig;

/// Result of a purchase or renewal after listings were moved onto the new subscription.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub subscription: Subscription,
    pub carry_over: CarryOver,
}

/// Synchronous contract consumed by the API layer and the scheduler.
pub struct MarketplaceEngine<R, N> {
    accounts: Arc<AccountDirectory<R>>,
    subscriptions: Arc<SubscriptionManager<R>>,
    listings: Arc<ListingService<R>>,
    approvals: ApprovalCoordinator<R, N>,
    sweeper: ExpirySweeper<R>,
    clock: Arc<dyn Clock>,
}

impl<R, N> MarketplaceEngine<R, N>
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, notifications: Arc<N>, config: EngineConfig) -> Self {
        Self::with_clock(repository, notifications, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        notifications: Arc<N>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(repository.clone(), config.cas_retry_limit));
        let accounts = Arc::new(AccountDirectory::new(repository.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            repository.clone(),
            accounts.clone(),
            config.cas_retry_limit,
        ));
        let listings = Arc::new(ListingService::new(
            repository.clone(),
            ledger,
            accounts.clone(),
            subscriptions.clone(),
            config,
        ));
        let approvals = ApprovalCoordinator::new(
            repository.clone(),
            listings.clone(),
            notifications,
            config.cas_retry_limit,
        );
        let sweeper = ExpirySweeper::new(repository, subscriptions.clone(), listings.clone());

        Self {
            accounts,
            subscriptions,
            listings,
            approvals,
            sweeper,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn register_seller(
        &self,
        display_name: &str,
        seller_type: SellerType,
    ) -> Result<SellerAccount, EngineError> {
        self.accounts
            .register_seller(display_name, seller_type, self.now())
    }

    pub fn set_verification(
        &self,
        seller: &SellerId,
        status: VerificationStatus,
    ) -> Result<SellerAccount, EngineError> {
        self.accounts.set_verification(seller, status)
    }

    pub fn deactivate_seller(&self, seller: &SellerId) -> Result<SellerAccount, EngineError> {
        self.accounts.deactivate_seller(seller)
    }

    pub fn publish_package(&self, draft: PackageDraft) -> Result<Package, EngineError> {
        self.accounts.publish_package(draft)
    }

    pub fn retire_package(&self, package: &PackageId) -> Result<Package, EngineError> {
        self.accounts.retire_package(package)
    }

    pub fn purchase_subscription(
        &self,
        seller: &SellerId,
        package: &PackageId,
    ) -> Result<Subscription, EngineError> {
        Ok(self.purchase_with_carry_over(seller, package)?.subscription)
    }

    pub fn purchase_with_carry_over(
        &self,
        seller: &SellerId,
        package: &PackageId,
    ) -> Result<PurchaseOutcome, EngineError> {
        let now = self.now();
        let subscription = self.subscriptions.purchase(seller, package, now)?;
        self.finish_purchase(subscription, now)
    }

    pub fn renew_subscription(&self, seller: &SellerId) -> Result<PurchaseOutcome, EngineError> {
        let now = self.now();
        let subscription = self.subscriptions.renew(seller, now)?;
        self.finish_purchase(subscription, now)
    }

    fn finish_purchase(
        &self,
        subscription: Subscription,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOutcome, EngineError> {
        let carry_over = self.listings.carry_over(&subscription, now)?;
        let subscription = self.subscriptions.subscription(&subscription.id)?;
        Ok(PurchaseOutcome {
            subscription,
            carry_over,
        })
    }

    /// The only path to a seller's current subscription.
    pub fn active_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, EngineError> {
        self.subscriptions.get_active(seller)
    }

    pub fn can_create_listing(&self, seller: &SellerId) -> Result<QuotaAvailability, EngineError> {
        self.subscriptions.availability(seller)
    }

    pub fn create_listing(
        &self,
        seller: &SellerId,
        kind: ListingKind,
        content: ListingContent,
    ) -> Result<Listing, EngineError> {
        self.listings.create(seller, kind, content, self.now())
    }

    pub fn edit_listing(
        &self,
        listing: &ListingId,
        content: ListingContent,
    ) -> Result<Listing, EngineError> {
        self.listings.edit(listing, content, self.now())
    }

    pub fn submit_listing(&self, listing: &ListingId) -> Result<WorkflowStatus, EngineError> {
        Ok(self.listings.submit(listing, self.now())?.workflow_status)
    }

    pub fn claim_listing(
        &self,
        listing: &ListingId,
        admin: &AdminId,
    ) -> Result<WorkflowStatus, EngineError> {
        Ok(self
            .approvals
            .claim(listing, admin, self.now())?
            .workflow_status)
    }

    pub fn decide(
        &self,
        listing: &ListingId,
        admin: &AdminId,
        decision: Decision,
        reason: Option<&str>,
    ) -> Result<WorkflowStatus, EngineError> {
        Ok(self
            .approvals
            .decide(listing, admin, decision, reason, self.now())?
            .workflow_status)
    }

    pub fn mark_transacted(
        &self,
        listing: &ListingId,
        outcome: TransactedOutcome,
    ) -> Result<WorkflowStatus, EngineError> {
        Ok(self
            .listings
            .mark_transacted(listing, outcome, self.now())?
            .workflow_status)
    }

    pub fn set_featured(&self, listing: &ListingId, featured: bool) -> Result<Listing, EngineError> {
        self.listings.set_featured(listing, featured, self.now())
    }

    pub fn reactivate_listing(&self, listing: &ListingId) -> Result<WorkflowStatus, EngineError> {
        Ok(self
            .listings
            .reactivate(listing, self.now())?
            .workflow_status)
    }

    pub fn listing(&self, listing: &ListingId) -> Result<Listing, EngineError> {
        self.listings.get(listing)
    }

    pub fn pending_listings(&self, limit: usize) -> Result<Vec<Listing>, EngineError> {
        self.approvals.pending(limit)
    }

    pub fn decisions_for(&self, listing: &ListingId) -> Result<Vec<ApprovalDecision>, EngineError> {
        self.approvals.decisions_for(listing)
    }

    /// Scheduler entry point. Safe to re-run.
    pub fn run_expiry_sweep(&self) -> Result<SweepSummary, EngineError> {
        self.sweeper.run(self.now())
    }
}
