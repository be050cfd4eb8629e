use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::accounts::AccountDirectory;
use super::domain::{
    PackageId, QuotaAvailability, QuotaKind, SellerId, Subscription, SubscriptionId,
};
use super::error::EngineError;
use super::repository::{MarketplaceRepository, RepositoryError};

static SUBSCRIPTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id() -> SubscriptionId {
    let id = SUBSCRIPTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SubscriptionId(format!("sub-{id:06}"))
}

/// Single owner of "which subscription is active for this seller".
pub struct SubscriptionManager<R> {
    repository: Arc<R>,
    accounts: Arc<AccountDirectory<R>>,
    retry_limit: u32,
}

impl<R> SubscriptionManager<R>
where
    R: MarketplaceRepository + 'static,
{
    pub fn new(repository: Arc<R>, accounts: Arc<AccountDirectory<R>>, retry_limit: u32) -> Self {
        Self {
            repository,
            accounts,
            retry_limit,
        }
    }

    pub fn get_active(&self, seller: &SellerId) -> Result<Option<Subscription>, EngineError> {
        Ok(self.repository.active_subscription(seller)?)
    }

    pub fn require_active(&self, seller: &SellerId) -> Result<Subscription, EngineError> {
        self.get_active(seller)?
            .ok_or_else(|| EngineError::NoActiveSubscription(seller.clone()))
    }

    pub fn subscription(&self, id: &SubscriptionId) -> Result<Subscription, EngineError> {
        self.repository
            .fetch_subscription(id)?
            .ok_or_else(|| EngineError::SubscriptionNotFound(id.clone()))
    }

    /// Read-only pre-check behind the listing creation form.
    pub fn availability(&self, seller: &SellerId) -> Result<QuotaAvailability, EngineError> {
        let seller = self.accounts.seller(seller)?;
        if !seller.is_active {
            return Ok(QuotaAvailability::unavailable());
        }

        Ok(match self.get_active(&seller.id)? {
            Some(subscription) => {
                let remaining = subscription.remaining(QuotaKind::Listing);
                QuotaAvailability {
                    can_create: remaining > 0,
                    remaining,
                }
            }
            None => QuotaAvailability::unavailable(),
        })
    }

    /// Start a subscription on `package`, superseding the seller's active one.
    ///
    /// Listings still bound to the superseded subscription are moved over by
    /// [`ListingService::carry_over`](super::listings::ListingService::carry_over).
    pub fn purchase(
        &self,
        seller: &SellerId,
        package: &PackageId,
        now: DateTime<Utc>,
    ) -> Result<Subscription, EngineError> {
        let seller = self.accounts.active_seller(seller)?;
        let package = self.accounts.package(package)?;
        if !package.is_active {
            return Err(EngineError::PackageUnavailable(package.id));
        }
        if !package.applies_to(seller.seller_type) {
            return Err(EngineError::PackageNotApplicable {
                package: package.id,
                seller_type: seller.seller_type.label(),
            });
        }

        let superseded = self.get_active(&seller.id)?;
        let subscription = Subscription::start(next_subscription_id(), seller.id, &package, now)
            .ok_or(EngineError::DateOutOfRange("subscription end date"))?;
        let subscription_id = subscription.id.clone();

        let stored = match self
            .repository
            .activate_subscription(subscription, superseded.as_ref())
        {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict) => return Err(EngineError::Contention(subscription_id)),
            Err(other) => return Err(other.into()),
        };

        info!(
            seller = %stored.seller_id,
            subscription = %stored.id,
            package = %stored.package_id,
            superseded = ?superseded.as_ref().map(|previous| previous.id.as_str()),
            end_date = %stored.end_date,
            "subscription activated"
        );

        Ok(stored)
    }

    /// Buy the package of the seller's current (or most recent) subscription again.
    pub fn renew(
        &self,
        seller: &SellerId,
        now: DateTime<Utc>,
    ) -> Result<Subscription, EngineError> {
        let latest = self
            .repository
            .latest_subscription(seller)?
            .ok_or_else(|| EngineError::NoActiveSubscription(seller.clone()))?;
        self.purchase(seller, &latest.package_id, now)
    }

    /// Flip `is_active` off. Returns `false` when it already was.
    pub fn deactivate(&self, id: &SubscriptionId) -> Result<bool, EngineError> {
        for attempt in 0..=self.retry_limit {
            let current = self.subscription(id)?;
            if !current.is_active {
                return Ok(false);
            }

            let mut next = current.clone();
            next.is_active = false;
            match self
                .repository
                .compare_and_swap_subscription(next, current.version)
            {
                Ok(stored) => {
                    info!(subscription = %stored.id, seller = %stored.seller_id, "subscription deactivated");
                    return Ok(true);
                }
                Err(RepositoryError::Conflict) => {
                    debug!(subscription = %id, attempt, "deactivation lost a race, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(EngineError::Contention(id.clone()))
    }
}
