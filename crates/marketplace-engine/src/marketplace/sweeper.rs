//! Periodic expiry pass over lapsed subscriptions and overdue listings.
//!
//! Every listing is its own short write, so an interrupted sweep simply resumes on the next
//! run. Listings are expired before their subscription is deactivated, which keeps a
//! half-finished sweep discoverable through `lapsed_subscriptions`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{Listing, Subscription};
use super::error::EngineError;
use super::listings::ListingService;
use super::repository::MarketplaceRepository;
use super::subscriptions::SubscriptionManager;
use super::workflow::WorkflowStatus;

/// Counts of transitions a single sweep performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub subscriptions_expired: u32,
    pub listings_expired: u32,
    pub slots_released: u32,
}

impl SweepSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ExpirySweeper<R> {
    repository: Arc<R>,
    subscriptions: Arc<SubscriptionManager<R>>,
    listings: Arc<ListingService<R>>,
}

impl<R> ExpirySweeper<R>
where
    R: MarketplaceRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        subscriptions: Arc<SubscriptionManager<R>>,
        listings: Arc<ListingService<R>>,
    ) -> Self {
        Self {
            repository,
            subscriptions,
            listings,
        }
    }

    pub fn run(&self, now: DateTime<Utc>) -> Result<SweepSummary, EngineError> {
        let mut summary = SweepSummary::default();

        for subscription in self.repository.lapsed_subscriptions(now)? {
            self.settle_subscription(&subscription, now, &mut summary)?;
            if self.subscriptions.deactivate(&subscription.id)? {
                summary.subscriptions_expired += 1;
            }
            // Catch approvals that committed while the first pass was running.
            self.settle_subscription(&subscription, now, &mut summary)?;
        }

        for listing in self.repository.overdue_live_listings(now)? {
            self.expire_listing(&listing, now, &mut summary)?;
        }

        if summary.is_empty() {
            info!("expiry sweep found nothing to do");
        } else {
            info!(
                subscriptions_expired = summary.subscriptions_expired,
                listings_expired = summary.listings_expired,
                slots_released = summary.slots_released,
                "expiry sweep completed"
            );
        }
        Ok(summary)
    }

    fn settle_subscription(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        summary: &mut SweepSummary,
    ) -> Result<(), EngineError> {
        for listing in self
            .repository
            .listings_for_seller(&subscription.seller_id)?
        {
            if !listing.holds_open_slot_on(&subscription.id) {
                continue;
            }

            if listing.workflow_status == WorkflowStatus::Live {
                self.expire_listing(&listing, now, summary)?;
            } else {
                match self
                    .listings
                    .release_open_slot(&listing.id, &subscription.id, now)
                {
                    Ok(true) => summary.slots_released += 1,
                    Ok(false) => {}
                    Err(EngineError::InvalidTransition { .. }) => {
                        warn!(listing = %listing.id, "listing changed during sweep, retrying next run");
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(())
    }

    fn expire_listing(
        &self,
        listing: &Listing,
        now: DateTime<Utc>,
        summary: &mut SweepSummary,
    ) -> Result<(), EngineError> {
        match self.listings.expire(&listing.id, now) {
            Ok(true) => {
                summary.listings_expired += 1;
                if listing.quota_consumed {
                    summary.slots_released += 1;
                }
            }
            Ok(false) => {}
            Err(EngineError::InvalidTransition { from, .. }) => {
                warn!(listing = %listing.id, status = %from, "listing left live before it could be expired");
            }
            Err(other) => return Err(other),
        }
        Ok(())
    }
}
