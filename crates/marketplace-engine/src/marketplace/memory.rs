//! Process-local storage used by the API service and the test-suite.
//!
//! A single mutex guards every table, so each trait call behaves like one short
//! row-scoped transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    ApprovalDecision, Listing, ListingId, Package, PackageId, SellerAccount, SellerId,
    Subscription, SubscriptionId,
};
use super::repository::{
    DecisionLog, ListingNotification, ListingRepository, NotificationError,
    NotificationPublisher, PackageRepository, RepositoryError, SellerRepository,
    SubscriptionRepository,
};
use super::workflow::WorkflowStatus;

#[derive(Default)]
struct Tables {
    sellers: HashMap<SellerId, SellerAccount>,
    packages: HashMap<PackageId, Package>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    listings: HashMap<ListingId, Listing>,
    decisions: Vec<ApprovalDecision>,
}

#[derive(Default, Clone)]
pub struct InMemoryMarketplace {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryMarketplace {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

impl SellerRepository for InMemoryMarketplace {
    fn insert_seller(&self, seller: SellerAccount) -> Result<SellerAccount, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.sellers.contains_key(&seller.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.sellers.insert(seller.id.clone(), seller.clone());
        Ok(seller)
    }

    fn update_seller(&self, seller: SellerAccount) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        match tables.sellers.get_mut(&seller.id) {
            Some(stored) => {
                *stored = seller;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_seller(&self, id: &SellerId) -> Result<Option<SellerAccount>, RepositoryError> {
        Ok(self.lock()?.sellers.get(id).cloned())
    }
}

impl PackageRepository for InMemoryMarketplace {
    fn insert_package(&self, package: Package) -> Result<Package, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.packages.contains_key(&package.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.packages.insert(package.id.clone(), package.clone());
        Ok(package)
    }

    fn update_package(&self, package: Package) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        match tables.packages.get_mut(&package.id) {
            Some(stored) => {
                *stored = package;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_package(&self, id: &PackageId) -> Result<Option<Package>, RepositoryError> {
        Ok(self.lock()?.packages.get(id).cloned())
    }
}

impl SubscriptionRepository for InMemoryMarketplace {
    fn fetch_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        Ok(self.lock()?.subscriptions.get(id).cloned())
    }

    fn active_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .subscriptions
            .values()
            .find(|subscription| subscription.is_active && &subscription.seller_id == seller)
            .cloned())
    }

    fn latest_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .subscriptions
            .values()
            .filter(|subscription| &subscription.seller_id == seller)
            .max_by(|a, b| {
                a.start_date
                    .cmp(&b.start_date)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned())
    }

    fn activate_subscription(
        &self,
        subscription: Subscription,
        superseded: Option<&Subscription>,
    ) -> Result<Subscription, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.subscriptions.contains_key(&subscription.id) {
            return Err(RepositoryError::Conflict);
        }

        let current_active = tables
            .subscriptions
            .values()
            .find(|stored| stored.is_active && stored.seller_id == subscription.seller_id)
            .map(|stored| (stored.id.clone(), stored.version));

        match (current_active, superseded) {
            (None, None) => {}
            (Some((active_id, active_version)), Some(previous))
                if active_id == previous.id && active_version == previous.version => {}
            _ => return Err(RepositoryError::Conflict),
        }

        if let Some(previous) = superseded {
            if let Some(stored) = tables.subscriptions.get_mut(&previous.id) {
                stored.is_active = false;
                stored.version += 1;
            }
        }

        tables
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    fn compare_and_swap_subscription(
        &self,
        mut subscription: Subscription,
        expected_version: u64,
    ) -> Result<Subscription, RepositoryError> {
        let mut tables = self.lock()?;
        let stored = tables
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict);
        }
        subscription.version = expected_version + 1;
        *stored = subscription.clone();
        Ok(subscription)
    }

    fn lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let tables = self.lock()?;
        let mut lapsed: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|subscription| subscription.is_active && subscription.has_lapsed(now))
            .cloned()
            .collect();
        lapsed.sort_by(|a, b| a.end_date.cmp(&b.end_date));
        Ok(lapsed)
    }
}

impl ListingRepository for InMemoryMarketplace {
    fn insert_listing(&self, listing: Listing) -> Result<Listing, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.listings.contains_key(&listing.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.listings.insert(listing.id.clone(), listing.clone());
        Ok(listing)
    }

    fn fetch_listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        Ok(self.lock()?.listings.get(id).cloned())
    }

    fn compare_and_swap_listing(
        &self,
        mut listing: Listing,
        expected_version: u64,
    ) -> Result<Listing, RepositoryError> {
        let mut tables = self.lock()?;
        let stored = tables
            .listings
            .get_mut(&listing.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict);
        }
        listing.version = expected_version + 1;
        *stored = listing.clone();
        Ok(listing)
    }

    fn listings_for_seller(&self, seller: &SellerId) -> Result<Vec<Listing>, RepositoryError> {
        let tables = self.lock()?;
        let mut listings: Vec<Listing> = tables
            .listings
            .values()
            .filter(|listing| &listing.seller_id == seller)
            .cloned()
            .collect();
        listings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listings)
    }

    fn listings_in_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> Result<Vec<Listing>, RepositoryError> {
        let tables = self.lock()?;
        let mut listings: Vec<Listing> = tables
            .listings
            .values()
            .filter(|listing| statuses.contains(&listing.workflow_status))
            .cloned()
            .collect();
        listings.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        listings.truncate(limit);
        Ok(listings)
    }

    fn overdue_live_listings(&self, now: DateTime<Utc>) -> Result<Vec<Listing>, RepositoryError> {
        let tables = self.lock()?;
        let mut listings: Vec<Listing> = tables
            .listings
            .values()
            .filter(|listing| {
                listing.workflow_status == WorkflowStatus::Live
                    && listing.expires_at.is_some_and(|expires_at| expires_at < now)
            })
            .cloned()
            .collect();
        listings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listings)
    }
}

impl DecisionLog for InMemoryMarketplace {
    fn append_decision(&self, decision: ApprovalDecision) -> Result<(), RepositoryError> {
        self.lock()?.decisions.push(decision);
        Ok(())
    }

    fn decisions_for(&self, listing: &ListingId) -> Result<Vec<ApprovalDecision>, RepositoryError> {
        Ok(self
            .lock()?
            .decisions
            .iter()
            .filter(|decision| &decision.listing_id == listing)
            .cloned()
            .collect())
    }
}

/// Notification sink that keeps every request for later inspection.
#[derive(Default, Clone)]
pub struct RecordingNotifications {
    events: Arc<Mutex<Vec<ListingNotification>>>,
}

impl RecordingNotifications {
    pub fn events(&self) -> Vec<ListingNotification> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl NotificationPublisher for RecordingNotifications {
    fn publish(&self, notification: ListingNotification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .map_err(|_| NotificationError::Transport("notification mutex poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
