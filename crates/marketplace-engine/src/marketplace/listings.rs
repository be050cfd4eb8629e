//! Listing state machine: applies [`WorkflowStatus::apply`] transitions against storage and
//! the quota ledger.
//!
//! Ordering rule for every write: slots are acquired *before* the listing row is stored and
//! released *after* it. A lost race therefore never leaves a counter above its limit; the
//! acquire side is compensated, and a storage failure on the release side at worst leaves a
//! counter high.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::accounts::AccountDirectory;
use super::domain::{
    AdminId, Listing, ListingContent, ListingId, ListingKind, QuotaKind, SellerId, Subscription,
    SubscriptionId,
};
use super::error::EngineError;
use super::ledger::QuotaLedger;
use super::repository::{MarketplaceRepository, RepositoryError};
use super::subscriptions::SubscriptionManager;
use super::workflow::{ListingEvent, QuotaEffect, TransactedOutcome, WorkflowStatus};
use crate::config::EngineConfig;

static LISTING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_listing_id() -> ListingId {
    let id = LISTING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ListingId(format!("lst-{id:06}"))
}

/// What happened to slot-holding listings when a new subscription replaced the old one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CarryOver {
    pub carried: u32,
    pub demoted: u32,
    pub unfeatured: u32,
}

struct Moved {
    listing: Listing,
    unfeatured: bool,
}

pub struct ListingService<R> {
    repository: Arc<R>,
    ledger: Arc<QuotaLedger<R>>,
    accounts: Arc<AccountDirectory<R>>,
    subscriptions: Arc<SubscriptionManager<R>>,
    config: EngineConfig,
}

impl<R> ListingService<R>
where
    R: MarketplaceRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        ledger: Arc<QuotaLedger<R>>,
        accounts: Arc<AccountDirectory<R>>,
        subscriptions: Arc<SubscriptionManager<R>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            ledger,
            accounts,
            subscriptions,
            config,
        }
    }

    pub fn get(&self, id: &ListingId) -> Result<Listing, EngineError> {
        self.repository
            .fetch_listing(id)?
            .ok_or_else(|| EngineError::ListingNotFound(id.clone()))
    }

    /// Open a draft. Requires an active seller with an active subscription; no quota is taken.
    pub fn create(
        &self,
        seller: &SellerId,
        kind: ListingKind,
        content: ListingContent,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let seller = self.accounts.active_seller(seller)?;
        self.subscriptions.require_active(&seller.id)?;

        let listing = Listing::draft(next_listing_id(), seller.id, kind, content, now);
        let stored = self.repository.insert_listing(listing)?;
        info!(listing = %stored.id, seller = %stored.seller_id, kind = ?stored.kind, "listing drafted");
        Ok(stored)
    }

    pub fn edit(
        &self,
        id: &ListingId,
        content: ListingContent,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        self.run(id, ListingEvent::Edit, now, move |listing| {
            listing.content = content;
        })
    }

    pub fn submit(&self, id: &ListingId, now: DateTime<Utc>) -> Result<Listing, EngineError> {
        self.run(id, ListingEvent::Submit, now, |listing| {
            listing.claimed_by = None;
        })
    }

    pub fn claim(
        &self,
        id: &ListingId,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let admin = admin.clone();
        self.run(id, ListingEvent::Claim, now, move |listing| {
            listing.claimed_by = Some(admin);
        })
    }

    pub fn approve(&self, id: &ListingId, now: DateTime<Utc>) -> Result<Listing, EngineError> {
        self.run(id, ListingEvent::Approve, now, |_| {})
    }

    pub fn reject(
        &self,
        id: &ListingId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::RejectionReasonRequired);
        }
        let reason = reason.to_string();
        self.run(id, ListingEvent::Reject, now, move |listing| {
            listing.rejection_reason = Some(reason);
        })
    }

    pub fn mark_transacted(
        &self,
        id: &ListingId,
        outcome: TransactedOutcome,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        self.run(id, ListingEvent::MarkTransacted(outcome), now, |_| {})
    }

    /// Expire a live listing. Returns `false` when it was already expired.
    pub fn expire(&self, id: &ListingId, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let listing = self.get(id)?;
        if listing.workflow_status == WorkflowStatus::Expired {
            debug!(listing = %listing.id, "listing already expired");
            return Ok(false);
        }
        self.run(id, ListingEvent::Expire, now, |_| {})?;
        Ok(true)
    }

    pub fn reactivate(&self, id: &ListingId, now: DateTime<Utc>) -> Result<Listing, EngineError> {
        self.run(id, ListingEvent::Reactivate, now, |_| {})
    }

    pub fn set_featured(
        &self,
        id: &ListingId,
        featured: bool,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let event = if featured {
            ListingEvent::Feature
        } else {
            ListingEvent::Unfeature
        };
        self.run(id, event, now, |_| {})
    }

    /// Drop the slot a non-live listing still holds on `subscription`, keeping its status.
    pub fn release_open_slot(
        &self,
        id: &ListingId,
        subscription: &SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let listing = self.get(id)?;
        if !listing.holds_open_slot_on(subscription) {
            return Ok(false);
        }

        let mut updated = listing.clone();
        updated.quota_consumed = false;
        updated.subscription_id = None;
        updated.is_featured = false;
        updated.updated_at = now;

        let stored = self.commit(updated, listing.version, ListingEvent::Expire)?;
        self.release_held(&listing)?;
        info!(listing = %stored.id, subscription = %subscription, status = %stored.workflow_status, "open slot released");
        Ok(true)
    }

    /// Re-bind every slot-holding listing of the seller to `subscription`.
    ///
    /// Oldest approvals keep their place. Listings that no longer fit are demoted: a live one
    /// moves to `needs_reapproval`, and all of them lose their slot. Featured flags beyond the
    /// new featured limit are dropped. A listing written concurrently is re-read and retried.
    pub fn carry_over(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> Result<CarryOver, EngineError> {
        let mut holders: Vec<Listing> = self
            .repository
            .listings_for_seller(&subscription.seller_id)?
            .into_iter()
            .filter(|listing| held_elsewhere(listing, &subscription.id))
            .collect();
        holders.sort_by(|a, b| oldest_approval_first(a, b));

        let mut summary = CarryOver::default();
        for listing in holders {
            let Some(moved) = self.carry_listing(subscription, listing, now)? else {
                continue;
            };
            if moved.unfeatured {
                summary.unfeatured += 1;
            }
            if moved.listing.quota_consumed {
                summary.carried += 1;
            } else {
                summary.demoted += 1;
                info!(listing = %moved.listing.id, status = %moved.listing.workflow_status, "listing demoted after plan change");
            }
        }

        info!(
            seller = %subscription.seller_id,
            subscription = %subscription.id,
            carried = summary.carried,
            demoted = summary.demoted,
            unfeatured = summary.unfeatured,
            "listings carried over to new subscription"
        );
        Ok(summary)
    }

    fn carry_listing(
        &self,
        subscription: &Subscription,
        mut listing: Listing,
        now: DateTime<Utc>,
    ) -> Result<Option<Moved>, EngineError> {
        for attempt in 0..=self.config.cas_retry_limit {
            if !held_elsewhere(&listing, &subscription.id) {
                return Ok(None);
            }

            let mut updated = listing.clone();
            updated.updated_at = now;
            let mut acquired = Vec::new();
            let mut unfeatured = false;

            match self.ledger.try_consume(&subscription.id, QuotaKind::Listing) {
                Ok(_) => {
                    acquired.push(QuotaKind::Listing);
                    updated.subscription_id = Some(subscription.id.clone());
                    if listing.is_featured {
                        match self.ledger.try_consume(&subscription.id, QuotaKind::Featured) {
                            Ok(_) => acquired.push(QuotaKind::Featured),
                            Err(EngineError::QuotaExhausted { .. }) => {
                                updated.is_featured = false;
                                unfeatured = true;
                            }
                            Err(other) => {
                                self.compensate(&subscription.id, &acquired);
                                return Err(other);
                            }
                        }
                    }
                }
                Err(EngineError::QuotaExhausted { .. }) => {
                    if listing.workflow_status == WorkflowStatus::Live {
                        updated.workflow_status = WorkflowStatus::NeedsReapproval;
                    }
                    unfeatured = listing.is_featured;
                    updated.quota_consumed = false;
                    updated.subscription_id = None;
                    updated.is_featured = false;
                }
                Err(other) => return Err(other),
            }

            match self.commit(updated, listing.version, ListingEvent::Edit) {
                Ok(stored) => {
                    self.release_held(&listing)?;
                    return Ok(Some(Moved {
                        listing: stored,
                        unfeatured,
                    }));
                }
                Err(EngineError::InvalidTransition { .. }) => {
                    self.compensate(&subscription.id, &acquired);
                    debug!(listing = %listing.id, attempt, "listing changed during carry-over, re-reading");
                    listing = self.get(&listing.id)?;
                }
                Err(other) => {
                    self.compensate(&subscription.id, &acquired);
                    return Err(other);
                }
            }
        }

        warn!(
            listing = %listing.id,
            subscription = %subscription.id,
            "listing kept changing during carry-over, left on previous subscription"
        );
        Ok(None)
    }

    fn run<F>(
        &self,
        id: &ListingId,
        event: ListingEvent,
        now: DateTime<Utc>,
        edit: F,
    ) -> Result<Listing, EngineError>
    where
        F: FnOnce(&mut Listing),
    {
        let listing = self.get(id)?;
        let transition = listing.workflow_status.apply(event)?;

        let mut updated = listing.clone();
        edit(&mut updated);
        updated.workflow_status = transition.to;
        updated.updated_at = now;

        let mut acquired: Option<(SubscriptionId, QuotaKind)> = None;
        let mut release_after = false;

        match transition.quota {
            QuotaEffect::None => {}
            QuotaEffect::AcquireListing => {
                let stale = listing.quota_consumed && !self.bound_to_active(&listing)?;
                if !listing.quota_consumed || stale {
                    let subscription = self.subscription_for_publish(&listing.seller_id)?;
                    self.ledger
                        .try_consume(&subscription.id, QuotaKind::Listing)?;
                    updated.quota_consumed = true;
                    updated.subscription_id = Some(subscription.id.clone());
                    acquired = Some((subscription.id, QuotaKind::Listing));
                }
                if stale {
                    // The slot on the superseded plan goes back once the new one is stored.
                    updated.is_featured = false;
                    release_after = true;
                }
                updated.approved_at = Some(now);
                updated.expires_at = Some(
                    now.checked_add_signed(self.config.listing_ttl())
                        .ok_or(EngineError::DateOutOfRange("listing expiry"))?,
                );
                updated.rejection_reason = None;
            }
            QuotaEffect::AcquireFeatured => {
                if listing.is_featured {
                    return Ok(listing);
                }
                let subscription_id =
                    listing
                        .subscription_id
                        .clone()
                        .ok_or(EngineError::QuotaExhausted {
                            kind: QuotaKind::Featured,
                            limit: 0,
                            used: 0,
                        })?;
                self.ledger
                    .try_consume(&subscription_id, QuotaKind::Featured)?;
                updated.is_featured = true;
                acquired = Some((subscription_id, QuotaKind::Featured));
            }
            QuotaEffect::ReleaseFeatured => {
                if !listing.is_featured {
                    return Ok(listing);
                }
                updated.is_featured = false;
                release_after = true;
            }
            QuotaEffect::Release => {
                updated.quota_consumed = false;
                updated.subscription_id = None;
                updated.is_featured = false;
                release_after = true;
            }
        }

        let stored = match self.commit(updated, listing.version, event) {
            Ok(stored) => stored,
            Err(err) => {
                if let Some((subscription_id, kind)) = acquired {
                    self.compensate(&subscription_id, &[kind]);
                }
                return Err(err);
            }
        };

        if release_after {
            match transition.quota {
                QuotaEffect::ReleaseFeatured => {
                    if let Some(subscription_id) = &listing.subscription_id {
                        self.ledger
                            .release(subscription_id, QuotaKind::Featured)?;
                    }
                }
                _ => self.release_held(&listing)?,
            }
        }

        info!(
            listing = %stored.id,
            seller = %stored.seller_id,
            %event,
            from = %transition.from,
            to = %transition.to,
            quota_consumed = stored.quota_consumed,
            "listing transition applied"
        );
        Ok(stored)
    }

    /// Whether the slot `listing` holds sits on the seller's current subscription.
    fn bound_to_active(&self, listing: &Listing) -> Result<bool, EngineError> {
        Ok(self
            .subscriptions
            .get_active(&listing.seller_id)?
            .is_some_and(|active| listing.subscription_id.as_ref() == Some(&active.id)))
    }

    /// Approval without an active subscription has no slot to draw from.
    fn subscription_for_publish(&self, seller: &SellerId) -> Result<Subscription, EngineError> {
        self.subscriptions
            .get_active(seller)?
            .ok_or(EngineError::QuotaExhausted {
                kind: QuotaKind::Listing,
                limit: 0,
                used: 0,
            })
    }

    fn commit(
        &self,
        updated: Listing,
        expected_version: u64,
        event: ListingEvent,
    ) -> Result<Listing, EngineError> {
        let id = updated.id.clone();
        match self
            .repository
            .compare_and_swap_listing(updated, expected_version)
        {
            Ok(stored) => Ok(stored),
            Err(RepositoryError::Conflict) => {
                let current = self.get(&id)?;
                debug!(listing = %id, status = %current.workflow_status, %event, "listing write lost a race");
                Err(EngineError::InvalidTransition {
                    from: current.workflow_status,
                    event,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Release every slot `previous` held, as read before the write.
    fn release_held(&self, previous: &Listing) -> Result<(), EngineError> {
        let Some(subscription_id) = &previous.subscription_id else {
            return Ok(());
        };
        if previous.quota_consumed {
            self.ledger.release(subscription_id, QuotaKind::Listing)?;
        }
        if previous.is_featured {
            self.ledger.release(subscription_id, QuotaKind::Featured)?;
        }
        Ok(())
    }

    fn compensate(&self, subscription_id: &SubscriptionId, kinds: &[QuotaKind]) {
        for kind in kinds {
            if let Err(err) = self.ledger.release(subscription_id, *kind) {
                warn!(subscription = %subscription_id, %kind, error = %err, "failed to hand back quota after aborted write");
            }
        }
    }
}

/// Holds a slot that should move to `subscription`.
fn held_elsewhere(listing: &Listing, subscription: &SubscriptionId) -> bool {
    listing.quota_consumed
        && !listing.workflow_status.is_transacted()
        && listing.subscription_id.as_ref() != Some(subscription)
}

fn oldest_approval_first(a: &Listing, b: &Listing) -> CmpOrdering {
    match (a.approved_at, b.approved_at) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}
