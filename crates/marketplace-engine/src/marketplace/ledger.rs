//! Quota ledger: the two per-subscription counters and nothing else.
//!
//! Every mutation is a compare-and-swap on one subscription row, retried a bounded number of
//! times when another writer got there first.

use std::sync::Arc;

use tracing::{debug, warn};

use super::domain::{QuotaKind, Subscription, SubscriptionId};
use super::error::EngineError;
use super::repository::{RepositoryError, SubscriptionRepository};

pub struct QuotaLedger<S> {
    store: Arc<S>,
    retry_limit: u32,
}

impl<S> QuotaLedger<S>
where
    S: SubscriptionRepository,
{
    pub fn new(store: Arc<S>, retry_limit: u32) -> Self {
        Self { store, retry_limit }
    }

    /// Take one unit of `kind`, failing with `QuotaExhausted` when the cap is reached.
    pub fn try_consume(
        &self,
        subscription_id: &SubscriptionId,
        kind: QuotaKind,
    ) -> Result<Subscription, EngineError> {
        self.update(subscription_id, kind, |subscription| {
            if !subscription.is_active {
                return Err(EngineError::NoActiveSubscription(
                    subscription.seller_id.clone(),
                ));
            }
            let used = subscription.used(kind);
            let limit = subscription.limit(kind);
            if used >= limit {
                return Err(EngineError::QuotaExhausted { kind, limit, used });
            }
            *subscription.used_mut(kind) = used + 1;
            Ok(true)
        })
    }

    /// Give back one unit of `kind`. Releasing an empty counter is a logged no-op.
    pub fn release(
        &self,
        subscription_id: &SubscriptionId,
        kind: QuotaKind,
    ) -> Result<Subscription, EngineError> {
        self.update(subscription_id, kind, |subscription| {
            let used = subscription.used(kind);
            if used == 0 {
                warn!(
                    subscription = %subscription.id,
                    %kind,
                    "release on an empty quota counter ignored"
                );
                return Ok(false);
            }
            *subscription.used_mut(kind) = used - 1;
            Ok(true)
        })
    }

    fn update<F>(
        &self,
        subscription_id: &SubscriptionId,
        kind: QuotaKind,
        mut mutate: F,
    ) -> Result<Subscription, EngineError>
    where
        F: FnMut(&mut Subscription) -> Result<bool, EngineError>,
    {
        for attempt in 0..=self.retry_limit {
            let current = self
                .store
                .fetch_subscription(subscription_id)?
                .ok_or_else(|| EngineError::SubscriptionNotFound(subscription_id.clone()))?;

            let mut next = current.clone();
            if !mutate(&mut next)? {
                return Ok(current);
            }

            match self
                .store
                .compare_and_swap_subscription(next, current.version)
            {
                Ok(stored) => {
                    debug!(
                        subscription = %stored.id,
                        %kind,
                        used = stored.used(kind),
                        limit = stored.limit(kind),
                        "quota counter updated"
                    );
                    return Ok(stored);
                }
                Err(RepositoryError::Conflict) => {
                    debug!(subscription = %subscription_id, attempt, "quota write lost a race, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(subscription = %subscription_id, %kind, "quota update gave up after repeated conflicts");
        Err(EngineError::Contention(subscription_id.clone()))
    }
}
