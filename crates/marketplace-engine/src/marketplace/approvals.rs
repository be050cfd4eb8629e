use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::domain::{
    AdminId, ApprovalDecision, Decision, Listing, ListingId, RequestType,
};
use super::error::EngineError;
use super::listings::ListingService;
use super::repository::{ListingNotification, MarketplaceRepository, NotificationPublisher};
use super::workflow::{ListingEvent, WorkflowStatus};

/// Pause between reads while a concurrent decision is still writing its audit record.
const RECORD_POLL: Duration = Duration::from_millis(5);

/// Admin-facing protocol resolving pending listings.
pub struct ApprovalCoordinator<R, N> {
    repository: Arc<R>,
    listings: Arc<ListingService<R>>,
    notifications: Arc<N>,
    retry_limit: u32,
}

impl<R, N> ApprovalCoordinator<R, N>
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        listings: Arc<ListingService<R>>,
        notifications: Arc<N>,
        retry_limit: u32,
    ) -> Self {
        Self {
            repository,
            listings,
            notifications,
            retry_limit,
        }
    }

    pub fn claim(
        &self,
        listing: &ListingId,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        self.listings.claim(listing, admin, now)
    }

    /// Apply an admin decision to a pending listing and append it to the audit trail.
    pub fn decide(
        &self,
        listing_id: &ListingId,
        admin: &AdminId,
        decision: Decision,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let listing = self.listings.get(listing_id)?;
        if !listing.workflow_status.is_pending_review() {
            return Err(self.not_pending(&listing, decision)?);
        }

        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        let request_type = if listing.approved_at.is_some() {
            RequestType::Edit
        } else {
            RequestType::New
        };

        let decided = self.transition(listing_id, decision, reason.as_deref(), now)?;

        let record = ApprovalDecision {
            listing_id: listing_id.clone(),
            request_type,
            decided_by: admin.clone(),
            decision,
            reason,
            decided_at: now,
        };
        // The transition is committed at this point; a failed audit write is logged, not returned.
        if let Err(err) = self.repository.append_decision(record.clone()) {
            warn!(
                listing = %record.listing_id,
                admin = %record.decided_by,
                decision = record.decision.label(),
                error = %err,
                "decision applied but audit record not written"
            );
        }

        info!(
            listing = %record.listing_id,
            admin = %record.decided_by,
            decision = record.decision.label(),
            request_type = record.request_type.label(),
            "moderation decision recorded"
        );

        self.notify(&decided, &record);
        Ok(decided)
    }

    /// Oldest pending first.
    pub fn pending(&self, limit: usize) -> Result<Vec<Listing>, EngineError> {
        Ok(self.repository.listings_in_status(
            &[WorkflowStatus::Submitted, WorkflowStatus::UnderReview],
            limit,
        )?)
    }

    pub fn decisions_for(&self, listing: &ListingId) -> Result<Vec<ApprovalDecision>, EngineError> {
        Ok(self.repository.decisions_for(listing)?)
    }

    /// Apply the decision, retrying while the listing is still pending but changed underneath
    /// (a concurrent claim). A listing that left review meanwhile reports who decided it.
    fn transition(
        &self,
        listing_id: &ListingId,
        decision: Decision,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Listing, EngineError> {
        let mut attempt = 0;
        loop {
            let outcome = match decision {
                Decision::Approved => self.listings.approve(listing_id, now),
                Decision::Rejected => {
                    let reason = reason.ok_or(EngineError::RejectionReasonRequired)?;
                    self.listings.reject(listing_id, reason, now)
                }
            };
            match outcome {
                Err(err @ EngineError::InvalidTransition { .. }) => {
                    let current = self.listings.get(listing_id)?;
                    if !current.workflow_status.is_pending_review() {
                        return Err(self.not_pending(&current, decision)?);
                    }
                    if attempt >= self.retry_limit {
                        return Err(err);
                    }
                    attempt += 1;
                    debug!(listing = %listing_id, attempt, "pending listing changed during decision, retrying");
                }
                other => return other,
            }
        }
    }

    fn not_pending(
        &self,
        listing: &Listing,
        decision: Decision,
    ) -> Result<EngineError, EngineError> {
        // A decision that just committed appends its record right after the transition.
        let awaits_record = matches!(
            listing.workflow_status,
            WorkflowStatus::Live | WorkflowStatus::Rejected
        );
        for attempt in 0..=self.retry_limit {
            if let Some(existing) = self.repository.decisions_for(&listing.id)?.pop() {
                return Ok(EngineError::AlreadyDecided(Box::new(existing)));
            }
            if !awaits_record || attempt == self.retry_limit {
                break;
            }
            thread::sleep(RECORD_POLL);
        }
        Ok(EngineError::InvalidTransition {
            from: listing.workflow_status,
            event: match decision {
                Decision::Approved => ListingEvent::Approve,
                Decision::Rejected => ListingEvent::Reject,
            },
        })
    }

    fn notify(&self, listing: &Listing, record: &ApprovalDecision) {
        let mut details = BTreeMap::new();
        details.insert("decision".to_string(), record.decision.label().to_string());
        details.insert(
            "request_type".to_string(),
            record.request_type.label().to_string(),
        );
        details.insert(
            "status".to_string(),
            listing.workflow_status.label().to_string(),
        );
        if let Some(reason) = &record.reason {
            details.insert("reason".to_string(), reason.clone());
        }

        let template = match record.decision {
            Decision::Approved => "listing_approved",
            Decision::Rejected => "listing_rejected",
        };

        let notification = ListingNotification {
            template: template.to_string(),
            listing_id: listing.id.clone(),
            seller_id: listing.seller_id.clone(),
            details,
        };

        if let Err(err) = self.notifications.publish(notification) {
            warn!(listing = %listing.id, error = %err, "decision notification not delivered");
        }
    }
}
