use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::WorkflowStatus;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Identifier wrapper for registered seller accounts.
    SellerId
);
identifier!(
    /// Identifier wrapper for admin-published packages.
    PackageId
);
identifier!(
    /// Identifier wrapper for purchased subscriptions.
    SubscriptionId
);
identifier!(
    /// Identifier wrapper for property and project listings.
    ListingId
);
identifier!(
    /// Identifier of the moderator acting on a listing.
    AdminId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerType {
    Individual,
    Broker,
    Builder,
}

impl SellerType {
    pub const fn label(self) -> &'static str {
        match self {
            SellerType::Individual => "individual",
            SellerType::Broker => "broker",
            SellerType::Builder => "builder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

/// Registered seller. Accounts are deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerAccount {
    pub id: SellerId,
    pub display_name: String,
    pub seller_type: SellerType,
    pub verification_status: VerificationStatus,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

/// Admin-authored template a subscription is purchased from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub price_cents: u64,
    pub duration_days: u32,
    pub listing_limit: u32,
    pub featured_limit: u32,
    /// `None` means the package is offered to every seller type.
    pub applicable_to: Option<SellerType>,
    pub is_active: bool,
}

impl Package {
    pub fn applies_to(&self, seller_type: SellerType) -> bool {
        self.applicable_to
            .map_or(true, |applicable| applicable == seller_type)
    }
}

/// Fields an admin supplies when publishing a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDraft {
    pub name: String,
    pub price_cents: u64,
    pub duration_days: u32,
    pub listing_limit: u32,
    pub featured_limit: u32,
    #[serde(default)]
    pub applicable_to: Option<SellerType>,
}

/// Longest validity window a package may offer.
pub const MAX_PACKAGE_DURATION_DAYS: u32 = 3650;

impl PackageDraft {
    /// Reason the draft cannot be sold, if any.
    pub fn problem(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            return Some("package name must not be blank".to_string());
        }
        if self.duration_days == 0 || self.duration_days > MAX_PACKAGE_DURATION_DAYS {
            return Some(format!(
                "duration must be between 1 and {MAX_PACKAGE_DURATION_DAYS} days, got {}",
                self.duration_days
            ));
        }
        if self.listing_limit == 0 {
            return Some("listing limit must be at least 1".to_string());
        }
        None
    }
}

/// The two counters a subscription tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Listing,
    Featured,
}

impl QuotaKind {
    pub const fn label(self) -> &'static str {
        match self {
            QuotaKind::Listing => "listing",
            QuotaKind::Featured => "featured",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Quota ledger root. Limits are copied from the package at purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub seller_id: SellerId,
    pub package_id: PackageId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub listing_limit: u32,
    pub featured_limit: u32,
    pub listings_used: u32,
    pub featured_used: u32,
    pub is_active: bool,
    /// Optimistic concurrency token, bumped by the repository on every write.
    pub version: u64,
}

impl Subscription {
    /// `None` when the package window runs past the representable calendar.
    pub fn start(
        id: SubscriptionId,
        seller_id: SellerId,
        package: &Package,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let end_date = now.checked_add_signed(Duration::days(i64::from(package.duration_days)))?;
        Some(Self {
            id,
            seller_id,
            package_id: package.id.clone(),
            start_date: now,
            end_date,
            listing_limit: package.listing_limit,
            featured_limit: package.featured_limit,
            listings_used: 0,
            featured_used: 0,
            is_active: true,
            version: 0,
        })
    }

    pub fn used(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Listing => self.listings_used,
            QuotaKind::Featured => self.featured_used,
        }
    }

    pub fn limit(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Listing => self.listing_limit,
            QuotaKind::Featured => self.featured_limit,
        }
    }

    pub fn remaining(&self, kind: QuotaKind) -> u32 {
        self.limit(kind).saturating_sub(self.used(kind))
    }

    pub(crate) fn used_mut(&mut self, kind: QuotaKind) -> &mut u32 {
        match kind {
            QuotaKind::Listing => &mut self.listings_used,
            QuotaKind::Featured => &mut self.featured_used,
        }
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Property,
    Project,
}

/// Seller-authored body of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingContent {
    pub title: String,
    pub description: String,
    pub location: String,
    pub asking_price: u64,
}

/// A property or project record moving through moderation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller_id: SellerId,
    pub kind: ListingKind,
    pub content: ListingContent,
    pub workflow_status: WorkflowStatus,
    pub is_featured: bool,
    pub rejection_reason: Option<String>,
    pub claimed_by: Option<AdminId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this listing currently occupies a unit of `listings_used`.
    pub quota_consumed: bool,
    /// Subscription the held listing (and featured) slot was drawn from.
    pub subscription_id: Option<SubscriptionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Listing {
    pub fn draft(
        id: ListingId,
        seller_id: SellerId,
        kind: ListingKind,
        content: ListingContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            seller_id,
            kind,
            content,
            workflow_status: WorkflowStatus::Draft,
            is_featured: false,
            rejection_reason: None,
            claimed_by: None,
            approved_at: None,
            expires_at: None,
            quota_consumed: false,
            subscription_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// A slot still bound to `subscription` that was not spent on a completed deal.
    pub fn holds_open_slot_on(&self, subscription: &SubscriptionId) -> bool {
        self.quota_consumed
            && !self.workflow_status.is_transacted()
            && self.subscription_id.as_ref() == Some(subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    New,
    Edit,
}

impl RequestType {
    pub const fn label(self) -> &'static str {
        match self {
            RequestType::New => "new",
            RequestType::Edit => "edit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[serde(alias = "approve")]
    Approved,
    #[serde(alias = "reject")]
    Rejected,
}

impl Decision {
    pub const fn label(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Append-only audit record of a moderation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub listing_id: ListingId,
    pub request_type: RequestType,
    pub decided_by: AdminId,
    pub decision: Decision,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Read-only answer to "may this seller open the creation form".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAvailability {
    pub can_create: bool,
    pub remaining: u32,
}

impl QuotaAvailability {
    pub const fn unavailable() -> Self {
        Self {
            can_create: false,
            remaining: 0,
        }
    }
}
