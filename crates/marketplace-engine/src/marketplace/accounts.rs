use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    Package, PackageDraft, PackageId, SellerAccount, SellerId, SellerType, VerificationStatus,
};
use super::error::EngineError;
use super::repository::MarketplaceRepository;

static SELLER_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PACKAGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_seller_id() -> SellerId {
    let id = SELLER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SellerId(format!("sel-{id:06}"))
}

fn next_package_id() -> PackageId {
    let id = PACKAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PackageId(format!("pkg-{id:06}"))
}

/// Seller registration and the admin-managed package catalog.
pub struct AccountDirectory<R> {
    repository: Arc<R>,
}

impl<R> AccountDirectory<R>
where
    R: MarketplaceRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn register_seller(
        &self,
        display_name: &str,
        seller_type: SellerType,
        now: DateTime<Utc>,
    ) -> Result<SellerAccount, EngineError> {
        let seller = SellerAccount {
            id: next_seller_id(),
            display_name: display_name.trim().to_string(),
            seller_type,
            verification_status: VerificationStatus::Pending,
            is_active: true,
            registered_at: now,
        };
        let stored = self.repository.insert_seller(seller)?;
        info!(seller = %stored.id, seller_type = stored.seller_type.label(), "seller registered");
        Ok(stored)
    }

    pub fn seller(&self, id: &SellerId) -> Result<SellerAccount, EngineError> {
        self.repository
            .fetch_seller(id)?
            .ok_or_else(|| EngineError::SellerNotFound(id.clone()))
    }

    /// Active seller or the reason they cannot act.
    pub fn active_seller(&self, id: &SellerId) -> Result<SellerAccount, EngineError> {
        let seller = self.seller(id)?;
        if !seller.is_active {
            return Err(EngineError::SellerDeactivated(id.clone()));
        }
        Ok(seller)
    }

    /// Admin-only.
    pub fn set_verification(
        &self,
        id: &SellerId,
        status: VerificationStatus,
    ) -> Result<SellerAccount, EngineError> {
        let mut seller = self.seller(id)?;
        seller.verification_status = status;
        self.repository.update_seller(seller.clone())?;
        info!(seller = %seller.id, ?status, "seller verification updated");
        Ok(seller)
    }

    pub fn deactivate_seller(&self, id: &SellerId) -> Result<SellerAccount, EngineError> {
        let mut seller = self.seller(id)?;
        if seller.is_active {
            seller.is_active = false;
            self.repository.update_seller(seller.clone())?;
            info!(seller = %seller.id, "seller deactivated");
        }
        Ok(seller)
    }

    pub fn publish_package(&self, draft: PackageDraft) -> Result<Package, EngineError> {
        if let Some(problem) = draft.problem() {
            warn!(package = %draft.name, %problem, "package draft refused");
            return Err(EngineError::InvalidPackage(problem));
        }
        let package = Package {
            id: next_package_id(),
            name: draft.name.trim().to_string(),
            price_cents: draft.price_cents,
            duration_days: draft.duration_days,
            listing_limit: draft.listing_limit,
            featured_limit: draft.featured_limit,
            applicable_to: draft.applicable_to,
            is_active: true,
        };
        let stored = self.repository.insert_package(package)?;
        info!(
            package = %stored.id,
            listing_limit = stored.listing_limit,
            featured_limit = stored.featured_limit,
            "package published"
        );
        Ok(stored)
    }

    pub fn package(&self, id: &PackageId) -> Result<Package, EngineError> {
        self.repository
            .fetch_package(id)?
            .ok_or_else(|| EngineError::PackageNotFound(id.clone()))
    }

    /// Withdraw a package from sale. Subscriptions already bought keep their snapshot.
    pub fn retire_package(&self, id: &PackageId) -> Result<Package, EngineError> {
        let mut package = self.package(id)?;
        if package.is_active {
            package.is_active = false;
            self.repository.update_package(package.clone())?;
            info!(package = %package.id, "package retired");
        }
        Ok(package)
    }
}
