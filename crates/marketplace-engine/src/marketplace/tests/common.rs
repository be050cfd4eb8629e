use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::marketplace::clock::{Clock, ManualClock};
use crate::marketplace::domain::{
    AdminId, ApprovalDecision, Listing, ListingContent, ListingId, ListingKind, Package,
    PackageDraft, PackageId, SellerAccount, SellerId, SellerType, Subscription, SubscriptionId,
};
use crate::marketplace::engine::MarketplaceEngine;
use crate::marketplace::memory::{InMemoryMarketplace, RecordingNotifications};
use crate::marketplace::repository::{
    DecisionLog, ListingNotification, ListingRepository, NotificationError,
    NotificationPublisher, PackageRepository, RepositoryError, SellerRepository,
    SubscriptionRepository,
};
use crate::marketplace::workflow::WorkflowStatus;
use crate::marketplace::Decision;

pub(super) type TestEngine = MarketplaceEngine<InMemoryMarketplace, RecordingNotifications>;

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        listing_ttl_days: 30,
        sweep_interval_secs: 60,
        cas_retry_limit: 8,
    }
}

pub(super) struct Harness {
    pub(super) engine: TestEngine,
    pub(super) repository: Arc<InMemoryMarketplace>,
    pub(super) notifications: Arc<RecordingNotifications>,
    pub(super) clock: Arc<ManualClock>,
}

impl Harness {
    pub(super) fn subscription(&self, id: &SubscriptionId) -> Subscription {
        self.repository
            .fetch_subscription(id)
            .expect("repository reachable")
            .expect("subscription stored")
    }

    pub(super) fn listing(&self, id: &ListingId) -> Listing {
        self.engine.listing(id).expect("listing stored")
    }

    pub(super) fn listings_used(&self, id: &SubscriptionId) -> u32 {
        self.subscription(id).listings_used
    }
}

pub(super) fn build_harness() -> Harness {
    let repository = Arc::new(InMemoryMarketplace::default());
    let notifications = Arc::new(RecordingNotifications::default());
    let clock = Arc::new(ManualClock::starting_at(fixed_now()));
    let engine = MarketplaceEngine::with_clock(
        repository.clone(),
        notifications.clone(),
        engine_config(),
        clock.clone() as Arc<dyn Clock>,
    );
    Harness {
        engine,
        repository,
        notifications,
        clock,
    }
}

pub(super) fn package_draft(listing_limit: u32, featured_limit: u32) -> PackageDraft {
    PackageDraft {
        name: format!("Plan {listing_limit}/{featured_limit}"),
        price_cents: 4_900,
        duration_days: 365,
        listing_limit,
        featured_limit,
        applicable_to: None,
    }
}

pub(super) fn publish(harness: &Harness, listing_limit: u32, featured_limit: u32) -> Package {
    harness
        .engine
        .publish_package(package_draft(listing_limit, featured_limit))
        .expect("package published")
}

pub(super) fn seller(harness: &Harness) -> SellerAccount {
    harness
        .engine
        .register_seller("Harbor Realty", SellerType::Broker)
        .expect("seller registered")
}

/// Registered seller with an active subscription on a fresh package.
pub(super) fn seller_with_plan(
    harness: &Harness,
    listing_limit: u32,
    featured_limit: u32,
) -> (SellerId, Subscription) {
    let seller = seller(harness);
    let package = publish(harness, listing_limit, featured_limit);
    let subscription = harness
        .engine
        .purchase_subscription(&seller.id, &package.id)
        .expect("subscription purchased");
    (seller.id, subscription)
}

pub(super) fn content(title: &str) -> ListingContent {
    ListingContent {
        title: title.to_string(),
        description: "Two bedroom flat with balcony".to_string(),
        location: "Riverside, Block C".to_string(),
        asking_price: 185_000,
    }
}

pub(super) fn admin() -> AdminId {
    AdminId::from("adm-moderator")
}

pub(super) fn submitted_listing(harness: &Harness, seller: &SellerId, title: &str) -> ListingId {
    let listing = harness
        .engine
        .create_listing(seller, ListingKind::Property, content(title))
        .expect("draft created");
    assert_eq!(
        harness.engine.submit_listing(&listing.id).expect("submitted"),
        WorkflowStatus::Submitted
    );
    listing.id
}

pub(super) fn live_listing(harness: &Harness, seller: &SellerId, title: &str) -> ListingId {
    let id = submitted_listing(harness, seller, title);
    assert_eq!(
        harness
            .engine
            .decide(&id, &admin(), Decision::Approved, None)
            .expect("approved"),
        WorkflowStatus::Live
    );
    id
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Every call fails as if the database were offline.
pub(super) struct UnavailableRepository;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl SellerRepository for UnavailableRepository {
    fn insert_seller(&self, _seller: SellerAccount) -> Result<SellerAccount, RepositoryError> {
        offline()
    }

    fn update_seller(&self, _seller: SellerAccount) -> Result<(), RepositoryError> {
        offline()
    }

    fn fetch_seller(&self, _id: &SellerId) -> Result<Option<SellerAccount>, RepositoryError> {
        offline()
    }
}

impl PackageRepository for UnavailableRepository {
    fn insert_package(&self, _package: Package) -> Result<Package, RepositoryError> {
        offline()
    }

    fn update_package(&self, _package: Package) -> Result<(), RepositoryError> {
        offline()
    }

    fn fetch_package(&self, _id: &PackageId) -> Result<Option<Package>, RepositoryError> {
        offline()
    }
}

impl SubscriptionRepository for UnavailableRepository {
    fn fetch_subscription(
        &self,
        _id: &SubscriptionId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        offline()
    }

    fn active_subscription(
        &self,
        _seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        offline()
    }

    fn latest_subscription(
        &self,
        _seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        offline()
    }

    fn activate_subscription(
        &self,
        _subscription: Subscription,
        _superseded: Option<&Subscription>,
    ) -> Result<Subscription, RepositoryError> {
        offline()
    }

    fn compare_and_swap_subscription(
        &self,
        _subscription: Subscription,
        _expected_version: u64,
    ) -> Result<Subscription, RepositoryError> {
        offline()
    }

    fn lapsed_subscriptions(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        offline()
    }
}

impl ListingRepository for UnavailableRepository {
    fn insert_listing(&self, _listing: Listing) -> Result<Listing, RepositoryError> {
        offline()
    }

    fn fetch_listing(&self, _id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        offline()
    }

    fn compare_and_swap_listing(
        &self,
        _listing: Listing,
        _expected_version: u64,
    ) -> Result<Listing, RepositoryError> {
        offline()
    }

    fn listings_for_seller(&self, _seller: &SellerId) -> Result<Vec<Listing>, RepositoryError> {
        offline()
    }

    fn listings_in_status(
        &self,
        _statuses: &[WorkflowStatus],
        _limit: usize,
    ) -> Result<Vec<Listing>, RepositoryError> {
        offline()
    }

    fn overdue_live_listings(&self, _now: DateTime<Utc>) -> Result<Vec<Listing>, RepositoryError> {
        offline()
    }
}

impl DecisionLog for UnavailableRepository {
    fn append_decision(&self, _decision: ApprovalDecision) -> Result<(), RepositoryError> {
        offline()
    }

    fn decisions_for(&self, _listing: &ListingId) -> Result<Vec<ApprovalDecision>, RepositoryError> {
        offline()
    }
}

/// Notification transport that is always down.
#[derive(Default)]
pub(super) struct FailingNotifications;

impl NotificationPublisher for FailingNotifications {
    fn publish(&self, _notification: ListingNotification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay refused".to_string()))
    }
}

type ListingWriteHook = Box<dyn FnMut(&InMemoryMarketplace) + Send>;

/// In-memory store that can interleave a concurrent writer right before each listing write,
/// and can drop audit records.
#[derive(Default)]
pub(super) struct InterleavedRepository {
    pub(super) inner: InMemoryMarketplace,
    listing_write_hook: Mutex<Option<ListingWriteHook>>,
    audit_offline: AtomicBool,
}

impl InterleavedRepository {
    pub(super) fn before_listing_write<F>(&self, hook: F)
    where
        F: FnMut(&InMemoryMarketplace) + Send + 'static,
    {
        *self.listing_write_hook.lock().expect("hook lock") = Some(Box::new(hook));
    }

    pub(super) fn clear_hook(&self) {
        self.listing_write_hook.lock().expect("hook lock").take();
    }

    pub(super) fn take_audit_offline(&self) {
        self.audit_offline.store(true, AtomicOrdering::SeqCst);
    }
}

/// Rewrite the stored listing unchanged so its version moves on.
pub(super) fn touch_listing(store: &InMemoryMarketplace, id: &ListingId) {
    let current = store
        .fetch_listing(id)
        .expect("repository reachable")
        .expect("listing stored");
    let version = current.version;
    store
        .compare_and_swap_listing(current, version)
        .expect("concurrent write applied");
}

pub(super) type InterleavedEngine = MarketplaceEngine<InterleavedRepository, RecordingNotifications>;

pub(super) fn interleaved_engine() -> (InterleavedEngine, Arc<InterleavedRepository>) {
    let repository = Arc::new(InterleavedRepository::default());
    let engine = MarketplaceEngine::with_clock(
        repository.clone(),
        Arc::new(RecordingNotifications::default()),
        engine_config(),
        Arc::new(ManualClock::starting_at(fixed_now())) as Arc<dyn Clock>,
    );
    (engine, repository)
}

impl SellerRepository for InterleavedRepository {
    fn insert_seller(&self, seller: SellerAccount) -> Result<SellerAccount, RepositoryError> {
        self.inner.insert_seller(seller)
    }

    fn update_seller(&self, seller: SellerAccount) -> Result<(), RepositoryError> {
        self.inner.update_seller(seller)
    }

    fn fetch_seller(&self, id: &SellerId) -> Result<Option<SellerAccount>, RepositoryError> {
        self.inner.fetch_seller(id)
    }
}

impl PackageRepository for InterleavedRepository {
    fn insert_package(&self, package: Package) -> Result<Package, RepositoryError> {
        self.inner.insert_package(package)
    }

    fn update_package(&self, package: Package) -> Result<(), RepositoryError> {
        self.inner.update_package(package)
    }

    fn fetch_package(&self, id: &PackageId) -> Result<Option<Package>, RepositoryError> {
        self.inner.fetch_package(id)
    }
}

impl SubscriptionRepository for InterleavedRepository {
    fn fetch_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        self.inner.fetch_subscription(id)
    }

    fn active_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        self.inner.active_subscription(seller)
    }

    fn latest_subscription(
        &self,
        seller: &SellerId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        self.inner.latest_subscription(seller)
    }

    fn activate_subscription(
        &self,
        subscription: Subscription,
        superseded: Option<&Subscription>,
    ) -> Result<Subscription, RepositoryError> {
        self.inner.activate_subscription(subscription, superseded)
    }

    fn compare_and_swap_subscription(
        &self,
        subscription: Subscription,
        expected_version: u64,
    ) -> Result<Subscription, RepositoryError> {
        self.inner
            .compare_and_swap_subscription(subscription, expected_version)
    }

    fn lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        self.inner.lapsed_subscriptions(now)
    }
}

impl ListingRepository for InterleavedRepository {
    fn insert_listing(&self, listing: Listing) -> Result<Listing, RepositoryError> {
        self.inner.insert_listing(listing)
    }

    fn fetch_listing(&self, id: &ListingId) -> Result<Option<Listing>, RepositoryError> {
        self.inner.fetch_listing(id)
    }

    fn compare_and_swap_listing(
        &self,
        listing: Listing,
        expected_version: u64,
    ) -> Result<Listing, RepositoryError> {
        if let Some(hook) = self.listing_write_hook.lock().expect("hook lock").as_mut() {
            hook(&self.inner);
        }
        self.inner.compare_and_swap_listing(listing, expected_version)
    }

    fn listings_for_seller(&self, seller: &SellerId) -> Result<Vec<Listing>, RepositoryError> {
        self.inner.listings_for_seller(seller)
    }

    fn listings_in_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> Result<Vec<Listing>, RepositoryError> {
        self.inner.listings_in_status(statuses, limit)
    }

    fn overdue_live_listings(&self, now: DateTime<Utc>) -> Result<Vec<Listing>, RepositoryError> {
        self.inner.overdue_live_listings(now)
    }
}

impl DecisionLog for InterleavedRepository {
    fn append_decision(&self, decision: ApprovalDecision) -> Result<(), RepositoryError> {
        if self.audit_offline.load(AtomicOrdering::SeqCst) {
            return offline();
        }
        self.inner.append_decision(decision)
    }

    fn decisions_for(&self, listing: &ListingId) -> Result<Vec<ApprovalDecision>, RepositoryError> {
        self.inner.decisions_for(listing)
    }
}

pub(super) fn interleaved_seller(engine: &InterleavedEngine, listing_limit: u32) -> SellerId {
    let seller = engine
        .register_seller("Canal Estates", SellerType::Broker)
        .expect("seller registered");
    let package = engine
        .publish_package(package_draft(listing_limit, 0))
        .expect("package published");
    engine
        .purchase_subscription(&seller.id, &package.id)
        .expect("subscription purchased");
    seller.id
}

pub(super) fn interleaved_submitted(
    engine: &InterleavedEngine,
    seller: &SellerId,
    title: &str,
) -> ListingId {
    let listing = engine
        .create_listing(seller, ListingKind::Property, content(title))
        .expect("draft created");
    engine.submit_listing(&listing.id).expect("submitted");
    listing.id
}

pub(super) fn interleaved_live(
    engine: &InterleavedEngine,
    seller: &SellerId,
    title: &str,
) -> ListingId {
    let id = interleaved_submitted(engine, seller, title);
    assert_eq!(
        engine
            .decide(&id, &admin(), Decision::Approved, None)
            .expect("approved"),
        WorkflowStatus::Live
    );
    id
}
