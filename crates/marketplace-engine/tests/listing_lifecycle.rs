//! End-to-end scenarios for listing moderation and subscription quota.
//!
//! Everything goes through the public engine facade backed by the in-memory store, including
//! concurrent moderators racing for the last slots of a plan.

mod common {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use marketplace_engine::config::EngineConfig;
    use marketplace_engine::marketplace::{
        AdminId, Clock, Decision, InMemoryMarketplace, ListingContent, ListingId, ListingKind,
        ManualClock, MarketplaceEngine, PackageDraft, RecordingNotifications, SellerId,
        SellerType, Subscription, SubscriptionRepository, WorkflowStatus,
    };

    pub(super) type Engine = MarketplaceEngine<InMemoryMarketplace, RecordingNotifications>;

    pub(super) struct World {
        pub(super) engine: Arc<Engine>,
        pub(super) store: Arc<InMemoryMarketplace>,
        pub(super) clock: Arc<ManualClock>,
    }

    impl World {
        pub(super) fn subscription(&self, seller: &SellerId) -> Subscription {
            self.engine
                .active_subscription(seller)
                .expect("readable")
                .expect("active subscription")
        }

        pub(super) fn stored(&self, subscription: &Subscription) -> Subscription {
            self.store
                .fetch_subscription(&subscription.id)
                .expect("readable")
                .expect("stored")
        }
    }

    pub(super) fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    pub(super) fn world() -> World {
        let store = Arc::new(InMemoryMarketplace::default());
        let clock = Arc::new(ManualClock::starting_at(start()));
        let engine = Arc::new(MarketplaceEngine::with_clock(
            store.clone(),
            Arc::new(RecordingNotifications::default()),
            EngineConfig {
                listing_ttl_days: 60,
                sweep_interval_secs: 300,
                cas_retry_limit: 8,
            },
            clock.clone() as Arc<dyn Clock>,
        ));
        World {
            engine,
            store,
            clock,
        }
    }

    pub(super) fn seller_on_plan(world: &World, listing_limit: u32, duration_days: u32) -> SellerId {
        let seller = world
            .engine
            .register_seller("Northgate Builders", SellerType::Builder)
            .expect("registered");
        let package = world
            .engine
            .publish_package(PackageDraft {
                name: "Builder Pro".to_string(),
                price_cents: 19_900,
                duration_days,
                listing_limit,
                featured_limit: 1,
                applicable_to: Some(SellerType::Builder),
            })
            .expect("published");
        world
            .engine
            .purchase_subscription(&seller.id, &package.id)
            .expect("purchased");
        seller.id
    }

    pub(super) fn moderator(name: &str) -> AdminId {
        AdminId::from(name)
    }

    pub(super) fn submit(world: &World, seller: &SellerId, title: &str) -> ListingId {
        let listing = world
            .engine
            .create_listing(
                seller,
                ListingKind::Project,
                ListingContent {
                    title: title.to_string(),
                    description: "Phase two, 48 units".to_string(),
                    location: "North Quarter".to_string(),
                    asking_price: 310_000,
                },
            )
            .expect("draft");
        world.engine.submit_listing(&listing.id).expect("submitted");
        listing.id
    }

    pub(super) fn publish(world: &World, seller: &SellerId, title: &str) -> ListingId {
        let id = submit(world, seller, title);
        let status = world
            .engine
            .decide(&id, &moderator("adm-lead"), Decision::Approved, None)
            .expect("approved");
        assert_eq!(status, WorkflowStatus::Live);
        id
    }
}

use std::sync::Arc;
use std::thread;

use chrono::Duration;

use common::*;
use marketplace_engine::marketplace::{
    Decision, EngineError, ListingRepository, QuotaKind, WorkflowStatus,
};

#[test]
fn last_slot_goes_to_the_first_approval() {
    let world = world();
    let seller = seller_on_plan(&world, 3, 90);
    publish(&world, &seller, "Block 1");
    publish(&world, &seller, "Block 2");
    assert_eq!(world.subscription(&seller).listings_used, 2);

    let a = publish(&world, &seller, "Block A");
    assert_eq!(world.subscription(&seller).listings_used, 3);

    let b = submit(&world, &seller, "Block B");
    assert_eq!(world.subscription(&seller).listings_used, 3);

    let err = world
        .engine
        .decide(&b, &moderator("adm-lead"), Decision::Approved, None)
        .expect_err("no slot left");
    assert!(matches!(
        err,
        EngineError::QuotaExhausted {
            kind: QuotaKind::Listing,
            ..
        }
    ));
    assert_eq!(err.remaining(), Some(0));
    assert_eq!(
        world.engine.listing(&b).expect("stored").workflow_status,
        WorkflowStatus::Submitted
    );
    assert_eq!(
        world.engine.listing(&a).expect("stored").workflow_status,
        WorkflowStatus::Live
    );
}

#[test]
fn lapsed_plan_is_swept_exactly_once() {
    let world = world();
    let seller = seller_on_plan(&world, 5, 30);
    let subscription = world.subscription(&seller);
    let first = publish(&world, &seller, "Tower East");
    let second = publish(&world, &seller, "Tower West");

    world.clock.advance(Duration::days(31));
    let summary = world.engine.run_expiry_sweep().expect("sweep");
    assert_eq!(summary.subscriptions_expired, 1);
    assert_eq!(summary.listings_expired, 2);

    for id in [&first, &second] {
        assert_eq!(
            world.engine.listing(id).expect("stored").workflow_status,
            WorkflowStatus::Expired
        );
    }
    let stored = world.stored(&subscription);
    assert!(!stored.is_active);
    assert_eq!(stored.listings_used, 0);
    assert!(world
        .engine
        .active_subscription(&seller)
        .expect("readable")
        .is_none());

    assert!(world.engine.run_expiry_sweep().expect("sweep").is_empty());
    assert_eq!(world.stored(&subscription).listings_used, 0);
}

#[test]
fn rejected_listing_resubmits_without_touching_quota() {
    let world = world();
    let seller = seller_on_plan(&world, 2, 90);
    let c = submit(&world, &seller, "Listing C");

    world
        .engine
        .decide(
            &c,
            &moderator("adm-lead"),
            Decision::Rejected,
            Some("incomplete documents"),
        )
        .expect("rejected");
    assert_eq!(world.subscription(&seller).listings_used, 0);

    assert_eq!(
        world.engine.submit_listing(&c).expect("resubmitted"),
        WorkflowStatus::Submitted
    );
    assert_eq!(world.subscription(&seller).listings_used, 0);

    let decisions = world.engine.decisions_for(&c).expect("audit");
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, Decision::Rejected);
}

#[test]
fn concurrent_approvals_never_overshoot_the_limit() {
    let world = world();
    let limit = 3;
    let seller = seller_on_plan(&world, limit, 90);
    let pending: Vec<_> = (0..8)
        .map(|n| submit(&world, &seller, &format!("Unit {n}")))
        .collect();

    let handles: Vec<_> = pending
        .into_iter()
        .enumerate()
        .map(|(n, id)| {
            let engine = Arc::clone(&world.engine);
            thread::spawn(move || {
                engine.decide(
                    &id,
                    &moderator(&format!("adm-{n}")),
                    Decision::Approved,
                    None,
                )
            })
        })
        .collect();

    let mut approved = 0;
    for handle in handles {
        match handle.join().expect("thread finished") {
            Ok(WorkflowStatus::Live) => approved += 1,
            Ok(other) => panic!("unexpected status {other}"),
            Err(EngineError::QuotaExhausted { .. }) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    assert_eq!(approved, limit);
    let subscription = world.subscription(&seller);
    assert_eq!(subscription.listings_used, limit);

    let holders = world
        .store
        .listings_for_seller(&seller)
        .expect("readable")
        .into_iter()
        .filter(|listing| listing.quota_consumed)
        .count();
    assert_eq!(holders as u32, subscription.listings_used);
}

#[test]
fn racing_moderators_produce_one_decision() {
    let world = world();
    let seller = seller_on_plan(&world, 2, 90);
    let id = submit(&world, &seller, "Contested");

    let handles: Vec<_> = ["adm-left", "adm-right"]
        .into_iter()
        .map(|name| {
            let engine = Arc::clone(&world.engine);
            let id = id.clone();
            thread::spawn(move || engine.decide(&id, &moderator(name), Decision::Approved, None))
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread finished"))
        .collect();

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            match err {
                EngineError::AlreadyDecided(existing) => {
                    assert_eq!(existing.decision, Decision::Approved);
                }
                other => panic!("expected the winning decision, got {other}"),
            }
        }
    }
    assert_eq!(world.subscription(&seller).listings_used, 1);
    assert_eq!(world.engine.decisions_for(&id).expect("audit").len(), 1);
}
