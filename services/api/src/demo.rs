use crate::infra::{seed_catalog, LoggingNotifications};
use chrono::{Duration, Utc};
use clap::Args;
use marketplace_engine::config::EngineConfig;
use marketplace_engine::error::AppError;
use marketplace_engine::marketplace::{
    AdminId, Clock, Decision, InMemoryMarketplace, ListingContent, ListingId, ListingKind,
    ManualClock, MarketplaceEngine, Package, SellerId, SellerType,
};
use serde::Serialize;
use std::sync::Arc;

type DemoEngine = MarketplaceEngine<InMemoryMarketplace, LoggingNotifications>;

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Days to fast-forward the clock before sweeping.
    #[arg(long, default_value_t = 0)]
    pub(crate) advance_days: u32,
    /// Live listings to publish for the sample seller before the sweep.
    #[arg(long, default_value_t = 2)]
    pub(crate) live_listings: u32,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print each step's state as JSON instead of a one-line summary.
    #[arg(long)]
    pub(crate) json: bool,
}

struct Sandbox {
    engine: DemoEngine,
    clock: Arc<ManualClock>,
    starter: Package,
}

fn sandbox() -> Result<Sandbox, AppError> {
    let clock = Arc::new(ManualClock::starting_at(Utc::now()));
    let engine = MarketplaceEngine::with_clock(
        Arc::new(InMemoryMarketplace::default()),
        Arc::new(LoggingNotifications),
        EngineConfig::default(),
        clock.clone() as Arc<dyn Clock>,
    );
    let starter = seed_catalog(&engine)?
        .into_iter()
        .find(|package| package.applicable_to.is_none())
        .ok_or_else(|| {
            AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "default catalog has no open package",
            ))
        })?;
    Ok(Sandbox {
        engine,
        clock,
        starter,
    })
}

fn sample_content(title: &str) -> ListingContent {
    ListingContent {
        title: title.to_string(),
        description: "Sunny corner unit close to the tram line".to_string(),
        location: "Eastside".to_string(),
        asking_price: 215_000,
    }
}

fn moderator() -> AdminId {
    AdminId::from("adm-demo")
}

impl Sandbox {
    fn seller(&self, name: &str) -> Result<SellerId, AppError> {
        let seller = self.engine.register_seller(name, SellerType::Individual)?;
        self.engine
            .purchase_subscription(&seller.id, &self.starter.id)?;
        Ok(seller.id)
    }

    fn submitted(&self, seller: &SellerId, title: &str) -> Result<ListingId, AppError> {
        let listing = self
            .engine
            .create_listing(seller, ListingKind::Property, sample_content(title))?;
        self.engine.submit_listing(&listing.id)?;
        Ok(listing.id)
    }

    fn live(&self, seller: &SellerId, title: &str) -> Result<ListingId, AppError> {
        let id = self.submitted(seller, title)?;
        self.engine
            .decide(&id, &moderator(), Decision::Approved, None)?;
        Ok(id)
    }

    fn listings_used(&self, seller: &SellerId) -> Result<Option<u32>, AppError> {
        Ok(self
            .engine
            .active_subscription(seller)?
            .map(|subscription| subscription.listings_used))
    }
}

pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let sandbox = sandbox()?;
    let seller = sandbox.seller("Sweep Sample")?;
    let publishable = args.live_listings.min(sandbox.starter.listing_limit);
    for n in 0..publishable {
        sandbox.live(&seller, &format!("Sample listing {n}"))?;
    }

    sandbox
        .clock
        .advance(Duration::days(i64::from(args.advance_days)));
    let summary = sandbox.engine.run_expiry_sweep()?;
    print_json(&summary);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let sandbox = sandbox()?;
    println!(
        "Marketplace engine demo (package '{}': {} listings, {} days)",
        sandbox.starter.name, sandbox.starter.listing_limit, sandbox.starter.duration_days
    );

    println!("\n1. The last slot goes to the first approval");
    let seller = sandbox.seller("Quota Demo")?;
    sandbox.live(&seller, "Listing 1")?;
    sandbox.live(&seller, "Listing 2")?;
    let a = sandbox.live(&seller, "Listing A")?;
    report(&args, "approved A", &sandbox.engine.listing(&a)?);
    let b = sandbox.submitted(&seller, "Listing B")?;
    match sandbox
        .engine
        .decide(&b, &moderator(), Decision::Approved, None)
    {
        Ok(status) => println!("- B unexpectedly moved to {status}"),
        Err(err) => println!(
            "- approving B refused: {err} (remaining {})",
            err.remaining().unwrap_or_default()
        ),
    }
    println!(
        "- B is {} | listings used {:?}",
        sandbox.engine.listing(&b)?.workflow_status,
        sandbox.listings_used(&seller)?
    );

    println!("\n2. A lapsed subscription is swept once");
    let expiring = sandbox.seller("Expiry Demo")?;
    sandbox.live(&expiring, "Harbour loft")?;
    sandbox.live(&expiring, "Garden duplex")?;
    sandbox.clock.advance(Duration::days(
        i64::from(sandbox.starter.duration_days) + 1,
    ));
    let first = sandbox.engine.run_expiry_sweep()?;
    report(&args, "first sweep", &first);
    let second = sandbox.engine.run_expiry_sweep()?;
    println!("- second sweep empty: {}", second.is_empty());

    println!("\n3. Rejection and resubmission leave quota alone");
    let author = sandbox.seller("Rejection Demo")?;
    let c = sandbox.submitted(&author, "Listing C")?;
    let status = sandbox.engine.decide(
        &c,
        &moderator(),
        Decision::Rejected,
        Some("incomplete documents"),
    )?;
    println!("- C is {status}");
    sandbox
        .engine
        .edit_listing(&c, sample_content("Listing C with title deeds"))?;
    let status = sandbox.engine.submit_listing(&c)?;
    println!(
        "- C resubmitted as {status} | listings used {:?}",
        sandbox.listings_used(&author)?
    );
    report(&args, "decision log", &sandbox.engine.decisions_for(&c)?);

    Ok(())
}

fn report<T: Serialize + std::fmt::Debug>(args: &DemoArgs, label: &str, value: &T) {
    if args.json {
        println!("- {label}:");
        print_json(value);
    } else {
        println!("- {label}: {value:?}");
    }
}

fn print_json<T: Serialize + std::fmt::Debug>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => println!("{value:?}"),
    }
}
