use marketplace_engine::marketplace::{
    EngineError, ListingNotification, MarketplaceEngine, MarketplaceRepository,
    NotificationError, NotificationPublisher, Package, PackageDraft, SellerType,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stands in for the e-mail and push adapters until one is wired up.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifications;

impl NotificationPublisher for LoggingNotifications {
    fn publish(&self, notification: ListingNotification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            listing = %notification.listing_id,
            seller = %notification.seller_id,
            details = ?notification.details,
            "seller notification queued"
        );
        Ok(())
    }
}

pub(crate) fn default_catalog() -> Vec<PackageDraft> {
    vec![
        PackageDraft {
            name: "Starter".to_string(),
            price_cents: 0,
            duration_days: 30,
            listing_limit: 3,
            featured_limit: 0,
            applicable_to: None,
        },
        PackageDraft {
            name: "Broker Plus".to_string(),
            price_cents: 4_900,
            duration_days: 90,
            listing_limit: 15,
            featured_limit: 3,
            applicable_to: Some(SellerType::Broker),
        },
        PackageDraft {
            name: "Builder Pro".to_string(),
            price_cents: 19_900,
            duration_days: 180,
            listing_limit: 40,
            featured_limit: 8,
            applicable_to: Some(SellerType::Builder),
        },
    ]
}

pub(crate) fn seed_catalog<R, N>(
    engine: &MarketplaceEngine<R, N>,
) -> Result<Vec<Package>, EngineError>
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let packages = default_catalog()
        .into_iter()
        .map(|draft| engine.publish_package(draft))
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = packages.len(), "package catalog seeded");
    Ok(packages)
}
