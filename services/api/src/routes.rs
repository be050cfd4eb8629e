use crate::infra::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use marketplace_engine::error::AppError;
use marketplace_engine::marketplace::{
    marketplace_router, MarketplaceEngine, MarketplaceRepository, NotificationPublisher,
    Package, PackageDraft, SellerAccount, SellerType,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterSellerRequest {
    pub(crate) display_name: String,
    pub(crate) seller_type: SellerType,
}

pub(crate) fn with_marketplace_routes<R, N>(engine: Arc<MarketplaceEngine<R, N>>) -> Router
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let admin = Router::new()
        .route("/api/v1/sellers", post(register_seller_endpoint::<R, N>))
        .route("/api/v1/packages", post(publish_package_endpoint::<R, N>))
        .with_state(engine.clone());

    marketplace_router(engine)
        .merge(admin)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn register_seller_endpoint<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Json(payload): Json<RegisterSellerRequest>,
) -> Result<(StatusCode, Json<SellerAccount>), AppError>
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let seller = engine.register_seller(&payload.display_name, payload.seller_type)?;
    Ok((StatusCode::CREATED, Json(seller)))
}

pub(crate) async fn publish_package_endpoint<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Json(draft): Json<PackageDraft>,
) -> Result<(StatusCode, Json<Package>), AppError>
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let package = engine.publish_package(draft)?;
    Ok((StatusCode::CREATED, Json(package)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{seed_catalog, LoggingNotifications};
    use axum::body::Body;
    use axum::http::Request;
    use marketplace_engine::config::EngineConfig;
    use marketplace_engine::marketplace::InMemoryMarketplace;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    type Engine = MarketplaceEngine<InMemoryMarketplace, LoggingNotifications>;

    fn engine() -> Arc<Engine> {
        Arc::new(MarketplaceEngine::new(
            Arc::new(InMemoryMarketplace::default()),
            Arc::new(LoggingNotifications),
            EngineConfig::default(),
        ))
    }

    fn app_state(ready: bool) -> AppState {
        AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        }
    }

    async fn post_json(router: &Router, uri: &str, payload: Value) -> axum::response::Response {
        router
            .clone()
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 16 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    #[tokio::test]
    async fn readiness_reflects_startup_state() {
        let response = readiness_endpoint(Extension(app_state(false)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = readiness_endpoint(Extension(app_state(true)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_route_is_mounted_next_to_engine_routes() {
        let router = with_marketplace_routes(engine());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn seller_can_register_and_buy_a_seeded_package() {
        let engine = engine();
        let catalog = seed_catalog(engine.as_ref()).expect("catalog seeded");
        let starter = catalog
            .iter()
            .find(|package| package.name == "Starter")
            .expect("starter package");
        let router = with_marketplace_routes(engine);

        let response = post_json(
            &router,
            "/api/v1/sellers",
            json!({ "display_name": "Lakeside Homes", "seller_type": "individual" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let seller = json_body(response).await;
        let seller_id = seller["id"].as_str().expect("seller id").to_string();
        assert_eq!(seller["verification_status"], "pending");

        let response = post_json(
            &router,
            &format!("/api/v1/sellers/{seller_id}/subscriptions"),
            json!({ "package_id": starter.id }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let outcome = json_body(response).await;
        assert_eq!(outcome["subscription"]["listing_limit"], 3);
    }

    #[tokio::test]
    async fn restricted_package_is_refused_for_other_seller_types() {
        let engine = engine();
        let catalog = seed_catalog(engine.as_ref()).expect("catalog seeded");
        let builder_only = catalog
            .iter()
            .find(|package| package.applicable_to == Some(SellerType::Builder))
            .expect("builder package");
        let router = with_marketplace_routes(engine);

        let response = post_json(
            &router,
            "/api/v1/sellers",
            json!({ "display_name": "Solo Owner", "seller_type": "individual" }),
        )
        .await;
        let seller_id = json_body(response).await["id"]
            .as_str()
            .expect("seller id")
            .to_string();

        let response = post_json(
            &router,
            &format!("/api/v1/sellers/{seller_id}/subscriptions"),
            json!({ "package_id": builder_only.id }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_can_publish_a_package() {
        let router = with_marketplace_routes(engine());
        let response = post_json(
            &router,
            "/api/v1/packages",
            json!({
                "name": "Weekend Special",
                "price_cents": 1500,
                "duration_days": 7,
                "listing_limit": 2,
                "featured_limit": 1
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let package = json_body(response).await;
        assert_eq!(package["is_active"], true);
        assert!(package["applicable_to"].is_null());
    }

    #[tokio::test]
    async fn package_with_absurd_duration_is_a_bad_request() {
        let router = with_marketplace_routes(engine());
        let response = post_json(
            &router,
            "/api/v1/packages",
            json!({
                "name": "Forever",
                "price_cents": 100,
                "duration_days": u32::MAX,
                "listing_limit": 2,
                "featured_limit": 0
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = json_body(response).await;
        assert!(payload["error"]
            .as_str()
            .expect("error message")
            .contains("duration"));
    }
}
