use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{
    AdminId, Decision, ListingContent, ListingId, ListingKind, PackageId, SellerId,
};
use super::engine::MarketplaceEngine;
use super::error::EngineError;
use super::repository::{MarketplaceRepository, NotificationPublisher};
use super::workflow::WorkflowStatus;

/// Router builder exposing the engine contract over HTTP.
pub fn marketplace_router<R, N>(engine: Arc<MarketplaceEngine<R, N>>) -> Router
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route("/api/v1/listings", post(create_handler::<R, N>))
        .route("/api/v1/listings/:listing_id", get(listing_handler::<R, N>))
        .route(
            "/api/v1/listings/:listing_id/submit",
            post(submit_handler::<R, N>),
        )
        .route(
            "/api/v1/listings/:listing_id/claim",
            post(claim_handler::<R, N>),
        )
        .route(
            "/api/v1/listings/:listing_id/decision",
            post(decision_handler::<R, N>),
        )
        .route(
            "/api/v1/sellers/:seller_id/quota",
            get(quota_handler::<R, N>),
        )
        .route(
            "/api/v1/sellers/:seller_id/subscriptions",
            post(purchase_handler::<R, N>),
        )
        .route("/api/v1/sweeps", post(sweep_handler::<R, N>))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateListingRequest {
    pub(crate) seller_id: SellerId,
    pub(crate) kind: ListingKind,
    pub(crate) content: ListingContent,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClaimRequest {
    pub(crate) admin_id: AdminId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub(crate) admin_id: AdminId,
    pub(crate) decision: Decision,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PurchaseRequest {
    pub(crate) package_id: PackageId,
}

#[derive(Debug, Serialize)]
struct StatusView<'a> {
    listing_id: &'a ListingId,
    workflow_status: WorkflowStatus,
}

pub(crate) async fn create_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Json(request): Json<CreateListingRequest>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match engine.create_listing(&request.seller_id, request.kind, request.content) {
        Ok(listing) => (StatusCode::CREATED, Json(listing)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn listing_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(listing_id): Path<String>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match engine.listing(&ListingId(listing_id)) {
        Ok(listing) => (StatusCode::OK, Json(listing)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn submit_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(listing_id): Path<String>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = ListingId(listing_id);
    match engine.submit_listing(&id) {
        Ok(workflow_status) => status_response(&id, workflow_status),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn claim_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(listing_id): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = ListingId(listing_id);
    match engine.claim_listing(&id, &request.admin_id) {
        Ok(workflow_status) => status_response(&id, workflow_status),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn decision_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(listing_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = ListingId(listing_id);
    match engine.decide(
        &id,
        &request.admin_id,
        request.decision,
        request.reason.as_deref(),
    ) {
        Ok(workflow_status) => status_response(&id, workflow_status),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn quota_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(seller_id): Path<String>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match engine.can_create_listing(&SellerId(seller_id)) {
        Ok(availability) => (StatusCode::OK, Json(availability)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn purchase_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
    Path(seller_id): Path<String>,
    Json(request): Json<PurchaseRequest>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match engine.purchase_with_carry_over(&SellerId(seller_id), &request.package_id) {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn sweep_handler<R, N>(
    State(engine): State<Arc<MarketplaceEngine<R, N>>>,
) -> Response
where
    R: MarketplaceRepository + 'static,
    N: NotificationPublisher + 'static,
{
    match engine.run_expiry_sweep() {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => err.into_response(),
    }
}

fn status_response(listing_id: &ListingId, workflow_status: WorkflowStatus) -> Response {
    let view = StatusView {
        listing_id,
        workflow_status,
    };
    (StatusCode::OK, Json(view)).into_response()
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::QuotaExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InvalidTransition { .. }
            | EngineError::AlreadyDecided(_)
            | EngineError::Contention(_) => StatusCode::CONFLICT,
            EngineError::SubscriptionNotFound(_)
            | EngineError::ListingNotFound(_)
            | EngineError::SellerNotFound(_)
            | EngineError::PackageNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::NoActiveSubscription(_)
            | EngineError::SellerDeactivated(_)
            | EngineError::PackageUnavailable(_)
            | EngineError::PackageNotApplicable { .. } => StatusCode::FORBIDDEN,
            EngineError::RejectionReasonRequired | EngineError::InvalidPackage(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::DateOutOfRange(_) | EngineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_fatal() {
            error!(error = %self, "storage failure while serving request");
        }

        let mut payload = json!({ "error": self.to_string() });
        match &self {
            EngineError::QuotaExhausted { kind, limit, used } => {
                payload["kind"] = json!(kind);
                payload["limit"] = json!(limit);
                payload["used"] = json!(used);
                payload["remaining"] = json!(limit.saturating_sub(*used));
            }
            EngineError::InvalidTransition { from, event } => {
                payload["current_status"] = json!(from);
                payload["event"] = json!(event.label());
            }
            EngineError::AlreadyDecided(existing) => {
                payload["existing_decision"] = json!(existing);
            }
            _ => {}
        }

        (status, Json(payload)).into_response()
    }
}
