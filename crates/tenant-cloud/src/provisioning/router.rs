use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::domain::{SubscriptionId, SubscriptionRequest};
use super::repository::{SubscriptionRepository, TaskScheduler};
use super::service::{ProvisioningError, ProvisioningService};

/// Router builder exposing the subscription lifecycle endpoints.
pub fn provisioning_router<R, S>(service: Arc<ProvisioningService<R, S>>) -> Router
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    Router::new()
        .route("/api/v1/subscriptions", post(create_handler::<R, S>))
        .route(
            "/api/v1/subscriptions/:subscription_id",
            get(status_handler::<R, S>),
        )
        .route(
            "/api/v1/subscriptions/:subscription_id/provision",
            post(provision_handler::<R, S>),
        )
        .with_state(service)
}

pub(crate) async fn create_handler<R, S>(
    State(service): State<Arc<ProvisioningService<R, S>>>,
    axum::Json(request): axum::Json<SubscriptionRequest>,
) -> Response
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    match service.create(request) {
        Ok(subscription) => {
            (StatusCode::CREATED, axum::Json(subscription.status_view())).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn provision_handler<R, S>(
    State(service): State<Arc<ProvisioningService<R, S>>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    let id = SubscriptionId(subscription_id);
    match service.trigger(&id) {
        Ok(()) => {
            let payload = json!({
                "subscription_id": id.0,
                "status": "provisioning",
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<R, S>(
    State(service): State<Arc<ProvisioningService<R, S>>>,
    Path(subscription_id): Path<String>,
) -> Response
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    let id = SubscriptionId(subscription_id);
    match service.view(&id) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ProvisioningError) -> Response {
    let status = match &err {
        ProvisioningError::AlreadyInProgress | ProvisioningError::AlreadyProvisioned => {
            StatusCode::CONFLICT
        }
        ProvisioningError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
