//! HTTP surface: event ingestion and product lookup.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::product::{Product, ProductUpdate, StockPolicy};
use crate::queue::{EnqueueError, EventQueue};
use crate::store::ProductStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProductStore>,
    pub queue: Arc<EventQueue<Product>>,
    pub stock_policy: StockPolicy,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/products/:id", get(get_product))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response with a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<EnqueueError<Product>> for ApiError {
    fn from(err: EnqueueError<Product>) -> Self {
        let message = match err {
            EnqueueError::Full(_) => "queue full, try again later",
            EnqueueError::Closed(_) => "service is shutting down",
        };
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

// The body is decoded by hand so that every malformed payload is a 400,
// whatever part of it is wrong.
async fn post_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let update: ProductUpdate = serde_json::from_slice(&body).map_err(|err| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid payload: {err}"))
    })?;
    let product = update
        .into_product(state.stock_policy)
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

    let product_id = product.product_id.clone();
    state.queue.try_enqueue(product).map_err(|err| {
        debug!(%product_id, reason = %err, "rejected product update");
        ApiError::from(err)
    })?;

    Ok(StatusCode::ACCEPTED)
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "product not found"))
}
