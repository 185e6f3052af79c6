//! Inbound webhook endpoint for standalone deployments. Hosts that
//! already own webhook delivery call [`WebhookAggregator::handle`]
//! directly and skip this listener.

use crate::error::Result;
use crate::webhook::event::WebhookEvent;
use crate::webhook::WebhookAggregator;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

pub async fn run(listen: &str, aggregator: Arc<WebhookAggregator>) -> Result<()> {
    let app = Router::new()
        .route("/webhook", post(receive))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(aggregator);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("Webhook listener on http://{listen}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn receive(
    State(aggregator): State<Arc<WebhookAggregator>>,
    Json(event): Json<WebhookEvent>,
) -> StatusCode {
    aggregator.handle(event).await;
    StatusCode::NO_CONTENT
}
