//! A local stand-in for the Discord REST API, for handler tests.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::config::BotConfig;
use crate::http::DiscordHttpClient;
use crate::store::HostStore;

pub const HOST_ROLE: &str = "200";

/// Serve `router` on an ephemeral port and return the API base URL.
pub async fn serve_api(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}/api/v10/", addr)
}

/// Routes answering interaction callbacks with 204. Each callback body is
/// forwarded as `(interaction_id, body)`.
pub fn callback_routes() -> (Router, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new()
        .route(
            "/api/v10/interactions/:id/:token/callback",
            post(record_callback),
        )
        .with_state(tx);
    (router, rx)
}

async fn record_callback(
    State(tx): State<mpsc::UnboundedSender<(String, serde_json::Value)>>,
    UrlPath((id, _token)): UrlPath<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let _ = tx.send((id, body));
    StatusCode::NO_CONTENT
}

/// Bot with its data file under `dir`, talking to the API at `api`.
pub fn bot(dir: &Path, api: &str) -> Arc<Bot> {
    let config = BotConfig::from_lookup(|key| match key {
        "DISCORD_TOKEN" => Some("token".to_string()),
        "HOST_ROLE_ID" => Some(HOST_ROLE.to_string()),
        "DATA_FILE" => Some(dir.join("data.json").display().to_string()),
        _ => None,
    })
    .unwrap();
    let store = HostStore::load(&config.data_file).unwrap();
    Bot::with_http(config, store, DiscordHttpClient::with_base_url("token", api))
}
