//! Rate-limit aware client for the Discord REST API.
//!
//! All outbound HTTP calls go through [`DiscordHttpClient`] so that auth
//! headers, rate-limit back-off, and error handling live in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, warn};

use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://discord.com/api/v10/";
const USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Upper bound on a single rate-limit sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 5;

/// Page size for the reaction users endpoint (Discord's maximum).
const REACTION_PAGE: usize = 100;

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct RateLimiter {
    /// Route-key → bucket id mapping.
    route_buckets: HashMap<String, String>,
    /// Bucket id → state.
    buckets: HashMap<String, BucketState>,
    /// Global rate-limit: if set, no requests may be sent until this instant.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// How long to wait before sending on `route_key`, if at all.
    fn delay_for(&self, route_key: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until {
            if until > now {
                return Some(until - now);
            }
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;

        if state.remaining == 0 && state.resets_at > now {
            return Some(state.resets_at - now);
        }
        None
    }

    /// Update internal state from response headers.
    fn update(&mut self, route_key: &str, info: &RateLimitInfo, now: Instant) {
        let reset_in = info
            .reset_after
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1));

        if info.is_global {
            self.global_until = Some(now + reset_in);
        }

        if let Some(ref bucket) = info.bucket {
            self.route_buckets
                .insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: now + reset_in,
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after").and_then(|s| s.parse().ok()),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialisation error: {0}")]
    Serde(String),

    #[error("invalid request url: {0}")]
    Url(String),
}

impl HttpError {
    /// The resource is gone (deleted message, unknown member, ...).
    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpError::Api { status: 404, .. })
    }

    /// We lack access to the resource.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, HttpError::Api { status: 403, .. })
    }
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin, rate-limit aware HTTP client for the Discord REST API.
///
/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    token: String,
    base: String,
    client: reqwest::Client,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Client against another API root, e.g. a local server.
    /// `base` must end in `/`.
    pub fn with_base_url(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base: base.into(),
            client: reqwest::Client::new(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    /// Block until the limiter allows a request on `route_key`.
    async fn wait_for_budget(&self, route_key: &str) {
        let delay = self.limiter.lock().await.delay_for(route_key, Instant::now());
        if let Some(delay) = delay {
            let delay = delay.min(MAX_BACKOFF);
            debug!(
                route = route_key,
                delay_ms = delay.as_millis() as u64,
                "rate-limit pre-emptive backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn build_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("authorization", format!("Bot {}", self.token))
            .header("user-agent", USER_AGENT)
    }

    /// Record limiter state from the response headers and read the body.
    async fn finish(
        &self,
        route_key: &str,
        resp: reqwest::Response,
    ) -> Result<(StatusCode, RateLimitInfo, Vec<u8>), HttpError> {
        let status = resp.status();
        let info = parse_rate_limit_headers(resp.headers());
        self.limiter
            .lock()
            .await
            .update(route_key, &info, Instant::now());
        let bytes = resp.bytes().await?.to_vec();
        Ok((status, info, bytes))
    }

    // ------------------------------------------------------------------
    // Low-level: the single request method everything funnels through
    // ------------------------------------------------------------------

    /// Send a request to `url`.
    ///
    /// `route_key` is used for per-route rate-limit bucketing. It should be a
    /// template like `POST /channels/{channel_id}/messages`.
    ///
    /// Returns the raw response body on success.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        for attempt in 0..=MAX_RETRIES {
            self.wait_for_budget(route_key).await;

            let mut req = self.build_request(method.clone(), url.clone());
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req.send().await?;
            let (status, info, bytes) = self.finish(route_key, resp).await?;

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = info.reset_after.unwrap_or(1.0).min(MAX_BACKOFF.as_secs_f64());
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            return check_status(status, bytes, route_key);
        }

        Err(HttpError::Api {
            status: 429,
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`request`](Self::request) but deserialises the response body as
    /// JSON.
    pub async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, url, route_key, body).await?;
        decode(&bytes)
    }

    // ------------------------------------------------------------------
    // Channels & messages
    // ------------------------------------------------------------------

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel, HttpError> {
        let url = endpoint(&self.base, &["channels", channel_id])?;
        self.request_json(Method::GET, url, &format!("GET /channels/{}", channel_id), None)
            .await
    }

    pub async fn get_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Message, HttpError> {
        let url = endpoint(&self.base, &["channels", channel_id, "messages", message_id])?;
        let route_key = format!("GET /channels/{}/messages/{{id}}", channel_id);
        self.request_json(Method::GET, url, &route_key, None).await
    }

    /// The most recent `limit` (max 100) messages of a channel, newest first.
    pub async fn get_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<Message>, HttpError> {
        let mut url = endpoint(&self.base, &["channels", channel_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.min(100).to_string());
        let route_key = format!("GET /channels/{}/messages", channel_id);
        self.request_json(Method::GET, url, &route_key, None).await
    }

    /// Every user who reacted to a message with `emoji`, following pagination.
    pub async fn get_reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &Emoji,
    ) -> Result<Vec<User>, HttpError> {
        let emoji_key = emoji
            .route_key()
            .ok_or_else(|| HttpError::Url("emoji has neither id nor name".to_string()))?;
        let route_key = format!("GET /channels/{}/messages/{{id}}/reactions", channel_id);

        let mut users: Vec<User> = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut url = endpoint(
                &self.base,
                &["channels", channel_id, "messages", message_id, "reactions", &emoji_key],
            )?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &REACTION_PAGE.to_string());
                if let Some(ref a) = after {
                    query.append_pair("after", a);
                }
            }

            let page: Vec<User> = self.request_json(Method::GET, url, &route_key, None).await?;
            let full = page.len() == REACTION_PAGE;
            after = page.last().map(|u| u.id.clone());
            users.extend(page);

            if !full {
                break;
            }
        }
        Ok(users)
    }

    /// Send a message to a channel.
    pub async fn create_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let url = endpoint(&self.base, &["channels", channel_id, "messages"])?;
        let route_key = format!("POST /channels/{}/messages", channel_id);
        let body = to_value(msg)?;
        self.request_json(Method::POST, url, &route_key, Some(&body))
            .await
    }

    // ------------------------------------------------------------------
    // Guilds
    // ------------------------------------------------------------------

    pub async fn get_guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<GuildMember, HttpError> {
        let url = endpoint(&self.base, &["guilds", guild_id, "members", user_id])?;
        let route_key = format!("GET /guilds/{}/members/{{id}}", guild_id);
        self.request_json(Method::GET, url, &route_key, None).await
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Respond to an interaction (initial response).
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let url = endpoint(
            &self.base,
            &["interactions", interaction_id, interaction_token, "callback"],
        )?;
        let body = to_value(response)?;
        // 204 No Content on success, nothing to parse.
        self.request(Method::POST, url, "POST /interactions/callback", Some(&body))
            .await?;
        Ok(())
    }

    /// Respond to an interaction with a single file attached as `files[0]`.
    ///
    /// The response's `attachments` should reference id 0. Multipart bodies
    /// are not retried on 429.
    pub async fn create_interaction_response_with_file(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
        filename: &str,
        file: Vec<u8>,
    ) -> Result<(), HttpError> {
        let url = endpoint(
            &self.base,
            &["interactions", interaction_id, interaction_token, "callback"],
        )?;
        let route_key = "POST /interactions/callback";
        self.wait_for_budget(route_key).await;

        let payload = serde_json::to_string(response).map_err(|e| HttpError::Serde(e.to_string()))?;
        let form = Form::new()
            .part(
                "payload_json",
                Part::text(payload)
                    .mime_str("application/json")
                    .map_err(HttpError::Transport)?,
            )
            .part("files[0]", Part::bytes(file).file_name(filename.to_string()));

        let resp = self
            .build_request(Method::POST, url)
            .multipart(form)
            .send()
            .await?;
        let (status, _, bytes) = self.finish(route_key, resp).await?;
        check_status(status, bytes, route_key).map(|_| ())
    }

    /// Send a follow-up message for an interaction (e.g. after a deferral).
    pub async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let url = endpoint(&self.base, &["webhooks", application_id, interaction_token])?;
        let body = to_value(msg)?;
        self.request_json(Method::POST, url, "POST /webhooks/interaction", Some(&body))
            .await
    }

    // ------------------------------------------------------------------
    // Slash command registration
    // ------------------------------------------------------------------

    /// Register (or overwrite) guild-scoped application commands.
    pub async fn bulk_overwrite_guild_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let url = endpoint(
            &self.base,
            &["applications", application_id, "guilds", guild_id, "commands"],
        )?;
        let route_key = format!(
            "PUT /applications/{}/guilds/{}/commands",
            application_id, guild_id
        );
        let body = to_value(commands)?;
        self.request_json(Method::PUT, url, &route_key, Some(&body))
            .await
    }

    /// Register (or overwrite) global application commands.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let url = endpoint(&self.base, &["applications", application_id, "commands"])?;
        let route_key = format!("PUT /applications/{}/commands", application_id);
        let body = to_value(commands)?;
        self.request_json(Method::PUT, url, &route_key, Some(&body))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .field("base", &self.base)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build an API URL from path segments. Each segment is percent-encoded, so
/// unicode emoji and `name:id` pairs can be passed as-is.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, HttpError> {
    let mut url = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| HttpError::Url(format!("{} cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, HttpError> {
    serde_json::to_value(value).map_err(|e| HttpError::Serde(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(bytes).map_err(|e| {
        let raw = String::from_utf8_lossy(bytes);
        let cut = raw.char_indices().nth(200).map(|(i, _)| i).unwrap_or(raw.len());
        HttpError::Serde(format!("{}: {}", e, &raw[..cut]))
    })
}

fn check_status(status: StatusCode, bytes: Vec<u8>, route_key: &str) -> Result<Vec<u8>, HttpError> {
    if status.is_success() {
        return Ok(bytes);
    }
    Err(HttpError::Api {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&bytes).to_string(),
        route: route_key.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
