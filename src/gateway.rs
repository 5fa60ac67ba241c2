//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task with zombie-connection detection
//!   - sequence number + session_id tracking
//!   - automatic reconnect with exponential backoff
//!
//! The rest of the codebase consumes a stream of [`GatewayEvent`] values
//! without ever touching `tokio_tungstenite` directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::GatewayPayload;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

bitflags! {
    /// Gateway intents bitmask sent with IDENTIFY.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

// ---------------------------------------------------------------------------
// Errors & configuration
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out waiting for HELLO")]
    HelloTimeout,

    #[error("unexpected handshake payload: {0}")]
    Handshake(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gateway closed the connection with fatal code {0}")]
    Fatal(u16),

    #[error("gave up after {attempts} reconnect attempts")]
    GaveUp { attempts: u32 },

    #[error("gateway driver task failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
}

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    /// Initial connection URL; resumes use the URL from READY.
    pub url: String,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsConn, WsMessage>;
type WsStream = SplitStream<WsConn>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Receiver side of a running gateway connection.
pub struct GatewayHandle {
    /// Typed events, in arrival order.
    pub events: mpsc::Receiver<GatewayEvent>,
    /// The background driver. Resolves to an error on a fatal close code or
    /// when reconnecting is given up.
    pub driver: tokio::task::JoinHandle<Result<(), GatewayError>>,
}

/// Spawn the gateway driver and return its event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, events) = mpsc::channel::<GatewayEvent>(256);
    let driver = tokio::spawn(gateway_driver(config, event_tx));
    GatewayHandle { events, driver }
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal(u16),
    EventChannelClosed,
}

async fn gateway_driver(
    config: GatewayConfig,
    event_tx: mpsc::Sender<GatewayEvent>,
) -> Result<(), GatewayError> {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut attempts: u32 = 0;

    loop {
        let reason = match run_session(&config, &session, &event_tx).await {
            Ok(reason) => {
                attempts = 0;
                reason
            }
            Err(e) => {
                warn!(error = %e, "gateway session failed");
                DisconnectReason::ShouldResume
            }
        };

        match reason {
            DisconnectReason::ShouldResume => info!("will attempt RESUME"),
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
            }
            DisconnectReason::Fatal(code) => {
                error!(close_code = code, "fatal close code, shutting down gateway");
                return Err(GatewayError::Fatal(code));
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return Ok(());
            }
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return Err(GatewayError::GaveUp {
                attempts: MAX_RECONNECT_ATTEMPTS,
            });
        }
        let backoff = backoff_delay(attempts);
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// One connection: handshake, heartbeat, read until disconnect.
async fn run_session(
    config: &GatewayConfig,
    session: &Arc<Mutex<SessionState>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> Result<DisconnectReason, GatewayError> {
    let url = gateway_url(&config.url, session.lock().await.resume_gateway_url.as_deref());
    info!(url = %url, "connecting to Discord gateway");

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (write, mut read) = ws.split();
    let write = Arc::new(Mutex::new(write));

    let heartbeat_interval = read_hello(&mut read).await?;
    info!(interval_ms = heartbeat_interval, "received HELLO");

    let handshake = {
        let s = session.lock().await;
        match (&s.session_id, s.sequence) {
            (Some(session_id), Some(seq)) => json!({
                "op": 6,
                "d": { "token": config.token, "session_id": session_id, "seq": seq }
            }),
            _ => json!({
                "op": 2,
                "d": {
                    "token": config.token,
                    "properties": {
                        "os": std::env::consts::OS,
                        "browser": env!("CARGO_PKG_NAME"),
                        "device": env!("CARGO_PKG_NAME"),
                    },
                    "intents": config.intents.bits(),
                }
            }),
        }
    };
    send_payload(&write, &handshake).await?;
    info!(op = ?handshake["op"], "sent handshake");

    // Heartbeat task: flags a zombie connection if an ACK never arrives.
    let acked = Arc::new(AtomicBool::new(true));
    let (zombie_tx, mut zombie_rx) = mpsc::channel::<()>(1);
    let heartbeat = tokio::spawn(heartbeat_loop(
        Arc::clone(&write),
        Arc::clone(session),
        Arc::clone(&acked),
        zombie_tx,
        heartbeat_interval,
    ));

    let reason = tokio::select! {
        reason = read_loop(&mut read, &write, session, &acked, event_tx) => reason,
        _ = zombie_rx.recv() => {
            warn!("no heartbeat ACK received, treating connection as zombie");
            DisconnectReason::ShouldResume
        }
    };

    heartbeat.abort();
    let _ = write.lock().await.send(WsMessage::Close(None)).await;
    Ok(reason)
}

async fn heartbeat_loop(
    write: Arc<Mutex<WsSink>>,
    session: Arc<Mutex<SessionState>>,
    acked: Arc<AtomicBool>,
    zombie_tx: mpsc::Sender<()>,
    interval_ms: u64,
) {
    // Discord asks for the first heartbeat after `interval * jitter`.
    let jitter = rand::random::<f64>();
    tokio::time::sleep(Duration::from_millis((interval_ms as f64 * jitter) as u64)).await;

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        interval.tick().await;

        if !acked.swap(false, Ordering::AcqRel) {
            let _ = zombie_tx.send(()).await;
            return;
        }

        let seq = session.lock().await.sequence;
        if let Err(e) = send_payload(&write, &json!({ "op": 1, "d": seq })).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    read: &mut WsStream,
    write: &Arc<Mutex<WsSink>>,
    session: &Arc<Mutex<SessionState>>,
    acked: &AtomicBool,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> DisconnectReason {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return close_code_reason(code);
            }
            // Ping/Pong/Binary: ignored.
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::ShouldResume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };

        if let Some(s) = payload.s {
            session.lock().await.sequence = Some(s);
        }

        let event = GatewayEvent::from_payload(payload);

        // Session plumbing stays in this module.
        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
            }
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = send_payload(write, &json!({ "op": 1, "d": seq })).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                acked.store(true, Ordering::Release);
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect (op 7)");
                return DisconnectReason::ShouldResume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated (op 9)");
                // Discord asks clients to wait 1-5 seconds before retrying.
                tokio::time::sleep(Duration::from_secs(2)).await;
                return if *resumable {
                    DisconnectReason::ShouldResume
                } else {
                    DisconnectReason::ShouldReidentify
                };
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            return DisconnectReason::EventChannelClosed;
        }
    }

    info!("WebSocket stream ended");
    DisconnectReason::ShouldResume
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a close code to what the driver should do next.
fn close_code_reason(code: Option<u16>) -> DisconnectReason {
    match code {
        // Authentication failed, invalid shard, sharding required, invalid
        // API version, invalid intents, disallowed intents.
        Some(c @ (4004 | 4010 | 4011 | 4012 | 4013 | 4014)) => DisconnectReason::Fatal(c),
        // Invalid seq or session timed out.
        Some(4007 | 4009) => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

/// Resume URLs come without query parameters; add them if missing.
fn gateway_url(initial: &str, resume_url: Option<&str>) -> String {
    match resume_url {
        None => initial.to_string(),
        Some(url) if url.contains("v=10") => url.to_string(),
        Some(url) if url.contains('?') => format!("{}&v=10&encoding=json", url),
        Some(url) => format!("{}/?v=10&encoding=json", url.trim_end_matches('/')),
    }
}

async fn read_hello(stream: &mut WsStream) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or_else(|| GatewayError::Handshake("stream ended before HELLO".to_string()))??;

    let WsMessage::Text(text) = msg else {
        return Err(GatewayError::Handshake(format!("expected text HELLO, got {:?}", msg)));
    };

    let payload: GatewayPayload = serde_json::from_str(&text)?;
    if payload.op != 10 {
        return Err(GatewayError::Handshake(format!(
            "expected op 10 (HELLO), got op {}",
            payload.op
        )));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GatewayError::Handshake("HELLO missing heartbeat_interval".to_string()))
}

async fn send_payload(
    write: &Arc<Mutex<WsSink>>,
    payload: &serde_json::Value,
) -> Result<(), GatewayError> {
    let text = serde_json::to_string(payload)?;
    write.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_reactions_and_members() {
        let intents = Intents::GUILDS
            | Intents::GUILD_MEMBERS
            | Intents::GUILD_MESSAGES
            | Intents::GUILD_MESSAGE_REACTIONS
            | Intents::MESSAGE_CONTENT;
        assert_eq!(intents.bits(), 1 | 2 | 512 | 1024 | 32768);
    }

    #[test]
    fn backoff_stays_within_bounds() {
        for attempt in 1..=20 {
            let d = backoff_delay(attempt);
            assert!(d >= Duration::from_millis(1500), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_secs(60), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn fatal_close_codes_stop_the_driver() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert!(matches!(
                close_code_reason(Some(code)),
                DisconnectReason::Fatal(c) if c == code
            ));
        }
    }

    #[test]
    fn session_close_codes_reidentify() {
        assert!(matches!(
            close_code_reason(Some(4009)),
            DisconnectReason::ShouldReidentify
        ));
        assert!(matches!(
            close_code_reason(Some(1000)),
            DisconnectReason::ShouldResume
        ));
        assert!(matches!(close_code_reason(None), DisconnectReason::ShouldResume));
    }

    #[test]
    fn resume_url_gets_query_params() {
        assert_eq!(gateway_url(DEFAULT_GATEWAY_URL, None), DEFAULT_GATEWAY_URL);
        assert_eq!(
            gateway_url(DEFAULT_GATEWAY_URL, Some("wss://gateway-us-east1-b.discord.gg")),
            "wss://gateway-us-east1-b.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_url(DEFAULT_GATEWAY_URL, Some("wss://x.discord.gg/?v=10&encoding=json")),
            "wss://x.discord.gg/?v=10&encoding=json"
        );
    }

    // -- gateway_driver() --------------------------------------------------

    /// Accept one connection, say HELLO, wait for IDENTIFY, then close with
    /// `code`.
    async fn closing_server(code: u16) -> String {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let hello = json!({ "op": 10, "d": { "heartbeat_interval": 45000 } });
            ws.send(WsMessage::Text(hello.to_string())).await.unwrap();

            // A heartbeat may arrive first.
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                let payload: serde_json::Value =
                    serde_json::from_str(msg.to_text().unwrap()).unwrap();
                if payload["op"] == 2 {
                    break;
                }
            }

            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "closing".into(),
            };
            ws.send(WsMessage::Close(Some(frame))).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{}/?v=10&encoding=json", addr)
    }

    #[tokio::test]
    async fn authentication_failure_ends_driver_with_error() {
        let mut config = GatewayConfig::new("bad-token", Intents::GUILDS);
        config.url = closing_server(4004).await;

        let handle = connect(config);
        let result = tokio::time::timeout(Duration::from_secs(10), handle.driver)
            .await
            .expect("driver should stop on a fatal close")
            .unwrap();
        assert!(matches!(result, Err(GatewayError::Fatal(4004))));
        drop(handle.events);
    }
}
