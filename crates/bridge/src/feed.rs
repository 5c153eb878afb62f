//! Upbit WebSocket feed.
//!
//! The feed owns the socket and its connection state. It does not reconnect on
//! its own: `receive` reports `StreamClosed` or `Stale` and the runner decides
//! when to dial again through the backoff policy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::FeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Stale,
}

#[async_trait]
pub trait FeedSource: Send {
    /// Dial and subscribe. A single attempt; retry policy lives with the caller.
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Next raw frame. Returns `Stale` when the staleness window elapses with
    /// no activity and `StreamClosed` when the transport drops; both tear the
    /// socket down.
    async fn receive(&mut self) -> Result<Bytes, FeedError>;

    async fn close(&mut self);

    fn state(&self) -> ConnectionState;
}

/// Upbit subscription frame: `[{"ticket": ...}, {"type": "ticker", "codes": [...]}]`.
pub fn subscription_frame(ticket: &str, codes: &[String]) -> String {
    serde_json::json!([
        {"ticket": ticket},
        {"type": "ticker", "codes": codes},
    ])
    .to_string()
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct UpbitFeed {
    url: String,
    ticket: String,
    codes: Vec<String>,
    stale_after: Duration,
    state: ConnectionState,
    socket: Option<WsStream>,
    last_activity: Instant,
}

impl UpbitFeed {
    pub fn new(
        url: impl Into<String>,
        ticket: impl Into<String>,
        codes: Vec<String>,
        stale_after: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            ticket: ticket.into(),
            codes,
            stale_after,
            state: ConnectionState::Disconnected,
            socket: None,
            last_activity: Instant::now(),
        }
    }

    fn teardown(&mut self, state: ConnectionState) {
        self.socket = None;
        self.state = state;
    }
}

#[async_trait]
impl FeedSource for UpbitFeed {
    async fn connect(&mut self) -> Result<(), FeedError> {
        self.state = ConnectionState::Connecting;

        Url::parse(&self.url).map_err(|e| {
            self.state = ConnectionState::Disconnected;
            FeedError::ConnectionFailed(e.to_string())
        })?;

        let (mut socket, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            self.state = ConnectionState::Disconnected;
            FeedError::ConnectionFailed(e.to_string())
        })?;

        // Upbit sends no subscribe ack; a flushed subscription frame is the
        // transition to Subscribed.
        let frame = subscription_frame(&self.ticket, &self.codes);
        socket.send(WsMessage::Text(frame)).await.map_err(|e| {
            self.state = ConnectionState::Disconnected;
            FeedError::SubscribeFailed(e.to_string())
        })?;

        debug!(url = %self.url, codes = ?self.codes, "subscribed to ticker stream");
        self.socket = Some(socket);
        self.last_activity = Instant::now();
        self.state = ConnectionState::Subscribed;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, FeedError> {
        loop {
            let socket = match self.socket.as_mut() {
                Some(socket) => socket,
                None => return Err(FeedError::StreamClosed("not connected".into())),
            };

            // Staleness budget is measured from the last frame of any kind,
            // so a cancelled receive does not restart the clock.
            let remaining = match self.stale_after.checked_sub(self.last_activity.elapsed()) {
                Some(remaining) => remaining,
                None => {
                    self.teardown(ConnectionState::Stale);
                    return Err(FeedError::Stale {
                        idle_secs: self.stale_after.as_secs(),
                    });
                }
            };

            let msg = match tokio::time::timeout(remaining, socket.next()).await {
                Err(_) => {
                    self.teardown(ConnectionState::Stale);
                    return Err(FeedError::Stale {
                        idle_secs: self.stale_after.as_secs(),
                    });
                }
                Ok(None) => {
                    self.teardown(ConnectionState::Disconnected);
                    return Err(FeedError::StreamClosed("stream ended".into()));
                }
                Ok(Some(Err(e))) => {
                    self.teardown(ConnectionState::Disconnected);
                    return Err(FeedError::StreamClosed(e.to_string()));
                }
                Ok(Some(Ok(msg))) => msg,
            };

            self.last_activity = Instant::now();
            match msg {
                WsMessage::Text(text) => return Ok(Bytes::from(text.into_bytes())),
                WsMessage::Binary(data) => return Ok(Bytes::from(data)),
                WsMessage::Ping(payload) => {
                    if let Err(e) = socket.send(WsMessage::Pong(payload)).await {
                        warn!(error = %e, "failed to answer ping");
                    }
                }
                WsMessage::Pong(_) => {}
                WsMessage::Close(_) => {
                    self.teardown(ConnectionState::Disconnected);
                    return Err(FeedError::StreamClosed("close frame received".into()));
                }
                WsMessage::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Scripted feed event for [`ScriptedFeed`].
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Frame(Bytes),
    Disconnect,
}

/// Replays a fixed sequence of frames and disconnects. Used by runner tests
/// and demos in place of a live exchange.
pub struct ScriptedFeed {
    events: VecDeque<ScriptedEvent>,
    /// Connect attempts that fail before one succeeds.
    connect_failures: u32,
    state: ConnectionState,
}

impl ScriptedFeed {
    pub fn new(events: Vec<ScriptedEvent>) -> Self {
        Self {
            events: events.into(),
            connect_failures: 0,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn failing_connects(mut self, failures: u32) -> Self {
        self.connect_failures = failures;
        self
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn connect(&mut self) -> Result<(), FeedError> {
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            self.state = ConnectionState::Disconnected;
            return Err(FeedError::ConnectionFailed("scripted refusal".into()));
        }
        self.state = ConnectionState::Subscribed;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, FeedError> {
        if self.state != ConnectionState::Subscribed {
            return Err(FeedError::StreamClosed("not connected".into()));
        }
        match self.events.pop_front() {
            Some(ScriptedEvent::Frame(bytes)) => Ok(bytes),
            Some(ScriptedEvent::Disconnect) => {
                self.state = ConnectionState::Disconnected;
                Err(FeedError::StreamClosed("scripted disconnect".into()))
            }
            // Script exhausted: stay quiet until the caller shuts down.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_frame_shape() {
        let codes = vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()];
        let frame = subscription_frame("tick-stream", &codes);
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value[0]["ticket"], "tick-stream");
        assert_eq!(value[1]["type"], "ticker");
        assert_eq!(value[1]["codes"][0], "KRW-BTC");
        assert_eq!(value[1]["codes"][1], "KRW-ETH");
    }

    #[test]
    fn test_feed_starts_disconnected() {
        let feed = UpbitFeed::new(
            "wss://api.upbit.com/websocket/v1",
            "tick-stream",
            vec!["KRW-BTC".to_string()],
            Duration::from_secs(60),
        );
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_receive_before_connect_is_closed() {
        let mut feed = UpbitFeed::new(
            "wss://api.upbit.com/websocket/v1",
            "tick-stream",
            vec!["KRW-BTC".to_string()],
            Duration::from_secs(60),
        );
        assert!(matches!(
            feed.receive().await,
            Err(FeedError::StreamClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let mut feed = UpbitFeed::new(
            "not a url",
            "tick-stream",
            vec!["KRW-BTC".to_string()],
            Duration::from_secs(60),
        );
        assert!(matches!(
            feed.connect().await,
            Err(FeedError::ConnectionFailed(_))
        ));
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_quiet_stream_goes_stale() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept one client, swallow its subscription frame, then go quiet
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut feed = UpbitFeed::new(
            format!("ws://{}", addr),
            "tick-stream",
            vec!["KRW-BTC".to_string()],
            Duration::from_millis(50),
        );
        feed.connect().await.unwrap();
        assert_eq!(feed.state(), ConnectionState::Subscribed);

        let err = feed.receive().await.unwrap_err();
        assert!(matches!(err, FeedError::Stale { .. }));
        assert_eq!(feed.state(), ConnectionState::Stale);
        // Socket is torn down, not just flagged
        assert!(matches!(
            feed.receive().await,
            Err(FeedError::StreamClosed(_))
        ));
        server.abort();
    }

    #[tokio::test]
    async fn test_frame_activity_defers_staleness() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _subscription = ws.next().await;
            ws.send(WsMessage::Text("{\"type\":\"ticker\"}".to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut feed = UpbitFeed::new(
            format!("ws://{}", addr),
            "tick-stream",
            vec!["KRW-BTC".to_string()],
            Duration::from_millis(80),
        );
        feed.connect().await.unwrap();

        // The delivered frame counts as activity and arrives well inside the window
        let frame = feed.receive().await.unwrap();
        assert_eq!(frame, Bytes::from_static(b"{\"type\":\"ticker\"}"));
        assert_eq!(feed.state(), ConnectionState::Subscribed);

        // Silence after it still trips the watchdog
        let err = feed.receive().await.unwrap_err();
        assert!(matches!(err, FeedError::Stale { .. }));
        assert_eq!(feed.state(), ConnectionState::Stale);
        server.abort();
    }

    #[tokio::test]
    async fn test_scripted_feed_replays_then_disconnects() {
        let mut feed = ScriptedFeed::new(vec![
            ScriptedEvent::Frame(Bytes::from_static(b"one")),
            ScriptedEvent::Disconnect,
        ]);
        feed.connect().await.unwrap();
        assert_eq!(feed.receive().await.unwrap(), Bytes::from_static(b"one"));
        assert!(matches!(
            feed.receive().await,
            Err(FeedError::StreamClosed(_))
        ));
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }
}
