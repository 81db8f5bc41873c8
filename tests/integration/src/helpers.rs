//! Test helpers for integration tests
//!
//! Provides utilities for spawning gateway instances on ephemeral ports,
//! making HTTP requests and driving WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use courier_cache::{InMemoryBus, InMemoryHub, MessageBus};
use courier_common::{AppError, EventType, GatewayConfig, UserId};
use courier_gateway::protocol::{ClientEventPayload, GatewayMessage, OpCode};
use courier_gateway::{serve, EventRouter, GatewayState};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a client waits for any single frame
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw client-side WebSocket stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server instance that manages lifecycle
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub router: Arc<EventRouter>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), AppError>>,
}

impl TestServer {
    /// Start a standalone gateway with the test configuration
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config(), Arc::new(InMemoryBus::standalone())).await
    }

    /// Start a gateway attached to a shared hub, as one of several instances
    pub async fn start_on_hub(hub: &Arc<InMemoryHub>) -> Result<Self> {
        Self::start_with(test_config(), Arc::new(hub.bus())).await
    }

    /// Start a gateway with custom config and bus
    pub async fn start_with(config: GatewayConfig, bus: Arc<dyn MessageBus>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let router = EventRouter::new(&config, bus);
        router.start();

        let state = GatewayState::new(Arc::clone(&router), config);
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, state, async move {
            let _ = stopped.await;
        }));

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            client,
            router,
            stop: Some(stop),
            handle,
        })
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Gateway URL for a pre-authenticated user
    pub fn ws_url(&self, user: &str) -> String {
        format!("ws://{}/gateway?user_id={user}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.post(&url).json(body).send().await?)
    }

    /// Open a socket without reading anything from it
    pub async fn connect_raw(&self, user: &str) -> Result<WsStream> {
        let (stream, _) = connect_async(self.ws_url(user)).await?;
        Ok(stream)
    }

    /// Open a session and consume its Hello frame
    pub async fn connect(&self, user: &str) -> Result<WsClient> {
        let mut stream = self.connect_raw(user).await?;
        let hello = next_message(&mut stream).await?;
        if hello.op != OpCode::Hello {
            bail!("expected Hello as first frame, got {hello}");
        }
        Ok(WsClient { stream, hello })
    }

    /// Wait until the user's presence is visible on the bus
    pub async fn wait_reachable(&self, user: &str) -> Result<()> {
        let user = UserId::new(user);
        for _ in 0..100 {
            if self.router.scaling().is_reachable(&user).await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("user {user} never became reachable")
    }

    /// Trigger graceful shutdown and wait for the server to exit
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.handle)
            .await
            .context("server did not stop in time")??;
        Ok(())
    }
}

/// Connected gateway client
pub struct WsClient {
    pub stream: WsStream,
    pub hello: GatewayMessage,
}

impl WsClient {
    /// Session id announced in Hello
    pub fn session_id(&self) -> String {
        self.hello
            .d
            .as_ref()
            .and_then(|d| d["sessionId"].as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Send an Event frame
    pub async fn send_event(&mut self, event_type: EventType, target: &str, payload: serde_json::Value) -> Result<()> {
        let frame = GatewayMessage::event(
            &event_type,
            &ClientEventPayload {
                target: UserId::new(target),
                payload,
            },
        );
        self.send_text(frame.to_json()?).await
    }

    /// Answer a liveness ping
    pub async fn send_pong(&mut self) -> Result<()> {
        self.send_text(GatewayMessage::pong().to_json()?).await
    }

    /// Send a raw text frame
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Next gateway frame
    pub async fn recv(&mut self) -> Result<GatewayMessage> {
        next_message(&mut self.stream).await
    }

    /// Skip frames until the server closes, returning the close code
    pub async fn recv_close(&mut self) -> Result<u16> {
        next_close(&mut self.stream).await
    }
}

/// Next text frame decoded as a gateway message
pub async fn next_message(stream: &mut WsStream) -> Result<GatewayMessage> {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, stream.next())
            .await
            .context("timed out waiting for a frame")?
            .context("stream ended")??;

        match frame {
            Message::Text(text) => return Ok(GatewayMessage::from_json(&text)?),
            Message::Close(frame) => {
                bail!("connection closed: {:?}", frame.map(|f| u16::from(f.code)));
            }
            _ => {}
        }
    }
}

/// Skip frames until a close frame arrives
pub async fn next_close(stream: &mut WsStream) -> Result<u16> {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, stream.next())
            .await
            .context("timed out waiting for close")?
            .context("stream ended without a close frame")??;

        if let Message::Close(frame) = frame {
            return frame
                .map(|f| u16::from(f.code))
                .context("close frame without a code");
        }
    }
}

/// Configuration with short timers suited to tests
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.port = 0;
    config.realtime.ping_interval_ms = 60_000;
    config.realtime.ping_timeout_ms = 60_000;
    config.realtime.shutdown_grace_ms = 500;
    config.metrics.window_size_ms = 1_000;
    config.metrics.snapshot_interval_ms = 100;
    config.metrics.max_snapshots = 10;
    config.scaling.publish_timeout_ms = 1_000;
    config
}

/// Assert response status and parse JSON body
pub async fn assert_json<T: DeserializeOwned>(response: Response, expected_status: StatusCode) -> Result<T> {
    let status = response.status();
    if status != expected_status {
        let body = response.text().await?;
        bail!("Expected status {expected_status}, got {status}. Body: {body}");
    }
    Ok(response.json().await?)
}

/// Assert response status without parsing body
pub async fn assert_status(response: Response, expected_status: StatusCode) -> Result<()> {
    let status = response.status();
    if status != expected_status {
        let body = response.text().await?;
        bail!("Expected status {expected_status}, got {status}. Body: {body}");
    }
    Ok(())
}
