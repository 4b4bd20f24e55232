/// WebSocket client for the upstream whale feed
///
/// Provides automatic reconnection, heartbeat, and event parsing into
/// engine domain events.
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use whalewatch_engine::{DomainEvent, EngineError};

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Feed server URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Maximum channel buffer size for events
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            channel_buffer_size: 1000,
        }
    }
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Feed client handing parsed events and status updates to the UI task.
pub struct FeedClient {
    config: FeedConfig,
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Start the connection loop.
    ///
    /// Returns a receiver for domain events and a receiver for connection
    /// status updates.
    pub fn start(
        self,
    ) -> (
        mpsc::Receiver<DomainEvent>,
        mpsc::Receiver<ConnectionStatus>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size);
        let (status_tx, status_rx) = mpsc::channel(10);

        tokio::spawn(async move {
            run_feed_loop(self.config, event_tx, status_tx).await;
        });

        (event_rx, status_rx)
    }
}

/// Main connection loop with auto-reconnect
async fn run_feed_loop(
    config: FeedConfig,
    event_tx: mpsc::Sender<DomainEvent>,
    status_tx: mpsc::Sender<ConnectionStatus>,
) {
    info!("Starting feed client for {}", config.url);

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting).await;

        match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!("Connected to feed at {}", config.url);
                let _ = status_tx.send(ConnectionStatus::Connected).await;

                let (mut write, mut read) = ws_stream.split();

                // Ping task keeps the connection alive between bursts.
                let ping_interval = config.ping_interval;
                let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);

                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(ping_interval);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if write.send(Message::Ping(vec![].into())).await.is_err() {
                                    debug!("Failed to send ping, connection likely dead");
                                    break;
                                }
                            }
                            _ = ping_shutdown_rx.recv() => {
                                debug!("Ping task shutting down");
                                break;
                            }
                        }
                    }
                });

                let mut should_break = false;
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match DomainEvent::from_json(&text) {
                            Ok(event) => {
                                if event_tx.send(event).await.is_err() {
                                    warn!("Event receiver dropped, stopping client");
                                    should_break = true;
                                    break;
                                }
                            }
                            // Welcome/heartbeat frames carry kinds the
                            // engine does not consume; drop them quietly.
                            Err(EngineError::UnknownKind(kind)) => {
                                debug!("Ignoring message of kind '{kind}'");
                            }
                            Err(e) => {
                                error!("Failed to parse message: {e}");
                                debug!("Raw message: {text}");
                            }
                        },
                        Ok(Message::Close(_)) => {
                            info!("Server closed connection");
                            should_break = true;
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            // Heartbeat messages - tungstenite handles these automatically
                        }
                        Err(e) => {
                            error!("WebSocket error: {e}");
                            should_break = true;
                            break;
                        }
                        _ => {}
                    }
                }

                let _ = ping_shutdown_tx.send(()).await;
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;

                if should_break {
                    warn!("Connection closed, will reconnect...");
                }
            }
            Err(e) => {
                error!("Failed to connect to {}: {e}", config.url);
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
            }
        }

        debug!(
            "Waiting {:?} before reconnecting...",
            config.reconnect_delay
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}
