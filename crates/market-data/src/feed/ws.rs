//! JSON WebSocket feed connector
//!
//! Subscriptions go out as
//! `{"action":"subscribe","mode":"ticker","instruments":[{"segment":..,"security_id":..}]}`
//! in batches of at most [`MAX_INSTRUMENTS_PER_MESSAGE`]. Inbound text frames
//! carry one tick object or an array of them.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

use common::InstrumentKey;

use super::client::{FeedClient, FeedConnection, FeedConnector, FeedCredentials, FeedMode};
use crate::tick::RawTick;
use crate::{FeedError, FeedResult};

/// Upstream cap on instruments per subscription message
pub const MAX_INSTRUMENTS_PER_MESSAGE: usize = 100;

const TICK_CHANNEL_CAPACITY: usize = 4096;
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize)]
struct InstrumentRef<'a> {
    segment: &'a str,
    security_id: &'a str,
}

#[derive(Debug, Serialize)]
struct SubscriptionMessage<'a> {
    action: &'static str,
    mode: &'static str,
    instruments: Vec<InstrumentRef<'a>>,
}

/// Connects to a JSON tick WebSocket
#[derive(Debug, Clone)]
pub struct WsFeedConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsFeedConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &config::FeedConfig) -> Self {
        Self::new(config.url.clone(), config.connect_timeout())
    }

    fn endpoint(&self, credentials: &FeedCredentials) -> FeedResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| FeedError::Connection(format!("invalid feed url {}: {}", self.url, e)))?;
        url.query_pairs_mut()
            .append_pair("clientId", &credentials.client_id)
            .append_pair("token", &credentials.access_token);
        Ok(url)
    }
}

#[async_trait]
impl FeedConnector for WsFeedConnector {
    async fn connect(&self, mode: FeedMode, credentials: &FeedCredentials) -> FeedResult<FeedConnection> {
        let url = self.endpoint(credentials)?;
        info!(host = url.host_str().unwrap_or_default(), %mode, "Connecting to feed");

        let (stream, _) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| FeedError::Connection("connect timed out".to_string()))??;
        let (mut write, mut read) = stream.split();

        let connected = Arc::new(AtomicBool::new(true));
        let (tick_tx, tick_rx) = mpsc::channel::<RawTick>(TICK_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CHANNEL_CAPACITY);

        let writer_flag = connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    warn!(error = %e, "Feed write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_flag.store(false, Ordering::SeqCst);
        });

        let reader_flag = connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        for tick in parse_frame(&text) {
                            if tick_tx.send(tick).await.is_err() {
                                debug!("Tick receiver dropped");
                                reader_flag.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Feed closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Feed read failed");
                        break;
                    }
                }
            }
            reader_flag.store(false, Ordering::SeqCst);
        });

        let client = WsFeedClient {
            outbound: out_tx,
            connected,
            mode,
        };
        Ok(FeedConnection {
            client: Arc::new(client),
            ticks: tick_rx,
        })
    }
}

/// Client half of a WebSocket feed connection
pub struct WsFeedClient {
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
    mode: FeedMode,
}

impl WsFeedClient {
    async fn send_subscription(&self, action: &'static str, keys: &[InstrumentKey]) -> FeedResult<()> {
        for chunk in keys.chunks(MAX_INSTRUMENTS_PER_MESSAGE) {
            let message = SubscriptionMessage {
                action,
                mode: self.mode.as_str(),
                instruments: chunk
                    .iter()
                    .map(|k| InstrumentRef {
                        segment: &k.segment,
                        security_id: &k.security_id,
                    })
                    .collect(),
            };
            let text = serde_json::to_string(&message)
                .map_err(|e| FeedError::Subscription(e.to_string()))?;
            self.outbound
                .send(Message::Text(text))
                .await
                .map_err(|_| FeedError::Connection("feed writer closed".to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FeedClient for WsFeedClient {
    async fn subscribe_one(&self, key: &InstrumentKey) -> FeedResult<()> {
        self.send_subscription("subscribe", std::slice::from_ref(key)).await
    }

    async fn unsubscribe_one(&self, key: &InstrumentKey) -> FeedResult<()> {
        self.send_subscription("unsubscribe", std::slice::from_ref(key)).await
    }

    async fn subscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<()> {
        self.send_subscription("subscribe", keys).await
    }

    async fn unsubscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<()> {
        self.send_subscription("unsubscribe", keys).await
    }

    async fn disconnect(&self) -> FeedResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound
            .send(Message::Close(None))
            .await
            .map_err(|_| FeedError::Connection("feed writer already closed".to_string()))
    }

    fn is_connected(&self) -> Option<bool> {
        Some(self.connected.load(Ordering::SeqCst))
    }
}

/// Tick objects in a text frame; anything else is ignored
fn parse_frame(text: &str) -> Vec<RawTick> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(tick)) => vec![tick],
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(tick) => Some(tick),
                _ => None,
            })
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON feed frame");
            Vec::new()
        }
    }
}
