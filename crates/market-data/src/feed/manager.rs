//! Feed subscription lifecycle
//!
//! The manager owns the single upstream connection, the subscription
//! registry and the listener list. Inbound ticks arrive over a channel and
//! are dispatched by one receive task, so the tick path has one producer.
//!
//! Lifecycle is an explicit state machine:
//!
//! ```text
//! Disconnected -> Starting -> Connecting -> Connected
//!       ^____________|____________|____________|   (stop / failed start)
//! ```
//!
//! `Connected` is inferred: the client reports connectivity, or a tick
//! arrived within the staleness window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{InstrumentKey, WatchlistEntry};
use observability::FeedMetrics;

use super::client::{FeedClient, FeedConnector, FeedCredentials, FeedMode};
use super::positions::ActivePositionIndex;
use super::session::MarketSession;
use super::sink::{PnlUpdate, PnlUpdateSink};
use super::watchlist::WatchlistSource;
use crate::tick::{RawTick, TickRecord};
use crate::tick_store::TickStore;
use crate::{FeedError, FeedResult};

const TICK_EVENT_CAPACITY: usize = 1024;
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_CONNECT_WAIT: Duration = Duration::from_secs(120);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Disconnected,
    Starting,
    Connecting,
    Connected,
}

impl FeedState {
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// `Connected` is never stored; a live `Connecting` reads as connected
    fn promote(self, connected: bool) -> Self {
        match self {
            Self::Connecting | Self::Connected if connected => Self::Connected,
            Self::Connected => Self::Connecting,
            other => other,
        }
    }
}

/// Manager settings
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub mode: FeedMode,
    pub credentials: Option<FeedCredentials>,
    /// Bounded wait for first connectivity during start
    pub connect_timeout: Duration,
    /// Tick silence after which the feed no longer counts as connected
    pub stale_after: Duration,
}

impl FeedSettings {
    pub fn from_config(config: &config::FeedConfig) -> Self {
        Self {
            mode: FeedMode::parse_or_default(&config.mode),
            credentials: FeedCredentials::from_config(config),
            connect_timeout: config.connect_timeout(),
            stale_after: config.stale_after(),
        }
    }
}

/// Outcome of a single subscribe or unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionResult {
    pub segment: String,
    pub security_id: String,
    /// Whether the key was in the registry before the call
    pub already_subscribed: bool,
    /// Watchlist member skipped by the dynamic path
    pub protected: bool,
    pub error: Option<String>,
}

impl SubscriptionResult {
    fn new(segment: &str, security_id: &str) -> Self {
        Self {
            segment: segment.trim().to_string(),
            security_id: security_id.trim().to_string(),
            already_subscribed: false,
            protected: false,
            error: None,
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Read-only health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct FeedHealth {
    pub running: bool,
    pub connected: bool,
    pub state: FeedState,
    pub mode: FeedMode,
    pub credentials_present: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub subscriptions: usize,
}

/// Health plus registry detail
#[derive(Debug, Clone, Serialize)]
pub struct FeedDiagnostics {
    pub health: FeedHealth,
    pub watchlist: Vec<String>,
    pub subscriptions: Vec<String>,
    pub listeners: usize,
    pub stale_after_secs: u64,
}

/// Tick listener. Errors are logged; they never stop other listeners.
pub type TickListener = Arc<dyn Fn(&TickRecord) -> FeedResult<()> + Send + Sync>;

/// Collaborators the manager dispatches to
pub struct FeedDependencies {
    pub connector: Arc<dyn FeedConnector>,
    pub tick_store: Arc<TickStore>,
    pub watchlist: Arc<dyn WatchlistSource>,
    pub positions: Arc<dyn ActivePositionIndex>,
    pub session: Arc<dyn MarketSession>,
    pub pnl_sink: Option<Arc<dyn PnlUpdateSink>>,
}

struct Lifecycle {
    state: FeedState,
    client: Option<Arc<dyn FeedClient>>,
    cancel: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Default)]
struct TickClock {
    last_tick: Option<Instant>,
    last_tick_wall: Option<DateTime<Utc>>,
}

struct Inner {
    settings: FeedSettings,
    deps: FeedDependencies,
    lifecycle: Mutex<Lifecycle>,
    registry: DashMap<String, InstrumentKey>,
    watchlist: RwLock<Vec<WatchlistEntry>>,
    listeners: RwLock<Vec<TickListener>>,
    clock: Mutex<TickClock>,
    /// Serializes the dynamic per-instrument path; never taken on the tick path
    dynamic: tokio::sync::Mutex<()>,
    events: broadcast::Sender<TickRecord>,
    metrics: FeedMetrics,
}

/// Owns the upstream feed connection and subscription registry
#[derive(Clone)]
pub struct FeedSubscriptionManager {
    inner: Arc<Inner>,
}

impl FeedSubscriptionManager {
    pub fn new(settings: FeedSettings, deps: FeedDependencies) -> Self {
        let (events, _) = broadcast::channel(TICK_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                deps,
                lifecycle: Mutex::new(Lifecycle {
                    state: FeedState::Disconnected,
                    client: None,
                    cancel: None,
                    started_at: None,
                    last_error: None,
                }),
                registry: DashMap::new(),
                watchlist: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                clock: Mutex::new(TickClock::default()),
                dynamic: tokio::sync::Mutex::new(()),
                events,
                metrics: FeedMetrics::new("upstream"),
            }),
        }
    }

    /// Open the connection and subscribe the watchlist.
    ///
    /// A no-op when already running. On any failure after the state left
    /// `Disconnected`, partial state is torn down with [`stop`](Self::stop).
    pub async fn start(&self) -> FeedResult<()> {
        let credentials = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state.is_running() {
                debug!(state = ?lifecycle.state, "Feed already running");
                return Ok(());
            }
            let Some(credentials) = self.inner.settings.credentials.clone() else {
                warn!("Feed credentials missing, not starting");
                lifecycle.last_error = Some(FeedError::MissingCredentials.to_string());
                return Err(FeedError::MissingCredentials);
            };
            lifecycle.state = FeedState::Starting;
            lifecycle.last_error = None;
            credentials
        };

        match self.try_start(&credentials).await {
            Ok(()) => {
                info!(
                    mode = %self.inner.settings.mode,
                    subscriptions = self.inner.registry.len(),
                    "Feed started"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Feed start failed");
                self.stop().await;
                self.inner.lifecycle.lock().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn try_start(&self, credentials: &FeedCredentials) -> FeedResult<()> {
        let watchlist = match self.inner.deps.watchlist.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Watchlist unavailable, starting without it");
                Vec::new()
            }
        };
        *self.inner.watchlist.write() = watchlist.clone();

        let connection = self
            .inner
            .deps
            .connector
            .connect(self.inner.settings.mode, credentials)
            .await?;

        let cancel = CancellationToken::new();
        let installed = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let installed = lifecycle.state == FeedState::Starting;
            if installed {
                lifecycle.state = FeedState::Connecting;
                lifecycle.client = Some(connection.client.clone());
                lifecycle.cancel = Some(cancel.clone());
                lifecycle.started_at = Some(Utc::now());
            }
            installed
        };
        if !installed {
            // Stopped while connecting
            if let Err(e) = connection.client.disconnect().await {
                warn!(error = %e, "Disconnect after aborted start failed");
            }
            return Err(FeedError::NotRunning);
        }

        tokio::spawn(receive_loop(self.inner.clone(), connection.ticks, cancel));

        self.wait_for_connectivity().await;

        // Outside every lock: subscribing goes through the running guard
        self.subscribe_many(&watchlist).await?;
        Ok(())
    }

    async fn wait_for_connectivity(&self) {
        let deadline = Instant::now() + self.inner.settings.connect_timeout.min(MAX_CONNECT_WAIT);
        while Instant::now() < deadline {
            if self.inner.is_connected() {
                return;
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }
        debug!("No connectivity signal yet, subscribing anyway");
    }

    /// Tear down the connection. Safe at any time, including mid-start.
    pub async fn stop(&self) {
        let (client, cancel) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == FeedState::Disconnected && lifecycle.client.is_none() {
                return;
            }
            lifecycle.state = FeedState::Disconnected;
            (lifecycle.client.take(), lifecycle.cancel.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.inner.listeners.write().clear();
        self.inner.registry.clear();
        self.inner.metrics.set_subscriptions(0);
        *self.inner.clock.lock() = TickClock::default();

        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "Feed disconnect failed");
            }
        }
        info!("Feed stopped");
    }

    /// Lifecycle state; `Connected` while connectivity holds
    pub fn state(&self) -> FeedState {
        let stored = self.inner.lifecycle.lock().state;
        stored.promote(self.inner.is_connected())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Subscribe one instrument. Errors are reported in the result.
    pub async fn subscribe(&self, segment: &str, security_id: &str) -> SubscriptionResult {
        let result = SubscriptionResult::new(segment, security_id);
        let Ok(key) = InstrumentKey::try_new(segment, security_id) else {
            return result.failed("segment and security_id are required");
        };
        self.subscribe_key(key, result).await
    }

    async fn subscribe_key(&self, key: InstrumentKey, mut result: SubscriptionResult) -> SubscriptionResult {
        if self.inner.registry.contains_key(&key.composite()) {
            result.already_subscribed = true;
            return result;
        }

        let client = match self.inner.client() {
            Ok(client) => client,
            Err(e) => return result.failed(e),
        };
        match client.subscribe_one(&key).await {
            Ok(()) => {
                debug!(instrument = %key, "Subscribed");
                self.inner.registry.insert(key.composite(), key);
                self.inner.metrics.set_subscriptions(self.inner.registry.len());
                result
            }
            Err(e) => {
                warn!(instrument = %key, error = %e, "Subscribe failed");
                result.failed(e)
            }
        }
    }

    /// Unsubscribe one instrument. Errors are reported in the result.
    pub async fn unsubscribe(&self, segment: &str, security_id: &str) -> SubscriptionResult {
        let result = SubscriptionResult::new(segment, security_id);
        let Ok(key) = InstrumentKey::try_new(segment, security_id) else {
            return result.failed("segment and security_id are required");
        };
        self.unsubscribe_key(key, result).await
    }

    async fn unsubscribe_key(&self, key: InstrumentKey, mut result: SubscriptionResult) -> SubscriptionResult {
        if !self.inner.registry.contains_key(&key.composite()) {
            return result;
        }
        result.already_subscribed = true;

        let client = match self.inner.client() {
            Ok(client) => client,
            Err(e) => return result.failed(e),
        };
        match client.unsubscribe_one(&key).await {
            Ok(()) => {
                debug!(instrument = %key, "Unsubscribed");
                self.inner.registry.remove(&key.composite());
                self.inner.metrics.set_subscriptions(self.inner.registry.len());
                result
            }
            Err(e) => {
                warn!(instrument = %key, error = %e, "Unsubscribe failed");
                result.failed(e)
            }
        }
    }

    /// Subscribe a batch, skipping blank and already subscribed entries.
    ///
    /// Returns the number of new subscriptions. Client errors propagate.
    pub async fn subscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<usize> {
        let mut seen = HashSet::new();
        let fresh: Vec<InstrumentKey> = keys
            .iter()
            .filter(|k| !k.is_blank())
            .filter(|k| !self.inner.registry.contains_key(&k.composite()))
            .filter(|k| seen.insert(k.composite()))
            .cloned()
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let client = self.inner.client()?;
        client.subscribe_many(&fresh).await?;

        for key in &fresh {
            self.inner.registry.insert(key.composite(), key.clone());
        }
        self.inner.metrics.set_subscriptions(self.inner.registry.len());
        info!(count = fresh.len(), "Subscribed batch");
        Ok(fresh.len())
    }

    /// Unsubscribe a batch, skipping blank entries.
    ///
    /// Returns the number of registry entries removed. Client errors propagate.
    pub async fn unsubscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<usize> {
        let targets: Vec<InstrumentKey> = keys.iter().filter(|k| !k.is_blank()).cloned().collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let client = self.inner.client()?;
        client.unsubscribe_many(&targets).await?;

        let removed = targets
            .iter()
            .filter(|k| self.inner.registry.remove(&k.composite()).is_some())
            .count();
        self.inner.metrics.set_subscriptions(self.inner.registry.len());
        info!(count = removed, "Unsubscribed batch");
        Ok(removed)
    }

    /// Subscribe a derivative instrument for a newly opened position.
    ///
    /// Watchlist members are reported as protected and left alone.
    pub async fn subscribe_instrument(&self, segment: &str, security_id: &str) -> SubscriptionResult {
        let result = SubscriptionResult::new(segment, security_id);
        let key = match self.dynamic_key(segment, security_id) {
            Ok(key) => key,
            Err(e) => return result.failed(e),
        };
        if self.inner.is_watchlisted(&key) {
            return SubscriptionResult {
                already_subscribed: true,
                protected: true,
                ..result
            };
        }

        let _guard = self.inner.dynamic.lock().await;
        self.subscribe_key(key, result).await
    }

    /// Unsubscribe a derivative instrument after its position closed.
    ///
    /// Never unsubscribes a watchlist member.
    pub async fn unsubscribe_instrument(&self, segment: &str, security_id: &str) -> SubscriptionResult {
        let result = SubscriptionResult::new(segment, security_id);
        let key = match self.dynamic_key(segment, security_id) {
            Ok(key) => key,
            Err(e) => return result.failed(e),
        };
        if self.inner.is_watchlisted(&key) {
            debug!(instrument = %key, "Watchlist instrument kept subscribed");
            return SubscriptionResult {
                already_subscribed: true,
                protected: true,
                ..result
            };
        }

        let _guard = self.inner.dynamic.lock().await;
        self.unsubscribe_key(key, result).await
    }

    fn dynamic_key(&self, segment: &str, security_id: &str) -> FeedResult<InstrumentKey> {
        let key = InstrumentKey::try_new(segment, security_id)
            .map_err(|e| FeedError::InvalidInstrument(e.to_string()))?;
        if !key.is_derivative() {
            return Err(FeedError::InvalidInstrument(format!(
                "{} is not a derivative segment",
                key.segment
            )));
        }
        Ok(key)
    }

    /// Register a listener for every inbound tick
    pub fn on_tick<F>(&self, listener: F)
    where
        F: Fn(&TickRecord) -> FeedResult<()> + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Generic tick notifications
    pub fn tick_events(&self) -> broadcast::Receiver<TickRecord> {
        self.inner.events.subscribe()
    }

    /// Dispatch one inbound tick. The receive task calls this per frame.
    pub async fn handle_tick(&self, raw: RawTick) {
        self.inner.handle_tick(raw).await;
    }

    pub fn subscriptions(&self) -> Vec<InstrumentKey> {
        let mut keys: Vec<InstrumentKey> = self.inner.registry.iter().map(|e| e.value().clone()).collect();
        keys.sort();
        keys
    }

    pub fn is_subscribed(&self, segment: &str, security_id: &str) -> bool {
        self.inner
            .registry
            .contains_key(&InstrumentKey::new(segment, security_id).composite())
    }

    pub fn watchlist(&self) -> Vec<WatchlistEntry> {
        self.inner.watchlist.read().clone()
    }

    pub fn health_status(&self) -> FeedHealth {
        let (stored, started_at, last_error) = {
            let lifecycle = self.inner.lifecycle.lock();
            (lifecycle.state, lifecycle.started_at, lifecycle.last_error.clone())
        };
        let connected = self.inner.is_connected();

        FeedHealth {
            running: stored.is_running(),
            connected,
            state: stored.promote(connected),
            mode: self.inner.settings.mode,
            credentials_present: self.inner.settings.credentials.is_some(),
            started_at,
            last_tick_at: self.inner.clock.lock().last_tick_wall,
            last_error,
            subscriptions: self.inner.registry.len(),
        }
    }

    pub fn diagnostics(&self) -> FeedDiagnostics {
        FeedDiagnostics {
            health: self.health_status(),
            watchlist: self.watchlist().iter().map(|w| w.composite()).collect(),
            subscriptions: self.subscriptions().iter().map(|k| k.composite()).collect(),
            listeners: self.inner.listeners.read().len(),
            stale_after_secs: self.inner.settings.stale_after.as_secs(),
        }
    }
}

impl Inner {
    fn client(&self) -> FeedResult<Arc<dyn FeedClient>> {
        let lifecycle = self.lifecycle.lock();
        match (lifecycle.state, &lifecycle.client) {
            (FeedState::Disconnected, _) => Err(FeedError::NotRunning),
            (_, Some(client)) => Ok(client.clone()),
            (_, None) => Err(FeedError::Starting),
        }
    }

    fn is_connected(&self) -> bool {
        let client_says = {
            let lifecycle = self.lifecycle.lock();
            if !lifecycle.state.is_running() {
                return false;
            }
            lifecycle.client.as_ref().and_then(|c| c.is_connected())
        };
        if client_says == Some(true) {
            return true;
        }
        self.clock
            .lock()
            .last_tick
            .is_some_and(|t| t.elapsed() <= self.settings.stale_after)
    }

    fn is_watchlisted(&self, key: &InstrumentKey) -> bool {
        self.watchlist.read().contains(key)
    }

    async fn handle_tick(self: &Arc<Self>, raw: RawTick) {
        if !self.lifecycle.lock().state.is_running() {
            return;
        }
        self.metrics.tick_received();

        if self.mark_tick_received() {
            info!("Feed resumed after a gap, resubscribing");
            tokio::spawn(self.clone().resubscribe());
        }

        let Some(tick) = TickRecord::from_raw(&raw) else {
            self.metrics.tick_dropped();
            return;
        };

        if tick.has_price_signal() && self.deps.tick_store.put(tick.clone()).await.is_some() {
            self.metrics.tick_cached();
        }

        self.notify_listeners(&tick);
        // No receivers is fine
        let _ = self.events.send(tick.clone());

        self.forward_to_positions(&tick).await;
    }

    /// Record the tick time. Returns true when connectivity resumed after a gap.
    fn mark_tick_received(&self) -> bool {
        let now = Instant::now();
        let mut clock = self.clock.lock();
        let resumed = clock
            .last_tick
            .is_some_and(|t| now.duration_since(t) > self.settings.stale_after);
        clock.last_tick = Some(now);
        clock.last_tick_wall = Some(Utc::now());
        resumed
    }

    fn notify_listeners(&self, tick: &TickRecord) {
        let listeners = self.listeners.read().clone();
        for (i, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| (**listener)(tick))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(listener = i, error = %e, "Tick listener failed"),
                Err(_) => {
                    error!(listener = i, "Tick listener panicked");
                    self.metrics.listener_panicked();
                }
            }
        }
    }

    async fn forward_to_positions(&self, tick: &TickRecord) {
        let Some(sink) = &self.deps.pnl_sink else {
            return;
        };
        let Some(ltp) = tick.ltp.filter(|p| *p > 0.0) else {
            return;
        };
        if tick.security_id.is_empty() {
            return;
        }

        for tracker in self.deps.positions.trackers_for(&tick.security_id) {
            let update = PnlUpdate {
                tracker_id: tracker.id,
                ltp,
            };
            if let Err(e) = sink.on_pnl_update(update).await {
                warn!(tracker_id = %tracker.id, error = %e, "PnL update not delivered");
            }
        }
    }

    /// Re-send the watchlist, and open positions while the market is open
    async fn resubscribe(self: Arc<Self>) {
        self.metrics.resubscribed();
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "Skipping resubscription");
                return;
            }
        };

        let watchlist = self.watchlist.read().clone();
        if !watchlist.is_empty() {
            match client.subscribe_many(&watchlist).await {
                Ok(()) => self.register(&watchlist),
                Err(e) => warn!(error = %e, "Watchlist resubscription failed"),
            }
        }

        if !self.deps.session.is_open(Utc::now()) {
            return;
        }
        let positions = self.deps.positions.active_instruments();
        if !positions.is_empty() {
            match client.subscribe_many(&positions).await {
                Ok(()) => self.register(&positions),
                Err(e) => warn!(error = %e, "Position resubscription failed"),
            }
        }
    }

    fn register(&self, keys: &[InstrumentKey]) {
        for key in keys {
            self.registry.insert(key.composite(), key.clone());
        }
        self.metrics.set_subscriptions(self.registry.len());
    }
}

async fn receive_loop(inner: Arc<Inner>, mut ticks: mpsc::Receiver<RawTick>, cancel: CancellationToken) {
    debug!("Feed receive loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = ticks.recv() => match next {
                Some(raw) => inner.handle_tick(raw).await,
                None => {
                    warn!("Feed tick stream closed");
                    inner.lifecycle.lock().last_error = Some("tick stream closed".to_string());
                    break;
                }
            },
        }
    }
    debug!("Feed receive loop stopped");
}
