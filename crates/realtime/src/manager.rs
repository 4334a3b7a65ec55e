//! Realtime stream manager.
//!
//! Owns the subscription table and one supervised task per upstream channel.
//!
//! - The first listener for a symbol sends the upstream subscribe frame, the last
//!   listener to leave sends the unsubscribe frame.
//! - A channel task connects, replays every active subscription for its channel,
//!   pumps inbound frames to listeners and reconnects with backoff when the socket
//!   drops. The backoff re-arms after every successful connect.
//! - `connect()` reports `connected` as soon as the channel tasks are started, not
//!   when the upstream confirms the socket. After that the manager state follows the
//!   channels: `connected` while any channel is connected, then `connecting`, then
//!   `error`, otherwise `disconnected`.
//! - `connect()` only starts channels that have no running task, so a live socket is
//!   never torn down to reconnect its sibling.
//!
//! Listener callbacks run on the channel task outside the table lock, each one
//! isolated so a panic only loses that listener's delivery.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use marketpulse_market_data::symbols;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::protocol::{self, Inbound};
use crate::reconnect::ReconnectPolicy;
use crate::state::{Channel, ConnectionState};
use crate::ticker::TickerData;
use crate::transport::{redact, StreamConnector, TungsteniteConnector};

/// Callback receiving ticks for one symbol. Identity is the `Arc` pointer.
pub type TickListener = Arc<dyn Fn(&TickerData) + Send + Sync>;

/// Callback receiving connection state changes.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
enum Control {
    Subscribe,
    Unsubscribe,
}

struct Subscription {
    channel: Channel,
    topic: String,
    listeners: Vec<TickListener>,
}

#[derive(Default)]
struct ChannelSlot {
    state: ConnectionState,
    /// Present while the channel's socket is open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelSlot {
    /// A task is connecting, pumping or backing off on this channel.
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[derive(Default)]
struct ManagerState {
    state: ConnectionState,
    /// Keyed by canonical symbol.
    subscriptions: HashMap<String, Subscription>,
    channels: HashMap<Channel, ChannelSlot>,
    state_listeners: Vec<(u64, StateListener)>,
}

struct Inner {
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    state: Mutex<ManagerState>,
    request_ids: AtomicU64,
    listener_ids: AtomicU64,
}

/// Realtime ticker fan-out over the crypto and equity channels.
///
/// Cheap to clone; clones share the same subscriptions and connections.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

/// Registration returned by [`StreamManager::on_state_change`].
pub struct StateListenerHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl StateListenerHandle {
    /// Stop receiving state changes.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .lock_state()
                .state_listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl StreamManager {
    /// Manager backed by real websockets.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()))
    }

    pub fn with_connector(config: StreamConfig, connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(ManagerState::default()),
                request_ids: AtomicU64::new(0),
                listener_ids: AtomicU64::new(0),
            }),
        }
    }

    /// Start every channel task that is not already running. Channels with a live
    /// task are left alone, so this is a no-op once both are up.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let listeners = {
            let mut state = self.inner.lock_state();
            let (startable, unconfigured): (Vec<Channel>, Vec<Channel>) = Channel::ALL
                .into_iter()
                .filter(|channel| !state.channels.get(channel).is_some_and(ChannelSlot::is_running))
                .partition(|channel| self.inner.config.url_for(*channel).is_some());
            if startable.is_empty() {
                debug!("Stream channels already running, ignoring connect");
                return;
            }
            for channel in unconfigured {
                warn!(
                    "No token configured for the {} channel, its symbols will not stream",
                    channel
                );
            }

            for channel in startable {
                let Some(url) = self.inner.config.url_for(channel) else {
                    continue;
                };
                let task = tokio::spawn(run_channel(Arc::clone(&self.inner), channel, url));
                let slot = state.channels.entry(channel).or_default();
                slot.outbound = None;
                slot.state = ConnectionState::Connecting;
                slot.task = Some(task);
            }

            if matches!(
                state.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }
            state.state = ConnectionState::Connecting;
            state.listeners()
        };
        self.inner.notify(listeners, ConnectionState::Connecting);

        self.inner
            .transition_from(ConnectionState::Connecting, ConnectionState::Connected);
    }

    /// Stop both channel tasks. Subscriptions are kept and replayed on the next connect.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.lock_state();
            for slot in state.channels.values_mut() {
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                slot.outbound = None;
                slot.state = ConnectionState::Disconnected;
            }
        }
        info!("Stream manager disconnected");
        self.inner.refresh_state();
    }

    /// Add `listener` for `symbol`, subscribing upstream if it is the first one.
    ///
    /// Adding the same listener twice has no effect.
    pub fn subscribe(&self, symbol: &str, listener: TickListener) {
        let symbol = symbols::normalize(symbol);
        if symbol.is_empty() {
            warn!("Ignoring subscribe for an empty symbol");
            return;
        }

        let should_connect = {
            let mut guard = self.inner.lock_state();
            let ManagerState {
                subscriptions,
                channels,
                ..
            } = &mut *guard;

            let subscription = subscriptions.entry(symbol.clone()).or_insert_with(|| {
                let channel = Channel::for_symbol(&symbol);
                let topic = channel.topic_for(&symbol);
                debug!("New {} subscription {} -> {}", channel, symbol, topic);
                self.inner
                    .send_control(channels, channel, &topic, Control::Subscribe);
                Subscription {
                    channel,
                    topic,
                    listeners: Vec::new(),
                }
            });

            if !subscription
                .listeners
                .iter()
                .any(|existing| Arc::ptr_eq(existing, &listener))
            {
                subscription.listeners.push(listener);
            }

            let channel = subscription.channel;
            self.inner.config.auto_connect
                && self.inner.config.url_for(channel).is_some()
                && !channels.get(&channel).is_some_and(ChannelSlot::is_running)
        };

        if should_connect {
            self.connect();
        }
    }

    /// Remove `listener` from `symbol`, unsubscribing upstream when none are left.
    pub fn unsubscribe(&self, symbol: &str, listener: &TickListener) {
        let symbol = symbols::normalize(symbol);
        let mut guard = self.inner.lock_state();
        let ManagerState {
            subscriptions,
            channels,
            ..
        } = &mut *guard;

        let Some(subscription) = subscriptions.get_mut(&symbol) else {
            return;
        };
        subscription
            .listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));

        if subscription.listeners.is_empty() {
            if let Some(removed) = subscriptions.remove(&symbol) {
                debug!("Dropping {} subscription {}", removed.channel, symbol);
                self.inner.send_control(
                    channels,
                    removed.channel,
                    &removed.topic,
                    Control::Unsubscribe,
                );
            }
        }
    }

    /// Register a state listener. Call [`StateListenerHandle::unsubscribe`] to remove it.
    pub fn on_state_change<F>(&self, listener: F) -> StateListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.listener_ids.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock_state()
            .state_listeners
            .push((id, Arc::new(listener)));
        StateListenerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn get_state(&self) -> ConnectionState {
        self.inner.lock_state().state
    }

    pub fn channel_state(&self, channel: Channel) -> ConnectionState {
        self.inner
            .lock_state()
            .channels
            .get(&channel)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    /// Symbols with at least one listener, sorted.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .inner
            .lock_state()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }

    pub fn listener_count(&self, symbol: &str) -> usize {
        self.inner
            .lock_state()
            .subscriptions
            .get(&symbols::normalize(symbol))
            .map(|subscription| subscription.listeners.len())
            .unwrap_or(0)
    }
}

impl ManagerState {
    /// Manager state as seen through its channels, the most alive one wins.
    fn channel_summary(&self) -> ConnectionState {
        let any = |wanted: ConnectionState| self.channels.values().any(|slot| slot.state == wanted);
        [
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Error,
        ]
        .into_iter()
        .find(|state| any(*state))
        .unwrap_or(ConnectionState::Disconnected)
    }

    fn listeners(&self) -> Vec<StateListener> {
        self.state_listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl Inner {
    /// Lock the manager state, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Stream manager mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Re-derive the manager state from the channel slots and notify on change.
    fn refresh_state(&self) {
        let (next, listeners) = {
            let mut state = self.lock_state();
            let next = state.channel_summary();
            if state.state == next {
                return;
            }
            state.state = next;
            (next, state.listeners())
        };
        self.notify(listeners, next);
    }

    /// Transition only when the current state is still `expected`.
    fn transition_from(&self, expected: ConnectionState, next: ConnectionState) {
        let listeners = {
            let mut state = self.lock_state();
            if state.state != expected {
                return;
            }
            state.state = next;
            state.listeners()
        };
        self.notify(listeners, next);
    }

    fn notify(&self, listeners: Vec<StateListener>, next: ConnectionState) {
        info!("Stream state: {}", next);
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(next))).is_err() {
                warn!("State listener panicked on {}", next);
            }
        }
    }

    fn set_channel_state(&self, channel: Channel, next: ConnectionState) {
        self.lock_state().channels.entry(channel).or_default().state = next;
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Send a control frame if the channel is open. Closed channels pick the
    /// subscription up when they replay the table on connect.
    fn send_control(
        &self,
        channels: &HashMap<Channel, ChannelSlot>,
        channel: Channel,
        topic: &str,
        action: Control,
    ) {
        let Some(outbound) = channels.get(&channel).and_then(|slot| slot.outbound.as_ref())
        else {
            debug!("{} channel not open, deferring {:?} {}", channel, action, topic);
            return;
        };

        let request_id = self.next_request_id();
        let frame = match action {
            Control::Subscribe => protocol::subscribe_frame(channel, topic, request_id),
            Control::Unsubscribe => protocol::unsubscribe_frame(channel, topic, request_id),
        };
        match frame {
            Ok(frame) => {
                if outbound.send(frame).is_err() {
                    warn!("{} channel writer is gone, {:?} {} lost", channel, action, topic);
                }
            }
            Err(e) => warn!("Failed to encode {:?} {}: {}", action, topic, e),
        }
    }

    /// Store the socket's sender and replay every subscription on `channel`.
    fn on_open(&self, channel: Channel, outbound: mpsc::UnboundedSender<String>) {
        let replayed = {
            let mut state = self.lock_state();
            let topics: Vec<String> = state
                .subscriptions
                .values()
                .filter(|subscription| subscription.channel == channel)
                .map(|subscription| subscription.topic.clone())
                .collect();

            let slot = state.channels.entry(channel).or_default();
            slot.outbound = Some(outbound);
            slot.state = ConnectionState::Connected;

            for topic in &topics {
                self.send_control(&state.channels, channel, topic, Control::Subscribe);
            }
            topics.len()
        };

        info!("{} channel connected, resubscribed {} symbols", channel, replayed);
        self.refresh_state();
    }

    fn on_close(&self, channel: Channel, reason: Option<StreamError>) {
        {
            let mut state = self.lock_state();
            let slot = state.channels.entry(channel).or_default();
            slot.outbound = None;
            slot.state = ConnectionState::Disconnected;
        }
        match reason {
            Some(e) => warn!("{} channel dropped: {}", channel, e),
            None => warn!("{} channel closed by upstream", channel),
        }
        self.refresh_state();
    }

    /// Deliver inbound frames until the socket ends.
    async fn pump(
        &self,
        channel: Channel,
        mut inbound: BoxStream<'static, Result<String, StreamError>>,
    ) -> Option<StreamError> {
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(text) => self.dispatch(channel, &text),
                Err(e) => return Some(e),
            }
        }
        None
    }

    fn dispatch(&self, channel: Channel, text: &str) {
        let ticks = match protocol::parse(channel, text) {
            Ok(Inbound::Ticks(ticks)) => ticks,
            Ok(Inbound::Ignored) => return,
            Ok(Inbound::Rejected(message)) => {
                warn!("{} channel rejected a request: {}", channel, message);
                return;
            }
            Err(e) => {
                warn!("Dropping {} frame: {}", channel, e);
                return;
            }
        };

        for raw in ticks {
            let deliveries: Vec<(String, Vec<TickListener>)> = self
                .lock_state()
                .subscriptions
                .iter()
                .filter(|(_, subscription)| {
                    subscription.channel == channel
                        && protocol::topic_matches(channel, &subscription.topic, &raw.topic)
                })
                .map(|(symbol, subscription)| (symbol.clone(), subscription.listeners.clone()))
                .collect();

            if deliveries.is_empty() {
                debug!("No {} subscription for topic {}", channel, raw.topic);
                continue;
            }

            for (symbol, listeners) in deliveries {
                let tick = TickerData {
                    symbol,
                    price: raw.price,
                    change: raw.change,
                    change_percent: raw.change_percent,
                    volume: raw.volume,
                    timestamp: raw.timestamp,
                };
                for listener in listeners {
                    if catch_unwind(AssertUnwindSafe(|| listener(&tick))).is_err() {
                        warn!("Tick listener for {} panicked", tick.symbol);
                    }
                }
            }
        }
    }
}

/// Supervised connect / pump / reconnect loop for one channel.
async fn run_channel(inner: Arc<Inner>, channel: Channel, url: String) {
    let mut policy = ReconnectPolicy::new(inner.config.reconnect.clone());
    let mut first_attempt = true;

    loop {
        // connect() already marked the first attempt
        if !first_attempt {
            inner.set_channel_state(channel, ConnectionState::Connecting);
            inner.refresh_state();
        }
        first_attempt = false;

        match inner.connector.connect(&url).await {
            Ok(connection) => {
                policy.reset();
                inner.on_open(channel, connection.outbound);
                let reason = inner.pump(channel, connection.inbound).await;
                inner.on_close(channel, reason);
            }
            Err(e) => {
                warn!("{} channel connect to {} failed: {}", channel, redact(&url), e);
                inner.set_channel_state(channel, ConnectionState::Error);
                inner.refresh_state();
            }
        }

        match policy.next_delay() {
            Some(delay) => {
                info!(
                    "Reconnecting {} channel in {:?} (attempt {})",
                    channel,
                    delay,
                    policy.attempt_count()
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!(
                    "{} channel giving up after {} reconnect attempts",
                    channel,
                    policy.attempt_count()
                );
                inner.set_channel_state(channel, ConnectionState::Disconnected);
                inner.refresh_state();
                break;
            }
        }
    }
}
