//! Fan-out registry of `streamKey -> StreamConnection` and `streamKey -> subscribers`, with
//! ref-counted teardown: the last subscriber leaving a topic cancels its supervising connection.
//! Subscribers get back an opaque [`SubscriptionHandle`] rather than a raw channel, so unsubscribe
//! can't be forged and doesn't need to know the stream's internal shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use support::CancellationToken;

use crate::rest::client::RestClient;
use crate::stream::connection::{supervise, Subscriber};
use crate::stream::updates::{
    parse_account_update, parse_mark_price_update, parse_order_book_update, parse_trade_update,
    AccountUpdate, MarkPriceUpdate, OrderBookUpdate, TradeUpdate,
};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;
const LISTEN_KEY_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Topic {
    OrderBook,
    Trades,
    MarkPrice,
    Account,
}

/// Opaque token returned from every `subscribe*` call. `unsubscribe` takes this rather than
/// re-deriving a channel identity from the stream key and receiver alone.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: Topic,
    stream_key: String,
    subscriber_id: u64,
}

struct StreamState<T> {
    subscribers: Arc<RwLock<Vec<Subscriber<T>>>>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> StreamState<T> {
    fn spawn<P>(url: String, label: String, parser: P) -> Self
    where
        P: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        let subscribers = Arc::new(RwLock::new(Vec::new()));
        let cancel = CancellationToken::new();
        tokio::spawn(supervise(url, label, parser, subscribers.clone(), cancel.clone()));
        Self {
            subscribers,
            cancel,
            next_id: AtomicU64::new(0),
        }
    }

    fn add_subscriber(&self) -> (mpsc::Receiver<T>, u64) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.write().push(Subscriber { id, sender: tx });
        (rx, id)
    }

    fn remove_subscriber(&self, id: u64) -> bool {
        self.subscribers.write().retain(|s| s.id != id);
        self.subscribers.read().is_empty()
    }
}

struct TopicRegistry<T> {
    streams: DashMap<String, StreamState<T>>,
}

impl<T: Clone + Send + 'static> TopicRegistry<T> {
    fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    fn subscribe<P>(&self, stream_key: String, url: String, parser: P) -> (mpsc::Receiver<T>, u64)
    where
        P: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        let entry = self
            .streams
            .entry(stream_key.clone())
            .or_insert_with(|| StreamState::spawn(url, stream_key.clone(), parser));
        entry.add_subscriber()
    }

    fn unsubscribe(&self, stream_key: &str, subscriber_id: u64) {
        let should_teardown = match self.streams.get(stream_key) {
            Some(state) => state.remove_subscriber(subscriber_id),
            None => return,
        };
        if should_teardown {
            if let Some((_, state)) = self.streams.remove(stream_key) {
                state.cancel.cancel();
            }
        }
    }
}

/// Owns every active exchange stream and fans each one out to its subscribers. One instance per
/// `RestClient`/environment.
pub struct StreamMultiplexer {
    rest: Arc<RestClient>,
    ws_base: &'static str,
    order_book: TopicRegistry<OrderBookUpdate>,
    trades: TopicRegistry<TradeUpdate>,
    mark_price: TopicRegistry<MarkPriceUpdate>,
    account: TopicRegistry<AccountUpdate>,
}

impl StreamMultiplexer {
    pub fn new(rest: Arc<RestClient>, ws_base: &'static str) -> Self {
        Self {
            rest,
            ws_base,
            order_book: TopicRegistry::new(),
            trades: TopicRegistry::new(),
            mark_price: TopicRegistry::new(),
            account: TopicRegistry::new(),
        }
    }

    pub fn subscribe_order_book(&self, symbol: &str) -> (mpsc::Receiver<OrderBookUpdate>, SubscriptionHandle) {
        let stream_key = format!("{}@depth", symbol.to_lowercase());
        let url = format!("{}/{}", self.ws_base, stream_key);
        let (rx, id) = self
            .order_book
            .subscribe(stream_key.clone(), url, |text| {
                serde_json::from_str(text).ok().and_then(|v| parse_order_book_update(&v).ok())
            });
        (
            rx,
            SubscriptionHandle {
                topic: Topic::OrderBook,
                stream_key,
                subscriber_id: id,
            },
        )
    }

    pub fn subscribe_trades(&self, symbol: &str) -> (mpsc::Receiver<TradeUpdate>, SubscriptionHandle) {
        let stream_key = format!("{}@aggTrade", symbol.to_lowercase());
        let url = format!("{}/{}", self.ws_base, stream_key);
        let (rx, id) = self
            .trades
            .subscribe(stream_key.clone(), url, |text| {
                serde_json::from_str(text).ok().and_then(|v| parse_trade_update(&v).ok())
            });
        (
            rx,
            SubscriptionHandle {
                topic: Topic::Trades,
                stream_key,
                subscriber_id: id,
            },
        )
    }

    pub fn subscribe_mark_price(&self, symbol: &str) -> (mpsc::Receiver<MarkPriceUpdate>, SubscriptionHandle) {
        let stream_key = format!("{}@markPrice", symbol.to_lowercase());
        let url = format!("{}/{}", self.ws_base, stream_key);
        let (rx, id) = self
            .mark_price
            .subscribe(stream_key.clone(), url, |text| {
                serde_json::from_str(text).ok().and_then(|v| parse_mark_price_update(&v).ok())
            });
        (
            rx,
            SubscriptionHandle {
                topic: Topic::MarkPrice,
                stream_key,
                subscriber_id: id,
            },
        )
    }

    /// Also spawns a periodic `listenKey` refresh task: the subscription's own cancellation is
    /// reused to stop the refresh loop once the last subscriber goes away.
    pub fn subscribe_account(&self, listen_key: &str) -> (mpsc::Receiver<AccountUpdate>, SubscriptionHandle) {
        let stream_key = listen_key.to_string();
        let url = format!("{}/{}", self.ws_base, stream_key);
        let is_new_stream = !self.account.streams.contains_key(&stream_key);
        let (rx, id) = self.account.subscribe(stream_key.clone(), url, |text| {
            serde_json::from_str(text).ok().and_then(|v| parse_account_update(&v).ok()).flatten()
        });

        if is_new_stream {
            if let Some(state) = self.account.streams.get(&stream_key) {
                let rest = self.rest.clone();
                let cancel = state.cancel.clone();
                tokio::spawn(refresh_listen_key_periodically(rest, cancel));
            }
        }

        (
            rx,
            SubscriptionHandle {
                topic: Topic::Account,
                stream_key,
                subscriber_id: id,
            },
        )
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        match handle.topic {
            Topic::OrderBook => self.order_book.unsubscribe(&handle.stream_key, handle.subscriber_id),
            Topic::Trades => self.trades.unsubscribe(&handle.stream_key, handle.subscriber_id),
            Topic::MarkPrice => self.mark_price.unsubscribe(&handle.stream_key, handle.subscriber_id),
            Topic::Account => self.account.unsubscribe(&handle.stream_key, handle.subscriber_id),
        }
    }
}

async fn refresh_listen_key_periodically(rest: Arc<RestClient>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(LISTEN_KEY_REFRESH_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }
        if let Err(err) = rest.refresh_listen_key(&cancel).await {
            log::warn!(target: "gateway::stream", "listen key refresh failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::testing::FakeTransport;
    use domain::{Credentials, Environment};

    #[test]
    fn stream_key_is_lowercased_and_namespaced() {
        let stream_key = format!("{}@depth", "BTCUSDT".to_lowercase());
        assert_eq!(stream_key, "btcusdt@depth");
    }

    fn multiplexer() -> StreamMultiplexer {
        let credentials = Credentials::new("key", "secret", Environment::Testnet);
        let rest = Arc::new(RestClient::with_transport(
            GatewayConfig::new(credentials),
            Arc::new(FakeTransport::new()),
        ));
        StreamMultiplexer::new(rest, "ws://127.0.0.1:1")
    }

    #[tokio::test]
    async fn second_subscriber_joins_the_existing_stream_without_a_new_connection() {
        let mux = multiplexer();
        let (_rx1, _handle1) = mux.subscribe_order_book("BTCUSDT");
        let (_rx2, _handle2) = mux.subscribe_order_book("BTCUSDT");

        assert_eq!(mux.order_book.streams.len(), 1, "one shared stream per topic+symbol");
        let state = mux.order_book.streams.get("btcusdt@depth").unwrap();
        assert_eq!(state.subscribers.read().len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_tears_down_the_stream_only_once_the_last_subscriber_leaves() {
        let mux = multiplexer();
        let (_rx1, handle1) = mux.subscribe_order_book("BTCUSDT");
        let (_rx2, handle2) = mux.subscribe_order_book("BTCUSDT");

        mux.unsubscribe(handle1);
        assert!(
            mux.order_book.streams.contains_key("btcusdt@depth"),
            "stream survives while a subscriber remains"
        );

        mux.unsubscribe(handle2);
        assert!(
            !mux.order_book.streams.contains_key("btcusdt@depth"),
            "last subscriber leaving must tear the stream down"
        );
    }

    #[tokio::test]
    async fn independent_symbols_get_independent_streams() {
        let mux = multiplexer();
        let (_rx1, _handle1) = mux.subscribe_order_book("BTCUSDT");
        let (_rx2, _handle2) = mux.subscribe_trades("BTCUSDT");

        assert_eq!(mux.order_book.streams.len(), 1);
        assert_eq!(mux.trades.streams.len(), 1);
    }
}
