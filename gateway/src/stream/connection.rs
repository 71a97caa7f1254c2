//! Single websocket connection with scheduled rotation and close-code-aware backoff.
//!
//! One supervisor loop owns reconnection itself: split sink/reader, a heartbeat task, and message
//! dispatch to a typed parser, with no separate reconnect-orchestration actor above it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::Message;

use support::time::{exponential_backoff, jitter_around};
use support::CancellationToken;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
const ROTATION_INTERVAL: Duration = Duration::from_secs(23 * 3600 + 50 * 60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const SUBSCRIBER_QUEUE_WARNING: &str = "subscriber_channel_full";

pub struct Subscriber<T> {
    pub id: u64,
    pub sender: tokio::sync::mpsc::Sender<T>,
}

/// Why a connection attempt or an established session ended, used to pick the next backoff.
enum Outcome {
    ConnectFailed { status: Option<u16> },
    Closed { code: Option<u16> },
    Rotated,
    ReadError,
}

fn next_delay(outcome: &Outcome, attempt: u32) -> Duration {
    match outcome {
        Outcome::Closed { code: Some(1008) } => Duration::from_secs(120),
        Outcome::ConnectFailed { status: Some(429) } => Duration::from_secs(300),
        Outcome::ConnectFailed {
            status: Some(500..=599),
        } => Duration::from_secs(30),
        Outcome::Rotated => Duration::ZERO,
        _ => jitter_around(exponential_backoff(BACKOFF_BASE, attempt, BACKOFF_MAX), 0.15),
    }
}

fn broadcast<T: Clone>(subscribers: &RwLock<Vec<Subscriber<T>>>, update: T, label: &str) {
    let subscribers = subscribers.read();
    for subscriber in subscribers.iter() {
        if subscriber.sender.try_send(update.clone()).is_err() {
            log::warn!(
                target: "gateway::stream",
                "{SUBSCRIBER_QUEUE_WARNING}: stream={label} subscriber={}",
                subscriber.id
            );
        }
    }
}

/// Supervises one stream's websocket for as long as it has subscribers. Exits only when
/// `cancel` fires, which the multiplexer does once the subscriber set empties.
pub async fn supervise<T, P>(
    url: String,
    label: String,
    parser: P,
    subscribers: Arc<RwLock<Vec<Subscriber<T>>>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + 'static,
    P: Fn(&str) -> Option<T> + Send + Sync + 'static,
{
    let mut attempt: u32 = 0;

    while !cancel.is_cancelled() {
        let connect = tokio::select! {
            result = tokio_tungstenite::connect_async(&url) => result,
            _ = cancel.cancelled() => return,
        };

        let stream = match connect {
            Ok((stream, _response)) => stream,
            Err(err) => {
                log::warn!(target: "gateway::stream", "{label} connect failed: {err}");
                let status = connect_failure_status(&err);
                attempt += 1;
                let delay = next_delay(&Outcome::ConnectFailed { status }, attempt);
                sleep_or_cancel(delay, &cancel).await;
                continue;
            }
        };
        log::info!(target: "gateway::stream", "{label} connected");
        attempt = 0;

        let (mut writer, mut reader) = stream.split();
        let rotation = tokio::time::sleep(ROTATION_INTERVAL);
        tokio::pin!(rotation);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = writer.send(Message::Close(None)).await;
                    return;
                }
                _ = &mut rotation => {
                    log::info!(target: "gateway::stream", "{label} rotating connection on schedule");
                    let _ = writer.send(Message::Close(None)).await;
                    break Outcome::Rotated;
                }
                _ = heartbeat.tick() => {
                    if writer.send(Message::Ping(Vec::new())).await.is_err() {
                        break Outcome::ReadError;
                    }
                }
                message = reader.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(update) = parser(&text) {
                                broadcast(&subscribers, update, &label);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = writer.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| f.code.into());
                            break Outcome::Closed { code };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            log::warn!(target: "gateway::stream", "{label} read error: {err}");
                            break Outcome::ReadError;
                        }
                        None => break Outcome::ReadError,
                    }
                }
            }
        };

        attempt = match outcome {
            Outcome::Rotated => 0,
            _ => attempt + 1,
        };
        let delay = next_delay(&outcome, attempt);
        sleep_or_cancel(delay, &cancel).await;
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}

fn connect_failure_status(err: &tokio_tungstenite::tungstenite::Error) -> Option<u16> {
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => Some(response.status().as_u16()),
        _ => None,
    }
}
