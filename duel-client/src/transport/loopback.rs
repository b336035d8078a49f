//! In-process broadcast transport.
//!
//! A [`LoopbackHub`] stands in for the realtime backend: one tokio broadcast
//! channel per room channel name, shared by every transport created from the
//! hub. The hub can drop frames at random, go offline and close a channel
//! outright, which is how the simulator and the integration tests exercise
//! the repair paths.

use super::{Transport, TransportError};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

/// Frames buffered per channel before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct Channel {
    tx: broadcast::Sender<Vec<u8>>,
    shut: Arc<watch::Sender<bool>>,
}

struct HubInner {
    channels: Mutex<HashMap<String, Channel>>,
    drop_rate: Mutex<f64>,
    rng: Mutex<StdRng>,
    online: watch::Sender<bool>,
}

/// Shared in-memory backend.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Lossless hub.
    pub fn new() -> Self {
        Self::with_drop_rate(0.0, 0)
    }

    /// Hub that silently drops each frame with probability `drop_rate`.
    pub fn with_drop_rate(drop_rate: f64, seed: u64) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            inner: Arc::new(HubInner {
                channels: Mutex::new(HashMap::new()),
                drop_rate: Mutex::new(drop_rate.clamp(0.0, 1.0)),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                online,
            }),
        }
    }

    /// Create a transport attached to this hub.
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            hub: self.clone(),
            link: Mutex::new(None),
        }
    }

    /// Change the loss probability.
    pub fn set_drop_rate(&self, drop_rate: f64) {
        *locked(&self.inner.drop_rate) = drop_rate.clamp(0.0, 1.0);
    }

    /// Take the backend down or bring it back.
    ///
    /// Going offline ends every live subscription and makes new ones fail.
    pub fn set_online(&self, online: bool) {
        debug!(online, "loopback hub availability changed");
        self.inner.online.send_replace(online);
    }

    /// Whether the backend accepts subscriptions.
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Close a channel under its subscribers.
    ///
    /// Live links fail with [`TransportError::ChannelClosed`]; a later
    /// `connect` opens a fresh channel of the same name.
    pub fn close_channel(&self, name: &str) {
        if let Some(channel) = locked(&self.inner.channels).remove(name) {
            debug!(channel = name, "loopback channel closed");
            channel.shut.send_replace(true);
        }
    }

    /// Subscribers currently attached to a channel.
    pub fn subscribers(&self, channel: &str) -> usize {
        locked(&self.inner.channels)
            .get(channel)
            .map(|channel| channel.tx.receiver_count())
            .unwrap_or(0)
    }

    fn should_drop(&self) -> bool {
        let rate = *locked(&self.inner.drop_rate);
        rate > 0.0 && locked(&self.inner.rng).gen_bool(rate)
    }

    fn channel(&self, name: &str) -> Channel {
        locked(&self.inner.channels)
            .entry(name.to_string())
            .or_insert_with(|| Channel {
                tx: broadcast::channel(CHANNEL_CAPACITY).0,
                shut: Arc::new(watch::channel(false).0),
            })
            .clone()
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct Link {
    channel: String,
    tx: broadcast::Sender<Vec<u8>>,
    rx: Arc<tokio::sync::Mutex<broadcast::Receiver<Vec<u8>>>>,
    closed: Arc<watch::Sender<bool>>,
    shut: Arc<watch::Sender<bool>>,
}

/// One subscriber on a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: LoopbackHub,
    link: Mutex<Option<Link>>,
}

impl LoopbackTransport {
    fn current(&self) -> Result<Link, TransportError> {
        locked(&self.link).clone().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, channel: &str) -> Result<(), TransportError> {
        if !self.hub.is_online() {
            return Err(TransportError::ConnectionFailed("backend offline".into()));
        }

        let Channel { tx, shut } = self.hub.channel(channel);
        let rx = tx.subscribe();
        let (closed, _) = watch::channel(false);
        let link = Link {
            channel: channel.to_string(),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            closed: Arc::new(closed),
            shut,
        };

        if let Some(old) = locked(&self.link).replace(link) {
            old.closed.send_replace(true);
        }
        debug!(channel, "loopback subscribed");
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let link = self.current()?;
        if *link.shut.borrow() {
            return Err(TransportError::ChannelClosed);
        }
        if !self.hub.is_online() || *link.closed.borrow() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.hub.should_drop() {
            trace!(channel = %link.channel, bytes = data.len(), "loopback dropped frame");
            return Ok(());
        }
        // No receivers is not an error for a broadcast.
        let _ = link.tx.send(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let link = self.current()?;
        let mut online = self.hub.inner.online.subscribe();
        let mut closed = link.closed.subscribe();
        let mut shut = link.shut.subscribe();
        let mut rx = link.rx.lock().await;

        loop {
            if *shut.borrow_and_update() {
                return Err(TransportError::ChannelClosed);
            }
            if !*online.borrow_and_update() || *closed.borrow_and_update() {
                return Err(TransportError::ConnectionClosed);
            }
            tokio::select! {
                frame = rx.recv() => match frame {
                    Ok(bytes) => return Ok(bytes),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %link.channel, skipped, "loopback receiver lagged");
                    }
                    Err(RecvError::Closed) => return Err(TransportError::ConnectionClosed),
                },
                changed = online.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::ConnectionClosed);
                    }
                }
                changed = closed.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::ConnectionClosed);
                    }
                }
                changed = shut.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::ChannelClosed);
                    }
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        match locked(&self.link).as_ref() {
            Some(link) => self.hub.is_online() && !*link.closed.borrow() && !*link.shut.borrow(),
            None => false,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(link) = locked(&self.link).take() {
            link.closed.send_replace(true);
            debug!(channel = %link.channel, "loopback unsubscribed");
        }
        Ok(())
    }
}
