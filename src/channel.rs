// src/channel.rs

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::{
    Mutex as AsyncMutex, mpsc,
    mpsc::{Permit, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ChannelError;

/// What `Conveyer::recv` hands back once a channel is closed and drained.
pub const UNDEFINED: &str = "undefined";

struct Shared {
    name: String,
    capacity: usize,
    // `None` once closed. Every enqueue commits while holding this lock, so
    // taking the slot is the one and only close and nothing lands after it.
    tx: Mutex<Option<mpsc::Sender<String>>>,
    rx: AsyncMutex<mpsc::Receiver<String>>,
    // Fired by `close` to release senders waiting for space and receivers
    // waiting on an empty buffer.
    closing: CancellationToken,
}

/// A named, bounded string channel.
///
/// Cloning is cheap and every clone refers to the same buffer, so any number
/// of stages and external callers may send to or receive from it.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    pub(crate) fn new(name: &str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                capacity,
                tx: Mutex::new(Some(tx)),
                rx: AsyncMutex::new(rx),
                closing: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of free slots, or 0 once closed.
    pub fn available(&self) -> usize {
        self.slot().as_ref().map(|tx| tx.capacity()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    /// True when both handles point at the same underlying buffer.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.shared.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, ChannelError> {
        self.slot().clone().ok_or_else(|| self.closed())
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Closed(self.shared.name.clone())
    }

    /// Enqueue through a reserved slot, unless `close` got there first.
    fn commit(&self, permit: Permit<'_, String>, item: String) -> Result<(), ChannelError> {
        let slot = self.slot();
        if slot.is_none() {
            return Err(self.closed());
        }
        permit.send(item);
        Ok(())
    }

    /// Wait for buffer space, giving up as soon as the channel closes.
    async fn reserve<'a>(
        &self,
        tx: &'a mpsc::Sender<String>,
    ) -> Result<Permit<'a, String>, ChannelError> {
        tokio::select! {
            biased;
            _ = self.shared.closing.cancelled() => Err(self.closed()),
            permit = tx.reserve() => permit.map_err(|_| self.closed()),
        }
    }

    /// Wait for buffer space and enqueue `item`.
    ///
    /// Cancel safe in the sense that dropping the future never enqueues.
    pub async fn send(&self, item: String) -> Result<(), ChannelError> {
        let tx = self.sender()?;
        let permit = self.reserve(&tx).await?;
        self.commit(permit, item)
    }

    /// Enqueue `item` only if there is room right now.
    pub fn try_send(&self, item: String) -> Result<(), ChannelError> {
        let tx = self.sender()?;
        let permit = tx.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => ChannelError::Full(self.shared.name.clone()),
            TrySendError::Closed(()) => self.closed(),
        })?;
        self.commit(permit, item)
    }

    /// Enqueue immediately when possible, otherwise wait at most `timeout`.
    ///
    /// A zero `timeout` turns a saturated buffer into `ChannelError::Full`.
    /// Closing the channel while this waits fails it with
    /// `ChannelError::Closed`.
    pub async fn send_timeout(&self, item: String, timeout: Duration) -> Result<(), ChannelError> {
        let tx = self.sender()?;
        match tx.try_reserve() {
            Ok(permit) => return self.commit(permit, item),
            Err(TrySendError::Closed(())) => return Err(self.closed()),
            Err(TrySendError::Full(())) => {}
        }

        if timeout.is_zero() {
            return Err(ChannelError::Full(self.shared.name.clone()));
        }

        trace!(channel = %self.shared.name, "channel full, waiting for space");
        match tokio::time::timeout(timeout, self.reserve(&tx)).await {
            Ok(permit) => self.commit(permit?, item),
            Err(_) => Err(ChannelError::Timeout {
                name: self.shared.name.clone(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Wait for the next item; `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<String> {
        let mut rx = self.shared.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => item,
            // Nothing can be committed after the close, so whatever is left
            // is already buffered.
            _ = self.shared.closing.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Stop accepting new items. Buffered items stay readable.
    ///
    /// Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        let closed = self.slot().take().is_some();
        if closed {
            self.shared.closing.cancel();
            debug!(channel = %self.shared.name, "channel closed");
        }
        closed
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns every channel of a pipeline, keyed by name.
#[derive(Debug)]
pub struct ChannelRegistry {
    capacity: usize,
    channels: DashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the channel called `name`, creating it on first reference.
    pub fn get_or_create(&self, name: &str) -> Channel {
        if let Some(existing) = self.channels.get(name) {
            return existing.value().clone();
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(channel = %name, capacity = self.capacity, "channel created");
                Channel::new(name, self.capacity)
            })
            .value()
            .clone()
    }

    pub fn lookup(&self, name: &str) -> Result<Channel, ChannelError> {
        self.channels
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Registered channel names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|kv| kv.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Close every channel, returning how many were still open.
    pub fn close_all(&self) -> usize {
        self.channels.iter().filter(|kv| kv.value().close()).count()
    }
}
