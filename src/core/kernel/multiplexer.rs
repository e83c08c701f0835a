use crate::core::config::DebugFilter;
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{self, EnvelopeKind, Frame};
use crate::core::kernel::ws::EphemeralStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Value>,
    /// One-shot waiters are removed after the first delivery.
    once: bool,
}

#[derive(Default)]
struct MuxState {
    /// Latest body observed per envelope kind. A late consumer reads the
    /// current state instead of waiting for the next push.
    cache: HashMap<EnvelopeKind, Value>,
    subscribers: HashMap<EnvelopeKind, Vec<Subscriber>>,
    shutdown: Option<oneshot::Sender<()>>,
}

struct Inner {
    state: Mutex<MuxState>,
    connected: AtomicBool,
    next_id: AtomicU64,
    debug: DebugFilter,
}

impl Inner {
    /// Cache-then-fanout, in that order: a subscriber woken by an envelope
    /// always finds the cache at least as fresh as what woke it.
    fn handle_frame(&self, frame: Frame) {
        let envelope = match frame {
            Frame::Envelope(envelope) => envelope,
            Frame::Control(_) => return,
        };
        if self.debug.should_log(envelope.kind.as_wire()) {
            debug!(kind = %envelope.kind, body = %envelope.body, "mux envelope");
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .cache
            .insert(envelope.kind.clone(), envelope.body.clone());
        if let Some(subscribers) = state.subscribers.get_mut(&envelope.kind) {
            subscribers.retain(|subscriber| {
                let delivered = subscriber.tx.send(envelope.body.clone()).is_ok();
                delivered && !subscriber.once
            });
        }
    }

    fn remove_subscriber(&self, kind: &EnvelopeKind, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subscribers) = state.subscribers.get_mut(kind) {
            subscribers.retain(|subscriber| subscriber.id != id);
        }
    }
}

/// Fans a single duplex stream out to any number of consumers, keyed by
/// envelope kind, with a last-value cache. Cheap to clone; all clones share
/// the same connection and state.
#[derive(Clone)]
pub struct StreamMultiplexer {
    inner: Arc<Inner>,
}

impl StreamMultiplexer {
    pub fn new(debug: DebugFilter) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MuxState::default()),
                connected: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                debug,
            }),
        }
    }

    /// Attach a persistent stream connection and start routing its frames.
    /// Resolves as soon as the transport handshake completes; envelopes
    /// arrive in the background from then on.
    #[instrument(skip(self, cookie_header), fields(url = %url))]
    pub async fn connect(
        &self,
        url: &str,
        cookie_header: &str,
        connect_timeout: Duration,
    ) -> Result<(), DxtradeError> {
        let mut stream =
            EphemeralStream::open(url, cookie_header, connect_timeout, self.inner.debug.clone())
                .await?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = state.shutdown.replace(shutdown_tx) {
                let _ = previous.send(());
            }
        }
        self.inner.connected.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        stream.close().await;
                        break;
                    }
                    frame = stream.next_frame() => match frame {
                        Some(Ok(frame)) => inner.handle_frame(frame),
                        Some(Err(error)) => {
                            warn!(%error, "stream error, stopping router");
                            break;
                        }
                        None => {
                            debug!("stream closed by gateway");
                            break;
                        }
                    }
                }
            }
            inner.connected.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Route one raw frame through the cache and subscriber registry.
    /// Exposed for driving the multiplexer without a live connection.
    pub fn handle_raw(&self, raw: &str) {
        self.inner.handle_frame(codec::decode_frame(raw));
    }

    /// Latest cached body for the kind, if any envelope of that kind has
    /// been observed since the last `close`.
    pub fn get_cached(&self, kind: &EnvelopeKind) -> Option<Value> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cache.get(kind).cloned()
    }

    /// Resolve with the cached body if one exists, otherwise with the body
    /// of the next envelope of this kind, or error after `timeout`. The
    /// one-shot listener is removed on every exit path; a frame arriving
    /// after the timeout cannot resolve an abandoned wait.
    pub async fn wait_for(
        &self,
        kind: EnvelopeKind,
        timeout: Duration,
    ) -> Result<Value, DxtradeError> {
        let (id, mut rx) = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = state.cache.get(&kind) {
                return Ok(cached.clone());
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::unbounded_channel();
            state
                .subscribers
                .entry(kind.clone())
                .or_default()
                .push(Subscriber {
                    id,
                    tx,
                    once: true,
                });
            (id, rx)
        };

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(body)) => Ok(body),
            Ok(None) => {
                // Channel dropped without delivery: registry was cleared.
                Err(DxtradeError::Timeout(format!("wait for {kind}")))
            }
            Err(_) => {
                self.inner.remove_subscriber(&kind, id);
                Err(DxtradeError::Timeout(format!("wait for {kind}")))
            }
        }
    }

    /// Durable subscription to every envelope of the kind. Dropping the
    /// returned handle unregisters it.
    pub fn subscribe(&self, kind: EnvelopeKind) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .subscribers
                .entry(kind.clone())
                .or_default()
                .push(Subscriber {
                    id,
                    tx,
                    once: false,
                });
        }
        Subscription {
            id,
            kind,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop routing and clear all state. Idempotent; pending waits observe
    /// their channels closing and error out.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(());
        }
        state.cache.clear();
        state.subscribers.clear();
        drop(state);
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

/// Handle for a durable subscription; unregisters itself on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EnvelopeKind,
    rx: mpsc::UnboundedReceiver<Value>,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Next envelope body for the subscribed kind. `None` after the
    /// multiplexer closes.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn kind(&self) -> &EnvelopeKind {
        &self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_subscriber(&self.kind, self.id);
        }
    }
}
