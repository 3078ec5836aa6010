use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{select, sync::mpsc};
use tracing::{debug, info, warn};

pub type ClientId = u64;

/// How many pending broadcasts the hub buffers before submitting producers
/// have to wait.
pub const BROADCAST_CAPACITY: usize = 2048;

/// A registered connection as the hub sees it: an identity plus the bounded
/// queue its outbound task drains.
pub struct Client {
    pub id: ClientId,
    pub outbound: mpsc::Sender<String>,
}

/// Single dispatcher owning the registry of connected clients.
///
/// All registry mutation happens on the task running [`Hub::run`]; every
/// other task expresses intent through a [`HubHandle`]. Processing one event
/// at a time gives a total order over registrations, removals, and fan-outs
/// without any locking.
pub struct Hub {
    registry: HashMap<ClientId, mpsc::Sender<String>>,
    register_rx: mpsc::UnboundedReceiver<Client>,
    unregister_rx: mpsc::UnboundedReceiver<ClientId>,
    broadcast_rx: mpsc::Receiver<String>,
}

/// Cloneable front door to the hub dispatcher.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Client>,
    unregister_tx: mpsc::UnboundedSender<ClientId>,
    broadcast_tx: mpsc::Sender<String>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);

        let hub = Self {
            registry: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };

        (hub, handle)
    }

    /// Dispatcher loop. Runs until every handle has been dropped.
    pub async fn run(mut self) {
        loop {
            select! {
                Some(client) = self.register_rx.recv() => self.register(client),
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(message) = self.broadcast_rx.recv() => self.dispatch(message),
                else => break,
            }
        }
        info!("hub dispatcher stopped");
    }

    fn register(&mut self, client: Client) {
        debug!(client = client.id, "client registered");
        self.registry.insert(client.id, client.outbound);
    }

    /// Removing the entry drops the queue sender; the client's outbound task
    /// observes the closed queue and tears the connection down. A client
    /// that is already gone is a no-op, which is what makes redundant
    /// unregister requests harmless.
    fn unregister(&mut self, id: ClientId) {
        if self.registry.remove(&id).is_some() {
            debug!(client = id, "client unregistered");
        }
    }

    /// Fans one message out to every registered client without waiting on
    /// any of them. A full queue means the client is not draining fast
    /// enough to keep up; it is evicted on the spot so one slow reader can
    /// never stall the rest.
    fn dispatch(&mut self, message: String) {
        self.registry.retain(|id, outbound| {
            match outbound.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = id, "outbound queue full, evicting slow consumer");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Outbound task already exited (write failure); drop the
                    // stale entry.
                    debug!(client = id, "outbound queue gone, dropping entry");
                    false
                }
            }
        });
    }
}

impl HubHandle {
    /// Hands a client's outbound queue to the hub and returns the identity
    /// to use for the matching unregister. Never fails; if the dispatcher is
    /// gone the session discovers that through its closed queue.
    pub fn register(&self, outbound: mpsc::Sender<String>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.register_tx.send(Client { id, outbound }).is_err() {
            debug!(client = id, "hub dispatcher is gone, registration dropped");
        }
        id
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.unregister_tx.send(id);
    }

    /// Submits one message for fan-out. Waiting here while the hub intake is
    /// full is the intended throttle on fast producers, not a failure.
    pub async fn broadcast(&self, message: String) {
        if self.broadcast_tx.send(message).await.is_err() {
            debug!("hub dispatcher is gone, message dropped");
        }
    }
}
