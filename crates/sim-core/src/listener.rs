//! Listener registry and synchronous message delivery.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::message::{Message, SimulationDetail};

/// Receives simulation messages.
///
/// Delivery is synchronous on the sending thread. Implementations must not
/// block for long; the run loop waits for every listener before continuing.
pub trait SimulationListener: Send + Sync {
    /// Handles one message.
    fn on_message(&self, message: &Message);
}

impl<F> SimulationListener for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message);
    }
}

/// Ordered set of listeners.
///
/// Listeners may register or unregister while a message is being delivered;
/// each send works on a snapshot of the registry taken before delivery.
#[derive(Default)]
pub struct ListenerBus {
    listeners: RwLock<Vec<Arc<dyn SimulationListener>>>,
}

impl std::fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBus")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener`; it receives every later message in send order.
    pub fn register(&self, listener: Arc<dyn SimulationListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes `listener` (matched by identity). Returns false when it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn SimulationListener>) -> bool {
        let target = Arc::as_ptr(listener).cast::<()>();
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|candidate| Arc::as_ptr(candidate).cast::<()>() != target);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// True when nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `message` to every listener in registration order.
    pub fn send(&self, message: &Message) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_message(message);
        }
    }
}

/// Listener that records every message it sees.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Mutex<Vec<Message>>,
}

impl MessageLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the messages recorded so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// Drains the recorded messages.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl SimulationListener for MessageLog {
    fn on_message(&self, message: &Message) {
        self.messages.lock().push(message.clone());
    }
}

/// Listener that forwards messages into an `mpsc` channel.
///
/// Messages sent after the receiver is dropped are discarded.
#[derive(Debug)]
pub struct ChannelListener {
    sender: Mutex<Sender<Message>>,
}

impl ChannelListener {
    /// Wraps `sender`.
    #[must_use]
    pub const fn new(sender: Sender<Message>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl SimulationListener for ChannelListener {
    fn on_message(&self, message: &Message) {
        if self.sender.lock().send(message.clone()).is_err() {
            trace!("channel listener receiver dropped");
        }
    }
}

/// Listener that mirrors messages into `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl SimulationListener for TracingListener {
    fn on_message(&self, message: &Message) {
        match message {
            Message::Simulation(detail) => match detail {
                SimulationDetail::Started | SimulationDetail::Stopped => {
                    info!(?detail, "simulation");
                }
                _ => debug!(?detail, "simulation"),
            },
            Message::Problem { message, fault } => {
                warn!(class = ?fault.as_ref().map(crate::Fault::class), "{message}");
            }
            Message::Annotation { address, .. } => debug!(?address, "annotation reached"),
            Message::ExecuteStatement { address } => trace!(%address, "execute"),
            Message::RegisterChanged { register, value } => {
                trace!(%register, %value, "register changed");
            }
            other => trace!(message = ?other),
        }
    }
}
