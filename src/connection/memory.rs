use std::sync::atomic::{AtomicBool, Ordering};

use log::trace;
use parking_lot::Mutex;

use super::Connection;
use crate::error::ConnectError;
use crate::publisher::NotificationBus;

/// Maps one written payload to the output the simulated device answers with.
pub type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// In-memory loopback transport.
///
/// Every write is recorded. When a responder is installed, its answer is
/// published on the bus before `send` returns, as if the device echoed it at
/// once. A write made from inside a delivery gets its answer queued behind the
/// chunk being delivered.
pub struct FifoConnection {
    name: String,
    bus: NotificationBus<str>,
    sent: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
    closed: AtomicBool,
}

impl FifoConnection {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bus: NotificationBus::new(name.clone()),
            name,
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_responder(
        name: impl Into<String>,
        responder: impl FnMut(&str) -> Option<String> + Send + 'static,
    ) -> Self {
        let connection = Self::new(name);
        connection.set_responder(responder);
        connection
    }

    pub fn set_responder(&self, responder: impl FnMut(&str) -> Option<String> + Send + 'static) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Publishes device output to the subscribers.
    pub fn inject(&self, data: &str) {
        trace!("{}: inject {:?}", self.name, data);
        self.bus.notify(data);
    }

    /// Everything written so far, newlines included.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Further writes fail with [`ConnectError::ConnectClosedError`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for FifoConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn bus(&self) -> &NotificationBus<str> {
        &self.bus
    }

    fn send(&self, data: &str) -> Result<(), ConnectError> {
        if self.is_closed() {
            return Err(ConnectError::ConnectClosedError);
        }
        trace!("{}: send {:?}", self.name, data);
        self.sent.lock().push(data.to_string());

        let answer = self
            .responder
            .lock()
            .as_mut()
            .and_then(|responder| responder(data));
        if let Some(output) = answer {
            self.inject(&output);
        }
        Ok(())
    }
}
