//! Transport boundary.
//!
//! Observers only need to write text and to be told about incoming chunks, so
//! a transport is a [`Connection`]: a writer plus the [`NotificationBus`] it
//! publishes received data on.

use crate::config::DEFAULT_NEWLINE;
use crate::error::ConnectError;
use crate::publisher::NotificationBus;

mod memory;
mod ssh;

pub use memory::{FifoConnection, Responder};
pub use ssh::SshConnection;

pub trait Connection: Send + Sync {
    fn name(&self) -> &str;

    /// Bus receiving every chunk read from the device.
    fn bus(&self) -> &NotificationBus<str>;

    /// Writes raw data.
    fn send(&self, data: &str) -> Result<(), ConnectError>;

    fn newline(&self) -> &str {
        DEFAULT_NEWLINE
    }

    /// Writes `line` followed by [`Connection::newline`].
    fn sendline(&self, line: &str) -> Result<(), ConnectError> {
        self.send(&format!("{line}{}", self.newline()))
    }
}
