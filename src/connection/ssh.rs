use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace};
use russh::ChannelMsg;
use tokio::sync::mpsc;

use super::Connection;
use crate::error::ConnectError;
use crate::publisher::NotificationBus;

/// Interactive SSH shell exposed as a [`Connection`].
///
/// An I/O task owns the channel: it writes queued data and publishes every
/// received chunk on the bus. There is no reconnect; once the shell ends,
/// writes fail with [`ConnectError::ConnectClosedError`].
pub struct SshConnection {
    name: String,
    client: Client,
    sender: mpsc::UnboundedSender<String>,
    bus: Arc<NotificationBus<str>>,
    alive: Arc<AtomicBool>,
}

impl SshConnection {
    /// Opens a pty shell on `user@addr:port` with password authentication.
    ///
    /// Subscribe observers before writing: output received before any
    /// subscription exists is dropped.
    pub async fn connect(
        user: &str,
        addr: &str,
        port: u16,
        password: &str,
        server_check: ServerCheckMethod,
    ) -> Result<Arc<Self>, ConnectError> {
        let device_addr = format!("{user}@{addr}:{port}");

        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (addr.to_string(), port),
            user,
            AuthMethod::with_password(password),
            server_check,
            config,
        )
        .await?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let bus = Arc::new(NotificationBus::new(device_addr.clone()));
        let alive = Arc::new(AtomicBool::new(true));

        let io_bus = bus.clone();
        let io_alive = alive.clone();
        let io_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut undecoded = Vec::new();
            loop {
                tokio::select! {
                    Some(data) = receiver.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let chunk = take_utf8(&mut undecoded, data);
                                if !chunk.is_empty() {
                                    trace!("{} received {:?}", io_device_addr, chunk);
                                    io_bus.notify(chunk.as_str());
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            io_alive.store(false, Ordering::SeqCst);
            debug!("{} SSH I/O task ended.", io_device_addr);
        });

        Ok(Arc::new(Self {
            name: device_addr,
            client,
            sender,
            bus,
            alive,
        }))
    }

    /// Checks if the shell and the underlying SSH connection are still active.
    pub fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.client.is_closed()
    }

    /// Asks the remote shell to exit.
    pub async fn close(&self) -> Result<(), ConnectError> {
        debug!("Safely closing SSH connection {}", self.name);
        if self.is_connected() {
            if let Err(e) = self.sender.send("exit\n".to_string()) {
                debug!("Failed to send exit command: {:?}", e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Connection for SshConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn bus(&self) -> &NotificationBus<str> {
        &self.bus
    }

    fn send(&self, data: &str) -> Result<(), ConnectError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ConnectError::ConnectClosedError);
        }
        self.sender.send(data.to_string())?;
        Ok(())
    }
}

/// Appends `data` to `pending` and returns the decodable part as text.
///
/// A multi-byte character cut at the end of a packet stays in `pending` until
/// the next packet completes it. Invalid sequences elsewhere become U+FFFD.
fn take_utf8(pending: &mut Vec<u8>, data: &[u8]) -> String {
    pending.extend_from_slice(data);
    let mut checked = 0;
    let cut = loop {
        match std::str::from_utf8(&pending[checked..]) {
            Ok(_) => break pending.len(),
            Err(err) => match err.error_len() {
                Some(invalid) => checked += err.valid_up_to() + invalid,
                None => break checked + err.valid_up_to(),
            },
        }
    };
    let tail = pending.split_off(cut);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = tail;
    text
}
