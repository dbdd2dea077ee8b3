//! Device factory with cached instances.
//!
//! Devices are cached by name together with a fingerprint of the
//! configuration they were built from. A cached device is reused only when
//! the requested configuration is identical; otherwise a new one replaces it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::client::ServerCheckMethod;
use log::debug;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::config::DeviceConfig;
use crate::connection::{Connection, SshConnection};
use crate::device::DeviceStateGraph;
use crate::error::ConnectError;
use crate::navigator::Device;

/// Process-wide device manager.
pub static MANAGER: Lazy<DeviceManager> = Lazy::new(DeviceManager::new);

type Fingerprint = [u8; 32];

pub struct DeviceManager {
    cache: Cache<String, (Arc<Device>, Fingerprint)>,
}

fn fingerprint(config: &DeviceConfig) -> Result<Fingerprint, ConnectError> {
    let mut hasher = Sha256::new();
    hasher.update(config.to_json()?.as_bytes());
    Ok(hasher.finalize().into())
}

impl DeviceManager {
    pub fn new() -> Self {
        // Evict devices nobody asked for in the last 5 minutes.
        let cache = Cache::builder()
            .max_capacity(100)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();

        Self { cache }
    }

    /// Returns the cached device for `config` or builds one on `connection`.
    ///
    /// `connection` is dropped when a cached device is reused.
    pub async fn get(
        &self,
        config: &DeviceConfig,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<Device>, ConnectError> {
        self.get_with(config, move || async move { Ok(connection) }).await
    }

    /// Returns the cached device for `config`, opening an SSH shell only when
    /// a new device is needed.
    pub async fn get_ssh(
        &self,
        config: &DeviceConfig,
        user: &str,
        addr: &str,
        port: u16,
        password: &str,
    ) -> Result<Arc<Device>, ConnectError> {
        self.get_with(config, move || async move {
            let connection: Arc<dyn Connection> =
                SshConnection::connect(user, addr, port, password, ServerCheckMethod::NoCheck).await?;
            Ok(connection)
        })
        .await
    }

    /// Returns the cached device for `config` or builds one on the connection
    /// returned by `connect`, then detects its initial state.
    pub async fn get_with<F, Fut>(&self, config: &DeviceConfig, connect: F) -> Result<Arc<Device>, ConnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Connection>, ConnectError>>,
    {
        let fingerprint = fingerprint(config)?;

        if let Some((device, cached)) = self.cache.get(&config.name).await {
            if cached == fingerprint {
                debug!("Cache hit, reusing device {}", config.name);
                return Ok(device);
            }
            debug!("Cached config of {} changed, recreating", config.name);
            self.cache.invalidate(&config.name).await;
        } else {
            debug!("Cache miss, creating device {}...", config.name);
        }

        let graph = DeviceStateGraph::new(config.resolve_topology()?)?;
        let connection = connect().await?;
        let device = Arc::new(Device::new(config.name.clone(), graph, connection));
        device.establish(None).await?;

        self.cache
            .insert(config.name.clone(), (device.clone(), fingerprint))
            .await;
        debug!("Device {} has been cached.", config.name);
        Ok(device)
    }

    /// Cached device by name, without building anything.
    pub async fn cached(&self, name: &str) -> Option<Arc<Device>> {
        self.cache.get(name).await.map(|(device, _)| device)
    }

    pub async fn remove(&self, name: &str) {
        self.cache.invalidate(name).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
