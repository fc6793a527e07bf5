//! Online/offline tracking.
//!
//! Platform hooks call [`Connectivity::set_online`] directly; hosts without
//! such hooks run [`spawn_probe`] to poll a [`ConnectivityProbe`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::remote::RemoteResult;
use super::wait_for_shutdown;

/// Shared online flag with change notification
#[derive(Clone)]
pub struct Connectivity {
    online: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            online: Arc::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record the current reachability; subscribers only wake on a change
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Connectivity {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Connectivity")
            .field("online", &self.is_online())
            .finish()
    }
}

/// One reachability check
pub trait ConnectivityProbe: Send + Sync + 'static {
    fn check(&self) -> impl Future<Output = bool> + Send;
}

/// Probe that treats any HTTP response from `url` as online
///
/// Only transport failures (DNS, connect, timeout) count as offline; a 401
/// or 404 still proves the network path works.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        Ok(Self {
            url: url.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
        }
    }
}

/// Poll `probe` every `interval` until `shutdown` fires
pub fn spawn_probe<P: ConnectivityProbe>(
    connectivity: Connectivity,
    probe: P,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let online = probe.check().await;
                    connectivity.set_online(online);
                }
            }
        }
        tracing::debug!("Connectivity probe stopped");
    })
}
