use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::ConnectivityConfig;
use crate::error::Result;

/// Point-in-time network availability check.
///
/// Consulted before each classification attempt and before a queue drain;
/// nothing watches it continuously.
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// True when the device has network access
    async fn is_online(&self) -> bool;
}

/// Connectivity check described by `config`: an [`HttpCheck`] on the check
/// URL, or an always-online flag when the check is disabled
pub fn from_config(config: &ConnectivityConfig) -> Result<Arc<dyn Connectivity>> {
    let check_url = config.check_url.trim();
    if check_url.is_empty() {
        debug!("Connectivity checks disabled, assuming online");
        return Ok(Arc::new(StaticConnectivity::new(true)));
    }
    Ok(Arc::new(HttpCheck::new(check_url, Duration::from_secs(config.timeout_secs))?))
}

/// Connectivity flag set by the host
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    /// Flag starting at `online`
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Change the flag
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Checks reachability with a HEAD request. Any HTTP answer, whatever its
/// status, counts as online.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    client: Client,
    url: String,
}

impl HttpCheck {
    /// Check `url` with the given timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Connectivity for HttpCheck {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Connectivity check answered");
                true
            },
            Err(e) => {
                debug!(url = %self.url, error = %e, "Connectivity check failed");
                false
            },
        }
    }
}
