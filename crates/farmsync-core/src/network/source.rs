use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Where connectivity observations come from.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// `Some(online)`, or `None` when the platform cannot tell.
    async fn check(&self) -> Option<bool>;
}

/// Reports a fixed, externally settable answer. Used when the host platform
/// pushes connectivity changes itself, and in tests.
#[derive(Debug, Default)]
pub struct StaticSource {
    state: Mutex<Option<bool>>,
}

impl StaticSource {
    pub fn new(online: bool) -> Self {
        Self {
            state: Mutex::new(Some(online)),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, state: Option<bool>) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

#[async_trait]
impl ConnectivitySource for StaticSource {
    async fn check(&self) -> Option<bool> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Treats "a TCP connection to the API host succeeds within `timeout`" as
/// online.
#[derive(Debug, Clone)]
pub struct ProbeSource {
    addr: String,
    timeout: Duration,
}

impl ProbeSource {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Probe the host and port of `api_base`. Returns `None` for URLs without
    /// a host.
    pub fn for_api_base(api_base: &str, timeout: Duration) -> Option<Self> {
        let url = reqwest::Url::parse(api_base).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port), timeout))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ConnectivitySource for ProbeSource {
    async fn check(&self) -> Option<bool> {
        let online = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        );
        debug!(addr = %self.addr, online, "Connectivity probe");
        Some(online)
    }
}
