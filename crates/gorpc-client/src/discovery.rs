use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use gorpc_common::{Result, RpcError};

/// How `get` picks one server from the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random pick.
    Random,
    /// Cycle through the list; the starting point is randomized per
    /// discovery so processes started together do not align.
    RoundRobin,
}

/// A provider of server addresses for a logical service.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Re-fetches the server list from its source, if it has one.
    async fn refresh(&self) -> Result<()>;

    /// Replaces the server list by hand.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// One address, picked by `mode`.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// A copy of the whole live list.
    async fn get_all(&self) -> Result<Vec<String>>;
}

struct ServerList {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a hand-maintained server list; no registry involved.
pub struct MultiServersDiscovery {
    state: Mutex<ServerList>,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        MultiServersDiscovery {
            state: Mutex::new(ServerList {
                servers,
                // Random starting point for round-robin.
                index: rand::random::<u32>() as usize,
            }),
        }
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.state.lock().await.servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().await;
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => Ok(state.servers[rand::random::<u64>() as usize % n].clone()),
            SelectMode::RoundRobin => {
                let picked = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(picked)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.servers.clone())
    }
}

/// How long a fetched server list stays fresh before `get`/`get_all` go back
/// to the registry.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery backed by a gorpc registry.
///
/// Wraps the static discovery and refreshes its list from the registry's
/// HTTP endpoint whenever the cached copy is older than `update_timeout`.
pub struct RegistryDiscovery {
    inner: MultiServersDiscovery,
    registry_url: String,
    update_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `update_timeout` of zero selects [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry_url: impl Into<String>, update_timeout: Duration) -> Self {
        let update_timeout = if update_timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            update_timeout
        };
        RegistryDiscovery {
            inner: MultiServersDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            update_timeout,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        if let Some(at) = *last_update {
            if at + self.update_timeout > Instant::now() {
                return Ok(());
            }
        }

        debug!(registry = %self.registry_url, "rpc registry: refresh servers from registry");
        let servers: Vec<String> = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?;

        self.inner.update(servers).await?;
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        self.inner.update(servers).await?;
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.inner.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.inner.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_list_has_no_available_servers() {
        let discovery = MultiServersDiscovery::new(vec![]);
        let err = discovery.get(SelectMode::Random).await.unwrap_err();
        assert!(matches!(err, RpcError::NoAvailableServers));
        assert!(discovery.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_robin_cycles_over_all_servers() {
        let servers = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
        let discovery = MultiServersDiscovery::new(servers.clone());

        let mut first_cycle = Vec::new();
        for _ in 0..servers.len() {
            first_cycle.push(discovery.get(SelectMode::RoundRobin).await.unwrap());
        }
        let mut sorted = first_cycle.clone();
        sorted.sort();
        assert_eq!(sorted, servers);

        // The next full cycle repeats the same order.
        for expected in &first_cycle {
            let picked = discovery.get(SelectMode::RoundRobin).await.unwrap();
            assert_eq!(&picked, expected);
        }
    }

    #[tokio::test]
    async fn test_random_pick_comes_from_the_list() {
        let servers = vec!["a:1".to_string(), "b:2".to_string()];
        let discovery = MultiServersDiscovery::new(servers.clone());
        for _ in 0..20 {
            let picked = discovery.get(SelectMode::Random).await.unwrap();
            assert!(servers.contains(&picked));
        }
    }

    #[tokio::test]
    async fn test_get_all_returns_a_copy() {
        let discovery = MultiServersDiscovery::new(vec!["a:1".to_string()]);
        let mut copy = discovery.get_all().await.unwrap();
        copy.push("bogus:0".to_string());
        assert_eq!(discovery.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_update_replaces_the_list() {
        let discovery = MultiServersDiscovery::new(vec!["a:1".to_string()]);
        discovery
            .update(vec!["b:2".to_string(), "c:3".to_string()])
            .await
            .unwrap();
        assert_eq!(discovery.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_registry_discovery_zero_timeout_uses_default() {
        let discovery = RegistryDiscovery::new("http://localhost:9999/gorpc/registry", Duration::ZERO);
        assert_eq!(discovery.update_timeout, DEFAULT_UPDATE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_registry_discovery_fresh_list_skips_refresh() {
        // The registry URL is unreachable, so a refresh attempt would fail;
        // a recent manual update must keep get() from trying.
        let discovery = RegistryDiscovery::new(
            "http://localhost:1/gorpc/registry",
            Duration::from_secs(60),
        );
        discovery.update(vec!["a:1".to_string()]).await.unwrap();
        assert_eq!(discovery.get(SelectMode::RoundRobin).await.unwrap(), "a:1");
    }
}
