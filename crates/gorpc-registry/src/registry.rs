use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use gorpc_common::{Result, RpcError};

/// Path the registry endpoint is mounted on.
pub const DEFAULT_REGISTRY_PATH: &str = "/gorpc/registry";

/// How long a server stays live without a heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One announced server.
struct ServerItem {
    addr: String,
    last_seen: Instant,
}

/// The registry state: announced servers keyed by address, each stamped with
/// its latest heartbeat. A timeout of zero means entries never expire.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, ServerItem>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Arc<Registry> {
        Arc::new(Registry {
            timeout,
            servers: Mutex::new(HashMap::new()),
        })
    }

    /// Upserts `addrs`, stamping each with the current time.
    pub async fn put_servers(&self, addrs: Vec<String>) {
        let now = Instant::now();
        let mut servers = self.servers.lock().await;
        for addr in addrs {
            servers
                .entry(addr.clone())
                .and_modify(|item| item.last_seen = now)
                .or_insert(ServerItem {
                    addr,
                    last_seen: now,
                });
        }
    }

    /// The live server list; dead entries are pruned on the way.
    pub async fn alive_servers(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.timeout;
        let mut servers = self.servers.lock().await;

        servers.retain(|_, item| timeout.is_zero() || item.last_seen + timeout > now);
        let mut alive: Vec<String> = servers.values().map(|item| item.addr.clone()).collect();
        alive.sort();
        alive
    }

    /// The HTTP surface of this registry, mounted at
    /// [`DEFAULT_REGISTRY_PATH`]. Methods other than GET and POST get a 405
    /// from the method router.
    pub fn router(self: &Arc<Registry>) -> Router {
        Router::new()
            .route(
                DEFAULT_REGISTRY_PATH,
                get(list_servers).post(renew_servers),
            )
            .with_state(Arc::clone(self))
    }

    /// Serves the registry until the listener fails.
    pub async fn serve(self: Arc<Registry>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, path = DEFAULT_REGISTRY_PATH, "rpc registry: serving");
        }
        let router = self.router();
        axum::serve(listener, router)
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))
    }
}

async fn list_servers(State(registry): State<Arc<Registry>>) -> Json<Vec<String>> {
    Json(registry.alive_servers().await)
}

async fn renew_servers(
    State(registry): State<Arc<Registry>>,
    Json(addrs): Json<Vec<String>>,
) -> StatusCode {
    registry.put_servers(addrs).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_list() {
        let registry = Registry::new(DEFAULT_TIMEOUT);
        registry
            .put_servers(vec!["127.0.0.1:8001".to_string(), "127.0.0.1:8002".to_string()])
            .await;

        assert_eq!(
            registry.alive_servers().await,
            vec!["127.0.0.1:8001".to_string(), "127.0.0.1:8002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_the_stamp() {
        let registry = Registry::new(Duration::from_millis(200));
        registry.put_servers(vec!["a:1".to_string()]).await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(120)).await;
            registry.put_servers(vec!["a:1".to_string()]).await;
        }
        // Well past the original stamp's expiry, but heartbeats kept it live.
        assert_eq!(registry.alive_servers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_servers_are_pruned() {
        let registry = Registry::new(Duration::from_millis(50));
        registry.put_servers(vec!["a:1".to_string()]).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.alive_servers().await.is_empty());
        // The prune removed the entry, not just hid it.
        assert!(registry.servers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_never_prunes() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_servers(vec!["a:1".to_string()]).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(registry.alive_servers().await.len(), 1);
    }
}
