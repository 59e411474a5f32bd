use std::time::Duration;

use tracing::{error, warn};

use gorpc_common::{Result, RpcError};

use crate::registry::DEFAULT_TIMEOUT;

/// Announces `addr` to the registry at `registry_url`, then keeps announcing
/// it every `interval` from a background task.
///
/// An interval of zero picks one second less than the registry's default
/// timeout, so a well-behaved server never expires. The first heartbeat is
/// sent synchronously: if it fails, the error is returned and no background
/// task is spawned. The background task stops on its first send failure.
pub async fn heartbeat(registry_url: &str, addr: &str, interval: Duration) -> Result<()> {
    let interval = if interval.is_zero() {
        DEFAULT_TIMEOUT - Duration::from_secs(1)
    } else {
        interval
    };

    let http = reqwest::Client::new();
    if let Err(e) = send_heartbeat(&http, registry_url, addr).await {
        error!(registry = registry_url, addr, error = %e, "rpc registry: heartbeat failed");
        return Err(e);
    }

    let registry_url = registry_url.to_string();
    let addr = addr.to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick is immediate and already covered above.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
                warn!(registry = %registry_url, addr = %addr, error = %e,
                      "rpc registry: heartbeat failed, stopping");
                break;
            }
        }
    });

    Ok(())
}

async fn send_heartbeat(http: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    let response = http
        .post(registry_url)
        .json(&[addr])
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RpcError::Registry(format!(
            "heartbeat rejected: {}",
            response.status()
        )));
    }
    Ok(())
}
