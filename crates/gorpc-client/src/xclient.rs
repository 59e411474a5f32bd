use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gorpc_common::{Options, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

/// Client-side multiplexer: picks servers through a [`Discovery`], caches one
/// [`Client`] per address, and can broadcast a call to every known server.
pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    options: Options,
    clients: Mutex<HashMap<String, Client>>,
}

impl XClient {
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, options: Options) -> Self {
        XClient {
            discovery,
            mode,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The cached client for `addr`, redialing when the cached one reports
    /// itself unavailable (a stale entry for a gone server).
    async fn dial(&self, addr: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(addr) {
            if client.is_available().await {
                return Ok(client.clone());
            }
            debug!(addr, "rpc xclient: evicting unavailable client");
            if let Some(stale) = clients.remove(addr) {
                let _ = stale.close().await;
            }
        }

        let client = Client::dial(addr, self.options.clone()).await?;
        clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    async fn call_addr<A, R>(
        &self,
        addr: &str,
        service_method: &str,
        args: &A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let client = self
            .dial(addr)
            .await
            .map_err(|e| RpcError::Connection(format!("{addr} is disabled: {e}")))?;
        client.call_with_cancel(service_method, args, cancel).await
    }

    /// Invokes `service_method` on one server picked by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_cancel(service_method, args, &CancellationToken::new())
            .await
    }

    /// As [`call`](XClient::call), giving up when `cancel` fires.
    pub async fn call_with_cancel<A, R>(
        &self,
        service_method: &str,
        args: &A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode).await?;
        self.call_addr(&addr, service_method, args, cancel).await
    }

    /// Invokes `service_method` on every known server concurrently.
    ///
    /// Each sibling call decodes into its own private reply, so concurrent
    /// responses never alias; the first successful reply is kept. The first
    /// error cancels the remaining siblings and is returned once all of them
    /// have settled. `Ok(None)` means no server produced a reply (an empty
    /// server list).
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        self.broadcast_with_cancel(service_method, args, &CancellationToken::new())
            .await
    }

    /// As [`broadcast`](XClient::broadcast), additionally giving up
    /// everywhere when `cancel` fires.
    pub async fn broadcast_with_cancel<A, R>(
        &self,
        service_method: &str,
        args: &A,
        cancel: &CancellationToken,
    ) -> Result<Option<R>>
    where
        A: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let servers = self.discovery.get_all().await?;
        let cancel = cancel.child_token();

        struct Outcome<R> {
            first_error: Option<RpcError>,
            reply: Option<R>,
        }
        let outcome = Mutex::new(Outcome::<R> {
            first_error: None,
            reply: None,
        });

        let calls = servers.iter().map(|addr| {
            let cancel = cancel.clone();
            let outcome = &outcome;
            async move {
                let result = self
                    .call_addr::<A, R>(addr, service_method, args, &cancel)
                    .await;
                let mut outcome = outcome.lock().await;
                match result {
                    Err(e) => {
                        if outcome.first_error.is_none() {
                            outcome.first_error = Some(e);
                            // Fail fast: abort the sibling calls.
                            cancel.cancel();
                        }
                    }
                    Ok(reply) => {
                        if outcome.reply.is_none() {
                            outcome.reply = Some(reply);
                        }
                    }
                }
            }
        });
        futures::future::join_all(calls).await;

        let outcome = outcome.into_inner();
        match outcome.first_error {
            Some(e) => Err(e),
            None => Ok(outcome.reply),
        }
    }

    /// Closes and evicts every cached client.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}
