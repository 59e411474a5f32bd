use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gorpc_common::codec::{split, write_options, BoxedConnection, FrameReader, FrameWriter};
use gorpc_common::protocol::{CONNECTED_LINE, DEFAULT_RPC_PATH};
use gorpc_common::{CodecKind, Header, Options, Result, RpcError};

/// One in-flight (or completed) request as seen by the caller.
///
/// `args` holds the pre-encoded request body; `reply` the raw response body
/// once it arrived. Exactly one of `reply`/`error` is meaningful after
/// completion: `error` is `None` iff the response header carried no error
/// and the body was received.
#[derive(Debug, Default)]
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    pub args: Vec<u8>,
    pub reply: Vec<u8>,
    pub error: Option<RpcError>,
}

/// A pending call parked in the client's table until its response arrives,
/// the connection dies, or the caller cancels.
struct PendingCall {
    call: Call,
    done: mpsc::Sender<Call>,
}

impl PendingCall {
    /// Fires the done signal. The channel is buffered (capacity >= 1), so a
    /// single completion never blocks; a dropped receiver is ignored.
    fn complete(self) {
        let _ = self.done.try_send(self.call);
    }
}

struct State {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// The user called `close`.
    closing: bool,
    /// The receiver task hit a terminal error.
    shutdown: bool,
}

struct Inner {
    kind: CodecKind,
    /// Send lock: serializes full header+body writes.
    writer: Mutex<FrameWriter>,
    /// State lock: seq, pending table, lifecycle flags. Innermost of the two.
    state: Mutex<State>,
}

/// A client for one RPC connection. Cheap to clone; all clones share the
/// connection, the pending table and the single receiver task.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Wraps an established, un-negotiated connection: sends the session
    /// preface and spawns the receiver task.
    pub async fn new(mut conn: BoxedConnection, options: Options) -> Result<Client> {
        write_options(&mut conn, &options).await?;

        let (reader, writer) = split(options.codec_type, conn);
        let inner = Arc::new(Inner {
            kind: options.codec_type,
            writer: Mutex::new(writer),
            state: Mutex::new(State {
                seq: 1, // 0 is reserved as invalid
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        tokio::spawn(receive_loop(Arc::clone(&inner), reader));
        Ok(Client { inner })
    }

    /// Dials a TCP server and negotiates a session.
    ///
    /// `connect_timeout` bounds the whole dial-plus-handshake; on expiry the
    /// in-flight connection is dropped and a connect-timeout error returned.
    /// Zero disables the deadline.
    pub async fn dial(addr: &str, options: Options) -> Result<Client> {
        let connect_timeout = options.connect_timeout;
        let dial = async move {
            let stream = TcpStream::connect(addr).await?;
            Client::new(Box::new(stream), options).await
        };

        if connect_timeout.is_zero() {
            return dial.await;
        }
        match tokio::time::timeout(connect_timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectTimeout(connect_timeout)),
        }
    }

    /// Dials a server mounted behind the HTTP `CONNECT` tunnel.
    pub async fn dial_http(addr: &str, options: Options) -> Result<Client> {
        let connect_timeout = options.connect_timeout;
        let dial = async move {
            let stream = TcpStream::connect(addr).await?;
            let mut conn = BufReader::new(stream);

            conn.write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\n\n").as_bytes())
                .await?;

            let mut status_line = String::new();
            conn.read_line(&mut status_line).await?;
            if !status_line.contains(CONNECTED_LINE) {
                return Err(RpcError::Connection(format!(
                    "unexpected HTTP response: {}",
                    status_line.trim()
                )));
            }
            // Consume the blank line terminating the response.
            let mut blank = String::new();
            conn.read_line(&mut blank).await?;

            Client::new(Box::new(conn), options).await
        };

        if connect_timeout.is_zero() {
            return dial.await;
        }
        match tokio::time::timeout(connect_timeout, dial).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectTimeout(connect_timeout)),
        }
    }

    /// Starts an asynchronous call.
    ///
    /// The completed [`Call`] is delivered on `done`, which must come from a
    /// buffered channel (capacity >= 1). Pass `None` to have a capacity-10
    /// channel created; its receiver is returned.
    pub async fn go<A: Serialize>(
        &self,
        service_method: &str,
        args: &A,
        done: Option<mpsc::Sender<Call>>,
    ) -> Option<mpsc::Receiver<Call>> {
        let (done, receiver) = match done {
            Some(done) => (done, None),
            None => {
                let (tx, rx) = mpsc::channel(10);
                (tx, Some(rx))
            }
        };

        let mut call = Call {
            service_method: service_method.to_string(),
            ..Call::default()
        };
        match self.inner.kind.encode(args) {
            Ok(encoded) => {
                call.args = encoded;
                self.send(call, done).await;
            }
            Err(e) => {
                call.error = Some(e);
                let _ = done.try_send(call);
            }
        }
        receiver
    }

    /// Invokes `service_method` and waits for the reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_cancel(service_method, args, &CancellationToken::new())
            .await
    }

    /// Invokes `service_method`, giving up when `cancel` fires.
    ///
    /// On cancellation the pending entry is removed (a late response is then
    /// discarded by the receiver task) and a call-timeout error naming the
    /// method and seq is returned. The server is not notified and keeps
    /// executing; its response is dropped on arrival.
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
        let call = Call {
            service_method: service_method.to_string(),
            args: self.inner.kind.encode(args)?,
            ..Call::default()
        };
        let (done, mut receiver) = mpsc::channel(1);
        let seq = self.send(call, done).await;

        tokio::select! {
            completed = receiver.recv() => match completed {
                Some(call) => self.finish(call),
                None => Err(RpcError::Shutdown),
            },
            _ = cancel.cancelled() => {
                let _ = self.remove_call(seq).await;
                Err(RpcError::CallTimeout {
                    service_method: service_method.to_string(),
                    seq,
                })
            }
        }
    }

    fn finish<R: DeserializeOwned>(&self, call: Call) -> Result<R> {
        if let Some(error) = call.error {
            return Err(error);
        }
        self.inner.kind.decode(&call.reply)
    }

    /// Registers the call, writes the request frame pair, and returns the
    /// assigned seq (0 when registration failed; the failure was delivered
    /// on the done channel).
    async fn send(&self, mut call: Call, done: mpsc::Sender<Call>) -> u64 {
        // Send lock outermost, state lock innermost.
        let mut writer = self.inner.writer.lock().await;

        let (seq, header, args) = {
            let mut state = self.inner.state.lock().await;
            if state.shutdown || state.closing {
                call.error = Some(RpcError::Shutdown);
                let _ = done.try_send(call);
                return 0;
            }
            let seq = state.seq;
            state.seq += 1;
            call.seq = seq;

            let header = Header::request(call.service_method.clone(), seq);
            let args = call.args.clone();
            state.pending.insert(seq, PendingCall { call, done });
            (seq, header, args)
        };

        if let Err(e) = writer.write(&header, &args).await {
            // The call may already have been completed by the receiver.
            if let Some(mut pending) = self.remove_call(seq).await {
                pending.call.error = Some(e);
                pending.complete();
            }
        }
        seq
    }

    async fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.inner.state.lock().await.pending.remove(&seq)
    }

    /// True while the client can still carry calls: not closed by the user
    /// and not shut down by a connection error.
    pub async fn is_available(&self) -> bool {
        let state = self.inner.state.lock().await;
        !state.shutdown && !state.closing
    }

    /// Closes the connection. A second close reports [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        let mut writer = self.inner.writer.lock().await;
        writer.close().await
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }
}

/// The sole reader of the connection: routes each response to its pending
/// caller by seq, then fails whatever is left when the transport dies.
async fn receive_loop(inner: Arc<Inner>, mut reader: FrameReader) {
    let error = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };

        let pending = inner.state.lock().await.pending.remove(&header.seq);
        match pending {
            // Cancelled or already failed on write; drain the body.
            None => {
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(mut pending) if !header.error.is_empty() => {
                pending.call.error = Some(RpcError::Remote(header.error));
                let drained = reader.read_body().await;
                pending.complete();
                if let Err(e) = drained {
                    break e;
                }
            }
            Some(mut pending) => match reader.read_body().await {
                Ok(body) => {
                    pending.call.reply = body;
                    pending.complete();
                }
                Err(e) => {
                    pending.call.error = Some(RpcError::Connection(e.to_string()));
                    pending.complete();
                    break e;
                }
            },
        }
    };

    debug!(error = %error, "rpc client: receive loop terminated");
    terminate_calls(&inner, error).await;
}

/// Marks the client shut down and fails every pending call with the
/// terminating error.
async fn terminate_calls(inner: &Inner, error: RpcError) {
    let _writer = inner.writer.lock().await;
    let mut state = inner.state.lock().await;
    state.shutdown = true;

    let message = error.to_string();
    for (_, mut pending) in state.pending.drain() {
        pending.call.error = Some(RpcError::Connection(message.clone()));
        pending.complete();
    }
}
