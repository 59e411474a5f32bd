use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use gorpc_common::codec::{read_options, split, BoxedConnection, FrameReader, FrameWriter};
use gorpc_common::{CodecKind, Header, Options, Result, RpcError, MAGIC_NUMBER};
use gorpc_common::protocol::{CONNECTED_LINE, DEFAULT_RPC_PATH};

use crate::service::{Method, RpcService, Service};

/// One admitted request travelling from the pump to its handler task.
struct Request {
    header: Header,
    payload: Vec<u8>,
    method: Arc<Method>,
}

/// The gorpc server: a service table plus the accept/pump machinery.
///
/// The service map is shared across every connection handler; registration
/// can happen while connections are live.
#[derive(Default)]
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Server {
        Server::default()
    }

    /// Registers a receiver's methods under its type name.
    ///
    /// Fails when a service of the same name already exists; the table is
    /// left untouched in that case.
    pub async fn register<R: RpcService>(&self, receiver: R) -> Result<()> {
        let service = Service::new(receiver)?;
        let mut services = self.services.write().await;
        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Looks up `"Service.Method"`, distinguishing an ill-formed string, a
    /// missing service and a missing method.
    pub async fn find(&self, service_method: &str) -> Result<(Arc<Service>, Arc<Method>)> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RpcError::IllFormedServiceMethod(service_method.to_string()))?;

        let service = {
            let services = self.services.read().await;
            services
                .get(service_name)
                .cloned()
                .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?
        };
        let method = service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;
        Ok((service, method))
    }

    /// A registered service by name, if any.
    pub async fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().await.get(name).cloned()
    }

    /// Accepts connections until the listener fails, one handler task per
    /// connection.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: connection established");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_conn(Box::new(stream)).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "rpc server: accept error");
                    return;
                }
            }
        }
    }

    /// Serves one negotiated connection: decode the preface, verify it,
    /// then pump requests until the peer goes away.
    pub async fn serve_conn(self: Arc<Self>, mut conn: BoxedConnection) {
        let options = match read_options(&mut conn).await {
            Ok(options) => options,
            Err(e) => {
                debug!(error = %e, "rpc server: option decode error");
                return;
            }
        };
        if options.magic_number != MAGIC_NUMBER {
            debug!(magic = options.magic_number, "rpc server: invalid magic number");
            return;
        }

        let (reader, writer) = split(options.codec_type, conn);
        self.serve_codec(reader, writer, &options).await;
    }

    /// The request pump. Responses are serialized through a per-connection
    /// send lock; every admitted request runs on its own task, tracked so
    /// shutdown waits for in-flight handlers before dropping the writer.
    async fn serve_codec(&self, mut reader: FrameReader, writer: FrameWriter, options: &Options) {
        let kind = reader.kind();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(_) => break,
            };

            let (_service, method) = match self.find(&header.service_method).await {
                Ok(found) => found,
                Err(e) => {
                    // A dispatch failure is per-call: drain the body frame so
                    // framing stays aligned, answer with the error, carry on.
                    if reader.read_body().await.is_err() {
                        break;
                    }
                    let response = Header {
                        service_method: header.service_method,
                        seq: header.seq,
                        error: e.to_string(),
                    };
                    send_response(&writer, &response, &sentinel_body(kind)).await;
                    continue;
                }
            };

            let payload = match reader.read_body().await {
                Ok(payload) => payload,
                Err(_) => break,
            };

            let request = Request {
                header,
                payload,
                method,
            };
            handlers.spawn(handle_request(
                request,
                Arc::clone(&writer),
                kind,
                options.handle_timeout,
            ));
        }

        // Transport is gone for reads; wait out the in-flight handlers.
        while handlers.join_next().await.is_some() {}
        let mut writer = writer.lock().await;
        let _ = writer.close().await;
    }

    /// Accepts HTTP `CONNECT` tunnels carrying the RPC byte stream.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: http connection established");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_http_conn(stream).await {
                            debug!(error = %e, "rpc server: http tunnel error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "rpc server: accept error");
                    return;
                }
            }
        }
    }

    async fn serve_http_conn(self: Arc<Self>, stream: tokio::net::TcpStream) -> Result<()> {
        let mut conn = BufReader::new(stream);

        let mut request_line = String::new();
        conn.read_line(&mut request_line).await?;
        // Swallow the remaining request headers up to the blank line.
        loop {
            let mut line = String::new();
            let n = conn.read_line(&mut line).await?;
            if n == 0 || line == "\n" || line == "\r\n" {
                break;
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if method != "CONNECT" {
            conn.write_all(
                b"HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n405 must CONNECT\n",
            )
            .await?;
            return Ok(());
        }
        if !path.starts_with(DEFAULT_RPC_PATH) {
            conn.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await?;
            return Ok(());
        }

        conn.write_all(format!("HTTP/1.0 {}\n\n", CONNECTED_LINE).as_bytes())
            .await?;

        // From here on the stream is the RPC byte stream.
        self.serve_conn(Box::new(conn)).await;
        Ok(())
    }
}

/// Runs one request to completion, bounded by `timeout` when non-zero.
///
/// The method itself executes on a blocking task; `called` fires when it
/// returns, `sent` once its response hit the wire. When the timeout wins the
/// race an error response is sent instead and the `responded` flag makes the
/// worker's late send a no-op, so exactly one response leaves per seq.
async fn handle_request(
    request: Request,
    writer: Arc<Mutex<FrameWriter>>,
    kind: CodecKind,
    timeout: Duration,
) {
    let responded = Arc::new(AtomicBool::new(false));
    let (called_tx, called_rx) = oneshot::channel::<()>();
    let (sent_tx, sent_rx) = oneshot::channel::<()>();

    let service_method = request.header.service_method.clone();
    let seq = request.header.seq;

    {
        let writer = Arc::clone(&writer);
        let responded = Arc::clone(&responded);
        let Request {
            header,
            payload,
            method,
        } = request;
        tokio::spawn(async move {
            let invoked = tokio::task::spawn_blocking(move || method.invoke(kind, &payload)).await;
            let _ = called_tx.send(());

            let (response, body) = match invoked {
                Ok(Ok(reply)) => (header, reply),
                Ok(Err(e)) => (
                    Header {
                        error: e.to_string(),
                        ..header
                    },
                    sentinel_body(kind),
                ),
                Err(e) => (
                    Header {
                        error: format!("rpc server: method aborted: {e}"),
                        ..header
                    },
                    sentinel_body(kind),
                ),
            };
            send_response_once(&writer, &responded, &response, &body).await;
            let _ = sent_tx.send(());
        });
    }

    if timeout.is_zero() {
        let _ = called_rx.await;
        let _ = sent_rx.await;
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            let response = Header {
                service_method,
                seq,
                error: format!("rpc server: request handle timeout: expect within {timeout:?}"),
            };
            send_response_once(&writer, &responded, &response, &sentinel_body(kind)).await;
        }
        _ = called_rx => {
            let _ = sent_rx.await;
        }
    }
}

/// The placeholder body accompanying error responses.
fn sentinel_body(kind: CodecKind) -> Vec<u8> {
    kind.encode(&()).unwrap_or_default()
}

async fn send_response(writer: &Mutex<FrameWriter>, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        warn!(error = %e, seq = header.seq, "rpc server: write response error");
    }
}

/// Sends at most one response per request: the flag is claimed under the
/// send lock, so a send racing a timeout response is dropped.
async fn send_response_once(
    writer: &Mutex<FrameWriter>,
    responded: &AtomicBool,
    header: &Header,
    body: &[u8],
) {
    let mut writer = writer.lock().await;
    if responded.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Err(e) = writer.write(header, body).await {
        warn!(error = %e, seq = header.seq, "rpc server: write response error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Methods;
    use gorpc_common::codec::write_options;
    use serde::{Deserialize, Serialize};

    struct Foo;

    #[derive(Debug, Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    impl Foo {
        fn sum(&self, args: Args, reply: &mut i64) -> std::result::Result<(), String> {
            *reply = args.num1 + args.num2;
            Ok(())
        }

        fn nap(&self, args: Args, reply: &mut i64) -> std::result::Result<(), String> {
            std::thread::sleep(Duration::from_millis(args.num1 as u64));
            *reply = args.num1 + args.num2;
            Ok(())
        }
    }

    impl RpcService for Foo {
        fn methods(methods: &mut Methods<Self>) {
            methods.add("Sum", Foo::sum);
            methods.add("Nap", Foo::nap);
        }
    }

    /// Drives a server over an in-memory pipe, speaking raw frames.
    async fn connect(options: Options) -> (FrameReader, FrameWriter) {
        let server = Arc::new(Server::new());
        server.register(Foo).await.unwrap();

        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        tokio::spawn(server.serve_conn(Box::new(server_end)));

        let mut client_end: BoxedConnection = Box::new(client_end);
        write_options(&mut client_end, &options).await.unwrap();
        split(options.codec_type, client_end)
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let kind = CodecKind::MessagePack;
        let (mut reader, mut writer) = connect(Options::default()).await;

        let body = kind.encode(&Args { num1: 3, num2: 4 }).unwrap();
        writer.write(&Header::request("Foo.Sum", 1), &body).await.unwrap();

        let response = reader.read_header().await.unwrap();
        assert_eq!(response.seq, 1);
        assert_eq!(response.error, "");
        let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 7);
    }

    #[tokio::test]
    async fn test_pipelined_requests_with_increasing_seq() {
        let kind = CodecKind::MessagePack;
        let (mut reader, mut writer) = connect(Options::default()).await;

        for seq in 1..=5u64 {
            let body = kind
                .encode(&Args {
                    num1: seq as i64,
                    num2: 1,
                })
                .unwrap();
            writer.write(&Header::request("Foo.Sum", seq), &body).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            let response = reader.read_header().await.unwrap();
            assert_eq!(response.error, "");
            let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
            assert_eq!(reply, response.seq as i64 + 1);
            seen.push(response.seq);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_dispatch_errors_keep_connection_alive() {
        let kind = CodecKind::MessagePack;
        let (mut reader, mut writer) = connect(Options::default()).await;
        let body = kind.encode(&Args { num1: 1, num2: 1 }).unwrap();

        writer.write(&Header::request("Bar.Sum", 1), &body).await.unwrap();
        let response = reader.read_header().await.unwrap();
        assert!(response.error.contains("can't find service Bar"));
        let _ = reader.read_body().await.unwrap();

        writer.write(&Header::request("Foo.Missing", 2), &body).await.unwrap();
        let response = reader.read_header().await.unwrap();
        assert!(response.error.contains("can't find method Missing"));
        let _ = reader.read_body().await.unwrap();

        writer.write(&Header::request("no-dot", 3), &body).await.unwrap();
        let response = reader.read_header().await.unwrap();
        assert!(response.error.contains("ill-formed"));
        let _ = reader.read_body().await.unwrap();

        // The connection survived all three failures.
        writer.write(&Header::request("Foo.Sum", 4), &body).await.unwrap();
        let response = reader.read_header().await.unwrap();
        assert_eq!(response.error, "");
        let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn test_handle_timeout_sends_single_error_response() {
        let kind = CodecKind::MessagePack;
        let options = Options::default().with_handle_timeout(Duration::from_millis(100));
        let (mut reader, mut writer) = connect(options).await;

        // Sleeps well past the handle timeout.
        let body = kind.encode(&Args { num1: 400, num2: 0 }).unwrap();
        writer.write(&Header::request("Foo.Nap", 1), &body).await.unwrap();

        let response = reader.read_header().await.unwrap();
        assert!(response.error.contains("request handle timeout"));
        let _ = reader.read_body().await.unwrap();

        // The late completion must not produce a second response for seq 1:
        // the next frame on the wire belongs to the follow-up request.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let body = kind.encode(&Args { num1: 1, num2: 1 }).unwrap();
        writer.write(&Header::request("Foo.Sum", 2), &body).await.unwrap();
        let response = reader.read_header().await.unwrap();
        assert_eq!(response.seq, 2);
        assert_eq!(response.error, "");
        let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn test_zero_handle_timeout_means_no_deadline() {
        let kind = CodecKind::MessagePack;
        let (mut reader, mut writer) = connect(Options::default()).await;

        let body = kind.encode(&Args { num1: 300, num2: 1 }).unwrap();
        writer.write(&Header::request("Foo.Nap", 1), &body).await.unwrap();

        let response = reader.read_header().await.unwrap();
        assert_eq!(response.error, "");
        let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 301);
    }

    #[tokio::test]
    async fn test_wrong_magic_number_closes_connection() {
        let server = Arc::new(Server::new());
        server.register(Foo).await.unwrap();

        let (client_end, server_end) = tokio::io::duplex(4096);
        tokio::spawn(server.serve_conn(Box::new(server_end)));

        let mut client_end: BoxedConnection = Box::new(client_end);
        let mut options = Options::default();
        options.magic_number = 0xdeadbeef;
        write_options(&mut client_end, &options).await.unwrap();

        let (mut reader, mut writer) = split(options.codec_type, client_end);
        let body = CodecKind::MessagePack.encode(&()).unwrap();
        // The server hung up without negotiating; reading a response fails.
        let _ = writer.write(&Header::request("Foo.Sum", 1), &body).await;
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_codec_identifier_closes_connection() {
        let server = Arc::new(Server::new());
        server.register(Foo).await.unwrap();

        let (client_end, server_end) = tokio::io::duplex(4096);
        tokio::spawn(server.serve_conn(Box::new(server_end)));

        // A well-formed preface naming a codec nothing resolves.
        let mut client_end: BoxedConnection = Box::new(client_end);
        let payload = br#"{"magic_number":3927900,"codec_type":"application/gob","connect_timeout":10000,"handle_timeout":0}"#;
        client_end
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client_end.write_all(payload).await.unwrap();

        let (mut reader, _writer) = split(CodecKind::MessagePack, client_end);
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_register_fails_and_leaves_table_unchanged() {
        let server = Server::new();
        server.register(Foo).await.unwrap();

        let err = server.register(Foo).await.unwrap_err();
        assert!(err.to_string().contains("service already defined"));
        assert!(server.service("Foo").await.is_some());
        assert_eq!(server.service("Foo").await.unwrap().method_count(), 2);
    }

    #[tokio::test]
    async fn test_json_codec_session() {
        let kind = CodecKind::Json;
        let (mut reader, mut writer) = connect(Options::default().with_codec(kind)).await;

        let body = kind.encode(&Args { num1: 20, num2: 22 }).unwrap();
        writer.write(&Header::request("Foo.Sum", 1), &body).await.unwrap();

        let response = reader.read_header().await.unwrap();
        assert_eq!(response.error, "");
        let reply: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 42);
    }
}
