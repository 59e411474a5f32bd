use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf,
                WriteHalf};

use super::CodecKind;
use crate::protocol::{Header, Options, Result, RpcError};

/// Maximum frame payload (100 MB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Duplex byte stream a codec can own: TCP sockets, tunneled streams and
/// in-memory test pipes all qualify.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

/// Splits a negotiated connection into its codec halves.
///
/// The reader and writer together exclusively own the stream; dropping both
/// closes it.
pub fn split(kind: CodecKind, conn: BoxedConnection) -> (FrameReader, FrameWriter) {
    let (read_half, write_half) = tokio::io::split(conn);
    (
        FrameReader {
            kind,
            stream: read_half,
        },
        FrameWriter {
            kind,
            stream: BufWriter::new(write_half),
        },
    )
}

/// Writes the JSON-encoded session preface as the first frame.
pub async fn write_options<S>(stream: &mut S, options: &Options) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let payload = options.to_json()?;
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the JSON-encoded session preface from the front of a connection,
/// resolving its codec identifier.
pub async fn read_options<S>(stream: &mut S) -> Result<Options>
where
    S: AsyncRead + Unpin,
{
    let payload = read_frame(stream).await?;
    Options::from_json(&payload)
}

async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reading half of a negotiated connection.
///
/// There is exactly one owner of this half per connection: the request pump
/// on the server, the receiver task on the client.
pub struct FrameReader {
    kind: CodecKind,
    stream: ReadHalf<BoxedConnection>,
}

impl FrameReader {
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Reads the next frame and decodes it as a [`Header`].
    pub async fn read_header(&mut self) -> Result<Header> {
        let payload = read_frame(&mut self.stream).await?;
        self.kind.decode(&payload)
    }

    /// Reads the next frame's raw body payload.
    ///
    /// The length prefix is always consumed whole, so discarding a body is
    /// simply dropping the returned buffer; framing stays aligned either way.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.stream).await
    }
}

/// Writing half of a negotiated connection.
///
/// Writes are buffered and flushed once per frame pair. A write error shuts
/// the stream down so the peer cannot read a half-written frame.
pub struct FrameWriter {
    kind: CodecKind,
    stream: BufWriter<WriteHalf<BoxedConnection>>,
}

impl FrameWriter {
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Writes one header frame followed by one body frame and flushes.
    pub async fn write(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let result = self.write_frames(header, body).await;
        if result.is_err() {
            let _ = self.stream.shutdown().await;
        }
        result
    }

    async fn write_frames(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header_payload = self.kind.encode(header)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(body.len(), MAX_FRAME_SIZE));
        }

        self.stream
            .write_all(&(header_payload.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(&header_payload).await?;
        self.stream
            .write_all(&(body.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the underlying stream.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
