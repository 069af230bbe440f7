use std::sync::Arc;

use boring::ssl::SslAcceptor;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Anything a mock connection can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A raw frame as read from the client.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// A frame-scripted HTTP/2 server behind TLS with ALPN h2.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
}

impl MockH2Server {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept TLS connections and hand each one to `handler`.
    pub fn start_tls<F, Fut>(self, acceptor: SslAcceptor, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(MockH2Connection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                let handler = Arc::clone(&handler);
                let acceptor = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => handler(MockH2Connection::new(Box::new(tls))).await,
                        Err(e) => tracing::debug!("TLS accept failed: {}", e),
                    }
                });
            }
        })
    }
}

/// One HTTP/2 connection under frame-level control.
pub struct MockH2Connection {
    stream: Arc<Mutex<Box<dyn Io>>>,
}

impl MockH2Connection {
    fn new(stream: Box<dyn Io>) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    /// Read and check the 24-byte connection preface.
    pub async fn read_preface(&self) -> std::io::Result<()> {
        let mut stream = self.stream.lock().await;
        let mut preface = [0u8; 24];
        stream.read_exact(&mut preface).await?;

        const EXPECTED_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
        if preface.as_slice() != EXPECTED_PREFACE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid HTTP/2 preface",
            ));
        }
        Ok(())
    }

    /// Read the next complete frame from the client.
    pub async fn read_frame(&self) -> std::io::Result<RawFrame> {
        let mut stream = self.stream.lock().await;
        let mut header = [0u8; 9];
        stream.read_exact(&mut header).await?;

        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
        let stream_id = u32::from_be_bytes([header[5] & 0x7F, header[6], header[7], header[8]]);
        let mut payload = vec![0u8; length as usize];
        stream.read_exact(&mut payload).await?;

        Ok(RawFrame {
            frame_type: header[3],
            flags: header[4],
            stream_id,
            payload: Bytes::from(payload),
        })
    }

    /// Read frames up to and including the first HEADERS frame.
    ///
    /// SETTINGS from the client are answered with `settings` and an ACK.
    pub async fn read_until_headers(&self, settings: &[(u16, u32)]) -> std::io::Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await?;
            let done = frame.frame_type == 0x01;
            if frame.frame_type == 0x04 && frame.flags & 0x01 == 0 {
                self.send_settings(settings).await?;
                self.send_settings_ack().await?;
            }
            frames.push(frame);
            if done {
                return Ok(frames);
            }
        }
    }

    /// Send a raw frame to the client.
    pub async fn send_frame(
        &self,
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let mut stream = self.stream.lock().await;

        let length = payload.len() as u32;
        let mut frame = Vec::with_capacity(9 + payload.len());
        frame.extend_from_slice(&length.to_be_bytes()[1..]);
        frame.push(frame_type);
        frame.push(flags);
        frame.extend_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
        frame.extend_from_slice(payload);

        stream.write_all(&frame).await?;
        stream.flush().await
    }

    pub async fn send_settings(&self, settings: &[(u16, u32)]) -> std::io::Result<()> {
        let mut payload = Vec::new();
        for (id, value) in settings {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.send_frame(0x04, 0x00, 0, &payload).await
    }

    pub async fn send_settings_ack(&self) -> std::io::Result<()> {
        self.send_frame(0x04, 0x01, 0, &[]).await
    }

    /// HEADERS with END_HEADERS; `block` is already HPACK-encoded.
    pub async fn send_headers(&self, stream_id: u32, block: &[u8], end_stream: bool) -> std::io::Result<()> {
        let flags = if end_stream { 0x05 } else { 0x04 };
        self.send_frame(0x01, flags, stream_id, block).await
    }

    pub async fn send_data(&self, stream_id: u32, data: &[u8], end_stream: bool) -> std::io::Result<()> {
        let flags = if end_stream { 0x01 } else { 0x00 };
        self.send_frame(0x00, flags, stream_id, data).await
    }

    pub async fn send_goaway(&self, last_stream_id: u32, error_code: u32) -> std::io::Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
        payload.extend_from_slice(&error_code.to_be_bytes());
        self.send_frame(0x07, 0x00, 0, &payload).await
    }
}

/// Decode a SETTINGS payload into (id, value) pairs in wire order.
pub fn settings_entries(payload: &[u8]) -> Vec<(u16, u32)> {
    payload
        .chunks_exact(6)
        .map(|c| {
            (
                u16::from_be_bytes([c[0], c[1]]),
                u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
            )
        })
        .collect()
}
