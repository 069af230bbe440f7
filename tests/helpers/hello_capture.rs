use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Accepts one connection and keeps the first TLS record the client sends.
///
/// The URL uses `localhost` so the client includes server_name.
pub struct HelloCapture {
    pub url: String,
    record: oneshot::Receiver<Vec<u8>>,
}

impl HelloCapture {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("https://localhost:{}/", listener.local_addr()?.port());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut header = [0u8; 5];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;
            let mut record = header.to_vec();
            record.resize(5 + len, 0);
            if stream.read_exact(&mut record[5..]).await.is_ok() {
                let _ = tx.send(record);
            }
            // Dropping the stream aborts the client handshake
        });

        Ok(Self { url, record: rx })
    }

    pub async fn record(self) -> Vec<u8> {
        self.record.await.expect("no ClientHello captured")
    }
}
