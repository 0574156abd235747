// mock_upstream: a mock upstream WebSocket endpoint for feed connector tests.
//
// Binds to a random local port and accepts a single connection at a time.
// A test drives the connection lifecycle explicitly via `UpstreamScript`
// rather than a canned protocol, since each connector (JMA/P2P) speaks a
// different upstream wire format.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;

/// Instructions the mock server plays back to whatever client connects.
#[derive(Debug, Clone)]
pub enum UpstreamScript {
    /// Send this raw text frame to the client.
    Send(String),
    /// Wait before the next step.
    Wait(std::time::Duration),
    /// Close the connection (simulates upstream drop).
    Close,
}

/// A mock upstream server. Each accepted connection plays back the script
/// handed to [`MockUpstream::start`] and forwards any inbound client frames
/// onto an mpsc channel the test can inspect.
pub struct MockUpstream {
    addr: SocketAddr,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    /// Start the mock upstream, binding to a random port and playing
    /// `script` to the first (and, per reconnect cycle, each subsequent)
    /// client that connects.
    pub async fn start(script: Vec<UpstreamScript>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let script = script.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = Self::serve_connection(stream, script, tx).await;
                });
            }
        });

        Ok(Self {
            addr,
            inbound: Arc::new(Mutex::new(rx)),
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Wait for the next inbound text frame the client sent.
    pub async fn next_inbound(&self) -> Option<String> {
        self.inbound.lock().await.recv().await
    }

    async fn serve_connection(
        stream: tokio::net::TcpStream,
        script: Vec<UpstreamScript>,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();

        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                match msg {
                    Message::Text(t) => {
                        let _ = tx.send(t.to_string());
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        for step in script {
            match step {
                UpstreamScript::Send(text) => {
                    write.send(Message::Text(text.into())).await?;
                }
                UpstreamScript::Wait(d) => tokio::time::sleep(d).await,
                UpstreamScript::Close => {
                    let _ = write.close().await;
                    break;
                }
            }
        }

        let _ = reader.await;
        Ok(())
    }
}
