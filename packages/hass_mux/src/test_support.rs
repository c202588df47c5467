//! In-process stand-in for the upstream websocket API.
//!
//! Speaks just enough of the auth handshake to be a convincing upstream:
//! `auth_required`, then `auth_ok` or `auth_invalid` depending on the token.
//! After that it records what clients relay and sends whatever the test asks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::endpoint::UpstreamConfig;
use crate::frame::Frame;

enum Command {
    Send(Frame),
    Close,
}

pub struct FakeUpstream {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    received: Mutex<mpsc::UnboundedReceiver<Frame>>,
    accept_task: JoinHandle<()>,
}

impl FakeUpstream {
    /// Listen on an ephemeral localhost port, accepting `access_token`.
    pub async fn start(access_token: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let connections = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(Mutex::new(None));
        let (received_tx, received_rx) = mpsc::unbounded_channel();

        let accept_task = {
            let connections = connections.clone();
            let current = current.clone();
            let token = access_token.to_string();
            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(tcp).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let (command_tx, command_rx) = mpsc::unbounded_channel();
                    // Set before the handshake finishes so `send` works as soon
                    // as the multiplexer reports the session live
                    *current.lock().await = Some(command_tx);
                    tokio::spawn(serve_connection(
                        ws,
                        token.clone(),
                        command_rx,
                        received_tx.clone(),
                    ));
                }
            })
        };

        Ok(Self {
            addr,
            connections,
            current,
            received: Mutex::new(received_rx),
            accept_task,
        })
    }

    /// Base URL in the form an operator would configure it.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Websocket connections accepted so far, authenticated or not.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a frame down the most recent connection.
    pub async fn send(&self, frame: Frame) -> bool {
        match self.current.lock().await.as_ref() {
            Some(tx) => tx.send(Command::Send(frame)).is_ok(),
            None => false,
        }
    }

    /// Close the most recent connection from the upstream side.
    pub async fn close_current(&self) {
        if let Some(tx) = self.current.lock().await.take() {
            let _ = tx.send(Command::Close);
        }
    }

    /// Next frame a client relayed upstream, if one arrives in time.
    pub async fn next_received(&self, within: Duration) -> Option<Frame> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(within, received.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    mut ws: WebSocketStream<TcpStream>,
    token: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    received: mpsc::UnboundedSender<Frame>,
) {
    let hello = r#"{"type":"auth_required","ha_version":"test"}"#;
    if ws.send(Message::text(hello)).await.is_err() {
        return;
    }

    let authorized = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).unwrap_or_default();
                if value["type"] == "auth" {
                    break value["access_token"] == token.as_str();
                }
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };

    if !authorized {
        let reply = r#"{"type":"auth_invalid","message":"Invalid access token"}"#;
        let _ = ws.send(Message::text(reply)).await;
        let _ = ws.close(None).await;
        return;
    }

    let ok = r#"{"type":"auth_ok","ha_version":"test"}"#;
    if ws.send(Message::text(ok)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if ws.send(Message::from(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            message = ws.next() => match message {
                Some(Ok(message)) => {
                    if let Some(frame) = Frame::from_message(message) {
                        let _ = received.send(frame);
                    }
                }
                _ => break,
            },
        }
    }
}

/// Upstream settings pointed at `url` with short timeouts.
pub fn upstream_config(url: &str, access_token: &str) -> UpstreamConfig {
    UpstreamConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        ..UpstreamConfig::new(url, access_token)
    }
}

/// A localhost URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}
