//! Push channel to browser clients over WebSocket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::http::{Request, CORS_HEADERS};
use crate::error::{Result, SpiceError};
use crate::plugins::ChangeNotifier;

/// Path reserved for the push-channel handshake
pub const PUSH_PATH: &str = "/hot";

/// Connected push-channel clients
#[derive(Clone, Default)]
pub struct ClientSet {
    inner: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<String>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        debug!(client = %id, "push client connected");
        (id, rx)
    }

    pub fn remove(&self, id: &Uuid) {
        if self.lock().remove(id).is_some() {
            debug!(client = %id, "push client disconnected");
        }
    }

    /// Send the changed names as one JSON array to every client.
    ///
    /// Empty lists are not sent. Clients whose channel is gone are dropped.
    /// Returns the number of clients reached.
    pub fn broadcast(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }
        let payload = match serde_json::to_string(names) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode push payload");
                return 0;
            }
        };

        let mut clients = self.lock();
        clients.retain(|_, tx| tx.send(payload.clone()).is_ok());
        clients.len()
    }
}

impl ChangeNotifier for ClientSet {
    fn notify_changed(&self, names: &[String]) -> usize {
        self.broadcast(names)
    }
}

/// Answer the upgrade request with `101 Switching Protocols`
pub async fn accept_upgrade(stream: &mut TcpStream, request: &Request) -> Result<()> {
    let key = request
        .header("sec-websocket-key")
        .ok_or_else(|| SpiceError::Server {
            message: "missing Sec-WebSocket-Key".to_string(),
        })?;

    let mut head = String::from("HTTP/1.1 101 Switching Protocols\r\n");
    head.push_str("Upgrade: websocket\r\n");
    head.push_str("Connection: Upgrade\r\n");
    head.push_str(&format!(
        "Sec-WebSocket-Accept: {}\r\n",
        derive_accept_key(key.as_bytes())
    ));
    for (name, value) in CORS_HEADERS {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await?;
    Ok(())
}

/// Run one client until it disconnects or the server stops
pub async fn serve_client(stream: TcpStream, clients: ClientSet, cancel: CancellationToken) {
    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (mut sink, mut source) = ws.split();
    let (id, mut rx) = clients.register();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            outgoing = rx.recv() => {
                let Some(payload) = outgoing else { break };
                if let Err(e) = sink.send(Message::Text(payload.into())).await {
                    debug!(client = %id, error = %e, "push send failed");
                    break;
                }
            }

            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client = %id, error = %e, "push channel error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    clients.remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_client() {
        let clients = ClientSet::new();
        let (_a, mut rx_a) = clients.register();
        let (_b, mut rx_b) = clients.register();

        let names = vec!["user.css".to_string()];
        assert_eq!(clients.broadcast(&names), 2);
        assert_eq!(rx_a.try_recv().unwrap(), r#"["user.css"]"#);
        assert_eq!(rx_b.try_recv().unwrap(), r#"["user.css"]"#);
    }

    #[test]
    fn empty_broadcast_sends_nothing() {
        let clients = ClientSet::new();
        let (_id, mut rx) = clients.register();
        assert_eq!(clients.broadcast(&[]), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_clients_are_dropped_without_error() {
        let clients = ClientSet::new();
        let (_gone, rx_gone) = clients.register();
        let (_live, mut rx_live) = clients.register();
        drop(rx_gone);

        assert_eq!(clients.broadcast(&["theme.js".to_string()]), 1);
        assert_eq!(clients.len(), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn remove_forgets_client() {
        let clients = ClientSet::new();
        let (id, _rx) = clients.register();
        clients.remove(&id);
        assert!(clients.is_empty());
    }
}
