//! WebSocket push channel using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries one connection; [`WebSocketConnector`]
//! opens a new one for every (re)connection attempt, presenting the session
//! credential as the `token` query parameter. Both `ws://` and `wss://` URLs
//! are supported.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), planning_poker_client::PokerError> {
//! use planning_poker_client::protocol::Credential;
//! use planning_poker_client::transport::{Connector, Transport};
//! use planning_poker_client::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("ws://localhost:8080/ws")?;
//! let mut transport = connector.connect(&Credential::new("session-id")).await?;
//! transport.send(r#"{"type":"leave"}"#.to_string()).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::PokerError;
use crate::protocol::Credential;
use crate::transport::{Connector, Transport};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake failures surface as I/O errors so the channel's retry logging
/// stays uniform; the original error kind is kept when there is one.
fn handshake_error(err: tungstenite::Error) -> PokerError {
    let kind = match &err {
        tungstenite::Error::Io(inner) => inner.kind(),
        _ => io::ErrorKind::Other,
    };
    PokerError::Io(io::Error::new(kind, err))
}

/// One open push-channel connection.
///
/// [`recv`](Transport::recv) is cancel-safe, so the channel loop can race it
/// against its command queue.
#[derive(Debug)]
pub struct WebSocketTransport {
    socket: Socket,
    closed: bool,
}

impl WebSocketTransport {
    /// Perform the WebSocket handshake with `url`, giving up after `limit`.
    ///
    /// # Errors
    ///
    /// [`PokerError::Timeout`] when `limit` elapses, [`PokerError::Io`] for
    /// any other handshake failure.
    pub async fn open(url: &Url, limit: Duration) -> Result<Self, PokerError> {
        debug!(host = url.host_str().unwrap_or_default(), "opening push channel");

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (socket, response) = tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| PokerError::Timeout)?
            .map_err(handshake_error)?;

        info!(status = %response.status(), "push channel open");
        Ok(Self {
            socket,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), PokerError> {
        if self.closed {
            return Err(PokerError::TransportClosed);
        }
        self.socket
            .send(Message::text(message))
            .await
            .map_err(|e| PokerError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PokerError>> {
        while let Some(frame) = self.socket.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "push channel closed by server");
                    return None;
                }
                Ok(Message::Binary(payload)) => {
                    warn!(len = payload.len(), "ignoring binary frame on push channel");
                }
                // Pings are answered by tungstenite on the next write or flush.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(PokerError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), PokerError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.socket
            .close(None)
            .await
            .map_err(|e| PokerError::TransportSend(e.to_string()))
    }
}

/// Opens [`WebSocketTransport`]s to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    /// # Errors
    ///
    /// Returns [`PokerError::InvalidUrl`] if `url` does not parse.
    pub fn new(url: &str) -> Result<Self, PokerError> {
        let url = Url::parse(url).map_err(|e| PokerError::InvalidUrl(e.to_string()))?;
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// The endpoint with the credential attached as `token`.
    fn authenticated_url(&self, credential: &Credential) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", credential.as_str());
        url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, credential: &Credential) -> Result<WebSocketTransport, PokerError> {
        WebSocketTransport::open(&self.authenticated_url(credential), self.handshake_timeout).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    type ServerSocket = WebSocketStream<TcpStream>;

    /// A one-shot poker server: accepts a single connection, reports the
    /// request path (with query) it was opened with, then runs `script`.
    async fn poker_server<F, Fut>(script: F) -> (WebSocketConnector, oneshot::Receiver<String>)
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let record_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(req.uri().to_string());
                Ok(resp)
            };
            let socket = tokio_tungstenite::accept_hdr_async(tcp, record_path)
                .await
                .unwrap();
            script(socket).await;
        });

        let connector = WebSocketConnector::new(&format!("ws://{addr}/ws")).unwrap();
        (connector, path_rx)
    }

    async fn drain(mut socket: ServerSocket) {
        while let Some(Ok(_)) = socket.next().await {}
    }

    #[test]
    fn credential_is_appended_as_token_query() {
        let connector = WebSocketConnector::new("ws://localhost:8080/ws?v=2").unwrap();
        let url = connector.authenticated_url(&Credential::new("a b"));
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?v=2&token=a+b");
    }

    #[test]
    fn connector_rejects_invalid_url() {
        assert!(matches!(
            WebSocketConnector::new("not a url"),
            Err(PokerError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1/ws").unwrap();
        let err = connector.connect(&Credential::new("s")).await.unwrap_err();
        assert!(matches!(err, PokerError::Io(_)));
    }

    #[tokio::test]
    async fn pushed_events_arrive_and_binary_frames_are_skipped() {
        let (connector, path) = poker_server(|mut socket| async move {
            let ack = r#"{"type":"join_ack","data":{"game_id":"g1","result":"ok"}}"#;
            socket.send(Message::text(ack)).await.unwrap();
            socket
                .send(Message::binary(vec![0x01, 0x02]))
                .await
                .unwrap();
            socket
                .send(Message::text(r#"{"type":"created","data":{"game_id":"g2"}}"#))
                .await
                .unwrap();
            socket.close(None).await.unwrap();
        })
        .await;

        let mut transport = connector.connect(&Credential::new("abc123")).await.unwrap();
        assert_eq!(path.await.unwrap(), "/ws?token=abc123");

        let first = transport.recv().await.unwrap().unwrap();
        assert!(first.contains("join_ack"));
        let second = transport.recv().await.unwrap().unwrap();
        assert!(second.contains("created"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn client_messages_reach_the_server() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let (connector, _path) = poker_server(|mut socket| async move {
            if let Some(Ok(Message::Text(text))) = socket.next().await {
                let _ = seen_tx.send(text.as_str().to_owned());
            }
            drain(socket).await;
        })
        .await;

        let mut transport = connector.connect(&Credential::new("s")).await.unwrap();
        transport.send(r#"{"type":"reveal"}"#.to_string()).await.unwrap();
        assert_eq!(seen_rx.await.unwrap(), r#"{"type":"reveal"}"#);
    }

    #[tokio::test]
    async fn closed_transport_refuses_to_send() {
        let (connector, _path) = poker_server(drain).await;

        let mut transport = connector.connect(&Credential::new("s")).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send(r#"{"type":"leave"}"#.to_string()).await.unwrap_err();
        assert!(matches!(err, PokerError::TransportClosed));
    }
}
