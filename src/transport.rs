//! Transport abstraction for the push channel.
//!
//! The [`Transport`] trait is a bidirectional text message channel carrying
//! JSON-encoded [`ClientMessage`](crate::protocol::ClientMessage) and
//! [`ServerMessage`](crate::protocol::ServerMessage) values. Message framing
//! is the implementation's job.
//!
//! A transport is one connection. Because the channel manager reconnects on
//! its own after a drop, it does not take a transport but a [`Connector`]
//! that can open a fresh one, authenticated with the session credential,
//! every time it is asked.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use planning_poker_client::error::PokerError;
//! use planning_poker_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), PokerError> {
//!         // Send the JSON text message over your transport
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, PokerError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), PokerError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::PokerError;
use crate::protocol::Credential;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`PokerError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), PokerError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed by the server
    async fn recv(&mut self) -> Option<Result<String, PokerError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), PokerError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), PokerError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, PokerError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), PokerError> {
        (**self).close().await
    }
}

/// Opens authenticated transports to the server.
///
/// Called once by [`ChannelManager::connect`](crate::channel::ChannelManager::connect)
/// and again after every drop until a connection succeeds.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Open a new connection presenting `credential`.
    ///
    /// # Errors
    ///
    /// Any error is treated as transient: the channel manager waits its
    /// reconnect delay and tries again.
    async fn connect(&self, credential: &Credential) -> Result<Self::Transport, PokerError>;
}
