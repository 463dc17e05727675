//! # Planning Poker Client
//!
//! Client-side state synchronization for shared planning poker games.
//!
//! Two pieces keep a participant's view of a game in step with the server:
//!
//! - [`ChannelManager`]: the session's single push channel. It reconnects on
//!   its own after a drop and re-joins the subscribed game, reporting
//!   progress as [`ChannelStatus`] transitions.
//! - [`GameMirror`]: the local projection of one game. It applies snapshots
//!   in change-id order, updates the own vote optimistically and forwards
//!   player actions to the server.
//!
//! A mirror gets its snapshots from a [`SyncBackend`], chosen once when it is
//! opened: [`PushBackend`] over the channel, or [`PollBackend`] running a
//! long-poll loop against a [`GameApi`].
//!
//! ## Features
//!
//! - `transport-websocket` (default): [`WebSocketConnector`] for the push
//!   channel, over `tokio-tungstenite`.
//! - `http-api` (default): [`HttpGameApi`], over `reqwest`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "transport-websocket", feature = "http-api"))]
//! # async fn example() -> Result<(), planning_poker_client::PokerError> {
//! use std::sync::Arc;
//! use planning_poker_client::{
//!     ChannelManager, ClientConfig, Credential, GameMirror, MirrorEvent, PushBackend,
//!     WebSocketConnector,
//! };
//!
//! let config = ClientConfig::new("https://poker.example/api/v1");
//! let connector = WebSocketConnector::from_url(config.channel_url()?);
//! let manager = Arc::new(ChannelManager::new(connector, &config));
//! manager.connect(Credential::new("session-id"));
//!
//! let backend = Arc::new(PushBackend::new(Arc::clone(&manager)));
//! let (mirror, mut events) = GameMirror::open("game-id", backend, &config)?;
//! mirror.vote("M")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         MirrorEvent::SnapshotApplied { .. } => println!("{:?}", mirror.players()),
//!         MirrorEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod mirror;
pub mod protocol;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::GameApi;
pub use backend::{Feed, GameAction, PollBackend, PushBackend, SnapshotSink, SyncBackend};
pub use channel::{ChannelManager, ChannelStatus, JoinStatus, SnapshotCallback};
pub use config::ClientConfig;
pub use error::{PokerError, Result};
pub use event::MirrorEvent;
pub use mirror::GameMirror;
pub use protocol::{
    CardsDeck, ChangeId, ClientMessage, Confidence, CreateGameParams, Credential, GameId,
    GamePhase, GameSnapshot, PlayerState, ServerMessage,
};
pub use transport::{Connector, Transport};

#[cfg(feature = "http-api")]
pub use api::HttpGameApi;
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
