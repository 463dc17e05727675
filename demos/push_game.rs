//! # Push Game Example
//!
//! Follows one game over the push channel:
//!
//! 1. Open the session's channel with a WebSocket connector
//! 2. Open a mirror for the game and cast a vote
//! 3. Print every accepted snapshot and every channel status change
//! 4. Leave the game and close the channel on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! POKER_BASE_URL=http://localhost:8080/api/v1 \
//! POKER_SESSION=<session id> POKER_GAME=<game id> \
//!     cargo run --example push_game
//! ```

use std::sync::Arc;

use planning_poker_client::{
    ChannelManager, ChannelStatus, ClientConfig, Credential, GameMirror, MirrorEvent, PushBackend,
    WebSocketConnector,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = ClientConfig::from_env()?;
    let session = std::env::var("POKER_SESSION")?;
    let game_id = std::env::var("POKER_GAME")?;
    let channel_url = config.channel_url()?;
    tracing::info!("Push channel endpoint: {channel_url}");

    // ── Channel ─────────────────────────────────────────────────────
    let manager = Arc::new(ChannelManager::new(
        WebSocketConnector::from_url(channel_url),
        &config,
    ));
    manager.connect(Credential::new(session));

    let mut status = manager.status_updates();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            match *status.borrow_and_update() {
                ChannelStatus::Reconnecting => tracing::warn!("Reconnecting…"),
                ChannelStatus::Connected => tracing::info!("Connected"),
                ChannelStatus::Disconnected => tracing::info!("Disconnected"),
            }
        }
    });

    // ── Mirror ──────────────────────────────────────────────────────
    let backend = Arc::new(PushBackend::new(Arc::clone(&manager)));
    let (mirror, mut events) = GameMirror::open(game_id, backend, &config)?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    MirrorEvent::SnapshotApplied { change_id } => {
                        tracing::info!(change_id, phase = ?mirror.phase(), "{}", mirror.name());
                        for player in mirror.players() {
                            let vote = player
                                .revealed_vote()
                                .map(str::to_string)
                                .unwrap_or_else(|| if player.has_voted() { "voted".into() } else { "-".into() });
                            tracing::info!("  {:<20} {vote}", player.name);
                        }
                        // Vote once per round with the first card of the deck.
                        if mirror.is_running() && !mirror.has_voted() {
                            if let Some(card) = mirror.cards().first() {
                                mirror.vote(card)?;
                            }
                        }
                    }
                    MirrorEvent::JoinFailed { reason } => {
                        tracing::error!("Could not join the game: {reason}");
                        break;
                    }
                    MirrorEvent::Closed => break,
                    other => tracing::warn!(?other, "mirror event"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving the game");
                break;
            }
        }
    }

    mirror.leave().await;
    manager.disconnect().await;
    Ok(())
}
