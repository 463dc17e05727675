//! # Poll Game Example
//!
//! Follows one game with the HTTP long-poll backend. Creates a game when
//! `POKER_GAME` is not set, then prints each snapshot until Ctrl+C.
//!
//! ## Running
//!
//! ```sh
//! POKER_BASE_URL=http://localhost:8080/api/v1 POKER_SESSION=<session id> \
//!     cargo run --example poll_game
//! ```

use std::sync::Arc;

use planning_poker_client::{
    ClientConfig, CreateGameParams, Credential, GameApi, GameMirror, HttpGameApi, MirrorEvent,
    PollBackend,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let credential = Credential::new(std::env::var("POKER_SESSION")?);
    let api = Arc::new(HttpGameApi::new(&config, credential)?);

    let game_id = match std::env::var("POKER_GAME") {
        Ok(id) => id,
        Err(_) => {
            let id = api.create_game(&CreateGameParams::new("Demo game")).await?;
            tracing::info!("Created game {id}");
            id
        }
    };

    let backend = Arc::new(PollBackend::new(api, &config));
    let (mirror, mut events) = GameMirror::open(game_id, backend, &config)?;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(MirrorEvent::SnapshotApplied { change_id }) => {
                        tracing::info!(
                            change_id,
                            players = mirror.players().len(),
                            can_reveal = mirror.can_reveal(),
                            "{} [{:?}]",
                            mirror.name(),
                            mirror.phase(),
                        );
                    }
                    Some(MirrorEvent::FetchFailed { reason, retry_in }) => {
                        tracing::warn!("Fetch failed ({reason}); retrying in {retry_in:?}");
                    }
                    Some(MirrorEvent::AuthenticationFailed) => {
                        tracing::error!("Session rejected; register again");
                        break;
                    }
                    Some(MirrorEvent::Closed) | None => break,
                    Some(other) => tracing::debug!(?other, "mirror event"),
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    mirror.leave().await;
    Ok(())
}
