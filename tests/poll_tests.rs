//! Integration tests for the long-poll backend and the end-to-end game flow.
//!
//! The in-memory `FakeServer` from `tests/common` plays the server: it keeps
//! games, masks unrevealed votes, holds long-poll requests until the game
//! changes, and can be told to fail fetches.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use planning_poker_client::{
    ChangeId, ClientConfig, Confidence, CreateGameParams, GameApi, GameId, GameMirror, GamePhase,
    GameSnapshot, MirrorEvent, PokerError, PollBackend, SyncBackend,
};
use tokio::sync::mpsc;

use common::{eventually, FakeServer};

fn config() -> ClientConfig {
    ClientConfig::new("http://localhost:8080/api/v1").with_heartbeat_interval(None)
}

fn poll_backend(api: Arc<dyn GameApi>, config: &ClientConfig) -> Arc<dyn SyncBackend> {
    Arc::new(PollBackend::new(api, config))
}

async fn create_game(server: &FakeServer, creator: &str) -> GameId {
    server
        .client(creator)
        .create_game(&CreateGameParams::new("Sprint 12"))
        .await
        .unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<MirrorEvent>) -> MirrorEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for mirror event")
        .expect("event channel closed")
}

// ════════════════════════════════════════════════════════════════════
// Poll loop timing
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn failed_fetch_waits_for_backoff_then_succeeds_without_delay() {
    let server = FakeServer::new();
    let game_id = create_game(&server, "alice").await;
    server.fail_next_fetches(1);

    let config = config();
    let (mirror, mut events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    match next_event(&mut events).await {
        MirrorEvent::FetchFailed { retry_in, .. } => assert_eq!(retry_in, Duration::from_secs(1)),
        other => panic!("expected FetchFailed, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        MirrorEvent::SnapshotApplied { .. }
    ));

    // The next fetch is a long-poll that the fake holds open.
    eventually(Duration::from_secs(30), || server.fetch_times().len() >= 3).await;
    let times = server.fetch_times();
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert!(times[2] - times[1] < Duration::from_millis(1));

    mirror.leave().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_keep_a_fixed_cadence() {
    let server = FakeServer::new();
    let game_id = create_game(&server, "alice").await;
    server.fail_next_fetches(4);

    let config = config().with_poll_backoff(Duration::from_secs(2));
    let (mirror, _events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    eventually(Duration::from_secs(60), || server.fetch_times().len() >= 5).await;
    let times = server.fetch_times();
    for pair in times.windows(2).take(4) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(2));
    }
    eventually(Duration::from_secs(60), || mirror.last_change_id().is_some()).await;
    assert_eq!(mirror.name(), "Sprint 12");
    mirror.leave().await;
}

#[tokio::test(start_paused = true)]
async fn leave_cancels_the_pending_fetch() {
    let server = FakeServer::new();
    let game_id = create_game(&server, "alice").await;

    let config = config();
    let (mirror, mut events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        MirrorEvent::SnapshotApplied { .. }
    ));

    mirror.leave().await;
    assert_eq!(next_event(&mut events).await, MirrorEvent::Closed);
    let fetches = server.fetch_times().len();

    // A change that would have completed the held request.
    server
        .client("bob")
        .update_game(&game_id, "renamed", "")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(server.fetch_times().len(), fetches);
    assert_eq!(events.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_while_attached() {
    let server = FakeServer::new();
    let game_id = create_game(&server, "alice").await;

    let config = config().with_heartbeat_interval(Some(Duration::from_secs(5)));
    let (mirror, _events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(server.pings(), 3);

    mirror.leave().await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(server.pings(), 3);
}

// ════════════════════════════════════════════════════════════════════
// Authentication failures
// ════════════════════════════════════════════════════════════════════

/// Rejects every request as if the session were unknown.
struct RevokedSession;

#[async_trait]
impl GameApi for RevokedSession {
    async fn create_game(&self, _: &CreateGameParams) -> Result<GameId, PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn update_game(&self, _: &str, _: &str, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn game_state(&self, _: &str, _: Option<ChangeId>) -> Result<GameSnapshot, PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn join(&self, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn vote(&self, _: &str, _: &str, _: Confidence) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn unvote(&self, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn reveal(&self, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn restart(&self, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
    async fn ping(&self, _: &str) -> Result<(), PokerError> {
        Err(PokerError::Unauthorized)
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_session_is_reported_and_retried() {
    let config = config();
    let (mirror, mut events) =
        GameMirror::open("g1", poll_backend(Arc::new(RevokedSession), &config), &config).unwrap();

    assert_eq!(
        next_event(&mut events).await,
        MirrorEvent::AuthenticationFailed
    );
    // Still retrying on the backoff cadence.
    assert_eq!(
        next_event(&mut events).await,
        MirrorEvent::AuthenticationFailed
    );

    mirror.vote("5").unwrap();
    assert_eq!(
        next_event(&mut events).await,
        MirrorEvent::AuthenticationFailed
    );
    mirror.leave().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_game_reports_join_failure() {
    let server = FakeServer::new();
    let config = config();
    let (mirror, mut events) =
        GameMirror::open("missing", poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    match next_event(&mut events).await {
        MirrorEvent::JoinFailed { reason } => assert!(reason.contains("game not found")),
        other => panic!("expected JoinFailed, got {other:?}"),
    }
    assert!(server.fetch_times().is_empty());
    mirror.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// End to end
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn two_players_vote_reveal_and_restart() {
    let server = FakeServer::new();
    let config = config();
    let params = CreateGameParams::new("Sprint 12")
        .with_deck(planning_poker_client::CardsDeck::new("Fib", ["1", "2", "3", "5", "8"]));
    let game_id = server.client("alice").create_game(&params).await.unwrap();

    let (alice, _alice_events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();
    let (bob, _bob_events) =
        GameMirror::open(&game_id, poll_backend(server.client("bob"), &config), &config).unwrap();

    let timeout = Duration::from_secs(5);
    eventually(timeout, || alice.players().len() == 2 && bob.players().len() == 2).await;
    assert!(alice.is_running());
    assert_eq!(alice.cards(), ["1", "2", "3", "5", "8", "?"]);

    alice.vote("5").unwrap();
    bob.vote("8").unwrap();
    assert!(alice.is_active("5"));
    assert!(bob.is_active("8"));

    eventually(timeout, || {
        alice.players().iter().all(|p| p.has_voted())
            && bob.players().iter().all(|p| p.has_voted())
    })
    .await;
    for player in alice.players() {
        assert_eq!(player.revealed_vote(), None, "{} leaked", player.name);
    }
    assert_eq!(alice.own_vote().as_deref(), Some("5"));

    assert!(alice.can_reveal());
    alice.reveal().unwrap();
    eventually(timeout, || alice.is_finished() && bob.is_finished()).await;

    let revealed: Vec<_> = bob
        .players()
        .iter()
        .map(|p| (p.name.clone(), p.revealed_vote().map(str::to_string)))
        .collect();
    assert_eq!(
        revealed,
        [
            ("alice".to_string(), Some("5".to_string())),
            ("bob".to_string(), Some("8".to_string())),
        ]
    );
    assert_eq!(alice.own_vote(), None);
    assert_eq!(bob.own_vote(), None);
    assert_eq!(alice.confidence(), None);

    assert!(bob.can_restart());
    bob.restart().unwrap();
    eventually(timeout, || alice.is_running() && bob.is_running()).await;
    eventually(timeout, || {
        alice.players().iter().all(|p| !p.has_voted())
            && bob.players().iter().all(|p| !p.has_voted())
    })
    .await;
    assert!(!alice.has_voted());

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test]
async fn confidence_and_details_reach_the_server() {
    let server = FakeServer::new();
    let config = config();
    let game_id = create_game(&server, "alice").await;
    let (alice, _events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    let timeout = Duration::from_secs(5);
    eventually(timeout, || alice.players().len() == 1).await;

    alice.vote("M").unwrap();
    alice.change_confidence(Confidence::Sure).unwrap();
    alice
        .update_details("Sprint 13", "https://tracker.example/PRJ-7")
        .unwrap();

    assert_eq!(alice.name(), "Sprint 13");

    // Actions are dispatched in order, so once the rename lands both votes
    // have been processed too.
    let watcher = server.client("bob");
    let seen_by_bob = tokio::time::timeout(timeout, async {
        loop {
            let state = watcher.game_state(&game_id, None).await.unwrap();
            if state.name == "Sprint 13" {
                break state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("rename never reached the server");
    assert_eq!(seen_by_bob.ticket_url, "https://tracker.example/PRJ-7");

    let seen_by_alice = server
        .client("alice")
        .game_state(&game_id, None)
        .await
        .unwrap();
    assert_eq!(seen_by_alice.voted_card, "M");
    assert_eq!(seen_by_alice.confidence, Some(Confidence::Sure));

    alice.leave().await;
}

#[tokio::test]
async fn vote_then_retract_before_acknowledgement() {
    let server = FakeServer::new();
    let config = config();
    let game_id = create_game(&server, "alice").await;
    let (alice, _events) =
        GameMirror::open(&game_id, poll_backend(server.client("alice"), &config), &config)
            .unwrap();

    let timeout = Duration::from_secs(5);
    eventually(timeout, || alice.players().len() == 1).await;

    alice.vote("L").unwrap();
    alice.vote("L").unwrap();
    assert!(!alice.has_voted());

    alice.leave().await;
    let state = server
        .client("alice")
        .game_state(&game_id, None)
        .await
        .unwrap();
    assert_eq!(state.voted_card, "");
    assert_eq!(state.phase, GamePhase::Started);
}
