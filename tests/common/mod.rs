#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for planning poker client integration tests.
//!
//! - [`MockTransport`] / [`MockServer`]: one push-channel connection whose
//!   server side the test drives.
//! - [`MockConnector`]: hands out scripted transports, one per attempt.
//! - [`FakeServer`]: an in-memory game server implementing [`GameApi`] per
//!   participant, with long-poll holds and fault injection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use planning_poker_client::protocol::UNREVEALED_CARD;
use planning_poker_client::{
    CardsDeck, ChangeId, ClientMessage, Confidence, Connector, CreateGameParams, Credential,
    GameApi, GameId, GamePhase, GameSnapshot, PlayerState, PokerError, ServerMessage, Transport,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ── MockTransport ───────────────────────────────────────────────────

/// Client side of a scripted push-channel connection.
pub struct MockTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

/// Server side of a [`MockTransport`].
pub struct MockServer {
    received: mpsc::UnboundedReceiver<String>,
    tx: Option<mpsc::UnboundedSender<String>>,
    pub closed: Arc<AtomicBool>,
}

pub fn mock_pair() -> (MockTransport, MockServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            to_server: client_tx,
            from_server: client_rx,
            closed: Arc::clone(&closed),
        },
        MockServer {
            received: server_rx,
            tx: Some(server_tx),
            closed,
        },
    )
}

impl MockServer {
    pub fn push(&self, message: &ServerMessage) {
        let json = serde_json::to_string(message).expect("server message serialization");
        self.push_raw(json);
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.into());
        }
    }

    /// Simulate a network drop: the client's `recv` returns `None`.
    pub fn drop_connection(&mut self) {
        self.tx = None;
    }

    pub async fn next_message(&mut self) -> ClientMessage {
        let raw = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("client side gone");
        serde_json::from_str(&raw).expect("client message json")
    }

    /// Every message received so far, without waiting.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(raw) = self.received.try_recv() {
            messages.push(serde_json::from_str(&raw).expect("client message json"));
        }
        messages
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), PokerError> {
        self.to_server
            .send(message)
            .map_err(|e| PokerError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PokerError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PokerError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Returns the scripted transports in order, then fails every attempt.
pub struct MockConnector {
    transports: StdMutex<VecDeque<MockTransport>>,
    pub attempts: Arc<AtomicUsize>,
    pub credentials: Arc<StdMutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new(transports: Vec<MockTransport>) -> Self {
        Self {
            transports: StdMutex::new(transports.into()),
            attempts: Arc::new(AtomicUsize::new(0)),
            credentials: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, credential: &Credential) -> Result<MockTransport, PokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.credentials
            .lock()
            .unwrap()
            .push(credential.as_str().to_string());
        self.transports
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PokerError::Io(std::io::ErrorKind::ConnectionRefused.into()))
    }
}

// ── Snapshot builders ───────────────────────────────────────────────

pub fn snapshot(game_id: &str, change_id: ChangeId, phase: GamePhase) -> GameSnapshot {
    GameSnapshot {
        game_id: game_id.into(),
        name: "Sprint".into(),
        ticket_url: String::new(),
        change_id,
        cards_deck: CardsDeck::new("Fib", ["1", "2", "3", "5", "8", "13"]),
        players: vec![],
        phase,
        voted_card: String::new(),
        confidence: None,
        can_reveal: true,
    }
}

pub fn game_state(snapshot: GameSnapshot) -> ServerMessage {
    ServerMessage::GameState(Box::new(snapshot))
}

pub fn join_ok(game_id: &str) -> ServerMessage {
    ServerMessage::JoinAck {
        game_id: game_id.into(),
        result: "ok".into(),
    }
}

// ── FakeServer ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Vote {
    card: String,
    confidence: Confidence,
}

#[derive(Debug)]
struct FakeGame {
    name: String,
    ticket_url: String,
    deck: CardsDeck,
    phase: GamePhase,
    everyone_can_reveal: bool,
    creator: String,
    players: BTreeMap<String, Option<Vote>>,
    change_id: ChangeId,
}

#[derive(Debug, Default)]
struct FakeState {
    games: BTreeMap<GameId, FakeGame>,
    next_id: u64,
    failing_fetches: usize,
    fetches: Vec<Instant>,
    pings: usize,
}

/// In-memory game server. Games start `started`; reveal finishes them and
/// restart clears every vote.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<StdMutex<FakeState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            changes: Arc::new(watch::Sender::new(0)),
        }
    }

    /// A [`GameApi`] acting as `player`.
    pub fn client(&self, player: &str) -> Arc<FakeApi> {
        Arc::new(FakeApi {
            server: self.clone(),
            player: player.to_string(),
            hold: Duration::from_secs(5),
        })
    }

    /// The next `count` snapshot fetches fail with HTTP 500.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().unwrap().failing_fetches = count;
    }

    /// When each snapshot fetch started.
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn pings(&self) -> usize {
        self.state.lock().unwrap().pings
    }

    fn mutate<T>(
        &self,
        game_id: &str,
        f: impl FnOnce(&mut FakeGame) -> Result<T, PokerError>,
    ) -> Result<T, PokerError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            let game = state.games.get_mut(game_id).ok_or(PokerError::Http {
                status: 404,
                message: "game not found".into(),
            })?;
            let value = f(game)?;
            game.change_id += 1;
            value
        };
        self.changes.send_modify(|n| *n += 1);
        Ok(result)
    }

    fn render(&self, game_id: &str, player: &str) -> Result<GameSnapshot, PokerError> {
        let state = self.state.lock().unwrap();
        let game = state.games.get(game_id).ok_or(PokerError::Http {
            status: 404,
            message: "game not found".into(),
        })?;
        let finished = game.phase == GamePhase::Finished;
        let players = game
            .players
            .iter()
            .map(|(name, vote)| PlayerState {
                name: name.clone(),
                voted_card: match vote {
                    Some(v) if finished => v.card.clone(),
                    Some(_) => UNREVEALED_CARD.to_string(),
                    None => String::new(),
                },
                confidence: vote.as_ref().filter(|_| finished).map(|v| v.confidence),
            })
            .collect();
        let own = game.players.get(player).cloned().flatten();
        Ok(GameSnapshot {
            // The HTTP API omits the id; the client fills it in.
            game_id: String::new(),
            name: game.name.clone(),
            ticket_url: game.ticket_url.clone(),
            change_id: game.change_id,
            cards_deck: game.deck.clone(),
            players,
            phase: game.phase,
            voted_card: own.as_ref().map(|v| v.card.clone()).unwrap_or_default(),
            confidence: own.map(|v| v.confidence),
            can_reveal: game.everyone_can_reveal || game.creator == player,
        })
    }

    fn current_change(&self, game_id: &str) -> Option<ChangeId> {
        self.state
            .lock()
            .unwrap()
            .games
            .get(game_id)
            .map(|g| g.change_id)
    }
}

pub struct FakeApi {
    server: FakeServer,
    player: String,
    hold: Duration,
}

fn bad_request(message: &str) -> PokerError {
    PokerError::Http {
        status: 400,
        message: message.into(),
    }
}

#[async_trait]
impl GameApi for FakeApi {
    async fn create_game(&self, params: &CreateGameParams) -> Result<GameId, PokerError> {
        let id = {
            let mut state = self.server.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("game-{}", state.next_id);
            state.games.insert(
                id.clone(),
                FakeGame {
                    name: params.name.clone(),
                    ticket_url: params.ticket_url.clone(),
                    deck: CardsDeck::new(
                        params.cards_deck.name.clone(),
                        params.cards_deck.types.clone(),
                    ),
                    phase: GamePhase::Started,
                    everyone_can_reveal: params.everyone_can_reveal,
                    creator: self.player.clone(),
                    players: BTreeMap::new(),
                    change_id: 1,
                },
            );
            id
        };
        Ok(id)
    }

    async fn update_game(
        &self,
        game_id: &str,
        name: &str,
        ticket_url: &str,
    ) -> Result<(), PokerError> {
        self.server.mutate(game_id, |game| {
            game.name = name.to_string();
            game.ticket_url = ticket_url.to_string();
            Ok(())
        })
    }

    async fn game_state(
        &self,
        game_id: &str,
        last_change_id: Option<ChangeId>,
    ) -> Result<GameSnapshot, PokerError> {
        let fail = {
            let mut state = self.server.state.lock().unwrap();
            state.fetches.push(Instant::now());
            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(PokerError::Http {
                status: 500,
                message: "injected failure".into(),
            });
        }

        if let Some(last) = last_change_id {
            let mut changes = self.server.changes.subscribe();
            let wait = async {
                loop {
                    if self.server.current_change(game_id).is_none_or(|c| c > last) {
                        break;
                    }
                    if changes.changed().await.is_err() {
                        break;
                    }
                }
            };
            let _ = tokio::time::timeout(self.hold, wait).await;
        }

        self.server.render(game_id, &self.player)
    }

    async fn join(&self, game_id: &str) -> Result<(), PokerError> {
        let player = self.player.clone();
        self.server.mutate(game_id, |game| {
            game.players.entry(player).or_insert(None);
            Ok(())
        })
    }

    async fn vote(&self, game_id: &str, card: &str, confidence: Confidence) -> Result<(), PokerError> {
        let player = self.player.clone();
        self.server.mutate(game_id, |game| {
            if game.phase != GamePhase::Started {
                return Err(bad_request("game is not running"));
            }
            if !game.deck.selectable().iter().any(|c| c == card) {
                return Err(bad_request("unknown card"));
            }
            let slot = game
                .players
                .get_mut(&player)
                .ok_or_else(|| bad_request("player is not in the game"))?;
            *slot = Some(Vote {
                card: card.to_string(),
                confidence,
            });
            Ok(())
        })
    }

    async fn unvote(&self, game_id: &str) -> Result<(), PokerError> {
        let player = self.player.clone();
        self.server.mutate(game_id, |game| {
            if let Some(slot) = game.players.get_mut(&player) {
                *slot = None;
            }
            Ok(())
        })
    }

    async fn reveal(&self, game_id: &str) -> Result<(), PokerError> {
        let player = self.player.clone();
        self.server.mutate(game_id, |game| {
            if !(game.everyone_can_reveal || game.creator == player) {
                return Err(bad_request("player cannot reveal"));
            }
            if game.phase != GamePhase::Started {
                return Err(bad_request("game is not running"));
            }
            game.phase = GamePhase::Finished;
            Ok(())
        })
    }

    async fn restart(&self, game_id: &str) -> Result<(), PokerError> {
        let player = self.player.clone();
        self.server.mutate(game_id, |game| {
            if !(game.everyone_can_reveal || game.creator == player) {
                return Err(bad_request("player cannot restart"));
            }
            game.phase = GamePhase::Started;
            for vote in game.players.values_mut() {
                *vote = None;
            }
            Ok(())
        })
    }

    async fn ping(&self, _game_id: &str) -> Result<(), PokerError> {
        self.server.state.lock().unwrap().pings += 1;
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
