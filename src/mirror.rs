//! Local projection of one game, kept in sync by a [`SyncBackend`].
//!
//! A [`GameMirror`] holds the latest accepted [`GameSnapshot`] plus the
//! participant's own pending vote and confidence. Mutations update the local
//! fields immediately and queue the server call on a background dispatcher,
//! so callers see the optimistic state without waiting for the round-trip.
//! The next accepted snapshot overwrites whatever was assumed.
//!
//! # Merge rule
//!
//! A snapshot is accepted when it is the first one, or when its change id is
//! greater than or equal to the last accepted id. Accepted snapshots
//! overwrite every snapshot-derived field; players are sorted by name. When
//! the resulting phase is [`GamePhase::Finished`] the own vote and confidence
//! are cleared. Older snapshots are discarded.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = Arc::new(PushBackend::new(Arc::clone(&manager)));
//! let (mirror, mut events) = GameMirror::open("g1", backend, &config)?;
//!
//! mirror.vote("5")?;
//! assert!(mirror.is_active("5"));
//!
//! while let Some(event) = events.recv().await {
//!     if let MirrorEvent::SnapshotApplied { .. } = event {
//!         render(mirror.players());
//!     }
//! }
//! mirror.leave().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Feed, GameAction, SnapshotSink, SyncBackend};
use crate::config::ClientConfig;
use crate::error::{PokerError, Result};
use crate::event::MirrorEvent;
use crate::protocol::{
    CardsDeck, ChangeId, Confidence, GameId, GamePhase, GameSnapshot, PlayerState, UNREVEALED_CARD,
};

#[derive(Debug, Default)]
struct MirrorState {
    name: String,
    ticket_url: String,
    phase: GamePhase,
    deck: CardsDeck,
    players: Vec<PlayerState>,
    reveal_permission: bool,
    own_vote: Option<String>,
    confidence: Option<Confidence>,
    last_change_id: Option<ChangeId>,
}

/// State shared between the mirror handle, its sink and its dispatcher.
struct MirrorShared {
    game_id: GameId,
    state: StdMutex<MirrorState>,
    closed: AtomicBool,
    events: mpsc::Sender<MirrorEvent>,
}

impl MirrorShared {
    fn state(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Non-blocking; drops the event when the receiver falls behind.
    fn emit(&self, event: MirrorEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(game_id = %self.game_id, ?event, "mirror event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn apply(&self, mut snapshot: GameSnapshot) -> bool {
        if self.is_closed() {
            debug!(game_id = %self.game_id, "ignoring snapshot after teardown");
            return false;
        }
        if !snapshot.game_id.is_empty() && snapshot.game_id != self.game_id {
            debug!(game_id = %snapshot.game_id, "ignoring snapshot for another game");
            return false;
        }

        let change_id = snapshot.change_id;
        let mut state = self.state();

        if let Some(last_accepted) = state.last_change_id {
            if change_id < last_accepted {
                drop(state);
                warn!(
                    game_id = %self.game_id,
                    change_id,
                    last_accepted,
                    "discarding stale snapshot"
                );
                self.emit(MirrorEvent::SnapshotDiscarded {
                    change_id,
                    last_accepted,
                });
                return false;
            }
        }

        snapshot.players.sort_by(|a, b| a.name.cmp(&b.name));

        state.name = snapshot.name;
        state.ticket_url = snapshot.ticket_url;
        state.phase = snapshot.phase;
        state.deck = snapshot.cards_deck;
        state.players = snapshot.players;
        state.reveal_permission = snapshot.can_reveal;
        state.last_change_id = Some(change_id);

        match snapshot.voted_card.as_str() {
            "" => {
                state.own_vote = None;
                state.confidence = None;
            }
            // The server acknowledges a vote but masks it; keep ours, or
            // keep having none rather than adopting the mask as a card.
            UNREVEALED_CARD => {}
            card => {
                state.own_vote = Some(card.to_string());
                state.confidence = Some(snapshot.confidence.unwrap_or_default());
            }
        }

        if state.phase == GamePhase::Finished {
            state.own_vote = None;
            state.confidence = None;
        }
        drop(state);

        debug!(game_id = %self.game_id, change_id, "applied snapshot");
        self.emit(MirrorEvent::SnapshotApplied { change_id });
        true
    }
}

/// Feeds backend output into a mirror without keeping it alive.
struct MirrorSink {
    shared: Weak<MirrorShared>,
}

impl SnapshotSink for MirrorSink {
    fn on_snapshot(&self, snapshot: GameSnapshot) {
        if let Some(shared) = self.shared.upgrade() {
            shared.apply(snapshot);
        }
    }

    fn on_event(&self, event: MirrorEvent) {
        if let Some(shared) = self.shared.upgrade() {
            if !shared.is_closed() {
                shared.emit(event);
            }
        }
    }
}

/// The local view of one game.
///
/// Exclusively owned by the view that opened it. Dropping it tears down the
/// feed and the dispatcher immediately; [`leave`](Self::leave) does the same
/// but first lets queued actions reach the server.
pub struct GameMirror {
    shared: Arc<MirrorShared>,
    feed: Option<Feed>,
    outbox: Option<mpsc::UnboundedSender<GameAction>>,
    dispatcher: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl GameMirror {
    /// Open a mirror for `game_id` and start its feed.
    ///
    /// Returns the mirror and the receiving end of its event channel
    /// (capacity `config.event_channel_capacity`). Must be called from within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Propagates the backend's attach failure, e.g.
    /// [`PokerError::NotConnected`] for a push backend whose channel was never
    /// opened.
    pub fn open(
        game_id: impl Into<GameId>,
        backend: Arc<dyn SyncBackend>,
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<MirrorEvent>)> {
        let game_id = game_id.into();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let shared = Arc::new(MirrorShared {
            game_id: game_id.clone(),
            state: StdMutex::new(MirrorState::default()),
            closed: AtomicBool::new(false),
            events: event_tx,
        });

        let sink = Arc::new(MirrorSink {
            shared: Arc::downgrade(&shared),
        });
        let feed = backend.attach(&game_id, sink)?;

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(backend, Arc::clone(&shared), outbox_rx));

        info!(game_id = %game_id, "game mirror opened");
        Ok((
            Self {
                shared,
                feed: Some(feed),
                outbox: Some(outbox),
                dispatcher: Some(dispatcher),
                shutdown_timeout: config.shutdown_timeout,
            },
            event_rx,
        ))
    }

    fn state(&self) -> MutexGuard<'_, MirrorState> {
        self.shared.state()
    }

    fn queue(&self, action: GameAction) -> Result<()> {
        let outbox = self.outbox.as_ref().ok_or(PokerError::MirrorClosed)?;
        debug!(game_id = %self.shared.game_id, action = action.name(), "queueing action");
        outbox.send(action).map_err(|_| PokerError::MirrorClosed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(PokerError::MirrorClosed);
        }
        Ok(())
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Vote for `card`, or retract the vote if `card` is already the own vote.
    ///
    /// The own vote changes before this returns; the server call follows in
    /// the background. A fresh vote carries the default confidence.
    ///
    /// # Errors
    ///
    /// [`PokerError::InvalidCard`] for a blank card or the server's
    /// unrevealed-vote placeholder; [`PokerError::MirrorClosed`] after
    /// teardown.
    pub fn vote(&self, card: &str) -> Result<()> {
        self.ensure_open()?;
        let card = card.trim();
        if card.is_empty() || card == UNREVEALED_CARD {
            return Err(PokerError::InvalidCard(card.to_string()));
        }

        let action = {
            let mut state = self.state();
            if state.own_vote.as_deref() == Some(card) {
                state.own_vote = None;
                state.confidence = None;
                GameAction::Unvote
            } else {
                let confidence = Confidence::default();
                state.own_vote = Some(card.to_string());
                state.confidence = Some(confidence);
                GameAction::Vote {
                    card: card.to_string(),
                    confidence,
                }
            }
        };
        self.queue(action)
    }

    /// Re-send the current vote with `level`. Does nothing without a vote.
    pub fn change_confidence(&self, level: Confidence) -> Result<()> {
        self.ensure_open()?;
        let card = {
            let mut state = self.state();
            let Some(card) = state.own_vote.clone() else {
                return Ok(());
            };
            state.confidence = Some(level);
            card
        };
        self.queue(GameAction::Vote {
            card,
            confidence: level,
        })
    }

    /// Ask the server to reveal the votes.
    ///
    /// Check [`can_reveal`](Self::can_reveal) first. The phase changes when
    /// the resulting snapshot arrives.
    pub fn reveal(&self) -> Result<()> {
        self.ensure_open()?;
        self.queue(GameAction::Reveal)
    }

    /// Ask the server to start a new round.
    ///
    /// Check [`can_restart`](Self::can_restart) first. The own vote is
    /// cleared by the resulting snapshot, not by this call.
    pub fn restart(&self) -> Result<()> {
        self.ensure_open()?;
        self.queue(GameAction::Restart)
    }

    /// Rename the game and change its ticket link.
    pub fn update_details(&self, name: &str, ticket_url: &str) -> Result<()> {
        self.ensure_open()?;
        {
            let mut state = self.state();
            state.name = name.to_string();
            state.ticket_url = ticket_url.to_string();
        }
        self.queue(GameAction::Update {
            name: name.to_string(),
            ticket_url: ticket_url.to_string(),
        })
    }

    /// Merge `snapshot` into the mirror. Returns whether it was accepted.
    ///
    /// The backend calls this for every snapshot it receives; it is public so
    /// a caller holding a snapshot from elsewhere (e.g. a create response) can
    /// seed the mirror.
    pub fn apply_snapshot(&self, snapshot: GameSnapshot) -> bool {
        self.shared.apply(snapshot)
    }

    /// Tear the mirror down.
    ///
    /// Stops the feed (cancelling a pending fetch or leaving the channel
    /// group), lets already queued actions reach the server within the
    /// configured shutdown timeout, then emits [`MirrorEvent::Closed`].
    /// Snapshots arriving afterwards are ignored.
    pub async fn leave(mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(feed) = self.feed.take() {
            feed.stop();
        }

        self.outbox = None;
        if let Some(mut dispatcher) = self.dispatcher.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut dispatcher)
                .await
                .is_err()
            {
                warn!(game_id = %self.shared.game_id, "dispatcher did not drain in time; aborting");
                dispatcher.abort();
            }
        }

        let closed = self.shared.events.send(MirrorEvent::Closed);
        if tokio::time::timeout(self.shutdown_timeout, closed).await.is_err() {
            warn!(game_id = %self.shared.game_id, "event receiver stalled; Closed not delivered");
        }
        info!(game_id = %self.shared.game_id, "left game");
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn game_id(&self) -> &str {
        &self.shared.game_id
    }

    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    pub fn ticket_url(&self) -> String {
        self.state().ticket_url.clone()
    }

    pub fn phase(&self) -> GamePhase {
        self.state().phase
    }

    /// A voting round is in progress.
    pub fn is_running(&self) -> bool {
        self.phase() == GamePhase::Started
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == GamePhase::Finished
    }

    /// Selectable cards in deck order, always including the abstain card.
    pub fn cards(&self) -> Vec<String> {
        self.state().deck.selectable()
    }

    /// Players sorted by name.
    pub fn players(&self) -> Vec<PlayerState> {
        self.state().players.clone()
    }

    pub fn own_vote(&self) -> Option<String> {
        self.state().own_vote.clone()
    }

    pub fn confidence(&self) -> Option<Confidence> {
        self.state().confidence
    }

    pub fn has_voted(&self) -> bool {
        self.state().own_vote.is_some()
    }

    /// Whether `card` is the own vote.
    pub fn is_active(&self, card: &str) -> bool {
        self.state().own_vote.as_deref() == Some(card)
    }

    pub fn can_reveal(&self) -> bool {
        let state = self.state();
        state.reveal_permission && state.phase == GamePhase::Started
    }

    pub fn can_restart(&self) -> bool {
        let state = self.state();
        state.reveal_permission && state.phase == GamePhase::Finished
    }

    /// `None` until the first snapshot is accepted.
    pub fn last_change_id(&self) -> Option<ChangeId> {
        self.state().last_change_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for GameMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameMirror")
            .field("game_id", &self.shared.game_id)
            .field("state", &*self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for GameMirror {
    fn drop(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.feed = None;
        self.outbox = None;
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.shared.emit(MirrorEvent::Closed);
    }
}

/// Forward queued actions to the backend one at a time, in order.
async fn dispatch_loop(
    backend: Arc<dyn SyncBackend>,
    shared: Arc<MirrorShared>,
    mut outbox: mpsc::UnboundedReceiver<GameAction>,
) {
    while let Some(action) = outbox.recv().await {
        let name = action.name();
        if let Err(e) = backend.dispatch(&shared.game_id, action).await {
            warn!(game_id = %shared.game_id, action = name, "action failed: {e}");
            if e.is_auth_failure() {
                shared.emit(MirrorEvent::AuthenticationFailed);
            } else {
                shared.emit(MirrorEvent::ActionFailed {
                    action: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    debug!(game_id = %shared.game_id, "dispatcher drained");
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
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingBackend {
        actions: StdMutex<Vec<GameAction>>,
        sink: StdMutex<Option<Arc<dyn SnapshotSink>>>,
        fail_dispatch: AtomicBool,
    }

    impl RecordingBackend {
        fn actions(&self) -> Vec<GameAction> {
            self.actions.lock().unwrap().clone()
        }

        fn push(&self, snapshot: GameSnapshot) {
            let sink = self.sink.lock().unwrap().clone().expect("attached");
            sink.on_snapshot(snapshot);
        }
    }

    #[async_trait]
    impl SyncBackend for RecordingBackend {
        fn attach(&self, _game_id: &str, sink: Arc<dyn SnapshotSink>) -> Result<Feed> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(Feed::new(vec![], None))
        }

        async fn dispatch(&self, _game_id: &str, action: GameAction) -> Result<()> {
            self.actions.lock().unwrap().push(action);
            if self.fail_dispatch.load(Ordering::SeqCst) {
                return Err(PokerError::Http {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn snapshot(change_id: ChangeId, phase: GamePhase) -> GameSnapshot {
        GameSnapshot {
            game_id: "g1".into(),
            name: "Sprint".into(),
            ticket_url: String::new(),
            change_id,
            cards_deck: CardsDeck::new("Fib", ["1", "2", "3", "5", "8"]),
            players: vec![],
            phase,
            voted_card: String::new(),
            confidence: None,
            can_reveal: true,
        }
    }

    fn player(name: &str, card: &str) -> PlayerState {
        PlayerState {
            name: name.into(),
            voted_card: card.into(),
            confidence: None,
        }
    }

    fn open() -> (GameMirror, mpsc::Receiver<MirrorEvent>, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let config = ClientConfig::new("http://localhost");
        let (mirror, events) =
            GameMirror::open("g1", Arc::clone(&backend) as Arc<dyn SyncBackend>, &config)
                .unwrap();
        (mirror, events, backend)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn vote_is_optimistic_and_dispatched() {
        let (mirror, _events, backend) = open();
        mirror.vote(" 5 ").unwrap();

        assert_eq!(mirror.own_vote().as_deref(), Some("5"));
        assert!(mirror.is_active("5"));
        assert!(mirror.has_voted());
        assert_eq!(mirror.confidence(), Some(Confidence::Normal));

        settle().await;
        assert_eq!(
            backend.actions(),
            vec![GameAction::Vote {
                card: "5".into(),
                confidence: Confidence::Normal
            }]
        );
    }

    #[tokio::test]
    async fn voting_same_card_twice_retracts() {
        let (mirror, _events, backend) = open();
        mirror.vote("8").unwrap();
        mirror.vote("8").unwrap();

        assert_eq!(mirror.own_vote(), None);
        assert!(!mirror.has_voted());
        settle().await;
        assert_eq!(backend.actions().last(), Some(&GameAction::Unvote));
        assert_eq!(backend.actions().len(), 2);
    }

    #[tokio::test]
    async fn blank_and_placeholder_cards_are_rejected() {
        let (mirror, _events, backend) = open();
        assert!(matches!(mirror.vote("  "), Err(PokerError::InvalidCard(_))));
        assert!(matches!(mirror.vote("*"), Err(PokerError::InvalidCard(_))));
        settle().await;
        assert!(backend.actions().is_empty());
    }

    #[tokio::test]
    async fn confidence_requires_a_vote() {
        let (mirror, _events, backend) = open();
        mirror.change_confidence(Confidence::Sure).unwrap();
        assert_eq!(mirror.confidence(), None);

        mirror.vote("3").unwrap();
        mirror.change_confidence(Confidence::Unsure).unwrap();
        assert_eq!(mirror.confidence(), Some(Confidence::Unsure));

        settle().await;
        assert_eq!(
            backend.actions(),
            vec![
                GameAction::Vote {
                    card: "3".into(),
                    confidence: Confidence::Normal
                },
                GameAction::Vote {
                    card: "3".into(),
                    confidence: Confidence::Unsure
                },
            ]
        );
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_roll_back() {
        let (mirror, mut events, _backend) = open();
        let mut newer = snapshot(5, GamePhase::Started);
        newer.name = "newer".into();
        let mut older = snapshot(3, GamePhase::Waiting);
        older.name = "older".into();

        assert!(mirror.apply_snapshot(newer));
        assert!(!mirror.apply_snapshot(older));

        assert_eq!(mirror.name(), "newer");
        assert_eq!(mirror.phase(), GamePhase::Started);
        assert_eq!(mirror.last_change_id(), Some(5));
        assert_eq!(
            events.recv().await,
            Some(MirrorEvent::SnapshotApplied { change_id: 5 })
        );
        assert_eq!(
            events.recv().await,
            Some(MirrorEvent::SnapshotDiscarded {
                change_id: 3,
                last_accepted: 5
            })
        );
    }

    #[tokio::test]
    async fn equal_change_id_is_accepted_idempotently() {
        let (mirror, _events, _backend) = open();
        let snap = snapshot(7, GamePhase::Started);
        assert!(mirror.apply_snapshot(snap.clone()));
        let players_before = mirror.players();
        assert!(mirror.apply_snapshot(snap));
        assert_eq!(mirror.players(), players_before);
        assert_eq!(mirror.last_change_id(), Some(7));
    }

    #[tokio::test]
    async fn players_are_sorted_ordinally() {
        let (mirror, _events, _backend) = open();
        let mut snap = snapshot(1, GamePhase::Started);
        snap.players = vec![player("bob", ""), player("Zed", "*"), player("Ann", "")];
        mirror.apply_snapshot(snap);

        let names: Vec<_> = mirror.players().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Ann", "Zed", "bob"]);
    }

    #[tokio::test]
    async fn finished_snapshot_clears_pending_vote() {
        let (mirror, _events, _backend) = open();
        mirror.apply_snapshot(snapshot(1, GamePhase::Started));
        mirror.vote("5").unwrap();
        mirror.change_confidence(Confidence::Sure).unwrap();

        let mut finished = snapshot(2, GamePhase::Finished);
        finished.voted_card = "5".into();
        mirror.apply_snapshot(finished);

        assert_eq!(mirror.own_vote(), None);
        assert_eq!(mirror.confidence(), None);
        assert!(mirror.is_finished());
    }

    #[tokio::test]
    async fn snapshot_vote_overwrites_local_intent() {
        let (mirror, _events, _backend) = open();
        mirror.vote("5").unwrap();

        let mut confirmed = snapshot(1, GamePhase::Started);
        confirmed.voted_card = "8".into();
        confirmed.confidence = Some(Confidence::Sure);
        mirror.apply_snapshot(confirmed);
        assert_eq!(mirror.own_vote().as_deref(), Some("8"));
        assert_eq!(mirror.confidence(), Some(Confidence::Sure));

        let mut masked = snapshot(2, GamePhase::Started);
        masked.voted_card = UNREVEALED_CARD.into();
        mirror.apply_snapshot(masked);
        assert_eq!(mirror.own_vote().as_deref(), Some("8"));

        mirror.apply_snapshot(snapshot(3, GamePhase::Started));
        assert_eq!(mirror.own_vote(), None);
    }

    #[tokio::test]
    async fn masked_vote_without_local_vote_is_not_adopted() {
        let (mirror, _events, _backend) = open();

        let mut masked = snapshot(1, GamePhase::Started);
        masked.voted_card = UNREVEALED_CARD.into();
        mirror.apply_snapshot(masked);

        assert_eq!(mirror.own_vote(), None);
        assert!(!mirror.has_voted());
        assert!(!mirror.is_active(UNREVEALED_CARD));
    }

    #[tokio::test]
    async fn reveal_and_restart_permissions() {
        let (mirror, _events, _backend) = open();
        let phases = [GamePhase::Waiting, GamePhase::Started, GamePhase::Finished];
        let mut change_id = 0;

        for permission in [false, true] {
            for phase in phases {
                change_id += 1;
                let mut snap = snapshot(change_id, phase);
                snap.can_reveal = permission;
                mirror.apply_snapshot(snap);

                assert_eq!(
                    mirror.can_reveal(),
                    permission && phase == GamePhase::Started,
                    "can_reveal with permission={permission} phase={phase:?}"
                );
                assert_eq!(
                    mirror.can_restart(),
                    permission && phase == GamePhase::Finished,
                    "can_restart with permission={permission} phase={phase:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn reveal_does_not_flip_phase_locally() {
        let (mirror, _events, backend) = open();
        mirror.apply_snapshot(snapshot(1, GamePhase::Started));
        assert!(mirror.can_reveal());
        mirror.reveal().unwrap();
        assert!(mirror.is_running());
        settle().await;
        assert_eq!(backend.actions(), vec![GameAction::Reveal]);
    }

    #[tokio::test]
    async fn snapshots_for_other_games_are_ignored() {
        let (mirror, _events, _backend) = open();
        let mut foreign = snapshot(1, GamePhase::Started);
        foreign.game_id = "g2".into();
        assert!(!mirror.apply_snapshot(foreign));
        assert_eq!(mirror.last_change_id(), None);
    }

    #[tokio::test]
    async fn failed_dispatch_is_reported() {
        let (mirror, mut events, backend) = open();
        backend.fail_dispatch.store(true, Ordering::SeqCst);
        mirror.restart().unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            MirrorEvent::ActionFailed { ref action, .. } if action == "restart"
        ));
    }

    #[tokio::test]
    async fn leave_flushes_queue_and_ignores_late_snapshots() {
        let (mirror, mut events, backend) = open();
        mirror.vote("2").unwrap();
        mirror.leave().await;

        assert_eq!(backend.actions().len(), 1);
        assert_eq!(events.recv().await, Some(MirrorEvent::Closed));

        // A response arriving after teardown.
        backend.push(snapshot(9, GamePhase::Finished));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn update_details_is_optimistic() {
        let (mirror, _events, backend) = open();
        mirror.update_details("Sprint 13", "https://t/1").unwrap();
        assert_eq!(mirror.name(), "Sprint 13");
        assert_eq!(mirror.ticket_url(), "https://t/1");
        settle().await;
        assert_eq!(
            backend.actions(),
            vec![GameAction::Update {
                name: "Sprint 13".into(),
                ticket_url: "https://t/1".into()
            }]
        );
    }

    #[tokio::test]
    async fn full_event_channel_drops_instead_of_blocking() {
        let backend = Arc::new(RecordingBackend::default());
        let config = ClientConfig::new("http://localhost").with_event_channel_capacity(1);
        let (mirror, mut events) =
            GameMirror::open("g1", Arc::clone(&backend) as Arc<dyn SyncBackend>, &config)
                .unwrap();

        for id in 1..=5 {
            mirror.apply_snapshot(snapshot(id, GamePhase::Started));
        }
        assert_eq!(mirror.last_change_id(), Some(5));
        assert_eq!(
            events.recv().await,
            Some(MirrorEvent::SnapshotApplied { change_id: 1 })
        );
        drop(mirror);
        assert_eq!(events.recv().await, Some(MirrorEvent::Closed));
    }
}
