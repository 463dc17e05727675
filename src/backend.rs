//! How a mirror learns about game changes and tells the server about actions.
//!
//! A [`SyncBackend`] is chosen once, when the mirror is opened:
//!
//! - [`PushBackend`] subscribes through the session's [`ChannelManager`];
//!   snapshots arrive whenever the server broadcasts. No local timer.
//! - [`PollBackend`] runs a self-rescheduling long-poll loop against a
//!   [`GameApi`]: fetch, apply, fetch again immediately; after a failure,
//!   wait `poll_backoff` and try again, forever, until the feed is stopped.
//!
//! Either way, [`attach`](SyncBackend::attach) hands back a [`Feed`] whose
//! teardown cancels the subscription or the pending fetch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::GameApi;
use crate::channel::{ChannelManager, JoinStatus};
use crate::config::ClientConfig;
use crate::error::{PokerError, Result};
use crate::event::MirrorEvent;
use crate::protocol::{ChangeId, ClientMessage, Confidence, GameId, GameSnapshot};
use crate::transport::Connector;

/// Receives what a feed produces for one mirror.
pub trait SnapshotSink: Send + Sync + 'static {
    fn on_snapshot(&self, snapshot: GameSnapshot);

    /// Failures the feed recovers from on its own, reported for display.
    fn on_event(&self, event: MirrorEvent);
}

/// A player action to forward to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameAction {
    Vote { card: String, confidence: Confidence },
    Unvote,
    Reveal,
    Restart,
    Update { name: String, ticket_url: String },
}

impl GameAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vote { .. } => "vote",
            Self::Unvote => "unvote",
            Self::Reveal => "reveal",
            Self::Restart => "restart",
            Self::Update { .. } => "update",
        }
    }
}

/// Capability shared by both transport strategies.
#[async_trait]
pub trait SyncBackend: Send + Sync + 'static {
    /// Start delivering `game_id`'s snapshots to `sink`.
    ///
    /// # Errors
    ///
    /// Fails if the feed cannot be started at all (e.g. the push channel was
    /// never connected). Later failures are reported through the sink.
    fn attach(&self, game_id: &str, sink: Arc<dyn SnapshotSink>) -> Result<Feed>;

    /// Forward `action` for `game_id` to the server.
    async fn dispatch(&self, game_id: &str, action: GameAction) -> Result<()>;
}

// ── Feed ────────────────────────────────────────────────────────────

/// Handle to a running snapshot feed. Stopping (or dropping) it cancels
/// every task the feed spawned and runs its release hook once.
pub struct Feed {
    tasks: Vec<JoinHandle<()>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Feed {
    pub fn new(tasks: Vec<JoinHandle<()>>, release: Option<Box<dyn FnOnce() + Send>>) -> Self {
        Self { tasks, release }
    }

    pub fn stop(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("tasks", &self.tasks.len())
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ── Push ────────────────────────────────────────────────────────────

/// Snapshots pushed over the session's channel.
pub struct PushBackend<C: Connector> {
    manager: Arc<ChannelManager<C>>,
}

impl<C: Connector> PushBackend<C> {
    pub fn new(manager: Arc<ChannelManager<C>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<C: Connector> SyncBackend for PushBackend<C> {
    fn attach(&self, game_id: &str, sink: Arc<dyn SnapshotSink>) -> Result<Feed> {
        let mut join_updates = self.manager.join_status_updates();
        let snapshot_sink = Arc::clone(&sink);
        self.manager.subscribe_game(
            game_id,
            Arc::new(move |snapshot| snapshot_sink.on_snapshot(snapshot)),
        )?;

        // The mirror must hear about a rejected join; no snapshots will come.
        let watched_game = game_id.to_string();
        let join_watch = tokio::spawn(async move {
            while join_updates.changed().await.is_ok() {
                let status = *join_updates.borrow_and_update();
                if status == Some(JoinStatus::JoinFailed) {
                    warn!(game_id = %watched_game, "push subscription rejected");
                    sink.on_event(MirrorEvent::JoinFailed {
                        reason: "server rejected the subscription".into(),
                    });
                }
            }
        });

        let manager = Arc::clone(&self.manager);
        let owned_game = game_id.to_string();
        let release: Box<dyn FnOnce() + Send> = Box::new(move || {
            // Another mirror may have subscribed since; leave only our game.
            if manager.current_game().as_deref() == Some(owned_game.as_str()) {
                manager.unsubscribe_game();
            }
        });

        Ok(Feed::new(vec![join_watch], Some(release)))
    }

    async fn dispatch(&self, game_id: &str, action: GameAction) -> Result<()> {
        // Channel actions apply to whatever game the session joined last.
        if self.manager.current_game().as_deref() != Some(game_id) {
            return Err(PokerError::NotSubscribed);
        }
        let message = match action {
            GameAction::Vote { card, confidence } => ClientMessage::Vote {
                vote: card,
                confidence,
            },
            GameAction::Unvote => ClientMessage::Unvote,
            GameAction::Reveal => ClientMessage::Reveal,
            GameAction::Restart => ClientMessage::Restart,
            GameAction::Update { name, ticket_url } => ClientMessage::Update { name, ticket_url },
        };
        self.manager.send(message)
    }
}

// ── Poll ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PollSettings {
    backoff: Duration,
    interval: Duration,
    long_poll: bool,
    heartbeat: Option<Duration>,
}

/// Snapshots fetched by a long-poll loop.
pub struct PollBackend {
    api: Arc<dyn GameApi>,
    settings: PollSettings,
}

impl PollBackend {
    pub fn new(api: Arc<dyn GameApi>, config: &ClientConfig) -> Self {
        Self {
            api,
            settings: PollSettings {
                backoff: config.poll_backoff,
                interval: config.poll_interval,
                long_poll: config.long_poll,
                heartbeat: config.heartbeat_interval,
            },
        }
    }
}

#[async_trait]
impl SyncBackend for PollBackend {
    fn attach(&self, game_id: &str, sink: Arc<dyn SnapshotSink>) -> Result<Feed> {
        let mut tasks = vec![tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            game_id.to_string(),
            Arc::clone(&sink),
            self.settings,
        ))];

        if let Some(period) = self.settings.heartbeat {
            tasks.push(tokio::spawn(heartbeat_loop(
                Arc::clone(&self.api),
                game_id.to_string(),
                sink,
                period,
            )));
        }

        Ok(Feed::new(tasks, None))
    }

    async fn dispatch(&self, game_id: &str, action: GameAction) -> Result<()> {
        match action {
            GameAction::Vote { card, confidence } => self.api.vote(game_id, &card, confidence).await,
            GameAction::Unvote => self.api.unvote(game_id).await,
            GameAction::Reveal => self.api.reveal(game_id).await,
            GameAction::Restart => self.api.restart(game_id).await,
            GameAction::Update { name, ticket_url } => {
                self.api.update_game(game_id, &name, &ticket_url).await
            }
        }
    }
}

fn report_failure(sink: &dyn SnapshotSink, err: &PokerError, retry_in: Duration) {
    if err.is_auth_failure() {
        sink.on_event(MirrorEvent::AuthenticationFailed);
    } else {
        sink.on_event(MirrorEvent::FetchFailed {
            reason: err.to_string(),
            retry_in,
        });
    }
}

/// Join the game, then fetch snapshots until aborted.
///
/// Never returns on its own: every failure is retried after
/// `settings.backoff`, every success is followed by the next fetch after
/// `settings.interval` (zero by default).
async fn poll_loop(
    api: Arc<dyn GameApi>,
    game_id: GameId,
    sink: Arc<dyn SnapshotSink>,
    settings: PollSettings,
) {
    loop {
        match api.join(&game_id).await {
            Ok(()) => break,
            Err(e) => {
                warn!(game_id = %game_id, retry_in = ?settings.backoff, "join failed: {e}");
                if e.is_auth_failure() {
                    sink.on_event(MirrorEvent::AuthenticationFailed);
                } else {
                    sink.on_event(MirrorEvent::JoinFailed {
                        reason: e.to_string(),
                    });
                }
                tokio::time::sleep(settings.backoff).await;
            }
        }
    }
    info!(game_id = %game_id, "joined game, polling for snapshots");

    let mut last_seen: Option<ChangeId> = None;
    loop {
        let since = if settings.long_poll { last_seen } else { None };
        match api.game_state(&game_id, since).await {
            Ok(snapshot) => {
                debug!(game_id = %game_id, change_id = snapshot.change_id, "fetched snapshot");
                last_seen = Some(last_seen.map_or(snapshot.change_id, |seen| {
                    seen.max(snapshot.change_id)
                }));
                sink.on_snapshot(snapshot);
                if settings.interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(settings.interval).await;
                }
            }
            Err(e) => {
                warn!(game_id = %game_id, retry_in = ?settings.backoff, "snapshot fetch failed: {e}");
                report_failure(sink.as_ref(), &e, settings.backoff);
                tokio::time::sleep(settings.backoff).await;
            }
        }
    }
}

async fn heartbeat_loop(
    api: Arc<dyn GameApi>,
    game_id: GameId,
    sink: Arc<dyn SnapshotSink>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the join already marks presence.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = api.ping(&game_id).await {
            debug!(game_id = %game_id, "presence ping failed: {e}");
            if e.is_auth_failure() {
                sink.on_event(MirrorEvent::AuthenticationFailed);
            }
        }
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
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn feed_stop_runs_release_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let feed = Feed::new(
            vec![],
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        feed.stop();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_feed_aborts_its_tasks() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        drop(Feed::new(vec![task], None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[test]
    fn action_names() {
        assert_eq!(GameAction::Unvote.name(), "unvote");
        assert_eq!(
            GameAction::Vote {
                card: "5".into(),
                confidence: Confidence::Normal
            }
            .name(),
            "vote"
        );
    }
}
