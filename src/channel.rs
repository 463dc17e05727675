//! Session-wide push channel to the server.
//!
//! [`ChannelManager`] owns at most one live transport for the authenticated
//! session. It is constructed explicitly, shared by reference (usually in an
//! `Arc`), connected once on authentication and torn down on logout.
//!
//! A background loop task owns the transport. It multiplexes outgoing
//! commands, incoming server messages and the shutdown signal with
//! `tokio::select!`. When the transport drops, the loop reports
//! [`ChannelStatus::Reconnecting`], asks the [`Connector`] for a new transport
//! every `reconnect_delay`, and on success re-joins whatever game was last
//! subscribed, without any caller action.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = Arc::new(ChannelManager::new(connector, &config));
//! manager.connect(Credential::new(session_id));
//!
//! manager.subscribe_game("g1", Arc::new(|snapshot| { /* … */ }))?;
//! let mut status = manager.status_updates();
//! while status.changed().await.is_ok() {
//!     if *status.borrow() == ChannelStatus::Reconnecting { /* show indicator */ }
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{PokerError, Result};
use crate::protocol::{
    ClientMessage, CreateGameParams, Credential, GameId, GameSnapshot, ServerMessage, ACK_OK,
};
use crate::transport::{Connector, Transport};

/// Invoked for every pushed snapshot of the subscribed game.
pub type SnapshotCallback = Arc<dyn Fn(GameSnapshot) + Send + Sync>;

/// Connection status of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    /// No connection is open, or it was torn down.
    Disconnected,
    Connected,
    /// The transport dropped (or the first attempt failed) and the loop is
    /// retrying.
    Reconnecting,
}

/// Server acknowledgement of the current game subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinStatus {
    Pending,
    Joined,
    JoinFailed,
}

// ── Shared state ────────────────────────────────────────────────────

#[derive(Clone)]
struct Subscription {
    game_id: GameId,
    on_snapshot: SnapshotCallback,
    generation: u64,
}

/// State shared between the manager handle and the channel loop.
struct ChannelShared {
    status: watch::Sender<ChannelStatus>,
    join_status: watch::Sender<Option<JoinStatus>>,
    subscription: StdMutex<Option<Subscription>>,
    generation: AtomicU64,
    next_request: AtomicU64,
    pending_creates: StdMutex<VecDeque<PendingCreate>>,
}

/// A `create_game` caller waiting for its `created` reply.
struct PendingCreate {
    request: u64,
    reply: oneshot::Sender<GameId>,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            status: watch::Sender::new(ChannelStatus::Disconnected),
            join_status: watch::Sender::new(None),
            subscription: StdMutex::new(None),
            generation: AtomicU64::new(0),
            next_request: AtomicU64::new(0),
            pending_creates: StdMutex::new(VecDeque::new()),
        }
    }

    fn subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_subscription(&self) -> Option<Subscription> {
        self.subscription().clone()
    }

    fn pending_creates(&self) -> MutexGuard<'_, VecDeque<PendingCreate>> {
        self.pending_creates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn forget_create(&self, request: u64) {
        self.pending_creates().retain(|pending| pending.request != request);
    }

    fn set_status(&self, status: ChannelStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(?previous, ?status, "push channel status changed");
        }
    }

    fn set_join_status(&self, status: Option<JoinStatus>) {
        self.join_status.send_replace(status);
    }
}

enum Command {
    /// Serialize and send as-is.
    Send(ClientMessage),
    /// Send a join for the recorded subscription unless this connection
    /// already joined it.
    Join,
}

/// A running channel loop.
struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    reconnect_delay: Duration,
}

// ── Manager ─────────────────────────────────────────────────────────

/// The single push-channel connection of an authenticated session.
///
/// No method blocks on the network: commands are queued to the background
/// loop and return immediately, and outcomes are reported through
/// [`status_updates`](Self::status_updates) and
/// [`join_status_updates`](Self::join_status_updates).
pub struct ChannelManager<C: Connector> {
    connector: Arc<C>,
    settings: LoopSettings,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    shared: Arc<ChannelShared>,
    connection: StdMutex<Option<Connection>>,
}

impl<C: Connector> ChannelManager<C> {
    pub fn new(connector: C, config: &ClientConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            settings: LoopSettings {
                reconnect_delay: config.reconnect_delay,
            },
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
            shared: Arc::new(ChannelShared::new()),
            connection: StdMutex::new(None),
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the channel using `credential`.
    ///
    /// Idempotent: if a connection loop is already running for this manager,
    /// this does nothing. Must be called from within a Tokio runtime.
    pub fn connect(&self, credential: Credential) {
        let mut slot = self.connection();
        if slot.as_ref().is_some_and(|c| !c.task.is_finished()) {
            debug!("push channel already open, ignoring connect");
            return;
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(channel_loop(
            Arc::clone(&self.connector),
            credential,
            cmd_rx,
            Arc::clone(&self.shared),
            shutdown_rx,
            self.settings,
        ));

        *slot = Some(Connection {
            cmd_tx,
            task,
            shutdown_tx,
        });
    }

    /// Close the channel and stop reconnecting.
    ///
    /// The loop is given `shutdown_timeout` to close the transport before it
    /// is aborted. The subscription record is kept, so a later
    /// [`connect`](Self::connect) rejoins the same game.
    pub async fn disconnect(&self) {
        let Some(connection) = self.connection().take() else {
            return;
        };
        debug!("push channel disconnect requested");

        let _ = connection.shutdown_tx.send(());
        let mut task = connection.task;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => warn!("channel loop terminated with join error: {join_err}"),
            Err(_) => {
                warn!("channel loop did not exit within timeout; aborting task");
                task.abort();
            }
        }

        self.shared.set_status(ChannelStatus::Disconnected);
        self.shared.pending_creates().clear();
    }

    /// Join `game_id`'s broadcast group and deliver its snapshots to
    /// `on_snapshot`.
    ///
    /// Replaces any previous subscription. Join status goes to
    /// [`JoinStatus::Pending`] now and to `Joined` or `JoinFailed` when the
    /// server answers. The subscription is replayed after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`PokerError::NotConnected`] if [`connect`](Self::connect) was
    /// never called or the channel was torn down.
    pub fn subscribe_game(
        &self,
        game_id: impl Into<GameId>,
        on_snapshot: SnapshotCallback,
    ) -> Result<()> {
        let game_id = game_id.into();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let guard = self.connection();
        let connection = guard.as_ref().ok_or(PokerError::NotConnected)?;

        *self.shared.subscription() = Some(Subscription {
            game_id: game_id.clone(),
            on_snapshot,
            generation,
        });
        self.shared.set_join_status(Some(JoinStatus::Pending));
        debug!(game_id = %game_id, generation, "subscribing to game");

        connection
            .cmd_tx
            .send(Command::Join)
            .map_err(|_| PokerError::NotConnected)
    }

    /// Leave the current game's broadcast group.
    ///
    /// Clears the subscription record, so later reconnects do not rejoin.
    pub fn unsubscribe_game(&self) {
        let Some(previous) = self.shared.subscription().take() else {
            return;
        };
        self.shared.set_join_status(None);
        debug!(game_id = %previous.game_id, "unsubscribing from game");

        if let Some(connection) = self.connection().as_ref() {
            let _ = connection.cmd_tx.send(Command::Send(ClientMessage::Leave));
        }
    }

    /// Queue a message for the server.
    ///
    /// Messages queued while reconnecting are sent once the connection is
    /// back, after the subscription is replayed.
    ///
    /// # Errors
    ///
    /// Returns [`PokerError::NotConnected`] if there is no connection loop.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        let guard = self.connection();
        let connection = guard.as_ref().ok_or(PokerError::NotConnected)?;
        connection
            .cmd_tx
            .send(Command::Send(message))
            .map_err(|_| PokerError::NotConnected)
    }

    /// Create a game over the channel and wait for its id.
    ///
    /// `created` replies carry no request id; they are matched to callers in
    /// the order the requests were queued.
    ///
    /// # Errors
    ///
    /// [`PokerError::NotConnected`] if there is no connection loop;
    /// [`PokerError::Timeout`] if no reply arrives within `request_timeout`;
    /// [`PokerError::TransportClosed`] if the connection drops first.
    pub async fn create_game(&self, params: CreateGameParams) -> Result<GameId> {
        let (reply, reply_rx) = oneshot::channel();
        let request = self.shared.next_request.fetch_add(1, Ordering::Relaxed);

        {
            // Held across register and enqueue so waiter order matches send order.
            let guard = self.connection();
            let connection = guard.as_ref().ok_or(PokerError::NotConnected)?;
            self.shared
                .pending_creates()
                .push_back(PendingCreate { request, reply });
            if connection
                .cmd_tx
                .send(Command::Send(ClientMessage::Create(params)))
                .is_err()
            {
                self.shared.forget_create(request);
                return Err(PokerError::NotConnected);
            }
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(game_id)) => Ok(game_id),
            Ok(Err(_)) => Err(PokerError::TransportClosed),
            Err(_) => {
                debug!(request, "create_game timed out; dropping its reply slot");
                self.shared.forget_create(request);
                Err(PokerError::Timeout)
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn status(&self) -> ChannelStatus {
        *self.shared.status.borrow()
    }

    /// A receiver notified on every status transition.
    pub fn status_updates(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    /// `None` when no game is subscribed.
    pub fn join_status(&self) -> Option<JoinStatus> {
        *self.shared.join_status.borrow()
    }

    pub fn join_status_updates(&self) -> watch::Receiver<Option<JoinStatus>> {
        self.shared.join_status.subscribe()
    }

    /// The game the channel is subscribed to, if any.
    pub fn current_game(&self) -> Option<GameId> {
        self.shared.subscription().as_ref().map(|s| s.game_id.clone())
    }
}

impl<C: Connector> fmt::Debug for ChannelManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("status", &self.status())
            .field("join_status", &self.join_status())
            .field("current_game", &self.current_game())
            .finish()
    }
}

impl<C: Connector> Drop for ChannelManager<C> {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(connection) = self.connection().take() {
            connection.task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

enum SessionEnd {
    /// The transport dropped; reconnect.
    Dropped,
    /// Shutdown requested or every handle is gone.
    Closed,
}

/// Connect, run a session, and reconnect after drops until shut down.
async fn channel_loop<C: Connector>(
    connector: Arc<C>,
    credential: Credential,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<ChannelShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
    settings: LoopSettings,
) {
    debug!("channel loop started");
    let mut attempt: u64 = 0;

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = connector.connect(&credential) => result,
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                attempt += 1;
                warn!(attempt, "push channel connection failed: {e}");
                shared.set_status(ChannelStatus::Reconnecting);
                if sleep_or_shutdown(settings.reconnect_delay, &mut shutdown_rx).await {
                    break;
                }
                continue;
            }
        };

        shared.set_status(ChannelStatus::Connected);
        attempt = 0;

        let end = run_session(&mut transport, &mut cmd_rx, &shared, &mut shutdown_rx).await;
        match end {
            SessionEnd::Closed => {
                let _ = transport.close().await;
                break;
            }
            SessionEnd::Dropped => {
                shared.set_status(ChannelStatus::Reconnecting);
                // Replies to requests sent on the dead connection never come.
                shared.pending_creates().clear();
                if sleep_or_shutdown(settings.reconnect_delay, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    shared.set_status(ChannelStatus::Disconnected);
    debug!("channel loop exited");
}

/// Returns `true` if shutdown was requested while waiting.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown_rx => true,
        () = tokio::time::sleep(delay) => false,
    }
}

/// Drive one connection until it drops or the loop is told to stop.
async fn run_session<T: Transport>(
    transport: &mut T,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shared: &ChannelShared,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    // Generation of the subscription this connection has joined.
    let mut joined_generation = 0;

    if let Some(subscription) = shared.current_subscription() {
        info!(game_id = %subscription.game_id, "re-subscribing after connect");
        if send_join(transport, shared, &subscription).await.is_err() {
            return SessionEnd::Dropped;
        }
        joined_generation = subscription.generation;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let message = match cmd {
                    Some(Command::Send(message)) => message,
                    Some(Command::Join) => {
                        match shared.current_subscription() {
                            Some(sub) if sub.generation > joined_generation => {
                                if send_join(transport, shared, &sub).await.is_err() {
                                    return SessionEnd::Dropped;
                                }
                                joined_generation = sub.generation;
                            }
                            _ => debug!("join already sent on this connection"),
                        }
                        continue;
                    }
                    None => {
                        debug!("command channel closed, shutting down channel loop");
                        return SessionEnd::Closed;
                    }
                };
                if send_message(transport, &message).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }

            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return SessionEnd::Closed;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => handle_server_message(shared, message),
                        Err(e) => warn!("failed to deserialize server message: {e}; raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        info!("push channel closed by server");
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }
}

async fn send_join<T: Transport>(
    transport: &mut T,
    shared: &ChannelShared,
    subscription: &Subscription,
) -> Result<()> {
    shared.set_join_status(Some(JoinStatus::Pending));
    send_message(
        transport,
        &ClientMessage::Join {
            game_id: subscription.game_id.clone(),
        },
    )
    .await
}

async fn send_message<T: Transport>(transport: &mut T, message: &ClientMessage) -> Result<()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            // Programming error; the connection is still fine.
            error!("failed to serialize ClientMessage: {e}");
            return Ok(());
        }
    };
    transport.send(json).await.map_err(|e| {
        error!("transport send error: {e}");
        e
    })
}

fn handle_server_message(shared: &ChannelShared, message: ServerMessage) {
    match message {
        ServerMessage::GameState(snapshot) => {
            let Some(subscription) = shared.current_subscription() else {
                debug!("dropping snapshot, no active subscription");
                return;
            };
            if !snapshot.game_id.is_empty() && snapshot.game_id != subscription.game_id {
                debug!(game_id = %snapshot.game_id, "dropping snapshot for another game");
                return;
            }
            let mut snapshot = *snapshot;
            if snapshot.game_id.is_empty() {
                snapshot.game_id = subscription.game_id;
            }
            (subscription.on_snapshot)(snapshot);
        }
        ServerMessage::JoinAck { game_id, result } => {
            let current = shared.current_subscription();
            if current.as_ref().map(|s| &s.game_id) != Some(&game_id) {
                debug!(game_id = %game_id, "ignoring join ack for stale subscription");
                return;
            }
            if result == ACK_OK {
                info!(game_id = %game_id, "joined game");
                shared.set_join_status(Some(JoinStatus::Joined));
            } else {
                warn!(game_id = %game_id, reason = %result, "server rejected join");
                shared.set_join_status(Some(JoinStatus::JoinFailed));
            }
        }
        ServerMessage::Created { game_id } => {
            let waiter = shared.pending_creates().pop_front();
            match waiter {
                Some(pending) => {
                    if pending.reply.send(game_id).is_err() {
                        debug!("create_game caller gave up before the reply");
                    }
                }
                None => warn!(game_id = %game_id, "unsolicited created reply"),
            }
        }
        ServerMessage::Error { message } => warn!("server error: {message}"),
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
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport whose server side is driven by the test through channels.
    struct ChannelTransport {
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<String>,
    }

    struct ServerEnd {
        rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::UnboundedSender<String>,
    }

    fn pair() -> (ChannelTransport, ServerEnd) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport {
                to_server: client_tx,
                from_server: client_rx,
            },
            ServerEnd {
                rx: server_rx,
                tx: server_tx,
            },
        )
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), PokerError> {
            self.to_server
                .send(message)
                .map_err(|e| PokerError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PokerError>> {
            self.from_server.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), PokerError> {
            Ok(())
        }
    }

    struct QueueConnector {
        transports: StdMutex<VecDeque<ChannelTransport>>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for QueueConnector {
        type Transport = ChannelTransport;

        async fn connect(
            &self,
            _credential: &Credential,
        ) -> std::result::Result<ChannelTransport, PokerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.transports
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(PokerError::TransportClosed)
        }
    }

    fn manager(transports: Vec<ChannelTransport>) -> ChannelManager<QueueConnector> {
        let connector = QueueConnector {
            transports: StdMutex::new(transports.into()),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let config = ClientConfig::new("http://localhost")
            .with_reconnect_delay(Duration::from_millis(20));
        ChannelManager::new(connector, &config)
    }

    async fn next_message(server: &mut ServerEnd) -> ClientMessage {
        let raw = server.rx.recv().await.expect("client message");
        serde_json::from_str(&raw).unwrap()
    }

    async fn wait_for<T: PartialEq + Clone>(rx: &mut watch::Receiver<T>, wanted: T) {
        rx.wait_for(|v| *v == wanted).await.expect("watch closed");
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let manager = manager(vec![]);
        let result = manager.subscribe_game("g1", Arc::new(|_| {}));
        assert!(matches!(result, Err(PokerError::NotConnected)));
        assert_eq!(manager.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn join_ack_moves_join_status() {
        let (transport, mut server) = pair();
        let manager = manager(vec![transport]);
        manager.connect(Credential::new("sid"));
        wait_for(&mut manager.status_updates(), ChannelStatus::Connected).await;

        manager.subscribe_game("g1", Arc::new(|_| {})).unwrap();
        assert_eq!(manager.join_status(), Some(JoinStatus::Pending));
        assert_eq!(
            next_message(&mut server).await,
            ClientMessage::Join {
                game_id: "g1".into()
            }
        );

        let nack = ServerMessage::JoinAck {
            game_id: "g1".into(),
            result: "game not found".into(),
        };
        server.tx.send(serde_json::to_string(&nack).unwrap()).unwrap();
        wait_for(
            &mut manager.join_status_updates(),
            Some(JoinStatus::JoinFailed),
        )
        .await;

        manager.disconnect().await;
        assert_eq!(manager.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (transport, _server) = pair();
        let manager = manager(vec![transport]);
        manager.connect(Credential::new("sid"));
        manager.connect(Credential::new("sid"));
        wait_for(&mut manager.status_updates(), ChannelStatus::Connected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.connector.attempts.load(Ordering::SeqCst), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn snapshots_for_other_games_are_filtered() {
        let (transport, server) = pair();
        let manager = manager(vec![transport]);
        manager.connect(Credential::new("sid"));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager
            .subscribe_game(
                "g1",
                Arc::new(move |s: GameSnapshot| sink.lock().unwrap().push(s.game_id)),
            )
            .unwrap();

        for game_id in ["other", "g1", ""] {
            let snapshot = GameSnapshot {
                game_id: game_id.into(),
                name: String::new(),
                ticket_url: String::new(),
                change_id: 1,
                cards_deck: Default::default(),
                players: vec![],
                phase: Default::default(),
                voted_card: String::new(),
                confidence: None,
                can_reveal: false,
            };
            let msg = ServerMessage::GameState(Box::new(snapshot));
            server.tx.send(serde_json::to_string(&msg).unwrap()).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["g1".to_string(), "g1".to_string()]);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn unsubscribe_sends_leave_and_clears_record() {
        let (transport, mut server) = pair();
        let manager = manager(vec![transport]);
        manager.connect(Credential::new("sid"));
        manager.subscribe_game("g1", Arc::new(|_| {})).unwrap();
        let _join = next_message(&mut server).await;

        manager.unsubscribe_game();
        assert_eq!(next_message(&mut server).await, ClientMessage::Leave);
        assert_eq!(manager.current_game(), None);
        assert_eq!(manager.join_status(), None);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn create_game_resolves_with_server_reply() {
        let (transport, mut server) = pair();
        let manager = Arc::new(manager(vec![transport]));
        manager.connect(Credential::new("sid"));

        let creator = Arc::clone(&manager);
        let pending = tokio::spawn(async move {
            creator.create_game(CreateGameParams::new("Sprint")).await
        });

        let request = next_message(&mut server).await;
        assert!(matches!(request, ClientMessage::Create(ref p) if p.name == "Sprint"));
        let reply = ServerMessage::Created {
            game_id: "new-game".into(),
        };
        server.tx.send(serde_json::to_string(&reply).unwrap()).unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), "new-game");
        manager.disconnect().await;
    }

    fn reply_created(server: &ServerEnd, game_id: &str) {
        let reply = ServerMessage::Created {
            game_id: game_id.into(),
        };
        server.tx.send(serde_json::to_string(&reply).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn create_before_connect_leaves_no_waiter_behind() {
        let (transport, mut server) = pair();
        let manager = Arc::new(manager(vec![transport]));

        let early = manager.create_game(CreateGameParams::new("Early")).await;
        assert!(matches!(early, Err(PokerError::NotConnected)));
        assert!(manager.shared.pending_creates().is_empty());

        manager.connect(Credential::new("sid"));
        let creator = Arc::clone(&manager);
        let pending = tokio::spawn(async move {
            creator.create_game(CreateGameParams::new("Sprint")).await
        });
        assert!(matches!(
            next_message(&mut server).await,
            ClientMessage::Create(ref p) if p.name == "Sprint"
        ));
        reply_created(&server, "new-game");

        assert_eq!(pending.await.unwrap().unwrap(), "new-game");
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn timed_out_create_does_not_take_the_next_reply() {
        let (transport, mut server) = pair();
        let connector = QueueConnector {
            transports: StdMutex::new(vec![transport].into()),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        let config = ClientConfig::new("http://localhost")
            .with_request_timeout(Duration::from_millis(50));
        let manager = Arc::new(ChannelManager::new(connector, &config));
        manager.connect(Credential::new("sid"));

        let first = manager.create_game(CreateGameParams::new("Lost")).await;
        assert!(matches!(first, Err(PokerError::Timeout)));
        assert!(manager.shared.pending_creates().is_empty());
        let _lost = next_message(&mut server).await;

        let creator = Arc::clone(&manager);
        let pending = tokio::spawn(async move {
            creator.create_game(CreateGameParams::new("Sprint")).await
        });
        let _sprint = next_message(&mut server).await;
        reply_created(&server, "g-2");

        assert_eq!(pending.await.unwrap().unwrap(), "g-2");
        manager.disconnect().await;
    }
}
