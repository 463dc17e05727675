//! Events emitted by a [`GameMirror`](crate::mirror::GameMirror).
//!
//! The mirror's accessors always reflect the latest accepted snapshot; these
//! events only tell the owning view *when* to look again, and surface the
//! failures that the background loops recover from on their own.

use std::time::Duration;

use crate::protocol::ChangeId;

/// Notifications delivered on the bounded channel returned by
/// [`GameMirror::open`](crate::mirror::GameMirror::open).
///
/// When the receiver falls behind, events are dropped (with a warning logged)
/// rather than stalling the refresh loop. [`Closed`](MirrorEvent::Closed) is
/// always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    /// A snapshot was accepted and the mirror's fields changed.
    SnapshotApplied { change_id: ChangeId },
    /// A snapshot older than the last accepted one was discarded.
    SnapshotDiscarded {
        change_id: ChangeId,
        last_accepted: ChangeId,
    },
    /// A snapshot fetch failed; the next attempt is scheduled after `retry_in`.
    FetchFailed { reason: String, retry_in: Duration },
    /// Sending a player action to the server failed. The optimistic local
    /// state stays until the next snapshot overwrites it.
    ActionFailed { action: String, reason: String },
    /// The server refused to add this session to the game.
    JoinFailed { reason: String },
    /// The session credential was rejected; the identity layer must
    /// re-register before updates can resume.
    AuthenticationFailed,
    /// The mirror was torn down. No further events follow.
    Closed,
}
