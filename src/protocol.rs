//! Wire types shared by the HTTP API and the push channel.
//!
//! Every type here produces the JSON the planning poker server speaks. Key
//! adaptations:
//!
//! - The server encodes absent lists as `null`; they decode to empty vectors.
//! - Change ids decode from either a JSON number or a decimal string.
//! - Channel messages are adjacently tagged: `{"type": "...", "data": {...}}`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-issued game identifier.
pub type GameId = String;

/// Per-game change counter used to order snapshots.
///
/// The server must issue it as an increasing integer, either as a JSON
/// number or a numeric string. An opaque id (a UUID, say) fails to decode,
/// so every fetch of such a snapshot is reported as a fetch failure. An absent
/// or empty id decodes as 0, which never rejects later snapshots.
pub type ChangeId = u64;

/// Card that is always selectable to abstain from estimating.
pub const ABSTAIN_CARD: &str = "?";

/// Placeholder the server sends for a vote that has not been revealed yet.
pub const UNREVEALED_CARD: &str = "*";

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle phase of a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    /// No voting round has started yet.
    #[default]
    Waiting,
    /// A voting round is running; votes are hidden.
    Started,
    /// Votes are revealed; the game can be restarted.
    Finished,
}

/// How sure a participant is about their vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Unsure,
    #[default]
    Normal,
    Sure,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsure => "unsure",
            Self::Normal => "normal",
            Self::Sure => "sure",
        })
    }
}

// ── Credential ──────────────────────────────────────────────────────

/// Session identifier presented to the server on every request.
///
/// Rendered as `Authorization: Bearer <id>` over HTTP and as the `token`
/// query parameter on the push channel. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a server-issued session identifier.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self(session_id.into())
    }

    /// The raw session identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an HTTP `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// A named, ordered deck of selectable cards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CardsDeck {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cards: Vec<String>,
}

impl CardsDeck {
    pub fn new(name: impl Into<String>, cards: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            cards: cards.into_iter().map(Into::into).collect(),
        }
    }

    /// The deck the web client creates games with.
    pub fn t_shirt() -> Self {
        Self::new("T-Shirt", ["XXS", "XS", "S", "M", "L", "XL", "XXL", "?"])
    }

    /// Cards in deck order, with [`ABSTAIN_CARD`] appended if the deck lacks it.
    pub fn selectable(&self) -> Vec<String> {
        let mut cards = self.cards.clone();
        if !cards.iter().any(|c| c == ABSTAIN_CARD) {
            cards.push(ABSTAIN_CARD.to_string());
        }
        cards
    }
}

/// One participant as seen in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    pub name: String,
    /// Empty when the player has not voted, [`UNREVEALED_CARD`] while the
    /// vote is hidden, the card itself once revealed.
    #[serde(default)]
    pub voted_card: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl PlayerState {
    pub fn has_voted(&self) -> bool {
        !self.voted_card.is_empty()
    }

    /// The revealed vote, if the phase permits the server to show it.
    pub fn revealed_vote(&self) -> Option<&str> {
        match self.voted_card.as_str() {
            "" | UNREVEALED_CARD => None,
            card => Some(card),
        }
    }
}

/// Immutable description of one game's visible state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSnapshot {
    /// Filled in by the client when the server omits it (HTTP responses).
    #[serde(default)]
    pub game_id: GameId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ticket_url: String,
    /// Zero when the server does not send one (channel pushes); snapshots
    /// that all carry zero are accepted in arrival order.
    #[serde(default, deserialize_with = "change_id_from_number_or_string")]
    pub change_id: ChangeId,
    #[serde(default)]
    pub cards_deck: CardsDeck,
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: Vec<PlayerState>,
    #[serde(rename = "state")]
    pub phase: GamePhase,
    /// This session's own vote as the server knows it.
    #[serde(default)]
    pub voted_card: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Whether this session may reveal and restart.
    #[serde(default)]
    pub can_reveal: bool,
}

/// Deck description sent when creating a game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardsDeckPayload {
    pub name: String,
    pub types: Vec<String>,
}

impl From<CardsDeck> for CardsDeckPayload {
    fn from(deck: CardsDeck) -> Self {
        Self {
            name: deck.name,
            types: deck.cards,
        }
    }
}

/// Parameters for creating a game.
///
/// # Example
///
/// ```
/// use planning_poker_client::protocol::CreateGameParams;
///
/// let params = CreateGameParams::new("Sprint 12")
///     .with_url("https://tracker.example/PRJ-1");
/// assert!(params.everyone_can_reveal);
/// assert_eq!(params.cards_deck.name, "T-Shirt");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateGameParams {
    pub name: String,
    #[serde(rename = "url")]
    pub ticket_url: String,
    pub cards_deck: CardsDeckPayload,
    pub everyone_can_reveal: bool,
}

impl CreateGameParams {
    /// T-Shirt deck, everyone may reveal.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticket_url: String::new(),
            cards_deck: CardsDeck::t_shirt().into(),
            everyone_can_reveal: true,
        }
    }

    #[must_use]
    pub fn with_url(mut self, ticket_url: impl Into<String>) -> Self {
        self.ticket_url = ticket_url.into();
        self
    }

    #[must_use]
    pub fn with_deck(mut self, deck: CardsDeck) -> Self {
        self.cards_deck = deck.into();
        self
    }

    #[must_use]
    pub fn with_everyone_can_reveal(mut self, everyone_can_reveal: bool) -> Self {
        self.everyone_can_reveal = everyone_can_reveal;
        self
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Events sent from client to server over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a game's broadcast group. Answered by [`ServerMessage::JoinAck`].
    Join { game_id: GameId },
    /// Leave the current broadcast group.
    Leave,
    Vote {
        vote: String,
        confidence: Confidence,
    },
    Unvote,
    Reveal,
    Restart,
    Update { name: String, ticket_url: String },
    /// Create a game. Answered by [`ServerMessage::Created`].
    Create(CreateGameParams),
}

/// Events sent from server to client over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A game's state changed (boxed to reduce enum size).
    GameState(Box<GameSnapshot>),
    /// Reply to [`ClientMessage::Join`]; `result` is `"ok"` or an error text.
    JoinAck { game_id: GameId, result: String },
    /// Reply to [`ClientMessage::Create`].
    Created { game_id: GameId },
    Error { message: String },
}

/// Acknowledgement text meaning success.
pub const ACK_OK: &str = "ok";

// ── Serde helpers ───────────────────────────────────────────────────

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn change_id_from_number_or_string<'de, D>(deserializer: D) -> Result<ChangeId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(ChangeId),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) if text.is_empty() => Ok(0),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_decodes_server_payload_with_nulls() {
        let raw = json!({
            "name": "Sprint",
            "ticket_url": "",
            "change_id": "17",
            "cards_deck": {"name": "Fib", "cards": null},
            "players": null,
            "state": "started",
            "voted_card": "",
            "can_reveal": true
        });
        let snapshot: GameSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snapshot.change_id, 17);
        assert!(snapshot.players.is_empty());
        assert!(snapshot.cards_deck.cards.is_empty());
        assert_eq!(snapshot.phase, GamePhase::Started);
        assert!(snapshot.game_id.is_empty());
    }

    #[test]
    fn change_id_accepts_numbers() {
        let raw = json!({"change_id": 3, "state": "finished"});
        let snapshot: GameSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snapshot.change_id, 3);
        assert_eq!(snapshot.phase, GamePhase::Finished);
    }

    #[test]
    fn change_id_rejects_garbage() {
        let raw = json!({"change_id": "abc", "state": "started"});
        assert!(serde_json::from_value::<GameSnapshot>(raw).is_err());
    }

    #[test]
    fn unrevealed_vote_counts_as_voted_but_not_revealed() {
        let hidden = PlayerState {
            name: "Ann".into(),
            voted_card: UNREVEALED_CARD.into(),
            confidence: None,
        };
        assert!(hidden.has_voted());
        assert_eq!(hidden.revealed_vote(), None);

        let shown = PlayerState {
            voted_card: "5".into(),
            ..hidden
        };
        assert_eq!(shown.revealed_vote(), Some("5"));

        let idle = PlayerState {
            voted_card: String::new(),
            ..shown
        };
        assert!(!idle.has_voted());
    }

    #[test]
    fn selectable_cards_always_include_abstain() {
        let deck = CardsDeck::new("Fib", ["1", "2", "3"]);
        assert_eq!(deck.selectable(), vec!["1", "2", "3", "?"]);
        assert_eq!(CardsDeck::t_shirt().selectable().len(), 8);
    }

    #[test]
    fn create_payload_uses_server_field_names() {
        let params = CreateGameParams::new("g").with_url("u");
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["url"], "u");
        assert_eq!(value["cards_deck"]["types"][0], "XXS");
        assert_eq!(value["everyone_can_reveal"], true);
    }

    #[test]
    fn client_messages_are_adjacently_tagged() {
        let msg = ClientMessage::Vote {
            vote: "5".into(),
            confidence: Confidence::Sure,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "vote", "data": {"vote": "5", "confidence": "sure"}}));

        let leave = serde_json::to_value(&ClientMessage::Leave).unwrap();
        assert_eq!(leave, json!({"type": "leave"}));
    }

    #[test]
    fn join_ack_decodes() {
        let raw = r#"{"type":"join_ack","data":{"game_id":"g1","result":"ok"}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::JoinAck {
                game_id: "g1".into(),
                result: ACK_OK.into()
            }
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("secret-id");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.bearer(), "Bearer secret-id");
    }
}
