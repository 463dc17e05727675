//! Request/response surface of the planning poker server.
//!
//! [`GameApi`] is what the poll-mode backend talks to. [`HttpGameApi`]
//! (feature `http-api`) implements it over `reqwest`; tests substitute an
//! in-memory implementation.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ChangeId, Confidence, CreateGameParams, GameId, GameSnapshot};

/// Game endpoints, relative to the API root.
///
/// | Method | Path                          |
/// |--------|-------------------------------|
/// | POST   | `games`                       |
/// | PUT    | `games/{id}`                  |
/// | GET    | `games/{id}?lastChangeID={n}` |
/// | POST   | `games/{id}/join`             |
/// | POST   | `games/{id}/votes/{card}`     |
/// | POST   | `games/{id}/unvote`           |
/// | POST   | `games/{id}/reveal`           |
/// | POST   | `games/{id}/restart`          |
/// | POST   | `games/{id}/ping`             |
#[async_trait]
pub trait GameApi: Send + Sync + 'static {
    async fn create_game(&self, params: &CreateGameParams) -> Result<GameId>;

    async fn update_game(&self, game_id: &str, name: &str, ticket_url: &str) -> Result<()>;

    /// Fetch the current snapshot.
    ///
    /// With `last_change_id` set, the server may hold the request until the
    /// game changes past that id (long-poll) or its own hold time expires.
    async fn game_state(
        &self,
        game_id: &str,
        last_change_id: Option<ChangeId>,
    ) -> Result<GameSnapshot>;

    async fn join(&self, game_id: &str) -> Result<()>;

    async fn vote(&self, game_id: &str, card: &str, confidence: Confidence) -> Result<()>;

    async fn unvote(&self, game_id: &str) -> Result<()>;

    async fn reveal(&self, game_id: &str) -> Result<()>;

    async fn restart(&self, game_id: &str) -> Result<()>;

    /// Presence heartbeat; the server evicts silent participants.
    async fn ping(&self, game_id: &str) -> Result<()>;
}

#[cfg(feature = "http-api")]
pub use http::HttpGameApi;

#[cfg(feature = "http-api")]
mod http {
    use async_trait::async_trait;
    use reqwest::header::AUTHORIZATION;
    use reqwest::{Client, Method, StatusCode};
    use serde::{Deserialize, Serialize};
    use tracing::debug;
    use url::Url;

    use super::GameApi;
    use crate::config::ClientConfig;
    use crate::error::{PokerError, Result};
    use crate::protocol::{
        ChangeId, Confidence, CreateGameParams, Credential, GameId, GameSnapshot,
    };

    /// [`GameApi`] over HTTP with bearer authentication.
    #[derive(Debug, Clone)]
    pub struct HttpGameApi {
        client: Client,
        base_url: Url,
        credential: Credential,
    }

    #[derive(Deserialize)]
    struct CreatedResponse {
        game_id: GameId,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    #[derive(Serialize)]
    struct UpdateBody<'a> {
        name: &'a str,
        url: &'a str,
    }

    impl HttpGameApi {
        /// # Errors
        ///
        /// Returns [`PokerError::InvalidUrl`] if `config.base_url` is not an
        /// absolute http(s) URL, or [`PokerError::Request`] if the HTTP
        /// client cannot be built.
        pub fn new(config: &ClientConfig, credential: Credential) -> Result<Self> {
            let base_url = Url::parse(&config.base_url)
                .map_err(|e| PokerError::InvalidUrl(e.to_string()))?;
            if base_url.cannot_be_a_base() {
                return Err(PokerError::InvalidUrl(config.base_url.clone()));
            }
            let client = Client::builder()
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| PokerError::Request(e.to_string()))?;

            Ok(Self {
                client,
                base_url,
                credential,
            })
        }

        /// `base_url` with `segments` appended, each one percent-encoded.
        fn endpoint(&self, segments: &[&str]) -> Result<Url> {
            let mut url = self.base_url.clone();
            url.path_segments_mut()
                .map_err(|()| PokerError::InvalidUrl(self.base_url.to_string()))?
                .pop_if_empty()
                .extend(segments);
            Ok(url)
        }

        async fn execute(&self, method: Method, url: Url) -> Result<reqwest::Response> {
            self.execute_with(method, url, |builder| builder).await
        }

        async fn execute_with(
            &self,
            method: Method,
            url: Url,
            customize: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
        ) -> Result<reqwest::Response> {
            debug!(%method, path = url.path(), "sending API request");
            let builder = self
                .client
                .request(method, url)
                .header(AUTHORIZATION, self.credential.bearer());

            let response = customize(builder).send().await.map_err(|e| {
                if e.is_timeout() {
                    PokerError::Timeout
                } else {
                    PokerError::Request(e.to_string())
                }
            })?;

            match response.status() {
                status if status.is_success() => Ok(response),
                StatusCode::UNAUTHORIZED => Err(PokerError::Unauthorized),
                status => {
                    let text = response.text().await.unwrap_or_default();
                    Err(error_from_body(status.as_u16(), &text))
                }
            }
        }

        async fn post_action(&self, game_id: &str, action: &str) -> Result<()> {
            let url = self.endpoint(&["games", game_id, action])?;
            self.execute(Method::POST, url).await.map(drop)
        }
    }

    /// Turn a non-success response into [`PokerError::Http`], preferring the
    /// server's `{"error": "..."}` text over the raw body.
    pub(super) fn error_from_body(status: u16, body: &str) -> PokerError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.trim().to_string());
        PokerError::Http { status, message }
    }

    #[async_trait]
    impl GameApi for HttpGameApi {
        async fn create_game(&self, params: &CreateGameParams) -> Result<GameId> {
            let url = self.endpoint(&["games"])?;
            let response = self
                .execute_with(Method::POST, url, |b| b.json(params))
                .await?;
            let created: CreatedResponse = response
                .json()
                .await
                .map_err(|e| PokerError::Request(e.to_string()))?;
            Ok(created.game_id)
        }

        async fn update_game(&self, game_id: &str, name: &str, ticket_url: &str) -> Result<()> {
            let url = self.endpoint(&["games", game_id])?;
            let body = UpdateBody {
                name,
                url: ticket_url,
            };
            self.execute_with(Method::PUT, url, |b| b.json(&body))
                .await
                .map(drop)
        }

        async fn game_state(
            &self,
            game_id: &str,
            last_change_id: Option<ChangeId>,
        ) -> Result<GameSnapshot> {
            let mut url = self.endpoint(&["games", game_id])?;
            if let Some(last) = last_change_id {
                url.query_pairs_mut()
                    .append_pair("lastChangeID", &last.to_string());
            }
            let response = self.execute(Method::GET, url).await?;
            let mut snapshot: GameSnapshot = response
                .json()
                .await
                .map_err(|e| PokerError::Request(e.to_string()))?;
            if snapshot.game_id.is_empty() {
                snapshot.game_id = game_id.to_string();
            }
            Ok(snapshot)
        }

        async fn join(&self, game_id: &str) -> Result<()> {
            self.post_action(game_id, "join").await
        }

        async fn vote(&self, game_id: &str, card: &str, confidence: Confidence) -> Result<()> {
            let mut url = self.endpoint(&["games", game_id, "votes", card])?;
            url.query_pairs_mut()
                .append_pair("confidence", &confidence.to_string());
            self.execute(Method::POST, url).await.map(drop)
        }

        async fn unvote(&self, game_id: &str) -> Result<()> {
            self.post_action(game_id, "unvote").await
        }

        async fn reveal(&self, game_id: &str) -> Result<()> {
            self.post_action(game_id, "reveal").await
        }

        async fn restart(&self, game_id: &str) -> Result<()> {
            self.post_action(game_id, "restart").await
        }

        async fn ping(&self, game_id: &str) -> Result<()> {
            self.post_action(game_id, "ping").await
        }
    }

}
