//! REST collaborator for room listings, history and the current profile.
//!
//! Every request carries the bearer token from the injected [`AuthContext`].
//! 401 and 403 responses are reported as [`HttpError::Unauthorized`] so the
//! caller can send the user back to sign-in.

use crewchat_core::{AuthContext, ChatRoom, Profile, RoomId};
use crewchat_proto::payloads::{ChatMessageDto, ProfileDto, RoomKind, RoomSummary};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::FetchError;

/// HTTP collaborator errors.
#[derive(Debug, Error)]
pub enum HttpError {
    /// No token in the auth context
    #[error("not signed in")]
    MissingToken,

    /// Server rejected the token
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Network or decoding failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl HttpError {
    /// Whether the user has to sign in again.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::MissingToken | Self::Unauthorized(_))
    }
}

impl From<HttpError> for FetchError {
    fn from(err: HttpError) -> Self {
        if err.is_auth() {
            FetchError::Unauthorized(err.to_string())
        } else {
            FetchError::Failed(err.to_string())
        }
    }
}

/// Sort a non-success status into auth and other failures.
fn classify(status: StatusCode, body: String) -> HttpError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HttpError::Unauthorized(status.as_u16()),
        _ => HttpError::Status { status: status.as_u16(), body },
    }
}

/// Authenticated REST client for the chat backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthContext,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: impl Into<String>, auth: AuthContext) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, auth)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, auth: AuthContext) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url, auth }
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the token used for later requests.
    pub fn set_auth(&mut self, auth: AuthContext) {
        self.auth = auth;
    }

    /// Group rooms the user participates in.
    pub async fn list_group_rooms(&self) -> Result<Vec<ChatRoom>, HttpError> {
        self.rooms("/chat/getgroupchat", RoomKind::Group).await
    }

    /// Direct conversations of the user.
    pub async fn list_direct_rooms(&self) -> Result<Vec<ChatRoom>, HttpError> {
        self.rooms("/chat/getdirectchat", RoomKind::Direct).await
    }

    /// Group rooms followed by direct rooms.
    pub async fn list_rooms(&self) -> Result<Vec<ChatRoom>, HttpError> {
        let mut rooms = self.list_group_rooms().await?;
        rooms.extend(self.list_direct_rooms().await?);
        Ok(rooms)
    }

    /// Message history of a room, newest first as the server returns it.
    pub async fn history(&self, room_id: &RoomId) -> Result<Vec<ChatMessageDto>, HttpError> {
        let messages: Vec<ChatMessageDto> = self.get(&format!("/chat/{room_id}")).await?;
        tracing::debug!(room = %room_id, count = messages.len(), "history loaded");
        Ok(messages)
    }

    /// Profile of the signed-in user.
    pub async fn profile(&self) -> Result<Profile, HttpError> {
        let profile: ProfileDto = self.get("/profile/me").await?;
        Ok(profile.into())
    }

    async fn rooms(&self, path: &str, kind: RoomKind) -> Result<Vec<ChatRoom>, HttpError> {
        let summaries: Vec<RoomSummary> = self.get(path).await?;
        Ok(summaries
            .into_iter()
            .map(|mut summary| {
                summary.kind.get_or_insert(kind);
                ChatRoom::from(summary)
            })
            .collect())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        let token = self.auth.token().ok_or(HttpError::MissingToken)?;
        let url = format!("{}{path}", self.base_url);

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "request rejected");
            return Err(classify(status, body));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_unauthorized() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify(status, String::new());
            assert!(err.is_auth());
            assert!(FetchError::from(err).is_auth());
        }
    }

    #[test]
    fn other_statuses_keep_body() {
        let err = classify(StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string());
        assert!(!err.is_auth());
        assert!(matches!(&err, HttpError::Status { status: 500, body } if body == "boom"));
        assert_eq!(FetchError::from(err), FetchError::Failed("HTTP 500: boom".to_string()));
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        // Port 9 is discard; the request must never be attempted.
        let api = ApiClient::new("http://127.0.0.1:9/", AuthContext::anonymous());
        assert_eq!(api.base_url(), "http://127.0.0.1:9");

        let err = api.history(&RoomId::new("r1")).await.unwrap_err();
        assert!(matches!(err, HttpError::MissingToken));
        assert!(err.is_auth());
    }
}
