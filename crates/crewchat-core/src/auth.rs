//! Bearer token holder.
//!
//! The token is passed explicitly to every component that talks to the
//! backend. Cloning is cheap; the token itself is never printed.

use std::{fmt, sync::Arc};

/// Bearer token for the REST API and the STOMP handshake.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    token: Option<Arc<str>>,
}

impl AuthContext {
    /// Context holding `token`. Blank tokens count as absent.
    pub fn new(token: impl AsRef<str>) -> Self {
        let token = token.as_ref().trim();
        if token.is_empty() { Self::anonymous() } else { Self { token: Some(Arc::from(token)) } }
    }

    /// Context without a token.
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Raw token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `Authorization` header value (`Bearer <token>`), if a token is held.
    #[must_use]
    pub fn bearer(&self) -> Option<String> {
        self.token.as_deref().map(|token| format!("Bearer {token}"))
    }

    /// Whether a token is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_some() { "<redacted>" } else { "<none>" };
        f.debug_struct("AuthContext").field("token", &token).finish()
    }
}
