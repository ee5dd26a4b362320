//! Endpoint settings derived from the server's base URL.

use std::time::Duration;

use crewchat_client::ClientConfig;

/// Where the backend lives and how patient the client is.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// REST base URL, e.g. `https://api.crewer.example`
    pub api_base: String,
    /// STOMP WebSocket URL, e.g. `wss://api.crewer.example/ws`
    pub socket_url: String,
    /// CONNECT `host` header
    pub host: String,
}

impl Endpoints {
    /// Derive both endpoints from the REST base URL. An explicit socket URL
    /// overrides the derived one.
    pub fn new(server: &str, socket_url: Option<String>) -> Self {
        let api_base = server.trim_end_matches('/').to_string();
        let socket_url = socket_url.unwrap_or_else(|| derive_socket_url(&api_base));
        let host = host_of(&api_base).to_string();
        Self { api_base, socket_url, host }
    }

    /// Client configuration for these endpoints.
    pub fn client_config(
        &self,
        send_timeout: Duration,
        max_reconnect_attempts: Option<u32>,
    ) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.session.url.clone_from(&self.socket_url);
        config.session.host.clone_from(&self.host);
        config.session.max_reconnect_attempts = max_reconnect_attempts;
        config.reconciler.send_timeout = send_timeout;
        config
    }
}

fn derive_socket_url(api_base: &str) -> String {
    let base = if let Some(rest) = api_base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_base.to_string()
    };
    format!("{base}/ws")
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority)
}
