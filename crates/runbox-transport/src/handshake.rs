//! Connection handshake parameters.

use runbox_core::SessionId;
use url::Url;

use crate::TransportError;

/// Everything a connector needs to open one session's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Runner endpoint, e.g. `wss://runner.example.com/ws`.
    pub endpoint: String,
    /// Session the connection is bound to.
    pub session_id: SessionId,
    /// Access token for the runner.
    pub credential: Option<String>,
}

impl Handshake {
    /// Create handshake parameters.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        session_id: SessionId,
        credential: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_id,
            credential,
        }
    }

    /// Endpoint URL with `sessionId` and `token` query parameters appended.
    ///
    /// # Errors
    /// Returns error if the endpoint is not a `ws`/`wss` URL.
    pub fn url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidEndpoint(format!(
                "{}: scheme must be ws or wss",
                self.endpoint
            )));
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sessionId", &self.session_id.to_string());
            if let Some(token) = &self.credential {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }
}
