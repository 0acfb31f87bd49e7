//! Session-token boundary with the auth provider.

use url::Url;

use crate::error::TransportError;

/// Supplies the current session token. Consulted on every connection
/// attempt, so a refreshed token is picked up by the next reconnect.
pub trait TokenProvider: Send + Sync {
    fn session_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn session_token(&self) -> Option<String> {
        self()
    }
}

/// A token that never changes.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn session_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Append the session token (if any) as the `token` query parameter.
pub fn authorize_url(
    endpoint: &str,
    tokens: Option<&dyn TokenProvider>,
) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint).map_err(|e| TransportError::InvalidUrl {
        url: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl {
                url: endpoint.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }

    if let Some(token) = tokens.and_then(|t| t.session_token()) {
        url.query_pairs_mut().append_pair("token", &token);
    }
    Ok(url)
}
