//! Interchangeable ways of reaching the session server.
//!
//! Every transport reports what it receives as [`TransportEvent`]s and accepts
//! [`ClientRequest`]s through [`SessionTransport::send`]. The session client on
//! top of it never needs to know which one is active.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ParticipantId,
    error::{ApiError, ApiException},
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use tokio::sync::mpsc;
use url::Url;

mod polling;
mod push_stream;
mod ws;

pub use polling::PollingTransport;
pub use push_stream::PushStreamTransport;
pub use ws::WebSocketTransport;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport is (again) able to reach the server. The server keeps no
    /// registry across reconnects, so the client must join again.
    Connected,
    Payload(ServerEvent),
    Disconnected,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Starts background delivery for the given participant.
    async fn start(
        &self,
        participant_id: ParticipantId,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<()>;

    /// Sends one request. Transports with a synchronous reply return it so the
    /// caller can apply it without waiting for the next push or poll.
    async fn send(&self, request: ClientRequest) -> Result<Option<ServerEvent>>;

    /// Stops background tasks and releases the connection.
    async fn shutdown(&self);

    /// Whether the server notices by itself when this client goes away.
    fn detects_disconnect(&self) -> bool {
        true
    }
}

pub(crate) fn parse_server_url(server_url: &str) -> Result<Url> {
    let url = Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(anyhow!("server_url must start with http:// or https://")),
    }
}

pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .with_context(|| format!("invalid endpoint path: {path}"))
}

/// Posts one request to the shared write endpoint and returns the session as
/// the server saw it right after.
pub(crate) async fn post_event(
    http: &Client,
    events_url: &Url,
    request: &ClientRequest,
) -> Result<SessionSnapshot> {
    let response = http
        .post(events_url.clone())
        .json(request)
        .send()
        .await
        .with_context(|| format!("failed to post {} event", request.kind()))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<SessionSnapshot>()
            .await
            .context("invalid session snapshot");
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(ApiException::from(api_error).into()),
        Err(_) => Err(anyhow!("{} request failed with {status}: {body}", request.kind())),
    }
}

pub(crate) async fn fetch_snapshot(http: &Client, session_url: &Url) -> Result<SessionSnapshot> {
    http.get(session_url.clone())
        .send()
        .await
        .context("failed to poll session")?
        .error_for_status()
        .context("session poll rejected")?
        .json::<SessionSnapshot>()
        .await
        .context("invalid session snapshot")
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
