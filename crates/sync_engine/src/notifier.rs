use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::{ChatCompletionRequest, NotificationPayload};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CHAT_MODEL: &str = "grok-beta";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no notification endpoint is configured")]
    NotConfigured,
    #[error("endpoint answered with status {0}")]
    Status(u16),
    #[error("endpoint did not answer in time")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else if let Some(status) = err.status() {
            DispatchError::Status(status.as_u16())
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

/// Sends one notification payload to the external endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError>;
}

pub struct MissingNotifier;

#[async_trait]
impl Notifier for MissingNotifier {
    async fn dispatch(&self, _payload: &NotificationPayload) -> Result<(), DispatchError> {
        Err(DispatchError::NotConfigured)
    }
}

/// Request body shape the endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Envelope {
    #[default]
    Raw,
    ChatCompletion { model: String },
}

#[derive(Clone)]
pub struct HttpNotifier {
    http: Client,
    endpoint: Url,
    token: Option<String>,
    envelope: Envelope,
}

impl HttpNotifier {
    pub fn new(
        endpoint: Url,
        token: Option<String>,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DispatchError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            token,
            envelope,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("envelope", &self.envelope)
            .finish()
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let mut request = self.http.post(self.endpoint.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request = match &self.envelope {
            Envelope::Raw => request.json(payload),
            Envelope::ChatCompletion { model } => {
                let body = ChatCompletionRequest::for_payload(model.as_str(), payload)
                    .map_err(|err| DispatchError::Encode(err.to_string()))?;
                request.json(&body)
            }
        };

        let response = request.send().await?.error_for_status()?;
        debug!(
            status = response.status().as_u16(),
            timestamp = payload.timestamp(),
            "notifier: endpoint accepted payload"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/notifier_tests.rs"]
mod tests;
