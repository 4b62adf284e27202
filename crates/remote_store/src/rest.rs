use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::ACCEPT, Client};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    path::{merge_at, segments, set_at},
    sse::{SseDecoder, SseEvent},
    RemoteStore, Subscription,
};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RestStoreConfig {
    pub base_url: Url,
    /// Database secret or ID token, sent as the `auth` query parameter.
    pub auth: Option<String>,
    pub reconnect_delay: Duration,
}

impl RestStoreConfig {
    pub fn new(base_url: Url, auth: Option<String>) -> Self {
        Self {
            base_url,
            auth,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl std::fmt::Debug for RestStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

/// Realtime-database style REST replica: `{base}/{path}.json` documents,
/// `PATCH` for partial writes, `PUT` for full writes and a server-sent event
/// stream for observation.
#[derive(Clone)]
pub struct RestStore {
    http: Client,
    config: Arc<RestStoreConfig>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    path: String,
    data: Value,
}

#[derive(Debug, PartialEq)]
enum StreamControl {
    Updated,
    Ignored,
    Reconnect(String),
    Closed(String),
}

impl RestStore {
    pub fn new(config: RestStoreConfig) -> Self {
        Self {
            http: Client::new(),
            config: Arc::new(config),
        }
    }

    pub fn document_url(&self, path: &str) -> Result<Url> {
        document_url(&self.config, path)
    }
}

fn document_url(config: &RestStoreConfig, path: &str) -> Result<Url> {
    let mut url = config.base_url.clone();
    if url.cannot_be_a_base() {
        return Err(anyhow!("store url {} cannot carry a document path", url));
    }
    let prefix = url.path().trim_end_matches('/').to_string();
    let document = segments(path).join("/");
    url.set_path(&format!("{prefix}/{document}.json"));
    if let Some(auth) = &config.auth {
        url.query_pairs_mut().append_pair("auth", auth);
    }
    Ok(url)
}

fn apply_stream_event(cache: &mut Value, event: &SseEvent) -> Result<StreamControl> {
    match event.event.as_str() {
        "put" => {
            let frame: StreamFrame =
                serde_json::from_str(&event.data).context("malformed put frame")?;
            set_at(cache, &segments(&frame.path), frame.data);
            Ok(StreamControl::Updated)
        }
        "patch" => {
            let frame: StreamFrame =
                serde_json::from_str(&event.data).context("malformed patch frame")?;
            let Value::Object(fields) = frame.data else {
                return Err(anyhow!("patch frame data must be an object"));
            };
            merge_at(cache, &segments(&frame.path), &fields);
            Ok(StreamControl::Updated)
        }
        "keep-alive" => Ok(StreamControl::Ignored),
        "auth_revoked" => Ok(StreamControl::Reconnect("credential revoked".to_string())),
        "cancel" => Ok(StreamControl::Closed(format!(
            "stream cancelled by server: {}",
            event.data
        ))),
        other => {
            debug!(event = other, "rest store: ignoring unknown stream event");
            Ok(StreamControl::Ignored)
        }
    }
}

async fn run_stream(
    http: Client,
    config: Arc<RestStoreConfig>,
    path: String,
    tx: mpsc::UnboundedSender<Value>,
) {
    let url = match document_url(&config, &path) {
        Ok(url) => url,
        Err(err) => {
            warn!(path = %path, "rest store: cannot build stream url: {err}");
            return;
        }
    };

    let mut cache = Value::Null;
    loop {
        let response = http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match response {
            Ok(response) => {
                info!(path = %path, "rest store: stream connected");
                let mut decoder = SseDecoder::default();
                let mut body = response.bytes_stream();
                'frames: while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            warn!(path = %path, "rest store: stream read failed: {err}");
                            break;
                        }
                    };
                    for event in decoder.feed(&chunk) {
                        match apply_stream_event(&mut cache, &event) {
                            Ok(StreamControl::Updated) => {
                                if tx.send(cache.clone()).is_err() {
                                    return;
                                }
                            }
                            Ok(StreamControl::Ignored) => {}
                            Ok(StreamControl::Reconnect(reason)) => {
                                warn!(path = %path, "rest store: reconnecting: {reason}");
                                break 'frames;
                            }
                            Ok(StreamControl::Closed(reason)) => {
                                warn!(path = %path, "rest store: {reason}");
                                return;
                            }
                            Err(err) => {
                                warn!(path = %path, "rest store: dropping stream event: {err:#}");
                            }
                        }
                    }
                }
            }
            Err(err) => {
                warn!(path = %path, "rest store: stream connect failed: {err}");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn observe(&self, path: &str) -> Result<Subscription> {
        // Validate eagerly so a bad base url fails the caller, not the task.
        self.document_url(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_stream(
            self.http.clone(),
            Arc::clone(&self.config),
            path.to_string(),
            tx,
        ));
        Ok(Subscription::new(path, rx, task))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let url = self.document_url(path)?;
        self.http
            .patch(url)
            .timeout(WRITE_TIMEOUT)
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("failed to send partial write to {path}"))?
            .error_for_status()
            .with_context(|| format!("store rejected partial write to {path}"))?;
        Ok(())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let url = self.document_url(path)?;
        self.http
            .put(url)
            .timeout(WRITE_TIMEOUT)
            .json(&value)
            .send()
            .await
            .with_context(|| format!("failed to send write to {path}"))?
            .error_for_status()
            .with_context(|| format!("store rejected write to {path}"))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.document_url(path)?;
        let value = self
            .http
            .get(url)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("failed to read {path}"))?
            .error_for_status()
            .with_context(|| format!("store rejected read of {path}"))?
            .json()
            .await
            .with_context(|| format!("invalid document at {path}"))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(base: &str, auth: Option<&str>) -> RestStoreConfig {
        RestStoreConfig::new(Url::parse(base).expect("url"), auth.map(str::to_string))
    }

    #[test]
    fn document_url_appends_json_suffix_and_auth() {
        let url = document_url(
            &config("https://example-rtdb.test/", Some("s3cret")),
            "settings/mappings",
        )
        .expect("url");
        assert_eq!(
            url.as_str(),
            "https://example-rtdb.test/settings/mappings.json?auth=s3cret"
        );
    }

    #[test]
    fn document_url_keeps_base_prefix() {
        let url = document_url(&config("http://127.0.0.1:9000/db", None), "/user/rehab/")
            .expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/db/user/rehab.json");
    }

    #[test]
    fn stream_events_maintain_cached_document() {
        let mut cache = Value::Null;
        let put_root = SseEvent {
            event: "put".into(),
            data: r#"{"path":"/","data":{"one":"cursor_nav","two":"media_play"}}"#.into(),
        };
        let put_leaf = SseEvent {
            event: "put".into(),
            data: r#"{"path":"/one","data":"snapshot"}"#.into(),
        };
        let patch = SseEvent {
            event: "patch".into(),
            data: r#"{"path":"/","data":{"two":"volume_up"}}"#.into(),
        };

        assert_eq!(
            apply_stream_event(&mut cache, &put_root).unwrap(),
            StreamControl::Updated
        );
        apply_stream_event(&mut cache, &put_leaf).unwrap();
        apply_stream_event(&mut cache, &patch).unwrap();

        assert_eq!(cache, json!({"one": "snapshot", "two": "volume_up"}));
    }

    #[test]
    fn control_events_are_classified() {
        let mut cache = Value::Null;
        let keep_alive = SseEvent {
            event: "keep-alive".into(),
            data: "null".into(),
        };
        let cancel = SseEvent {
            event: "cancel".into(),
            data: "permission denied".into(),
        };
        assert_eq!(
            apply_stream_event(&mut cache, &keep_alive).unwrap(),
            StreamControl::Ignored
        );
        assert!(matches!(
            apply_stream_event(&mut cache, &cancel).unwrap(),
            StreamControl::Closed(_)
        ));
    }
}
