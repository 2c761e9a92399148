//! Backend talking to a Postbox server over HTTP and WebSocket.

use std::sync::Mutex;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use postbox_types::api::{PublicUrlResponse, UploadResult};
use postbox_types::{EntryValue, PushIdGenerator, StreamEvent};

use crate::backend::{Backend, ChildItem, ChildStream, EntryRef, NamespaceRef};
use crate::config::BackendConfig;
use crate::error::BackendError;

pub const API_KEY_HEADER: &str = "x-postbox-api-key";

pub struct RemoteBackend {
    http: Client,
    config: BackendConfig,
    keys: Mutex<PushIdGenerator>,
}

impl RemoteBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| BackendError::Transport("API key is not a valid header value".into()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let user_agent = match &config.project_id {
            Some(project) => format!("postbox-client/{} ({})", env!("CARGO_PKG_VERSION"), project),
            None => format!("postbox-client/{}", env!("CARGO_PKG_VERSION")),
        };

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        info!(
            "Remote backend at {} (bucket '{}')",
            config.database_url, config.storage_bucket
        );
        Ok(Self {
            http,
            config,
            keys: Mutex::new(PushIdGenerator::new()),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// `database_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.config.database_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Decode(format!("{} cannot be a base URL", self.config.database_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_endpoint(&self, object_key: &str, suffix: Option<&str>) -> Result<Url, BackendError> {
        let bucket = self.config.storage_bucket.as_str();
        match suffix {
            Some(suffix) => self.endpoint(&["storage", bucket, object_key, suffix]),
            None => self.endpoint(&["storage", bucket, object_key]),
        }
    }
}

/// `http` becomes `ws` and `https` becomes `wss`.
fn websocket_url(mut url: Url) -> Result<Url, BackendError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(BackendError::Decode(format!("unsupported URL scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::Decode(format!("cannot switch {} to {}", url, scheme)))?;
    Ok(url)
}

fn status_error(status: StatusCode, context: impl Into<String>) -> BackendError {
    BackendError::Status {
        status: status.as_u16(),
        context: context.into(),
    }
}

impl Backend for RemoteBackend {
    fn generate_key(&self, namespace: &NamespaceRef) -> EntryRef {
        let key = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .generate();
        EntryRef::new(namespace.clone(), key)
    }

    async fn write(&self, entry: &EntryRef, value: EntryValue) -> Result<(), BackendError> {
        let url = self.endpoint(&["db", entry.namespace().name(), entry.key()])?;
        let resp = self.http.put(url).json(&value).send().await?;

        match resp.status() {
            s if s.is_success() => {
                debug!("Wrote {}", entry);
                Ok(())
            }
            StatusCode::CONFLICT => Err(BackendError::Conflict(entry.key().to_string())),
            s => Err(status_error(s, format!("write {}", entry))),
        }
    }

    async fn subscribe_child_added(&self, namespace: &NamespaceRef) -> Result<ChildStream, BackendError> {
        let url = websocket_url(self.endpoint(&["subscribe", namespace.name()])?)?;
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Subscribed to '{}' at {}", namespace, url);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ChildItem>();
        let name = namespace.name().to_string();
        let reader = tokio::spawn(async move {
            while let Some(frame) = socket.next().await {
                let item = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<StreamEvent>(text.as_str()) {
                        Ok(StreamEvent::ChildAdded(child)) if child.namespace == name => Ok(child.into_entry()),
                        Ok(StreamEvent::ChildAdded(child)) => {
                            warn!("Ignoring child of '{}' on '{}' stream", child.namespace, name);
                            continue;
                        }
                        Err(e) => Err(BackendError::Decode(e.to_string())),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("Server closed '{}' stream: {:?}", name, frame);
                        break;
                    }
                    // Pings are answered by tungstenite itself.
                    Ok(_) => continue,
                    Err(e) => Err(e.into()),
                };

                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    break;
                }
            }
        });

        Ok(ChildStream::new(rx, Some(reader.abort_handle())))
    }

    async fn upload_object(&self, object_key: &str, data: Bytes) -> Result<UploadResult, BackendError> {
        let url = self.object_endpoint(object_key, None)?;
        let size = data.len();
        let resp = self.http.put(url).body(data).send().await?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), format!("upload '{}'", object_key)));
        }
        let result: UploadResult = resp.json().await?;
        debug!("Uploaded '{}' ({} bytes)", object_key, size);
        Ok(result)
    }

    async fn resolve_public_url(&self, object_key: &str) -> Result<String, BackendError> {
        let url = self.object_endpoint(object_key, Some("url"))?;
        let resp = self.http.get(url).send().await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json::<PublicUrlResponse>().await?.url),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(object_key.to_string())),
            s => Err(status_error(s, format!("resolve URL of '{}'", object_key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(database_url: &str) -> RemoteBackend {
        let config = BackendConfig::from_lookup(|var| match var {
            crate::config::DATABASE_URL_VAR => Some(database_url.to_string()),
            crate::config::STORAGE_BUCKET_VAR => Some("images".to_string()),
            _ => None,
        })
        .unwrap();
        RemoteBackend::new(config).unwrap()
    }

    #[test]
    fn endpoints_encode_each_segment() {
        let remote = backend("http://localhost:3000");
        let url = remote.object_endpoint("my cat.png", Some("url")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/storage/images/my%20cat.png/url");

        let url = remote.endpoint(&["db", "messages", "-Nabc"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/db/messages/-Nabc");
    }

    #[test]
    fn endpoints_keep_a_base_path() {
        let remote = backend("https://chat.example/api/");
        let url = remote.endpoint(&["db", "posts"]).unwrap();
        assert_eq!(url.as_str(), "https://chat.example/api/db/posts");
    }

    #[test]
    fn websocket_url_follows_the_http_scheme() {
        let ws = websocket_url(Url::parse("http://localhost:3000/subscribe/messages").unwrap()).unwrap();
        assert_eq!(ws.as_str(), "ws://localhost:3000/subscribe/messages");

        let wss = websocket_url(Url::parse("https://chat.example/subscribe/messages").unwrap()).unwrap();
        assert_eq!(wss.scheme(), "wss");

        assert!(websocket_url(Url::parse("ftp://chat.example/").unwrap()).is_err());
    }

    #[test]
    fn generated_keys_are_unique_and_ordered() {
        let remote = backend("http://localhost:3000");
        let ns = NamespaceRef::new("messages");
        let a = remote.generate_key(&ns);
        let b = remote.generate_key(&ns);
        assert!(a.key() < b.key());
        assert_eq!(b.namespace(), &ns);
    }
}
