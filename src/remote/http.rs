use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{IF_MATCH, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use url::Url;

use crate::error::{Result, SyncError};
use crate::BoxFuture;

use super::{RemoteError, RemoteRecord, RemoteResult, RemoteStore, SaveMode};

#[derive(Debug, Serialize)]
struct SaveRecordRequest<'a> {
    fields: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    device_id: &'a str,
}

/// Record service reached over HTTP.
///
/// `GET {base}/records/{id}` and `PUT {base}/records/{id}`, with `If-Match`
/// carrying the change tag for conditional writes.
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
    device_id: String,
    timeout: Duration,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        device_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| SyncError::Config(format!("invalid remote_url {base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("speedy-sync/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url,
            access_token,
            device_id,
            timeout,
        })
    }

    fn record_url(&self, record_id: &str) -> RemoteResult<Url> {
        self.base_url
            .join(&format!("records/{}", urlencoding::encode(record_id)))
            .map_err(|e| RemoteError::Other(format!("bad record id {record_id}: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Transient(err.to_string())
        }
    }

    async fn status_error(record_id: &str, response: Response) -> RemoteError {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(record_id.to_string()),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict,
            StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
                retry_after: retry_after(&response),
            },
            s if s.is_server_error() => RemoteError::Transient(format!("HTTP {s}")),
            s => {
                let body = response.text().await.unwrap_or_default();
                RemoteError::Other(format!("HTTP {s}: {body}"))
            }
        }
    }

    async fn fetch_record(&self, record_id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let url = self.record_url(record_id)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(record_id, response).await);
        }

        let mut record: RemoteRecord = response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed record {record_id}: {e}")))?;
        record.id = record_id.to_string();
        Ok(Some(record))
    }

    async fn save_record(&self, record: RemoteRecord, mode: SaveMode) -> RemoteResult<RemoteRecord> {
        let url = self.record_url(&record.id)?;
        let mut request = self
            .authorize(self.client.put(url))
            .json(&SaveRecordRequest {
                fields: &record.fields,
            });

        if mode == SaveMode::IfUnchanged {
            request = match &record.change_tag {
                Some(tag) => request.header(IF_MATCH, tag.as_str()),
                None => request.header(IF_NONE_MATCH, "*"),
            };
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(Self::status_error(&record.id, response).await);
        }

        let mut saved: RemoteRecord = response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed save response: {e}")))?;
        saved.id = record.id;
        Ok(saved)
    }

    async fn subscribe(&self) -> RemoteResult<()> {
        let url = self
            .base_url
            .join("subscriptions")
            .map_err(|e| RemoteError::Other(e.to_string()))?;
        let response = self
            .authorize(self.client.post(url))
            .json(&SubscribeRequest {
                device_id: &self.device_id,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::status_error("subscriptions", response).await);
        }
        tracing::info!("Registered {} for change notifications", self.device_id);
        Ok(())
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl RemoteStore for HttpRemoteStore {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, RemoteResult<Option<RemoteRecord>>> {
        Box::pin(self.fetch_record(record_id))
    }

    fn save(&self, record: RemoteRecord, mode: SaveMode) -> BoxFuture<'_, RemoteResult<RemoteRecord>> {
        Box::pin(self.save_record(record, mode))
    }

    fn register_for_changes(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(self.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> HttpRemoteStore {
        HttpRemoteStore::new(base, None, "device-1".into(), Duration::from_secs(45)).unwrap()
    }

    #[test]
    fn test_record_url_encodes_id() {
        let store = store("https://sync.example.com/api");
        let url = store.record_url("articles_https://a.com/feed").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sync.example.com/api/records/articles_https%3A%2F%2Fa.com%2Ffeed"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = HttpRemoteStore::new("not a url", None, "d".into(), Duration::from_secs(1));
        assert!(matches!(err, Err(SyncError::Config(_))));
    }
}
