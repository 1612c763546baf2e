use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::core::error::{SyncError, SyncResult};

/// Raw response of a single request against the data server.
///
/// Non-success statuses are data, not errors: a 404 on a marker drives the
/// base fallback, so callers decide what each status means.
#[derive(Debug, Clone)]
pub struct FetchResponse<T> {
    pub url: String,
    pub status: u16,
    pub body: T,
}

impl<T> FetchResponse<T> {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Turn any non-success status into a `Transport` error.
    pub fn into_success(self) -> SyncResult<T> {
        if self.ok() {
            Ok(self.body)
        } else {
            Err(SyncError::Transport {
                url: self.url,
                status: self.status,
            })
        }
    }
}

/// Request/response contract with the data server.
///
/// Paths are relative to the server root (e.g. `data/v2/_BASE`).
/// Connection failures are returned as errors; HTTP statuses are not.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_text(&self, path: &str) -> SyncResult<FetchResponse<String>>;

    async fn fetch_bytes(&self, path: &str) -> SyncResult<FetchResponse<Vec<u8>>>;
}

/// `Transport` over HTTP(S) with a shared reqwest client.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_text(&self, path: &str) -> SyncResult<FetchResponse<String>> {
        let url = self.url_for(path);
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!("GET {} -> {}", url, status);
        Ok(FetchResponse { url, status, body })
    }

    async fn fetch_bytes(&self, path: &str) -> SyncResult<FetchResponse<Vec<u8>>> {
        let url = self.url_for(path);
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(FetchResponse { url, status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_joins_without_double_slashes() {
        let client = Client::new();
        let transport = HttpTransport::new(client, "https://example.com/game/");
        assert_eq!(
            transport.url_for("/data/v1/_BASE"),
            "https://example.com/game/data/v1/_BASE"
        );
        assert_eq!(
            transport.url_for("data/v1/srb2.pk3.md5"),
            "https://example.com/game/data/v1/srb2.pk3.md5"
        );
    }

    #[test]
    fn into_success_maps_status_to_transport_error() {
        let response = FetchResponse {
            url: "https://example.com/data/v1/a".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(!response.is_not_found());
        match response.into_success() {
            Err(SyncError::Transport { status, .. }) => assert_eq!(status, 503),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
