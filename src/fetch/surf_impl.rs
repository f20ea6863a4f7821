//! HTTP fetcher built on surf

use std::time::Duration;
use url::Url;

use super::{with_timeout, FetchError, Fetcher};

const MAX_REDIRECTS: u8 = 5;

/// [`Fetcher`] over surf with redirect following and optional bearer auth
#[derive(Clone)]
pub struct SurfFetcher {
    client: surf::Client,
    bearer_token: Option<String>,
}

impl Default for SurfFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfFetcher {
    /// Client with default settings and no credentials
    pub fn new() -> Self {
        Self {
            client: surf::Client::new().with(surf::middleware::Redirect::new(MAX_REDIRECTS)),
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for SurfFetcher {
    async fn fetch_bytes(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url.as_str());
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        with_timeout(timeout, async move {
            let mut response = request
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            let status = response.status();
            if status == surf::StatusCode::NotFound {
                return Err(FetchError::NotFound);
            }
            if !status.is_success() {
                return Err(FetchError::HttpStatus(u16::from(status)));
            }

            response
                .body_bytes()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))
        })
        .await
    }
}
