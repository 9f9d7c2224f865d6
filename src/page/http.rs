//! Plain-HTTP page session built on `reqwest`.

use super::{FetchResponse, HtmlDocument, PageElement, PageSession};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, SessionError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tracing::debug;

/// Loads pages over HTTP and parses the returned HTML.
///
/// Cookies set by the site persist for the lifetime of the session, so image
/// requests look like they come from the same visitor as the page load.
pub struct HttpPageSession {
    client: reqwest::Client,
    page: Option<HtmlDocument>,
}

impl HttpPageSession {
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DownloadError::SessionUnavailable {
                reason: e.to_string(),
            })?;
        Ok(Self { client, page: None })
    }

    pub fn from_config(config: &DownloadConfig) -> Result<Self, DownloadError> {
        Self::new(&config.user_agent, config.request_timeout_secs)
    }

    async fn load(&mut self, url: &str) -> Result<(), SessionError> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        self.page = Some(HtmlDocument::new(final_url, body));
        Ok(())
    }

    async fn get_bytes(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, SessionError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let fetch_err = |e: reqwest::Error| SessionError::Fetch {
            url: url.to_string(),
            detail: e.to_string(),
        };
        let response = request.send().await.map_err(fetch_err)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(fetch_err)?;
        Ok(FetchResponse {
            status,
            bytes: bytes.to_vec(),
        })
    }
}

impl PageSession for HttpPageSession {
    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        self.load(url).boxed()
    }

    fn current_url(&self) -> Option<String> {
        self.page.as_ref().map(|p| p.url().to_string())
    }

    fn query_all(&self, selector: &str) -> Vec<PageElement> {
        self.page
            .as_ref()
            .map(|p| p.select(selector))
            .unwrap_or_default()
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<FetchResponse, SessionError>> {
        self.get_bytes(url, headers).boxed()
    }
}
