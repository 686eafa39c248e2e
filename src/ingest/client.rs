//! Upstream search client
//!
//! This module issues page requests against the search endpoint and
//! classifies each response:
//! - Quota exhaustion (403 with a quota marker in the body)
//! - Other HTTP failures
//! - Network failures
//! - Successful pages, with the raw entries left unparsed

use super::credentials::ApiKey;
use crate::config::UpstreamConfig;
use crate::HarvestError;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Fixed number of results requested per page
pub const PAGE_SIZE: u32 = 10;

/// Marker the upstream puts in quota rejections
const QUOTA_MARKER: &str = "quota";

/// One successfully fetched page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Raw entries, in upstream order
    pub items: Vec<Value>,
    /// Continuation token for the following page, if any
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Classified result of a search request
#[derive(Debug)]
pub enum SearchOutcome {
    Page(SearchPage),

    /// The credential used has no allowance left
    QuotaExceeded { status: u16 },

    /// Non-success status that is not a quota rejection
    HttpError { status: u16, body: String },

    /// Connection failure, timeout or unreadable body
    NetworkError { error: String },

    /// Success status with a body that is not a search page
    InvalidBody { error: String },
}

/// Builds the HTTP client used for upstream requests
pub fn build_http_client(config: &UpstreamConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Search endpoint client
#[derive(Clone)]
pub struct SearchClient {
    http: Client,
    base_url: Url,
}

impl SearchClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, HarvestError> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    /// Full request URL for one page of `query`
    pub fn request_url(&self, query: &str, key: &ApiKey, page_token: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("part", "snippet")
                .append_pair("q", query)
                .append_pair("maxResults", &PAGE_SIZE.to_string())
                .append_pair("order", "date")
                .append_pair("type", "video")
                .append_pair("key", key.expose());
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        url
    }

    /// Requests one page of results for `query`
    pub async fn search(
        &self,
        query: &str,
        key: &ApiKey,
        page_token: Option<&str>,
    ) -> SearchOutcome {
        let url = self.request_url(query, key, page_token);

        let response = match self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // reqwest includes the URL, and with it the credential
                return SearchOutcome::NetworkError {
                    error: e.without_url().to_string(),
                };
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return SearchOutcome::NetworkError {
                    error: e.without_url().to_string(),
                }
            }
        };

        classify(status, body)
    }
}

fn classify(status: StatusCode, body: String) -> SearchOutcome {
    if is_quota_exceeded(status, &body) {
        return SearchOutcome::QuotaExceeded {
            status: status.as_u16(),
        };
    }

    if !status.is_success() {
        return SearchOutcome::HttpError {
            status: status.as_u16(),
            body,
        };
    }

    match serde_json::from_str::<RawPage>(&body) {
        Ok(raw) => SearchOutcome::Page(SearchPage {
            items: raw.items,
            next_page_token: raw.next_page_token.filter(|token| !token.is_empty()),
        }),
        Err(e) => SearchOutcome::InvalidBody {
            error: e.to_string(),
        },
    }
}

/// True when a response is the upstream's quota rejection
pub fn is_quota_exceeded(status: StatusCode, body: &str) -> bool {
    status == StatusCode::FORBIDDEN && body.to_lowercase().contains(QUOTA_MARKER)
}
