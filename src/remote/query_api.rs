//! HTTP client for the hosted query API
//!
//! The service fetches the requested URLs itself, follows redirects and
//! answers with one resource per page it reached.

use crate::config::RemoteConfig;
use crate::remote::{sanitize_header_key, BatchFetcher, CrawlResult, FetchError, ResponseHeaders};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Builds the HTTP client used to talk to the query API
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Builds the batch query for `urls`
///
/// ```
/// use hashtag_crawler::config::RemoteConfig;
/// use hashtag_crawler::remote::build_query;
///
/// let query = build_query(&RemoteConfig::default(), &["http://t.co/a".to_string()]);
/// assert!(query.starts_with("USE \"store://wPdxHE6ILC1Ti4oCGOIs0v\" AS DATA;"));
/// assert!(query.contains("url in ('http://t.co/a')"));
/// ```
pub fn build_query(config: &RemoteConfig, urls: &[String]) -> String {
    let url_list = urls
        .iter()
        .map(|url| format!("'{}'", escape(url)))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "USE \"{definition}\" AS {table}; select * from {table} where url in ({urls}) and ua='{ua}' and htmlstr='true'",
        definition = config.table_definition,
        table = config.table_name,
        urls = url_list,
        ua = escape(&config.user_agent),
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Deserialize)]
struct Envelope {
    query: QueryBody,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    results: Option<Results>,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    resources: Option<OneOrMany<Resource>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    redirect: Option<OneOrMany<Hop>>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    headers: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Hop {
    #[serde(default)]
    from: Option<String>,
}

/// Status codes arrive as strings (`"200"`) or numbers
fn parse_status(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Keeps string-valued headers, either flat or wrapped in `{"result": {..}}`
fn parse_headers(value: Value) -> BTreeMap<String, String> {
    let Value::Object(mut fields) = value else {
        return BTreeMap::new();
    };
    if fields.len() == 1 && matches!(fields.get("result"), Some(Value::Object(_))) {
        if let Some(Value::Object(inner)) = fields.remove("result") {
            fields = inner;
        }
    }

    flatten_strings(fields)
}

fn flatten_strings(fields: Map<String, Value>) -> BTreeMap<String, String> {
    fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((sanitize_header_key(&key), s)),
            _ => None,
        })
        .collect()
}

/// Decodes a query API response body
///
/// Resources without a `url` are ignored. Only resources with `content`
/// resolve redirects: every hop of a chain maps to the final URL, a resource
/// reached directly maps to itself. Status and headers are kept for every
/// resource that reports them.
pub fn parse_response(body: &str) -> Result<CrawlResult, FetchError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| FetchError::Deserialization(e.to_string()))?;

    let resources = envelope
        .query
        .results
        .and_then(|r| r.resources)
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    let mut result = CrawlResult::new();
    for resource in resources {
        let Some(url) = resource.url.filter(|u| !u.is_empty()) else {
            continue;
        };

        let headers = ResponseHeaders {
            status: resource.status.as_ref().and_then(parse_status),
            fields: resource.headers.map(parse_headers).unwrap_or_default(),
        };
        if !headers.is_empty() {
            result.headers.insert(url.clone(), headers);
        }

        let Some(content) = resource.content else {
            continue;
        };

        match resource.redirect {
            Some(chain) => {
                for hop in chain.into_vec() {
                    if let Some(from) = hop.from.filter(|f| !f.is_empty()) {
                        result.redirects.insert(from, url.clone());
                    }
                }
            }
            None => {
                result.redirects.insert(url.clone(), url.clone());
            }
        }
        result.contents.insert(url, content);
    }

    Ok(result)
}

/// [`BatchFetcher`] backed by the hosted query API
pub struct QueryApiFetcher {
    client: Client,
    config: RemoteConfig,
    timeout: Duration,
}

impl QueryApiFetcher {
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(timeout)?,
            config: config.clone(),
            timeout,
        })
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if error.is_decode() {
            FetchError::Deserialization(error.to_string())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl BatchFetcher for QueryApiFetcher {
    async fn fetch(&self, urls: &[String]) -> Result<CrawlResult, FetchError> {
        if urls.is_empty() {
            return Ok(CrawlResult::new());
        }

        let query = build_query(&self.config, urls);
        trace!(%query, "Sending batch query");

        let response = self
            .client
            .post(&self.config.endpoint)
            .form(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("callback", ""),
            ])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Network(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Unexpected(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let result = parse_response(&body)?;

        debug!(
            requested = urls.len(),
            pages = result.contents.len(),
            headers = result.headers.len(),
            redirects = result.redirects.len(),
            "Batch query answered"
        );

        Ok(result)
    }
}
