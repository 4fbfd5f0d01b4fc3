//! Outbound GET requests against the origin site.
//!
//! Redirects are followed by hand so the hop bound is explicit and the caller's
//! headers survive every hop. The timeout covers the whole redirect chain.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, LOCATION, PRAGMA, USER_AGENT,
};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    pub status: u16,
    /// URL that produced the body, after redirects.
    pub final_url: Url,
    pub redirects: usize,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {cause}")]
    Network { cause: String },
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("more than {limit} redirects")]
    TooManyRedirects { limit: usize },
    #[error("upstream responded with status {code}")]
    UpstreamStatus { code: u16 },
}

#[async_trait]
pub trait Fetch: Send + Sync {
    /// GET `url`; entries in `extra_headers` replace the baseline headers of
    /// the same name.
    async fn fetch(&self, url: &Url, extra_headers: &HeaderMap) -> Result<FetchResult, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    baseline: HeaderMap,
    options: FetchOptions,
}

impl HttpFetcher {
    pub fn new(options: FetchOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build upstream http client")?;
        let baseline = baseline_headers(&options.user_agent)?;

        Ok(Self {
            client,
            baseline,
            options,
        })
    }

    fn merged_headers(&self, extra: &HeaderMap) -> HeaderMap {
        let mut headers = self.baseline.clone();
        for name in extra.keys() {
            headers.remove(name);
        }
        for (name, value) in extra {
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    async fn follow(&self, start: &Url, headers: HeaderMap) -> Result<FetchResult, FetchError> {
        let limit = self.options.max_redirects;
        let mut current = start.clone();
        let mut hops = 0usize;

        loop {
            if current.scheme() != "http" && current.scheme() != "https" {
                return Err(FetchError::Network {
                    cause: format!("unsupported url scheme: {}", current.scheme()),
                });
            }

            let response = self
                .client
                .get(current.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(|err| self.classify(err))?;
            let status = response.status();

            if is_followed_redirect(status) {
                if hops >= limit {
                    tracing::warn!(hops, limit, "redirect limit exceeded");
                    return Err(FetchError::TooManyRedirects { limit });
                }
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| current.join(location.trim()).ok());
                let Some(next) = next else {
                    tracing::warn!(status = status.as_u16(), "redirect without usable location");
                    return Err(FetchError::UpstreamStatus {
                        code: status.as_u16(),
                    });
                };
                hops += 1;
                tracing::debug!(hop = hops, status = status.as_u16(), "following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::UpstreamStatus {
                    code: status.as_u16(),
                });
            }

            let response_headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|err| self.classify(err))?
                .to_vec();

            return Ok(FetchResult {
                body,
                headers: response_headers,
                status: status.as_u16(),
                final_url: current,
                redirects: hops,
            });
        }
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout {
                after: self.options.timeout,
            };
        }
        FetchError::Network {
            cause: format!("{:#}", anyhow::Error::new(err.without_url())),
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url, extra_headers: &HeaderMap) -> Result<FetchResult, FetchError> {
        let headers = self.merged_headers(extra_headers);
        let timeout = self.options.timeout;

        let result = match tokio::time::timeout(timeout, self.follow(url, headers)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { after: timeout }),
        };

        match &result {
            Ok(page) => tracing::debug!(
                status = page.status,
                redirects = page.redirects,
                bytes = page.body.len(),
                "fetched upstream"
            ),
            Err(err) => tracing::debug!(%err, "upstream fetch failed"),
        }
        result
    }
}

fn baseline_headers(user_agent: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("user agent is not a valid header value")?,
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("id-ID,id;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(headers)
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}
