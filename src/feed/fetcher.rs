use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while retrieving a feed document.
///
/// Every variant is a network-class failure from the caller's point of view;
/// the refresh pipeline wraps them as [`crate::feed::IngestError::Network`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect policy, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

/// HTTP behaviour for [`FeedFetcher`], usually built by
/// [`crate::config::Config::fetch_settings`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Applies to connecting and to the whole request
    pub timeout: Duration,
    pub user_agent: String,
    /// Maximum accepted body size in bytes
    pub max_size: usize,
    pub max_redirects: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("feedsync/{}", env!("CARGO_PKG_VERSION")),
            max_size: 10 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

/// Retrieves raw feed documents over HTTP.
///
/// One GET per call, no retries. Cloning shares the underlying connection
/// pool.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_size: usize,
}

impl FeedFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .redirect(create_redirect_policy(settings.max_redirects))
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            client,
            timeout: settings.timeout,
            max_size: settings.max_size,
        })
    }

    /// Fetch `url` and return the body of a 2xx response.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] - connect or read exceeded the timeout
    /// - [`FetchError::Network`] - connection, TLS or redirect failure
    /// - [`FetchError::HttpStatus`] - any non-2xx final status
    /// - [`FetchError::ResponseTooLarge`] - body over the size limit
    /// - [`FetchError::IncompleteResponse`] - body shorter than Content-Length
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(FetchError::from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            read_limited_bytes(response, self.max_size).await
        };

        // The client timeout covers each request; this bounds the body stream as well.
        let bytes = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)??;

        tracing::debug!(url = %url, bytes = bytes.len(), "Fetched feed document");
        Ok(bytes)
    }
}

/// Create a custom redirect policy with loop detection and limited hops.
///
/// - Limits redirects to `max_hops`
/// - Detects redirect loops (same URL appearing twice in chain)
/// - Logs redirect chain for debugging
fn create_redirect_policy(max_hops: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_hops {
            return attempt.error(format!("Too many redirects (max {})", max_hops));
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len(),
            "Following redirect"
        );

        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
