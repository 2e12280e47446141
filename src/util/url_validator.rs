use thiserror::Error;
use url::Url;

/// Longest feed URL the store accepts.
pub const MAX_FEED_URL_LENGTH: usize = 500;

/// Errors that can occur during feed URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed as an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL exceeds the storage limit.
    #[error("URL is longer than {MAX_FEED_URL_LENGTH} characters")]
    TooLong,
}

/// Validates a URL string for use as a feed's identity.
///
/// Feed URLs must be well-formed absolute `http`/`https` URLs with a host and
/// fit the 500-character column, both as given and once serialized. Relative references such as `/feed.xml` fail
/// with [`UrlValidationError::InvalidUrl`].
///
/// # Examples
///
/// ```
/// use feedsync::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("/relative/feed").is_err());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    if url_str.chars().count() > MAX_FEED_URL_LENGTH {
        return Err(UrlValidationError::TooLong);
    }

    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    // Percent-encoding can lengthen the URL, and the serialized form is stored
    if url.as_str().chars().count() > MAX_FEED_URL_LENGTH {
        return Err(UrlValidationError::TooLong);
    }

    Ok(url)
}
