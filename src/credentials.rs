//! Authentication material for the market feed.
//!
//! The stream authenticates on the WebSocket upgrade request itself: four
//! custom headers carry the session access token, API key, client code and
//! feed token. These values are produced by the REST login flow, which lives
//! outside this crate.
//!
//! Header values are validated and cached at construction time so that every
//! (re)connect reuses them without re-parsing.

use std::fmt;

use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue};

use crate::constants::headers;
use crate::error::{Result, StreamError};

/// Environment variable holding the access token.
pub const ENV_ACCESS_TOKEN: &str = "SMARTAPI_ACCESS_TOKEN";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "SMARTAPI_API_KEY";
/// Environment variable holding the client code.
pub const ENV_CLIENT_CODE: &str = "SMARTAPI_CLIENT_CODE";
/// Environment variable holding the feed token.
pub const ENV_FEED_TOKEN: &str = "SMARTAPI_FEED_TOKEN";

/// Session credentials sent as headers on every connect.
///
/// # Example
///
/// ```
/// use smartstream_rs::credentials::Credentials;
///
/// let creds = Credentials::new("jwt-token", "api-key", "A123456", "feed-token")?;
/// assert_eq!(creds.client_code(), "A123456");
/// # Ok::<(), smartstream_rs::StreamError>(())
/// ```
#[derive(Clone)]
pub struct Credentials {
    access_token: String,
    api_key: String,
    client_code: String,
    feed_token: String,
    /// Pre-built header values, cached to avoid per-connect parsing.
    header_access_token: HeaderValue,
    header_api_key: HeaderValue,
    header_client_code: HeaderValue,
    header_feed_token: HeaderValue,
}

impl Credentials {
    /// Create credentials from the four auth values.
    ///
    /// Fails with [`StreamError::InvalidArgument`] if a value is empty or
    /// contains characters that are not valid in an HTTP header.
    pub fn new(
        access_token: impl Into<String>,
        api_key: impl Into<String>,
        client_code: impl Into<String>,
        feed_token: impl Into<String>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        let api_key = api_key.into();
        let client_code = client_code.into();
        let feed_token = feed_token.into();

        let header_access_token = header_value("access token", &access_token)?;
        let header_api_key = header_value("api key", &api_key)?;
        let header_client_code = header_value("client code", &client_code)?;
        let header_feed_token = header_value("feed token", &feed_token)?;

        Ok(Self {
            access_token,
            api_key,
            client_code,
            feed_token,
            header_access_token,
            header_api_key,
            header_client_code,
            header_feed_token,
        })
    }

    /// Load credentials from `SMARTAPI_ACCESS_TOKEN`, `SMARTAPI_API_KEY`,
    /// `SMARTAPI_CLIENT_CODE` and `SMARTAPI_FEED_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| StreamError::InvalidArgument(format!("environment variable {name} is not set")))
        };
        Self::new(
            var(ENV_ACCESS_TOKEN)?,
            var(ENV_API_KEY)?,
            var(ENV_CLIENT_CODE)?,
            var(ENV_FEED_TOKEN)?,
        )
    }

    /// Returns the access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the client code.
    pub fn client_code(&self) -> &str {
        &self.client_code
    }

    /// Returns the feed token.
    pub fn feed_token(&self) -> &str {
        &self.feed_token
    }

    /// Auth headers for the upgrade request. Uses the cached [`HeaderValue`]s,
    /// only the [`HeaderMap`] container is allocated per call.
    pub fn auth_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(4);
        map.insert(headers::AUTHORIZATION, self.header_access_token.clone());
        map.insert(headers::API_KEY, self.header_api_key.clone());
        map.insert(headers::CLIENT_CODE, self.header_client_code.clone());
        map.insert(headers::FEED_TOKEN, self.header_feed_token.clone());
        map
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("client_code", &self.client_code)
            .field("feed_token", &"<redacted>")
            .finish()
    }
}

fn header_value(what: &str, value: &str) -> Result<HeaderValue> {
    if value.is_empty() {
        return Err(StreamError::InvalidArgument(format!("{what} must not be empty")));
    }
    HeaderValue::from_str(value)
        .map_err(|_| StreamError::InvalidArgument(format!("{what} contains invalid header characters")))
}
