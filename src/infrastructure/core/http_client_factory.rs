use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates an HTTP client that retries transient failures (5xx, timeouts,
    /// connection resets) up to 3 times with exponential backoff.
    pub fn create_client(timeout: Duration) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("wickengine/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Appends URL-encoded query parameters to `base_url`.
///
/// reqwest-middleware 0.5 does not expose `.query()` on its request builder.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> Result<String, url::ParseError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = url::Url::parse(base_url)?;
    if !params.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
    }
    Ok(url.into())
}
