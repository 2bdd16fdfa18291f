//! Outbound HTTP to the identity provider
//!
//! Both provider calls are idempotent JSON GETs with the same hardening:
//! bounded timeouts, no redirects, and a streamed size limit on the body.

use serde::de::DeserializeOwned;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{ConfigError, DiscoveryError, KeyFetchError};

/// Build the shared HTTP client
///
/// # Errors
///
/// Returns [`ConfigError::HttpClient`] if the TLS backend cannot be initialised.
pub(crate) fn build_client(config: &HttpConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Why a provider GET failed, before it is attributed to discovery or keys
#[derive(Debug)]
pub(crate) enum FetchFailure {
    Http(String),
    Status(u16),
    TooLarge,
    Json(String),
}

/// GET `url` and decode the JSON body, refusing bodies over `max_size` bytes
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    max_size: usize,
) -> Result<T, FetchFailure> {
    let mut response = client
        .get(url.clone())
        .header(http::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| FetchFailure::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchFailure::Status(status.as_u16()));
    }

    if let Some(content_length) = response.content_length()
        && content_length > max_size as u64
    {
        return Err(FetchFailure::TooLarge);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchFailure::Http(e.to_string()))?
    {
        if body.len() + chunk.len() > max_size {
            return Err(FetchFailure::TooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    serde_json::from_slice(&body).map_err(|e| FetchFailure::Json(e.to_string()))
}

impl From<FetchFailure> for DiscoveryError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Http(e) => Self::Http(e),
            FetchFailure::Status(code) => Self::Status(code),
            FetchFailure::TooLarge => Self::ResponseTooLarge,
            FetchFailure::Json(e) => Self::InvalidDocument(e),
        }
    }
}

impl From<FetchFailure> for KeyFetchError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Http(e) => Self::Http(e),
            FetchFailure::Status(code) => Self::Status(code),
            FetchFailure::TooLarge => Self::ResponseTooLarge,
            FetchFailure::Json(e) => Self::InvalidDocument(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        build_client(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"a": 1})))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/doc", server.uri())).unwrap();
        let value: serde_json::Value = get_json(&client(), &url, 1024).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_get_json_status_and_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let missing = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = get_json::<serde_json::Value>(&client(), &missing, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchFailure::Status(404)));

        let big = Url::parse(&format!("{}/big", server.uri())).unwrap();
        let err = get_json::<serde_json::Value>(&client(), &big, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchFailure::TooLarge));
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://169.254.169.254/"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/moved", server.uri())).unwrap();
        let err = get_json::<serde_json::Value>(&client(), &url, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchFailure::Status(302)));
    }

    #[test]
    fn test_failure_attribution() {
        assert_eq!(
            DiscoveryError::from(FetchFailure::Json("eof".into())),
            DiscoveryError::InvalidDocument("eof".into())
        );
        assert_eq!(
            KeyFetchError::from(FetchFailure::TooLarge),
            KeyFetchError::ResponseTooLarge
        );
    }
}
