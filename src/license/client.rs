//! Licensing Authority Client
//!
//! Fetches authoritative license status from the remote licensing service.
//! Failures are classified: the authority explicitly rejecting a license
//! (any 4xx) is distinct from the authority being unreachable or broken.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::record::LicenseStatus;

/// Licensing authority errors
#[derive(Error, Debug)]
pub enum AuthorityError {
    /// The authority answered and refused the license (invalid, unknown, revoked)
    #[error("License rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid authority URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthorityError {
    /// Whether the authority made a definitive decision about the license
    pub fn is_classified(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthorityError::Timeout
        } else if err.is_decode() {
            AuthorityError::InvalidResponse(err.to_string())
        } else {
            AuthorityError::Transport(err.to_string())
        }
    }
}

/// Result type alias for authority calls
pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Source of authoritative license status
#[async_trait]
pub trait LicenseAuthority: Send + Sync {
    /// Fetch the current status for an (email, key) pair
    async fn get_license(&self, email: &str, key: &str) -> AuthorityResult<LicenseStatus>;
}

/// HTTP client for the licensing authority
pub struct CloudClient {
    client: Client,
    base_url: Url,
}

impl CloudClient {
    /// Path of the license status endpoint, relative to the base URL
    pub const LICENSE_PATH: &'static str = "api/v1/license";

    pub fn new(base_url: Url, timeout: Duration) -> AuthorityResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn license_url(&self) -> AuthorityResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(Self::LICENSE_PATH)?)
    }
}

#[async_trait]
impl LicenseAuthority for CloudClient {
    async fn get_license(&self, email: &str, key: &str) -> AuthorityResult<LicenseStatus> {
        let url = self.license_url()?;
        debug!("Fetching license status for {} from {}", email, url);

        let response = self
            .client
            .get(url)
            .query(&[("email", email), ("key", key)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<LicenseStatus>().await?);
        }

        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }
}

/// Map a non-success HTTP status to an authority error
pub fn classify_status(status: StatusCode, message: String) -> AuthorityError {
    if status.is_client_error() {
        AuthorityError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        AuthorityError::Server {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    async fn license_route(
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, (HttpStatus, String)> {
        match query.get("key").map(String::as_str) {
            Some("GOOD") => Ok(Json(serde_json::json!({
                "validUntil": "2031-01-01T00:00:00Z",
                "supportUntil": "2030-06-01T00:00:00Z",
                "maxAllowedAppRelease": "5.0.0"
            }))),
            Some("BROKEN") => Err((HttpStatus::INTERNAL_SERVER_ERROR, "boom".to_string())),
            Some("GARBLED") => Ok(Json(serde_json::json!({"unexpected": true}))),
            _ => Err((HttpStatus::NOT_FOUND, "license not found".to_string())),
        }
    }

    fn client(base: Url) -> CloudClient {
        CloudClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::FORBIDDEN, String::new()).is_classified());
        assert!(classify_status(StatusCode::NOT_FOUND, String::new()).is_classified());
        assert!(!classify_status(StatusCode::BAD_GATEWAY, String::new()).is_classified());
        assert!(!AuthorityError::Timeout.is_classified());
    }

    #[test]
    fn test_license_url_keeps_base_path() {
        let client = client(Url::parse("https://cloud.example.com/prefix").unwrap());
        assert_eq!(
            client.license_url().unwrap().as_str(),
            "https://cloud.example.com/prefix/api/v1/license"
        );
    }

    #[tokio::test]
    async fn test_get_license_outcomes() {
        let base = serve(Router::new().route("/api/v1/license", get(license_route))).await;
        let client = client(base);

        let status = client.get_license("a@example.com", "GOOD").await.unwrap();
        assert_eq!(status.max_allowed_app_release.as_deref(), Some("5.0.0"));

        let rejected = client.get_license("a@example.com", "UNKNOWN").await.unwrap_err();
        assert!(matches!(rejected, AuthorityError::Rejected { status: 404, .. }));
        assert!(rejected.is_classified());

        let broken = client.get_license("a@example.com", "BROKEN").await.unwrap_err();
        assert!(matches!(broken, AuthorityError::Server { status: 500, .. }));
        assert!(!broken.is_classified());

        let garbled = client.get_license("a@example.com", "GARBLED").await.unwrap_err();
        assert!(!garbled.is_classified());
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_unclassified() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(Url::parse(&format!("http://{}/", addr)).unwrap());
        let err = client.get_license("a@example.com", "GOOD").await.unwrap_err();
        assert!(!err.is_classified());
    }
}
