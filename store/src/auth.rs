//! OAuth2 access tokens for Google REST APIs
//!
//! Tokens come from a service account key, exchanged through a signed RS256
//! JWT assertion, or are handed in ready-made (tests, pre-minted tokens).

use crate::credentials::ServiceAccountKey;
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
// Refresh this long before the reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Where access tokens come from
#[derive(Debug, Clone)]
pub enum TokenSource {
    ServiceAccount(ServiceAccountKey),
    Static(String),
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Hands out bearer tokens, reusing one until it is about to expire
#[derive(Debug)]
pub struct AccessTokenProvider {
    http_client: HttpClient,
    source: TokenSource,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    pub fn new(http_client: HttpClient, source: TokenSource) -> Self {
        Self {
            http_client,
            source,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        let key = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(key) => key,
        };

        let now = Utc::now().timestamp();
        if let Some(cached) = self.cached.lock().clone() {
            if cached.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(cached.token);
            }
        }

        let response = self.exchange_assertion(key).await?;
        let expires_at = now + response.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        debug!("Fetched access token valid until {}", expires_at);
        *self.cached.lock() = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    async fn exchange_assertion(&self, key: &ServiceAccountKey) -> Result<TokenResponse> {
        let assertion = sign_assertion(key, Utc::now().timestamp())?;

        let response = self
            .http_client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("token endpoint request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to exchange service account assertion ({}): {}",
                status,
                error_text
            ));
        }

        Ok(response.json().await?)
    }
}

/// Build the signed JWT the token endpoint trades for an access token
pub fn sign_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    if !key.private_key_id.is_empty() {
        header.kid = Some(key.private_key_id.clone());
    }

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("service account private_key is not a valid RSA PEM")?;
    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = include_str!("../tests/fixtures/service_account.json");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/service_account_public.pem");

    fn fixture_key(token_uri: String) -> ServiceAccountKey {
        let mut key = ServiceAccountKey::from_json(FIXTURE).unwrap();
        key.token_uri = token_uri;
        key
    }

    #[test]
    fn test_assertion_carries_issuer_and_audience() {
        let key = fixture_key("https://oauth2.googleapis.com/token".to_string());
        let jwt = sign_assertion(&key, 1_700_000_000).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("fixture-key-1"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        let public_key = jsonwebtoken::DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        let data = jsonwebtoken::decode::<serde_json::Value>(&jwt, &public_key, &validation).unwrap();
        assert_eq!(data.claims["iss"], key.client_email.as_str());
        assert_eq!(data.claims["scope"], CLOUD_PLATFORM_SCOPE);
        assert_eq!(data.claims["exp"], 1_700_000_000 + ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn test_service_account_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fixture",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = fixture_key(format!("{}/token", server.uri()));
        let provider = AccessTokenProvider::new(HttpClient::new(), TokenSource::ServiceAccount(key));

        assert_eq!(provider.access_token().await.unwrap(), "ya29.fixture");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.fixture");
    }

    #[tokio::test]
    async fn test_token_endpoint_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let key = fixture_key(format!("{}/token", server.uri()));
        let provider = AccessTokenProvider::new(HttpClient::new(), TokenSource::ServiceAccount(key));

        let err = provider.access_token().await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }
}
