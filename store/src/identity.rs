//! Firebase Auth user listing through the Identity Toolkit REST API

use crate::auth::{AccessTokenProvider, TokenSource};
use crate::{IdentityDirectory, UserPage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, info, instrument};

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<UserInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    local_id: String,
}

/// Identity Toolkit `accounts:batchGet` client for one project
#[derive(Debug)]
pub struct IdentityToolkitDirectory {
    http_client: HttpClient,
    tokens: AccessTokenProvider,
    accounts_url: String,
}

impl IdentityToolkitDirectory {
    pub fn new(project_id: &str, source: TokenSource) -> Self {
        Self::with_base_url(IDENTITY_TOOLKIT_URL, project_id, source)
    }

    pub fn with_base_url(base_url: &str, project_id: &str, source: TokenSource) -> Self {
        let http_client = HttpClient::new();
        let accounts_url = format!(
            "{}/v1/projects/{}/accounts:batchGet",
            base_url.trim_end_matches('/'),
            project_id
        );

        info!("Identity directory initialized for project: {}", project_id);
        Self {
            tokens: AccessTokenProvider::new(http_client.clone(), source),
            http_client,
            accounts_url,
        }
    }
}

#[async_trait]
impl IdentityDirectory for IdentityToolkitDirectory {
    #[instrument(skip(self))]
    async fn list_users(&self, max_results: usize, page_token: Option<&str>) -> Result<UserPage> {
        let access_token = self.tokens.access_token().await?;

        let mut query = vec![("maxResults", max_results.to_string())];
        if let Some(token) = page_token {
            query.push(("nextPageToken", token.to_string()));
        }

        let response = self
            .http_client
            .get(&self.accounts_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .query(&query)
            .send()
            .await
            .context("identity toolkit request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Failed to list users ({}): {}", status, error_text));
        }

        let page: BatchGetResponse = response
            .json()
            .await
            .context("unexpected accounts:batchGet response")?;
        debug!("Listed {} users", page.users.len());

        Ok(UserPage {
            user_ids: page.users.into_iter().map(|u| u.local_id).collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNTS_PATH: &str = "/v1/projects/demo-project/accounts:batchGet";

    #[tokio::test]
    async fn test_list_users_sends_cursor_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNTS_PATH))
            .and(header("Authorization", "Bearer test-token"))
            .and(query_param("maxResults", "1000"))
            .and(query_param("nextPageToken", "cursor-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "identitytoolkit#DownloadAccountResponse",
                "users": [{"localId": "u2", "email": "u2@example.com"}, {"localId": "u3"}],
                "nextPageToken": "cursor-2"
            })))
            .mount(&server)
            .await;

        let directory = IdentityToolkitDirectory::with_base_url(
            &server.uri(),
            "demo-project",
            TokenSource::Static("test-token".to_string()),
        );
        let page = directory.list_users(1000, Some("cursor-1")).await.unwrap();

        assert_eq!(page.user_ids, vec!["u2", "u3"]);
        assert_eq!(page.next_page_token.as_deref(), Some("cursor-2"));
    }

    #[tokio::test]
    async fn test_last_page_has_no_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "identitytoolkit#DownloadAccountResponse"
            })))
            .mount(&server)
            .await;

        let directory = IdentityToolkitDirectory::with_base_url(
            &server.uri(),
            "demo-project",
            TokenSource::Static("test-token".to_string()),
        );
        let page = directory.list_users(1000, None).await.unwrap();

        assert!(page.user_ids.is_empty());
        assert_eq!(page.next_page_token, None);
    }

    #[tokio::test]
    async fn test_error_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNTS_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
            .mount(&server)
            .await;

        let directory = IdentityToolkitDirectory::with_base_url(
            &server.uri(),
            "demo-project",
            TokenSource::Static("test-token".to_string()),
        );
        let err = directory.list_users(1000, None).await.unwrap_err();

        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("PERMISSION_DENIED"));
    }
}
