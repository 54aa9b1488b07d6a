use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use tcb_core::{domain::Credential, errors::Error, ports::TokenRefresher, Result};

const TWITCH_ID_URL: &str = "https://id.twitch.tv";
const API_TIMEOUT: Duration = Duration::from_secs(10);
const API_ERROR_MESSAGE: &str = "An error has occurred while reaching out to the TwitchAPI";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refreshes bot credentials against the Twitch OAuth endpoints.
#[derive(Clone, Debug)]
pub struct TwitchTokenRefresher {
    client_id: String,
    client_secret: String,
    base_url: String,
    http: reqwest::Client,
}

impl TwitchTokenRefresher {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: TWITCH_ID_URL.to_string(),
            http,
        })
    }

    /// Point at a different identity host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether Twitch still accepts `access_token`.
    pub async fn validate(&self, access_token: &str) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/oauth2/validate", self.base_url))
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await
            .map_err(|e| Error::TokenRefresh(format!("{API_ERROR_MESSAGE}: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        ensure_ok(resp).await?;
        Ok(true)
    }

    async fn request_refresh(&self, credential: &Credential) -> Result<Credential> {
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.base_url))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::TokenRefresh(format!("{API_ERROR_MESSAGE}: {e}")))?;

        let body: TokenResponse = ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(|e| Error::TokenRefresh(format!("invalid token response: {e}")))?;

        Ok(Credential {
            access_token: body.access_token,
            refresh_token: body
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| credential.refresh_token.clone()),
        })
    }
}

#[async_trait]
impl TokenRefresher for TwitchTokenRefresher {
    async fn refresh(&self, credential: &Credential, force_refresh: bool) -> Result<Credential> {
        if !force_refresh && self.validate(&credential.access_token).await? {
            return Ok(credential.clone());
        }
        let fresh = self.request_refresh(credential).await?;
        tracing::info!("twitch access token refreshed");
        Ok(fresh)
    }
}

async fn ensure_ok(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let body = resp.json::<serde_json::Value>().await.ok();
    let msg = match body {
        Some(json) => format!("{API_ERROR_MESSAGE}: {}", extract_error_message(&json)),
        None => API_ERROR_MESSAGE.to_string(),
    };
    Err(Error::TokenRefresh(msg))
}

/// Prefer the API's `message`, then its `status`, then the raw body.
fn extract_error_message(json: &serde_json::Value) -> String {
    if let Some(msg) = json
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
    {
        return msg.to_string();
    }
    if let Some(status) = json.get("status").and_then(|s| s.as_u64()).filter(|s| *s != 0) {
        return status.to_string();
    }
    json.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn refresher(url: &str) -> TwitchTokenRefresher {
        TwitchTokenRefresher::new("cid", "secret")
            .unwrap()
            .with_base_url(url)
    }

    #[tokio::test]
    async fn forced_refresh_posts_refresh_grant() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-access","refresh_token":"new-refresh","expires_in":14000,"scope":["chat:read","chat:edit"],"token_type":"bearer"}"#)
            .create_async()
            .await;
        let validate = server
            .mock("GET", "/oauth2/validate")
            .expect(0)
            .create_async()
            .await;

        let fresh = refresher(&server.url())
            .refresh(&Credential::new("old-access", "old-refresh"), true)
            .await
            .unwrap();

        assert_eq!(fresh, Credential::new("new-access", "new-refresh"));
        token.assert_async().await;
        validate.assert_async().await;
    }

    #[tokio::test]
    async fn missing_refresh_token_keeps_the_old_one() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-access"}"#)
            .create_async()
            .await;

        let fresh = refresher(&server.url())
            .refresh(&Credential::new("old-access", "old-refresh"), true)
            .await
            .unwrap();
        assert_eq!(fresh, Credential::new("new-access", "old-refresh"));
    }

    #[tokio::test]
    async fn valid_token_is_kept_without_force() {
        let mut server = mockito::Server::new_async().await;
        let validate = server
            .mock("GET", "/oauth2/validate")
            .match_header("authorization", "OAuth still-good")
            .with_status(200)
            .with_body(r#"{"client_id":"cid","login":"bot","expires_in":3600}"#)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let cred = Credential::new("still-good", "r");
        let got = refresher(&server.url()).refresh(&cred, false).await.unwrap();

        assert_eq!(got, cred);
        validate.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_refresh_reports_api_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":400,"message":"Invalid refresh token"}"#)
            .create_async()
            .await;

        let err = refresher(&server.url())
            .refresh(&Credential::new("a", "bad"), true)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "token refresh failed: An error has occurred while reaching out to the TwitchAPI: Invalid refresh token"
        );
    }

    #[tokio::test]
    async fn non_json_error_body_keeps_generic_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = refresher(&server.url())
            .refresh(&Credential::new("a", "r"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenRefresh(ref m) if m == API_ERROR_MESSAGE));
    }

    #[test]
    fn error_message_extraction_order() {
        assert_eq!(extract_error_message(&json!({"message": "m", "status": 400})), "m");
        assert_eq!(extract_error_message(&json!({"status": 401})), "401");
        assert_eq!(extract_error_message(&json!({"error": "x"})), r#"{"error":"x"}"#);
    }
}
