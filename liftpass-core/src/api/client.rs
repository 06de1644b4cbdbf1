use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, header, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::ApiError;
use crate::model::{Avatar, Credential, NewAccount, ProfileUpdate, UserProfile};
use crate::store::Secret;

/// HTTP request timeout used when none is configured.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Largest avatar image the server accepts (5 MiB).
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

const SESSIONS_PATH: &str = "sessions";
const REFRESH_PATH: &str = "token/refresh";
const USERS_PATH: &str = "users";
const AVATAR_PATH: &str = "users/avatar";

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Parse `base_url` and use the default timeout.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid base URL {}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A successful sign-in: the profile and the credential, always together.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub user: UserProfile,
    pub credential: Credential,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    user: Option<UserProfile>,
    token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: Option<String>,
    refresh_token: Option<String>,
}

/// Client for the liftpass REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        // Url::join drops the last path segment unless the base ends in '/'.
        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(format!("invalid path {}: {}", path, e)))
    }

    /// `POST /sessions`: exchange email and password for a session.
    ///
    /// Fails with [`ApiError::InvalidResponse`] unless the body carries the
    /// user and both tokens.
    pub async fn create_session(&self, email: &str, password: &Secret) -> Result<SessionGrant, ApiError> {
        let response = self
            .client
            .post(self.url(SESSIONS_PATH)?)
            .json(&json!({ "email": email, "password": password.expose() }))
            .send()
            .await?;
        let body: SessionResponse = Self::parse(Self::check_response(response).await?).await?;

        let user = body.user.filter(|u| !u.is_empty());
        let credential = Self::credential(body.token, body.refresh_token);
        match (user, credential) {
            (Some(user), Some(credential)) => Ok(SessionGrant { user, credential }),
            _ => Err(ApiError::InvalidResponse(
                "sign-in response is missing the user or its tokens".to_string(),
            )),
        }
    }

    /// `PATCH /token/refresh`: trade a refresh token for a new credential.
    pub async fn refresh_session(&self, refresh_token: &Secret) -> Result<Credential, ApiError> {
        let response = self
            .client
            .patch(self.url(REFRESH_PATH)?)
            .json(&json!({ "refresh_token": refresh_token.expose() }))
            .send()
            .await?;
        let body: RefreshResponse = Self::parse(Self::check_response(response).await?).await?;

        Self::credential(body.token, body.refresh_token).ok_or_else(|| {
            ApiError::InvalidResponse("refresh response is missing a token".to_string())
        })
    }

    /// `POST /users`: create an account.
    pub async fn create_user(&self, account: &NewAccount) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(USERS_PATH)?)
            .json(account)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// `PUT /users`: update the signed-in user's name and, optionally, password.
    pub async fn update_user(&self, bearer: Option<&Secret>, update: &ProfileUpdate) -> Result<(), ApiError> {
        let request = self.client.put(self.url(USERS_PATH)?).json(update);
        let response = Self::authorize(request, bearer).send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// `PATCH /users/avatar`: upload a new avatar and get the updated profile back.
    ///
    /// Images over [`MAX_AVATAR_BYTES`] are refused before anything is sent.
    pub async fn update_avatar(&self, bearer: Option<&Secret>, avatar: &Avatar) -> Result<UserProfile, ApiError> {
        if avatar.bytes.len() > MAX_AVATAR_BYTES {
            return Err(ApiError::InvalidRequest(format!(
                "avatar is {} bytes; the limit is {} bytes",
                avatar.bytes.len(),
                MAX_AVATAR_BYTES
            )));
        }

        let part = multipart::Part::bytes(avatar.bytes.clone())
            .file_name(avatar.file_name.clone())
            .mime_str(&avatar.mime_type)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid avatar type: {}", e)))?;
        let form = multipart::Form::new().part("avatar", part);

        let request = self.client.patch(self.url(AVATAR_PATH)?).multipart(form);
        let response = Self::authorize(request, bearer).send().await?;
        let user: UserProfile = Self::parse(Self::check_response(response).await?).await?;
        if user.is_empty() {
            return Err(ApiError::InvalidResponse("avatar response has no user id".to_string()));
        }
        Ok(user)
    }

    /// Send a JSON request to any endpoint and decode the JSON reply.
    ///
    /// An empty reply body decodes as JSON `null`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        bearer: Option<&Secret>,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        let mut request = self.client.request(method.clone(), self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!("{} {}", method, path);

        let response = Self::authorize(request, bearer).send().await?;
        Self::parse(Self::check_response(response).await?).await
    }

    fn authorize(request: RequestBuilder, bearer: Option<&Secret>) -> RequestBuilder {
        match bearer {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token.expose())),
            None => request,
        }
    }

    fn credential(token: Option<String>, refresh_token: Option<String>) -> Option<Credential> {
        match (token, refresh_token) {
            (Some(token), Some(refresh)) => Some(Credential::new(token, refresh)).filter(|c| !c.is_empty()),
            _ => None,
        }
    }

    async fn check_response(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("Request failed with status {}", status);
        Err(ApiError::from_status(status, &body))
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(ApiConfig::new(base).unwrap()).unwrap()
    }

    #[test]
    fn test_url_keeps_base_path() {
        let api = client("https://api.example.com/v1");
        assert_eq!(api.url("/sessions").unwrap().as_str(), "https://api.example.com/v1/sessions");
        assert_eq!(api.url("token/refresh").unwrap().as_str(), "https://api.example.com/v1/token/refresh");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(ApiConfig::new("not a url"), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_credential_requires_both_tokens() {
        assert!(ApiClient::credential(Some("t".into()), None).is_none());
        assert!(ApiClient::credential(Some("".into()), Some("r".into())).is_none());
        assert!(ApiClient::credential(Some("t".into()), Some("r".into())).is_some());
    }

    #[tokio::test]
    async fn test_oversized_avatar_is_refused_locally() {
        let api = client("http://127.0.0.1:9");
        let avatar = Avatar::new("big.png", vec![0; MAX_AVATAR_BYTES + 1]);

        let result = api.update_avatar(Some(&Secret::new("t")), &avatar).await;
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
