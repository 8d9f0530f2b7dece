//! Hosted backend over HTTP: a GoTrue-style auth API under `/auth/v1` and a
//! PostgREST-style row API under `/rest/v1`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{AuthApi, AuthError, DataStore, Direction, Query, QueryError, Session, SignedIn, User};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend API key is not a valid header value")]
    InvalidApiKey,
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token grant payload. Sign-up returns either this or a bare user when the account
/// still needs email confirmation.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    error_code: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> String {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
            .unwrap_or("unknown error")
            .to_string()
    }
}

impl HttpBackend {
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&api_key).map_err(|_| ClientError::InvalidApiKey)?;
        headers.insert("apikey", key);
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("nutritrack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url
    }

    fn authorized(&self, request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.api_key);
        request.header(AUTHORIZATION, format!("Bearer {token}"))
    }

    fn table_url(&self, collection: &str, query: &Query) -> Url {
        let mut url = self.endpoint(&format!("rest/v1/{collection}"));
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for filter in &query.filters {
                pairs.append_pair(
                    &filter.column,
                    &format!("{}.{}", filter.op.as_str(), filter_value(&filter.value)),
                );
            }
            if let Some(order) = &query.order {
                let direction = match order.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                pairs.append_pair("order", &format!("{}.{direction}", order.column));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        url
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<TokenResponse, AuthError> {
        let mut url = self.endpoint("auth/v1/token");
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let response = self
            .authorized(self.client.post(url), None)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(auth_error(response).await);
        }
        Ok(response.json::<TokenResponse>().await?)
    }

    async fn write_rows(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
        prefer: &'static str,
    ) -> Result<Value, QueryError> {
        let url = self.table_url(collection, &Query::new());
        let response = self
            .authorized(self.client.post(url), bearer)
            .header("Prefer", prefer)
            .json(&record)
            .send()
            .await?;
        let rows = rows_or_error(response, collection).await?;
        Ok(rows.into_iter().next().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, AuthError> {
        let token = self
            .token_grant("password", &Credentials { email, password })
            .await?;
        signed_in_from_token(token)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let response = self
            .authorized(self.client.post(self.endpoint("auth/v1/signup")), None)
            .json(&Credentials { email, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(auth_error(response).await);
        }

        let body = response.json::<Value>().await?;
        if body.get("access_token").is_some() {
            let token = serde_json::from_value::<TokenResponse>(body)
                .map_err(|err| AuthError::Unexpected(err.to_string()))?;
            return signed_in_from_token(token);
        }

        debug!(email, "sign-up pending email confirmation");
        let user = serde_json::from_value::<User>(body)
            .map_err(|err| AuthError::Unexpected(err.to_string()))?;
        Ok(SignedIn {
            user,
            session: None,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .authorized(
                self.client.post(self.endpoint("auth/v1/logout")),
                Some(access_token),
            )
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(auth_error(response).await),
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        let response = self
            .authorized(
                self.client.get(self.endpoint("auth/v1/user")),
                Some(access_token),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(auth_error(response).await);
        }
        Ok(response.json::<User>().await?)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let token = self
            .token_grant("refresh_token", &RefreshRequest { refresh_token })
            .await?;
        Ok(session_from_token(&token))
    }
}

#[async_trait]
impl DataStore for HttpBackend {
    async fn select(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Value>, QueryError> {
        let url = self.table_url(collection, query);
        let response = self
            .authorized(self.client.get(url), bearer)
            .send()
            .await?;
        rows_or_error(response, collection).await
    }

    async fn insert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        self.write_rows(bearer, collection, record, "return=representation")
            .await
    }

    async fn upsert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        self.write_rows(
            bearer,
            collection,
            record,
            "resolution=merge-duplicates,return=representation",
        )
        .await
    }

    async fn delete(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<u64, QueryError> {
        let url = self.table_url(collection, query);
        let response = self
            .authorized(self.client.delete(url), bearer)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows = rows_or_error(response, collection).await?;
        Ok(rows.len() as u64)
    }
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn session_from_token(token: &TokenResponse) -> Session {
    let expires_at = token.expires_at.or_else(|| {
        token
            .expires_in
            .map(|seconds| time::OffsetDateTime::now_utc().unix_timestamp() + seconds)
    });
    Session {
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        expires_at,
    }
}

fn signed_in_from_token(token: TokenResponse) -> Result<SignedIn, AuthError> {
    let session = session_from_token(&token);
    let user = token
        .user
        .ok_or_else(|| AuthError::Unexpected(String::from("token response without user")))?;
    Ok(SignedIn {
        user,
        session: Some(session),
    })
}

async fn auth_error(response: Response) -> AuthError {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    let code = body
        .error_code
        .as_deref()
        .or(body.error.as_deref())
        .unwrap_or_default();

    match (status, code) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => AuthError::SessionExpired,
        (_, "invalid_grant" | "invalid_credentials") => AuthError::InvalidCredentials,
        (_, "refresh_token_not_found" | "refresh_token_already_used" | "session_not_found") => {
            AuthError::SessionExpired
        }
        (_, "user_already_exists" | "email_exists") => AuthError::UserExists,
        (_, "weak_password" | "validation_failed") => AuthError::WeakCredentials(body.text()),
        _ => AuthError::Rejected {
            status: status.as_u16(),
            message: body.text(),
        },
    }
}

async fn rows_or_error(response: Response, collection: &str) -> Result<Vec<Value>, QueryError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(QueryError::Unauthorized {
            collection: collection.to_string(),
        });
    }
    if !status.is_success() {
        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        return Err(QueryError::Rejected {
            collection: collection.to_string(),
            status: status.as_u16(),
            message: body.text(),
        });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }

    match response.json::<Value>().await? {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        row => Ok(vec![row]),
    }
}
