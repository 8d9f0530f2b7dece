//! External auth + row-store collaborator.
//!
//! The tracker never owns identities or records. Everything goes through two traits:
//!
//! - [`AuthApi`]: password sign-in/sign-up, sign-out, token → user, token refresh
//! - [`DataStore`]: select/insert/upsert/delete against a named collection, scoped by the
//!   caller's bearer token (row-level ownership is enforced by the backend)
//!
//! [`http::HttpBackend`] talks to the hosted service, [`memory::MemoryBackend`] keeps the
//! same contract in process for development and tests.

pub mod http;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

/// Token pair issued by the backend. `expires_at` is unix seconds when known.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a successful sign-in or sign-up.
///
/// `session` is `None` when the backend requires email confirmation before issuing tokens.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub session: Option<Session>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    UserExists,
    #[error("{0}")]
    WeakCredentials(String),
    #[error("session is missing or expired")]
    SessionExpired,
    #[error("auth backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("auth backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected auth failure: {0}")]
    Unexpected(String),
}

impl AuthError {
    /// Failures a user can cause and fix; everything else is an outage.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::UserExists
                | AuthError::WeakCredentials(_)
                | AuthError::SessionExpired
        )
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("not authorized for {collection}")]
    Unauthorized { collection: String },
    #[error("backend rejected query on {collection} ({status}): {message}")]
    Rejected {
        collection: String,
        status: u16,
        message: String,
    },
    #[error("backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Row filter shared by select and delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<SignedIn, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignedIn, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// Resolve the user behind an access token. Invalid or expired tokens yield
    /// [`AuthError::SessionExpired`].
    async fn get_user(&self, access_token: &str) -> Result<User, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Value>, QueryError>;

    async fn insert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError>;

    /// Insert or replace the row with the same `id`.
    async fn upsert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError>;

    /// Returns the number of deleted rows.
    async fn delete(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<u64, QueryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Memory,
}

/// Both halves of one backend, shared by every client the factory builds.
#[derive(Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub auth: Arc<dyn AuthApi>,
    pub store: Arc<dyn DataStore>,
}

impl Backend {
    pub fn new<B>(kind: BackendKind, backend: Arc<B>) -> Self
    where
        B: AuthApi + DataStore + 'static,
    {
        Self {
            kind,
            auth: Arc::clone(&backend) as Arc<dyn AuthApi>,
            store: backend as Arc<dyn DataStore>,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind).finish()
    }
}
