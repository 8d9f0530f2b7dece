//! In-process backend with the hosted service's contract.
//!
//! Access tokens are JWT-shaped (`header.payload.signature`) so clients can read `exp`
//! the same way they do for real tokens; validity is decided by lookup, not signature.
//! Rows are owned by `user_id` (or `id` when a row has no `user_id`, e.g. profiles) and
//! every query is scoped to the bearer's user.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    AuthApi, AuthError, DataStore, Direction, Filter, FilterOp, Query, QueryError, Session,
    SignedIn, User,
};
use crate::seed::SeedUser;

const MIN_PASSWORD_LEN: usize = 6;

/// How long an exchanged refresh token keeps answering with the session it was exchanged for.
const REFRESH_REUSE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct StoredUser {
    id: Uuid,
    email: String,
    password: String,
}

#[derive(Debug)]
struct RefreshGrant {
    user_id: Uuid,
    /// Unix time of the first exchange and the session it produced.
    rotated: Option<(i64, Session)>,
}

impl RefreshGrant {
    fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            rotated: None,
        }
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    users: DashMap<String, StoredUser>,
    access: DashMap<String, (Uuid, i64)>,
    refresh: DashMap<String, RefreshGrant>,
    tables: DashMap<String, Vec<Value>>,
    access_ttl: Duration,
    refresh_reuse: Duration,
}

impl MemoryBackend {
    pub fn new(access_ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            access: DashMap::new(),
            refresh: DashMap::new(),
            tables: DashMap::new(),
            access_ttl,
            refresh_reuse: REFRESH_REUSE_WINDOW,
        }
    }

    /// Register seed users, skipping any that are rejected (duplicates, weak passwords).
    pub fn with_users(self, users: Vec<SeedUser>) -> Self {
        for user in users {
            if let Err(error) = self.register(&user.email, &user.password) {
                debug!(email = %user.email, error = %error, "skipping seed user");
            }
        }
        self
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::WeakCredentials(String::from(
                "a valid email address is required",
            )));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakCredentials(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let id = Uuid::new_v4();
        match self.users.entry(email.clone()) {
            Entry::Occupied(_) => Err(AuthError::UserExists),
            Entry::Vacant(slot) => {
                slot.insert(StoredUser {
                    id,
                    email: email.clone(),
                    password: password.to_string(),
                });
                Ok(User { id, email })
            }
        }
    }

    fn issue_session(&self, user_id: Uuid) -> Session {
        let session = self.mint_session(user_id);
        self.grant_refresh(&session, user_id);
        session
    }

    /// New token pair with only the access token registered.
    fn mint_session(&self, user_id: Uuid) -> Session {
        let ttl = i64::try_from(self.access_ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now_unix().saturating_add(ttl);
        let access_token = encode_access_token(user_id, expires_at);
        let refresh_token = Uuid::new_v4().simple().to_string();

        self.access.insert(access_token.clone(), (user_id, expires_at));

        Session {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
        }
    }

    /// Must not be called while holding a guard into `refresh`.
    fn grant_refresh(&self, session: &Session, user_id: Uuid) {
        self.prune_expired();
        self.refresh
            .insert(session.refresh_token.clone(), RefreshGrant::new(user_id));
    }

    /// Drops expired access tokens and refresh tokens whose reuse window has closed.
    fn prune_expired(&self) {
        let now = now_unix();
        let reuse = self.reuse_window_secs();
        self.access.retain(|_, (_, expires_at)| *expires_at > now);
        self.refresh.retain(|_, grant| match &grant.rotated {
            Some((rotated_at, _)) => now.saturating_sub(*rotated_at) < reuse,
            None => true,
        });
    }

    fn reuse_window_secs(&self) -> i64 {
        i64::try_from(self.refresh_reuse.as_secs()).unwrap_or(i64::MAX)
    }

    fn user_by_id(&self, id: Uuid) -> Option<User> {
        self.users.iter().find(|entry| entry.id == id).map(|entry| User {
            id: entry.id,
            email: entry.email.clone(),
        })
    }

    fn bearer_user(&self, bearer: Option<&str>) -> Option<Uuid> {
        let token = bearer?;
        let entry = self.access.get(token)?;
        let (user_id, expires_at) = *entry;
        (expires_at > now_unix()).then_some(user_id)
    }

    #[cfg(test)]
    pub fn expire_access_token(&self, token: &str) {
        if let Some(mut entry) = self.access.get_mut(token) {
            entry.1 = 0;
        }
    }

    #[cfg(test)]
    fn with_refresh_reuse(mut self, window: Duration) -> Self {
        self.refresh_reuse = window;
        self
    }

    #[cfg(test)]
    fn token_counts(&self) -> (usize, usize) {
        (self.access.len(), self.refresh.len())
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, AuthError> {
        let email = normalize_email(email);
        let stored = self
            .users
            .get(&email)
            .map(|entry| entry.clone())
            .ok_or(AuthError::InvalidCredentials)?;

        let matches: bool = password.as_bytes().ct_eq(stored.password.as_bytes()).into();
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(SignedIn {
            user: User {
                id: stored.id,
                email: stored.email,
            },
            session: Some(self.issue_session(stored.id)),
        })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let user = self.register(email, password)?;
        let session = self.issue_session(user.id);
        Ok(SignedIn {
            user,
            session: Some(session),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let Some((_, (user_id, _))) = self.access.remove(access_token) else {
            return Ok(());
        };
        self.refresh.retain(|_, grant| grant.user_id != user_id);
        self.access.retain(|_, (owner, _)| *owner != user_id);
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<User, AuthError> {
        let user_id = self
            .bearer_user(Some(access_token))
            .ok_or(AuthError::SessionExpired)?;
        self.user_by_id(user_id).ok_or(AuthError::SessionExpired)
    }

    /// Rotates the pair. Concurrent requests racing on the same refresh token all receive
    /// the first rotation's session while the reuse window is open.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let now = now_unix();
        let (session, user_id) = {
            let mut grant = self
                .refresh
                .get_mut(refresh_token)
                .ok_or(AuthError::SessionExpired)?;
            match &grant.rotated {
                Some((rotated_at, session))
                    if now.saturating_sub(*rotated_at) < self.reuse_window_secs() =>
                {
                    debug!(user_id = %grant.user_id, "refresh token reused within window");
                    return Ok(session.clone());
                }
                Some(_) => return Err(AuthError::SessionExpired),
                None => {}
            }
            let session = self.mint_session(grant.user_id);
            grant.rotated = Some((now, session.clone()));
            (session, grant.user_id)
        };
        self.grant_refresh(&session, user_id);
        Ok(session)
    }
}

#[async_trait]
impl DataStore for MemoryBackend {
    async fn select(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Value>, QueryError> {
        let owner = self
            .bearer_user(bearer)
            .ok_or_else(|| unauthorized(collection))?;

        let mut rows = self
            .tables
            .get(collection)
            .map(|table| {
                table
                    .iter()
                    .filter(|row| owned_by(row, owner) && matches_all(row, &query.filters))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_columns(a, b, &order.column);
                match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        let owner = self
            .bearer_user(bearer)
            .ok_or_else(|| unauthorized(collection))?;
        let record = prepare_record(record, owner, collection)?;

        let mut table = self.tables.entry(collection.to_string()).or_default();
        let id = record.get("id").cloned();
        if table.iter().any(|row| row.get("id") == id.as_ref()) {
            return Err(QueryError::Rejected {
                collection: collection.to_string(),
                status: 409,
                message: String::from("duplicate key value violates unique constraint"),
            });
        }
        table.push(record.clone());
        Ok(record)
    }

    async fn upsert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        let owner = self
            .bearer_user(bearer)
            .ok_or_else(|| unauthorized(collection))?;
        let record = prepare_record(record, owner, collection)?;

        let mut table = self.tables.entry(collection.to_string()).or_default();
        let id = record.get("id").cloned();
        match table.iter().position(|row| row.get("id") == id.as_ref()) {
            Some(index) if !owned_by(&table[index], owner) => {
                return Err(unauthorized(collection));
            }
            Some(index) => table[index] = record.clone(),
            None => table.push(record.clone()),
        }
        Ok(record)
    }

    async fn delete(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<u64, QueryError> {
        let owner = self
            .bearer_user(bearer)
            .ok_or_else(|| unauthorized(collection))?;

        let Some(mut table) = self.tables.get_mut(collection) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|row| !(owned_by(row, owner) && matches_all(row, &query.filters)));
        Ok((before - table.len()) as u64)
    }
}

fn unauthorized(collection: &str) -> QueryError {
    QueryError::Unauthorized {
        collection: collection.to_string(),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn encode_access_token(user_id: Uuid, expires_at: i64) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({ "sub": user_id, "exp": expires_at });
    let payload = BASE64_URL_SAFE_NO_PAD.encode(claims.to_string());
    let signature = Uuid::new_v4().simple().to_string();
    format!("{header}.{payload}.{signature}")
}

/// Assign an `id` when missing and stamp ownership; rows naming another owner are refused.
fn prepare_record(record: Value, owner: Uuid, collection: &str) -> Result<Value, QueryError> {
    let Value::Object(mut fields) = record else {
        return Err(QueryError::Rejected {
            collection: collection.to_string(),
            status: 400,
            message: String::from("record must be a JSON object"),
        });
    };

    let owner_value = Value::String(owner.to_string());
    if let Some(user_id) = fields.get("user_id") {
        if *user_id != owner_value {
            return Err(unauthorized(collection));
        }
    } else if let Some(id) = fields.get("id") {
        // Rows without user_id are keyed by their owner (profiles).
        if *id != owner_value {
            return Err(unauthorized(collection));
        }
    } else {
        fields.insert(String::from("user_id"), owner_value);
    }
    fields
        .entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));

    Ok(Value::Object(fields))
}

fn owned_by(row: &Value, owner: Uuid) -> bool {
    let owner_column = row.get("user_id").or_else(|| row.get("id"));
    owner_column
        .and_then(Value::as_str)
        .is_some_and(|value| value == owner.to_string())
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches_filter(row, filter))
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    let Some(actual) = row.get(&filter.column) else {
        return false;
    };
    let Some(ordering) = compare_values(actual, &filter.value) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => ordering == Ordering::Equal,
        FilterOp::Gte => ordering != Ordering::Less,
        FilterOp::Lte => ordering != Ordering::Greater,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Nulls and missing values sort last.
fn compare_columns(a: &Value, b: &Value, column: &str) -> Ordering {
    match (a.get(column), b.get(column)) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
