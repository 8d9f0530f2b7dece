use std::fmt;
use std::sync::Arc;

use cookie::Cookie;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::cookies::{removal_cookies, session_cookies, token_expiry, CookiePolicy};
use crate::backend::{AuthApi, AuthError, DataStore, Query, QueryError, Session, User};

/// Refresh this many seconds before the access token's `exp`.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Outcome of [`SessionClient::sign_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUp {
    SignedIn(User),
    ConfirmationRequired(User),
}

enum Persistence {
    /// Long-lived client: the session only lives in memory.
    #[cfg_attr(not(test), allow(dead_code))]
    Memory,
    /// Per-request client: every session change is queued as `Set-Cookie` writes.
    Cookies {
        policy: CookiePolicy,
        pending: Mutex<Vec<Cookie<'static>>>,
    },
}

/// Auth + record access on behalf of one session.
///
/// Built by [`super::ClientFactory`]; record queries carry the session's access token so
/// the backend can scope rows to the signed-in user.
pub struct SessionClient {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn DataStore>,
    session: RwLock<Option<Session>>,
    persistence: Persistence,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = match self.persistence {
            Persistence::Memory => "browser",
            Persistence::Cookies { .. } => "server",
        };
        f.debug_struct("SessionClient")
            .field("context", &context)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Backs [`super::ClientFactory::browser`].
    #[cfg_attr(not(test), allow(dead_code))]
    pub(super) fn in_memory(auth: Arc<dyn AuthApi>, store: Arc<dyn DataStore>) -> Self {
        Self {
            auth,
            store,
            session: RwLock::new(None),
            persistence: Persistence::Memory,
        }
    }

    pub(super) fn with_cookies(
        auth: Arc<dyn AuthApi>,
        store: Arc<dyn DataStore>,
        session: Option<Session>,
        policy: CookiePolicy,
    ) -> Self {
        Self {
            auth,
            store,
            session: RwLock::new(session),
            persistence: Persistence::Cookies {
                policy,
                pending: Mutex::new(Vec::new()),
            },
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let signed = self.auth.sign_in_with_password(email, password).await?;
        match signed.session {
            Some(session) => self.set_session(session).await,
            None => self.clear_session().await,
        }
        info!(user_id = %signed.user.id, "signed in");
        Ok(signed.user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, AuthError> {
        let signed = self.auth.sign_up(email, password).await?;
        info!(user_id = %signed.user.id, "signed up");
        match signed.session {
            Some(session) => {
                self.set_session(session).await;
                Ok(SignUp::SignedIn(signed.user))
            }
            None => Ok(SignUp::ConfirmationRequired(signed.user)),
        }
    }

    /// Forget the local session first, then revoke it remotely. The local session is gone
    /// even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.session.write().await.take();
        self.persist(None).await;

        match previous {
            Some(session) if !session.access_token.is_empty() => {
                self.auth.sign_out(&session.access_token).await
            }
            _ => Ok(()),
        }
    }

    /// The signed-in user, refreshing the access token once if it is stale or rejected.
    ///
    /// Missing or unrecoverable sessions are `Ok(None)`; only backend outages are errors.
    pub async fn get_user(&self) -> Result<Option<User>, AuthError> {
        let Some(session) = self.session.read().await.clone() else {
            return Ok(None);
        };

        if !needs_refresh(&session) {
            match self.auth.get_user(&session.access_token).await {
                Ok(user) => return Ok(Some(user)),
                Err(AuthError::SessionExpired) => debug!("access token rejected; refreshing"),
                Err(error) => return Err(error),
            }
        }

        if session.refresh_token.is_empty() {
            self.clear_session().await;
            return Ok(None);
        }

        let refreshed = match self.auth.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(error) if error.is_expected() => {
                debug!(error = %error, "refresh rejected; clearing session");
                self.clear_session().await;
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        let access_token = refreshed.access_token.clone();
        self.set_session(refreshed).await;

        match self.auth.get_user(&access_token).await {
            Ok(user) => Ok(Some(user)),
            Err(AuthError::SessionExpired) => {
                self.clear_session().await;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, QueryError> {
        let bearer = self.access_token().await;
        self.store.select(bearer.as_deref(), collection, query).await
    }

    pub async fn select_as<T>(&self, collection: &str, query: &Query) -> Result<Vec<T>, QueryError>
    where
        T: DeserializeOwned,
    {
        self.select(collection, query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(QueryError::from))
            .collect()
    }

    pub async fn insert<T>(&self, collection: &str, record: &T) -> Result<Value, QueryError>
    where
        T: Serialize + Sync,
    {
        let record = serde_json::to_value(record)?;
        let bearer = self.access_token().await;
        self.store.insert(bearer.as_deref(), collection, record).await
    }

    pub async fn upsert<T>(&self, collection: &str, record: &T) -> Result<Value, QueryError>
    where
        T: Serialize + Sync,
    {
        let record = serde_json::to_value(record)?;
        let bearer = self.access_token().await;
        self.store.upsert(bearer.as_deref(), collection, record).await
    }

    pub async fn delete(&self, collection: &str, query: &Query) -> Result<u64, QueryError> {
        let bearer = self.access_token().await;
        self.store.delete(bearer.as_deref(), collection, query).await
    }

    /// Drain queued cookie writes. Always empty for in-memory clients.
    pub async fn take_cookies(&self) -> Vec<Cookie<'static>> {
        match &self.persistence {
            Persistence::Memory => Vec::new(),
            Persistence::Cookies { pending, .. } => std::mem::take(&mut *pending.lock().await),
        }
    }

    #[cfg(test)]
    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone())
            .filter(|token| !token.is_empty())
    }

    async fn set_session(&self, session: Session) {
        self.persist(Some(&session)).await;
        *self.session.write().await = Some(session);
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
        self.persist(None).await;
    }

    async fn persist(&self, session: Option<&Session>) {
        let Persistence::Cookies { policy, pending } = &self.persistence else {
            return;
        };
        let cookies = match session {
            Some(session) => session_cookies(session, *policy),
            None => removal_cookies(*policy),
        };

        let mut pending = pending.lock().await;
        for cookie in cookies {
            pending.retain(|queued| queued.name() != cookie.name());
            pending.push(cookie);
        }
    }
}

fn needs_refresh(session: &Session) -> bool {
    if session.access_token.is_empty() {
        return true;
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    token_expiry(&session.access_token)
        .or(session.expires_at)
        .is_some_and(|expires_at| expires_at.saturating_sub(now) <= EXPIRY_MARGIN_SECS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum_extra::extract::cookie::CookieJar;
    use serde_json::json;

    use super::SignUp;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{AuthError, Backend, BackendKind, Query};
    use crate::session::cookies::{ACCESS_COOKIE, REFRESH_COOKIE};
    use crate::session::{ClientFactory, CookiePolicy};

    fn factory() -> (Arc<MemoryBackend>, ClientFactory) {
        let memory = Arc::new(MemoryBackend::new(Duration::from_secs(3600)));
        let backend = Backend::new(BackendKind::Memory, Arc::clone(&memory));
        (memory, ClientFactory::new(backend, CookiePolicy::default()))
    }

    #[tokio::test]
    async fn sign_in_then_get_user_then_sign_out() {
        let (_, factory) = factory();
        let client = factory.browser();

        let created = client.sign_up("max@example.com", "password1").await.unwrap();
        let SignUp::SignedIn(created) = created else {
            panic!("memory backend confirms immediately");
        };
        client.sign_out().await.unwrap();
        assert_eq!(client.get_user().await.unwrap(), None);

        let user = client.sign_in("max@example.com", "password1").await.unwrap();
        assert_eq!(user.id, created.id);
        assert_eq!(client.get_user().await.unwrap().map(|u| u.id), Some(created.id));
        assert_eq!(client.get_user().await.unwrap().map(|u| u.id), Some(created.id));

        client.sign_out().await.unwrap();
        assert_eq!(client.get_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn bad_credentials_surface_as_error_without_touching_session() {
        let (_, factory) = factory();
        let client = factory.browser();
        client.sign_up("ned@example.com", "password1").await.unwrap();

        let result = client.sign_in("ned@example.com", "wrong-pass").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert!(client.get_user().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn server_client_queues_cookies_for_session_changes() {
        let (_, factory) = factory();
        let client = factory.server(&CookieJar::new());

        client.sign_up("ola@example.com", "password1").await.unwrap();
        let cookies = client.take_cookies().await;
        let names = cookies.iter().map(|c| c.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec![ACCESS_COOKIE, REFRESH_COOKIE]);
        assert!(cookies.iter().all(|c| !c.value().is_empty()));

        client.sign_out().await.unwrap();
        let cookies = client.take_cookies().await;
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.value().is_empty()));
        assert!(client.take_cookies().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_access_token_is_refreshed_once() {
        let (memory, factory) = factory();
        let browser = factory.browser();
        browser.sign_up("pia@example.com", "password1").await.unwrap();

        let cookies = factory.server(&CookieJar::new());
        cookies.sign_in("pia@example.com", "password1").await.unwrap();
        let jar = cookies
            .take_cookies()
            .await
            .into_iter()
            .fold(CookieJar::new(), |jar, cookie| jar.add(cookie));
        let access = jar.get(ACCESS_COOKIE).unwrap().value().to_string();
        memory.expire_access_token(&access);

        let client = factory.server(&jar);
        let user = client.get_user().await.unwrap();
        assert!(user.is_some());

        let refreshed = client.take_cookies().await;
        let new_access = refreshed
            .iter()
            .find(|c| c.name() == ACCESS_COOKIE)
            .map(|c| c.value().to_string())
            .unwrap();
        assert_ne!(new_access, access);
    }

    #[tokio::test]
    async fn unrecoverable_session_clears_cookies_and_yields_no_user() {
        let (_, factory) = factory();
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            axum::http::HeaderValue::from_static("nt-access-token=bogus; nt-refresh-token=bogus"),
        );
        let client = factory.server(&CookieJar::from_headers(&headers));

        assert_eq!(client.get_user().await.unwrap(), None);
        assert!(!client.has_session().await);
        let cookies = client.take_cookies().await;
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.value().is_empty()));
    }

    #[tokio::test]
    async fn queries_carry_the_session_token() {
        let (_, factory) = factory();
        let client = factory.browser();
        client.sign_up("quin@example.com", "password1").await.unwrap();

        client
            .insert("food_logs", &json!({ "name": "apple", "calories": 95 }))
            .await
            .unwrap();
        let rows = client.select("food_logs", &Query::new()).await.unwrap();
        assert_eq!(rows.len(), 1);

        client.sign_out().await.unwrap();
        assert!(client.select("food_logs", &Query::new()).await.is_err());
    }
}
