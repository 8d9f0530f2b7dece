use std::sync::{Arc, OnceLock};

use axum_extra::extract::cookie::CookieJar;

use super::client::SessionClient;
use super::cookies::{session_from_jar, CookiePolicy};
use super::logging::with_logging;
use crate::backend::{AuthApi, Backend, BackendKind, DataStore};

/// Builds [`SessionClient`]s over one backend.
///
/// `browser()` hands out a single shared client (its session lives in memory for the
/// lifetime of the factory); `server()` builds a fresh cookie-backed client per request so
/// no session state crosses requests.
pub struct ClientFactory {
    kind: BackendKind,
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn DataStore>,
    policy: CookiePolicy,
    #[cfg_attr(not(test), allow(dead_code))]
    browser: OnceLock<Arc<SessionClient>>,
}

impl ClientFactory {
    pub fn new(backend: Backend, policy: CookiePolicy) -> Self {
        Self {
            kind: backend.kind,
            auth: backend.auth,
            store: with_logging(backend.store),
            policy,
            browser: OnceLock::new(),
        }
    }

    /// Long-lived client for callers without a cookie jar; the HTTP surface only uses `server`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn browser(&self) -> Arc<SessionClient> {
        let client = self.browser.get_or_init(|| {
            Arc::new(SessionClient::in_memory(
                Arc::clone(&self.auth),
                Arc::clone(&self.store),
            ))
        });
        Arc::clone(client)
    }

    pub fn server(&self, jar: &CookieJar) -> SessionClient {
        SessionClient::with_cookies(
            Arc::clone(&self.auth),
            Arc::clone(&self.store),
            session_from_jar(jar),
            self.policy,
        )
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
