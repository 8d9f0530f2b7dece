//! Per-request user resolution, started once and shared by every consumer.
//!
//! The gate starts the lookup as soon as a request arrives. Handlers, guards and the gate
//! itself hold clones of the same [`UserContext`]; awaiting any clone drives the single
//! underlying fetch, and all of them observe the same outcome.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::backend::{AuthError, User};
use crate::session::SessionClient;

pub type Resolution = Result<Option<User>, Arc<AuthError>>;

/// Non-blocking view of a [`UserContext`].
#[derive(Debug, Clone)]
pub enum UserState {
    Pending,
    SignedIn(User),
    SignedOut,
    Failed(Arc<AuthError>),
}

#[derive(Clone)]
pub struct UserContext {
    resolution: Shared<BoxFuture<'static, Resolution>>,
}

impl UserContext {
    /// Spawn the lookup now; the returned context can be awaited later or not at all.
    pub fn start(client: Arc<SessionClient>) -> Self {
        let task = tokio::spawn(async move { client.get_user().await.map_err(Arc::new) });
        Self::from_future(async move {
            match task.await {
                Ok(resolution) => resolution,
                Err(join_err) => Err(Arc::new(AuthError::Unexpected(join_err.to_string()))),
            }
        })
    }

    /// Already-settled context.
    pub fn resolved(resolution: Resolution) -> Self {
        Self::from_future(async move { resolution })
    }

    /// Never settles.
    #[cfg(test)]
    pub fn pending() -> Self {
        Self::from_future(futures_util::future::pending())
    }

    fn from_future<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Resolution> + Send + 'static,
    {
        Self {
            resolution: future.boxed().shared(),
        }
    }

    pub async fn user(&self) -> Resolution {
        self.resolution.clone().await
    }

    /// Only reports a result once some clone has been awaited to completion.
    pub fn state(&self) -> UserState {
        match self.resolution.peek() {
            None => UserState::Pending,
            Some(Ok(Some(user))) => UserState::SignedIn(user.clone()),
            Some(Ok(None)) => UserState::SignedOut,
            Some(Err(err)) => UserState::Failed(Arc::clone(err)),
        }
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("state", &self.state())
            .finish()
    }
}
