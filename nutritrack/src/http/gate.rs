//! Session gate run in front of every route.
//!
//! Each request gets its own cookie-backed [`SessionClient`] and a [`UserContext`] whose
//! lookup starts immediately. Protected paths wait for it and redirect to the login page
//! when nobody is signed in. Public paths run straight away. Either way the lookup is
//! settled before the response leaves, and any session cookies it produced are attached.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::backend::User;
use crate::context::UserContext;
use crate::session::SessionClient;

/// Per-request session handles, inserted by [`session_gate`].
#[derive(Debug, Clone)]
pub struct RequestSession {
    pub client: Arc<SessionClient>,
    pub user: UserContext,
}

impl RequestSession {
    /// The signed-in user, for handlers that must not run anonymously.
    pub async fn require_user(&self) -> Result<User, ApiError> {
        match self.user.user().await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ApiError::Unauthorized),
            Err(error) => Err(ApiError::from(error.as_ref())),
        }
    }
}

impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestSession>()
            .cloned()
            .ok_or_else(|| {
                warn!(path = %parts.uri.path(), "handler reached without the session gate");
                ApiError::Internal
            })
    }
}

pub async fn session_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let client = Arc::new(state.clients.server(&jar));
    let user = UserContext::start(Arc::clone(&client));

    if !state.routes.is_public(&path) {
        let signed_in = match user.user().await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(error) => {
                warn!(path = %path, error = %error, "session lookup failed; treating as signed out");
                false
            }
        };
        if !signed_in {
            debug!(path = %path, "no session; redirecting to login");
            let location = state.routes.login_redirect(&path);
            let redirect = (StatusCode::FOUND, [(LOCATION, location)]).into_response();
            return attach_cookies(redirect, &client).await;
        }
    }

    request.extensions_mut().insert(RequestSession {
        client: Arc::clone(&client),
        user: user.clone(),
    });
    let response = next.run(request).await;

    if let Err(error) = user.user().await {
        warn!(path = %path, error = %error, "session lookup failed");
    }
    attach_cookies(response, &client).await
}

async fn attach_cookies(mut response: Response, client: &SessionClient) -> Response {
    for cookie in client.take_cookies().await {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(error) => warn!(cookie = cookie.name(), error = %error, "dropping unencodable cookie"),
        }
    }
    response
}
