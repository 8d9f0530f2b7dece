use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::AuthError;
use crate::guard::View;
use crate::routes::{HOME_PATH, LOGIN_PATH, REDIRECT_PARAM, SIGN_UP_PATH};
use crate::session::SignUp;

use super::gate::RequestSession;
use super::pages::{escape_html, layout};
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "redirectedFrom")]
    pub redirected_from: Option<String>,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(rename = "redirectedFrom", default)]
    pub redirected_from: Option<String>,
}

pub async fn login_form(Query(query): Query<LoginQuery>) -> Html<String> {
    login_page(query.redirected_from.as_deref(), "", None)
}

pub async fn login(
    State(state): State<AppState>,
    session: RequestSession,
    Form(credentials): Form<Credentials>,
) -> Response {
    // A lookup for the previous session must not land after the new one is stored.
    let _ = session.user.user().await;

    let email = credentials.email.trim();
    match session.client.sign_in(email, &credentials.password).await {
        Ok(user) => {
            let target = state
                .routes
                .post_login_target(credentials.redirected_from.as_deref());
            debug!(user_id = %user.id, target = %target, "sign-in succeeded");
            Redirect::to(&target).into_response()
        }
        Err(error) => {
            let (status, message) = auth_failure(&error);
            (
                status,
                login_page(credentials.redirected_from.as_deref(), email, Some(message)),
            )
                .into_response()
        }
    }
}

pub async fn sign_up_form() -> Html<String> {
    sign_up_page("", None)
}

pub async fn sign_up(session: RequestSession, Form(credentials): Form<Credentials>) -> Response {
    let _ = session.user.user().await;

    let email = credentials.email.trim();
    match session.client.sign_up(email, &credentials.password).await {
        Ok(SignUp::SignedIn(_)) => Redirect::to(HOME_PATH).into_response(),
        Ok(SignUp::ConfirmationRequired(_)) => layout(&View {
            title: String::from("Check your email"),
            body: format!(
                r#"<p>We sent a confirmation link to {}. Follow it, then <a href="{LOGIN_PATH}">sign in</a>.</p>"#,
                escape_html(email)
            ),
            refresh_after: None,
            user: None,
        })
        .into_response(),
        Err(error) => {
            let (status, message) = auth_failure(&error);
            (status, sign_up_page(email, Some(message))).into_response()
        }
    }
}

pub async fn logout(session: RequestSession) -> Response {
    let _ = session.user.user().await;

    if let Err(error) = session.client.sign_out().await {
        warn!(error = %error, "remote sign-out failed; local session cleared");
    }
    Redirect::to(LOGIN_PATH).into_response()
}

fn auth_failure(error: &AuthError) -> (StatusCode, String) {
    match error {
        AuthError::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            String::from("Invalid email or password."),
        ),
        AuthError::UserExists => (
            StatusCode::CONFLICT,
            String::from("An account with that email already exists."),
        ),
        AuthError::WeakCredentials(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
        AuthError::SessionExpired => (
            StatusCode::UNAUTHORIZED,
            String::from("Your session expired. Please sign in again."),
        ),
        AuthError::Rejected { .. } | AuthError::Transport(_) | AuthError::Unexpected(_) => {
            warn!(error = %error, "auth backend call failed");
            (
                StatusCode::BAD_GATEWAY,
                String::from("Sign-in is unavailable right now. Try again shortly."),
            )
        }
    }
}

fn login_page(redirected_from: Option<&str>, email: &str, error: Option<String>) -> Html<String> {
    let hidden = redirected_from
        .map(|target| {
            format!(
                r#"<input type="hidden" name="{REDIRECT_PARAM}" value="{}">"#,
                escape_html(target)
            )
        })
        .unwrap_or_default();
    layout(&View {
        title: String::from("Sign in"),
        body: format!(
            r#"{error}<form method="post" action="{LOGIN_PATH}">
{hidden}<label>Email <input name="email" type="email" value="{email}" required></label>
<label>Password <input name="password" type="password" required></label>
<button>Sign in</button>
</form>
<p>No account? <a href="{SIGN_UP_PATH}">Sign up</a></p>"#,
            error = error_banner(error),
            email = escape_html(email),
        ),
        refresh_after: None,
        user: None,
    })
}

fn sign_up_page(email: &str, error: Option<String>) -> Html<String> {
    layout(&View {
        title: String::from("Create an account"),
        body: format!(
            r#"{error}<form method="post" action="{SIGN_UP_PATH}">
<label>Email <input name="email" type="email" value="{email}" required></label>
<label>Password <input name="password" type="password" minlength="6" required></label>
<button>Sign up</button>
</form>
<p>Already registered? <a href="{LOGIN_PATH}">Sign in</a></p>"#,
            error = error_banner(error),
            email = escape_html(email),
        ),
        refresh_after: None,
        user: None,
    })
}

fn error_banner(error: Option<String>) -> String {
    error
        .map(|message| format!(r#"<p class="error" role="alert">{}</p>"#, escape_html(&message)))
        .unwrap_or_default()
}
