//! One place that decides what a protected page shows while the user is loading, absent,
//! or signed in. Pages only supply the signed-in body.

use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{QueryError, User};
use crate::context::{UserContext, UserState};
use crate::routes::RouteTable;
use crate::session::SessionClient;

/// How long a page waits on the user lookup before showing the loading placeholder.
pub const LOADING_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    SignedOut,
    SignedIn(User),
}

impl From<UserState> for ViewState {
    /// A failed lookup is shown as signed out, never as signed in.
    fn from(state: UserState) -> Self {
        match state {
            UserState::Pending => ViewState::Loading,
            UserState::SignedIn(user) => ViewState::SignedIn(user),
            UserState::SignedOut | UserState::Failed(_) => ViewState::SignedOut,
        }
    }
}

impl ViewState {
    pub async fn resolve(context: &UserContext, wait: Duration) -> Self {
        match tokio::time::timeout(wait, context.user()).await {
            Err(_elapsed) => ViewState::Loading,
            Ok(Ok(Some(user))) => ViewState::SignedIn(user),
            Ok(Ok(None)) | Ok(Err(_)) => ViewState::SignedOut,
        }
    }
}

/// Rendered page content, before the shared layout is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub title: String,
    pub body: String,
    /// Seconds after which the browser should reload.
    pub refresh_after: Option<u32>,
    pub user: Option<User>,
}

#[async_trait]
pub trait GuardedPage: Send + Sync {
    fn title(&self) -> &'static str;

    /// Path the sign-in prompt sends the visitor back to.
    fn path(&self) -> &'static str;

    async fn body(&self, user: &User, client: &SessionClient) -> Result<String, QueryError>;
}

pub async fn render_guarded<P>(
    page: &P,
    context: &UserContext,
    client: &SessionClient,
    routes: &RouteTable,
) -> Result<View, QueryError>
where
    P: GuardedPage + ?Sized,
{
    render_with_wait(page, context, client, routes, LOADING_AFTER).await
}

async fn render_with_wait<P>(
    page: &P,
    context: &UserContext,
    client: &SessionClient,
    routes: &RouteTable,
    wait: Duration,
) -> Result<View, QueryError>
where
    P: GuardedPage + ?Sized,
{
    let view = match ViewState::resolve(context, wait).await {
        ViewState::Loading => View {
            title: page.title().to_string(),
            body: String::from(r#"<p class="loading">Loading your data&hellip;</p>"#),
            refresh_after: Some(1),
            user: None,
        },
        ViewState::SignedOut => View {
            title: String::from("Sign in required"),
            body: format!(
                r#"<p>You need to sign in to see {title}.</p><p><a href="{href}">Sign in</a></p>"#,
                title = page.title(),
                href = routes.login_redirect(page.path()),
            ),
            refresh_after: None,
            user: None,
        },
        ViewState::SignedIn(user) => View {
            title: page.title().to_string(),
            body: page.body(&user, client).await?,
            refresh_after: None,
            user: Some(user),
        },
    };
    Ok(view)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum_extra::extract::cookie::CookieJar;
    use uuid::Uuid;

    use super::{render_with_wait, GuardedPage, ViewState};
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{AuthError, Backend, BackendKind, QueryError, User};
    use crate::context::{UserContext, UserState};
    use crate::routes::RouteTable;
    use crate::session::{ClientFactory, CookiePolicy, SessionClient};

    #[derive(Default)]
    struct Journal {
        renders: AtomicUsize,
    }

    #[async_trait]
    impl GuardedPage for Journal {
        fn title(&self) -> &'static str {
            "Journal"
        }

        fn path(&self) -> &'static str {
            "/journal"
        }

        async fn body(&self, user: &User, _client: &SessionClient) -> Result<String, QueryError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(format!("<p>entries for {}</p>", user.email))
        }
    }

    fn client() -> SessionClient {
        let backend = Backend::new(
            BackendKind::Memory,
            Arc::new(MemoryBackend::new(Duration::from_secs(60))),
        );
        ClientFactory::new(backend, CookiePolicy::default()).server(&CookieJar::new())
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: String::from("gail@example.com"),
        }
    }

    #[tokio::test]
    async fn signed_in_renders_the_page_body() {
        let page = Journal::default();
        let context = UserContext::resolved(Ok(Some(user())));
        let view = render_with_wait(
            &page,
            &context,
            &client(),
            &RouteTable::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(view.title, "Journal");
        assert!(view.body.contains("gail@example.com"));
        assert_eq!(view.refresh_after, None);
        assert_eq!(page.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signed_out_links_to_login_with_return_path() {
        let page = Journal::default();
        let context = UserContext::resolved(Ok(None));
        let view = render_with_wait(
            &page,
            &context,
            &client(),
            &RouteTable::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(view
            .body
            .contains(r#"href="/auth/login?redirectedFrom=%2Fjournal""#));
        assert_eq!(page.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_lookup_is_never_signed_in() {
        let page = Journal::default();
        let context = UserContext::resolved(Err(Arc::new(AuthError::Unexpected(String::from(
            "boom",
        )))));
        let view = render_with_wait(
            &page,
            &context,
            &client(),
            &RouteTable::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(view.user, None);
        assert_eq!(page.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_lookup_shows_self_refreshing_placeholder() {
        let page = Journal::default();
        let view = render_with_wait(
            &page,
            &UserContext::pending(),
            &client(),
            &RouteTable::default(),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(view.refresh_after, Some(1));
        assert!(view.body.contains("Loading"));
    }

    #[test]
    fn user_state_maps_onto_view_state() {
        assert_eq!(ViewState::from(UserState::Pending), ViewState::Loading);
        assert_eq!(ViewState::from(UserState::SignedOut), ViewState::SignedOut);
        assert_eq!(
            ViewState::from(UserState::Failed(Arc::new(AuthError::SessionExpired))),
            ViewState::SignedOut
        );
    }
}
