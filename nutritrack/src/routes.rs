//! Which paths need a session, and where to send visitors who lack one.
//!
//! This table is the only place public paths are listed. The gate, the page guards and
//! the auth handlers all read the login path from here.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const LOGIN_PATH: &str = "/auth/login";
pub const SIGN_UP_PATH: &str = "/auth/sign-up";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const HOME_PATH: &str = "/dashboard";
pub const REDIRECT_PARAM: &str = "redirectedFrom";

/// Everything but the unreserved characters `A-Z a-z 0-9 - . _ ~`.
const QUERY_VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicRoute {
    Exact(String),
    Prefix(String),
}

impl PublicRoute {
    fn matches(&self, path: &str) -> bool {
        match self {
            PublicRoute::Exact(exact) => path == exact,
            PublicRoute::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    public: Vec<PublicRoute>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            public: vec![
                PublicRoute::Exact(String::from("/")),
                PublicRoute::Prefix(String::from("/auth/")),
                PublicRoute::Prefix(String::from("/about")),
                PublicRoute::Prefix(String::from("/health")),
            ],
        }
    }
}

impl RouteTable {
    /// Default table plus extra public prefixes from configuration.
    pub fn with_extra_prefixes(extra: &[String]) -> Self {
        let mut table = Self::default();
        table.public.extend(
            extra
                .iter()
                .map(|prefix| PublicRoute::Prefix(prefix.clone())),
        );
        table
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public.iter().any(|route| route.matches(path))
    }

    /// `/auth/login?redirectedFrom=<path>`, used by the gate and by signed-out views.
    pub fn login_redirect(&self, original_path: &str) -> String {
        format!(
            "{LOGIN_PATH}?{REDIRECT_PARAM}={}",
            utf8_percent_encode(original_path, QUERY_VALUE_ENCODE_SET)
        )
    }

    /// Where to go after signing in. Only same-origin absolute paths are honoured.
    pub fn post_login_target(&self, redirected_from: Option<&str>) -> String {
        match redirected_from {
            Some(target) if is_local_path(target) && !target.starts_with("/auth/") => {
                target.to_string()
            }
            _ => String::from(HOME_PATH),
        }
    }
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::RouteTable;

    #[test]
    fn auth_about_health_and_root_are_public() {
        let routes = RouteTable::default();
        for path in ["/", "/auth/login", "/auth/sign-up", "/about", "/about-page", "/health"] {
            assert!(routes.is_public(path), "{path} should be public");
        }
    }

    #[test]
    fn everything_else_is_protected() {
        let routes = RouteTable::default();
        for path in ["/dashboard", "/protected/dashboard", "/api/me", "/auth", "/settings/x"] {
            assert!(!routes.is_public(path), "{path} should be protected");
        }
    }

    #[test]
    fn root_is_matched_exactly() {
        let routes = RouteTable::default();
        assert!(routes.is_public("/"));
        assert!(!routes.is_public("/food-log"));
    }

    #[test]
    fn extra_prefixes_extend_the_public_set() {
        let routes = RouteTable::with_extra_prefixes(&[String::from("/docs")]);
        assert!(routes.is_public("/docs/getting-started"));
        assert!(!routes.is_public("/dashboard"));
    }

    #[test]
    fn login_redirect_encodes_original_path() {
        let routes = RouteTable::default();
        assert_eq!(
            routes.login_redirect("/protected/dashboard"),
            "/auth/login?redirectedFrom=%2Fprotected%2Fdashboard"
        );
        assert_eq!(
            routes.login_redirect("/food log"),
            "/auth/login?redirectedFrom=%2Ffood%20log"
        );
    }

    #[test]
    fn post_login_target_rejects_foreign_and_auth_targets() {
        let routes = RouteTable::default();
        assert_eq!(routes.post_login_target(Some("/weigh-in")), "/weigh-in");
        assert_eq!(routes.post_login_target(Some("//evil.example")), "/dashboard");
        assert_eq!(
            routes.post_login_target(Some("https://evil.example")),
            "/dashboard"
        );
        assert_eq!(routes.post_login_target(Some("/\\evil.example")), "/dashboard");
        assert_eq!(routes.post_login_target(Some("/auth/login")), "/dashboard");
        assert_eq!(routes.post_login_target(None), "/dashboard");
    }
}
