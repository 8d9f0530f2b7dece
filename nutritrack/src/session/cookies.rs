use axum_extra::extract::cookie::CookieJar;
use base64::prelude::*;
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::backend::Session;

pub const ACCESS_COOKIE: &str = "nt-access-token";
pub const REFRESH_COOKIE: &str = "nt-refresh-token";

const DEFAULT_ACCESS_MAX_AGE: Duration = Duration::hours(1);
const REFRESH_MAX_AGE: Duration = Duration::days(30);

#[derive(Debug, Clone, Copy, Default)]
pub struct CookiePolicy {
    pub secure: bool,
}

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Read the token pair from request cookies. A refresh token alone is enough to resume a
/// session; the access token is then empty and gets refreshed on first use.
pub fn session_from_jar(jar: &CookieJar) -> Option<Session> {
    let refresh_token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());
    let access_token = jar
        .get(ACCESS_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    if access_token.is_none() && refresh_token.is_none() {
        return None;
    }
    let access_token = access_token.unwrap_or_default();
    Some(Session {
        expires_at: token_expiry(&access_token),
        access_token,
        refresh_token: refresh_token.unwrap_or_default(),
    })
}

pub fn session_cookies(session: &Session, policy: CookiePolicy) -> [Cookie<'static>; 2] {
    let access_max_age = session
        .expires_at
        .map(|expires_at| {
            Duration::seconds(expires_at.saturating_sub(OffsetDateTime::now_utc().unix_timestamp()))
                .max(Duration::ZERO)
        })
        .unwrap_or(DEFAULT_ACCESS_MAX_AGE);

    [
        base_cookie(ACCESS_COOKIE, session.access_token.clone(), policy)
            .max_age(access_max_age)
            .build(),
        base_cookie(REFRESH_COOKIE, session.refresh_token.clone(), policy)
            .max_age(REFRESH_MAX_AGE)
            .build(),
    ]
}

pub fn removal_cookies(policy: CookiePolicy) -> [Cookie<'static>; 2] {
    [ACCESS_COOKIE, REFRESH_COOKIE].map(|name| {
        let mut cookie = base_cookie(name, String::new(), policy).build();
        cookie.make_removal();
        cookie
    })
}

/// `exp` claim of a JWT-shaped token, without verifying the signature.
pub fn token_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let decoded = BASE64_URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<ExpiryClaim>(&decoded).ok()?.exp
}

fn base_cookie(
    name: &'static str,
    value: String,
    policy: CookiePolicy,
) -> cookie::CookieBuilder<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(policy.secure)
}
