#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::module_inception)]
mod tests {
    use std::future::IntoFuture;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::http::header::SET_COOKIE;
    use axum::http::StatusCode;
    use axum_test::{TestResponse, TestServer};
    use cookie::Cookie;
    use serde_json::{json, Value};

    use crate::backend::memory::MemoryBackend;
    use crate::backend::{AuthApi, AuthError, Backend, BackendKind, Session, SignedIn, User};
    use crate::routes::RouteTable;
    use crate::seed::SeedUser;
    use crate::session::{ClientFactory, CookiePolicy};

    use crate::http::{router, AppState};

    const EMAIL: &str = "ada@example.com";
    const PASSWORD: &str = "correct-horse";

    fn memory_backend() -> Arc<MemoryBackend> {
        Arc::new(
            MemoryBackend::new(Duration::from_secs(3600)).with_users(vec![SeedUser {
                email: String::from(EMAIL),
                password: String::from(PASSWORD),
            }]),
        )
    }

    fn server_for(backend: Backend) -> Result<TestServer> {
        let state = AppState::new(
            ClientFactory::new(backend, CookiePolicy::default()),
            RouteTable::default(),
        );
        Ok(TestServer::new(router(state))?)
    }

    fn test_server() -> Result<(TestServer, Arc<MemoryBackend>)> {
        let memory = memory_backend();
        let server = server_for(Backend::new(BackendKind::Memory, Arc::clone(&memory)))?;
        Ok((server, memory))
    }

    async fn session_for(memory: &MemoryBackend, email: &str, password: &str) -> Session {
        memory
            .sign_in_with_password(email, password)
            .await
            .unwrap()
            .session
            .unwrap()
    }

    fn cookie_header(session: &Session) -> String {
        format!(
            "nt-access-token={}; nt-refresh-token={}",
            session.access_token, session.refresh_token
        )
    }

    fn set_cookies(response: &TestResponse) -> Vec<Cookie<'static>> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| Cookie::parse(value.to_str().unwrap().to_string()).unwrap())
            .collect()
    }

    fn cookie_value(cookies: &[Cookie<'static>], name: &str) -> Option<String> {
        cookies
            .iter()
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }

    #[tokio::test]
    async fn health_reports_backend_kind() -> Result<()> {
        let (server, _) = test_server()?;
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body, json!({ "status": "ok", "backend": "memory" }));
        Ok(())
    }

    #[tokio::test]
    async fn protected_path_without_session_redirects_to_login() -> Result<()> {
        let (server, _) = test_server()?;
        let response = server.get("/protected/dashboard").await;
        assert_eq!(response.status_code(), StatusCode::FOUND);
        assert_eq!(
            response.header("location"),
            "/auth/login?redirectedFrom=%2Fprotected%2Fdashboard"
        );

        let api = server.get("/api/food-log").await;
        assert_eq!(api.status_code(), StatusCode::FOUND);
        assert_eq!(
            api.header("location"),
            "/auth/login?redirectedFrom=%2Fapi%2Ffood-log"
        );
        Ok(())
    }

    #[tokio::test]
    async fn public_paths_pass_through_without_session() -> Result<()> {
        let (server, _) = test_server()?;

        let about_page = server.get("/about-page").await;
        assert_ne!(about_page.status_code(), StatusCode::FOUND);
        assert!(about_page.maybe_header("location").is_none());

        let about = server.get("/about").await;
        assert_eq!(about.status_code(), StatusCode::OK);
        assert!(about.text().contains("About"));

        let landing = server.get("/").await;
        assert_eq!(landing.status_code(), StatusCode::OK);

        let login = server.get("/auth/login?redirectedFrom=%2Fweigh-in").await;
        assert_eq!(login.status_code(), StatusCode::OK);
        assert!(login
            .text()
            .contains(r#"name="redirectedFrom" value="/weigh-in""#));
        Ok(())
    }

    #[tokio::test]
    async fn login_sets_cookies_and_returns_to_original_page() -> Result<()> {
        let (server, _) = test_server()?;

        let response = server
            .post("/auth/login")
            .form(&[
                ("email", EMAIL),
                ("password", PASSWORD),
                ("redirectedFrom", "/weigh-in"),
            ])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), "/weigh-in");

        let cookies = set_cookies(&response);
        let access = cookie_value(&cookies, "nt-access-token").unwrap();
        let refresh = cookie_value(&cookies, "nt-refresh-token").unwrap();
        assert!(!access.is_empty());
        assert!(cookies.iter().all(|cookie| cookie.http_only() == Some(true)));

        let page = server
            .get("/weigh-in")
            .add_header(
                "cookie",
                format!("nt-access-token={access}; nt-refresh-token={refresh}"),
            )
            .await;
        assert_eq!(page.status_code(), StatusCode::OK);
        assert!(page.text().contains(EMAIL));
        Ok(())
    }

    #[tokio::test]
    async fn login_ignores_unsafe_return_paths() -> Result<()> {
        let (server, _) = test_server()?;
        let response = server
            .post("/auth/login")
            .form(&[
                ("email", EMAIL),
                ("password", PASSWORD),
                ("redirectedFrom", "//evil.example/steal"),
            ])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), "/dashboard");
        Ok(())
    }

    #[tokio::test]
    async fn bad_credentials_rerender_the_form() -> Result<()> {
        let (server, _) = test_server()?;
        let response = server
            .post("/auth/login")
            .form(&[("email", EMAIL), ("password", "wrong-password")])
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert!(response.text().contains("Invalid email or password."));
        assert!(set_cookies(&response).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sign_up_signs_in_and_rejects_duplicates() -> Result<()> {
        let (server, _) = test_server()?;
        let response = server
            .post("/auth/sign-up")
            .form(&[("email", "new@example.com"), ("password", "longenough")])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), "/dashboard");
        assert!(cookie_value(&set_cookies(&response), "nt-access-token").is_some());

        let duplicate = server
            .post("/auth/sign-up")
            .form(&[("email", EMAIL), ("password", "longenough")])
            .await;
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_cookies_and_revokes_session() -> Result<()> {
        let (server, memory) = test_server()?;
        let session = session_for(&memory, EMAIL, PASSWORD).await;

        let response = server
            .post("/auth/logout")
            .add_header("cookie", cookie_header(&session))
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), "/auth/login");
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies
            .iter()
            .all(|cookie| cookie.max_age() == Some(time::Duration::ZERO)));

        let after = server
            .get("/dashboard")
            .add_header("cookie", cookie_header(&session))
            .await;
        assert_eq!(after.status_code(), StatusCode::FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_access_token_is_refreshed_and_new_cookies_attached() -> Result<()> {
        let (server, memory) = test_server()?;
        let session = session_for(&memory, EMAIL, PASSWORD).await;
        memory.expire_access_token(&session.access_token);

        let response = server
            .get("/api/me")
            .add_header("cookie", cookie_header(&session))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let me: Value = response.json();
        assert_eq!(me["email"], json!(EMAIL));

        let cookies = set_cookies(&response);
        let renewed = cookie_value(&cookies, "nt-access-token").unwrap();
        assert_ne!(renewed, session.access_token);
        assert!(cookie_value(&cookies, "nt-refresh-token").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_with_a_stale_token_share_one_refresh() -> Result<()> {
        let (server, memory) = test_server()?;
        let session = session_for(&memory, EMAIL, PASSWORD).await;
        memory.expire_access_token(&session.access_token);

        let (first, second) = tokio::join!(
            server
                .get("/api/me")
                .add_header("cookie", cookie_header(&session))
                .into_future(),
            server
                .get("/api/me")
                .add_header("cookie", cookie_header(&session))
                .into_future(),
        );

        let mut issued = Vec::new();
        for response in [&first, &second] {
            assert_eq!(response.status_code(), StatusCode::OK);
            let cookies = set_cookies(response);
            let access = cookie_value(&cookies, "nt-access-token").unwrap();
            assert!(!access.is_empty());
            assert!(cookies
                .iter()
                .all(|cookie| cookie.max_age() != Some(time::Duration::ZERO)));
            issued.push(access);
        }
        assert_eq!(issued[0], issued[1]);
        Ok(())
    }

    #[tokio::test]
    async fn public_page_still_flushes_refreshed_cookies() -> Result<()> {
        let (server, memory) = test_server()?;
        let session = session_for(&memory, EMAIL, PASSWORD).await;
        memory.expire_access_token(&session.access_token);

        let response = server
            .get("/about")
            .add_header("cookie", cookie_header(&session))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(cookie_value(&set_cookies(&response), "nt-access-token").is_some());
        Ok(())
    }

    struct UnreachableAuth;

    #[async_trait]
    impl AuthApi for UnreachableAuth {
        async fn sign_in_with_password(&self, _: &str, _: &str) -> Result<SignedIn, AuthError> {
            Err(AuthError::Unexpected(String::from("auth service down")))
        }

        async fn sign_up(&self, _: &str, _: &str) -> Result<SignedIn, AuthError> {
            Err(AuthError::Unexpected(String::from("auth service down")))
        }

        async fn sign_out(&self, _: &str) -> Result<(), AuthError> {
            Ok(())
        }

        async fn get_user(&self, _: &str) -> Result<User, AuthError> {
            Err(AuthError::Unexpected(String::from("auth service down")))
        }

        async fn refresh_session(&self, _: &str) -> Result<Session, AuthError> {
            Err(AuthError::Unexpected(String::from("auth service down")))
        }
    }

    #[tokio::test]
    async fn session_lookup_errors_are_treated_as_signed_out() -> Result<()> {
        let mut backend = Backend::new(BackendKind::Memory, memory_backend());
        backend.auth = Arc::new(UnreachableAuth);
        let server = server_for(backend)?;

        let response = server
            .get("/dashboard")
            .add_header("cookie", "nt-access-token=a; nt-refresh-token=r")
            .await;
        assert_eq!(response.status_code(), StatusCode::FOUND);
        assert_eq!(
            response.header("location"),
            "/auth/login?redirectedFrom=%2Fdashboard"
        );

        let login = server
            .post("/auth/login")
            .form(&[("email", EMAIL), ("password", PASSWORD)])
            .await;
        assert_eq!(login.status_code(), StatusCode::BAD_GATEWAY);
        Ok(())
    }

    #[tokio::test]
    async fn food_log_entries_can_be_added_listed_and_removed() -> Result<()> {
        let (server, memory) = test_server()?;
        let cookies = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);

        let created = server
            .post("/api/food-log")
            .add_header("cookie", cookies.clone())
            .json(&json!({
                "logged_on": "2024-03-05",
                "meal": "breakfast",
                "name": "Oats",
                "calories": 350,
                "protein_g": 12,
                "carbs_g": 60,
                "fat_g": 6
            }))
            .await;
        assert_eq!(created.status_code(), StatusCode::CREATED);
        let entry: Value = created.json();
        let id = entry["id"].as_str().unwrap().to_string();

        let listed = server
            .get("/api/food-log?date=2024-03-05")
            .add_header("cookie", cookies.clone())
            .await;
        assert_eq!(listed.status_code(), StatusCode::OK);
        let body: Value = listed.json();
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
        assert_eq!(body["totals"]["calories"], json!(350.0));

        let other_day = server
            .get("/api/food-log?date=2024-03-06")
            .add_header("cookie", cookies.clone())
            .await;
        let body: Value = other_day.json();
        assert!(body["entries"].as_array().unwrap().is_empty());

        let removed = server
            .delete(&format!("/api/food-log/{id}"))
            .add_header("cookie", cookies.clone())
            .await;
        assert_eq!(removed.status_code(), StatusCode::NO_CONTENT);

        let again = server
            .delete(&format!("/api/food-log/{id}"))
            .add_header("cookie", cookies)
            .await;
        assert_eq!(again.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_records_are_rejected_with_400() -> Result<()> {
        let (server, memory) = test_server()?;
        let cookies = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);

        let empty_name = server
            .post("/api/food-log")
            .add_header("cookie", cookies.clone())
            .json(&json!({ "meal": "lunch", "name": "  ", "calories": 100 }))
            .await;
        assert_eq!(empty_name.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = empty_name.json();
        assert_eq!(body["error"], json!("name must not be empty"));

        let heavy = server
            .post("/api/weigh-ins")
            .add_header("cookie", cookies.clone())
            .json(&json!({ "weight_kg": 900 }))
            .await;
        assert_eq!(heavy.status_code(), StatusCode::BAD_REQUEST);

        let zero_goal = server
            .put("/api/settings")
            .add_header("cookie", cookies)
            .json(&json!({ "daily_calorie_goal": 0 }))
            .await;
        assert_eq!(zero_goal.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn dashboard_combines_log_weigh_ins_and_goals() -> Result<()> {
        let (server, memory) = test_server()?;
        let cookies = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);

        let defaults = server
            .get("/api/settings")
            .add_header("cookie", cookies.clone())
            .await;
        let defaults: Value = defaults.json();
        assert_eq!(defaults["daily_calorie_goal"], json!(2000.0));

        let updated = server
            .put("/api/settings")
            .add_header("cookie", cookies.clone())
            .json(&json!({ "daily_calorie_goal": 1800, "target_weight_kg": 70 }))
            .await;
        assert_eq!(updated.status_code(), StatusCode::OK);

        for (day, kg) in [("2024-03-01", 75.0), ("2024-03-05", 74.2)] {
            let response = server
                .post("/api/weigh-ins")
                .add_header("cookie", cookies.clone())
                .json(&json!({ "logged_on": day, "weight_kg": kg }))
                .await;
            assert_eq!(response.status_code(), StatusCode::CREATED);
        }
        for (meal, calories) in [("lunch", 600), ("dinner", 700)] {
            server
                .post("/api/food-log")
                .add_header("cookie", cookies.clone())
                .json(&json!({
                    "logged_on": "2024-03-05", "meal": meal, "name": "plate", "calories": calories
                }))
                .await;
        }

        let weigh_ins = server
            .get("/api/weigh-ins?limit=1")
            .add_header("cookie", cookies.clone())
            .await;
        let weigh_ins: Value = weigh_ins.json();
        assert_eq!(weigh_ins["entries"].as_array().unwrap().len(), 1);
        assert_eq!(weigh_ins["entries"][0]["weight_kg"], json!(74.2));

        let response = server
            .get("/api/dashboard?date=2024-03-05")
            .add_header("cookie", cookies)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let summary: Value = response.json();
        assert_eq!(summary["calorie_goal"], json!(1800.0));
        assert_eq!(summary["totals"]["calories"], json!(1300.0));
        assert_eq!(summary["calories_remaining"], json!(500.0));
        assert_eq!(summary["by_meal"]["dinner"], json!(700.0));
        assert_eq!(summary["by_meal"]["breakfast"], json!(0.0));
        assert_eq!(summary["latest_weight_kg"], json!(74.2));
        assert_eq!(summary["weight_change_kg"], json!(-0.8));
        assert_eq!(summary["target_weight_kg"], json!(70.0));
        Ok(())
    }

    #[tokio::test]
    async fn dashboard_accepts_dates_at_the_edge_of_the_calendar() -> Result<()> {
        let (server, memory) = test_server()?;
        let cookies = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);

        let response = server
            .get("/api/dashboard?date=-9999-01-05")
            .add_header("cookie", cookies)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let summary: Value = response.json();
        assert_eq!(summary["date"], json!("-9999-01-05"));
        assert_eq!(summary["latest_weight_kg"], Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn users_only_see_their_own_records() -> Result<()> {
        let (server, memory) = test_server()?;
        let ada = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);
        let bob = memory.sign_up("bob@example.com", "hunter22").await.unwrap();
        let bob = cookie_header(&bob.session.unwrap());

        let created = server
            .post("/api/food-log")
            .add_header("cookie", ada)
            .json(&json!({
                "logged_on": "2024-03-05", "meal": "snack", "name": "Apple", "calories": 80
            }))
            .await;
        let id = created.json::<Value>()["id"].as_str().unwrap().to_string();

        let listed = server
            .get("/api/food-log?date=2024-03-05")
            .add_header("cookie", bob.clone())
            .await;
        let body: Value = listed.json();
        assert!(body["entries"].as_array().unwrap().is_empty());

        let removed = server
            .delete(&format!("/api/food-log/{id}"))
            .add_header("cookie", bob)
            .await;
        assert_eq!(removed.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn protected_pages_render_for_signed_in_users() -> Result<()> {
        let (server, memory) = test_server()?;
        let cookies = cookie_header(&session_for(&memory, EMAIL, PASSWORD).await);

        for (path, heading) in [
            ("/dashboard", "Dashboard"),
            ("/food-log", "Food log"),
            ("/weigh-in", "Weigh-in"),
            ("/settings", "Settings"),
        ] {
            let response = server
                .get(path)
                .add_header("cookie", cookies.clone())
                .await;
            assert_eq!(response.status_code(), StatusCode::OK, "{path}");
            assert!(response.text().contains(&format!("<h1>{heading}</h1>")), "{path}");
        }
        Ok(())
    }
}
