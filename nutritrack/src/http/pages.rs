use std::fmt::Write as _;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;

use crate::backend::{QueryError, User};
use crate::guard::{render_guarded, GuardedPage, View, ViewState, LOADING_AFTER};
use crate::nutrition::{today, Meal, UnitSystem};
use crate::routes::{LOGIN_PATH, LOGOUT_PATH, SIGN_UP_PATH};
use crate::session::SessionClient;

use super::error::ApiError;
use super::gate::RequestSession;
use super::handlers::{load_day, load_settings, load_summary, load_weigh_ins};
use super::responses::DEFAULT_WEIGH_IN_LIMIT;
use super::state::AppState;

const POUNDS_PER_KG: f64 = 2.204_622_6;

/// Sends `form[data-api]` as JSON to its endpoint and reloads on success.
const FORM_SCRIPT: &str = r#"<script>
document.querySelectorAll("form[data-api]").forEach(function (form) {
  form.addEventListener("submit", async function (event) {
    event.preventDefault();
    var body = {};
    new FormData(form).forEach(function (value, key) {
      if (value === "") return;
      body[key] = form.elements[key].type === "number" ? Number(value) : value;
    });
    var response = await fetch(form.dataset.api, {
      method: form.dataset.method || "POST",
      headers: { "content-type": "application/json" },
      body: JSON.stringify(body)
    });
    if (response.ok) { location.reload(); return; }
    var error = await response.json().catch(function () { return {}; });
    form.querySelector(".error").textContent = error.error || "Request failed";
  });
});
document.querySelectorAll("button[data-delete]").forEach(function (button) {
  button.addEventListener("click", async function () {
    var response = await fetch(button.dataset.delete, { method: "DELETE" });
    if (response.ok) location.reload();
  });
});
</script>"#;

pub(super) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub(super) fn layout(view: &View) -> Html<String> {
    let refresh = view
        .refresh_after
        .map(|seconds| format!(r#"<meta http-equiv="refresh" content="{seconds}">"#))
        .unwrap_or_default();
    let account = match &view.user {
        Some(user) => format!(
            r#"<span>{email}</span> <form method="post" action="{LOGOUT_PATH}" class="inline"><button>Sign out</button></form>"#,
            email = escape_html(&user.email),
        ),
        None => format!(r#"<a href="{LOGIN_PATH}">Sign in</a> <a href="{SIGN_UP_PATH}">Sign up</a>"#),
    };
    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{refresh}<title>{title} · NutriTrack</title>
</head>
<body>
<header>
<nav><a href="/">NutriTrack</a> <a href="/dashboard">Dashboard</a> <a href="/food-log">Food log</a> <a href="/weigh-in">Weigh-in</a> <a href="/settings">Settings</a> <a href="/about">About</a></nav>
<div class="account">{account}</div>
</header>
<main>
<h1>{title}</h1>
{body}
</main>
{FORM_SCRIPT}
</body>
</html>"#,
        title = escape_html(&view.title),
        body = view.body,
    ))
}

async fn guarded<P>(page: &P, state: &AppState, session: &RequestSession) -> Result<Html<String>, ApiError>
where
    P: GuardedPage,
{
    let view = render_guarded(page, &session.user, &session.client, &state.routes).await?;
    Ok(layout(&view))
}

pub(super) async fn landing(session: RequestSession) -> Html<String> {
    let state = ViewState::resolve(&session.user, LOADING_AFTER).await;
    let (body, user) = match state {
        ViewState::SignedIn(user) => (
            format!(
                r#"<p>Welcome back, {email}.</p><p><a href="/dashboard">Open your dashboard</a></p>"#,
                email = escape_html(&user.email)
            ),
            Some(user),
        ),
        ViewState::SignedOut | ViewState::Loading => (
            format!(
                r#"<p>Log meals, track macros and follow your weight over time.</p><p><a href="{SIGN_UP_PATH}">Create an account</a> or <a href="{LOGIN_PATH}">sign in</a>.</p>"#
            ),
            None,
        ),
    };
    layout(&View {
        title: String::from("Track what you eat"),
        body,
        refresh_after: None,
        user,
    })
}

/// Does not wait on the session lookup.
pub(super) async fn about(session: RequestSession) -> Html<String> {
    let user = match ViewState::from(session.user.state()) {
        ViewState::SignedIn(user) => Some(user),
        ViewState::SignedOut | ViewState::Loading => None,
    };
    layout(&View {
        title: String::from("About"),
        body: String::from(
            "<p>NutriTrack keeps a daily food log with calories and macros, records weigh-ins and compares each day against your own goals.</p>",
        ),
        refresh_after: None,
        user,
    })
}

pub(super) async fn not_found() -> (StatusCode, Html<String>) {
    (
        StatusCode::NOT_FOUND,
        layout(&View {
            title: String::from("Not found"),
            body: String::from(r#"<p>There is nothing here. <a href="/">Go home</a></p>"#),
            refresh_after: None,
            user: None,
        }),
    )
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    session: RequestSession,
) -> Result<Html<String>, ApiError> {
    guarded(&DashboardPage, &state, &session).await
}

pub(super) async fn food_log(
    State(state): State<AppState>,
    session: RequestSession,
) -> Result<Html<String>, ApiError> {
    guarded(&FoodLogPage, &state, &session).await
}

pub(super) async fn weigh_in(
    State(state): State<AppState>,
    session: RequestSession,
) -> Result<Html<String>, ApiError> {
    guarded(&WeighInPage, &state, &session).await
}

pub(super) async fn settings(
    State(state): State<AppState>,
    session: RequestSession,
) -> Result<Html<String>, ApiError> {
    guarded(&SettingsPage, &state, &session).await
}

struct DashboardPage;

#[async_trait]
impl GuardedPage for DashboardPage {
    fn title(&self) -> &'static str {
        "Dashboard"
    }

    fn path(&self) -> &'static str {
        "/dashboard"
    }

    async fn body(&self, user: &User, client: &SessionClient) -> Result<String, QueryError> {
        let (summary, settings) =
            tokio::try_join!(load_summary(client, user, today()), load_settings(client, user))?;
        let unit = settings.unit;

        let mut body = format!(
            r#"<section class="totals"><p><strong>{eaten:.0}</strong> of {goal:.0} kcal eaten, {remaining}.</p>
<p>Protein {protein:.0} g · Carbs {carbs:.0} g · Fat {fat:.0} g</p></section>
<table class="meals"><thead><tr><th>Meal</th><th>kcal</th></tr></thead><tbody>"#,
            eaten = summary.totals.calories,
            goal = summary.calorie_goal,
            remaining = if summary.calories_remaining >= 0.0 {
                format!("{:.0} kcal left", summary.calories_remaining)
            } else {
                format!("{:.0} kcal over", -summary.calories_remaining)
            },
            protein = summary.totals.protein_g,
            carbs = summary.totals.carbs_g,
            fat = summary.totals.fat_g,
        );
        for (meal, calories) in &summary.by_meal {
            let _ = write!(body, "<tr><td>{}</td><td>{calories:.0}</td></tr>", meal.label());
        }
        body.push_str("</tbody></table>");

        match summary.latest_weight_kg {
            Some(latest) => {
                let _ = write!(body, "<p>Latest weigh-in: {}", format_weight(latest, unit));
                if let Some(change) = summary.weight_change_kg {
                    let _ = write!(body, " ({} over recent weigh-ins)", format_change(change, unit));
                }
                if let Some(target) = summary.target_weight_kg {
                    let _ = write!(body, ", target {}", format_weight(target, unit));
                }
                body.push_str("</p>");
            }
            None => body.push_str(r#"<p>No weigh-ins yet. <a href="/weigh-in">Add one</a>.</p>"#),
        }
        Ok(body)
    }
}

struct FoodLogPage;

#[async_trait]
impl GuardedPage for FoodLogPage {
    fn title(&self) -> &'static str {
        "Food log"
    }

    fn path(&self) -> &'static str {
        "/food-log"
    }

    async fn body(&self, user: &User, client: &SessionClient) -> Result<String, QueryError> {
        let date = today();
        let entries = load_day(client, user, date).await?;

        let mut body = format!(r#"<p>Entries for {date}</p>"#);
        if entries.is_empty() {
            body.push_str("<p>Nothing logged yet today.</p>");
        } else {
            body.push_str(
                "<table><thead><tr><th>Meal</th><th>Food</th><th>kcal</th><th>P</th><th>C</th><th>F</th><th></th></tr></thead><tbody>",
            );
            for entry in &entries {
                let _ = write!(
                    body,
                    r#"<tr><td>{meal}</td><td>{name}</td><td>{kcal:.0}</td><td>{p:.0}</td><td>{c:.0}</td><td>{f:.0}</td><td><button data-delete="/api/food-log/{id}">Remove</button></td></tr>"#,
                    meal = entry.meal.label(),
                    name = escape_html(&entry.name),
                    kcal = entry.calories,
                    p = entry.protein_g,
                    c = entry.carbs_g,
                    f = entry.fat_g,
                    id = entry.id,
                );
            }
            body.push_str("</tbody></table>");
        }

        let meals = Meal::ALL
            .iter()
            .map(|meal| {
                format!(
                    r#"<option value="{value}">{label}</option>"#,
                    value = meal.label().to_ascii_lowercase(),
                    label = meal.label()
                )
            })
            .collect::<String>();
        let _ = write!(
            body,
            r#"<form data-api="/api/food-log">
<select name="meal">{meals}</select>
<input name="name" placeholder="Food" required maxlength="200">
<input name="calories" type="number" min="0" step="any" placeholder="kcal" required>
<input name="protein_g" type="number" min="0" step="any" placeholder="Protein g">
<input name="carbs_g" type="number" min="0" step="any" placeholder="Carbs g">
<input name="fat_g" type="number" min="0" step="any" placeholder="Fat g">
<button>Add</button><p class="error"></p>
</form>"#
        );
        Ok(body)
    }
}

struct WeighInPage;

#[async_trait]
impl GuardedPage for WeighInPage {
    fn title(&self) -> &'static str {
        "Weigh-in"
    }

    fn path(&self) -> &'static str {
        "/weigh-in"
    }

    async fn body(&self, user: &User, client: &SessionClient) -> Result<String, QueryError> {
        let (entries, settings) = tokio::try_join!(
            load_weigh_ins(client, user, DEFAULT_WEIGH_IN_LIMIT),
            load_settings(client, user)
        )?;

        let mut body = String::from(
            r#"<form data-api="/api/weigh-ins">
<input name="weight_kg" type="number" min="0" max="700" step="0.1" placeholder="Weight (kg)" required>
<button>Record</button><p class="error"></p>
</form>"#,
        );
        if entries.is_empty() {
            body.push_str("<p>No weigh-ins recorded.</p>");
            return Ok(body);
        }
        body.push_str("<ul class=\"weigh-ins\">");
        for entry in &entries {
            let _ = write!(
                body,
                "<li>{} · {}</li>",
                entry.logged_on,
                format_weight(entry.weight_kg, settings.unit)
            );
        }
        body.push_str("</ul>");
        Ok(body)
    }
}

struct SettingsPage;

#[async_trait]
impl GuardedPage for SettingsPage {
    fn title(&self) -> &'static str {
        "Settings"
    }

    fn path(&self) -> &'static str {
        "/settings"
    }

    async fn body(&self, user: &User, client: &SessionClient) -> Result<String, QueryError> {
        let settings = load_settings(client, user).await?;
        let selected = |unit: UnitSystem| if settings.unit == unit { " selected" } else { "" };

        Ok(format!(
            r#"<form data-api="/api/settings" data-method="PUT">
<label>Display name <input name="display_name" value="{name}" maxlength="200"></label>
<label>Daily calories <input name="daily_calorie_goal" type="number" min="1" step="any" value="{kcal}"></label>
<label>Protein g <input name="protein_goal_g" type="number" min="1" step="any" value="{protein}"></label>
<label>Carbs g <input name="carbs_goal_g" type="number" min="1" step="any" value="{carbs}"></label>
<label>Fat g <input name="fat_goal_g" type="number" min="1" step="any" value="{fat}"></label>
<label>Target weight kg <input name="target_weight_kg" type="number" min="1" step="0.1" value="{target}"></label>
<label>Units <select name="unit"><option value="metric"{metric}>Metric</option><option value="imperial"{imperial}>Imperial</option></select></label>
<button>Save</button><p class="error"></p>
</form>"#,
            name = escape_html(settings.display_name.as_deref().unwrap_or_default()),
            kcal = settings.daily_calorie_goal,
            protein = settings.protein_goal_g,
            carbs = settings.carbs_goal_g,
            fat = settings.fat_goal_g,
            target = settings
                .target_weight_kg
                .map(|kg| kg.to_string())
                .unwrap_or_default(),
            metric = selected(UnitSystem::Metric),
            imperial = selected(UnitSystem::Imperial),
        ))
    }
}

fn format_weight(kg: f64, unit: UnitSystem) -> String {
    match unit {
        UnitSystem::Metric => format!("{kg:.1} kg"),
        UnitSystem::Imperial => format!("{:.1} lb", kg * POUNDS_PER_KG),
    }
}

fn format_change(kg: f64, unit: UnitSystem) -> String {
    let formatted = format_weight(kg.abs(), unit);
    if kg > 0.0 {
        format!("+{formatted}")
    } else if kg < 0.0 {
        format!("-{formatted}")
    } else {
        formatted
    }
}
