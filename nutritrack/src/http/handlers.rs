use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::GlobalKeyExtractor,
    GovernorLayer,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Direction, Query as RecordQuery, QueryError, User};
use crate::nutrition::{
    summarize_day, today, DailySummary, FoodLogEntry, MacroTotals, NewFoodLogEntry,
    NewWeightEntry, Settings, SettingsUpdate, WeightEntry, FOOD_LOGS, PROFILES, WEIGHT_ENTRIES,
};
use crate::session::SessionClient;

use super::auth;
use super::error::ApiError;
use super::gate::{session_gate, RequestSession};
use super::pages;
use super::responses::{
    DayQuery, FoodLogResponse, HealthResponse, LimitQuery, WeighInsResponse, MAX_WEIGH_IN_LIMIT,
};
use super::state::AppState;

const SUMMARY_WINDOW: time::Duration = time::Duration::days(30);

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(pages::landing))
        .route("/about", get(pages::about))
        .route("/health", get(health))
        .route("/auth/login", get(auth::login_form).post(auth::login))
        .route("/auth/sign-up", get(auth::sign_up_form).post(auth::sign_up))
        .route("/auth/logout", post(auth::logout))
        .route("/dashboard", get(pages::dashboard))
        .route("/food-log", get(pages::food_log))
        .route("/weigh-in", get(pages::weigh_in))
        .route("/settings", get(pages::settings))
        .route("/api/me", get(me))
        .route("/api/food-log", get(list_food_log).post(create_food_log))
        .route("/api/food-log/{id}", delete(delete_food_log))
        .route("/api/weigh-ins", get(list_weigh_ins).post(create_weigh_in))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/dashboard", get(dashboard))
        .fallback(pages::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), session_gate));

    let router = match GovernorConfigBuilder::default()
        .per_second(20)
        .burst_size(50)
        .key_extractor(GlobalKeyExtractor)
        .finish()
    {
        Some(governor_conf) => router.layer(GovernorLayer::new(Arc::new(governor_conf))),
        None => {
            warn!("invalid rate limit configuration; serving without a rate limit");
            router
        }
    };

    router
        .layer(
            tower_http::request_id::SetRequestIdLayer::new(
                axum::http::header::HeaderName::from_static("x-request-id"),
                tower_http::request_id::MakeRequestUuid::default(),
            ),
        )
        .layer(tower_http::request_id::PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.clients.backend_kind(),
    })
}

async fn me(session: RequestSession) -> Result<Json<User>, ApiError> {
    Ok(Json(session.require_user().await?))
}

async fn list_food_log(
    session: RequestSession,
    Query(query): Query<DayQuery>,
) -> Result<Json<FoodLogResponse>, ApiError> {
    let user = session.require_user().await?;
    let date = query.date.unwrap_or_else(today);
    let entries = load_day(&session.client, &user, date).await?;
    debug!(user_id = %user.id, %date, entries = entries.len(), "food log requested");

    Ok(Json(FoodLogResponse {
        date,
        totals: MacroTotals::sum(&entries),
        entries,
    }))
}

async fn create_food_log(
    session: RequestSession,
    Json(body): Json<NewFoodLogEntry>,
) -> Result<(StatusCode, Json<FoodLogEntry>), ApiError> {
    let user = session.require_user().await?;
    let entry = body.into_entry(user.id, today())?;
    let row = session.client.insert(FOOD_LOGS, &entry).await?;
    let stored: FoodLogEntry = serde_json::from_value(row).map_err(QueryError::from)?;
    info!(user_id = %user.id, entry_id = %stored.id, meal = ?stored.meal, "food logged");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_food_log(
    session: RequestSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = session.require_user().await?;
    let query = RecordQuery::new()
        .eq("id", id.to_string())
        .eq("user_id", user.id.to_string());
    let removed = session.client.delete(FOOD_LOGS, &query).await?;
    if removed == 0 {
        return Err(ApiError::NotFound);
    }
    info!(user_id = %user.id, entry_id = %id, "food log entry removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_weigh_ins(
    session: RequestSession,
    Query(query): Query<LimitQuery>,
) -> Result<Json<WeighInsResponse>, ApiError> {
    let user = session.require_user().await?;
    let entries = load_weigh_ins(&session.client, &user, query.clamped()).await?;
    debug!(user_id = %user.id, entries = entries.len(), "weigh-ins requested");
    Ok(Json(WeighInsResponse { entries }))
}

async fn create_weigh_in(
    session: RequestSession,
    Json(body): Json<NewWeightEntry>,
) -> Result<(StatusCode, Json<WeightEntry>), ApiError> {
    let user = session.require_user().await?;
    let entry = body.into_entry(user.id, today())?;
    let row = session.client.insert(WEIGHT_ENTRIES, &entry).await?;
    let stored: WeightEntry = serde_json::from_value(row).map_err(QueryError::from)?;
    info!(user_id = %user.id, entry_id = %stored.id, "weigh-in recorded");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_settings(session: RequestSession) -> Result<Json<Settings>, ApiError> {
    let user = session.require_user().await?;
    Ok(Json(load_settings(&session.client, &user).await?))
}

async fn put_settings(
    session: RequestSession,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Settings>, ApiError> {
    let user = session.require_user().await?;
    let current = load_settings(&session.client, &user).await?;
    let updated = update.apply(current)?;
    let row = session.client.upsert(PROFILES, &updated).await?;
    let stored: Settings = serde_json::from_value(row).map_err(QueryError::from)?;
    info!(user_id = %user.id, "settings updated");
    Ok(Json(stored))
}

async fn dashboard(
    session: RequestSession,
    Query(query): Query<DayQuery>,
) -> Result<Json<DailySummary>, ApiError> {
    let user = session.require_user().await?;
    let date = query.date.unwrap_or_else(today);
    Ok(Json(load_summary(&session.client, &user, date).await?))
}

pub(super) async fn load_day(
    client: &SessionClient,
    user: &User,
    date: time::Date,
) -> Result<Vec<FoodLogEntry>, QueryError> {
    let query = RecordQuery::new()
        .eq("user_id", user.id.to_string())
        .eq("logged_on", date.to_string())
        .order_by("created_at", Direction::Asc);
    client.select_as(FOOD_LOGS, &query).await
}

/// Most recent first.
pub(super) async fn load_weigh_ins(
    client: &SessionClient,
    user: &User,
    limit: usize,
) -> Result<Vec<WeightEntry>, QueryError> {
    let query = RecordQuery::new()
        .eq("user_id", user.id.to_string())
        .order_by("logged_on", Direction::Desc)
        .limit(limit);
    client.select_as(WEIGHT_ENTRIES, &query).await
}

/// Stored profile, or defaults when the user has never saved one.
pub(super) async fn load_settings(
    client: &SessionClient,
    user: &User,
) -> Result<Settings, QueryError> {
    let query = RecordQuery::new().eq("id", user.id.to_string()).limit(1);
    let stored = client.select_as::<Settings>(PROFILES, &query).await?;
    Ok(stored
        .into_iter()
        .next()
        .unwrap_or_else(|| Settings::defaults_for(user.id)))
}

/// Weight change covers the weigh-ins of the [`SUMMARY_WINDOW`] ending on `date`, cut off
/// at the earliest representable date.
pub(super) async fn load_summary(
    client: &SessionClient,
    user: &User,
    date: time::Date,
) -> Result<DailySummary, QueryError> {
    let window_start = date
        .checked_sub(SUMMARY_WINDOW)
        .unwrap_or(time::Date::MIN);
    let window = RecordQuery::new()
        .eq("user_id", user.id.to_string())
        .gte("logged_on", window_start.to_string())
        .lte("logged_on", date.to_string())
        .order_by("logged_on", Direction::Desc)
        .limit(MAX_WEIGH_IN_LIMIT);
    let (entries, weights, settings) = tokio::try_join!(
        load_day(client, user, date),
        client.select_as::<WeightEntry>(WEIGHT_ENTRIES, &window),
        load_settings(client, user),
    )?;
    Ok(summarize_day(date, &entries, &weights, &settings))
}
