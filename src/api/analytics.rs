//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::aggregator::DEFAULT_REFERRER_LIMIT;
use crate::models::{
    BrowserStats, PageCount, ReferrerStats, StatsReport, StoredEvent, TrendPeriod, TrendPoint,
    ViewRow,
};

use super::error::{ApiError, ApiResult, FieldError};
use super::handlers::AppState;

const DEFAULT_TREND_DAYS: i64 = 30;
const DEFAULT_PAGE_LIMIT: i64 = 20;
const DEFAULT_VIEWS_LIMIT: i64 = 50;

/// Parse an optional integer query parameter within `min..=max`.
fn bounded_param(
    name: &str,
    raw: Option<&str>,
    min: i64,
    max: i64,
    default: i64,
    errors: &mut Vec<FieldError>,
) -> i64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };
    match raw.parse::<i64>() {
        Ok(value) if (min..=max).contains(&value) => value,
        _ => {
            let message = if max == i64::MAX {
                format!("{name} must be an integer of at least {min}")
            } else {
                format!("{name} must be between {min} and {max}")
            };
            errors.push(FieldError::new(name, message));
            default
        }
    }
}

fn finish<T>(value: T, errors: Vec<FieldError>) -> ApiResult<T> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(ApiError::Validation(errors))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub app_id: String,
    pub stats: StatsReport,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<StatsResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let stats = state.engine.get_stats(app_id).await?;
    Ok(Json(StatsResponse {
        app_id: app_id.to_string(),
        stats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    pub period: Option<String>,
    pub days: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsResponse {
    pub app_id: String,
    pub period: TrendPeriod,
    pub days: i64,
    pub trends: Vec<TrendPoint>,
}

pub async fn get_trends(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<TrendsQuery>,
) -> ApiResult<Json<TrendsResponse>> {
    let app_id = state.require_app_id(&app_id)?;

    let mut errors = Vec::new();
    let period = match query.period.as_deref().filter(|p| !p.is_empty()) {
        None => TrendPeriod::default(),
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            errors.push(FieldError::new(
                "period",
                "period must be one of hourly, daily, weekly",
            ));
            TrendPeriod::default()
        }),
    };
    let days = bounded_param("days", query.days.as_deref(), 1, 365, DEFAULT_TREND_DAYS, &mut errors);
    let days = finish(days, errors)?;

    // `days` is within 1..=365 here.
    let trends = state
        .engine
        .get_trends(app_id, period, days as u32)
        .await?;

    Ok(Json(TrendsResponse {
        app_id: app_id.to_string(),
        period,
        days,
        trends,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrersResponse {
    pub app_id: String,
    #[serde(flatten)]
    pub stats: ReferrerStats,
}

pub async fn get_referrers(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<ReferrersResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let mut errors = Vec::new();
    let limit = bounded_param("limit", query.limit.as_deref(), 1, 100, DEFAULT_REFERRER_LIMIT, &mut errors);
    let limit = finish(limit, errors)?;

    let stats = state.engine.get_referrer_stats(app_id, Some(limit)).await?;
    Ok(Json(ReferrersResponse {
        app_id: app_id.to_string(),
        stats,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowsersResponse {
    pub app_id: String,
    #[serde(flatten)]
    pub stats: BrowserStats,
}

pub async fn get_browsers(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<BrowsersResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let stats = state.engine.get_browser_stats(app_id).await?;
    Ok(Json(BrowsersResponse {
        app_id: app_id.to_string(),
        stats,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagesResponse {
    pub app_id: String,
    pub pages: Vec<PageCount>,
}

pub async fn get_pages(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<PagesResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let mut errors = Vec::new();
    let limit = bounded_param("limit", query.limit.as_deref(), 1, 100, DEFAULT_PAGE_LIMIT, &mut errors);
    let limit = finish(limit, errors)?;

    let pages = state.engine.get_page_stats(app_id, limit).await?;
    Ok(Json(PagesResponse {
        app_id: app_id.to_string(),
        pages,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub app_id: String,
    pub session_id: String,
    pub count: usize,
    pub events: Vec<StoredEvent>,
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((app_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<SessionResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let events = state.engine.get_session_details(app_id, &session_id).await?;
    Ok(Json(SessionResponse {
        app_id: app_id.to_string(),
        session_id,
        count: events.len(),
        events,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ViewsQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewsResponse {
    pub app_id: String,
    pub views: Vec<ViewRow>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn get_views(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<ViewsQuery>,
) -> ApiResult<Json<ViewsResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    let mut errors = Vec::new();
    let limit = bounded_param("limit", query.limit.as_deref(), 1, 100, DEFAULT_VIEWS_LIMIT, &mut errors);
    let offset = bounded_param("offset", query.offset.as_deref(), 0, i64::MAX, 0, &mut errors);
    let (limit, offset) = finish((limit, offset), errors)?;

    let page = state.engine.get_views(app_id, limit, offset).await?;
    Ok(Json(ViewsResponse {
        app_id: app_id.to_string(),
        views: page.views,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeResponse {
    pub app_id: String,
    pub active_visitors: u64,
    pub window_secs: u64,
}

/// Approximate visitors seen within the active-visitor window. Served
/// from memory only.
pub async fn get_realtime(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<RealtimeResponse>> {
    let app_id = state.require_app_id(&app_id)?;
    Ok(Json(RealtimeResponse {
        app_id: app_id.to_string(),
        active_visitors: state.visitors.count(app_id).await,
        window_secs: state.visitors.ttl().as_secs(),
    }))
}
