use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::analytics::{extract_client_ip, ActiveVisitors, AggregationEngine, GeoIpService};
use crate::classify::{referrer, user_agent};
use crate::config::{AllowList, AnalyticsConfig, Config};
use crate::models::{limits, DeviceSize, EventAttributes, PAGEVIEW};
use crate::privacy::{MaskedIp, UnrecognizedAddressPolicy};
use crate::storage::EventStorage;
use crate::store::EventStore;
use crate::tenant::TenantRegistry;

use super::error::{ApiError, ApiResult, FieldError};

pub struct AppState {
    pub store: EventStore,
    pub engine: AggregationEngine,
    pub storage: Arc<dyn EventStorage>,
    pub allowed: AllowList,
    pub analytics: AnalyticsConfig,
    pub ip_policy: UnrecognizedAddressPolicy,
    pub geoip: GeoIpService,
    pub visitors: ActiveVisitors,
}

impl AppState {
    /// Wire the Event Store, the Aggregation Engine and the request-side
    /// helpers around one shared storage handle.
    pub fn new(
        config: &Config,
        storage: Arc<dyn EventStorage>,
        tenants: Arc<TenantRegistry>,
        geoip: GeoIpService,
    ) -> Self {
        let ip_policy = config.privacy.unrecognized_ip_policy;
        Self {
            store: EventStore::new(
                Arc::clone(&storage),
                Arc::clone(&tenants),
                ip_policy,
                config.unique_visitor_window_hours,
            ),
            engine: AggregationEngine::new(Arc::clone(&storage), tenants),
            storage,
            allowed: config.allowed.clone(),
            analytics: config.analytics.clone(),
            ip_policy,
            geoip,
            visitors: ActiveVisitors::new(Duration::from_secs(
                config.analytics.active_visitor_ttl_secs,
            )),
        }
    }

    /// Raw client address according to the trusted-proxy settings.
    pub(crate) fn client_ip(&self, headers: &HeaderMap, socket: SocketAddr) -> IpAddr {
        extract_client_ip(headers, socket.ip(), &self.analytics)
    }

    /// Check `appId` against the allow-list, recording a field error if it fails.
    pub(crate) fn check_app_id<'a>(
        &self,
        app_id: Option<&'a str>,
        errors: &mut Vec<FieldError>,
    ) -> Option<&'a str> {
        match app_id.map(str::trim).filter(|id| !id.is_empty()) {
            None => {
                errors.push(FieldError::new("appId", "appId is required"));
                None
            }
            Some(id) if !self.allowed.app_ids.iter().any(|allowed| allowed == id) => {
                errors.push(FieldError::new("appId", "Invalid appId"));
                None
            }
            Some(id) => Some(id),
        }
    }

    /// Reject unknown tenants before any core call.
    pub(crate) fn require_app_id<'a>(&self, app_id: &'a str) -> ApiResult<&'a str> {
        let mut errors = Vec::new();
        self.check_app_id(Some(app_id), &mut errors)
            .ok_or(ApiError::Validation(errors))
    }

    fn check_device_size(&self, raw: Option<&str>, errors: &mut Vec<FieldError>) -> Option<DeviceSize> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            errors.push(FieldError::new("deviceSize", "deviceSize is required"));
            return None;
        };
        match raw.parse::<DeviceSize>() {
            Ok(size) if self.allowed.allows_device_size(size) => Some(size),
            _ => {
                errors.push(FieldError::new("deviceSize", "Invalid deviceSize"));
                None
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "connected",
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    database: "disconnected",
                }),
            )
        }
    }
}

pub async fn list_apps(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "apps": state.allowed.app_ids,
        "count": state.allowed.app_ids.len(),
    }))
}

#[derive(Serialize)]
pub struct IpResponse {
    /// Masked form of the caller's address.
    pub ip: String,
    pub valid: bool,
    pub country: Option<String>,
}

/// Show the caller what would be stored for them.
pub async fn my_ip(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let raw = state.client_ip(&headers, addr);
    let masked = MaskedIp::from_raw(&raw.to_string(), state.ip_policy);
    Json(IpResponse {
        ip: masked.to_string(),
        valid: crate::privacy::try_mask(&raw.to_string()).is_some(),
        country: state.geoip.country_code(raw),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterViewQuery {
    pub app_id: Option<String>,
    pub device_size: Option<String>,
    pub page: Option<String>,
    pub title: Option<String>,
    pub referrer: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterViewResponse {
    pub message: &'static str,
    pub duplicate: bool,
    pub is_unique: bool,
    pub insert_id: i64,
}

/// Record a pageview.
pub async fn register_view(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<RegisterViewQuery>,
) -> ApiResult<Json<RegisterViewResponse>> {
    let mut errors = Vec::new();
    let app_id = state.check_app_id(query.app_id.as_deref(), &mut errors);
    let device_size = state.check_device_size(query.device_size.as_deref(), &mut errors);
    let (Some(app_id), Some(device_size)) = (app_id, device_size) else {
        return Err(ApiError::Validation(errors));
    };

    let raw_ip = state.client_ip(&headers, addr);
    let ua = header_str(&headers, header::USER_AGENT);
    let referrer_header = query
        .referrer
        .as_deref()
        .or_else(|| header_str(&headers, header::REFERER));

    let mut attrs = EventAttributes::new(raw_ip.to_string(), device_size).with_event_type(PAGEVIEW);
    attrs.country = state.geoip.country_code(raw_ip);
    attrs.page_path = query.page;
    attrs.page_title = query.title;
    attrs.session_id = query.session_id;
    user_agent::parse(ua).apply(&mut attrs);
    referrer::classify(referrer_header).apply(&mut attrs);

    let outcome = state.store.register_event(app_id, attrs).await?;
    state
        .visitors
        .touch(app_id, &raw_ip.to_string(), ua.unwrap_or_default())
        .await;

    Ok(Json(RegisterViewResponse {
        message: "Success!",
        duplicate: outcome.is_duplicate(),
        is_unique: outcome.is_unique,
        insert_id: outcome.insert_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventRequest {
    pub app_id: Option<String>,
    pub event_type: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub page: Option<String>,
    pub title: Option<String>,
    pub device_size: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventResponse {
    pub message: &'static str,
    pub insert_id: i64,
}

/// Record a custom event. Device size falls back to the one derived from
/// the user agent.
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<TrackEventRequest>,
) -> ApiResult<Json<TrackEventResponse>> {
    let mut errors = Vec::new();
    let app_id = state.check_app_id(body.app_id.as_deref(), &mut errors);

    let event_type = body
        .event_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    match event_type {
        None => errors.push(FieldError::new("eventType", "eventType is required")),
        Some(t) if t.chars().count() > limits::EVENT_TYPE => errors.push(FieldError::new(
            "eventType",
            format!("eventType must be at most {} characters", limits::EVENT_TYPE),
        )),
        Some(_) => {}
    }

    let ua = header_str(&headers, header::USER_AGENT);
    let client = user_agent::parse(ua);
    let device_size = match body.device_size.as_deref() {
        Some(_) => state.check_device_size(body.device_size.as_deref(), &mut errors),
        None => Some(client.device_size()),
    };

    let (Some(app_id), Some(event_type), Some(device_size), true) =
        (app_id, event_type, device_size, errors.is_empty())
    else {
        return Err(ApiError::Validation(errors));
    };

    let raw_ip = state.client_ip(&headers, addr);
    let mut attrs = EventAttributes::new(raw_ip.to_string(), device_size).with_event_type(event_type);
    attrs.country = state.geoip.country_code(raw_ip);
    attrs.page_path = body.page;
    attrs.page_title = body.title;
    attrs.session_id = body.session_id;
    attrs.event_data = body.event_data;
    client.apply(&mut attrs);
    referrer::classify(header_str(&headers, header::REFERER)).apply(&mut attrs);

    let outcome = state.store.register_event(app_id, attrs).await?;

    Ok(Json(TrackEventResponse {
        message: "Event tracked successfully",
        insert_id: outcome.insert_id,
    }))
}
