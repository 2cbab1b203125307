// HTTP Surface - REST API with Axum
//
// Every handler resolves the caller from the `X-User` header and talks to the
// gateway it was given in `AppState`. Errors leave as `{ "message": ... }`.

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::closure::MonthClosurePolicy;
use crate::error::FinanceError;
use crate::export::to_csv_string;
use crate::gateway::Gateway;
use crate::import::{commit_import, preview_import, ImportPreview};
use crate::models::{Category, NewRecord, Record, RecordPatch, User, Wallet, Window};
use crate::parser::{ImportDefaults, StatementFormat};
use crate::statistics::{self, StatisticsQuery, StatisticsResult};

pub const OWNER_HEADER: &str = "x-user";
const INTERNAL_MESSAGE: &str = "Oops, something went wrong...";
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub policy: Arc<dyn MonthClosurePolicy>,
}

// ============================================================================
// Error envelope
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

pub struct ApiError(FinanceError);

impl From<FinanceError> for ApiError {
    fn from(err: FinanceError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(FinanceError::invalid("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(FinanceError::invalid("query", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FinanceError::MissingProperty(_) | FinanceError::InvalidProperty { .. } => {
                StatusCode::BAD_REQUEST
            }
            FinanceError::NotFound { .. } => StatusCode::NOT_FOUND,
            FinanceError::Conflict(_) => StatusCode::CONFLICT,
            FinanceError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
            INTERNAL_MESSAGE.to_string()
        } else {
            self.0.to_string()
        };

        (status, MessageResponse::new(message)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Request helpers
// ============================================================================

fn owner(headers: &HeaderMap) -> Result<String, FinanceError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FinanceError::missing([OWNER_HEADER]))
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, FinanceError> {
    raw.trim()
        .parse()
        .map_err(|_| FinanceError::invalid(field, format!("'{raw}' is not a valid number")))
}

fn optional_field<T: FromStr>(field: &str, raw: &Option<String>) -> Result<Option<T>, FinanceError> {
    raw.as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_field(field, s))
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub from: Option<String>,
    pub count: Option<String>,
    pub wallet_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    pub wallet_id: Option<String>,
    pub category_id: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub year: Option<String>,
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamePayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: crate::VERSION,
    })
}

/// GET /api/statistics?type=&month=&year=
async fn get_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<StatisticsQuery>, QueryRejection>,
) -> ApiResult<Json<StatisticsResult>> {
    let owner = owner(&headers)?;
    let Query(query) = query?;
    // Validation happens before any data access
    let request = query.validate()?;
    let result = statistics::compute(state.gateway.as_ref(), state.policy.as_ref(), &owner, request)?;
    Ok(Json(result))
}

/// PUT|DELETE /api/statistics/closures/:year/:month
async fn close_month(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((year, month)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    set_closure(state, headers, year, month, true)
}

async fn reopen_month(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((year, month)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    set_closure(state, headers, year, month, false)
}

fn set_closure(
    state: AppState,
    headers: HeaderMap,
    year: String,
    month: String,
    closed: bool,
) -> ApiResult<Json<MessageResponse>> {
    let owner = owner(&headers)?;
    let year = statistics::check_year(parse_field("year", &year)?)?;
    let month = statistics::check_month(parse_field("month", &month)?)?;

    state.gateway.set_month_closed(&owner, year, month, closed)?;
    let verb = if closed { "Closed" } else { "Reopened" };
    Ok(MessageResponse::new(format!("{verb} {year}-{month:02}")))
}

/// GET /api/records?from=&count= or ?walletId=
async fn list_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    page: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Record>>> {
    let owner = owner(&headers)?;
    let Query(page) = page?;

    if let Some(wallet_id) = optional_field::<i64>("walletId", &page.wallet_id)? {
        return Ok(Json(state.gateway.list_by_wallet(&owner, wallet_id)?));
    }

    let from = optional_field::<u32>("from", &page.from)?.unwrap_or(0);
    let count = optional_field::<u32>("count", &page.count)?.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.gateway.list_page(&owner, from, count)?))
}

/// GET /api/records/:id
async fn get_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Record>> {
    let owner = owner(&headers)?;
    let id: i64 = parse_field("id", &id)?;
    Ok(Json(state.gateway.get(&owner, id)?))
}

/// POST /api/records
async fn create_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewRecord>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let owner = owner(&headers)?;
    let Json(record) = payload?;
    let created = state.gateway.create(&owner, &record)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/records/:id
async fn update_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<RecordPatch>, JsonRejection>,
) -> ApiResult<Json<Record>> {
    let owner = owner(&headers)?;
    let id: i64 = parse_field("id", &id)?;
    let Json(patch) = payload?;
    Ok(Json(state.gateway.update(&owner, id, &patch)?))
}

/// DELETE /api/records/:id
async fn delete_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let owner = owner(&headers)?;
    let id: i64 = parse_field("id", &id)?;
    state.gateway.delete(&owner, id)?;
    Ok(MessageResponse::new(format!("Deleted Record with id '{id}'")))
}

/// POST /api/records/import?walletId=&categoryId=&format= - body is the statement file
async fn import_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ImportQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<ImportPreview>> {
    let owner = owner(&headers)?;
    let Query(query) = query?;

    let mut missing = Vec::new();
    if query.wallet_id.is_none() {
        missing.push("walletId");
    }
    if query.category_id.is_none() {
        missing.push("categoryId");
    }
    if !missing.is_empty() {
        return Err(FinanceError::missing(missing).into());
    }

    let defaults = ImportDefaults {
        wallet_id: parse_field("walletId", query.wallet_id.as_deref().unwrap_or_default())?,
        category_id: parse_field("categoryId", query.category_id.as_deref().unwrap_or_default())?,
    };
    let format = match query.format.as_deref() {
        Some(format) => StatementFormat::from_str(format)?,
        None => StatementFormat::Mt940,
    };

    let preview = preview_import(state.gateway.as_ref(), &owner, format, &body, defaults)?;
    Ok(Json(preview))
}

/// POST /api/records/bulk - commit reviewed import candidates
async fn create_many_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Vec<NewRecord>>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vec<Record>>)> {
    let owner = owner(&headers)?;
    let Json(records) = payload?;
    let created = commit_import(state.gateway.as_ref(), &owner, &records)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/records/references - which of these references exist already
async fn existing_references(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<Json<Vec<String>>> {
    let owner = owner(&headers)?;
    let Json(references) = payload?;
    Ok(Json(state.gateway.existing_references(&owner, &references)?))
}

/// GET /api/records/export?year=&month= - CSV download
async fn export_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let owner = owner(&headers)?;
    let Query(query) = query?;
    let year = optional_field::<i32>("year", &query.year)?;
    let month = optional_field::<u32>("month", &query.month)?;

    let window = match (year, month) {
        (Some(year), Some(month)) => Window::Month { year, month },
        (Some(year), None) => Window::Year(year),
        (None, Some(_)) => return Err(FinanceError::missing(["year"]).into()),
        (None, None) => Window::All,
    };

    let records = state.gateway.list(&owner, window)?;
    let csv = to_csv_string(&records)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

/// GET /api/wallets
async fn list_wallets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Wallet>>> {
    let owner = owner(&headers)?;
    Ok(Json(state.gateway.list_wallets(&owner)?))
}

/// POST /api/wallets
async fn create_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NamePayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Wallet>)> {
    let owner = owner(&headers)?;
    let Json(payload) = payload?;
    let wallet = state.gateway.create_wallet(&owner, &payload.name)?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// GET /api/categories
async fn list_categories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Category>>> {
    let owner = owner(&headers)?;
    Ok(Json(state.gateway.list_categories(&owner)?))
}

/// POST /api/categories
async fn create_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NamePayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let owner = owner(&headers)?;
    let Json(payload) = payload?;
    let category = state.gateway.create_category(&owner, &payload.name)?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// POST /api/users
async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<UserPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(payload) = payload?;
    let user = state.gateway.create_user(&payload.username)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/me
async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<User>> {
    let owner = owner(&headers)?;
    Ok(Json(state.gateway.get_user(&owner)?))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/statistics", get(get_statistics))
        .route(
            "/statistics/closures/:year/:month",
            put(close_month).delete(reopen_month),
        )
        .route("/records", get(list_records).post(create_record))
        .route("/records/import", post(import_records))
        .route("/records/bulk", post(create_many_records))
        .route("/records/references", post(existing_references))
        .route("/records/export", get(export_records))
        .route(
            "/records/:id",
            get(get_record).patch(update_record).delete(delete_record),
        )
        .route("/wallets", get(list_wallets).post(create_wallet))
        .route("/categories", get(list_categories).post(create_category))
        .route("/users", post(create_user))
        .route("/users/me", get(current_user))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
