//! Axum JSON query facade over the persisted catalog.
//!
//! Read-only and side-effect-free: every endpoint recomputes from the store
//! at query time. Safe to serve concurrently with an in-flight ingestion
//! run; readers may observe a transiently empty catalog during a fresh load.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use probcat_core::{CatalogStats, CompanyAggregate, Difficulty, ProblemRecord};
use probcat_store::{CatalogStore, ProblemFilter, StoreError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "probcat-web";

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 200;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListQuery {
    pub difficulty: Option<String>,
    pub search: Option<String>,
    pub company: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemsResponse {
    pub success: bool,
    pub problems: Vec<ProblemRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompaniesResponse {
    pub success: bool,
    pub companies: Vec<CompanyAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: CatalogStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/problems", get(list_problems_handler))
        .route("/api/companies", get(company_index_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(store: Arc<dyn CatalogStore>) -> anyhow::Result<()> {
    let port: u16 = std::env::var("PROBCAT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving catalog API");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

/// Filtered, paginated listing ordered by descending frequency then
/// ascending title. `pages = ceil(total / limit)`.
pub async fn list_problems(
    store: &dyn CatalogStore,
    query: &ListQuery,
) -> Result<ProblemsResponse, StoreError> {
    let difficulty = match query.difficulty.as_deref() {
        Some(raw) => Some(
            Difficulty::parse(raw)
                .ok_or_else(|| StoreError::Validation(format!("unknown difficulty {raw:?}")))?,
        ),
        None => None,
    };
    let filter = ProblemFilter {
        difficulty,
        company: query.company.clone(),
        search: query.search.clone(),
    };
    let page = query.page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);

    let total = store.count_matching(&filter).await?;
    let pages = total.div_ceil(limit);
    let skip = (page - 1) * limit;
    let problems = store
        .find_matching(&filter, skip as usize, limit as usize)
        .await?;

    Ok(ProblemsResponse {
        success: true,
        problems,
        pagination: Pagination {
            page,
            limit,
            total,
            pages,
        },
    })
}

pub async fn company_index(store: &dyn CatalogStore) -> Result<CompaniesResponse, StoreError> {
    Ok(CompaniesResponse {
        success: true,
        companies: store.company_aggregates().await?,
    })
}

pub async fn catalog_stats(store: &dyn CatalogStore) -> Result<StatsResponse, StoreError> {
    Ok(StatsResponse {
        success: true,
        stats: store.stats().await?,
    })
}

async fn list_problems_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match list_problems(state.store.as_ref(), &query).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => failure(err),
    }
}

async fn company_index_handler(State(state): State<Arc<AppState>>) -> Response {
    match company_index(state.store.as_ref()).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => failure(err),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match catalog_stats(state.store.as_ref()).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => failure(err),
    }
}

fn failure(err: StoreError) -> Response {
    let status = match err {
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(FailureResponse {
            success: false,
            message: err.to_string(),
        }),
    )
        .into_response()
}
