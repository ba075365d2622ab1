use crate::clock::Clock;
use crate::config::Config;
use crate::engine::rules::{ResourceType, Rule};
use crate::engine::RuleEngine;
use crate::error::{CommandError, StoreError};
use crate::model::TrackedSite;
use crate::report::StatusReport;
use crate::rule_engine::InMemoryRuleEngine;
use crate::server::{Command, DispatcherHandle, NavigationEvent, NewSite, SitePatch};
use crate::stats::StatsCollector;
use crate::store::{Repository, Snapshot};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

pub const DEFAULT_MOTIVATION: &str = "You got this! One clean day at a time.";

pub struct ApiState {
    pub repo: Repository,
    pub dispatcher: DispatcherHandle,
    pub rule_engine: Arc<InMemoryRuleEngine>,
    pub stats: Arc<StatsCollector>,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/stats", get(get_stats))
        .route("/api/sites", get(list_sites).post(add_site))
        .route("/api/sites/{id}", delete(delete_site).patch(update_site))
        .route("/api/sites/{id}/allow", post(allow_site))
        .route("/api/sites/{id}/reset", post(reset_site))
        .route("/api/reset/visits", post(reset_visits))
        .route("/api/reset/all", post(reset_all))
        .route("/api/navigation", post(post_navigation))
        .route("/api/rules", get(list_rules))
        .route("/api/evaluate", post(evaluate))
        .route("/api/motivations", get(list_motivations).post(add_motivation))
        .route("/api/motivations/{index}", delete(delete_motivation))
        .route("/api/journal", get(list_journal).post(add_journal_entry))
        .route("/api/journal/{index}", delete(delete_journal_entry))
        .route("/api/export", get(export))
        .route("/api/import", post(import))
        .route("/blocked", get(blocked_page))
        .with_state(state)
}

pub async fn start_api_server(state: Arc<ApiState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.api.host, state.config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", addr))?;
    info!("API Server listening on http://{}", addr);
    axum::serve(listener, router(state))
        .await
        .context("API server stopped")
}

pub struct ApiError(CommandError);

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        ApiError(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(CommandError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CommandError::UnknownSite(_) | CommandError::OutOfBounds { .. } => StatusCode::NOT_FOUND,
            CommandError::Validation { .. } => StatusCode::BAD_REQUEST,
            CommandError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::Store(e) => {
                error!("Store failure while serving request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn get_status(State(state): State<Arc<ApiState>>) -> ApiResult<Json<StatusReport>> {
    let report = StatusReport::load(&state.repo, state.clock.as_ref(), &state.config.streak).await?;
    Ok(Json(report))
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn list_sites(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Vec<TrackedSite>>> {
    Ok(Json(state.repo.tracked_sites().await?))
}

async fn add_site(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<NewSite>,
) -> ApiResult<impl IntoResponse> {
    let reply = state.dispatcher.send(Command::AddSite(payload)).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

async fn update_site(
    State(state): State<Arc<ApiState>>,
    Path(site_id): Path<String>,
    Json(patch): Json<SitePatch>,
) -> ApiResult<impl IntoResponse> {
    let reply = state
        .dispatcher
        .send(Command::UpdateSite { site_id, patch })
        .await?;
    Ok(Json(reply))
}

async fn delete_site(
    State(state): State<Arc<ApiState>>,
    Path(site_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let reply = state.dispatcher.send(Command::DeleteSite { site_id }).await?;
    Ok(Json(reply))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowRequest {
    allow_until: Option<i64>,
    minutes: Option<u32>,
}

async fn allow_site(
    State(state): State<Arc<ApiState>>,
    Path(site_id): Path<String>,
    payload: Option<Json<AllowRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let allow_until_ms = match request.allow_until {
        Some(ms) => ms,
        None => {
            let minutes = request
                .minutes
                .unwrap_or(state.config.allowance.default_minutes);
            state.clock.now_ms() + i64::from(minutes) * 60_000
        }
    };
    let reply = state
        .dispatcher
        .send(Command::AllowSiteTemporarily {
            site_id,
            allow_until_ms,
        })
        .await?;
    Ok(Json(reply))
}

async fn reset_site(
    State(state): State<Arc<ApiState>>,
    Path(site_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let reply = state
        .dispatcher
        .send(Command::ResetSiteVisits { site_id })
        .await?;
    Ok(Json(reply))
}

async fn reset_visits(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.dispatcher.send(Command::ResetAllVisits).await?))
}

async fn reset_all(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.dispatcher.send(Command::ResetEverything).await?))
}

async fn post_navigation(
    State(state): State<Arc<ApiState>>,
    Json(event): Json<NavigationEvent>,
) -> ApiResult<impl IntoResponse> {
    state.dispatcher.navigate(event).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_rules(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.rule_engine.list_current_rules().await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    url: String,
    #[serde(default = "main_frame")]
    resource_type: ResourceType,
}

fn main_frame() -> ResourceType {
    ResourceType::MainFrame
}

#[derive(Debug, Serialize)]
struct EvaluateResponse {
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<Rule>,
}

async fn evaluate(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<EvaluateRequest>,
) -> impl IntoResponse {
    let rule = state
        .rule_engine
        .evaluate(&request.url, request.resource_type);
    Json(EvaluateResponse {
        matched: rule.is_some(),
        rule,
    })
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    text: String,
}

async fn list_motivations(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.motivations().await?))
}

async fn add_motivation(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TextRequest>,
) -> ApiResult<impl IntoResponse> {
    let reply = state
        .dispatcher
        .send(Command::AddMotivation(request.text))
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

async fn delete_motivation(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<usize>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.dispatcher.send(Command::DeleteMotivation(index)).await?,
    ))
}

async fn list_journal(State(state): State<Arc<ApiState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.journal().await?))
}

async fn add_journal_entry(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TextRequest>,
) -> ApiResult<impl IntoResponse> {
    let reply = state
        .dispatcher
        .send(Command::AddJournalEntry(request.text))
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

async fn delete_journal_entry(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<usize>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .dispatcher
            .send(Command::DeleteJournalEntry(index))
            .await?,
    ))
}

async fn export(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Snapshot>> {
    Ok(Json(state.repo.export().await?))
}

async fn import(
    State(state): State<Arc<ApiState>>,
    Json(snapshot): Json<Snapshot>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.dispatcher.send(Command::Import(snapshot)).await?))
}

#[derive(Debug, Deserialize)]
struct BlockedQuery {
    from: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockedPage {
    phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    site_id: Option<String>,
    allow_minutes: u32,
}

/// Site a blocked page refers to: the first non-regex site whose pattern
/// occurs in `from`, else the first tracked site.
fn site_for_blocked_page(sites: &[TrackedSite], from: &str) -> Option<String> {
    let from = from.to_lowercase();
    sites
        .iter()
        .filter(|s| !s.is_regex && !s.pattern.is_empty())
        .find(|s| from.contains(&s.pattern.to_lowercase()))
        .or_else(|| sites.first())
        .map(|s| s.id.clone())
}

async fn blocked_page(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<BlockedQuery>,
) -> ApiResult<Json<BlockedPage>> {
    let motivations = state.repo.motivations().await?;
    let phrase = motivations
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| DEFAULT_MOTIVATION.to_string());
    let sites = state.repo.tracked_sites().await?;

    Ok(Json(BlockedPage {
        phrase,
        site_id: site_for_blocked_page(&sites, query.from.as_deref().unwrap_or_default()),
        allow_minutes: state.config.allowance.default_minutes,
    }))
}
