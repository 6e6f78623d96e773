//! HTTP/JSON API server.
//!
//! Exposes the service over REST for the web client. All error responses
//! share one schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "game 7 not found" } }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET/POST` | `/api/games` | List / create games |
//! | `GET/PUT/DELETE` | `/api/games/{id}` | One game |
//! | `POST` | `/api/games/{id}/rules-upload` | Upload a rules PDF |
//! | `GET`  | `/api/games/{id}/rules-info` | Chunk/text stats |
//! | `DELETE` | `/api/games/{id}/rules` | Remove rules doc + embeddings |
//! | `GET`  | `/api/chat/search-rules` | Similarity search |
//! | `GET/POST` | `/api/chat/sessions` | List / create chat sessions |
//! | `GET`  | `/api/chat/sessions/{id}` | Session with full history |
//! | `POST` | `/api/chat/message` | Post a message, get a grounded reply |
//! | `GET/POST` | `/api/house-rules` | List / create house rules |
//! | `GET/PUT/DELETE` | `/api/house-rules/{id}` | One house rule |
//!
//! CORS is permissive: the browser client may be served from anywhere.

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::models::{
    ChatHistory, ChatMessageRequest, ChatMessageResponse, ChatSession, ChatSessionSummary,
    CreateChatSessionRequest, CreateGameRequest, CreateHouseRuleRequest, DeleteRulesResponse,
    Game, GameId, GameSummary, HouseRule, HouseRuleId, PaginatedResponse, PaginationParams,
    RulesInfo, SearchResponse, UpdateGameRequest, UpdateHouseRuleRequest, UploadRulesResponse,
};
use crate::{chat, db, ingest, migrate, search, store};

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: sqlx::SqlitePool,
    /// Serializes rules uploads/deletes per game id.
    pub upload_locks: Arc<KeyedLocks>,
    /// Serializes chat generation per session id.
    pub session_locks: Arc<KeyedLocks>,
}

impl AppState {
    pub fn new(config: Config, pool: sqlx::SqlitePool) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            upload_locks: Arc::new(KeyedLocks::new()),
            session_locks: Arc::new(KeyedLocks::new()),
        }
    }
}

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Slack above the configured ceiling so oversized uploads are rejected by
    // the size check with a JSON body rather than by the transport layer.
    let body_limit = state.config.upload.max_bytes + 1024 * 1024;

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/games", get(handle_list_games).post(handle_create_game))
        .route(
            "/api/games/{id}",
            get(handle_get_game)
                .put(handle_update_game)
                .delete(handle_delete_game),
        )
        .route("/api/games/{id}/rules-upload", post(handle_upload_rules))
        .route("/api/games/{id}/rules-info", get(handle_rules_info))
        .route("/api/games/{id}/rules", axum::routing::delete(handle_delete_rules))
        .route("/api/chat/search-rules", get(handle_search_rules))
        .route(
            "/api/chat/sessions",
            get(handle_list_sessions).post(handle_create_session),
        )
        .route("/api/chat/sessions/{id}", get(handle_get_session))
        .route("/api/chat/message", post(handle_chat_message))
        .route(
            "/api/house-rules",
            get(handle_list_house_rules).post(handle_create_house_rule),
        )
        .route(
            "/api/house-rules/{id}",
            get(handle_get_house_rule)
                .put(handle_update_house_rule)
                .delete(handle_delete_house_rule),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Connect, migrate, and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), pool);
    let app = app(state);

    info!("rulesmith server listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Upstream(_) | Error::Generation(_) => StatusCode::BAD_GATEWAY,
        Error::Database(_) | Error::Io(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("request failed: {self}");
        } else if matches!(self, Error::Upstream(_) | Error::Generation(_)) {
            warn!("upstream failure: {self}");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Games ============

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

impl PageQuery {
    fn params(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

async fn handle_list_games(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<GameSummary>>> {
    let result = store::games::list_games(&state.pool, query.params()).await?;
    Ok(Json(result))
}

fn validate_game_fields(
    name: Option<&str>,
    min_players: Option<i32>,
    max_players: Option<i32>,
    complexity: Option<f64>,
) -> Result<()> {
    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(Error::validation("game name must not be empty"));
        }
    }
    if matches!(min_players, Some(n) if n < 1) || matches!(max_players, Some(n) if n < 1) {
        return Err(Error::validation("player counts must be at least 1"));
    }
    if let (Some(min), Some(max)) = (min_players, max_players) {
        if min > max {
            return Err(Error::validation(
                "minPlayers must not exceed maxPlayers",
            ));
        }
    }
    if matches!(complexity, Some(c) if !(1.0..=5.0).contains(&c)) {
        return Err(Error::validation(
            "complexityRating must be between 1.0 and 5.0",
        ));
    }
    Ok(())
}

async fn handle_create_game(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<Game>)> {
    validate_game_fields(
        Some(&request.name),
        request.min_players,
        request.max_players,
        request.complexity_rating,
    )?;

    let game = store::games::create_game(&state.pool, &request).await?;
    Ok((StatusCode::CREATED, Json(game)))
}

async fn handle_get_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<Json<Game>> {
    let game = store::games::get_game(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {id} not found")))?;
    Ok(Json(game))
}

async fn handle_update_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    Json(request): Json<UpdateGameRequest>,
) -> Result<Json<Game>> {
    validate_game_fields(
        request.name.as_deref(),
        request.min_players,
        request.max_players,
        request.complexity_rating,
    )?;

    let game = store::games::update_game(&state.pool, id, &request)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {id} not found")))?;
    Ok(Json(game))
}

async fn handle_delete_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<StatusCode> {
    // Capture the stored file path before the row (and its cascades) go.
    let game = store::games::get_game(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {id} not found")))?;

    store::games::delete_game(&state.pool, id).await?;

    if let Some(path) = game.rules_pdf_path {
        let _ = tokio::fs::remove_file(&path).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

// ============ Rules documents ============

async fn handle_upload_rules(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<UploadRulesResponse>)> {
    let outcome = ingest::ingest_rules_pdf(
        &state.pool,
        &state.config,
        &state.upload_locks,
        id,
        body.to_vec(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn handle_rules_info(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<Json<RulesInfo>> {
    let info = store::games::rules_info(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {id} not found")))?;
    Ok(Json(info))
}

async fn handle_delete_rules(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<Json<DeleteRulesResponse>> {
    let outcome = ingest::delete_rules(&state.pool, &state.upload_locks, id).await?;
    Ok(Json(outcome))
}

// ============ Search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRulesQuery {
    game_id: GameId,
    query: String,
    limit: Option<i64>,
}

async fn handle_search_rules(
    State(state): State<AppState>,
    Query(query): Query<SearchRulesQuery>,
) -> Result<Json<SearchResponse>> {
    let retrieval = &state.config.retrieval;
    let limit = query
        .limit
        .unwrap_or(retrieval.search_limit_default)
        .clamp(1, retrieval.search_limit_max);

    let response = search::search_chunks(
        &state.pool,
        &state.config,
        query.game_id,
        &query.query,
        limit as usize,
    )
    .await?;
    Ok(Json(response))
}

// ============ Chat ============

/// Query shape shared by the game-scoped list endpoints (chat sessions,
/// house rules).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ByGameQuery {
    game_id: GameId,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ByGameQuery>,
) -> Result<Json<PaginatedResponse<ChatSessionSummary>>> {
    let pagination = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .params();
    let result = chat::list_sessions(&state.pool, query.game_id, pagination).await?;
    Ok(Json(result))
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateChatSessionRequest>,
) -> Result<(StatusCode, Json<ChatSession>)> {
    let session = chat::create_session(&state.pool, &request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChatHistory>> {
    let history = chat::get_history(&state.pool, id).await?;
    Ok(Json(history))
}

async fn handle_chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>> {
    let response =
        chat::post_message(&state.pool, &state.config, &state.session_locks, &request).await?;
    Ok(Json(response))
}

// ============ House rules ============

async fn handle_list_house_rules(
    State(state): State<AppState>,
    Query(query): Query<ByGameQuery>,
) -> Result<Json<PaginatedResponse<HouseRule>>> {
    let pagination = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .params();
    let result =
        store::house_rules::list_house_rules(&state.pool, query.game_id, pagination).await?;
    Ok(Json(result))
}

async fn handle_create_house_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateHouseRuleRequest>,
) -> Result<(StatusCode, Json<HouseRule>)> {
    if request.title.trim().is_empty() {
        return Err(Error::validation("house rule title must not be empty"));
    }
    if request.description.trim().is_empty() {
        return Err(Error::validation(
            "house rule description must not be empty",
        ));
    }

    let rule = store::house_rules::create_house_rule(&state.pool, &request).await?;
    sync_house_rule_chunks(&state, &rule).await;

    Ok((StatusCode::CREATED, Json(rule)))
}

async fn handle_get_house_rule(
    State(state): State<AppState>,
    Path(id): Path<HouseRuleId>,
) -> Result<Json<HouseRule>> {
    let rule = store::house_rules::get_house_rule(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("house rule {id} not found")))?;
    Ok(Json(rule))
}

async fn handle_update_house_rule(
    State(state): State<AppState>,
    Path(id): Path<HouseRuleId>,
    Json(request): Json<UpdateHouseRuleRequest>,
) -> Result<Json<HouseRule>> {
    if matches!(&request.title, Some(t) if t.trim().is_empty()) {
        return Err(Error::validation("house rule title must not be empty"));
    }
    if matches!(&request.description, Some(d) if d.trim().is_empty()) {
        return Err(Error::validation(
            "house rule description must not be empty",
        ));
    }

    let rule = store::house_rules::update_house_rule(&state.pool, id, &request)
        .await?
        .ok_or_else(|| Error::not_found(format!("house rule {id} not found")))?;
    sync_house_rule_chunks(&state, &rule).await;

    Ok(Json(rule))
}

async fn handle_delete_house_rule(
    State(state): State<AppState>,
    Path(id): Path<HouseRuleId>,
) -> Result<StatusCode> {
    let rule = store::house_rules::get_house_rule(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("house rule {id} not found")))?;

    store::house_rules::delete_house_rule(&state.pool, id).await?;
    store::chunks::delete_by_source(
        &state.pool,
        rule.game_id,
        crate::models::SourceType::HouseRule,
        Some(rule.id),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Keep a house rule's chunks in step with its row. Inactive rules carry no
/// chunks. Embedding failures are non-fatal here: the rule text is the
/// source of truth and chunks rebuild on the next write.
async fn sync_house_rule_chunks(state: &AppState, rule: &HouseRule) {
    if !state.config.embedding.is_enabled() {
        return;
    }

    let result = if rule.is_active {
        ingest::reindex_house_rule(&state.pool, &state.config, rule).await
    } else {
        store::chunks::delete_by_source(
            &state.pool,
            rule.game_id,
            crate::models::SourceType::HouseRule,
            Some(rule.id),
        )
        .await
    };

    if let Err(e) = result {
        warn!("house rule {} chunk sync failed: {e}", rule.id);
    }
}
