use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::decider::Decider;
use crate::game::{GameState, Move, Rules, Turn};
use crate::observe::{RawFrame, observe};

/// Games without a frame for this long are dropped, even without `/end`.
pub const DEFAULT_GAME_TTL: Duration = Duration::from_secs(600);

struct TrackedGame {
    state: GameState,
    seen: Instant,
}

/// Shared between handlers. Each game keeps the last state built for it so the
/// next frame can be read against it.
#[derive(Clone)]
pub struct AppState {
    decider: Arc<Decider>,
    rules: Rules,
    game_ttl: Duration,
    games: Arc<Mutex<HashMap<String, TrackedGame>>>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        AppState {
            decider: Arc::new(Decider::new(config)),
            rules: config.rules,
            game_ttl: DEFAULT_GAME_TTL,
            games: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_game_ttl(mut self, ttl: Duration) -> Self {
        self.game_ttl = ttl;
        self
    }

    fn previous(&self, game_id: &str) -> Option<GameState> {
        self.games
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(game_id)
            .map(|game| game.state.clone())
    }

    fn remember(&self, game_id: String, state: GameState) {
        let now = Instant::now();
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        let before = games.len();
        games.retain(|_, game| now.duration_since(game.seen) < self.game_ttl);
        if games.len() < before {
            debug!(evicted = before - games.len(), "dropped stale games");
        }
        games.insert(game_id, TrackedGame { state, seen: now });
    }

    fn forget(&self, game_id: &str) -> bool {
        self.games
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(game_id)
            .is_some()
    }
}

#[derive(Serialize, Deserialize)]
pub struct InfoResponse {
    name: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
pub struct MoveRequest {
    pub game_id: String,
    pub frame: RawFrame,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveResponse {
    #[serde(rename = "move")]
    pub mv: Move,
    /// The same move relative to the snake's facing, for turn-based servers.
    pub turn: Option<Turn>,
    pub depth: u32,
    pub score: Option<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct EndRequest {
    pub game_id: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[axum::debug_handler]
async fn make_move(State(app_state): State<AppState>, Json(req): Json<MoveRequest>) -> Response {
    let previous = app_state.previous(&req.game_id);
    let state = match observe(&req.frame, previous.as_ref(), app_state.rules) {
        Ok(state) => state,
        Err(e) => {
            warn!(game_id = %req.game_id, error = %e, "rejected frame");
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Invalid frame: {}", e),
            );
        }
    };

    let decider = Arc::clone(&app_state.decider);
    let searched = state.clone();
    let decision = match tokio::task::spawn_blocking(move || decider.decide(&searched)).await {
        Ok(decision) => decision,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Search failed: {}", e),
            );
        }
    };

    let turn = state
        .my_snake()
        .and_then(|snake| decision.mv.turn_from(snake.facing()));
    app_state.remember(req.game_id, state);

    Json(MoveResponse {
        mv: decision.mv,
        turn,
        depth: decision.depth,
        score: decision.score,
    })
    .into_response()
}

async fn end_game(State(app_state): State<AppState>, Json(req): Json<EndRequest>) -> StatusCode {
    if app_state.forget(&req.game_id) {
        info!(game_id = %req.game_id, "game ended");
    }
    StatusCode::NO_CONTENT
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/move", post(make_move))
        .route("/end", post(end_game))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

pub async fn run_server(config: Config, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(AppState::new(&config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "snake server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
