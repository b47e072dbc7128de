use snake_arena::*;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snake_arena=info,tower_http=info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    match std::env::args().nth(1).as_deref() {
        Some("match") => run_demo_match(&config),
        _ => {
            let addr = std::env::var("SNAKE_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
            if let Err(e) = web::run_server(config, &addr).await {
                error!(error = %e, "server stopped");
                std::process::exit(1);
            }
        }
    }
}

/// Search bot against the greedy bot on a 16x16 board.
fn run_demo_match(config: &Config) {
    let board = Board::new(16, 16, config.rules);
    let start = GameState::new(board, SnakeId(1))
        .with_snake(Snake::new(
            SnakeId(1),
            [Cell::new(3, 8), Cell::new(2, 8), Cell::new(1, 8)],
            Move::Right,
        ))
        .with_snake(Snake::new(
            SnakeId(2),
            [Cell::new(12, 7), Cell::new(13, 7), Cell::new(14, 7)],
            Move::Left,
        ));

    let bots: Vec<(SnakeId, Box<dyn Bot>)> = vec![
        (SnakeId(1), Box::new(SearchBot::new("search".to_string(), config))),
        (SnakeId(2), Box::new(GreedyBot::new("greedy".to_string()))),
    ];
    let match_config = MatchConfig {
        time_per_move: config.time_budget() + Duration::from_millis(50),
        ..MatchConfig::default()
    };

    let mut game = Match::new(start, bots, match_config);
    let result = game.play();
    for snake in game.state().snakes() {
        info!(snake = %snake.id(), alive = snake.is_alive(), score = snake.score(), "final");
    }
    match result {
        MatchResult::Winner { name, frames, .. } => info!(%name, frames, "winner"),
        MatchResult::Draw { frames } => info!(frames, "draw"),
    }
}
