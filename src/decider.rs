//! Anytime move selection: iterative deepening over [`SearchEngine`] under a
//! wall-clock deadline, keeping the last depth that finished.

use crate::config::Config;
use crate::eval::{Evaluator, WIN};
use crate::game::{GameState, Move, SnakeId};
use crate::reach::reachable;
use crate::search::{Deadline, SearchEngine, SearchOutcome, SearchTimeout};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub mv: Move,
    /// Search score of `mv`, `None` for a fallback move.
    pub score: Option<f64>,
    /// Deepest completed search, 0 when no depth finished.
    pub depth: u32,
    pub nodes: u64,
    pub elapsed: Duration,
}

impl Decision {
    pub fn is_fallback(&self) -> bool {
        self.depth == 0
    }
}

#[derive(Debug, Clone)]
pub struct Decider {
    engine: SearchEngine,
    max_depth: u32,
    time_budget: Duration,
    safety_margin: Duration,
}

impl Decider {
    pub fn new(config: &Config) -> Self {
        let evaluator = Evaluator::new(config.weights, config.neighbor_order);
        let engine = SearchEngine::new(evaluator, config.neighbor_order)
            .with_opponent_model(config.opponent_model)
            .with_pruning(config.prune)
            .with_parallel_root(config.parallel_root);
        Decider {
            engine,
            max_depth: config.max_depth.max(1),
            time_budget: config.time_budget(),
            safety_margin: config.safety_margin(),
        }
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Decide within the configured time budget.
    pub fn decide(&self, state: &GameState) -> Decision {
        self.decide_within(state, self.time_budget)
    }

    /// Decide within `budget`, keeping the safety margin in reserve.
    pub fn decide_within(&self, state: &GameState, budget: Duration) -> Decision {
        let usable = budget.saturating_sub(self.safety_margin);
        self.decide_until(state, &Deadline::at(Instant::now() + usable))
    }

    /// Search depth 1, 2, ... until the deadline fires, `max_depth` is done or
    /// the result is already decided. Always returns a move.
    pub fn decide_until(&self, state: &GameState, deadline: &Deadline) -> Decision {
        let started = Instant::now();
        let me = state.me();
        let mut completed: Option<SearchOutcome> = None;

        for depth in 1..=self.max_depth {
            match self.engine.search(state, me, depth, deadline) {
                Ok(outcome) => {
                    debug!(
                        depth,
                        score = outcome.score,
                        mv = %outcome.best_move,
                        nodes = deadline.nodes(),
                        "depth completed"
                    );
                    let decided = outcome.score.abs() >= WIN / 2.0;
                    completed = Some(outcome);
                    if decided {
                        break;
                    }
                }
                Err(SearchTimeout) => {
                    debug!(depth, nodes = deadline.nodes(), "deadline reached mid-depth");
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        match completed {
            Some(outcome) => {
                info!(
                    frame = state.frame(),
                    mv = %outcome.best_move,
                    depth = outcome.depth,
                    score = outcome.score,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "decided"
                );
                Decision {
                    mv: outcome.best_move,
                    score: Some(outcome.score),
                    depth: outcome.depth,
                    nodes: deadline.nodes(),
                    elapsed,
                }
            }
            None => {
                let mv = fallback_move(state, me, self.engine.order());
                warn!(frame = state.frame(), mv = %mv, "no depth completed, using fallback");
                Decision {
                    mv,
                    score: None,
                    depth: 0,
                    nodes: deadline.nodes(),
                    elapsed,
                }
            }
        }
    }
}

/// The non-fatal move opening onto the largest free region; ties keep the
/// earlier move in `order`. With no safe move, continue straight.
pub fn fallback_move(state: &GameState, id: SnakeId, order: [Move; 4]) -> Move {
    let Some(snake) = state.snake(id).filter(|s| s.is_alive()) else {
        return Move::Up;
    };
    let Some(head) = snake.head() else {
        return snake.facing();
    };
    let legal = state.legal_moves(id);

    let mut best: Option<(Move, usize)> = None;
    for mv in order.into_iter().filter(|mv| legal.contains(mv)) {
        if state.is_immediately_fatal(id, mv) {
            continue;
        }
        let Some(target) = state.board().step(head, mv) else {
            continue;
        };
        let space = reachable(state, target, order).component_size();
        if best.is_none_or(|(_, best_space)| space > best_space) {
            best = Some((mv, space));
        }
    }

    best.map_or(snake.facing(), |(mv, _)| mv)
}
