use crate::config::Config;
use crate::decider::{Decider, Decision};
use crate::game::{GameState, Move, SnakeId};
use crate::search::greedy_move;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::time::Duration;

/// Trait that all bots must implement
pub trait Bot: Send {
    /// Get the name of the bot
    fn name(&self) -> &str;

    /// Get the move for the snake `state.me()`.
    /// The bot has a time limit to respond
    fn get_move(&mut self, state: &GameState, time_limit: Duration) -> Move;

    /// Notified when the game starts
    fn game_start(&mut self, _me: SnakeId) {}

    /// Notified when the game ends
    fn game_end(&mut self) {}
}

/// Bot driven by the iterative-deepening search.
pub struct SearchBot {
    name: String,
    decider: Decider,
    last: Option<Decision>,
}

impl SearchBot {
    pub fn new(name: String, config: &Config) -> Self {
        SearchBot {
            name,
            decider: Decider::new(config),
            last: None,
        }
    }

    /// The decision behind the most recent move.
    pub fn last_decision(&self) -> Option<&Decision> {
        self.last.as_ref()
    }
}

impl Bot for SearchBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_move(&mut self, state: &GameState, time_limit: Duration) -> Move {
        let decision = self.decider.decide_within(state, time_limit);
        let mv = decision.mv;
        self.last = Some(decision);
        mv
    }

    fn game_start(&mut self, _me: SnakeId) {
        self.last = None;
    }
}

/// Heads for the nearest food without crashing this tick.
pub struct GreedyBot {
    name: String,
    order: [Move; 4],
}

impl GreedyBot {
    pub fn new(name: String) -> Self {
        GreedyBot {
            name,
            order: Move::ALL,
        }
    }
}

impl Bot for GreedyBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_move(&mut self, state: &GameState, _time_limit: Duration) -> Move {
        greedy_move(state, state.me(), self.order)
    }
}

/// Picks uniformly among moves that survive this tick. Seeded, so games
/// replay exactly.
pub struct RandomBot {
    name: String,
    rng: StdRng,
}

impl RandomBot {
    pub fn new(name: String, seed: u64) -> Self {
        RandomBot {
            name,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Bot for RandomBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_move(&mut self, state: &GameState, _time_limit: Duration) -> Move {
        let me = state.me();
        let legal = state.legal_moves(me);
        let safe: Vec<Move> = legal
            .iter()
            .copied()
            .filter(|&mv| !state.is_immediately_fatal(me, mv))
            .collect();
        let pool = if safe.is_empty() { &legal } else { &safe };
        match pool.choose(&mut self.rng) {
            Some(&mv) => mv,
            None => state.my_snake().map_or(Move::Up, |s| s.facing()),
        }
    }
}
