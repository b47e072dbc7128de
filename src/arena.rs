use crate::bot::Bot;
use crate::game::{Cell, GameState, SnakeId};
use crate::transition::{JointMove, advance};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub time_per_move: Duration,
    pub max_frames: u64,
    /// Food is topped up to this many items after every tick.
    pub food_target: usize,
    pub food_value: u32,
    pub seed: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            time_per_move: Duration::from_millis(200),
            max_frames: 500,
            food_target: 3,
            food_value: 1,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Winner {
        id: SnakeId,
        name: String,
        frames: u64,
    },
    Draw {
        frames: u64,
    },
}

impl MatchResult {
    pub fn winner(&self) -> Option<SnakeId> {
        match self {
            MatchResult::Winner { id, .. } => Some(*id),
            MatchResult::Draw { .. } => None,
        }
    }

    pub fn frames(&self) -> u64 {
        match self {
            MatchResult::Winner { frames, .. } | MatchResult::Draw { frames } => *frames,
        }
    }
}

/// A local game between bots, stepped through `advance`.
pub struct Match {
    config: MatchConfig,
    state: GameState,
    bots: BTreeMap<SnakeId, Box<dyn Bot>>,
    rng: StdRng,
    late_moves: BTreeMap<SnakeId, u32>,
}

impl Match {
    /// `state` holds the starting snakes; each one needs a bot.
    pub fn new(state: GameState, bots: Vec<(SnakeId, Box<dyn Bot>)>, config: MatchConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Match {
            config,
            state,
            bots: bots.into_iter().collect(),
            rng,
            late_moves: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// How often each snake's bot missed the time limit.
    pub fn late_moves(&self) -> &BTreeMap<SnakeId, u32> {
        &self.late_moves
    }

    pub fn play(&mut self) -> MatchResult {
        for (&id, bot) in self.bots.iter_mut() {
            bot.game_start(id);
        }
        info!(
            snakes = self.bots.len(),
            width = self.state.board().width(),
            height = self.state.board().height(),
            "match starting"
        );

        self.spawn_food();
        while !self.is_over() && self.state.frame() < self.config.max_frames {
            self.step();
        }

        for bot in self.bots.values_mut() {
            bot.game_end();
        }

        let frames = self.state.frame();
        let mut survivors = self.state.live_snakes();
        let result = match (survivors.next(), survivors.next()) {
            (Some(winner), None) if self.state.has_rivals(winner.id()) => MatchResult::Winner {
                id: winner.id(),
                name: self.bot_name(winner.id()),
                frames,
            },
            _ => MatchResult::Draw { frames },
        };
        info!(?result, "match over");
        result
    }

    /// Ask every live snake's bot for a move and advance one tick. A bot that
    /// answers late keeps going straight.
    pub fn step(&mut self) {
        let mut moves = JointMove::new();
        let live: Vec<SnakeId> = self.state.live_snakes().map(|s| s.id()).collect();
        for id in live {
            let Some(bot) = self.bots.get_mut(&id) else {
                continue;
            };
            let view = self.state.with_perspective(id);
            let start = Instant::now();
            let mv = bot.get_move(&view, self.config.time_per_move);
            let elapsed = start.elapsed();

            if elapsed > self.config.time_per_move {
                warn!(
                    bot = bot.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "late move replaced by straight"
                );
                *self.late_moves.entry(id).or_default() += 1;
                continue;
            }
            moves.insert(id, mv);
        }

        self.state = advance(&self.state, &moves);
        debug!(frame = self.state.frame(), board = %self.state.to_rows().join("\n"), "tick");
        self.spawn_food();
    }

    fn is_over(&self) -> bool {
        let live = self.state.live_snakes().count();
        if self.state.snakes().count() > 1 {
            live <= 1
        } else {
            live == 0
        }
    }

    fn spawn_food(&mut self) {
        let board = self.state.board().clone();
        let blocked = self.state.occupancy();
        let mut free: Vec<Cell> = (0..board.cell_count())
            .filter(|&i| !blocked[i])
            .map(|i| board.cell_at(i))
            .filter(|&cell| self.state.food_at(cell).is_none())
            .collect();

        while self.state.food().len() < self.config.food_target && !free.is_empty() {
            let cell = free.swap_remove(self.rng.gen_range(0..free.len()));
            self.state = self.state.clone().with_food(cell, self.config.food_value);
        }
    }

    fn bot_name(&self, id: SnakeId) -> String {
        self.bots
            .get(&id)
            .map_or_else(|| id.to_string(), |bot| bot.name().to_string())
    }
}
