//! Depth-limited max/min search over simultaneous snake moves.
//!
//! Every ply the searching snake picks a move (max) and the rivals answer with
//! a joint reply (min). Both halves of a ply are applied together through
//! `advance`, so a ply is one game tick. Positions are evaluated with
//! [`Evaluator`] at the depth horizon and scored with ply-adjusted sentinels
//! when the searching snake dies or outlives every rival. A horizon leaf also
//! earns a bonus that shrinks with the ply of our first gain in length or
//! score, so eating now beats eating at the horizon.

use crate::eval::{Evaluator, LOSS, WIN, outcome};
use crate::game::{GameState, Move, SnakeId};
use crate::reach::reachable;
use crate::transition::{JointMove, advance};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;

/// How rival replies are generated at min plies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentModel {
    /// Every combination of rival moves; the worst one for us counts.
    #[default]
    Minimax,
    /// Each rival heads for its own nearest food, one reply per ply.
    Greedy,
}

/// The search ran out of time or node budget. Partial results are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("search deadline reached")]
pub struct SearchTimeout;

/// Wall clock deadline plus an optional cap on expanded nodes, shared by
/// every depth of one decision. Checked before each node is expanded.
#[derive(Debug)]
pub struct Deadline {
    at: Option<Instant>,
    node_limit: Option<u64>,
    nodes: AtomicU64,
}

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Deadline {
            at: Some(instant),
            node_limit: None,
            nodes: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Deadline {
            at: None,
            node_limit: None,
            nodes: AtomicU64::new(0),
        }
    }

    pub fn with_node_limit(mut self, limit: u64) -> Self {
        self.node_limit = Some(limit);
        self
    }

    /// Nodes expanded so far.
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        self.node_limit.is_some_and(|limit| self.nodes() >= limit)
            || self.at.is_some_and(|at| Instant::now() >= at)
    }

    fn charge(&self) -> Result<(), SearchTimeout> {
        let expanded = self.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.node_limit.is_some_and(|limit| expanded > limit) {
            return Err(SearchTimeout);
        }
        if self.at.is_some_and(|at| Instant::now() >= at) {
            return Err(SearchTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best_move: Move,
    pub score: f64,
    pub depth: u32,
    /// Our moves along the line the score came from.
    pub principal_variation: Vec<Move>,
}

/// A position inside one search, owned by the frame expanding it.
struct SearchNode {
    state: GameState,
    history: Vec<Move>,
    depth: u32,
    /// Ply at which the searching snake first grew or scored.
    first_gain: Option<u32>,
}

impl SearchNode {
    fn root(state: GameState, depth: u32) -> Self {
        SearchNode {
            state,
            history: Vec::new(),
            depth,
            first_gain: None,
        }
    }

    fn child(&self, joint: &JointMove, me: SnakeId, mine: Move) -> SearchNode {
        let state = advance(&self.state, joint);
        let mut history = self.history.clone();
        history.push(mine);
        let first_gain = self
            .first_gain
            .or_else(|| gained(&self.state, &state, me).then_some(history.len() as u32));
        SearchNode {
            state,
            history,
            depth: self.depth.saturating_sub(1),
            first_gain,
        }
    }

    fn ply(&self) -> u32 {
        self.history.len() as u32
    }
}

struct Scored {
    value: f64,
    line: Vec<Move>,
}

#[derive(Debug, Clone)]
pub struct SearchEngine {
    evaluator: Evaluator,
    order: [Move; 4],
    opponent_model: OpponentModel,
    prune: bool,
    parallel_root: bool,
}

impl SearchEngine {
    pub fn new(evaluator: Evaluator, order: [Move; 4]) -> Self {
        SearchEngine {
            evaluator,
            order,
            opponent_model: OpponentModel::default(),
            prune: true,
            parallel_root: false,
        }
    }

    pub fn with_opponent_model(mut self, model: OpponentModel) -> Self {
        self.opponent_model = model;
        self
    }

    /// Alpha-beta cutoffs. They skip nodes but never change the chosen move or
    /// its score, because ties always keep the earlier move.
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Search our candidate moves on the rayon pool, one subtree each.
    pub fn with_parallel_root(mut self, parallel_root: bool) -> Self {
        self.parallel_root = parallel_root;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn order(&self) -> [Move; 4] {
        self.order
    }

    /// Best move for `for_snake` looking `depth` ticks ahead.
    pub fn search(
        &self,
        state: &GameState,
        for_snake: SnakeId,
        depth: u32,
        deadline: &Deadline,
    ) -> Result<SearchOutcome, SearchTimeout> {
        let depth = depth.max(1);
        let facing = state
            .snake(for_snake)
            .map_or(Move::Up, |snake| snake.facing());
        if !state.is_alive(for_snake) {
            return Ok(SearchOutcome {
                best_move: facing,
                score: LOSS,
                depth,
                principal_variation: Vec::new(),
            });
        }

        deadline.charge()?;
        let root = SearchNode::root(state.clone(), depth);
        let candidates = state.legal_moves_in(for_snake, self.order);

        let mut best: Option<(Move, Scored)> = None;
        if self.parallel_root {
            let results: Vec<Result<Scored, SearchTimeout>> = candidates
                .par_iter()
                .map(|&mv| {
                    self.min_node(&root, for_snake, mv, f64::NEG_INFINITY, f64::INFINITY, deadline)
                })
                .collect();
            for (&mv, result) in candidates.iter().zip(results) {
                let scored = result?;
                if best.as_ref().is_none_or(|(_, b)| scored.value > b.value) {
                    best = Some((mv, scored));
                }
            }
        } else {
            let mut alpha = f64::NEG_INFINITY;
            for &mv in &candidates {
                let scored = self.min_node(&root, for_snake, mv, alpha, f64::INFINITY, deadline)?;
                if best.as_ref().is_none_or(|(_, b)| scored.value > b.value) {
                    best = Some((mv, scored));
                }
                if self.prune {
                    if let Some((_, b)) = &best {
                        alpha = alpha.max(b.value);
                    }
                }
            }
        }

        Ok(match best {
            Some((best_move, scored)) => SearchOutcome {
                best_move,
                score: scored.value,
                depth,
                principal_variation: scored.line,
            },
            None => SearchOutcome {
                best_move: facing,
                score: self.evaluator.score(state, for_snake),
                depth,
                principal_variation: Vec::new(),
            },
        })
    }

    fn max_node(
        &self,
        node: &SearchNode,
        me: SnakeId,
        mut alpha: f64,
        beta: f64,
        deadline: &Deadline,
    ) -> Result<Scored, SearchTimeout> {
        deadline.charge()?;

        if let Some(decided) = outcome(&node.state, me) {
            return Ok(Scored {
                value: by_ply(decided, node.ply()),
                line: node.history.clone(),
            });
        }
        if node.depth == 0 {
            return Ok(self.leaf(node, me));
        }

        let mut best: Option<Scored> = None;
        for mv in node.state.legal_moves_in(me, self.order) {
            let scored = self.min_node(node, me, mv, alpha, beta, deadline)?;
            if best.as_ref().is_none_or(|b| scored.value > b.value) {
                best = Some(scored);
            }
            if self.prune {
                if let Some(b) = &best {
                    alpha = alpha.max(b.value);
                    if alpha >= beta {
                        break;
                    }
                }
            }
        }

        Ok(best.unwrap_or_else(|| self.leaf(node, me)))
    }

    fn leaf(&self, node: &SearchNode, me: SnakeId) -> Scored {
        let tempo = node
            .first_gain
            .map_or(0.0, |ply| self.evaluator.weights().food / (ply as f64 + 1.0));
        Scored {
            value: self.evaluator.score(&node.state, me) + tempo,
            line: node.history.clone(),
        }
    }

    fn min_node(
        &self,
        node: &SearchNode,
        me: SnakeId,
        mine: Move,
        alpha: f64,
        mut beta: f64,
        deadline: &Deadline,
    ) -> Result<Scored, SearchTimeout> {
        let mut worst: Option<Scored> = None;
        for mut joint in self.replies(&node.state, me) {
            joint.insert(me, mine);
            let child = node.child(&joint, me, mine);
            let scored = self.max_node(&child, me, alpha, beta, deadline)?;
            if worst.as_ref().is_none_or(|w| scored.value < w.value) {
                worst = Some(scored);
            }
            if self.prune {
                if let Some(w) = &worst {
                    beta = beta.min(w.value);
                    if alpha >= beta {
                        break;
                    }
                }
            }
        }

        Ok(worst.unwrap_or_else(|| Scored {
            value: LOSS,
            line: node.history.clone(),
        }))
    }

    /// Rival replies to consider at a min ply. Always at least one entry.
    fn replies(&self, state: &GameState, me: SnakeId) -> Vec<JointMove> {
        let rivals: Vec<SnakeId> = state.live_rivals(me).map(|s| s.id()).collect();
        match self.opponent_model {
            OpponentModel::Greedy => vec![
                rivals
                    .iter()
                    .map(|&id| (id, greedy_move(state, id, self.order)))
                    .collect(),
            ],
            OpponentModel::Minimax => {
                let mut joints = vec![JointMove::new()];
                for id in rivals {
                    let options = state.legal_moves_in(id, self.order);
                    let mut extended = Vec::with_capacity(joints.len() * options.len());
                    for joint in &joints {
                        for &mv in &options {
                            let mut next = joint.clone();
                            next.insert(id, mv);
                            extended.push(next);
                        }
                    }
                    joints = extended;
                }
                joints
            }
        }
    }
}

/// Whether `id` is alive in `after` with more length or score than in `before`.
fn gained(before: &GameState, after: &GameState, id: SnakeId) -> bool {
    match (before.snake(id), after.snake(id)) {
        (Some(was), Some(now)) => {
            now.is_alive() && (now.len() > was.len() || now.score() > was.score())
        }
        _ => false,
    }
}

/// Prefer dying later and winning sooner.
fn by_ply(decided: f64, ply: u32) -> f64 {
    if decided <= LOSS {
        LOSS + ply as f64
    } else if decided >= WIN {
        WIN - ply as f64
    } else {
        decided
    }
}

/// Move `id` toward its nearest reachable food without crashing this tick.
/// Without food in reach it heads for the largest open area. Ties keep the
/// earlier move in `order`.
pub fn greedy_move(state: &GameState, id: SnakeId, order: [Move; 4]) -> Move {
    let Some(snake) = state.snake(id).filter(|s| s.is_alive()) else {
        return Move::Up;
    };
    let Some(head) = snake.head() else {
        return snake.facing();
    };
    let mut best: Option<(Move, u32, usize)> = None;
    for mv in state.legal_moves_in(id, order) {
        if state.is_immediately_fatal(id, mv) {
            continue;
        }
        let Some(target) = state.board().step(head, mv) else {
            continue;
        };
        let reach = reachable(state, target, order);
        let distance = reach.nearest_food().map_or(u32::MAX, |(_, d)| d);
        let space = reach.component_size();
        let better = match best {
            None => true,
            Some((_, best_distance, best_space)) => {
                distance < best_distance || (distance == best_distance && space > best_space)
            }
        };
        if better {
            best = Some((mv, distance, space));
        }
    }

    best.map_or(snake.facing(), |(mv, _, _)| mv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Weights;
    use crate::game::{Board, Cell, Rules, Snake};

    fn engine() -> SearchEngine {
        SearchEngine::new(Evaluator::new(Weights::default(), Move::ALL), Move::ALL)
    }

    fn board(width: usize, height: usize) -> Board {
        Board::new(width, height, Rules::default())
    }

    fn snake(id: u8, cells: &[(i32, i32)], facing: Move) -> Snake {
        Snake::new(
            SnakeId(id),
            cells.iter().map(|&(x, y)| Cell::new(x, y)),
            facing,
        )
    }

    fn duel() -> GameState {
        GameState::new(board(7, 7), SnakeId(1))
            .with_snake(snake(1, &[(1, 3), (0, 3)], Move::Right))
            .with_snake(snake(2, &[(5, 3), (6, 3)], Move::Left))
            .with_food(Cell::new(3, 1), 1)
            .with_food(Cell::new(4, 5), 2)
    }

    #[test]
    fn test_search_avoids_wall() {
        let state = GameState::new(board(5, 5), SnakeId(1))
            .with_snake(snake(1, &[(4, 2), (3, 2)], Move::Right));
        let result = engine()
            .search(&state, SnakeId(1), 2, &Deadline::unlimited())
            .unwrap();
        assert_ne!(result.best_move, Move::Right);
        assert!(result.score > LOSS + 10.0);
        assert_eq!(result.principal_variation.len(), 2);
    }

    #[test]
    fn test_dead_snake_searches_to_loss() {
        let state = GameState::new(board(5, 5), SnakeId(1))
            .with_snake(Snake::dead(SnakeId(1), 3))
            .with_snake(snake(2, &[(1, 1)], Move::Up));
        let result = engine()
            .search(&state, SnakeId(1), 3, &Deadline::unlimited())
            .unwrap();
        assert_eq!(result.score, LOSS);
    }

    #[test]
    fn test_later_death_is_preferred() {
        // Every line dies, but the dead-end corridor below dies later than
        // the wall or the stone.
        let board = board(3, 4).with_stones([
            Cell::new(2, 0),
            Cell::new(0, 1),
            Cell::new(0, 2),
            Cell::new(0, 3),
            Cell::new(2, 1),
            Cell::new(2, 2),
            Cell::new(2, 3),
        ]);
        let state = GameState::new(board, SnakeId(1))
            .with_snake(snake(1, &[(1, 0), (0, 0)], Move::Right));
        let result = engine()
            .search(&state, SnakeId(1), 4, &Deadline::unlimited())
            .unwrap();
        assert_eq!(result.best_move, Move::Down);
        assert_eq!(result.score, LOSS + 4.0);
    }

    #[test]
    fn test_food_now_beats_food_at_horizon() {
        // Right eats at once; up, right, down eats on the third tick.
        let state = GameState::new(board(7, 7), SnakeId(1))
            .with_snake(snake(1, &[(2, 3), (1, 3)], Move::Right))
            .with_food(Cell::new(3, 3), 1);
        let result = engine()
            .search(&state, SnakeId(1), 3, &Deadline::unlimited())
            .unwrap();
        assert_eq!(result.best_move, Move::Right);
        assert_eq!(result.principal_variation[0], Move::Right);
    }

    #[test]
    fn test_ties_follow_configured_order() {
        let order = [Move::Left, Move::Down, Move::Right, Move::Up];
        let state = GameState::new(board(9, 9), SnakeId(1))
            .with_snake(snake(1, &[(4, 4)], Move::Up));
        let engine = SearchEngine::new(Evaluator::new(Weights::default(), order), order);
        let result = engine
            .search(&state, SnakeId(1), 1, &Deadline::unlimited())
            .unwrap();
        assert_eq!(result.best_move, Move::Left);
        assert_eq!(greedy_move(&state, SnakeId(1), order), Move::Left);
    }

    #[test]
    fn test_pruning_preserves_result() {
        let state = duel();
        for depth in 1..=3 {
            let pruned = engine()
                .search(&state, SnakeId(1), depth, &Deadline::unlimited())
                .unwrap();
            let full = engine()
                .with_pruning(false)
                .search(&state, SnakeId(1), depth, &Deadline::unlimited())
                .unwrap();
            assert_eq!(pruned.best_move, full.best_move, "depth {depth}");
            assert_eq!(pruned.score, full.score, "depth {depth}");
        }
    }

    #[test]
    fn test_pruning_visits_fewer_nodes() {
        let state = duel();
        let pruned = Deadline::unlimited();
        let full = Deadline::unlimited();
        engine().search(&state, SnakeId(1), 3, &pruned).unwrap();
        engine()
            .with_pruning(false)
            .search(&state, SnakeId(1), 3, &full)
            .unwrap();
        assert!(pruned.nodes() <= full.nodes());
    }

    #[test]
    fn test_parallel_root_matches_sequential() {
        let state = duel();
        let sequential = engine()
            .search(&state, SnakeId(1), 3, &Deadline::unlimited())
            .unwrap();
        let parallel = engine()
            .with_parallel_root(true)
            .search(&state, SnakeId(1), 3, &Deadline::unlimited())
            .unwrap();
        assert_eq!(parallel.best_move, sequential.best_move);
        assert_eq!(parallel.score, sequential.score);
    }

    #[test]
    fn test_node_limit_aborts_search() {
        let deadline = Deadline::unlimited().with_node_limit(10);
        let result = engine().search(&duel(), SnakeId(1), 4, &deadline);
        assert_eq!(result, Err(SearchTimeout));
        assert!(deadline.is_expired());
    }

    #[test]
    fn test_past_deadline_aborts_search() {
        let deadline = Deadline::at(Instant::now());
        let result = engine().search(&duel(), SnakeId(1), 1, &deadline);
        assert_eq!(result, Err(SearchTimeout));
    }

    #[test]
    fn test_greedy_model_gives_one_reply() {
        let state = duel();
        let greedy = engine().with_opponent_model(OpponentModel::Greedy);
        assert_eq!(greedy.replies(&state, SnakeId(1)).len(), 1);
        assert_eq!(engine().replies(&state, SnakeId(1)).len(), 3);

        let result = greedy
            .search(&state, SnakeId(1), 3, &Deadline::unlimited())
            .unwrap();
        assert!(state.legal_moves(SnakeId(1)).contains(&result.best_move));
    }

    #[test]
    fn test_greedy_move_heads_for_food() {
        let state = GameState::new(board(6, 6), SnakeId(1))
            .with_snake(snake(1, &[(2, 2), (2, 3)], Move::Up))
            .with_food(Cell::new(5, 2), 1);
        assert_eq!(greedy_move(&state, SnakeId(1), Move::ALL), Move::Right);
    }

    #[test]
    fn test_greedy_move_avoids_crash() {
        let state = GameState::new(board(6, 6), SnakeId(1))
            .with_snake(snake(1, &[(0, 2), (1, 2)], Move::Left))
            .with_food(Cell::new(0, 0), 1);
        // Up leads to the food; left is the wall.
        assert_eq!(greedy_move(&state, SnakeId(1), Move::ALL), Move::Up);

        let state = GameState::new(board(6, 6), SnakeId(1))
            .with_snake(snake(1, &[(0, 0), (1, 0)], Move::Left))
            .with_snake(snake(2, &[(1, 1), (0, 1), (0, 2)], Move::Right));
        // Only moves are the wall or the other snake's neck.
        assert_eq!(greedy_move(&state, SnakeId(1), Move::ALL), Move::Left);
    }
}
