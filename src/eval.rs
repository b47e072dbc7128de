use crate::game::{GameState, Move, SnakeId};
use crate::reach::reachable;
use serde::{Deserialize, Serialize};

/// Score of a position where the snake is dead.
pub const LOSS: f64 = -1.0e9;
/// Score of a position where the snake is the last one alive.
pub const WIN: f64 = 1.0e9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    /// Multiplies `1 / (distance + 1)` to the nearest reachable food.
    pub food: f64,
    /// Per free cell reachable from the head.
    pub space: f64,
    /// Per body segment.
    pub length: f64,
    /// Per point of score.
    pub score: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            food: 10.0,
            space: 1.0,
            length: 20.0,
            score: 1.0,
        }
    }
}

/// Terminal value of `state` for `id`, if the game is decided for it.
/// A game without rivals is never won, only lost.
pub fn outcome(state: &GameState, id: SnakeId) -> Option<f64> {
    if !state.is_alive(id) {
        return Some(LOSS);
    }
    if state.has_rivals(id) && state.live_rivals(id).next().is_none() {
        return Some(WIN);
    }
    None
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    weights: Weights,
    order: [Move; 4],
}

impl Evaluator {
    pub fn new(weights: Weights, order: [Move; 4]) -> Self {
        Evaluator { weights, order }
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Higher is better for `id`.
    pub fn score(&self, state: &GameState, id: SnakeId) -> f64 {
        if let Some(decided) = outcome(state, id) {
            return decided;
        }
        let Some(snake) = state.snake(id) else {
            return LOSS;
        };
        let Some(head) = snake.head() else {
            return LOSS;
        };

        let reach = reachable(state, head, self.order);
        let food = reach
            .nearest_food()
            .map_or(0.0, |(_, distance)| 1.0 / (distance as f64 + 1.0));

        self.weights.food * food
            + self.weights.space * reach.component_size() as f64
            + self.weights.length * snake.len() as f64
            + self.weights.score * snake.score() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Board, Cell, Rules, Snake};

    fn evaluator() -> Evaluator {
        Evaluator::new(Weights::default(), Move::ALL)
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

    #[test]
    fn test_dead_snake_scores_loss() {
        let state = GameState::new(board(4, 4), SnakeId(1))
            .with_snake(Snake::dead(SnakeId(1), 50))
            .with_snake(snake(2, &[(1, 1)], Move::Up));
        assert_eq!(evaluator().score(&state, SnakeId(1)), LOSS);
    }

    #[test]
    fn test_last_snake_standing_scores_win() {
        let state = GameState::new(board(4, 4), SnakeId(1))
            .with_snake(snake(1, &[(1, 1)], Move::Up))
            .with_snake(Snake::dead(SnakeId(2), 0));
        assert_eq!(evaluator().score(&state, SnakeId(1)), WIN);
    }

    #[test]
    fn test_alone_on_board_is_not_a_win() {
        let state = GameState::new(board(4, 4), SnakeId(1))
            .with_snake(snake(1, &[(1, 1)], Move::Up));
        let score = evaluator().score(&state, SnakeId(1));
        assert!(score > LOSS && score < WIN);
    }

    #[test]
    fn test_closer_food_scores_higher() {
        let near = GameState::new(board(6, 6), SnakeId(1))
            .with_snake(snake(1, &[(2, 2)], Move::Up))
            .with_food(Cell::new(2, 1), 1);
        let far = GameState::new(board(6, 6), SnakeId(1))
            .with_snake(snake(1, &[(2, 2)], Move::Up))
            .with_food(Cell::new(5, 5), 1);
        let e = evaluator();
        assert!(e.score(&near, SnakeId(1)) > e.score(&far, SnakeId(1)));
    }

    #[test]
    fn test_dead_end_scores_below_open_space() {
        // Same snake, head either sealed in a pocket or out in the open.
        let sealed = GameState::new(board(4, 4), SnakeId(1))
            .with_snake(snake(1, &[(0, 0), (1, 0), (1, 1), (0, 1)], Move::Left));
        let open = GameState::new(board(4, 4), SnakeId(1))
            .with_snake(snake(1, &[(2, 0), (1, 0), (1, 1), (0, 1)], Move::Right));
        let e = evaluator();
        assert!(e.score(&sealed, SnakeId(1)) < e.score(&open, SnakeId(1)));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let state = GameState::new(board(7, 7), SnakeId(1))
            .with_snake(snake(1, &[(3, 3), (3, 4)], Move::Up))
            .with_snake(snake(2, &[(5, 5), (5, 6)], Move::Up))
            .with_food(Cell::new(0, 0), 2);
        let e = evaluator();
        assert_eq!(e.score(&state, SnakeId(1)), e.score(&state, SnakeId(1)));
    }
}
