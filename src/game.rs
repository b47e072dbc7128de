use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A square on the board. `y` grows downwards, matching the server's row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Cell { x, y }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Absolute direction of travel for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Move {
    Up,
    Right,
    Down,
    Left,
}

impl Move {
    /// Clockwise, starting at `Up`. This is also the default BFS neighbour order.
    pub const ALL: [Move; 4] = [Move::Up, Move::Right, Move::Down, Move::Left];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Move::Up => (0, -1),
            Move::Right => (1, 0),
            Move::Down => (0, 1),
            Move::Left => (-1, 0),
        }
    }

    pub fn opposite(self) -> Move {
        match self {
            Move::Up => Move::Down,
            Move::Right => Move::Left,
            Move::Down => Move::Up,
            Move::Left => Move::Right,
        }
    }

    /// Direction reached by turning relative to `self` as the current facing.
    pub fn turn(self, turn: Turn) -> Move {
        match turn {
            Turn::Straight => self,
            Turn::Right => match self {
                Move::Up => Move::Right,
                Move::Right => Move::Down,
                Move::Down => Move::Left,
                Move::Left => Move::Up,
            },
            Turn::Left => match self {
                Move::Up => Move::Left,
                Move::Left => Move::Down,
                Move::Down => Move::Right,
                Move::Right => Move::Up,
            },
        }
    }

    /// The turn that takes a snake facing `facing` onto `self`.
    /// `None` for a reversal, which has no turn-relative spelling.
    pub fn turn_from(self, facing: Move) -> Option<Turn> {
        [Turn::Left, Turn::Straight, Turn::Right]
            .into_iter()
            .find(|&turn| facing.turn(turn) == self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Move::Up => "up",
            Move::Right => "right",
            Move::Down => "down",
            Move::Left => "left",
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    Left,
    Straight,
    Right,
}

/// Snake identity. On the wire this is the snake's colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnakeId(pub u8);

impl fmt::Display for SnakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snake {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    /// Leaving one edge re-enters on the opposite edge instead of killing.
    pub wrap: bool,
    /// Points awarded to a snake whose body another snake crashed into.
    pub kill_bonus: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            wrap: false,
            kill_bonus: 1000,
        }
    }
}

/// Static part of a game: dimensions, rules and stones.
/// Stones are shared between all states of a game since nothing ever moves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: i32,
    height: i32,
    rules: Rules,
    stones: Arc<BTreeSet<Cell>>,
}

impl Board {
    pub fn new(width: usize, height: usize, rules: Rules) -> Self {
        Board {
            width: width as i32,
            height: height as i32,
            rules,
            stones: Arc::new(BTreeSet::new()),
        }
    }

    pub fn with_stones(mut self, stones: impl IntoIterator<Item = Cell>) -> Self {
        let mut all = (*self.stones).clone();
        all.extend(stones);
        self.stones = Arc::new(all);
        self
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn rules(&self) -> Rules {
        self.rules
    }

    pub fn wraps(&self) -> bool {
        self.rules.wrap
    }

    pub fn cell_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height
    }

    /// Row-major index of an on-board cell.
    pub fn index(&self, cell: Cell) -> usize {
        (cell.y * self.width + cell.x) as usize
    }

    pub fn cell_at(&self, index: usize) -> Cell {
        let index = index as i32;
        Cell::new(index % self.width, index / self.width)
    }

    /// The cell one step away in `mv`, or `None` when that leaves a walled board.
    pub fn step(&self, cell: Cell, mv: Move) -> Option<Cell> {
        let (dx, dy) = mv.delta();
        let next = Cell::new(cell.x + dx, cell.y + dy);
        if self.rules.wrap {
            Some(Cell::new(
                next.x.rem_euclid(self.width),
                next.y.rem_euclid(self.height),
            ))
        } else if self.contains(next) {
            Some(next)
        } else {
            None
        }
    }

    /// On-board neighbours of `cell` in the given order.
    pub fn neighbors<'a>(
        &'a self,
        cell: Cell,
        order: &'a [Move; 4],
    ) -> impl Iterator<Item = (Move, Cell)> + 'a {
        order
            .iter()
            .filter_map(move |&mv| self.step(cell, mv).map(|next| (mv, next)))
    }

    /// Direction leading from `from` to the adjacent `to`, honouring wrap-around.
    pub fn direction_between(&self, from: Cell, to: Cell) -> Option<Move> {
        Move::ALL
            .into_iter()
            .find(|&mv| self.step(from, mv) == Some(to))
    }

    pub fn is_stone(&self, cell: Cell) -> bool {
        self.stones.contains(&cell)
    }

    pub fn stones(&self) -> impl Iterator<Item = &Cell> {
        self.stones.iter()
    }
}

/// A snake's body, head first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    pub(crate) id: SnakeId,
    pub(crate) body: VecDeque<Cell>,
    pub(crate) facing: Move,
    pub(crate) alive: bool,
    pub(crate) score: u32,
}

impl Snake {
    pub fn new(id: SnakeId, body: impl IntoIterator<Item = Cell>, facing: Move) -> Self {
        Snake {
            id,
            body: body.into_iter().collect(),
            facing,
            alive: true,
            score: 0,
        }
    }

    pub fn with_score(mut self, score: u32) -> Self {
        self.score = score;
        self
    }

    /// A snake that is already out of the game.
    pub fn dead(id: SnakeId, score: u32) -> Self {
        Snake {
            id,
            body: VecDeque::new(),
            facing: Move::Up,
            alive: false,
            score,
        }
    }

    pub fn id(&self) -> SnakeId {
        self.id
    }

    pub fn body(&self) -> &VecDeque<Cell> {
        &self.body
    }

    pub fn head(&self) -> Option<Cell> {
        self.body.front().copied()
    }

    pub fn neck(&self) -> Option<Cell> {
        self.body.get(1).copied()
    }

    pub fn tail(&self) -> Option<Cell> {
        self.body.back().copied()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn facing(&self) -> Move {
        self.facing
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub(crate) fn kill(&mut self) {
        self.alive = false;
        self.body.clear();
    }
}

/// Broken model invariants. Seeing one of these means the state was built or
/// advanced incorrectly; nothing repairs it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{cell} lies outside the {width}x{height} board")]
    OutOfBounds { cell: Cell, width: i32, height: i32 },
    #[error("{snake} is alive with an empty body")]
    EmptyBody { snake: SnakeId },
    #[error("{snake} visits {cell} twice")]
    DuplicateBodyCell { snake: SnakeId, cell: Cell },
    #[error("{snake} body jumps from {from} to {to}")]
    DisconnectedBody { snake: SnakeId, from: Cell, to: Cell },
    #[error("{first} and {second} both occupy {cell}")]
    SnakesOverlap {
        first: SnakeId,
        second: SnakeId,
        cell: Cell,
    },
    #[error("{snake} lies on the stone at {cell}")]
    SnakeOnStone { snake: SnakeId, cell: Cell },
    #[error("food at {cell} lies under {snake}")]
    FoodUnderSnake { cell: Cell, snake: SnakeId },
    #[error("food at {cell} lies on a stone")]
    FoodOnStone { cell: Cell },
    #[error("perspective {0} is not part of the game")]
    UnknownPerspective(SnakeId),
}

/// One tick's snapshot. States are never edited once built: `advance` returns a
/// fresh state, so older states stay valid for backtracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub(crate) board: Board,
    pub(crate) snakes: BTreeMap<SnakeId, Snake>,
    pub(crate) food: BTreeMap<Cell, u32>,
    pub(crate) frame: u64,
    pub(crate) me: SnakeId,
}

impl GameState {
    pub fn new(board: Board, me: SnakeId) -> Self {
        GameState {
            board,
            snakes: BTreeMap::new(),
            food: BTreeMap::new(),
            frame: 0,
            me,
        }
    }

    pub fn with_snake(mut self, snake: Snake) -> Self {
        self.snakes.insert(snake.id, snake);
        self
    }

    pub fn with_food(mut self, cell: Cell, value: u32) -> Self {
        self.food.insert(cell, value);
        self
    }

    pub fn with_frame(mut self, frame: u64) -> Self {
        self.frame = frame;
        self
    }

    /// The same position seen by another snake.
    pub fn with_perspective(&self, me: SnakeId) -> GameState {
        GameState {
            me,
            ..self.clone()
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn me(&self) -> SnakeId {
        self.me
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn snake(&self, id: SnakeId) -> Option<&Snake> {
        self.snakes.get(&id)
    }

    pub fn my_snake(&self) -> Option<&Snake> {
        self.snakes.get(&self.me)
    }

    /// All snakes, dead ones included, in id order.
    pub fn snakes(&self) -> impl Iterator<Item = &Snake> {
        self.snakes.values()
    }

    pub fn live_snakes(&self) -> impl Iterator<Item = &Snake> {
        self.snakes.values().filter(|s| s.alive)
    }

    pub fn is_alive(&self, id: SnakeId) -> bool {
        self.snakes.get(&id).is_some_and(|s| s.alive)
    }

    pub fn has_rivals(&self, id: SnakeId) -> bool {
        self.snakes.keys().any(|&other| other != id)
    }

    pub fn live_rivals(&self, id: SnakeId) -> impl Iterator<Item = &Snake> {
        self.live_snakes().filter(move |s| s.id != id)
    }

    pub fn food(&self) -> &BTreeMap<Cell, u32> {
        &self.food
    }

    pub fn food_at(&self, cell: Cell) -> Option<u32> {
        self.food.get(&cell).copied()
    }

    /// Blocked cells indexed by `Board::index`: stones and every live body cell.
    pub fn occupancy(&self) -> Vec<bool> {
        let mut blocked = vec![false; self.board.cell_count()];
        for &stone in self.board.stones() {
            if self.board.contains(stone) {
                blocked[self.board.index(stone)] = true;
            }
        }
        for snake in self.live_snakes() {
            for &cell in &snake.body {
                blocked[self.board.index(cell)] = true;
            }
        }
        blocked
    }

    /// Moves a snake may choose: everything except reversing into its neck.
    pub fn legal_moves(&self, id: SnakeId) -> Vec<Move> {
        self.legal_moves_in(id, Move::ALL)
    }

    /// `legal_moves` listed in `order`.
    pub fn legal_moves_in(&self, id: SnakeId, order: [Move; 4]) -> Vec<Move> {
        let Some(snake) = self.snakes.get(&id).filter(|s| s.alive) else {
            return Vec::new();
        };
        let (Some(head), neck) = (snake.head(), snake.neck()) else {
            return Vec::new();
        };
        order
            .into_iter()
            .filter(|&mv| neck.is_none() || self.board.step(head, mv) != neck)
            .collect()
    }

    /// Whether `mv` runs straight into a wall, stone or body next tick,
    /// regardless of what the other snakes do. Our own tail moves away; a
    /// rival's tail only does when the rival has no food next to its head.
    pub fn is_immediately_fatal(&self, id: SnakeId, mv: Move) -> bool {
        let Some(head) = self.snake(id).and_then(Snake::head) else {
            return true;
        };
        let Some(target) = self.board.step(head, mv) else {
            return true;
        };
        if self.board.is_stone(target) {
            return true;
        }
        self.live_snakes().any(|snake| {
            let tail_stays = snake.id != id && self.may_eat(snake);
            let last = snake.len().saturating_sub(1);
            snake
                .body
                .iter()
                .enumerate()
                .any(|(i, &cell)| cell == target && (i != last || tail_stays))
        })
    }

    fn may_eat(&self, snake: &Snake) -> bool {
        snake.head().is_some_and(|head| {
            self.board
                .neighbors(head, &Move::ALL)
                .any(|(_, cell)| self.food_at(cell).is_some())
        })
    }

    /// Check every model invariant.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if !self.snakes.contains_key(&self.me) {
            return Err(InvariantViolation::UnknownPerspective(self.me));
        }

        let mut owners: BTreeMap<Cell, SnakeId> = BTreeMap::new();
        for snake in self.live_snakes() {
            if snake.body.is_empty() {
                return Err(InvariantViolation::EmptyBody { snake: snake.id });
            }
            let mut previous: Option<Cell> = None;
            for &cell in &snake.body {
                self.check_bounds(cell)?;
                if self.board.is_stone(cell) {
                    return Err(InvariantViolation::SnakeOnStone {
                        snake: snake.id,
                        cell,
                    });
                }
                if let Some(from) = previous {
                    if self.board.direction_between(from, cell).is_none() {
                        return Err(InvariantViolation::DisconnectedBody {
                            snake: snake.id,
                            from,
                            to: cell,
                        });
                    }
                }
                previous = Some(cell);

                match owners.insert(cell, snake.id) {
                    Some(owner) if owner == snake.id => {
                        return Err(InvariantViolation::DuplicateBodyCell {
                            snake: snake.id,
                            cell,
                        });
                    }
                    Some(owner) => {
                        return Err(InvariantViolation::SnakesOverlap {
                            first: owner,
                            second: snake.id,
                            cell,
                        });
                    }
                    None => {}
                }
            }
        }

        for &cell in self.food.keys() {
            self.check_bounds(cell)?;
            if let Some(&snake) = owners.get(&cell) {
                return Err(InvariantViolation::FoodUnderSnake { cell, snake });
            }
            if self.board.is_stone(cell) {
                return Err(InvariantViolation::FoodOnStone { cell });
            }
        }

        Ok(())
    }

    fn check_bounds(&self, cell: Cell) -> Result<(), InvariantViolation> {
        if self.board.contains(cell) {
            Ok(())
        } else {
            Err(InvariantViolation::OutOfBounds {
                cell,
                width: self.board.width,
                height: self.board.height,
            })
        }
    }

    /// Render the state in the two-characters-per-cell world encoding that
    /// `observe` reads.
    pub fn to_rows(&self) -> Vec<String> {
        let width = self.board.width as usize;
        let height = self.board.height as usize;
        let mut grid = vec![vec![(' ', 0u8); width]; height];

        for &stone in self.board.stones() {
            if self.board.contains(stone) {
                grid[stone.y as usize][stone.x as usize] = ('#', 0);
            }
        }
        for (&cell, &value) in &self.food {
            let digit = char::from_digit(value.clamp(1, 9), 10).unwrap_or('1');
            grid[cell.y as usize][cell.x as usize] = (digit, 0);
        }
        for snake in self.live_snakes() {
            let last = snake.len().saturating_sub(1);
            for (i, &cell) in snake.body.iter().enumerate() {
                let ch = match i {
                    0 => '@',
                    i if i == last => '$',
                    _ => '*',
                };
                grid[cell.y as usize][cell.x as usize] = (ch, snake.id.0);
            }
        }

        grid.into_iter()
            .map(|row| {
                row.into_iter()
                    .flat_map(|(ch, color)| {
                        let color = match color {
                            1..=9 => char::from(b'0' + color),
                            _ => ' ',
                        };
                        [ch, color]
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_board(size: usize) -> Board {
        Board::new(size, size, Rules::default())
    }

    fn line_snake(id: u8, cells: &[(i32, i32)], facing: Move) -> Snake {
        Snake::new(
            SnakeId(id),
            cells.iter().map(|&(x, y)| Cell::new(x, y)),
            facing,
        )
    }

    #[test]
    fn test_step_stops_at_walls() {
        let board = open_board(4);
        assert_eq!(board.step(Cell::new(0, 0), Move::Up), None);
        assert_eq!(board.step(Cell::new(0, 0), Move::Left), None);
        assert_eq!(board.step(Cell::new(0, 0), Move::Right), Some(Cell::new(1, 0)));
        assert_eq!(board.step(Cell::new(3, 3), Move::Down), None);
    }

    #[test]
    fn test_step_wraps_when_enabled() {
        let board = Board::new(
            4,
            3,
            Rules {
                wrap: true,
                ..Rules::default()
            },
        );
        assert_eq!(board.step(Cell::new(0, 0), Move::Up), Some(Cell::new(0, 2)));
        assert_eq!(board.step(Cell::new(3, 1), Move::Right), Some(Cell::new(0, 1)));
        assert_eq!(
            board.direction_between(Cell::new(0, 1), Cell::new(3, 1)),
            Some(Move::Left)
        );
    }

    #[test]
    fn test_turns_are_relative_to_facing() {
        assert_eq!(Move::Up.turn(Turn::Right), Move::Right);
        assert_eq!(Move::Left.turn(Turn::Left), Move::Down);
        assert_eq!(Move::Down.turn(Turn::Straight), Move::Down);
        assert_eq!(Move::Right.turn_from(Move::Up), Some(Turn::Right));
        assert_eq!(Move::Down.turn_from(Move::Up), None);
    }

    #[test]
    fn test_legal_moves_exclude_neck() {
        let state = GameState::new(open_board(5), SnakeId(1)).with_snake(line_snake(
            1,
            &[(2, 2), (1, 2), (0, 2)],
            Move::Right,
        ));
        assert_eq!(
            state.legal_moves(SnakeId(1)),
            vec![Move::Up, Move::Right, Move::Down]
        );
    }

    #[test]
    fn test_single_cell_snake_may_go_anywhere() {
        let state = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(2, 2)], Move::Up));
        assert_eq!(state.legal_moves(SnakeId(1)), Move::ALL.to_vec());
    }

    #[test]
    fn test_immediately_fatal_moves() {
        let state = GameState::new(open_board(4), SnakeId(1))
            .with_snake(line_snake(1, &[(0, 1), (1, 1), (1, 2)], Move::Left))
            .with_snake(line_snake(2, &[(0, 3), (1, 3), (2, 3)], Move::Left));
        // Wall.
        assert!(state.is_immediately_fatal(SnakeId(1), Move::Left));
        // Own neck.
        assert!(state.is_immediately_fatal(SnakeId(1), Move::Right));
        assert!(!state.is_immediately_fatal(SnakeId(1), Move::Up));
        assert!(!state.is_immediately_fatal(SnakeId(1), Move::Down));
    }

    #[test]
    fn test_legal_moves_follow_order() {
        let state = GameState::new(open_board(5), SnakeId(1)).with_snake(line_snake(
            1,
            &[(2, 2), (1, 2)],
            Move::Right,
        ));
        assert_eq!(
            state.legal_moves_in(SnakeId(1), [Move::Left, Move::Down, Move::Right, Move::Up]),
            vec![Move::Down, Move::Right, Move::Up]
        );
    }

    #[test]
    fn test_tail_next_to_food_blocks() {
        let state = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(1, 1), (0, 1)], Move::Right))
            .with_snake(line_snake(2, &[(3, 2), (3, 1), (2, 1)], Move::Down));
        // The rival's tail moves on when it cannot eat.
        assert!(!state.is_immediately_fatal(SnakeId(1), Move::Right));

        let hungry = state.clone().with_food(Cell::new(4, 2), 1);
        assert!(hungry.is_immediately_fatal(SnakeId(1), Move::Right));
    }

    #[test]
    fn test_validate_accepts_consistent_state() {
        let state = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(2, 2), (1, 2), (0, 2)], Move::Right))
            .with_food(Cell::new(4, 4), 1);
        assert_eq!(state.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_duplicate_body_cell() {
        let state = GameState::new(open_board(5), SnakeId(1)).with_snake(line_snake(
            1,
            &[(2, 2), (1, 2), (2, 2)],
            Move::Right,
        ));
        assert_eq!(
            state.validate(),
            Err(InvariantViolation::DuplicateBodyCell {
                snake: SnakeId(1),
                cell: Cell::new(2, 2)
            })
        );
    }

    #[test]
    fn test_validate_rejects_food_under_snake() {
        let state = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(2, 2), (1, 2)], Move::Right))
            .with_food(Cell::new(1, 2), 3);
        assert!(matches!(
            state.validate(),
            Err(InvariantViolation::FoodUnderSnake { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overlap_and_gaps() {
        let overlap = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(2, 2), (1, 2)], Move::Right))
            .with_snake(line_snake(2, &[(1, 1), (1, 2)], Move::Up));
        assert!(matches!(
            overlap.validate(),
            Err(InvariantViolation::SnakesOverlap { .. })
        ));

        let gap = GameState::new(open_board(5), SnakeId(1))
            .with_snake(line_snake(1, &[(3, 3), (1, 3)], Move::Right));
        assert!(matches!(
            gap.validate(),
            Err(InvariantViolation::DisconnectedBody { .. })
        ));
    }

    #[test]
    fn test_rows_rendering() {
        let board = Board::new(4, 3, Rules::default()).with_stones([Cell::new(0, 2)]);
        let state = GameState::new(board, SnakeId(1))
            .with_snake(line_snake(1, &[(3, 1), (2, 1), (1, 1)], Move::Right))
            .with_food(Cell::new(3, 2), 2);
        assert_eq!(
            state.to_rows(),
            vec!["        ", "  $1*1@1", "#     2 "]
        );
    }
}
