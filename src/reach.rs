use crate::game::{Board, Cell, GameState, Move};
use std::collections::VecDeque;

/// Breadth-first walk over free cells, yielding `(cell, distance)` lazily in
/// visit order.
///
/// Live bodies and stones are walls; the origin is always entered even when a
/// body covers it (it is usually the head). Ties between cells at the same
/// distance go to whichever was enqueued first, which follows `order` for the
/// neighbours of each expanded cell.
pub struct Bfs<'a> {
    board: &'a Board,
    order: [Move; 4],
    seen: Vec<bool>,
    queue: VecDeque<(Cell, u32)>,
}

impl<'a> Bfs<'a> {
    pub fn new(state: &'a GameState, from: Cell, order: [Move; 4]) -> Self {
        let board = state.board();
        let mut seen = state.occupancy();
        let mut queue = VecDeque::new();
        if board.contains(from) {
            seen[board.index(from)] = true;
            queue.push_back((from, 0));
        }
        Bfs {
            board,
            order,
            seen,
            queue,
        }
    }
}

impl Iterator for Bfs<'_> {
    type Item = (Cell, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let (cell, distance) = self.queue.pop_front()?;
        for (_, next) in self.board.neighbors(cell, &self.order) {
            let index = self.board.index(next);
            if !self.seen[index] {
                self.seen[index] = true;
                self.queue.push_back((next, distance + 1));
            }
        }
        Some((cell, distance))
    }
}

/// Everything one BFS from a cell tells us.
#[derive(Debug, Clone)]
pub struct Reachability {
    width: i32,
    height: i32,
    distances: Vec<Option<u32>>,
    visited: Vec<(Cell, u32)>,
    nearest_food: Option<(Cell, u32)>,
}

impl Reachability {
    /// Shortest path length to `cell`, if it is in the same free region.
    pub fn distance_to(&self, cell: Cell) -> Option<u32> {
        if cell.x < 0 || cell.x >= self.width || cell.y < 0 || cell.y >= self.height {
            return None;
        }
        self.distances[(cell.y * self.width + cell.x) as usize]
    }

    /// Number of cells in the region, origin included.
    pub fn component_size(&self) -> usize {
        self.visited.len()
    }

    /// Closest food and its distance; the first one reached wins ties.
    pub fn nearest_food(&self) -> Option<(Cell, u32)> {
        self.nearest_food
    }

    /// Visited cells with their distances, in BFS order.
    pub fn distances(&self) -> impl Iterator<Item = (Cell, u32)> + '_ {
        self.visited.iter().copied()
    }
}

/// Run a full BFS from `from` over the current position.
pub fn reachable(state: &GameState, from: Cell, order: [Move; 4]) -> Reachability {
    let board = state.board();
    let mut distances = vec![None; board.cell_count()];
    let mut visited = Vec::new();
    let mut nearest_food = None;

    for (cell, distance) in Bfs::new(state, from, order) {
        distances[board.index(cell)] = Some(distance);
        visited.push((cell, distance));
        if nearest_food.is_none() && state.food_at(cell).is_some() {
            nearest_food = Some((cell, distance));
        }
    }

    Reachability {
        width: board.width(),
        height: board.height(),
        distances,
        visited,
        nearest_food,
    }
}

/// Number of free cells on the board.
pub fn free_cells(state: &GameState) -> usize {
    state.occupancy().iter().filter(|&&blocked| !blocked).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Board, Rules, Snake, SnakeId};

    const ORDER: [Move; 4] = Move::ALL;

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
    fn test_open_board_reaches_everything() {
        let state = GameState::new(board(5, 4), SnakeId(1))
            .with_snake(snake(1, &[(0, 0)], Move::Right));
        let reach = reachable(&state, Cell::new(0, 0), ORDER);
        assert_eq!(reach.component_size(), 20);
        assert_eq!(reach.distance_to(Cell::new(4, 3)), Some(7));
        assert_eq!(reach.distance_to(Cell::new(0, 0)), Some(0));
        assert_eq!(reach.nearest_food(), None);
    }

    #[test]
    fn test_bodies_block_and_component_is_bounded() {
        // Wall of snake 2 splits the board in two.
        let state = GameState::new(board(5, 3), SnakeId(1))
            .with_snake(snake(1, &[(0, 1), (0, 2)], Move::Up))
            .with_snake(snake(2, &[(2, 0), (2, 1), (2, 2)], Move::Up));
        let reach = reachable(&state, Cell::new(0, 1), ORDER);
        // Origin plus (0,0), (1,0), (1,1), (1,2); (0,2) is our own body.
        assert_eq!(reach.component_size(), 5);
        assert_eq!(reach.distance_to(Cell::new(3, 0)), None);
        assert!(reach.component_size() <= free_cells(&state) + 1);
    }

    #[test]
    fn test_enclosed_head_has_component_of_one() {
        let state = GameState::new(board(3, 3), SnakeId(1))
            .with_snake(snake(
                1,
                &[(1, 1), (1, 0), (0, 0), (0, 1), (0, 2), (1, 2), (2, 2), (2, 1)],
                Move::Down,
            ))
            .with_food(Cell::new(2, 0), 1);
        let reach = reachable(&state, Cell::new(1, 1), ORDER);
        assert_eq!(reach.component_size(), 1);
        assert_eq!(reach.nearest_food(), None);
    }

    #[test]
    fn test_nearest_food_tie_break_follows_neighbor_order() {
        let state = GameState::new(board(5, 5), SnakeId(1))
            .with_snake(snake(1, &[(2, 2)], Move::Up))
            .with_food(Cell::new(2, 0), 1)
            .with_food(Cell::new(4, 2), 1)
            .with_food(Cell::new(0, 2), 1);

        let reach = reachable(&state, Cell::new(2, 2), ORDER);
        assert_eq!(reach.nearest_food(), Some((Cell::new(2, 0), 2)));

        let reach = reachable(
            &state,
            Cell::new(2, 2),
            [Move::Left, Move::Down, Move::Right, Move::Up],
        );
        assert_eq!(reach.nearest_food(), Some((Cell::new(0, 2), 2)));
    }

    #[test]
    fn test_bfs_is_lazy_and_ordered() {
        let state = GameState::new(board(3, 3), SnakeId(1))
            .with_snake(snake(1, &[(1, 1)], Move::Up));
        let first: Vec<_> = Bfs::new(&state, Cell::new(1, 1), ORDER).take(5).collect();
        assert_eq!(
            first,
            vec![
                (Cell::new(1, 1), 0),
                (Cell::new(1, 0), 1),
                (Cell::new(2, 1), 1),
                (Cell::new(1, 2), 1),
                (Cell::new(0, 1), 1),
            ]
        );
    }

    #[test]
    fn test_wrap_shortens_paths() {
        let rules = Rules {
            wrap: true,
            ..Rules::default()
        };
        let state = GameState::new(Board::new(6, 1, rules), SnakeId(1))
            .with_snake(snake(1, &[(0, 0)], Move::Left))
            .with_food(Cell::new(5, 0), 1);
        let reach = reachable(&state, Cell::new(0, 0), ORDER);
        assert_eq!(reach.nearest_food(), Some((Cell::new(5, 0), 1)));
    }
}
