use crate::game::{Board, Cell, GameState, Move, Snake, SnakeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One move per snake for a single tick. Snakes without an entry keep going
/// the way they face.
pub type JointMove = BTreeMap<SnakeId, Move>;

struct Plan {
    id: SnakeId,
    mv: Move,
    target: Option<Cell>,
}

/// Advance the game by one tick with every live snake moving at once.
///
/// Resolution is simultaneous and order independent:
/// - a reversal into the neck is replaced by continuing straight;
/// - a snake dies when its new head leaves a walled board, enters a stone,
///   enters a cell another new head also enters (all of them die), or enters
///   any live body cell that is still occupied after this tick's tails move;
/// - a tail stays put only when its snake is heading onto food;
/// - survivors on food eat it (score += value, grow by one), others drop the tail;
/// - dead snakes leave the board immediately and leave nothing behind.
///
/// The input state is never touched.
pub fn advance(state: &GameState, moves: &JointMove) -> GameState {
    let board = &state.board;

    let plans: Vec<Plan> = state
        .live_snakes()
        .map(|snake| {
            let requested = moves.get(&snake.id).copied().unwrap_or(snake.facing);
            let mv = resolve_move(board, snake, requested);
            let target = snake.head().and_then(|head| board.step(head, mv));
            Plan {
                id: snake.id,
                mv,
                target,
            }
        })
        .collect();

    let growing: BTreeSet<SnakeId> = plans
        .iter()
        .filter(|plan| plan.target.is_some_and(|cell| state.food.contains_key(&cell)))
        .map(|plan| plan.id)
        .collect();

    // Cells still covered by a body once the tails that move away have moved.
    let mut occupied: HashMap<Cell, SnakeId> = HashMap::new();
    for snake in state.live_snakes() {
        let last = snake.len().saturating_sub(1);
        for (i, &cell) in snake.body().iter().enumerate() {
            if i == last && !growing.contains(&snake.id) {
                continue;
            }
            occupied.insert(cell, snake.id);
        }
    }

    let mut arrivals: HashMap<Cell, usize> = HashMap::new();
    for cell in plans.iter().filter_map(|plan| plan.target) {
        *arrivals.entry(cell).or_insert(0) += 1;
    }

    let mut dead: BTreeSet<SnakeId> = BTreeSet::new();
    let mut kills: Vec<SnakeId> = Vec::new();
    for plan in &plans {
        let Some(target) = plan.target else {
            dead.insert(plan.id);
            continue;
        };
        if board.is_stone(target) || arrivals[&target] > 1 {
            dead.insert(plan.id);
            continue;
        }
        if let Some(&owner) = occupied.get(&target) {
            dead.insert(plan.id);
            if owner != plan.id {
                kills.push(owner);
            }
        }
    }

    let mut next = state.clone();
    for plan in &plans {
        let Some(snake) = next.snakes.get_mut(&plan.id) else {
            continue;
        };
        if dead.contains(&plan.id) {
            snake.kill();
            continue;
        }
        let Some(target) = plan.target else {
            continue;
        };
        snake.body.push_front(target);
        snake.facing = plan.mv;
        match next.food.remove(&target) {
            Some(value) => snake.score += value,
            None => {
                snake.body.pop_back();
            }
        }
    }

    let bonus = board.rules().kill_bonus;
    for killer in kills {
        if dead.contains(&killer) {
            continue;
        }
        if let Some(snake) = next.snakes.get_mut(&killer) {
            snake.score += bonus;
        }
    }

    next.frame += 1;

    if cfg!(debug_assertions) {
        if let Err(violation) = next.validate() {
            panic!(
                "advance produced an inconsistent state at frame {}: {}",
                next.frame, violation
            );
        }
    }

    next
}

fn resolve_move(board: &Board, snake: &Snake, requested: Move) -> Move {
    match (snake.head(), snake.neck()) {
        (Some(head), Some(neck)) if board.step(head, requested) == Some(neck) => snake.facing,
        _ => requested,
    }
}
