//! Turning a raw server frame into a [`GameState`].
//!
//! The world arrives as text rows with two characters per cell: what is on
//! the cell and the colour of the snake it belongs to. Live bodies are traced
//! from the head; the previous tick's state fills in what a single frame
//! cannot show, such as the order of a coiled body or how much was eaten.

use crate::game::{Board, Cell, GameState, InvariantViolation, Move, Rules, Snake, SnakeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// One observation as the server sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub world: Vec<String>,
    pub my_color: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<u8, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<bool>,
}

impl RawFrame {
    pub fn new(world: impl IntoIterator<Item = impl Into<String>>, my_color: u8) -> Self {
        RawFrame {
            world: world.into_iter().map(Into::into).collect(),
            my_color,
            frame: None,
            scores: BTreeMap::new(),
            wrap: None,
        }
    }

    pub fn with_frame(mut self, frame: u64) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_score(mut self, color: u8, score: u32) -> Self {
        self.scores.insert(color, score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("world has no rows")]
    EmptyWorld,
    #[error("row {row} has odd length {len}")]
    OddRow { row: usize, len: usize },
    #[error("row {row} has {len} characters, expected {expected}")]
    RaggedRow {
        row: usize,
        len: usize,
        expected: usize,
    },
    #[error("unknown cell character {ch:?} at {cell}")]
    UnknownCell { ch: char, cell: Cell },
    #[error("invalid colour {ch:?} at {cell}")]
    InvalidColor { ch: char, cell: Cell },
    #[error("snake {color} has {count} heads")]
    HeadCount { color: u8, count: usize },
    #[error("snake {color} has {count} tails")]
    TailCount { color: u8, count: usize },
    #[error("cannot trace the body of snake {color}")]
    AmbiguousBody { color: u8 },
    #[error("own snake {0} is not on the board and was never seen")]
    UnknownSnake(u8),
    #[error("board is {width}x{height}, previous frame was {previous_width}x{previous_height}")]
    BoardChanged {
        width: i32,
        height: i32,
        previous_width: i32,
        previous_height: i32,
    },
    #[error("observed state is inconsistent: {0}")]
    Inconsistent(#[from] InvariantViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Head,
    Body,
    Tail,
}

#[derive(Default)]
struct Sighting {
    heads: Vec<Cell>,
    tails: Vec<Cell>,
    cells: BTreeSet<Cell>,
}

/// Build the state for this tick.
///
/// `previous` is the state built from the last frame of the same game, if
/// any. `rules` supplies the kill bonus and the wrap default; a `wrap` flag in
/// the frame overrides the latter.
pub fn observe(
    frame: &RawFrame,
    previous: Option<&GameState>,
    rules: Rules,
) -> Result<GameState, ObservationError> {
    let rows: Vec<Vec<char>> = frame.world.iter().map(|row| row.chars().collect()).collect();
    let expected = rows.first().map(Vec::len).ok_or(ObservationError::EmptyWorld)?;
    for (row, chars) in rows.iter().enumerate() {
        if chars.len() % 2 != 0 {
            return Err(ObservationError::OddRow {
                row,
                len: chars.len(),
            });
        }
        if chars.len() != expected {
            return Err(ObservationError::RaggedRow {
                row,
                len: chars.len(),
                expected,
            });
        }
    }
    if expected == 0 {
        return Err(ObservationError::EmptyWorld);
    }

    let rules = Rules {
        wrap: frame.wrap.unwrap_or(rules.wrap),
        ..rules
    };
    let width = expected / 2;
    let height = rows.len();

    let mut stones = Vec::new();
    let mut food = BTreeMap::new();
    let mut sightings: BTreeMap<u8, Sighting> = BTreeMap::new();

    for (y, chars) in rows.iter().enumerate() {
        for (x, pair) in chars.chunks(2).enumerate() {
            let cell = Cell::new(x as i32, y as i32);
            let (ch, color_ch) = (pair[0], pair[1]);
            let part = match ch {
                ' ' => continue,
                '#' | 'x' | '+' | '%' => {
                    stones.push(cell);
                    continue;
                }
                '1'..='9' => {
                    food.insert(cell, ch.to_digit(10).unwrap_or(1));
                    continue;
                }
                '@' => Part::Head,
                '*' => Part::Body,
                '$' => Part::Tail,
                _ => return Err(ObservationError::UnknownCell { ch, cell }),
            };
            let color = match color_ch.to_digit(10) {
                Some(d) if d > 0 => d as u8,
                _ => {
                    return Err(ObservationError::InvalidColor { ch: color_ch, cell });
                }
            };
            let sighting = sightings.entry(color).or_default();
            sighting.cells.insert(cell);
            match part {
                Part::Head => sighting.heads.push(cell),
                Part::Tail => sighting.tails.push(cell),
                Part::Body => {}
            }
        }
    }

    let board = Board::new(width, height, rules).with_stones(stones);
    if let Some(previous) = previous {
        let known = previous.board();
        if known.width() != board.width() || known.height() != board.height() {
            return Err(ObservationError::BoardChanged {
                width: board.width(),
                height: board.height(),
                previous_width: known.width(),
                previous_height: known.height(),
            });
        }
    }

    let me = SnakeId(frame.my_color);
    let known_me = previous.is_some_and(|p| p.snake(me).is_some());
    if !sightings.contains_key(&frame.my_color) && !known_me {
        return Err(ObservationError::UnknownSnake(frame.my_color));
    }

    let mut state = GameState::new(board, me).with_frame(
        frame
            .frame
            .or_else(|| previous.map(|p| p.frame() + 1))
            .unwrap_or(0),
    );
    for (cell, value) in food {
        state = state.with_food(cell, value);
    }

    for (&color, sighting) in &sightings {
        let id = SnakeId(color);
        let before = previous.and_then(|p| p.snake(id)).filter(|s| s.is_alive());
        let body = body_of(state.board(), color, sighting, before)?;

        let facing = match (body.first(), body.get(1)) {
            (Some(&head), Some(&neck)) => state.board().direction_between(neck, head),
            _ => None,
        }
        .or_else(|| before.map(Snake::facing))
        .unwrap_or(Move::Up);

        let score = match frame.scores.get(&color) {
            Some(&score) => score,
            None => before.map_or(0, |snake| {
                let eaten = match (previous, body.first()) {
                    (Some(p), Some(&head)) if snake.head() != Some(head) => {
                        p.food_at(head).unwrap_or(0)
                    }
                    _ => 0,
                };
                snake.score() + eaten
            }),
        };

        state = state.with_snake(Snake::new(id, body, facing).with_score(score));
    }

    if let Some(previous) = previous {
        for snake in previous.snakes() {
            if !sightings.contains_key(&snake.id().0) {
                let score = frame
                    .scores
                    .get(&snake.id().0)
                    .copied()
                    .unwrap_or(snake.score());
                state = state.with_snake(Snake::dead(snake.id(), score));
            }
        }
    }

    state.validate()?;
    Ok(state)
}

fn body_of(
    board: &Board,
    color: u8,
    sighting: &Sighting,
    before: Option<&Snake>,
) -> Result<Vec<Cell>, ObservationError> {
    let &[head] = sighting.heads.as_slice() else {
        return Err(ObservationError::HeadCount {
            color,
            count: sighting.heads.len(),
        });
    };
    let tail = match sighting.tails.as_slice() {
        [] if sighting.cells.len() == 1 => None,
        &[tail] if sighting.cells.len() > 1 => Some(tail),
        tails => {
            return Err(ObservationError::TailCount {
                color,
                count: tails.len(),
            });
        }
    };

    trace(board, head, tail, &sighting.cells)
        .or_else(|| before.and_then(|snake| reconstruct(board, head, tail, &sighting.cells, snake)))
        .ok_or(ObservationError::AmbiguousBody { color })
}

/// Walk from the head through same-coloured neighbours. Fails when a step has
/// more than one candidate.
fn trace(
    board: &Board,
    head: Cell,
    tail: Option<Cell>,
    cells: &BTreeSet<Cell>,
) -> Option<Vec<Cell>> {
    let mut body = vec![head];
    let mut visited = BTreeSet::from([head]);

    while body.len() < cells.len() {
        let current = *body.last()?;
        if Some(current) == tail {
            return None;
        }
        let last_step = body.len() + 1 == cells.len();
        let mut options: Vec<Cell> = board
            .neighbors(current, &Move::ALL)
            .map(|(_, cell)| cell)
            .filter(|cell| cells.contains(cell) && !visited.contains(cell))
            .filter(|&cell| last_step || Some(cell) != tail)
            .collect();
        options.sort();
        options.dedup();
        let [next] = options.as_slice() else {
            return None;
        };
        visited.insert(*next);
        body.push(*next);
    }

    (tail.is_none() || body.last().copied() == tail).then_some(body)
}

/// The head plus the front of last tick's body: valid whenever the snake
/// moved one cell, whether or not it grew.
fn reconstruct(
    board: &Board,
    head: Cell,
    tail: Option<Cell>,
    cells: &BTreeSet<Cell>,
    before: &Snake,
) -> Option<Vec<Cell>> {
    let body: Vec<Cell> = std::iter::once(head)
        .chain(before.body().iter().copied())
        .take(cells.len())
        .collect();

    let distinct: BTreeSet<Cell> = body.iter().copied().collect();
    let connected = body
        .windows(2)
        .all(|pair| board.direction_between(pair[0], pair[1]).is_some());
    let ends_right = tail.is_none() || body.last().copied() == tail;

    (body.len() == cells.len() && distinct == *cells && connected && ends_right).then_some(body)
}
