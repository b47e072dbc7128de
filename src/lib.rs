pub mod arena;
pub mod bot;
pub mod config;
pub mod decider;
pub mod eval;
pub mod game;
pub mod observe;
pub mod reach;
pub mod search;
pub mod transition;
pub mod web;

pub use arena::*;
pub use bot::*;
pub use config::*;
pub use decider::*;
pub use eval::*;
pub use game::*;
pub use observe::*;
pub use reach::*;
pub use search::*;
pub use transition::*;
