pub mod scrolling;
pub mod utils;

pub use scrolling::{TileContext, TilePlan, tile_space};
pub use utils::{Canvas, compute_canvas};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}
