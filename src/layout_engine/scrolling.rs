//! The scrolling column tiler.
//!
//! Layout is computed from an anchor window outward: the anchor's column is
//! placed according to the policy flags, then columns propagate to the right
//! and left of it. Columns that run past the canvas clamp their near edge to
//! the canvas edge so a sliver stays on screen and clickable. The virtual
//! (unclamped) left edge of every column is reported back for the x-position
//! memo, which is what reconstructs scroll state after retiles and
//! workspace switches.
//!
//! This module is stateless: it reads the store and returns a plan; the
//! caller applies the moves and writes back the memo.

use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use tracing::trace;

use crate::common::config::LayoutSettings;
use crate::layout_engine::utils::{Canvas, compute_canvas};
use crate::model::store::WindowStore;
use crate::sys::app::WindowId;
use crate::sys::screen::SpaceId;

/// Focus history the tiler needs to infer scroll direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileContext {
    pub focused: Option<WindowId>,
    pub prev_prev_focused: Option<WindowId>,
}

/// The computed layout: frames to apply and the new x-position memo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TilePlan {
    pub moves: Vec<(WindowId, CGRect)>,
    pub x_positions: Vec<(WindowId, f64)>,
}

enum HAnchor {
    Left(f64),
    Right(f64),
}

struct ColumnBounds {
    anchor: HAnchor,
    y: f64,
    y2: f64,
}

/// Lays out every column of `space`. Returns an empty plan for a space with
/// no columns, and `None` when an anchor cannot be resolved (the grid holds
/// only hidden windows; the caller should rescan).
pub fn tile_space(
    store: &WindowStore,
    space: SpaceId,
    screen: CGRect,
    settings: &LayoutSettings,
    ctx: TileContext,
    size_of: &dyn Fn(WindowId) -> CGSize,
) -> Option<TilePlan> {
    if store.columns(space).is_empty() {
        return Some(TilePlan::default());
    }

    // Hidden windows must never receive frames from the tiler, and floating
    // ones are not its business. The grid should not contain either; skip
    // them anyway.
    let cols: Vec<Vec<WindowId>> = store
        .columns(space)
        .iter()
        .map(|c| {
            c.ids()
                .filter(|w| !store.is_hidden(*w) && !store.is_floating(*w))
                .collect::<Vec<_>>()
        })
        .filter(|c| !c.is_empty())
        .collect();
    if cols.is_empty() {
        trace!("grid for {space} holds only hidden windows; no anchor");
        return None;
    }

    let canvas = compute_canvas(screen, settings);
    let gap_h = settings.gaps.inner.horizontal;
    let gap_v = settings.gaps.inner.vertical;

    // 1. Anchor: the focused window when it lives on this space and tiles,
    // otherwise the leftmost on-screen column per the memo.
    let anchor_pos = ctx
        .focused
        .filter(|f| !store.is_floating(*f) && !store.is_hidden(*f))
        .and_then(|f| locate(&cols, f));
    let (anchor_col, anchor_row) = match anchor_pos {
        Some(pos) => pos,
        None => (first_visible_column(&cols, store, space, screen.origin.x), 0),
    };
    let anchor = cols[anchor_col][anchor_row];

    let anchor_size = size_of(anchor);
    let aw = anchor_size.width.min(canvas.width()).max(1.0);
    let ah = anchor_size.height.min(canvas.height()).max(1.0);

    // 2. Anchor x per policy.
    let ax = anchor_x(
        store, space, &cols, anchor_col, anchor, aw, &canvas, gap_h, settings, ctx, size_of,
    );

    let mut plan = TilePlan::default();

    // 3. The anchor's own column. With company in the column, the others
    // split the leftover height evenly; the fill-to-bottom rule absorbs
    // rounding.
    let n = cols[anchor_col].len();
    let other_h = (n > 1).then(|| {
        ((canvas.height() - ah - (n as f64 - 1.0) * gap_v) / (n as f64 - 1.0)).max(1.0)
    });
    tile_column(
        &cols[anchor_col],
        ColumnBounds {
            anchor: HAnchor::Left(ax),
            y: canvas.y,
            y2: canvas.y2,
        },
        other_h,
        Some(aw),
        Some((anchor, ah)),
        size_of,
        gap_v,
        &mut plan.moves,
    );
    remember_column(&mut plan, &cols[anchor_col], ax);

    // 4. Propagate right.
    let mut x = ax + aw + gap_h;
    for col in &cols[anchor_col + 1..] {
        let width = tile_column(
            col,
            ColumnBounds {
                anchor: HAnchor::Left(x.min(canvas.x2)),
                y: canvas.y,
                y2: canvas.y2,
            },
            None,
            None,
            None,
            size_of,
            gap_v,
            &mut plan.moves,
        );
        remember_column(&mut plan, col, x);
        x += width + gap_h;
    }

    // 5. Propagate left, mirrored.
    let mut x2 = ax - gap_h;
    for col in cols[..anchor_col].iter().rev() {
        let width = tile_column(
            col,
            ColumnBounds {
                anchor: HAnchor::Right(x2.max(canvas.x)),
                y: canvas.y,
                y2: canvas.y2,
            },
            None,
            None,
            None,
            size_of,
            gap_v,
            &mut plan.moves,
        );
        remember_column(&mut plan, col, x2 - width);
        x2 -= width + gap_h;
    }

    Some(plan)
}

/// Where the anchor's left edge goes.
#[allow(clippy::too_many_arguments)]
fn anchor_x(
    store: &WindowStore,
    space: SpaceId,
    cols: &[Vec<WindowId>],
    anchor_col: usize,
    anchor: WindowId,
    aw: f64,
    canvas: &Canvas,
    gap_h: f64,
    settings: &LayoutSettings,
    ctx: TileContext,
    size_of: &dyn Fn(WindowId) -> CGSize,
) -> f64 {
    if settings.right_anchor_last && anchor_col == cols.len() - 1 && cols.len() > 1 {
        return canvas.x2 - aw;
    }
    if anchor_col > 0 && settings.sticky_pairs {
        // The user scrolled left if focus came from a column to our right;
        // an anchor already memoized at the canvas edge stays there too.
        let came_from_right = ctx
            .prev_prev_focused
            .and_then(|w| locate(cols, w))
            .is_some_and(|(col, _)| col > anchor_col);
        let was_left_anchored = store.x_position(space, anchor) == Some(canvas.x);
        if came_from_right || was_left_anchored {
            return canvas.x;
        }
        let left_w = size_of(cols[anchor_col - 1][0]).width;
        if left_w + gap_h + aw <= canvas.width() {
            return canvas.x + left_w + gap_h;
        }
        // Left neighbor too wide for a pair; give the anchor the edge.
        return canvas.x;
    }
    canvas.x
}

/// Lays out one column of windows top to bottom and returns the width used.
///
/// The column width defaults to the first window's width; a given `height`
/// applies to every window except the `special` one, which keeps its own.
/// The y cursor clamps to the bottom bound and the last window stretches to
/// fill it.
#[allow(clippy::too_many_arguments)]
fn tile_column(
    windows: &[WindowId],
    bounds: ColumnBounds,
    height: Option<f64>,
    width: Option<f64>,
    special: Option<(WindowId, f64)>,
    size_of: &dyn Fn(WindowId) -> CGSize,
    gap_v: f64,
    moves: &mut Vec<(WindowId, CGRect)>,
) -> f64 {
    let Some(&first) = windows.first() else { return 0.0 };
    let width = width.unwrap_or_else(|| size_of(first).width).max(1.0);
    let x = match bounds.anchor {
        HAnchor::Left(x) => x,
        HAnchor::Right(x2) => x2 - width,
    };

    let mut y = bounds.y;
    for (i, &wid) in windows.iter().enumerate() {
        let mut h = match special {
            Some((special_wid, special_h)) if special_wid == wid => special_h,
            _ => height.unwrap_or_else(|| size_of(wid).height),
        };
        if i + 1 == windows.len() {
            h = (bounds.y2 - y).max(1.0);
        } else {
            h = h.clamp(1.0, (bounds.y2 - y).max(1.0));
        }
        moves.push((wid, CGRect::new(CGPoint::new(x, y), CGSize::new(width, h))));
        y = (y + h + gap_v).min(bounds.y2);
    }
    width
}

fn remember_column(plan: &mut TilePlan, col: &[WindowId], x: f64) {
    for &wid in col {
        plan.x_positions.push((wid, x));
    }
}

fn locate(cols: &[Vec<WindowId>], wid: WindowId) -> Option<(usize, usize)> {
    for (col_idx, col) in cols.iter().enumerate() {
        if let Some(row_idx) = col.iter().position(|w| *w == wid) {
            return Some((col_idx, row_idx));
        }
    }
    None
}

/// The leftmost column whose memoized x is on screen, falling back to the
/// rightmost off-screen-left column, then to the first column.
fn first_visible_column(
    cols: &[Vec<WindowId>],
    store: &WindowStore,
    space: SpaceId,
    screen_x: f64,
) -> usize {
    let mut best_on: Option<(f64, usize)> = None;
    let mut best_off: Option<(f64, usize)> = None;
    for (i, col) in cols.iter().enumerate() {
        let Some(x) = store.x_position(space, col[0]) else { continue };
        if x >= screen_x {
            if best_on.map_or(true, |(bx, _)| x < bx) {
                best_on = Some((x, i));
            }
        } else if best_off.map_or(true, |(bx, _)| x > bx) {
            best_off = Some((x, i));
        }
    }
    best_on.or(best_off).map(|(_, i)| i).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::common::config::GapSettings;
    use crate::sys::app::WindowHandle;
    use crate::sys::app::fake::FakeWindow;

    fn space() -> SpaceId { SpaceId::new(1) }

    fn handle(idx: u32) -> WindowHandle {
        WindowHandle::fake(
            WindowId::new(100, idx),
            Arc::new(FakeWindow::with_title("w")),
        )
    }

    fn wid(idx: u32) -> WindowId { WindowId::new(100, idx) }

    fn settings(gap: f64) -> LayoutSettings {
        LayoutSettings {
            gaps: GapSettings::uniform(gap),
            ..LayoutSettings::default()
        }
    }

    fn frame_of(plan: &TilePlan, w: WindowId) -> CGRect {
        plan.moves
            .iter()
            .find(|(id, _)| *id == w)
            .map(|(_, f)| *f)
            .unwrap_or_else(|| panic!("no frame planned for {w}"))
    }

    fn fixed_size(w: f64, h: f64) -> impl Fn(WindowId) -> CGSize {
        move |_| CGSize::new(w, h)
    }

    #[test]
    fn single_window_left_anchored_on_canvas() {
        let mut store = WindowStore::new();
        store.insert_column(space(), 0, handle(1));
        let mut settings = settings(8.0);
        settings.external_bar.top = 40.0;
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 700.0));

        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings,
            TileContext {
                focused: Some(wid(1)),
                prev_prev_focused: None,
            },
            &fixed_size(100.0, 300.0),
        )
        .unwrap();

        let frame = frame_of(&plan, wid(1));
        assert_eq!(frame.origin.x, 8.0);
        assert_eq!(frame.origin.y, 48.0);
        assert_eq!(frame.size.width, 100.0);
        assert_eq!(frame.size.height, 644.0);
        assert_eq!(plan.x_positions, vec![(wid(1), 8.0)]);
    }

    fn three_column_store() -> WindowStore {
        let mut store = WindowStore::new();
        store.insert_column(space(), 0, handle(1));
        store.insert_column(space(), 1, handle(2));
        store.insert_column(space(), 2, handle(3));
        store
    }

    #[test]
    fn sticky_pair_after_scrolling_right() {
        // Focus moved W1 -> W2; W1 is two steps back. The pair fits, so W2
        // sits right of W1 and both stay visible.
        let store = three_column_store();
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext {
                focused: Some(wid(2)),
                prev_prev_focused: Some(wid(1)),
            },
            &fixed_size(480.0, 700.0),
        )
        .unwrap();

        assert_eq!(frame_of(&plan, wid(2)).origin.x, 496.0);
        assert_eq!(frame_of(&plan, wid(1)).origin.x, 8.0);
    }

    #[test]
    fn scrolling_left_anchors_to_canvas_edge() {
        // Focus moved W3 -> W2: the column two steps back lies to the right,
        // so the anchor goes to the left edge keeping W2 and W3 visible.
        let store = three_column_store();
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext {
                focused: Some(wid(2)),
                prev_prev_focused: Some(wid(3)),
            },
            &fixed_size(480.0, 700.0),
        )
        .unwrap();

        assert_eq!(frame_of(&plan, wid(2)).origin.x, 8.0);
        assert_eq!(frame_of(&plan, wid(3)).origin.x, 496.0);
    }

    #[test]
    fn right_anchor_last_column() {
        let store = three_column_store();
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let mut settings = settings(8.0);
        settings.right_anchor_last = true;
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings,
            TileContext {
                focused: Some(wid(3)),
                prev_prev_focused: Some(wid(2)),
            },
            &fixed_size(480.0, 700.0),
        )
        .unwrap();

        assert_eq!(frame_of(&plan, wid(3)).origin.x, 512.0);
    }

    #[test]
    fn anchor_memoized_at_edge_stays_left_anchored() {
        let mut store = three_column_store();
        store.set_x_position(space(), wid(2), 8.0);
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext {
                focused: Some(wid(2)),
                prev_prev_focused: Some(wid(1)),
            },
            &fixed_size(480.0, 700.0),
        )
        .unwrap();

        assert_eq!(frame_of(&plan, wid(2)).origin.x, 8.0);
    }

    #[test]
    fn columns_past_the_edge_clip_at_the_canvas() {
        let store = three_column_store();
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext {
                focused: Some(wid(1)),
                prev_prev_focused: None,
            },
            &fixed_size(600.0, 700.0),
        )
        .unwrap();

        // W2 starts past the canvas edge and clips there; W3 does too. The
        // memo keeps the virtual positions so ordering survives.
        assert_eq!(frame_of(&plan, wid(2)).origin.x, 616.0);
        assert_eq!(frame_of(&plan, wid(3)).origin.x, 992.0);
        let xs: crate::common::collections::HashMap<WindowId, f64> =
            plan.x_positions.iter().copied().collect();
        assert_eq!(xs[&wid(3)], 616.0 + 600.0 + 8.0);
    }

    #[test]
    fn anchor_column_rows_share_leftover_height() {
        let mut store = WindowStore::new();
        store.insert_column(space(), 0, handle(1));
        store.insert_row(space(), 0, 1, handle(2));
        store.insert_row(space(), 0, 2, handle(3));
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext {
                focused: Some(wid(1)),
                prev_prev_focused: None,
            },
            &fixed_size(480.0, 400.0),
        )
        .unwrap();

        // Canvas height 752; anchor keeps 400; the two others split
        // 752 - 400 - 16 = 336 evenly.
        let f1 = frame_of(&plan, wid(1));
        let f2 = frame_of(&plan, wid(2));
        let f3 = frame_of(&plan, wid(3));
        assert_eq!(f1.size.height, 400.0);
        assert_eq!(f2.size.height, 168.0);
        assert_eq!(f3.size.height, 168.0);
        assert_eq!(f2.origin.y, 8.0 + 400.0 + 8.0);
        // Last row lands exactly on the canvas bottom.
        assert_eq!(f3.origin.y + f3.size.height, 760.0);
    }

    #[test]
    fn unfocused_space_anchors_on_leftmost_visible_column() {
        let mut store = three_column_store();
        store.set_x_position(space(), wid(1), -488.0);
        store.set_x_position(space(), wid(2), 8.0);
        store.set_x_position(space(), wid(3), 504.0);
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext::default(),
            &fixed_size(480.0, 700.0),
        )
        .unwrap();

        // W2 is the leftmost on-screen column and becomes the anchor. W1
        // hangs off the left edge, clipped so its right edge meets the
        // canvas, while the memo keeps its virtual position.
        assert_eq!(frame_of(&plan, wid(2)).origin.x, 8.0);
        assert_eq!(frame_of(&plan, wid(1)).origin.x, 8.0 - 480.0);
        let xs: crate::common::collections::HashMap<WindowId, f64> =
            plan.x_positions.iter().copied().collect();
        assert_eq!(xs[&wid(1)], -480.0);
    }

    #[test]
    fn empty_space_is_a_noop_and_hidden_only_grid_requests_rescan() {
        let store = WindowStore::new();
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 768.0));
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext::default(),
            &fixed_size(480.0, 700.0),
        );
        assert_eq!(plan, Some(TilePlan::default()));

        let mut store = WindowStore::new();
        store.insert_column(space(), 0, handle(1));
        store.set_hidden(wid(1), true);
        let plan = tile_space(
            &store,
            space(),
            screen,
            &settings(8.0),
            TileContext::default(),
            &fixed_size(480.0, 700.0),
        );
        assert_eq!(plan, None);
    }
}
