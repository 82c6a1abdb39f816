//! The authoritative in-memory window model.
//!
//! One grid of columns per space, a reverse index from window to grid
//! position, the x-position memo that reconstructs scroll state across
//! retiles and workspace switches, the hidden and floating sets, and the
//! per-window ui-watcher registry. Every public mutation leaves the reverse
//! index coherent with the grid and never leaves an empty column or space
//! entry behind.

use objc2_core_foundation::CGRect;
use tracing::trace;

use crate::common::collections::{HashMap, HashSet};
use crate::sys::app::{WindowHandle, WindowId};
use crate::sys::screen::SpaceId;

/// An ordered stack of windows sharing one horizontal slot.
#[derive(Debug, Clone, Default)]
pub struct Column {
    windows: Vec<WindowHandle>,
}

impl Column {
    fn single(handle: WindowHandle) -> Column { Column { windows: vec![handle] } }

    pub fn windows(&self) -> &[WindowHandle] { &self.windows }

    pub fn ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.windows.iter().map(|w| w.window_id())
    }

    pub fn len(&self) -> usize { self.windows.len() }

    pub fn is_empty(&self) -> bool { self.windows.is_empty() }
}

/// Grid position of a tracked window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAt {
    pub space: SpaceId,
    pub col: usize,
    pub row: usize,
}

/// A cloned-enough copy of one space's tiling state. Handles are shared
/// with the live grid; geometry is copied.
#[derive(Debug, Clone, Default)]
pub struct SpaceSnapshot {
    pub columns: Vec<Column>,
    pub x_positions: HashMap<WindowId, f64>,
}

impl SpaceSnapshot {
    pub fn is_empty(&self) -> bool { self.columns.is_empty() }

    pub fn window_ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.columns.iter().flat_map(|c| c.ids())
    }

    pub fn handle_for(&self, wid: WindowId) -> Option<&WindowHandle> {
        self.columns
            .iter()
            .flat_map(|c| c.windows())
            .find(|w| w.window_id() == wid)
    }

    pub fn first_window(&self) -> Option<&WindowHandle> {
        self.columns.first().and_then(|c| c.windows().first())
    }

    /// Drops entries the validator rejects, pruning emptied columns.
    pub fn retain(&mut self, mut keep: impl FnMut(&WindowHandle) -> bool) {
        for column in &mut self.columns {
            column.windows.retain(|w| keep(w));
        }
        self.columns.retain(|c| !c.is_empty());
        let live: HashSet<WindowId> = self.window_ids().collect();
        self.x_positions.retain(|wid, _| live.contains(wid));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState {
    Running,
    Stopped,
}

#[derive(Default)]
pub struct WindowStore {
    grids: HashMap<SpaceId, Vec<Column>>,
    index: HashMap<WindowId, WindowAt>,
    x_positions: HashMap<SpaceId, HashMap<WindowId, f64>>,
    hidden: HashSet<WindowId>,
    floating: HashSet<WindowId>,
    watchers: HashMap<WindowId, WatcherState>,
    /// Last frame we wrote (or read) per window; used to elide no-op moves.
    frames: HashMap<WindowId, CGRect>,
}

impl WindowStore {
    pub fn new() -> WindowStore { WindowStore::default() }

    // --- grid reads ---------------------------------------------------------

    pub fn columns(&self, space: SpaceId) -> &[Column] {
        self.grids.get(&space).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn column(&self, space: SpaceId, col: usize) -> Option<&Column> {
        self.grids.get(&space).and_then(|g| g.get(col))
    }

    pub fn window_index(&self, wid: WindowId) -> Option<WindowAt> {
        self.index.get(&wid).copied()
    }

    pub fn window_at(&self, at: WindowAt) -> Option<&WindowHandle> {
        self.grids.get(&at.space)?.get(at.col)?.windows.get(at.row)
    }

    pub fn handle(&self, wid: WindowId) -> Option<&WindowHandle> {
        self.window_at(self.window_index(wid)?)
    }

    pub fn window_ids_in_space(&self, space: SpaceId) -> Vec<WindowId> {
        self.columns(space).iter().flat_map(|c| c.ids()).collect()
    }

    pub fn is_tracked(&self, wid: WindowId) -> bool { self.index.contains_key(&wid) }

    // --- grid mutations -----------------------------------------------------

    /// Inserts a new single-window column at `col` (clamped to the end).
    pub fn insert_column(&mut self, space: SpaceId, col: usize, handle: WindowHandle) {
        let wid = handle.window_id();
        debug_assert!(!self.index.contains_key(&wid), "{wid} inserted twice");
        let grid = self.grids.entry(space).or_default();
        let col = col.min(grid.len());
        grid.insert(col, Column::single(handle));
        self.reindex_space(space);
        trace!("inserted {wid} as new column {col} on {space}");
    }

    /// Inserts into an existing column at `row` (both clamped).
    pub fn insert_row(&mut self, space: SpaceId, col: usize, row: usize, handle: WindowHandle) {
        let wid = handle.window_id();
        debug_assert!(!self.index.contains_key(&wid), "{wid} inserted twice");
        let grid = self.grids.entry(space).or_default();
        if grid.is_empty() {
            grid.push(Column::single(handle));
        } else {
            let col = col.min(grid.len() - 1);
            let column = &mut grid[col];
            let row = row.min(column.windows.len());
            column.windows.insert(row, handle);
        }
        self.reindex_space(space);
    }

    /// Removes a window from the grid and x-memo, pruning an emptied column
    /// (and space). Returns the position it occupied.
    pub fn remove_window(&mut self, wid: WindowId) -> Option<WindowAt> {
        let at = self.index.get(&wid).copied()?;
        let grid = self.grids.get_mut(&at.space)?;
        grid[at.col].windows.remove(at.row);
        self.prune_space(at.space);
        self.reindex_space(at.space);
        if let Some(xs) = self.x_positions.get_mut(&at.space) {
            xs.remove(&wid);
            if xs.is_empty() {
                self.x_positions.remove(&at.space);
            }
        }
        self.frames.remove(&wid);
        Some(at)
    }

    /// Swaps two whole columns.
    pub fn swap_columns(&mut self, space: SpaceId, a: usize, b: usize) {
        let Some(grid) = self.grids.get_mut(&space) else { return };
        if a < grid.len() && b < grid.len() && a != b {
            grid.swap(a, b);
            self.reindex_space(space);
        }
    }

    /// Swaps two rows within a column.
    pub fn swap_rows(&mut self, space: SpaceId, col: usize, a: usize, b: usize) {
        let Some(grid) = self.grids.get_mut(&space) else { return };
        let Some(column) = grid.get_mut(col) else { return };
        if a < column.windows.len() && b < column.windows.len() && a != b {
            column.windows.swap(a, b);
            self.reindex_space(space);
        }
    }

    /// Removes a window from its column and appends it to the bottom of
    /// `target_col` in the same space. Used by slurp.
    pub fn move_to_column_end(&mut self, wid: WindowId, target_col: usize) -> bool {
        let Some(at) = self.index.get(&wid).copied() else { return false };
        let Some(grid) = self.grids.get_mut(&at.space) else { return false };
        if target_col >= grid.len() || target_col == at.col {
            return false;
        }
        let handle = grid[at.col].windows.remove(at.row);
        let mut target = target_col;
        if grid[at.col].is_empty() {
            grid.remove(at.col);
            if at.col < target {
                target -= 1;
            }
        }
        grid[target].windows.push(handle);
        self.prune_space(at.space);
        self.reindex_space(at.space);
        true
    }

    /// Extracts a window into a new single-window column at `target_col`.
    /// Used by barf.
    pub fn extract_to_column(&mut self, wid: WindowId, target_col: usize) -> bool {
        let Some(at) = self.index.get(&wid).copied() else { return false };
        let Some(grid) = self.grids.get_mut(&at.space) else { return false };
        let handle = grid[at.col].windows.remove(at.row);
        let mut target = target_col;
        if grid[at.col].is_empty() {
            grid.remove(at.col);
            if at.col < target {
                target -= 1;
            }
        }
        let target = target.min(grid.len());
        grid.insert(target, Column::single(handle));
        self.prune_space(at.space);
        self.reindex_space(at.space);
        true
    }

    // --- x-position memo ----------------------------------------------------

    pub fn x_positions(&self, space: SpaceId) -> Option<&HashMap<WindowId, f64>> {
        self.x_positions.get(&space)
    }

    pub fn x_position(&self, space: SpaceId, wid: WindowId) -> Option<f64> {
        self.x_positions.get(&space)?.get(&wid).copied()
    }

    pub fn set_x_position(&mut self, space: SpaceId, wid: WindowId, x: f64) {
        self.x_positions.entry(space).or_default().insert(wid, x);
    }

    // --- hidden / floating --------------------------------------------------

    pub fn set_hidden(&mut self, wid: WindowId, hidden: bool) {
        if hidden {
            self.hidden.insert(wid);
        } else {
            self.hidden.remove(&wid);
        }
    }

    pub fn is_hidden(&self, wid: WindowId) -> bool { self.hidden.contains(&wid) }

    pub fn hidden_windows(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.hidden.iter().copied()
    }

    pub fn set_floating(&mut self, wid: WindowId, floating: bool) {
        if floating {
            self.floating.insert(wid);
        } else {
            self.floating.remove(&wid);
        }
    }

    pub fn is_floating(&self, wid: WindowId) -> bool { self.floating.contains(&wid) }

    // --- last-written frames ------------------------------------------------

    pub fn frame(&self, wid: WindowId) -> Option<CGRect> { self.frames.get(&wid).copied() }

    pub fn set_frame(&mut self, wid: WindowId, frame: CGRect) {
        self.frames.insert(wid, frame);
    }

    // --- ui watchers --------------------------------------------------------

    pub fn ensure_watcher(&mut self, wid: WindowId) {
        self.watchers.entry(wid).or_insert(WatcherState::Running);
    }

    /// Creates watchers for any window in the space lacking one.
    pub fn ensure_watchers(&mut self, space: SpaceId) {
        let wids: Vec<WindowId> = self.window_ids_in_space(space);
        for wid in wids {
            self.ensure_watcher(wid);
        }
    }

    pub fn stop_watcher(&mut self, wid: WindowId) {
        if let Some(state) = self.watchers.get_mut(&wid) {
            *state = WatcherState::Stopped;
        }
    }

    pub fn start_watcher(&mut self, wid: WindowId) {
        if let Some(state) = self.watchers.get_mut(&wid) {
            *state = WatcherState::Running;
        }
    }

    pub fn delete_watcher(&mut self, wid: WindowId) { self.watchers.remove(&wid); }

    pub fn stop_all_watchers(&mut self) {
        for state in self.watchers.values_mut() {
            *state = WatcherState::Stopped;
        }
    }

    /// Whether OS move/resize events for this window should be acted upon.
    pub fn watcher_running(&self, wid: WindowId) -> bool {
        self.watchers.get(&wid) == Some(&WatcherState::Running)
    }

    // --- snapshot / restore -------------------------------------------------

    pub fn snapshot_space(&self, space: SpaceId) -> SpaceSnapshot {
        SpaceSnapshot {
            columns: self.grids.get(&space).cloned().unwrap_or_default(),
            x_positions: self.x_positions.get(&space).cloned().unwrap_or_default(),
        }
    }

    /// Replaces the space's grid and x-memo with the snapshot, or clears the
    /// space entirely for `None`. The reverse index is rebuilt for the
    /// affected windows in the same step.
    pub fn restore_space(&mut self, space: SpaceId, snapshot: Option<SpaceSnapshot>) {
        self.index.retain(|_, at| at.space != space);
        match snapshot {
            Some(snapshot) if !snapshot.is_empty() => {
                self.grids.insert(space, snapshot.columns);
                if snapshot.x_positions.is_empty() {
                    self.x_positions.remove(&space);
                } else {
                    self.x_positions.insert(space, snapshot.x_positions);
                }
                self.prune_space(space);
                self.reindex_space(space);
            }
            _ => {
                self.grids.remove(&space);
                self.x_positions.remove(&space);
            }
        }
    }

    /// Resets everything. Watchers are dropped, not stopped; callers stop
    /// them first if the OS side still exists.
    pub fn clear(&mut self) {
        self.grids.clear();
        self.index.clear();
        self.x_positions.clear();
        self.hidden.clear();
        self.floating.clear();
        self.watchers.clear();
        self.frames.clear();
    }

    /// Forgets a window everywhere except the grid (use `remove_window` for
    /// that); for destroyed windows that may never have been tiled.
    pub fn forget_window(&mut self, wid: WindowId) {
        self.hidden.remove(&wid);
        self.floating.remove(&wid);
        self.watchers.remove(&wid);
        self.frames.remove(&wid);
        for xs in self.x_positions.values_mut() {
            xs.remove(&wid);
        }
        self.x_positions.retain(|_, xs| !xs.is_empty());
    }

    // --- internals ----------------------------------------------------------

    fn prune_space(&mut self, space: SpaceId) {
        if let Some(grid) = self.grids.get_mut(&space) {
            grid.retain(|c| !c.is_empty());
            if grid.is_empty() {
                self.grids.remove(&space);
            }
        }
    }

    fn reindex_space(&mut self, space: SpaceId) {
        self.index.retain(|_, at| at.space != space);
        if let Some(grid) = self.grids.get(&space) {
            for (col, column) in grid.iter().enumerate() {
                for (row, handle) in column.windows.iter().enumerate() {
                    self.index.insert(handle.window_id(), WindowAt { space, col, row });
                }
            }
        }
        #[cfg(debug_assertions)]
        self.check_coherence();
    }

    #[cfg(debug_assertions)]
    fn check_coherence(&self) {
        for (wid, at) in &self.index {
            let handle = self
                .window_at(*at)
                .unwrap_or_else(|| panic!("index points at empty slot for {wid}"));
            assert_eq!(handle.window_id(), *wid, "index and grid disagree at {at:?}");
        }
        for (space, grid) in &self.grids {
            assert!(!grid.is_empty(), "empty grid retained for {space}");
            assert!(
                grid.iter().all(|c| !c.is_empty()),
                "empty column retained on {space}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sys::app::fake::FakeWindow;

    fn handle(pid: i32, idx: u32) -> WindowHandle {
        WindowHandle::fake(
            WindowId::new(pid, idx),
            Arc::new(FakeWindow::with_title("test")),
        )
    }

    fn space() -> SpaceId { SpaceId::new(1) }

    #[test]
    fn insert_and_index_agree() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(1, 2);
        let w3 = handle(1, 3);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());
        store.insert_row(space(), 1, 1, w3.clone());

        assert_eq!(
            store.window_index(w1.window_id()),
            Some(WindowAt { space: space(), col: 0, row: 0 })
        );
        assert_eq!(
            store.window_index(w3.window_id()),
            Some(WindowAt { space: space(), col: 1, row: 1 })
        );
        assert_eq!(store.columns(space()).len(), 2);
        assert_eq!(store.window_ids_in_space(space()).len(), 3);
    }

    #[test]
    fn removing_last_row_prunes_column_and_space() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(1, 2);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());
        store.set_x_position(space(), w1.window_id(), 8.0);
        store.set_x_position(space(), w2.window_id(), 500.0);

        store.remove_window(w1.window_id());
        assert_eq!(store.columns(space()).len(), 1);
        assert_eq!(store.window_index(w2.window_id()).unwrap().col, 0);
        assert!(store.x_position(space(), w1.window_id()).is_none());

        store.remove_window(w2.window_id());
        assert!(store.columns(space()).is_empty());
        assert!(store.x_positions(space()).is_none());
        assert!(!store.is_tracked(w2.window_id()));
    }

    #[test]
    fn snapshot_restore_is_identity() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(2, 7);
        let w3 = handle(2, 9);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());
        store.insert_row(space(), 0, 1, w3.clone());
        store.set_x_position(space(), w1.window_id(), 8.0);
        store.set_x_position(space(), w2.window_id(), 496.0);

        let snapshot = store.snapshot_space(space());
        store.restore_space(space(), None);
        assert!(store.columns(space()).is_empty());
        assert!(!store.is_tracked(w1.window_id()));

        store.restore_space(space(), Some(snapshot));
        assert_eq!(store.columns(space()).len(), 2);
        assert_eq!(
            store.window_index(w3.window_id()),
            Some(WindowAt { space: space(), col: 0, row: 1 })
        );
        assert_eq!(store.x_position(space(), w2.window_id()), Some(496.0));
    }

    #[test]
    fn restore_with_validated_snapshot_drops_stale_entries() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(1, 2);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());
        let mut snapshot = store.snapshot_space(space());

        snapshot.retain(|w| w.window_id() != w1.window_id());
        assert_eq!(snapshot.window_ids().count(), 1);

        store.restore_space(space(), Some(snapshot));
        assert!(!store.is_tracked(w1.window_id()));
        assert_eq!(store.columns(space()).len(), 1);
    }

    #[test]
    fn swap_columns_and_rows_keep_index_coherent() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(1, 2);
        let w3 = handle(1, 3);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());
        store.insert_row(space(), 1, 1, w3.clone());

        store.swap_columns(space(), 0, 1);
        assert_eq!(store.window_index(w1.window_id()).unwrap().col, 1);
        assert_eq!(store.window_index(w2.window_id()).unwrap().col, 0);

        store.swap_rows(space(), 0, 0, 1);
        assert_eq!(store.window_index(w2.window_id()).unwrap().row, 1);
        assert_eq!(store.window_index(w3.window_id()).unwrap().row, 0);
    }

    #[test]
    fn slurp_and_barf_column_moves() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let w2 = handle(1, 2);
        store.insert_column(space(), 0, w1.clone());
        store.insert_column(space(), 1, w2.clone());

        // Slurp w2 into the first column.
        assert!(store.move_to_column_end(w2.window_id(), 0));
        assert_eq!(store.columns(space()).len(), 1);
        assert_eq!(
            store.window_index(w2.window_id()),
            Some(WindowAt { space: space(), col: 0, row: 1 })
        );

        // Barf it back out to the right.
        assert!(store.extract_to_column(w2.window_id(), 1));
        assert_eq!(store.columns(space()).len(), 2);
        assert_eq!(store.window_index(w2.window_id()).unwrap().col, 1);
    }

    #[test]
    fn hidden_windows_are_not_indexable_after_removal() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        store.insert_column(space(), 0, w1.clone());
        store.set_hidden(w1.window_id(), true);
        store.remove_window(w1.window_id());
        assert!(store.is_hidden(w1.window_id()));
        assert!(store.window_index(w1.window_id()).is_none());
        store.forget_window(w1.window_id());
        assert!(!store.is_hidden(w1.window_id()));
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let wid = w1.window_id();
        store.insert_column(space(), 0, w1);
        store.set_x_position(space(), wid, 8.0);
        store.set_hidden(WindowId::new(9, 9), true);
        store.set_floating(wid, true);
        store.ensure_watcher(wid);

        store.clear();
        assert!(store.columns(space()).is_empty());
        assert!(store.window_index(wid).is_none());
        assert!(store.x_positions(space()).is_none());
        assert!(!store.is_hidden(WindowId::new(9, 9)));
        assert!(!store.is_floating(wid));
        assert!(!store.watcher_running(wid));
    }

    #[test]
    fn watcher_lifecycle() {
        let mut store = WindowStore::new();
        let w1 = handle(1, 1);
        let wid = w1.window_id();
        store.insert_column(space(), 0, w1);
        store.ensure_watchers(space());
        assert!(store.watcher_running(wid));
        store.stop_watcher(wid);
        assert!(!store.watcher_running(wid));
        store.start_watcher(wid);
        assert!(store.watcher_running(wid));
        store.delete_watcher(wid);
        assert!(!store.watcher_running(wid));
    }
}
