//! The reactor keeps the window model coherent with the system.
//!
//! It consumes OS window events and user commands on one cooperative
//! thread, mutates the store and workspace tables, runs the tiler, and
//! pushes the resulting frames out through the transport. Two guards shape
//! everything here: `paused` silences the tiling reactions to OS events
//! while an atomic operation is in flight, and `switching` makes workspace
//! switches non-reentrant.

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use tracing::{debug, info, instrument, trace, warn};

use crate::actor::{self, Receiver, Sender};
use crate::common::collections::HashMap;
use crate::common::config::Config;
use crate::layout_engine::{Direction, TileContext, tile_space};
use crate::model::store::{WindowAt, WindowStore};
use crate::model::workspace::WorkspaceManager;
use crate::sys::app::{WindowHandle, WindowId, WindowInfo};
use crate::sys::geometry::CGRectExt;
use crate::sys::screen::SpaceId;
use crate::sys::timer;
use crate::sys::transport::{MoveOp, Transport};

/// Extra settle time past the OS move animation before a window's watcher
/// starts reporting frames again.
const WATCHER_RESTART_PADDING_MS: u64 = 50;

/// How long macOS gets to finish materializing the desktop before the
/// startup partition runs.
const STARTUP_SETTLE_MS: u64 = 1000;

#[derive(Debug)]
pub enum Event {
    /// Main-screen frame and active space. Always the first event on
    /// startup; later occurrences flag a geometry change.
    ScreenParametersChanged(CGRect, Option<SpaceId>),
    /// Initial settle timer fired; partition windows into workspaces.
    StartupSettled,
    /// Batch of windows discovered at startup or app launch.
    WindowsDiscovered(Vec<(WindowHandle, WindowInfo)>),
    WindowCreated(WindowHandle, WindowInfo),
    WindowDestroyed(WindowId),
    WindowFocused(WindowId),
    /// OS-initiated move or resize reported by a window's ui watcher.
    WindowFrameChanged(WindowId, CGRect),
    /// Miniaturized or went fullscreen; leaves the grid until visible again.
    WindowNotVisible(WindowId),
    Command(Command),

    FocusDebounceElapsed {
        wid: WindowId,
        generation: u64,
    },
    ParkDelayElapsed {
        wid: WindowId,
    },
    WatchersRestartElapsed {
        wids: Vec<WindowId>,
        generation: u64,
    },
    RefocusElapsed {
        wid: WindowId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SwitchToWorkspace(String),
    NextWorkspace { skip_empty: bool },
    PrevWorkspace { skip_empty: bool },
    MoveWindowToWorkspace(String),
    FocusWindow(FocusTarget),
    SwapWindows(Direction),
    SlurpWindow,
    BarfWindow,
    JumpToApp(String),
    ToggleJump,
    RefreshWindows,
    DumpState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    Direction(Direction),
    Next,
    Previous,
}

/// Host operations the reactor cannot perform itself. A seam so tests can
/// observe launches instead of spawning anything.
pub trait HostOps {
    fn launch_or_focus(&self, app_name: &str);
    fn spawn_process(&self, argv: &[String]);
}

pub struct SystemHost;

impl HostOps for SystemHost {
    fn launch_or_focus(&self, app_name: &str) {
        crate::sys::app::launch_or_focus(app_name);
    }

    fn spawn_process(&self, argv: &[String]) { crate::sys::app::spawn_process(argv); }
}

#[derive(Debug, Clone, Copy)]
struct ScreenState {
    frame: CGRect,
    space: Option<SpaceId>,
}

#[derive(Debug, Clone)]
struct WindowRecord {
    handle: WindowHandle,
    info: WindowInfo,
}

pub struct Reactor {
    config: Config,
    store: WindowStore,
    workspaces: WorkspaceManager,
    transport: Box<dyn Transport>,
    host: Box<dyn HostOps>,
    /// Every window we know about, parked ones included.
    windows: HashMap<WindowId, WindowRecord>,
    screen: Option<ScreenState>,
    screen_changed: bool,
    /// Event router guard: while set, OS events cause no tiling reactions.
    paused: bool,
    /// Re-entrancy guard for the switch protocol.
    switching: bool,
    focused: Option<WindowId>,
    prev_focused: Option<WindowId>,
    prev_prev_focused: Option<WindowId>,
    focus_debounce_generation: u64,
    watcher_generation: u64,
    watcher_restart_pending: HashMap<WindowId, u64>,
    events_tx: Option<Sender<Event>>,
    /// Timers that could not be scheduled because no runtime is running;
    /// tests drain these and feed the events back by hand.
    queued_timers: Vec<(u64, Event)>,
    on_switch: Option<Box<dyn FnMut(&str)>>,
}

impl Reactor {
    pub fn new(config: Config, transport: Box<dyn Transport>, host: Box<dyn HostOps>) -> Reactor {
        let workspaces = WorkspaceManager::new(&config.workspaces);
        Reactor {
            config,
            store: WindowStore::new(),
            workspaces,
            transport,
            host,
            windows: HashMap::default(),
            screen: None,
            screen_changed: false,
            paused: false,
            // Set until the startup partition has run, so focus events from
            // macOS settling in cannot trigger switches.
            switching: true,
            focused: None,
            prev_focused: None,
            prev_prev_focused: None,
            focus_debounce_generation: 0,
            watcher_generation: 0,
            watcher_restart_pending: HashMap::default(),
            events_tx: None,
            queued_timers: Vec::new(),
            on_switch: None,
        }
    }

    pub fn spawn(
        config: Config,
        transport: Box<dyn Transport + Send>,
        host: Box<dyn HostOps + Send>,
    ) -> Sender<Event> {
        let (events_tx, events_rx) = actor::channel();
        let tx = events_tx.clone();
        std::thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || {
                let mut reactor = Reactor::new(config, transport, host);
                reactor.events_tx = Some(tx);
                crate::sys::executor::Executor::run(reactor.run(events_rx));
            })
            .unwrap();
        events_tx
    }

    pub fn set_on_switch(&mut self, f: impl FnMut(&str) + 'static) {
        self.on_switch = Some(Box::new(f));
    }

    pub async fn run(mut self, mut events: Receiver<Event>) {
        self.schedule(STARTUP_SETTLE_MS, Event::StartupSettled);
        while let Some((span, event)) = events.recv().await {
            let _guard = span.enter();
            self.handle_event(event);
        }
    }

    fn schedule(&mut self, delay_ms: u64, event: Event) {
        match (&self.events_tx, tokio::runtime::Handle::try_current()) {
            (Some(tx), Ok(_)) => {
                let tx = tx.clone();
                timer::oneshot(Duration::from_millis(delay_ms), move || tx.send(event));
            }
            _ => self.queued_timers.push((delay_ms, event)),
        }
    }

    fn log_event(&self, event: &Event) {
        match event {
            Event::WindowFrameChanged(..) => trace!(?event, "Event"),
            _ => debug!(?event, "Event"),
        }
    }

    #[instrument(name = "reactor::handle_event", skip(self, event))]
    pub fn handle_event(&mut self, event: Event) {
        self.log_event(&event);
        match event {
            Event::ScreenParametersChanged(frame, space) => self.on_screen_changed(frame, space),
            Event::StartupSettled => self.on_startup_settled(),
            Event::WindowsDiscovered(windows) => {
                for (handle, info) in windows {
                    self.on_window_created(handle, info, false);
                }
                if let Some(space) = self.active_space() {
                    self.retile(space);
                }
            }
            Event::WindowCreated(handle, info) => self.on_window_created(handle, info, true),
            Event::WindowDestroyed(wid) => self.on_window_destroyed(wid),
            Event::WindowFocused(wid) => self.on_window_focused(wid),
            Event::WindowFrameChanged(wid, frame) => self.on_window_frame_changed(wid, frame),
            Event::WindowNotVisible(wid) => self.on_window_not_visible(wid),
            Event::Command(command) => self.handle_command(command),
            Event::FocusDebounceElapsed { wid, generation } => {
                self.on_focus_debounce_elapsed(wid, generation)
            }
            Event::ParkDelayElapsed { wid } => self.on_park_delay_elapsed(wid),
            Event::WatchersRestartElapsed { wids, generation } => {
                for wid in wids {
                    if self.watcher_restart_pending.get(&wid) == Some(&generation) {
                        self.watcher_restart_pending.remove(&wid);
                        self.store.start_watcher(wid);
                    }
                }
            }
            Event::RefocusElapsed { wid } => {
                // Counter macOS stealing focus back during the animation.
                if self.focused == Some(wid) {
                    if let Some(record) = self.windows.get(&wid) {
                        record.handle.focus();
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SwitchToWorkspace(name) => self.switch_to(&name),
            Command::NextWorkspace { skip_empty } => {
                if let Some(name) = self.workspaces.next_workspace(skip_empty) {
                    let name = name.to_string();
                    self.switch_to(&name);
                }
            }
            Command::PrevWorkspace { skip_empty } => {
                if let Some(name) = self.workspaces.prev_workspace(skip_empty) {
                    let name = name.to_string();
                    self.switch_to(&name);
                }
            }
            Command::MoveWindowToWorkspace(name) => self.move_window_to(&name),
            Command::FocusWindow(target) => self.focus_window(target),
            Command::SwapWindows(direction) => self.swap_windows(direction),
            Command::SlurpWindow => self.slurp_window(),
            Command::BarfWindow => self.barf_window(),
            Command::JumpToApp(category) => self.jump_to_app(&category),
            Command::ToggleJump => self.toggle_jump(),
            Command::RefreshWindows => self.refresh_windows(),
            Command::DumpState => info!("{}", self.draw_state()),
        }
    }

    // --- screen and startup -------------------------------------------------

    fn active_space(&self) -> Option<SpaceId> { self.screen.and_then(|s| s.space) }

    fn on_screen_changed(&mut self, frame: CGRect, space: Option<SpaceId>) {
        let previous = self.screen.replace(ScreenState { frame, space });
        let Some(previous) = previous else { return };
        if previous.frame.same_as(frame) {
            return;
        }
        // Geometry changed under us. Flag it for the next switch and chase
        // the parked windows to the new corner; nobody sees those frames,
        // so fire and forget.
        self.screen_changed = true;
        let park_ops: Vec<MoveOp> = self
            .store
            .hidden_windows()
            .map(|wid| {
                let park = self.park_position_for(wid, frame);
                MoveOp::position_only(wid, park.x, park.y)
            })
            .collect();
        if !park_ops.is_empty() {
            self.transport.move_windows_async(park_ops);
        }
    }

    fn park_position_for(&self, wid: WindowId, screen: CGRect) -> CGPoint {
        let bundle_id = self.windows.get(&wid).and_then(|r| r.info.bundle_id.as_deref());
        WorkspaceManager::park_position(screen, bundle_id)
    }

    /// The startup partition: everything discovered so far that belongs to
    /// an inactive workspace leaves the grid and parks off-screen, then the
    /// current workspace is snapshotted and tiled.
    fn on_startup_settled(&mut self) {
        let Some(space) = self.active_space() else {
            self.switching = false;
            return;
        };
        let Some(screen) = self.screen else {
            self.switching = false;
            return;
        };
        self.paused = true;

        let current = self.workspaces.current().to_string();

        // Partition the grid into per-workspace snapshots before parking
        // anything; the first switch to each workspace restores its share.
        let full = self.store.snapshot_space(space);
        let names: Vec<String> = self.workspaces.names().to_vec();
        for name in &names {
            if *name == current || self.workspaces.is_scratch(name) {
                continue;
            }
            let mut snapshot = full.clone();
            snapshot.retain(|w| self.workspaces.is_member(name, w.window_id()));
            if !snapshot.is_empty() {
                self.workspaces.set_snapshot(name, snapshot);
            }
        }

        let mut park_ops = Vec::new();
        let wids: Vec<WindowId> = self.windows.keys().copied().collect();
        for wid in wids {
            if self.workspaces.workspace_of(wid) == Some(current.as_str()) {
                continue;
            }
            self.park_window(wid, screen.frame, &mut park_ops);
        }
        if !park_ops.is_empty() {
            self.transport.move_windows(park_ops);
        }

        let snapshot = self.store.snapshot_space(space);
        self.workspaces.set_snapshot(&current, snapshot);

        self.paused = false;
        self.retile(space);
        self.switching = false;
        debug!("startup partition complete, current workspace '{current}'");
    }

    /// Takes a window out of the grid (no focus handoff), hides it, saves
    /// its frame, and queues the park move.
    fn park_window(&mut self, wid: WindowId, screen: CGRect, park_ops: &mut Vec<MoveOp>) {
        let frame = self
            .store
            .frame(wid)
            .or_else(|| self.windows.get(&wid).map(|r| r.info.frame));
        if self.store.window_index(wid).is_some() {
            self.store.remove_window(wid);
        }
        self.store.delete_watcher(wid);
        self.store.set_hidden(wid, true);
        if let Some(frame) = frame {
            self.workspaces.save_frame(wid, frame);
        }
        let park = self.park_position_for(wid, screen);
        park_ops.push(MoveOp::position_only(wid, park.x, park.y));
    }

    // --- window lifecycle ---------------------------------------------------

    fn on_window_created(&mut self, handle: WindowHandle, info: WindowInfo, retile: bool) {
        let wid = handle.window_id();
        if self.windows.contains_key(&wid) {
            // Already tracked: a deminiaturized or re-shown window returns
            // to the grid of its workspace.
            if !self.paused
                && !self.store.is_tracked(wid)
                && !self.store.is_hidden(wid)
                && !self.store.is_floating(wid)
                && self.workspaces.workspace_of(wid) == Some(self.workspaces.current())
            {
                self.add_window(wid);
                if retile {
                    if let Some(space) = self.active_space() {
                        self.retile(space);
                    }
                }
            }
            return;
        }

        let workspace = self
            .workspaces
            .resolve_workspace(&info.title, &info.app_name)
            .unwrap_or(self.workspaces.current())
            .to_string();
        self.workspaces.assign(wid, &workspace);
        self.workspaces.maybe_cache_jump_window(&workspace, &info.title, &handle);
        self.windows.insert(wid, WindowRecord { handle, info });
        debug!("window {wid} assigned to workspace '{workspace}'");

        if self.workspaces.is_scratch(&workspace) {
            self.store.set_floating(wid, true);
        }

        if !self.paused && !self.store.is_floating(wid) {
            self.add_window(wid);
            if retile {
                if let Some(space) = self.active_space() {
                    self.retile(space);
                }
            }
        }

        if workspace != self.workspaces.current() {
            // Let macOS finish the creation animation before yanking the
            // window off-screen.
            self.schedule(self.config.settings.park_delay_ms, Event::ParkDelayElapsed { wid });
        }
    }

    /// Inserts a known window into the grid: right of the previously
    /// focused window when that is on the same space, otherwise by the
    /// window's x-center relative to the existing columns.
    fn add_window(&mut self, wid: WindowId) {
        let Some(space) = self.active_space() else { return };
        if self.store.is_hidden(wid) || self.store.is_tracked(wid) {
            return;
        }
        let Some(record) = self.windows.get(&wid) else { return };
        if !record.info.is_standard {
            debug!("skipping non-maximizable window {wid}");
            return;
        }
        if record.info.is_tabbed {
            warn!(
                "not tiling '{}': native tab windows share frames and would corrupt the grid",
                record.info.title
            );
            return;
        }
        let handle = record.handle.clone();
        let frame = record.info.frame;

        let col = match self.focused.and_then(|f| self.store.window_index(f)) {
            Some(at) if at.space == space => at.col + 1,
            _ => {
                let center = self.store.frame(wid).unwrap_or(frame).mid().x;
                let cols = self.store.columns(space);
                let mut index = cols.len();
                for (i, col) in cols.iter().enumerate() {
                    let col_x = col
                        .windows()
                        .first()
                        .and_then(|w| self.store.frame(w.window_id()))
                        .map(|f| f.mid().x);
                    if let Some(col_x) = col_x {
                        if center < col_x {
                            index = i;
                            break;
                        }
                    }
                }
                index
            }
        };
        self.store.insert_column(space, col, handle);
        self.store.set_frame(wid, frame);
        self.store.ensure_watcher(wid);
    }

    fn on_window_destroyed(&mut self, wid: WindowId) {
        // Workspace bookkeeping always runs; a destroyed window must not
        // linger in any table no matter what else is going on.
        self.workspaces.remove_window(wid);
        self.windows.remove(&wid);

        let indexed = self.store.window_index(wid);
        if let Some(at) = indexed {
            if self.paused {
                self.store.remove_window(wid);
            } else {
                self.remove_window(wid, false);
                self.retile(at.space);
            }
        }
        self.store.forget_window(wid);
        self.clear_focus_refs(wid);
    }

    /// Removes a window from the grid, handing focus to a neighbor unless
    /// told otherwise.
    fn remove_window(&mut self, wid: WindowId, skip_focus: bool) {
        let Some(at) = self.store.window_index(wid) else { return };
        let neighbor = if skip_focus { None } else { self.neighbor_for_focus(at, wid) };
        self.store.remove_window(wid);
        self.store.delete_watcher(wid);
        self.clear_focus_refs(wid);
        if let Some(neighbor) = neighbor {
            self.focus_handle(neighbor);
        }
    }

    fn clear_focus_refs(&mut self, wid: WindowId) {
        if self.focused == Some(wid) {
            self.focused = None;
        }
        if self.prev_focused == Some(wid) {
            self.prev_focused = None;
        }
        if self.prev_prev_focused == Some(wid) {
            self.prev_prev_focused = None;
        }
    }

    /// Neighbor to focus when a window leaves: below, above, left, right.
    fn neighbor_for_focus(&self, at: WindowAt, leaving: WindowId) -> Option<WindowHandle> {
        let cols = self.store.columns(at.space);
        let col = cols.get(at.col)?;
        col.windows()
            .get(at.row + 1)
            .or_else(|| at.row.checked_sub(1).and_then(|row| col.windows().get(row)))
            .or_else(|| {
                at.col
                    .checked_sub(1)
                    .and_then(|c| cols.get(c))
                    .and_then(|c| c.windows().first())
            })
            .or_else(|| cols.get(at.col + 1).and_then(|c| c.windows().first()))
            .filter(|w| w.window_id() != leaving)
            .cloned()
    }

    fn on_window_focused(&mut self, wid: WindowId) {
        if self.switching {
            return;
        }
        // Any focus event supersedes a pending debounced switch.
        self.focus_debounce_generation += 1;
        let Some(workspace) = self.workspaces.workspace_of(wid).map(str::to_string) else {
            return;
        };

        if workspace == self.workspaces.current() {
            self.workspaces.set_last_focused(&workspace, Some(wid));
            if !self.paused && !self.store.is_hidden(wid) {
                self.note_focus(wid);
            }
        } else {
            // Focus rests on another workspace's window (a notification
            // click, cmd-tab). Follow it there only if it stays put.
            let generation = self.focus_debounce_generation;
            self.schedule(
                self.config.settings.focus_debounce_ms,
                Event::FocusDebounceElapsed { wid, generation },
            );
        }
    }

    fn on_focus_debounce_elapsed(&mut self, wid: WindowId, generation: u64) {
        if generation != self.focus_debounce_generation {
            return;
        }
        let Some(workspace) = self.workspaces.workspace_of(wid).map(str::to_string) else {
            return;
        };
        if workspace == self.workspaces.current() {
            return;
        }
        // Not a user-initiated jump, so no jump point is recorded.
        self.switch_to_inner(&workspace, false);
    }

    /// Two-step focus history drives the tiler's scroll-direction
    /// inference; the two-back entry must shift before the one-back entry
    /// is overwritten.
    fn note_focus(&mut self, wid: WindowId) {
        if self.focused == Some(wid) {
            return;
        }
        self.prev_prev_focused = self.prev_focused;
        self.prev_focused = self.focused;
        self.focused = Some(wid);
    }

    fn focus_handle(&mut self, handle: WindowHandle) {
        let wid = handle.window_id();
        handle.focus();
        self.note_focus(wid);
        if self.workspaces.workspace_of(wid) == Some(self.workspaces.current()) {
            let current = self.workspaces.current().to_string();
            self.workspaces.set_last_focused(&current, Some(wid));
        }
        let delay = (self.config.settings.animation_duration * 1000.0) as u64;
        self.schedule(delay, Event::RefocusElapsed { wid });
    }

    fn on_window_frame_changed(&mut self, wid: WindowId, frame: CGRect) {
        if self.paused || self.store.is_hidden(wid) {
            return;
        }
        // Writes we made ourselves come back as events; the stopped watcher
        // marks them.
        if !self.store.watcher_running(wid) {
            return;
        }
        let Some(at) = self.store.window_index(wid) else { return };
        let previous = self.store.frame(wid);
        if previous.is_some_and(|f| f.same_as(frame)) {
            return;
        }
        self.store.set_frame(wid, frame);
        self.retile(at.space);
    }

    fn on_window_not_visible(&mut self, wid: WindowId) {
        if self.paused {
            return;
        }
        if let Some(at) = self.store.window_index(wid) {
            self.remove_window(wid, false);
            self.retile(at.space);
        }
    }

    // --- focus / swap / slurp / barf ----------------------------------------

    fn focus_window(&mut self, target: FocusTarget) {
        let Some(space) = self.active_space() else { return };
        let from = self
            .focused
            .and_then(|f| self.store.window_index(f))
            .filter(|at| at.space == space);
        let Some(from) = from else {
            // Nothing sensibly focused: take the first window.
            if let Some(handle) =
                self.store.columns(space).first().and_then(|c| c.windows().first()).cloned()
            {
                self.focus_handle(handle);
                self.retile(space);
            }
            return;
        };
        let Some(next) = self.target_in_direction(from, target) else { return };
        self.focus_handle(next);
        self.retile(space);
    }

    fn target_in_direction(&self, from: WindowAt, target: FocusTarget) -> Option<WindowHandle> {
        let cols = self.store.columns(from.space);
        let handle = match target {
            FocusTarget::Direction(Direction::Left) => {
                let col = cols.get(from.col.checked_sub(1)?)?;
                col.windows().get(from.row.min(col.len() - 1))?
            }
            FocusTarget::Direction(Direction::Right) => {
                let col = cols.get(from.col + 1)?;
                col.windows().get(from.row.min(col.len() - 1))?
            }
            FocusTarget::Direction(Direction::Up) => {
                cols.get(from.col)?.windows().get(from.row.checked_sub(1)?)?
            }
            FocusTarget::Direction(Direction::Down) => {
                cols.get(from.col)?.windows().get(from.row + 1)?
            }
            FocusTarget::Next => {
                let col = cols.get(from.col)?;
                match col.windows().get(from.row + 1) {
                    Some(next) => next,
                    None => {
                        let next_col = if from.col + 1 < cols.len() { from.col + 1 } else { 0 };
                        cols.get(next_col)?.windows().first()?
                    }
                }
            }
            FocusTarget::Previous => {
                let col = cols.get(from.col)?;
                match from.row.checked_sub(1).and_then(|row| col.windows().get(row)) {
                    Some(prev) => prev,
                    None => {
                        let prev_col = from.col.checked_sub(1).unwrap_or(cols.len() - 1);
                        cols.get(prev_col)?.windows().last()?
                    }
                }
            }
        };
        Some(handle.clone())
    }

    fn swap_windows(&mut self, direction: Direction) {
        let Some(focused) = self.focused else { return };
        let Some(at) = self.store.window_index(focused) else { return };
        match direction {
            Direction::Left | Direction::Right => {
                let target = match direction {
                    Direction::Left => at.col.checked_sub(1),
                    _ => (at.col + 1 < self.store.columns(at.space).len()).then_some(at.col + 1),
                };
                let Some(target) = target else { return };
                // The tiler anchors on the focused window's memoized x, so
                // it takes the target column's position along in the swap.
                let target_x = self
                    .store
                    .column(at.space, target)
                    .and_then(|c| c.windows().first())
                    .and_then(|w| self.store.x_position(at.space, w.window_id()));
                self.store.swap_columns(at.space, at.col, target);
                if let Some(x) = target_x {
                    self.store.set_x_position(at.space, focused, x);
                }
            }
            Direction::Up | Direction::Down => {
                let target = match direction {
                    Direction::Up => at.row.checked_sub(1),
                    _ => Some(at.row + 1),
                };
                let Some(target) = target else { return };
                self.store.swap_rows(at.space, at.col, at.row, target);
            }
        }
        self.retile(at.space);
    }

    /// Moves the focused window into the bottom of the column to its left
    /// and re-equalizes row heights there.
    fn slurp_window(&mut self) {
        let Some(focused) = self.focused else { return };
        let Some(at) = self.store.window_index(focused) else { return };
        let Some(target) = at.col.checked_sub(1) else { return };
        if !self.store.move_to_column_end(focused, target) {
            return;
        }
        if let Some(new_at) = self.store.window_index(focused) {
            self.equalize_column(new_at.space, new_at.col);
        }
        self.retile(at.space);
    }

    /// Pushes the focused window out of its column into a new one on the
    /// right; the remaining rows re-share the column.
    fn barf_window(&mut self) {
        let Some(focused) = self.focused else { return };
        let Some(at) = self.store.window_index(focused) else { return };
        if self.store.column(at.space, at.col).map_or(true, |c| c.len() <= 1) {
            return;
        }
        if !self.store.extract_to_column(focused, at.col + 1) {
            return;
        }
        // The rows left behind share the freed space.
        self.equalize_column(at.space, at.col);
        self.retile(at.space);
    }

    /// Rewrites the stored heights of a column's windows to an even split
    /// of the canvas, so the next tile pass applies them.
    fn equalize_column(&mut self, space: SpaceId, col: usize) {
        let Some(screen) = self.screen else { return };
        let canvas =
            crate::layout_engine::compute_canvas(screen.frame, &self.config.settings.layout);
        let gap_v = self.config.settings.layout.gaps.inner.vertical;
        let Some(column) = self.store.column(space, col) else { return };
        let n = column.len() as f64;
        let height = ((canvas.height() - (n - 1.0) * gap_v) / n).max(1.0);
        let wids: Vec<WindowId> = column.ids().collect();
        for wid in wids {
            let frame = self.store.frame(wid).unwrap_or_else(|| {
                CGRect::new(CGPoint::new(canvas.x, canvas.y), CGSize::new(500.0, height))
            });
            self.store.set_frame(
                wid,
                CGRect::new(frame.origin, CGSize::new(frame.size.width, height)),
            );
        }
    }

    // --- tiling -------------------------------------------------------------

    fn retile(&mut self, space: SpaceId) {
        let Some(screen) = self.screen else { return };
        let ctx = TileContext {
            focused: self.focused,
            prev_prev_focused: self.prev_prev_focused,
        };
        let plan = {
            let store = &self.store;
            let windows = &self.windows;
            let size_of = |wid: WindowId| -> CGSize {
                store
                    .frame(wid)
                    .map(|f| f.size)
                    .or_else(|| windows.get(&wid).map(|r| r.info.frame.size))
                    .unwrap_or(CGSize::new(500.0, 500.0))
            };
            tile_space(
                store,
                space,
                screen.frame,
                &self.config.settings.layout,
                ctx,
                &size_of,
            )
        };
        let Some(plan) = plan else {
            warn!("no anchor resolvable on {space}; rescanning windows");
            self.refresh_windows();
            return;
        };

        let mut ops = Vec::new();
        let mut moved = Vec::new();
        for (wid, frame) in plan.moves {
            if self.store.is_hidden(wid) {
                continue;
            }
            let frame = frame.round();
            if self.store.frame(wid).is_some_and(|f| f.same_as(frame)) {
                continue;
            }
            self.store.stop_watcher(wid);
            self.store.set_frame(wid, frame);
            ops.push(MoveOp::place(wid, frame));
            moved.push(wid);
        }
        for (wid, x) in plan.x_positions {
            self.store.set_x_position(space, wid, x);
        }
        if !ops.is_empty() {
            self.transport.move_windows(ops);
            self.schedule_watcher_restart(moved);
        }
    }

    fn schedule_watcher_restart(&mut self, wids: Vec<WindowId>) {
        if wids.is_empty() {
            return;
        }
        self.watcher_generation += 1;
        let generation = self.watcher_generation;
        for &wid in &wids {
            self.watcher_restart_pending.insert(wid, generation);
        }
        let delay =
            (self.config.settings.animation_duration * 1000.0) as u64 + WATCHER_RESTART_PADDING_MS;
        self.schedule(delay, Event::WatchersRestartElapsed { wids, generation });
    }

    /// Programmatic single-window move with watcher feedback prevention.
    pub fn move_window(&mut self, wid: WindowId, frame: CGRect) {
        if self.store.is_hidden(wid) {
            return;
        }
        let frame = frame.round();
        if self.store.frame(wid).is_some_and(|f| f.same_as(frame)) {
            return;
        }
        self.store.stop_watcher(wid);
        self.store.set_frame(wid, frame);
        self.transport.move_windows(vec![MoveOp::place(wid, frame)]);
        self.schedule_watcher_restart(vec![wid]);
    }

    /// Reconciles the model against the live window set: stale handles are
    /// treated as destroyed, and live windows of the current workspace that
    /// fell out of the grid are re-added.
    fn refresh_windows(&mut self) {
        let wids: Vec<WindowId> = self.windows.keys().copied().collect();
        let mut changed = false;
        for wid in wids {
            let alive = self.windows.get(&wid).is_some_and(|r| r.handle.id().is_ok());
            if !alive {
                debug!("window {wid} is gone; dropping");
                self.workspaces.remove_window(wid);
                self.windows.remove(&wid);
                if self.store.window_index(wid).is_some() {
                    self.store.remove_window(wid);
                }
                self.store.forget_window(wid);
                self.clear_focus_refs(wid);
                changed = true;
                continue;
            }
            let on_current =
                self.workspaces.workspace_of(wid) == Some(self.workspaces.current());
            if on_current
                && !self.store.is_tracked(wid)
                && !self.store.is_hidden(wid)
                && !self.store.is_floating(wid)
            {
                self.add_window(wid);
                changed = true;
            }
        }
        if changed {
            if let Some(space) = self.active_space() {
                self.retile(space);
            }
        }
    }

    // --- workspace switching ------------------------------------------------

    pub fn switch_to(&mut self, name: &str) { self.switch_to_inner(name, true); }

    fn switch_to_inner(&mut self, name: &str, save_jump: bool) {
        if self.switching {
            debug!("switch to '{name}' dropped: switch already in flight");
            return;
        }
        if !self.workspaces.contains(name) {
            return;
        }
        if name == self.workspaces.current() {
            if self.workspaces.toggle_back() && self.workspaces.prev_jump().is_some() {
                self.toggle_jump();
            }
            return;
        }
        let Some(screen) = self.screen else { return };
        let Some(space) = screen.space else { return };

        if save_jump {
            let current = self.workspaces.current().to_string();
            self.workspaces.save_jump_point(&current, self.focused);
        }

        self.switching = true;
        self.paused = true;
        let old = self.workspaces.current().to_string();
        self.workspaces.set_current(name);

        if let Some(focused) = self.focused {
            if self.workspaces.workspace_of(focused) == Some(old.as_str()) {
                self.workspaces.set_last_focused(&old, Some(focused));
            }
        }

        let old_members: Vec<WindowId> = self.workspaces.members(&old).collect();
        let new_members: Vec<WindowId> = self.workspaces.members(name).collect();

        for &wid in &old_members {
            self.store.stop_watcher(wid);
        }

        // Remember where the outgoing windows sat; restore reads from here.
        let frames = self.transport.read_frames(old_members.clone());
        for (wid, frame) in frames {
            self.workspaces.save_frame(wid, frame);
        }

        self.workspaces.set_snapshot(&old, self.store.snapshot_space(space));

        for &wid in &new_members {
            self.store.set_hidden(wid, false);
        }
        for &wid in &old_members {
            self.store.set_hidden(wid, true);
        }

        let restore_ops: Vec<MoveOp> = new_members
            .iter()
            .filter_map(|&wid| self.workspaces.take_frame(wid).map(|f| MoveOp::place(wid, f)))
            .collect();
        let park_ops: Vec<MoveOp> = old_members
            .iter()
            .map(|&wid| {
                let park = self.park_position_for(wid, screen.frame);
                MoveOp::position_only(wid, park.x, park.y)
            })
            .collect();

        // The user is waiting on the incoming windows; the outgoing ones
        // can travel behind our back.
        if !restore_ops.is_empty() {
            self.transport.move_windows(restore_ops);
        }
        if !park_ops.is_empty() {
            self.transport.move_windows_async(park_ops);
        }

        if self.workspaces.is_scratch(name) {
            for &wid in &new_members {
                self.store.set_floating(wid, true);
            }
            self.store.restore_space(space, None);
            let focus_wid = self.workspaces.last_focused(name);
            let target = focus_wid
                .and_then(|w| self.windows.get(&w))
                .or_else(|| new_members.iter().find_map(|w| self.windows.get(w)))
                .map(|r| r.handle.clone());
            if let Some(handle) = target {
                self.focus_handle(handle);
            }
            // Events stay paused on the scratch workspace so its floating
            // windows never trigger a retile.
            self.switching = false;
            self.notify_switch(name);
            return;
        }

        // Restore the target's grid, dropping anything that no longer
        // belongs to it.
        let mut snapshot = self.workspaces.take_snapshot(name).unwrap_or_default();
        snapshot.retain(|w| {
            w.id().is_ok() && self.workspaces.is_member(name, w.window_id())
        });
        let snapshot_empty = snapshot.is_empty();

        let focus_wid = self.workspaces.last_focused(name);
        let pending_focus =
            focus_wid.and_then(|w| self.workspaces.pending_handle(name, w)).cloned();
        let snapshot_focus = focus_wid.and_then(|w| snapshot.handle_for(w)).cloned();
        let snapshot_first = snapshot.first_window().cloned();

        if snapshot_empty {
            self.store.restore_space(space, None);
        } else {
            self.store.restore_space(space, Some(snapshot));
            self.store.ensure_watchers(space);
            for &wid in &new_members {
                self.store.start_watcher(wid);
            }
        }

        // Windows that arrived while the workspace was inactive join the
        // grid now. Each handle is validated; the OS may have destroyed any
        // of them without telling us.
        let pending = self.workspaces.take_pending(name);
        let had_pending = !pending.is_empty();
        for (wid, handle) in pending {
            if handle.id().is_err() {
                debug!("pending window {wid} went stale; dropping");
                continue;
            }
            if self.store.is_floating(wid)
                || self.store.is_tracked(wid)
                || !self.workspaces.is_member(name, wid)
            {
                continue;
            }
            self.add_window(wid);
        }

        if snapshot_empty || self.screen_changed || had_pending {
            self.retile(space);
        }
        if self.screen_changed {
            self.screen_changed = false;
            self.refresh_windows();
        }

        let target = pending_focus
            .or(snapshot_focus)
            .or(snapshot_first)
            .or_else(|| new_members.iter().find_map(|w| self.windows.get(w)).map(|r| r.handle.clone()));
        if let Some(handle) = target {
            self.focus_handle(handle);
        }

        self.paused = false;
        self.switching = false;
        self.notify_switch(name);
    }

    fn notify_switch(&mut self, name: &str) {
        if let Some(on_switch) = &mut self.on_switch {
            on_switch(name);
        }
    }

    /// Sends the focused window to another workspace. If that workspace is
    /// inactive the window parks immediately and materializes there on the
    /// next switch.
    fn move_window_to(&mut self, name: &str) {
        if !self.workspaces.contains(name) {
            return;
        }
        let Some(focused) = self.focused else { return };
        if self.workspaces.is_member(name, focused) {
            return;
        }
        let Some(record) = self.windows.get(&focused) else { return };
        let handle = record.handle.clone();
        let src = self.workspaces.workspace_of(focused).map(str::to_string);

        self.workspaces.assign(focused, name);

        // Crossing the scratch boundary floats or unfloats the window.
        if self.workspaces.is_scratch(name) {
            self.store.set_floating(focused, true);
        } else if src.as_deref().is_some_and(|s| self.workspaces.is_scratch(s)) {
            self.store.set_floating(focused, false);
        }

        self.workspaces.push_pending(name, focused, handle);
        // Make it the one the user lands on when they follow it over.
        self.workspaces.set_last_focused(name, Some(focused));

        if name == self.workspaces.current() {
            return;
        }
        let Some(screen) = self.screen else { return };
        let Some(space) = screen.space else { return };

        let neighbor = self
            .store
            .window_index(focused)
            .and_then(|at| self.neighbor_for_focus(at, focused));
        self.remove_window(focused, true);
        let mut park_ops = Vec::new();
        self.park_window(focused, screen.frame, &mut park_ops);
        self.transport.move_windows(park_ops);

        if let Some(neighbor) = neighbor {
            self.focus_handle(neighbor);
        }

        let current = self.workspaces.current().to_string();
        self.workspaces.set_snapshot(&current, self.store.snapshot_space(space));
        if !self.store.columns(space).is_empty() {
            self.retile(space);
        }
    }

    // --- jump targets -------------------------------------------------------

    fn jump_to_app(&mut self, category: &str) {
        let current = self.workspaces.current().to_string();
        let Some(target) = self.workspaces.jump_target(category, &current).cloned() else {
            return;
        };

        if self.workspaces.toggle_back() && self.focused_matches_target(&target) {
            self.toggle_jump();
            return;
        }

        self.workspaces.save_jump_point(&current, self.focused);

        // Cache first: one membership check and a title re-validation,
        // zero AX window enumeration.
        if let Some(handle) = self.workspaces.cached_jump_window(category, &current).cloned() {
            let wid = handle.window_id();
            let valid = handle.id().is_ok()
                && self.workspaces.is_member(&current, wid)
                && match target.title() {
                    Some(pattern) => regex::Regex::new(pattern)
                        .ok()
                        .zip(handle.title().ok())
                        .is_some_and(|(re, title)| re.is_match(&title)),
                    None => true,
                };
            if valid {
                self.focus_handle(handle);
                return;
            }
            self.workspaces.evict_jump_window(category, &current);
        }

        let candidate = self
            .windows
            .iter()
            .filter(|(wid, record)| {
                record.info.app_name == target.app()
                    && self.workspaces.is_member(&current, **wid)
                    && match target.title() {
                        Some(pattern) => regex::Regex::new(pattern)
                            .ok()
                            .is_some_and(|re| re.is_match(&record.info.title)),
                        None => true,
                    }
            })
            .map(|(_, record)| record.handle.clone())
            .next();
        if let Some(handle) = candidate {
            self.focus_handle(handle);
            return;
        }

        match target.launch() {
            Some(argv) => self.host.spawn_process(argv),
            None => self.host.launch_or_focus(target.app()),
        }
    }

    fn focused_matches_target(&self, target: &crate::common::config::JumpTarget) -> bool {
        let Some(record) = self.focused.and_then(|w| self.windows.get(&w)) else {
            return false;
        };
        if record.info.app_name != target.app() {
            return false;
        }
        match target.title() {
            Some(pattern) => regex::Regex::new(pattern)
                .ok()
                .is_some_and(|re| re.is_match(&record.info.title)),
            None => true,
        }
    }

    /// Ping-pongs between the current position and the saved jump point.
    fn toggle_jump(&mut self) {
        let Some(jump) = self.workspaces.take_prev_jump() else { return };
        let current = self.workspaces.current().to_string();
        self.workspaces.save_jump_point(&current, self.focused);

        if jump.workspace != current {
            if let Some(wid) = jump.window_id {
                self.workspaces.set_last_focused(&jump.workspace, Some(wid));
            }
            self.switch_to_inner(&jump.workspace, false);
        } else if let Some(wid) = jump.window_id {
            if self.workspaces.is_member(&current, wid) {
                if let Some(record) = self.windows.get(&wid) {
                    let handle = record.handle.clone();
                    self.focus_handle(handle);
                }
            }
        }
    }

    /// A window created onto an inactive workspace leaves the grid and
    /// parks once macOS has finished animating it in.
    fn on_park_delay_elapsed(&mut self, wid: WindowId) {
        let Some(workspace) = self.workspaces.workspace_of(wid).map(str::to_string) else {
            return;
        };
        if workspace == self.workspaces.current() {
            return;
        }
        let Some(screen) = self.screen else { return };
        let was_indexed = self.store.window_index(wid).is_some();
        if was_indexed {
            self.remove_window(wid, true);
        }
        let mut park_ops = Vec::new();
        self.park_window(wid, screen.frame, &mut park_ops);
        self.transport.move_windows(park_ops);
        if was_indexed {
            if let Some(space) = self.active_space() {
                self.retile(space);
            }
        }
    }

    // --- debugging ----------------------------------------------------------

    pub fn draw_state(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let stats = self.workspaces.stats();
        let _ = writeln!(
            out,
            "current='{}' windows={} focused={:?}",
            self.workspaces.current(),
            stats.tracked_windows,
            self.focused
        );
        for (name, count) in &stats.window_counts {
            let _ = writeln!(out, "  workspace '{name}': {count} windows");
        }
        if let Some(space) = self.active_space() {
            for (idx, col) in self.store.columns(space).iter().enumerate() {
                let _ = write!(out, "  col {idx}:");
                for handle in col.windows() {
                    let wid = handle.window_id();
                    if Some(wid) == self.focused {
                        let _ = write!(out, " [*{wid}]");
                    } else {
                        let _ = write!(out, " [{wid}]");
                    }
                }
                let _ = writeln!(out);
            }
        }
        out
    }
}
