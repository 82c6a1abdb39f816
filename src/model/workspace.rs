//! Virtual workspace bookkeeping: membership, routing rules, per-workspace
//! snapshots and saved frames, pending windows, and jump points.
//!
//! Workspaces partition the tracked windows of a single physical space.
//! The inactive ones exist only as parked windows plus the snapshot state
//! kept here; the switch protocol in the reactor consumes and refills these
//! tables. This type holds no OS resources and performs no AX calls.

use objc2_core_foundation::{CGPoint, CGRect};
use regex::Regex;
use tracing::warn;

use crate::common::collections::{HashMap, HashSet};
use crate::common::config::{JumpTarget, WorkspaceSettings};
use crate::model::store::SpaceSnapshot;
use crate::sys::app::{WindowHandle, WindowId};
use crate::sys::geometry::CGRectExt;

/// The position captured before a user-initiated switch or jump;
/// `toggle_jump` ping-pongs between this and the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpPoint {
    pub workspace: String,
    pub window_id: Option<WindowId>,
}

pub struct WorkspaceManager {
    names: Vec<String>,
    current: String,
    scratch: Option<String>,
    toggle_back: bool,
    members: HashMap<String, HashSet<WindowId>>,
    win_ws: HashMap<WindowId, String>,
    snapshots: HashMap<String, SpaceSnapshot>,
    /// Last on-screen frame of each parked window, consumed on restore.
    saved_frames: HashMap<WindowId, CGRect>,
    last_focused: HashMap<String, WindowId>,
    /// Windows moved into a workspace while it was inactive; materialized
    /// into the grid at the next switch.
    pending: HashMap<String, Vec<(WindowId, WindowHandle)>>,
    prev_jump: Option<JumpPoint>,
    /// `(category, workspace)` -> window, populated when a created window's
    /// title matches a jump target pattern. A hit avoids all AX calls.
    jump_cache: HashMap<(String, String), WindowHandle>,
    app_rules: HashMap<String, String>,
    title_rules: Vec<(Regex, String)>,
    jump_targets: HashMap<String, HashMap<String, JumpTarget>>,
}

impl WorkspaceManager {
    pub fn new(settings: &WorkspaceSettings) -> WorkspaceManager {
        let names = settings.names.clone();
        let current = names.first().cloned().unwrap_or_else(|| "main".to_string());
        let mut members: HashMap<String, HashSet<WindowId>> = HashMap::default();
        for name in &names {
            members.insert(name.clone(), HashSet::default());
        }
        let title_rules = settings
            .title_rules
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((re, rule.workspace.clone())),
                Err(e) => {
                    warn!("Ignoring title rule with invalid pattern '{}': {e}", rule.pattern);
                    None
                }
            })
            .collect();
        WorkspaceManager {
            names,
            current,
            scratch: settings.scratch.clone(),
            toggle_back: settings.toggle_back,
            members,
            win_ws: HashMap::default(),
            snapshots: HashMap::default(),
            saved_frames: HashMap::default(),
            last_focused: HashMap::default(),
            pending: HashMap::default(),
            prev_jump: None,
            jump_cache: HashMap::default(),
            app_rules: settings.app_rules.clone(),
            title_rules,
            jump_targets: settings.jump_targets.clone(),
        }
    }

    // --- identity -----------------------------------------------------------

    pub fn names(&self) -> &[String] { &self.names }

    pub fn current(&self) -> &str { &self.current }

    pub fn set_current(&mut self, name: &str) {
        debug_assert!(self.contains(name));
        self.current = name.to_string();
    }

    pub fn contains(&self, name: &str) -> bool { self.names.iter().any(|n| n == name) }

    pub fn is_scratch(&self, name: &str) -> bool { self.scratch.as_deref() == Some(name) }

    pub fn toggle_back(&self) -> bool { self.toggle_back }

    /// The workspace after `current` in configured order, wrapping. With
    /// `skip_empty`, workspaces with no members are stepped over (the
    /// current one always counts as a stop so the search terminates).
    pub fn next_workspace(&self, skip_empty: bool) -> Option<&str> {
        self.step_workspace(1, skip_empty)
    }

    pub fn prev_workspace(&self, skip_empty: bool) -> Option<&str> {
        self.step_workspace(-1, skip_empty)
    }

    fn step_workspace(&self, dir: isize, skip_empty: bool) -> Option<&str> {
        let len = self.names.len() as isize;
        if len == 0 {
            return None;
        }
        let start = self.names.iter().position(|n| n == &self.current)? as isize;
        let mut i = (start + dir).rem_euclid(len);
        for _ in 0..len {
            let name = &self.names[i as usize];
            if name == &self.current {
                return None;
            }
            if !skip_empty || !self.members[name].is_empty() {
                return Some(name);
            }
            i = (i + dir).rem_euclid(len);
        }
        None
    }

    // --- membership ---------------------------------------------------------

    /// Routes a window by rules: first matching title rule, else the app
    /// rule for the app's title, else none.
    pub fn resolve_workspace(&self, title: &str, app_name: &str) -> Option<&str> {
        for (re, workspace) in &self.title_rules {
            if re.is_match(title) {
                return Some(workspace);
            }
        }
        self.app_rules.get(app_name).map(String::as_str)
    }

    /// Puts a window in a workspace, removing it from any previous one (and
    /// that workspace's pending list). No-op for unknown workspace names.
    pub fn assign(&mut self, wid: WindowId, workspace: &str) -> bool {
        if !self.contains(workspace) {
            return false;
        }
        if let Some(old) = self.win_ws.get(&wid).cloned() {
            if old == workspace {
                return true;
            }
            if let Some(set) = self.members.get_mut(&old) {
                set.remove(&wid);
            }
            self.remove_pending(&old, wid);
        }
        self.members.get_mut(workspace).unwrap().insert(wid);
        self.win_ws.insert(wid, workspace.to_string());
        true
    }

    pub fn workspace_of(&self, wid: WindowId) -> Option<&str> {
        self.win_ws.get(&wid).map(String::as_str)
    }

    pub fn is_tracked(&self, wid: WindowId) -> bool { self.win_ws.contains_key(&wid) }

    pub fn members(&self, workspace: &str) -> impl Iterator<Item = WindowId> + '_ {
        self.members.get(workspace).into_iter().flatten().copied()
    }

    pub fn member_count(&self, workspace: &str) -> usize {
        self.members.get(workspace).map_or(0, HashSet::len)
    }

    pub fn is_member(&self, workspace: &str, wid: WindowId) -> bool {
        self.members.get(workspace).is_some_and(|set| set.contains(&wid))
    }

    /// Scrubs every table that could reference a destroyed window.
    pub fn remove_window(&mut self, wid: WindowId) {
        if let Some(workspace) = self.win_ws.remove(&wid) {
            if let Some(set) = self.members.get_mut(&workspace) {
                set.remove(&wid);
            }
            self.remove_pending(&workspace, wid);
            if self.last_focused.get(&workspace) == Some(&wid) {
                self.last_focused.remove(&workspace);
            }
            if let Some(snapshot) = self.snapshots.get_mut(&workspace) {
                snapshot.retain(|w| w.window_id() != wid);
            }
        }
        self.saved_frames.remove(&wid);
        if self.prev_jump.as_ref().is_some_and(|j| j.window_id == Some(wid)) {
            self.prev_jump = None;
        }
        self.jump_cache.retain(|_, handle| handle.window_id() != wid);
    }

    // --- pending ------------------------------------------------------------

    /// Queues a window for materialization at the next switch to
    /// `workspace`. Re-queuing replaces the previous entry.
    pub fn push_pending(&mut self, workspace: &str, wid: WindowId, handle: WindowHandle) {
        let list = self.pending.entry(workspace.to_string()).or_default();
        list.retain(|(pending_wid, _)| *pending_wid != wid);
        list.push((wid, handle));
    }

    pub fn take_pending(&mut self, workspace: &str) -> Vec<(WindowId, WindowHandle)> {
        self.pending.remove(workspace).unwrap_or_default()
    }

    pub fn pending_handle(&self, workspace: &str, wid: WindowId) -> Option<&WindowHandle> {
        self.pending
            .get(workspace)?
            .iter()
            .find(|(pending_wid, _)| *pending_wid == wid)
            .map(|(_, handle)| handle)
    }

    pub fn has_pending(&self, workspace: &str) -> bool {
        self.pending.get(workspace).is_some_and(|list| !list.is_empty())
    }

    fn remove_pending(&mut self, workspace: &str, wid: WindowId) {
        if let Some(list) = self.pending.get_mut(workspace) {
            list.retain(|(pending_wid, _)| *pending_wid != wid);
            if list.is_empty() {
                self.pending.remove(workspace);
            }
        }
    }

    // --- snapshots and frames -----------------------------------------------

    pub fn set_snapshot(&mut self, workspace: &str, snapshot: SpaceSnapshot) {
        self.snapshots.insert(workspace.to_string(), snapshot);
    }

    pub fn take_snapshot(&mut self, workspace: &str) -> Option<SpaceSnapshot> {
        self.snapshots.remove(workspace)
    }

    pub fn snapshot(&self, workspace: &str) -> Option<&SpaceSnapshot> {
        self.snapshots.get(workspace)
    }

    pub fn save_frame(&mut self, wid: WindowId, frame: CGRect) {
        self.saved_frames.insert(wid, frame);
    }

    /// The frame to restore a parked window to, consumed so a later switch
    /// cannot restore a stale rect.
    pub fn take_frame(&mut self, wid: WindowId) -> Option<CGRect> {
        self.saved_frames.remove(&wid)
    }

    pub fn saved_frame(&self, wid: WindowId) -> Option<CGRect> {
        self.saved_frames.get(&wid).copied()
    }

    pub fn set_last_focused(&mut self, workspace: &str, wid: Option<WindowId>) {
        match wid {
            Some(wid) => {
                self.last_focused.insert(workspace.to_string(), wid);
            }
            None => {
                self.last_focused.remove(workspace);
            }
        }
    }

    pub fn last_focused(&self, workspace: &str) -> Option<WindowId> {
        self.last_focused.get(workspace).copied()
    }

    // --- jump points --------------------------------------------------------

    pub fn save_jump_point(&mut self, workspace: &str, window_id: Option<WindowId>) {
        self.prev_jump = Some(JumpPoint {
            workspace: workspace.to_string(),
            window_id,
        });
    }

    pub fn prev_jump(&self) -> Option<&JumpPoint> { self.prev_jump.as_ref() }

    pub fn take_prev_jump(&mut self) -> Option<JumpPoint> { self.prev_jump.take() }

    pub fn jump_target(&self, category: &str, workspace: &str) -> Option<&JumpTarget> {
        self.jump_targets.get(category)?.get(workspace)
    }

    /// Caches a window for jump-target lookups when its title matches a
    /// configured pattern for its workspace.
    pub fn maybe_cache_jump_window(
        &mut self,
        workspace: &str,
        title: &str,
        handle: &WindowHandle,
    ) {
        for (category, targets) in &self.jump_targets {
            let Some(target) = targets.get(workspace) else { continue };
            let Some(pattern) = target.title() else { continue };
            match Regex::new(pattern) {
                Ok(re) if re.is_match(title) => {
                    self.jump_cache
                        .insert((category.clone(), workspace.to_string()), handle.clone());
                }
                Ok(_) => {}
                Err(e) => warn!("Invalid jump target title pattern '{pattern}': {e}"),
            }
        }
    }

    pub fn cached_jump_window(&self, category: &str, workspace: &str) -> Option<&WindowHandle> {
        self.jump_cache.get(&(category.to_string(), workspace.to_string()))
    }

    pub fn evict_jump_window(&mut self, category: &str, workspace: &str) {
        self.jump_cache.remove(&(category.to_string(), workspace.to_string()));
    }

    // --- parking ------------------------------------------------------------

    /// Where parked windows go: the bottom-right pixel. One pixel stays on
    /// screen so macOS does not clamp the window back. A couple of apps
    /// misbehave at that exact point and get their own offset.
    pub fn park_position(screen: CGRect, bundle_id: Option<&str>) -> CGPoint {
        let corner = screen.max();
        match bundle_id {
            Some("us.zoom.xos") => CGPoint::new(corner.x - 1.0, corner.y),
            _ => CGPoint::new(corner.x - 1.0, corner.y - 1.0),
        }
    }

    // --- stats --------------------------------------------------------------

    pub fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            workspaces: self.names.len(),
            tracked_windows: self.win_ws.len(),
            window_counts: self
                .names
                .iter()
                .map(|name| (name.clone(), self.member_count(name)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceStats {
    pub workspaces: usize,
    pub tracked_windows: usize,
    pub window_counts: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use objc2_core_foundation::CGSize;

    use super::*;
    use crate::common::config::TitleRule;
    use crate::sys::app::fake::FakeWindow;

    fn settings(names: &[&str]) -> WorkspaceSettings {
        WorkspaceSettings {
            names: names.iter().map(|s| s.to_string()).collect(),
            ..WorkspaceSettings::default()
        }
    }

    fn handle(pid: i32, idx: u32) -> WindowHandle {
        WindowHandle::fake(
            WindowId::new(pid, idx),
            Arc::new(FakeWindow::with_title("test")),
        )
    }

    #[test]
    fn membership_is_a_partition() {
        let mut manager = WorkspaceManager::new(&settings(&["personal", "work"]));
        let w1 = WindowId::new(1, 1);
        let w2 = WindowId::new(1, 2);

        assert!(manager.assign(w1, "personal"));
        assert!(manager.assign(w2, "work"));
        assert!(manager.assign(w1, "work"));

        assert!(!manager.is_member("personal", w1));
        assert!(manager.is_member("work", w1));
        assert_eq!(manager.workspace_of(w1), Some("work"));
        assert_eq!(manager.member_count("personal"), 0);
        assert_eq!(manager.member_count("work"), 2);

        assert!(!manager.assign(w1, "nonexistent"));
        assert_eq!(manager.workspace_of(w1), Some("work"));
    }

    #[test]
    fn rules_prefer_title_over_app() {
        let mut cfg = settings(&["personal", "work"]);
        cfg.app_rules.insert("Slack".to_string(), "work".to_string());
        cfg.title_rules.push(TitleRule {
            pattern: "(?i)standup".to_string(),
            workspace: "personal".to_string(),
        });
        let manager = WorkspaceManager::new(&cfg);

        assert_eq!(manager.resolve_workspace("Daily Standup", "Slack"), Some("personal"));
        assert_eq!(manager.resolve_workspace("general", "Slack"), Some("work"));
        assert_eq!(manager.resolve_workspace("general", "Mail"), None);
    }

    #[test]
    fn pending_entries_are_deduplicated() {
        let mut manager = WorkspaceManager::new(&settings(&["a", "b"]));
        let w = handle(1, 1);
        let wid = w.window_id();
        manager.assign(wid, "b");
        manager.push_pending("b", wid, w.clone());
        manager.push_pending("b", wid, w.clone());
        assert_eq!(manager.take_pending("b").len(), 1);
        assert!(!manager.has_pending("b"));
    }

    #[test]
    fn reassigning_clears_old_pending_entry() {
        let mut manager = WorkspaceManager::new(&settings(&["a", "b", "c"]));
        let w = handle(1, 1);
        let wid = w.window_id();
        manager.assign(wid, "b");
        manager.push_pending("b", wid, w.clone());
        manager.assign(wid, "c");
        assert!(!manager.has_pending("b"));
    }

    #[test]
    fn remove_window_scrubs_every_table() {
        let mut manager = WorkspaceManager::new(&settings(&["a", "b"]));
        let w = handle(1, 1);
        let wid = w.window_id();
        manager.assign(wid, "b");
        manager.push_pending("b", wid, w.clone());
        manager.set_last_focused("b", Some(wid));
        manager.save_frame(
            wid,
            CGRect::new(CGPoint::new(8.0, 48.0), CGSize::new(480.0, 644.0)),
        );
        manager.save_jump_point("a", Some(wid));

        manager.remove_window(wid);

        assert!(!manager.is_tracked(wid));
        assert!(!manager.has_pending("b"));
        assert_eq!(manager.last_focused("b"), None);
        assert_eq!(manager.saved_frame(wid), None);
        assert!(manager.prev_jump().is_none());
    }

    #[test]
    fn next_prev_wrap_and_skip_empty() {
        let mut manager = WorkspaceManager::new(&settings(&["a", "b", "c"]));
        assert_eq!(manager.next_workspace(false), Some("b"));
        assert_eq!(manager.prev_workspace(false), Some("c"));

        let w = handle(1, 1);
        manager.assign(w.window_id(), "c");
        assert_eq!(manager.next_workspace(true), Some("c"));
        assert_eq!(manager.prev_workspace(true), Some("c"));
    }

    #[test]
    fn park_position_is_bottom_right_pixel() {
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1440.0, 900.0));
        let p = WorkspaceManager::park_position(screen, None);
        assert_eq!((p.x, p.y), (1439.0, 899.0));
        let zoom = WorkspaceManager::park_position(screen, Some("us.zoom.xos"));
        assert_eq!((zoom.x, zoom.y), (1439.0, 900.0));
    }

    #[test]
    fn jump_cache_population_requires_title_match() {
        let mut cfg = settings(&["a", "b"]);
        let mut targets = HashMap::default();
        targets.insert(
            "a".to_string(),
            JumpTarget::Detailed {
                app: "WezTerm".to_string(),
                title: Some("scratchpad$".to_string()),
                launch: None,
            },
        );
        cfg.jump_targets.insert("terminal".to_string(), targets);
        let mut manager = WorkspaceManager::new(&cfg);

        let w = handle(1, 1);
        manager.maybe_cache_jump_window("a", "editor", &w);
        assert!(manager.cached_jump_window("terminal", "a").is_none());

        manager.maybe_cache_jump_window("a", "my scratchpad", &w);
        assert_eq!(
            manager.cached_jump_window("terminal", "a").map(|h| h.window_id()),
            Some(w.window_id())
        );

        manager.remove_window(w.window_id());
        assert!(manager.cached_jump_window("terminal", "a").is_none());
    }
}
