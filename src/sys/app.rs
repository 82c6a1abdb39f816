//! Process-level types: window identifiers, window metadata, and the
//! failure-tolerant handle used everywhere a window may already be gone.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

#[allow(non_camel_case_types)]
pub type pid_t = i32;

/// An identifier for a window, stable for the lifetime of the owning process.
///
/// The `idx` is the window-server id; `pid` is carried along so membership
/// traversal and batch grouping never have to ask the accessibility API for
/// it again.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct WindowId {
    pub pid: pid_t,
    pub idx: NonZeroU32,
}

impl WindowId {
    pub fn new(pid: pid_t, idx: u32) -> WindowId {
        WindowId {
            pid,
            idx: NonZeroU32::new(idx).expect("window server ids are non-zero"),
        }
    }

    pub fn wid(&self) -> u32 { self.idx.get() }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pid, self.idx)
    }
}

/// Window metadata captured at discovery time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowInfo {
    pub title: String,
    pub app_name: String,
    pub bundle_id: Option<String>,
    #[serde(with = "crate::sys::geometry::CGRectDef")]
    pub frame: objc2_core_foundation::CGRect,
    /// Standard, resizable window with a working zoom button.
    pub is_standard: bool,
    /// A tab inside a native-tabbed window (Finder, Terminal). These share a
    /// frame with their host window and must not enter the grid.
    pub is_tabbed: bool,
}

/// The window became invalid under us; the OS destroyed it without (or
/// before) telling us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("window handle is stale")]
pub struct StaleWindow;

/// A reference to a live window. The OS owns the window; every read through
/// the handle can fail, and callers are expected to drop entries whose
/// handles have gone stale.
#[derive(Clone, Debug)]
pub struct WindowHandle {
    id: WindowId,
    backend: Backend,
}

#[derive(Clone, Debug)]
enum Backend {
    Ax(ax::AxWindow),
    #[cfg(test)]
    Fake(std::sync::Arc<fake::FakeWindow>),
}

impl PartialEq for WindowHandle {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for WindowHandle {}

// SAFETY: handles are created on the observer thread and from then on only
// touched by the reactor thread; the AX calls behind them are process-wide
// IPC, not thread-affine state.
unsafe impl Send for WindowHandle {}

impl WindowHandle {
    pub fn new(id: WindowId, elem: accessibility::AXUIElement) -> WindowHandle {
        WindowHandle {
            id,
            backend: Backend::Ax(ax::AxWindow(elem)),
        }
    }

    /// The identifier this handle was created with. Does not touch the OS.
    pub fn window_id(&self) -> WindowId { self.id }

    /// Validates the handle against the OS and returns the window-server id.
    /// This is the guard used on every pending/snapshot traversal.
    pub fn id(&self) -> Result<u32, StaleWindow> {
        match &self.backend {
            Backend::Ax(win) => win.is_alive().then(|| self.id.wid()).ok_or(StaleWindow),
            #[cfg(test)]
            Backend::Fake(fake) => fake.alive().then(|| self.id.wid()).ok_or(StaleWindow),
        }
    }

    pub fn title(&self) -> Result<String, StaleWindow> {
        match &self.backend {
            Backend::Ax(win) => win.title().ok_or(StaleWindow),
            #[cfg(test)]
            Backend::Fake(fake) => fake.title().ok_or(StaleWindow),
        }
    }

    /// Raises the window and makes it key. Failures are logged and swallowed;
    /// focus is best-effort by design of the underlying API.
    pub fn focus(&self) {
        match &self.backend {
            Backend::Ax(win) => win.focus(self.id),
            #[cfg(test)]
            Backend::Fake(fake) => fake.record_focus(),
        }
    }

    #[cfg(test)]
    pub fn fake(id: WindowId, state: std::sync::Arc<fake::FakeWindow>) -> WindowHandle {
        WindowHandle { id, backend: Backend::Fake(state) }
    }
}

mod ax {
    use accessibility::{AXUIElement, AXUIElementActions, AXUIElementAttributes};
    use objc2_app_kit::NSRunningApplication;
    use tracing::warn;

    use super::WindowId;

    #[derive(Clone, Debug)]
    pub(super) struct AxWindow(pub AXUIElement);

    impl AxWindow {
        pub(super) fn is_alive(&self) -> bool { self.0.role().is_ok() }

        pub(super) fn title(&self) -> Option<String> {
            self.0.title().ok().map(|t| t.to_string())
        }

        pub(super) fn focus(&self, id: WindowId) {
            if let Err(e) = self.0.raise() {
                warn!("Failed to raise window {id}: {e:?}");
                return;
            }
            unsafe {
                if let Some(app) = NSRunningApplication::runningApplicationWithProcessIdentifier(
                    id.pid,
                ) {
                    use objc2_app_kit::NSApplicationActivationOptions;
                    app.activateWithOptions(NSApplicationActivationOptions::empty());
                }
            }
        }
    }
}

/// Spawns a detached process. Failures are logged, never surfaced; a jump
/// target with a broken launch command should not take the manager down.
pub fn spawn_process(argv: &[String]) {
    let Some((cmd, args)) = argv.split_first() else {
        tracing::warn!("Ignoring empty launch command");
        return;
    };
    match std::process::Command::new(cmd).args(args).spawn() {
        Ok(_) => tracing::debug!("Spawned {cmd}"),
        Err(e) => tracing::warn!("Failed to spawn {cmd}: {e}"),
    }
}

/// Activates the named app if running, otherwise launches it.
pub fn launch_or_focus(app_name: &str) {
    use objc2::rc::autoreleasepool;
    use objc2::{class, msg_send};
    use objc2_foundation::NSString;

    autoreleasepool(|_| unsafe {
        let workspace: *mut objc2::runtime::AnyObject =
            msg_send![class!(NSWorkspace), sharedWorkspace];
        let name = NSString::from_str(app_name);
        let launched: bool = msg_send![workspace, launchApplication: &*name];
        if !launched {
            tracing::warn!("Failed to launch or focus '{app_name}'");
        }
    });
}

#[cfg(test)]
pub mod fake {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Backing state for test window handles. Tests keep the Arc to destroy
    /// the window out from under the manager or to count focus calls.
    #[derive(Debug, Default)]
    pub struct FakeWindow {
        dead: AtomicBool,
        title: Mutex<String>,
        focus_count: AtomicUsize,
    }

    impl FakeWindow {
        pub fn with_title(title: &str) -> Self {
            FakeWindow {
                dead: AtomicBool::new(false),
                title: Mutex::new(title.to_string()),
                focus_count: AtomicUsize::new(0),
            }
        }

        pub fn destroy(&self) { self.dead.store(true, Ordering::SeqCst); }

        pub fn set_title(&self, title: &str) {
            *self.title.lock().unwrap() = title.to_string();
        }

        pub fn alive(&self) -> bool { !self.dead.load(Ordering::SeqCst) }

        pub fn title(&self) -> Option<String> {
            self.alive().then(|| self.title.lock().unwrap().clone())
        }

        pub fn record_focus(&self) { self.focus_count.fetch_add(1, Ordering::SeqCst); }

        pub fn focus_count(&self) -> usize { self.focus_count.load(Ordering::SeqCst) }
    }
}
