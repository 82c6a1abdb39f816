//! Test doubles for the reactor: a transport that records batches instead
//! of talking to the accessibility API, a host that records launches, and a
//! harness that plays the OS.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use objc2_core_foundation::{CGPoint, CGRect, CGSize};

use super::{Command, Event, HostOps, Reactor};
use crate::common::collections::HashMap;
use crate::common::config::Config;
use crate::sys::app::fake::FakeWindow;
use crate::sys::app::{WindowHandle, WindowId, WindowInfo, pid_t};
use crate::sys::screen::SpaceId;
use crate::sys::transport::{MoveOp, Transport};

/// Records every batch and simulates the window server's frame state: full
/// moves replace a window's frame, position-only moves leave its size
/// alone, and `read_frames` answers from that state.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub sync_batches: RefCell<Vec<Vec<MoveOp>>>,
    pub async_batches: RefCell<Vec<Vec<MoveOp>>>,
    pub frames: RefCell<HashMap<WindowId, CGRect>>,
}

impl RecordingTransport {
    fn apply(&self, ops: &[MoveOp]) {
        let mut frames = self.frames.borrow_mut();
        for op in ops {
            if op.frame.size.width == 0.0 && op.frame.size.height == 0.0 {
                let entry = frames
                    .entry(op.wid)
                    .or_insert_with(|| CGRect::new(op.frame.origin, CGSize::new(500.0, 500.0)));
                entry.origin = op.frame.origin;
            } else {
                frames.insert(op.wid, op.frame);
            }
        }
    }

    pub fn frame_of(&self, wid: WindowId) -> Option<CGRect> {
        self.frames.borrow().get(&wid).copied()
    }

    pub fn clear_batches(&self) {
        self.sync_batches.borrow_mut().clear();
        self.async_batches.borrow_mut().clear();
    }

    /// The latest park destination of a window, if any batch parked it.
    pub fn parked_at(&self, wid: WindowId) -> Option<CGPoint> {
        let position_only = |op: &MoveOp| {
            (op.wid == wid && op.frame.size.width == 0.0 && op.frame.size.height == 0.0)
                .then_some(op.frame.origin)
        };
        let in_async = self
            .async_batches
            .borrow()
            .iter()
            .flatten()
            .rev()
            .find_map(position_only);
        in_async.or_else(|| {
            self.sync_batches.borrow().iter().flatten().rev().find_map(position_only)
        })
    }

    pub fn was_moved_sync(&self, wid: WindowId) -> bool {
        self.sync_batches.borrow().iter().flatten().any(|op| op.wid == wid)
    }
}

impl Transport for Rc<RecordingTransport> {
    fn move_windows(&self, ops: Vec<MoveOp>) {
        self.apply(&ops);
        self.sync_batches.borrow_mut().push(ops);
    }

    fn move_windows_async(&self, ops: Vec<MoveOp>) {
        self.apply(&ops);
        self.async_batches.borrow_mut().push(ops);
    }

    fn read_frames(&self, windows: Vec<WindowId>) -> HashMap<WindowId, CGRect> {
        let frames = self.frames.borrow();
        windows.into_iter().filter_map(|wid| Some((wid, *frames.get(&wid)?))).collect()
    }
}

#[derive(Default)]
pub(crate) struct RecordingHost {
    pub launched: RefCell<Vec<String>>,
    pub spawned: RefCell<Vec<Vec<String>>>,
}

impl HostOps for Rc<RecordingHost> {
    fn launch_or_focus(&self, app_name: &str) {
        self.launched.borrow_mut().push(app_name.to_string());
    }

    fn spawn_process(&self, argv: &[String]) {
        self.spawned.borrow_mut().push(argv.to_vec());
    }
}

pub(crate) const SCREEN_W: f64 = 1440.0;
pub(crate) const SCREEN_H: f64 = 900.0;

pub(crate) struct Harness {
    pub reactor: Reactor,
    pub transport: Rc<RecordingTransport>,
    pub host: Rc<RecordingHost>,
    pub fakes: HashMap<WindowId, Arc<FakeWindow>>,
}

impl Harness {
    pub fn new(config: Config) -> Harness {
        let transport = Rc::new(RecordingTransport::default());
        let host = Rc::new(RecordingHost::default());
        let reactor = Reactor::new(config, Box::new(transport.clone()), Box::new(host.clone()));
        let mut harness = Harness {
            reactor,
            transport,
            host,
            fakes: HashMap::default(),
        };
        harness.reactor.handle_event(Event::ScreenParametersChanged(
            CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(SCREEN_W, SCREEN_H)),
            Some(SpaceId::new(1)),
        ));
        harness
    }

    pub fn space(&self) -> SpaceId { SpaceId::new(1) }

    /// Creates a window as the OS would: the handle arrives with a
    /// `WindowCreated` event and the transport learns its frame.
    pub fn open_window(
        &mut self,
        pid: pid_t,
        idx: u32,
        app: &str,
        title: &str,
        frame: CGRect,
    ) -> WindowId {
        self.open_custom(pid, idx, app, title, frame, true, false)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_custom(
        &mut self,
        pid: pid_t,
        idx: u32,
        app: &str,
        title: &str,
        frame: CGRect,
        is_standard: bool,
        is_tabbed: bool,
    ) -> WindowId {
        let wid = WindowId::new(pid, idx);
        let fake = Arc::new(FakeWindow::with_title(title));
        let handle = WindowHandle::fake(wid, fake.clone());
        self.fakes.insert(wid, fake);
        self.transport.frames.borrow_mut().insert(wid, frame);
        let info = WindowInfo {
            title: title.to_string(),
            app_name: app.to_string(),
            bundle_id: None,
            frame,
            is_standard,
            is_tabbed,
        };
        self.reactor.handle_event(Event::WindowCreated(handle, info));
        wid
    }

    pub fn default_frame(i: u32) -> CGRect {
        CGRect::new(
            CGPoint::new(8.0 + (i as f64) * 490.0, 8.0),
            CGSize::new(480.0, 700.0),
        )
    }

    /// Runs the startup partition the 1 s settle timer would trigger.
    pub fn settle(&mut self) { self.reactor.handle_event(Event::StartupSettled); }

    pub fn focus(&mut self, wid: WindowId) {
        self.reactor.handle_event(Event::WindowFocused(wid));
    }

    pub fn destroy(&mut self, wid: WindowId) {
        if let Some(fake) = self.fakes.get(&wid) {
            fake.destroy();
        }
        self.reactor.handle_event(Event::WindowDestroyed(wid));
    }

    pub fn command(&mut self, command: Command) {
        self.reactor.handle_event(Event::Command(command));
    }

    /// Takes the timers the reactor wanted to schedule; the test decides
    /// which of them "elapse".
    pub fn drain_timers(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.reactor.queued_timers)
            .into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    /// Fires every queued timer in order, including ones queued by the
    /// firing itself.
    pub fn fire_all_timers(&mut self) {
        for _ in 0..16 {
            let events = self.drain_timers();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.reactor.handle_event(event);
            }
        }
    }

    pub fn focus_count(&self, wid: WindowId) -> usize {
        self.fakes.get(&wid).map_or(0, |f| f.focus_count())
    }
}
