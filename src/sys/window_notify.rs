//! Window discovery and accessibility notifications.
//!
//! One observer thread scans the running applications, registers an AX
//! observer per app, and translates the notifications into reactor events.
//! A slow rescan loop picks up apps launched later and windows whose
//! creation notification we missed; the reactor's refresh pass reconciles
//! the rest.

use std::cell::RefCell;
use std::ffi::c_void;
use std::time::Duration;

use accessibility::{AXUIElement, AXUIElementAttributes};
use accessibility_sys::{
    AXObserverAddNotification, AXObserverCreate, AXObserverGetRunLoopSource, AXObserverRef,
    AXUIElementRef, kAXErrorSuccess, kAXFocusedWindowChangedNotification,
    kAXStandardWindowSubrole, kAXUIElementDestroyedNotification, kAXWindowCreatedNotification,
    kAXWindowDeminiaturizedNotification, kAXWindowMiniaturizedNotification,
    kAXWindowMovedNotification, kAXWindowResizedNotification, kAXWindowRole,
};
use core_foundation::base::TCFType;
use core_foundation::runloop::{CFRunLoop, CFRunLoopSource, kCFRunLoopDefaultMode};
use core_foundation::string::CFString;
use objc2::rc::autoreleasepool;
use objc2_app_kit::{NSApplicationActivationPolicy, NSWorkspace};
use tracing::{debug, trace, warn};

use crate::actor::Sender;
use crate::actor::reactor::Event;
use crate::common::collections::HashMap;
use crate::sys::app::{WindowHandle, WindowId, WindowInfo, pid_t};
use crate::sys::axuielement;

const WINDOW_NOTIFICATIONS: &[&str] = &[
    kAXUIElementDestroyedNotification,
    kAXWindowMovedNotification,
    kAXWindowResizedNotification,
    kAXWindowMiniaturizedNotification,
    kAXWindowDeminiaturizedNotification,
];

const APP_NOTIFICATIONS: &[&str] =
    &[kAXWindowCreatedNotification, kAXFocusedWindowChangedNotification];

const RESCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns the observer thread. Events flow into `events_tx` until the
/// process exits.
pub fn spawn(events_tx: Sender<Event>) {
    std::thread::Builder::new()
        .name("window-notify".to_string())
        .spawn(move || run(events_tx))
        .unwrap();
}

fn run(events_tx: Sender<Event>) {
    let mut known_apps: Vec<pid_t> = Vec::new();
    let mut contexts: Vec<Box<AppContext>> = Vec::new();

    let discovered = scan_apps(&events_tx, &mut known_apps, &mut contexts);
    if !discovered.is_empty() {
        events_tx.send(Event::WindowsDiscovered(discovered));
    }

    // Observers post on this thread's run loop; wake it periodically to
    // pick up newly launched apps.
    loop {
        let _ = CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, RESCAN_INTERVAL, false);
        let discovered = scan_apps(&events_tx, &mut known_apps, &mut contexts);
        if !discovered.is_empty() {
            events_tx.send(Event::WindowsDiscovered(discovered));
        }
    }
}

/// Registers observers for apps we have not seen and returns their
/// currently open windows.
fn scan_apps(
    events_tx: &Sender<Event>,
    known_apps: &mut Vec<pid_t>,
    contexts: &mut Vec<Box<AppContext>>,
) -> Vec<(WindowHandle, WindowInfo)> {
    let mut discovered = Vec::new();
    for (pid, app_name, bundle_id) in running_apps() {
        if known_apps.contains(&pid) {
            continue;
        }
        known_apps.push(pid);
        match AppContext::register(pid, app_name, bundle_id, events_tx.clone()) {
            Ok((context, windows)) => {
                discovered.extend(windows);
                contexts.push(context);
            }
            Err(e) => debug!("pid {pid}: could not observe: {e:?}"),
        }
    }
    discovered
}

fn running_apps() -> Vec<(pid_t, String, Option<String>)> {
    autoreleasepool(|_| {
        let workspace = unsafe { NSWorkspace::sharedWorkspace() };
        let apps = unsafe { workspace.runningApplications() };
        apps.iter()
            .filter(|app| {
                unsafe { app.activationPolicy() } == NSApplicationActivationPolicy::Regular
            })
            .map(|app| {
                let pid = unsafe { app.processIdentifier() };
                let name =
                    unsafe { app.localizedName() }.map(|n| n.to_string()).unwrap_or_default();
                let bundle_id = unsafe { app.bundleIdentifier() }.map(|b| b.to_string());
                (pid, name, bundle_id)
            })
            .collect()
    })
}

/// Per-app observer state. Lives for the process lifetime; an app quitting
/// simply stops posting.
struct AppContext {
    pid: pid_t,
    app_name: String,
    bundle_id: Option<String>,
    events_tx: Sender<Event>,
    /// Window-server id -> element, for resolving destroyed elements that
    /// can no longer be queried.
    windows: RefCell<HashMap<u32, AXUIElement>>,
}

impl AppContext {
    fn register(
        pid: pid_t,
        app_name: String,
        bundle_id: Option<String>,
        events_tx: Sender<Event>,
    ) -> Result<(Box<AppContext>, Vec<(WindowHandle, WindowInfo)>), accessibility::Error> {
        let app = axuielement::app_element(pid);
        let mut context = Box::new(AppContext {
            pid,
            app_name,
            bundle_id,
            events_tx,
            windows: RefCell::new(HashMap::default()),
        });

        let mut observer: AXObserverRef = std::ptr::null_mut();
        let err = unsafe { AXObserverCreate(pid, observer_callback, &mut observer) };
        if err != kAXErrorSuccess {
            return Err(accessibility::Error::Ax(err));
        }
        unsafe {
            let source = AXObserverGetRunLoopSource(observer);
            CFRunLoop::get_current().add_source(
                &CFRunLoopSource::wrap_under_get_rule(source.cast()),
                kCFRunLoopDefaultMode,
            );
        }

        let refcon = context.as_mut() as *mut AppContext as *mut c_void;
        for notification in APP_NOTIFICATIONS {
            let err = unsafe {
                AXObserverAddNotification(
                    observer,
                    app.as_concrete_TypeRef(),
                    CFString::from_static_string(notification).as_concrete_TypeRef(),
                    refcon,
                )
            };
            if err != kAXErrorSuccess {
                trace!("pid {pid}: could not observe {notification}: {err}");
            }
        }

        let mut windows = Vec::new();
        for element in axuielement::windows_of(&app)? {
            if let Some((handle, info)) = context.track_window(observer, element) {
                windows.push((handle, info));
            }
        }
        Ok((context, windows))
    }

    /// Starts watching one window and builds its handle and metadata.
    fn track_window(
        &self,
        observer: AXObserverRef,
        element: AXUIElement,
    ) -> Option<(WindowHandle, WindowInfo)> {
        match element.role() {
            Ok(role) if role == kAXWindowRole => {}
            _ => return None,
        }
        let wid = axuielement::window_server_id(&element).ok()?;
        let refcon = self as *const AppContext as *mut c_void;
        for notification in WINDOW_NOTIFICATIONS {
            let err = unsafe {
                AXObserverAddNotification(
                    observer,
                    element.as_concrete_TypeRef(),
                    CFString::from_static_string(notification).as_concrete_TypeRef(),
                    refcon,
                )
            };
            if err != kAXErrorSuccess {
                trace!("pid {}: watching window {wid} failed: {err}", self.pid);
                return None;
            }
        }

        let info = self.window_info(&element)?;
        let window_id = WindowId::new(self.pid, wid);
        let handle = WindowHandle::new(window_id, element.clone());
        self.windows.borrow_mut().insert(wid, element);
        Some((handle, info))
    }

    fn window_info(&self, element: &AXUIElement) -> Option<WindowInfo> {
        let title = element.title().map(|t| t.to_string()).unwrap_or_default();
        let is_standard =
            element.subrole().map(|s| s == kAXStandardWindowSubrole).unwrap_or(false);
        let frame = axuielement::read_frame(element).ok()?;
        // Native-tabbed windows expose an AXTabs attribute; their tabs all
        // share one frame and must not be tiled separately.
        let is_tabbed = has_tabs_attribute(element);
        Some(WindowInfo {
            title,
            app_name: self.app_name.clone(),
            bundle_id: self.bundle_id.clone(),
            frame,
            is_standard,
            is_tabbed,
        })
    }

    fn window_id_of(&self, element: &AXUIElement) -> Option<WindowId> {
        if let Ok(wid) = axuielement::window_server_id(element) {
            return Some(WindowId::new(self.pid, wid));
        }
        // Destroyed elements no longer answer; match against what we saw.
        let windows = self.windows.borrow();
        windows
            .iter()
            .find(|(_, known)| **known == *element)
            .map(|(wid, _)| WindowId::new(self.pid, *wid))
    }

    fn handle_notification(&self, observer: AXObserverRef, element: AXUIElement, notif: &str) {
        match notif {
            _ if notif == kAXWindowCreatedNotification => {
                let Some((handle, info)) = self.track_window(observer, element) else {
                    return;
                };
                self.events_tx.send(Event::WindowCreated(handle, info));
            }
            _ if notif == kAXUIElementDestroyedNotification => {
                let Some(wid) = self.window_id_of(&element) else { return };
                self.windows.borrow_mut().remove(&wid.wid());
                self.events_tx.send(Event::WindowDestroyed(wid));
            }
            _ if notif == kAXFocusedWindowChangedNotification => {
                let Some(wid) = self.window_id_of(&element) else { return };
                self.events_tx.send(Event::WindowFocused(wid));
            }
            _ if notif == kAXWindowMovedNotification
                || notif == kAXWindowResizedNotification =>
            {
                let Some(wid) = self.window_id_of(&element) else { return };
                let Ok(frame) = axuielement::read_frame(&element) else { return };
                self.events_tx.send(Event::WindowFrameChanged(wid, frame));
            }
            _ if notif == kAXWindowMiniaturizedNotification => {
                let Some(wid) = self.window_id_of(&element) else { return };
                self.events_tx.send(Event::WindowNotVisible(wid));
            }
            _ if notif == kAXWindowDeminiaturizedNotification => {
                let Some(wid) = self.window_id_of(&element) else { return };
                let Some(info) = self.window_info(&element) else { return };
                let handle = WindowHandle::new(wid, element);
                self.events_tx.send(Event::WindowCreated(handle, info));
            }
            _ => warn!("pid {}: unhandled notification {notif}", self.pid),
        }
    }
}

fn has_tabs_attribute(element: &AXUIElement) -> bool {
    use accessibility_sys::AXUIElementCopyAttributeValue;
    use core_foundation::base::{CFType, CFTypeRef};
    unsafe {
        let mut value: CFTypeRef = std::ptr::null();
        let err = AXUIElementCopyAttributeValue(
            element.as_concrete_TypeRef(),
            CFString::from_static_string("AXTabs").as_concrete_TypeRef(),
            &mut value,
        );
        if err == kAXErrorSuccess && !value.is_null() {
            let _ = CFType::wrap_under_create_rule(value);
            true
        } else {
            false
        }
    }
}

extern "C" fn observer_callback(
    observer: AXObserverRef,
    element: AXUIElementRef,
    notification: core_foundation::string::CFStringRef,
    refcon: *mut c_void,
) {
    if refcon.is_null() {
        return;
    }
    let context = unsafe { &*(refcon as *const AppContext) };
    let element = unsafe { AXUIElement::wrap_under_get_rule(element) };
    let notification = unsafe { CFString::wrap_under_get_rule(notification) }.to_string();
    context.handle_notification(observer, element, &notification);
}
