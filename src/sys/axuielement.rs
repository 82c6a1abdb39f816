//! Low-level accessibility plumbing for the batch mover: resolving app
//! elements, mapping AX windows to window-server ids, and frame writes in
//! the order macOS accepts them.

use accessibility::{AXUIElement, AXUIElementAttributes};
use accessibility_sys::{AXError, AXUIElementRef, AXUIElementSetMessagingTimeout, kAXErrorSuccess};
use core_foundation::base::TCFType;
use core_graphics_types::geometry::{CGPoint, CGSize};
use objc2_core_foundation::CGRect;

use crate::sys::app::pid_t;

unsafe extern "C" {
    // Private but load-bearing for every AX window manager: maps an
    // accessibility element to its window-server id.
    fn _AXUIElementGetWindow(element: AXUIElementRef, out: *mut u32) -> AXError;
}

pub fn app_element(pid: pid_t) -> AXUIElement { AXUIElement::application(pid) }

/// Caps how long any AX message to this element's app may block us.
pub fn set_messaging_timeout(element: &AXUIElement, seconds: f32) {
    unsafe {
        AXUIElementSetMessagingTimeout(element.as_concrete_TypeRef(), seconds);
    }
}

pub fn window_server_id(element: &AXUIElement) -> Result<u32, accessibility::Error> {
    let mut wid: u32 = 0;
    let err = unsafe { _AXUIElementGetWindow(element.as_concrete_TypeRef(), &mut wid) };
    if err == kAXErrorSuccess && wid != 0 {
        Ok(wid)
    } else {
        Err(accessibility::Error::Ax(err))
    }
}

pub fn windows_of(app: &AXUIElement) -> Result<Vec<AXUIElement>, accessibility::Error> {
    Ok(app.windows()?.iter().map(|w| w.clone()).collect())
}

pub fn read_frame(window: &AXUIElement) -> Result<CGRect, accessibility::Error> {
    let frame = window.frame()?;
    Ok(CGRect::new(
        objc2_core_foundation::CGPoint::new(frame.origin.x, frame.origin.y),
        objc2_core_foundation::CGSize::new(frame.size.width, frame.size.height),
    ))
}

/// Applies a full frame as size, position, size.
///
/// macOS clamps a requested position against the window's current size, then
/// may clamp the size against the screen edge at the new position; the
/// second size write recovers whatever the first pass lost.
pub fn write_frame(window: &AXUIElement, frame: CGRect) -> Result<(), accessibility::Error> {
    let size = CGSize::new(frame.size.width, frame.size.height);
    let pos = CGPoint::new(frame.origin.x, frame.origin.y);
    window.set_size(size)?;
    window.set_position(pos)?;
    window.set_size(size)?;
    Ok(())
}

/// Moves a window without touching its size.
pub fn write_position(
    window: &AXUIElement,
    x: f64,
    y: f64,
) -> Result<(), accessibility::Error> {
    window.set_position(CGPoint::new(x, y))
}
