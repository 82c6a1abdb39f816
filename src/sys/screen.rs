use std::num::NonZeroU64;

use objc2_app_kit::NSScreen;
use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use objc2_foundation::MainThreadMarker;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A Mission Control space id. All managed windows share one active space;
/// virtual workspaces are layered on top of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SpaceId(NonZeroU64);

impl SpaceId {
    pub fn new(id: u64) -> SpaceId { SpaceId(NonZeroU64::new(id).unwrap()) }

    pub fn get(&self) -> u64 { self.0.get() }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[link(name = "SkyLight", kind = "framework")]
unsafe extern "C" {
    fn SLSMainConnectionID() -> i32;
    fn SLSGetActiveSpace(cid: i32) -> u64;
}

/// The space currently active on the main display.
pub fn active_space() -> Option<SpaceId> {
    let space = unsafe { SLSGetActiveSpace(SLSMainConnectionID()) };
    match NonZeroU64::new(space) {
        Some(id) => Some(SpaceId(id)),
        None => {
            warn!("Window server reported no active space");
            None
        }
    }
}

/// Converts between the Cocoa coordinate system (origin bottom-left of the
/// main screen, y up) and the Quartz system the accessibility API uses
/// (origin top-left, y down).
#[derive(Clone, Copy, Debug, Default)]
pub struct CoordinateConverter {
    /// The y of the Cocoa origin in Quartz coordinates, i.e. the height of
    /// the main screen. Zero means we have not seen a screen yet.
    screen_height: f64,
}

impl CoordinateConverter {
    pub fn new(screen_height: f64) -> Self { Self { screen_height } }

    pub fn convert_point(&self, point: CGPoint) -> Option<CGPoint> {
        if self.screen_height == 0.0 {
            return None;
        }
        Some(CGPoint::new(point.x, self.screen_height - point.y))
    }

    pub fn convert_rect(&self, rect: CGRect) -> Option<CGRect> {
        if self.screen_height == 0.0 {
            return None;
        }
        Some(CGRect::new(
            CGPoint::new(rect.origin.x, self.screen_height - rect.origin.y - rect.size.height),
            rect.size,
        ))
    }
}

/// The usable frame of the main screen in Quartz coordinates, along with a
/// converter derived from the full frame. Must be called on the main thread.
pub fn main_screen_frame(mtm: MainThreadMarker) -> Option<(CGRect, CoordinateConverter)> {
    let screen = NSScreen::mainScreen(mtm)?;
    let full = screen.frame();
    let visible = screen.visibleFrame();
    let converter = CoordinateConverter::new(full.size.height);
    let frame = converter.convert_rect(CGRect::new(
        CGPoint::new(visible.origin.x, visible.origin.y),
        CGSize::new(visible.size.width, visible.size.height),
    ))?;
    Some((frame, converter))
}
