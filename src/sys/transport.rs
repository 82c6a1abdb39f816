//! Batched window moves and reads over the accessibility API.
//!
//! Every batch is grouped by owning process and each group runs on its own
//! worker thread, so one stalled app cannot serialize the whole batch. Each
//! worker caps AX messaging at a short timeout, suppresses
//! `AXEnhancedUserInterface` for the duration, and resolves its app's AX
//! windows to window-server ids exactly once. Failures are always
//! per-window: a missing window or a timed-out app logs a warning, skips,
//! and the rest of the batch completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::collections::HashMap;
use crate::sys::app::{WindowId, pid_t};
use crate::sys::axuielement;
use crate::sys::enhanced_ui::EnhancedUiSuppression;

/// A single move request. A zero size means position-only: the window is
/// moved without resizing, which is how parked windows travel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOp {
    pub wid: WindowId,
    pub frame: CGRect,
}

impl MoveOp {
    pub fn place(wid: WindowId, frame: CGRect) -> MoveOp { MoveOp { wid, frame } }

    pub fn position_only(wid: WindowId, x: f64, y: f64) -> MoveOp {
        MoveOp {
            wid,
            frame: CGRect::new(CGPoint::new(x, y), CGSize::new(0.0, 0.0)),
        }
    }

    fn is_position_only(&self) -> bool {
        self.frame.size.width == 0.0 && self.frame.size.height == 0.0
    }
}

/// The mover seam. The production implementation talks to the accessibility
/// API; tests substitute a recorder.
pub trait Transport {
    /// Applies all ops and returns when every per-app worker has joined.
    fn move_windows(&self, ops: Vec<MoveOp>);

    /// Fire-and-forget variant used for parking the previous workspace
    /// during a switch; nobody is looking at those frames.
    fn move_windows_async(&self, ops: Vec<MoveOp>);

    /// Reads current frames. Windows that cannot be resolved are omitted.
    fn read_frames(&self, windows: Vec<WindowId>) -> HashMap<WindowId, CGRect>;
}

/// Production transport backed by per-app AX worker threads.
pub struct AxTransport {
    timeout: Duration,
}

impl AxTransport {
    pub fn new(timeout_ms: u64) -> AxTransport {
        AxTransport { timeout: Duration::from_millis(timeout_ms) }
    }
}

impl Transport for AxTransport {
    fn move_windows(&self, ops: Vec<MoveOp>) {
        let reports = run_batch(group_moves(ops), self.timeout);
        for report in reports {
            report.log();
        }
    }

    fn move_windows_async(&self, ops: Vec<MoveOp>) {
        let timeout = self.timeout;
        spawn_in_flight(move || {
            let reports = run_batch(group_moves(ops), timeout);
            for report in reports {
                report.log();
            }
        });
    }

    fn read_frames(&self, windows: Vec<WindowId>) -> HashMap<WindowId, CGRect> {
        let mut by_app: HashMap<pid_t, Vec<AppOp>> = HashMap::default();
        for wid in windows {
            by_app.entry(wid.pid).or_default().push(AppOp {
                wid: wid.wid(),
                write: None,
                save: true,
            });
        }
        let reports = run_batch(by_app, self.timeout);
        let mut out = HashMap::default();
        for report in reports {
            for (wid, frame) in &report.frames {
                out.insert(WindowId::new(report.pid, *wid), *frame);
            }
            report.log();
        }
        out
    }
}

fn group_moves(ops: Vec<MoveOp>) -> HashMap<pid_t, Vec<AppOp>> {
    let mut by_app: HashMap<pid_t, Vec<AppOp>> = HashMap::default();
    for op in ops {
        let write = if op.is_position_only() {
            Write::Position(op.frame.origin.x, op.frame.origin.y)
        } else {
            Write::Frame(op.frame)
        };
        by_app.entry(op.wid.pid).or_default().push(AppOp {
            wid: op.wid.wid(),
            write: Some(write),
            save: false,
        });
    }
    by_app
}

/// Registry of detached mover batches. Handles stay reachable here until
/// their batch completes; finished ones are reaped on the next spawn.
static IN_FLIGHT: Lazy<DashMap<u64, thread::JoinHandle<()>>> = Lazy::new(DashMap::new);
static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

fn spawn_in_flight(f: impl FnOnce() + Send + 'static) {
    let finished: Vec<u64> = IN_FLIGHT
        .iter()
        .filter(|entry| entry.value().is_finished())
        .map(|entry| *entry.key())
        .collect();
    for id in finished {
        if let Some((_, handle)) = IN_FLIGHT.remove(&id) {
            let _ = handle.join();
        }
    }

    let id = NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed);
    match thread::Builder::new().name(format!("mover-{id}")).spawn(f) {
        Ok(handle) => {
            IN_FLIGHT.insert(id, handle);
        }
        Err(e) => warn!("Failed to spawn async mover batch: {e}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Frame(CGRect),
    Position(f64, f64),
}

#[derive(Debug, Clone)]
struct AppOp {
    wid: u32,
    write: Option<Write>,
    /// Capture the window's frame before any write and report it.
    save: bool,
}

struct AppReport {
    pid: pid_t,
    ops: usize,
    skipped: usize,
    elapsed: Duration,
    frames: Vec<(u32, CGRect)>,
}

impl AppReport {
    fn log(&self) {
        if self.skipped > 0 {
            debug!(
                "pid {} {} ops {}ms skipped={}",
                self.pid,
                self.ops,
                self.elapsed.as_millis(),
                self.skipped
            );
        } else {
            debug!("pid {} {} ops {}ms", self.pid, self.ops, self.elapsed.as_millis());
        }
    }

    /// The stderr line format of the standalone mover.
    fn wire_line(&self) -> String {
        if self.skipped > 0 {
            format!(
                "pid {} {} ops {}ms skipped={}",
                self.pid,
                self.ops,
                self.elapsed.as_millis(),
                self.skipped
            )
        } else {
            format!("pid {} {} ops {}ms", self.pid, self.ops, self.elapsed.as_millis())
        }
    }
}

/// Runs one batch: one worker per app, joined before returning. Workers
/// share only the lock-guarded report vector.
fn run_batch(by_app: HashMap<pid_t, Vec<AppOp>>, timeout: Duration) -> Vec<AppReport> {
    let reports: Mutex<Vec<AppReport>> = Mutex::new(Vec::with_capacity(by_app.len()));
    thread::scope(|scope| {
        for (pid, ops) in &by_app {
            let reports = &reports;
            scope.spawn(move || {
                let report = run_app_ops(*pid, ops, timeout);
                reports.lock().push(report);
            });
        }
    });
    reports.into_inner()
}

fn run_app_ops(pid: pid_t, ops: &[AppOp], timeout: Duration) -> AppReport {
    let start = Instant::now();
    let mut skipped = 0usize;
    let mut frames = Vec::new();

    let app = axuielement::app_element(pid);
    axuielement::set_messaging_timeout(&app, timeout.as_secs_f32());
    let _suppression = EnhancedUiSuppression::begin(&app);

    // Resolve this app's AX windows to server ids once; individual lookups
    // are an AX round trip each.
    let mut elements = HashMap::default();
    match axuielement::windows_of(&app) {
        Ok(windows) => {
            for window in windows {
                if let Ok(wid) = axuielement::window_server_id(&window) {
                    elements.insert(wid, window);
                }
            }
        }
        Err(e) => {
            warn!("pid {pid}: could not list windows: {e:?}");
        }
    }

    for op in ops {
        let Some(element) = elements.get(&op.wid) else {
            warn!("pid {pid}: window {} not found, skipping", op.wid);
            skipped += 1;
            continue;
        };
        if op.save {
            match axuielement::read_frame(element) {
                Ok(frame) => frames.push((op.wid, frame)),
                Err(e) => {
                    warn!("pid {pid}: failed to read frame of {}: {e:?}", op.wid);
                    skipped += 1;
                    continue;
                }
            }
        }
        let result = match op.write {
            Some(Write::Frame(frame)) => axuielement::write_frame(element, frame),
            Some(Write::Position(x, y)) => axuielement::write_position(element, x, y),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("pid {pid}: failed to move {}: {e:?}", op.wid);
            skipped += 1;
        }
    }

    AppReport {
        pid,
        ops: ops.len(),
        skipped,
        elapsed: start.elapsed(),
        frames,
    }
}

// --- Wire format of the standalone mover -----------------------------------

/// One request of the standalone mover's stdin array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireOp {
    pub wid: u32,
    pub pid: pid_t,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Report the window's pre-move frame on stdout.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub save: bool,
    /// Skip the move entirely; always report the frame.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// One entry of the standalone mover's stdout array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFrame {
    pub wid: u32,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Runs a wire batch and returns (saved frames, per-app stderr lines).
pub fn run_wire_batch(ops: Vec<WireOp>, timeout: Duration) -> (Vec<WireFrame>, Vec<String>) {
    let mut by_app: HashMap<pid_t, Vec<AppOp>> = HashMap::default();
    for op in &ops {
        let write = if op.read_only {
            None
        } else if op.w == 0.0 && op.h == 0.0 {
            Some(Write::Position(op.x, op.y))
        } else {
            Some(Write::Frame(CGRect::new(
                CGPoint::new(op.x, op.y),
                CGSize::new(op.w, op.h),
            )))
        };
        by_app.entry(op.pid).or_default().push(AppOp {
            wid: op.wid,
            write,
            save: op.save || op.read_only,
        });
    }

    let reports = run_batch(by_app, timeout);
    let mut frames = Vec::new();
    let mut lines = Vec::new();
    for report in reports {
        for (wid, frame) in &report.frames {
            frames.push(WireFrame {
                wid: *wid,
                x: frame.origin.x,
                y: frame.origin.y,
                w: frame.size.width,
                h: frame.size.height,
            });
        }
        lines.push(report.wire_line());
    }
    (frames, lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_means_position_only() {
        let op = MoveOp::position_only(WindowId::new(1, 10), 1439.0, 899.0);
        assert!(op.is_position_only());
        let op = MoveOp::place(
            WindowId::new(1, 10),
            CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(500.0, 500.0)),
        );
        assert!(!op.is_position_only());
    }

    #[test]
    fn wire_ops_parse_with_defaults() {
        let input = r#"[
            {"wid": 7, "pid": 301, "x": 8.0, "y": 48.0, "w": 480.0, "h": 644.0},
            {"wid": 9, "pid": 301, "x": 999.0, "y": 767.0, "w": 0.0, "h": 0.0, "save": true},
            {"wid": 4, "pid": 88, "x": 0.0, "y": 0.0, "w": 0.0, "h": 0.0, "read_only": true}
        ]"#;
        let ops: Vec<WireOp> = serde_json::from_str(input).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(!ops[0].save && !ops[0].read_only);
        assert!(ops[1].save);
        assert!(ops[2].read_only);
    }

    #[test]
    fn wire_frames_serialize_flat() {
        let frame = WireFrame {
            wid: 7,
            x: 8.0,
            y: 48.0,
            w: 480.0,
            h: 644.0,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"wid":7,"x":8.0,"y":48.0,"w":480.0,"h":644.0}"#);
    }
}
