use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use objc2_foundation::MainThreadMarker;
use strata_wm::actor::reactor::{Command, Event, FocusTarget, Reactor, SystemHost};
use strata_wm::common::config::{Config, config_file};
use strata_wm::common::log;
use strata_wm::layout_engine::Direction;
use strata_wm::sys::accessibility::ensure_accessibility_permission;
use strata_wm::sys::geometry::CGRectExt;
use strata_wm::sys::screen::{active_space, main_screen_frame};
use strata_wm::sys::transport::AxTransport;
use strata_wm::sys::window_notify;
use tracing::{error, info, warn};

#[derive(Parser)]
struct Cli {
    /// Check the configuration file and exit.
    #[arg(long)]
    validate: bool,

    /// Configuration file to use instead of ~/.strata.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let opt: Cli = Parser::parse();

    if std::env::var_os("RUST_BACKTRACE").is_none() {
        // SAFETY: We are single threaded at this point.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }
    log::init_logging();
    install_panic_hook();

    let config_path = opt.config.clone().unwrap_or_else(config_file);
    let config = if config_path.exists() {
        match Config::read(&config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e:#}");
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    if opt.validate {
        info!("configuration at {} is valid", config_path.display());
        return;
    }

    ensure_accessibility_permission();

    let mtm = MainThreadMarker::new().unwrap();
    let Some((mut screen_frame, _converter)) = main_screen_frame(mtm) else {
        error!("no screen available");
        std::process::exit(1);
    };

    let transport = Box::new(AxTransport::new(config.settings.ax_timeout_ms));
    let events_tx = Reactor::spawn(config, transport, Box::new(SystemHost));
    events_tx.send(Event::ScreenParametersChanged(screen_frame, active_space()));

    window_notify::spawn(events_tx.clone());

    // Commands arrive as lines on stdin; hotkey daemons and scripts pipe in
    // here.
    {
        let events_tx = events_tx.clone();
        std::thread::Builder::new()
            .name("command-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    match parse_command(&line) {
                        Some(command) => events_tx.send(Event::Command(command)),
                        None if line.trim().is_empty() => {}
                        None => warn!("unrecognized command: {line}"),
                    }
                }
            })
            .unwrap();
    }

    // The main thread watches for display geometry changes; NSScreen reads
    // must happen here.
    loop {
        std::thread::sleep(Duration::from_secs(2));
        let Some((frame, _)) = main_screen_frame(mtm) else { continue };
        if !frame.same_as(screen_frame) {
            info!("screen geometry changed: {frame:?}");
            screen_frame = frame;
            events_tx.send(Event::ScreenParametersChanged(frame, active_space()));
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "switch" => Command::SwitchToWorkspace(parts.next()?.to_string()),
        "next" => Command::NextWorkspace { skip_empty: false },
        "prev" => Command::PrevWorkspace { skip_empty: false },
        "move" => Command::MoveWindowToWorkspace(parts.next()?.to_string()),
        "focus" => Command::FocusWindow(match parts.next()? {
            "left" => FocusTarget::Direction(Direction::Left),
            "right" => FocusTarget::Direction(Direction::Right),
            "up" => FocusTarget::Direction(Direction::Up),
            "down" => FocusTarget::Direction(Direction::Down),
            "next" => FocusTarget::Next,
            "prev" => FocusTarget::Previous,
            _ => return None,
        }),
        "swap" => Command::SwapWindows(match parts.next()? {
            "left" => Direction::Left,
            "right" => Direction::Right,
            "up" => Direction::Up,
            "down" => Direction::Down,
            _ => return None,
        }),
        "slurp" => Command::SlurpWindow,
        "barf" => Command::BarfWindow,
        "jump" => Command::JumpToApp(parts.next()?.to_string()),
        "toggle" => Command::ToggleJump,
        "refresh" => Command::RefreshWindows,
        "state" => Command::DumpState,
        _ => return None,
    };
    parts.next().is_none().then_some(command)
}

#[cfg(panic = "unwind")]
fn install_panic_hook() {
    // Abort on panic instead of propagating panics to the main thread.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        original_hook(info);
        std::process::abort();
    }));
}

#[cfg(not(panic = "unwind"))]
fn install_panic_hook() {}
