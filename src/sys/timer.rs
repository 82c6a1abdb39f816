use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Schedules `f` to run once on the current thread after `delay`, unless the
/// returned token is cancelled first.
///
/// Used for the focus-switch debounce, the post-create park delay, watcher
/// restarts after programmatic moves, and focus re-assertion after the OS
/// animation. Callers that only need "latest wins" semantics can skip the
/// token and match on a generation counter when the callback fires.
pub fn oneshot(delay: Duration, f: impl FnOnce() + 'static) -> CancellationToken {
    let token = CancellationToken::new();
    let task_token = token.clone();
    tokio::task::spawn_local(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => f(),
            _ = task_token.cancelled() => {}
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::sys::executor::Executor;

    #[test]
    fn fires_after_delay() {
        Executor::run(async {
            let fired = Rc::new(Cell::new(false));
            let flag = fired.clone();
            let _token = oneshot(Duration::from_millis(5), move || flag.set(true));
            tokio::time::sleep(Duration::from_millis(25)).await;
            assert!(fired.get());
        });
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        Executor::run(async {
            let fired = Rc::new(Cell::new(false));
            let flag = fired.clone();
            let token = oneshot(Duration::from_millis(5), move || flag.set(true));
            token.cancel();
            tokio::time::sleep(Duration::from_millis(25)).await;
            assert!(!fired.get());
        });
    }
}
