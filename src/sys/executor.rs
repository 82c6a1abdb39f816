use std::future::Future;

use tokio::task::LocalSet;

/// Runs a future to completion on a single-threaded tokio runtime with a
/// LocalSet, so actors can spawn non-Send tasks (timers, delayed events)
/// onto their own thread.
pub struct Executor;

impl Executor {
    pub fn run<F: Future>(future: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime");
        let local = LocalSet::new();
        local.block_on(&runtime, future)
    }
}
