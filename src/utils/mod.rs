use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::shutdown::Shutdown;

pub mod secret;

/// Run a consumer loop in the background, restarting it after failures.
///
/// The task future is rebuilt and re-run after an error or panic, with a
/// fixed pause between restarts. Shutdown cancels the in-flight iteration;
/// consumers settle whole messages, so cancellation between awaits only
/// returns work to its queue.
pub fn spawn_restarting<S, F>(
    name: &'static str,
    restart_pause: Duration,
    shutdown: Shutdown,
    task: S,
) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
    S: Fn() -> F + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            // `catch_unwind` keeps one panicking consumer from taking the
            // whole process down with it.
            let iteration = AssertUnwindSafe(task()).catch_unwind();

            tokio::select! {
                () = shutdown.await_shutdown_begin() => {
                    info!(task = name, "Task cancelled by shutdown");
                    return;
                }
                result = iteration => match result {
                    Ok(Ok(())) => {
                        info!(task = name, "Task finished");
                        return;
                    }
                    Ok(Err(error)) => {
                        error!(task = name, ?error, "Task failed, restarting");
                    }
                    Err(panic) => {
                        error!(task = name, ?panic, "Task panicked, restarting");
                    }
                },
            }

            tokio::select! {
                () = shutdown.await_shutdown_begin() => return,
                () = sleep(restart_pause) => {}
            }
        }
    })
}
