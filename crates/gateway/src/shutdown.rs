//! Process shutdown sequencing.

use hrss_api::*;
use std::sync::Mutex;

type ShutdownFn = Box<dyn FnOnce() -> BoxFut<'static, HrssResult<()>> + 'static + Send>;

#[derive(Default)]
struct Inner {
    done: bool,
    hooks: Vec<(String, ShutdownFn)>,
}

/// Collects named cleanup callbacks and runs them once, in reverse
/// registration order.
///
/// Owned by the process entry point. Components register against it as
/// they are constructed, so later components are torn down first.
#[derive(Default)]
pub struct ShutdownCoordinator(Mutex<Inner>);

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lock = self.0.lock().unwrap();
        f.debug_struct("ShutdownCoordinator")
            .field("done", &lock.done)
            .field(
                "hooks",
                &lock.hooks.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ShutdownCoordinator {
    /// Register a cleanup callback. Ignored after shutdown began.
    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: FnOnce() -> Fut + 'static + Send,
        Fut: std::future::Future<Output = HrssResult<()>> + 'static + Send,
    {
        let name = name.into();
        let mut lock = self.0.lock().unwrap();
        if lock.done {
            tracing::warn!(%name, "shutdown hook registered after shutdown");
            return;
        }
        let hook: ShutdownFn =
            Box::new(move || -> BoxFut<'static, HrssResult<()>> { Box::pin(f()) });
        lock.hooks.push((name, hook));
    }

    /// True once [ShutdownCoordinator::shutdown] was called.
    pub fn is_shut_down(&self) -> bool {
        self.0.lock().unwrap().done
    }

    /// Run every registered callback, newest first. Failures are logged
    /// and do not stop the remaining callbacks. Resolves to the first
    /// failure. Later calls do nothing.
    pub async fn shutdown(&self) -> HrssResult<()> {
        let hooks = {
            let mut lock = self.0.lock().unwrap();
            lock.done = true;
            std::mem::take(&mut lock.hooks)
        };

        let mut first_err = None;
        for (name, hook) in hooks.into_iter().rev() {
            tracing::info!(%name, "shutting down");
            if let Err(err) = hook().await {
                tracing::warn!(%name, ?err, "shutdown hook failed");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
