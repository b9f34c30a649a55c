//! Runs the platform loops side by side.
//!
//! Each bot implements [`Component`] and is handed to [`spawn_components`]
//! with everything it needs already captured. The loops share one
//! [`CancellationToken`]: Ctrl-C cancels it from `main`, and a loop that
//! fails cancels it too, so one broken platform stops the whole process
//! rather than leaving the other half running unattended.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AppError;

pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// One platform loop. `run` is called once and returns when `shutdown`
/// fires (or on an unrecoverable error).
pub trait Component: Send + 'static {
    /// `"reddit"`, `"twitter"`; used in logs.
    fn id(&self) -> &str;

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    /// Wait for every loop; the first failure is returned.
    pub async fn join(self) -> Result<(), AppError> {
        self.inner
            .await
            .unwrap_or_else(|e| Err(AppError::Platform(format!("runtime task panicked: {e}"))))
    }
}

/// Spawn every component on its own task.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> RuntimeHandle {
    let inner = tokio::spawn(async move {
        let mut set = JoinSet::new();
        for component in components {
            let id = component.id().to_string();
            info!(component = %id, "loop starting");
            let fut = component.run(shutdown.clone());
            set.spawn(async move { (id, fut.await) });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((id, Ok(()))) => {
                    info!(component = %id, "loop stopped");
                    continue;
                }
                Ok((id, Err(e))) => {
                    error!(component = %id, error = %e, "loop failed");
                    AppError::Platform(format!("{id}: {e}"))
                }
                Err(e) => {
                    error!(error = %e, "loop panicked");
                    AppError::Platform(format!("loop panicked: {e}"))
                }
            };
            shutdown.cancel();
            first_err.get_or_insert(failure);
        }
        first_err.map_or(Ok(()), Err)
    });
    RuntimeHandle { inner }
}

/// `false` means `shutdown` fired before `duration` was up.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
