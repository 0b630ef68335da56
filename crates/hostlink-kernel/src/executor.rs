//! [`BlockingPool`] – bounded, timed execution of blocking provider calls.
//!
//! At most `size` calls run at once on tokio's blocking threads. Each call
//! is raced against a timeout; a call that loses the race is abandoned (its
//! thread runs to completion and its result is dropped) and the caller gets
//! [`LinkError::ProviderTimeout`]. The permit travels with the closure, so
//! an abandoned call keeps occupying its slot until it really finishes.

use std::sync::Arc;
use std::time::Duration;

use hostlink_types::{LinkError, ModuleName};
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Matches the number of concurrent system calls the host is expected to
/// tolerate without starving the runtime.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default per-call budget.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_CALL_TIMEOUT)
    }
}

impl BlockingPool {
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` with the pool's default timeout.
    pub async fn run<T, F>(&self, module: ModuleName, f: F) -> Result<T, LinkError>
    where
        F: FnOnce() -> Result<T, LinkError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_timeout(module, self.timeout, f).await
    }

    /// Run `f` on a blocking thread, giving up after `timeout`.
    ///
    /// Time spent waiting for a free slot counts towards the timeout.
    pub async fn run_with_timeout<T, F>(
        &self,
        module: ModuleName,
        timeout: Duration,
        f: F,
    ) -> Result<T, LinkError>
    where
        F: FnOnce() -> Result<T, LinkError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let call = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| LinkError::Channel("worker pool closed".into()))?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            });
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(%module, error = %e, "provider call panicked");
                    Err(LinkError::failure(module, "provider call panicked"))
                }
            }
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%module, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
                Err(LinkError::ProviderTimeout {
                    module,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
