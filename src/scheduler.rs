use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::error::BackendError;

/// Owns the dedicated runtime and shuts it down without blocking, so the
/// last scheduler clone may be dropped from inside another runtime.
struct RuntimeGuard(Option<Runtime>);

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Where deferred work (queue flushes, readiness polls) runs.
///
/// Inside a tokio runtime the ambient handle is reused. Otherwise a small
/// dedicated runtime is created and kept alive for as long as any clone of
/// the scheduler exists.
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    _runtime: Option<Arc<RuntimeGuard>>,
}

impl Scheduler {
    pub fn current_or_dedicated() -> Result<Self, BackendError> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self {
                handle,
                _runtime: None,
            });
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("audio-feeder-runtime")
            .enable_all()
            .build()
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(RuntimeGuard(Some(runtime)))),
        })
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// Handle for spawning. Tasks should capture this rather than the
    /// scheduler so the dedicated runtime is never dropped from inside itself.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn owns_runtime(&self) -> bool {
        self._runtime.is_some()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
