//! Request throttling.
//!
//! Every request — direct or begin/end — runs under one semaphore
//! permit. Begin calls beyond the limit queue inside their spawned
//! task rather than failing, and the permit is released when the task
//! completes, errors, or its caller abandons the handle; capacity can
//! never leak.

use std::future::Future;
use std::sync::Arc;
use strata_types::{CoreError, CoreResult};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounds on the configured concurrency limit.
pub const MIN_REQUEST_COUNT: usize = 1;
pub const MAX_REQUEST_COUNT: usize = 100;

/// A semaphore-guarded request gate.
#[derive(Clone)]
pub struct RequestThrottle {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl RequestThrottle {
    /// Creates a throttle with the limit clamped to
    /// `MIN_REQUEST_COUNT..=MAX_REQUEST_COUNT`.
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(MIN_REQUEST_COUNT, MAX_REQUEST_COUNT);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// The configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held by in-flight requests.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs one request under a permit, waiting for capacity first.
    pub async fn run<T>(&self, request: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Cancelled("client closed".into()))?;
        request.await
    }

    /// Starts one request in the background under a permit. The call
    /// itself never blocks; excess requests wait for capacity inside
    /// the spawned task.
    pub fn spawn<T>(
        &self,
        request: impl Future<Output = CoreResult<T>> + Send + 'static,
    ) -> PendingRequest<T>
    where
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Cancelled("client closed".into()))?;
            request.await
        });
        PendingRequest { handle }
    }
}

/// The `begin` half of an async request. `end().await` completes it;
/// dropping the handle abandons the result but the request still runs
/// to completion and frees its throttle slot.
pub struct PendingRequest<T> {
    handle: JoinHandle<CoreResult<T>>,
}

impl<T> PendingRequest<T> {
    /// Waits for the request and returns its result.
    pub async fn end(self) -> CoreResult<T> {
        self.handle
            .await
            .map_err(|err| CoreError::Cancelled(err.to_string()))?
    }

    /// Explicitly abandons the request. Purely documentary — dropping
    /// the handle has the same effect.
    pub fn abandon(self) {}
}
