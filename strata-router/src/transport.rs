//! The request transport seam.
//!
//! A transport is a reliable, ordered channel carrying one request and
//! one response at a time for a session. Concrete network transports
//! (TCP, pipes, queued) are adapters implemented outside the core;
//! they only need to preserve per-session ordering. The loopback
//! transport dispatches directly into the hosting node and is what
//! in-process deployments and the test suite use.

use crate::node::RouterInner;
use crate::protocol::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use strata_types::CoreResult;

/// A reliable ordered request channel to a router node.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Submits one request and waits for its response.
    async fn submit(&self, request: Request) -> CoreResult<Response>;
}

/// In-process transport: requests are handled on the hosting node
/// without serialization of the items themselves (expressions still
/// travel in their wire form).
pub struct LoopbackTransport {
    pub(crate) inner: Arc<RouterInner>,
}

#[async_trait]
impl RequestTransport for LoopbackTransport {
    async fn submit(&self, request: Request) -> CoreResult<Response> {
        self.inner.handle(request)
    }
}
