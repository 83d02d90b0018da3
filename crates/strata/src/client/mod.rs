mod queue;
mod scheduler;


pub use queue::*;
pub use scheduler::*;

use crate::error::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

///
/// RequestConfig
///
/// Opaque description of a queued request: enough for the sender to route
/// it, and the key under which response sources are accumulated.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestConfig {
    pub descriptor: String,
}

impl RequestConfig {
    #[must_use]
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }
}

///
/// QueueRequest
///
/// One queued write/mutating request. A barrier request must complete
/// before any later request is dispatched; concurrent requests may overlap
/// with other concurrents but never with a barrier.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct QueueRequest {
    pub id: u64,
    pub config: RequestConfig,
    pub is_barrier: bool,
    pub payload: Vec<u8>,
}

///
/// RequestSender
///
/// Transport seam: receives a dequeued request and resolves once the remote
/// side acknowledged or rejected it. Payload encoding is the sender's
/// business.
///

#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, request: QueueRequest) -> Result<(), Error>;
}
