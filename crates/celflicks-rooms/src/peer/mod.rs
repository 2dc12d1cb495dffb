//! Peer-to-peer media connections, one per remote participant.

mod manager;

pub use manager::PeerConnectionManager;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use celflicks_common::{new_id, PeerId};

use crate::audio::MediaStream;

/// Identifier of a single call, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn new() -> Self {
        Self(new_id())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signaling events delivered by an open endpoint.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A remote peer is calling us.
    IncomingCall { call: CallId, from: PeerId },
    /// Media from the other side of `call` arrived.
    RemoteStream {
        call: CallId,
        peer: PeerId,
        stream: MediaStream,
    },
    /// `call` ended, either side hung up.
    CallClosed { call: CallId, peer: PeerId },
    /// Failure of one call, or of the endpoint when `call` is `None`.
    CallError {
        call: Option<CallId>,
        peer: Option<PeerId>,
        message: String,
    },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("failed to open peer endpoint: {0}")]
    Endpoint(String),
    #[error("call to {peer} failed: {message}")]
    Call { peer: PeerId, message: String },
    #[error("peer endpoint is closed")]
    Closed,
}

/// Signaling/media service.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Open a local endpoint with a freshly assigned peer id. Its events
    /// are delivered on `events` until it is closed.
    async fn open(
        &self,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerEndpoint>, SignalingError>;
}

/// An open signaling endpoint.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    fn id(&self) -> &PeerId;

    /// Place an outbound call offering `stream`.
    async fn call(&self, peer: &PeerId, stream: MediaStream) -> Result<CallId, SignalingError>;

    /// Accept an inbound call, offering `stream` back.
    async fn answer(&self, call: &CallId, stream: MediaStream) -> Result<(), SignalingError>;

    /// End or reject a call. Unknown calls are ignored.
    async fn hang_up(&self, call: &CallId);

    /// Tear down the endpoint and every call on it.
    async fn close(&self);
}
