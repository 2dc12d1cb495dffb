//! Connection registry keyed by remote peer id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use celflicks_common::PeerId;

use crate::audio::{MediaStream, PlaybackSink};

use super::{CallId, PeerEndpoint, PeerEvent};

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PeerLink {
    /// `None` while our outbound call is still being placed.
    call: Option<CallId>,
    outbound: bool,
    /// Remote media has arrived.
    active: bool,
}

impl PeerLink {
    fn owns(&self, call: &CallId) -> bool {
        self.call.as_ref() == Some(call)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Tracks at most one media connection per remote peer.
///
/// Every call offers the same local stream. Failures are logged and only
/// ever affect the peer they belong to.
pub struct PeerConnectionManager {
    endpoint: Arc<dyn PeerEndpoint>,
    local_stream: MediaStream,
    playback: Arc<dyn PlaybackSink>,
    links: Mutex<HashMap<PeerId, PeerLink>>,
}

impl PeerConnectionManager {
    pub fn new(
        endpoint: Arc<dyn PeerEndpoint>,
        local_stream: MediaStream,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            endpoint,
            local_stream,
            playback,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        self.endpoint.id()
    }

    /// Call `peer` unless it is us or already linked. Returns whether a
    /// call was placed.
    pub async fn connect(&self, peer: &PeerId) -> bool {
        if peer == self.endpoint.id() {
            debug!(peer = %peer, "Ignoring connect to self");
            return false;
        }
        {
            let mut links = self.links.lock().await;
            if links.contains_key(peer) {
                debug!(peer = %peer, "Already linked");
                return false;
            }
            links.insert(
                peer.clone(),
                PeerLink {
                    call: None,
                    outbound: true,
                    active: false,
                },
            );
        }

        match self.endpoint.call(peer, self.local_stream.clone()).await {
            Ok(call) => {
                let claimed = {
                    let mut links = self.links.lock().await;
                    match links.get_mut(peer) {
                        Some(link) if link.outbound && link.call.is_none() => {
                            link.call = Some(call.clone());
                            true
                        }
                        _ => false,
                    }
                };
                if claimed {
                    info!(peer = %peer, call = %call, "Calling peer");
                } else {
                    // Disconnected or lost a glare race while dialing.
                    self.endpoint.hang_up(&call).await;
                }
                claimed
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Outbound call failed");
                let mut links = self.links.lock().await;
                if links
                    .get(peer)
                    .is_some_and(|l| l.outbound && l.call.is_none())
                {
                    links.remove(peer);
                }
                false
            }
        }
    }

    /// Route one signaling event.
    pub async fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::IncomingCall { call, from } => self.handle_incoming(call, from).await,
            PeerEvent::RemoteStream { call, peer, stream } => {
                self.handle_remote_stream(&call, &peer, stream).await;
            }
            PeerEvent::CallClosed { call, peer } => self.handle_closed(&call, &peer).await,
            PeerEvent::CallError {
                call,
                peer,
                message,
            } => {
                warn!(
                    call = ?call.as_ref().map(ToString::to_string),
                    peer = ?peer.as_ref().map(ToString::to_string),
                    error = %message,
                    "Peer connection error"
                );
                if let (Some(call), Some(peer)) = (call, peer) {
                    self.handle_closed(&call, &peer).await;
                }
            }
        }
    }

    /// Answer an inbound call with the local stream.
    ///
    /// When both sides dial each other at once, the call placed by the
    /// smaller peer id survives on both ends.
    async fn handle_incoming(&self, call: CallId, from: PeerId) {
        let me = self.endpoint.id().clone();
        if from == me {
            self.endpoint.hang_up(&call).await;
            return;
        }

        let superseded = {
            let mut links = self.links.lock().await;
            let accept = match links.get(&from) {
                None => true,
                // Glare: both dialed. Theirs wins when their id is smaller.
                Some(link) => link.outbound && !link.active && from < me,
            };
            if !accept {
                drop(links);
                debug!(peer = %from, call = %call, "Rejecting duplicate inbound call");
                self.endpoint.hang_up(&call).await;
                return;
            }
            let previous = links.insert(
                from.clone(),
                PeerLink {
                    call: Some(call.clone()),
                    outbound: false,
                    active: false,
                },
            );
            previous.and_then(|l| l.call)
        };

        if let Some(ours) = superseded {
            debug!(peer = %from, call = %ours, "Dropping our call in favour of theirs");
            self.endpoint.hang_up(&ours).await;
        }

        info!(peer = %from, call = %call, "Answering inbound call");
        if let Err(e) = self.endpoint.answer(&call, self.local_stream.clone()).await {
            warn!(peer = %from, error = %e, "Failed to answer call");
            let mut links = self.links.lock().await;
            if links.get(&from).is_some_and(|l| l.owns(&call)) {
                links.remove(&from);
            }
        }
    }

    async fn handle_remote_stream(&self, call: &CallId, peer: &PeerId, stream: MediaStream) {
        let attached = match self.links.lock().await.get_mut(peer) {
            Some(link) if link.owns(call) => {
                link.active = true;
                true
            }
            _ => false,
        };
        if attached {
            info!(peer = %peer, "Remote stream attached");
            self.playback.play(peer, stream);
        } else {
            debug!(peer = %peer, call = %call, "Stream for a stale call");
        }
    }

    /// Drop the link for `peer` if `call` is still the one it tracks.
    async fn handle_closed(&self, call: &CallId, peer: &PeerId) {
        let removed = {
            let mut links = self.links.lock().await;
            if links.get(peer).is_some_and(|l| l.owns(call)) {
                links.remove(peer)
            } else {
                None
            }
        };
        if removed.is_some() {
            info!(peer = %peer, call = %call, "Peer connection closed");
            self.playback.stop(peer);
        }
    }

    /// Close the link to one peer.
    pub async fn disconnect(&self, peer: &PeerId) {
        let removed = self.links.lock().await.remove(peer);
        if let Some(link) = removed {
            if let Some(call) = &link.call {
                self.endpoint.hang_up(call).await;
            }
            self.playback.stop(peer);
            info!(peer = %peer, "Disconnected peer");
        }
    }

    /// Close every link and clear the registry.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(PeerId, PeerLink)> = self.links.lock().await.drain().collect();
        for (peer, link) in drained {
            if let Some(call) = &link.call {
                self.endpoint.hang_up(call).await;
            }
            self.playback.stop(&peer);
        }
    }

    /// Peers with a pending or active link, sorted.
    pub async fn tracked_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links.lock().await.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Peers whose remote media has arrived, sorted.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .links
            .lock()
            .await
            .iter()
            .filter(|(_, l)| l.active)
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }
}
