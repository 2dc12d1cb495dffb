//! In-memory backends for exercising rooms without network or hardware.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};

use celflicks_common::{new_id, PeerId};

use crate::audio::{AudioConstraints, AudioDevice, AudioError, MediaStream, PlaybackSink, SampleSource};
use crate::membership::{
    ChangeFeed, ChannelEvent, FeedSubscription, PresenceChannel, PresenceService, PresenceTracker,
};
use crate::peer::{CallId, PeerEndpoint, PeerEvent, PeerNetwork, SignalingError};
use crate::protocol::{MembershipRow, NewRoom, PresenceRecord, Profile, Room};
use crate::realtime::{ChangeKind, ChannelError, TableChange};
use crate::store::{RoomStore, StoreError};

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

fn lcg(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    ((*state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
}

/// Deterministic uniform noise in `-amplitude..amplitude`.
pub fn noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..len).map(|_| lcg(&mut state) * amplitude).collect()
}

pub struct NoiseSource {
    amplitude: f32,
    state: StdMutex<u64>,
}

impl NoiseSource {
    pub fn new(amplitude: f32) -> Self {
        Self {
            amplitude,
            state: StdMutex::new(1),
        }
    }
}

impl SampleSource for NoiseSource {
    fn read_latest(&self, out: &mut [f32]) {
        let mut state = self.state.lock().unwrap();
        for sample in out.iter_mut() {
            *sample = lcg(&mut state) * self.amplitude;
        }
    }
}

/// Silent until switched loud.
pub struct SwitchableSource {
    loud: AtomicBool,
    noise: NoiseSource,
}

impl SwitchableSource {
    pub fn new(amplitude: f32) -> Self {
        Self {
            loud: AtomicBool::new(false),
            noise: NoiseSource::new(amplitude),
        }
    }

    pub fn set_loud(&self, loud: bool) {
        self.loud.store(loud, Ordering::SeqCst);
    }
}

impl SampleSource for SwitchableSource {
    fn read_latest(&self, out: &mut [f32]) {
        if self.loud.load(Ordering::SeqCst) {
            self.noise.read_latest(out);
        } else {
            out.fill(0.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Audio device & playback
// ---------------------------------------------------------------------------

pub struct FakeAudioDevice {
    has_input: bool,
    deny: bool,
    pub source: Arc<SwitchableSource>,
    gate: Option<Arc<Notify>>,
    opened: StdMutex<Vec<MediaStream>>,
    constraints: StdMutex<Option<AudioConstraints>>,
}

impl FakeAudioDevice {
    pub fn new() -> Self {
        Self {
            has_input: true,
            deny: false,
            source: Arc::new(SwitchableSource::new(0.5)),
            gate: None,
            opened: StdMutex::new(Vec::new()),
            constraints: StdMutex::new(None),
        }
    }

    pub fn without_input() -> Self {
        Self {
            has_input: false,
            ..Self::new()
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::new()
        }
    }

    /// Permission is only granted once the returned `Notify` fires.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(Arc::clone(&gate)),
                ..Self::new()
            },
            gate,
        )
    }

    pub fn opened(&self) -> Vec<MediaStream> {
        self.opened.lock().unwrap().clone()
    }

    pub fn last_constraints(&self) -> Option<AudioConstraints> {
        *self.constraints.lock().unwrap()
    }
}

#[async_trait]
impl AudioDevice for FakeAudioDevice {
    fn has_input(&self) -> bool {
        self.has_input
    }

    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<MediaStream, AudioError> {
        *self.constraints.lock().unwrap() = Some(*constraints);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.deny {
            return Err(AudioError::PermissionDenied);
        }
        let stream = MediaStream::new(self.source.clone(), 1);
        self.opened.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
pub struct FakePlayback {
    playing: StdMutex<HashMap<PeerId, MediaStream>>,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn playing(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.playing.lock().unwrap().keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl PlaybackSink for FakePlayback {
    fn play(&self, peer: &PeerId, stream: MediaStream) {
        self.playing.lock().unwrap().insert(peer.clone(), stream);
    }

    fn stop(&self, peer: &PeerId) {
        self.playing.lock().unwrap().remove(peer);
    }
}

// ---------------------------------------------------------------------------
// Store & change feed
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryFeed {
    subscribers: Arc<Mutex<Vec<(u64, String, mpsc::Sender<TableChange>)>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notify(&self, change: TableChange) {
        let targets: Vec<mpsc::Sender<TableChange>> = self
            .subscribers
            .lock()
            .await
            .iter()
            .filter(|(_, table, _)| *table == change.table)
            .map(|(_, _, tx)| tx.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(change.clone()).await;
        }
    }

    pub async fn subscriber_count(&self, table: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .iter()
            .filter(|(_, t, _)| t == table)
            .count()
    }
}

struct MemoryFeedSubscription {
    id: u64,
    feed: MemoryFeed,
}

#[async_trait]
impl FeedSubscription for MemoryFeedSubscription {
    async fn unsubscribe(&self) {
        self.feed.subscribers.lock().await.retain(|(id, _, _)| *id != self.id);
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe_table(
        &self,
        table: &str,
        changes: mpsc::Sender<TableChange>,
    ) -> Result<Box<dyn FeedSubscription>, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .await
            .push((id, table.to_string(), changes));
        Ok(Box::new(MemoryFeedSubscription {
            id,
            feed: self.clone(),
        }))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<Vec<Room>>,
    memberships: Mutex<Vec<MembershipRow>>,
    profiles: Mutex<HashMap<String, Profile>>,
    feed: Option<MemoryFeed>,
    fail_list: AtomicBool,
    fail_insert: AtomicBool,
    fail_membership: AtomicBool,
    list_gate: StdMutex<Option<Arc<Notify>>>,
    parked_lists: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(feed: MemoryFeed) -> Self {
        Self {
            feed: Some(feed),
            ..Self::default()
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Hold the next listing, after it has read the rows, until the
    /// returned `Notify` fires.
    pub fn gate_next_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn parked_listings(&self) -> u64 {
        self.parked_lists.load(Ordering::SeqCst)
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_memberships(&self, fail: bool) {
        self.fail_membership.store(fail, Ordering::SeqCst);
    }

    pub async fn add_profile(&self, id: &str, username: &str) {
        self.profiles.lock().await.insert(
            id.to_string(),
            Profile {
                id: id.to_string(),
                username: Some(username.to_string()),
                avatar_url: Some(format!("https://cdn.example/{id}.png")),
            },
        );
    }

    pub async fn memberships(&self) -> Vec<MembershipRow> {
        self.memberships.lock().await.clone()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection refused".into()));
        }
        let rooms: Vec<Room> = self.rooms.lock().await.iter().rev().cloned().collect();
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.parked_lists.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.parked_lists.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(rooms)
    }

    async fn insert_room(&self, room: &NewRoom) -> Result<Room, StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 403,
                message: "new row violates row-level security policy".into(),
            });
        }
        let row = Room {
            id: new_id(),
            title: room.title.clone(),
            host_id: room.host_id.clone(),
            created_at: Utc::now(),
        };
        self.rooms.lock().await.push(row.clone());
        if let Some(feed) = &self.feed {
            feed.notify(TableChange {
                kind: ChangeKind::Insert,
                schema: "public".into(),
                table: "audio_rooms".into(),
                record: serde_json::to_value(&row).unwrap(),
                old_record: Value::Null,
            })
            .await;
        }
        Ok(row)
    }

    async fn fetch_room(&self, room_id: &str) -> Result<Room, StoreError> {
        self.rooms
            .lock()
            .await
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                table: "audio_rooms".into(),
                id: room_id.into(),
            })
    }

    async fn insert_membership(&self, row: &MembershipRow) -> Result<(), StoreError> {
        if self.fail_membership.load(Ordering::SeqCst) {
            return Err(StoreError::Api {
                status: 409,
                message: "duplicate key value violates unique constraint".into(),
            });
        }
        self.memberships.lock().await.push(row.clone());
        Ok(())
    }

    async fn delete_membership(&self, row: &MembershipRow) -> Result<(), StoreError> {
        self.memberships.lock().await.retain(|r| r != row);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.lock().await.get(user_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Presence hub
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    key: String,
    tracker: PresenceTracker,
    events: mpsc::Sender<ChannelEvent>,
}

#[derive(Default)]
struct Topic {
    metas: BTreeMap<String, Vec<Value>>,
    subscribers: Vec<Subscriber>,
}

impl Topic {
    fn raw_state(&self) -> HashMap<String, Vec<Value>> {
        self.metas.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

type Outbox = Vec<(mpsc::Sender<ChannelEvent>, Vec<ChannelEvent>)>;

/// Presence server shared by every in-memory client, speaking the same
/// state/diff shapes as Phoenix.
#[derive(Clone, Default)]
pub struct MemoryPresenceHub {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    next: Arc<AtomicU64>,
    refuse: Arc<AtomicBool>,
    tracks: Arc<AtomicU64>,
    gate: Arc<StdMutex<Option<Arc<Notify>>>>,
    parked: Arc<AtomicU64>,
}

async fn deliver(outbox: Outbox) {
    for (tx, events) in outbox {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
}

impl MemoryPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later subscribe fail.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hold every later subscribe until the returned `Notify` fires.
    pub fn gate_subscriptions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Subscribes currently held at the gate.
    pub fn parked_subscriptions(&self) -> u64 {
        self.parked.load(Ordering::SeqCst)
    }

    /// Number of `track` calls so far, across all clients.
    pub fn track_count(&self) -> u64 {
        self.tracks.load(Ordering::SeqCst)
    }

    pub async fn records(&self, topic: &str) -> Vec<PresenceRecord> {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|t| {
                t.metas
                    .values()
                    .flatten()
                    .filter_map(PresenceRecord::from_meta)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }

    /// Push a diff to every subscriber without changing the server state.
    pub async fn inject_diff(
        &self,
        topic: &str,
        joins: HashMap<String, Vec<Value>>,
        leaves: HashMap<String, Vec<Value>>,
    ) {
        let outbox = {
            let mut topics = self.topics.lock().await;
            let Some(t) = topics.get_mut(topic) else { return };
            t.subscribers
                .iter_mut()
                .map(|s| (s.events.clone(), s.tracker.apply_diff(joins.clone(), leaves.clone())))
                .collect()
        };
        deliver(outbox).await;
    }

    /// Re-send the full server state to every subscriber.
    pub async fn resync(&self, topic: &str) {
        let outbox = {
            let mut topics = self.topics.lock().await;
            let Some(t) = topics.get_mut(topic) else { return };
            let state = t.raw_state();
            t.subscribers
                .iter_mut()
                .map(|s| (s.events.clone(), s.tracker.apply_state(state.clone())))
                .collect()
        };
        deliver(outbox).await;
    }

    fn diff_to_all(
        t: &mut Topic,
        joins: HashMap<String, Vec<Value>>,
        leaves: HashMap<String, Vec<Value>>,
    ) -> Outbox {
        t.subscribers
            .iter_mut()
            .map(|s| (s.events.clone(), s.tracker.apply_diff(joins.clone(), leaves.clone())))
            .collect()
    }

    async fn track(&self, topic: &str, key: &str, record: &PresenceRecord) -> Result<(), ChannelError> {
        self.tracks.fetch_add(1, Ordering::SeqCst);
        let mut meta = serde_json::to_value(record).map_err(|e| ChannelError::Rejected {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        meta["phx_ref"] = json!(self.next.fetch_add(1, Ordering::SeqCst).to_string());

        let outbox = {
            let mut topics = self.topics.lock().await;
            let t = topics.get_mut(topic).ok_or(ChannelError::Closed)?;
            let mut leaves = HashMap::new();
            if let Some(old) = t.metas.insert(key.to_string(), vec![meta.clone()]) {
                leaves.insert(key.to_string(), old);
            }
            let mut joins = HashMap::new();
            joins.insert(key.to_string(), vec![meta]);
            Self::diff_to_all(t, joins, leaves)
        };
        deliver(outbox).await;
        Ok(())
    }

    async fn leave(&self, topic: &str, key: &str, sub_id: u64) {
        let outbox = {
            let mut topics = self.topics.lock().await;
            let Some(t) = topics.get_mut(topic) else { return };
            t.subscribers.retain(|s| s.id != sub_id);
            let still_keyed = t.subscribers.iter().any(|s| s.key == key);
            match t.metas.remove(key) {
                Some(old) if !still_keyed => {
                    let mut leaves = HashMap::new();
                    leaves.insert(key.to_string(), old);
                    Self::diff_to_all(t, HashMap::new(), leaves)
                }
                Some(old) => {
                    t.metas.insert(key.to_string(), old);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        deliver(outbox).await;
    }
}

#[async_trait]
impl PresenceService for MemoryPresenceHub {
    async fn subscribe(
        &self,
        topic: &str,
        presence_key: &str,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Box<dyn PresenceChannel>, ChannelError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Timeout {
                topic: topic.to_string(),
            });
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.parked.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.parked.fetch_sub(1, Ordering::SeqCst);
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let outbox = {
            let mut topics = self.topics.lock().await;
            let t = topics.entry(topic.to_string()).or_default();
            let mut tracker = PresenceTracker::new();
            let mut initial = vec![ChannelEvent::Subscribed];
            initial.extend(tracker.apply_state(t.raw_state()));
            t.subscribers.push(Subscriber {
                id,
                key: presence_key.to_string(),
                tracker,
                events: events.clone(),
            });
            vec![(events, initial)]
        };
        deliver(outbox).await;
        Ok(Box::new(MemoryChannel {
            hub: self.clone(),
            topic: topic.to_string(),
            key: presence_key.to_string(),
            id,
        }))
    }
}

struct MemoryChannel {
    hub: MemoryPresenceHub,
    topic: String,
    key: String,
    id: u64,
}

#[async_trait]
impl PresenceChannel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn track(&self, record: &PresenceRecord) -> Result<(), ChannelError> {
        self.hub.track(&self.topic, &self.key, record).await
    }

    async fn unsubscribe(&self) {
        self.hub.leave(&self.topic, &self.key, self.id).await;
    }
}

// ---------------------------------------------------------------------------
// Peer network
// ---------------------------------------------------------------------------

struct CallRecord {
    caller: PeerId,
    callee: PeerId,
    caller_stream: MediaStream,
}

#[derive(Default)]
struct NetState {
    endpoints: HashMap<PeerId, mpsc::Sender<PeerEvent>>,
    calls: HashMap<CallId, CallRecord>,
    ids: VecDeque<PeerId>,
}

/// Signaling network shared by every in-memory client.
#[derive(Clone, Default)]
pub struct MemoryPeerNetwork {
    state: Arc<StdMutex<NetState>>,
    fail_open: Arc<AtomicBool>,
}

impl MemoryPeerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out these peer ids, in order, before falling back to random ones.
    pub fn with_ids(ids: &[&str]) -> Self {
        let net = Self::new();
        net.state.lock().unwrap().ids = ids.iter().map(|id| PeerId::from(*id)).collect();
        net
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_endpoints(&self) -> usize {
        self.state.lock().unwrap().endpoints.len()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    fn emit(state: &NetState, to: &PeerId, event: PeerEvent) {
        if let Some(tx) = state.endpoints.get(to) {
            let _ = tx.try_send(event);
        }
    }

    fn end_call(state: &mut NetState, call: &CallId) {
        if let Some(record) = state.calls.remove(call) {
            Self::emit(
                state,
                &record.caller,
                PeerEvent::CallClosed {
                    call: call.clone(),
                    peer: record.callee.clone(),
                },
            );
            Self::emit(
                state,
                &record.callee,
                PeerEvent::CallClosed {
                    call: call.clone(),
                    peer: record.caller.clone(),
                },
            );
        }
    }
}

#[async_trait]
impl PeerNetwork for MemoryPeerNetwork {
    async fn open(&self, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerEndpoint>, SignalingError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SignalingError::Endpoint("signaling server unreachable".into()));
        }
        let mut state = self.state.lock().unwrap();
        let id = state.ids.pop_front().unwrap_or_default();
        state.endpoints.insert(id.clone(), events);
        Ok(Arc::new(MemoryEndpoint {
            id,
            net: self.clone(),
        }))
    }
}

pub struct MemoryEndpoint {
    id: PeerId,
    net: MemoryPeerNetwork,
}

#[async_trait]
impl PeerEndpoint for MemoryEndpoint {
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn call(&self, peer: &PeerId, stream: MediaStream) -> Result<CallId, SignalingError> {
        let mut state = self.net.state.lock().unwrap();
        if !state.endpoints.contains_key(&self.id) {
            return Err(SignalingError::Closed);
        }
        if !state.endpoints.contains_key(peer) {
            return Err(SignalingError::Call {
                peer: peer.clone(),
                message: "peer unavailable".into(),
            });
        }
        let call = CallId::new();
        state.calls.insert(
            call.clone(),
            CallRecord {
                caller: self.id.clone(),
                callee: peer.clone(),
                caller_stream: stream,
            },
        );
        MemoryPeerNetwork::emit(
            &state,
            peer,
            PeerEvent::IncomingCall {
                call: call.clone(),
                from: self.id.clone(),
            },
        );
        Ok(call)
    }

    async fn answer(&self, call: &CallId, stream: MediaStream) -> Result<(), SignalingError> {
        let state = self.net.state.lock().unwrap();
        let record = state.calls.get(call).ok_or(SignalingError::Closed)?;
        MemoryPeerNetwork::emit(
            &state,
            &record.caller,
            PeerEvent::RemoteStream {
                call: call.clone(),
                peer: record.callee.clone(),
                stream,
            },
        );
        MemoryPeerNetwork::emit(
            &state,
            &record.callee,
            PeerEvent::RemoteStream {
                call: call.clone(),
                peer: record.caller.clone(),
                stream: record.caller_stream.clone(),
            },
        );
        Ok(())
    }

    async fn hang_up(&self, call: &CallId) {
        let mut state = self.net.state.lock().unwrap();
        MemoryPeerNetwork::end_call(&mut state, call);
    }

    async fn close(&self) {
        let mut state = self.net.state.lock().unwrap();
        let mine: Vec<CallId> = state
            .calls
            .iter()
            .filter(|(_, r)| r.caller == self.id || r.callee == self.id)
            .map(|(id, _)| id.clone())
            .collect();
        for call in mine {
            MemoryPeerNetwork::end_call(&mut state, &call);
        }
        state.endpoints.remove(&self.id);
    }
}
