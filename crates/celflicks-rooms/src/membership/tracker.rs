//! Merges Phoenix presence messages into the live member set.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::protocol::PresenceRecord;

use super::{ChannelEvent, PresenceState};

type RawMetas = Vec<Value>;

/// Authoritative presence state for one topic.
///
/// Metas are matched by `phx_ref`, so an update (Phoenix sends it as a
/// join plus a leave for the same key) replaces the old meta in place.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    metas: BTreeMap<String, RawMetas>,
}

fn phx_ref(meta: &Value) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

fn same_meta(a: &Value, b: &Value) -> bool {
    match (phx_ref(a), phx_ref(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn decode(metas: &[Value]) -> Vec<PresenceRecord> {
    metas
        .iter()
        .filter_map(|meta| {
            let record = PresenceRecord::from_meta(meta);
            if record.is_none() {
                debug!(meta = %meta, "Skipping undecodable presence meta");
            }
            record
        })
        .collect()
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state with every meta decoded. Keys whose metas are all
    /// undecodable are left out.
    pub fn state(&self) -> PresenceState {
        self.metas
            .iter()
            .filter_map(|(key, metas)| {
                let records = decode(metas);
                (!records.is_empty()).then(|| (key.clone(), records))
            })
            .collect()
    }

    /// Replace the state with a full `presence_state` snapshot.
    ///
    /// Emits `Leave` for metas that vanished and always a trailing `Sync`.
    /// Members already present in a snapshot are never reported as joins:
    /// they are expected to call us.
    pub fn apply_state(&mut self, snapshot: HashMap<String, RawMetas>) -> Vec<ChannelEvent> {
        let mut left = Vec::new();
        for (key, metas) in &self.metas {
            let incoming = snapshot.get(key).map(Vec::as_slice).unwrap_or_default();
            let gone: Vec<Value> = metas
                .iter()
                .filter(|m| !incoming.iter().any(|n| same_meta(m, n)))
                .cloned()
                .collect();
            left.extend(decode(&gone));
        }

        self.metas = snapshot
            .into_iter()
            .filter(|(_, metas)| !metas.is_empty())
            .collect();

        let current = self.state();
        let mut events = Vec::new();
        if !left.is_empty() {
            events.push(ChannelEvent::Leave {
                left,
                current: current.clone(),
            });
        }
        events.push(ChannelEvent::Sync(current));
        events
    }

    /// Apply a `presence_diff`: joins first, then leaves.
    ///
    /// Emits `Join` for newly seen metas, `Leave` carrying the post-diff
    /// state, then `Sync`.
    pub fn apply_diff(
        &mut self,
        joins: HashMap<String, RawMetas>,
        leaves: HashMap<String, RawMetas>,
    ) -> Vec<ChannelEvent> {
        let mut joined = Vec::new();
        for (key, metas) in joins {
            let entry = self.metas.entry(key).or_default();
            for meta in metas {
                if !entry.iter().any(|m| same_meta(m, &meta)) {
                    joined.extend(decode(std::slice::from_ref(&meta)));
                    entry.push(meta);
                }
            }
        }

        let mut left = Vec::new();
        for (key, metas) in leaves {
            let Some(entry) = self.metas.get_mut(&key) else {
                continue;
            };
            let (gone, kept): (Vec<Value>, Vec<Value>) = entry
                .drain(..)
                .partition(|m| metas.iter().any(|l| same_meta(m, l)));
            *entry = kept;
            left.extend(decode(&gone));
            if entry.is_empty() {
                self.metas.remove(&key);
            }
        }

        let current = self.state();
        let mut events = Vec::new();
        if !joined.is_empty() {
            events.push(ChannelEvent::Join(joined));
        }
        if !left.is_empty() {
            events.push(ChannelEvent::Leave {
                left,
                current: current.clone(),
            });
        }
        events.push(ChannelEvent::Sync(current));
        events
    }
}
