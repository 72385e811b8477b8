//! Roster of remote senders
//!
//! Multi-peer applications see one entry per distinct sender identity,
//! created lazily when the first envelope from that identity arrives and
//! updated in place afterwards. Entries are never removed by this layer;
//! pruning, if wanted, is the application's call.

use super::envelope::DataEnvelope;
use crate::signaling::protocol::ClientId;

/// One known remote sender
#[derive(Debug, Clone)]
pub struct RosterEntry<S> {
    /// Sender identity
    pub user_id: ClientId,

    /// Payload of the most recent envelope from this sender
    pub last_payload: serde_json::Value,

    /// Application state attached to this sender
    pub state: S,
}

/// Deduplicated table of remote senders, in registration order
///
/// Lookup is by identity equality; the first-registered entry wins, and
/// iteration follows registration order.
#[derive(Debug, Default)]
pub struct Roster<S> {
    entries: Vec<RosterEntry<S>>,
}

impl<S> Roster<S> {
    /// Create an empty roster
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record an envelope, updating the sender's entry in place
    ///
    /// Unknown senders are appended with `init(&envelope)` as their starting
    /// application state.
    pub fn observe_with(
        &mut self,
        envelope: &DataEnvelope,
        init: impl FnOnce(&DataEnvelope) -> S,
    ) -> &mut RosterEntry<S> {
        match self
            .entries
            .iter()
            .position(|e| e.user_id == envelope.user_id)
        {
            Some(idx) => {
                self.entries[idx].last_payload = envelope.data.clone();
                &mut self.entries[idx]
            }
            None => {
                self.entries.push(RosterEntry {
                    user_id: envelope.user_id.clone(),
                    last_payload: envelope.data.clone(),
                    state: init(envelope),
                });
                let idx = self.entries.len() - 1;
                &mut self.entries[idx]
            }
        }
    }

    /// The entry for `user_id`, if that sender has been seen
    pub fn get(&self, user_id: &str) -> Option<&RosterEntry<S>> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    /// The mutable entry for `user_id`, if that sender has been seen
    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut RosterEntry<S>> {
        self.entries.iter_mut().find(|e| e.user_id == user_id)
    }

    /// Iterate entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry<S>> {
        self.entries.iter()
    }

    /// Number of distinct senders seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sender has been seen yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Default> Roster<S> {
    /// Record an envelope, defaulting the application state for new senders
    pub fn observe(&mut self, envelope: &DataEnvelope) -> &mut RosterEntry<S> {
        self.observe_with(envelope, |_| S::default())
    }
}
