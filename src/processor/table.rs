use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::flow::{FlowKey, FlowRecord, PacketRecord};

/// Shared map of live flows.
///
/// One mutex guards every read and write: appending a packet updates both the
/// packet list and the last-seen timestamp, and a reader must never observe
/// one without the other. Records are owned by the table; readers only get a
/// borrowed view for the duration of the lock.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: Mutex<HashMap<FlowKey, FlowRecord>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `packet` to the flow for `key`, creating the flow on first sight.
    /// Returns true when a new flow was created.
    pub fn append(&self, key: FlowKey, packet: PacketRecord) -> bool {
        let mut flows = self.flows.lock();
        let (flow, created) = match flows.entry(key) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(e) => (e.insert(FlowRecord::new(key, packet.timestamp)), true),
        };
        flow.push(packet);
        created
    }

    /// Runs `f` over every flow while holding the table lock. Ingestion is
    /// blocked until `f` returns.
    pub fn with_flows<R>(&self, f: impl FnOnce(&HashMap<FlowKey, FlowRecord>) -> R) -> R {
        let flows = self.flows.lock();
        f(&flows)
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total packets held across all flows.
    pub fn packet_count(&self) -> usize {
        self.flows.lock().values().map(FlowRecord::total_packets).sum()
    }
}
