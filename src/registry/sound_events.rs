//! Per-event index of live sounds
//!
//! Tracks which UUIDs belong to a sound event id, with a secondary view
//! keyed by owning bus name. Both views always hold the same UUIDs.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
struct SoundEventInfo {
    uuids: HashSet<Uuid>,
    by_bus_name: HashMap<String, HashSet<Uuid>>,
}

/// Index from sound event id to the live sounds playing it
#[derive(Debug, Default)]
pub struct SoundEventIndex {
    events: HashMap<String, SoundEventInfo>,
}

impl SoundEventIndex {
    pub fn add(&mut self, sound_event_id: &str, bus_name: &str, uuid: Uuid) {
        let info = self.events.entry(sound_event_id.to_string()).or_default();
        info.uuids.insert(uuid);
        info.by_bus_name
            .entry(bus_name.to_string())
            .or_default()
            .insert(uuid);
    }

    pub fn remove(&mut self, sound_event_id: &str, bus_name: &str, uuid: Uuid) {
        let Some(info) = self.events.get_mut(sound_event_id) else {
            return;
        };
        info.uuids.remove(&uuid);
        if let Some(for_bus) = info.by_bus_name.get_mut(bus_name) {
            for_bus.remove(&uuid);
            if for_bus.is_empty() {
                info.by_bus_name.remove(bus_name);
            }
        }
        if info.uuids.is_empty() {
            self.events.remove(sound_event_id);
        }
    }

    /// All live UUIDs for an event, across clients
    pub fn uuids(&self, sound_event_id: &str) -> Vec<Uuid> {
        self.events
            .get(sound_event_id)
            .map(|info| info.uuids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Live UUIDs for an event owned by one client
    pub fn uuids_for_bus(&self, sound_event_id: &str, bus_name: &str) -> Vec<Uuid> {
        self.events
            .get(sound_event_id)
            .and_then(|info| info.by_bus_name.get(bus_name))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, sound_event_id: &str) -> usize {
        self.events
            .get(sound_event_id)
            .map(|info| info.uuids.len())
            .unwrap_or(0)
    }

    pub fn contains_event(&self, sound_event_id: &str) -> bool {
        self.events.contains_key(sound_event_id)
    }

    /// Check that the two views agree, for tests and debug assertions
    #[cfg(test)]
    pub fn views_consistent(&self) -> bool {
        self.events.values().all(|info| {
            let flattened: HashSet<Uuid> = info
                .by_bus_name
                .values()
                .flat_map(|set| set.iter().copied())
                .collect();
            flattened == info.uuids
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_keep_views_in_sync() {
        let mut index = SoundEventIndex::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.add("ui/click", ":1.1", a);
        index.add("ui/click", ":1.2", b);
        assert!(index.views_consistent());
        assert_eq!(index.count("ui/click"), 2);
        assert_eq!(index.uuids_for_bus("ui/click", ":1.1"), vec![a]);

        index.remove("ui/click", ":1.1", a);
        assert!(index.views_consistent());
        assert_eq!(index.count("ui/click"), 1);
        assert!(index.uuids_for_bus("ui/click", ":1.1").is_empty());

        index.remove("ui/click", ":1.2", b);
        assert!(!index.contains_event("ui/click"));
    }

    #[test]
    fn removing_unknown_entries_is_harmless() {
        let mut index = SoundEventIndex::default();
        index.remove("ui/none", ":1.1", Uuid::new_v4());
        assert_eq!(index.count("ui/none"), 0);
    }
}
