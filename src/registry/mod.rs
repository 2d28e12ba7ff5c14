//! Live-sound registry
//!
//! Owns every [`Sound`] in the process and all bookkeeping around it:
//! reference counts, the per-event index, the per-client watcher sets, and
//! the background LIFO. Other components address sounds by UUID and resolve
//! them here on demand.

mod bg_stack;
mod sound_events;

pub use bg_stack::BgStack;
pub use sound_events::SoundEventIndex;

use crate::error::RegistryError;
use crate::metadata::{OverlapBehavior, SoundKind};
use crate::sound::Sound;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Bookkeeping for one watched client connection
#[derive(Debug, Default)]
pub struct ClientWatcher {
    /// Live sounds this client is responsible for
    pub uuids: HashSet<Uuid>,
}

/// Process-wide mapping of live sounds and their indices
#[derive(Debug, Default)]
pub struct Registry {
    sounds: HashMap<Uuid, Sound>,
    refcount: HashMap<Uuid, u32>,
    watcher_by_bus_name: HashMap<String, ClientWatcher>,
    sound_events: SoundEventIndex,
    bg_stack: BgStack,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created sound and apply the background LIFO rule
    ///
    /// Returns the previously playing background sound to pause, if any.
    pub fn add_sound(&mut self, sound: Sound, overlap: OverlapBehavior) -> Option<Uuid> {
        let uuid = sound.uuid();
        let kind = sound.kind();
        self.sound_events
            .add(sound.sound_event_id(), sound.bus_name(), uuid);
        self.refcount.entry(uuid).or_insert(0);
        self.sounds.insert(uuid, sound);

        if kind == SoundKind::Bg {
            self.bg_stack.push(uuid, overlap)
        } else {
            None
        }
    }

    /// Re-apply the background LIFO rule for an existing sound
    ///
    /// Called on every replay of a reused (`restart`/`ignore`) sound so the
    /// stack ordering follows the request order.
    pub fn refresh_bg_stack(&mut self, uuid: Uuid, overlap: OverlapBehavior) -> Option<Uuid> {
        let Some(sound) = self.sounds.get(&uuid) else {
            return None;
        };
        if sound.kind() != SoundKind::Bg {
            return None;
        }
        self.bg_stack.push(uuid, overlap)
    }

    /// Remove a sound from every index
    ///
    /// Returns the removed sound together with the background sound to
    /// resume, if the removed one was the top of the stack and the
    /// uncovered sound still has references.
    pub fn remove_sound(&mut self, uuid: Uuid) -> Option<(Sound, Option<Uuid>)> {
        let sound = self.sounds.remove(&uuid)?;

        let resume = match self.bg_stack.remove(uuid) {
            Some(candidate) => {
                if self.refcount.get(&candidate).copied().unwrap_or(0) > 0 {
                    Some(candidate)
                } else {
                    warn!(
                        uuid = %candidate,
                        "Cannot resume this sound because its owning apps have \
                         disappeared from the bus"
                    );
                    None
                }
            }
            None => None,
        };

        self.sound_events
            .remove(sound.sound_event_id(), sound.bus_name(), uuid);
        if let Some(watcher) = self.watcher_by_bus_name.get_mut(sound.bus_name()) {
            watcher.uuids.remove(&uuid);
        }
        self.refcount.remove(&uuid);

        Some((sound, resume))
    }

    /// Take one reference on a sound, returning the new count
    pub fn ref_sound(&mut self, uuid: Uuid) -> Result<u32, RegistryError> {
        let count = self
            .refcount
            .get_mut(&uuid)
            .ok_or(RegistryError::NotInRegistry { uuid })?;
        *count += 1;
        debug!(uuid = %uuid, refcount = *count, "Reference.");
        Ok(*count)
    }

    /// Drop one reference (or all of them), returning the new count
    ///
    /// The caller stops the sound when the count reaches 0.
    pub fn unref_sound(&mut self, uuid: Uuid, clear_all: bool) -> Result<u32, RegistryError> {
        let count = self
            .refcount
            .get_mut(&uuid)
            .ok_or(RegistryError::NotInRegistry { uuid })?;
        if *count == 0 {
            return Err(RegistryError::RefcountAlreadyZero { uuid });
        }
        if clear_all {
            *count = 0;
        } else {
            *count -= 1;
        }
        debug!(uuid = %uuid, refcount = *count, "Unreference.");
        Ok(*count)
    }

    pub fn refcount(&self, uuid: Uuid) -> Result<u32, RegistryError> {
        self.refcount
            .get(&uuid)
            .copied()
            .ok_or(RegistryError::NotInRegistry { uuid })
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Sound> {
        self.sounds.get(&uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Sound> {
        self.sounds.get_mut(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.sounds.contains_key(&uuid)
    }

    /// The single reusable sound for (event, bus name), if one exists
    ///
    /// Under `restart`/`ignore` at most one sound exists per pair; any
    /// stray extra is a bookkeeping bug worth a warning.
    pub fn get_by_event_and_bus(&self, sound_event_id: &str, bus_name: &str) -> Option<Uuid> {
        let uuids = self.sound_events.uuids_for_bus(sound_event_id, bus_name);
        if uuids.len() > 1 {
            warn!(
                sound_event_id = %sound_event_id,
                bus_name = %bus_name,
                count = uuids.len(),
                "More than one reusable sound for this event and bus name"
            );
        }
        uuids.first().copied()
    }

    pub fn uuids_for_event(&self, sound_event_id: &str) -> Vec<Uuid> {
        self.sound_events.uuids(sound_event_id)
    }

    pub fn uuids_for_event_and_bus(&self, sound_event_id: &str, bus_name: &str) -> Vec<Uuid> {
        self.sound_events.uuids_for_bus(sound_event_id, bus_name)
    }

    pub fn count_for_event(&self, sound_event_id: &str) -> usize {
        self.sound_events.count(sound_event_id)
    }

    pub fn has_event(&self, sound_event_id: &str) -> bool {
        self.sound_events.contains_event(sound_event_id)
    }

    /// Register `uuid` under the client's watcher, creating it on first use
    ///
    /// Returns true when the bus name was not watched before, so the caller
    /// can install the actual bus-level watch.
    pub fn watch(&mut self, bus_name: &str, uuid: Uuid) -> bool {
        let newly_watched = !self.watcher_by_bus_name.contains_key(bus_name);
        self.watcher_by_bus_name
            .entry(bus_name.to_string())
            .or_default()
            .uuids
            .insert(uuid);
        newly_watched
    }

    pub fn is_watching(&self, bus_name: &str) -> bool {
        self.watcher_by_bus_name.contains_key(bus_name)
    }

    /// Sounds a client is responsible for
    pub fn watched_uuids(&self, bus_name: &str) -> Vec<Uuid> {
        self.watcher_by_bus_name
            .get(bus_name)
            .map(|w| w.uuids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the sender ever referenced this sound
    pub fn owned_by(&self, uuid: Uuid, bus_name: &str) -> bool {
        self.watcher_by_bus_name
            .get(bus_name)
            .map(|w| w.uuids.contains(&uuid))
            .unwrap_or(false)
    }

    pub fn drop_watcher(&mut self, bus_name: &str) -> Option<ClientWatcher> {
        self.watcher_by_bus_name.remove(bus_name)
    }

    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.sounds.keys().copied().collect()
    }

    pub fn sounds_mut(&mut self) -> impl Iterator<Item = &mut Sound> {
        self.sounds.values_mut()
    }

    /// Bottom-first snapshot of the background stack
    pub fn bg_stack_snapshot(&self) -> Vec<Uuid> {
        self.bg_stack.snapshot()
    }
}
