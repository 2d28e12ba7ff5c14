//! Sound orchestration engine
//!
//! The [`Server`] owns the registry and runs every request handler and
//! every internal event handler. All asynchronous sources funnel into one
//! event channel (see [`crate::events`]); the event-loop task spawned by
//! [`Server::spawn_event_loop`] is the sole consumer.

pub mod dbus;
mod hold;

pub use hold::ProcessHold;

use crate::audio::{PipelineFactory, PipelineSpec};
use crate::error::{CatalogError, PipelineError, RegistryError};
use crate::events::{EventReceiver, EventSender, ServerEvent, SoundEventSender};
use crate::focus::FocusInfo;
use crate::metadata::{ApplyStateOn, Catalog, OverlapBehavior, PlayOptions, SoundProfile};
use crate::registry::Registry;
use crate::sound::{Sound, SoundState, UpdateOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zbus::object_server::SignalContext;

/// Cap on concurrent instances of one sound event across all clients
pub const MAX_SIMULTANEOUS_SOUNDS: usize = 5;

/// Idle period after the last sound before the daemon lets go
pub const DEFAULT_IDLE_RELEASE: Duration = Duration::from_secs(10);

/// Result of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// A new sound was created and started
    Created(Uuid),
    /// An existing sound was reused under restart/ignore
    Reused(Uuid),
    /// The per-event cap was hit; the request is dropped silently
    OverLimit,
}

impl PlayOutcome {
    /// Identifier handed back on the bus; empty when over the limit
    pub fn identifier(&self) -> String {
        match self {
            PlayOutcome::Created(uuid) | PlayOutcome::Reused(uuid) => uuid.to_string(),
            PlayOutcome::OverLimit => String::new(),
        }
    }
}

/// Caller-visible play failures
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("sound event with id {0} does not exist")]
    UnknownSoundEventID(String),

    #[error("'{0}' is not a valid option for 'overlap-behavior'")]
    UnknownOverlapBehavior(String),

    #[error("sound event could not be resolved: {0}")]
    Resolve(CatalogError),

    #[error("pipeline could not be built: {0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Default)]
struct IdleCountdown {
    current: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

/// The orchestrator
pub struct Server {
    catalog: Catalog,
    factory: Box<dyn PipelineFactory>,
    registry: Mutex<Registry>,
    events_tx: EventSender,
    hold: ProcessHold,
    countdown: StdMutex<IdleCountdown>,
    focus: StdMutex<Option<FocusInfo>>,
    idle_release: Duration,
    signal_ctxt: StdMutex<Option<SignalContext<'static>>>,
}

impl Server {
    pub fn new(
        catalog: Catalog,
        factory: Box<dyn PipelineFactory>,
        events_tx: EventSender,
        idle_release: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            factory,
            registry: Mutex::new(Registry::new()),
            events_tx,
            hold: ProcessHold::new(),
            countdown: StdMutex::new(IdleCountdown::default()),
            focus: StdMutex::new(None),
            idle_release,
            signal_ctxt: StdMutex::new(None),
        })
    }

    /// Liveness handle for the main task to await
    pub fn hold(&self) -> &ProcessHold {
        &self.hold
    }

    /// Sender side of the daemon event channel
    pub fn events_tx(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Arm the boot countdown and hand back the event-loop task
    pub fn start(self: &Arc<Self>, events_rx: EventReceiver) -> JoinHandle<()> {
        self.arm_countdown();
        self.spawn_event_loop(events_rx)
    }

    /// Spawn the sole consumer of the daemon event channel
    pub fn spawn_event_loop(self: &Arc<Self>, mut events_rx: EventReceiver) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                server.handle_event(event).await;
            }
            debug!("Event channel closed; event loop exiting");
        })
    }

    /// Attach the signal context used for bus-facing `Error` emissions
    pub fn set_signal_context(&self, ctxt: SignalContext<'static>) {
        *self.signal_ctxt.lock().expect("signal ctxt lock poisoned") = Some(ctxt);
    }

    // ------------------------------------------------------------------
    // Request handlers
    // ------------------------------------------------------------------

    /// PlaySound / PlayFull
    pub async fn play_sound(
        &self,
        sound_event_id: &str,
        sender: &str,
        extras: &PlayOptions,
    ) -> Result<PlayOutcome, PlayError> {
        let Some(entry) = self.catalog.get(sound_event_id) else {
            info!(
                sound_event_id = %sound_event_id,
                "This sound event id does not exist"
            );
            return Err(PlayError::UnknownSoundEventID(sound_event_id.to_string()));
        };
        let overlap = entry.overlap_behavior().map_err(|err| {
            info!(sound_event_id = %sound_event_id, "{err}");
            match err {
                CatalogError::UnknownOverlapBehavior { value } => {
                    PlayError::UnknownOverlapBehavior(value)
                }
                other => PlayError::Resolve(other),
            }
        })?;

        let mut registry = self.registry.lock().await;

        // Reuse path: at most one existing sound per (event, sender).
        if overlap != OverlapBehavior::Overlap {
            if let Some(uuid) = registry.get_by_event_and_bus(sound_event_id, sender) {
                if overlap == OverlapBehavior::Restart {
                    if let Some(sound) = registry.get_mut(uuid) {
                        sound.reset();
                    }
                }
                self.watch_and_ref(&mut registry, sender, uuid, overlap);
                return Ok(PlayOutcome::Reused(uuid));
            }
        }

        if registry.count_for_event(sound_event_id) >= MAX_SIMULTANEOUS_SOUNDS {
            info!(
                sound_event_id = %sound_event_id,
                "Sound is already playing {MAX_SIMULTANEOUS_SOUNDS} times, ignoring"
            );
            return Ok(PlayOutcome::OverLimit);
        }

        // Hold first, then cancel: the count must never touch zero here.
        self.hold.acquire();
        self.cancel_countdown();

        let created = entry
            .resolve(sound_event_id, extras)
            .map_err(PlayError::Resolve)
            .and_then(|profile| {
                self.create_sound(&mut registry, profile, sound_event_id, sender, overlap)
            });
        let uuid = match created {
            Ok(uuid) => uuid,
            Err(err) => {
                // Unwind the hold taken for the sound that never existed,
                // re-arming the countdown first so the count stays above zero.
                if registry.is_empty() {
                    self.arm_countdown();
                }
                self.hold.release();
                return Err(err);
            }
        };

        self.watch_and_ref(&mut registry, sender, uuid, overlap);
        self.apply_state_on_start(&mut registry, entry.apply_state_on().cloned(), uuid);
        self.apply_focus_to(&mut registry, uuid);

        Ok(PlayOutcome::Created(uuid))
    }

    fn create_sound(
        &self,
        registry: &mut Registry,
        profile: SoundProfile,
        sound_event_id: &str,
        sender: &str,
        overlap: OverlapBehavior,
    ) -> Result<Uuid, PlayError> {
        let uuid = Uuid::new_v4();
        let events = SoundEventSender::new(uuid, self.events_tx.clone());

        // Looping sounds that fade in start silent.
        let initial_volume = if profile.looping && profile.fade_in_ms > 0 {
            0.0
        } else {
            profile.volume
        };
        let spec = PipelineSpec {
            uuid,
            location: profile.location.clone(),
            volume: initial_volume,
            speed: profile.speed(),
            looping: profile.looping,
            delay: Duration::from_millis(profile.delay_ms),
        };
        let pipeline = self.factory.create(&spec, events.clone())?;
        let sound = Sound::new(
            uuid,
            sender.to_string(),
            sound_event_id.to_string(),
            profile,
            pipeline,
            events,
        );

        // Pausing the previous background top precedes the new sound's play.
        if let Some(to_pause) = registry.add_sound(sound, overlap) {
            if let Some(previous) = registry.get_mut(to_pause) {
                previous.pause_with_fade_out();
            }
        }
        Ok(uuid)
    }

    /// Ensure the sender is watched, take a reference, and (re)play
    fn watch_and_ref(
        &self,
        registry: &mut Registry,
        sender: &str,
        uuid: Uuid,
        overlap: OverlapBehavior,
    ) {
        if registry.watch(sender, uuid) {
            debug!(bus_name = %sender, "Watching bus name");
        }
        let count = match registry.ref_sound(uuid) {
            Ok(count) => count,
            Err(err) => {
                warn!(bus_name = %sender, uuid = %uuid, "{err}");
                return;
            }
        };

        // Replays keep the stack ordered by request order.
        let to_pause = registry.refresh_bg_stack(uuid, overlap);
        if let Some(previous) = to_pause {
            if let Some(sound) = registry.get_mut(previous) {
                sound.pause_with_fade_out();
            }
        }

        // Fade in on the first reference, or when an ignored background
        // sound climbs back to the top of the stack.
        let fades_in =
            count == 1 || (overlap == OverlapBehavior::Ignore && to_pause.is_some());
        if let Some(sound) = registry.get_mut(uuid) {
            sound.play(fades_in);
        }
    }

    /// StopSound: drop one reference for this sender
    pub async fn stop_sound(&self, uuid_or_event_id: &str, sender: &str) {
        self.unref_for_sender(uuid_or_event_id, sender, false).await;
    }

    /// TerminateSound: drop every reference for this sender at once
    pub async fn terminate_sound(&self, uuid_or_event_id: &str, sender: &str) {
        self.unref_for_sender(uuid_or_event_id, sender, true).await;
    }

    async fn unref_for_sender(&self, uuid_or_event_id: &str, sender: &str, clear_all: bool) {
        let mut registry = self.registry.lock().await;

        if let Ok(uuid) = Uuid::parse_str(uuid_or_event_id) {
            if registry.contains(uuid) {
                if !registry.owned_by(uuid, sender) {
                    let err = RegistryError::NotRefcountedByBusName {
                        uuid,
                        bus_name: sender.to_string(),
                    };
                    info!(bus_name = %sender, "{err}");
                    return;
                }
                Self::do_unref(&mut registry, uuid, clear_all);
                return;
            }
        }

        if registry.has_event(uuid_or_event_id) {
            for uuid in registry.uuids_for_event_and_bus(uuid_or_event_id, sender) {
                Self::do_unref(&mut registry, uuid, clear_all);
            }
            return;
        }

        info!(
            bus_name = %sender,
            "Sound {uuid_or_event_id} was supposed to be stopped, but did not exist"
        );
    }

    fn do_unref(registry: &mut Registry, uuid: Uuid, clear_all: bool) {
        match registry.unref_sound(uuid, clear_all) {
            Ok(0) => {
                // The last reference is gone; no new ones may be taken.
                if let Some(sound) = registry.get_mut(uuid) {
                    sound.stop();
                }
            }
            Ok(_) => {}
            Err(err) => warn!(uuid = %uuid, "{err}"),
        }
    }

    /// UpdateProperties: forward transitions to one live sound
    pub async fn update_properties(
        &self,
        uuid_str: &str,
        transition_ms: u32,
        options: &UpdateOptions,
    ) {
        let mut registry = self.registry.lock().await;
        let sound = Uuid::parse_str(uuid_str)
            .ok()
            .and_then(|uuid| registry.get_mut(uuid));
        match sound {
            Some(sound) => sound.update_properties(transition_ms, options),
            None => info!(
                "Properties of sound {uuid_str} were supposed to be updated, but it did not exist"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Internal event handlers
    // ------------------------------------------------------------------

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Pipeline { uuid, event } => {
                let mut registry = self.registry.lock().await;
                match registry.get_mut(uuid) {
                    Some(sound) => sound.handle_pipeline_event(event),
                    None => debug!(uuid = %uuid, "Pipeline event for unknown sound"),
                }
            }
            ServerEvent::SoundReleased { uuid } => self.remove_sound(uuid, None).await,
            ServerEvent::SoundError { uuid, error } => {
                self.remove_sound(uuid, Some(error)).await
            }
            ServerEvent::NameVanished { bus_name } => {
                self.handle_name_vanished(&bus_name).await
            }
            ServerEvent::FocusChanged(info) => self.handle_focus_changed(info).await,
        }
    }

    /// Unwind one sound after release or failure
    async fn remove_sound(&self, uuid: Uuid, error: Option<PipelineError>) {
        let removed = {
            let mut registry = self.registry.lock().await;
            let Some((sound, resume)) = registry.remove_sound(uuid) else {
                debug!(uuid = %uuid, "Released sound was not in the registry");
                return;
            };
            debug!(
                bus_name = %sound.bus_name(),
                sound_event_id = %sound.sound_event_id(),
                uuid = %uuid,
                "Freeing structures because the sound reached its end"
            );

            if let Some(resume) = resume {
                if let Some(next) = registry.get_mut(resume) {
                    next.play(true);
                }
            }
            for suppressed in &sound.suppressed_paused {
                if let Some(other) = registry.get_mut(*suppressed) {
                    other.play(true);
                }
            }
            for suppressed in &sound.suppressed_silenced {
                if let Some(other) = registry.get_mut(*suppressed) {
                    other.unmute();
                }
            }

            if registry.is_empty() {
                self.arm_countdown();
            }
            sound
        };

        if let Some(error) = error {
            self.emit_error_signal(&removed, &error).await;
        }
        self.hold.release();
    }

    /// Every sound of a vanished client loses all its references
    async fn handle_name_vanished(&self, bus_name: &str) {
        let mut registry = self.registry.lock().await;
        if !registry.is_watching(bus_name) {
            return;
        }
        info!(bus_name = %bus_name, "Bus name vanished; dropping its sounds");
        for uuid in registry.watched_uuids(bus_name) {
            Self::do_unref(&mut registry, uuid, true);
        }
        registry.drop_watcher(bus_name);
    }

    /// Mute or unmute live sounds against the new foreground identity
    async fn handle_focus_changed(&self, info: Option<FocusInfo>) {
        *self.focus.lock().expect("focus lock poisoned") = info.clone();
        let mut registry = self.registry.lock().await;
        match info {
            Some(info) => {
                for sound in registry.sounds_mut() {
                    if sound.bus_name() == info.target_unique_name {
                        sound.unmute();
                    } else {
                        sound.mute();
                    }
                }
            }
            // No settled focus: nothing to mute against.
            None => {
                for sound in registry.sounds_mut() {
                    sound.unmute();
                }
            }
        }
    }

    fn apply_state_on_start(
        &self,
        registry: &mut Registry,
        apply: Option<ApplyStateOn>,
        initiator: Uuid,
    ) {
        let Some(apply) = apply else {
            return;
        };
        let mut paused = Vec::new();
        let mut silenced = Vec::new();
        for uuid in registry.uuids() {
            if uuid == initiator {
                continue;
            }
            let Some(sound) = registry.get_mut(uuid) else {
                continue;
            };
            if apply.pause.iter().any(|e| e == sound.sound_event_id()) {
                sound.pause_with_fade_out();
                paused.push(uuid);
            } else if apply.silence.iter().any(|e| e == sound.sound_event_id()) {
                sound.silence();
                silenced.push(uuid);
            }
        }
        if let Some(sound) = registry.get_mut(initiator) {
            sound.suppressed_paused = paused;
            sound.suppressed_silenced = silenced;
        }
    }

    /// Mute a freshly created sound when another client holds focus
    fn apply_focus_to(&self, registry: &mut Registry, uuid: Uuid) {
        let focus = self.focus.lock().expect("focus lock poisoned").clone();
        let Some(info) = focus else {
            return;
        };
        if let Some(sound) = registry.get_mut(uuid) {
            if sound.bus_name() != info.target_unique_name {
                sound.mute();
            }
        }
    }

    async fn emit_error_signal(&self, sound: &Sound, error: &PipelineError) {
        let ctxt = self
            .signal_ctxt
            .lock()
            .expect("signal ctxt lock poisoned")
            .clone();
        if let Some(ctxt) = ctxt {
            if let Err(err) = dbus::SoundServer::error(
                &ctxt,
                &sound.uuid().to_string(),
                &error.to_string(),
                error.kind.domain(),
                error.kind.code(),
                &error.detail,
            )
            .await
            {
                warn!("Failed to emit Error signal: {err}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Idle-release countdown
    // ------------------------------------------------------------------

    /// Hold the process and release it after the idle period
    ///
    /// Re-arming first cancels the outstanding countdown, so the hold count
    /// never drifts.
    fn arm_countdown(&self) {
        self.cancel_countdown();
        self.hold.acquire();
        info!(
            "All sounds done; starting timeout of {} seconds",
            self.idle_release.as_secs()
        );
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let hold = self.hold.clone();
        let idle_release = self.idle_release;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(idle_release).await;
            if !flag.swap(true, Ordering::SeqCst) {
                info!("Idle timeout expired; releasing the process hold");
                hold.release();
            }
        });
        self.countdown
            .lock()
            .expect("countdown lock poisoned")
            .current = Some((handle, fired));
    }

    /// Cancel the countdown if armed; idempotent
    fn cancel_countdown(&self) {
        let taken = self
            .countdown
            .lock()
            .expect("countdown lock poisoned")
            .current
            .take();
        if let Some((handle, fired)) = taken {
            if !fired.swap(true, Ordering::SeqCst) {
                handle.abort();
                self.hold.release();
                info!("Timeout cancelled");
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics (also used by the integration tests)
    // ------------------------------------------------------------------

    pub async fn live_sounds(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn refcount(&self, uuid: Uuid) -> Option<u32> {
        self.registry.lock().await.refcount(uuid).ok()
    }

    pub async fn count_for_event(&self, sound_event_id: &str) -> usize {
        self.registry.lock().await.count_for_event(sound_event_id)
    }

    pub async fn sound_state(&self, uuid: Uuid) -> Option<SoundState> {
        self.registry.lock().await.get(uuid).map(|s| s.state())
    }

    pub async fn bg_stack(&self) -> Vec<Uuid> {
        self.registry.lock().await.bg_stack_snapshot()
    }

    pub async fn is_watching(&self, bus_name: &str) -> bool {
        self.registry.lock().await.is_watching(bus_name)
    }
}
