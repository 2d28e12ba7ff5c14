//! Live sound control surface
//!
//! A [`Sound`] wraps one pipeline driver and runs the per-sound state
//! machine. All mutation happens from the orchestrator's context; the
//! driver talks back through the daemon event channel and the orchestrator
//! routes those messages into [`Sound::handle_pipeline_event`].

use crate::audio::{Pipeline, PipelineEvent};
use crate::events::SoundEventSender;
use crate::metadata::{SoundKind, SoundProfile};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle states of a live sound
///
/// Created→Playing on start; Playing↔Paused through background-stack
/// transitions; Playing→Stopping while a release fade-out runs; Stopping or
/// Playing→Released on end-of-stream; any non-terminal state→Failed on a
/// pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundState {
    Created,
    Playing,
    Paused,
    Stopping,
    Released,
    Failed,
}

impl SoundState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SoundState::Released | SoundState::Failed)
    }
}

/// Property targets accepted by UpdateProperties
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateOptions {
    pub volume: Option<f64>,
    pub rate: Option<f64>,
}

/// Why a fade-out could not be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeOutRefused {
    /// The pipeline has no queryable position yet
    NotQueryable,
    /// Still inside the initial delay period
    InDelay,
}

/// The live instance of a sound event for one client
pub struct Sound {
    uuid: Uuid,
    bus_name: String,
    sound_event_id: String,
    profile: SoundProfile,
    pipeline: Box<dyn Pipeline>,
    events: SoundEventSender,
    state: SoundState,
    pending_pause: bool,
    /// Sounds this one paused via apply-state-on, to resume on release
    pub(crate) suppressed_paused: Vec<Uuid>,
    /// Sounds this one silenced via apply-state-on, to restore on release
    pub(crate) suppressed_silenced: Vec<Uuid>,
}

impl std::fmt::Debug for Sound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sound")
            .field("uuid", &self.uuid)
            .field("bus_name", &self.bus_name)
            .field("sound_event_id", &self.sound_event_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Sound {
    pub fn new(
        uuid: Uuid,
        bus_name: String,
        sound_event_id: String,
        profile: SoundProfile,
        pipeline: Box<dyn Pipeline>,
        events: SoundEventSender,
    ) -> Self {
        Self {
            uuid,
            bus_name,
            sound_event_id,
            profile,
            pipeline,
            events,
            state: SoundState::Created,
            pending_pause: false,
            suppressed_paused: Vec::new(),
            suppressed_silenced: Vec::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn sound_event_id(&self) -> &str {
        &self.sound_event_id
    }

    pub fn profile(&self) -> &SoundProfile {
        &self.profile
    }

    pub fn kind(&self) -> SoundKind {
        self.profile.kind
    }

    pub fn state(&self) -> SoundState {
        self.state
    }

    /// Start or resume playback
    ///
    /// `fades_in` applies the fade-in envelope; the orchestrator passes true
    /// only for the first reference and for background-stack resumes.
    pub fn play(&mut self, fades_in: bool) {
        if self.state.is_terminal() {
            self.log_info("Cannot play because being released.");
            return;
        }
        if self.state == SoundState::Stopping {
            self.log_info("Cannot play because stopping with fade out.");
            return;
        }
        self.log_info("Playing.");
        self.pending_pause = false;
        self.pipeline.play();
        self.state = SoundState::Playing;
        if fades_in {
            self.add_fade_in();
        }
    }

    /// Fade the volume to 0 and pause once it gets there
    pub fn pause_with_fade_out(&mut self) {
        self.log_info("Pausing.");
        if self.state.is_terminal() {
            self.log_info("Cannot pause because being released.");
            return;
        }
        if self.state == SoundState::Stopping {
            self.log_info("Cannot pause because being stopped.");
            return;
        }

        if self.profile.fade_out_ms == 0 || self.pipeline.volume() == 0.0 {
            self.pause_now();
            return;
        }

        self.pending_pause = true;
        if let Err(refusal) = self.try_fade_out() {
            self.log_fade_refusal(refusal, "Pausing.");
            self.pause_now();
        }
    }

    /// Stop the sound, fading out looping sounds first
    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if !self.profile.looping {
            self.release();
            return;
        }
        if self.profile.fade_out_ms == 0 || self.pipeline.is_paused() {
            self.release();
            return;
        }

        self.state = SoundState::Stopping;
        if let Err(refusal) = self.try_fade_out() {
            self.log_fade_refusal(refusal, "Stop.");
            self.release();
        }
    }

    /// Seek to 0 and rebuild the fade-in envelope
    ///
    /// Idempotent: repeating it leaves the envelopes identical.
    pub fn reset(&mut self) {
        if self.state.is_terminal() || self.state == SoundState::Stopping {
            return;
        }
        if let Err(err) = self.pipeline.seek_start() {
            self.log_warn(&format!("Could not seek back to start: {err}"));
        }
        self.pipeline.clear_ramps();
        self.add_fade_in();
    }

    /// Install wall-clock transitions toward new volume/rate targets
    pub fn update_properties(&mut self, transition_ms: u32, options: &UpdateOptions) {
        if self.state.is_terminal() {
            return;
        }
        let duration = Duration::from_millis(u64::from(transition_ms));
        if let Some(volume) = options.volume {
            self.pipeline.ramp_volume(volume, duration, Duration::ZERO);
        }
        if let Some(rate) = options.rate {
            // The driver has one speed control; pitch stays baked in.
            self.pipeline.ramp_speed(self.profile.pitch * rate, duration);
        }
    }

    /// Drop the volume of a non-focused sound without a fade
    pub fn mute(&mut self) {
        if self.state != SoundState::Playing {
            return;
        }
        self.pipeline.set_volume(0.0);
    }

    /// Restore the resolved volume of a focused sound
    pub fn unmute(&mut self) {
        if self.state != SoundState::Playing {
            return;
        }
        if self.profile.looping && self.profile.fade_in_ms > 0 {
            self.pipeline.ramp_volume(
                self.profile.volume,
                Duration::from_millis(self.profile.fade_in_ms),
                Duration::ZERO,
            );
        } else {
            self.pipeline.set_volume(self.profile.volume);
        }
    }

    /// Fade the volume to 0 while keeping playback running
    ///
    /// Used by the apply-state-on `silence` bucket.
    pub fn silence(&mut self) {
        if self.state != SoundState::Playing {
            return;
        }
        if self.profile.looping && self.profile.fade_out_ms > 0 {
            self.pipeline.ramp_volume(
                0.0,
                Duration::from_millis(self.profile.fade_out_ms),
                Duration::ZERO,
            );
        } else {
            self.pipeline.set_volume(0.0);
        }
    }

    /// Route a driver message into the state machine
    pub fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::EndOfStream => self.release(),
            PipelineEvent::VolumeReachedZero => {
                if self.pending_pause {
                    self.pending_pause = false;
                    self.pause_now();
                }
                if self.state == SoundState::Stopping {
                    self.release();
                }
            }
            PipelineEvent::Error(error) => {
                if self.state.is_terminal() {
                    return;
                }
                self.log_warn(&format!("Error from pipeline: {error}"));
                self.pipeline.shutdown();
                self.state = SoundState::Failed;
                self.events.error(error);
            }
        }
    }

    /// Tear the pipeline down and announce the terminal state
    pub fn release(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.log_debug("Releasing.");
        self.pipeline.shutdown();
        self.state = SoundState::Released;
        self.events.released();
    }

    fn pause_now(&mut self) {
        if self.state.is_terminal() || self.state == SoundState::Stopping {
            return;
        }
        self.pipeline.pause();
        self.state = SoundState::Paused;
    }

    fn add_fade_in(&mut self) {
        if !self.profile.looping || self.profile.fade_in_ms == 0 {
            return;
        }
        self.log_debug("Fading in.");
        // When starting from position 0 the ramp waits out the delay period.
        let at_start = self.pipeline.position().map_or(true, |p| p.is_zero());
        let start_after = if at_start {
            Duration::from_millis(self.profile.delay_ms)
        } else {
            Duration::ZERO
        };
        self.pipeline.ramp_volume(
            self.profile.volume,
            Duration::from_millis(self.profile.fade_in_ms),
            start_after,
        );
    }

    fn try_fade_out(&mut self) -> Result<(), FadeOutRefused> {
        let position = self.pipeline.position().ok_or(FadeOutRefused::NotQueryable)?;
        let delay = Duration::from_millis(self.profile.delay_ms);
        if !delay.is_zero() && position < delay {
            return Err(FadeOutRefused::InDelay);
        }
        self.log_debug("Fading out.");
        self.pipeline.ramp_volume(
            0.0,
            Duration::from_millis(self.profile.fade_out_ms),
            Duration::ZERO,
        );
        Ok(())
    }

    fn log_fade_refusal(&self, refusal: FadeOutRefused, action: &str) {
        match refusal {
            FadeOutRefused::NotQueryable => self.log_warn(&format!(
                "Fade out effect could not be applied. {action}"
            )),
            FadeOutRefused::InDelay => self.log_warn(&format!(
                "Cannot fade out while in an in-progress delay. {action}"
            )),
        }
    }

    fn log_info(&self, message: &str) {
        info!(
            bus_name = %self.bus_name,
            sound_event_id = %self.sound_event_id,
            uuid = %self.uuid,
            "{message}"
        );
    }

    fn log_debug(&self, message: &str) {
        debug!(
            bus_name = %self.bus_name,
            sound_event_id = %self.sound_event_id,
            uuid = %self.uuid,
            "{message}"
        );
    }

    fn log_warn(&self, message: &str) {
        warn!(
            bus_name = %self.bus_name,
            sound_event_id = %self.sound_event_id,
            uuid = %self.uuid,
            "{message}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{Command, MockPipelineFactory};
    use crate::audio::{PipelineFactory, PipelineSpec};
    use crate::events::{self, EventReceiver, ServerEvent, SoundEventSender};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn profile(looping: bool, fade_ms: u64, delay_ms: u64) -> SoundProfile {
        SoundProfile {
            location: PathBuf::from("/sounds/test.ogg"),
            volume: 0.8,
            pitch: 1.0,
            rate: 1.0,
            fade_in_ms: fade_ms,
            fade_out_ms: fade_ms,
            delay_ms,
            looping,
            kind: SoundKind::Sfx,
        }
    }

    fn sound(
        profile: SoundProfile,
    ) -> (
        Sound,
        Arc<crate::audio::testing::MockHandle>,
        EventReceiver,
    ) {
        let (tx, rx) = events::channel();
        let uuid = Uuid::new_v4();
        let events = SoundEventSender::new(uuid, tx);
        let factory = MockPipelineFactory::new();
        let spec = PipelineSpec {
            uuid,
            location: profile.location.clone(),
            volume: profile.volume,
            speed: profile.speed(),
            looping: profile.looping,
            delay: Duration::from_millis(profile.delay_ms),
        };
        let pipeline = factory.create(&spec, events.clone()).unwrap();
        let handle = factory.pipeline(uuid).unwrap();
        let sound = Sound::new(
            uuid,
            ":1.7".to_string(),
            "ui/test".to_string(),
            profile,
            pipeline,
            events,
        );
        (sound, handle, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn stop_on_non_looping_releases_immediately() {
        let (mut sound, handle, mut rx) = sound(profile(false, 0, 0));
        sound.play(true);
        sound.stop();
        assert_eq!(sound.state(), SoundState::Released);
        assert!(handle.is_shut_down());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::SoundReleased { .. })));
    }

    #[tokio::test]
    async fn stop_on_looping_fades_then_releases() {
        let (mut sound, handle, mut rx) = sound(profile(true, 500, 0));
        sound.play(true);
        sound.stop();
        assert_eq!(sound.state(), SoundState::Stopping);
        assert_eq!(
            handle.count(|c| matches!(c, Command::RampVolume { target, .. } if *target == 0.0)),
            1
        );
        // The mock completes the ramp instantly and posts VolumeReachedZero.
        for event in drain(&mut rx) {
            if let ServerEvent::Pipeline { event, .. } = event {
                sound.handle_pipeline_event(event);
            }
        }
        assert_eq!(sound.state(), SoundState::Released);
        assert!(handle.is_shut_down());
    }

    #[tokio::test]
    async fn stop_before_position_queryable_releases_directly() {
        let (mut sound, handle, _rx) = sound(profile(true, 500, 0));
        sound.play(true);
        // The pipeline has not reached a queryable position yet.
        handle.set_position(None);
        sound.stop();
        assert_eq!(sound.state(), SoundState::Released);
        assert!(handle.is_shut_down());
    }

    #[tokio::test]
    async fn pause_with_zero_volume_pauses_immediately() {
        let (mut sound, handle, _rx) = sound(profile(true, 500, 0));
        sound.play(true);
        sound.mute();
        sound.pause_with_fade_out();
        assert_eq!(sound.state(), SoundState::Paused);
        assert!(handle.is_paused());
    }

    #[tokio::test]
    async fn pause_fades_then_pauses_on_volume_zero() {
        let (mut sound, handle, mut rx) = sound(profile(true, 500, 0));
        sound.play(true);
        sound.pause_with_fade_out();
        assert_eq!(sound.state(), SoundState::Playing);
        for event in drain(&mut rx) {
            if let ServerEvent::Pipeline { event, .. } = event {
                sound.handle_pipeline_event(event);
            }
        }
        assert_eq!(sound.state(), SoundState::Paused);
        assert!(handle.is_paused());
        assert!(!handle.is_shut_down());
    }

    #[tokio::test]
    async fn pause_during_delay_pauses_immediately() {
        let (mut sound, handle, _rx) = sound(profile(true, 500, 2000));
        sound.play(true);
        // Position 0 is still inside the 2 s delay.
        sound.pause_with_fade_out();
        assert_eq!(sound.state(), SoundState::Paused);
        assert!(handle.is_paused());
    }

    #[tokio::test]
    async fn play_refused_while_stopping() {
        let (mut sound, handle, _rx) = sound(profile(true, 500, 0));
        sound.play(true);
        sound.stop();
        assert_eq!(sound.state(), SoundState::Stopping);
        let plays_before = handle.count(|c| matches!(c, Command::Play));
        sound.play(true);
        assert_eq!(handle.count(|c| matches!(c, Command::Play)), plays_before);
    }

    #[tokio::test]
    async fn end_of_stream_releases() {
        let (mut sound, _handle, mut rx) = sound(profile(false, 0, 0));
        sound.play(true);
        sound.handle_pipeline_event(PipelineEvent::EndOfStream);
        assert_eq!(sound.state(), SoundState::Released);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::SoundReleased { .. })));
    }

    #[tokio::test]
    async fn pipeline_error_fails_the_sound() {
        let (mut sound, handle, mut rx) = sound(profile(false, 0, 0));
        sound.play(true);
        sound.handle_pipeline_event(PipelineEvent::Error(crate::error::PipelineError::new(
            crate::error::PipelineErrorKind::OutputFailed,
            "device gone",
        )));
        assert_eq!(sound.state(), SoundState::Failed);
        assert!(handle.is_shut_down());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::SoundError { .. })));
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let (mut sound, handle, _rx) = sound(profile(true, 400, 0));
        sound.play(true);
        sound.reset();
        let after_one: Vec<Command> = handle
            .commands()
            .into_iter()
            .filter(|c| matches!(c, Command::RampVolume { .. }))
            .collect();
        sound.reset();
        let after_two: Vec<Command> = handle
            .commands()
            .into_iter()
            .filter(|c| matches!(c, Command::RampVolume { .. }))
            .collect();
        // The second reset installs the same envelope again.
        assert_eq!(after_two.last(), after_one.last());
        assert_eq!(
            handle.count(|c| matches!(c, Command::SeekStart)),
            2
        );
    }

    #[tokio::test]
    async fn fade_in_waits_out_the_delay() {
        let (mut sound, handle, _rx) = sound(profile(true, 400, 1500));
        sound.play(true);
        let ramps = handle.commands();
        assert!(ramps.iter().any(|c| matches!(
            c,
            Command::RampVolume { start_after, .. } if *start_after == Duration::from_millis(1500)
        )));
    }

    #[tokio::test]
    async fn update_properties_ramps_volume_and_speed() {
        let (mut sound, handle, _rx) = sound(profile(true, 0, 0));
        sound.play(true);
        sound.update_properties(
            250,
            &UpdateOptions {
                volume: Some(0.3),
                rate: Some(2.0),
            },
        );
        assert!(handle.commands().iter().any(|c| matches!(
            c,
            Command::RampVolume { target, duration, .. }
                if *target == 0.3 && *duration == Duration::from_millis(250)
        )));
        assert!(handle.commands().iter().any(|c| matches!(
            c,
            Command::RampSpeed { target, duration }
                if *target == 2.0 && *duration == Duration::from_millis(250)
        )));
    }
}
