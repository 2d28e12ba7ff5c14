//! Audio pipeline driver contract
//!
//! The orchestration core never talks to an audio device directly; it
//! drives a per-sound [`Pipeline`] through command-level calls and receives
//! driver messages back on the daemon event channel. The production driver
//! lives in [`rodio`]; tests substitute [`testing::MockPipeline`].

pub mod envelope;
pub mod rodio;
pub mod testing;

use crate::error::PipelineError;
use crate::events::SoundEventSender;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Messages a pipeline driver posts back to the daemon
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The decoded stream played to its end (never emitted for loops)
    EndOfStream,

    /// The volume control reached 0, either through a ramp or a direct set
    VolumeReachedZero,

    /// The driver failed; the sound must be unwound
    Error(PipelineError),
}

/// Everything a driver needs to start one sound
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub uuid: Uuid,
    /// Absolute path of the chosen sound file
    pub location: PathBuf,
    /// Initial volume control value (0 for looping sounds that fade in)
    pub volume: f64,
    /// Combined pitch × rate multiplier
    pub speed: f64,
    /// Loop the decoded segment until stopped
    pub looping: bool,
    /// Silence inserted before the first sample
    pub delay: Duration,
}

/// Command surface of one per-sound audio pipeline
///
/// All commands are non-blocking; state changes that take time (ramps,
/// end-of-stream) are reported through [`PipelineEvent`]s on the daemon
/// channel.
pub trait Pipeline: Send + Sync {
    /// Start or resume playback
    fn play(&self);

    /// Pause playback, keeping position and control values
    fn pause(&self);

    /// Whether the pipeline is currently paused
    fn is_paused(&self) -> bool;

    /// Seek back to position 0
    fn seek_start(&self) -> Result<(), PipelineError>;

    /// Set the volume control immediately, cancelling any volume ramp
    fn set_volume(&self, volume: f64);

    /// Current volume control value
    fn volume(&self) -> f64;

    /// Set the speed control immediately, cancelling any speed ramp
    fn set_speed(&self, speed: f64);

    /// Install a linear volume ramp from the current value to `target`
    ///
    /// `start_after` delays the ramp start (used to skip an initial delay
    /// period). A new ramp replaces any outstanding one.
    fn ramp_volume(&self, target: f64, duration: Duration, start_after: Duration);

    /// Install a linear speed ramp from the current value to `target`
    fn ramp_speed(&self, target: f64, duration: Duration);

    /// Drop all outstanding ramps, leaving controls at their current values
    fn clear_ramps(&self);

    /// Current playback position, or `None` while not yet queryable
    fn position(&self) -> Option<Duration>;

    /// Stop playback and detach the driver; terminal and idempotent
    fn shutdown(&self);
}

/// Constructor seam for pipelines
///
/// The orchestrator is handed a factory at startup so tests can substitute
/// a mock driver without touching an audio device.
pub trait PipelineFactory: Send + Sync {
    fn create(
        &self,
        spec: &PipelineSpec,
        events: SoundEventSender,
    ) -> Result<Box<dyn Pipeline>, PipelineError>;
}
