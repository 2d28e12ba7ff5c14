//! Test support: a scriptable in-memory pipeline driver
//!
//! The mock records every command, completes ramps instantly, and lets
//! tests inject end-of-stream and error messages as if they came from a
//! real driver. Used by the unit tests in this crate and by the
//! integration suites under `tests/`.

use super::{Pipeline, PipelineEvent, PipelineFactory, PipelineSpec};
use crate::error::{PipelineError, PipelineErrorKind};
use crate::events::SoundEventSender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// A command observed by the mock driver
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    SeekStart,
    SetVolume(f64),
    SetSpeed(f64),
    RampVolume {
        target: f64,
        duration: Duration,
        start_after: Duration,
    },
    RampSpeed {
        target: f64,
        duration: Duration,
    },
    ClearRamps,
    Shutdown,
}

/// Shared state of one mock pipeline, also the test-side handle
pub struct MockHandle {
    pub spec: PipelineSpec,
    events: SoundEventSender,
    commands: Mutex<Vec<Command>>,
    volume: Mutex<f64>,
    speed: Mutex<f64>,
    paused: AtomicBool,
    started: AtomicBool,
    shut_down: AtomicBool,
    position: Mutex<Option<Duration>>,
}

impl MockHandle {
    fn new(spec: PipelineSpec, events: SoundEventSender) -> Self {
        let volume = spec.volume;
        let speed = spec.speed;
        Self {
            spec,
            events,
            commands: Mutex::new(Vec::new()),
            volume: Mutex::new(volume),
            speed: Mutex::new(speed),
            paused: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            position: Mutex::new(None),
        }
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }

    /// Every command seen so far, in order
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of commands matching a predicate
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn current_volume(&self) -> f64 {
        *self.volume.lock().unwrap()
    }

    pub fn current_speed(&self) -> f64 {
        *self.speed.lock().unwrap()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Override the reported playback position
    pub fn set_position(&self, position: Option<Duration>) {
        *self.position.lock().unwrap() = position;
    }

    /// Inject an end-of-stream message
    pub fn emit_end_of_stream(&self) {
        self.events.pipeline(PipelineEvent::EndOfStream);
    }

    /// Inject a driver failure
    pub fn emit_error(&self, detail: &str) {
        self.events.pipeline(PipelineEvent::Error(PipelineError::new(
            PipelineErrorKind::OutputFailed,
            detail,
        )));
    }
}

struct MockPipeline {
    state: Arc<MockHandle>,
}

impl Pipeline for MockPipeline {
    fn play(&self) {
        self.state.record(Command::Play);
        self.state.paused.store(false, Ordering::SeqCst);
        if !self.state.started.swap(true, Ordering::SeqCst) {
            // First start: position becomes queryable at 0.
            let mut pos = self.state.position.lock().unwrap();
            if pos.is_none() {
                *pos = Some(Duration::ZERO);
            }
        }
    }

    fn pause(&self) {
        self.state.record(Command::Pause);
        self.state.paused.store(true, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    fn seek_start(&self) -> Result<(), PipelineError> {
        self.state.record(Command::SeekStart);
        *self.state.position.lock().unwrap() = Some(Duration::ZERO);
        Ok(())
    }

    fn set_volume(&self, volume: f64) {
        self.state.record(Command::SetVolume(volume));
        *self.state.volume.lock().unwrap() = volume;
        if volume == 0.0 {
            self.state.events.pipeline(PipelineEvent::VolumeReachedZero);
        }
    }

    fn volume(&self) -> f64 {
        self.state.current_volume()
    }

    fn set_speed(&self, speed: f64) {
        self.state.record(Command::SetSpeed(speed));
        *self.state.speed.lock().unwrap() = speed;
    }

    fn ramp_volume(&self, target: f64, duration: Duration, start_after: Duration) {
        self.state.record(Command::RampVolume {
            target,
            duration,
            start_after,
        });
        // Ramps complete instantly in the mock.
        *self.state.volume.lock().unwrap() = target;
        if target == 0.0 {
            self.state.events.pipeline(PipelineEvent::VolumeReachedZero);
        }
    }

    fn ramp_speed(&self, target: f64, duration: Duration) {
        self.state.record(Command::RampSpeed { target, duration });
        *self.state.speed.lock().unwrap() = target;
    }

    fn clear_ramps(&self) {
        self.state.record(Command::ClearRamps);
    }

    fn position(&self) -> Option<Duration> {
        *self.state.position.lock().unwrap()
    }

    fn shutdown(&self) {
        self.state.record(Command::Shutdown);
        self.state.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Factory producing mock pipelines and retaining handles for assertions
#[derive(Default)]
pub struct MockPipelineFactory {
    pipelines: Mutex<HashMap<Uuid, Arc<MockHandle>>>,
    fail_next: AtomicBool,
}

impl MockPipelineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle for the pipeline created for `uuid`, if any
    pub fn pipeline(&self, uuid: Uuid) -> Option<Arc<MockHandle>> {
        self.pipelines.lock().unwrap().get(&uuid).cloned()
    }

    /// Number of pipelines created so far
    pub fn created(&self) -> usize {
        self.pipelines.lock().unwrap().len()
    }

    /// Make the next create call fail
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl PipelineFactory for Arc<MockPipelineFactory> {
    fn create(
        &self,
        spec: &PipelineSpec,
        events: SoundEventSender,
    ) -> Result<Box<dyn Pipeline>, PipelineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::new(
                PipelineErrorKind::OpenFailed,
                "mock create failure",
            ));
        }
        let state = Arc::new(MockHandle::new(spec.clone(), events));
        self.pipelines
            .lock()
            .unwrap()
            .insert(spec.uuid, Arc::clone(&state));
        Ok(Box::new(MockPipeline { state }))
    }
}
