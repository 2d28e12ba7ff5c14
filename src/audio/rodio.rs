//! rodio-backed pipeline driver
//!
//! One sink per live sound, all connected to a shared output mixer. A small
//! control task per pipeline samples the active ramps on a 10 ms tick,
//! pushes the values into the sink, and reports end-of-stream and
//! volume-reached-zero back onto the daemon event channel.

use super::envelope::Ramp;
use super::{Pipeline, PipelineEvent, PipelineFactory, PipelineSpec};
use crate::error::{PipelineError, PipelineErrorKind};
use crate::events::SoundEventSender;
use rodio::mixer::Mixer;
use rodio::source::Source;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RAMP_TICK: Duration = Duration::from_millis(10);

/// Handle on the host audio device
///
/// Owns the output stream for the lifetime of the daemon; pipelines connect
/// their sinks to a clone of its mixer.
pub struct AudioOutput {
    _stream: OutputStream,
    mixer: Mixer,
}

impl AudioOutput {
    /// Open the default output device
    pub fn open() -> Result<Self, PipelineError> {
        let stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
            PipelineError::new(PipelineErrorKind::OutputFailed, e.to_string())
        })?;
        let mixer = stream.mixer().clone();
        Ok(Self {
            _stream: stream,
            mixer,
        })
    }

    pub fn mixer(&self) -> Mixer {
        self.mixer.clone()
    }
}

/// Factory producing [`RodioPipeline`]s on a shared mixer
pub struct RodioPipelineFactory {
    mixer: Mixer,
}

impl RodioPipelineFactory {
    pub fn new(mixer: Mixer) -> Self {
        Self { mixer }
    }
}

impl PipelineFactory for RodioPipelineFactory {
    fn create(
        &self,
        spec: &PipelineSpec,
        events: SoundEventSender,
    ) -> Result<Box<dyn Pipeline>, PipelineError> {
        Ok(Box::new(RodioPipeline::new(&self.mixer, spec, events)?))
    }
}

#[derive(Default)]
struct Ramps {
    volume: Option<ActiveRamp>,
    speed: Option<ActiveRamp>,
}

struct ActiveRamp {
    ramp: Ramp,
    installed: Instant,
}

impl ActiveRamp {
    fn new(ramp: Ramp) -> Self {
        Self {
            ramp,
            installed: Instant::now(),
        }
    }

    fn value(&self) -> f64 {
        self.ramp.value_at(self.installed.elapsed())
    }

    fn finished(&self) -> bool {
        self.ramp.finished(self.installed.elapsed())
    }
}

struct Shared {
    sink: Sink,
    events: SoundEventSender,
    ramps: Mutex<Ramps>,
    started: AtomicBool,
    shut_down: AtomicBool,
    looping: bool,
}

/// Per-sound driver built on a rodio sink
pub struct RodioPipeline {
    shared: Arc<Shared>,
}

impl RodioPipeline {
    pub fn new(
        mixer: &Mixer,
        spec: &PipelineSpec,
        events: SoundEventSender,
    ) -> Result<Self, PipelineError> {
        let file = File::open(&spec.location).map_err(|e| {
            PipelineError::new(
                PipelineErrorKind::OpenFailed,
                format!("{}: {e}", spec.location.display()),
            )
        })?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| {
            PipelineError::new(
                PipelineErrorKind::DecodeFailed,
                format!("{}: {e}", spec.location.display()),
            )
        })?;

        let sink = Sink::connect_new(mixer);
        // Queued but silent until the first play() command.
        sink.pause();
        sink.set_volume(spec.volume as f32);
        sink.set_speed(spec.speed as f32);
        if spec.looping {
            // Delay first, then loop the decoded segment forever.
            sink.append(decoder.repeat_infinite().delay(spec.delay));
        } else {
            sink.append(decoder.delay(spec.delay));
        }

        let shared = Arc::new(Shared {
            sink,
            events,
            ramps: Mutex::new(Ramps::default()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            looping: spec.looping,
        });

        tokio::spawn(control_loop(Arc::clone(&shared)));
        debug!(uuid = %spec.uuid, location = %spec.location.display(), "Pipeline built");

        Ok(Self { shared })
    }
}

/// Samples ramps and watches for end-of-stream until shutdown
async fn control_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(RAMP_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if shared.shut_down.load(Ordering::SeqCst) {
            break;
        }

        let mut volume_done = None;
        {
            let mut ramps = shared.ramps.lock().expect("ramp lock poisoned");
            if let Some(active) = ramps.volume.as_ref() {
                shared.sink.set_volume(active.value() as f32);
                if active.finished() {
                    volume_done = Some(active.ramp.to);
                    ramps.volume = None;
                }
            }
            if let Some(active) = ramps.speed.as_ref() {
                shared.sink.set_speed(active.value() as f32);
                if active.finished() {
                    ramps.speed = None;
                }
            }
        }
        if let Some(target) = volume_done {
            if target == 0.0 {
                shared.events.pipeline(PipelineEvent::VolumeReachedZero);
            }
        }

        // A drained sink means the (non-looping) stream reached its end.
        if !shared.looping
            && shared.started.load(Ordering::SeqCst)
            && shared.sink.empty()
        {
            shared.events.pipeline(PipelineEvent::EndOfStream);
            break;
        }
    }
}

impl Pipeline for RodioPipeline {
    fn play(&self) {
        self.shared.started.store(true, Ordering::SeqCst);
        self.shared.sink.play();
    }

    fn pause(&self) {
        self.shared.sink.pause();
    }

    fn is_paused(&self) -> bool {
        self.shared.sink.is_paused()
    }

    fn seek_start(&self) -> Result<(), PipelineError> {
        self.shared
            .sink
            .try_seek(Duration::ZERO)
            .map_err(|e| PipelineError::new(PipelineErrorKind::SeekFailed, e.to_string()))
    }

    fn set_volume(&self, volume: f64) {
        {
            let mut ramps = self.shared.ramps.lock().expect("ramp lock poisoned");
            ramps.volume = None;
        }
        self.shared.sink.set_volume(volume as f32);
        if volume == 0.0 {
            self.shared.events.pipeline(PipelineEvent::VolumeReachedZero);
        }
    }

    fn volume(&self) -> f64 {
        self.shared.sink.volume() as f64
    }

    fn set_speed(&self, speed: f64) {
        {
            let mut ramps = self.shared.ramps.lock().expect("ramp lock poisoned");
            ramps.speed = None;
        }
        self.shared.sink.set_speed(speed as f32);
    }

    fn ramp_volume(&self, target: f64, duration: Duration, start_after: Duration) {
        let from = self.volume();
        let ramp = Ramp::new(from, target, duration).with_start_after(start_after);
        let mut ramps = self.shared.ramps.lock().expect("ramp lock poisoned");
        ramps.volume = Some(ActiveRamp::new(ramp));
    }

    fn ramp_speed(&self, target: f64, duration: Duration) {
        let from = self.shared.sink.speed() as f64;
        let ramp = Ramp::new(from, target, duration);
        let mut ramps = self.shared.ramps.lock().expect("ramp lock poisoned");
        ramps.speed = Some(ActiveRamp::new(ramp));
    }

    fn clear_ramps(&self) {
        let mut ramps = self.shared.ramps.lock().expect("ramp lock poisoned");
        ramps.volume = None;
        ramps.speed = None;
    }

    fn position(&self) -> Option<Duration> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.shared.sink.get_pos())
    }

    fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.sink.stop();
    }
}

impl Drop for RodioPipeline {
    fn drop(&mut self) {
        if !self.shared.shut_down.load(Ordering::SeqCst) {
            warn!("Pipeline dropped without shutdown; stopping sink");
            self.shutdown();
        }
    }
}
