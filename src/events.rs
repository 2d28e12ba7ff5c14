//! Internal daemon events
//!
//! Every asynchronous source in the process (pipeline drivers, the
//! name-owner watch, the focus tracker) is normalized onto one unbounded
//! channel whose sole consumer is the orchestrator's event loop. Sounds and
//! drivers never mutate shared state directly; they post events here.

use crate::audio::PipelineEvent;
use crate::error::PipelineError;
use crate::focus::FocusInfo;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events consumed by the orchestrator's event loop
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Raw pipeline message for a live sound, routed to its state machine
    Pipeline { uuid: Uuid, event: PipelineEvent },

    /// A sound finished tearing down (end-of-stream or stop completion)
    SoundReleased { uuid: Uuid },

    /// A sound failed; the registry entry must be unwound
    SoundError { uuid: Uuid, error: PipelineError },

    /// A watched client connection left the bus
    NameVanished { bus_name: String },

    /// The focus tracker settled on a new foreground identity (or lost it)
    FocusChanged(Option<FocusInfo>),
}

/// Sending half of the daemon event channel
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Receiving half of the daemon event channel
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Create the daemon event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Per-sound handle for posting events tagged with the sound's uuid
///
/// One clone goes to the pipeline driver, one stays with the Sound control
/// surface. Send failures are ignored: they only occur during teardown when
/// the event loop is already gone.
#[derive(Debug, Clone)]
pub struct SoundEventSender {
    uuid: Uuid,
    tx: EventSender,
}

impl SoundEventSender {
    pub fn new(uuid: Uuid, tx: EventSender) -> Self {
        Self { uuid, tx }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Post a raw pipeline message
    pub fn pipeline(&self, event: PipelineEvent) {
        let _ = self.tx.send(ServerEvent::Pipeline {
            uuid: self.uuid,
            event,
        });
    }

    /// Post sound teardown completion
    pub fn released(&self) {
        let _ = self.tx.send(ServerEvent::SoundReleased { uuid: self.uuid });
    }

    /// Post a sound failure
    pub fn error(&self, error: PipelineError) {
        let _ = self.tx.send(ServerEvent::SoundError {
            uuid: self.uuid,
            error,
        });
    }
}
