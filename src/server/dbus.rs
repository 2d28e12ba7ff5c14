//! Session-bus surface of the daemon
//!
//! One object on one well-known name. Method handlers extract the sender's
//! unique connection name from the message header and forward into the
//! orchestrator; the name watcher turns `NameOwnerChanged` into
//! [`ServerEvent::NameVanished`] events.

use super::{PlayError, Server};
use crate::events::ServerEvent;
use crate::metadata::PlayOptions;
use crate::sound::UpdateOptions;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::message::Header;
use zbus::object_server::SignalContext;
use zbus::zvariant::{OwnedValue, Value};
use zbus::{connection, fdo, interface, Connection};

pub const BUS_NAME: &str = "com.endlessm.HackSoundServer";
pub const OBJECT_PATH: &str = "/com/endlessm/HackSoundServer";

/// Errors surfaced to bus clients, domain-prefixed
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "com.endlessm.HackSoundServer")]
pub enum ServiceError {
    #[zbus(error)]
    ZBus(zbus::Error),
    UnknownSoundEventID(String),
    UnknownOverlapBehavior(String),
    Failed(String),
}

impl From<PlayError> for ServiceError {
    fn from(err: PlayError) -> Self {
        match err {
            PlayError::UnknownSoundEventID(id) => ServiceError::UnknownSoundEventID(format!(
                "sound event with id {id} does not exist"
            )),
            PlayError::UnknownOverlapBehavior(value) => ServiceError::UnknownOverlapBehavior(
                format!("'{value}' is not a valid option for 'overlap-behavior'"),
            ),
            PlayError::Resolve(err) => ServiceError::Failed(err.to_string()),
            PlayError::Pipeline(err) => ServiceError::Failed(err.to_string()),
        }
    }
}

/// The exported interface object
pub struct SoundServer {
    server: Arc<Server>,
}

impl SoundServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

fn sender_of(header: &Header<'_>) -> Result<String, ServiceError> {
    header
        .sender()
        .map(|name| name.to_string())
        .ok_or_else(|| ServiceError::Failed("message carries no sender".to_string()))
}

fn number(value: &Value<'_>) -> Option<f64> {
    match value {
        Value::F64(v) => Some(*v),
        Value::U8(v) => Some(f64::from(*v)),
        Value::I16(v) => Some(f64::from(*v)),
        Value::U16(v) => Some(f64::from(*v)),
        Value::I32(v) => Some(f64::from(*v)),
        Value::U32(v) => Some(f64::from(*v)),
        Value::I64(v) => Some(*v as f64),
        Value::U64(v) => Some(*v as f64),
        _ => None,
    }
}

fn play_options_from(options: &HashMap<String, OwnedValue>) -> PlayOptions {
    PlayOptions {
        volume: options.get("volume").and_then(|v| number(v)),
        pitch: options.get("pitch").and_then(|v| number(v)),
        rate: options.get("rate").and_then(|v| number(v)),
    }
}

fn update_options_from(options: &HashMap<String, OwnedValue>) -> UpdateOptions {
    UpdateOptions {
        volume: options.get("volume").and_then(|v| number(v)),
        rate: options.get("rate").and_then(|v| number(v)),
    }
}

#[interface(name = "com.endlessm.HackSoundServer")]
impl SoundServer {
    /// Play a sound event with its catalog defaults
    async fn play_sound(
        &self,
        sound_event: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<String, ServiceError> {
        let sender = sender_of(&header)?;
        let outcome = self
            .server
            .play_sound(&sound_event, &sender, &PlayOptions::default())
            .await?;
        Ok(outcome.identifier())
    }

    /// Play a sound event with per-request option multipliers
    async fn play_full(
        &self,
        sound_event: String,
        options: HashMap<String, OwnedValue>,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<String, ServiceError> {
        let sender = sender_of(&header)?;
        let extras = play_options_from(&options);
        let outcome = self
            .server
            .play_sound(&sound_event, &sender, &extras)
            .await?;
        Ok(outcome.identifier())
    }

    /// Drop one of the sender's references on a sound or a whole event
    async fn stop_sound(&self, uuid: String, #[zbus(header)] header: Header<'_>) {
        match sender_of(&header) {
            Ok(sender) => self.server.stop_sound(&uuid, &sender).await,
            Err(err) => debug!("StopSound without sender: {err}"),
        }
    }

    /// Drop every reference the sender holds on a sound or a whole event
    async fn terminate_sound(&self, uuid: String, #[zbus(header)] header: Header<'_>) {
        match sender_of(&header) {
            Ok(sender) => self.server.terminate_sound(&uuid, &sender).await,
            Err(err) => debug!("TerminateSound without sender: {err}"),
        }
    }

    /// Transition volume/rate of one live sound
    async fn update_properties(
        &self,
        uuid: String,
        transition_time_ms: i32,
        options: HashMap<String, OwnedValue>,
    ) {
        let options = update_options_from(&options);
        self.server
            .update_properties(&uuid, transition_time_ms.max(0) as u32, &options)
            .await;
    }

    /// Pipeline failure notification for interested clients
    #[zbus(signal)]
    pub async fn error(
        ctxt: &SignalContext<'_>,
        uuid: &str,
        error_message: &str,
        error_domain: &str,
        error_code: i32,
        debug: &str,
    ) -> zbus::Result<()>;
}

/// Claim the well-known name and export the interface
pub async fn serve(server: Arc<Server>) -> zbus::Result<Connection> {
    let iface = SoundServer::new(Arc::clone(&server));
    let connection = connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await?;
    let ctxt = SignalContext::new(&connection, OBJECT_PATH)?.into_owned();
    server.set_signal_context(ctxt);
    Ok(connection)
}

/// Forward disappearances of watched client names into the event loop
pub fn spawn_name_watcher(connection: Connection, server: Arc<Server>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let proxy = match fdo::DBusProxy::new(&connection).await {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!("Cannot build bus proxy for name watching: {err}");
                return;
            }
        };
        let mut stream = match proxy.receive_name_owner_changed().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Cannot subscribe to NameOwnerChanged: {err}");
                return;
            }
        };
        let events = server.events_tx();
        while let Some(signal) = stream.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };
            if args.new_owner().is_none() {
                let name = args.name().to_string();
                if server.is_watching(&name).await
                    && events
                        .send(ServerEvent::NameVanished { bus_name: name })
                        .is_err()
                {
                    break;
                }
            }
        }
    })
}
