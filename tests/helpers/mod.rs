//! Shared fixtures for the orchestrator integration tests

use hack_sound_server::audio::testing::{MockHandle, MockPipelineFactory};
use hack_sound_server::events::{self, EventSender};
use hack_sound_server::metadata::{Catalog, PlayOptions, RawEntry};
use hack_sound_server::server::{PlayOutcome, Server};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const IDLE_RELEASE: Duration = Duration::from_secs(10);

/// A daemon core wired to a mock audio driver
pub struct Fixture {
    pub server: Arc<Server>,
    pub factory: Arc<MockPipelineFactory>,
    pub events: EventSender,
    event_loop: JoinHandle<()>,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

fn entry(json: &str) -> RawEntry {
    serde_json::from_str(json).expect("test entry must parse")
}

/// Catalog covering every policy the scenarios exercise
pub fn test_catalog() -> Catalog {
    let mut raw = HashMap::new();
    raw.insert(
        "ui/click".to_string(),
        entry(r#"{"sound-file": "click.ogg", "volume": 0.8}"#),
    );
    raw.insert(
        "ui/alarm".to_string(),
        entry(r#"{"sound-file": "alarm.ogg", "overlap-behavior": "restart"}"#),
    );
    raw.insert(
        "ui/ding".to_string(),
        entry(r#"{"sound-file": "ding.ogg", "overlap-behavior": "ignore"}"#),
    );
    raw.insert(
        "fx/spark".to_string(),
        entry(r#"{"sound-file": "spark.ogg"}"#),
    );
    raw.insert(
        "bg/loop-a".to_string(),
        entry(r#"{"sound-file": "loop-a.ogg", "type": "bg", "loop": true}"#),
    );
    raw.insert(
        "bg/loop-b".to_string(),
        entry(r#"{"sound-file": "loop-b.ogg", "type": "bg", "loop": true}"#),
    );
    raw.insert(
        "bg/music".to_string(),
        entry(r#"{"sound-file": "music.ogg", "type": "bg", "loop": true}"#),
    );
    raw.insert(
        "ui/jingle".to_string(),
        entry(r#"{"sound-file": "jingle.ogg", "apply-state-on": {"pause": ["bg/music"]}}"#),
    );
    raw.insert(
        "ui/broken".to_string(),
        entry(r#"{"sound-file": "broken.ogg", "overlap-behavior": "mash"}"#),
    );
    Catalog::from_entries(Path::new("/sounds"), raw)
}

/// Spin up a server with the test catalog and a running event loop
pub fn start_server() -> Fixture {
    let factory = MockPipelineFactory::new();
    let (events_tx, events_rx) = events::channel();
    let server = Server::new(
        test_catalog(),
        Box::new(Arc::clone(&factory)),
        events_tx.clone(),
        IDLE_RELEASE,
    );
    let event_loop = server.start(events_rx);
    Fixture {
        server,
        factory,
        events: events_tx,
        event_loop,
    }
}

/// Let queued internal events drain through the event loop
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Play and expect a live identifier back
pub async fn play(fx: &Fixture, event: &str, sender: &str) -> Uuid {
    match fx
        .server
        .play_sound(event, sender, &PlayOptions::default())
        .await
        .expect("play must succeed")
    {
        PlayOutcome::Created(uuid) | PlayOutcome::Reused(uuid) => uuid,
        PlayOutcome::OverLimit => panic!("unexpected over-limit for {event}"),
    }
}

/// Handle for the mock pipeline behind a live sound
pub fn pipeline(fx: &Fixture, uuid: Uuid) -> Arc<MockHandle> {
    fx.factory
        .pipeline(uuid)
        .expect("pipeline must exist for live sound")
}
