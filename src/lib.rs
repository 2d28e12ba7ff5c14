//! # hack-sound-server
//!
//! Session-scoped audio event daemon.
//!
//! **Purpose:** Clients on the session bus play, modulate, and stop named
//! sound events from a JSON catalog. The daemon mixes them on the host
//! audio output, enforces per-event overlap policies, stacks background
//! sounds, mutes non-focused applications, and tears everything down when
//! a client leaves the bus.
//!
//! **Architecture:** One orchestrator task consumes a single event channel
//! fed by pipeline drivers, the bus name watcher, and the focus tracker.
//! The registry owns every live sound; everything else addresses sounds by
//! UUID.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod focus;
pub mod metadata;
pub mod registry;
pub mod server;
pub mod sound;

pub use error::{Error, Result};
pub use server::Server;
