//! Foreground-application tracking
//!
//! Derives a stable focused-client identity from shell signals. Each focus
//! change opens exactly one pending inquiry that resolves the target
//! well-known name to its unique-name owner; a newer change cancels the
//! outstanding inquiry, and an inquiry that cannot settle inside its budget
//! is canceled. Settled values are deduplicated before they reach the
//! orchestrator.

pub mod shell;

use crate::events::{EventSender, ServerEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default budget for one ownership inquiry
///
/// Matches the original service. Looks short; it is configurable for
/// deployments where name-owner lookups take longer.
pub const DEFAULT_INQUIRY_TIMEOUT: Duration = Duration::from_millis(30);

/// A settled foreground identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusInfo {
    /// Focused app id with the `.desktop` suffix stripped
    pub focused_app_id: String,
    /// Well-known name the focus maps to (app or its toolbox window)
    pub target_well_known_name: String,
    /// Unique connection name owning the target
    pub target_unique_name: String,
}

/// State of a hackable application window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HackableAppState {
    App,
    Toolbox,
}

/// One entry of the hackable-apps catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HackableApp {
    pub app_id: String,
    pub state: HackableAppState,
}

/// Snapshot of the hackable-apps manager state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HackableAppsSnapshot {
    pub whitelist: Vec<String>,
    pub apps: Vec<HackableApp>,
}

/// Inputs consumed by the tracker
#[derive(Debug, Clone)]
pub enum ShellSignal {
    /// `FocusedApp` changed; `None` means no focused application
    FocusedAppChanged(Option<String>),
    /// The shell overview was opened or closed
    OverviewActiveChanged(bool),
    /// The hackable-apps catalog or one of its states changed
    HackableAppsChanged(HackableAppsSnapshot),
}

/// Async lookup of the unique-name owner of a well-known name
pub trait NameOwnerResolver: Send + Sync + 'static {
    fn name_owner(&self, well_known_name: String)
        -> impl Future<Output = Option<String>> + Send;
}

/// Well-known name of the toolbox window for a hackable app
fn toolbox_window_name(app_id: &str) -> String {
    let app_name = app_id.strip_prefix("com.endlessm.").unwrap_or(app_id);
    format!("com.endlessm.HackToolbox.{app_name}")
}

/// Focus-change state machine, run as one task
pub struct FocusTracker<R> {
    resolver: Arc<R>,
    signals: mpsc::UnboundedReceiver<ShellSignal>,
    out: EventSender,
    inquiry_timeout: Duration,

    focused_app: Option<String>,
    overview_active: bool,
    snapshot: HackableAppsSnapshot,
    settled: Option<FocusInfo>,
    /// Last value handed to the orchestrator, for dedup
    published: Option<FocusInfo>,

    generation: u64,
    pending: Option<JoinHandle<()>>,
    results_tx: mpsc::UnboundedSender<(u64, Option<FocusInfo>)>,
    results_rx: mpsc::UnboundedReceiver<(u64, Option<FocusInfo>)>,
}

impl<R: NameOwnerResolver> FocusTracker<R> {
    pub fn new(
        resolver: Arc<R>,
        signals: mpsc::UnboundedReceiver<ShellSignal>,
        out: EventSender,
        inquiry_timeout: Duration,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            resolver,
            signals,
            out,
            inquiry_timeout,
            focused_app: None,
            overview_active: false,
            snapshot: HackableAppsSnapshot::default(),
            settled: None,
            published: None,
            generation: 0,
            pending: None,
            results_tx,
            results_rx,
        }
    }

    /// Consume signals until the sending side closes
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                signal = self.signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => break,
                },
                Some((generation, info)) = self.results_rx.recv() => {
                    if generation == self.generation {
                        self.settled = info;
                        self.publish();
                    }
                }
            }
        }
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    fn handle_signal(&mut self, signal: ShellSignal) {
        match signal {
            ShellSignal::FocusedAppChanged(app) => {
                self.focused_app = app;
                self.start_inquiry();
            }
            ShellSignal::OverviewActiveChanged(active) => {
                self.overview_active = active;
                self.publish();
            }
            ShellSignal::HackableAppsChanged(snapshot) => {
                self.snapshot = snapshot;
                self.start_inquiry();
            }
        }
    }

    /// Open a fresh inquiry for the current focused app, canceling any
    /// outstanding one
    fn start_inquiry(&mut self) {
        self.generation += 1;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        let Some(focused) = self.focused_app.clone() else {
            self.settled = None;
            self.publish();
            return;
        };
        let focused_app_id = focused
            .strip_suffix(".desktop")
            .unwrap_or(&focused)
            .to_string();
        if focused_app_id.starts_with(':') {
            debug!(focused_app = %focused, "Ignoring unique-name-like focused app");
            self.settled = None;
            self.publish();
            return;
        }

        let target = self.target_for(&focused_app_id);
        let generation = self.generation;
        let budget = self.inquiry_timeout;
        let resolver = Arc::clone(&self.resolver);
        let results = self.results_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            let outcome = match target {
                Some(name) => {
                    match tokio::time::timeout(budget, resolver.name_owner(name.clone())).await
                    {
                        Ok(Some(owner)) => Some(FocusInfo {
                            focused_app_id,
                            target_well_known_name: name,
                            target_unique_name: owner,
                        }),
                        Ok(None) => None,
                        Err(_) => {
                            debug!(target = %name, "Focus inquiry timed out");
                            None
                        }
                    }
                }
                // Whitelisted app with no hackable record yet: stay pending
                // until the catalog changes or the budget runs out.
                None => {
                    tokio::time::sleep(budget).await;
                    None
                }
            };
            let _ = results.send((generation, outcome));
        }));
    }

    /// Target well-known name for a focused app id, or `None` to wait
    fn target_for(&self, focused_app_id: &str) -> Option<String> {
        if let Some(app) = self
            .snapshot
            .apps
            .iter()
            .find(|a| a.app_id == focused_app_id)
        {
            return Some(match app.state {
                HackableAppState::Toolbox => toolbox_window_name(&app.app_id),
                HackableAppState::App => app.app_id.clone(),
            });
        }
        if !self.snapshot.whitelist.iter().any(|w| w == focused_app_id) {
            return Some(focused_app_id.to_string());
        }
        None
    }

    /// Push the masked value to the orchestrator unless it is unchanged
    fn publish(&mut self) {
        let value = if self.overview_active {
            None
        } else {
            self.settled.clone()
        };
        if self.published != value {
            self.published = value.clone();
            let _ = self.out.send(ServerEvent::FocusChanged(value));
        }
    }
}
