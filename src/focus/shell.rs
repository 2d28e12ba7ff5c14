//! Shell-side signal sources for the focus tracker
//!
//! Bridges the desktop shell's `FocusedApp`/`OverviewActive` properties and
//! the hackable-apps manager onto [`ShellSignal`]s, and resolves well-known
//! names through `org.freedesktop.DBus.GetNameOwner`.

use super::{HackableAppState, HackableAppsSnapshot, NameOwnerResolver, ShellSignal};
use futures::stream::{SelectAll, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::names::BusName;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

#[zbus::proxy(
    interface = "org.gnome.Shell",
    default_service = "org.gnome.Shell",
    default_path = "/org/gnome/Shell"
)]
trait Shell {
    #[zbus(property)]
    fn focused_app(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn overview_active(&self) -> zbus::Result<bool>;
}

#[zbus::proxy(
    interface = "com.endlessm.HackableAppsManager",
    default_service = "com.endlessm.HackableAppsManager",
    default_path = "/com/endlessm/HackableAppsManager"
)]
trait HackableAppsManager {
    #[zbus(property)]
    fn currently_hackable_apps(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[zbus(property)]
    fn whitelisted_app_ids(&self) -> zbus::Result<Vec<String>>;
}

#[zbus::proxy(
    interface = "com.endlessm.HackableApp",
    default_service = "org.gnome.Shell"
)]
trait HackableApp {
    #[zbus(property)]
    fn app_id(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;
}

fn normalize_focused_app(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn app_state(raw: u32) -> HackableAppState {
    match raw {
        1 => HackableAppState::Toolbox,
        _ => HackableAppState::App,
    }
}

/// Load the hackable catalog and the per-app state streams
async fn load_snapshot(
    connection: &Connection,
    manager: &HackableAppsManagerProxy<'_>,
) -> (
    HackableAppsSnapshot,
    SelectAll<zbus::proxy::PropertyStream<'static, u32>>,
) {
    let whitelist = manager.whitelisted_app_ids().await.unwrap_or_default();
    let paths = manager.currently_hackable_apps().await.unwrap_or_default();

    let mut apps = Vec::new();
    let mut state_streams = SelectAll::new();
    for path in paths {
        let builder = match HackableAppProxy::builder(connection).path(path.clone()) {
            Ok(builder) => builder,
            Err(err) => {
                warn!("Bad hackable-app object path {path}: {err}");
                continue;
            }
        };
        let proxy = match builder.build().await {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!("Failed to build hackable-app proxy at {path}: {err}");
                continue;
            }
        };
        match (proxy.app_id().await, proxy.state().await) {
            (Ok(app_id), Ok(state)) => {
                apps.push(super::HackableApp {
                    app_id,
                    state: app_state(state),
                });
                state_streams.push(proxy.receive_state_changed().await);
            }
            (app_id, state) => {
                debug!("Skipping hackable app at {path}: {app_id:?} / {state:?}");
            }
        }
    }
    (HackableAppsSnapshot { whitelist, apps }, state_streams)
}

/// Pump shell signals into the focus tracker until the receiver closes
pub async fn run_shell_watcher(
    connection: Connection,
    signals: mpsc::UnboundedSender<ShellSignal>,
) -> zbus::Result<()> {
    let shell = ShellProxy::new(&connection).await?;
    let manager = HackableAppsManagerProxy::new(&connection).await?;

    // Prime the tracker with current values.
    if let Ok(value) = shell.focused_app().await {
        let _ = signals.send(ShellSignal::FocusedAppChanged(normalize_focused_app(value)));
    }
    if let Ok(active) = shell.overview_active().await {
        let _ = signals.send(ShellSignal::OverviewActiveChanged(active));
    }
    let (snapshot, mut state_streams) = load_snapshot(&connection, &manager).await;
    let _ = signals.send(ShellSignal::HackableAppsChanged(snapshot));

    let mut focused_stream = shell.receive_focused_app_changed().await;
    let mut overview_stream = shell.receive_overview_active_changed().await;
    let mut apps_stream = manager.receive_currently_hackable_apps_changed().await;

    loop {
        tokio::select! {
            Some(change) = focused_stream.next() => {
                if let Ok(value) = change.get().await {
                    if signals
                        .send(ShellSignal::FocusedAppChanged(normalize_focused_app(value)))
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Some(change) = overview_stream.next() => {
                if let Ok(active) = change.get().await {
                    if signals
                        .send(ShellSignal::OverviewActiveChanged(active))
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Some(_) = apps_stream.next() => {
                let (snapshot, streams) = load_snapshot(&connection, &manager).await;
                state_streams = streams;
                if signals
                    .send(ShellSignal::HackableAppsChanged(snapshot))
                    .is_err()
                {
                    break;
                }
            }
            Some(_) = state_streams.next(), if !state_streams.is_empty() => {
                let (snapshot, streams) = load_snapshot(&connection, &manager).await;
                state_streams = streams;
                if signals
                    .send(ShellSignal::HackableAppsChanged(snapshot))
                    .is_err()
                {
                    break;
                }
            }
            else => break,
        }
    }
    Ok(())
}

/// Name-owner lookups through the bus daemon
pub struct BusNameResolver {
    proxy: zbus::fdo::DBusProxy<'static>,
}

impl BusNameResolver {
    pub async fn new(connection: &Connection) -> zbus::Result<Self> {
        Ok(Self {
            proxy: zbus::fdo::DBusProxy::new(connection).await?,
        })
    }
}

impl NameOwnerResolver for BusNameResolver {
    fn name_owner(
        &self,
        well_known_name: String,
    ) -> impl Future<Output = Option<String>> + Send {
        let proxy = self.proxy.clone();
        async move {
            let name = BusName::try_from(well_known_name).ok()?;
            proxy.get_name_owner(name).await.ok().map(|o| o.to_string())
        }
    }
}
