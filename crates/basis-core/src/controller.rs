// ── Controller abstraction ──
//
// Host-facing lifecycle for one cloud account: session, client, snapshot
// store, poll loops, panel discovery and the control gateway.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use basis_api::{AuthState, CloudClient, CredentialStore, SessionManager, TokenSet};

use crate::config::ControllerConfig;
use crate::control::{ControlEvent, ControlGateway, StandbyTicket};
use crate::convert::registry_delta;
use crate::error::CoreError;
use crate::model::CircuitKey;
use crate::poller::{self, PollContext, PollLoops};
use crate::store::{Delta, PanelRegistryDelta, Snapshot, SnapshotStore};
use crate::stream::SnapshotStream;

// ── ControllerState ──────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ControllerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for hosts.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Created stopped; call
/// [`start()`](Self::start) to load the panel registry and begin polling.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    session: Arc<SessionManager>,
    client: Arc<CloudClient>,
    store: Arc<SnapshotStore>,
    gateway: ControlGateway,
    state: watch::Sender<ControllerState>,
    running: Mutex<Option<Running>>,
}

/// Tasks and registry owned by one `start()`..`stop()` span.
struct Running {
    cancel: CancellationToken,
    registry: BTreeSet<String>,
    loops: Option<PollLoops>,
    discovery: Option<JoinHandle<()>>,
}

impl Controller {
    /// Build a controller. Does not touch the network.
    ///
    /// Stored tokens are loaded from `credentials`; refreshed tokens are
    /// saved back to it and it is cleared if the grant is revoked.
    pub fn new(
        config: ControllerConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let transport = config.transport();
        let session = Arc::new(SessionManager::new(
            config.oauth_settings(),
            credentials,
            &transport,
            config.refresh_margin,
        )?);
        let client = Arc::new(CloudClient::new(
            config.api_url.as_str(),
            Arc::clone(&session),
            &transport,
        )?);
        let store = Arc::new(SnapshotStore::new());
        let gateway = ControlGateway::new(Arc::clone(&client), Arc::clone(&store));
        let (state, _) = watch::channel(ControllerState::Stopped);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                session,
                client,
                store,
                gateway,
                state,
                running: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &Arc<CloudClient> {
        &self.inner.client
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// List panels, merge the registry and spawn the fast, slow and
    /// discovery tasks. A no-op if already running.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            debug!("controller already running");
            return Ok(());
        }
        self.inner.state.send_replace(ControllerState::Starting);

        let panels = match self.inner.client.list_panels().await {
            Ok(panels) => panels,
            Err(e) => {
                self.inner.state.send_replace(ControllerState::Stopped);
                return Err(e.into());
            }
        };
        let delta = registry_delta(panels);
        let registry = registry_ids(&delta);
        let version = self.inner.store.merge(Delta::Registry(delta));
        info!(panels = registry.len(), version, "panel registry loaded");

        let cancel = CancellationToken::new();
        let loops = PollLoops::spawn(self.poll_context(&registry), &cancel);
        let discovery = (!self.inner.config.discovery_interval.is_zero()).then(|| {
            tokio::spawn(discovery_task(self.clone(), cancel.clone()))
        });

        *running = Some(Running {
            cancel,
            registry,
            loops: Some(loops),
            discovery,
        });
        self.inner.state.send_replace(ControllerState::Running);
        info!("controller started");
        Ok(())
    }

    /// Cancel the loops at their next suspension point and wait for them,
    /// then let in-flight control commands finish and reconcile.
    pub async fn stop(&self) {
        let Some(running) = self.inner.running.lock().await.take() else {
            return;
        };
        self.inner.state.send_replace(ControllerState::Stopping);

        running.cancel.cancel();
        if let Some(loops) = running.loops {
            loops.shutdown().await;
        }
        if let Some(handle) = running.discovery {
            if let Err(e) = handle.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }

        let pending = self.inner.gateway.in_flight();
        if pending > 0 {
            debug!(pending, "waiting for in-flight control commands");
        }
        self.inner.gateway.drain().await;

        self.inner.state.send_replace(ControllerState::Stopped);
        info!("controller stopped");
    }

    /// Install new OAuth2 credentials. If running, the loops are stopped,
    /// the registry is re-listed and the loops restarted.
    pub async fn reconfigure(&self, tokens: TokenSet) -> Result<(), CoreError> {
        self.inner.session.replace(tokens).await?;
        if self.is_running() {
            info!("credentials replaced, restarting");
            self.stop().await;
            self.start().await?;
        }
        Ok(())
    }

    /// Run one telemetry and one statistics cycle right now, outside the
    /// loop schedule. Uses the panels currently in the snapshot.
    pub async fn poll_once(&self) -> Result<u64, CoreError> {
        // Surface auth failures instead of silently skipping the cycle.
        self.inner.session.valid_token().await.map_err(basis_api::Error::from)?;

        let registry: BTreeSet<String> = self
            .inner
            .store
            .read()
            .panel_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        let ctx = self.poll_context(&registry);
        poller::fast_cycle(&ctx, None).await;
        poller::slow_cycle(&ctx).await;
        Ok(self.inner.store.version())
    }

    /// List panels and run one telemetry and one statistics cycle without
    /// spawning any task. For hosts that only need a single reading.
    ///
    /// While running this is the same as [`poll_once`](Self::poll_once);
    /// the registry is owned by discovery then.
    pub async fn refresh(&self) -> Result<u64, CoreError> {
        if self.is_running() {
            return self.poll_once().await;
        }

        let delta = registry_delta(self.inner.client.list_panels().await?);
        let registry = registry_ids(&delta);
        self.inner.store.merge(Delta::Registry(delta));

        let ctx = self.poll_context(&registry);
        poller::fast_cycle(&ctx, None).await;
        poller::slow_cycle(&ctx).await;
        Ok(self.inner.store.version())
    }

    /// One-shot: start, run closure, stop.
    ///
    /// Discovery is disabled; the closure sees the registry loaded by
    /// `start()` and whatever the first loop ticks have merged.
    pub async fn oneshot<F, Fut, T>(
        config: ControllerConfig,
        credentials: Arc<dyn CredentialStore>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.discovery_interval = Duration::ZERO;

        let controller = Controller::new(cfg, credentials)?;
        controller.start().await?;
        let result = f(controller.clone()).await;
        controller.stop().await;
        result
    }

    // ── Control ──────────────────────────────────────────────────

    /// Toggle standby for a circuit. See [`ControlGateway::set_standby`].
    pub fn set_standby(&self, key: CircuitKey, standby: bool) -> Result<StandbyTicket, CoreError> {
        if !self.is_running() {
            return Err(CoreError::NotStarted);
        }
        self.inner.gateway.set_standby(key, standby)
    }

    pub fn control_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.inner.gateway.events()
    }

    // ── State observation ────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.read()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.inner.store.subscribe()
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.borrow() == ControllerState::Running
    }

    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Watch the session's auth state. `ReauthRequired` means the host
    /// must rerun the OAuth2 flow and call [`reconfigure`](Self::reconfigure).
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.session.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────

    fn poll_context(&self, registry: &BTreeSet<String>) -> PollContext {
        let config = &self.inner.config;
        PollContext {
            client: Arc::clone(&self.inner.client),
            store: Arc::clone(&self.inner.store),
            panel_ids: registry.iter().cloned().collect(),
            fast_interval: config.fast_interval,
            slow_interval: config.slow_interval,
            stale_after: config.stale_after(),
        }
    }

    /// Swap in a changed registry: stop loops, merge, restart.
    async fn apply_registry(&self, delta: PanelRegistryDelta) {
        let mut guard = self.inner.running.lock().await;
        let Some(running) = guard.as_mut() else {
            return;
        };
        if running.cancel.is_cancelled() {
            return;
        }

        let registry = registry_ids(&delta);
        if registry == running.registry {
            return;
        }

        let added = registry.difference(&running.registry).count();
        let removed = running.registry.difference(&registry).count();

        if let Some(loops) = running.loops.take() {
            loops.shutdown().await;
        }
        let version = self.inner.store.merge(Delta::Registry(delta));
        info!(added, removed, version, "panel registry changed");

        running.loops = Some(PollLoops::spawn(
            self.poll_context(&registry),
            &running.cancel,
        ));
        running.registry = registry;
    }

    async fn current_registry(&self) -> Option<BTreeSet<String>> {
        self.inner
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| r.registry.clone())
    }
}

fn registry_ids(delta: &PanelRegistryDelta) -> BTreeSet<String> {
    delta.panels.iter().map(|p| p.id.to_string()).collect()
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically re-list panels and restart the loops when the set of
/// panel ids changes.
async fn discovery_task(controller: Controller, cancel: CancellationToken) {
    let period = controller.inner.config.discovery_interval;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // start() just listed

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let listed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = controller.inner.client.list_panels() => r,
        };

        let delta = match listed {
            Ok(panels) => registry_delta(panels),
            Err(e) => {
                debug!(error = %e, "panel discovery skipped");
                continue;
            }
        };

        let Some(current) = controller.current_registry().await else {
            break;
        };
        if registry_ids(&delta) == current {
            debug!(panels = current.len(), "panel registry unchanged");
            continue;
        }

        controller.apply_registry(delta).await;
    }
    debug!("discovery task stopped");
}
