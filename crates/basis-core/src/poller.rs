// ── Poll coordinator ──
//
// Two independently scheduled loops over a fixed panel registry: fast
// telemetry and slow energy statistics. Failures are absorbed here;
// callers only ever observe their effect on the snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use basis_api::{AuthError, CloudClient, Period};

use crate::convert::{stats_delta, telemetry_deltas};
use crate::model::PanelId;
use crate::store::{Delta, SnapshotStore};

/// Everything a poll loop needs. Rebuilt whenever the registry changes.
pub(crate) struct PollContext {
    pub(crate) client: Arc<CloudClient>,
    pub(crate) store: Arc<SnapshotStore>,
    pub(crate) panel_ids: Vec<String>,
    pub(crate) fast_interval: Duration,
    pub(crate) slow_interval: Duration,
    pub(crate) stale_after: Duration,
}

// ── Failure policy ───────────────────────────────────────────────────

/// What a loop does after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Directive {
    Continue,
    /// Skip ticks until the rate-limit window has passed.
    Backoff(Duration),
    /// A bearer token was rejected; check whether it can be refreshed.
    Unauthorized,
    /// The refresh token is dead; pause until new credentials arrive.
    AwaitReauth,
}

impl Directive {
    fn from_error(err: &basis_api::Error) -> Self {
        if err.is_reauth_required() {
            Self::AwaitReauth
        } else if err.is_unauthorized() {
            Self::Unauthorized
        } else if let Some(delay) = err.retry_after() {
            Self::Backoff(delay)
        } else {
            Self::Continue
        }
    }

    fn from_failures(failures: &[(String, basis_api::Error)]) -> Self {
        failures
            .iter()
            .map(|(_, e)| Self::from_error(e))
            .max()
            .unwrap_or(Self::Continue)
    }
}

fn log_failures(kind: &str, failures: &[(String, basis_api::Error)]) {
    for (panel_id, err) in failures {
        if err.is_transient() {
            debug!(%panel_id, error = %err, "{kind} poll failed transiently");
        } else {
            warn!(%panel_id, error = %err, "{kind} poll failed");
        }
    }
}

// ── Staleness ────────────────────────────────────────────────────────

/// Last successful telemetry fetch per panel.
///
/// Panels start at the loop's start instant, so a panel that never
/// answers is flagged one threshold after the loop began.
pub(crate) struct StalenessTracker {
    stale_after: Duration,
    last_success: HashMap<String, Instant>,
}

impl StalenessTracker {
    pub(crate) fn new<'a>(
        panel_ids: impl IntoIterator<Item = &'a String>,
        stale_after: Duration,
        start: Instant,
    ) -> Self {
        Self {
            stale_after,
            last_success: panel_ids.into_iter().map(|id| (id.clone(), start)).collect(),
        }
    }

    pub(crate) fn record_success(&mut self, panel_id: &str, at: Instant) {
        if let Some(last) = self.last_success.get_mut(panel_id) {
            *last = at;
        }
    }

    pub(crate) fn stale_panels(&self, now: Instant) -> Vec<&str> {
        let mut stale: Vec<&str> = self
            .last_success
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > self.stale_after)
            .map(|(id, _)| id.as_str())
            .collect();
        stale.sort_unstable();
        stale
    }
}

/// Flip `connected` to false for stale panels that still show connected.
fn mark_stale(store: &SnapshotStore, staleness: &StalenessTracker, now: Instant) {
    let snapshot = store.read();
    let deltas: Vec<Delta> = staleness
        .stale_panels(now)
        .into_iter()
        .filter(|id| snapshot.panel(id).is_some_and(|p| p.connected))
        .map(|id| {
            warn!(panel_id = %id, "no telemetry within staleness window, marking disconnected");
            Delta::Connectivity {
                panel_id: PanelId::from(id),
                connected: false,
            }
        })
        .collect();
    if !deltas.is_empty() {
        store.merge_all(deltas);
    }
}

// ── Cycles ───────────────────────────────────────────────────────────

/// One telemetry fetch for every registered panel, merged as a single
/// snapshot step.
pub(crate) async fn fast_cycle(
    ctx: &PollContext,
    mut staleness: Option<&mut StalenessTracker>,
) -> Directive {
    let batch = match ctx.client.get_telemetry(&ctx.panel_ids).await {
        Ok(batch) => batch,
        Err(e) => {
            debug!(error = %e, "telemetry poll skipped");
            return Directive::from_error(&e);
        }
    };

    let fetched_at = Utc::now();
    let received_at = Instant::now();
    let mut deltas = Vec::new();
    for telemetry in batch.items {
        if let Some(tracker) = staleness.as_deref_mut() {
            tracker.record_success(&telemetry.panel_id, received_at);
        }
        deltas.extend(telemetry_deltas(telemetry, fetched_at));
    }

    if !deltas.is_empty() {
        let version = ctx.store.merge_all(deltas);
        debug!(version, "telemetry merged");
    }

    log_failures("telemetry", &batch.failures);
    Directive::from_failures(&batch.failures)
}

/// Day and month statistics for every registered panel.
pub(crate) async fn slow_cycle(ctx: &PollContext) -> Directive {
    let mut directive = Directive::Continue;

    for period in Period::ALL {
        let batch = match ctx.client.get_statistics(&ctx.panel_ids, period).await {
            Ok(batch) => batch,
            Err(e) => {
                debug!(%period, error = %e, "statistics poll skipped");
                return directive.max(Directive::from_error(&e));
            }
        };

        let fetched_at = Utc::now();
        if !batch.items.is_empty() {
            let version = ctx
                .store
                .merge_all(batch.items.into_iter().map(|u| stats_delta(u, fetched_at)));
            debug!(%period, version, "statistics merged");
        }

        log_failures("statistics", &batch.failures);
        directive = directive.max(Directive::from_failures(&batch.failures));
        if directive >= Directive::Unauthorized {
            break;
        }
    }

    directive
}

// ── Loops ────────────────────────────────────────────────────────────

/// Longest pause a rate limit can impose on a loop.
const MAX_BACKOFF: Duration = Duration::from_secs(basis_api::client::MAX_RETRY_AFTER_SECS);

/// When a rate-limited loop may fetch again.
fn backoff_deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_BACKOFF)).unwrap_or(now)
}

/// Resolve a cycle's directive. Returns `false` if the loop should exit.
///
/// While paused for re-authentication the fast loop keeps its tick so
/// panels still go stale.
async fn handle_directive(
    ctx: &PollContext,
    directive: Directive,
    resume_at: &mut Option<Instant>,
    cancel: &CancellationToken,
    staleness: Option<&StalenessTracker>,
) -> bool {
    let session = ctx.client.session();
    let dead_grant = match directive {
        Directive::Continue => false,
        Directive::Backoff(delay) => {
            debug!(?delay, "rate limited, backing off");
            *resume_at = Some(backoff_deadline(Instant::now(), delay));
            false
        }
        // The client already invalidated the rejected token; refreshing
        // now tells a recoverable rejection from a dead grant.
        Directive::Unauthorized => tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            r = session.valid_token() => matches!(r, Err(AuthError::ReauthRequired)),
        },
        Directive::AwaitReauth => true,
    };
    if !dead_grant {
        return true;
    }

    warn!("credentials rejected, polling paused until re-authentication");
    let restored = session.wait_for_credentials();
    tokio::pin!(restored);
    let mut ticks = tokio::time::interval(ctx.fast_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = &mut restored => {
                info!("credentials restored, polling resumed");
                return true;
            }
            _ = ticks.tick() => {
                if let Some(tracker) = staleness {
                    mark_stale(&ctx.store, tracker, Instant::now());
                }
            }
        }
    }
}

pub(crate) async fn fast_loop(ctx: Arc<PollContext>, cancel: CancellationToken) {
    let mut staleness = StalenessTracker::new(&ctx.panel_ids, ctx.stale_after, Instant::now());
    let mut interval = tokio::time::interval(ctx.fast_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resume_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if resume_at.is_some_and(|at| Instant::now() < at) {
            mark_stale(&ctx.store, &staleness, Instant::now());
            continue;
        }
        resume_at = None;

        let directive = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            d = fast_cycle(&ctx, Some(&mut staleness)) => d,
        };
        mark_stale(&ctx.store, &staleness, Instant::now());

        if !handle_directive(&ctx, directive, &mut resume_at, &cancel, Some(&staleness)).await {
            break;
        }
    }
    debug!("fast loop stopped");
}

pub(crate) async fn slow_loop(ctx: Arc<PollContext>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ctx.slow_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resume_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if resume_at.is_some_and(|at| Instant::now() < at) {
            continue;
        }
        resume_at = None;

        let directive = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            d = slow_cycle(&ctx) => d,
        };

        if !handle_directive(&ctx, directive, &mut resume_at, &cancel, None).await {
            break;
        }
    }
    debug!("slow loop stopped");
}

// ── Loop set ─────────────────────────────────────────────────────────

/// The running fast and slow loops for one registry.
pub(crate) struct PollLoops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PollLoops {
    pub(crate) fn spawn(ctx: PollContext, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let ctx = Arc::new(ctx);
        debug!(panels = ctx.panel_ids.len(), "starting poll loops");
        let handles = vec![
            tokio::spawn(fast_loop(Arc::clone(&ctx), cancel.clone())),
            tokio::spawn(slow_loop(ctx, cancel.clone())),
        ];
        Self { cancel, handles }
    }

    /// Cancel both loops and wait for them to reach a suspension point.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }
    }
}
