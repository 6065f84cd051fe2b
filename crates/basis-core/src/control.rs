// ── Control gateway ──
//
// Optimistic standby toggles with per-circuit serialization.
//
// Each circuit has a lane: a FIFO of issued requests drained by at most
// one task. Every request gets a generation number; only the newest
// generation may reconcile the visible value, and a queued request that
// has been superseded before its turn is skipped. Rollback always goes
// to the last value the cloud confirmed, never to another optimistic
// value.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use basis_api::CloudClient;

use crate::error::{ControlError, CoreError};
use crate::model::CircuitKey;
use crate::store::{CircuitDelta, ControlAck, Delta, SnapshotStore};

const EVENT_CHANNEL_SIZE: usize = 64;

// ── Public types ─────────────────────────────────────────────────────

/// How a standby request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyOutcome {
    /// The cloud accepted the command.
    Confirmed,
    /// A newer request for the same circuit arrived before this one was
    /// sent; it was dropped without a network call.
    Superseded,
}

/// Completion notification for one `set_standby` call.
#[derive(Debug)]
pub struct StandbyTicket {
    key: CircuitKey,
    generation: u64,
    rx: oneshot::Receiver<Result<StandbyOutcome, ControlError>>,
}

impl StandbyTicket {
    pub fn key(&self) -> &CircuitKey {
        &self.key
    }

    /// Position of this request among the circuit's requests since its
    /// lane was last idle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the command to resolve.
    pub async fn outcome(self) -> Result<StandbyOutcome, ControlError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(ControlError::Rejected {
                message: "command task ended without a result".into(),
            })
        })
    }
}

/// Broadcast for every resolved standby request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Confirmed {
        key: CircuitKey,
        standby: bool,
    },
    Superseded {
        key: CircuitKey,
        generation: u64,
    },
    Failed {
        key: CircuitKey,
        desired: bool,
        error: ControlError,
        /// Value the circuit was rolled back to, if this request still
        /// owned the visible value.
        reverted_to: Option<bool>,
    },
}

// ── Lanes ────────────────────────────────────────────────────────────

struct Job {
    generation: u64,
    desired: bool,
    reply: oneshot::Sender<Result<StandbyOutcome, ControlError>>,
}

#[derive(Default)]
struct LaneState {
    /// Newest issued generation.
    latest: u64,
    /// Last value the cloud reported or confirmed.
    confirmed: bool,
    queue: VecDeque<Job>,
    /// A drain task is active.
    draining: bool,
}

#[derive(Default)]
struct Lane {
    state: Mutex<LaneState>,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct GatewayInner {
    client: Arc<CloudClient>,
    store: Arc<SnapshotStore>,
    lanes: Mutex<HashMap<CircuitKey, Arc<Lane>>>,
    events: broadcast::Sender<ControlEvent>,
}

impl GatewayInner {
    /// Forget an idle lane. Lanes are only handed out under the map lock,
    /// so with the map locked a count of two (map and caller) means no
    /// request holds it.
    fn release_lane(&self, key: &CircuitKey, lane: &Arc<Lane>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if !lanes.get(key).is_some_and(|l| Arc::ptr_eq(l, lane)) || Arc::strong_count(lane) > 2 {
            return;
        }
        let idle = {
            let state = lane.lock();
            !state.draining && state.queue.is_empty()
        };
        if idle {
            lanes.remove(key);
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

/// Accepts standby toggles, applies them optimistically and reconciles
/// them against the cloud.
pub struct ControlGateway {
    inner: Arc<GatewayInner>,
    tracker: TaskTracker,
}

impl ControlGateway {
    pub fn new(client: Arc<CloudClient>, store: Arc<SnapshotStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(GatewayInner {
                client,
                store,
                lanes: Mutex::new(HashMap::new()),
                events,
            }),
            tracker: TaskTracker::new(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ControlEvent> {
        self.inner.events.subscribe()
    }

    /// Number of circuits with unresolved commands.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Request standby (`true`) or live (`false`) for a circuit.
    ///
    /// Returns once the optimistic value is visible in the snapshot. The
    /// network call happens in the background; await the ticket for the
    /// result.
    pub fn set_standby(&self, key: CircuitKey, desired: bool) -> Result<StandbyTicket, CoreError> {
        let snapshot = self.inner.store.read();
        let circuit = snapshot
            .circuit(&key)
            .ok_or_else(|| CoreError::CircuitNotFound {
                panel_id: key.panel_id.to_string(),
                circuit_id: key.circuit_id.to_string(),
            })?;
        if !circuit.standby_supported {
            return Err(CoreError::StandbyUnsupported {
                circuit_id: key.circuit_id.to_string(),
            });
        }

        let lane = self.lane(&key);
        let (reply, rx) = oneshot::channel();

        let generation = {
            let mut state = lane.lock();
            if !state.draining {
                // Nothing outstanding: the visible value is the cloud's.
                // Read it under the lane lock; a rollback may have landed
                // since the check above.
                state.confirmed = self
                    .inner
                    .store
                    .read()
                    .circuit(&key)
                    .map_or(circuit.standby, |c| c.standby);
            }
            state.latest += 1;
            let generation = state.latest;
            state.queue.push_back(Job {
                generation,
                desired,
                reply,
            });

            // Under the lane lock so a resolving request cannot slip its
            // ack in between our generation bump and this merge.
            let version = self
                .inner
                .store
                .merge(Delta::Circuit(CircuitDelta::optimistic(key.clone(), desired)));
            debug!(circuit = %key, desired, generation, version, "standby applied optimistically");

            if !state.draining {
                state.draining = true;
                let inner = Arc::clone(&self.inner);
                let lane = Arc::clone(&lane);
                let key = key.clone();
                self.tracker.spawn(drain_lane(inner, lane, key));
            }
            generation
        };

        Ok(StandbyTicket {
            key,
            generation,
            rx,
        })
    }

    /// Wait for every in-flight command to complete and reconcile.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lane(&self, key: &CircuitKey) -> Arc<Lane> {
        let mut lanes = self
            .inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(key.clone()).or_default())
    }
}

// ── Lane worker ──────────────────────────────────────────────────────

async fn drain_lane(inner: Arc<GatewayInner>, lane: Arc<Lane>, key: CircuitKey) {
    loop {
        let job = {
            let mut state = lane.lock();
            let Some(job) = state.queue.pop_front() else {
                state.draining = false;
                drop(state);
                inner.release_lane(&key, &lane);
                return;
            };
            if job.generation < state.latest {
                debug!(circuit = %key, generation = job.generation, "standby request superseded");
                let _ = job.reply.send(Ok(StandbyOutcome::Superseded));
                let _ = inner.events.send(ControlEvent::Superseded {
                    key: key.clone(),
                    generation: job.generation,
                });
                continue;
            }
            job
        };

        let result = inner
            .client
            .set_circuit_standby(key.panel_id.as_str(), key.circuit_id.as_str(), job.desired)
            .await;

        resolve(&inner, &lane, &key, job, result);
    }
}

fn resolve(
    inner: &GatewayInner,
    lane: &Lane,
    key: &CircuitKey,
    job: Job,
    result: Result<basis_api::types::StandbyAck, basis_api::Error>,
) {
    let mut state = lane.lock();
    let owns_visible_value = job.generation == state.latest;

    let outcome = match result {
        Ok(ack) if ack.standby == job.desired => {
            state.confirmed = ack.standby;
            if owns_visible_value {
                inner.store.merge(Delta::ControlAck(ControlAck {
                    key: key.clone(),
                    standby: ack.standby,
                }));
            }
            info!(circuit = %key, standby = ack.standby, "standby confirmed");
            let _ = inner.events.send(ControlEvent::Confirmed {
                key: key.clone(),
                standby: ack.standby,
            });
            Ok(StandbyOutcome::Confirmed)
        }
        Ok(ack) => {
            state.confirmed = ack.standby;
            Err(ControlError::Rejected {
                message: format!("cloud reported standby={} after the command", ack.standby),
            })
        }
        Err(e) => {
            warn!(circuit = %key, desired = job.desired, error = %e, "standby command failed");
            Err(ControlError::from(&e))
        }
    };

    if let Err(error) = &outcome {
        let reverted_to = owns_visible_value.then_some(state.confirmed);
        if let Some(value) = reverted_to {
            inner.store.merge(Delta::ControlAck(ControlAck {
                key: key.clone(),
                standby: value,
            }));
            debug!(circuit = %key, standby = value, "standby rolled back");
        }
        let _ = inner.events.send(ControlEvent::Failed {
            key: key.clone(),
            desired: job.desired,
            error: error.clone(),
            reverted_to,
        });
    }

    let _ = job.reply.send(outcome);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use basis_api::{MemoryCredentialStore, OAuthSettings, SessionManager, TokenSet, TransportConfig};

    use super::*;
    use crate::store::{CircuitInfo, StandbyUpdate};

    fn key() -> CircuitKey {
        CircuitKey::new("P1", "C1")
    }

    fn gateway(server: &MockServer) -> ControlGateway {
        let transport = TransportConfig::default().with_timeout(Duration::from_secs(2));
        let tokens = TokenSet::new("access-1", "refresh-1", Utc::now() + chrono::Duration::hours(1));
        let session = SessionManager::new(
            OAuthSettings {
                token_url: format!("{}/oauth/token", server.uri()).parse().unwrap(),
                client_id: "basis-test".into(),
                client_secret: None,
            },
            Arc::new(MemoryCredentialStore::new(Some(&tokens))),
            &transport,
            Duration::from_secs(60),
        )
        .unwrap();
        let client = CloudClient::new(&server.uri(), Arc::new(session), &transport).unwrap();

        let store = Arc::new(SnapshotStore::new());
        store.merge(Delta::Circuit(CircuitDelta {
            key: key(),
            fetched_at: Some(Utc::now()),
            info: Some(CircuitInfo {
                number: 1,
                label: "hwc".into(),
                standby_locked: false,
            }),
            readings: None,
            standby: Some(StandbyUpdate::Reported(false)),
        }));
        ControlGateway::new(Arc::new(client), store)
    }

    fn visible_standby(gateway: &ControlGateway) -> bool {
        gateway.inner.store.read().circuit(&key()).unwrap().standby
    }

    #[tokio::test]
    async fn idle_lanes_are_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/circuits/C1/standby"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "circuitId": "C1", "standby": true })),
            )
            .mount(&server)
            .await;
        let gateway = gateway(&server);

        let ticket = gateway.set_standby(key(), true).unwrap();
        assert_eq!(gateway.lane_count(), 1);
        assert_eq!(ticket.outcome().await.unwrap(), StandbyOutcome::Confirmed);

        gateway.drain().await;
        assert_eq!(gateway.lane_count(), 0);
        assert!(visible_standby(&gateway));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_target_is_read_after_earlier_rollback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/circuits/C1/standby"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "message": "locked" })))
            .mount(&server)
            .await;
        let gateway = Arc::new(gateway(&server));

        // An earlier request for `true` is in flight and visible.
        let lane = gateway.lane(&key());
        let mut state = lane.lock();
        state.latest = 1;
        state.draining = true;
        gateway
            .inner
            .store
            .merge(Delta::Circuit(CircuitDelta::optimistic(key(), true)));

        // A new request reads the circuit while the earlier one resolves.
        let issuing = Arc::clone(&gateway);
        let second = tokio::task::spawn_blocking(move || issuing.set_standby(key(), true));
        std::thread::sleep(Duration::from_millis(100));

        // The earlier request fails and rolls back to the cloud's `false`.
        gateway.inner.store.merge(Delta::ControlAck(ControlAck {
            key: key(),
            standby: false,
        }));
        state.draining = false;
        drop(state);
        drop(lane);

        let ticket = second.await.unwrap().unwrap();
        assert_eq!(ticket.generation(), 2);
        assert!(matches!(
            ticket.outcome().await,
            Err(ControlError::Rejected { .. })
        ));
        assert!(!visible_standby(&gateway));
    }
}
