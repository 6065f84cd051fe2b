// Async client for the Basis cloud REST surface.
//
// Stateless request/response mapping: obtain a token from the session,
// issue the call, map the outcome into the error taxonomy. No retries
// happen here.

use std::sync::Arc;

use chrono::Local;
use futures_util::future::join_all;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::session::SessionManager;
use crate::transport::TransportConfig;
use crate::types::{
    Batch, EnergyUsage, PanelList, PanelSummary, PanelTelemetry, Period, StandbyAck,
    StandbyRequest,
};

/// Retry delay assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Longest `Retry-After` honored; larger values are clamped.
pub const MAX_RETRY_AFTER_SECS: u64 = 3600;

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Async client for the Basis cloud API.
///
/// Every request carries a bearer token from the shared
/// [`SessionManager`]. A 401/403 invalidates that token so the next
/// call refreshes it.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionManager>,
}

impl CloudClient {
    pub fn new(
        api_url: &str,
        session: Arc<SessionManager>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let base_url = Url::parse(api_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn token(&self) -> Result<SecretString, Error> {
        Ok(self.session.valid_token().await?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        segments: &[&str],
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.endpoint(segments)?;
        debug!("GET {url} params={params:?}");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .query(params)
            .send()
            .await
            .map_err(|e| Error::from_request(&e))?;
        self.handle_response(resp, token, segments).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        token: &SecretString,
        segments: &[&str],
        body: &B,
    ) -> Result<T, Error> {
        let url = self.endpoint(segments)?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::from_request(&e))?;
        self.handle_response(resp, token, segments).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        token: &SecretString,
        segments: &[&str],
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await.map_err(|e| Error::from_request(&e))?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Malformed {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.parse_error(status, resp, token, segments).await)
        }
    }

    async fn parse_error(
        &self,
        status: StatusCode,
        resp: reqwest::Response,
        token: &SecretString,
        segments: &[&str],
    ) -> Error {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.session.invalidate(token);
            return Error::Unauthorized;
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
                .min(MAX_RETRY_AFTER_SECS);
            return Error::RateLimited { retry_after_secs };
        }

        if status == StatusCode::NOT_FOUND {
            return Error::NotFound {
                resource: segments.join("/"),
            };
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                }
            });

        if status.is_server_error() {
            Error::Transient {
                message: format!("HTTP {status}: {message}"),
            }
        } else {
            Error::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Panels ───────────────────────────────────────────────────────

    pub async fn list_panels(&self) -> Result<Vec<PanelSummary>, Error> {
        let token = self.token().await?;
        let list: PanelList = self.get(&token, &["panels"], &[]).await?;
        Ok(list.panels)
    }

    // ── Telemetry ────────────────────────────────────────────────────

    pub async fn get_panel_telemetry(&self, panel_id: &str) -> Result<PanelTelemetry, Error> {
        let token = self.token().await?;
        self.fetch_telemetry(&token, panel_id).await
    }

    /// Fetch telemetry for every panel concurrently.
    ///
    /// Fails as a whole only when no token can be obtained; per-panel
    /// failures land in [`Batch::failures`].
    pub async fn get_telemetry(&self, panel_ids: &[String]) -> Result<Batch<PanelTelemetry>, Error> {
        let token = self.token().await?;
        let results = join_all(
            panel_ids
                .iter()
                .map(|id| self.fetch_telemetry(&token, id)),
        )
        .await;
        Ok(collect_batch(panel_ids, results))
    }

    async fn fetch_telemetry(
        &self,
        token: &SecretString,
        panel_id: &str,
    ) -> Result<PanelTelemetry, Error> {
        let mut telemetry: PanelTelemetry =
            self.get(token, &["panels", panel_id, "telemetry"], &[]).await?;
        if telemetry.panel_id != panel_id {
            debug!(requested = panel_id, reported = %telemetry.panel_id, "telemetry names another panel");
            panel_id.clone_into(&mut telemetry.panel_id);
        }
        Ok(telemetry)
    }

    // ── Statistics ───────────────────────────────────────────────────

    pub async fn get_panel_statistics(
        &self,
        panel_id: &str,
        period: Period,
    ) -> Result<EnergyUsage, Error> {
        let token = self.token().await?;
        self.fetch_statistics(&token, panel_id, period).await
    }

    /// Fetch one period's statistics for every panel concurrently.
    pub async fn get_statistics(
        &self,
        panel_ids: &[String],
        period: Period,
    ) -> Result<Batch<EnergyUsage>, Error> {
        let token = self.token().await?;
        let results = join_all(
            panel_ids
                .iter()
                .map(|id| self.fetch_statistics(&token, id, period)),
        )
        .await;
        Ok(collect_batch(panel_ids, results))
    }

    async fn fetch_statistics(
        &self,
        token: &SecretString,
        panel_id: &str,
        period: Period,
    ) -> Result<EnergyUsage, Error> {
        let start = period.start_at(Local::now()).to_rfc3339();
        let params = [("period", period.as_str().to_owned()), ("start", start)];
        let mut usage: EnergyUsage = self
            .get(token, &["panels", panel_id, "statistics"], &params)
            .await?;
        if usage.panel_id != panel_id {
            debug!(requested = panel_id, reported = %usage.panel_id, "statistics name another panel");
            panel_id.clone_into(&mut usage.panel_id);
        }
        Ok(usage)
    }

    // ── Control ──────────────────────────────────────────────────────

    /// Put a circuit into standby (`true`) or back to live (`false`).
    /// Returns the cloud's authoritative view of the circuit.
    pub async fn set_circuit_standby(
        &self,
        panel_id: &str,
        circuit_id: &str,
        standby: bool,
    ) -> Result<StandbyAck, Error> {
        let token = self.token().await?;
        let body = StandbyRequest { panel_id, standby };
        self.post(&token, &["circuits", circuit_id, "standby"], &body)
            .await
    }
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

fn collect_batch<T>(panel_ids: &[String], results: Vec<Result<T, Error>>) -> Batch<T> {
    let mut batch = Batch {
        items: Vec::with_capacity(results.len()),
        failures: Vec::new(),
    };
    for (id, result) in panel_ids.iter().zip(results) {
        match result {
            Ok(item) => batch.items.push(item),
            Err(e) => batch.failures.push((id.clone(), e)),
        }
    }
    batch
}
