//! Agent scheduler: pulls a service roster from the coordinator, runs due
//! probes concurrently, and ships results back in batches.
//!
//! Grounded on `satagent/satagent.go`'s `Run`/`pullServerConfiguration`/
//! `postResults`. State is split across two mutexes exactly as the
//! original splits `satServicesMutex` from `resultsMutex`, and neither is
//! ever held while doing network I/O.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::model::{Service, ServiceResult};
use crate::probes;

const TICK: Duration = Duration::from_secs(1);
const DEFAULT_REFRESH_SECONDS: i64 = 45;
const CONFIG_PULL_TIMEOUT: Duration = Duration::from_secs(20);
const RESULTS_POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the scheduler needs to talk to its coordinator.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub server_url: String,
    pub name: String,
    pub location: String,
    pub only_location: bool,
    pub access_key: String,
}

/// Per-agent scheduling state, survives configuration reloads.
pub struct AgentScheduler {
    identity: AgentIdentity,
    client: Client,
    services: Mutex<Vec<Service>>,
    next_interval: Mutex<HashMap<i64, i64>>,
    pending_results: Mutex<Vec<ServiceResult>>,
    refresh_seconds: i64,
}

impl AgentScheduler {
    pub fn new(identity: AgentIdentity) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            identity,
            client,
            services: Mutex::new(Vec::new()),
            next_interval: Mutex::new(HashMap::new()),
            pending_results: Mutex::new(Vec::new()),
            refresh_seconds: DEFAULT_REFRESH_SECONDS,
        })
    }

    fn hello(&self) -> String {
        format!(
            "satagent {} ({})",
            self.identity.name, self.identity.location
        )
    }

    /// Pulls the service roster from the coordinator and merges it into
    /// `services`/`next_interval`, preserving each existing service's
    /// remaining countdown so a reconfiguration never resets phase.
    #[instrument(skip(self))]
    async fn pull_configuration(&self) -> anyhow::Result<()> {
        let mut request = self
            .client
            .get(format!("{}/agents/config", self.identity.server_url))
            .timeout(CONFIG_PULL_TIMEOUT)
            .header("agent-key", &self.identity.access_key)
            .header("agent-name", &self.identity.name)
            .header("agent-location", &self.identity.location);

        if self.identity.only_location {
            request = request.header("agent-onlylocation", "YES");
        }

        let response = request.send().await?.error_for_status()?;
        let fetched: Vec<Service> = response.json().await?;

        if fetched.is_empty() {
            info!("{}: no services found", self.hello());
        }

        let mut next_interval = self.next_interval.lock().await;
        let mut resolved = Vec::with_capacity(fetched.len());
        for mut service in fetched {
            let carried = next_interval.get(&service.service_id).copied();
            service.next_interval = carried.unwrap_or(service.interval);
            next_interval.insert(service.service_id, service.next_interval);
            resolved.push(service);
        }

        let fetched_ids: std::collections::HashSet<i64> =
            resolved.iter().map(|s| s.service_id).collect();
        next_interval.retain(|id, _| fetched_ids.contains(id));
        drop(next_interval);

        let mut services = self.services.lock().await;
        *services = resolved;
        debug!("{}: reloaded {} services", self.hello(), services.len());

        Ok(())
    }

    /// Drains `pending_results` and POSTs the batch. Failed posts are
    /// logged and the batch is dropped (at-most-once delivery under
    /// coordinator failure — acceptable because analytics is idempotent
    /// over history updates, per the design note).
    #[instrument(skip(self))]
    async fn post_results(&self) {
        let batch = {
            let mut pending = self.pending_results.lock().await;
            std::mem::take(&mut *pending)
        };

        if batch.is_empty() {
            return;
        }

        debug!("{}: posting {} results", self.hello(), batch.len());

        let response = self
            .client
            .post(format!("{}/agents/results", self.identity.server_url))
            .timeout(RESULTS_POST_TIMEOUT)
            .header("agent-key", &self.identity.access_key)
            .header("agent-name", &self.identity.name)
            .header("agent-location", &self.identity.location)
            .json(&batch)
            .send()
            .await;

        if let Err(e) = response {
            error!("{}: failed to post results: {e}", self.hello());
        }
    }

    async fn run_due_probes(self: &std::sync::Arc<Self>) {
        let due: Vec<Service> = {
            let mut services = self.services.lock().await;
            let mut next_interval = self.next_interval.lock().await;
            let mut due = Vec::new();
            for service in services.iter_mut() {
                let counter = next_interval.entry(service.service_id).or_insert(service.interval);
                *counter -= 1;
                if *counter <= 0 {
                    *counter = service.interval;
                    due.push(service.clone());
                }
            }
            due
        };

        for service in due {
            let this = std::sync::Arc::clone(self);
            let location = self.identity.location.clone();
            tokio::spawn(async move {
                let result = probes::run_probe(&service, &location).await;
                this.pending_results.lock().await.push(result);
            });
        }
    }

    /// Runs the scheduler forever. Retries the initial configuration pull
    /// every 2s until it succeeds, then enters the steady-state loop: a
    /// 1s tick drives due probes, a separate 45s countdown drives
    /// reconfiguration, and any accumulated results are posted at the end
    /// of a tick in which the pending batch is non-empty.
    pub async fn run(self: std::sync::Arc<Self>) {
        info!(
            "{}: pulling tests with access key from {}",
            self.hello(),
            self.identity.server_url
        );

        while let Err(e) = self.pull_configuration().await {
            warn!("{}: connection to coordinator failed: {e}", self.hello());
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        info!("{}: retrieved initial configuration", self.hello());

        let mut ticker = interval(TICK);
        let mut refresh_countdown = self.refresh_seconds;

        loop {
            ticker.tick().await;

            self.run_due_probes().await;

            refresh_countdown -= 1;
            if refresh_countdown <= 0 {
                refresh_countdown = self.refresh_seconds;
                if let Err(e) = self.pull_configuration().await {
                    warn!("{}: refresh failed: {e}", self.hello());
                }
            }

            let has_pending = !self.pending_results.lock().await.is_empty();
            if has_pending {
                let this = std::sync::Arc::clone(&self);
                tokio::spawn(async move { this.post_results().await });
            }
        }
    }
}
