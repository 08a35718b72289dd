//! Persistence facade: a narrow, synchronous-feeling mapping of the core
//! entities (services, the transition log, alert groups, agents) onto
//! durable storage. Grounded on the `satsql` package's function list and
//! on the teacher's `storage::backend::StorageBackend` trait shape
//! (async_trait, one error type, a sqlite/in-memory split).

pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Agent, AlertGroup, Service, ServiceLog, ServiceStatus};
use error::PersistenceResult;

/// Narrow set of operations the core pipeline needs from storage.
///
/// Implementations must serialize writes (single-writer discipline) —
/// the original uses a single SQL connection; `SqlitePersistence` caps
/// its pool at one connection to match.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn insert_service(&self, service: &mut Service) -> PersistenceResult<()>;
    async fn update_service(&self, service: &Service) -> PersistenceResult<()>;
    async fn delete_service(&self, service_id: i64) -> PersistenceResult<()>;
    async fn delete_service_logs(&self, service_id: i64) -> PersistenceResult<()>;
    /// Administrative reset: sets the service's persisted state to
    /// UNKNOWN. Does not itself enqueue the synthetic result onto the
    /// analytics queue — that's the ingest layer's job.
    async fn reset_service(&self, service_id: i64) -> PersistenceResult<()>;

    /// `owner_id = Some(0)` or `None` means unscoped (used by the
    /// notifier, which looks services up without an owning user).
    async fn select_service(
        &self,
        service_id: i64,
        owner_id: Option<i64>,
    ) -> PersistenceResult<Service>;

    /// Returns services filtered by agent location, per §4.3: when
    /// `only_location` is set, only services whose `locations` contains
    /// the token are returned; otherwise services matching the location
    /// or carrying the `any` wildcard are returned. `owner_id = 0` means
    /// "all owners" (used to serve agents).
    async fn read_services(
        &self,
        owner_id: i64,
        location: &str,
        only_location: bool,
    ) -> PersistenceResult<Vec<Service>>;

    async fn update_service_last_seen_now(&self, service_id: i64) -> PersistenceResult<()>;
    async fn update_service_state(
        &self,
        service_id: i64,
        state: ServiceStatus,
    ) -> PersistenceResult<()>;
    async fn insert_service_change(
        &self,
        service_id: i64,
        from: ServiceStatus,
        to: ServiceStatus,
        why: &str,
    ) -> PersistenceResult<()>;
    async fn read_service_logs(&self, service_id: i64) -> PersistenceResult<Vec<ServiceLog>>;

    async fn insert_alert_group(&self, group: &mut AlertGroup) -> PersistenceResult<()>;
    async fn update_alert_group(&self, group: &AlertGroup) -> PersistenceResult<()>;
    async fn delete_alert_group(&self, contact_id: i64) -> PersistenceResult<()>;
    async fn select_alert_group(&self, contact_id: i64) -> PersistenceResult<AlertGroup>;
    async fn read_alert_groups(&self, owner_id: i64) -> PersistenceResult<Vec<AlertGroup>>;

    async fn select_agent(&self, name: &str) -> PersistenceResult<Agent>;
    async fn insert_agent(&self, name: &str, access_key: &str, location: &str) -> PersistenceResult<()>;
    async fn update_agent_location(&self, name: &str, location: &str) -> PersistenceResult<()>;
    /// `Ok(())` iff an agent named `name` exists with exactly this key.
    async fn search_agent_access_key(&self, name: &str, access_key: &str) -> PersistenceResult<()>;
    /// Distinct locations of agents seen within the last 5 days.
    async fn read_agent_locations(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<String>>;
}
