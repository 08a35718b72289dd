use std::sync::Arc;

use chrono::Utc;
use guardia_monitoring::analytics::AnalyticsEngine;
use guardia_monitoring::model::{Service, ServiceResult, ServiceStatus, ServiceType};
use guardia_monitoring::persistence::memory::InMemoryPersistence;
use guardia_monitoring::persistence::Persistence;
use tokio::sync::mpsc;

pub async fn settle() {
    tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
}

pub fn new_service(interval: i64, service_type: ServiceType, locations: &str) -> Service {
    Service {
        service_id: 0,
        name: "S1".into(),
        owner_id: 1,
        service_type,
        to_check: "example.test".into(),
        expected: String::new(),
        interval,
        contact_group: 0,
        next_interval: interval,
        group_name: String::new(),
        service_state: ServiceStatus::Unknown,
        exists: false,
        last_event: String::new(),
        last_seen: Utc::now(),
        locations: locations.into(),
    }
}

pub fn result_for(service_id: i64, status: ServiceStatus, rapid_change: bool) -> ServiceResult {
    ServiceResult {
        service_id,
        status,
        message: "probe result".into(),
        time: Utc::now(),
        test_node: "test-node".into(),
        rapid_change,
    }
}

/// Spins up a live analytics engine backed by in-memory persistence and
/// returns the persistence handle plus the channel used to feed it
/// results, mirroring how the coordinator ingest surface feeds it.
pub async fn spawn_engine() -> (Arc<dyn Persistence>, mpsc::Sender<ServiceResult>) {
    let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
    let (engine, tx) = AnalyticsEngine::new(persistence.clone(), None);
    tokio::spawn(engine.run());
    (persistence, tx)
}
