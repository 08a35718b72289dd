//! The six literal end-to-end scenarios.
//!
//! Scenario 4 (dead-service detection after 601 simulated seconds) needs
//! to fast-forward real time past the 600s threshold; since the engine
//! deliberately keeps wall-clock timestamps (see the design notes on time
//! source sensitivity), that scenario is instead covered as a white-box
//! unit test in `analytics::tests`, which manipulates a tracker's
//! `last_seen` directly rather than sleeping for ten minutes.

use guardia_monitoring::model::{ServiceStatus, ServiceType};
use guardia_monitoring::persistence::Persistence;

use crate::helpers::*;

#[tokio::test]
async fn scenario_1_debounced_down() {
    let (persistence, tx) = spawn_engine().await;
    let mut service = new_service(5, ServiceType::Ping, "any");
    persistence.insert_service(&mut service).await.unwrap();

    for status in [ServiceStatus::Up, ServiceStatus::Up, ServiceStatus::Down, ServiceStatus::Down, ServiceStatus::Down] {
        tx.send(result_for(service.service_id, status, false)).await.unwrap();
    }
    settle().await;

    assert_eq!(
        persistence.select_service(service.service_id, None).await.unwrap().service_state,
        ServiceStatus::Unknown
    );
    assert_eq!(persistence.read_service_logs(service.service_id).await.unwrap().len(), 0);

    tx.send(result_for(service.service_id, ServiceStatus::Down, false)).await.unwrap();
    settle().await;

    let service_after = persistence.select_service(service.service_id, None).await.unwrap();
    assert_eq!(service_after.service_state, ServiceStatus::Down);
    let logs = persistence.read_service_logs(service.service_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_to, ServiceStatus::Down);
}

#[tokio::test]
async fn scenario_2_debounced_recovery() {
    let (persistence, tx) = spawn_engine().await;
    let mut service = new_service(5, ServiceType::Ping, "any");
    persistence.insert_service(&mut service).await.unwrap();

    for status in [
        ServiceStatus::Up,
        ServiceStatus::Up,
        ServiceStatus::Down,
        ServiceStatus::Down,
        ServiceStatus::Down,
        ServiceStatus::Down,
    ] {
        tx.send(result_for(service.service_id, status, false)).await.unwrap();
    }
    settle().await;
    assert_eq!(
        persistence.select_service(service.service_id, None).await.unwrap().service_state,
        ServiceStatus::Down
    );

    for _ in 0..4 {
        tx.send(result_for(service.service_id, ServiceStatus::Up, false)).await.unwrap();
    }
    settle().await;

    let service_after = persistence.select_service(service.service_id, None).await.unwrap();
    assert_eq!(service_after.service_state, ServiceStatus::Up);

    let logs = persistence.read_service_logs(service.service_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status_to, ServiceStatus::Up);
}

#[tokio::test]
async fn scenario_3_administrative_reset() {
    let (persistence, tx) = spawn_engine().await;
    let mut service = new_service(5, ServiceType::Tcp, "any");
    persistence.insert_service(&mut service).await.unwrap();

    for _ in 0..4 {
        tx.send(result_for(service.service_id, ServiceStatus::Down, false)).await.unwrap();
    }
    settle().await;
    assert_eq!(
        persistence.select_service(service.service_id, None).await.unwrap().service_state,
        ServiceStatus::Down
    );

    tx.send(result_for(service.service_id, ServiceStatus::Unknown, true)).await.unwrap();
    settle().await;

    let service_after = persistence.select_service(service.service_id, None).await.unwrap();
    assert_eq!(service_after.service_state, ServiceStatus::Unknown);
}

#[tokio::test]
async fn scenario_5_location_filter() {
    let persistence_box: std::sync::Arc<dyn Persistence> =
        std::sync::Arc::new(guardia_monitoring::persistence::memory::InMemoryPersistence::new());

    let mut a = new_service(60, ServiceType::Http, "eu us");
    let mut b = new_service(60, ServiceType::Http, "any");
    let mut c = new_service(60, ServiceType::Http, "asia");
    persistence_box.insert_service(&mut a).await.unwrap();
    persistence_box.insert_service(&mut b).await.unwrap();
    persistence_box.insert_service(&mut c).await.unwrap();

    let us_only = persistence_box.read_services(0, "us", true).await.unwrap();
    assert_eq!(ids(&us_only), vec![a.service_id]);

    let us_any = persistence_box.read_services(0, "us", false).await.unwrap();
    assert_eq!(sorted_ids(&us_any), sorted(vec![a.service_id, b.service_id]));

    let asia_any = persistence_box.read_services(0, "asia", false).await.unwrap();
    assert_eq!(sorted_ids(&asia_any), sorted(vec![b.service_id, c.service_id]));
}

#[tokio::test]
async fn scenario_6_auto_registration() {
    let store = guardia_monitoring::persistence::memory::InMemoryPersistence::new();
    guardia_monitoring::coordinator::auth::authenticate(&store, "global-secret", "new-agent", "global-secret", "eu")
        .await
        .unwrap();

    let agent = store.select_agent("new-agent").await.unwrap();
    assert_eq!(agent.location, "eu");

    // subsequent pulls with the per-agent key succeed
    guardia_monitoring::coordinator::auth::authenticate(&store, "global-secret", "new-agent", &agent.access_key, "eu")
        .await
        .unwrap();

    // an unknown agent presenting the wrong key is rejected and no row is created
    let rejected =
        guardia_monitoring::coordinator::auth::authenticate(&store, "global-secret", "other-agent", "wrong", "eu")
            .await;
    assert!(rejected.is_err());
    assert!(store.select_agent("other-agent").await.is_err());
}

fn ids(services: &[guardia_monitoring::model::Service]) -> Vec<i64> {
    services.iter().map(|s| s.service_id).collect()
}

fn sorted_ids(services: &[guardia_monitoring::model::Service]) -> Vec<i64> {
    sorted(ids(services))
}

fn sorted(mut v: Vec<i64>) -> Vec<i64> {
    v.sort();
    v
}
