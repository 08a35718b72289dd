//! In-memory persistence backend.
//!
//! Used for tests and for `-db ""` / no-persistence runs, matching the
//! teacher's `storage::memory::MemoryBackend` role as the dependency-free
//! fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::error::{PersistenceError, PersistenceResult};
use super::Persistence;
use crate::model::{Agent, AlertGroup, Service, ServiceLog, ServiceStatus, ALLOWED_INTERVALS};

#[derive(Default)]
struct State {
    services: HashMap<i64, Service>,
    logs: HashMap<i64, Vec<ServiceLog>>,
    alert_groups: HashMap<i64, AlertGroup>,
    agents: HashMap<String, Agent>,
    next_service_id: i64,
    next_contact_id: i64,
}

pub struct InMemoryPersistence {
    state: Mutex<State>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn insert_service(&self, service: &mut Service) -> PersistenceResult<()> {
        if !ALLOWED_INTERVALS.contains(&service.interval) {
            return Err(PersistenceError::InvalidInterval(service.interval));
        }
        let mut state = self.state.lock().await;
        state.next_service_id += 1;
        service.service_id = state.next_service_id;
        service.exists = true;
        state.services.insert(service.service_id, service.clone());
        Ok(())
    }

    async fn update_service(&self, service: &Service) -> PersistenceResult<()> {
        if !ALLOWED_INTERVALS.contains(&service.interval) {
            return Err(PersistenceError::InvalidInterval(service.interval));
        }
        let mut state = self.state.lock().await;
        if !state.services.contains_key(&service.service_id) {
            return Err(PersistenceError::NotFound);
        }
        state.services.insert(service.service_id, service.clone());
        Ok(())
    }

    async fn delete_service(&self, service_id: i64) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state
            .services
            .remove(&service_id)
            .ok_or(PersistenceError::NotFound)?;
        state.logs.remove(&service_id);
        Ok(())
    }

    async fn delete_service_logs(&self, service_id: i64) -> PersistenceResult<()> {
        self.state.lock().await.logs.remove(&service_id);
        Ok(())
    }

    async fn reset_service(&self, service_id: i64) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        let service = state
            .services
            .get_mut(&service_id)
            .ok_or(PersistenceError::NotFound)?;
        service.service_state = ServiceStatus::Unknown;
        Ok(())
    }

    async fn select_service(
        &self,
        service_id: i64,
        owner_id: Option<i64>,
    ) -> PersistenceResult<Service> {
        let state = self.state.lock().await;
        let service = state.services.get(&service_id).ok_or(PersistenceError::NotFound)?;
        if let Some(owner_id) = owner_id {
            if owner_id != 0 && service.owner_id != owner_id {
                return Err(PersistenceError::NotFound);
            }
        }
        Ok(service.clone())
    }

    async fn read_services(
        &self,
        owner_id: i64,
        location: &str,
        only_location: bool,
    ) -> PersistenceResult<Vec<Service>> {
        let state = self.state.lock().await;
        Ok(state
            .services
            .values()
            .filter(|s| owner_id == 0 || s.owner_id == owner_id)
            .filter(|s| {
                if location.is_empty() {
                    return true;
                }
                if only_location {
                    s.matches_location(location)
                } else {
                    s.matches_location(location) || s.locations == "any"
                }
            })
            .cloned()
            .collect())
    }

    async fn update_service_last_seen_now(&self, service_id: i64) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        let service = state
            .services
            .get_mut(&service_id)
            .ok_or(PersistenceError::NotFound)?;
        service.last_seen = Utc::now();
        Ok(())
    }

    async fn update_service_state(
        &self,
        service_id: i64,
        new_state: ServiceStatus,
    ) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        let service = state
            .services
            .get_mut(&service_id)
            .ok_or(PersistenceError::NotFound)?;
        service.service_state = new_state;
        service.last_event = Utc::now().to_rfc3339();
        Ok(())
    }

    async fn insert_service_change(
        &self,
        service_id: i64,
        from: ServiceStatus,
        to: ServiceStatus,
        why: &str,
    ) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.logs.entry(service_id).or_default().push(ServiceLog {
            service_id,
            time: Utc::now(),
            status_from: from,
            status_to: to,
            why: why.to_string(),
        });
        Ok(())
    }

    async fn read_service_logs(&self, service_id: i64) -> PersistenceResult<Vec<ServiceLog>> {
        Ok(self
            .state
            .lock()
            .await
            .logs
            .get(&service_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_alert_group(&self, group: &mut AlertGroup) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.next_contact_id += 1;
        group.contact_id = state.next_contact_id;
        group.exists = true;
        state.alert_groups.insert(group.contact_id, group.clone());
        Ok(())
    }

    async fn update_alert_group(&self, group: &AlertGroup) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        if !state.alert_groups.contains_key(&group.contact_id) {
            return Err(PersistenceError::NotFound);
        }
        state.alert_groups.insert(group.contact_id, group.clone());
        Ok(())
    }

    async fn delete_alert_group(&self, contact_id: i64) -> PersistenceResult<()> {
        self.state
            .lock()
            .await
            .alert_groups
            .remove(&contact_id)
            .ok_or(PersistenceError::NotFound)?;
        Ok(())
    }

    async fn select_alert_group(&self, contact_id: i64) -> PersistenceResult<AlertGroup> {
        self.state
            .lock()
            .await
            .alert_groups
            .get(&contact_id)
            .cloned()
            .ok_or(PersistenceError::NotFound)
    }

    async fn read_alert_groups(&self, owner_id: i64) -> PersistenceResult<Vec<AlertGroup>> {
        Ok(self
            .state
            .lock()
            .await
            .alert_groups
            .values()
            .filter(|g| g.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn select_agent(&self, name: &str) -> PersistenceResult<Agent> {
        self.state
            .lock()
            .await
            .agents
            .get(name)
            .cloned()
            .ok_or(PersistenceError::NotFound)
    }

    async fn insert_agent(&self, name: &str, access_key: &str, location: &str) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.agents.insert(
            name.to_string(),
            Agent {
                name: name.to_string(),
                location: location.to_string(),
                access_key: access_key.to_string(),
                last_seen: Utc::now(),
                only_location: false,
            },
        );
        Ok(())
    }

    async fn update_agent_location(&self, name: &str, location: &str) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        let agent = state.agents.get_mut(name).ok_or(PersistenceError::NotFound)?;
        agent.location = location.to_string();
        agent.last_seen = Utc::now();
        Ok(())
    }

    async fn search_agent_access_key(&self, name: &str, access_key: &str) -> PersistenceResult<()> {
        let state = self.state.lock().await;
        match state.agents.get(name) {
            Some(agent) if agent.access_key == access_key => Ok(()),
            _ => Err(PersistenceError::NotFound),
        }
    }

    async fn read_agent_locations(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut locations: Vec<String> = state
            .agents
            .values()
            .filter(|a| a.last_seen >= since)
            .map(|a| a.location.clone())
            .collect();
        locations.sort();
        locations.dedup();
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;

    fn new_service(owner_id: i64, locations: &str) -> Service {
        Service {
            service_id: 0,
            name: "svc".into(),
            owner_id,
            service_type: ServiceType::Tcp,
            to_check: "host:1".into(),
            expected: String::new(),
            interval: 60,
            contact_group: 0,
            next_interval: 60,
            group_name: String::new(),
            service_state: ServiceStatus::Unknown,
            exists: false,
            last_event: String::new(),
            last_seen: Utc::now(),
            locations: locations.into(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_rejects_bad_interval() {
        let store = InMemoryPersistence::new();
        let mut service = new_service(1, "any");
        service.interval = 61;
        assert!(matches!(
            store.insert_service(&mut service).await,
            Err(PersistenceError::InvalidInterval(61))
        ));

        service.interval = 60;
        store.insert_service(&mut service).await.unwrap();
        assert_eq!(service.service_id, 1);
    }

    #[tokio::test]
    async fn read_services_location_filter_matches_spec_scenario() {
        let store = InMemoryPersistence::new();
        let mut a = new_service(1, "eu us");
        let mut b = new_service(1, "any");
        let mut c = new_service(1, "asia");
        store.insert_service(&mut a).await.unwrap();
        store.insert_service(&mut b).await.unwrap();
        store.insert_service(&mut c).await.unwrap();

        let only_us = store.read_services(0, "us", true).await.unwrap();
        assert_eq!(only_us.iter().map(|s| s.service_id).collect::<Vec<_>>(), vec![a.service_id]);

        let us_any = store.read_services(0, "us", false).await.unwrap();
        let mut ids: Vec<_> = us_any.iter().map(|s| s.service_id).collect();
        ids.sort();
        let mut expected = vec![a.service_id, b.service_id];
        expected.sort();
        assert_eq!(ids, expected);

        let asia_any = store.read_services(0, "asia", false).await.unwrap();
        let mut ids: Vec<_> = asia_any.iter().map(|s| s.service_id).collect();
        ids.sort();
        let mut expected = vec![b.service_id, c.service_id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn delete_service_also_drops_its_logs() {
        let store = InMemoryPersistence::new();
        let mut service = new_service(1, "any");
        store.insert_service(&mut service).await.unwrap();
        store
            .insert_service_change(service.service_id, ServiceStatus::Up, ServiceStatus::Down, "x")
            .await
            .unwrap();

        store.delete_service(service.service_id).await.unwrap();
        assert_eq!(store.read_service_logs(service.service_id).await.unwrap().len(), 0);
    }
}
