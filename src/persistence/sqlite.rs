//! SQLite persistence backend.
//!
//! Grounded on the teacher's `storage::sqlite::SqliteBackend`: a `sqlx`
//! connection pool configured for WAL mode, `sqlx::migrate!` for schema
//! versioning. Unlike the teacher's pool (sized for read concurrency),
//! this one is capped at a single connection — the original opens exactly
//! one `*sql.DB` connection (`SetMaxOpenConns(1)`) and this crate keeps
//! that single-writer discipline rather than relying on SQLite's own
//! locking to serialize writes.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::error::{PersistenceError, PersistenceResult};
use super::Persistence;
use crate::model::{Agent, AlertGroup, Service, ServiceLog, ServiceStatus, ServiceType, ALLOWED_INTERVALS};

pub struct SqlitePersistence {
    pool: Pool<Sqlite>,
}

impl SqlitePersistence {
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("initializing SQLite persistence at {path_str}");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path_str}"))
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;

        debug!("running persistence migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn parse_service_type(s: &str) -> ServiceType {
    match s {
        "ping" => ServiceType::Ping,
        "tcp" => ServiceType::Tcp,
        "tls" => ServiceType::Tls,
        _ => ServiceType::Http,
    }
}

fn service_type_str(t: ServiceType) -> &'static str {
    match t {
        ServiceType::Ping => "ping",
        ServiceType::Http => "http",
        ServiceType::Tcp => "tcp",
        ServiceType::Tls => "tls",
    }
}

fn parse_status(s: &str) -> ServiceStatus {
    match s {
        "SERVICE_UP" => ServiceStatus::Up,
        "SERVICE_DOWN" => ServiceStatus::Down,
        _ => ServiceStatus::Unknown,
    }
}

fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> PersistenceResult<Service> {
    let last_seen: String = row.try_get("last_seen")?;
    Ok(Service {
        service_id: row.try_get("service_id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        service_type: parse_service_type(&row.try_get::<String, _>("service_type")?),
        to_check: row.try_get("to_check")?,
        expected: row.try_get("expected")?,
        interval: row.try_get("interval")?,
        contact_group: row.try_get("contact_group")?,
        next_interval: row.try_get("interval")?,
        group_name: String::new(),
        service_state: parse_status(&row.try_get::<String, _>("service_state")?),
        exists: true,
        last_event: row.try_get("last_event")?,
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        locations: row.try_get("locations")?,
    })
}

#[async_trait]
impl Persistence for SqlitePersistence {
    #[instrument(skip(self, service))]
    async fn insert_service(&self, service: &mut Service) -> PersistenceResult<()> {
        if !ALLOWED_INTERVALS.contains(&service.interval) {
            return Err(PersistenceError::InvalidInterval(service.interval));
        }
        let id = sqlx::query(
            "INSERT INTO services (name, owner_id, service_type, to_check, expected, interval, \
             contact_group, service_state, last_event, last_seen, locations) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&service.name)
        .bind(service.owner_id)
        .bind(service_type_str(service.service_type))
        .bind(&service.to_check)
        .bind(&service.expected)
        .bind(service.interval)
        .bind(service.contact_group)
        .bind(service.service_state.as_str())
        .bind(&service.last_event)
        .bind(service.last_seen.to_rfc3339())
        .bind(&service.locations)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        service.service_id = id;
        service.exists = true;
        Ok(())
    }

    async fn update_service(&self, service: &Service) -> PersistenceResult<()> {
        if !ALLOWED_INTERVALS.contains(&service.interval) {
            return Err(PersistenceError::InvalidInterval(service.interval));
        }
        sqlx::query(
            "UPDATE services SET name = ?, service_type = ?, to_check = ?, expected = ?, \
             interval = ?, contact_group = ?, locations = ? WHERE service_id = ?",
        )
        .bind(&service.name)
        .bind(service_type_str(service.service_type))
        .bind(&service.to_check)
        .bind(&service.expected)
        .bind(service.interval)
        .bind(service.contact_group)
        .bind(&service.locations)
        .bind(service.service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_service(&self, service_id: i64) -> PersistenceResult<()> {
        sqlx::query("DELETE FROM services WHERE service_id = ?")
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        self.delete_service_logs(service_id).await
    }

    async fn delete_service_logs(&self, service_id: i64) -> PersistenceResult<()> {
        sqlx::query("DELETE FROM service_log WHERE service_id = ?")
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_service(&self, service_id: i64) -> PersistenceResult<()> {
        self.update_service_state(service_id, ServiceStatus::Unknown).await
    }

    async fn select_service(
        &self,
        service_id: i64,
        owner_id: Option<i64>,
    ) -> PersistenceResult<Service> {
        let row = sqlx::query("SELECT * FROM services WHERE service_id = ?")
            .bind(service_id)
            .fetch_one(&self.pool)
            .await?;
        let service = row_to_service(&row)?;
        if let Some(owner_id) = owner_id {
            if owner_id != 0 && service.owner_id != owner_id {
                return Err(PersistenceError::NotFound);
            }
        }
        Ok(service)
    }

    #[instrument(skip(self))]
    async fn read_services(
        &self,
        owner_id: i64,
        location: &str,
        only_location: bool,
    ) -> PersistenceResult<Vec<Service>> {
        let rows = if owner_id != 0 {
            sqlx::query("SELECT * FROM services WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM services").fetch_all(&self.pool).await?
        };

        let mut services = Vec::with_capacity(rows.len());
        for row in &rows {
            services.push(row_to_service(row)?);
        }

        if location.is_empty() {
            return Ok(services);
        }

        Ok(services
            .into_iter()
            .filter(|s| {
                if only_location {
                    s.matches_location(location)
                } else {
                    s.matches_location(location) || s.locations == "any"
                }
            })
            .collect())
    }

    async fn update_service_last_seen_now(&self, service_id: i64) -> PersistenceResult<()> {
        sqlx::query("UPDATE services SET last_seen = ? WHERE service_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_service_state(
        &self,
        service_id: i64,
        state: ServiceStatus,
    ) -> PersistenceResult<()> {
        sqlx::query("UPDATE services SET service_state = ?, last_event = ? WHERE service_id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_service_change(
        &self,
        service_id: i64,
        from: ServiceStatus,
        to: ServiceStatus,
        why: &str,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO service_log (service_id, status_date, status_from, status_to, status_why) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(Utc::now().to_rfc3339())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(why)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_service_logs(&self, service_id: i64) -> PersistenceResult<Vec<ServiceLog>> {
        let rows = sqlx::query(
            "SELECT service_id, status_date, status_from, status_to, status_why FROM service_log \
             WHERE service_id = ? ORDER BY status_date DESC",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let time: String = row.try_get("status_date")?;
                Ok(ServiceLog {
                    service_id: row.try_get("service_id")?,
                    time: DateTime::parse_from_rfc3339(&time)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    status_from: parse_status(&row.try_get::<String, _>("status_from")?),
                    status_to: parse_status(&row.try_get::<String, _>("status_to")?),
                    why: row.try_get("status_why")?,
                })
            })
            .collect()
    }

    async fn insert_alert_group(&self, group: &mut AlertGroup) -> PersistenceResult<()> {
        let id = sqlx::query("INSERT INTO alertgroup (owner_id, groupname, emails) VALUES (?, ?, ?)")
            .bind(group.owner_id)
            .bind(&group.group_name)
            .bind(&group.emails)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        group.contact_id = id;
        group.exists = true;
        Ok(())
    }

    async fn update_alert_group(&self, group: &AlertGroup) -> PersistenceResult<()> {
        sqlx::query("UPDATE alertgroup SET groupname = ?, emails = ? WHERE contact_id = ?")
            .bind(&group.group_name)
            .bind(&group.emails)
            .bind(group.contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_alert_group(&self, contact_id: i64) -> PersistenceResult<()> {
        sqlx::query("DELETE FROM alertgroup WHERE contact_id = ?")
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn select_alert_group(&self, contact_id: i64) -> PersistenceResult<AlertGroup> {
        let row = sqlx::query("SELECT * FROM alertgroup WHERE contact_id = ?")
            .bind(contact_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(AlertGroup {
            contact_id: row.try_get("contact_id")?,
            owner_id: row.try_get("owner_id")?,
            group_name: row.try_get("groupname")?,
            emails: row.try_get("emails")?,
            exists: true,
        })
    }

    async fn read_alert_groups(&self, owner_id: i64) -> PersistenceResult<Vec<AlertGroup>> {
        let rows = sqlx::query("SELECT * FROM alertgroup WHERE owner_id = ? ORDER BY groupname ASC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(AlertGroup {
                    contact_id: row.try_get("contact_id")?,
                    owner_id: row.try_get("owner_id")?,
                    group_name: row.try_get("groupname")?,
                    emails: row.try_get("emails")?,
                    exists: true,
                })
            })
            .collect()
    }

    async fn select_agent(&self, name: &str) -> PersistenceResult<Agent> {
        let row = sqlx::query("SELECT * FROM satagents WHERE satagent_name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        let last_seen: String = row.try_get("last_seen")?;
        Ok(Agent {
            name: row.try_get("satagent_name")?,
            location: row.try_get("satagent_location")?,
            access_key: row.try_get("access_key")?,
            last_seen: DateTime::parse_from_rfc3339(&last_seen)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            only_location: row.try_get::<i64, _>("only_location")? != 0,
        })
    }

    async fn insert_agent(&self, name: &str, access_key: &str, location: &str) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO satagents (satagent_name, satagent_location, access_key, last_seen, only_location) \
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(name)
        .bind(location)
        .bind(access_key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_agent_location(&self, name: &str, location: &str) -> PersistenceResult<()> {
        sqlx::query("UPDATE satagents SET satagent_location = ?, last_seen = ? WHERE satagent_name = ?")
            .bind(location)
            .bind(Utc::now().to_rfc3339())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_agent_access_key(&self, name: &str, access_key: &str) -> PersistenceResult<()> {
        let row = sqlx::query("SELECT access_key FROM satagents WHERE satagent_name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) if row.try_get::<String, _>("access_key")? == access_key => Ok(()),
            _ => Err(PersistenceError::NotFound),
        }
    }

    async fn read_agent_locations(&self, since: DateTime<Utc>) -> PersistenceResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT satagent_location FROM satagents WHERE last_seen >= ? ORDER BY satagent_location",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| Ok(row.try_get("satagent_location")?)).collect()
    }
}
