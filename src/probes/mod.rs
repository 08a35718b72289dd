//! Probe implementations: four interchangeable kinds, each a pure-ish
//! async function `&Service -> ServiceResult`. None of them retry; a
//! single failure is a single result, left for the analytics engine's
//! debounce to smooth out.

mod http;
mod ping;
mod tcp;
mod tls;

use chrono::Utc;
use tracing::instrument;

use crate::model::{Service, ServiceResult, ServiceType};

/// Dispatch a service to its probe kind and stamp the result with the
/// node name and current time, exactly as `runServiceCheck` does in the
/// original agent.
#[instrument(skip(service), fields(service_id = service.service_id, kind = ?service.service_type))]
pub async fn run_probe(service: &Service, node: &str) -> ServiceResult {
    let mut result = match service.service_type {
        ServiceType::Ping => ping::check(service).await,
        ServiceType::Http => http::check(service).await,
        ServiceType::Tcp => tcp::check(service).await,
        ServiceType::Tls => tls::check(service).await,
    };
    result.test_node = node.to_string();
    result.time = Utc::now();
    result
}

pub(crate) fn down(service_id: i64, message: impl Into<String>) -> ServiceResult {
    ServiceResult {
        service_id,
        status: crate::model::ServiceStatus::Down,
        message: message.into(),
        time: Utc::now(),
        test_node: String::new(),
        rapid_change: false,
    }
}

pub(crate) fn up(service_id: i64, message: impl Into<String>) -> ServiceResult {
    ServiceResult {
        service_id,
        status: crate::model::ServiceStatus::Up,
        message: message.into(),
        time: Utc::now(),
        test_node: String::new(),
        rapid_change: false,
    }
}
