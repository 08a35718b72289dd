use std::time::Duration;

use tracing::trace;

use super::down;
use crate::model::{Service, ServiceResult, ServiceStatus};

const USER_AGENT: &str = "unfolded ip monitoring agent";
const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn check(service: &Service) -> ServiceResult {
    trace!(url = %service.to_check, "http check");

    let client = match reqwest::Client::builder().timeout(TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => return down(service.service_id, e.to_string()),
    };

    let response = match client
        .get(&service.to_check)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return down(service.service_id, e.to_string()),
    };

    let status_code = response.status();
    let mut up = matches!(
        status_code.as_u16(),
        200 | 201 | 301 | 302
    );

    let mut expected_note = String::new();
    if !service.expected.is_empty() {
        match response.text().await {
            Ok(body) if body.contains(&service.expected) => {
                expected_note = format!(" Text '{}' found", service.expected);
            }
            Ok(_) => {
                up = false;
                expected_note = format!(" Text '{}' NOT found", service.expected);
            }
            Err(e) => {
                up = false;
                expected_note = format!(" failed to read body: {e}");
            }
        }
    }

    ServiceResult {
        service_id: service.service_id,
        status: if up {
            ServiceStatus::Up
        } else {
            ServiceStatus::Down
        },
        message: format!(
            "HTTP Status: {} ({}){}",
            status_code.as_u16(),
            status_code.canonical_reason().unwrap_or("unknown"),
            expected_note
        ),
        time: chrono::Utc::now(),
        test_node: String::new(),
        rapid_change: false,
    }
}
