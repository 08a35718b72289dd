use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

use super::{down, up};
use crate::model::{Service, ServiceResult};

const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn check(service: &Service) -> ServiceResult {
    trace!(target = %service.to_check, "tcp check");

    match tokio::time::timeout(TIMEOUT, TcpStream::connect(&service.to_check)).await {
        Ok(Ok(_stream)) => up(service.service_id, "TCP OK"),
        Ok(Err(e)) => down(service.service_id, e.to_string()),
        Err(_) => down(service.service_id, "connection timed out after 5s"),
    }
}
