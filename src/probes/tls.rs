use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls_pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::trace;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::down;
use crate::model::{Service, ServiceResult, ServiceStatus};

const TIMEOUT: Duration = Duration::from_secs(5);
/// A certificate expiring within this window is reported as "expiring soon".
const EXPIRING_SOON: chrono::Duration = chrono::Duration::hours(168);

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// TCP-dials then TLS-dials `host:port`, verifying the certificate against
/// the hostname in `ToCheck` and reporting the expiry of every certificate
/// in the chain the server presented.
pub async fn check(service: &Service) -> ServiceResult {
    trace!(target = %service.to_check, "tls check");

    let (host, _port) = match service.to_check.rsplit_once(':') {
        Some(parts) => parts,
        None => return down(service.service_id, "hostname could not be parsed"),
    };

    let server_name = match ServerName::try_from(host.to_string()) {
        Ok(name) => name,
        Err(e) => return down(service.service_id, format!("invalid hostname {host}: {e}")),
    };

    let connect = async {
        let tcp = TcpStream::connect(&service.to_check).await?;
        tls_connector().connect(server_name, tcp).await
    };

    let tls_stream = match tokio::time::timeout(TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return down(service.service_id, e.to_string()),
        Err(_) => return down(service.service_id, "tls handshake timed out after 5s"),
    };

    let certs = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .unwrap_or_default();

    build_result(service.service_id, &certs)
}

fn build_result(service_id: i64, certs: &[CertificateDer<'static>]) -> ServiceResult {
    let now = Utc::now();
    let mut message = String::new();
    let mut down_flag = false;

    for cert in certs {
        match X509Certificate::from_der(cert.as_ref()) {
            Ok((_, parsed)) => {
                let not_after = asn1_time_to_chrono(parsed.validity().not_after);
                let subject = parsed.subject().to_string();

                if not_after <= now {
                    down_flag = true;
                    let _ = writeln!(message, "Expired: Subject {subject} {not_after}");
                } else if not_after - now <= EXPIRING_SOON {
                    down_flag = true;
                    let _ = writeln!(message, "Expiring Soon: Subject {subject} {not_after}");
                } else {
                    let _ = writeln!(message, "Ok: Subject {subject} {not_after}");
                }
            }
            Err(e) => {
                down_flag = true;
                let _ = writeln!(message, "Could not parse certificate: {e}");
            }
        }
    }

    if certs.is_empty() {
        down_flag = true;
        message.push_str("No certificates presented by server\n");
    }

    ServiceResult {
        service_id,
        status: if down_flag {
            ServiceStatus::Down
        } else {
            ServiceStatus::Up
        },
        message,
        time: now,
        test_node: String::new(),
        rapid_change: false,
    }
}

fn asn1_time_to_chrono(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or_else(Utc::now)
}
