//! Outbound notification via SMTP.
//!
//! Grounded on `sattypes.SMTPConfiguration`'s `SendMail`/`SendServiceMail`:
//! one plaintext email per recipient, dispatched independently so a slow
//! or failing mailbox never blocks the others. Uses `lettre`'s async
//! tokio transport (see `other_examples/manifests/FrancisVarga-stupid-db`
//! for the crate/feature choice this is grounded on), with STARTTLS
//! opportunistically attempted first and PLAIN auth when a username is
//! configured.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument, warn};

use chrono::{DateTime, Utc};

use crate::model::{AlertGroup, Service, ServiceStatus};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub relay: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: String,
}

/// Sends one email per alert-group recipient for a service transition or
/// dead-service sweep. A delivery failure to one recipient is logged and
/// does not stop delivery to the rest of the group.
pub struct Notifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
}

impl Notifier {
    pub fn new(config: SmtpConfig) -> anyhow::Result<Self> {
        let tls_parameters = TlsParameters::new(config.relay.clone())?;
        let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.relay)
            .tls(Tls::Opportunistic(tls_parameters));
        let builder = match (config.username.clone(), config.password.clone()) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user, pass)),
            _ => builder,
        };
        Ok(Self {
            transport: builder.build(),
            sender: config.sender,
        })
    }

    #[instrument(skip(self, group))]
    pub async fn notify_transition(
        &self,
        service: &Service,
        to: ServiceStatus,
        message: &str,
        event_time: DateTime<Utc>,
        group: &AlertGroup,
    ) {
        let state_word = match to {
            ServiceStatus::Up => "UP",
            ServiceStatus::Down => "DOWN",
            ServiceStatus::Unknown => "UNKNOWN",
        };
        let subject = format!("Your Service: {} is {state_word}", service.name);
        let body = template_body(service, to, message, event_time);

        let sends = group.recipients().map(|to_addr| self.send_one(to_addr, &subject, &body));
        let results = futures::future::join_all(sends).await;
        for (addr, result) in group.recipients().zip(results) {
            if let Err(err) = result {
                warn!("failed to deliver transition email to {addr}: {err}");
            } else {
                info!("delivered transition email to {addr}");
            }
        }
    }

    async fn send_one(&self, to_addr: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.sender.parse()?)
            .to(to_addr.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;
        self.transport.send(email).await?;
        Ok(())
    }
}

/// Picks one of the three transition templates by target state, mirroring
/// `SendServiceMail`'s inline `UP`/`DOWN`/`UNKNOWN` message bodies.
fn template_body(service: &Service, to: ServiceStatus, message: &str, event_time: DateTime<Utc>) -> String {
    let kind = match service.service_type {
        crate::model::ServiceType::Ping => "ping",
        crate::model::ServiceType::Http => "http",
        crate::model::ServiceType::Tcp => "tcp",
        crate::model::ServiceType::Tls => "tls",
    };

    let narrative = match to {
        ServiceStatus::Up => format!(
            "{} is UP and has recovered from an error or an unknown state.",
            service.name
        ),
        ServiceStatus::Down => format!("{} is DOWN and has encountered an error.", service.name),
        ServiceStatus::Unknown => format!(
            "{} is in an UNKNOWN state and has not received any check results in the last 600 seconds.",
            service.name
        ),
    };

    format!(
        "\nmonitoring service notification\n\n{narrative}\n\nType of Check: {kind}\nTarget: {target}\nTimepoint: {time}\nMessage: {message}\n\nBR\nguardia-monitoring\n",
        target = service.to_check,
        time = event_time.to_rfc3339(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;

    fn svc() -> Service {
        Service {
            service_id: 1,
            name: "api".into(),
            owner_id: 1,
            service_type: ServiceType::Http,
            to_check: "https://example.com".into(),
            expected: String::new(),
            interval: 60,
            contact_group: 1,
            next_interval: 60,
            group_name: String::new(),
            service_state: ServiceStatus::Unknown,
            exists: true,
            last_event: String::new(),
            last_seen: Utc::now(),
            locations: "any".into(),
        }
    }

    #[test]
    fn each_target_state_picks_a_distinct_template() {
        let now = Utc::now();
        let up = template_body(&svc(), ServiceStatus::Up, "m", now);
        let down = template_body(&svc(), ServiceStatus::Down, "m", now);
        let unknown = template_body(&svc(), ServiceStatus::Unknown, "m", now);

        assert!(up.contains("recovered"));
        assert!(down.contains("encountered an error"));
        assert!(unknown.contains("UNKNOWN state"));
        assert_ne!(up, down);
        assert_ne!(down, unknown);
    }
}
