use std::net::IpAddr;
use std::str::FromStr;

use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::{down, up};
use crate::model::{Service, ServiceResult};

const TRANSMIT_COUNT: &str = "5";

/// Runs the system `ping`/`ping6` executable and parses its summary line.
/// No raw-socket capability is assumed, so this shells out exactly like
/// the original agent does.
pub async fn check(service: &Service) -> ServiceResult {
    trace!(target = %service.to_check, "ping check");

    let binary = if IpAddr::from_str(&service.to_check).is_ok_and(|ip| ip.is_ipv6()) {
        "ping6"
    } else {
        "ping"
    };

    let output = match Command::new(binary)
        .arg("-c")
        .arg(TRANSMIT_COUNT)
        .arg(&service.to_check)
        .output()
        .await
    {
        Ok(o) => o,
        Err(e) => return down(service.service_id, format!("could not run {binary}: {e}")),
    };

    // Exit codes outside {0,1,2} mean the host/network is plain
    // unreachable to the ping binary itself (e.g. unknown host).
    match output.status.code() {
        Some(0) | Some(1) | Some(2) => {}
        Some(code) => {
            return down(
                service.service_id,
                format!(
                    "ping exited with code {code}: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            );
        }
        None => return down(service.service_id, "ping terminated by signal"),
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_summary(&stdout) {
        Some((sent, received)) if sent > 0 && received == sent => up(service.service_id, stdout.trim()),
        Some(_) => down(service.service_id, stdout.trim()),
        None => down(service.service_id, format!("could not parse ping output: {stdout}")),
    }
}

/// Parses the "packets transmitted/received" summary line shared (with
/// minor wording differences) by Linux `iputils-ping` and macOS/BSD
/// `ping`, for both the IPv4 and IPv6 variants.
fn parse_summary(output: &str) -> Option<(u32, u32)> {
    let re = Regex::new(
        r"(?P<sent>\d+) packets transmitted, (?P<received>\d+) (?:packets )?received",
    )
    .expect("static regex is valid");

    let caps = re.captures(output)?;
    let sent = caps.name("sent")?.as_str().parse().ok()?;
    let received = caps.name("received")?.as_str().parse().ok()?;
    Some((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_summary() {
        let output = "\
PING example.com (93.184.216.34) 56(84) bytes of data.
64 bytes from 93.184.216.34: icmp_seq=1 ttl=56 time=11.2 ms

--- example.com ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 4005ms
rtt min/avg/max/mdev = 11.123/11.456/11.789/0.234 ms";
        assert_eq!(parse_summary(output), Some((5, 5)));
    }

    #[test]
    fn parses_macos_summary() {
        let output = "\
PING example.com (93.184.216.34): 56 data bytes
64 bytes from 93.184.216.34: icmp_seq=0 ttl=56 time=11.234 ms

--- example.com ping statistics ---
5 packets transmitted, 3 packets received, 40.0% packet loss
round-trip min/avg/max/stddev = 11.123/11.456/11.789/0.234 ms";
        assert_eq!(parse_summary(output), Some((5, 3)));
    }

    #[test]
    fn unparsable_output_returns_none() {
        assert_eq!(parse_summary("garbage output, no summary line"), None);
    }
}
