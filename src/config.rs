//! CLI configuration surface.
//!
//! Flag names and defaults mirror `main.go`'s `flag.*` declarations;
//! parsing uses `clap`'s derive API, matching the teacher's CLI idiom.
//! Secrets (SMTP password, shared agent key) may additionally be supplied
//! through a `.env` file loaded with `dotenv`, layered under whatever the
//! CLI flags already set.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "guardia", about = "Distributed service-monitoring coordinator/agent")]
pub struct Args {
    /// Coordinator listen address.
    #[arg(long = "http", default_value = "127.0.0.1:8080")]
    pub http: String,

    /// SQLite database path. Empty string disables persistence.
    #[arg(long = "db", default_value = "unfolded.db")]
    pub db: String,

    /// Enable the coordinator ingest server.
    #[arg(long = "server", default_value_t = true)]
    pub server: bool,

    /// Enable an embedded agent scheduler alongside the coordinator.
    #[arg(long = "agent", default_value_t = false)]
    pub agent: bool,

    #[arg(long = "agentname", default_value = "muc1")]
    pub agent_name: String,

    #[arg(long = "agentloc", default_value = "Munich")]
    pub agent_location: String,

    #[arg(long = "onlylocation", default_value_t = false)]
    pub only_location: bool,

    #[arg(long = "serverurl", default_value = "http://localhost:8080")]
    pub server_url: String,

    #[arg(long = "agentkey", default_value = "0000")]
    pub agent_key: String,

    /// SMTP relay host:port. Empty string disables notifications.
    #[arg(long = "smtp", default_value = "")]
    pub smtp: String,

    #[arg(long = "smtpuser", default_value = "")]
    pub smtp_user: String,

    #[arg(long = "smtppass", default_value = "")]
    pub smtp_pass: String,

    #[arg(long = "smtpsender", default_value = "")]
    pub smtp_sender: String,

    #[arg(long = "debug", default_value_t = false)]
    pub debug: bool,
}

impl Args {
    /// Parses CLI flags, first loading a `.env` file (if present) so
    /// secrets can be supplied out-of-band instead of on the process
    /// command line.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Args::parse()
    }

    pub fn smtp_configured(&self) -> bool {
        !self.smtp.is_empty() && !self.smtp_sender.is_empty()
    }
}
